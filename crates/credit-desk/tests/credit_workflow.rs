use std::sync::Arc;

use credit_desk::workflows::credit::{
    AccountDraft, AuditFilter, BcryptHasher, Caller, ClientFilter, ClientStatus, CreditDeskService,
    DeskSettings, ErrorKind, FixtureBureau, HistoricalClientDraft, PageRequest, RequestDraft,
    RequestFilter, RequestId, RequestState, Role, SqliteStore, VerdictDraft, VerdictOutcome,
};
use rust_decimal_macros::dec;

const SECRET: &str = "Durable2024";

type Desk = CreditDeskService<SqliteStore, FixtureBureau>;

fn open_desk(path: &std::path::Path, settings: DeskSettings) -> Desk {
    let store = SqliteStore::open(path).expect("sqlite store opens");
    CreditDeskService::new(Arc::new(store), Arc::new(FixtureBureau::new()), settings)
        .with_hasher(Arc::new(BcryptHasher::with_cost(4)))
}

fn seed(desk: &Desk) -> (Caller, Caller, Caller) {
    let users = desk
        .bootstrap(
            [
                ("root", Role::Admin),
                ("seller", Role::Commercial),
                ("analyst", Role::Risk),
            ]
            .into_iter()
            .map(|(username, role)| AccountDraft {
                username: username.to_string(),
                display_name: username.to_uppercase(),
                secret: SECRET.to_string(),
                role,
            })
            .collect(),
        )
        .expect("bootstrap");
    let caller = |index: usize| Caller::new(users[index].clone(), Some("127.0.0.1".into()));
    (caller(0), caller(1), caller(2))
}

fn draft() -> RequestDraft {
    RequestDraft {
        tax_id: "20554433221".to_string(),
        company_name: "Pacific Textiles SA".to_string(),
        requested_amount: dec!(80000),
        requested_units: 3,
        comment: None,
    }
}

#[tokio::test]
async fn sqlite_desk_survives_restart() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("credit-desk.db");

    let request_id = {
        let desk = open_desk(&path, DeskSettings::strict());
        let (_, seller, analyst) = seed(&desk);
        let request = desk.create_request(&seller, draft()).expect("request opened");
        desk.perform_lookup(&analyst, request.id)
            .await
            .expect("lookup attached");
        desk.record_verdict(
            &analyst,
            request.id,
            VerdictDraft {
                outcome: VerdictOutcome::Approved,
                approved_amount: Some(dec!(1000)),
                approved_units: Some(5),
                lookup_id: None,
                comments: Some("collateral verified".into()),
            },
        )
        .expect("verdict recorded");
        request.id
    };

    let desk = open_desk(&path, DeskSettings::default());
    let user = desk
        .authenticate("root", SECRET, None)
        .expect("seeded admin survives restart");
    let admin = Caller::new(user, None);

    let request = desk.get_request(&admin, request_id).expect("request persisted");
    assert_eq!(request.state, RequestState::Approved);
    assert_eq!(request.requested_amount, dec!(80000));

    let verdict = desk
        .verdict_for_request(&admin, request_id)
        .expect("verdict persisted");
    assert_eq!(verdict.approved_amount, Some(dec!(1000)));
    assert_eq!(verdict.approved_units, Some(5));
    assert!(verdict.lookup_id.is_some());

    let trail = desk.request_trail(&admin, request_id).expect("trail persisted");
    assert_eq!(trail.len(), 3);

    let again = desk
        .bootstrap(vec![AccountDraft {
            username: "intruder".into(),
            display_name: "Intruder".into(),
            secret: SECRET.into(),
            role: Role::Admin,
        }])
        .expect("bootstrap is idempotent");
    assert!(again.is_empty());
}

#[tokio::test]
async fn unknown_request_is_not_found_and_writes_nothing() {
    let dir = tempfile::tempdir().expect("temp dir");
    let desk = open_desk(&dir.path().join("desk.db"), DeskSettings::default());
    let (admin, _, analyst) = seed(&desk);

    let before = desk
        .audit_log(&admin, &AuditFilter::default(), PageRequest::audit(None, None))
        .expect("audit readable")
        .total;
    let err = desk
        .perform_lookup(&analyst, RequestId(999_999))
        .await
        .expect_err("no such request");
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let after = desk
        .audit_log(&admin, &AuditFilter::default(), PageRequest::audit(None, None))
        .expect("audit readable")
        .total;
    assert_eq!(before, after);
}

#[test]
fn search_matches_tax_id_and_company_name() {
    let dir = tempfile::tempdir().expect("temp dir");
    let desk = open_desk(&dir.path().join("desk.db"), DeskSettings::default());
    let (_, seller, analyst) = seed(&desk);
    desk.create_request(&seller, draft()).expect("first request");
    desk.create_request(
        &seller,
        RequestDraft {
            tax_id: "10456789012".into(),
            company_name: "Quinoa Export EIRL".into(),
            ..draft()
        },
    )
    .expect("second request");

    for (term, expected) in [("textiles", 1), ("104567", 1), ("a", 2), ("nothing", 0)] {
        let page = desk
            .list_requests(
                &analyst,
                RequestFilter {
                    search: Some(term.to_string()),
                    ..RequestFilter::default()
                },
                PageRequest::default(),
            )
            .expect("search runs");
        assert_eq!(page.total, expected, "search term {term}");
    }
}

#[test]
fn historical_clients_and_sessions_survive_restart() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("desk.db");

    let token = {
        let desk = open_desk(&path, DeskSettings::strict());
        let (_, _, analyst) = seed(&desk);
        desk.create_historical_client(
            &analyst,
            HistoricalClientDraft {
                tax_id: "20554433221".into(),
                company_name: "Pacific_Textiles 100% SA".into(),
                address: None,
                phone: Some("+51 1 555 0101".into()),
                email: None,
                sector: Some("Textil".into()),
                approved_amount: Some(dec!(120000)),
                approved_units: Some(10),
                status: None,
            },
        )
        .expect("client registered");
        desk.login("analyst", SECRET, None).expect("login").token
    };

    let desk = open_desk(&path, DeskSettings::default());
    let analyst = desk
        .resolve_token(&token, None)
        .expect("token signed before restart still resolves");

    let client = desk
        .historical_client_by_tax_id(&analyst, "20554433221")
        .expect("client persisted");
    assert_eq!(client.status, ClientStatus::Active);
    assert_eq!(client.approved_amount, Some(dec!(120000)));

    for (term, expected) in [("100%", 1), ("c_t", 1), ("ic%sa", 0), ("a_i", 0)] {
        let page = desk
            .list_historical_clients(
                &analyst,
                &ClientFilter {
                    search: Some(term.to_string()),
                    ..ClientFilter::default()
                },
                PageRequest::default(),
            )
            .expect("search runs");
        assert_eq!(page.total, expected, "search term {term}");
    }
}
