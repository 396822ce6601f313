use std::time::Duration;

use super::common::*;

use crate::workflows::credit::audit::actions;
use crate::workflows::credit::domain::{AccountDraft, AffectedTable, Role, UserId};
use crate::workflows::credit::error::ErrorKind;
use crate::workflows::credit::repository::{AuditFilter, PageRequest, UserFilter};
use crate::workflows::credit::tokens::{TokenIssuer, BEARER};

fn analyst(username: &str) -> AccountDraft {
    AccountDraft {
        username: username.to_string(),
        display_name: "Analyst".to_string(),
        secret: SECRET.to_string(),
        role: Role::Risk,
    }
}

#[test]
fn authenticate_audits_successful_login() {
    let desk = build_desk();

    let user = desk
        .service
        .authenticate("LVEGA", SECRET, Some("192.168.1.4".to_string()))
        .expect("username matching ignores case");
    assert_eq!(user.id, desk.risk.id());

    let filter = AuditFilter {
        actor: Some(user.id),
        table: Some(AffectedTable::Users),
        ..AuditFilter::default()
    };
    let entries = desk
        .service
        .audit_log(&desk.admin, &filter, PageRequest::audit(None, None))
        .expect("audit readable")
        .items;
    let login = entries
        .iter()
        .find(|entry| entry.action == actions::LOGIN)
        .expect("login audited");
    assert_eq!(login.source_address.as_deref(), Some("192.168.1.4"));
}

#[test]
fn wrong_secret_is_checked_before_active_flag() {
    let desk = build_desk();
    desk.service
        .deactivate_user(&desk.admin, desk.commercial.id())
        .expect("admin deactivates");

    let err = desk
        .service
        .authenticate("cmartin", "Wrong2024", None)
        .expect_err("wrong secret");
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);

    let err = desk
        .service
        .authenticate("cmartin", SECRET, None)
        .expect_err("deactivated account");
    assert_eq!(err.kind(), ErrorKind::Deactivated);

    let err = desk
        .service
        .authenticate("nobody", SECRET, None)
        .expect_err("unknown username");
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
}

#[test]
fn login_issues_token_for_the_account() {
    let desk = build_desk();

    let session = desk
        .service
        .login("lvega", SECRET, None)
        .expect("valid credentials");
    assert_eq!(session.token_type, BEARER);
    assert_eq!(session.user.id, desk.risk.id());

    let caller = desk
        .service
        .resolve_token(&session.token, Some("10.1.1.1".to_string()))
        .expect("token resolves");
    assert_eq!(caller.id(), desk.risk.id());
    assert_eq!(caller.source_address.as_deref(), Some("10.1.1.1"));

    let err = desk
        .service
        .login("lvega", "Wrong2024", None)
        .expect_err("wrong secret");
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);
}

#[test]
fn tokens_from_another_key_are_refused() {
    let desk = build_desk();
    let foreign = TokenIssuer::new(b"another-deployment", Duration::from_secs(600));
    let (token, _) = foreign.issue(&desk.admin.user).expect("token issued");

    let err = desk
        .service
        .resolve_token(&token, None)
        .expect_err("foreign signature");
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);

    let err = desk
        .service
        .resolve_token(&desk.admin.id().to_string(), None)
        .expect_err("bare user id");
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[test]
fn tokens_stop_working_once_deactivated() {
    let desk = build_desk();
    let session = desk
        .service
        .login("cmartin", SECRET, None)
        .expect("valid credentials");
    desk.service
        .deactivate_user(&desk.admin, desk.commercial.id())
        .expect("admin deactivates");

    let err = desk
        .service
        .resolve_token(&session.token, None)
        .expect_err("deactivated");
    assert_eq!(err.kind(), ErrorKind::Deactivated);
}

#[test]
fn deactivated_callers_are_refused() {
    let desk = build_desk();
    desk.service
        .deactivate_user(&desk.admin, desk.risk.id())
        .expect("admin deactivates");

    let err = desk
        .service
        .resolve_caller(desk.risk.id(), None)
        .expect_err("deactivated");
    assert_eq!(err.kind(), ErrorKind::Deactivated);

    let err = desk
        .service
        .resolve_caller(UserId(424_242), None)
        .expect_err("unknown actor");
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);

    let reactivated = desk
        .service
        .activate_user(&desk.admin, desk.risk.id())
        .expect("admin reactivates");
    assert!(reactivated.active);
    assert!(desk.service.resolve_caller(desk.risk.id(), None).is_ok());
}

#[test]
fn admin_cannot_deactivate_self() {
    let desk = build_desk();

    let err = desk
        .service
        .deactivate_user(&desk.admin, desk.admin.id())
        .expect_err("self deactivation");
    assert_eq!(err.kind(), ErrorKind::SelfTargetDenied);

    let admin = desk
        .service
        .get_user(&desk.admin, desk.admin.id())
        .expect("admin reads self");
    assert!(admin.active);
}

#[test]
fn usernames_are_unique_ignoring_case() {
    let desk = build_desk();
    desk.service
        .create_user(&desk.admin, analyst("mflores"))
        .expect("first account");

    let err = desk
        .service
        .create_user(&desk.admin, analyst("MFlores"))
        .expect_err("duplicate username");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn only_admins_manage_users() {
    let desk = build_desk();

    let err = desk
        .service
        .create_user(&desk.commercial, analyst("mflores"))
        .expect_err("commercial cannot create users");
    assert_eq!(err.kind(), ErrorKind::RoleDenied);

    let err = desk
        .service
        .get_user(&desk.commercial, desk.risk.id())
        .expect_err("other accounts hidden");
    assert_eq!(err.kind(), ErrorKind::RoleDenied);

    let own = desk
        .service
        .get_user(&desk.commercial, desk.commercial.id())
        .expect("own account readable");
    assert_eq!(own.username, "cmartin");

    let promoted = desk
        .service
        .set_role(&desk.admin, desk.commercial.id(), Role::Risk)
        .expect("admin changes role");
    assert_eq!(promoted.role, Role::Risk);

    let risk_users = desk
        .service
        .list_users(
            &desk.admin,
            &UserFilter {
                role: Some(Role::Risk),
                active: None,
            },
            PageRequest::default(),
        )
        .expect("admin lists users");
    assert_eq!(risk_users.total, 2);
}

#[test]
fn weak_accounts_are_rejected() {
    let desk = build_desk();
    let mut draft = analyst("a!");
    draft.secret = "short".to_string();

    let err = desk
        .service
        .create_user(&desk.admin, draft)
        .expect_err("invalid account");
    let validation = err.validation().expect("field violations");
    assert!(validation.has_field("username"));
    assert!(validation.has_field("secret"));
}

#[test]
fn change_secret_requires_current_secret() {
    let desk = build_desk();

    let err = desk
        .service
        .change_secret(&desk.commercial, "Wrong2024", "Fresh2025x")
        .expect_err("wrong current secret");
    assert_eq!(err.kind(), ErrorKind::InvalidCredentials);

    let err = desk
        .service
        .change_secret(&desk.commercial, SECRET, "weak")
        .expect_err("weak replacement");
    assert_eq!(err.kind(), ErrorKind::Validation);

    desk.service
        .change_secret(&desk.commercial, SECRET, "Fresh2025x")
        .expect("secret changed");
    assert!(desk.service.authenticate("cmartin", "Fresh2025x", None).is_ok());
    assert_eq!(
        desk.service
            .authenticate("cmartin", SECRET, None)
            .expect_err("old secret retired")
            .kind(),
        ErrorKind::InvalidCredentials
    );
}

#[test]
fn bootstrap_only_seeds_an_empty_store() {
    let desk = build_desk();
    let again = desk
        .service
        .bootstrap(accounts())
        .expect("second bootstrap is a no-op");
    assert!(again.is_empty());

    let seeded: Vec<_> = all_audit(&desk)
        .into_iter()
        .filter(|entry| entry.action == actions::BOOTSTRAP_USER)
        .collect();
    assert_eq!(seeded.len(), accounts().len());
    assert!(seeded
        .iter()
        .all(|entry| entry.affected_id == Some(entry.actor_id.0)));
}
