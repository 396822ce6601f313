use crate::infra::fixture_accounts;
use clap::Args;
use credit_desk::error::AppError;
use credit_desk::workflows::credit::{
    BcryptHasher, Caller, CreditDeskService, DeskSettings, FixtureBureau, MemoryStore,
    RequestDraft, VerdictDraft, VerdictOutcome,
};
use rust_decimal::Decimal;
use std::sync::Arc;

const DEMO_SECRET: &str = "DemoDesk2024";
const DEMO_SOURCE: &str = "127.0.0.1";
const DEMO_HASH_COST: u32 = 4;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Taxpayer identifier of the client company (11 digits)
    #[arg(long, default_value = "20601234567")]
    pub(crate) tax_id: String,
    /// Legal name of the client company
    #[arg(long, default_value = "Andes Logistics SAC")]
    pub(crate) company: String,
    /// Requested credit amount
    #[arg(long, default_value = "25000.00")]
    pub(crate) amount: Decimal,
    /// Requested units
    #[arg(long, default_value_t = 12)]
    pub(crate) units: i64,
    /// Verdict to record: approved, rejected, or returned
    #[arg(long, default_value = "approved", value_parser = parse_outcome)]
    pub(crate) outcome: VerdictOutcome,
    /// Print the CSV bureau report
    #[arg(long)]
    pub(crate) show_report: bool,
}

fn parse_outcome(raw: &str) -> Result<VerdictOutcome, String> {
    VerdictOutcome::parse(raw).ok_or_else(|| format!("unknown verdict outcome '{raw}'"))
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        tax_id,
        company,
        amount,
        units,
        outcome,
        show_report,
    } = args;

    let service = CreditDeskService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(FixtureBureau::new()),
        DeskSettings::default(),
    )
    .with_hasher(Arc::new(BcryptHasher::with_cost(DEMO_HASH_COST)));
    service.bootstrap(fixture_accounts(DEMO_SECRET))?;

    let login = |username: &str| -> Result<Caller, AppError> {
        let session = service.login(username, DEMO_SECRET, Some(DEMO_SOURCE.to_string()))?;
        Ok(service.resolve_token(&session.token, Some(DEMO_SOURCE.to_string()))?)
    };
    let admin = login("admin")?;
    let commercial = login("cmartin")?;
    let analyst = login("lvega")?;

    println!("Credit desk demo (in-memory store, fixture bureau)");
    let draft = RequestDraft {
        tax_id,
        company_name: company,
        requested_amount: amount,
        requested_units: units,
        comment: Some("opened from the CLI demo".to_string()),
    };
    let request = match service.create_request(&commercial, draft) {
        Ok(request) => request,
        Err(err) => {
            println!("  Request rejected: {}", err);
            return Ok(());
        }
    };
    println!(
        "- {} opened request {} for {} ({}) -> {}",
        commercial.user.username,
        request.id,
        request.company_name,
        request.tax_id,
        request.state.label()
    );
    println!(
        "  Requested {} across {} units",
        request.requested_amount, request.requested_units
    );

    let lookup = match service.perform_lookup(&analyst, request.id).await {
        Ok(lookup) => lookup,
        Err(err) => {
            println!("  Bureau lookup unavailable: {}", err);
            return Ok(());
        }
    };
    println!(
        "- {} attached bureau lookup {} at {}",
        analyst.user.username,
        lookup.id,
        lookup.queried_at.format("%Y-%m-%d %H:%M:%S")
    );
    match serde_json::to_string_pretty(&lookup.raw_result) {
        Ok(json) => println!("  Bureau payload:\n{}", json),
        Err(err) => println!("  Bureau payload unavailable: {}", err),
    }

    let approved = outcome == VerdictOutcome::Approved;
    let verdict = VerdictDraft {
        outcome,
        approved_amount: approved.then_some(amount),
        approved_units: approved.then_some(units),
        lookup_id: Some(lookup.id),
        comments: Some(format!("{} from the CLI demo", outcome.label())),
    };
    let verdict = match service.record_verdict(&analyst, request.id, verdict) {
        Ok(verdict) => verdict,
        Err(err) => {
            println!("  Verdict rejected: {}", err);
            return Ok(());
        }
    };
    let request = service.get_request(&commercial, request.id)?;
    println!(
        "- Verdict {} recorded: {} -> request now {}",
        verdict.id,
        verdict.outcome.label(),
        request.state.label()
    );
    if let (Some(amount), Some(units)) = (verdict.approved_amount, verdict.approved_units) {
        println!("  Approved {} across {} units", amount, units);
    }

    if show_report {
        let report = service.export_lookup_report(&analyst, request.id)?;
        println!("\nBureau report ({})", report.file_name);
        print!("{}", report.as_text());
    }

    println!("\nAudit trail for request {}", request.id);
    for entry in service.request_trail(&admin, request.id)? {
        println!(
            "  - #{} {} by user {} ({}) from {}",
            entry.id,
            entry.action,
            entry.actor_id,
            entry.actor_role.label(),
            entry.source_address.as_deref().unwrap_or("unknown")
        );
    }

    let snapshot = service.audit_diagnostics(&admin)?;
    println!(
        "\nAudit policy {} | {} failed appends",
        snapshot.policy.label(),
        snapshot.failures
    );

    Ok(())
}
