use std::fmt;

use rust_decimal::Decimal;
use serde::Serialize;

use super::domain::{
    AccountDraft, ClientStatus, HistoricalClientDraft, HistoricalClientEdit, ManualAuditDraft,
    RequestDraft, RequestEdit, Role, TaxId, VerdictOutcome, TAX_ID_LENGTH,
};

const COMPANY_NAME_MIN: usize = 3;
const COMPANY_NAME_MAX: usize = 255;
const USERNAME_MIN: usize = 3;
const USERNAME_MAX: usize = 50;
const DISPLAY_NAME_MAX: usize = 100;
const SECRET_MIN: usize = 6;
const ACTION_MAX: usize = 100;
const COMMENT_MAX: usize = 2_000;
const CONTACT_FIELD_MAX: usize = 255;

/// One rejected field with a human readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub reason: String,
}

/// Boundary validation failure. Carries every violated field, not just the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn single(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation {
                field,
                reason: reason.into(),
            }],
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.violations.iter().any(|violation| violation.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid input: ")?;
        for (index, violation) in self.violations.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{} {}", violation.field, violation.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Default)]
struct Violations(Vec<FieldViolation>);

impl Violations {
    fn push(&mut self, field: &'static str, reason: impl Into<String>) {
        self.0.push(FieldViolation {
            field,
            reason: reason.into(),
        });
    }

    fn finish<T>(self, value: T) -> Result<T, ValidationError> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(ValidationError { violations: self.0 })
        }
    }
}

/// Request fields after boundary checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub tax_id: TaxId,
    pub company_name: String,
    pub requested_amount: Decimal,
    pub requested_units: u32,
    pub comment: Option<String>,
}

/// Sparse change set for a pending request. At least one field is present.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestChanges {
    pub requested_amount: Option<Decimal>,
    pub requested_units: Option<u32>,
    pub comment: Option<String>,
}

/// Verdict terms with amounts present exactly when the outcome is Approved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerdictTerms {
    pub outcome: VerdictOutcome,
    pub approved_amount: Option<Decimal>,
    pub approved_units: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedAccount {
    pub username: String,
    pub display_name: String,
    pub secret: String,
    pub role: Role,
}

pub fn validate_request(draft: RequestDraft) -> Result<ValidatedRequest, ValidationError> {
    let mut violations = Violations::default();

    let tax_id = TaxId::parse(&draft.tax_id);
    if tax_id.is_none() {
        violations.push(
            "tax_id",
            format!("must be exactly {TAX_ID_LENGTH} digits"),
        );
    }

    let company_name = check_company_name(&mut violations, &draft.company_name);

    check_amount(&mut violations, "requested_amount", draft.requested_amount);
    let units = check_units(&mut violations, "requested_units", draft.requested_units);
    let comment = normalize_comment(&mut violations, "comment", draft.comment);

    match (tax_id, units) {
        (Some(tax_id), Some(requested_units)) => violations.finish(ValidatedRequest {
            tax_id,
            company_name,
            requested_amount: draft.requested_amount,
            requested_units,
            comment,
        }),
        _ => Err(ValidationError {
            violations: violations.0,
        }),
    }
}

pub fn validate_edit(edit: RequestEdit) -> Result<RequestChanges, ValidationError> {
    let mut violations = Violations::default();

    if edit.requested_amount.is_none() && edit.requested_units.is_none() && edit.comment.is_none()
    {
        violations.push("edit", "must change at least one field");
    }

    if let Some(amount) = edit.requested_amount {
        check_amount(&mut violations, "requested_amount", amount);
    }
    let requested_units = match edit.requested_units {
        Some(units) => check_units(&mut violations, "requested_units", units),
        None => None,
    };
    let comment = normalize_comment(&mut violations, "comment", edit.comment);

    violations.finish(RequestChanges {
        requested_amount: edit.requested_amount,
        requested_units,
        comment,
    })
}

/// Approved needs a positive amount and at least one unit; other outcomes must carry neither.
pub fn validate_verdict_terms(
    outcome: VerdictOutcome,
    approved_amount: Option<Decimal>,
    approved_units: Option<i64>,
) -> Result<VerdictTerms, ValidationError> {
    let mut violations = Violations::default();

    match outcome {
        VerdictOutcome::Approved => {
            match approved_amount {
                Some(amount) => check_amount(&mut violations, "approved_amount", amount),
                None => violations.push("approved_amount", "is required when approving"),
            }
            let units = match approved_units {
                Some(units) => check_units(&mut violations, "approved_units", units),
                None => {
                    violations.push("approved_units", "is required when approving");
                    None
                }
            };
            violations.finish(VerdictTerms {
                outcome,
                approved_amount,
                approved_units: units,
            })
        }
        VerdictOutcome::Rejected | VerdictOutcome::Returned => {
            if approved_amount.is_some() {
                violations.push(
                    "approved_amount",
                    format!("must be empty when the outcome is {}", outcome.label()),
                );
            }
            if approved_units.is_some() {
                violations.push(
                    "approved_units",
                    format!("must be empty when the outcome is {}", outcome.label()),
                );
            }
            violations.finish(VerdictTerms {
                outcome,
                approved_amount: None,
                approved_units: None,
            })
        }
    }
}

pub fn validate_account(draft: AccountDraft) -> Result<ValidatedAccount, ValidationError> {
    let mut violations = Violations::default();

    let username = draft.username.trim().to_string();
    check_username(&mut violations, &username);

    let display_name = draft.display_name.trim().to_string();
    if display_name.is_empty() || display_name.chars().count() > DISPLAY_NAME_MAX {
        violations.push(
            "display_name",
            format!("must be between 1 and {DISPLAY_NAME_MAX} characters"),
        );
    }

    check_secret(&mut violations, "secret", &draft.secret);

    violations.finish(ValidatedAccount {
        username,
        display_name,
        secret: draft.secret,
        role: draft.role,
    })
}

pub fn validate_secret(field: &'static str, secret: &str) -> Result<(), ValidationError> {
    let mut violations = Violations::default();
    check_secret(&mut violations, field, secret);
    violations.finish(())
}

pub fn validate_manual_audit(
    draft: ManualAuditDraft,
) -> Result<ManualAuditDraft, ValidationError> {
    let mut violations = Violations::default();

    let action = draft.action.trim().to_string();
    if action.is_empty() || action.chars().count() > ACTION_MAX {
        violations.push(
            "action",
            format!("must be between 1 and {ACTION_MAX} characters"),
        );
    }
    if draft.affected_id.is_some() && draft.affected_table.is_none() {
        violations.push("affected_table", "is required when affected_id is set");
    }
    if let Some(details) = &draft.details {
        if !details.is_object() {
            violations.push("details", "must be a JSON object");
        }
    }
    let comment = normalize_comment(&mut violations, "comment", draft.comment);

    violations.finish(ManualAuditDraft {
        action,
        affected_table: draft.affected_table,
        affected_id: draft.affected_id,
        comment,
        details: draft.details,
    })
}

/// Historical client fields after boundary checks.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedClient {
    pub tax_id: TaxId,
    pub company_name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub sector: Option<String>,
    pub approved_amount: Option<Decimal>,
    pub approved_units: Option<u32>,
    pub status: ClientStatus,
}

/// Sparse change set for a historical client. `Some(None)` clears a contact field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientChanges {
    pub company_name: Option<String>,
    pub address: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub email: Option<Option<String>>,
    pub sector: Option<Option<String>>,
    pub approved_amount: Option<Decimal>,
    pub approved_units: Option<u32>,
    pub status: Option<ClientStatus>,
}

pub fn validate_historical_client(
    draft: HistoricalClientDraft,
) -> Result<ValidatedClient, ValidationError> {
    let mut violations = Violations::default();

    let tax_id = TaxId::parse(&draft.tax_id);
    if tax_id.is_none() {
        violations.push("tax_id", format!("must be exactly {TAX_ID_LENGTH} digits"));
    }
    let company_name = check_company_name(&mut violations, &draft.company_name);
    let address = contact_field(&mut violations, "address", draft.address);
    let phone = contact_field(&mut violations, "phone", draft.phone);
    let email = contact_field(&mut violations, "email", draft.email);
    check_email(&mut violations, email.as_deref());
    let sector = contact_field(&mut violations, "sector", draft.sector);
    if let Some(amount) = draft.approved_amount {
        check_amount(&mut violations, "approved_amount", amount);
    }
    let approved_units = draft
        .approved_units
        .and_then(|units| check_units(&mut violations, "approved_units", units));

    let Some(tax_id) = tax_id else {
        return Err(ValidationError {
            violations: violations.0,
        });
    };
    violations.finish(ValidatedClient {
        tax_id,
        company_name,
        address,
        phone,
        email,
        sector,
        approved_amount: draft.approved_amount,
        approved_units,
        status: draft.status.unwrap_or_default(),
    })
}

pub fn validate_client_edit(edit: HistoricalClientEdit) -> Result<ClientChanges, ValidationError> {
    let mut violations = Violations::default();

    if edit == HistoricalClientEdit::default() {
        violations.push("edit", "must change at least one field");
    }
    let company_name = edit
        .company_name
        .map(|name| check_company_name(&mut violations, &name));
    let address = edit
        .address
        .map(|raw| contact_field(&mut violations, "address", Some(raw)));
    let phone = edit
        .phone
        .map(|raw| contact_field(&mut violations, "phone", Some(raw)));
    let email = edit
        .email
        .map(|raw| contact_field(&mut violations, "email", Some(raw)));
    if let Some(email) = &email {
        check_email(&mut violations, email.as_deref());
    }
    let sector = edit
        .sector
        .map(|raw| contact_field(&mut violations, "sector", Some(raw)));
    if let Some(amount) = edit.approved_amount {
        check_amount(&mut violations, "approved_amount", amount);
    }
    let approved_units = edit
        .approved_units
        .and_then(|units| check_units(&mut violations, "approved_units", units));

    violations.finish(ClientChanges {
        company_name,
        address,
        phone,
        email,
        sector,
        approved_amount: edit.approved_amount,
        approved_units,
        status: edit.status,
    })
}

pub fn normalize_comments(raw: Option<String>) -> Result<Option<String>, ValidationError> {
    let mut violations = Violations::default();
    let comments = normalize_comment(&mut violations, "comments", raw);
    violations.finish(comments)
}

fn check_company_name(violations: &mut Violations, raw: &str) -> String {
    let company_name = raw.trim().to_string();
    let name_len = company_name.chars().count();
    if !(COMPANY_NAME_MIN..=COMPANY_NAME_MAX).contains(&name_len) {
        violations.push(
            "company_name",
            format!("must be between {COMPANY_NAME_MIN} and {COMPANY_NAME_MAX} characters"),
        );
    }
    company_name
}

/// Trimmed optional text; blank input becomes `None`.
fn contact_field(
    violations: &mut Violations,
    field: &'static str,
    raw: Option<String>,
) -> Option<String> {
    let trimmed = raw.map(|value| value.trim().to_string())?;
    if trimmed.chars().count() > CONTACT_FIELD_MAX {
        violations.push(field, format!("must be at most {CONTACT_FIELD_MAX} characters"));
    }
    (!trimmed.is_empty()).then_some(trimmed)
}

fn check_email(violations: &mut Violations, email: Option<&str>) {
    let Some(email) = email else {
        return;
    };
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| {
            !local.is_empty() && !domain.contains('@') && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        });
    if !well_formed {
        violations.push("email", "must be an address like name@example.com");
    }
}

fn check_amount(violations: &mut Violations, field: &'static str, amount: Decimal) {
    if amount <= Decimal::ZERO {
        violations.push(field, "must be greater than zero");
    }
}

fn check_units(violations: &mut Violations, field: &'static str, units: i64) -> Option<u32> {
    match u32::try_from(units) {
        Ok(units) if units >= 1 => Some(units),
        _ => {
            violations.push(field, "must be a whole number of at least 1");
            None
        }
    }
}

fn check_username(violations: &mut Violations, username: &str) {
    let len = username.chars().count();
    let charset_ok = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) || !charset_ok {
        violations.push(
            "username",
            format!(
                "must be {USERNAME_MIN} to {USERNAME_MAX} letters, digits or underscores"
            ),
        );
    }
}

fn check_secret(violations: &mut Violations, field: &'static str, secret: &str) {
    let strong = secret.chars().count() >= SECRET_MIN
        && secret.chars().any(|c| c.is_ascii_uppercase())
        && secret.chars().any(|c| c.is_ascii_lowercase())
        && secret.chars().any(|c| c.is_ascii_digit());
    if !strong {
        violations.push(
            field,
            format!(
                "must have at least {SECRET_MIN} characters including upper case, lower case and a digit"
            ),
        );
    }
}

fn normalize_comment(
    violations: &mut Violations,
    field: &'static str,
    raw: Option<String>,
) -> Option<String> {
    let trimmed = raw.map(|value| value.trim().to_string())?;
    if trimmed.chars().count() > COMMENT_MAX {
        violations.push(field, format!("must be at most {COMMENT_MAX} characters"));
    }
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn draft() -> RequestDraft {
        RequestDraft {
            tax_id: "20123456789".to_string(),
            company_name: "Acme Holdings".to_string(),
            requested_amount: dec!(1500.50),
            requested_units: 3,
            comment: Some("  first contact  ".to_string()),
        }
    }

    #[test]
    fn accepts_well_formed_request() {
        let validated = validate_request(draft()).expect("valid draft");
        assert_eq!(validated.tax_id.as_str(), "20123456789");
        assert_eq!(validated.requested_units, 3);
        assert_eq!(validated.comment.as_deref(), Some("first contact"));
    }

    #[test]
    fn collects_every_request_violation() {
        let mut bad = draft();
        bad.tax_id = "2012345".to_string();
        bad.company_name = "Ac".to_string();
        bad.requested_amount = dec!(0);
        bad.requested_units = 0;

        let error = validate_request(bad).expect_err("invalid draft");
        for field in ["tax_id", "company_name", "requested_amount", "requested_units"] {
            assert!(error.has_field(field), "missing violation for {field}");
        }
    }

    #[test]
    fn rejects_non_digit_tax_ids() {
        let mut bad = draft();
        bad.tax_id = "2012345678A".to_string();
        assert!(validate_request(bad)
            .expect_err("letters rejected")
            .has_field("tax_id"));
    }

    #[test]
    fn empty_edit_is_rejected() {
        let error = validate_edit(RequestEdit::default()).expect_err("empty edit");
        assert!(error.has_field("edit"));
    }

    #[test]
    fn edit_with_negative_units_is_rejected() {
        let error = validate_edit(RequestEdit {
            requested_units: Some(-2),
            ..RequestEdit::default()
        })
        .expect_err("negative units");
        assert!(error.has_field("requested_units"));
    }

    #[test]
    fn approval_requires_amount_and_units() {
        let error = validate_verdict_terms(VerdictOutcome::Approved, None, Some(5))
            .expect_err("amount missing");
        assert!(error.has_field("approved_amount"));

        let terms = validate_verdict_terms(VerdictOutcome::Approved, Some(dec!(1000)), Some(5))
            .expect("complete approval");
        assert_eq!(terms.approved_units, Some(5));
    }

    #[test]
    fn rejection_carries_no_amounts() {
        let terms =
            validate_verdict_terms(VerdictOutcome::Rejected, None, None).expect("bare rejection");
        assert_eq!(terms.approved_amount, None);
        assert_eq!(terms.approved_units, None);

        let error = validate_verdict_terms(VerdictOutcome::Returned, Some(dec!(10)), None)
            .expect_err("amount on returned");
        assert!(error.has_field("approved_amount"));
    }

    #[test]
    fn account_rules_cover_username_and_secret() {
        let error = validate_account(AccountDraft {
            username: "bad name".to_string(),
            display_name: "Bad".to_string(),
            secret: "weak".to_string(),
            role: Role::Risk,
        })
        .expect_err("invalid account");
        assert!(error.has_field("username"));
        assert!(error.has_field("secret"));

        assert!(validate_account(AccountDraft {
            username: "risk_02".to_string(),
            display_name: "Risk Two".to_string(),
            secret: "Sturdy9".to_string(),
            role: Role::Risk,
        })
        .is_ok());
    }

    #[test]
    fn manual_audit_needs_table_for_affected_id() {
        let error = validate_manual_audit(ManualAuditDraft {
            action: "note".to_string(),
            affected_table: None,
            affected_id: Some(4),
            comment: None,
            details: None,
        })
        .expect_err("dangling id");
        assert!(error.has_field("affected_table"));
    }

    fn client_draft() -> HistoricalClientDraft {
        HistoricalClientDraft {
            tax_id: "20512345678".to_string(),
            company_name: "  Pacifico Motors SAC ".to_string(),
            address: Some("Av. Arequipa 1200".to_string()),
            phone: Some("   ".to_string()),
            email: Some("credito@pacifico.pe".to_string()),
            sector: None,
            approved_amount: Some(dec!(180000)),
            approved_units: Some(6),
            status: None,
        }
    }

    #[test]
    fn historical_client_is_normalized() {
        let client = validate_historical_client(client_draft()).expect("valid client");
        assert_eq!(client.company_name, "Pacifico Motors SAC");
        assert_eq!(client.phone, None);
        assert_eq!(client.status, ClientStatus::Active);
        assert_eq!(client.approved_units, Some(6));
    }

    #[test]
    fn historical_client_rejects_bad_contact_and_terms() {
        let mut draft = client_draft();
        draft.tax_id = "2051234567X".to_string();
        draft.email = Some("credito.pacifico.pe".to_string());
        draft.approved_amount = Some(dec!(-5));
        draft.approved_units = Some(0);
        let error = validate_historical_client(draft).expect_err("invalid client");
        for field in ["tax_id", "email", "approved_amount", "approved_units"] {
            assert!(error.has_field(field), "missing violation for {field}");
        }
    }

    #[test]
    fn client_edit_distinguishes_clearing_from_absent() {
        let changes = validate_client_edit(HistoricalClientEdit {
            phone: Some(String::new()),
            status: Some(ClientStatus::Inactive),
            ..HistoricalClientEdit::default()
        })
        .expect("valid edit");
        assert_eq!(changes.phone, Some(None));
        assert_eq!(changes.address, None);
        assert_eq!(changes.status, Some(ClientStatus::Inactive));

        let empty = validate_client_edit(HistoricalClientEdit::default()).expect_err("no-op edit");
        assert!(empty.has_field("edit"));
    }
}
