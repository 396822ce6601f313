//! CSV rendering of the latest bureau lookup for a request.

use serde_json::Value;

use super::domain::{CreditLookupRecord, CreditRequest};

pub const REPORT_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

const MISSING: &str = "N/A";

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("failed to write report row: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush report: {0}")]
    Flush(String),
}

/// Rendered report ready to hand to a download response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupReport {
    pub file_name: String,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl LookupReport {
    pub fn as_text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or_default()
    }
}

pub fn render_lookup_report(
    request: &CreditRequest,
    lookup: &CreditLookupRecord,
) -> Result<LookupReport, ReportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["section", "field", "value"])?;

    let general = [
        ("request_id", request.id.to_string()),
        ("tax_id", request.tax_id.to_string()),
        ("company_name", request.company_name.clone()),
        ("requested_amount", request.requested_amount.to_string()),
        ("requested_units", request.requested_units.to_string()),
        ("queried_at", lookup.queried_at.to_rfc3339()),
    ];
    for (field, value) in general {
        writer.write_record(["general", field, value.as_str()])?;
    }

    let raw = &lookup.raw_result;
    for field in ["status", "condition", "address", "business_activity"] {
        writer.write_record(["bureau", field, text(raw.get(field)).as_str()])?;
    }

    if let Some(credit) = raw.get("credit_report").filter(|v| v.is_object()) {
        for field in ["score", "rating", "total_debt", "protests", "lawsuits"] {
            writer.write_record(["credit", field, text(credit.get(field)).as_str()])?;
        }
        let delinquent = match credit.get("delinquent").and_then(Value::as_bool) {
            Some(true) => "yes",
            Some(false) => "no",
            None => MISSING,
        };
        writer.write_record(["credit", "delinquent", delinquent])?;
    }

    if let Some(financials) = raw.get("financials").filter(|v| v.is_object()) {
        for field in ["annual_sales", "assets", "equity"] {
            writer.write_record(["financials", field, text(financials.get(field)).as_str()])?;
        }
    }

    let body = writer
        .into_inner()
        .map_err(|err| ReportError::Flush(err.error().to_string()))?;

    Ok(LookupReport {
        file_name: format!(
            "bureau_{}_{}.csv",
            request.tax_id,
            lookup.queried_at.format("%Y%m%d%H%M%S")
        ),
        content_type: REPORT_CONTENT_TYPE,
        body,
    })
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Null) | None => MISSING.to_string(),
        Some(Value::String(_)) => MISSING.to_string(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::credit::bureau::FixtureBureau;
    use crate::workflows::credit::domain::{
        LookupId, RequestId, RequestState, TaxId, UserId,
    };
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn request() -> CreditRequest {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).single().expect("timestamp");
        CreditRequest {
            id: RequestId(12),
            tax_id: TaxId::parse("20100070970").expect("tax id"),
            company_name: "Pacific Foods, S.A.".into(),
            requested_amount: dec!(48000),
            requested_units: 6,
            comment: None,
            owner_id: UserId(2),
            state: RequestState::Evaluating,
            created_at: at,
            updated_at: at,
        }
    }

    fn lookup(raw: Value) -> CreditLookupRecord {
        CreditLookupRecord {
            id: LookupId(4),
            request_id: RequestId(12),
            tax_id: TaxId::parse("20100070970").expect("tax id"),
            raw_result: raw,
            queried_by: UserId(3),
            queried_at: Utc
                .with_ymd_and_hms(2026, 3, 2, 14, 5, 9)
                .single()
                .expect("timestamp"),
        }
    }

    #[test]
    fn renders_all_sections_from_fixture_payload() {
        let request = request();
        let raw = FixtureBureau::profile_for(&request.tax_id);
        let report = render_lookup_report(&request, &lookup(raw)).expect("report");

        assert_eq!(report.file_name, "bureau_20100070970_20260302140509.csv");
        let text = report.as_text();
        assert!(text.starts_with("section,field,value\n"));
        assert!(text.contains("general,company_name,\"Pacific Foods, S.A.\""));
        assert!(text.contains("bureau,status,ACTIVE"));
        assert!(text.contains("credit,score,750"));
        assert!(text.contains("credit,delinquent,no"));
        assert!(text.contains("financials,equity,1500000"));
    }

    #[test]
    fn sparse_payload_marks_missing_fields() {
        let report =
            render_lookup_report(&request(), &lookup(json!({"status": "ACTIVE"}))).expect("report");
        let text = report.as_text();
        assert!(text.contains("bureau,condition,N/A"));
        assert!(!text.contains("credit,"));
        assert!(!text.contains("financials,"));
    }
}
