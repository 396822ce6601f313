use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::domain::TaxId;

/// External credit bureau consulted during evaluation.
#[async_trait]
pub trait CreditBureau: Send + Sync {
    async fn lookup(&self, tax_id: &TaxId) -> Result<CreditProfile, LookupError>;
}

/// Bureau answer. Opaque beyond being a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct CreditProfile(Map<String, Value>);

impl CreditProfile {
    pub fn from_value(value: Value) -> Result<Self, LookupError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(LookupError::Malformed(format!(
                "expected a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    /// Timeout, connection failure, or no answer at all.
    #[error("credit bureau unavailable: {0}")]
    Unavailable(String),
    #[error("credit bureau refused the lookup (status {status}): {detail}")]
    Rejected { status: u16, detail: String },
    #[error("credit bureau returned a malformed payload: {0}")]
    Malformed(String),
}

/// Deterministic bureau used in development, demos, and tests.
#[derive(Debug, Clone, Default)]
pub struct FixtureBureau {
    latency: Duration,
}

impl FixtureBureau {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a slow upstream.
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }

    pub fn profile_for(tax_id: &TaxId) -> Value {
        json!({
            "tax_id": tax_id.as_str(),
            "legal_name": "EMPRESA EJEMPLO SAC",
            "status": "ACTIVE",
            "condition": "LOCATED",
            "address": "AV. PRINCIPAL 123 - LIMA",
            "district": "SAN ISIDRO",
            "taxpayer_type": "CLOSELY HELD CORPORATION",
            "registered_on": "2010-05-15",
            "business_activity": "WHOLESALE OF OTHER PRODUCTS",
            "credit_report": {
                "score": 750,
                "rating": "A",
                "total_debt": 150000,
                "protests": 0,
                "lawsuits": 0,
                "delinquent": false
            },
            "background": {
                "judicial": false,
                "commercial": false,
                "tax": false
            },
            "financials": {
                "annual_sales": 5000000,
                "assets": 3000000,
                "equity": 1500000
            }
        })
    }
}

#[async_trait]
impl CreditBureau for FixtureBureau {
    async fn lookup(&self, tax_id: &TaxId) -> Result<CreditProfile, LookupError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        tracing::debug!(tax_id = %tax_id, "serving fixture credit profile");
        CreditProfile::from_value(Self::profile_for(tax_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_object_payloads_are_malformed() {
        assert!(matches!(
            CreditProfile::from_value(json!(["not", "an", "object"])),
            Err(LookupError::Malformed(_))
        ));
        assert!(CreditProfile::from_value(json!({"status": "ACTIVE"})).is_ok());
    }

    #[tokio::test]
    async fn fixture_echoes_tax_id() {
        let tax_id = TaxId::parse("20601234567").expect("tax id");
        let profile = FixtureBureau::new().lookup(&tax_id).await.expect("profile");
        assert_eq!(profile.fields()["tax_id"], json!("20601234567"));
        assert_eq!(profile.fields()["credit_report"]["score"], json!(750));
    }
}
