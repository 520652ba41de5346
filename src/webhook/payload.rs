use serde_json::Value;

use crate::domain::UserId;

pub const CHARGE_SUCCESS: &str = "charge.success";

#[derive(serde::Deserialize, Debug)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(serde::Deserialize, Debug, Clone, PartialEq, Default)]
pub struct Customer {
    #[serde(default)]
    pub email: Option<String>,
}

/// The `data` object of a successful charge.
#[derive(serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Charge {
    pub reference: String,
    /// Minor units (pesewas, cents).
    pub amount: u64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub customer: Option<Customer>,
    #[serde(default)]
    pub metadata: Value,
}

impl Charge {
    /// `metadata.user_id`, sent as a number or a numeric string.
    pub fn metadata_user_id(&self) -> Option<UserId> {
        match self.metadata.get("user_id")? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn customer_email(&self) -> Option<&str> {
        self.customer
            .as_ref()?
            .email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    ChargeSuccess(Charge),
    Other(String),
}

/// Only `charge.success` bodies are decoded past the event name.
pub fn parse(raw: &[u8]) -> Result<Event, serde_json::Error> {
    let envelope: Envelope = serde_json::from_slice(raw)?;
    if envelope.event == CHARGE_SUCCESS {
        Ok(Event::ChargeSuccess(serde_json::from_value(envelope.data)?))
    } else {
        Ok(Event::Other(envelope.event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_charge_success() {
        let raw = br#"{
            "event": "charge.success",
            "data": {
                "reference": "REF1",
                "amount": 50000,
                "currency": "GHS",
                "customer": {"email": "ama@example.com"},
                "metadata": {"user_id": 7}
            }
        }"#;

        let Event::ChargeSuccess(charge) = parse(raw).unwrap() else {
            panic!("expected a charge");
        };

        assert_eq!(charge.reference, "REF1");
        assert_eq!(charge.amount, 50000);
        assert_eq!(charge.metadata_user_id(), Some(7));
        assert_eq!(charge.customer_email(), Some("ama@example.com"));
    }

    #[test]
    fn test_metadata_user_id_accepts_numeric_string_only() {
        let mut charge: Charge =
            serde_json::from_str(r#"{"reference":"R","amount":1,"metadata":{"user_id":"12"}}"#)
                .unwrap();
        assert_eq!(charge.metadata_user_id(), Some(12));

        charge.metadata = serde_json::json!({"user_id": "abc"});
        assert_eq!(charge.metadata_user_id(), None);

        charge.metadata = serde_json::json!("");
        assert_eq!(charge.metadata_user_id(), None);
        assert_eq!(charge.customer_email(), None);
    }

    #[test]
    fn test_other_events_are_not_decoded() {
        let raw = br#"{"event":"transfer.success","data":{"whatever":true}}"#;

        assert_eq!(parse(raw).unwrap(), Event::Other("transfer.success".to_string()));
    }

    #[test]
    fn test_charge_without_reference_is_malformed() {
        let raw = br#"{"event":"charge.success","data":{"amount":100}}"#;

        assert!(parse(raw).is_err());
        assert!(parse(b"not json").is_err());
    }
}
