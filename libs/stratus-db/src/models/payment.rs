use serde::{Deserialize, Serialize};

/// The only state carried between "invoice sent" and "payment confirmed".
/// It round-trips verbatim through Telegram's payment flow, so it must be
/// self-describing; the embedded amount is never trusted, and prices are
/// re-read from the plan catalog at confirmation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoicePayload {
    pub action: PayloadAction,
    pub months: u32,
    pub tg_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_tg_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PayloadAction {
    Subscription,
    Gift,
}

impl InvoicePayload {
    pub fn subscription(tg_id: i64, months: u32) -> Self {
        Self {
            action: PayloadAction::Subscription,
            months,
            tg_id,
            recipient_tg_id: None,
        }
    }

    pub fn gift(tg_id: i64, recipient_tg_id: i64, months: u32) -> Self {
        Self {
            action: PayloadAction::Gift,
            months,
            tg_id,
            recipient_tg_id: Some(recipient_tg_id),
        }
    }

    pub fn encode(&self) -> String {
        // Serialization of this flat struct cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_payload_round_trips() {
        let payload = InvoicePayload::subscription(123456789, 3);
        let decoded = InvoicePayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.action, PayloadAction::Subscription);
        assert_eq!(decoded.months, 3);
        assert_eq!(decoded.tg_id, 123456789);
        assert_eq!(decoded.recipient_tg_id, None);
    }

    #[test]
    fn gift_payload_round_trips_with_recipient() {
        let payload = InvoicePayload::gift(11, 22, 12);
        let decoded = InvoicePayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.recipient_tg_id, Some(22));
    }

    #[test]
    fn garbage_payload_decodes_to_none() {
        assert!(InvoicePayload::decode("topup:55").is_none());
        assert!(InvoicePayload::decode("").is_none());
        assert!(InvoicePayload::decode("{\"action\":\"refund\",\"months\":1,\"tg_id\":1}").is_none());
    }
}
