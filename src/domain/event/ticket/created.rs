use super::TicketIdentifier;
use crate::library::communication::event::Event;
use serde::{Deserialize, Serialize};

const SUBJECT: &str = "ticket:created";

/// Ticket has been listed for sale
///
/// Services mirroring tickets (e.g. the order service) create their local copy upon receiving this event.
/// Producers written in other languages use camel case field names and may omit fields that are
/// not known yet at creation time, those fall back to their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicketCreatedEvent {
    /// Unique identifier of the ticket
    pub id: TicketIdentifier,

    /// Human readable title
    #[serde(default)]
    pub title: String,

    /// Price in the currency of the marketplace
    pub price: f64,

    /// Identifier of the user selling the ticket
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Event for TicketCreatedEvent {
    const SUBJECT: &'static str = SUBJECT;
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::communication::event::{Decoder, Payload};
    use crate::library::communication::implementation::json::{encode, JsonDecoder};
    use crate::library::communication::DecodeError;

    fn decode(json: &str) -> Result<TicketCreatedEvent, DecodeError> {
        JsonDecoder::<TicketCreatedEvent>::default().decode(&Payload::from(json))
    }

    #[test]
    fn decode_minimal_payloads() {
        let event = decode(r#"{"id":"abc","price":20}"#).unwrap();

        assert_eq!(
            event,
            TicketCreatedEvent {
                id: "abc".into(),
                title: String::new(),
                price: 20.0,
                user_id: None,
            }
        );
    }

    #[test]
    fn use_camel_case_field_names() {
        let event = TicketCreatedEvent {
            id: "abc".into(),
            title: "concert".into(),
            price: 20.0,
            user_id: Some("u-1".into()),
        };

        let payload = encode(&event).unwrap();
        assert!(payload.to_string_lossy().contains(r#""userId":"u-1""#));
        assert_eq!(decode(&payload.to_string_lossy()).unwrap(), event);
    }

    #[test]
    fn require_price() {
        assert!(matches!(
            decode(r#"{"id":"abc","title":"concert"}"#),
            Err(DecodeError::Schema(_))
        ));
    }

    #[test]
    fn publish_on_created_subject() {
        assert_eq!(TicketCreatedEvent::SUBJECT, "ticket:created");
    }
}
