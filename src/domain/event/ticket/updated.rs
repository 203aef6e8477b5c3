use super::TicketIdentifier;
use crate::library::communication::event::Event;
use serde::{Deserialize, Serialize};

const SUBJECT: &str = "ticket:updated";

/// Title or price of a ticket changed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicketUpdatedEvent {
    /// Unique identifier of the ticket
    pub id: TicketIdentifier,

    /// Human readable title
    pub title: String,

    /// Price in the currency of the marketplace
    pub price: f64,

    /// Identifier of the user selling the ticket
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Event for TicketUpdatedEvent {
    const SUBJECT: &'static str = SUBJECT;
}
