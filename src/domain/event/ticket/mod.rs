mod created;
mod updated;

pub use created::TicketCreatedEvent;
pub use updated::TicketUpdatedEvent;

/// Unique identifier of a ticket
pub type TicketIdentifier = String;
