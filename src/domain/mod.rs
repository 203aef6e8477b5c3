//! Domain specific structures, implementations, and logic

mod logger;

pub mod event;

pub use logger::TicketCreatedLogger;
