//! Events exchanged between the ticketing services

mod ticket;

pub use ticket::*;
