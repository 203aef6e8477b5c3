//! This library crate contains everything needed to consume ticketing events from a durable message broker.
//!
//! Submodules have been introduced to split responsibilities. They form a chain of dependencies
//! from the low-level [`library`], over the ticketing [`domain`] specific events and handlers,
//! through the executable [`harness`], up to the runnable [`modules`](module).

#![deny(missing_docs)]

pub mod domain;
pub mod harness;
pub mod library;
pub mod module;
