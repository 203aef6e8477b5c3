//! Structures to consume events published by other services in a distributed system
//!
//! Services do not talk to each other directly. Whenever something noteworthy happens,
//! an event describing it is published onto a subject of a durable message broker. All
//! interested parties then attach a [`Listener`](event::Listener) to that subject and process the events
//! at their own pace. The broker keeps one durable cursor per group of listeners so that
//! a restarted service resumes where it left off and multiple instances of the same service
//! share the load instead of processing every event twice.
//!
//! The [`event`] module contains the consumer side abstractions while the
//! [`implementation`] module provides concrete transports and codecs.

mod error;

pub mod event;
pub mod implementation;

pub use error::*;
