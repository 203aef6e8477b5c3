//! Independent and project agnostic libraries
//!
//! Any of the library submodules in this module could be extracted into its own crate.
//! They have been written with the ticketing services in mind, however, they are in no
//! way bound to them and everything domain specific lives in the [`domain`](super::domain) module.

pub mod communication;
pub mod helpers;

/// Generic error type
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result with no value and a [`BoxedError`]
pub type EmptyResult = Result<(), BoxedError>;
