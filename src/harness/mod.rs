//! Runtime harness to execute modules until they are told to stop

mod heart;
mod module;

pub use heart::*;
pub use module::*;
