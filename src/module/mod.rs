//! Runnable modules containing each bundling a transport, listeners or publishers and providing a unified configuration

pub mod connection;
pub mod options;

pub mod listen;
pub mod publish;
