//! `PairChat`: two-party realtime chat client core.

pub mod chat;
pub mod config;
pub mod net;
pub mod timer;
pub mod transport;
