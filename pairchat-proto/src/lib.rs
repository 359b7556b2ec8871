//! Shared relay event definitions for `PairChat`.

pub mod event;
pub mod identity;
pub mod presence;
pub mod session;
pub mod timestamp;
