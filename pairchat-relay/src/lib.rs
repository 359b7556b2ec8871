//! `PairChat` relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts WebSocket connections, admits them into two-party rooms, stores
//! room history and fans chat and presence events out to room members.

pub mod config;
pub mod relay;
pub mod rooms;
