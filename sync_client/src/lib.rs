//! `sync_client`
//!
//! Replica-side systems:
//! - Local entity store mirroring a host
//! - Ordered application of inbound update messages
//! - Materialization of entities announced by full-state messages

pub mod replica;

pub use replica::{Replica, ReplicaStats};
