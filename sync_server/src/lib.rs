//! `sync_server`
//!
//! Authoritative host side:
//! - Owns the data service and seeds the world
//! - Fixed timestep loop that writes through masks
//! - In-process topic dispatcher fanning updates out to subscribers
//!
//! Inbound updates from subscribers go through the security-gated mutator with
//! the connection's own context.

pub mod dispatcher;
pub mod server;

pub use dispatcher::{ClientId, DispatchError, InboundOutcome, TopicDispatcher};
pub use server::SyncServer;
