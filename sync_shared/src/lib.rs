//! `sync_shared`
//!
//! Entity synchronization core used by both the authoritative host and
//! replicas.
//!
//! Design goals:
//! - Numeric field paths are the only wire vocabulary; the registry is the
//!   single source of truth for them.
//! - Readers never block on writers of other entities.
//! - Inbound updates are validated in full before anything is written.
//! - No `unsafe`.

pub mod config;
pub mod entity;
pub mod error;
pub mod math;
pub mod message;
pub mod model;
pub mod mutator;
pub mod notify;
pub mod path;
pub mod registry;
pub mod security;
pub mod serializer;
pub mod service;
pub mod store;
pub mod value;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::entity::{downcast_arc, EntityRecord, SyncEntity, WriteError};
    pub use crate::error::*;
    pub use crate::math::*;
    pub use crate::message::*;
    pub use crate::mutator::*;
    pub use crate::notify::*;
    pub use crate::path::*;
    pub use crate::registry::*;
    pub use crate::security::*;
    pub use crate::serializer::*;
    pub use crate::service::*;
    pub use crate::store::*;
    pub use crate::value::*;
}
