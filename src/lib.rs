//! A host-side IGMP agent/proxy: joins multicast groups on one or more
//! interfaces, forwards membership state between an "inside" and "outside"
//! (with an optional failover "alt outside"), and exposes a small
//! process-internal contract of bounded queues for the embedding
//! application to observe and drive it.
//!
//! See `SPEC_FULL.md` in the repository root for the full behavioral
//! specification this crate implements.

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pool;
pub mod recv;
pub mod selector;
pub mod sender;
pub mod socket;

pub use config::{Config, TestingConfig};
pub use dispatch::EngineHandles;
pub use engine::Engine;
pub use error::{ConfigError, OsError, StartupError};
pub use model::{
    DestTag, GroupRecord, IgmpMessage, MembershipItem, QueryVersion, RecordKind, Side, TtlKind,
    UnknownSide,
};
