//! Core types, error taxonomy, and configuration for Waypoint.
//!
//! Waypoint is a conversational query-resolution service: a user turn is
//! routed, resolved against a catalog of query templates, executed on a
//! region-partitioned data store, and answered in natural language. This
//! crate holds everything the other crates share.

pub mod config;
pub mod error;
pub mod types;

pub use config::WaypointConfig;
pub use error::{Result, WaypointError};
pub use types::{
    ChatMessage, ChatSession, DataRow, GeoPoint, RegionConfig, Role, TurnReply, TurnRequest,
};
