//! Session state for Waypoint conversations.
//!
//! Two pieces, split the same way the service uses them: the
//! [`SessionStore`] holds per-session message history (a bounded window)
//! and the key/value context side-channel; the [`SessionManager`] owns
//! session lifecycle (create, lookup, expiry) and clears the store when a
//! session dies.

pub mod manager;
pub mod store;

pub use manager::SessionManager;
pub use store::SessionStore;
