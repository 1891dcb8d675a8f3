//! Region-partitioned database access for Waypoint.
//!
//! Each region owns an independent database. Pools are created lazily on
//! first use, registered in a mutex-guarded map, and disposed by a
//! background reaper after sitting idle past the configured timeout.

pub mod manager;
pub mod pool;

pub use manager::RegionManager;
pub use pool::RegionPool;
