//! Per-region pool registry with lazy creation and idle eviction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{info, warn};

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::RegionConfig;

use crate::pool::RegionPool;

/// Registry of live region pools.
///
/// A pool is created on the first request for its region and disposed by
/// the reaper once idle past `idle_timeout_secs`; the next request
/// re-creates it. At most one pool exists per region at any time. The
/// registry map is guarded by a single mutex; held only for
/// create/lookup/evict, never across a query.
pub struct RegionManager {
    configs: HashMap<u32, RegionConfig>,
    pools: Mutex<HashMap<u32, Arc<RegionPool>>>,
    idle_timeout_secs: i64,
    shutdown: Notify,
}

impl RegionManager {
    pub fn new(regions: Vec<RegionConfig>, idle_timeout_secs: i64) -> Self {
        let configs = regions.into_iter().map(|r| (r.region_id, r)).collect();
        Self {
            configs,
            pools: Mutex::new(HashMap::new()),
            idle_timeout_secs,
            shutdown: Notify::new(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<u32, Arc<RegionPool>>>> {
        self.pools
            .lock()
            .map_err(|e| WaypointError::Region(format!("registry lock poisoned: {}", e)))
    }

    /// Region ids this manager knows about.
    pub fn region_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.configs.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Static config for one region.
    pub fn config(&self, region_id: u32) -> Option<&RegionConfig> {
        self.configs.get(&region_id)
    }

    /// Get the pool for a region, creating and registering it on first
    /// use. Unknown region ids are a configuration error, fatal to the
    /// calling request only.
    pub fn pool(&self, region_id: u32) -> Result<Arc<RegionPool>> {
        let config = self
            .configs
            .get(&region_id)
            .ok_or_else(|| WaypointError::Region(format!("unknown region_id: {}", region_id)))?;

        let mut pools = self.lock()?;
        if let Some(pool) = pools.get(&region_id) {
            pool.touch();
            return Ok(Arc::clone(pool));
        }

        let pool = Arc::new(RegionPool::open(
            region_id,
            &config.db_path,
            &config.prefix,
        )?);
        pools.insert(region_id, Arc::clone(&pool));
        Ok(pool)
    }

    /// Number of live pools.
    pub fn live_count(&self) -> usize {
        self.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Dispose every pool idle longer than the timeout, as of `now`
    /// (epoch seconds). Returns how many were evicted. In-flight queries
    /// on an evicted pool finish on their own Arc; the registry just
    /// forgets it.
    pub fn sweep_once(&self, now: i64) -> Result<usize> {
        let mut pools = self.lock()?;
        let idle: Vec<u32> = pools
            .iter()
            .filter(|(_, pool)| now - pool.last_access() > self.idle_timeout_secs)
            .map(|(id, _)| *id)
            .collect();
        for id in &idle {
            pools.remove(id);
            info!(region_id = id, "Disposed idle region pool");
        }
        Ok(idle.len())
    }

    /// Background reaper loop. Runs until [`shutdown`](Self::shutdown).
    pub async fn run_sweeper(self: Arc<Self>, interval_secs: u64) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        interval.tick().await; // skip the immediate first tick
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now().timestamp()) {
                        warn!(error = %e, "Pool sweep failed");
                    }
                }
                _ = self.shutdown.notified() => return,
            }
        }
    }

    /// Signal the reaper loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
