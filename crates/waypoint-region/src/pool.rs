//! A pooled connection handle for one region's database.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::Value;
use tracing::info;

use waypoint_core::error::{Result, WaypointError};
use waypoint_core::types::DataRow;

/// Thread-safe handle to one region's SQLite database.
///
/// The connection is wrapped in a Mutex since rusqlite's Connection is
/// not Sync; callers treat the pool as an opaque acquire/release
/// resource. Every query runs a liveness probe first (the `pool_pre_ping`
/// of this engine) and stamps `last_access` for the idle reaper.
pub struct RegionPool {
    region_id: u32,
    prefix: String,
    conn: Mutex<Connection>,
    last_access: AtomicI64,
}

impl RegionPool {
    /// Open the region database and configure pragmas.
    pub fn open(region_id: u32, db_path: &str, prefix: &str) -> Result<Self> {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| {
            WaypointError::Region(format!("region {}: failed to open database: {}", region_id, e))
        })?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| {
            WaypointError::Region(format!("region {}: failed to set pragmas: {}", region_id, e))
        })?;

        info!(region_id, path = db_path, "Region pool opened");

        Ok(Self {
            region_id,
            prefix: prefix.to_string(),
            conn: Mutex::new(conn),
            last_access: AtomicI64::new(Utc::now().timestamp()),
        })
    }

    pub fn region_id(&self) -> u32 {
        self.region_id
    }

    /// Table-name prefix for this region's schema.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Epoch seconds of the last query through this pool.
    pub fn last_access(&self) -> i64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Stamp the pool as just used.
    pub fn touch(&self) {
        self.last_access.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, secs: i64) {
        self.last_access.fetch_sub(secs, Ordering::Relaxed);
    }

    /// Run a parameterized query and return its rows as JSON records in
    /// statement column order.
    ///
    /// Parameter names are given without the leading colon; the SQL body
    /// references them as `:name`.
    pub fn query(&self, sql: &str, params: &[(&str, Value)]) -> Result<Vec<DataRow>> {
        self.touch();
        let conn = self
            .conn
            .lock()
            .map_err(|e| WaypointError::Region(format!("pool lock poisoned: {}", e)))?;

        // Liveness probe before use.
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| {
                WaypointError::Region(format!("region {}: liveness check failed: {}", self.region_id, e))
            })?;

        let mut stmt = conn.prepare(sql).map_err(|e| {
            WaypointError::Region(format!("region {}: prepare failed: {}", self.region_id, e))
        })?;

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let named: Vec<(String, rusqlite::types::Value)> = params
            .iter()
            .map(|(name, value)| (format!(":{}", name), json_to_sql(value)))
            .collect();
        let bindable: Vec<(&str, &dyn rusqlite::types::ToSql)> = named
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::types::ToSql))
            .collect();

        let mut rows = stmt.query(&bindable[..]).map_err(|e| {
            WaypointError::Region(format!("region {}: query failed: {}", self.region_id, e))
        })?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().map_err(|e| {
            WaypointError::Region(format!("region {}: row fetch failed: {}", self.region_id, e))
        })? {
            let mut record = DataRow::new();
            for (idx, column) in columns.iter().enumerate() {
                let value = row.get_ref(idx).map_err(|e| {
                    WaypointError::Region(format!("region {}: column read failed: {}", self.region_id, e))
                })?;
                record.insert(column.clone(), sql_to_json(value));
            }
            records.push(record);
        }

        Ok(records)
    }
}

impl std::fmt::Debug for RegionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionPool")
            .field("region_id", &self.region_id)
            .field("prefix", &self.prefix)
            .finish()
    }
}

/// Convert a JSON parameter value to a SQLite value.
fn json_to_sql(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

/// Convert a SQLite column value to JSON.
fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_places() -> (tempfile::TempDir, RegionPool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region0.db");
        let path_str = path.to_str().unwrap().to_string();

        let setup = Connection::open(&path).unwrap();
        setup
            .execute_batch(
                "CREATE TABLE city_places (
                    scope_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    introduction TEXT,
                    latitude REAL,
                    longitude REAL
                );
                INSERT INTO city_places VALUES (1, 'Central Market', 'A covered market.', 10.77, 106.69);
                INSERT INTO city_places VALUES (1, 'Riverside Park', 'A park by the river.', 10.78, 106.70);
                INSERT INTO city_places VALUES (2, 'Old Quarter', NULL, NULL, NULL);",
            )
            .unwrap();
        drop(setup);

        let pool = RegionPool::open(0, &path_str, "city").unwrap();
        (dir, pool)
    }

    #[test]
    fn test_query_returns_rows_with_columns() {
        let (_dir, pool) = pool_with_places();
        let rows = pool
            .query(
                "SELECT name, introduction FROM city_places WHERE scope_id = :scope_id ORDER BY name",
                &[("scope_id", Value::from(1))],
            )
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], Value::String("Central Market".into()));
        assert_eq!(
            rows[0]["introduction"],
            Value::String("A covered market.".into())
        );
    }

    #[test]
    fn test_query_binds_text_param() {
        let (_dir, pool) = pool_with_places();
        let rows = pool
            .query(
                "SELECT latitude, longitude FROM city_places WHERE name = :place_name",
                &[("place_name", Value::String("Central Market".into()))],
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["latitude"], Value::from(10.77));
    }

    #[test]
    fn test_query_null_columns() {
        let (_dir, pool) = pool_with_places();
        let rows = pool
            .query(
                "SELECT introduction FROM city_places WHERE name = :place_name",
                &[("place_name", Value::String("Old Quarter".into()))],
            )
            .unwrap();
        assert_eq!(rows[0]["introduction"], Value::Null);
    }

    #[test]
    fn test_query_no_rows() {
        let (_dir, pool) = pool_with_places();
        let rows = pool
            .query(
                "SELECT name FROM city_places WHERE scope_id = :scope_id",
                &[("scope_id", Value::from(99))],
            )
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_malformed_query_is_error() {
        let (_dir, pool) = pool_with_places();
        let result = pool.query("SELECT FROM nowhere WHERE", &[]);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), WaypointError::Region(_)));
    }

    #[test]
    fn test_query_touches_last_access() {
        let (_dir, pool) = pool_with_places();
        pool.last_access.store(0, Ordering::Relaxed);
        pool.query("SELECT name FROM city_places", &[]).unwrap();
        let now = Utc::now().timestamp();
        assert!((pool.last_access() - now).abs() < 2);
    }

    #[test]
    fn test_prefix_accessor() {
        let (_dir, pool) = pool_with_places();
        assert_eq!(pool.prefix(), "city");
        assert_eq!(pool.region_id(), 0);
    }

    #[test]
    fn test_json_to_sql_conversions() {
        assert_eq!(json_to_sql(&Value::Null), rusqlite::types::Value::Null);
        assert_eq!(
            json_to_sql(&Value::Bool(true)),
            rusqlite::types::Value::Integer(1)
        );
        assert_eq!(
            json_to_sql(&Value::from(42)),
            rusqlite::types::Value::Integer(42)
        );
        assert_eq!(
            json_to_sql(&Value::from(2.5)),
            rusqlite::types::Value::Real(2.5)
        );
        assert_eq!(
            json_to_sql(&Value::String("x".into())),
            rusqlite::types::Value::Text("x".into())
        );
    }
}
