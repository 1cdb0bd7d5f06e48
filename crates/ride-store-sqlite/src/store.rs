// store.rs — SqliteRideStore: durable RideStore on a single SQLite file.
//
// Rides and drivers are stored as JSON documents next to the handful of
// columns that queries filter on (status, passenger, driver_id, identity).
// The document is the source of truth; the columns are kept in step on
// every write.
//
// `atomic_update` runs inside a BEGIN IMMEDIATE transaction, which takes
// the database write lock before the status is read. Two stores opened on
// the same file (or two processes) therefore serialize their updates, and
// the loser re-reads the committed status and reports a Conflict.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use tracing::debug;

use ride_lifecycle::store::{check_update, sort_newest_first};
use ride_lifecycle::{
    Driver, DriverId, Identity, Ride, RideDraft, RideFilter, RideId, RideStatus, RideStore,
    StoreError,
};

/// Bumped whenever SCHEMA changes shape.
const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS drivers (
    driver_id  TEXT PRIMARY KEY,
    identity   TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL,
    doc        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS rides (
    ride_id    TEXT PRIMARY KEY,
    status     TEXT NOT NULL,
    passenger  TEXT NOT NULL,
    driver_id  TEXT,
    created_at TEXT NOT NULL,
    doc        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS rides_by_status ON rides (status);
CREATE INDEX IF NOT EXISTS rides_by_passenger ON rides (passenger);
CREATE INDEX IF NOT EXISTS rides_by_driver ON rides (driver_id);

CREATE TABLE IF NOT EXISTS driver_credits (
    ride_id     TEXT PRIMARY KEY,
    driver_id   TEXT NOT NULL,
    credited_at TEXT NOT NULL
);
";

/// Default wait for the write lock held by another connection.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// RideStore backed by SQLite in WAL mode.
pub struct SqliteRideStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteRideStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::IoError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let conn = Connection::open(path).map_err(db)?;
        conn.busy_timeout(busy_timeout).map_err(db)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;").map_err(db)?;

        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        };
        store.migrate()?;
        debug!("opened sqlite ride store at {}", path.display());
        Ok(store)
    }

    /// A private in-memory database. Nothing is shared or persisted.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.migrate()?;
        Ok(store)
    }

    /// The database file, or `None` for an in-memory store.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(db)?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::Backend(format!(
                "database schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }
        conn.execute_batch(SCHEMA).map_err(db)?;
        conn.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))
            .map_err(db)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite connection mutex poisoned".to_string()))
    }
}

impl RideStore for SqliteRideStore {
    fn get(&self, ride_id: RideId) -> Result<Option<Ride>, StoreError> {
        let conn = self.lock()?;
        load_ride(&conn, ride_id)
    }

    fn create(&self, draft: RideDraft) -> Result<Ride, StoreError> {
        let ride = Ride::new(draft);
        let doc = serde_json::to_string(&ride)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO rides (ride_id, status, passenger, driver_id, created_at, doc)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5)",
            params![
                ride.ride_id.to_string(),
                ride.status.as_str(),
                ride.passenger.as_str(),
                timestamp(&ride.created_at),
                doc,
            ],
        )
        .map_err(db)?;
        Ok(ride)
    }

    fn atomic_update(
        &self,
        ride_id: RideId,
        expected: RideStatus,
        mutator: &dyn Fn(&mut Ride),
    ) -> Result<Ride, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db)?;

        let current = load_ride(&tx, ride_id)?.ok_or(StoreError::RideNotFound(ride_id))?;
        if current.status != expected {
            return Err(StoreError::Conflict {
                ride_id,
                expected,
                actual: current.status,
            });
        }

        let mut updated = current.clone();
        mutator(&mut updated);
        check_update(expected, &current, &updated)?;

        let doc = serde_json::to_string(&updated)?;
        let changed = tx
            .execute(
                "UPDATE rides SET status = ?1, driver_id = ?2, doc = ?3
                 WHERE ride_id = ?4 AND status = ?5",
                params![
                    updated.status.as_str(),
                    updated.driver.as_ref().map(|d| d.driver_id.to_string()),
                    doc,
                    ride_id.to_string(),
                    expected.as_str(),
                ],
            )
            .map_err(db)?;
        if changed != 1 {
            return Err(StoreError::Backend(format!(
                "ride {} changed while the write lock was held",
                ride_id
            )));
        }

        tx.commit().map_err(db)?;
        Ok(updated)
    }

    fn list_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>, StoreError> {
        let status = filter.status.map(|s| s.as_str());
        let passenger = filter.passenger.as_ref().map(|p| p.as_str().to_string());
        let driver = filter.driver.map(|d| d.to_string());

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT doc FROM rides
                 WHERE (?1 IS NULL OR status = ?1)
                   AND (?2 IS NULL OR passenger = ?2)
                   AND (?3 IS NULL OR driver_id = ?3)",
            )
            .map_err(db)?;
        let docs = stmt
            .query_map(params![status, passenger, driver], |row| {
                row.get::<_, String>(0)
            })
            .map_err(db)?;

        let mut rides = Vec::new();
        for doc in docs {
            rides.push(serde_json::from_str::<Ride>(&doc.map_err(db)?)?);
        }
        sort_newest_first(&mut rides);
        Ok(rides)
    }

    fn insert_driver(&self, driver: Driver) -> Result<Driver, StoreError> {
        let doc = serde_json::to_string(&driver)?;
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO drivers (driver_id, identity, created_at, doc) VALUES (?1, ?2, ?3, ?4)",
            params![
                driver.driver_id.to_string(),
                driver.identity.as_str(),
                timestamp(&driver.created_at),
                doc,
            ],
        );
        match inserted {
            Ok(_) => Ok(driver),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Err(StoreError::DuplicateDriver {
                    identity: driver.identity,
                })
            }
            Err(e) => Err(db(e)),
        }
    }

    fn get_driver(&self, driver_id: DriverId) -> Result<Option<Driver>, StoreError> {
        let conn = self.lock()?;
        load_driver(&conn, driver_id)
    }

    fn driver_by_identity(&self, identity: &Identity) -> Result<Option<Driver>, StoreError> {
        let conn = self.lock()?;
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM drivers WHERE identity = ?1",
                params![identity.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(db)?;
        doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
            .transpose()
    }

    fn list_drivers(&self) -> Result<Vec<Driver>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT doc FROM drivers ORDER BY created_at, driver_id")
            .map_err(db)?;
        let docs = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db)?;

        let mut drivers = Vec::new();
        for doc in docs {
            drivers.push(serde_json::from_str::<Driver>(&doc.map_err(db)?)?);
        }
        Ok(drivers)
    }

    fn credit_completed_ride(
        &self,
        driver_id: DriverId,
        ride_id: RideId,
    ) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db)?;

        let already = tx
            .query_row(
                "SELECT 1 FROM driver_credits WHERE ride_id = ?1",
                params![ride_id.to_string()],
                |_| Ok(()),
            )
            .optional()
            .map_err(db)?
            .is_some();
        if already {
            return Ok(false);
        }

        let ride = load_ride(&tx, ride_id)?.ok_or(StoreError::RideNotFound(ride_id))?;
        let assigned = ride.driver.as_ref().map(|d| d.driver_id);
        if ride.status != RideStatus::Completed || assigned != Some(driver_id) {
            return Err(StoreError::InvariantViolation {
                ride_id,
                reason: format!("ride is not a completed ride of driver {}", driver_id),
            });
        }

        let mut driver = load_driver(&tx, driver_id)?.ok_or(StoreError::DriverNotFound(driver_id))?;
        driver.total_rides += 1;
        tx.execute(
            "UPDATE drivers SET doc = ?1 WHERE driver_id = ?2",
            params![serde_json::to_string(&driver)?, driver_id.to_string()],
        )
        .map_err(db)?;
        tx.execute(
            "INSERT INTO driver_credits (ride_id, driver_id, credited_at) VALUES (?1, ?2, ?3)",
            params![
                ride_id.to_string(),
                driver_id.to_string(),
                timestamp(&Utc::now())
            ],
        )
        .map_err(db)?;

        tx.commit().map_err(db)?;
        Ok(true)
    }
}

fn load_ride(conn: &Connection, ride_id: RideId) -> Result<Option<Ride>, StoreError> {
    let doc: Option<String> = conn
        .query_row(
            "SELECT doc FROM rides WHERE ride_id = ?1",
            params![ride_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db)?;
    doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
        .transpose()
}

fn load_driver(conn: &Connection, driver_id: DriverId) -> Result<Option<Driver>, StoreError> {
    let doc: Option<String> = conn
        .query_row(
            "SELECT doc FROM drivers WHERE driver_id = ?1",
            params![driver_id.to_string()],
            |row| row.get(0),
        )
        .optional()
        .map_err(db)?;
    doc.map(|d| serde_json::from_str(&d).map_err(StoreError::from))
        .transpose()
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn db(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ride_lifecycle::{Price, RideRequest, Transition};

    fn draft(passenger: &str) -> RideDraft {
        RideDraft {
            passenger: Identity::new(passenger),
            request: RideRequest::new("A", "B"),
        }
    }

    #[test]
    fn create_and_get_roundtrip() {
        let store = SqliteRideStore::open_in_memory().unwrap();
        let ride = store.create(draft("p1")).unwrap();
        assert_eq!(store.get(ride.ride_id).unwrap(), Some(ride));
        assert!(store.get(RideId::new()).unwrap().is_none());
    }

    #[test]
    fn atomic_update_conflicts_on_wrong_status() {
        let store = SqliteRideStore::open_in_memory().unwrap();
        let driver = store.insert_driver(Driver::new("d1", "Van")).unwrap();
        let ride = store.create(draft("p1")).unwrap();

        let accept = Transition::Accept(driver.to_ref());
        store
            .atomic_update(ride.ride_id, RideStatus::Requested, &|r| r.apply(&accept, Utc::now()))
            .unwrap();

        let again = store.atomic_update(ride.ride_id, RideStatus::Requested, &|r| {
            r.apply(&accept, Utc::now())
        });
        assert!(matches!(
            again,
            Err(StoreError::Conflict {
                actual: RideStatus::Accepted,
                ..
            })
        ));
    }

    #[test]
    fn atomic_update_rejects_invalid_record() {
        let store = SqliteRideStore::open_in_memory().unwrap();
        let ride = store.create(draft("p1")).unwrap();

        // Completing straight from Requested skips two edges.
        let complete = Transition::Complete(Price::from_cents(100));
        let result = store.atomic_update(ride.ride_id, RideStatus::Requested, &|r| {
            r.apply(&complete, Utc::now())
        });
        assert!(matches!(result, Err(StoreError::InvariantViolation { .. })));
        assert_eq!(
            store.get(ride.ride_id).unwrap().unwrap().status,
            RideStatus::Requested
        );
    }

    #[test]
    fn atomic_update_missing_ride() {
        let store = SqliteRideStore::open_in_memory().unwrap();
        let result = store.atomic_update(RideId::new(), RideStatus::Requested, &|_| {});
        assert!(matches!(result, Err(StoreError::RideNotFound(_))));
    }

    #[test]
    fn duplicate_driver_identity_rejected() {
        let store = SqliteRideStore::open_in_memory().unwrap();
        store.insert_driver(Driver::new("d1", "Van")).unwrap();
        let dup = store.insert_driver(Driver::new("d1", "Truck"));
        assert!(matches!(dup, Err(StoreError::DuplicateDriver { .. })));
        assert_eq!(store.list_drivers().unwrap().len(), 1);
    }

    #[test]
    fn list_rides_applies_filter() {
        let store = SqliteRideStore::open_in_memory().unwrap();
        let driver = store.insert_driver(Driver::new("d1", "Van")).unwrap();
        let a = store.create(draft("p1")).unwrap();
        store.create(draft("p2")).unwrap();

        let accept = Transition::Accept(driver.to_ref());
        store
            .atomic_update(a.ride_id, RideStatus::Requested, &|r| r.apply(&accept, Utc::now()))
            .unwrap();

        assert_eq!(store.list_rides(&RideFilter::all()).unwrap().len(), 2);
        let by_passenger = store
            .list_rides(&RideFilter::all().with_passenger(Identity::new("p2")))
            .unwrap();
        assert_eq!(by_passenger.len(), 1);

        let by_driver = store
            .list_rides(&RideFilter::all().with_driver(driver.driver_id))
            .unwrap();
        assert_eq!(by_driver.len(), 1);
        assert_eq!(by_driver[0].ride_id, a.ride_id);

        let requested = store
            .list_rides(&RideFilter::all().with_status(RideStatus::Requested))
            .unwrap();
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].passenger, Identity::new("p2"));
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rides.db");
        let store = SqliteRideStore::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
        assert!(path.exists());
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn refuses_newer_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rides.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("PRAGMA user_version = 99;").unwrap();
        }
        let result = SqliteRideStore::open(&path, DEFAULT_BUSY_TIMEOUT);
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }
}
