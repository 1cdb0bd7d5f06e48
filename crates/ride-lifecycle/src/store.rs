// store.rs — RideStore trait and MemoryRideStore implementation.
//
// The RideStore trait is the storage API the engine depends on. Its one
// concurrency primitive is `atomic_update`: a compare-and-set on a single
// ride keyed by the expected starting status. Every status change in the
// system goes through it, so the state machine edges double as the
// concurrency-control contract.
//
// MemoryRideStore keeps everything behind one mutex. SqliteRideStore (in
// the ride-store-sqlite crate) is the durable implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::driver::{Driver, DriverId, Identity};
use crate::error::StoreError;
use crate::ride::{Ride, RideDraft, RideId, RideStatus};

/// Storage for rides and drivers.
///
/// Implementations must be linearizable per ride id for `atomic_update`:
/// of two concurrent calls expecting the same starting status, exactly one
/// commits and the other observes `StoreError::Conflict`.
pub trait RideStore: Send + Sync {
    /// Get a ride by ID.
    fn get(&self, ride_id: RideId) -> Result<Option<Ride>, StoreError>;

    /// Persist a new ride in `Requested`, assigning its id and timestamps.
    fn create(&self, draft: RideDraft) -> Result<Ride, StoreError>;

    /// Apply `mutator` iff the ride's current status equals `expected`.
    ///
    /// On a status mismatch nothing is written and `Conflict` is returned.
    /// The mutated record is checked with [`check_update`] before commit.
    fn atomic_update(
        &self,
        ride_id: RideId,
        expected: RideStatus,
        mutator: &dyn Fn(&mut Ride),
    ) -> Result<Ride, StoreError>;

    /// List rides matching `filter`, newest first.
    fn list_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>, StoreError>;

    /// Insert a driver profile. Fails with `DuplicateDriver` if the identity
    /// already has one.
    fn insert_driver(&self, driver: Driver) -> Result<Driver, StoreError>;

    fn get_driver(&self, driver_id: DriverId) -> Result<Option<Driver>, StoreError>;

    fn driver_by_identity(&self, identity: &Identity) -> Result<Option<Driver>, StoreError>;

    /// List all drivers, oldest first.
    fn list_drivers(&self) -> Result<Vec<Driver>, StoreError>;

    /// Increment the driver's lifetime ride count for one completed ride.
    ///
    /// Idempotent per `ride_id`: returns `Ok(false)` if this ride was
    /// already credited, so callers can retry freely.
    fn credit_completed_ride(&self, driver_id: DriverId, ride_id: RideId)
        -> Result<bool, StoreError>;
}

/// Filter for `RideStore::list_rides`. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RideFilter {
    pub status: Option<RideStatus>,
    pub passenger: Option<Identity>,
    pub driver: Option<DriverId>,
}

impl RideFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: RideStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_passenger(mut self, passenger: Identity) -> Self {
        self.passenger = Some(passenger);
        self
    }

    pub fn with_driver(mut self, driver_id: DriverId) -> Self {
        self.driver = Some(driver_id);
        self
    }

    pub fn matches(&self, ride: &Ride) -> bool {
        self.status.map_or(true, |s| ride.status == s)
            && self.passenger.as_ref().map_or(true, |p| &ride.passenger == p)
            && self.driver.map_or(true, |d| {
                ride.driver.as_ref().is_some_and(|r| r.driver_id == d)
            })
    }
}

/// Validate a mutated ride before it is committed.
///
/// Rejects anything that is not a state machine edge out of `expected`,
/// any change to the ride's identity or passenger, and any record that
/// breaks `Ride::check_invariants`. Shared by every store implementation.
pub fn check_update(expected: RideStatus, before: &Ride, after: &Ride) -> Result<(), StoreError> {
    let violation = |reason: String| StoreError::InvariantViolation {
        ride_id: before.ride_id,
        reason,
    };

    if !expected.can_transition_to(after.status) {
        return Err(violation(format!(
            "{} -> {} is not a valid transition",
            expected, after.status
        )));
    }
    if after.ride_id != before.ride_id || after.passenger != before.passenger {
        return Err(violation("ride id and passenger are immutable".to_string()));
    }
    if before.driver.is_some() && after.driver != before.driver {
        return Err(violation("assigned driver cannot change".to_string()));
    }
    after.check_invariants().map_err(violation)
}

/// Sort rides newest first, breaking timestamp ties by id for stable output.
pub fn sort_newest_first(rides: &mut [Ride]) {
    rides.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.ride_id.cmp(&b.ride_id))
    });
}

#[derive(Default)]
struct MemoryState {
    rides: HashMap<RideId, Ride>,
    drivers: HashMap<DriverId, Driver>,
    drivers_by_identity: HashMap<Identity, DriverId>,
    credited_rides: HashSet<RideId>,
}

/// In-process RideStore. All records live behind a single mutex, which
/// makes `atomic_update` trivially linearizable.
#[derive(Default)]
pub struct MemoryRideStore {
    state: Mutex<MemoryState>,
}

impl MemoryRideStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }
}

impl RideStore for MemoryRideStore {
    fn get(&self, ride_id: RideId) -> Result<Option<Ride>, StoreError> {
        Ok(self.lock()?.rides.get(&ride_id).cloned())
    }

    fn create(&self, draft: RideDraft) -> Result<Ride, StoreError> {
        let ride = Ride::new(draft);
        self.lock()?.rides.insert(ride.ride_id, ride.clone());
        Ok(ride)
    }

    fn atomic_update(
        &self,
        ride_id: RideId,
        expected: RideStatus,
        mutator: &dyn Fn(&mut Ride),
    ) -> Result<Ride, StoreError> {
        let mut state = self.lock()?;
        let current = state
            .rides
            .get(&ride_id)
            .ok_or(StoreError::RideNotFound(ride_id))?;

        if current.status != expected {
            return Err(StoreError::Conflict {
                ride_id,
                expected,
                actual: current.status,
            });
        }

        let mut updated = current.clone();
        mutator(&mut updated);
        check_update(expected, current, &updated)?;

        state.rides.insert(ride_id, updated.clone());
        Ok(updated)
    }

    fn list_rides(&self, filter: &RideFilter) -> Result<Vec<Ride>, StoreError> {
        let mut rides: Vec<Ride> = self
            .lock()?
            .rides
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort_newest_first(&mut rides);
        Ok(rides)
    }

    fn insert_driver(&self, driver: Driver) -> Result<Driver, StoreError> {
        let mut state = self.lock()?;
        if state.drivers_by_identity.contains_key(&driver.identity) {
            return Err(StoreError::DuplicateDriver {
                identity: driver.identity,
            });
        }
        state
            .drivers_by_identity
            .insert(driver.identity.clone(), driver.driver_id);
        state.drivers.insert(driver.driver_id, driver.clone());
        Ok(driver)
    }

    fn get_driver(&self, driver_id: DriverId) -> Result<Option<Driver>, StoreError> {
        Ok(self.lock()?.drivers.get(&driver_id).cloned())
    }

    fn driver_by_identity(&self, identity: &Identity) -> Result<Option<Driver>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .drivers_by_identity
            .get(identity)
            .and_then(|id| state.drivers.get(id))
            .cloned())
    }

    fn list_drivers(&self) -> Result<Vec<Driver>, StoreError> {
        let mut drivers: Vec<Driver> = self.lock()?.drivers.values().cloned().collect();
        drivers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(drivers)
    }

    fn credit_completed_ride(
        &self,
        driver_id: DriverId,
        ride_id: RideId,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        if state.credited_rides.contains(&ride_id) {
            return Ok(false);
        }

        let ride = state
            .rides
            .get(&ride_id)
            .ok_or(StoreError::RideNotFound(ride_id))?;
        let assigned = ride.driver.as_ref().map(|d| d.driver_id);
        if ride.status != RideStatus::Completed || assigned != Some(driver_id) {
            return Err(StoreError::InvariantViolation {
                ride_id,
                reason: format!("ride is not a completed ride of driver {}", driver_id),
            });
        }

        let driver = state
            .drivers
            .get_mut(&driver_id)
            .ok_or(StoreError::DriverNotFound(driver_id))?;
        driver.total_rides += 1;
        state.credited_rides.insert(ride_id);
        Ok(true)
    }
}
