// engine.rs — RideLifecycleEngine: the ride state machine in motion.
//
// Every mutating operation follows the same shape:
//
// 1. Resolve the caller once into an Actor (DriverRegistry)
// 2. Load the ride and ask TransitionPolicy whether the action is allowed
// 3. Commit through RideStore::atomic_update, expecting the status the
//    policy just approved
// 4. Publish the committed change to the SyncNotifier (best-effort)
//
// Step 3 is the only concurrency control. If two drivers race to accept,
// both pass step 2 but only one survives step 3; the other sees a Conflict
// and reports RideNotRequestable.

use std::fmt::Display;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::driver::Identity;
use crate::error::{RideError, StoreError};
use crate::events::{RideStateChange, SyncNotifier};
use crate::policy::TransitionPolicy;
use crate::registry::{Actor, DriverRegistry};
use crate::ride::{
    CancelledBy, Price, Ride, RideAction, RideDraft, RideId, RideRequest, RideStatus, Transition,
};
use crate::store::{RideFilter, RideStore};

/// Outcome of a driver-credit reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Completed rides with an assigned driver that were examined.
    pub scanned: usize,
    /// Credits applied during this pass.
    pub credited: usize,
    /// Credits that failed again and remain outstanding.
    pub failed: usize,
}

/// Owns the ride state machine, transition authorization, and the
/// race-safe assignment algorithm.
///
/// The engine is `Send + Sync`; share it between threads with `Arc`.
pub struct RideLifecycleEngine {
    store: Arc<dyn RideStore>,
    registry: DriverRegistry,
    notifier: Arc<dyn SyncNotifier>,
}

impl RideLifecycleEngine {
    pub fn new(store: Arc<dyn RideStore>, notifier: Arc<dyn SyncNotifier>) -> Self {
        let registry = DriverRegistry::new(Arc::clone(&store));
        Self {
            store,
            registry,
            notifier,
        }
    }

    pub fn store(&self) -> &Arc<dyn RideStore> {
        &self.store
    }

    pub fn registry(&self) -> &DriverRegistry {
        &self.registry
    }

    /// Create a ride in `Requested` for `passenger`.
    pub fn create_ride(&self, passenger: &Identity, request: RideRequest) -> Result<Ride, RideError> {
        let result = request.validate().and_then(|()| {
            self.store
                .create(RideDraft {
                    passenger: passenger.clone(),
                    request,
                })
                .map_err(RideError::from)
        });

        match &result {
            Ok(ride) => {
                info!("ride {}: requested by {}", ride.ride_id, passenger);
                self.publish(ride);
            }
            Err(e) if e.is_expected() => debug!("create by {} refused: {}", passenger, e),
            Err(e) => error!("create by {} failed: {}", passenger, e),
        }
        result
    }

    /// Assign the calling driver to a requested ride.
    ///
    /// Under N concurrent calls on the same ride exactly one succeeds; the
    /// rest fail with `RideNotRequestable` and change nothing.
    pub fn accept_ride(&self, ride_id: RideId, driver_identity: &Identity) -> Result<Ride, RideError> {
        let result = self.accept(ride_id, driver_identity);
        log_outcome(RideAction::Accept, ride_id, &result);
        result
    }

    /// Mark an accepted ride as picked up. Only the assigned driver may.
    pub fn start_ride(&self, ride_id: RideId, caller: &Identity) -> Result<Ride, RideError> {
        let result = self.start(ride_id, caller);
        log_outcome(RideAction::Start, ride_id, &result);
        result
    }

    /// Finish an in-progress ride with its fare and credit the driver.
    pub fn complete_ride(
        &self,
        ride_id: RideId,
        caller: &Identity,
        actual_price: Option<Price>,
    ) -> Result<Ride, RideError> {
        let result = self.complete(ride_id, caller, actual_price);
        log_outcome(RideAction::Complete, ride_id, &result);
        result
    }

    /// Cancel a non-terminal ride. The passenger or the assigned driver may.
    pub fn cancel_ride(&self, ride_id: RideId, caller: &Identity) -> Result<Ride, RideError> {
        let result = self.cancel(ride_id, caller);
        log_outcome(RideAction::Cancel, ride_id, &result);
        result
    }

    /// Fetch a ride visible to the caller (its passenger or assigned
    /// driver). Rides the caller cannot see are reported as not found.
    pub fn get_ride(&self, ride_id: RideId, caller: &Identity) -> Result<Ride, RideError> {
        let ride = self.load(ride_id)?;
        if ride.is_passenger(caller) || ride.is_assigned_driver(caller) {
            Ok(ride)
        } else {
            Err(RideError::RideNotFound(ride_id))
        }
    }

    /// Rides visible to the caller, newest first: a driver sees the rides
    /// assigned to them, anyone else sees the rides they requested.
    pub fn rides_for(&self, caller: &Identity) -> Result<Vec<Ride>, RideError> {
        let filter = match self.registry.resolve(caller)? {
            Actor::Driver(driver) => RideFilter::all().with_driver(driver.driver_id),
            Actor::Rider(identity) => RideFilter::all().with_passenger(identity),
        };
        Ok(self.store.list_rides(&filter)?)
    }

    /// Requested rides waiting for a driver. Only drivers may browse them.
    pub fn open_requests(&self, caller: &Identity) -> Result<Vec<Ride>, RideError> {
        self.registry.lookup_by_identity(caller)?;
        Ok(self
            .store
            .list_rides(&RideFilter::all().with_status(RideStatus::Requested))?)
    }

    /// Credit every completed ride whose driver credit is still missing.
    ///
    /// Credits are idempotent per ride, so this is safe to run repeatedly
    /// and alongside live traffic.
    pub fn reconcile_driver_credits(&self) -> Result<ReconcileReport, RideError> {
        let completed = self
            .store
            .list_rides(&RideFilter::all().with_status(RideStatus::Completed))?;

        let mut report = ReconcileReport::default();
        for ride in &completed {
            let Some(driver) = &ride.driver else {
                continue;
            };
            report.scanned += 1;
            match self.store.credit_completed_ride(driver.driver_id, ride.ride_id) {
                Ok(true) => {
                    report.credited += 1;
                    info!(
                        "ride {}: reconciled missing credit for driver {}",
                        ride.ride_id, driver.identity
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        "ride {}: credit for driver {} still failing: {}",
                        ride.ride_id, driver.identity, e
                    );
                }
            }
        }

        info!(
            "driver credit reconciliation: {} scanned, {} credited, {} failed",
            report.scanned, report.credited, report.failed
        );
        Ok(report)
    }

    fn accept(&self, ride_id: RideId, driver_identity: &Identity) -> Result<Ride, RideError> {
        let actor = self.registry.resolve(driver_identity)?;
        let driver = actor.driver().ok_or_else(|| RideError::DriverNotFound {
            identity: driver_identity.clone(),
        })?;
        if !self.registry.is_available(driver) {
            return Err(RideError::DriverUnavailable {
                identity: driver_identity.clone(),
            });
        }

        let ride = self.load(ride_id)?;
        TransitionPolicy::authorize(RideAction::Accept, &actor, &ride)?;

        let transition = Transition::Accept(driver.to_ref());
        match self.commit(ride_id, RideStatus::Requested, &transition) {
            Ok(ride) => {
                self.publish(&ride);
                Ok(ride)
            }
            // Lost the race (or the ride was cancelled underneath us).
            Err(StoreError::Conflict { actual, .. }) => Err(RideError::RideNotRequestable {
                ride_id,
                status: actual,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn start(&self, ride_id: RideId, caller: &Identity) -> Result<Ride, RideError> {
        let actor = self.registry.resolve(caller)?;
        let ride = self.load(ride_id)?;
        TransitionPolicy::authorize(RideAction::Start, &actor, &ride)?;

        let ride = self
            .commit(ride_id, RideStatus::Accepted, &Transition::Start)
            .map_err(|e| transition_error(e, RideAction::Start))?;
        self.publish(&ride);
        Ok(ride)
    }

    fn complete(
        &self,
        ride_id: RideId,
        caller: &Identity,
        actual_price: Option<Price>,
    ) -> Result<Ride, RideError> {
        let actor = self.registry.resolve(caller)?;
        let ride = self.load(ride_id)?;
        TransitionPolicy::authorize(RideAction::Complete, &actor, &ride)?;

        let price = match actual_price {
            None => {
                return Err(RideError::Validation(
                    "actual price is required to complete a ride".to_string(),
                ))
            }
            Some(price) if !price.is_positive() => {
                return Err(RideError::Validation(format!(
                    "actual price must be positive, got {}",
                    price
                )))
            }
            Some(price) => price,
        };

        let ride = self
            .commit(ride_id, RideStatus::InProgress, &Transition::Complete(price))
            .map_err(|e| transition_error(e, RideAction::Complete))?;
        self.credit_driver(&ride);
        self.publish(&ride);
        Ok(ride)
    }

    fn cancel(&self, ride_id: RideId, caller: &Identity) -> Result<Ride, RideError> {
        let actor = self.registry.resolve(caller)?;

        // A conflict means the status moved forward underneath us; re-read
        // and re-evaluate. Statuses only advance, so this ends at a commit
        // or at a terminal status the policy refuses.
        loop {
            let ride = self.load(ride_id)?;
            TransitionPolicy::authorize(RideAction::Cancel, &actor, &ride)?;

            let by = if ride.is_passenger(actor.identity()) {
                CancelledBy::Passenger
            } else {
                CancelledBy::Driver
            };
            match self.commit(ride_id, ride.status, &Transition::Cancel(by)) {
                Ok(ride) => {
                    self.publish(&ride);
                    return Ok(ride);
                }
                Err(StoreError::Conflict { actual, .. }) => {
                    debug!("ride {}: moved to {} during cancel, retrying", ride_id, actual);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn load(&self, ride_id: RideId) -> Result<Ride, RideError> {
        self.store
            .get(ride_id)?
            .ok_or(RideError::RideNotFound(ride_id))
    }

    fn commit(
        &self,
        ride_id: RideId,
        expected: RideStatus,
        transition: &Transition,
    ) -> Result<Ride, StoreError> {
        self.store
            .atomic_update(ride_id, expected, &|ride| ride.apply(transition, Utc::now()))
    }

    /// Increment the driver's lifetime count. A failure here never touches
    /// the completed ride; `reconcile_driver_credits` picks it up later.
    fn credit_driver(&self, ride: &Ride) {
        let Some(driver) = &ride.driver else {
            return;
        };
        match self.store.credit_completed_ride(driver.driver_id, ride.ride_id) {
            Ok(true) => debug!("ride {}: credited driver {}", ride.ride_id, driver.identity),
            Ok(false) => debug!("ride {}: driver already credited", ride.ride_id),
            Err(e) => warn!(
                "ride {}: failed to credit driver {} ({}), left for reconciliation",
                ride.ride_id, driver.identity, e
            ),
        }
    }

    fn publish(&self, ride: &Ride) {
        let change = RideStateChange::from_ride(ride);
        if let Err(e) = self.notifier.notify(&change) {
            warn!(
                "ride {}: sync notification for {} failed: {}",
                ride.ride_id, ride.status, e
            );
        }
    }
}

/// start/complete commit against one fixed status; losing that race means
/// the action no longer applies.
fn transition_error(err: StoreError, action: RideAction) -> RideError {
    match err {
        StoreError::Conflict {
            ride_id, actual, ..
        } => RideError::InvalidTransition {
            ride_id,
            from: actual,
            action,
        },
        other => other.into(),
    }
}

fn log_outcome(action: impl Display, ride_id: RideId, result: &Result<Ride, RideError>) {
    match result {
        Ok(ride) => info!("ride {}: {} committed, now {}", ride_id, action, ride.status),
        Err(e) if e.is_expected() => debug!("ride {}: {} refused: {}", ride_id, action, e),
        Err(e) => error!("ride {}: {} failed: {}", ride_id, action, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Driver;
    use crate::events::testing::{FailingNotifier, RecordingNotifier};
    use crate::store::MemoryRideStore;

    struct Fixture {
        engine: RideLifecycleEngine,
        store: Arc<MemoryRideStore>,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryRideStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = RideLifecycleEngine::new(store.clone(), notifier.clone());
        Fixture {
            engine,
            store,
            notifier,
        }
    }

    fn id(s: &str) -> Identity {
        Identity::new(s)
    }

    impl Fixture {
        fn driver(&self, identity: &str) -> Driver {
            self.store.insert_driver(Driver::new(identity, "Sedan")).unwrap()
        }

        fn requested(&self) -> Ride {
            self.engine
                .create_ride(&id("p1"), RideRequest::new("A", "B"))
                .unwrap()
        }

        fn in_progress(&self, driver: &str) -> Ride {
            let ride = self.requested();
            self.engine.accept_ride(ride.ride_id, &id(driver)).unwrap();
            self.engine.start_ride(ride.ride_id, &id(driver)).unwrap()
        }
    }

    #[test]
    fn create_rejects_blank_pickup() {
        let f = fixture();
        let result = f.engine.create_ride(&id("p1"), RideRequest::new("", "B"));
        assert!(matches!(result, Err(RideError::Validation(_))));
        assert!(f.store.list_rides(&RideFilter::all()).unwrap().is_empty());
        assert!(f.notifier.changes().is_empty());
    }

    #[test]
    fn accept_by_non_driver_is_driver_not_found() {
        let f = fixture();
        let ride = f.requested();
        let result = f.engine.accept_ride(ride.ride_id, &id("p2"));
        assert!(matches!(result, Err(RideError::DriverNotFound { .. })));
    }

    #[test]
    fn accept_checks_driver_before_ride_exists() {
        let f = fixture();
        let result = f.engine.accept_ride(RideId::new(), &id("nobody"));
        assert!(matches!(result, Err(RideError::DriverNotFound { .. })));

        f.driver("d1");
        let result = f.engine.accept_ride(RideId::new(), &id("d1"));
        assert!(matches!(result, Err(RideError::RideNotFound(_))));
    }

    #[test]
    fn accept_by_unavailable_driver() {
        let f = fixture();
        f.store
            .insert_driver(Driver::new("d1", "Van").with_availability(false))
            .unwrap();
        let ride = f.requested();
        let result = f.engine.accept_ride(ride.ride_id, &id("d1"));
        assert!(matches!(result, Err(RideError::DriverUnavailable { .. })));
        assert_eq!(
            f.store.get(ride.ride_id).unwrap().unwrap().status,
            RideStatus::Requested
        );
    }

    #[test]
    fn accept_retry_reports_not_requestable_without_side_effects() {
        let f = fixture();
        f.driver("d1");
        let ride = f.requested();
        let accepted = f.engine.accept_ride(ride.ride_id, &id("d1")).unwrap();

        let retry = f.engine.accept_ride(ride.ride_id, &id("d1"));
        assert!(matches!(
            retry,
            Err(RideError::RideNotRequestable {
                status: RideStatus::Accepted,
                ..
            })
        ));
        assert_eq!(f.store.get(ride.ride_id).unwrap().unwrap(), accepted);
        assert_eq!(
            f.notifier.statuses(),
            vec![RideStatus::Requested, RideStatus::Accepted]
        );
    }

    #[test]
    fn accepted_driver_stays_available() {
        let f = fixture();
        let d1 = f.driver("d1");
        let first = f.requested();
        let second = f.requested();
        f.engine.accept_ride(first.ride_id, &id("d1")).unwrap();

        let reloaded = f.store.get_driver(d1.driver_id).unwrap().unwrap();
        assert!(reloaded.is_available);
        assert!(f.engine.accept_ride(second.ride_id, &id("d1")).is_ok());
    }

    #[test]
    fn start_requires_accepted_status() {
        let f = fixture();
        f.driver("d1");
        let ride = f.in_progress("d1");
        let result = f.engine.start_ride(ride.ride_id, &id("d1"));
        assert!(matches!(
            result,
            Err(RideError::InvalidTransition {
                from: RideStatus::InProgress,
                action: RideAction::Start,
                ..
            })
        ));
    }

    #[test]
    fn start_missing_ride() {
        let f = fixture();
        let result = f.engine.start_ride(RideId::new(), &id("d1"));
        assert!(matches!(result, Err(RideError::RideNotFound(_))));
    }

    #[test]
    fn complete_rejects_non_positive_price() {
        let f = fixture();
        f.driver("d1");
        let ride = f.in_progress("d1");
        for cents in [0, -500] {
            let result = f
                .engine
                .complete_ride(ride.ride_id, &id("d1"), Some(Price::from_cents(cents)));
            assert!(matches!(result, Err(RideError::Validation(_))));
        }
        assert_eq!(
            f.store.get(ride.ride_id).unwrap().unwrap().status,
            RideStatus::InProgress
        );
    }

    #[test]
    fn complete_by_passenger_is_unauthorized() {
        let f = fixture();
        f.driver("d1");
        let ride = f.in_progress("d1");
        let result = f
            .engine
            .complete_ride(ride.ride_id, &id("p1"), Some(Price::from_cents(900)));
        assert!(matches!(result, Err(RideError::Unauthorized { .. })));
    }

    #[test]
    fn complete_from_accepted_is_invalid_transition() {
        let f = fixture();
        f.driver("d1");
        let ride = f.requested();
        f.engine.accept_ride(ride.ride_id, &id("d1")).unwrap();
        let result = f
            .engine
            .complete_ride(ride.ride_id, &id("d1"), Some(Price::from_cents(900)));
        assert!(matches!(result, Err(RideError::InvalidTransition { .. })));
    }

    #[test]
    fn cancel_by_assigned_driver_records_party() {
        let f = fixture();
        f.driver("d1");
        let ride = f.in_progress("d1");
        let cancelled = f.engine.cancel_ride(ride.ride_id, &id("d1")).unwrap();
        assert_eq!(cancelled.status, RideStatus::Cancelled);
        assert_eq!(cancelled.cancelled_by, Some(CancelledBy::Driver));
        assert!(cancelled.driver.is_some());
        assert_eq!(f.notifier.changes().last().unwrap().identity, id("d1"));
    }

    #[test]
    fn cancel_by_stranger_is_unauthorized() {
        let f = fixture();
        let ride = f.requested();
        let result = f.engine.cancel_ride(ride.ride_id, &id("p2"));
        assert!(matches!(result, Err(RideError::Unauthorized { .. })));
    }

    #[test]
    fn notifier_failure_does_not_fail_operation() {
        let store = Arc::new(MemoryRideStore::new());
        store.insert_driver(Driver::new("d1", "Van")).unwrap();
        let engine = RideLifecycleEngine::new(store.clone(), Arc::new(FailingNotifier));

        let ride = engine.create_ride(&id("p1"), RideRequest::new("A", "B")).unwrap();
        let accepted = engine.accept_ride(ride.ride_id, &id("d1")).unwrap();
        assert_eq!(accepted.status, RideStatus::Accepted);
        assert_eq!(
            store.get(ride.ride_id).unwrap().unwrap().status,
            RideStatus::Accepted
        );
    }

    #[test]
    fn get_ride_hidden_from_strangers() {
        let f = fixture();
        f.driver("d1");
        let ride = f.requested();
        assert!(f.engine.get_ride(ride.ride_id, &id("p1")).is_ok());
        assert!(matches!(
            f.engine.get_ride(ride.ride_id, &id("d1")),
            Err(RideError::RideNotFound(_))
        ));
        f.engine.accept_ride(ride.ride_id, &id("d1")).unwrap();
        assert!(f.engine.get_ride(ride.ride_id, &id("d1")).is_ok());
    }

    #[test]
    fn rides_for_scopes_by_role() {
        let f = fixture();
        f.driver("d1");
        let mine = f.requested();
        f.engine
            .create_ride(&id("p2"), RideRequest::new("C", "D"))
            .unwrap();
        f.engine.accept_ride(mine.ride_id, &id("d1")).unwrap();

        let for_driver = f.engine.rides_for(&id("d1")).unwrap();
        assert_eq!(for_driver.len(), 1);
        assert_eq!(for_driver[0].ride_id, mine.ride_id);

        let for_p2 = f.engine.rides_for(&id("p2")).unwrap();
        assert_eq!(for_p2.len(), 1);
        assert_eq!(for_p2[0].passenger, id("p2"));
    }

    #[test]
    fn open_requests_only_for_drivers() {
        let f = fixture();
        f.driver("d1");
        f.requested();
        assert_eq!(f.engine.open_requests(&id("d1")).unwrap().len(), 1);
        assert!(matches!(
            f.engine.open_requests(&id("p1")),
            Err(RideError::DriverNotFound { .. })
        ));
    }
}
