//! Lifecycle scenarios running against SqliteRideStore on disk.

use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use ride_lifecycle::events::testing::RecordingNotifier;
use ride_lifecycle::{
    Driver, Identity, Price, RideError, RideLifecycleEngine, RideRequest, RideStatus, RideStore,
};
use ride_store_sqlite::{SqliteRideStore, DEFAULT_BUSY_TIMEOUT};

fn open(path: &Path) -> Arc<SqliteRideStore> {
    Arc::new(SqliteRideStore::open(path, DEFAULT_BUSY_TIMEOUT).unwrap())
}

fn engine(store: Arc<SqliteRideStore>) -> RideLifecycleEngine {
    RideLifecycleEngine::new(store, Arc::new(RecordingNotifier::new()))
}

#[test]
fn full_lifecycle_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rides.db");

    let ride_id = {
        let store = open(&path);
        store.insert_driver(Driver::new("d1", "Blue Corolla")).unwrap();
        let engine = engine(store);
        let ride = engine
            .create_ride(&Identity::new("p1"), RideRequest::new("Airport", "Hotel"))
            .unwrap();
        engine.accept_ride(ride.ride_id, &Identity::new("d1")).unwrap();
        engine.start_ride(ride.ride_id, &Identity::new("d1")).unwrap();
        ride.ride_id
    };

    let store = open(&path);
    let engine = engine(store.clone());
    let completed = engine
        .complete_ride(ride_id, &Identity::new("d1"), Some(Price::from_cents(3275)))
        .unwrap();
    assert_eq!(completed.status, RideStatus::Completed);

    let reloaded = store.get(ride_id).unwrap().unwrap();
    assert_eq!(reloaded, completed);
    let driver = store.driver_by_identity(&Identity::new("d1")).unwrap().unwrap();
    assert_eq!(driver.total_rides, 1);

    // Credits are recorded durably; reconciliation finds nothing to do.
    let report = engine.reconcile_driver_credits().unwrap();
    assert_eq!((report.scanned, report.credited, report.failed), (1, 0, 0));
}

#[test]
fn accept_race_across_connections_has_one_winner() {
    const DRIVERS: usize = 6;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rides.db");

    let setup = open(&path);
    for i in 0..DRIVERS {
        setup
            .insert_driver(Driver::new(format!("driver-{}", i), "Sedan"))
            .unwrap();
    }
    let ride_id = engine(setup.clone())
        .create_ride(&Identity::new("p1"), RideRequest::new("A", "B"))
        .unwrap()
        .ride_id;

    // Each thread gets its own connection to the same file.
    let barrier = Arc::new(Barrier::new(DRIVERS));
    let handles: Vec<_> = (0..DRIVERS)
        .map(|i| {
            let engine = engine(open(&path));
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.accept_ride(ride_id, &Identity::new(format!("driver-{}", i)))
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(
            matches!(result, Err(RideError::RideNotRequestable { .. })),
            "unexpected {:?}",
            result
        );
    }

    let stored = setup.get(ride_id).unwrap().unwrap();
    assert_eq!(stored.status, RideStatus::Accepted);
    assert_eq!(stored.driver, winners[0].driver);
}

#[test]
fn cancelled_ride_cannot_be_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir.path().join("rides.db"));
    store.insert_driver(Driver::new("d1", "Van")).unwrap();
    let engine = engine(store);

    let ride = engine
        .create_ride(&Identity::new("p1"), RideRequest::new("A", "B"))
        .unwrap();
    engine.cancel_ride(ride.ride_id, &Identity::new("p1")).unwrap();

    let late = engine.accept_ride(ride.ride_id, &Identity::new("d1"));
    assert!(matches!(late, Err(RideError::InvalidTransition { .. })));
}
