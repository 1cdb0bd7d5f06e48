// events.rs — State change feed and sync notification dispatch.
//
// After every committed transition the engine publishes a RideStateChange
// to a SyncNotifier. Notifiers mirror ride state to outside subscribers
// (a JSONL log, a realtime sync service, ...). They are best-effort:
// - a failure is logged and swallowed, never surfaced to the caller
// - a failure never undoes the committed transition
// - BackgroundNotifier moves delivery off the caller's thread entirely

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::driver::Identity;
use crate::error::NotifyError;
use crate::ride::{CancelledBy, Ride, RideId, RideStatus};

/// One committed state change, as mirrored to sync subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideStateChange {
    pub ride_id: RideId,

    /// The status the ride just entered.
    pub status: RideStatus,

    /// The party the change concerns: the passenger for new rides and
    /// passenger cancellations, the assigned driver otherwise.
    pub identity: Identity,

    pub timestamp: DateTime<Utc>,
}

impl RideStateChange {
    pub fn new(
        ride_id: RideId,
        status: RideStatus,
        identity: Identity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            ride_id,
            status,
            identity,
            timestamp,
        }
    }

    /// Build the change describing a ride's current status.
    pub fn from_ride(ride: &Ride) -> Self {
        let driver_or_passenger = || {
            ride.driver_identity()
                .cloned()
                .unwrap_or_else(|| ride.passenger.clone())
        };
        let identity = match (ride.status, ride.cancelled_by) {
            (RideStatus::Requested, _) => ride.passenger.clone(),
            (RideStatus::Cancelled, Some(CancelledBy::Passenger) | None) => ride.passenger.clone(),
            _ => driver_or_passenger(),
        };
        Self::new(ride.ride_id, ride.status, identity, ride.updated_at)
    }
}

/// Receives committed ride state changes.
///
/// Implementations decide what to do with each change: append to a log,
/// push to a realtime document store, etc. Errors are logged by the
/// caller and never affect the ride.
pub trait SyncNotifier: Send + Sync {
    fn notify(&self, change: &RideStateChange) -> Result<(), NotifyError>;
}

/// Drops every change. Used when no sync feed is configured.
pub struct NoopNotifier;

impl SyncNotifier for NoopNotifier {
    fn notify(&self, _change: &RideStateChange) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Appends changes as JSONL to a file.
pub struct LogSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SyncNotifier for LogSink {
    fn notify(&self, change: &RideStateChange) -> Result<(), NotifyError> {
        let json = serde_json::to_string(change)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| NotifyError::Sink("log sink lock poisoned".to_string()))?;

        // Ensure parent directory exists.
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| NotifyError::IoError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| NotifyError::IoError {
                path: self.path.display().to_string(),
                source,
            })?;

        writeln!(file, "{}", json).map_err(|source| NotifyError::IoError {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(())
    }
}

/// Dispatches changes to multiple notifiers.
///
/// Errors from individual notifiers are logged (via tracing) but don't
/// prevent the others from receiving the change.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn SyncNotifier>>,
}

impl EventDispatcher {
    /// Create a new dispatcher with no sinks.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sink(&mut self, sink: Box<dyn SyncNotifier>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Dispatch a change to all sinks.
    pub fn dispatch(&self, change: &RideStateChange) {
        for sink in &self.sinks {
            if let Err(e) = sink.notify(change) {
                tracing::warn!("sync sink error for ride {}: {}", change.ride_id, e);
            }
        }
    }
}

impl SyncNotifier for EventDispatcher {
    fn notify(&self, change: &RideStateChange) -> Result<(), NotifyError> {
        self.dispatch(change);
        Ok(())
    }
}

/// Delivers changes to an inner notifier on a dedicated worker thread.
///
/// `notify` only enqueues, so the engine never waits on the sync feed.
/// Changes are delivered in the order they were enqueued. `shutdown`
/// (also run on drop) drains the queue and joins the worker.
pub struct BackgroundNotifier {
    sender: Mutex<Option<Sender<RideStateChange>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundNotifier {
    pub fn spawn(inner: Box<dyn SyncNotifier>) -> Result<Self, NotifyError> {
        let (sender, receiver) = mpsc::channel::<RideStateChange>();
        let worker = thread::Builder::new()
            .name("ride-sync".to_string())
            .spawn(move || {
                for change in receiver {
                    if let Err(e) = inner.notify(&change) {
                        tracing::warn!(
                            "background sync failed for ride {} ({}): {}",
                            change.ride_id,
                            change.status,
                            e
                        );
                    }
                }
            })
            .map_err(|e| NotifyError::Sink(format!("failed to spawn sync worker: {}", e)))?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stop accepting changes, deliver everything already queued, and join
    /// the worker. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("sync worker panicked during shutdown");
            }
        }
    }
}

impl SyncNotifier for BackgroundNotifier {
    fn notify(&self, change: &RideStateChange) -> Result<(), NotifyError> {
        let sender = self.sender.lock().map_err(|_| NotifyError::Closed)?;
        match sender.as_ref() {
            Some(tx) => tx.send(change.clone()).map_err(|_| NotifyError::Closed),
            None => Err(NotifyError::Closed),
        }
    }
}

impl Drop for BackgroundNotifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Notifiers for tests: one that records, one that always fails.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::sync::Mutex;

    use super::{RideStateChange, SyncNotifier};
    use crate::error::NotifyError;
    use crate::ride::RideStatus;

    #[derive(Default)]
    pub struct RecordingNotifier {
        changes: Mutex<Vec<RideStateChange>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn changes(&self) -> Vec<RideStateChange> {
            self.changes.lock().map(|c| c.clone()).unwrap_or_default()
        }

        pub fn statuses(&self) -> Vec<RideStatus> {
            self.changes().into_iter().map(|c| c.status).collect()
        }
    }

    impl SyncNotifier for RecordingNotifier {
        fn notify(&self, change: &RideStateChange) -> Result<(), NotifyError> {
            self.changes
                .lock()
                .map_err(|_| NotifyError::Sink("recorder lock poisoned".to_string()))?
                .push(change.clone());
            Ok(())
        }
    }

    pub struct FailingNotifier;

    impl SyncNotifier for FailingNotifier {
        fn notify(&self, _change: &RideStateChange) -> Result<(), NotifyError> {
            Err(NotifyError::Sink("sync service unreachable".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FailingNotifier, RecordingNotifier};
    use super::*;
    use crate::driver::Driver;
    use crate::ride::{RideDraft, RideRequest, Transition};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn requested_ride() -> Ride {
        Ride::new(RideDraft {
            passenger: Identity::new("p1"),
            request: RideRequest::new("A", "B"),
        })
    }

    /// Forwards to a shared recorder so tests can inspect what a boxed
    /// sink received.
    struct Forward(Arc<RecordingNotifier>);

    impl SyncNotifier for Forward {
        fn notify(&self, change: &RideStateChange) -> Result<(), NotifyError> {
            self.0.notify(change)
        }
    }

    #[test]
    fn relevant_identity_follows_status() {
        let mut ride = requested_ride();
        assert_eq!(RideStateChange::from_ride(&ride).identity.as_str(), "p1");

        ride.apply(&Transition::Accept(Driver::new("d1", "Van").to_ref()), Utc::now());
        let change = RideStateChange::from_ride(&ride);
        assert_eq!(change.identity.as_str(), "d1");
        assert_eq!(change.status, RideStatus::Accepted);
        assert_eq!(change.timestamp, ride.updated_at);

        let mut by_driver = ride.clone();
        by_driver.apply(&Transition::Cancel(CancelledBy::Driver), Utc::now());
        assert_eq!(RideStateChange::from_ride(&by_driver).identity.as_str(), "d1");

        ride.apply(&Transition::Cancel(CancelledBy::Passenger), Utc::now());
        assert_eq!(RideStateChange::from_ride(&ride).identity.as_str(), "p1");
    }

    #[test]
    fn change_serializes_with_snake_case_status() {
        let mut ride = requested_ride();
        ride.apply(&Transition::Accept(Driver::new("d1", "Van").to_ref()), Utc::now());
        let json = serde_json::to_string(&RideStateChange::from_ride(&ride)).unwrap();
        assert!(json.contains("\"status\":\"accepted\""));
        assert!(json.contains("\"identity\":\"d1\""));
    }

    #[test]
    fn log_sink_appends_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync").join("events.jsonl");
        let sink = LogSink::new(&path);

        let ride = requested_ride();
        sink.notify(&RideStateChange::from_ride(&ride)).unwrap();
        sink.notify(&RideStateChange::from_ride(&ride)).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let restored: RideStateChange = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(restored.ride_id, ride.ride_id);
    }

    #[test]
    fn dispatcher_continues_past_failing_sink() {
        let recorder = Arc::new(RecordingNotifier::new());
        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(FailingNotifier));
        dispatcher.add_sink(Box::new(Forward(Arc::clone(&recorder))));
        assert_eq!(dispatcher.len(), 2);

        let change = RideStateChange::from_ride(&requested_ride());
        dispatcher.notify(&change).unwrap();

        assert_eq!(recorder.changes(), vec![change]);
    }

    #[test]
    fn background_notifier_delivers_in_order_before_shutdown_returns() {
        let recorder = Arc::new(RecordingNotifier::new());
        let notifier = BackgroundNotifier::spawn(Box::new(Forward(Arc::clone(&recorder)))).unwrap();

        let mut ride = requested_ride();
        notifier.notify(&RideStateChange::from_ride(&ride)).unwrap();
        ride.apply(&Transition::Accept(Driver::new("d1", "Van").to_ref()), Utc::now());
        notifier.notify(&RideStateChange::from_ride(&ride)).unwrap();

        notifier.shutdown();
        assert_eq!(
            recorder.statuses(),
            vec![RideStatus::Requested, RideStatus::Accepted]
        );
    }

    #[test]
    fn background_notifier_rejects_after_shutdown() {
        let notifier = BackgroundNotifier::spawn(Box::new(NoopNotifier)).unwrap();
        notifier.shutdown();
        let result = notifier.notify(&RideStateChange::from_ride(&requested_ride()));
        assert!(matches!(result, Err(NotifyError::Closed)));
    }
}
