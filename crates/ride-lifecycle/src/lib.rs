//! # ride-lifecycle
//!
//! Ride lifecycle state machine and race-safe driver assignment.
//!
//! A [`Ride`] moves through a fixed lifecycle (Requested → Accepted →
//! InProgress → Completed, with Cancelled reachable from any active
//! status). The [`RideLifecycleEngine`] authorizes each transition against
//! the caller's resolved role and commits it through a single
//! compare-and-swap on the ride's status, so concurrent accepts on one ride
//! produce exactly one winner.
//!
//! ## Key components
//!
//! - [`Ride`] / [`RideStatus`] — the ride record and its state machine
//! - [`RideStore`] — persistence trait with the atomic compare-and-swap
//!   primitive; [`MemoryRideStore`] is the in-process implementation
//! - [`DriverRegistry`] — resolves a caller's identity into an [`Actor`]
//! - [`TransitionPolicy`] — pure authorization of actor × action × status
//! - [`RideLifecycleEngine`] — the operations: create, accept, start,
//!   complete, cancel, plus driver-credit reconciliation
//! - [`SyncNotifier`] — best-effort publication of committed transitions
//! - [`IdentityGateway`] — bearer credential → verified identity

pub mod driver;
pub mod engine;
pub mod error;
pub mod events;
pub mod identity;
pub mod policy;
pub mod registry;
pub mod ride;
pub mod store;

pub use driver::{Driver, DriverId, DriverRef, Identity};
pub use engine::{ReconcileReport, RideLifecycleEngine};
pub use error::{IdentityError, NotifyError, RideError, StoreError};
pub use events::{
    BackgroundNotifier, EventDispatcher, LogSink, NoopNotifier, RideStateChange, SyncNotifier,
};
pub use identity::{IdentityGateway, StaticTokenGateway};
pub use policy::{Denial, TransitionDecision, TransitionPolicy};
pub use registry::{Actor, DriverRegistry};
pub use ride::{
    CancelledBy, Coordinates, Location, Price, Ride, RideAction, RideDraft, RideId, RideRequest,
    RideStatus, Transition,
};
pub use store::{MemoryRideStore, RideFilter, RideStore};
