// error.rs — Error types for the ride lifecycle subsystem.
//
// `RideError` is what callers of the engine see. Most of its variants are
// expected outcomes of normal concurrent operation (a driver losing the
// accept race, a passenger cancelling twice) rather than system failures;
// `is_expected()` tells the two apart so callers can log accordingly.

use thiserror::Error;

use crate::driver::{DriverId, Identity};
use crate::ride::{RideAction, RideId, RideStatus};

/// Errors returned by the lifecycle engine and driver registry.
#[derive(Debug, Error)]
pub enum RideError {
    /// No ride exists with this identifier.
    #[error("ride not found: {0}")]
    RideNotFound(RideId),

    /// The acting identity has no driver record.
    #[error("driver profile not found for '{identity}'")]
    DriverNotFound { identity: Identity },

    /// The driver exists but is flagged unavailable.
    #[error("driver '{identity}' is not available")]
    DriverUnavailable { identity: Identity },

    /// The ride is no longer in `requested` (another driver won, or it moved on).
    #[error("ride {ride_id} is not requestable (status: {status})")]
    RideNotRequestable { ride_id: RideId, status: RideStatus },

    /// The acting identity is not a party allowed to perform this action.
    #[error("'{identity}' is not authorized to {action} this ride")]
    Unauthorized { identity: Identity, action: RideAction },

    /// The ride's current status does not permit this action.
    #[error("cannot {action} ride {ride_id} from status {from}")]
    InvalidTransition {
        ride_id: RideId,
        from: RideStatus,
        action: RideAction,
    },

    /// A required field is missing or malformed.
    #[error("validation error: {0}")]
    Validation(String),

    /// A driver record already exists for this identity.
    #[error("a driver profile already exists for '{identity}'")]
    DuplicateDriver { identity: Identity },

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl RideError {
    /// True for outcomes that are part of normal operation and should not
    /// be reported as system errors.
    pub fn is_expected(&self) -> bool {
        !matches!(self, RideError::Store(_))
    }
}

impl From<StoreError> for RideError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RideNotFound(ride_id) => RideError::RideNotFound(ride_id),
            StoreError::DuplicateDriver { identity } => RideError::DuplicateDriver { identity },
            other => RideError::Store(other),
        }
    }
}

/// Errors reported by `RideStore` implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record's status did not match the expected starting status.
    #[error("conflict on ride {ride_id}: expected {expected}, found {actual}")]
    Conflict {
        ride_id: RideId,
        expected: RideStatus,
        actual: RideStatus,
    },

    /// The requested ride was not found.
    #[error("ride not found: {0}")]
    RideNotFound(RideId),

    /// The requested driver was not found.
    #[error("driver not found: {0}")]
    DriverNotFound(DriverId),

    /// A driver record already exists for this identity.
    #[error("duplicate driver for identity '{identity}'")]
    DuplicateDriver { identity: Identity },

    /// A mutator would have produced a record that breaks a ride invariant.
    #[error("invariant violation on ride {ride_id}: {reason}")]
    InvariantViolation { ride_id: RideId, reason: String },

    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize/deserialize a record.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Backend-specific failure (database driver, poisoned lock, ...).
    #[error("backend error: {0}")]
    Backend(String),
}

/// Errors from a sync notifier. Never propagated to engine callers.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize the state change.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The background worker has shut down.
    #[error("notifier closed")]
    Closed,

    /// A sink rejected the change.
    #[error("sink error: {0}")]
    Sink(String),
}

/// Errors from the identity gateway.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No credential was presented.
    #[error("missing credential")]
    MissingCredential,

    /// The credential did not verify.
    #[error("invalid credential")]
    InvalidCredential,
}
