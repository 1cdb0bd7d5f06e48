// driver.rs — Identities and driver records.
//
// An `Identity` is the stable user id handed to us by the identity gateway.
// A `Driver` is the operator profile attached to at most one identity.
// Rides hold a `DriverRef` snapshot rather than owning the driver record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RideError;

/// A verified caller identity (opaque, stable user id).
///
/// `#[serde(transparent)]` makes this serialize as a bare string rather
/// than `{"0": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for Identity {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Unique identifier of a driver record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DriverId(Uuid);

impl DriverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DriverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DriverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DriverId {
    type Err = RideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| RideError::Validation(format!("invalid driver id '{}': {}", s, e)))
    }
}

/// A registered vehicle operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Driver {
    /// Unique identifier for this driver record.
    pub driver_id: DriverId,

    /// The identity that owns this profile. At most one driver per identity.
    pub identity: Identity,

    /// Free-text vehicle descriptor (e.g., "Blue Corolla, ABC-123").
    pub vehicle_info: String,

    /// Whether the driver accepts new assignments.
    pub is_available: bool,

    /// Running rating. Starts neutral at 0.0.
    pub rating: f64,

    /// Lifetime count of completed rides.
    pub total_rides: u32,

    /// When this profile was created.
    pub created_at: DateTime<Utc>,
}

impl Driver {
    /// Create an available driver with a neutral rating and no rides.
    pub fn new(identity: impl Into<Identity>, vehicle_info: impl Into<String>) -> Self {
        Self {
            driver_id: DriverId::new(),
            identity: identity.into(),
            vehicle_info: vehicle_info.into(),
            is_available: true,
            rating: 0.0,
            total_rides: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_availability(mut self, is_available: bool) -> Self {
        self.is_available = is_available;
        self
    }

    /// The non-owning reference a ride keeps to its assigned driver.
    pub fn to_ref(&self) -> DriverRef {
        DriverRef {
            driver_id: self.driver_id,
            identity: self.identity.clone(),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.identity, self.vehicle_info)
    }
}

/// The assigned-driver snapshot stored on a ride.
///
/// Carrying the identity alongside the id lets authorization compare the
/// caller against the assigned driver without a second lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRef {
    pub driver_id: DriverId,
    pub identity: Identity,
}
