// ride.rs — Ride: one transportation request and its lifecycle.
//
// The state machine enforces a valid lifecycle:
//   Requested → Accepted → InProgress → Completed
//   (or Cancelled from any non-terminal state)
//
// Completed and Cancelled are terminal: once a ride reaches either, the
// record never changes again. Every mutation goes through `Ride::apply`
// with a `Transition`, called from inside the store's atomic update.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::driver::{DriverRef, Identity};
use crate::error::RideError;

/// Unique identifier of a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RideId(Uuid);

impl RideId {
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

impl Default for RideId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RideId {
    type Err = RideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| RideError::Validation(format!("invalid ride id '{}': {}", s, e)))
    }
}

/// The lifecycle status of a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    /// Created by a passenger, waiting for a driver.
    Requested,

    /// A driver has been assigned.
    Accepted,

    /// The driver has picked up the passenger.
    InProgress,

    /// The ride finished and was priced.
    Completed,

    /// The ride was called off by the passenger or the driver.
    Cancelled,
}

impl RideStatus {
    pub const ALL: [RideStatus; 5] = [
        RideStatus::Requested,
        RideStatus::Accepted,
        RideStatus::InProgress,
        RideStatus::Completed,
        RideStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Requested => "requested",
            RideStatus::Accepted => "accepted",
            RideStatus::InProgress => "in_progress",
            RideStatus::Completed => "completed",
            RideStatus::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RideStatus::Completed | RideStatus::Cancelled)
    }

    /// Check whether moving from this status to `next` is an edge of the
    /// state machine.
    pub fn can_transition_to(&self, next: RideStatus) -> bool {
        matches!(
            (self, next),
            (RideStatus::Requested, RideStatus::Accepted)
                | (RideStatus::Accepted, RideStatus::InProgress)
                | (RideStatus::InProgress, RideStatus::Completed)
                | (
                    RideStatus::Requested | RideStatus::Accepted | RideStatus::InProgress,
                    RideStatus::Cancelled
                )
        )
    }
}

impl fmt::Display for RideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RideStatus {
    type Err = RideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RideStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| RideError::Validation(format!("unknown ride status '{}'", s)))
    }
}

/// An action a caller can request on a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RideAction {
    Accept,
    Start,
    Complete,
    Cancel,
}

impl RideAction {
    /// The status a successful action leaves the ride in.
    pub fn target(&self) -> RideStatus {
        match self {
            RideAction::Accept => RideStatus::Accepted,
            RideAction::Start => RideStatus::InProgress,
            RideAction::Complete => RideStatus::Completed,
            RideAction::Cancel => RideStatus::Cancelled,
        }
    }

    pub fn permitted_from(&self, from: RideStatus) -> bool {
        from.can_transition_to(self.target())
    }
}

impl fmt::Display for RideAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RideAction::Accept => write!(f, "accept"),
            RideAction::Start => write!(f, "start"),
            RideAction::Complete => write!(f, "complete"),
            RideAction::Cancel => write!(f, "cancel"),
        }
    }
}

/// A fare amount in minor units (cents).
///
/// Fares are exact two-decimal amounts, so they are kept as integer cents
/// and only rendered as "25.50" at the edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(i64);

impl Price {
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(&self) -> i64 {
        self.0
    }

    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl FromStr for Price {
    type Err = RideError;

    /// Parse "25", "25.5" or "25.50" (an optional leading '-').
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RideError::Validation(format!("invalid price '{}'", s));
        let trimmed = s.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));

        if whole.is_empty()
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || frac.len() > 2
            || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => frac.parse().map_err(|_| invalid())?,
        };
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac))
            .ok_or_else(invalid)?;

        Ok(Self(if negative { -cents } else { cents }))
    }
}

/// A latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn validate(&self) -> Result<(), RideError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(RideError::Validation(format!(
                "latitude {} out of range",
                self.lat
            )));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(RideError::Validation(format!(
                "longitude {} out of range",
                self.lng
            )));
        }
        Ok(())
    }
}

/// A pickup or dropoff point: free text plus optional coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

impl Location {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            coordinates: None,
        }
    }

    pub fn with_coordinates(mut self, lat: f64, lng: f64) -> Self {
        self.coordinates = Some(Coordinates::new(lat, lng));
        self
    }

    fn validate(&self, label: &str) -> Result<(), RideError> {
        if self.description.trim().is_empty() {
            return Err(RideError::Validation(format!("{} location is required", label)));
        }
        if let Some(coords) = &self.coordinates {
            coords.validate()?;
        }
        Ok(())
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.coordinates {
            Some(c) => write!(f, "{} ({:.5}, {:.5})", self.description, c.lat, c.lng),
            None => f.write_str(&self.description),
        }
    }
}

/// What a passenger submits to request a ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRequest {
    pub pickup: Location,
    pub dropoff: Location,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_price: Option<Price>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,
}

impl RideRequest {
    pub fn new(pickup: impl Into<String>, dropoff: impl Into<String>) -> Self {
        Self {
            pickup: Location::new(pickup),
            dropoff: Location::new(dropoff),
            estimated_price: None,
            distance_km: None,
            duration_minutes: None,
        }
    }

    pub fn with_pickup_coordinates(mut self, lat: f64, lng: f64) -> Self {
        self.pickup = self.pickup.with_coordinates(lat, lng);
        self
    }

    pub fn with_dropoff_coordinates(mut self, lat: f64, lng: f64) -> Self {
        self.dropoff = self.dropoff.with_coordinates(lat, lng);
        self
    }

    pub fn with_estimate(
        mut self,
        price: Option<Price>,
        distance_km: Option<f64>,
        duration_minutes: Option<u32>,
    ) -> Self {
        self.estimated_price = price;
        self.distance_km = distance_km;
        self.duration_minutes = duration_minutes;
        self
    }

    pub fn validate(&self) -> Result<(), RideError> {
        self.pickup.validate("pickup")?;
        self.dropoff.validate("dropoff")?;
        if let Some(price) = self.estimated_price {
            if price.cents() < 0 {
                return Err(RideError::Validation(format!(
                    "estimated price {} is negative",
                    price
                )));
            }
        }
        if let Some(distance) = self.distance_km {
            if !distance.is_finite() || distance < 0.0 {
                return Err(RideError::Validation(format!(
                    "distance {} is not a valid length",
                    distance
                )));
            }
        }
        Ok(())
    }
}

/// A validated request bound to its passenger, ready for `RideStore::create`.
#[derive(Debug, Clone, PartialEq)]
pub struct RideDraft {
    pub passenger: Identity,
    pub request: RideRequest,
}

/// Which party cancelled a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Passenger,
    Driver,
}

impl CancelledBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelledBy::Passenger => "passenger",
            CancelledBy::Driver => "driver",
        }
    }
}

impl FromStr for CancelledBy {
    type Err = RideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passenger" => Ok(CancelledBy::Passenger),
            "driver" => Ok(CancelledBy::Driver),
            other => Err(RideError::Validation(format!(
                "unknown cancelling party '{}'",
                other
            ))),
        }
    }
}

/// The field changes a committed action makes to a ride.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Accept(DriverRef),
    Start,
    Complete(Price),
    Cancel(CancelledBy),
}

impl Transition {
    pub fn action(&self) -> RideAction {
        match self {
            Transition::Accept(_) => RideAction::Accept,
            Transition::Start => RideAction::Start,
            Transition::Complete(_) => RideAction::Complete,
            Transition::Cancel(_) => RideAction::Cancel,
        }
    }
}

/// One transportation request, tracked from creation to a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ride {
    /// Unique identifier for this ride.
    pub ride_id: RideId,

    /// The passenger who requested the ride. Never changes.
    pub passenger: Identity,

    /// The assigned driver, set on accept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<DriverRef>,

    pub pickup: Location,
    pub dropoff: Location,

    /// Current lifecycle status.
    pub status: RideStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_price: Option<Price>,

    /// The charged fare. Always set once the ride is completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_price: Option<Price>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_minutes: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_by: Option<CancelledBy>,

    /// When the passenger requested the ride.
    pub created_at: DateTime<Utc>,

    /// When the ride last changed status.
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Ride {
    /// Create a new ride in the Requested state.
    pub fn new(draft: RideDraft) -> Self {
        let now = Utc::now();
        let RideDraft { passenger, request } = draft;
        Self {
            ride_id: RideId::new(),
            passenger,
            driver: None,
            pickup: request.pickup,
            dropoff: request.dropoff,
            status: RideStatus::Requested,
            estimated_price: request.estimated_price,
            actual_price: None,
            distance_km: request.distance_km,
            duration_minutes: request.duration_minutes,
            cancelled_by: None,
            created_at: now,
            updated_at: now,
            accepted_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    /// The assigned driver's identity, if any.
    pub fn driver_identity(&self) -> Option<&Identity> {
        self.driver.as_ref().map(|d| &d.identity)
    }

    pub fn is_assigned_driver(&self, identity: &Identity) -> bool {
        self.driver_identity() == Some(identity)
    }

    pub fn is_passenger(&self, identity: &Identity) -> bool {
        &self.passenger == identity
    }

    /// Apply a transition's field changes. Does not validate the edge;
    /// the store checks the result with `check_invariants` before commit.
    pub fn apply(&mut self, transition: &Transition, at: DateTime<Utc>) {
        match transition {
            Transition::Accept(driver) => {
                self.driver = Some(driver.clone());
                self.accepted_at = Some(at);
            }
            Transition::Start => {
                self.started_at = Some(at);
            }
            Transition::Complete(price) => {
                self.actual_price = Some(*price);
                self.completed_at = Some(at);
            }
            Transition::Cancel(by) => {
                self.cancelled_by = Some(*by);
                self.cancelled_at = Some(at);
            }
        }
        self.status = transition.action().target();
        self.updated_at = at;
    }

    /// Check the record-level invariants that must hold in every status.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.status {
            RideStatus::Requested if self.driver.is_some() => {
                return Err("requested ride must not have a driver".to_string());
            }
            RideStatus::Accepted | RideStatus::InProgress | RideStatus::Completed
                if self.driver.is_none() =>
            {
                return Err(format!("{} ride must have a driver", self.status));
            }
            _ => {}
        }
        if self.status == RideStatus::Completed && !self.actual_price.is_some_and(|p| p.is_positive())
        {
            return Err("completed ride must have a positive actual price".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for Ride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ride {} - {}", self.ride_id, self.passenger)
    }
}
