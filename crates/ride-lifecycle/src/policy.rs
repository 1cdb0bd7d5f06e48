// policy.rs — Transition authorization.
//
// `TransitionPolicy::evaluate()` is the single chokepoint deciding whether
// an actor may perform an action on a ride in its current status:
//
// 1. accept:   actor must be a driver → driver must be available
//              → ride must not be terminal → ride must be Requested
// 2. start:    actor must be the assigned driver → ride must be Accepted
// 3. complete: actor must be the assigned driver → ride must be InProgress
// 4. cancel:   actor must be the passenger or the assigned driver
//              → ride must not be terminal
//
// The checks are ordered: identity first, then status. A stranger calling
// start on a completed ride is Unauthorized, not InvalidTransition.
//
// The policy is pure. It never touches the store; the engine loads the
// ride, asks the policy, and only then attempts the atomic update.

use serde::{Deserialize, Serialize};

use crate::error::RideError;
use crate::registry::Actor;
use crate::ride::{Ride, RideAction, RideStatus};

/// Why a transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Denial {
    /// accept by an identity with no driver profile.
    NotADriver,
    /// accept by a driver whose availability flag is off.
    DriverUnavailable,
    /// accept on a ride that is active but already past Requested.
    NotRequestable,
    /// start/complete by anyone but the assigned driver.
    NotAssignedDriver,
    /// cancel by someone who is neither passenger nor assigned driver.
    NotAParty,
    /// The ride's status has no edge for this action.
    InvalidStatus,
}

impl Denial {
    /// Map a denial onto the caller-facing error taxonomy.
    pub fn into_error(self, action: RideAction, actor: &Actor, ride: &Ride) -> RideError {
        match self {
            Denial::NotADriver => RideError::DriverNotFound {
                identity: actor.identity().clone(),
            },
            Denial::DriverUnavailable => RideError::DriverUnavailable {
                identity: actor.identity().clone(),
            },
            Denial::NotRequestable => RideError::RideNotRequestable {
                ride_id: ride.ride_id,
                status: ride.status,
            },
            Denial::NotAssignedDriver | Denial::NotAParty => RideError::Unauthorized {
                identity: actor.identity().clone(),
                action,
            },
            Denial::InvalidStatus => RideError::InvalidTransition {
                ride_id: ride.ride_id,
                from: ride.status,
                action,
            },
        }
    }
}

/// The result of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum TransitionDecision {
    Allow,
    Deny(Denial),
}

/// Evaluates the state machine's guards against a resolved actor.
pub struct TransitionPolicy;

impl TransitionPolicy {
    pub fn evaluate(action: RideAction, actor: &Actor, ride: &Ride) -> TransitionDecision {
        match Self::check(action, actor, ride) {
            Ok(()) => TransitionDecision::Allow,
            Err(denial) => TransitionDecision::Deny(denial),
        }
    }

    /// Evaluate and convert a denial straight into a `RideError`.
    pub fn authorize(action: RideAction, actor: &Actor, ride: &Ride) -> Result<(), RideError> {
        Self::check(action, actor, ride).map_err(|denial| denial.into_error(action, actor, ride))
    }

    fn check(action: RideAction, actor: &Actor, ride: &Ride) -> Result<(), Denial> {
        match action {
            RideAction::Accept => {
                let driver = actor.driver().ok_or(Denial::NotADriver)?;
                if !driver.is_available {
                    return Err(Denial::DriverUnavailable);
                }
                if ride.status.is_terminal() {
                    return Err(Denial::InvalidStatus);
                }
                if ride.status != RideStatus::Requested {
                    return Err(Denial::NotRequestable);
                }
            }
            RideAction::Start | RideAction::Complete => {
                if !ride.is_assigned_driver(actor.identity()) {
                    return Err(Denial::NotAssignedDriver);
                }
            }
            RideAction::Cancel => {
                let identity = actor.identity();
                if !ride.is_passenger(identity) && !ride.is_assigned_driver(identity) {
                    return Err(Denial::NotAParty);
                }
            }
        }

        if !action.permitted_from(ride.status) {
            return Err(Denial::InvalidStatus);
        }
        Ok(())
    }
}
