// registry.rs — DriverRegistry: identity-to-role resolution.
//
// Every engine call resolves the caller exactly once into an `Actor`.
// Authorization then works from the resolved actor, never by probing the
// store for "does this user have a driver profile" in several places.

use std::sync::Arc;

use crate::driver::{Driver, Identity};
use crate::error::RideError;
use crate::store::RideStore;

/// The role a calling identity plays, resolved once per call.
#[derive(Debug, Clone, PartialEq)]
pub enum Actor {
    /// The identity owns a driver profile.
    Driver(Driver),

    /// Any identity without a driver profile (passengers).
    Rider(Identity),
}

impl Actor {
    pub fn identity(&self) -> &Identity {
        match self {
            Actor::Driver(driver) => &driver.identity,
            Actor::Rider(identity) => identity,
        }
    }

    pub fn driver(&self) -> Option<&Driver> {
        match self {
            Actor::Driver(driver) => Some(driver),
            Actor::Rider(_) => None,
        }
    }
}

/// Read-only driver lookups scoped over a RideStore.
#[derive(Clone)]
pub struct DriverRegistry {
    store: Arc<dyn RideStore>,
}

impl DriverRegistry {
    pub fn new(store: Arc<dyn RideStore>) -> Self {
        Self { store }
    }

    /// Exact one-record lookup. Fails with `DriverNotFound`.
    pub fn lookup_by_identity(&self, identity: &Identity) -> Result<Driver, RideError> {
        self.store
            .driver_by_identity(identity)?
            .ok_or_else(|| RideError::DriverNotFound {
                identity: identity.clone(),
            })
    }

    /// Pure read of the availability flag.
    pub fn is_available(&self, driver: &Driver) -> bool {
        driver.is_available
    }

    /// Resolve the caller's role. Identities without a driver profile are
    /// riders; this never fails with `DriverNotFound`.
    pub fn resolve(&self, identity: &Identity) -> Result<Actor, RideError> {
        Ok(match self.store.driver_by_identity(identity)? {
            Some(driver) => Actor::Driver(driver),
            None => Actor::Rider(identity.clone()),
        })
    }
}
