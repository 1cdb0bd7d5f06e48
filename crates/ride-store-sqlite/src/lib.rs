//! # ride-store-sqlite
//!
//! Durable [`RideStore`](ride_lifecycle::RideStore) implementation on SQLite.
//!
//! Status updates run in `BEGIN IMMEDIATE` transactions, so the
//! compare-and-swap contract holds across connections and processes that
//! share one database file, not just across threads in one process.

pub mod store;

pub use store::{SqliteRideStore, DEFAULT_BUSY_TIMEOUT};
