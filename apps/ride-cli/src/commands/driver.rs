// driver.rs — Driver subcommands: register, list.

use clap::Subcommand;
use ride_lifecycle::Driver;

use super::{truncate, Session};

#[derive(Subcommand)]
pub enum DriverCommands {
    /// Register the calling identity as a driver.
    Register {
        /// Vehicle descriptor (e.g., "Blue Corolla, ABC-123").
        #[arg(long)]
        vehicle: String,
        /// Register as not accepting assignments.
        #[arg(long)]
        unavailable: bool,
    },
    /// List registered drivers.
    List,
}

pub fn execute(cmd: &DriverCommands, session: &Session) -> anyhow::Result<()> {
    match cmd {
        DriverCommands::Register {
            vehicle,
            unavailable,
        } => {
            let identity = session.caller()?;
            let driver = Driver::new(identity, vehicle.as_str()).with_availability(!*unavailable);
            let driver = session
                .store
                .insert_driver(driver)
                .map_err(ride_lifecycle::RideError::from)?;
            tracing::info!("registered driver {} ({})", driver.identity, driver.driver_id);
            println!("Driver registered: {}", driver);
            println!("  ID:        {}", driver.driver_id);
            println!("  Available: {}", driver.is_available);
        }
        DriverCommands::List => {
            let drivers = session.store.list_drivers()?;
            if drivers.is_empty() {
                println!("No drivers registered.");
                return Ok(());
            }

            println!(
                "{:<38} {:<20} {:<28} {:<10} {:<6}",
                "ID", "IDENTITY", "VEHICLE", "AVAILABLE", "RIDES"
            );
            println!("{}", "-".repeat(106));
            for d in &drivers {
                println!(
                    "{:<38} {:<20} {:<28} {:<10} {:<6}",
                    d.driver_id,
                    truncate(d.identity.as_str(), 18),
                    truncate(&d.vehicle_info, 26),
                    if d.is_available { "yes" } else { "no" },
                    d.total_rides,
                );
            }
            println!("\n{} driver(s) total.", drivers.len());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::session;
    use ride_lifecycle::Identity;
    use tempfile::TempDir;

    #[test]
    fn register_creates_profile_for_caller() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path(), "tok-d1");
        execute(
            &DriverCommands::Register {
                vehicle: "Grey Prius".to_string(),
                unavailable: true,
            },
            &session,
        )
        .unwrap();

        let driver = session
            .store
            .driver_by_identity(&Identity::new("driver-1"))
            .unwrap()
            .unwrap();
        assert_eq!(driver.vehicle_info, "Grey Prius");
        assert!(!driver.is_available);
        assert!(execute(&DriverCommands::List, &session).is_ok());
        session.finish();
    }

    #[test]
    fn register_twice_is_rejected() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path(), "tok-d1");
        let register = DriverCommands::Register {
            vehicle: "Van".to_string(),
            unavailable: false,
        };
        execute(&register, &session).unwrap();
        let err = execute(&register, &session).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        session.finish();
    }
}
