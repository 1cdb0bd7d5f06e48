// ride.rs — Ride subcommands: create, accept, start, complete, cancel, show, list.

use clap::Subcommand;
use ride_lifecycle::{Price, Ride, RideId, RideRequest, RideStatus};

use super::{truncate, Session};

#[derive(Subcommand)]
pub enum RideCommands {
    /// Request a ride as the calling passenger.
    Create {
        /// Pickup address or description.
        pickup: String,
        /// Dropoff address or description.
        dropoff: String,
        /// Pickup coordinates as "lat,lng".
        #[arg(long, value_parser = parse_coordinates)]
        pickup_at: Option<(f64, f64)>,
        /// Dropoff coordinates as "lat,lng".
        #[arg(long, value_parser = parse_coordinates)]
        dropoff_at: Option<(f64, f64)>,
        /// Quoted fare (e.g., "18.75").
        #[arg(long)]
        estimate: Option<Price>,
        /// Estimated distance in kilometres.
        #[arg(long)]
        distance_km: Option<f64>,
        /// Estimated duration in minutes.
        #[arg(long)]
        duration_minutes: Option<u32>,
    },
    /// Accept a requested ride as the calling driver.
    Accept {
        /// Ride ID.
        id: RideId,
    },
    /// Mark an accepted ride as picked up.
    Start {
        /// Ride ID.
        id: RideId,
    },
    /// Finish an in-progress ride with the charged fare.
    Complete {
        /// Ride ID.
        id: RideId,
        /// Actual fare (e.g., "25.50").
        #[arg(long)]
        price: Option<Price>,
    },
    /// Cancel a ride as its passenger or assigned driver.
    Cancel {
        /// Ride ID.
        id: RideId,
    },
    /// Show details for one ride.
    Show {
        /// Ride ID.
        id: RideId,
    },
    /// List rides visible to the caller.
    List {
        /// Filter by status (e.g., "requested", "in_progress").
        #[arg(long)]
        status: Option<RideStatus>,
        /// Drivers only: list requested rides awaiting a driver.
        #[arg(long, conflicts_with = "status")]
        open: bool,
    },
}

pub fn execute(cmd: &RideCommands, session: &Session) -> anyhow::Result<()> {
    let caller = session.caller()?;
    let engine = &session.engine;

    match cmd {
        RideCommands::Create {
            pickup,
            dropoff,
            pickup_at,
            dropoff_at,
            estimate,
            distance_km,
            duration_minutes,
        } => {
            let mut request = RideRequest::new(pickup.as_str(), dropoff.as_str()).with_estimate(
                *estimate,
                *distance_km,
                *duration_minutes,
            );
            if let Some((lat, lng)) = pickup_at {
                request = request.with_pickup_coordinates(*lat, *lng);
            }
            if let Some((lat, lng)) = dropoff_at {
                request = request.with_dropoff_coordinates(*lat, *lng);
            }
            let ride = engine.create_ride(&caller, request)?;
            println!("Ride requested: {}", ride.ride_id);
            print_summary(&ride);
        }
        RideCommands::Accept { id } => {
            let ride = engine.accept_ride(*id, &caller)?;
            println!("Ride accepted: {}", ride.ride_id);
            print_summary(&ride);
        }
        RideCommands::Start { id } => {
            let ride = engine.start_ride(*id, &caller)?;
            println!("Ride started: {}", ride.ride_id);
        }
        RideCommands::Complete { id, price } => {
            let ride = engine.complete_ride(*id, &caller, *price)?;
            println!("Ride completed: {}", ride.ride_id);
            if let Some(fare) = ride.actual_price {
                println!("  Fare: {}", fare);
            }
        }
        RideCommands::Cancel { id } => {
            let ride = engine.cancel_ride(*id, &caller)?;
            println!("Ride cancelled: {}", ride.ride_id);
        }
        RideCommands::Show { id } => {
            let ride = engine.get_ride(*id, &caller)?;
            print_details(&ride);
        }
        RideCommands::List { status, open } => {
            let rides = if *open {
                engine.open_requests(&caller)?
            } else {
                let mut rides = engine.rides_for(&caller)?;
                if let Some(status) = status {
                    rides.retain(|r| r.status == *status);
                }
                rides
            };
            print_table(&rides);
        }
    }

    Ok(())
}

fn parse_coordinates(s: &str) -> Result<(f64, f64), String> {
    let (lat, lng) = s
        .split_once(',')
        .ok_or_else(|| format!("expected \"lat,lng\", got '{}'", s))?;
    let lat = lat
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid latitude '{}': {}", lat.trim(), e))?;
    let lng = lng
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid longitude '{}': {}", lng.trim(), e))?;
    Ok((lat, lng))
}

fn print_summary(ride: &Ride) {
    println!("  From:   {}", ride.pickup);
    println!("  To:     {}", ride.dropoff);
    println!("  Status: {}", ride.status);
    if let Some(driver) = &ride.driver {
        println!("  Driver: {}", driver.identity);
    }
}

fn print_details(ride: &Ride) {
    println!("{}", ride);
    println!("Status:    {}", ride.status);
    println!("Passenger: {}", ride.passenger);
    if let Some(driver) = &ride.driver {
        println!("Driver:    {}", driver.identity);
    }
    println!("Pickup:    {}", ride.pickup);
    println!("Dropoff:   {}", ride.dropoff);
    if let Some(price) = ride.estimated_price {
        println!("Estimate:  {}", price);
    }
    if let Some(price) = ride.actual_price {
        println!("Fare:      {}", price);
    }
    if let Some(km) = ride.distance_km {
        println!("Distance:  {:.1} km", km);
    }
    if let Some(minutes) = ride.duration_minutes {
        println!("Duration:  {} min", minutes);
    }
    println!("Created:   {}", ride.created_at.to_rfc3339());
    for (label, at) in [
        ("Accepted", ride.accepted_at),
        ("Started", ride.started_at),
        ("Completed", ride.completed_at),
        ("Cancelled", ride.cancelled_at),
    ] {
        if let Some(at) = at {
            println!("{:<10} {}", format!("{}:", label), at.to_rfc3339());
        }
    }
    if let Some(by) = ride.cancelled_by {
        println!("Cancelled by: {}", by.as_str());
    }
}

fn print_table(rides: &[Ride]) {
    if rides.is_empty() {
        println!("No rides found.");
        return;
    }

    println!(
        "{:<38} {:<12} {:<22} {:<22} {:<16}",
        "ID", "STATUS", "PICKUP", "DROPOFF", "DRIVER"
    );
    println!("{}", "-".repeat(112));
    for r in rides {
        println!(
            "{:<38} {:<12} {:<22} {:<22} {:<16}",
            r.ride_id,
            r.status.to_string(),
            truncate(&r.pickup.description, 20),
            truncate(&r.dropoff.description, 20),
            r.driver_identity().map(|d| d.as_str()).unwrap_or("-"),
        );
    }
    println!("\n{} ride(s) total.", rides.len());
}
