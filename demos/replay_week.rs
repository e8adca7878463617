//! Replay four weeks of commutes and print the resulting prediction

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use park_flux::clock::ManualClock;
use park_flux::{GeoPoint, ParkingEngine, ParkingSession};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let monday = Utc
        .with_ymd_and_hms(2024, 1, 15, 8, 45, 0)
        .single()
        .ok_or("invalid start time")?;
    let clock = Arc::new(ManualClock::new(monday));
    let engine = ParkingEngine::builder().clock(clock.clone()).build().await?;

    let home = GeoPoint::new(37.7599, -122.4148);
    let office = GeoPoint::new(37.7897, -122.3972);

    for week in 0..4 {
        for weekday in 0..5 {
            let morning = monday + Duration::weeks(week) + Duration::days(weekday);
            clock.set(morning);

            // A little jitter so the spot is not always the same space
            let jitter = (weekday as f64 - 2.0) * 0.0001;
            let mut session = ParkingSession::new(
                home,
                GeoPoint::new(office.lat + jitter, office.lng - jitter),
                2.0 + weekday as f64,
                weekday != 4,
            );
            session.venue = Some("Office".to_string());
            session.context_tags = vec!["work".to_string()];
            engine.learn(&session)?;
        }
    }

    // Next Monday morning, leaving home
    clock.set(monday + Duration::weeks(4));
    let prediction = engine.predict(home, Some(office), &["work".to_string()])?;
    println!("{}", serde_json::to_string_pretty(&prediction)?);
    println!("{}", serde_json::to_string_pretty(&engine.stats())?);
    Ok(())
}
