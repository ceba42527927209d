//! Doorbell against the simulated sensor
//!
//! Enrolls one finger, then plays a resident and a stranger at the door.
//!
//! ```text
//! RUST_LOG=fpdoorbell=debug cargo run --example simulated_doorbell
//! ```

use std::time::Duration;

use anyhow::Context;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use fpdoorbell::sim::{sample_template, SimulatedSensor};
use fpdoorbell::{Activity, Doorbell, DoorbellConfig, LogSink, ManualTouch, MemoryRegistry};

const TICK: Duration = Duration::from_millis(20);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let sim = SimulatedSensor::new().with_capacity(100);
    let sensor = sim.handle();
    let touch = ManualTouch::new();
    let registry = MemoryRegistry::new();

    let config = DoorbellConfig::default()
        .with_enroll_hold(Duration::from_millis(200), 50)
        .with_signal_hold(Duration::from_millis(500), Duration::from_millis(500));

    let mut doorbell = Doorbell::new(config, sim, touch.clone(), LogSink, registry.clone())?;

    while doorbell.tick().await != Activity::Connected {
        sleep(TICK).await;
    }

    // Enroll finger 42 as slot 1
    doorbell.start_enrollment(1, "Alice").await?;
    while doorbell.is_enrolling() {
        let status = doorbell.enroll_status();
        if status.starts_with("Place finger") || status.starts_with("Reading") {
            sensor.place_finger(sample_template(42));
        } else {
            sensor.lift_finger();
        }
        doorbell.tick().await;
        sleep(TICK).await;
    }
    println!("Enrollment: {}", doorbell.enroll_status());
    println!("Registry: {:?}", registry.snapshot());

    // Alice rings
    sensor.place_finger(sample_template(42));
    let outcome = ring(&mut doorbell, &touch).await.context("no outcome for Alice")?;
    println!("Alice at the door: {:?}", outcome);
    sensor.lift_finger();

    // A stranger rings
    sensor.place_finger(sample_template(7));
    let outcome = ring(&mut doorbell, &touch).await.context("no outcome for stranger")?;
    println!("Stranger at the door: {:?}", outcome);
    sensor.lift_finger();

    // Let the signals clear
    for _ in 0..30 {
        doorbell.tick().await;
        sleep(TICK).await;
    }

    println!("Enrolled templates: {}", doorbell.enrolled_count().await);
    Ok(())
}

/// Touch the ring and tick until the scan cycle ends
async fn ring(doorbell: &mut Doorbell, touch: &ManualTouch) -> Option<fpdoorbell::ScanOutcome> {
    touch.set(true);

    let mut result = None;
    for _ in 0..200 {
        if let Activity::Scan(outcome) = doorbell.tick().await {
            if outcome.is_terminal() {
                result = Some(outcome);
                break;
            }
        }
        sleep(TICK).await;
    }

    touch.set(false);
    result
}
