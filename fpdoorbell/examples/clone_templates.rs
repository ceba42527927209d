//! Copy an enrolled finger from one sensor to another
//!
//! Both sensors are simulated here; swap in `TcpTransport` (or a
//! `StreamTransport` over a serial port) to clone between real modules.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use fpdoorbell::sim::{sample_template, SimulatedSensor};
use fpdoorbell::{Activity, Doorbell, DoorbellConfig, LogSink, ManualTouch, MemoryRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let front = SimulatedSensor::new();
    front.handle().store(5, sample_template(5));
    let back = SimulatedSensor::new().with_packet_size_code(1);
    let back_sensor = back.handle();

    let mut source = connect(front, MemoryRegistry::with_names([(5, "Bob")])).await?;
    let mut target = connect(back, MemoryRegistry::new()).await?;

    let template = source.export_template(5).await?;
    println!("Exported {} bytes from ID 5", template.len());

    let name = source.name(5).unwrap_or("Bob").to_owned();
    let stored = target.import_template(5, &name, &template).await?;
    println!("Stored as ID {} on the back door", stored);

    let copied = back_sensor
        .template(stored)
        .context("template missing on target")?;
    anyhow::ensure!(copied == template, "template changed in transit");
    println!("Back door knows: {:?}", target.names());

    Ok(())
}

async fn connect(sim: SimulatedSensor, registry: MemoryRegistry) -> anyhow::Result<Doorbell> {
    let mut doorbell = Doorbell::new(
        DoorbellConfig::default(),
        sim,
        ManualTouch::new(),
        LogSink,
        registry,
    )?;

    match doorbell.tick().await {
        Activity::Connected => Ok(doorbell),
        other => anyhow::bail!("sensor did not connect: {:?}", other),
    }
}
