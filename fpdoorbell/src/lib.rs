//! # fpdoorbell
//!
//! Touch-gated fingerprint doorbell core for R502/R503 style sensors.
//!
//! ## Features
//!
//! - Packet framing and a request/response device link over any byte transport
//! - Connection supervision with bounded retries and cooldown
//! - Non-blocking scan and enrollment engines (one exchange per tick)
//! - Template export and import for cloning fingers between sensors
//! - A simulated sensor for tests and demos
//!
//! ## Quick Start
//!
//! ```no_run
//! use fpdoorbell::{Activity, Doorbell, DoorbellConfig, LogSink, ManualTouch, MemoryRegistry};
//! use fpdoorbell_transport::TcpTransport;
//!
//! #[tokio::main]
//! async fn main() -> fpdoorbell::Result<()> {
//!     // Sensor behind a serial-to-TCP bridge
//!     let transport = TcpTransport::new("192.168.1.40", 2000);
//!     let mut doorbell = Doorbell::new(
//!         DoorbellConfig::default(),
//!         transport,
//!         ManualTouch::new(),
//!         LogSink,
//!         MemoryRegistry::new(),
//!     )?;
//!
//!     loop {
//!         if let Activity::Scan(outcome) = doorbell.tick().await {
//!             if outcome.is_ring() {
//!                 println!("Ding dong");
//!             }
//!         }
//!     }
//! }
//! ```

pub mod collab;
pub mod config;
pub mod doorbell;
pub mod enroll;
pub mod error;
pub mod link;
pub mod scan;
pub mod sensor;
pub mod sim;
pub mod supervisor;
pub mod transfer;

// Re-exports
pub use collab::{
    EventSink, LogSink, ManualTouch, MemoryRegistry, NameRegistry, TouchInput, TouchPolarity,
};
pub use config::DoorbellConfig;
pub use doorbell::{Activity, Doorbell, Mode};
pub use enroll::{EnrollState, EnrollmentEngine};
pub use error::{Error, Result};
pub use link::{Ack, DeviceLink};
pub use scan::{ScanEngine, ScanState};
pub use sensor::{SearchResult, Sensor};
pub use supervisor::{Connection, ConnectionSupervisor};
pub use transfer::TemplateTransfer;

// Re-export types
pub use fpdoorbell_core::{Command, ConfirmationCode, Instruction, Packet, Session, SessionInfo};
pub use fpdoorbell_types::{Match, ScanOutcome, SensorInfo};
