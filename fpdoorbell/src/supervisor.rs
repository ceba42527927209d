//! Connection supervisor
//!
//! Brings the module from disconnected to connected, one handshake per
//! tick. It never gives up: after a run of failures it pauses for a
//! cooldown and starts counting again, since modules may power up late.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use fpdoorbell_core::{constants::data_packet_len, Session, SessionInfo};

use crate::error::Result;
use crate::sensor::Sensor;

/// What a supervisor tick found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    /// The handshake just succeeded; reported once per connection
    Connected,

    /// Connected since an earlier tick
    AlreadyConnected,

    /// Not connected (failed attempt or cooling down)
    NotYet,
}

/// Handshake driver for one module
#[derive(Debug)]
pub struct ConnectionSupervisor {
    session: Session,
    max_attempts: u32,
    cooldown: Duration,
    cooldown_until: Option<Instant>,
}

impl ConnectionSupervisor {
    /// Create a supervisor with 10 attempts and a 30 second cooldown
    pub fn new(session: Session) -> Self {
        Self {
            session,
            max_attempts: 10,
            cooldown: Duration::from_secs(30),
            cooldown_until: None,
        }
    }

    /// Set attempts before the cooldown and the cooldown length
    pub fn with_retries(mut self, max_attempts: u32, cooldown: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.cooldown = cooldown;
        self
    }

    /// Shared session record
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Check if attempts are paused
    pub fn is_cooling_down(&self) -> bool {
        self.cooldown_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Perform at most one handshake
    pub async fn tick(&mut self, sensor: &mut Sensor) -> Connection {
        if self.session.is_connected() {
            return Connection::AlreadyConnected;
        }

        if let Some(until) = self.cooldown_until {
            if Instant::now() < until {
                return Connection::NotYet;
            }
            debug!("Handshake cooldown over");
            self.cooldown_until = None;
        }

        match self.handshake(sensor).await {
            Ok(info) => {
                info!(
                    "Sensor connected (capacity {}, {} templates)",
                    info.capacity, info.template_count
                );
                Connection::Connected
            }
            Err(e) => {
                let attempts = self.session.record_failure();
                warn!("Handshake attempt {} failed: {}", attempts, e);

                if attempts >= self.max_attempts {
                    warn!(
                        "Sensor still not responding after {} attempts, pausing {:?}",
                        attempts, self.cooldown
                    );
                    self.session.reset_retries();
                    self.cooldown_until = Some(Instant::now() + self.cooldown);
                }

                Connection::NotYet
            }
        }
    }

    /// Forget the connection; the next tick handshakes again
    pub fn disconnect(&mut self) {
        if self.session.is_connected() {
            info!("Sensor link judged dead, disconnecting");
        }
        self.session.close();
    }

    async fn handshake(&mut self, sensor: &mut Sensor) -> Result<SessionInfo> {
        let (params, count) = sensor.handshake().await?;

        let info = SessionInfo {
            capacity: params.capacity,
            template_count: count,
            packet_len: data_packet_len(params.packet_size_code),
        };
        self.session.initialize(info)?;

        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{sample_template, SimHandle, SimulatedSensor};
    use fpdoorbell_core::Instruction;
    use pretty_assertions::assert_eq;

    fn setup() -> (ConnectionSupervisor, Sensor, SimHandle) {
        let sim = SimulatedSensor::new().with_capacity(150).with_packet_size_code(3);
        let handle = sim.handle();
        (ConnectionSupervisor::new(Session::new()), Sensor::new(sim), handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_once() {
        let (mut supervisor, mut sensor, handle) = setup();
        handle.store(1, sample_template(1));

        assert_eq!(supervisor.tick(&mut sensor).await, Connection::Connected);
        assert_eq!(supervisor.tick(&mut sensor).await, Connection::AlreadyConnected);

        let info = supervisor.session().info().unwrap();
        assert_eq!(info.capacity, 150);
        assert_eq!(info.template_count, 1);
        assert_eq!(info.packet_len, 256);
        assert_eq!(handle.count(Instruction::VfyPwd), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_counts_retries() {
        let (mut supervisor, mut sensor, handle) = setup();
        handle.set_online(false);

        assert_eq!(supervisor.tick(&mut sensor).await, Connection::NotYet);
        assert_eq!(supervisor.tick(&mut sensor).await, Connection::NotYet);
        assert_eq!(supervisor.session().retry_count(), 2);

        handle.set_online(true);
        assert_eq!(supervisor.tick(&mut sensor).await, Connection::Connected);
        assert_eq!(supervisor.session().retry_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_after_max_attempts() {
        let (supervisor, mut sensor, handle) = setup();
        let mut supervisor = supervisor.with_retries(3, Duration::from_secs(30));
        handle.set_online(false);

        for _ in 0..3 {
            assert_eq!(supervisor.tick(&mut sensor).await, Connection::NotYet);
        }
        assert!(supervisor.is_cooling_down());
        assert_eq!(supervisor.session().retry_count(), 0);

        handle.set_online(true);
        assert_eq!(supervisor.tick(&mut sensor).await, Connection::NotYet);
        assert_eq!(handle.count(Instruction::VfyPwd), 3);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(supervisor.tick(&mut sensor).await, Connection::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_password_never_connects() {
        let sim = SimulatedSensor::new().with_password(42);
        let mut sensor = Sensor::new(sim);
        let mut supervisor = ConnectionSupervisor::new(Session::new());

        assert_eq!(supervisor.tick(&mut sensor).await, Connection::NotYet);
        assert!(!supervisor.session().is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_allows_new_handshake() {
        let (mut supervisor, mut sensor, _handle) = setup();

        assert_eq!(supervisor.tick(&mut sensor).await, Connection::Connected);
        supervisor.disconnect();
        assert!(!supervisor.session().is_connected());
        assert_eq!(supervisor.tick(&mut sensor).await, Connection::Connected);
    }
}
