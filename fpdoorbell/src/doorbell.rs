//! Doorbell driver
//!
//! Ties the engines to the host: supervises the connection, ticks exactly
//! one of the scan and enrollment engines, publishes outcomes to the
//! [`EventSink`], and offers the operator commands (enroll, delete, rename,
//! template export and import).

use std::collections::BTreeMap;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use fpdoorbell_core::Session;
use fpdoorbell_transport::Transport;
use fpdoorbell_types::{normalize_name, ScanOutcome};

use crate::collab::{EventSink, NameRegistry, TouchInput};
use crate::config::DoorbellConfig;
use crate::enroll::EnrollmentEngine;
use crate::error::{Error, Result};
use crate::link::DeviceLink;
use crate::scan::ScanEngine;
use crate::sensor::Sensor;
use crate::supervisor::{Connection, ConnectionSupervisor};
use crate::transfer::{check_id, TemplateTransfer};

/// Which engine owns the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Scan,
    Enroll,
    Transfer,
}

/// What one driver tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activity {
    /// No sensor (attempt failed or throttled)
    Disconnected,

    /// The handshake succeeded on this tick
    Connected,

    /// The scan engine ran
    Scan(ScanOutcome),

    /// The enrollment engine ran; carries its status text
    Enroll(String),
}

/// Fingerprint doorbell
///
/// # Examples
///
/// ```no_run
/// use fpdoorbell::{Doorbell, DoorbellConfig, LogSink, ManualTouch, MemoryRegistry};
/// use fpdoorbell_transport::TcpTransport;
///
/// #[tokio::main]
/// async fn main() -> fpdoorbell::Result<()> {
///     let mut doorbell = Doorbell::new(
///         DoorbellConfig::default(),
///         TcpTransport::new("192.168.1.40", 2000),
///         ManualTouch::new(),
///         LogSink,
///         MemoryRegistry::new(),
///     )?;
///
///     loop {
///         doorbell.tick().await;
///         tokio::time::sleep(std::time::Duration::from_millis(50)).await;
///     }
/// }
/// ```
pub struct Doorbell {
    config: DoorbellConfig,
    sensor: Sensor,
    supervisor: ConnectionSupervisor,
    scan: ScanEngine,
    enroll: EnrollmentEngine,
    transfer: TemplateTransfer,
    touch: Box<dyn TouchInput>,
    events: Box<dyn EventSink>,
    registry: Box<dyn NameRegistry>,
    names: BTreeMap<u16, String>,
    mode: Mode,
    ignore_touch_ring: bool,
    last_connect_attempt: Option<Instant>,
    match_clear_at: Option<Instant>,
    ring_clear_at: Option<Instant>,
    finger_reported: bool,
    enroll_status: String,
}

impl Doorbell {
    /// Create a doorbell; nothing is sent until the first tick
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` does not validate.
    pub fn new(
        config: DoorbellConfig,
        transport: impl Transport + 'static,
        touch: impl TouchInput + 'static,
        events: impl EventSink + 'static,
        registry: impl NameRegistry + 'static,
    ) -> Result<Self> {
        config.validate()?;

        let link = DeviceLink::new(transport)
            .with_address(config.address)
            .with_timeout(config.reply_timeout);
        let sensor = Sensor::from_link(link).with_password(config.password);
        let supervisor = ConnectionSupervisor::new(Session::new())
            .with_retries(config.max_handshake_attempts, config.handshake_cooldown);

        Ok(Self {
            sensor,
            supervisor,
            scan: ScanEngine::from_config(&config),
            enroll: EnrollmentEngine::from_config(&config),
            transfer: TemplateTransfer::from_config(&config),
            touch: Box::new(touch),
            events: Box::new(events),
            registry: Box::new(registry),
            names: BTreeMap::new(),
            mode: Mode::Scan,
            ignore_touch_ring: config.ignore_touch_ring,
            last_connect_attempt: None,
            match_clear_at: None,
            ring_clear_at: None,
            finger_reported: false,
            enroll_status: String::new(),
            config,
        })
    }

    /// Shared session handle, readable from other tasks
    pub fn session(&self) -> Session {
        self.supervisor.session().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.supervisor.session().is_connected()
    }

    pub fn is_enrolling(&self) -> bool {
        self.mode == Mode::Enroll
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Last enrollment status text
    pub fn enroll_status(&self) -> &str {
        self.enroll.status()
    }

    /// Cached display name of `id`
    pub fn name(&self, id: u16) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    /// Every cached display name
    pub fn names(&self) -> &BTreeMap<u16, String> {
        &self.names
    }

    /// Run one cycle of the main loop
    pub async fn tick(&mut self) -> Activity {
        self.expire_signals();

        if !self.is_connected() {
            return self.try_connect().await;
        }

        let activity = match self.mode {
            Mode::Enroll => self.tick_enroll().await,
            Mode::Scan | Mode::Transfer => self.tick_scan().await,
        };

        self.check_link();
        activity
    }

    /// Start enrolling `name` at `id`; scanning pauses until it ends
    pub async fn start_enrollment(&mut self, id: u16, name: &str) -> Result<()> {
        let capacity = self.capacity()?;
        let name = normalize_name(name)?;

        self.enroll.start(id, name, capacity)?;
        self.scan.reset();
        self.mode = Mode::Enroll;

        let status = self.enroll.status().to_owned();
        self.publish_enroll_status(status);
        self.events
            .on_last_action(&format!("Enrollment started for ID {}", id));
        Ok(())
    }

    /// Stop the running enrollment on the next tick
    pub fn cancel_enrollment(&mut self) {
        self.enroll.cancel();
    }

    /// Delete the template and name of `id`
    pub async fn delete(&mut self, id: u16) -> Result<()> {
        let capacity = self.capacity()?;
        check_id(id, capacity)?;
        self.ensure_idle()?;

        let result = self.sensor.delete_model(id).await;
        self.check_link();
        result?;

        self.names.remove(&id);
        self.registry.delete(id)?;
        self.refresh_count().await;

        info!("Deleted fingerprint ID {}", id);
        self.events
            .on_last_action(&format!("Deleted fingerprint ID {}", id));
        Ok(())
    }

    /// Delete every template and name
    pub async fn delete_all(&mut self) -> Result<()> {
        self.capacity()?;
        self.ensure_idle()?;

        let result = self.sensor.empty_library().await;
        self.check_link();
        result?;

        self.names.clear();
        self.registry.clear()?;
        self.supervisor.session().set_template_count(0);

        info!("Deleted all fingerprints");
        self.events.on_last_action("Deleted all fingerprints");
        Ok(())
    }

    /// Change the display name of `id`
    pub fn rename(&mut self, id: u16, name: &str) -> Result<()> {
        match self.supervisor.session().capacity() {
            Some(capacity) => check_id(id, capacity)?,
            None if id == 0 => return Err(Error::InvalidTemplateId { id, capacity: 0 }),
            None => {}
        }
        let name = normalize_name(name)?;

        self.registry.set(id, &name)?;
        info!("Renamed fingerprint ID {} to {}", id, name);
        self.events
            .on_last_action(&format!("Renamed ID {} to {}", id, name));
        self.names.insert(id, name);
        Ok(())
    }

    /// Read the raw template stored at `id`
    pub async fn export_template(&mut self, id: u16) -> Result<Bytes> {
        let session = self.transfer_session()?;

        let prior = self.enter_transfer();
        let result = self.transfer.download(&mut self.sensor, &session, id).await;
        self.leave_transfer(prior);

        let template = result?;
        self.events
            .on_last_action(&format!("Exported template ID {}", id));
        Ok(template)
    }

    /// Write a raw template to `id` and name it
    ///
    /// Returns the slot that took the template, which differs from `id`
    /// when storing there failed and a free slot was used instead.
    pub async fn import_template(&mut self, id: u16, name: &str, template: &[u8]) -> Result<u16> {
        let session = self.transfer_session()?;
        let name = normalize_name(name)?;

        let prior = self.enter_transfer();
        let result = self
            .transfer
            .upload(&mut self.sensor, &session, id, template)
            .await;
        self.leave_transfer(prior);

        let stored = result?;
        self.names.insert(stored, name.clone());
        self.registry.set(stored, &name)?;
        self.refresh_count().await;

        self.events
            .on_last_action(&format!("Imported template as ID {} ({})", stored, name));
        Ok(stored)
    }

    /// Scan continuously (`true`) or only when the ring is touched
    pub fn set_ignore_touch_ring(&mut self, ignore: bool) {
        if self.ignore_touch_ring != ignore {
            debug!("Ignore touch ring: {}", ignore);
            self.ignore_touch_ring = ignore;
            self.scan.reset();
        }
    }

    /// Stored template count; 0 when not connected
    pub async fn enrolled_count(&mut self) -> u16 {
        if !self.is_connected() {
            return 0;
        }
        self.refresh_count().await
    }

    async fn try_connect(&mut self) -> Activity {
        let now = Instant::now();
        let throttled = self
            .last_connect_attempt
            .is_some_and(|at| now.duration_since(at) < self.config.connect_interval);

        if throttled {
            return Activity::Disconnected;
        }
        self.last_connect_attempt = Some(now);

        match self.supervisor.tick(&mut self.sensor).await {
            Connection::Connected => {
                self.load_names();
                self.events.on_connected(true);
                Activity::Connected
            }
            Connection::AlreadyConnected => Activity::Connected,
            Connection::NotYet => Activity::Disconnected,
        }
    }

    async fn tick_scan(&mut self) -> Activity {
        let touched = self.config.touch_polarity.is_touched(self.touch.read_level());
        let capacity = self.supervisor.session().capacity().unwrap_or_default();

        let outcome = self
            .scan
            .tick(
                &mut self.sensor,
                touched,
                self.ignore_touch_ring,
                capacity,
                &self.names,
            )
            .await;

        self.publish_outcome(&outcome);
        Activity::Scan(outcome)
    }

    async fn tick_enroll(&mut self) -> Activity {
        let status = self
            .enroll
            .tick(&mut self.sensor, self.registry.as_mut())
            .await;
        self.publish_enroll_status(status.clone());

        if let Some((id, name)) = self.enroll.take_enrolled() {
            self.events
                .on_last_action(&format!("Enrolled ID {} ({})", id, name));
            self.names.insert(id, name);
        }

        if !self.enroll.is_active() {
            debug!("Enrollment finished, back to scanning");
            self.mode = Mode::Scan;
        }

        Activity::Enroll(status)
    }

    fn publish_outcome(&mut self, outcome: &ScanOutcome) {
        let now = Instant::now();

        match outcome {
            ScanOutcome::Match(matched) => {
                self.events.on_match(matched);
                self.match_clear_at = Some(now + self.config.match_hold);
            }
            ScanOutcome::NoMatch => {
                info!("No match found - doorbell ring!");
                self.events.on_ring(true);
                self.ring_clear_at = Some(now + self.config.ring_hold);
            }
            ScanOutcome::NoFinger | ScanOutcome::Error => {}
        }

        let finger = self.scan.finger_present();
        if finger != self.finger_reported {
            self.finger_reported = finger;
            self.events.on_finger(finger);
        }
    }

    fn publish_enroll_status(&mut self, status: String) {
        if status != self.enroll_status {
            self.events.on_enroll_status(&status);
            self.enroll_status = status;
        }
    }

    fn expire_signals(&mut self) {
        let now = Instant::now();

        if self.match_clear_at.is_some_and(|at| now >= at) {
            self.match_clear_at = None;
            self.events.on_match_cleared();
        }
        if self.ring_clear_at.is_some_and(|at| now >= at) {
            self.ring_clear_at = None;
            self.events.on_ring(false);
        }
    }

    /// Drop the session once too many exchanges went unanswered
    fn check_link(&mut self) {
        let failures = self.sensor.consecutive_failures();
        if failures < self.config.link_failure_limit || !self.is_connected() {
            return;
        }

        warn!("{} exchanges without a reply, sensor considered lost", failures);
        self.supervisor.disconnect();
        self.scan.reset();
        if self.enroll.abort("Sensor disconnected") {
            let status = self.enroll.status().to_owned();
            self.publish_enroll_status(status);
        }

        self.mode = Mode::Scan;
        self.last_connect_attempt = Some(Instant::now());

        if self.finger_reported {
            self.finger_reported = false;
            self.events.on_finger(false);
        }
        self.events.on_connected(false);
    }

    fn load_names(&mut self) {
        match self.registry.load_all() {
            Ok(names) => {
                info!("Loaded {} fingerprint names", names.len());
                self.names = names;
            }
            Err(e) => {
                warn!("Could not load fingerprint names: {}", e);
                self.names.clear();
            }
        }
    }

    async fn refresh_count(&mut self) -> u16 {
        let session = self.supervisor.session().clone();

        match self.sensor.template_count().await {
            Ok(count) => {
                session.set_template_count(count);
                count
            }
            Err(e) => {
                warn!("Could not read template count: {}", e);
                self.check_link();
                session.info().map(|info| info.template_count).unwrap_or_default()
            }
        }
    }

    fn capacity(&self) -> Result<u16> {
        self.supervisor.session().capacity().ok_or(Error::NotConnected)
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.enroll.is_active() {
            return Err(Error::EnrollmentInProgress);
        }
        Ok(())
    }

    fn transfer_session(&self) -> Result<Session> {
        self.capacity()?;
        self.ensure_idle()?;
        Ok(self.supervisor.session().clone())
    }

    fn enter_transfer(&mut self) -> Mode {
        let prior = self.mode;
        self.mode = Mode::Transfer;
        self.scan.reset();
        prior
    }

    fn leave_transfer(&mut self, prior: Mode) {
        self.mode = prior;
        self.check_link();
    }
}
