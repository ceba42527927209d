//! Enrollment engine
//!
//! Captures `samples` images of the same finger, one per character buffer,
//! merges them into a model and stores it at the requested slot. Like the
//! scan engine it performs at most one exchange per tick.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use fpdoorbell_core::{constants::buffers, ConfirmationCode};

use crate::collab::NameRegistry;
use crate::config::DoorbellConfig;
use crate::error::{Error, Result};
use crate::sensor::Sensor;

/// Enrollment state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollState {
    Idle,
    WaitingForFinger,
    Converting,
    WaitingForRemoval,
    CreatingModel,
    Storing,
    Done,
    Failed,
}

impl EnrollState {
    /// Check if the engine shows a final result
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Multi-sample enrollment state machine
#[derive(Debug)]
pub struct EnrollmentEngine {
    state: EnrollState,
    target_id: u16,
    name: String,
    sample: u8,
    deadline: Option<Instant>,
    hold_until: Option<Instant>,
    removal_polls_left: u32,
    cancel_requested: bool,
    enrolled: Option<(u16, String)>,
    status: String,

    samples: u8,
    timeout: Duration,
    hold: Duration,
    removal_polls: u32,
}

impl EnrollmentEngine {
    /// Engine with 5 samples, a 60 second deadline and a 2 second hold
    pub fn new() -> Self {
        Self {
            state: EnrollState::Idle,
            target_id: 0,
            name: String::new(),
            sample: 0,
            deadline: None,
            hold_until: None,
            removal_polls_left: 0,
            cancel_requested: false,
            enrolled: None,
            status: "Idle".into(),
            samples: 5,
            timeout: Duration::from_secs(60),
            hold: Duration::from_secs(2),
            removal_polls: 50,
        }
    }

    /// Engine using the enrollment settings of `config`
    pub fn from_config(config: &DoorbellConfig) -> Self {
        Self {
            samples: config.enroll_samples.max(1),
            timeout: config.enroll_timeout,
            hold: config.enroll_hold,
            removal_polls: config.removal_polls,
            ..Self::new()
        }
    }

    pub fn state(&self) -> EnrollState {
        self.state
    }

    /// Current sample, 1-based
    pub fn sample(&self) -> u8 {
        self.sample
    }

    /// Slot being enrolled
    pub fn target_id(&self) -> Option<u16> {
        (self.state != EnrollState::Idle).then_some(self.target_id)
    }

    /// Last status text
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Check if an enrollment is running or showing its result
    pub fn is_active(&self) -> bool {
        self.state != EnrollState::Idle
    }

    /// Id and name of a freshly stored template, once
    pub fn take_enrolled(&mut self) -> Option<(u16, String)> {
        self.enrolled.take()
    }

    /// Begin enrolling `name` at slot `id`
    ///
    /// # Errors
    ///
    /// - [`Error::EnrollmentInProgress`] if an enrollment is active
    /// - [`Error::InvalidTemplateId`] if `id` is outside `1..=capacity`
    pub fn start(&mut self, id: u16, name: impl Into<String>, capacity: u16) -> Result<()> {
        if self.is_active() {
            return Err(Error::EnrollmentInProgress);
        }
        if id == 0 || id > capacity {
            return Err(Error::InvalidTemplateId { id, capacity });
        }

        self.target_id = id;
        self.name = name.into();
        self.sample = 1;
        self.deadline = Some(Instant::now() + self.timeout);
        self.hold_until = None;
        self.cancel_requested = false;
        self.enrolled = None;
        self.state = EnrollState::WaitingForFinger;
        self.status = self.place_prompt();

        info!("Starting enrollment for ID {} ({})", id, self.name);
        Ok(())
    }

    /// Ask the engine to stop; observed on the next tick
    pub fn cancel(&mut self) {
        if self.is_active() {
            self.cancel_requested = true;
        }
    }

    /// Drop the enrollment immediately, e.g. when the link went down
    ///
    /// Returns `false` if no enrollment was active.
    pub fn abort(&mut self, reason: &str) -> bool {
        if !self.is_active() {
            return false;
        }

        warn!("Enrollment of ID {} aborted: {}", self.target_id, reason);
        self.cancel_requested = false;
        self.to_idle(reason);
        true
    }

    /// Advance by at most one exchange and return the status text
    pub async fn tick(&mut self, sensor: &mut Sensor, registry: &mut dyn NameRegistry) -> String {
        if self.state == EnrollState::Idle {
            return self.status.clone();
        }

        if self.cancel_requested {
            info!("Enrollment of ID {} cancelled", self.target_id);
            self.cancel_requested = false;
            self.to_idle("Enrollment cancelled");
            return self.status.clone();
        }

        if self.state.is_finished() {
            self.wait_for_removal(sensor).await;
            return self.status.clone();
        }

        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            self.fail(format!(
                "Enrollment timed out after {} s",
                self.timeout.as_secs()
            ));
            return self.status.clone();
        }

        match self.state {
            EnrollState::WaitingForFinger => self.capture(sensor).await,
            EnrollState::Converting => self.convert(sensor).await,
            EnrollState::WaitingForRemoval => self.await_lift(sensor).await,
            EnrollState::CreatingModel => self.create_model(sensor).await,
            EnrollState::Storing => self.store(sensor, registry).await,
            EnrollState::Idle | EnrollState::Done | EnrollState::Failed => {}
        }

        self.status.clone()
    }

    async fn capture(&mut self, sensor: &mut Sensor) {
        match sensor.capture_image().await {
            Ok(ConfirmationCode::Ok) => {
                debug!("Sample {} imaged", self.sample);
                self.state = EnrollState::Converting;
                self.status = format!("Reading sample {}/{}", self.sample, self.samples);
            }
            Ok(ConfirmationCode::NoFinger) => {}
            Ok(code) => {
                warn!("Imaging failed during enrollment: {}", code);
                self.status = format!("Imaging failed, {}", self.place_prompt().to_lowercase());
            }
            Err(e) => self.retry_or_fail(e),
        }
    }

    async fn convert(&mut self, sensor: &mut Sensor) {
        match sensor.image_to_template(self.sample).await {
            Ok(ConfirmationCode::Ok) if self.sample < self.samples => {
                info!("Sample {}/{} complete, remove finger", self.sample, self.samples);
                self.state = EnrollState::WaitingForRemoval;
                self.status = format!("Remove finger ({}/{})", self.sample, self.samples);
            }
            Ok(ConfirmationCode::Ok) => {
                self.state = EnrollState::CreatingModel;
                self.status = "Creating model".into();
            }
            Ok(code) => {
                warn!("Sample {} unreadable: {}", self.sample, code);
                self.state = EnrollState::WaitingForFinger;
                self.status = format!("Could not read finger, {}", self.place_prompt().to_lowercase());
            }
            Err(e) => self.retry_or_fail(e),
        }
    }

    async fn await_lift(&mut self, sensor: &mut Sensor) {
        match sensor.capture_image().await {
            Ok(ConfirmationCode::NoFinger) => {
                self.sample += 1;
                self.state = EnrollState::WaitingForFinger;
                self.status = self.place_prompt();
            }
            Ok(_) => {}
            Err(e) => self.retry_or_fail(e),
        }
    }

    async fn create_model(&mut self, sensor: &mut Sensor) {
        match sensor.create_model().await {
            Ok(ConfirmationCode::Ok) => {
                self.state = EnrollState::Storing;
                self.status = format!("Storing as ID {}", self.target_id);
            }
            Ok(ConfirmationCode::EnrollMismatch) => {
                self.fail("Fingerprints did not match".into());
            }
            Ok(code) => self.fail(format!("Could not create model: {}", code)),
            Err(e) => self.retry_or_fail(e),
        }
    }

    async fn store(&mut self, sensor: &mut Sensor, registry: &mut dyn NameRegistry) {
        match sensor.store_model(buffers::PRIMARY, self.target_id).await {
            Ok(()) => {
                if let Err(e) = registry.set(self.target_id, &self.name) {
                    warn!("Name of ID {} not saved: {}", self.target_id, e);
                }

                info!("Enrollment successful for ID {} ({})", self.target_id, self.name);
                self.enrolled = Some((self.target_id, self.name.clone()));
                self.finish(
                    EnrollState::Done,
                    format!("Enrolled ID {} ({})", self.target_id, self.name),
                );
            }
            Err(e) if e.is_transient() => self.retry_or_fail(e),
            Err(e) => self.fail(format!("Could not store model: {}", e)),
        }
    }

    /// Display hold, then poll until the finger is gone
    async fn wait_for_removal(&mut self, sensor: &mut Sensor) {
        if self.hold_until.is_some_and(|until| Instant::now() < until) {
            return;
        }

        let lifted = match sensor.capture_image().await {
            Ok(code) => code == ConfirmationCode::NoFinger,
            Err(e) => {
                debug!("Removal poll failed: {}", e);
                false
            }
        };

        self.removal_polls_left = self.removal_polls_left.saturating_sub(1);

        if lifted || self.removal_polls_left == 0 {
            let status = self.status.clone();
            self.to_idle(&status);
        }
    }

    fn retry_or_fail(&mut self, error: Error) {
        if error.is_transient() {
            warn!("Enrollment step will be retried: {}", error);
        } else {
            self.fail(format!("Enrollment failed: {}", error));
        }
    }

    fn fail(&mut self, reason: String) {
        warn!("Enrollment of ID {} failed: {}", self.target_id, reason);
        self.finish(EnrollState::Failed, reason);
    }

    fn finish(&mut self, state: EnrollState, status: String) {
        self.state = state;
        self.status = status;
        self.hold_until = Some(Instant::now() + self.hold);
        self.removal_polls_left = self.removal_polls.max(1);
    }

    fn to_idle(&mut self, status: &str) {
        debug!("Enrollment engine idle");
        self.state = EnrollState::Idle;
        self.sample = 0;
        self.deadline = None;
        self.hold_until = None;
        self.status = status.to_owned();
    }

    fn place_prompt(&self) -> String {
        format!("Place finger ({}/{})", self.sample, self.samples)
    }
}

impl Default for EnrollmentEngine {
    fn default() -> Self {
        Self::new()
    }
}
