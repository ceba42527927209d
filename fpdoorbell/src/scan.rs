//! Scan engine
//!
//! A non-blocking scan-and-match cycle. Each tick performs at most one
//! exchange with the module and returns a [`ScanOutcome`]; a cycle runs
//! up to `passes` image/convert/search passes, each allowed up to
//! `imaging_attempts` captures, within an overall deadline.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use fpdoorbell_core::{constants::buffers, ConfirmationCode};
use fpdoorbell_types::{Match, ScanOutcome};

use crate::config::DoorbellConfig;
use crate::error::Error;
use crate::sensor::{SearchResult, Sensor};

/// Scan cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    WaitingForFinger,
    Converting,
    Searching,
}

/// Touch-gated scan state machine
#[derive(Debug)]
pub struct ScanEngine {
    state: ScanState,
    pass_count: u32,
    imaging_attempt: u32,
    ring_touched_at_start: bool,
    touched_last_tick: bool,
    link_failed: bool,
    finger_seen: bool,
    deadline: Option<Instant>,

    passes: u32,
    imaging_attempts: u32,
    timeout: Duration,
}

impl ScanEngine {
    /// Engine with 5 passes, 15 imaging attempts and a 5 second deadline
    pub fn new() -> Self {
        Self {
            state: ScanState::Idle,
            pass_count: 0,
            imaging_attempt: 0,
            ring_touched_at_start: false,
            touched_last_tick: false,
            link_failed: false,
            finger_seen: false,
            deadline: None,
            passes: 5,
            imaging_attempts: 15,
            timeout: Duration::from_secs(5),
        }
    }

    /// Engine using the scan limits of `config`
    pub fn from_config(config: &DoorbellConfig) -> Self {
        Self::new()
            .with_limits(config.scan_passes, config.imaging_attempts)
            .with_timeout(config.scan_timeout)
    }

    /// Set passes per cycle and imaging attempts per pass
    pub fn with_limits(mut self, passes: u32, imaging_attempts: u32) -> Self {
        self.passes = passes.max(1);
        self.imaging_attempts = imaging_attempts.max(1);
        self
    }

    /// Set cycle deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Completed search passes in the current cycle
    pub fn pass_count(&self) -> u32 {
        self.pass_count
    }

    /// Captures in the current pass
    pub fn imaging_attempt(&self) -> u32 {
        self.imaging_attempt
    }

    /// Check if the last capture saw a finger
    pub fn finger_present(&self) -> bool {
        self.finger_seen
    }

    /// Abandon the current cycle without an outcome
    pub fn reset(&mut self) {
        if self.state != ScanState::Idle {
            debug!("Scan cycle abandoned in {:?}", self.state);
        }
        self.state = ScanState::Idle;
        self.pass_count = 0;
        self.imaging_attempt = 0;
        self.ring_touched_at_start = false;
        self.link_failed = false;
        self.finger_seen = false;
        self.deadline = None;
    }

    /// Advance the cycle by at most one exchange
    ///
    /// `touched` is the current touch ring reading. A cycle starts when the
    /// ring is touched, or on every tick with `ignore_ring` set. A running
    /// cycle survives one untouched tick; when neither this tick nor the
    /// previous one saw a touch it is dropped without any exchange. Names
    /// come from `names`, falling back to `"ID <n>"`.
    pub async fn tick(
        &mut self,
        sensor: &mut Sensor,
        touched: bool,
        ignore_ring: bool,
        capacity: u16,
        names: &BTreeMap<u16, String>,
    ) -> ScanOutcome {
        if !ignore_ring {
            let touched_before = std::mem::replace(&mut self.touched_last_tick, touched);

            if !touched && !touched_before {
                self.reset();
                return ScanOutcome::NoFinger;
            }
        }

        if self.state == ScanState::Idle {
            if !touched && !ignore_ring {
                return ScanOutcome::NoFinger;
            }
            self.begin(touched);
        }

        match self.state {
            ScanState::Idle | ScanState::WaitingForFinger => self.capture(sensor).await,
            ScanState::Converting => self.convert(sensor).await,
            ScanState::Searching => self.search(sensor, capacity, names).await,
        }
    }

    fn begin(&mut self, touched: bool) {
        self.reset();
        self.state = ScanState::WaitingForFinger;
        self.ring_touched_at_start = touched;
        self.deadline = Some(Instant::now() + self.timeout);

        debug!("Scan cycle started (ring touched: {})", touched);
    }

    async fn capture(&mut self, sensor: &mut Sensor) -> ScanOutcome {
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            warn!("Scan timeout");
            return self.timed_out();
        }

        match sensor.capture_image().await {
            Ok(ConfirmationCode::Ok) => {
                self.link_failed = false;
                self.finger_seen = true;
                self.state = ScanState::Converting;
                ScanOutcome::NoFinger
            }
            Ok(ConfirmationCode::NoFinger) => {
                self.link_failed = false;
                self.finger_seen = false;
                self.imaging_attempt += 1;

                if self.ring_touched_at_start && self.imaging_attempt >= self.imaging_attempts {
                    debug!("No finger after {} attempts", self.imaging_attempt);
                    self.finish(ScanOutcome::NoMatch)
                } else {
                    ScanOutcome::NoFinger
                }
            }
            Ok(code) => {
                warn!("Imaging failed: {}", code);
                self.finish(ScanOutcome::Error)
            }
            Err(e) if e.is_transient() => {
                warn!("Imaging exchange failed: {}", e);
                self.link_failed = true;
                self.imaging_attempt += 1;

                if self.imaging_attempt >= self.imaging_attempts {
                    self.finish(ScanOutcome::Error)
                } else {
                    ScanOutcome::NoFinger
                }
            }
            Err(e) => self.fail(e),
        }
    }

    async fn convert(&mut self, sensor: &mut Sensor) -> ScanOutcome {
        match sensor.image_to_template(buffers::PRIMARY).await {
            Ok(ConfirmationCode::Ok) => {
                self.state = ScanState::Searching;
                ScanOutcome::NoFinger
            }
            Ok(ConfirmationCode::ImageMess) => {
                warn!("Image too messy");
                self.finish(ScanOutcome::Error)
            }
            Ok(code) => {
                warn!("Feature extraction failed: {}", code);
                self.finish(ScanOutcome::Error)
            }
            Err(e) if e.is_transient() => self.abandon_pass(e),
            Err(e) => self.fail(e),
        }
    }

    async fn search(
        &mut self,
        sensor: &mut Sensor,
        capacity: u16,
        names: &BTreeMap<u16, String>,
    ) -> ScanOutcome {
        match sensor.search(buffers::PRIMARY, capacity).await {
            Ok(SearchResult::Found { id, confidence }) => {
                let name = names
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| format!("ID {}", id));

                info!("Match found: id {} ({}), confidence {}", id, name, confidence);
                self.finish(ScanOutcome::Match(Match::new(id, confidence, name)))
            }
            Ok(SearchResult::NotFound) => {
                self.pass_count += 1;
                debug!("No match found (pass {} of {})", self.pass_count, self.passes);

                if self.pass_count < self.passes {
                    self.next_pass();
                    ScanOutcome::NoFinger
                } else {
                    info!("No match found, ringing");
                    self.finish(ScanOutcome::NoMatch)
                }
            }
            Err(e) if e.is_transient() => self.abandon_pass(e),
            Err(e) => self.fail(e),
        }
    }

    /// A pass lost to a communication error counts but never rings
    fn abandon_pass(&mut self, error: Error) -> ScanOutcome {
        self.pass_count += 1;
        warn!("Scan pass {} abandoned: {}", self.pass_count, error);
        self.link_failed = true;

        if self.pass_count < self.passes {
            self.next_pass();
            ScanOutcome::NoFinger
        } else {
            self.finish(ScanOutcome::Error)
        }
    }

    fn next_pass(&mut self) {
        self.imaging_attempt = 0;
        self.state = ScanState::WaitingForFinger;
    }

    /// Cycle deadline passed while waiting for a finger
    ///
    /// A module that stopped answering is reported as an error, never as a
    /// ring.
    fn timed_out(&mut self) -> ScanOutcome {
        if self.link_failed {
            self.finish(ScanOutcome::Error)
        } else {
            self.finish(ScanOutcome::NoMatch)
        }
    }

    fn fail(&mut self, error: Error) -> ScanOutcome {
        warn!("Scan cycle aborted: {}", error);
        self.finish(ScanOutcome::Error)
    }

    fn finish(&mut self, outcome: ScanOutcome) -> ScanOutcome {
        debug!(
            "Scan cycle ended after {} passes: {:?}",
            self.pass_count, outcome
        );
        self.reset();
        outcome
    }
}

impl Default for ScanEngine {
    fn default() -> Self {
        Self::new()
    }
}
