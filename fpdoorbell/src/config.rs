//! Doorbell configuration

use std::time::Duration;

use fpdoorbell_core::constants::{
    CHAR_BUFFER_COUNT, DEFAULT_ADDRESS, DEFAULT_PASSWORD, DEFAULT_REPLY_TIMEOUT_MS,
};

use crate::collab::TouchPolarity;
use crate::error::{Error, Result};

/// Tunables of the doorbell
///
/// Defaults match an R503 behind a touch ring polled every few tens of
/// milliseconds.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fpdoorbell::DoorbellConfig;
///
/// let config = DoorbellConfig::default()
///     .with_password(0x1234)
///     .with_scan_timeout(Duration::from_secs(3));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorbellConfig {
    /// Module address
    pub address: u32,

    /// Handshake password
    pub password: u32,

    /// Touch ring pin polarity
    pub touch_polarity: TouchPolarity,

    /// Scan continuously instead of waiting for the touch ring
    pub ignore_touch_ring: bool,

    /// Minimum spacing of connection attempts
    pub connect_interval: Duration,

    /// Failed handshakes before the cooldown
    pub max_handshake_attempts: u32,

    /// Pause after `max_handshake_attempts` failures
    pub handshake_cooldown: Duration,

    /// Reply timeout of a single exchange
    pub reply_timeout: Duration,

    /// Unanswered exchanges in a row that mark the link dead
    pub link_failure_limit: u32,

    /// Deadline of one scan cycle
    pub scan_timeout: Duration,

    /// Search passes per scan cycle
    pub scan_passes: u32,

    /// Imaging attempts per pass
    pub imaging_attempts: u32,

    /// Samples merged into one enrolled model
    pub enroll_samples: u8,

    /// Deadline of one enrollment
    pub enroll_timeout: Duration,

    /// How long Done/Failed stay visible
    pub enroll_hold: Duration,

    /// Finger removal polls after Done/Failed
    pub removal_polls: u32,

    /// Deadline of one template transfer
    pub transfer_timeout: Duration,

    /// Smallest template accepted from or sent to the module
    pub min_template_size: usize,

    /// Largest template accepted for upload
    pub max_template_size: usize,

    /// How long a match stays published
    pub match_hold: Duration,

    /// How long the ring output stays on
    pub ring_hold: Duration,
}

impl Default for DoorbellConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS,
            password: DEFAULT_PASSWORD,
            touch_polarity: TouchPolarity::ActiveHigh,
            ignore_touch_ring: false,
            connect_interval: Duration::from_secs(5),
            max_handshake_attempts: 10,
            handshake_cooldown: Duration::from_secs(30),
            reply_timeout: Duration::from_millis(DEFAULT_REPLY_TIMEOUT_MS),
            link_failure_limit: 10,
            scan_timeout: Duration::from_secs(5),
            scan_passes: 5,
            imaging_attempts: 15,
            enroll_samples: 5,
            enroll_timeout: Duration::from_secs(60),
            enroll_hold: Duration::from_secs(2),
            removal_polls: 50,
            transfer_timeout: Duration::from_secs(10),
            min_template_size: 512,
            max_template_size: 4096,
            match_hold: Duration::from_secs(3),
            ring_hold: Duration::from_secs(1),
        }
    }
}

impl DoorbellConfig {
    /// Set module address
    pub fn with_address(mut self, address: u32) -> Self {
        self.address = address;
        self
    }

    /// Set handshake password
    pub fn with_password(mut self, password: u32) -> Self {
        self.password = password;
        self
    }

    /// Set touch ring polarity
    pub fn with_touch_polarity(mut self, polarity: TouchPolarity) -> Self {
        self.touch_polarity = polarity;
        self
    }

    /// Scan without waiting for the touch ring
    pub fn with_ignore_touch_ring(mut self, ignore: bool) -> Self {
        self.ignore_touch_ring = ignore;
        self
    }

    /// Set connection attempt spacing
    pub fn with_connect_interval(mut self, interval: Duration) -> Self {
        self.connect_interval = interval;
        self
    }

    /// Set handshake attempts before the cooldown and the cooldown itself
    pub fn with_handshake_retries(mut self, attempts: u32, cooldown: Duration) -> Self {
        self.max_handshake_attempts = attempts;
        self.handshake_cooldown = cooldown;
        self
    }

    /// Set reply timeout
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Set unanswered exchanges that mark the link dead
    pub fn with_link_failure_limit(mut self, limit: u32) -> Self {
        self.link_failure_limit = limit;
        self
    }

    /// Set scan cycle deadline
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set search passes and imaging attempts per pass
    pub fn with_scan_limits(mut self, passes: u32, imaging_attempts: u32) -> Self {
        self.scan_passes = passes;
        self.imaging_attempts = imaging_attempts;
        self
    }

    /// Set samples per enrollment
    pub fn with_enroll_samples(mut self, samples: u8) -> Self {
        self.enroll_samples = samples;
        self
    }

    /// Set enrollment deadline
    pub fn with_enroll_timeout(mut self, timeout: Duration) -> Self {
        self.enroll_timeout = timeout;
        self
    }

    /// Set Done/Failed display hold and removal polls
    pub fn with_enroll_hold(mut self, hold: Duration, removal_polls: u32) -> Self {
        self.enroll_hold = hold;
        self.removal_polls = removal_polls;
        self
    }

    /// Set template transfer deadline
    pub fn with_transfer_timeout(mut self, timeout: Duration) -> Self {
        self.transfer_timeout = timeout;
        self
    }

    /// Set accepted template size range
    pub fn with_template_size(mut self, min: usize, max: usize) -> Self {
        self.min_template_size = min;
        self.max_template_size = max;
        self
    }

    /// Set how long match and ring signals stay up
    pub fn with_signal_hold(mut self, match_hold: Duration, ring_hold: Duration) -> Self {
        self.match_hold = match_hold;
        self.ring_hold = ring_hold;
        self
    }

    /// Reject nonsensical settings
    pub fn validate(&self) -> Result<()> {
        if self.scan_passes == 0 {
            return Err(Error::Config("scan_passes must be at least 1".into()));
        }
        if self.imaging_attempts == 0 {
            return Err(Error::Config("imaging_attempts must be at least 1".into()));
        }
        if self.enroll_samples == 0 || self.enroll_samples > CHAR_BUFFER_COUNT {
            return Err(Error::Config(format!(
                "enroll_samples must be within 1..={}, got {}",
                CHAR_BUFFER_COUNT, self.enroll_samples
            )));
        }
        if self.max_handshake_attempts == 0 {
            return Err(Error::Config("max_handshake_attempts must be at least 1".into()));
        }
        if self.link_failure_limit == 0 {
            return Err(Error::Config("link_failure_limit must be at least 1".into()));
        }
        if self.reply_timeout.is_zero() || self.scan_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        if self.enroll_timeout.is_zero() || self.transfer_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        if self.min_template_size == 0 || self.min_template_size > self.max_template_size {
            return Err(Error::Config(format!(
                "template size range {}..={} is empty",
                self.min_template_size, self.max_template_size
            )));
        }
        Ok(())
    }
}
