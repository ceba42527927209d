//! Session management for the sensor link
//!
//! A session represents an established link to a module and tracks:
//! - Handshake retry counter
//! - Library capacity and stored template count (cached at handshake)
//! - Data packet length used for template transfers

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No handshake yet, or the link was judged dead
    Disconnected,

    /// Handshake succeeded and module facts are cached
    Connected,
}

/// Module facts learned during the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Library size (valid template ids are `1..=capacity`)
    pub capacity: u16,

    /// Templates stored when last counted
    pub template_count: u16,

    /// Payload size of one data packet
    pub packet_len: usize,
}

/// Session manager
///
/// Thread-safe and can be cloned cheaply (Arc internally), so an operator
/// surface running elsewhere can read the connected flag.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    /// Failed handshakes since the last success or cooldown
    retry_count: AtomicU32,

    /// Only populated after a successful handshake
    info: parking_lot::RwLock<Option<SessionInfo>>,
}

impl Session {
    /// Create a new disconnected session
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                retry_count: AtomicU32::new(0),
                info: parking_lot::RwLock::new(None),
            }),
        }
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        if self.inner.info.read().is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        matches!(self.state(), SessionState::Connected)
    }

    /// Cached module facts, if connected
    pub fn info(&self) -> Option<SessionInfo> {
        *self.inner.info.read()
    }

    /// Library capacity, if connected
    pub fn capacity(&self) -> Option<u16> {
        self.info().map(|info| info.capacity)
    }

    /// Failed handshakes since the last reset
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::Acquire)
    }

    /// Count a failed handshake, returning the new count
    pub fn record_failure(&self) -> u32 {
        self.inner.retry_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Reset the retry counter
    pub fn reset_retries(&self) {
        self.inner.retry_count.store(0, Ordering::Release);
    }

    /// Initialize session with the facts read during the handshake
    pub fn initialize(&self, info: SessionInfo) -> Result<()> {
        let mut current = self.inner.info.write();

        if current.is_some() {
            return Err(Error::InvalidSessionState(
                "Cannot initialize from state: Connected".into(),
            ));
        }

        *current = Some(info);
        self.inner.retry_count.store(0, Ordering::Release);

        Ok(())
    }

    /// Update the cached template count
    pub fn set_template_count(&self, count: u16) {
        if let Some(info) = self.inner.info.write().as_mut() {
            info.template_count = count;
        }
    }

    /// Close session
    pub fn close(&self) {
        *self.inner.info.write() = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> SessionInfo {
        SessionInfo {
            capacity: 200,
            template_count: 3,
            packet_len: 128,
        }
    }

    #[test]
    fn test_session_new() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_connected());
        assert_eq!(session.capacity(), None);
        assert_eq!(session.retry_count(), 0);
    }

    #[test]
    fn test_session_initialize() {
        let session = Session::new();
        session.record_failure();
        session.record_failure();

        session.initialize(info()).unwrap();

        assert!(session.is_connected());
        assert_eq!(session.capacity(), Some(200));
        assert_eq!(session.retry_count(), 0);
    }

    #[test]
    fn test_retry_counter() {
        let session = Session::new();
        assert_eq!(session.record_failure(), 1);
        assert_eq!(session.record_failure(), 2);

        session.reset_retries();
        assert_eq!(session.retry_count(), 0);
    }

    #[test]
    fn test_session_close() {
        let session = Session::new();
        session.initialize(info()).unwrap();

        session.close();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.info(), None);
    }

    #[test]
    fn test_template_count_update() {
        let session = Session::new();
        session.set_template_count(9);
        assert_eq!(session.info(), None);

        session.initialize(info()).unwrap();
        session.set_template_count(9);
        assert_eq!(session.info().unwrap().template_count, 9);
    }

    #[test]
    fn test_invalid_state_transitions() {
        let session = Session::new();
        session.initialize(info()).unwrap();
        assert!(session.initialize(info()).is_err());
    }

    #[test]
    fn test_session_clone() {
        let session1 = Session::new();
        let session2 = session1.clone();

        session1.initialize(info()).unwrap();

        // Both share same state
        assert!(session2.is_connected());
    }
}
