//! Collaborator interfaces
//!
//! The doorbell core only talks to the sensor. Everything else it needs
//! from the host (the touch ring pin, the place outcomes are published to,
//! the store of display names) sits behind these traits.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use fpdoorbell_types::Match;

use crate::error::{Error, Result};

/// Electrical polarity of the touch ring input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TouchPolarity {
    /// High level means touched
    #[default]
    ActiveHigh,

    /// Low level means touched
    ActiveLow,
}

impl TouchPolarity {
    /// Map a raw pin level to "touched"
    pub fn is_touched(self, level: bool) -> bool {
        match self {
            Self::ActiveHigh => level,
            Self::ActiveLow => !level,
        }
    }
}

/// Raw touch ring pin
#[cfg_attr(test, mockall::automock)]
pub trait TouchInput: Send {
    /// Current pin level
    fn read_level(&mut self) -> bool;
}

/// Receiver of doorbell signals
///
/// Implementations publish to whatever the host has: sensors of a home
/// automation bridge, MQTT topics, a log.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send {
    /// A finger was recognized
    fn on_match(&mut self, matched: &Match);

    /// The match signal should be cleared
    fn on_match_cleared(&mut self);

    /// Doorbell ring output on or off
    fn on_ring(&mut self, ringing: bool);

    /// Finger detected on the glass, or gone again
    fn on_finger(&mut self, present: bool);

    /// Enrollment progress text
    fn on_enroll_status(&mut self, status: &str);

    /// Human-readable summary of the last operator action
    fn on_last_action(&mut self, action: &str);

    /// Sensor connection came up or went down
    fn on_connected(&mut self, connected: bool);
}

/// Persistent id to display name mapping
#[cfg_attr(test, mockall::automock)]
pub trait NameRegistry: Send {
    /// Every stored name
    fn load_all(&mut self) -> Result<BTreeMap<u16, String>>;

    /// Store or replace a name
    fn set(&mut self, id: u16, name: &str) -> Result<()>;

    /// Forget one name
    fn delete(&mut self, id: u16) -> Result<()>;

    /// Forget every name
    fn clear(&mut self) -> Result<()>;
}

/// In-process [`NameRegistry`]
///
/// Clones share the same map, so a test can keep one and hand the other to
/// the doorbell.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    names: Arc<Mutex<BTreeMap<u16, String>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-filled with `names`
    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = (u16, S)>,
        S: Into<String>,
    {
        let map = names.into_iter().map(|(id, name)| (id, name.into())).collect();
        Self {
            names: Arc::new(Mutex::new(map)),
        }
    }

    /// Snapshot of the stored names
    pub fn snapshot(&self) -> BTreeMap<u16, String> {
        self.names.lock().clone()
    }

    /// Name stored for `id`
    pub fn get(&self, id: u16) -> Option<String> {
        self.names.lock().get(&id).cloned()
    }
}

impl NameRegistry for MemoryRegistry {
    fn load_all(&mut self) -> Result<BTreeMap<u16, String>> {
        Ok(self.snapshot())
    }

    fn set(&mut self, id: u16, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::Registry(format!("empty name for id {}", id)));
        }
        self.names.lock().insert(id, name.to_owned());
        Ok(())
    }

    fn delete(&mut self, id: u16) -> Result<()> {
        self.names.lock().remove(&id);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.names.lock().clear();
        Ok(())
    }
}

/// Touch input driven from software
///
/// Clones share the level; flip it from another task or a test.
#[derive(Debug, Clone, Default)]
pub struct ManualTouch {
    level: Arc<AtomicBool>,
}

impl ManualTouch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pin level
    pub fn set(&self, level: bool) {
        self.level.store(level, Ordering::Release);
    }
}

impl TouchInput for ManualTouch {
    fn read_level(&mut self) -> bool {
        self.level.load(Ordering::Acquire)
    }
}

/// [`EventSink`] that writes every signal to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn on_match(&mut self, matched: &Match) {
        info!("Match: {}", matched);
    }

    fn on_match_cleared(&mut self) {
        info!("Match cleared");
    }

    fn on_ring(&mut self, ringing: bool) {
        info!("Ring: {}", if ringing { "on" } else { "off" });
    }

    fn on_finger(&mut self, present: bool) {
        info!("Finger: {}", if present { "present" } else { "gone" });
    }

    fn on_enroll_status(&mut self, status: &str) {
        info!("Enrollment: {}", status);
    }

    fn on_last_action(&mut self, action: &str) {
        info!("Last action: {}", action);
    }

    fn on_connected(&mut self, connected: bool) {
        info!("Sensor {}", if connected { "connected" } else { "disconnected" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_polarity() {
        assert!(TouchPolarity::ActiveHigh.is_touched(true));
        assert!(!TouchPolarity::ActiveHigh.is_touched(false));
        assert!(TouchPolarity::ActiveLow.is_touched(false));
        assert!(!TouchPolarity::ActiveLow.is_touched(true));
    }

    #[test]
    fn test_memory_registry_shared_between_clones() {
        let view = MemoryRegistry::with_names([(1, "Alice")]);
        let mut registry = view.clone();

        registry.set(2, "Bob").unwrap();
        registry.delete(1).unwrap();

        assert_eq!(view.get(2).as_deref(), Some("Bob"));
        assert_eq!(view.get(1), None);
        assert_eq!(registry.load_all().unwrap().len(), 1);

        registry.clear().unwrap();
        assert!(view.snapshot().is_empty());
    }

    #[test]
    fn test_memory_registry_rejects_empty_name() {
        let mut registry = MemoryRegistry::new();
        assert!(matches!(registry.set(1, ""), Err(Error::Registry(_))));
    }

    #[test]
    fn test_manual_touch() {
        let touch = ManualTouch::new();
        let mut input = touch.clone();

        assert!(!input.read_level());
        touch.set(true);
        assert!(input.read_level());
    }
}
