//! Observation capability interface
//!
//! Hosts that can report paint, input, layout, navigation and resource
//! timings implement [`PerformanceObserver`]. Hosts that cannot use
//! [`NoopObserver`]; the monitor's threshold and recording rules do not
//! change either way.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use sysinfo::{Pid, System};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObservationCategory {
    LargestContentfulPaint,
    FirstInput,
    LayoutShift,
    Navigation,
    Resource,
}

impl ObservationCategory {
    pub const ALL: [ObservationCategory; 5] = [
        ObservationCategory::LargestContentfulPaint,
        ObservationCategory::FirstInput,
        ObservationCategory::LayoutShift,
        ObservationCategory::Navigation,
        ObservationCategory::Resource,
    ];
}

/// One timing entry delivered by an observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationEntry {
    pub category: ObservationCategory,
    /// Resource URL or entry name
    pub name: String,
    /// Milliseconds, or the shift score for layout shifts
    pub value: f64,
    /// Layout shifts right after user input do not count towards CLS
    #[serde(default)]
    pub had_recent_input: bool,
}

impl ObservationEntry {
    pub fn new(category: ObservationCategory, name: impl Into<String>, value: f64) -> Self {
        Self {
            category,
            name: name.into(),
            value,
            had_recent_input: false,
        }
    }

    pub fn with_recent_input(mut self, had_recent_input: bool) -> Self {
        self.had_recent_input = had_recent_input;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySample {
    pub used_bytes: u64,
    pub total_bytes: Option<u64>,
}

pub type ObservationCallback = Arc<dyn Fn(ObservationEntry) + Send + Sync>;

/// Live subscription; entries stop arriving once disconnected
#[derive(Debug, Clone)]
pub struct ObserverHandle {
    active: Arc<AtomicBool>,
}

impl ObserverHandle {
    fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn disconnect(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

pub trait PerformanceObserver: Send + Sync + fmt::Debug {
    /// Subscribe to a category; `None` when the host cannot observe it
    fn observe(&self, category: ObservationCategory, callback: ObservationCallback) -> Option<ObserverHandle>;

    fn sample_memory(&self) -> Option<MemorySample>;
}

/// Host without any observation support
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PerformanceObserver for NoopObserver {
    fn observe(&self, _category: ObservationCategory, _callback: ObservationCallback) -> Option<ObserverHandle> {
        None
    }

    fn sample_memory(&self) -> Option<MemorySample> {
        None
    }
}

struct Subscription {
    category: ObservationCategory,
    callback: ObservationCallback,
    handle: ObserverHandle,
}

/// Observer fed by the embedding application
///
/// Transport layers (or tests) push entries in; they are fanned out to the
/// active subscribers of the entry's category.
#[derive(Default)]
pub struct ObservationHub {
    subscriptions: Mutex<Vec<Subscription>>,
    memory: Mutex<Option<MemorySample>>,
}

impl fmt::Debug for ObservationHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservationHub")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl ObservationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an entry; returns how many subscribers received it
    pub fn push(&self, entry: ObservationEntry) -> usize {
        // Callbacks run outside the lock so they may subscribe or push
        let callbacks: Vec<ObservationCallback> = {
            let mut subs = self.subscriptions.lock();
            subs.retain(|s| s.handle.is_active());
            subs.iter()
                .filter(|s| s.category == entry.category)
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };
        for callback in &callbacks {
            callback(entry.clone());
        }
        callbacks.len()
    }

    pub fn set_memory(&self, sample: Option<MemorySample>) {
        *self.memory.lock() = sample;
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions
            .lock()
            .iter()
            .filter(|s| s.handle.is_active())
            .count()
    }
}

impl PerformanceObserver for ObservationHub {
    fn observe(&self, category: ObservationCategory, callback: ObservationCallback) -> Option<ObserverHandle> {
        let handle = ObserverHandle::new();
        self.subscriptions.lock().push(Subscription {
            category,
            callback,
            handle: handle.clone(),
        });
        Some(handle)
    }

    fn sample_memory(&self) -> Option<MemorySample> {
        *self.memory.lock()
    }
}

/// Samples this process's resident memory; observes nothing
pub struct SystemObserver {
    system: Mutex<System>,
    pid: Pid,
}

impl fmt::Debug for SystemObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemObserver").field("pid", &self.pid).finish()
    }
}

impl Default for SystemObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemObserver {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: Pid::from_u32(std::process::id()),
        }
    }
}

impl PerformanceObserver for SystemObserver {
    fn observe(&self, _category: ObservationCategory, _callback: ObservationCallback) -> Option<ObserverHandle> {
        None
    }

    fn sample_memory(&self) -> Option<MemorySample> {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_process(self.pid);
        let used_bytes = system.process(self.pid)?.memory();
        let total = system.total_memory();
        Some(MemorySample {
            used_bytes,
            total_bytes: (total > 0).then_some(total),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_hub_routes_by_category_and_honours_disconnect() {
        let hub = ObservationHub::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handle = hub
            .observe(
                ObservationCategory::FirstInput,
                Arc::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert_eq!(hub.push(ObservationEntry::new(ObservationCategory::FirstInput, "click", 12.0)), 1);
        assert_eq!(hub.push(ObservationEntry::new(ObservationCategory::Resource, "/a.js", 5.0)), 0);

        handle.disconnect();
        assert_eq!(hub.push(ObservationEntry::new(ObservationCategory::FirstInput, "click", 12.0)), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_noop_observer_offers_nothing() {
        let observer = NoopObserver;
        assert!(observer
            .observe(ObservationCategory::Navigation, Arc::new(|_| {}))
            .is_none());
        assert!(observer.sample_memory().is_none());
    }

    #[test]
    fn test_system_observer_reports_own_memory() {
        let sample = SystemObserver::new().sample_memory();
        if let Some(sample) = sample {
            assert!(sample.used_bytes > 0);
        }
    }
}
