//! Process-local, per-provider health tracking (C4).
//!
//! Deliberately not replicated: each gateway process forms its own view of
//! provider health from the outcomes it has observed. An admin reset clears
//! every provider's window.

use std::collections::VecDeque;

use dashmap::DashMap;
use parking_lot::Mutex;

struct Window {
    outcomes: VecDeque<bool>,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Window {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, success: bool) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    fn error_rate(&self, min_samples: usize) -> f64 {
        if self.outcomes.len() < min_samples {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|&&ok| !ok).count();
        failures as f64 / self.outcomes.len() as f64
    }
}

/// Bounded-window success/failure ring per provider, shared across
/// concurrent producers (readers are the routing policy, writers are the
/// orchestrators).
pub struct HealthTracker {
    window_size: usize,
    min_samples: usize,
    windows: DashMap<String, Mutex<Window>>,
}

impl HealthTracker {
    pub fn new(window_size: usize, min_samples: usize) -> Self {
        HealthTracker {
            window_size,
            min_samples,
            windows: DashMap::new(),
        }
    }

    /// Records an outcome for `provider`.
    pub fn record(&self, provider: &str, success: bool) {
        let entry = self
            .windows
            .entry(provider.to_string())
            .or_insert_with(|| Mutex::new(Window::new(self.window_size)));
        entry.lock().push(success);
    }

    /// Current error rate for `provider` in `[0, 1]`. Zero until at least
    /// `min_samples` observations have been recorded.
    pub fn error_rate(&self, provider: &str) -> f64 {
        match self.windows.get(provider) {
            Some(window) => window.lock().error_rate(self.min_samples),
            None => 0.0,
        }
    }

    /// Clears every provider's window.
    pub fn reset(&self) {
        self.windows.clear();
    }
}
