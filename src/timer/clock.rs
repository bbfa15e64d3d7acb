use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Wall-clock source for deadline math. Manual clocks are shared, so
/// advancing one clone moves every holder.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    #[default]
    System,
    Manual(Arc<Mutex<DateTime<Utc>>>),
}

impl Clock {
    pub fn system() -> Self {
        Self::System
    }

    pub fn manual(at: DateTime<Utc>) -> Self {
        Self::Manual(Arc::new(Mutex::new(at)))
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Manual(at) => at.lock().map(|t| *t).unwrap_or_else(|_| Utc::now()),
        }
    }

    /// Move a manual clock forward. No effect on the system clock.
    pub fn advance(&self, delta: Duration) {
        if let Clock::Manual(at) = self {
            if let Ok(mut guard) = at.lock() {
                *guard += delta;
            }
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Clock::Manual(at) = self {
            if let Ok(mut guard) = at.lock() {
                *guard = to;
            }
        }
    }
}
