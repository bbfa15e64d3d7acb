pub mod clock;
pub mod countdown;

pub use clock::Clock;
pub use countdown::{CountdownTimer, Thresholds, Tick, TimeLevel};

use crate::events::EventSink;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Tick {
        remaining_secs: u64,
        level: TimeLevel,
    },
    Expired,
}

/// Background tick loop over a shared `CountdownTimer`. Stops on expiry and
/// is aborted when dropped.
pub struct Countdown {
    timer: Arc<Mutex<CountdownTimer>>,
    clock: Clock,
    period: Duration,
    events: EventSink<TimerEvent>,
    task: Option<JoinHandle<()>>,
}

impl Countdown {
    pub fn start(
        timer: CountdownTimer,
        clock: Clock,
        period: Duration,
        events: EventSink<TimerEvent>,
    ) -> Self {
        let mut countdown = Self {
            timer: Arc::new(Mutex::new(timer)),
            clock,
            period,
            events,
            task: None,
        };
        countdown.spawn();
        countdown
    }

    fn spawn(&mut self) {
        let timer = self.timer.clone();
        let clock = self.clock.clone();
        let events = self.events.clone();
        let period = self.period;

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let tick = match timer.lock() {
                    Ok(mut guard) => {
                        if guard.has_fired() {
                            break;
                        }
                        guard.observe(clock.now())
                    }
                    Err(_) => break,
                };
                events(TimerEvent::Tick {
                    remaining_secs: tick.remaining_secs,
                    level: tick.level,
                });
                if tick.expired_now {
                    tracing::info!("Section deadline reached");
                    events(TimerEvent::Expired);
                    break;
                }
            }
        }));
    }

    /// Re-point at a deadline. The same deadline changes nothing; a new one
    /// resets the latch and restarts the tick loop.
    pub fn rearm(&mut self, expires_at: DateTime<Utc>) {
        let changed = self
            .timer
            .lock()
            .map(|mut guard| guard.set_deadline(expires_at))
            .unwrap_or(false);
        if changed {
            tracing::info!("Deadline moved to {}, restarting countdown", expires_at);
            self.stop();
            self.spawn();
        }
    }

    pub fn remaining_secs(&self) -> u64 {
        self.timer
            .lock()
            .map(|guard| guard.remaining_secs(self.clock.now()))
            .unwrap_or(0)
    }

    pub fn has_fired(&self) -> bool {
        self.timer.lock().map(|guard| guard.has_fired()).unwrap_or(false)
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.stop();
    }
}
