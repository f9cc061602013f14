use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::dialogue::DialogueStep;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for exercising idle eviction without waiting.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<StdMutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(StdMutex::new(start)) }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut now) => *now = instant,
            Err(poisoned) => *poisoned.into_inner() = instant,
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationSession {
    pub step: DialogueStep,
    pub last_activity_at: DateTime<Utc>,
}

/// Process-wide session map with idle eviction. Every `set` stamps the
/// session with the store clock, so a step change and its activity refresh
/// land in one update.
pub struct ConversationStore {
    sessions: RwLock<HashMap<String, ConversationSession>>,
    idle_timeout: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl ConversationStore {
    pub fn new(idle_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        let idle_timeout = chrono::Duration::from_std(idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        Self { sessions: RwLock::new(HashMap::new()), idle_timeout, clock }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub async fn get(&self, caller_id: &str) -> Option<ConversationSession> {
        self.sessions.read().await.get(caller_id).cloned()
    }

    /// Like `get`, but a session already past the idle timeout is dropped
    /// and reported as absent, whether or not the sweeper has run yet.
    pub async fn get_active(&self, caller_id: &str) -> Option<ConversationSession> {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let session = sessions.get(caller_id)?;
        if now - session.last_activity_at > self.idle_timeout {
            debug!(
                event_name = "session.lookup.expired",
                caller_id = %caller_id,
                step = session.step.name(),
                "dropping idle conversation on lookup"
            );
            sessions.remove(caller_id);
            return None;
        }
        Some(session.clone())
    }

    pub async fn set(&self, caller_id: &str, step: DialogueStep) -> ConversationSession {
        let session = ConversationSession { step, last_activity_at: self.clock.now() };
        self.sessions.write().await.insert(caller_id.to_owned(), session.clone());
        session
    }

    pub async fn delete(&self, caller_id: &str) -> bool {
        self.sessions.write().await.remove(caller_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drops every session idle for longer than the timeout; returns how many.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|caller_id, session| {
            let keep = now - session.last_activity_at <= self.idle_timeout;
            if !keep {
                debug!(
                    event_name = "session.sweep.evicted",
                    caller_id = %caller_id,
                    step = session.step.name(),
                    "evicting idle conversation"
                );
            }
            keep
        });
        before - sessions.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = store.sweep().await;
                if evicted > 0 {
                    let remaining = store.len().await;
                    info!(
                        event_name = "session.sweep.completed",
                        evicted,
                        remaining,
                        "idle conversations evicted"
                    );
                }
            }
        })
    }
}

/// Serializes turns per caller so two messages from one caller never
/// interleave inside the dialogue engine.
#[derive(Default)]
pub struct TurnLocks {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TurnLocks {
    pub async fn acquire(&self, caller_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(locks.entry(caller_id.to_owned()).or_default())
        };
        lock.lock_owned().await
    }

    /// Forgets the caller's lock once nobody holds or awaits it.
    pub fn release(&self, caller_id: &str) {
        let mut locks = match self.locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        if locks.get(caller_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(caller_id);
        }
    }

    pub fn tracked(&self) -> usize {
        match self.locks.lock() {
            Ok(locks) => locks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
