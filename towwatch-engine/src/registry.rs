use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use towwatch_shared::{FlightRef, Milestone, TowOperation};
use tracing::{debug, info, warn};

use crate::dispatcher::{AlertDispatcher, FlightActivity};

/// Timing knobs for milestone deadlines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Extra time after a scheduled milestone before it counts as overdue
    pub grace_period: Duration,
    /// Deadlines further out than this are treated as "not overdue right
    /// now", which triggers a reconciling clear when the record is admitted
    pub proactive_clear_threshold: Duration,
    /// Floor for any armed timer, so past deadlines fire promptly
    pub min_delay: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::ZERO,
            proactive_clear_threshold: Duration::from_secs(10),
            min_delay: Duration::from_secs(1),
        }
    }
}

/// When one milestone's timer should fire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MilestonePlan {
    pub milestone: Milestone,
    pub delay: Duration,
    /// Deadline lies beyond the proactive clear threshold
    pub due_later: bool,
}

impl SchedulerSettings {
    /// One plan per unconfirmed milestone
    pub fn plan(&self, op: &TowOperation, now: DateTime<Utc>) -> Vec<MilestonePlan> {
        let grace = chrono::Duration::from_std(self.grace_period).unwrap_or_else(|_| chrono::Duration::zero());
        let threshold = chrono::Duration::from_std(self.proactive_clear_threshold)
            .unwrap_or_else(|_| chrono::Duration::zero());

        op.unconfirmed_milestones()
            .into_iter()
            .map(|milestone| {
                let raw = op.scheduled(milestone) - now + grace;
                let delay = raw.to_std().unwrap_or(Duration::ZERO).max(self.min_delay);
                MilestonePlan {
                    milestone,
                    delay,
                    due_later: raw > threshold,
                }
            })
            .collect()
    }
}

struct RegistryEntry {
    record: Arc<TowOperation>,
    generation: u64,
    timers: Vec<(Milestone, JoinHandle<()>)>,
}

impl RegistryEntry {
    fn cancel(&self) {
        // abort() is a no-op on a finished task
        for (_, timer) in &self.timers {
            timer.abort();
        }
    }
}

/// What `upsert` admitted
#[derive(Debug, Clone)]
pub struct ArmedEntry {
    pub record: Arc<TowOperation>,
    pub generation: u64,
    pub milestones: Vec<Milestone>,
}

/// The live set of unconfirmed towing operations and their deadline timers.
///
/// The map lock is only held for map operations. Every dispatch, including
/// the ones issued from timers, runs after the lock is released.
pub struct TowRegistry {
    entries: Mutex<HashMap<String, RegistryEntry>>,
    dispatcher: Arc<AlertDispatcher>,
    settings: SchedulerSettings,
    generations: AtomicU64,
}

impl TowRegistry {
    pub fn new(dispatcher: Arc<AlertDispatcher>, settings: SchedulerSettings) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            dispatcher,
            settings,
            generations: AtomicU64::new(0),
        })
    }

    pub fn dispatcher(&self) -> &Arc<AlertDispatcher> {
        &self.dispatcher
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Admit the latest state of an operation, replacing whatever was
    /// registered for its ID.
    ///
    /// Fully confirmed operations are not stored; their alert is cleared
    /// (conditionally) and `None` is returned.
    pub async fn upsert(self: &Arc<Self>, record: TowOperation) -> Option<ArmedEntry> {
        self.remove(&record.id);

        if record.both_actuals_confirmed() {
            info!(tow_id = %record.id, "Both actuals reported, clearing alert");
            self.dispatcher.conditional_clear(&record, &**self).await;
            return None;
        }

        let plans = self.settings.plan(&record, Utc::now());
        let record = Arc::new(record);

        // Nothing is overdue: any alert left over from an earlier pass is stale.
        if plans.iter().all(|p| p.due_later) {
            debug!(tow_id = %record.id, "No milestone overdue, reconciling alert state");
            self.dispatcher.conditional_clear(&record, &**self).await;
        }

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let milestones: Vec<Milestone> = plans.iter().map(|p| p.milestone).collect();

        {
            let mut entries = self.lock();
            let timers = plans
                .iter()
                .map(|plan| {
                    debug!(
                        tow_id = %record.id,
                        milestone = %plan.milestone,
                        delay_ms = plan.delay.as_millis() as u64,
                        "Arming deadline"
                    );
                    (plan.milestone, self.arm(&record.id, generation, plan.milestone, plan.delay))
                })
                .collect();

            let entry = RegistryEntry {
                record: record.clone(),
                generation,
                timers,
            };
            // A concurrent upsert for the same ID may have landed while we
            // were dispatching; last write wins.
            if let Some(previous) = entries.insert(record.id.clone(), entry) {
                previous.cancel();
            }
        }

        Some(ArmedEntry {
            record,
            generation,
            milestones,
        })
    }

    /// Cancel the operation's timers and forget it. No alert is sent.
    pub fn remove(&self, id: &str) -> bool {
        match self.lock().remove(id) {
            Some(entry) => {
                entry.cancel();
                debug!(tow_id = %id, "Removed from registry");
                true
            }
            None => false,
        }
    }

    /// Remove the operation (if registered) and clear its alert
    pub async fn remove_and_clear(&self, record: &TowOperation) {
        self.remove(&record.id);
        self.dispatcher.conditional_clear(record, self).await;
    }

    /// Cancel every timer and empty the registry. Returns the number of
    /// entries dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        for entry in entries.values() {
            entry.cancel();
        }
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    pub fn is_any_other_active_for_flight(&self, flight: &FlightRef, exclude_id: &str) -> bool {
        let now = Utc::now();
        self.lock().values().any(|entry| {
            entry.record.id != exclude_id
                && entry.record.involves_flight(flight)
                && entry.record.is_active_at(now)
        })
    }

    pub fn is_any_active_for_flight(&self, flight: &FlightRef) -> bool {
        let now = Utc::now();
        self.lock()
            .values()
            .any(|entry| entry.record.involves_flight(flight) && entry.record.is_active_at(now))
    }

    pub fn get(&self, id: &str) -> Option<Arc<TowOperation>> {
        self.lock().get(id).map(|entry| entry.record.clone())
    }

    /// Milestones whose timers have not fired yet
    pub fn armed_milestones(&self, id: &str) -> Vec<Milestone> {
        self.lock()
            .get(id)
            .map(|entry| {
                entry
                    .timers
                    .iter()
                    .filter(|(_, timer)| !timer.is_finished())
                    .map(|(milestone, _)| *milestone)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(self: &Arc<Self>, id: &str, generation: u64, milestone: Milestone, delay: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(registry) = registry.upgrade() {
                registry.on_deadline(&id, generation, milestone).await;
            }
        })
    }

    async fn on_deadline(&self, id: &str, generation: u64, milestone: Milestone) {
        let record = {
            let entries = self.lock();
            match entries.get(id) {
                Some(entry) if entry.generation == generation => entry.record.clone(),
                _ => {
                    debug!(tow_id = %id, %milestone, generation, "Superseded deadline, ignoring");
                    return;
                }
            }
        };

        warn!(tow_id = %record.id, %milestone, "Milestone not confirmed in time");
        self.dispatcher.set_alert(&record).await;
    }
}

impl FlightActivity for TowRegistry {
    fn is_any_other_active_for_flight(&self, flight: &FlightRef, exclude_id: &str) -> bool {
        TowRegistry::is_any_other_active_for_flight(self, flight, exclude_id)
    }
}
