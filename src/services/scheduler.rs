//! Unique, named periodic work

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// What to do when work with the same name is already scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingWorkPolicy {
    /// Abort the existing work and schedule the new one
    CancelAndReenqueue,
    /// Leave the existing work alone
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    /// Waiting for its next period
    Enqueued,
    Running,
    /// Cancelled, panicked or otherwise gone
    Finished,
}

struct ScheduledWork {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl ScheduledWork {
    fn state(&self) -> WorkState {
        if self.handle.is_finished() {
            WorkState::Finished
        } else if self.running.load(Ordering::SeqCst) {
            WorkState::Running
        } else {
            WorkState::Enqueued
        }
    }
}

/// Runs each named work every `period`, first run immediately
#[derive(Default)]
pub struct PeriodicScheduler {
    works: Mutex<HashMap<String, ScheduledWork>>,
}

impl PeriodicScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn works(&self) -> MutexGuard<'_, HashMap<String, ScheduledWork>> {
        self.works.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Schedule `work` under `name`. Returns `false` when the existing work
    /// was kept.
    pub fn enqueue_unique_periodic<F, Fut>(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        period: Duration,
        work: F,
    ) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut works = self.works();

        if let Some(existing) = works.get(name) {
            if policy == ExistingWorkPolicy::Keep && !existing.handle.is_finished() {
                log::debug!("Keeping existing work '{}' ({:?})", name, existing.state());
                return false;
            }
            log::debug!("Replacing work '{}' ({:?})", name, existing.state());
            existing.handle.abort();
        }

        let running = Arc::new(AtomicBool::new(false));
        let flag = running.clone();
        let work_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                log::debug!("Running periodic work '{}'", work_name);
                flag.store(true, Ordering::SeqCst);
                work().await;
                flag.store(false, Ordering::SeqCst);
            }
        });

        works.insert(name.to_string(), ScheduledWork { handle, running });
        true
    }

    /// `None` when nothing was ever scheduled under `name`
    pub fn work_state(&self, name: &str) -> Option<WorkState> {
        self.works().get(name).map(ScheduledWork::state)
    }

    pub fn cancel(&self, name: &str) -> bool {
        match self.works().remove(name) {
            Some(work) => {
                work.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, work) in self.works().drain() {
            work.handle.abort();
        }
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Policy for (re)starting the liveness work: replace anything that is not
/// currently mid-run.
pub fn liveness_work_policy(state: Option<WorkState>) -> ExistingWorkPolicy {
    match state {
        None | Some(WorkState::Finished) | Some(WorkState::Enqueued) => {
            ExistingWorkPolicy::CancelAndReenqueue
        }
        Some(WorkState::Running) => ExistingWorkPolicy::Keep,
    }
}
