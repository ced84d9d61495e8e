//! Services behind the `listen` and `check` commands
//!
//! The liveness worker keeps notification subscriptions alive; the
//! connectivity repository diagnoses why a server cannot be reached.

pub mod connectivity_checker;
pub mod connectivity_repository;
pub mod foreground;
pub mod liveness_worker;
pub mod notification_sink;
pub mod scheduler;
pub mod server_registry;

pub use connectivity_checker::{ConnectivityChecker, DefaultConnectivityChecker};
pub use connectivity_repository::ConnectivityCheckRepository;
pub use foreground::{ForegroundDenied, ForegroundGuard, ForegroundHost, LockFileForegroundHost};
pub use liveness_worker::{Eligibility, LivenessWorker, WorkOutcome, WorkerSettings, start_liveness_work};
pub use notification_sink::{JsonLinesSink, LogNotificationSink, NotificationSink};
pub use scheduler::{ExistingWorkPolicy, PeriodicScheduler, WorkState};
pub use server_registry::{FileServerRegistry, MemoryServerRegistry, ServerRegistry};
