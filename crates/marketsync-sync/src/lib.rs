//! Background synchronization: order polling, OAuth refresh, tracking polling
//! and the worker manager that schedules them.

pub mod context;
pub mod error;
pub mod oauth_refresher;
pub mod order_poller;
pub mod tracking_poller;
pub mod worker;

pub use context::SyncContext;
pub use error::{SyncError, SyncResult};
pub use oauth_refresher::{OAuthRefresher, RefreshOutcome, RefreshSummary};
pub use order_poller::{IntegrationPoll, OrderPoller, PollSummary};
pub use tracking_poller::{TrackingPoller, TrackingSummary};
pub use worker::{run_tick, LeaseConfig, Task, TickOutcome, WorkerManager};
