//! `pgkeeper-scheduler`: cron-driven backup scheduling and the run lifecycle.
//!
//! # Overview
//!
//! The [`Scheduler`] keeps one [`CronTimer`] entry per enabled datasource,
//! reconciling against the catalog on start and then periodically. Each
//! firing hands the datasource to a [`JobCommand`]; in production that is the
//! [`ExecutionCommand`], which brackets the dump with a backup record so every
//! run ends as `completed` or `failed`.
//!
//! Manual backups and restores go through the [`TaskRegistry`] so the caller
//! can return at once and poll for the outcome.
//!
//! Schedule expressions carry a leading seconds field:
//!
//! | Expression        | Fires                      |
//! |-------------------|----------------------------|
//! | `0 0 3 * * *`     | 03:00:00 every day         |
//! | `0 30 1 * * Sun`  | 01:30:00 every Sunday      |
//! | `*/5 * * * * *`   | every five seconds         |

pub mod command;
pub mod engine;
pub mod error;
pub mod schedule;
pub mod tasks;
pub mod timer;
pub mod types;

pub use command::ExecutionCommand;
pub use engine::Scheduler;
pub use error::{CommandError, CommandResult, Result, SchedulerError};
pub use schedule::CronSchedule;
pub use tasks::{TaskId, TaskInfo, TaskKind, TaskRegistry, TaskStatus};
pub use timer::{CronTimer, EntryId, JobFn};
pub use types::{JobCommand, ReconcileReport, ScheduleEntry};
