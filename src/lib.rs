//! # tempo
//!
//! `tempo` is an in-process recurring-job scheduler.  Jobs are registered
//! under a recurrence rule; a single coordinating loop sleeps until the
//! soonest entry falls due, dispatches every due job on its own thread,
//! and re-arms.  The loop owns all schedule state, so adds, removes, and
//! snapshots from other threads go over channels instead of locks.
//!
//! Rules come from cron expressions (with a leading seconds field) or
//! `@every` durations:
//! ```rust
//! # use tempo::{FuncJob, Scheduler};
//! # fn main() -> tempo::Result<()> {
//! let mut scheduler = Scheduler::new();
//!
//! scheduler.add_fn("@every 10s", || Ok("tick".to_string()))?;
//!
//! scheduler.add_job(
//!     "0 30 9 * * Mon-Fri",
//!     FuncJob::with_id("standup-reminder", || Ok("posted".to_string())),
//! )?;
//!
//! scheduler.start();
//! // ...the loop is now dispatching jobs as they fall due...
//! scheduler.stop();
//! # Ok(())
//! # }
//! ```
//!
//! Completed runs are reported through an optional result handler.  A
//! panicking job is caught and logged with a backtrace; it stays on its
//! schedule and disturbs nobody else's:
//! ```rust
//! # use tempo::Scheduler;
//! let mut scheduler = Scheduler::new();
//! scheduler.set_result_handler(|result| {
//!     if let Some(error) = &result.error {
//!         eprintln!("{} failed: {error}", result.job_id);
//!     }
//! });
//! ```

#![warn(clippy::pedantic)]

mod entry;
mod error;
mod job;
mod runner;
mod schedule;
mod scheduler;

pub use entry::Entry;
pub use error::{Error, Result};
pub use job::{FuncJob, Job, JobError, JobResult};
pub use runner::{ErrorSink, PanicReport, TracingSink};
pub use schedule::{every, parse, ConstantDelay, CronSchedule, Schedule};
pub use scheduler::{Scheduler, SchedulerHandle};
