//! A Job is a piece of work the scheduler dispatches when its rule falls due.

use std::{fmt, sync::Arc};
use uuid::Uuid;

/// Errors surfaced by a job's own logic.
#[allow(clippy::module_name_repetitions)]
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// Anything that can be scheduled to run periodically.
///
/// The identifier must be stable for the lifetime of the job: it is the key
/// under which the scheduler files the entry, and the handle for
/// [`Scheduler::remove_job`](crate::Scheduler::remove_job).
pub trait Job: Send + Sync + fmt::Debug {
	/// Stable identifier, assigned once at construction.
	fn id(&self) -> &str;
	/// Execute one run, producing a completion message.
	fn run(&self) -> Result<String, JobError>;
}

/// Adapter turning a bare closure into a [`Job`].
///
/// [`FuncJob::new`] assigns a random identifier when the closure is wrapped,
/// so the same instance reports the same identity on every call.  Use
/// [`FuncJob::with_id`] to pick the identifier yourself:
/// ```rust
/// # use tempo::{FuncJob, Job};
/// let job = FuncJob::with_id("greeter", || Ok("hello".to_string()));
/// assert_eq!(job.id(), "greeter");
/// ```
#[allow(clippy::module_name_repetitions)]
pub struct FuncJob<F> {
	id: String,
	func: F,
}

impl<F> FuncJob<F>
where
	F: Fn() -> Result<String, JobError> + Send + Sync,
{
	/// Wrap a closure, generating a fresh unique identifier for it.
	#[must_use]
	pub fn new(func: F) -> Self {
		Self {
			id: Uuid::new_v4().to_string(),
			func,
		}
	}

	/// Wrap a closure under a caller-chosen identifier.
	#[must_use]
	pub fn with_id(id: impl Into<String>, func: F) -> Self {
		Self {
			id: id.into(),
			func,
		}
	}
}

impl<F> Job for FuncJob<F>
where
	F: Fn() -> Result<String, JobError> + Send + Sync,
{
	fn id(&self) -> &str {
		&self.id
	}

	fn run(&self) -> Result<String, JobError> {
		(self.func)()
	}
}

impl<F> fmt::Debug for FuncJob<F> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FuncJob")
			.field("id", &self.id)
			.finish_non_exhaustive()
	}
}

/// The outcome of one completed run, as delivered to the result handler.
///
/// Exactly one of these is produced per run that returns normally; a run
/// that panics produces none (the fault goes to the error sink instead).
#[allow(clippy::module_name_repetitions)]
pub struct JobResult {
	/// Identifier of the job that ran.
	pub job_id: String,
	/// The job itself, shared with the scheduler's entry.
	pub job: Arc<dyn Job>,
	/// Completion message from a successful run, empty on failure.
	pub message: String,
	/// The failure, if the run returned one.
	pub error: Option<JobError>,
}

impl JobResult {
	pub(crate) fn new(job: &Arc<dyn Job>, outcome: Result<String, JobError>) -> Self {
		let job_id = job.id().to_string();
		match outcome {
			Ok(message) => Self {
				job_id,
				job: Arc::clone(job),
				message,
				error: None,
			},
			Err(error) => Self {
				job_id,
				job: Arc::clone(job),
				message: String::new(),
				error: Some(error),
			},
		}
	}

	/// Whether the run completed without an error.
	#[must_use]
	pub fn is_success(&self) -> bool {
		self.error.is_none()
	}
}

impl fmt::Debug for JobResult {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("JobResult")
			.field("job_id", &self.job_id)
			.field("message", &self.message)
			.field("error", &self.error)
			.finish_non_exhaustive()
	}
}
