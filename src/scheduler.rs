//! The scheduler owns the entry table and coordinates all dispatch.

use crate::{
	runner::{self, ErrorSink, ResultHandler, TracingSink},
	schedule::parse,
	Entry, Job, JobError, JobResult, Result, Schedule,
};
use chrono::{DateTime, Local, TimeZone, Utc};
use crossbeam_channel::{after, bounded, select, Receiver, Sender};
use std::{collections::HashMap, fmt, sync::Arc, thread, time::Duration};
use tracing::{debug, info};

// With nothing scheduled, wait far in the future; control messages still
// wake the loop.
const IDLE: Duration = Duration::from_secs(100_000 * 60 * 60);

/// A Scheduler files entries, runs the dispatch loop, and executes jobs
/// as they fall due.
///
/// All scheduler state is owned by the loop once it starts; this handle
/// talks to it over rendezvous channels, so no locks guard the entry
/// table.  Entries registered before [`start`](Scheduler::start) are
/// filed directly.
///
/// A job still running when it next falls due is dispatched again; runs
/// of the same job may overlap.  Jobs needing single-flight discipline
/// enforce it themselves.
///
/// Stopping is final: a stopped scheduler discards further requests, and
/// a fresh one must be created to schedule again.
pub struct Scheduler<Z = Local>
where
	Z: TimeZone,
{
	tz: Z,
	/// Present until the loop starts, then owned by the loop.
	core: Option<Core<Z>>,
	handle: SchedulerHandle<Z>,
}

impl Scheduler<Local> {
	/// Instantiate a Scheduler in the local time zone.
	#[must_use]
	pub fn new() -> Self {
		Self::with_timezone(Local)
	}
}

impl Default for Scheduler<Local> {
	fn default() -> Self {
		Self::new()
	}
}

impl<Z> Scheduler<Z>
where
	Z: TimeZone + Send + Sync + 'static,
	Z::Offset: Send,
{
	/// Instantiate a Scheduler computing activation times in `tz`.
	/// ```rust
	/// # use tempo::Scheduler;
	/// # use chrono::Utc;
	/// let scheduler = Scheduler::with_timezone(Utc);
	/// assert_eq!(*scheduler.location(), Utc);
	/// ```
	#[must_use]
	pub fn with_timezone(tz: Z) -> Self {
		let (add_tx, add_rx) = bounded(0);
		let (remove_tx, remove_rx) = bounded(0);
		let (snapshot_tx, snapshot_rx) = bounded(0);
		let (stop_tx, stop_rx) = bounded(0);
		Self {
			tz: tz.clone(),
			core: Some(Core {
				tz,
				table: HashMap::new(),
				handler: None,
				sink: Arc::new(TracingSink),
				add_rx,
				remove_rx,
				snapshot_rx,
				stop_rx,
			}),
			handle: SchedulerHandle {
				add_tx,
				remove_tx,
				snapshot_tx,
				stop_tx,
			},
		}
	}

	/// A cloneable remote control for the dispatch loop.
	///
	/// [`run`](Scheduler::run) borrows the scheduler for as long as the
	/// loop runs, so a thread that needs to reschedule or stop in the
	/// meantime takes a handle first:
	/// ```rust
	/// # use tempo::Scheduler;
	/// let mut scheduler = Scheduler::new();
	/// let handle = scheduler.handle();
	/// let stopper = std::thread::spawn(move || handle.stop());
	/// scheduler.run();
	/// # stopper.join().unwrap();
	/// ```
	#[must_use]
	pub fn handle(&self) -> SchedulerHandle<Z> {
		self.handle.clone()
	}

	/// The time zone activation times are computed in.
	#[must_use]
	pub fn location(&self) -> &Z {
		&self.tz
	}

	/// Parse `expression` and schedule `job` under it.
	/// ```rust
	/// # use tempo::{FuncJob, Scheduler};
	/// # fn main() -> tempo::Result<()> {
	/// let mut scheduler = Scheduler::new();
	/// scheduler.add_job(
	///     "@every 90s",
	///     FuncJob::with_id("heartbeat", || Ok("lub-dub".to_string())),
	/// )?;
	/// assert_eq!(scheduler.entries().len(), 1);
	/// # Ok(())
	/// # }
	/// ```
	///
	/// # Errors
	///
	/// Returns an error if the expression cannot be parsed; nothing is
	/// scheduled in that case.
	pub fn add_job<J>(&mut self, expression: &str, job: J) -> Result<()>
	where
		J: Job + 'static,
	{
		let schedule = parse(expression)?;
		self.insert(Entry::new(schedule, Arc::new(job)));
		Ok(())
	}

	/// Parse `expression` and schedule a bare closure under it, with a
	/// generated identifier.
	/// ```rust
	/// # use tempo::Scheduler;
	/// # fn main() -> tempo::Result<()> {
	/// let mut scheduler = Scheduler::new();
	/// scheduler.add_fn("0 0 3 * * *", || Ok("nightly vacuum done".to_string()))?;
	/// # Ok(())
	/// # }
	/// ```
	///
	/// # Errors
	///
	/// Returns an error if the expression cannot be parsed; nothing is
	/// scheduled in that case.
	pub fn add_fn<F>(&mut self, expression: &str, func: F) -> Result<()>
	where
		F: Fn() -> std::result::Result<String, JobError> + Send + Sync + 'static,
	{
		self.add_job(expression, crate::FuncJob::new(func))
	}

	/// Schedule `job` under an already-built recurrence rule.
	///
	/// Registering a job whose identifier is already filed replaces the
	/// old entry.
	pub fn schedule<S, J>(&mut self, schedule: S, job: J)
	where
		S: Schedule<Z> + 'static,
		J: Job + 'static,
	{
		self.insert(Entry::new(Arc::new(schedule), Arc::new(job)));
	}

	/// Unschedule the job filed under `id`.  Unknown identifiers are
	/// ignored.
	pub fn remove_job(&mut self, id: &str) {
		if let Some(core) = self.core.as_mut() {
			if core.table.remove(id).is_some() {
				debug!(job_id = %id, "entry removed");
			}
			return;
		}
		self.handle.remove_job(id);
	}

	/// Register the closure invoked with each completed run's
	/// [`JobResult`].  Takes effect before the loop starts.
	///
	/// A run that panics produces no result; panics go to the error sink
	/// instead.
	pub fn set_result_handler<F>(&mut self, handler: F)
	where
		F: Fn(JobResult) + Send + Sync + 'static,
	{
		if let Some(core) = self.core.as_mut() {
			core.handler = Some(Arc::new(handler));
		} else {
			debug!("scheduler already started, result handler unchanged");
		}
	}

	/// Replace the default `tracing`-backed sink for job faults.  Takes
	/// effect before the loop starts.
	pub fn set_error_sink<S>(&mut self, sink: S)
	where
		S: ErrorSink + 'static,
	{
		if let Some(core) = self.core.as_mut() {
			core.sink = Arc::new(sink);
		} else {
			debug!("scheduler already started, error sink unchanged");
		}
	}

	/// Start the dispatch loop on its own thread and return.
	pub fn start(&mut self) {
		let Some(mut core) = self.core.take() else {
			debug!("scheduler already started");
			return;
		};
		thread::spawn(move || core.run());
	}

	/// Run the dispatch loop on the calling thread.  Blocks until a
	/// [`handle`](Scheduler::handle) taken beforehand calls
	/// [`stop`](SchedulerHandle::stop).
	pub fn run(&mut self) {
		let Some(mut core) = self.core.take() else {
			debug!("scheduler already started");
			return;
		};
		core.run();
	}

	/// Ask the dispatch loop to exit, blocking until it acknowledges.
	/// In-flight jobs keep running; they are not cancelled.
	pub fn stop(&self) {
		if self.core.is_some() {
			debug!("scheduler never started, nothing to stop");
			return;
		}
		self.handle.stop();
	}

	/// Snapshot the current entries, soonest first and never-due last.
	///
	/// Safe in any state: filed entries before the loop starts (their
	/// next times not yet computed), a loop-provided copy while it runs,
	/// and empty once it has stopped.  The order of entries sharing an
	/// activation time is unspecified.
	#[must_use]
	pub fn entries(&self) -> Vec<Entry<Z>> {
		if let Some(core) = self.core.as_ref() {
			return core.snapshot();
		}
		self.handle.entries()
	}

	/// File an entry directly before start, or hand it to the loop.
	fn insert(&mut self, entry: Entry<Z>) {
		if let Some(core) = self.core.as_mut() {
			debug!(job_id = %entry.id(), "entry registered");
			core.table.insert(entry.id().to_string(), entry);
			return;
		}
		self.handle.insert(entry);
	}
}

impl<Z> fmt::Debug for Scheduler<Z>
where
	Z: TimeZone + fmt::Debug,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Scheduler")
			.field("timezone", &self.tz)
			.field("started", &self.core.is_none())
			.finish_non_exhaustive()
	}
}

/// A cloneable remote control for a scheduler's dispatch loop.
///
/// Obtained from [`Scheduler::handle`].  Every method goes over the
/// loop's control channels: a call blocks until the loop services it
/// (indefinitely if the loop was never started), and is quietly dropped
/// once the loop has exited.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone)]
pub struct SchedulerHandle<Z = Local>
where
	Z: TimeZone,
{
	add_tx: Sender<Entry<Z>>,
	remove_tx: Sender<String>,
	snapshot_tx: Sender<Sender<Vec<Entry<Z>>>>,
	stop_tx: Sender<()>,
}

impl<Z> SchedulerHandle<Z>
where
	Z: TimeZone + 'static,
{
	/// Parse `expression` and schedule `job` under it.
	///
	/// # Errors
	///
	/// Returns an error if the expression cannot be parsed; nothing is
	/// scheduled in that case.
	pub fn add_job<J>(&self, expression: &str, job: J) -> Result<()>
	where
		J: Job + 'static,
	{
		let schedule = parse(expression)?;
		self.insert(Entry::new(schedule, Arc::new(job)));
		Ok(())
	}

	/// Parse `expression` and schedule a bare closure under it, with a
	/// generated identifier.
	///
	/// # Errors
	///
	/// Returns an error if the expression cannot be parsed; nothing is
	/// scheduled in that case.
	pub fn add_fn<F>(&self, expression: &str, func: F) -> Result<()>
	where
		F: Fn() -> std::result::Result<String, JobError> + Send + Sync + 'static,
	{
		self.add_job(expression, crate::FuncJob::new(func))
	}

	/// Schedule `job` under an already-built recurrence rule.
	///
	/// Registering a job whose identifier is already filed replaces the
	/// old entry.
	pub fn schedule<S, J>(&self, schedule: S, job: J)
	where
		S: Schedule<Z> + 'static,
		J: Job + 'static,
	{
		self.insert(Entry::new(Arc::new(schedule), Arc::new(job)));
	}

	/// Unschedule the job filed under `id`.  Unknown identifiers are
	/// ignored.
	pub fn remove_job(&self, id: &str) {
		if self.remove_tx.send(id.to_string()).is_err() {
			debug!(job_id = %id, "scheduler loop has exited, remove ignored");
		}
	}

	/// Snapshot the current entries, soonest first and never-due last.
	/// Empty once the loop has stopped.
	#[must_use]
	pub fn entries(&self) -> Vec<Entry<Z>> {
		let (reply_tx, reply_rx) = bounded(0);
		if self.snapshot_tx.send(reply_tx).is_err() {
			return Vec::new();
		}
		reply_rx.recv().unwrap_or_default()
	}

	/// Ask the dispatch loop to exit, blocking until it acknowledges.
	/// In-flight jobs keep running; they are not cancelled.
	pub fn stop(&self) {
		if self.stop_tx.send(()).is_err() {
			debug!("scheduler loop already exited");
		}
	}

	fn insert(&self, entry: Entry<Z>) {
		if self.add_tx.send(entry).is_err() {
			debug!("scheduler loop has exited, entry discarded");
		}
	}
}

impl<Z> fmt::Debug for SchedulerHandle<Z>
where
	Z: TimeZone,
{
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SchedulerHandle").finish_non_exhaustive()
	}
}

/// The loop-owned half of the scheduler: entry table, capabilities, and
/// the receiving ends of the control channels.
struct Core<Z>
where
	Z: TimeZone,
{
	tz: Z,
	table: HashMap<String, Entry<Z>>,
	handler: Option<ResultHandler>,
	sink: Arc<dyn ErrorSink>,
	add_rx: Receiver<Entry<Z>>,
	remove_rx: Receiver<String>,
	snapshot_rx: Receiver<Sender<Vec<Entry<Z>>>>,
	stop_rx: Receiver<()>,
}

impl<Z> Core<Z>
where
	Z: TimeZone + Send + Sync + 'static,
	Z::Offset: Send,
{
	fn now(&self) -> DateTime<Z> {
		Utc::now().with_timezone(&self.tz)
	}

	/// The dispatch loop.  Exits on a stop request, or when every handle
	/// has been dropped.
	fn run(&mut self) {
		info!("scheduler started");
		let add_rx = self.add_rx.clone();
		let remove_rx = self.remove_rx.clone();
		let snapshot_rx = self.snapshot_rx.clone();
		let stop_rx = self.stop_rx.clone();

		let mut now = self.now();
		for entry in self.table.values_mut() {
			entry.arm(&now);
		}

		loop {
			let order = self.ordering();
			let wait = match order
				.first()
				.and_then(|id| self.table.get(id))
				.and_then(Entry::next)
			{
				Some(next) => next
					.clone()
					.signed_duration_since(&now)
					.to_std()
					.unwrap_or(Duration::ZERO),
				None => IDLE,
			};
			let timer = after(wait);

			// Serve snapshots without re-arming; anything else changes
			// what the timer should be, so fall out and rebuild.
			'armed: loop {
				select! {
					recv(timer) -> _ => {
						now = self.now();
						self.dispatch_due(&order, &now);
						break 'armed;
					}
					recv(add_rx) -> msg => {
						let Ok(mut entry) = msg else {
							debug!("all handles dropped, scheduler shutting down");
							return;
						};
						now = self.now();
						entry.arm(&now);
						debug!(job_id = %entry.id(), "entry added");
						self.table.insert(entry.id().to_string(), entry);
						break 'armed;
					}
					recv(remove_rx) -> msg => {
						let Ok(id) = msg else {
							debug!("all handles dropped, scheduler shutting down");
							return;
						};
						now = self.now();
						if self.table.remove(&id).is_some() {
							debug!(job_id = %id, "entry removed");
						}
						break 'armed;
					}
					recv(snapshot_rx) -> msg => {
						let Ok(reply) = msg else {
							debug!("all handles dropped, scheduler shutting down");
							return;
						};
						if reply.send(self.snapshot()).is_err() {
							debug!("snapshot requester went away");
						}
					}
					recv(stop_rx) -> msg => {
						if msg.is_ok() {
							info!("scheduler stopped");
						} else {
							debug!("all handles dropped, scheduler shutting down");
						}
						return;
					}
				}
			}
		}
	}

	/// Fire every due entry, walking the sorted order from the front.
	fn dispatch_due(&mut self, order: &[String], now: &DateTime<Z>) {
		for id in order {
			let Some(entry) = self.table.get_mut(id) else {
				continue;
			};
			if !entry.due(now) {
				break;
			}
			debug!(job_id = %id, "dispatching job");
			runner::dispatch(
				Arc::clone(entry.job()),
				self.handler.clone(),
				Arc::clone(&self.sink),
			);
			entry.advance(now);
		}
	}

	/// Rebuild the dispatch order from the table: soonest first,
	/// never-due entries last.
	fn ordering(&self) -> Vec<String> {
		let mut entries: Vec<&Entry<Z>> = self.table.values().collect();
		entries.sort_by(|a, b| Entry::by_next_time(a, b));
		entries
			.into_iter()
			.map(|entry| entry.id().to_string())
			.collect()
	}

	/// Clone the table into a sorted, caller-owned copy.
	fn snapshot(&self) -> Vec<Entry<Z>> {
		let mut entries: Vec<Entry<Z>> = self.table.values().cloned().collect();
		entries.sort_by(|a, b| Entry::by_next_time(a, b));
		entries
	}
}
