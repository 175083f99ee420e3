//! An Entry binds one schedule to one job and tracks its activation times.

use crate::{Job, Schedule};
use chrono::{DateTime, TimeZone};
use std::{cmp::Ordering, sync::Arc};

/// One scheduled job, as filed in the scheduler's table.
///
/// The values handed out by [`Scheduler::entries`](crate::Scheduler::entries)
/// are clones: the schedule and job are shared immutably, the cached times
/// are copies, so holding one never blocks or mutates the scheduler.
#[derive(Debug, Clone)]
pub struct Entry<Z>
where
	Z: TimeZone,
{
	schedule: Arc<dyn Schedule<Z>>,
	job: Arc<dyn Job>,
	next: Option<DateTime<Z>>,
	prev: Option<DateTime<Z>>,
}

impl<Z> Entry<Z>
where
	Z: TimeZone,
{
	pub(crate) fn new(schedule: Arc<dyn Schedule<Z>>, job: Arc<dyn Job>) -> Self {
		Self {
			schedule,
			job,
			next: None,
			prev: None,
		}
	}

	/// Identifier of the bound job.
	#[must_use]
	pub fn id(&self) -> &str {
		self.job.id()
	}

	/// The recurrence rule this entry runs under.
	#[must_use]
	pub fn schedule(&self) -> &Arc<dyn Schedule<Z>> {
		&self.schedule
	}

	/// The bound job.
	#[must_use]
	pub fn job(&self) -> &Arc<dyn Job> {
		&self.job
	}

	/// When this entry next fires.  `None` before the scheduler starts, or
	/// when the rule can never fire again.
	#[must_use]
	pub fn next(&self) -> Option<&DateTime<Z>> {
		self.next.as_ref()
	}

	/// When this entry last fired, if it has.
	#[must_use]
	pub fn prev(&self) -> Option<&DateTime<Z>> {
		self.prev.as_ref()
	}

	/// Compute the first activation after `now`.
	pub(crate) fn arm(&mut self, now: &DateTime<Z>) {
		self.next = self.schedule.next(now);
	}

	/// Record a dispatch and compute the following activation.
	pub(crate) fn advance(&mut self, now: &DateTime<Z>) {
		self.prev = self.next.take();
		self.next = self.schedule.next(now);
	}

	/// Whether this entry should fire at `now`.
	pub(crate) fn due(&self, now: &DateTime<Z>) -> bool {
		self.next.as_ref().is_some_and(|next| next <= now)
	}

	/// Ordering for the dispatch queue: soonest first, entries that can
	/// never fire again last.
	pub(crate) fn by_next_time(a: &Self, b: &Self) -> Ordering {
		match (&a.next, &b.next) {
			(Some(x), Some(y)) => x.cmp(y),
			(Some(_), None) => Ordering::Less,
			(None, Some(_)) => Ordering::Greater,
			(None, None) => Ordering::Equal,
		}
	}
}
