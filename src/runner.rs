//! Crash-isolated execution of dispatched jobs.
//!
//! Every dispatch gets its own thread, so one job's latency or failure
//! never delays the scheduler loop or other jobs.  Panics are caught at
//! the thread boundary and reported to the configured [`ErrorSink`];
//! normal completions become [`JobResult`]s for the result handler.

use crate::{Job, JobResult};
use std::{
	any::Any,
	backtrace::Backtrace,
	fmt,
	panic::{self, AssertUnwindSafe},
	sync::Arc,
	thread,
};
use tracing::{debug, error};

/// Shared closure invoked with each completed run's [`JobResult`].
pub(crate) type ResultHandler = Arc<dyn Fn(JobResult) + Send + Sync>;

/// What the scheduler knows about a job that panicked.
#[derive(Debug)]
pub struct PanicReport {
	/// Identifier of the job whose run panicked.
	pub job_id: String,
	/// The panic payload, if it was a string.
	pub message: String,
	/// Backtrace captured at the recovery point.
	pub backtrace: Backtrace,
}

impl PanicReport {
	fn new(job_id: &str, payload: &(dyn Any + Send)) -> Self {
		let message = if let Some(text) = payload.downcast_ref::<&str>() {
			(*text).to_string()
		} else if let Some(text) = payload.downcast_ref::<String>() {
			text.clone()
		} else {
			"non-string panic payload".to_string()
		};
		Self {
			job_id: job_id.to_string(),
			message,
			backtrace: Backtrace::force_capture(),
		}
	}
}

impl fmt::Display for PanicReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "job {} panicked: {}", self.job_id, self.message)
	}
}

/// Receives faults the scheduler cannot surface synchronously.
pub trait ErrorSink: Send + Sync + fmt::Debug {
	/// A job's run panicked; the panic was suppressed.
	fn job_panicked(&self, report: PanicReport);
}

/// The default sink: structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
	fn job_panicked(&self, report: PanicReport) {
		error!(
			job_id = %report.job_id,
			backtrace = %report.backtrace,
			"job panicked: {}",
			report.message
		);
	}
}

/// Run one job on its own thread, catching panics at the boundary.
///
/// A run that returns normally produces a [`JobResult`]; a run that
/// panics produces a report for the sink and nothing else.
pub(crate) fn dispatch(job: Arc<dyn Job>, handler: Option<ResultHandler>, sink: Arc<dyn ErrorSink>) {
	thread::spawn(move || {
		match panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
			Ok(outcome) => deliver(JobResult::new(&job, outcome), handler),
			Err(payload) => sink.job_panicked(PanicReport::new(job.id(), payload.as_ref())),
		}
	});
}

/// Hand a completed run's result to the handler on its own thread, so a
/// slow handler cannot stall anything.
fn deliver(result: JobResult, handler: Option<ResultHandler>) {
	let Some(handler) = handler else {
		debug!(job_id = %result.job_id, "no result handler registered, dropping result");
		return;
	};
	thread::spawn(move || handler(result));
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::FuncJob;
	use crossbeam_channel::{unbounded, Sender};
	use pretty_assertions::assert_eq;
	use std::time::Duration;

	#[derive(Debug, Clone)]
	struct ChannelSink(Sender<PanicReport>);

	impl ErrorSink for ChannelSink {
		fn job_panicked(&self, report: PanicReport) {
			let _ = self.0.send(report);
		}
	}

	fn handler_pair() -> (ResultHandler, crossbeam_channel::Receiver<JobResult>) {
		let (tx, rx) = unbounded();
		let handler: ResultHandler = Arc::new(move |result| {
			let _ = tx.send(result);
		});
		(handler, rx)
	}

	#[test]
	fn test_success_reaches_handler() {
		let (handler, results) = handler_pair();
		let (sink_tx, _sink_rx) = unbounded();
		let job: Arc<dyn Job> = Arc::new(FuncJob::with_id("ok", || Ok("done".to_string())));

		dispatch(job, Some(handler), Arc::new(ChannelSink(sink_tx)));

		let result = results.recv_timeout(Duration::from_secs(2)).unwrap();
		assert_eq!(result.job_id, "ok");
		assert_eq!(result.message, "done");
		assert!(result.is_success());
	}

	#[test]
	fn test_failure_reaches_handler_as_error() {
		let (handler, results) = handler_pair();
		let (sink_tx, sink_rx) = unbounded();
		let job: Arc<dyn Job> = Arc::new(FuncJob::with_id("sad", || Err("broken".into())));

		dispatch(job, Some(handler), Arc::new(ChannelSink(sink_tx)));

		let result = results.recv_timeout(Duration::from_secs(2)).unwrap();
		assert_eq!(result.job_id, "sad");
		assert!(!result.is_success());
		assert_eq!(result.error.unwrap().to_string(), "broken");
		// An application-level error is not a fault.
		assert!(sink_rx.try_recv().is_err());
	}

	#[test]
	fn test_panic_reaches_sink_not_handler() {
		let (handler, results) = handler_pair();
		let (sink_tx, sink_rx) = unbounded();
		let job: Arc<dyn Job> = Arc::new(FuncJob::with_id("boom", || panic!("kaboom")));

		dispatch(job, Some(handler), Arc::new(ChannelSink(sink_tx)));

		let report = sink_rx.recv_timeout(Duration::from_secs(2)).unwrap();
		assert_eq!(report.job_id, "boom");
		assert_eq!(report.message, "kaboom");
		assert!(results.try_recv().is_err());
	}

	#[test]
	fn test_owned_string_panic_payload() {
		let (sink_tx, sink_rx) = unbounded();
		let job: Arc<dyn Job> = Arc::new(FuncJob::with_id("fmt", || {
			panic!("code {}", 7);
		}));

		dispatch(job, None, Arc::new(ChannelSink(sink_tx)));

		let report = sink_rx.recv_timeout(Duration::from_secs(2)).unwrap();
		assert_eq!(report.message, "code 7");
	}

	#[test]
	fn test_no_handler_is_a_quiet_noop() {
		let (sink_tx, sink_rx) = unbounded();
		let job: Arc<dyn Job> = Arc::new(FuncJob::with_id("quiet", || Ok(String::new())));

		dispatch(job, None, Arc::new(ChannelSink(sink_tx)));

		// Nothing fails and nothing reaches the sink.
		assert!(sink_rx.recv_timeout(Duration::from_millis(200)).is_err());
	}
}
