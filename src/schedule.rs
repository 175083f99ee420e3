//! Recurrence rules: given a point in time, when does a job run next?

use crate::{Error, Result};
use chrono::{DateTime, Duration, TimeZone, Timelike};
use regex::Regex;
use std::{
	fmt,
	str::FromStr,
	sync::{Arc, LazyLock},
};

// Fields of an `@every` duration, e.g. `1h30m`, `90s`, `500ms`.  Bounded
// digit counts keep the arithmetic below comfortably in range.
static EVERY_RE: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(r"^(?:(\d{1,6})h)?(?:(\d{1,6})m)?(?:(\d{1,6})s)?(?:(\d{1,6})ms)?$").unwrap()
});

/// A recurrence rule, able to say when it next fires.
pub trait Schedule<Z: TimeZone>: Send + Sync + fmt::Debug {
	/// The next activation time strictly after `after`, or `None` if the
	/// rule can never fire again.
	fn next(&self, after: &DateTime<Z>) -> Option<DateTime<Z>>;
}

impl<Z, S> Schedule<Z> for Arc<S>
where
	Z: TimeZone,
	S: Schedule<Z> + ?Sized,
{
	fn next(&self, after: &DateTime<Z>) -> Option<DateTime<Z>> {
		(**self).next(after)
	}
}

/// Fires at a fixed interval, starting one interval from now.
///
/// Intervals are truncated to whole seconds and anything shorter than a
/// second is rounded up to one, so activation times always land on a
/// second boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantDelay {
	delay: Duration,
}

impl ConstantDelay {
	#[must_use]
	pub fn new(delay: Duration) -> Self {
		let delay = if delay < Duration::seconds(1) {
			Duration::seconds(1)
		} else {
			Duration::seconds(delay.num_seconds())
		};
		Self { delay }
	}
}

impl<Z: TimeZone> Schedule<Z> for ConstantDelay {
	fn next(&self, after: &DateTime<Z>) -> Option<DateTime<Z>> {
		// Shave the sub-second part of `after` so the result is on a
		// whole second.
		let delay = self.delay - Duration::nanoseconds(i64::from(after.nanosecond()));
		after.clone().checked_add_signed(delay)
	}
}

/// Convenience function wrapping [`ConstantDelay::new`].
///
/// E.g.: `scheduler.schedule(every(Duration::seconds(30)), job)`
#[inline]
#[must_use]
pub fn every(delay: Duration) -> ConstantDelay {
	ConstantDelay::new(delay)
}

/// A rule described by a cron expression.
///
/// Expressions use the six- or seven-field form with a leading seconds
/// field, plus the `@hourly`-style shorthands.
#[derive(Debug, Clone)]
#[allow(clippy::module_name_repetitions)]
pub struct CronSchedule {
	inner: cron::Schedule,
}

impl CronSchedule {
	/// Parse a cron expression.
	///
	/// # Errors
	///
	/// Returns an error if the expression is not valid cron syntax.
	pub fn new(expression: &str) -> Result<Self> {
		Ok(Self {
			inner: cron::Schedule::from_str(expression)?,
		})
	}
}

impl<Z: TimeZone> Schedule<Z> for CronSchedule {
	fn next(&self, after: &DateTime<Z>) -> Option<DateTime<Z>> {
		self.inner.after(after).next()
	}
}

/// Turn a schedule expression into a ready-to-use rule.
///
/// `@every <duration>` gives a fixed-interval rule; anything else is
/// treated as a cron expression:
/// ```rust
/// # use tempo::parse;
/// # use chrono::Utc;
/// # fn main() -> tempo::Result<()> {
/// let half_hourly = parse::<Utc>("@every 30m")?;
/// let work_mornings = parse::<Utc>("0 30 9 * * Mon-Fri")?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if the expression is neither a well-formed `@every`
/// duration nor valid cron syntax; nothing is scheduled in that case.
pub fn parse<Z>(expression: &str) -> Result<Arc<dyn Schedule<Z>>>
where
	Z: TimeZone + 'static,
{
	if let Some(text) = expression.strip_prefix("@every ") {
		return Ok(Arc::new(parse_every(text)?));
	}
	Ok(Arc::new(CronSchedule::new(expression)?))
}

/// Parse the duration part of an `@every` expression.
fn parse_every(text: &str) -> Result<ConstantDelay> {
	let format_error = || Error::EveryFormat(text.to_string());
	let caps = EVERY_RE.captures(text).ok_or_else(format_error)?;
	if caps.iter().skip(1).all(|group| group.is_none()) {
		return Err(format_error());
	}
	let field = |index: usize| -> Result<i64> {
		caps.get(index)
			.map_or(Ok(0), |m| m.as_str().parse().map_err(|_| format_error()))
	};
	let delay = Duration::hours(field(1)?)
		+ Duration::minutes(field(2)?)
		+ Duration::seconds(field(3)?)
		+ Duration::milliseconds(field(4)?);
	Ok(ConstantDelay::new(delay))
}
