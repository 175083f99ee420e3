//! This module defines the error type and Result alias.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	/// The expression was not valid cron syntax.
	#[error(transparent)]
	Expression(#[from] cron::error::Error),
	/// An `@every` duration outside the `1h2m3s4ms` form.
	#[error("invalid @every duration {0:?} (valid forms are e.g. `90s`, `1h30m`, `500ms`)")]
	EveryFormat(String),
}

pub type Result<T> = std::result::Result<T, Error>;
