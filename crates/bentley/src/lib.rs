//! ## Features
//!
//! - Standard logging levels (info, warn, error, debug, verbose, success)
//! - Multi-line message support, one event per line
//! - Events are emitted through `tracing`, so the calling module is the event target
//! - `init()` installs a stderr subscriber with an `EnvFilter` tuned for vector-store noise
//!
//! ## Usage
//!
//! Call `bentley::init(verbose)` once at process start, then log with the macros:
//! `bentley::info!(&format!("stored {count} entries"))`.

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[doc(hidden)]
pub use tracing as __tracing;

/// Directives used when neither `RUST_LOG` nor an explicit filter is supplied
pub fn default_directives(verbose: bool) -> &'static str {
  if verbose {
    "trace,lance=warn,lance_datafusion=warn,datafusion=warn,ort=warn,hyper=warn,reqwest=warn"
  } else {
    "nvision=info,bentley=info,lance=error,lance_datafusion=error,datafusion=error,ort=error,warn"
  }
}

/// Build the filter: `RUST_LOG` wins, otherwise the built-in directives
pub fn build_filter(verbose: bool) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)))
}

/// Install the global subscriber. Returns false if one was already installed.
pub fn init(verbose: bool) -> bool {
  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
    .with(build_filter(verbose))
    .try_init()
    .is_ok()
}

/// Split a message into the lines that become individual events
pub fn lines(message: &str) -> std::str::Lines<'_> {
  message.lines()
}

pub fn verbose(message: &str) {
  for line in lines(message) {
    tracing::trace!(target: "bentley", "{line}");
  }
}

/// Info level logging - general information
pub fn info(message: &str) {
  for line in lines(message) {
    tracing::info!(target: "bentley", "{line}");
  }
}

/// Warning level logging - something needs attention
pub fn warn(message: &str) {
  for line in lines(message) {
    tracing::warn!(target: "bentley", "{line}");
  }
}

/// Error level logging - something went wrong
pub fn error(message: &str) {
  for line in lines(message) {
    tracing::error!(target: "bentley", "{line}");
  }
}

/// Debug level logging - detailed diagnostic information
pub fn debug(message: &str) {
  for line in lines(message) {
    tracing::debug!(target: "bentley", "{line}");
  }
}

/// Success level logging - something completed successfully
pub fn success(message: &str) {
  for line in lines(message) {
    tracing::info!(target: "bentley", outcome = "success", "{line}");
  }
}

/// Macros for coverage-excluded logging - these expand with LCOV_EXCL_LINE at call sites
#[macro_export]
macro_rules! info {
  ($msg:expr) => {
    for line in $crate::lines($msg) {
      $crate::__tracing::info!("{}", line); // LCOV_EXCL_LINE
    }
  };
}

#[macro_export]
macro_rules! warn {
  ($msg:expr) => {
    for line in $crate::lines($msg) {
      $crate::__tracing::warn!("{}", line); // LCOV_EXCL_LINE
    }
  };
}

#[macro_export]
macro_rules! error {
  ($msg:expr) => {
    for line in $crate::lines($msg) {
      $crate::__tracing::error!("{}", line); // LCOV_EXCL_LINE
    }
  };
}

#[macro_export]
macro_rules! verbose {
  ($msg:expr) => {
    for line in $crate::lines($msg) {
      $crate::__tracing::trace!("{}", line); // LCOV_EXCL_LINE
    }
  };
}

#[macro_export]
macro_rules! debug {
  ($msg:expr) => {
    for line in $crate::lines($msg) {
      $crate::__tracing::debug!("{}", line); // LCOV_EXCL_LINE
    }
  };
}

#[macro_export]
macro_rules! success {
  ($msg:expr) => {
    for line in $crate::lines($msg) {
      $crate::__tracing::info!(outcome = "success", "{}", line); // LCOV_EXCL_LINE
    }
  };
}
