use bentley::*;
use serial_test::serial;

#[test]
fn test_basic_logging_functions() {
  // Test that basic logging functions can be called without panicking
  info("Test info message");
  warn("Test warning message");
  error("Test error message");
  debug("Test debug message");
  verbose("Test verbose message");
  success("Test success message");
}

#[test]
fn test_multiline_messages() {
  let multiline_msg = "First line\nSecond line\nThird line";
  info(multiline_msg);
  warn(multiline_msg);
  error(multiline_msg);
  debug(multiline_msg);
  success(multiline_msg);
}

#[test]
fn test_lines_splits_on_newlines() {
  let collected: Vec<&str> = lines("alpha\nbeta\n\ngamma").collect();
  assert_eq!(collected, vec!["alpha", "beta", "", "gamma"]);
}

#[test]
fn test_macros_accept_borrowed_strings() {
  let count = 3;
  bentley::info!(&format!("stored {count} entries"));
  bentley::warn!("collection missing");
  bentley::error!(&format!("query failed\ncause: {}", "timeout"));
  bentley::verbose!("per-query detail");
  bentley::debug!("debug detail");
  bentley::success!("done");
}

#[test]
fn test_default_directives_quiet_noisy_dependencies() {
  let quiet = default_directives(false);
  assert!(quiet.contains("nvision=info"));
  assert!(quiet.contains("lance=error"));
  assert!(quiet.ends_with("warn"));

  let loud = default_directives(true);
  assert!(loud.starts_with("trace"));
  assert!(loud.contains("lance=warn"));
}

#[test]
#[serial]
fn test_init_only_installs_once() {
  std::env::remove_var("RUST_LOG");
  let first = init(false);
  let second = init(true);
  // Another test binary may have installed a subscriber first; either way the
  // second call can never succeed.
  assert!(!second);
  let _ = first;
}
