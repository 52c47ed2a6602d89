//! Helpers shared by the integration tests.

use std::{env, process::Command};

/// Names the single test a re-invoked test binary should run in-process.
const ISOLATED_TEST: &str = "TRYSTACK_ISOLATED_TEST";

/// Runs `body` in a child copy of the test binary and returns the child's stderr.
///
/// `test_name` must be the name of the calling test. The child runs only that
/// test, which executes `body`; the parent asserts that the child aborted
/// instead of exiting normally.
pub fn run_aborting(test_name: &str, body: impl FnOnce()) -> String {
    if env::var(ISOLATED_TEST).is_ok_and(|name| name == test_name) {
        body();
        // a clean exit makes the parent's assertion fail
        std::process::exit(0);
    }

    let output = Command::new(env::current_exe().unwrap())
        .args([test_name, "--exact", "--nocapture", "--test-threads=1"])
        .env(ISOLATED_TEST, test_name)
        .output()
        .unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    assert!(
        !output.status.success(),
        "{test_name} exited normally: {:?}\n{stderr}",
        output.status
    );
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // SIGABRT
        assert_eq!(output.status.signal(), Some(6), "{test_name} did not abort:\n{stderr}");
    }
    stderr
}
