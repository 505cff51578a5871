use super::selftest_harness::{process_group_alive, SelftestRun, Summary};

/// Assert the closing summary matches exactly
pub fn assert_summary(run: &SelftestRun, expected: Summary) {
    let actual = run
        .summary()
        .unwrap_or_else(|e| panic!("{}\nstderr:\n{}", e, run.stderr));
    assert_eq!(actual, expected, "summary mismatch, full output:\n{}", run.stdout);
    assert_eq!(
        actual.run,
        actual.passed + actual.skipped + actual.failed + actual.errored,
        "every test must land in exactly one counter"
    );
}

/// Assert a test's result line starts with `expected` (e.g. "PASSED", "FAILED: Timed out")
pub fn assert_result(run: &SelftestRun, test: &str, expected: &str) {
    match run.result_of(test) {
        Some(result) => assert!(
            result.starts_with(expected),
            "'{}' reported '{}', expected '{}'",
            test,
            result,
            expected
        ),
        None => panic!("no result line for '{}' in:\n{}", test, run.stdout),
    }
}

/// Assert a test never produced a result line
pub fn assert_no_result(run: &SelftestRun, test: &str) {
    assert!(
        run.result_of(test).is_none(),
        "'{}' should not have run:\n{}",
        test,
        run.stdout
    );
}

/// Assert the exit status follows the failed + errored == 0 convention
pub fn assert_exit_matches_summary(run: &SelftestRun) {
    let summary = run.summary().expect("summary");
    let expected = if summary.failed + summary.errored == 0 { 0 } else { 1 };
    assert_eq!(run.status.code(), Some(expected), "exit status: {:?}", run.status);
}

/// Assert no process is left in the run's process group
pub fn assert_no_leftover_processes(run: &SelftestRun) {
    assert!(
        !process_group_alive(run.pgid),
        "processes left behind in group {}",
        run.pgid
    );
}
