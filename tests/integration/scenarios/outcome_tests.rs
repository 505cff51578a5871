use crate::integration::infrastructure::*;
use anyhow::Result;

#[tokio::test]
async fn test_basic_suite_passes() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("basic", &[]).await?;

    assert_summary(
        &run,
        Summary { run: 4, passed: 3, skipped: 1, ..Default::default() },
    );
    assert_result(&run, "passing", "PASSED");
    assert_result(&run, "skipped", "SKIPPED");
    assert_result(&run, "checks", "PASSED");
    assert_result(&run, "reads group context", "PASSED");
    assert_exit_matches_summary(&run);
    assert_eq!(run.status.code(), Some(0));

    // Passing and skipped tests keep their output to themselves
    assert!(!run.stdout.contains("stdout of a passing test"));
    assert!(!run.stdout.contains("stdout of a skipped test"));
    assert!(!run.stdout.contains("hidden unless verbose"));
    assert_no_leftover_processes(&run);
    Ok(())
}

#[tokio::test]
async fn test_failures_are_counted_and_shown() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("failures", &[]).await?;

    assert_summary(
        &run,
        Summary { run: 6, passed: 1, failed: 3, errored: 2, ..Default::default() },
    );
    assert_result(&run, "failing check", "FAILED");
    assert_result(&run, "explicit fail", "FAILED");
    assert_result(&run, "explicit error", "ERROR");
    assert_result(&run, "panics", "FAILED");
    assert_result(&run, "unknown exit code", "ERROR");
    assert_result(&run, "passes", "PASSED");
    assert_eq!(run.status.code(), Some(1));

    // Output of failing tests is dumped: log first, then labelled streams
    assert!(run.stdout.contains("[ERROR] Assertion failed: 1 > 2"));
    assert!(run.stdout.contains("-------- stdout --------\nvisible on failure"));
    assert!(run.stdout.contains("[ERROR] giving up"));
    assert!(run.stdout.contains("-------- stderr --------"));
    assert!(run.stdout.contains("boom"));
    Ok(())
}

#[tokio::test]
async fn test_xfail_inverts_pass_and_fail_only() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("xfail", &[]).await?;

    assert_summary(
        &run,
        Summary { run: 4, passed: 1, skipped: 1, failed: 1, errored: 1 },
    );
    assert_result(&run, "expected failure that fails", "XFAILED");
    assert_result(&run, "expected failure that passes", "XPASSED");
    assert_result(&run, "expected failure that errors", "ERROR");
    assert_result(&run, "expected failure that skips", "SKIPPED");
    assert_exit_matches_summary(&run);
    Ok(())
}

#[tokio::test]
async fn test_verbose_shows_everything() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("verbose", &[]).await?;

    assert_summary(
        &run,
        Summary { run: 4, passed: 3, skipped: 1, ..Default::default() },
    );
    assert!(run.stdout.contains("[INFO] This is a log message"));
    assert!(run.stdout.contains("[INFO] This test will be skipped"));
    assert!(run.stdout.contains("-------- stdout --------\nThis is stdout"));
    assert!(run.stdout.contains("-------- stderr --------\nThis is stderr"));
    assert!(run.stdout.contains("-------- group --------"));
    assert!(run.stdout.contains("[INFO] group setup ran"));
    assert_eq!(run.status.code(), Some(0));
    Ok(())
}

#[tokio::test]
async fn test_verbose_flag_from_command_line() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("basic", &["--verbose"]).await?;

    assert_summary(
        &run,
        Summary { run: 4, passed: 3, skipped: 1, ..Default::default() },
    );
    assert!(run.stdout.contains("stdout of a passing test"));
    assert!(run.stdout.contains("[INFO] hidden unless verbose"));
    Ok(())
}

#[tokio::test]
async fn test_empty_runner_succeeds() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("empty", &[]).await?;

    assert_summary(&run, Summary::default());
    assert!(!run.stdout.contains("Test result"));
    assert_eq!(run.status.code(), Some(0));
    Ok(())
}

#[tokio::test]
async fn test_missing_capture_dir_is_rejected() -> Result<()> {
    let harness = SelftestHarness::new()?.with_capture_dir("/nonexistent/forktest/captures");
    let run = harness.run("basic", &[]).await?;

    assert_ne!(run.status.code(), Some(0));
    assert!(run.stderr.contains("Capture directory"));
    assert!(!run.stdout.contains("Test result"));
    Ok(())
}
