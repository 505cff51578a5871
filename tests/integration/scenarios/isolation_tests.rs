use crate::integration::infrastructure::*;
use anyhow::Result;
use nix::sys::signal::{kill, Signal};
use std::time::Duration;

#[tokio::test]
async fn test_timeouts_fail_and_leave_nothing_behind() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("timeout", &[]).await?;

    assert_summary(&run, Summary { run: 3, passed: 1, failed: 2, ..Default::default() });
    assert_result(&run, "sleeps past timeout", "FAILED: Timed out");
    // A timeout is a failure even for a test expected to fail
    assert_result(&run, "expected failure that times out", "FAILED: Timed out");
    assert_result(&run, "finishes in time", "PASSED");

    // The sleeping tests were killed, not waited out
    assert!(run.elapsed < Duration::from_secs(20), "took {:?}", run.elapsed);
    assert_no_leftover_processes(&run);
    Ok(())
}

#[tokio::test]
async fn test_fatal_signals_are_errors() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("signal", &[]).await?;

    assert_summary(&run, Summary { run: 5, passed: 1, errored: 4, ..Default::default() });
    assert_result(&run, "aborts", "ERROR: Terminated by signal (6): SIGABRT");
    assert_result(&run, "killed", "ERROR: Terminated by signal (9): SIGKILL");
    assert_result(&run, "survives", "PASSED");

    // A crashing group process takes all of its tests with it
    assert!(run
        .stdout
        .contains("Group result: ERROR: Terminated by signal (6): SIGABRT"));
    assert_result(&run, "after aborted setup 1", "ERROR");
    assert_result(&run, "after aborted setup 2", "ERROR");
    assert_no_leftover_processes(&run);
    Ok(())
}

#[tokio::test]
async fn test_sigterm_tears_down_every_descendant() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let process = harness.start("hang").await?;
    let pgid = process.pid;

    // Give the runner time to fork the group and the hanging test
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(process_group_alive(pgid));

    kill(process.pid, Signal::SIGTERM)?;
    let (status, stdout) = process.wait_with_timeout(Duration::from_secs(10)).await?;

    assert_eq!(status.code(), Some(1), "status: {:?}", status);
    // An interrupted run reports nothing
    assert!(!stdout.contains("Test result (hangs)"));
    assert!(!stdout.contains("Tests run:"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!process_group_alive(pgid), "descendants survived SIGTERM");
    Ok(())
}

#[tokio::test]
async fn test_sigint_is_handled_like_sigterm() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let process = harness.start("hang").await?;
    let pgid = process.pid;

    tokio::time::sleep(Duration::from_millis(500)).await;
    kill(process.pid, Signal::SIGINT)?;
    let (status, _) = process.wait_with_timeout(Duration::from_secs(10)).await?;

    assert_eq!(status.code(), Some(1));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!process_group_alive(pgid));
    Ok(())
}

#[tokio::test]
async fn test_failed_patch_write_is_an_error() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("patch-failure", &[]).await?;

    assert_summary(&run, Summary { run: 2, passed: 1, errored: 1, ..Default::default() });
    assert_result(&run, "patched with unwritable slot", "ERROR: Failed to apply patches");
    // Killed while stopped, before its body could run
    assert!(!run.stdout.contains("patched body ran"));
    assert_result(&run, "after failed patch", "PASSED");
    assert_eq!(run.status.code(), Some(1));
    assert_no_leftover_processes(&run);
    Ok(())
}
