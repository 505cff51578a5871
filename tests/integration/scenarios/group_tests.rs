use crate::integration::infrastructure::*;
use anyhow::Result;

#[tokio::test]
async fn test_group_contexts_and_setup_outcomes() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("context", &[]).await?;

    assert_summary(
        &run,
        Summary { run: 8, passed: 3, skipped: 2, errored: 3, ..Default::default() },
    );
    assert_result(&run, "uses global context", "PASSED");

    // Both tests drain one pipe filled once by group setup, in order
    assert_result(&run, "read from pipe 1", "PASSED");
    assert_result(&run, "read from pipe 2", "PASSED");

    assert_result(&run, "skip me 1", "SKIPPED");
    assert_result(&run, "skip me 2", "SKIPPED");
    assert!(run.stdout.contains("Group result: SKIP"));

    assert_result(&run, "error setup fail 1", "ERROR");
    assert_result(&run, "error setup fail 2", "ERROR");
    assert!(run.stdout.contains("-------- group --------"));
    assert!(run.stdout.contains("[ERROR] Failing in group setup."));

    assert_result(&run, "after panicking setup", "ERROR");
    assert!(run.stdout.contains("setup panicked"));

    assert_eq!(run.status.code(), Some(1));
    assert_no_leftover_processes(&run);
    Ok(())
}

#[tokio::test]
async fn test_fail_fast_stops_at_first_failure() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("fail-fast", &[]).await?;

    assert_summary(&run, Summary { run: 1, failed: 1, ..Default::default() });
    assert_result(&run, "gonna fail", "FAILED");
    assert_no_result(&run, "never gonna run");
    assert_no_result(&run, "later group never runs");
    assert_exit_matches_summary(&run);
    Ok(())
}

#[tokio::test]
async fn test_fail_fast_flag_from_command_line() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("failures", &["--fail-fast"]).await?;

    assert_summary(&run, Summary { run: 1, failed: 1, ..Default::default() });
    assert_result(&run, "failing check", "FAILED");
    assert_no_result(&run, "passes");
    Ok(())
}

#[tokio::test]
async fn test_without_fail_fast_every_group_runs() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("context", &[]).await?;

    // Errored groups do not stop the groups registered after them
    let summary = run.summary()?;
    assert_eq!(summary.run, 8);
    assert!(run.result_of("after panicking setup").is_some());
    Ok(())
}

#[tokio::test]
async fn test_cleanup_failure_keeps_one_line_per_test() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("cleanup", &[]).await?;

    // The tests ran and passed, then cleanup failed them as a group
    assert_summary(&run, Summary { run: 3, passed: 1, failed: 2, ..Default::default() });
    for name in ["before broken cleanup 1", "before broken cleanup 2"] {
        assert_result(&run, name, "PASSED");
        let lines = run
            .stdout
            .matches(&format!("Test result ({}): ", name))
            .count();
        assert_eq!(lines, 1, "'{}' reported more than once:\n{}", name, run.stdout);
    }
    assert!(run.stdout.contains("Group result: FAILED: Failed in group cleanup"));
    assert!(run.stdout.contains("[ERROR] cleanup broke"));

    assert_result(&run, "after broken cleanup", "PASSED");
    assert_exit_matches_summary(&run);
    assert_no_leftover_processes(&run);
    Ok(())
}
