#![cfg(all(
    target_os = "linux",
    target_env = "gnu",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]

use crate::integration::infrastructure::*;
use anyhow::Result;

#[tokio::test]
async fn test_patched_calls_reach_the_replacement() -> Result<()> {
    let harness = SelftestHarness::new()?;
    let run = harness.run("monkeypatch", &[]).await?;

    assert_summary(&run, Summary { run: 7, passed: 7, ..Default::default() });
    assert_result(&run, "sees replacement", "PASSED");
    assert_result(&run, "calls original", "PASSED");

    // Groups without an active patch see the real function
    assert_result(&run, "filtered out image keeps original", "PASSED");
    assert_result(&run, "unrelated group keeps original", "PASSED");

    assert_result(&run, "duplicate patch rejected", "PASSED");
    assert_result(&run, "unknown function rejected", "PASSED");
    assert_result(&run, "no original for unpatched function", "PASSED");
    assert_eq!(run.status.code(), Some(0));
    assert_no_leftover_processes(&run);
    Ok(())
}
