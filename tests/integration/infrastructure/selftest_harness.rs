use anyhow::{anyhow, bail, Context, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::timeout;

/// Upper bound for any single suite run.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(60);

/// Spawns `forktest-selftest` in its own process group with a private
/// capture directory.
pub struct SelftestHarness {
    binary: PathBuf,
    capture_dir: PathBuf,
    _temp_dir: TempDir,
}

impl SelftestHarness {
    pub fn new() -> Result<Self> {
        let binary = PathBuf::from(env!("CARGO_BIN_EXE_forktest-selftest"));
        let temp_dir = TempDir::new().context("Failed to create capture directory")?;
        Ok(Self {
            binary,
            capture_dir: temp_dir.path().to_path_buf(),
            _temp_dir: temp_dir,
        })
    }

    /// Points `--capture-dir` somewhere else
    pub fn with_capture_dir(mut self, capture_dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = capture_dir.into();
        self
    }

    fn command(&self, suite: &str, extra_args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg(suite)
            .arg("--color")
            .arg("never")
            .arg("--capture-dir")
            .arg(&self.capture_dir)
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // The runner signals its whole process group on termination
        cmd.process_group(0);
        cmd
    }

    /// Runs a suite to completion and collects its output.
    pub async fn run(&self, suite: &str, extra_args: &[&str]) -> Result<SelftestRun> {
        let start = Instant::now();
        let child = self
            .command(suite, extra_args)
            .spawn()
            .context("Failed to spawn forktest-selftest")?;
        let pgid = child_pid(&child)?;

        let output = timeout(RUN_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("{} suite did not finish within {:?}", suite, RUN_TIMEOUT))?
            .context("Failed to wait for forktest-selftest")?;

        Ok(SelftestRun {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: start.elapsed(),
            pgid,
        })
    }

    /// Starts a suite and returns once it has printed its banner.
    pub async fn start(&self, suite: &str) -> Result<SelftestProcess> {
        let mut child = self
            .command(suite, &[])
            .spawn()
            .context("Failed to spawn forktest-selftest")?;
        let pid = child_pid(&child)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not captured"))?;

        let mut process = SelftestProcess {
            pid,
            child,
            stdout: BufReader::new(stdout),
            seen: String::new(),
        };
        let banner = format!("Running {} suite", suite);
        timeout(Duration::from_secs(10), process.read_until(&banner))
            .await
            .map_err(|_| anyhow!("{} suite never printed its banner", suite))??;
        Ok(process)
    }
}

fn child_pid(child: &Child) -> Result<Pid> {
    let id = child.id().ok_or_else(|| anyhow!("Failed to get child PID"))?;
    Ok(Pid::from_raw(id as i32))
}

/// True while any process is left in the group led by `pgid`.
pub fn process_group_alive(pgid: Pid) -> bool {
    !matches!(kill(Pid::from_raw(-pgid.as_raw()), None), Err(Errno::ESRCH))
}

/// A finished suite run.
#[derive(Debug)]
pub struct SelftestRun {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub pgid: Pid,
}

/// The four counters and total from the closing summary block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Summary {
    pub run: u32,
    pub passed: u32,
    pub skipped: u32,
    pub failed: u32,
    pub errored: u32,
}

impl SelftestRun {
    pub fn summary(&self) -> Result<Summary> {
        let field = |label: &str| -> Result<u32> {
            let prefix = format!("{}: ", label);
            let line = self
                .stdout
                .lines()
                .rev()
                .find(|line| line.starts_with(&prefix))
                .ok_or_else(|| anyhow!("no '{}' line in output:\n{}", label, self.stdout))?;
            line[prefix.len()..]
                .trim()
                .parse()
                .with_context(|| format!("bad '{}' line: {}", label, line))
        };

        Ok(Summary {
            run: field("Tests run")?,
            passed: field("Passed")?,
            skipped: field("Skipped")?,
            failed: field("Failed")?,
            errored: field("Errored")?,
        })
    }

    /// What follows `Test result (<name>): ` on the test's result line.
    pub fn result_of(&self, name: &str) -> Option<&str> {
        let prefix = format!("Test result ({}): ", name);
        self.stdout
            .lines()
            .find_map(|line| line.strip_prefix(prefix.as_str()))
    }
}

/// A suite still running, for signal delivery.
pub struct SelftestProcess {
    pub pid: Pid,
    child: Child,
    stdout: BufReader<ChildStdout>,
    seen: String,
}

impl SelftestProcess {
    async fn read_until(&mut self, needle: &str) -> Result<()> {
        let mut line = String::new();
        while !self.seen.contains(needle) {
            line.clear();
            if self.stdout.read_line(&mut line).await? == 0 {
                bail!("stdout closed before '{}':\n{}", needle, self.seen);
            }
            self.seen.push_str(&line);
        }
        Ok(())
    }

    /// Waits for exit, returning the status and everything printed on stdout.
    pub async fn wait_with_timeout(mut self, duration: Duration) -> Result<(ExitStatus, String)> {
        let status = timeout(duration, self.child.wait())
            .await
            .map_err(|_| anyhow!("process did not exit within {:?}", duration))?
            .context("Process wait failed")?;

        let mut rest = String::new();
        self.stdout.read_to_string(&mut rest).await?;
        self.seen.push_str(&rest);
        Ok((status, self.seen))
    }
}
