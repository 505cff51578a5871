use super::Result;

use bitflags::bitflags;
use std::fmt;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::rc::Rc;
use tracing::info;

use crate::capture::default_capture_dir;
use crate::context::SharedContext;
use crate::group::GroupSpec;
use crate::group_runner::GroupRunner;
use crate::monkeypatch::{default_backend, Monkeypatcher, PatchBackend, PatchError};
use crate::report::Reporter;
use crate::signals::install_termination_handlers;
use crate::stats::RunStats;
use crate::wait::detect_waiter;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RunFlags: u32 {
        /// Stop at the first failed or errored test.
        const FAIL_FAST = 0x0000_0001;
        /// Show captured output for every test, not only failing ones.
        const VERBOSE = 0x0000_0002;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ColorChoice {
    /// Colour when stdout is a terminal.
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    pub fn enabled(self) -> bool {
        match self {
            ColorChoice::Auto => std::io::stdout().is_terminal(),
            ColorChoice::Always => true,
            ColorChoice::Never => false,
        }
    }
}

/// Options for one call to [`Runner::run`].
pub struct RunOptions {
    /// Handed to every group setup, and to tests of groups without one.
    pub global_ctx: SharedContext,
    pub flags: RunFlags,
    pub color: ColorChoice,
    pub capture_dir: PathBuf,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global_ctx(mut self, global_ctx: SharedContext) -> Self {
        self.global_ctx = global_ctx;
        self
    }

    pub fn with_flags(mut self, flags: RunFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_color(mut self, color: ColorChoice) -> Self {
        self.color = color;
        self
    }

    pub fn with_capture_dir(mut self, capture_dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = capture_dir.into();
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            global_ctx: Rc::new(()),
            flags: RunFlags::empty(),
            color: ColorChoice::Auto,
            capture_dir: default_capture_dir(),
        }
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("flags", &self.flags)
            .field("color", &self.color)
            .field("capture_dir", &self.capture_dir)
            .finish_non_exhaustive()
    }
}

/// The ordered set of groups to run, plus the patches they registered.
#[derive(Debug, Default)]
pub struct Runner {
    groups: Vec<GroupSpec>,
    patcher: Monkeypatcher,
}

impl Runner {
    pub fn new() -> Self {
        Self::with_backend(default_backend())
    }

    pub fn with_backend(backend: Box<dyn PatchBackend>) -> Self {
        Self {
            groups: Vec::new(),
            patcher: Monkeypatcher::new(backend),
        }
    }

    /// Groups run in the order they are added.
    pub fn add_group(&mut self, group: GroupSpec) -> &mut Self {
        self.groups.push(group);
        self
    }

    pub fn groups(&self) -> &[GroupSpec] {
        &self.groups
    }

    /// Redirects `function` to `replacement` for every test in `group`.
    ///
    /// With `filter`, only images whose path contains it have their calls
    /// redirected. Patching the same function twice in one group is rejected.
    pub fn patch_function(
        &mut self,
        group: &mut GroupSpec,
        function: &str,
        replacement: usize,
        filter: Option<&str>,
    ) -> std::result::Result<(), PatchError> {
        if group.is_patching(function) {
            return Err(PatchError::AlreadyRegistered(function.to_string()));
        }
        let goal = self.patcher.resolve(function, replacement, filter)?;
        group.push_patch(goal);
        Ok(())
    }

    /// Real address of a function some group has patched.
    pub fn original_function(&self, function: &str) -> Option<usize> {
        self.patcher.original(function)
    }

    /// Runs every group, prints the summary and returns the totals.
    ///
    /// Test and group failures end up in the stats; an `Err` means the run
    /// itself could not continue.
    pub fn run(&self, options: &RunOptions) -> Result<RunStats> {
        install_termination_handlers()?;
        let waiter = detect_waiter();
        let reporter = Reporter::new(options.color.enabled());
        info!(
            "running {} group(s) with the {} wait strategy",
            self.groups.len(),
            waiter.name()
        );

        let mut stats = RunStats::default();
        for (index, group) in self.groups.iter().enumerate() {
            let group_stats = GroupRunner {
                group,
                options,
                patcher: &self.patcher,
                waiter: waiter.as_ref(),
                reporter,
            }
            .run()?;
            stats.merge(&group_stats);

            if options.flags.contains(RunFlags::FAIL_FAST) && group_stats.has_failures() {
                info!(
                    "fail-fast: not running the remaining {} group(s)",
                    self.groups.len() - index - 1
                );
                break;
            }
        }

        reporter.summary(&stats);
        Ok(stats)
    }
}
