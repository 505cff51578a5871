use clap::Args;
use eyre::eyre;
use std::path::PathBuf;

use crate::capture::default_capture_dir;
use crate::context::SharedContext;
use crate::runner::{ColorChoice, RunFlags, RunOptions};

type Result<T> = color_eyre::eyre::Result<T>;

/// Options every test binary built on this crate accepts.
///
/// Flatten it into the binary's own `Parser` with `#[command(flatten)]`.
#[derive(Args, Debug, Clone, Default)]
pub struct HarnessArgs {
    /// Stop at the first failed or errored test
    #[arg(long)]
    pub fail_fast: bool,

    /// Show captured output of passing and skipped tests too
    #[arg(short, long)]
    pub verbose: bool,

    /// When to colour result lines
    #[arg(long, value_enum, default_value_t = ColorChoice::Auto)]
    pub color: ColorChoice,

    /// Directory for capture files (default: the system temporary directory)
    #[arg(long, env = "FORKTEST_CAPTURE_DIR")]
    pub capture_dir: Option<PathBuf>,
}

/// Validated harness configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub flags: RunFlags,
    pub color: ColorChoice,
    /// Where anonymous capture files are created
    pub capture_dir: PathBuf,
}

impl Config {
    pub fn from_args(args: HarnessArgs) -> Result<Self> {
        let capture_dir = args.capture_dir.unwrap_or_else(default_capture_dir);
        if !capture_dir.is_dir() {
            return Err(eyre!(
                "Capture directory '{}' does not exist or is not a directory",
                capture_dir.display()
            ));
        }

        let mut flags = RunFlags::empty();
        flags.set(RunFlags::FAIL_FAST, args.fail_fast);
        flags.set(RunFlags::VERBOSE, args.verbose);

        Ok(Config {
            flags,
            color: args.color,
            capture_dir,
        })
    }

    pub fn run_options(&self, global_ctx: SharedContext) -> RunOptions {
        RunOptions::new()
            .with_global_ctx(global_ctx)
            .with_flags(self.flags)
            .with_color(self.color)
            .with_capture_dir(self.capture_dir.clone())
    }
}
