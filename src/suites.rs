//! The framework's own demonstration suites, one per [`Suite`].
//!
//! Each suite's expected totals are fixed; the integration tests run the
//! binary and compare its summary against them.

use clap::ValueEnum;
use forktest::monkeypatch::{default_backend, PatchBackend};
use forktest::{
    GroupSpec, PatchError, RunFlags, Runner, SharedContext, TestContext, TestFlags, TestSpec,
};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{Read, Write};
use std::rc::Rc;
use std::time::Duration;

type Result<T> = color_eyre::eyre::Result<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Suite {
    Basic,
    Failures,
    Xfail,
    Timeout,
    Signal,
    Context,
    FailFast,
    Verbose,
    Empty,
    Hang,
    Monkeypatch,
    PatchFailure,
    Cleanup,
}

impl Suite {
    pub fn name(self) -> &'static str {
        match self {
            Suite::Basic => "basic",
            Suite::Failures => "failures",
            Suite::Xfail => "xfail",
            Suite::Timeout => "timeout",
            Suite::Signal => "signal",
            Suite::Context => "context",
            Suite::FailFast => "fail-fast",
            Suite::Verbose => "verbose",
            Suite::Empty => "empty",
            Suite::Hang => "hang",
            Suite::Monkeypatch => "monkeypatch",
            Suite::PatchFailure => "patch-failure",
            Suite::Cleanup => "cleanup",
        }
    }

    /// Flags the suite always runs with, on top of the command line.
    pub fn forced_flags(self) -> RunFlags {
        match self {
            Suite::FailFast => RunFlags::FAIL_FAST,
            Suite::Verbose => RunFlags::VERBOSE,
            _ => RunFlags::empty(),
        }
    }

    pub fn build(self) -> Result<Runner> {
        let mut runner = match self {
            Suite::PatchFailure => Runner::with_backend(Box::new(UnwritableSlots::new())),
            _ => Runner::new(),
        };
        match self {
            Suite::Basic => basic(&mut runner),
            Suite::Failures => failures(&mut runner),
            Suite::Xfail => xfail(&mut runner),
            Suite::Timeout => timeout(&mut runner),
            Suite::Signal => signal(&mut runner),
            Suite::Context => context(&mut runner),
            Suite::FailFast => fail_fast(&mut runner),
            Suite::Verbose => verbose(&mut runner),
            Suite::Empty => {}
            Suite::Hang => hang(&mut runner),
            Suite::Monkeypatch => monkeypatch(&mut runner)?,
            Suite::PatchFailure => patch_failure(&mut runner)?,
            Suite::Cleanup => cleanup(&mut runner),
        }
        Ok(runner)
    }
}

/// The global context every suite runs with.
#[derive(Debug)]
pub struct Globals {
    pub label: &'static str,
}

pub fn global_context() -> SharedContext {
    Rc::new(Globals { label: "forktest" })
}

fn basic(runner: &mut Runner) {
    runner.add_group(
        GroupSpec::new()
            .with_test(TestSpec::new("passing", |ctx| {
                ctx.log("hidden unless verbose");
                println!("stdout of a passing test");
            }))
            .with_test(TestSpec::new("skipped", |ctx| {
                println!("stdout of a skipped test");
                ctx.skip();
            }))
            .with_test(TestSpec::new("checks", |ctx| {
                ctx.check(2 + 2 == 4, "2 + 2 == 4");
                ctx.check_eq("forktest".len(), 8);
            })),
    );
    runner.add_group(
        GroupSpec::new()
            .with_setup(|_| -> SharedContext { Rc::new(42u32) })
            .with_test(TestSpec::new("reads group context", |ctx| {
                ctx.check_eq(ctx.group::<u32>(), Some(&42));
            })),
    );
}

fn failures(runner: &mut Runner) {
    runner.add_group(
        GroupSpec::new()
            .with_test(TestSpec::new("failing check", |ctx| {
                println!("visible on failure");
                ctx.check(1 > 2, "1 > 2");
            }))
            .with_test(TestSpec::new("explicit fail", |ctx| {
                ctx.fail("giving up");
            }))
            .with_test(TestSpec::new("explicit error", |ctx| {
                ctx.error("environment is broken");
            }))
            .with_test(TestSpec::new("panics", |_| {
                panic!("boom");
            }))
            .with_test(TestSpec::new("unknown exit code", |_| {
                std::process::exit(42);
            }))
            .with_test(TestSpec::new("passes", |_| {})),
    );
}

fn xfail(runner: &mut Runner) {
    runner.add_group(
        GroupSpec::new()
            .with_test(
                TestSpec::new("expected failure that fails", |ctx| {
                    ctx.fail("as expected");
                })
                .with_flags(TestFlags::XFAIL),
            )
            .with_test(TestSpec::new("expected failure that passes", |_| {}).with_flags(TestFlags::XFAIL))
            .with_test(
                TestSpec::new("expected failure that errors", |ctx| {
                    ctx.error("not a failure");
                })
                .with_flags(TestFlags::XFAIL),
            )
            .with_test(
                TestSpec::new("expected failure that skips", |ctx| {
                    ctx.skip();
                })
                .with_flags(TestFlags::XFAIL),
            ),
    );
}

fn timeout(runner: &mut Runner) {
    runner.add_group(
        GroupSpec::new()
            .with_test(
                TestSpec::new("sleeps past timeout", |_| {
                    std::thread::sleep(Duration::from_secs(30));
                })
                .with_timeout(Duration::from_millis(200)),
            )
            .with_test(
                TestSpec::new("expected failure that times out", |_| {
                    std::thread::sleep(Duration::from_secs(30));
                })
                .with_timeout(Duration::from_millis(200))
                .with_flags(TestFlags::XFAIL),
            )
            .with_test(
                TestSpec::new("finishes in time", |_| {
                    std::thread::sleep(Duration::from_millis(10));
                })
                .with_timeout(Duration::from_secs(5)),
            ),
    );
}

fn signal(runner: &mut Runner) {
    runner.add_group(
        GroupSpec::new()
            .with_test(TestSpec::new("aborts", |_| std::process::abort()))
            .with_test(TestSpec::new("killed", |_| {
                let _ = nix::sys::signal::raise(nix::sys::signal::Signal::SIGKILL);
            }))
            .with_test(TestSpec::new("survives", |_| {})),
    );
    runner.add_group(
        GroupSpec::new()
            .with_setup(|_| -> SharedContext { std::process::abort() })
            .with_test(TestSpec::new("after aborted setup 1", |_| {}))
            .with_test(TestSpec::new("after aborted setup 2", |_| {})),
    );
}

/// A pipe filled by group setup and drained, two bytes per test, by the
/// group's tests. Only works because every test forks from the same group.
struct PipeContext {
    reader: File,
    _writer: File,
}

fn read_two(ctx: &TestContext) -> [u8; 2] {
    let Some(pipe) = ctx.group::<PipeContext>() else {
        ctx.error("group context is not a pipe");
    };
    let mut buffer = [0u8; 2];
    if let Err(e) = (&pipe.reader).read_exact(&mut buffer) {
        ctx.fail(format_args!("reading the pipe: {}", e));
    }
    buffer
}

fn context(runner: &mut Runner) {
    runner.add_group(GroupSpec::new().with_test(TestSpec::new("uses global context", |ctx| {
        let globals = ctx.group::<Globals>().map(|globals| globals.label);
        ctx.check_eq(globals, Some("forktest"));
    })));

    runner.add_group(
        GroupSpec::new()
            .with_setup(|ctx| -> SharedContext {
                ctx.check(ctx.group::<Globals>().is_some(), "setup sees the global context");
                let (reader, writer) = match nix::unistd::pipe() {
                    Ok(fds) => fds,
                    Err(e) => ctx.error(format_args!("pipe: {}", e)),
                };
                let mut writer = File::from(writer);
                if let Err(e) = writer.write_all(b"abcd") {
                    ctx.error(format_args!("filling the pipe: {}", e));
                }
                ctx.log("pipe filled");
                Rc::new(PipeContext {
                    reader: File::from(reader),
                    _writer: writer,
                })
            })
            .with_cleanup(|ctx| {
                ctx.check(ctx.group::<PipeContext>().is_some(), "cleanup sees the pipe");
            })
            .with_test(TestSpec::new("read from pipe 1", |ctx| {
                ctx.check_eq(&read_two(ctx), b"ab");
            }))
            .with_test(TestSpec::new("read from pipe 2", |ctx| {
                ctx.check_eq(&read_two(ctx), b"cd");
            })),
    );

    runner.add_group(
        GroupSpec::new()
            .with_setup(|ctx| -> SharedContext { ctx.skip() })
            .with_test(TestSpec::new("skip me 1", |_| {}))
            .with_test(TestSpec::new("skip me 2", |_| {})),
    );

    runner.add_group(
        GroupSpec::new()
            .with_setup(|ctx| -> SharedContext { ctx.error("Failing in group setup.") })
            .with_test(TestSpec::new("error setup fail 1", |_| {}))
            .with_test(TestSpec::new("error setup fail 2", |_| {})),
    );

    runner.add_group(
        GroupSpec::new()
            .with_setup(|_| -> SharedContext { panic!("setup panicked") })
            .with_test(TestSpec::new("after panicking setup", |_| {})),
    );
}

fn cleanup(runner: &mut Runner) {
    runner.add_group(
        GroupSpec::new()
            .with_cleanup(|ctx| ctx.fail("cleanup broke"))
            .with_test(TestSpec::new("before broken cleanup 1", |_| {}))
            .with_test(TestSpec::new("before broken cleanup 2", |_| {})),
    );
    runner.add_group(
        GroupSpec::new()
            .with_cleanup(|_| {})
            .with_test(TestSpec::new("after broken cleanup", |_| {})),
    );
}

fn fail_fast(runner: &mut Runner) {
    runner.add_group(
        GroupSpec::new()
            .with_test(TestSpec::new("gonna fail", |ctx| {
                ctx.fail("Failing");
            }))
            .with_test(TestSpec::new("never gonna run", |_| {})),
    );
    runner.add_group(GroupSpec::new().with_test(TestSpec::new("later group never runs", |_| {})));
}

fn verbose(runner: &mut Runner) {
    runner.add_group(
        GroupSpec::new()
            .with_setup(|ctx| -> SharedContext {
                ctx.log("group setup ran");
                Rc::clone(ctx.shared())
            })
            .with_test(TestSpec::new("log passing", |ctx| {
                ctx.log("This is a log message");
            }))
            .with_test(TestSpec::new("log skipping", |ctx| {
                ctx.log("This test will be skipped");
                ctx.skip();
            }))
            .with_test(TestSpec::new("show stdout passing", |_| {
                println!("This is stdout");
            }))
            .with_test(TestSpec::new("show stderr passing", |_| {
                eprintln!("This is stderr");
            })),
    );
}

fn hang(runner: &mut Runner) {
    runner.add_group(GroupSpec::new().with_test(TestSpec::new("hangs", |_| loop {
        std::thread::sleep(Duration::from_secs(60));
    })));
}

extern "C" fn fake_getppid() -> libc::pid_t {
    0
}

fn monkeypatch(runner: &mut Runner) -> Result<()> {
    let replacement = fake_getppid as *const () as usize;

    let mut patched = GroupSpec::new()
        .with_test(TestSpec::new("sees replacement", |ctx| {
            ctx.check_eq(unsafe { libc::getppid() }, 0);
        }))
        .with_test(TestSpec::new("calls original", |ctx| {
            let Some(address) = ctx.original_function("getppid") else {
                ctx.fail("no real address recorded for getppid");
            };
            let real: extern "C" fn() -> libc::pid_t = unsafe { std::mem::transmute(address) };
            ctx.check(real() > 0, "real getppid returns the group process");
        }));
    runner.patch_function(&mut patched, "getppid", replacement, None)?;

    let duplicate_rejected = matches!(
        runner.patch_function(&mut patched, "getppid", replacement, None),
        Err(PatchError::AlreadyRegistered(_))
    );
    let unknown_rejected = matches!(
        runner.patch_function(&mut patched, "forktest_no_such_function", replacement, None),
        Err(PatchError::FunctionNotFound(_))
    );
    let unpatched_has_no_original = runner.original_function("malloc").is_none();

    let mut filtered = GroupSpec::new().with_test(TestSpec::new("filtered out image keeps original", |ctx| {
        ctx.check(unsafe { libc::getppid() } > 0, "getppid is not redirected");
    }));
    runner.patch_function(&mut filtered, "getppid", replacement, Some("no-such-image"))?;

    let unpatched = GroupSpec::new().with_test(TestSpec::new("unrelated group keeps original", |ctx| {
        ctx.check(unsafe { libc::getppid() } > 0, "getppid is not redirected");
    }));

    let registration = GroupSpec::new()
        .with_test(TestSpec::new("duplicate patch rejected", move |ctx| {
            ctx.check(duplicate_rejected, "second getppid patch on one group is rejected");
        }))
        .with_test(TestSpec::new("unknown function rejected", move |ctx| {
            ctx.check(unknown_rejected, "patching an undefined function fails");
        }))
        .with_test(TestSpec::new("no original for unpatched function", move |ctx| {
            ctx.check(unpatched_has_no_original, "malloc has no recorded original");
            ctx.check_eq(ctx.original_function("malloc"), None);
        }));

    runner
        .add_group(patched)
        .add_group(filtered)
        .add_group(unpatched)
        .add_group(registration);
    Ok(())
}

/// Resolves every function to a slot in the never-mapped first page, so the
/// platform backend's write into the test process fails.
struct UnwritableSlots {
    platform: Box<dyn PatchBackend>,
}

impl UnwritableSlots {
    const SLOT: usize = 0x10;

    fn new() -> Self {
        Self {
            platform: default_backend(),
        }
    }
}

impl PatchBackend for UnwritableSlots {
    fn resolve_symbol(&self, _name: &str) -> std::result::Result<Option<usize>, PatchError> {
        Ok(Some(fake_getppid as *const () as usize))
    }

    fn call_sites(
        &self,
        _name: &str,
        _filter: Option<&str>,
    ) -> std::result::Result<Vec<usize>, PatchError> {
        Ok(vec![Self::SLOT])
    }

    fn patch_remote(
        &self,
        pid: Pid,
        address: usize,
        value: usize,
    ) -> std::result::Result<(), PatchError> {
        self.platform.patch_remote(pid, address, value)
    }
}

fn patch_failure(runner: &mut Runner) -> Result<()> {
    let mut patched = GroupSpec::new().with_test(TestSpec::new("patched with unwritable slot", |ctx| {
        ctx.log("patched body ran");
    }));
    runner.patch_function(&mut patched, "getppid", fake_getppid as *const () as usize, None)?;

    runner
        .add_group(patched)
        .add_group(GroupSpec::new().with_test(TestSpec::new("after failed patch", |_| {})));
    Ok(())
}
