use bitflags::bitflags;
use std::fmt;
use std::time::Duration;

use crate::context::{SharedContext, TestContext};
use crate::monkeypatch::PatchGoal;

pub type TestFn = Box<dyn Fn(&TestContext)>;
pub type SetupFn = Box<dyn Fn(&TestContext) -> SharedContext>;
pub type CleanupFn = Box<dyn Fn(&TestContext)>;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TestFlags: u32 {
        /// The test is expected to fail; OK and FAIL are swapped.
        const XFAIL = 0x0000_0001;
    }
}

/// A single registered test.
pub struct TestSpec {
    name: String,
    body: TestFn,
    timeout: Duration,
    flags: TestFlags,
}

impl TestSpec {
    pub fn new(name: impl Into<String>, body: impl Fn(&TestContext) + 'static) -> Self {
        Self {
            name: name.into(),
            body: Box::new(body),
            timeout: Duration::ZERO,
            flags: TestFlags::empty(),
        }
    }

    /// A zero timeout means the test may run forever.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_flags(mut self, flags: TestFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Option<Duration> {
        (!self.timeout.is_zero()).then_some(self.timeout)
    }

    pub fn flags(&self) -> TestFlags {
        self.flags
    }

    pub fn is_xfail(&self) -> bool {
        self.flags.contains(TestFlags::XFAIL)
    }

    pub(crate) fn invoke(&self, ctx: &TestContext) {
        (self.body)(ctx)
    }
}

impl fmt::Debug for TestSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestSpec")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// Tests sharing one setup/cleanup context, run together in one process.
///
/// Tests run in insertion order.
#[derive(Default)]
pub struct GroupSpec {
    tests: Vec<TestSpec>,
    setup: Option<SetupFn>,
    cleanup: Option<CleanupFn>,
    patches: Vec<PatchGoal>,
}

impl GroupSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the group context from the global one. Runs once per group, in
    /// the group's process, with output going to the group capture.
    pub fn with_setup(mut self, setup: impl Fn(&TestContext) -> SharedContext + 'static) -> Self {
        self.setup = Some(Box::new(setup));
        self
    }

    pub fn with_cleanup(mut self, cleanup: impl Fn(&TestContext) + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    pub fn with_test(mut self, test: TestSpec) -> Self {
        self.tests.push(test);
        self
    }

    pub fn add_test(&mut self, test: TestSpec) -> &mut Self {
        self.tests.push(test);
        self
    }

    pub fn tests(&self) -> &[TestSpec] {
        &self.tests
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn patches(&self) -> &[PatchGoal] {
        &self.patches
    }

    pub(crate) fn setup(&self) -> Option<&SetupFn> {
        self.setup.as_ref()
    }

    pub(crate) fn cleanup(&self) -> Option<&CleanupFn> {
        self.cleanup.as_ref()
    }

    pub(crate) fn is_patching(&self, function: &str) -> bool {
        self.patches.iter().any(|goal| goal.function == function)
    }

    pub(crate) fn push_patch(&mut self, goal: PatchGoal) {
        self.patches.push(goal);
    }
}

impl fmt::Debug for GroupSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupSpec")
            .field("tests", &self.tests)
            .field("setup", &self.setup.is_some())
            .field("cleanup", &self.cleanup.is_some())
            .field("patches", &self.patches)
            .finish()
    }
}
