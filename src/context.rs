use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Debug, Display};
use std::fs::File;
use std::io::Write;
use std::rc::Rc;

use crate::process::exit_with;
use crate::report::{GREEN, RED, RESET_COLOR};
use crate::result_code::ResultCode;

/// Opaque context shared by the global run and each group.
pub type SharedContext = Rc<dyn Any>;

/// Everything a running test (or group setup/cleanup) may touch.
///
/// Built inside the forked process and handed to the test body, so nothing a
/// test needs lives in process-wide mutable state.
pub struct TestContext {
    shared: SharedContext,
    log: File,
    color: bool,
    originals: Rc<HashMap<String, usize>>,
}

impl TestContext {
    pub(crate) fn new(
        shared: SharedContext,
        log: File,
        color: bool,
        originals: Rc<HashMap<String, usize>>,
    ) -> Self {
        Self {
            shared,
            log,
            color,
            originals,
        }
    }

    /// The group context downcast to `T`, or `None` if it holds another type.
    pub fn group<T: Any>(&self) -> Option<&T> {
        self.shared.downcast_ref::<T>()
    }

    pub fn shared(&self) -> &SharedContext {
        &self.shared
    }

    /// Appends an `[INFO]` line to the test's log capture.
    pub fn log(&self, message: impl Display) {
        let (start, end) = if self.color { (GREEN, RESET_COLOR) } else { ("", "") };
        let _ = writeln!(&self.log, "[{}INFO{}] {}", start, end, message);
    }

    /// Ends the test as skipped.
    pub fn skip(&self) -> ! {
        exit_with(ResultCode::Skip)
    }

    /// Ends the test as failed, recording `message` in the log.
    pub fn fail(&self, message: impl Display) -> ! {
        self.log_error(&message);
        exit_with(ResultCode::Fail)
    }

    /// Ends the test as errored: something other than the assertion went wrong.
    pub fn error(&self, message: impl Display) -> ! {
        self.log_error(&message);
        exit_with(ResultCode::Error)
    }

    /// Fails the test unless `condition` holds.
    #[track_caller]
    pub fn check(&self, condition: bool, what: &str) {
        if !condition {
            let caller = std::panic::Location::caller();
            self.fail(format_args!("Assertion failed: {} ({}:{})", what, caller.file(), caller.line()));
        }
    }

    /// Fails the test unless both values are equal.
    #[track_caller]
    pub fn check_eq<T: PartialEq + Debug>(&self, left: T, right: T) {
        if left != right {
            let caller = std::panic::Location::caller();
            self.fail(format_args!(
                "Assertion failed: {:?} == {:?} ({}:{})",
                left,
                right,
                caller.file(),
                caller.line()
            ));
        }
    }

    /// Address of the real implementation of a monkeypatched function.
    ///
    /// Returns `None` for names no group has patched.
    pub fn original_function(&self, name: &str) -> Option<usize> {
        self.originals.get(name).copied()
    }

    fn log_error(&self, message: &dyn Display) {
        let (start, end) = if self.color { (RED, RESET_COLOR) } else { ("", "") };
        let _ = writeln!(&self.log, "{}[ERROR] {}{}", start, message, end);
    }
}

impl fmt::Debug for TestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestContext")
            .field("color", &self.color)
            .field("patched", &self.originals.len())
            .finish_non_exhaustive()
    }
}
