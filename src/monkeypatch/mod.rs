//! Redirecting a named function inside a test process.
//!
//! Calls from one loaded image into a function defined by another go through
//! a per-image indirection slot (a GOT entry) filled in by the dynamic loader.
//! Registering a patch finds those slots in the runner's own address space;
//! because test processes are forked from it, the same addresses hold in the
//! child. Once a test child has stopped itself, the runner writes the
//! replacement pointer into each slot through `ptrace` and lets it run.
//!
//! Everything that knows about binary formats or debugger primitives sits
//! behind [`PatchBackend`].

#[cfg(target_os = "linux")]
pub mod elf;
#[cfg(target_os = "linux")]
pub mod maps;
#[cfg(target_os = "linux")]
mod remote;

use nix::unistd::Pid;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("function `{0}` is not defined by any loaded image")]
    FunctionNotFound(String),
    #[error("function `{0}` is already patched by this group")]
    AlreadyRegistered(String),
    #[error("the framework's own image was not found among the loaded images")]
    FrameworkImageMissing,
    #[error("monkeypatching is not supported on this platform")]
    Unsupported,
    #[error("failed to read the process image list: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to write slot {address:#x} in process {pid}: {source}")]
    RemoteWrite {
        pid: Pid,
        address: usize,
        source: nix::Error,
    },
    #[error("slot {address:#x} in process {pid} reads back {found:#x} after patching")]
    Verification { pid: Pid, address: usize, found: usize },
}

/// One function redirected for every test of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchGoal {
    pub function: String,
    /// Address of the substitute implementation.
    pub replacement: usize,
    /// Absolute addresses of the indirection slots to overwrite.
    pub slots: Vec<usize>,
    /// Address of the real implementation.
    pub original: usize,
}

/// Binary-format and debugger primitives the patcher is built on.
pub trait PatchBackend {
    /// Runtime address of the definition of `name`, if any candidate image has one.
    fn resolve_symbol(&self, name: &str) -> Result<Option<usize>, PatchError>;

    /// Runtime addresses of the slots through which other images call `name`.
    /// With a filter, only images whose path contains it contribute.
    fn call_sites(&self, name: &str, filter: Option<&str>) -> Result<Vec<usize>, PatchError>;

    /// Writes `value` at `address` in a stopped, traced child.
    fn patch_remote(&self, pid: Pid, address: usize, value: usize) -> Result<(), PatchError>;
}

/// Backend for platforms without ELF images or `ptrace`: every registration fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBackend;

impl PatchBackend for UnsupportedBackend {
    fn resolve_symbol(&self, _name: &str) -> Result<Option<usize>, PatchError> {
        Err(PatchError::Unsupported)
    }

    fn call_sites(&self, _name: &str, _filter: Option<&str>) -> Result<Vec<usize>, PatchError> {
        Err(PatchError::Unsupported)
    }

    fn patch_remote(&self, _pid: Pid, _address: usize, _value: usize) -> Result<(), PatchError> {
        Err(PatchError::Unsupported)
    }
}

/// The platform's default backend.
pub fn default_backend() -> Box<dyn PatchBackend> {
    #[cfg(target_os = "linux")]
    {
        Box::new(elf::ElfBackend::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(UnsupportedBackend)
    }
}

/// Resolves patch goals and applies them to stopped test processes.
///
/// Real addresses are cached per function name for the lifetime of the
/// patcher, so the same function patched by several groups is looked up once.
pub struct Monkeypatcher {
    backend: Box<dyn PatchBackend>,
    originals: Rc<HashMap<String, usize>>,
}

impl Monkeypatcher {
    pub fn new(backend: Box<dyn PatchBackend>) -> Self {
        Self {
            backend,
            originals: Rc::new(HashMap::new()),
        }
    }

    /// Resolves `function` and every slot that calls it.
    ///
    /// A function that is defined but never called through a slot yields a
    /// goal with no slots: nothing is redirected, which is not an error.
    pub fn resolve(
        &mut self,
        function: &str,
        replacement: usize,
        filter: Option<&str>,
    ) -> Result<PatchGoal, PatchError> {
        let original = match self.originals.get(function) {
            Some(address) => *address,
            None => {
                let address = self
                    .backend
                    .resolve_symbol(function)?
                    .ok_or_else(|| PatchError::FunctionNotFound(function.to_string()))?;
                Rc::make_mut(&mut self.originals).insert(function.to_string(), address);
                address
            }
        };

        let slots = self.backend.call_sites(function, filter)?;
        if slots.is_empty() {
            warn!("{} has no indirection slots to patch; calls will not be redirected", function);
        } else {
            info!("resolved {} slot(s) for {} (real address {:#x})", slots.len(), function, original);
        }

        Ok(PatchGoal {
            function: function.to_string(),
            replacement,
            slots,
            original,
        })
    }

    /// Overwrites every slot of every goal in `child`.
    pub fn apply(&self, child: Pid, goals: &[PatchGoal]) -> Result<(), PatchError> {
        for goal in goals {
            for slot in &goal.slots {
                debug!("patching {} slot {:#x} in {}", goal.function, slot, child);
                self.backend.patch_remote(child, *slot, goal.replacement)?;
            }
        }
        Ok(())
    }

    pub fn original(&self, function: &str) -> Option<usize> {
        self.originals.get(function).copied()
    }

    pub(crate) fn originals(&self) -> Rc<HashMap<String, usize>> {
        Rc::clone(&self.originals)
    }
}

impl Default for Monkeypatcher {
    fn default() -> Self {
        Self::new(default_backend())
    }
}

impl fmt::Debug for Monkeypatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monkeypatcher")
            .field("originals", &self.originals)
            .finish_non_exhaustive()
    }
}
