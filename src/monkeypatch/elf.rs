//! ELF images loaded into the runner and the slots inside them.

use goblin::elf::header::{EM_AARCH64, EM_X86_64, ET_EXEC};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use nix::unistd::Pid;
use once_cell::unsync::OnceCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::maps::{self, Mapping};
use super::{remote, PatchBackend, PatchError};

const R_X86_64_64: u32 = 1;
const R_X86_64_GLOB_DAT: u32 = 6;
const R_X86_64_JUMP_SLOT: u32 = 7;

const R_AARCH64_ABS64: u32 = 257;
const R_AARCH64_GLOB_DAT: u32 = 1025;
const R_AARCH64_JUMP_SLOT: u32 = 1026;

/// Relocation kinds that fill a pointer-sized slot with a symbol's address.
fn slot_relocations(machine: u16) -> &'static [u32] {
    match machine {
        EM_X86_64 => &[R_X86_64_JUMP_SLOT, R_X86_64_GLOB_DAT, R_X86_64_64],
        EM_AARCH64 => &[R_AARCH64_JUMP_SLOT, R_AARCH64_GLOB_DAT, R_AARCH64_ABS64],
        _ => &[],
    }
}

fn page_size() -> usize {
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
}

/// Lives in the framework's own image so that image can be told apart.
#[inline(never)]
fn framework_anchor() {}

/// What the patcher needs from one loaded image.
#[derive(Debug)]
pub struct ImageRecord {
    pub path: PathBuf,
    /// Difference between runtime addresses and the file's virtual addresses.
    pub base: usize,
    /// Functions this image defines, by name, as file virtual addresses.
    functions: HashMap<String, u64>,
    /// Slots this image fills with another image's symbol: (symbol, slot vaddr).
    imports: Vec<(String, u64)>,
}

impl ImageRecord {
    fn from_elf(path: &Path, mapping_start: usize, page: usize, elf: &Elf<'_>) -> Self {
        let base = if elf.header.e_type == ET_EXEC {
            0
        } else {
            let first_load = elf
                .program_headers
                .iter()
                .find(|ph| ph.p_type == PT_LOAD)
                .map_or(0, |ph| ph.p_vaddr as usize);
            mapping_start.wrapping_sub(first_load & !(page - 1))
        };

        let mut functions = HashMap::new();
        for (symbols, names) in [(&elf.dynsyms, &elf.dynstrtab), (&elf.syms, &elf.strtab)] {
            for sym in symbols.iter() {
                if !sym.is_function() || sym.st_shndx == 0 || sym.st_value == 0 {
                    continue;
                }
                if let Some(name) = names.get_at(sym.st_name).filter(|name| !name.is_empty()) {
                    functions.entry(name.to_string()).or_insert(sym.st_value);
                }
            }
        }

        let kinds = slot_relocations(elf.header.e_machine);
        let imports = elf
            .pltrelocs
            .iter()
            .chain(elf.dynrelas.iter())
            .chain(elf.dynrels.iter())
            .filter(|reloc| reloc.r_sym != 0 && kinds.contains(&reloc.r_type))
            .filter_map(|reloc| {
                let sym = elf.dynsyms.get(reloc.r_sym)?;
                let name = elf.dynstrtab.get_at(sym.st_name)?;
                Some((name.to_string(), reloc.r_offset))
            })
            .collect();

        Self {
            path: path.to_path_buf(),
            base,
            functions,
            imports,
        }
    }

    /// Reads and parses the image behind `mapping`. Files that are not ELF or
    /// cannot be read are skipped.
    fn load(mapping: &Mapping, page: usize) -> Option<Self> {
        let path = mapping.path.as_deref()?;
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("skipping {}: {}", path.display(), e);
                return None;
            }
        };
        match Elf::parse(&bytes) {
            Ok(elf) => Some(Self::from_elf(path, mapping.start, page, &elf)),
            Err(e) => {
                debug!("skipping {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn defines(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn function_address(&self, name: &str) -> Option<usize> {
        self.functions
            .get(name)
            .map(|vaddr| self.base.wrapping_add(*vaddr as usize))
    }

    pub fn slots_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = usize> + 'a {
        self.imports
            .iter()
            .filter(move |(symbol, _)| symbol == name)
            .map(|(_, vaddr)| self.base.wrapping_add(*vaddr as usize))
    }
}

/// Every ELF image mapped into the runner, in address order, each file once.
#[derive(Debug)]
pub struct ImageTable {
    images: Vec<ImageRecord>,
}

impl ImageTable {
    /// Scans the calling process.
    ///
    /// The framework's image is left out unless it is the main executable,
    /// which is where it ends up when linked statically.
    pub fn load() -> Result<Self, PatchError> {
        let mappings = maps::read_self()?;
        let anchor = framework_anchor as *const () as usize;
        let framework = mappings
            .iter()
            .find(|m| m.contains(anchor) && m.is_file_backed())
            .ok_or(PatchError::FrameworkImageMissing)?;
        let main_exe = fs::read_link("/proc/self/exe").ok();
        let page = page_size();

        let mut images = Vec::new();
        for mapping in maps::distinct_files(&mappings) {
            if mapping.file_key() == framework.file_key() && mapping.path != main_exe {
                debug!("leaving out framework image {:?}", mapping.path);
                continue;
            }
            images.extend(ImageRecord::load(mapping, page));
        }
        info!("scanned {} loaded image(s)", images.len());

        Ok(Self { images })
    }

    pub fn images(&self) -> &[ImageRecord] {
        &self.images
    }

    fn definer(&self, name: &str) -> Option<usize> {
        self.images.iter().position(|image| image.defines(name))
    }

    /// Runtime address of the first definition of `name`.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.definer(name)
            .and_then(|index| self.images[index].function_address(name))
    }

    /// Slots through which images other than the defining one reach `name`.
    pub fn call_sites(&self, name: &str, filter: Option<&str>) -> Vec<usize> {
        let definer = self.definer(name);
        self.images
            .iter()
            .enumerate()
            .filter(|(index, _)| Some(*index) != definer)
            .filter(|(_, image)| {
                filter.map_or(true, |needle| image.path.to_string_lossy().contains(needle))
            })
            .flat_map(|(_, image)| image.slots_for(name))
            .collect()
    }
}

/// Patch backend for Linux: ELF images from `/proc/self/maps`, slot writes
/// through `ptrace`.
///
/// The image table is built on first use and kept for the life of the backend.
#[derive(Debug, Default)]
pub struct ElfBackend {
    table: OnceCell<ImageTable>,
}

impl ElfBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> Result<&ImageTable, PatchError> {
        self.table.get_or_try_init(ImageTable::load)
    }
}

impl PatchBackend for ElfBackend {
    fn resolve_symbol(&self, name: &str) -> Result<Option<usize>, PatchError> {
        Ok(self.table()?.resolve(name))
    }

    fn call_sites(&self, name: &str, filter: Option<&str>) -> Result<Vec<usize>, PatchError> {
        Ok(self.table()?.call_sites(name, filter))
    }

    fn patch_remote(&self, pid: Pid, address: usize, value: usize) -> Result<(), PatchError> {
        remote::write_word(pid, address, value)
    }
}
