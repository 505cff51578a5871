//! Reading `/proc/<pid>/maps`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One line of a maps file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub start: usize,
    pub end: usize,
    pub offset: u64,
    pub dev: String,
    pub inode: u64,
    pub path: Option<PathBuf>,
}

impl Mapping {
    pub fn contains(&self, address: usize) -> bool {
        (self.start..self.end).contains(&address)
    }

    /// Identifies the backing file regardless of the path it was opened under.
    pub fn file_key(&self) -> (&str, u64) {
        (&self.dev, self.inode)
    }

    /// True for mappings of a real file, as opposed to `[heap]`, `[vdso]` or
    /// anonymous memory.
    pub fn is_file_backed(&self) -> bool {
        self.inode != 0 && self.path.as_deref().is_some_and(Path::is_absolute)
    }
}

/// Parses a single line. Returns `None` for anything malformed.
///
/// `start-end perms offset dev inode [path]`; the path may contain spaces.
pub fn parse_line(line: &str) -> Option<Mapping> {
    let mut rest = line.trim_end();
    let mut field = || {
        let trimmed = rest.trim_start();
        let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
        let (head, tail) = trimmed.split_at(end);
        rest = tail;
        (!head.is_empty()).then_some(head)
    };

    let range = field()?;
    let _perms = field()?;
    let offset = field()?;
    let dev = field()?;
    let inode = field()?;

    let (start, end) = range.split_once('-')?;
    let path = rest.trim_start();

    Some(Mapping {
        start: usize::from_str_radix(start, 16).ok()?,
        end: usize::from_str_radix(end, 16).ok()?,
        offset: u64::from_str_radix(offset, 16).ok()?,
        dev: dev.to_string(),
        inode: inode.parse().ok()?,
        path: (!path.is_empty()).then(|| PathBuf::from(path)),
    })
}

pub fn parse(contents: &str) -> Vec<Mapping> {
    contents.lines().filter_map(parse_line).collect()
}

/// The mappings of the calling process.
pub fn read_self() -> io::Result<Vec<Mapping>> {
    Ok(parse(&fs::read_to_string("/proc/self/maps")?))
}

/// File-backed mappings, first occurrence of each file only, in address order.
pub fn distinct_files(mappings: &[Mapping]) -> Vec<&Mapping> {
    let mut seen = Vec::new();
    let mut files = Vec::new();
    for mapping in mappings.iter().filter(|m| m.is_file_backed()) {
        if !seen.contains(&mapping.file_key()) {
            seen.push(mapping.file_key());
            files.push(mapping);
        }
    }
    files
}
