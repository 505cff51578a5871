use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Where capture files are created when no directory is configured.
pub fn default_capture_dir() -> PathBuf {
    if cfg!(target_os = "android") {
        PathBuf::from("/data/local/tmp")
    } else {
        std::env::temp_dir()
    }
}

/// An anonymous file collecting one stream of a child's output.
///
/// The file is unlinked from the start, survives `fork` as an open descriptor
/// and disappears when the last descriptor closes.
#[derive(Debug)]
pub struct CaptureFile {
    file: File,
}

impl CaptureFile {
    pub fn new(dir: &Path) -> io::Result<Self> {
        Ok(Self {
            file: tempfile::tempfile_in(dir)?,
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn try_clone_file(&self) -> io::Result<File> {
        self.file.try_clone()
    }

    pub fn has_data(&self) -> bool {
        self.file.metadata().map(|meta| meta.len() > 0).unwrap_or(false)
    }

    /// Copies everything captured so far into `out`.
    ///
    /// With `printable_only`, bytes that could confuse a terminal are replaced
    /// with `.`; newlines, tabs, carriage returns and ESC are kept.
    pub fn dump(&self, out: &mut impl Write, printable_only: bool) -> io::Result<u64> {
        let mut reader = &self.file;
        reader.seek(SeekFrom::Start(0))?;

        let mut buffer = [0u8; 1024];
        let mut total = 0u64;
        loop {
            let count = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(count) => count,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            if printable_only {
                sanitize(&mut buffer[..count]);
            }
            out.write_all(&buffer[..count])?;
            total += count as u64;
        }
        Ok(total)
    }
}

fn sanitize(bytes: &mut [u8]) {
    for byte in bytes {
        let keep = matches!(*byte, b'\n' | b'\t' | b'\r' | 0x1b) || byte.is_ascii_graphic() || *byte == b' ';
        if !keep {
            *byte = b'.';
        }
    }
}

/// The three streams captured for every test.
#[derive(Debug)]
pub struct TestCaptures {
    pub log: CaptureFile,
    pub stdout: CaptureFile,
    pub stderr: CaptureFile,
}

impl TestCaptures {
    pub fn new(dir: &Path) -> io::Result<Self> {
        Ok(Self {
            log: CaptureFile::new(dir)?,
            stdout: CaptureFile::new(dir)?,
            stderr: CaptureFile::new(dir)?,
        })
    }
}
