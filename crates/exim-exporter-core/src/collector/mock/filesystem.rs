//! In-memory mock filesystem for testing collectors without a real spool
//! or `/proc`.

use crate::collector::traits::FileSystem;
use std::collections::{HashMap, HashSet};
use std::io::{self, BufRead, Cursor};
use std::path::{Path, PathBuf};

/// In-memory filesystem for testing.
///
/// Stores files and directories in memory, allowing tests to simulate
/// spool trees and process tables on any platform.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    /// Map from path to file contents.
    files: HashMap<PathBuf, String>,
    /// Set of directories (for read_dir support).
    directories: HashSet<PathBuf>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given content.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.files.insert(path, content.into());
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Removes a file, simulating a message delivered between two scans.
    pub fn remove_file(&mut self, path: impl AsRef<Path>) {
        self.files.remove(path.as_ref());
    }

    /// Copies every file and directory of `other` into this filesystem.
    pub fn merge(&mut self, other: MockFs) {
        self.files.extend(other.files);
        self.directories.extend(other.directories);
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }

    /// Adds a process with its `/proc/[pid]/stat` and `/proc/[pid]/cmdline`.
    ///
    /// # Arguments
    /// * `pid` - Process ID
    /// * `pgrp` - Process group ID (equal to `pid` for a group leader)
    /// * `cmdline` - Command-line tokens, written NUL-separated
    pub fn add_process(&mut self, pid: u32, pgrp: u32, cmdline: &[&str]) {
        let base = PathBuf::from(format!("/proc/{}", pid));
        let comm = cmdline
            .first()
            .and_then(|exe| exe.rsplit('/').next())
            .unwrap_or("kworker");
        let stat = format!(
            "{} ({}) S 1 {} {} 0 -1 4194560 100 0 0 0 10 5 0 0 20 0 1 0 12345 12345678 100 \
             18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0 0 0 0 0 0 0 0 0",
            pid, comm, pgrp, pgrp
        );
        let mut raw_cmdline = String::new();
        for token in cmdline {
            raw_cmdline.push_str(token);
            raw_cmdline.push('\0');
        }
        self.add_dir(&base);
        self.add_file(base.join("stat"), stat);
        self.add_file(base.join("cmdline"), raw_cmdline);
    }

    /// Adds a spool message: a `-H` header file and its `-D` data file.
    ///
    /// `dir` is the queue root or one of its shard subdirectories.
    pub fn add_message(&mut self, dir: impl AsRef<Path>, id: &str, frozen: bool) {
        let dir = dir.as_ref();
        let mut header = format!(
            "{id}-H\nDebian-exim 101 105\n<sender@example.com>\n1700000000 0\n\
             -received_time_usec .123456\n-ident Debian-exim\n"
        );
        if frozen {
            header.push_str("-frozen 1700000100\n");
        }
        header.push_str("-local\nXX\n1\nrcpt@example.org\n\n");
        self.add_file(dir.join(format!("{id}-H")), header);
        self.add_file(dir.join(format!("{id}-D")), format!("{id}-D\nbody\n"));
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn open_buffered(&self, path: &Path) -> io::Result<Box<dyn BufRead + Send>> {
        let content = self.read_to_string(path)?;
        Ok(Box::new(Cursor::new(content.into_bytes())))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries = HashSet::new();

        // Find all files and directories that are direct children
        for file_path in self.files.keys() {
            if file_path.parent().is_some_and(|parent| parent == path) {
                entries.insert(file_path.clone());
            }
        }

        for dir_path in &self.directories {
            if dir_path.parent().is_some_and(|parent| parent == path) && dir_path != path {
                entries.insert(dir_path.clone());
            }
        }

        Ok(entries.into_iter().collect())
    }
}
