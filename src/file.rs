use crate::format::{Formatter, PlainFormatter};
use crate::record::LogRecord;
use crate::sink::{LogSink, SinkError, SinkKind};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

pub const DEFAULT_FILE_NAME: &str = "debug.log";

/// Size threshold and backup count for [`RotatingFileSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// A write that would push the file past this many bytes rotates first.
    /// `0` disables rotation.
    pub max_bytes: u64,
    /// Number of `<file>.N` backups kept; `0` truncates in place.
    pub max_backups: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
            max_backups: 2,
        }
    }
}

struct ActiveFile {
    file: File,
    len: u64,
}

/// Append-only local log file with size-based rotation.
///
/// The parent directory is created and the file opened on the first write,
/// so constructing the sink never touches the filesystem. Backups are named
/// `debug.log.1` (newest) up to `debug.log.<max_backups>` (oldest).
pub struct RotatingFileSink {
    path: PathBuf,
    policy: RotationPolicy,
    formatter: Box<dyn Formatter>,
    active: Mutex<Option<ActiveFile>>,
    rotations: AtomicU64,
}

impl RotatingFileSink {
    pub fn new(path: impl Into<PathBuf>, policy: RotationPolicy) -> Self {
        RotatingFileSink {
            path: path.into(),
            policy,
            formatter: Box::new(PlainFormatter),
            active: Mutex::new(None),
            rotations: AtomicU64::new(0),
        }
    }

    /// `<dir>/debug.log`.
    pub fn in_dir(dir: impl AsRef<Path>, policy: RotationPolicy) -> Self {
        Self::new(dir.as_ref().join(DEFAULT_FILE_NAME), policy)
    }

    pub fn with_formatter(mut self, formatter: impl Formatter + 'static) -> Self {
        self.formatter = Box::new(formatter);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Number of rotations performed so far.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Relaxed)
    }

    pub fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn open(&self) -> io::Result<ActiveFile> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let len = file.metadata()?.len();
        Ok(ActiveFile { file, len })
    }

    fn active_file<'a>(&self, slot: &'a mut Option<ActiveFile>) -> io::Result<&'a mut ActiveFile> {
        let active = match slot.take() {
            Some(active) => active,
            None => self.open()?,
        };
        Ok(slot.insert(active))
    }

    fn rotate(&self, slot: &mut Option<ActiveFile>) -> io::Result<()> {
        // Close the current handle before renaming it.
        *slot = None;

        if self.policy.max_backups == 0 {
            File::create(&self.path)?;
        } else {
            let oldest = self.backup_path(self.policy.max_backups);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for index in (1..self.policy.max_backups).rev() {
                let source = self.backup_path(index);
                if source.exists() {
                    fs::rename(&source, self.backup_path(index + 1))?;
                }
            }
            if self.path.exists() {
                fs::rename(&self.path, self.backup_path(1))?;
            }
        }

        self.rotations.fetch_add(1, Ordering::Relaxed);
        *slot = Some(self.open()?);
        Ok(())
    }
}

impl LogSink for RotatingFileSink {
    fn kind(&self) -> SinkKind {
        SinkKind::RotatingFile
    }

    fn emit(&self, record: &LogRecord) -> Result<(), SinkError> {
        let mut line = self.formatter.format(record);
        line.push('\n');
        let incoming = line.len() as u64;

        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let active = self.active_file(&mut slot)?;
        let max_bytes = self.policy.max_bytes;
        if max_bytes > 0 && active.len > 0 && active.len + incoming > max_bytes {
            self.rotate(&mut slot)?;
        }

        let active = self.active_file(&mut slot)?;
        active.file.write_all(line.as_bytes())?;
        active.len += incoming;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = slot.as_mut() {
            active.file.flush()?;
        }
        Ok(())
    }
}
