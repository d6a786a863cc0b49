//! Log sinks for the preview server
//!
//! Three streams leave the server: one access line per request, warnings and
//! errors (failed builds, rejected paths, connection faults), and progress
//! lines for site builds and the server lifecycle. Access lines go to
//! `logging.access_log_file` or stdout. Warnings go to
//! `logging.error_log_file` or stderr. Build progress shares the error log
//! when it is a file and goes to stdout otherwise.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};

static LOG_WRITER: OnceLock<LogWriter> = OnceLock::new();

enum Sink {
    Stdout,
    Stderr,
    File(Mutex<File>),
}

impl Sink {
    /// Append to `path` when given, otherwise use `fallback`
    fn open_or(path: Option<&str>, fallback: Self) -> io::Result<Self> {
        match path {
            Some(path) => Ok(Self::File(Mutex::new(open_append(path)?))),
            None => Ok(fallback),
        }
    }

    const fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }

    fn write_line(&self, line: &str) {
        match self {
            Self::Stdout => println!("{line}"),
            Self::Stderr => eprintln!("{line}"),
            Self::File(file) => {
                // Poisoning from a panicked writer is ignored
                let mut file = file.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let _ = writeln!(file, "{line}");
            }
        }
    }
}

pub struct LogWriter {
    access: Sink,
    errors: Arc<Sink>,
    progress: Arc<Sink>,
}

impl LogWriter {
    fn new(access_log_file: Option<&str>, error_log_file: Option<&str>) -> io::Result<Self> {
        let access = Sink::open_or(access_log_file, Sink::Stdout)?;
        let errors = Arc::new(Sink::open_or(error_log_file, Sink::Stderr)?);
        let progress = if errors.is_file() {
            Arc::clone(&errors)
        } else {
            Arc::new(Sink::Stdout)
        };
        Ok(Self {
            access,
            errors,
            progress,
        })
    }

    pub fn write_access(&self, line: &str) {
        self.access.write_line(line);
    }

    pub fn write_error(&self, line: &str) {
        self.errors.write_line(line);
    }

    /// Build progress and server lifecycle
    pub fn write_info(&self, line: &str) {
        self.progress.write_line(line);
    }
}

fn open_append(path: &str) -> io::Result<File> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the process-wide writer; fails if log files cannot be opened
pub fn init(access_log_file: Option<&str>, error_log_file: Option<&str>) -> io::Result<()> {
    let writer = LogWriter::new(access_log_file, error_log_file)?;
    LOG_WRITER
        .set(writer)
        .map_err(|_| io::Error::new(io::ErrorKind::AlreadyExists, "log writer already initialized"))
}

/// The installed writer, `None` before `init` (tests, early startup)
pub fn global() -> Option<&'static LogWriter> {
    LOG_WRITER.get()
}
