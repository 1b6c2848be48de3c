//! Rolling File Logger
//!
//! Installs a global `tracing` subscriber that writes to `<dir>/<app>.log`,
//! rotates the file once it grows past a size limit, and keeps the most
//! recent lines in memory so a client can show them without touching disk.
//! Records emitted through the `log` facade are bridged into the same sink.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;

/// Rotate once the active file reaches this many bytes
pub const DEFAULT_MAX_BYTES: u64 = 2 * 1024 * 1024;
/// Number of rotated files kept next to the active one
pub const DEFAULT_KEEP_FILES: usize = 3;
/// Lines kept in the in-memory ring buffer
pub const DEFAULT_RECENT_LINES: usize = 200;

static RECENT: OnceLock<Arc<Mutex<RecentLines>>> = OnceLock::new();

// ========================
// Ring Buffer
// ========================

/// Fixed-capacity buffer of the latest log lines
#[derive(Debug)]
pub struct RecentLines {
    capacity: usize,
    lines: VecDeque<String>,
    partial: String,
}

impl RecentLines {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: VecDeque::with_capacity(capacity.max(1)),
            partial: String::new(),
        }
    }

    /// Feed raw formatter output; complete lines are pushed, the rest is held back
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.partial.push_str(&String::from_utf8_lossy(bytes));
        while let Some(pos) = self.partial.find('\n') {
            let line: String = self.partial.drain(..=pos).collect();
            self.push_line(line.trim_end().to_string());
        }
    }

    fn push_line(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

// ========================
// Rolling File
// ========================

/// Size-rotated log file: `app.log`, `app.1.log`, ... `app.N.log`
#[derive(Debug)]
pub struct RollingFile {
    dir: PathBuf,
    app_name: String,
    max_bytes: u64,
    keep: usize,
    file: File,
    written: u64,
}

impl RollingFile {
    pub fn open(dir: &Path, app_name: &str, max_bytes: u64, keep: usize) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = active_path(dir, app_name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            dir: dir.to_path_buf(),
            app_name: app_name.to_string(),
            max_bytes,
            keep,
            file,
            written,
        })
    }

    pub fn path(&self) -> PathBuf {
        active_path(&self.dir, &self.app_name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.keep == 0 {
            self.file = File::create(self.path())?;
            self.written = 0;
            return Ok(());
        }

        let oldest = rotated_path(&self.dir, &self.app_name, self.keep);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..self.keep).rev() {
            let from = rotated_path(&self.dir, &self.app_name, index);
            if from.exists() {
                fs::rename(&from, rotated_path(&self.dir, &self.app_name, index + 1))?;
            }
        }
        fs::rename(self.path(), rotated_path(&self.dir, &self.app_name, 1))?;

        self.file = OpenOptions::new().create(true).append(true).open(self.path())?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

fn active_path(dir: &Path, app_name: &str) -> PathBuf {
    dir.join(format!("{}.log", app_name))
}

fn rotated_path(dir: &Path, app_name: &str, index: usize) -> PathBuf {
    dir.join(format!("{}.{}.log", app_name, index))
}

// ========================
// Subscriber Wiring
// ========================

/// Writer handed to the fmt layer; tees into the file and the ring buffer
struct SharedWriter<W = RollingFile> {
    file: Arc<Mutex<W>>,
    recent: Arc<Mutex<RecentLines>>,
}

impl<W> Clone for SharedWriter<W> {
    fn clone(&self) -> Self {
        Self {
            file: self.file.clone(),
            recent: self.recent.clone(),
        }
    }
}

impl<W: Write> Write for SharedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Only the bytes the file accepted are teed; write_all retries the rest
        let n = match self.file.lock() {
            Ok(mut file) => file.write(buf)?,
            Err(_) => buf.len(),
        };
        if let Ok(mut recent) = self.recent.lock() {
            recent.push_bytes(&buf[..n]);
        }
        // Mirror to stderr so console output survives alongside the file
        let _ = io::stderr().write_all(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.lock() {
            Ok(mut file) => file.flush(),
            Err(_) => Ok(()),
        }
    }
}

struct LocalTime;

impl FormatTime for LocalTime {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Initialize the global logger at INFO level
pub fn init_logger(log_dir: PathBuf, app_name: &str) -> Result<(), String> {
    init_logger_with_level(log_dir, app_name, log::LevelFilter::Info)
}

/// Initialize the global logger with an explicit maximum level
pub fn init_logger_with_level(
    log_dir: PathBuf,
    app_name: &str,
    level: log::LevelFilter,
) -> Result<(), String> {
    let file = RollingFile::open(&log_dir, app_name, DEFAULT_MAX_BYTES, DEFAULT_KEEP_FILES)
        .map_err(|e| format!("Failed to open log file: {}", e))?;
    let recent = Arc::new(Mutex::new(RecentLines::new(DEFAULT_RECENT_LINES)));
    let writer = SharedWriter {
        file: Arc::new(Mutex::new(file)),
        recent: recent.clone(),
    };

    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_timer(LocalTime)
        .with_max_level(to_tracing_level(level))
        .with_writer(move || writer.clone())
        .try_init()
        .map_err(|e| format!("Failed to install logger: {}", e))?;

    RECENT
        .set(recent)
        .map_err(|_| "Logger already initialized".to_string())
}

fn to_tracing_level(level: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    use tracing_subscriber::filter::LevelFilter;
    match level {
        log::LevelFilter::Off => LevelFilter::OFF,
        log::LevelFilter::Error => LevelFilter::ERROR,
        log::LevelFilter::Warn => LevelFilter::WARN,
        log::LevelFilter::Info => LevelFilter::INFO,
        log::LevelFilter::Debug => LevelFilter::DEBUG,
        log::LevelFilter::Trace => LevelFilter::TRACE,
    }
}

fn ensure_initialized() -> Result<(), String> {
    if RECENT.get().is_some() {
        Ok(())
    } else {
        Err("Logger not initialized".to_string())
    }
}

pub fn info(msg: &str) -> Result<(), String> {
    ensure_initialized()?;
    tracing::info!("{}", msg);
    Ok(())
}

pub fn warn(msg: &str) -> Result<(), String> {
    ensure_initialized()?;
    tracing::warn!("{}", msg);
    Ok(())
}

pub fn error(msg: &str) -> Result<(), String> {
    ensure_initialized()?;
    tracing::error!("{}", msg);
    Ok(())
}

/// Most recent formatted lines, oldest first (empty before init)
pub fn recent_lines() -> Vec<String> {
    RECENT
        .get()
        .and_then(|recent| recent.lock().ok().map(|r| r.snapshot()))
        .unwrap_or_default()
}
