use globset::Glob;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    fs::{self, File, OpenOptions},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{level_filters::LevelFilter, Level, Metadata, Subscriber};
use tracing_subscriber::{
    fmt::MakeWriter, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Formatting of the records in the shared log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// `time LEVEL worker{id=..}:operation: message fields`
    #[default]
    Plain,
    /// one JSON object per line
    Json,
}

/// `<prefix><n>.log` with `n` one past the highest sequence number already used for `prefix`
pub fn next_log_path(dir: &Path, prefix: &str) -> io::Result<PathBuf> {
    let matcher = Glob::new(&format!("{prefix}[0-9]*.log"))
        .map_err(|error| io::Error::new(ErrorKind::InvalidInput, error))?
        .compile_matcher();

    let last = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .filter(|name| matcher.is_match(name))
            .filter_map(|name| sequence_number(&name, prefix))
            .max()
            .unwrap_or(0),
        Err(error) if error.kind() == ErrorKind::NotFound => 0,
        Err(error) => return Err(error),
    };

    Ok(dir.join(format!("{prefix}{}.log", last + 1)))
}

fn sequence_number(name: &OsStr, prefix: &str) -> Option<usize> {
    name.to_str()?
        .strip_prefix(prefix)?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

/// escape line breaks inside one formatted event, the result ends in exactly one newline
fn single_line(event: &[u8]) -> Vec<u8> {
    let body = event.strip_suffix(b"\n").unwrap_or(event);
    let mut line = Vec::with_capacity(body.len() + 1);

    for &byte in body {
        match byte {
            b'\n' => line.extend_from_slice(b"\\n"),
            b'\r' => line.extend_from_slice(b"\\r"),
            byte => line.push(byte),
        }
    }
    line.push(b'\n');

    line
}

#[derive(Debug)]
struct Inner {
    path: PathBuf,
    /// opened on first write, `Closed` afterwards rejects writes
    file: Mutex<Handle>,
    level: RwLock<LevelFilter>,
}

#[derive(Debug)]
enum Handle {
    Pending,
    Open(File),
    Closed,
}

/// Append-only log shared by every worker of a run
///
/// Every record reaches the file with a single `write` on a file opened in append mode, so lines
/// of different writers (threads or processes) never interleave. The file is only created by the
/// first record, the level can be changed until then (and after).
#[derive(Debug, Clone)]
pub struct ParallelLog {
    inner: Arc<Inner>,
}

impl ParallelLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                file: Mutex::new(Handle::Pending),
                level: RwLock::new(LevelFilter::INFO),
            }),
        }
    }

    /// log in `dir` with the next free sequence number for `prefix`
    pub fn next_in(dir: &Path, prefix: &str) -> io::Result<Self> {
        Ok(Self::new(next_log_path(dir, prefix)?))
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn set_level(&self, level: LevelFilter) {
        *self.inner.level.write() = level;
    }

    pub fn enabled(&self, level: &Level) -> bool {
        *level <= *self.inner.level.read()
    }

    /// append one formatted line, `line` must end with a newline
    fn append(&self, line: &[u8]) -> io::Result<()> {
        let mut handle = self.inner.file.lock();

        if let Handle::Pending = *handle {
            if let Some(parent) = self.inner.path.parent() {
                fs::create_dir_all(parent)?;
            }

            *handle = Handle::Open(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.inner.path)?,
            );
        }

        match &mut *handle {
            Handle::Open(file) => file.write_all(line),
            _ => Err(io::Error::new(ErrorKind::Other, "parallel log is closed")),
        }
    }

    /// flush and release the file, later writes fail
    pub fn close(&self) -> io::Result<()> {
        match std::mem::replace(&mut *self.inner.file.lock(), Handle::Closed) {
            Handle::Open(mut file) => {
                file.flush()?;
                file.sync_all()
            }
            _ => Ok(()),
        }
    }
}

/// Buffers one tracing event and appends it as a single line when dropped
#[derive(Debug)]
pub struct RecordWriter {
    log: Option<ParallelLog>,
    buffer: Vec<u8>,
}

impl Write for RecordWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.log.is_some() {
            self.buffer.extend_from_slice(buf);
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RecordWriter {
    fn drop(&mut self) {
        if let Some(log) = self.log.take() {
            if self.buffer.is_empty() {
                return;
            }

            if let Err(error) = log.append(&single_line(&self.buffer)) {
                // the log itself is broken, stderr is all that is left
                eprintln!("failed to write to {}: {error}", log.path().display());
            }
        }
    }
}

impl<'a> MakeWriter<'a> for ParallelLog {
    type Writer = RecordWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RecordWriter {
            log: Some(self.clone()),
            buffer: Vec::with_capacity(256),
        }
    }

    fn make_writer_for(&'a self, meta: &Metadata<'_>) -> Self::Writer {
        RecordWriter {
            log: self.enabled(meta.level()).then(|| self.clone()),
            buffer: Vec::new(),
        }
    }
}

/// map `-v` occurrences onto a level, starting at `info`
pub fn verbosity_level(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// formatting layer writing every event of the run into `log`
pub fn log_layer<S>(log: &ParallelLog, format: RecordFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(log.clone())
        .with_ansi(false)
        .with_thread_names(true);

    match format {
        RecordFormat::Plain => layer.boxed(),
        RecordFormat::Json => layer.json().boxed(),
    }
}

/// install the global subscriber: human readable output on stderr plus the shared log
///
/// `RUST_LOG` takes precedence over `level` for stderr, the shared log keeps its own level.
pub fn init_tracing(log: &ParallelLog, level: LevelFilter, format: RecordFormat) {
    log.set_level(level);

    let stderr_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .with_filter(stderr_filter),
        )
        .with(log_layer(log, format).with_filter(level))
        .init();
}
