//! Batched CSV recording of pose rows

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::format::{format_row, header_line};
use crate::config::Config;
use crate::types::TelemetryRow;
use crate::{PosecastError, RecordingRejection, Result};

/// Handle returned when registering a start or stop listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type PathListener = Arc<dyn Fn(&Path) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    started: Vec<(ListenerId, PathListener)>,
    stopped: Vec<(ListenerId, PathListener)>,
    next_id: u64,
}

/// Snapshot of the active recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingStats {
    pub path: PathBuf,
    /// Rows already written to the file
    pub rows_written: u64,
    /// Rows buffered since the last flush
    pub pending_rows: usize,
    pub flushes: u64,
    pub elapsed: Duration,
    pub auto_stop_pending: bool,
}

struct RecordingSession {
    id: u64,
    path: PathBuf,
    file: BufWriter<File>,
    pending: Vec<String>,
    rows_written: u64,
    flushes: u64,
    started_at: Instant,
    auto_stop: Option<CancellationToken>,
}

impl RecordingSession {
    fn flush(&mut self) -> Result<()> {
        // Rows leave the buffer only once written
        let mut written = 0;
        let result = self.pending.iter().try_for_each(|line| {
            writeln!(self.file, "{}", line)?;
            written += 1;
            Ok::<(), std::io::Error>(())
        });
        self.pending.drain(..written);
        self.rows_written += written as u64;
        result.map_err(|e| PosecastError::file_error(self.path.clone(), e))?;

        self.file.flush().map_err(|e| PosecastError::file_error(self.path.clone(), e))?;
        self.flushes += 1;
        debug!(path = %self.path.display(), rows = written, total = self.rows_written, "Flushed rows");
        Ok(())
    }
}

/// Records [`TelemetryRow`]s to one CSV file at a time
///
/// Rows are buffered in memory and written every `flush_threshold` rows.
/// Buffering, the row counter and the flush share one lock, so rows from
/// several producers are never interleaved or lost between flushes.
///
/// ```rust,no_run
/// use posecast::telemetry::TelemetryWriter;
/// use posecast::types::TelemetryRow;
///
/// # fn main() -> posecast::Result<()> {
/// let names = vec!["Head".to_string()];
/// let writer = TelemetryWriter::new(names, "data", 100);
/// let path = writer.start_recording_for("S01", "squat-1")?;
/// writer.add_row(&TelemetryRow::new(0.02, Vec::new()))?;
/// assert_eq!(writer.stop_recording()?, Some(path));
/// # Ok(())
/// # }
/// ```
pub struct TelemetryWriter {
    object_names: Vec<String>,
    data_dir: PathBuf,
    flush_threshold: usize,
    session: Mutex<Option<RecordingSession>>,
    listeners: Mutex<Listeners>,
    next_session: AtomicU64,
}

impl TelemetryWriter {
    pub fn new(object_names: Vec<String>, data_dir: impl Into<PathBuf>, flush_threshold: usize) -> Self {
        Self {
            object_names,
            data_dir: data_dir.into(),
            flush_threshold: flush_threshold.max(1),
            session: Mutex::new(None),
            listeners: Mutex::new(Listeners::default()),
            next_session: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.object_names.clone(), config.data_dir.clone(), config.flush_threshold)
    }

    pub fn object_names(&self) -> &[String] {
        &self.object_names
    }

    /// `data_dir/<subject>/<trial>.csv`
    pub fn target_path(&self, subject: &str, trial: &str) -> PathBuf {
        self.data_dir.join(subject.trim()).join(format!("{}.csv", trial.trim()))
    }

    /// Whether a recording could start for this subject and trial right now
    pub fn validate_target(&self, subject: &str, trial: &str) -> std::result::Result<PathBuf, RecordingRejection> {
        if subject.trim().is_empty() {
            return Err(RecordingRejection::MissingSubject);
        }
        if trial.trim().is_empty() {
            return Err(RecordingRejection::MissingTrial);
        }
        let path = self.target_path(subject, trial);
        if path.exists() {
            return Err(RecordingRejection::FileExists(path));
        }
        if self.is_recording() {
            return Err(RecordingRejection::AlreadyRecording);
        }
        Ok(path)
    }

    /// Start recording to the derived path for `subject` and `trial`
    pub fn start_recording_for(&self, subject: &str, trial: &str) -> Result<PathBuf> {
        let path = self.validate_target(subject, trial)?;
        self.start_recording(&path)?;
        Ok(path)
    }

    /// Create `path` (never overwriting), write the header and start buffering rows
    pub fn start_recording(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        {
            let mut session = self.lock_session();
            if session.is_some() {
                return Err(RecordingRejection::AlreadyRecording.into());
            }

            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| PosecastError::file_error(parent.to_path_buf(), e))?;
            }

            let file = OpenOptions::new().write(true).create_new(true).open(&path).map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    PosecastError::from(RecordingRejection::FileExists(path.clone()))
                } else {
                    PosecastError::file_error(path.clone(), e)
                }
            })?;

            let mut file = BufWriter::new(file);
            writeln!(file, "{}", header_line(&self.object_names))
                .and_then(|_| file.flush())
                .map_err(|e| PosecastError::file_error(path.clone(), e))?;

            *session = Some(RecordingSession {
                id: self.next_session.fetch_add(1, Ordering::Relaxed) + 1,
                path: path.clone(),
                file,
                pending: Vec::with_capacity(self.flush_threshold),
                rows_written: 0,
                flushes: 0,
                started_at: Instant::now(),
                auto_stop: None,
            });
        }

        info!(path = %path.display(), objects = self.object_names.len(), "Recording started");
        for listener in self.snapshot(|l| &l.started) {
            listener(&path);
        }
        Ok(())
    }

    /// Buffer one row, flushing when the threshold is reached. Ignored while idle.
    pub fn add_row(&self, row: &TelemetryRow) -> Result<()> {
        let mut guard = self.lock_session();
        let Some(session) = guard.as_mut() else {
            return Ok(());
        };

        if !row.matches_object_count(self.object_names.len()) {
            warn!(
                expected = self.object_names.len(),
                found = row.poses.len(),
                "Pose count does not match tracked objects"
            );
        }

        session.pending.push(format_row(row));
        if session.pending.len() >= self.flush_threshold {
            session.flush()?;
        }
        Ok(())
    }

    /// Flush, close and return the recorded file. Does nothing while idle.
    pub fn stop_recording(&self) -> Result<Option<PathBuf>> {
        self.stop_where(|_| true)
    }

    /// Manual stop, refused while an automatic stop is scheduled
    pub fn request_stop(&self) -> Result<Option<PathBuf>> {
        if self.lock_session().as_ref().is_some_and(|s| s.auto_stop.is_some()) {
            return Err(RecordingRejection::AutoStopPending.into());
        }
        self.stop_recording()
    }

    /// Stop the current recording after `after`
    ///
    /// Only the recording active now is stopped, even if another one has
    /// started by the time the timer fires. Cancel the returned token to call
    /// the automatic stop off. Must be called within a tokio runtime.
    pub fn schedule_stop(self: &Arc<Self>, after: Duration) -> Result<CancellationToken> {
        let runtime = Handle::try_current().map_err(|e| PosecastError::Config {
            details: "scheduling a stop requires a tokio runtime".to_string(),
            source: Some(Box::new(e)),
        })?;

        let token = CancellationToken::new();
        let session_id = {
            let mut guard = self.lock_session();
            let session = guard.as_mut().ok_or(RecordingRejection::NotRecording)?;
            if session.auto_stop.is_some() {
                return Err(RecordingRejection::AutoStopPending.into());
            }
            session.auto_stop = Some(token.clone());
            session.id
        };

        info!(after = ?after, "Automatic stop scheduled");
        let writer = Arc::downgrade(self);
        let timer = token.clone();
        runtime.spawn(auto_stop(writer, session_id, after, timer));
        Ok(token)
    }

    pub fn is_recording(&self) -> bool {
        self.lock_session().is_some()
    }

    pub fn stats(&self) -> Option<RecordingStats> {
        self.lock_session().as_ref().map(|session| RecordingStats {
            path: session.path.clone(),
            rows_written: session.rows_written,
            pending_rows: session.pending.len(),
            flushes: session.flushes,
            elapsed: session.started_at.elapsed(),
            auto_stop_pending: session.auto_stop.is_some(),
        })
    }

    /// Called with the file path after every successful start
    pub fn on_started<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        self.register(listener, |l| &mut l.started)
    }

    /// Called with the file path after every stop
    pub fn on_stopped<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        self.register(listener, |l| &mut l.stopped)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.started.len() + listeners.stopped.len();
        listeners.started.retain(|(existing, _)| *existing != id);
        listeners.stopped.retain(|(existing, _)| *existing != id);
        before != listeners.started.len() + listeners.stopped.len()
    }

    fn register<F>(&self, listener: F, list: impl FnOnce(&mut Listeners) -> &mut Vec<(ListenerId, PathListener)>) -> ListenerId
    where
        F: Fn(&Path) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.listeners);
        listeners.next_id += 1;
        let id = ListenerId(listeners.next_id);
        list(&mut *listeners).push((id, Arc::new(listener)));
        id
    }

    // Listeners run outside every lock so they may call back into the writer
    fn snapshot(&self, list: impl FnOnce(&Listeners) -> &Vec<(ListenerId, PathListener)>) -> Vec<PathListener> {
        let listeners = lock(&self.listeners);
        list(&*listeners).iter().map(|(_, listener)| listener.clone()).collect()
    }

    fn stop_where(&self, matches: impl FnOnce(&RecordingSession) -> bool) -> Result<Option<PathBuf>> {
        let (path, flushed, rows) = {
            let mut guard = self.lock_session();
            if !guard.as_ref().is_some_and(matches) {
                return Ok(None);
            }
            let Some(mut session) = guard.take() else {
                return Ok(None);
            };
            if let Some(timer) = session.auto_stop.take() {
                timer.cancel();
            }
            let flushed = session.flush();
            (session.path, flushed, session.rows_written)
        };

        info!(path = %path.display(), rows, "Recording stopped");
        for listener in self.snapshot(|l| &l.stopped) {
            listener(&path);
        }
        flushed.map(|_| Some(path))
    }

    fn clear_auto_stop(&self, session_id: u64) {
        if let Some(session) = self.lock_session().as_mut().filter(|s| s.id == session_id) {
            session.auto_stop = None;
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Option<RecordingSession>> {
        lock(&self.session)
    }
}

impl Drop for TelemetryWriter {
    fn drop(&mut self) {
        if let Err(e) = self.stop_recording() {
            error!(error = %e, "Failed to finish recording on drop");
        }
    }
}

impl std::fmt::Debug for TelemetryWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryWriter")
            .field("object_names", &self.object_names)
            .field("data_dir", &self.data_dir)
            .field("flush_threshold", &self.flush_threshold)
            .field("recording", &self.is_recording())
            .finish()
    }
}

async fn auto_stop(writer: Weak<TelemetryWriter>, session_id: u64, after: Duration, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {
            debug!(session_id, "Automatic stop called off");
            if let Some(writer) = writer.upgrade() {
                writer.clear_auto_stop(session_id);
            }
        }
        _ = tokio::time::sleep(after) => {
            let Some(writer) = writer.upgrade() else { return };
            match writer.stop_where(|session| session.id == session_id) {
                Ok(Some(path)) => info!(path = %path.display(), "Automatic stop completed"),
                Ok(None) => debug!(session_id, "Scheduled recording already stopped"),
                Err(e) => error!(error = %e, "Automatic stop failed"),
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
