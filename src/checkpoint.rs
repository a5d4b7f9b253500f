//! # Session Checkpoints
//!
//! The checkpoint is the only durable representation of an in-progress hike.
//! It captures everything needed to resume after the process is killed:
//! route, segments, fatigue/safety state, pause accounting and the altitude
//! filter's last value.
//!
//! ## Write path
//!
//! Saves are throttled by [`CheckpointPolicy`] (at most one unforced save per
//! interval) and handed to a [`CheckpointWriter`], which persists them on a
//! background thread. Failed writes are logged and dropped; the in-memory
//! state stays authoritative and the next save retries.
//!
//! ## Read path
//!
//! Recovery reads synchronously at startup. A corrupt or inconsistent
//! document is treated as "no checkpoint".

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::{FatigueState, LocationSample, SafetyState, TerrainClass, TrailSegment};

/// File name used inside the checkpoint directory.
pub const CHECKPOINT_FILE_NAME: &str = "active-hike-checkpoint.json";

/// Current checkpoint document version.
pub const CHECKPOINT_VERSION: u32 = 1;

fn default_version() -> u32 {
    CHECKPOINT_VERSION
}

/// Complete, serializable snapshot of an in-progress session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    #[serde(default = "default_version")]
    pub version: u32,
    pub started_at: f64,
    pub last_check_in: f64,
    pub route: Vec<LocationSample>,
    pub segments: Vec<TrailSegment>,
    pub fatigue: FatigueState,
    pub safety: SafetyState,
    pub cadence: f64,
    pub speed: f64,
    pub slope_percent: f64,
    pub battery_level: f64,
    pub terrain: TerrainClass,
    pub pacing_advice: String,
    pub terrain_safety_hint: String,
    pub current_altitude: f64,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub paused_accumulated_seconds: f64,
    #[serde(default)]
    pub paused_started_at: Option<f64>,
    #[serde(default)]
    pub last_filtered_altitude: Option<f64>,
}

impl SessionCheckpoint {
    /// Reject documents that cannot describe a real session.
    pub fn validate(&self) -> Result<()> {
        if self.version > CHECKPOINT_VERSION {
            return Err(TrackerError::checkpoint(format!(
                "unsupported version {}",
                self.version
            )));
        }
        if !self.started_at.is_finite() || !self.last_check_in.is_finite() {
            return Err(TrackerError::checkpoint("non-finite session timestamps"));
        }
        if !self.paused_accumulated_seconds.is_finite() || self.paused_accumulated_seconds < 0.0 {
            return Err(TrackerError::checkpoint("invalid paused accumulation"));
        }
        if self.is_paused {
            match self.paused_started_at {
                Some(t) if t.is_finite() && t >= self.started_at => {}
                _ => return Err(TrackerError::checkpoint("paused without a pause start")),
            }
        }
        let f = &self.fatigue;
        if !(0.0..=100.0).contains(&f.score) || !(0.0..=1.0).contains(&f.energy_remaining) {
            return Err(TrackerError::checkpoint("fatigue state out of range"));
        }
        if !f.accumulated_load.is_finite() || !f.calories_burned.is_finite() {
            return Err(TrackerError::checkpoint("non-finite fatigue totals"));
        }
        Ok(())
    }

    /// Serialize to the JSON document format.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let checkpoint: SessionCheckpoint = serde_json::from_slice(bytes)?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }
}

/// Durable storage for the single active-session checkpoint.
pub trait CheckpointStore: Send + Sync {
    /// Replace the stored checkpoint.
    fn save(&self, checkpoint: &SessionCheckpoint) -> Result<()>;
    /// Read the stored checkpoint, `Ok(None)` when there is none.
    fn load(&self) -> Result<Option<SessionCheckpoint>>;
    /// Delete the stored checkpoint (no error when absent).
    fn clear(&self) -> Result<()>;
}

/// Load a checkpoint, treating any read or validation failure as absence.
pub fn load_or_none(store: &dyn CheckpointStore) -> Option<SessionCheckpoint> {
    match store.load() {
        Ok(Some(checkpoint)) => match checkpoint.validate() {
            Ok(()) => Some(checkpoint),
            Err(e) => {
                warn!("[Checkpoint] Ignoring stored checkpoint: {}", e);
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("[Checkpoint] Failed to read checkpoint, starting fresh: {}", e);
            None
        }
    }
}

/// Checkpoint stored as a JSON file, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Store the checkpoint under `dir` (created on first save).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Full path of the checkpoint document.
    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE_NAME)
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join(format!("{}.tmp", CHECKPOINT_FILE_NAME))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &SessionCheckpoint) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let bytes = checkpoint.to_json()?;
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&temp, self.path())?;
        Ok(())
    }

    fn load(&self) -> Result<Option<SessionCheckpoint>> {
        let path = self.path();
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        SessionCheckpoint::from_json(&bytes).map(Some)
    }

    fn clear(&self) -> Result<()> {
        remove_if_exists(&self.path())?;
        remove_if_exists(&self.temp_path())
    }
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Save cadence: unforced saves are skipped until `interval_secs` have passed.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointPolicy {
    interval_secs: f64,
    last_saved_at: Option<f64>,
}

impl CheckpointPolicy {
    pub fn new(interval_secs: f64) -> Self {
        Self {
            interval_secs,
            last_saved_at: None,
        }
    }

    /// Whether a save should happen now. Records the save when it should.
    pub fn try_begin(&mut self, now: f64, force: bool) -> bool {
        let due = match self.last_saved_at {
            None => true,
            Some(last) => now - last >= self.interval_secs || now < last,
        };
        if force || due {
            self.last_saved_at = Some(now);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.last_saved_at = None;
    }
}

enum WriterCommand {
    Save {
        epoch: u64,
        checkpoint: Box<SessionCheckpoint>,
    },
    Clear {
        epoch: u64,
    },
    Flush(mpsc::Sender<()>),
    Shutdown,
}

/// Fire-and-forget checkpoint persistence on a background thread.
///
/// Submitting never blocks on I/O. [`clear`](Self::clear) cancels every save
/// still queued and then deletes the stored checkpoint.
pub struct CheckpointWriter {
    sender: mpsc::Sender<WriterCommand>,
    epoch: Arc<AtomicU64>,
    store: Arc<dyn CheckpointStore>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CheckpointWriter {
    /// Spawn the writer thread for `store`.
    pub fn spawn(store: Arc<dyn CheckpointStore>) -> Self {
        let (sender, receiver) = mpsc::channel();
        let epoch = Arc::new(AtomicU64::new(0));

        let thread_store = Arc::clone(&store);
        let thread_epoch = Arc::clone(&epoch);
        let handle = thread::Builder::new()
            .name("checkpoint-writer".to_string())
            .spawn(move || run_writer(receiver, thread_store, thread_epoch))
            .map_err(|e| warn!("[Checkpoint] Writer thread unavailable, saves run inline: {}", e))
            .ok();

        Self {
            sender,
            epoch,
            store,
            handle,
        }
    }

    /// The underlying store (for synchronous recovery reads).
    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Queue a checkpoint for writing.
    pub fn submit(&self, checkpoint: SessionCheckpoint) {
        let epoch = self.epoch.load(Ordering::SeqCst);
        if self.handle.is_none() {
            write_checkpoint(self.store.as_ref(), &checkpoint);
            return;
        }
        let command = WriterCommand::Save {
            epoch,
            checkpoint: Box::new(checkpoint),
        };
        if self.sender.send(command).is_err() {
            warn!("[Checkpoint] Writer stopped, checkpoint dropped");
        }
    }

    /// Cancel queued saves and delete the stored checkpoint.
    pub fn clear(&self) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if self.handle.is_none() {
            clear_checkpoint(self.store.as_ref());
            return;
        }
        if self.sender.send(WriterCommand::Clear { epoch }).is_err() {
            clear_checkpoint(self.store.as_ref());
        }
    }

    /// Block until every command queued so far has been processed.
    pub fn flush(&self) {
        if self.handle.is_none() {
            return;
        }
        let (ack, done) = mpsc::channel();
        if self.sender.send(WriterCommand::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }
}

impl Drop for CheckpointWriter {
    fn drop(&mut self) {
        let _ = self.sender.send(WriterCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for CheckpointWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointWriter")
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .field("background", &self.handle.is_some())
            .finish()
    }
}

fn run_writer(
    receiver: mpsc::Receiver<WriterCommand>,
    store: Arc<dyn CheckpointStore>,
    epoch: Arc<AtomicU64>,
) {
    while let Ok(command) = receiver.recv() {
        match command {
            WriterCommand::Save {
                epoch: submitted,
                checkpoint,
            } => {
                if submitted != epoch.load(Ordering::SeqCst) {
                    debug!("[Checkpoint] Skipping save cancelled by session end");
                    continue;
                }
                write_checkpoint(store.as_ref(), &checkpoint);
            }
            WriterCommand::Clear { epoch: submitted } => {
                if submitted == epoch.load(Ordering::SeqCst) {
                    clear_checkpoint(store.as_ref());
                }
            }
            WriterCommand::Flush(ack) => {
                let _ = ack.send(());
            }
            WriterCommand::Shutdown => break,
        }
    }
    debug!("[Checkpoint] Writer thread exiting");
}

fn write_checkpoint(store: &dyn CheckpointStore, checkpoint: &SessionCheckpoint) {
    match store.save(checkpoint) {
        Ok(()) => debug!(
            "[Checkpoint] Saved {} points, {} segments",
            checkpoint.route.len(),
            checkpoint.segments.len()
        ),
        Err(e) => warn!("[Checkpoint] Save failed, will retry on next cadence: {}", e),
    }
}

fn clear_checkpoint(store: &dyn CheckpointStore) {
    match store.clear() {
        Ok(()) => info!("[Checkpoint] Cleared"),
        Err(e) => warn!("[Checkpoint] Clear failed: {}", e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// In-memory store that can be told to fail.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub(crate) saved: Mutex<Option<SessionCheckpoint>>,
        pub(crate) saves: AtomicU64,
        pub(crate) fail: std::sync::atomic::AtomicBool,
    }

    impl CheckpointStore for MemoryStore {
        fn save(&self, checkpoint: &SessionCheckpoint) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("disk full").into());
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.saved.lock().unwrap() = Some(checkpoint.clone());
            Ok(())
        }

        fn load(&self) -> Result<Option<SessionCheckpoint>> {
            Ok(self.saved.lock().unwrap().clone())
        }

        fn clear(&self) -> Result<()> {
            *self.saved.lock().unwrap() = None;
            Ok(())
        }
    }

    pub(crate) fn sample_checkpoint() -> SessionCheckpoint {
        SessionCheckpoint {
            version: CHECKPOINT_VERSION,
            started_at: 1_700_000_000.0,
            last_check_in: 1_700_000_300.5,
            route: vec![
                LocationSample::new(1_700_000_010.0, 46.5, 8.0, 1000.0),
                LocationSample::new(1_700_000_020.0, 46.5001, 8.0001, 1003.25)
                    .with_accuracy(4.0, -1.0)
                    .with_speed(1.1),
            ],
            segments: vec![TrailSegment {
                started_at: 1_700_000_010.0,
                ended_at: 1_700_000_020.0,
                duration: 10.0,
                distance: 13.6,
                elevation_delta: 3.1,
                slope_percent: 22.794117647058822,
                average_speed: 1.36,
                heart_rate: Some(131.0),
                cadence: 1.7,
                terrain: TerrainClass::Climb,
            }],
            fatigue: FatigueState {
                score: 12.345678901234567,
                accumulated_load: 3.3333333333333335,
                energy_remaining: 0.987654321,
                needs_break: false,
                reason: "Load is controlled.".to_string(),
                last_elapsed_seconds: 20.0,
                calories_burned: 19.1,
                calories_consumed: 0.0,
            },
            safety: SafetyState::calm(),
            cadence: 1.7,
            speed: 1.36,
            slope_percent: 22.794117647058822,
            battery_level: 0.81,
            terrain: TerrainClass::Climb,
            pacing_advice: "Good uphill pacing.".to_string(),
            terrain_safety_hint: "Keep short steps and stable rhythm on steep grade.".to_string(),
            current_altitude: 1001.4625,
            is_paused: true,
            paused_accumulated_seconds: 42.5,
            paused_started_at: Some(1_700_000_400.0),
            last_filtered_altitude: Some(1001.4625),
        }
    }

    #[test]
    fn test_json_roundtrip_is_exact() {
        let checkpoint = sample_checkpoint();
        let bytes = checkpoint.to_json().unwrap();
        let restored = SessionCheckpoint::from_json(&bytes).unwrap();
        assert_eq!(restored, checkpoint);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let mut value = serde_json::to_value(sample_checkpoint()).unwrap();
        let obj = value.as_object_mut().unwrap();
        for key in [
            "version",
            "is_paused",
            "paused_accumulated_seconds",
            "paused_started_at",
            "last_filtered_altitude",
        ] {
            obj.remove(key);
        }
        let bytes = serde_json::to_vec(&value).unwrap();
        let restored = SessionCheckpoint::from_json(&bytes).unwrap();
        assert!(!restored.is_paused);
        assert_eq!(restored.paused_accumulated_seconds, 0.0);
        assert_eq!(restored.last_filtered_altitude, None);
    }

    #[test]
    fn test_invalid_documents_rejected() {
        assert!(SessionCheckpoint::from_json(b"{not json").is_err());

        let mut paused = sample_checkpoint();
        paused.paused_started_at = None;
        assert!(paused.validate().is_err());

        let mut out_of_range = sample_checkpoint();
        out_of_range.fatigue.score = 140.0;
        assert!(out_of_range.validate().is_err());
    }

    #[test]
    fn test_file_store_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("nested"));

        assert!(store.load().unwrap().is_none());
        store.save(&sample_checkpoint()).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.load().unwrap(), Some(sample_checkpoint()));

        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        // Clearing twice is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        fs::write(store.path(), b"{\"started_at\": 1.0").unwrap();
        assert!(store.load().is_err());
        assert!(load_or_none(&store).is_none());
    }

    #[test]
    fn test_policy_cadence() {
        let mut policy = CheckpointPolicy::new(4.0);
        assert!(policy.try_begin(100.0, false));
        assert!(!policy.try_begin(102.0, false));
        assert!(policy.try_begin(103.0, true));
        assert!(!policy.try_begin(106.9, false));
        assert!(policy.try_begin(107.0, false));
    }

    #[test]
    fn test_writer_persists_and_clear_cancels() {
        let store = Arc::new(MemoryStore::default());
        let writer = CheckpointWriter::spawn(store.clone());

        writer.submit(sample_checkpoint());
        writer.flush();
        assert_eq!(store.load().unwrap(), Some(sample_checkpoint()));

        writer.submit(sample_checkpoint());
        writer.clear();
        writer.flush();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_writer_swallows_failures() {
        let store = Arc::new(MemoryStore::default());
        store.fail.store(true, Ordering::SeqCst);
        let writer = CheckpointWriter::spawn(store.clone());

        writer.submit(sample_checkpoint());
        writer.flush();
        assert!(store.load().unwrap().is_none());

        store.fail.store(false, Ordering::SeqCst);
        writer.submit(sample_checkpoint());
        writer.flush();
        assert!(store.load().unwrap().is_some());
    }
}
