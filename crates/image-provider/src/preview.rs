//! Background preview generation with per-source request coalescing.
//!
//! Previews are thumbnail-resolution copies of a source image written next to
//! it (`thumbs/<stem>_th.<ext>`), so later on-demand decodes are cheap. The
//! manager tracks one in-flight job per source path: concurrent requests for
//! the same source attach to the running job instead of decoding twice, and
//! all of them observe the same terminal outcome. Started work always runs to
//! completion; abandoning a handle does not abort the decode.

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::io::ImageIo;

/// Long-edge resolution of generated preview files.
pub const PREVIEW_SIZE: u32 = 360;

/// Subdirectory of the source directory holding preview files.
pub const PREVIEW_DIR: &str = "thumbs";

const PREVIEW_SUFFIX: &str = "_th";

/// Lifecycle of a preview generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewState {
    Pending,
    InProgress,
    Done,
    Failed,
}

/// Terminal result delivered to every caller attached to a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewOutcome {
    /// The preview file exists at the given path.
    Ready(PathBuf),
    /// Generation failed; callers should fall back to decoding the source.
    Failed(String),
}

impl PreviewOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, PreviewOutcome::Ready(_))
    }
}

struct JobState {
    state: PreviewState,
    outcome: Option<PreviewOutcome>,
}

struct PreviewJob {
    source: PathBuf,
    state: Mutex<JobState>,
    done: Condvar,
}

impl PreviewJob {
    fn new(source: PathBuf) -> Self {
        Self {
            source,
            state: Mutex::new(JobState {
                state: PreviewState::Pending,
                outcome: None,
            }),
            done: Condvar::new(),
        }
    }

    fn finish(&self, outcome: PreviewOutcome) {
        let mut state = self.state.lock();
        state.state = match outcome {
            PreviewOutcome::Ready(_) => PreviewState::Done,
            PreviewOutcome::Failed(_) => PreviewState::Failed,
        };
        state.outcome = Some(outcome);
        self.done.notify_all();
    }

    fn wait(&self) -> PreviewOutcome {
        let mut state = self.state.lock();
        while state.outcome.is_none() {
            self.done.wait(&mut state);
        }
        state.outcome.clone().unwrap()
    }
}

/// A caller's view of one preview request.
///
/// Either already resolved (the preview file was on disk) or attached to an
/// in-flight job shared with every other caller for the same source.
pub struct PreviewHandle {
    inner: HandleInner,
}

enum HandleInner {
    Resolved(PreviewOutcome),
    Attached(Arc<PreviewJob>),
}

impl PreviewHandle {
    fn resolved(outcome: PreviewOutcome) -> Self {
        Self {
            inner: HandleInner::Resolved(outcome),
        }
    }

    fn attached(job: Arc<PreviewJob>) -> Self {
        Self {
            inner: HandleInner::Attached(job),
        }
    }

    /// Block until the job reaches a terminal state.
    pub fn wait(&self) -> PreviewOutcome {
        match &self.inner {
            HandleInner::Resolved(outcome) => outcome.clone(),
            HandleInner::Attached(job) => job.wait(),
        }
    }

    /// Current lifecycle state, without blocking.
    pub fn state(&self) -> PreviewState {
        match &self.inner {
            HandleInner::Resolved(PreviewOutcome::Ready(_)) => PreviewState::Done,
            HandleInner::Resolved(PreviewOutcome::Failed(_)) => PreviewState::Failed,
            HandleInner::Attached(job) => job.state.lock().state,
        }
    }

    /// The terminal outcome if one has been reached.
    pub fn try_outcome(&self) -> Option<PreviewOutcome> {
        match &self.inner {
            HandleInner::Resolved(outcome) => Some(outcome.clone()),
            HandleInner::Attached(job) => job.state.lock().outcome.clone(),
        }
    }
}

/// Orchestrates preview generation across worker threads.
pub struct PreviewManager {
    io: Arc<dyn ImageIo>,
    preview_size: u32,
    in_flight: Arc<Mutex<HashMap<PathBuf, Arc<PreviewJob>>>>,
}

impl PreviewManager {
    pub fn new(io: Arc<dyn ImageIo>, preview_size: u32) -> Self {
        Self {
            io,
            preview_size,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Where the preview for `source` lives: `<dir>/thumbs/<stem>_th.<ext>`.
    pub fn preview_path(source: &Path) -> PathBuf {
        let dir = source.parent().unwrap_or_else(|| Path::new("."));
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match source.extension() {
            Some(ext) => format!("{stem}{PREVIEW_SUFFIX}.{}", ext.to_string_lossy()),
            None => format!("{stem}{PREVIEW_SUFFIX}"),
        };
        dir.join(PREVIEW_DIR).join(name)
    }

    /// Make sure a preview exists for `source`.
    ///
    /// Returns synchronously with a resolved handle when the preview file is
    /// already on disk. Joins the in-flight job when one exists for the same
    /// source. Otherwise starts a new generation job on a worker thread.
    pub fn ensure_preview(&self, source: &Path) -> PreviewHandle {
        let preview = Self::preview_path(source);

        // Checking the table and the disk under one lock keeps check-then-act
        // atomic; a racing completion is observed either way.
        let mut in_flight = self.in_flight.lock();
        if let Some(job) = in_flight.get(source).map(Arc::clone) {
            let outcome = job.state.lock().outcome.clone();
            match outcome {
                None => return PreviewHandle::attached(job),
                // Terminal record the worker has not reaped yet.
                Some(outcome @ PreviewOutcome::Ready(_)) => {
                    in_flight.remove(source);
                    return PreviewHandle::resolved(outcome);
                }
                Some(PreviewOutcome::Failed(_)) => {
                    in_flight.remove(source);
                }
            }
        }
        if self.io.exists(&preview) {
            return PreviewHandle::resolved(PreviewOutcome::Ready(preview));
        }
        self.start_job(&mut in_flight, source, preview)
    }

    /// Regenerate the preview for `source` after an edit.
    ///
    /// A job already in flight is joined rather than duplicated; otherwise the
    /// stale preview file is removed and generation starts fresh.
    pub fn update_preview(&self, source: &Path) -> PreviewHandle {
        let preview = Self::preview_path(source);

        let mut in_flight = self.in_flight.lock();
        if let Some(job) = in_flight.get(source).map(Arc::clone) {
            if job.state.lock().outcome.is_none() {
                return PreviewHandle::attached(job);
            }
            in_flight.remove(source);
        }
        if let Err(err) = fs::remove_file(&preview) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::debug!("could not remove stale preview {}: {err}", preview.display());
            }
        }
        self.start_job(&mut in_flight, source, preview)
    }

    /// Best-effort removal of the preview file for a deleted source.
    pub fn remove_preview(source: &Path) {
        let preview = Self::preview_path(source);
        if let Err(err) = fs::remove_file(&preview) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log::debug!("could not remove preview {}: {err}", preview.display());
            }
        }
    }

    /// Warm previews for a batch of sources in parallel, reporting progress
    /// as `(completed, total)`. Per-source coalescing still applies, so a
    /// batch never races the UI into duplicate decodes.
    pub fn pregenerate<F>(&self, sources: &[PathBuf], progress: F) -> Vec<(PathBuf, PreviewOutcome)>
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let total = sources.len();
        let completed = AtomicUsize::new(0);
        sources
            .par_iter()
            .map(|source| {
                let outcome = self.ensure_preview(source).wait();
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                progress(done, total);
                (source.clone(), outcome)
            })
            .collect()
    }

    /// Block until every in-flight job has reached a terminal state.
    pub fn drain(&self) {
        let jobs: Vec<Arc<PreviewJob>> = self.in_flight.lock().values().cloned().collect();
        for job in jobs {
            job.wait();
        }
    }

    /// Number of jobs currently tracked.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn start_job(
        &self,
        in_flight: &mut HashMap<PathBuf, Arc<PreviewJob>>,
        source: &Path,
        preview: PathBuf,
    ) -> PreviewHandle {
        let job = Arc::new(PreviewJob::new(source.to_path_buf()));
        in_flight.insert(source.to_path_buf(), Arc::clone(&job));

        let io = Arc::clone(&self.io);
        let table = Arc::clone(&self.in_flight);
        let worker_job = Arc::clone(&job);
        let preview_size = self.preview_size;
        thread::spawn(move || {
            run_generation(io, worker_job, table, preview, preview_size);
        });

        PreviewHandle::attached(job)
    }
}

fn run_generation(
    io: Arc<dyn ImageIo>,
    job: Arc<PreviewJob>,
    table: Arc<Mutex<HashMap<PathBuf, Arc<PreviewJob>>>>,
    preview: PathBuf,
    preview_size: u32,
) {
    job.state.lock().state = PreviewState::InProgress;
    log::debug!("generating preview for {}", job.source.display());

    let result = generate(io.as_ref(), &job.source, &preview, preview_size);
    let outcome = match result {
        Ok(()) => {
            log::debug!("preview ready: {}", preview.display());
            PreviewOutcome::Ready(preview)
        }
        Err(err) => {
            log::warn!("preview generation failed for {}: {err:#}", job.source.display());
            PreviewOutcome::Failed(format!("{err:#}"))
        }
    };

    // Publish the outcome before dropping the record: callers that already
    // joined are woken, later callers see the file on disk or start fresh.
    job.finish(outcome);

    // Only reap our own record; a joiner may have replaced it already.
    let mut table = table.lock();
    if let Some(current) = table.get(&job.source) {
        if Arc::ptr_eq(current, &job) {
            table.remove(&job.source);
        }
    }
}

fn generate(io: &dyn ImageIo, source: &Path, preview: &Path, preview_size: u32) -> anyhow::Result<()> {
    use anyhow::Context;

    let pixels = io.decode(source, Some((preview_size, preview_size)))?;
    if let Some(dir) = preview.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("could not create {}", dir.display()))?;
    }
    io.write(preview, &pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{bail, Result};
    use pixel_cache::PixelBuffer;
    use std::time::Duration;

    /// Test IO that counts decodes and can hold them open on a gate.
    struct GatedIo {
        decodes: AtomicUsize,
        writes: AtomicUsize,
        gate: Mutex<bool>,
        released: Condvar,
        fail_writes: bool,
    }

    impl GatedIo {
        fn new() -> Self {
            Self {
                decodes: AtomicUsize::new(0),
                writes: AtomicUsize::new(0),
                gate: Mutex::new(true),
                released: Condvar::new(),
                fail_writes: false,
            }
        }

        fn gated() -> Self {
            let mut io = Self::new();
            io.gate = Mutex::new(false);
            io
        }

        fn failing_writes() -> Self {
            let mut io = Self::new();
            io.fail_writes = true;
            io
        }

        fn release(&self) {
            *self.gate.lock() = true;
            self.released.notify_all();
        }

        fn decode_count(&self) -> usize {
            self.decodes.load(Ordering::SeqCst)
        }
    }

    impl ImageIo for GatedIo {
        fn decode(&self, _path: &Path, _target: Option<(u32, u32)>) -> Result<PixelBuffer> {
            self.decodes.fetch_add(1, Ordering::SeqCst);
            let mut open = self.gate.lock();
            while !*open {
                self.released.wait(&mut open);
            }
            Ok(PixelBuffer::new(2, 2, vec![0u8; 16]))
        }

        fn write(&self, path: &Path, pixels: &PixelBuffer) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes {
                bail!("read-only filesystem");
            }
            fs::write(path, pixels.data())?;
            Ok(())
        }
    }

    #[test]
    fn preview_path_is_side_by_side() {
        assert_eq!(
            PreviewManager::preview_path(Path::new("/photos/hike/IMG_0001.jpg")),
            Path::new("/photos/hike/thumbs/IMG_0001_th.jpg")
        );
        assert_eq!(
            PreviewManager::preview_path(Path::new("/photos/noext")),
            Path::new("/photos/thumbs/noext_th")
        );
    }

    #[test]
    fn concurrent_requests_share_one_decode() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"src").unwrap();

        let io = Arc::new(GatedIo::gated());
        let manager = PreviewManager::new(Arc::clone(&io) as Arc<dyn ImageIo>, PREVIEW_SIZE);

        let first = manager.ensure_preview(&source);
        // Give the worker a moment to enter the gated decode.
        while io.decode_count() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        let second = manager.ensure_preview(&source);
        assert_eq!(second.state(), PreviewState::InProgress);

        io.release();
        let a = first.wait();
        let b = second.wait();
        assert_eq!(a, b);
        assert!(a.is_ready());
        assert_eq!(io.decode_count(), 1);
    }

    #[test]
    fn done_preview_short_circuits_without_decoding() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"src").unwrap();

        let io = Arc::new(GatedIo::new());
        let manager = PreviewManager::new(Arc::clone(&io) as Arc<dyn ImageIo>, PREVIEW_SIZE);

        assert!(manager.ensure_preview(&source).wait().is_ready());
        assert_eq!(io.decode_count(), 1);

        // The preview file now exists, so no further decode happens.
        let handle = manager.ensure_preview(&source);
        assert_eq!(handle.state(), PreviewState::Done);
        assert!(handle.wait().is_ready());
        assert_eq!(io.decode_count(), 1);
    }

    #[test]
    fn write_failure_reports_failed_to_every_waiter() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"src").unwrap();

        let io = Arc::new(GatedIo::failing_writes());
        let manager = PreviewManager::new(Arc::clone(&io) as Arc<dyn ImageIo>, PREVIEW_SIZE);

        let outcome = manager.ensure_preview(&source).wait();
        assert!(matches!(outcome, PreviewOutcome::Failed(_)));

        // The failed record is reaped once its outcome has been reported.
        for _ in 0..200 {
            if manager.in_flight_count() == 0 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(manager.in_flight_count(), 0);
    }

    #[test]
    fn update_preview_regenerates_a_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.jpg");
        fs::write(&source, b"src").unwrap();

        let io = Arc::new(GatedIo::new());
        let manager = PreviewManager::new(Arc::clone(&io) as Arc<dyn ImageIo>, PREVIEW_SIZE);

        assert!(manager.ensure_preview(&source).wait().is_ready());
        assert_eq!(io.decode_count(), 1);

        // ensure_preview is idempotent, update_preview decodes again.
        assert!(manager.update_preview(&source).wait().is_ready());
        assert_eq!(io.decode_count(), 2);
    }

    #[test]
    fn pregenerate_reports_progress_for_each_source() {
        let dir = tempfile::tempdir().unwrap();
        let sources: Vec<PathBuf> = (0..4)
            .map(|i| {
                let path = dir.path().join(format!("img{i}.jpg"));
                fs::write(&path, b"src").unwrap();
                path
            })
            .collect();

        let io = Arc::new(GatedIo::new());
        let manager = PreviewManager::new(Arc::clone(&io) as Arc<dyn ImageIo>, PREVIEW_SIZE);

        let seen = AtomicUsize::new(0);
        let results = manager.pregenerate(&sources, |done, total| {
            assert!(done <= total);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|(_, outcome)| outcome.is_ready()));
        assert_eq!(seen.load(Ordering::SeqCst), 4);
        assert_eq!(io.decode_count(), 4);
    }
}
