// ============================================================================
// EDITOR: front door for a UI or the CLI
// ============================================================================
//
// Owns at most one `EditSession` plus the background-removal worker plumbing.
// Every method runs on the caller's thread except segmentation, which is
// handed to the rayon pool; its result comes back over an mpsc channel and is
// only applied if its job token is still the active one.
// ============================================================================

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::canvas::ImageBuffer;
use crate::io::{self, DecodeError, EncodeError, ExportFormat};
use crate::ops::adjustments::Adjustment;
use crate::ops::compositing::{self, Background, CompositingError};
use crate::ops::segmentation::{self, SeedRegion, SegmentationError, SegmentationMask};
use crate::session::EditSession;
use crate::settings::EditorSettings;

/// Messages from the segmentation worker.
enum JobEvent {
    Progress {
        token: u64,
        iteration: u32,
        total: u32,
    },
    Done {
        token: u64,
        result: Result<SegmentationMask, SegmentationError>,
    },
}

struct ActiveJob {
    token: u64,
    /// Session the job was started on; the result only lands there.
    session_id: Uuid,
    cancel: Arc<AtomicBool>,
    /// Buffer the mask is computed from and later applied to.
    source: ImageBuffer,
    started: Instant,
}

pub struct Editor {
    settings: EditorSettings,
    session: Option<EditSession>,
    job_sender: mpsc::Sender<JobEvent>,
    job_receiver: mpsc::Receiver<JobEvent>,
    /// Incremented for every spawned job; results carrying an older token are stale.
    job_token: u64,
    active_job: Option<ActiveJob>,
    /// Progress of the active job, kept after it completes until the next
    /// job starts or the job is discarded.
    job_progress: Option<(u32, u32)>,
}

impl Default for Editor {
    fn default() -> Self {
        Self::new(EditorSettings::default())
    }
}

impl Editor {
    pub fn new(settings: EditorSettings) -> Self {
        let (job_sender, job_receiver) = mpsc::channel();
        Self {
            settings,
            session: None,
            job_sender,
            job_receiver,
            job_token: 0,
            active_job: None,
            job_progress: None,
        }
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    pub fn session(&self) -> Option<&EditSession> {
        self.session.as_ref()
    }

    pub fn has_image(&self) -> bool {
        self.session.is_some()
    }

    /// Read-only handle to the live buffer for rendering.
    pub fn current_snapshot(&self) -> Option<ImageBuffer> {
        self.session.as_ref().map(|s| s.current_snapshot())
    }

    // ========================================================================
    // LOAD / EXPORT
    // ========================================================================

    /// Decode `bytes` and start a fresh session.  On failure the previous
    /// session (if any) is left untouched.
    pub fn load_image(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let image = io::decode(bytes).inspect_err(|e| log_warn!("Load failed: {}", e))?;
        self.start_session(EditSession::new("Untitled", image, self.settings.history_stack()));
        Ok(())
    }

    pub fn load_file(&mut self, path: &Path) -> Result<(), DecodeError> {
        let image = io::load_file(path)
            .inspect_err(|e| log_warn!("Load of '{}' failed: {}", path.display(), e))?;
        self.start_session(EditSession::from_file(path, image, self.settings.history_stack()));
        Ok(())
    }

    fn start_session(&mut self, session: EditSession) {
        self.supersede_job("new image loaded");
        let session = session.with_zoom_filter(self.settings.zoom_filter);
        let (w, h) = session.current().dimensions();
        log_info!(
            "Loaded '{}' ({}x{} {}) as session {}",
            session.name,
            w,
            h,
            session.current().mode(),
            session.id
        );
        self.session = Some(session);
    }

    /// Encode the current buffer.  JPEG flattens alpha onto the configured matte.
    pub fn export_image(&mut self, format: ExportFormat) -> Result<Vec<u8>, EncodeError> {
        let session = self.session.as_mut().ok_or(EncodeError::NoImage)?;
        let bytes = io::encode_with_matte(session.current(), format, self.settings.jpeg_matte)
            .inspect_err(|e| log_err!("Export failed: {}", e))?;
        session.mark_clean();
        log_info!("Exported '{}' as {} ({} bytes)", session.name, format.extension(), bytes.len());
        Ok(bytes)
    }

    /// Write the current buffer to `path`; the format comes from the
    /// extension unless given.
    pub fn export_file(&mut self, path: &Path, format: Option<ExportFormat>) -> Result<(), EncodeError> {
        let format = match format {
            Some(f) => f,
            None => ExportFormat::from_path(path)?.with_quality(self.settings.jpeg_quality),
        };
        let bytes = self.export_image(format)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    // ========================================================================
    // EDITS
    // ========================================================================

    /// Apply one adjustment as a single history entry.  No-op without an image.
    pub fn apply_adjustment(&mut self, kind: Adjustment) -> bool {
        if self.session.is_none() {
            return false;
        }
        self.supersede_job("image edited");
        if let Some(session) = self.session.as_mut() {
            session.apply_adjustment(kind);
        }
        true
    }

    pub fn begin_adjustment(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.begin_adjustment();
        }
    }

    pub fn preview_adjustment(&mut self, kind: Adjustment) {
        if self.session.is_none() {
            return;
        }
        self.supersede_job("image edited");
        if let Some(session) = self.session.as_mut() {
            session.preview_adjustment(kind);
        }
    }

    pub fn commit_adjustment(&mut self) -> bool {
        self.session.as_mut().is_some_and(|s| s.commit_adjustment())
    }

    pub fn cancel_adjustment(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.cancel_adjustment();
        }
    }

    /// A running background removal is discarded only if the undo moved
    /// `current`.
    pub fn undo(&mut self) -> bool {
        let moved = self.session.as_mut().is_some_and(|s| s.undo());
        if moved {
            self.supersede_job("undo");
        }
        moved
    }

    pub fn redo(&mut self) -> bool {
        let moved = self.session.as_mut().is_some_and(|s| s.redo());
        if moved {
            self.supersede_job("redo");
        }
        moved
    }

    pub fn reset_to_original(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.supersede_job("reset to original");
        if let Some(session) = self.session.as_mut() {
            session.reset_to_original();
        }
    }

    /// Composite the current (transparent) buffer over a colour or picture.
    pub fn set_background(&mut self, background: &Background) -> Result<(), CompositingError> {
        let Some(session) = self.session.as_mut() else {
            return Err(CompositingError::NoImage);
        };
        if let Err(e) = session.set_background(background) {
            log_warn!("Set background failed: {}", e);
            return Err(e);
        }
        self.supersede_job("background replaced");
        Ok(())
    }

    pub fn zoom_by(&mut self, factor: f32) -> Option<f32> {
        self.session.as_mut().map(|s| s.zoom_by(factor))
    }

    pub fn reset_zoom(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.reset_zoom();
        }
    }

    // ========================================================================
    // BACKGROUND REMOVAL (async)
    // ========================================================================

    /// Validate and start segmenting the current buffer on a worker thread.
    /// Returns the job token.  Any previous job is superseded.  A rejected
    /// request changes nothing, not even a pending slider gesture.
    pub fn remove_background(&mut self, seed: Option<SeedRegion>) -> Result<u64, SegmentationError> {
        let Some(session) = self.session.as_mut() else {
            return Err(SegmentationError::NoImage);
        };
        let source = session.current_snapshot();
        let params = self.settings.segmentation_params();
        if let Err(e) = segmentation::validate_request(&source, seed, &params) {
            log_warn!("Background removal rejected: {}", e);
            return Err(e);
        }
        if session.has_pending_adjustment() {
            session.commit_adjustment();
        }
        let session_id = session.id;

        self.supersede_job("new background removal started");
        self.job_token = self.job_token.wrapping_add(1);
        let token = self.job_token;
        let cancel = Arc::new(AtomicBool::new(false));
        self.job_progress = Some((0, params.iterations.max(1)));
        self.active_job = Some(ActiveJob {
            token,
            session_id,
            cancel: cancel.clone(),
            source: source.clone(),
            started: Instant::now(),
        });
        log_info!(
            "Background removal #{} started on session {} ({}x{}, {} iterations)",
            token,
            session_id,
            source.width(),
            source.height(),
            params.iterations
        );

        let sender = self.job_sender.clone();
        rayon::spawn(move || {
            let progress_sender = sender.clone();
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                segmentation::segment_foreground_with(&source, seed, &params, &cancel, |iteration, total| {
                    let _ = progress_sender.send(JobEvent::Progress { token, iteration, total });
                })
            }));
            let result = match outcome {
                Ok(r) => r,
                Err(panic_info) => {
                    let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.to_string()
                    } else {
                        "unknown panic payload".to_string()
                    };
                    Err(SegmentationError::WorkerFailed(msg))
                }
            };
            let _ = sender.send(JobEvent::Done { token, result });
        });
        Ok(token)
    }

    pub fn is_background_removal_running(&self) -> bool {
        self.active_job.is_some()
    }

    /// `(finished_iterations, total)` of the running job, or of the last job
    /// that finished.  `None` once a job has been discarded.
    pub fn background_removal_progress(&self) -> Option<(u32, u32)> {
        self.job_progress
    }

    /// Stop the running job; its result will be discarded.
    pub fn cancel_background_removal(&mut self) -> bool {
        let running = self.active_job.is_some();
        self.supersede_job("cancelled");
        running
    }

    /// Non-blocking: apply the finished result if it has arrived.
    /// `None` while still running or when no job is active.
    pub fn poll_background_removal(&mut self) -> Option<Result<(), SegmentationError>> {
        while let Ok(event) = self.job_receiver.try_recv() {
            if let Some(done) = self.handle_job_event(event) {
                return Some(done);
            }
        }
        None
    }

    /// Block until the active job finishes and apply its result.
    /// `None` when no job is active.
    pub fn wait_background_removal(&mut self) -> Option<Result<(), SegmentationError>> {
        while self.active_job.is_some() {
            let event = match self.job_receiver.recv() {
                Ok(ev) => ev,
                Err(_) => {
                    self.active_job = None;
                    return Some(Err(SegmentationError::WorkerFailed("worker channel closed".into())));
                }
            };
            if let Some(done) = self.handle_job_event(event) {
                return Some(done);
            }
        }
        None
    }

    fn handle_job_event(&mut self, event: JobEvent) -> Option<Result<(), SegmentationError>> {
        match event {
            JobEvent::Progress { token, iteration, total } => {
                if self.active_job.as_ref().is_some_and(|j| j.token == token) {
                    self.job_progress = Some((iteration, total));
                }
                None
            }
            JobEvent::Done { token, result } => {
                let is_active = self.active_job.as_ref().is_some_and(|j| j.token == token);
                if !is_active {
                    log_info!("Background removal #{} finished after being superseded; result discarded", token);
                    return None;
                }
                let job = self.active_job.take()?;
                Some(self.finish_job(job, result))
            }
        }
    }

    fn finish_job(
        &mut self,
        job: ActiveJob,
        result: Result<SegmentationMask, SegmentationError>,
    ) -> Result<(), SegmentationError> {
        let elapsed = job.started.elapsed().as_secs_f64();
        let mask = result.inspect_err(|e| log_warn!("Background removal #{} failed: {}", job.token, e))?;
        let cutout = compositing::apply_mask(&job.source, &mask).map_err(|e| {
            log_err!("Background removal #{}: {}", job.token, e);
            SegmentationError::WorkerFailed(e.to_string())
        })?;
        let session = self
            .session
            .as_mut()
            .filter(|s| s.id == job.session_id)
            .ok_or(SegmentationError::NoImage)?;
        session.commit_background_removal(cutout);
        log_info!(
            "Background removal #{} done in {:.2}s ({} of {} pixels kept)",
            job.token,
            elapsed,
            mask.foreground_count(),
            job.source.pixel_count()
        );
        Ok(())
    }

    fn supersede_job(&mut self, reason: &str) {
        if let Some(job) = self.active_job.take() {
            self.job_progress = None;
            job.cancel.store(true, Ordering::Relaxed);
            log_info!("Background removal #{} discarded: {}", job.token, reason);
        }
    }
}
