use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::canvas::{ImageBuffer, ResamplingPolicy};
use crate::components::history::HistoryStack;
use crate::ops::adjustments::Adjustment;
use crate::ops::compositing::{self, Background, CompositingError};

pub const MIN_ZOOM: f32 = 0.1;
pub const MAX_ZOOM: f32 = 10.0;
pub const ZOOM_IN_FACTOR: f32 = 1.1;
pub const ZOOM_OUT_FACTOR: f32 = 0.9;

/// Slider gesture in progress: every preview is recomputed from `base`.
#[derive(Debug)]
struct Gesture {
    base: ImageBuffer,
    last: Option<Adjustment>,
}

/// Single open image: the pristine original, the live buffer and its history.
#[derive(Debug)]
pub struct EditSession {
    pub id: Uuid,
    /// Display name (file name or "Untitled").
    pub name: String,
    pub path: Option<PathBuf>,
    pub is_dirty: bool,
    original: ImageBuffer,
    current: ImageBuffer,
    history: HistoryStack,
    zoom_level: f32,
    zoom_filter: ResamplingPolicy,
    gesture: Option<Gesture>,
    status: String,
}

impl EditSession {
    /// Start a session on `image`; `history` is reset to it as the baseline.
    pub fn new(name: impl Into<String>, image: ImageBuffer, mut history: HistoryStack) -> Self {
        let name = name.into();
        history.reset(image.clone());
        Self {
            id: Uuid::new_v4(),
            status: format!("Loaded: {}", name),
            name,
            path: None,
            is_dirty: false,
            original: image.clone(),
            current: image,
            history,
            zoom_level: 1.0,
            zoom_filter: ResamplingPolicy::default(),
            gesture: None,
        }
    }

    pub fn from_file(path: &Path, image: ImageBuffer, history: HistoryStack) -> Self {
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let mut session = Self::new(name, image, history);
        session.path = Some(path.to_path_buf());
        session
    }

    pub fn with_zoom_filter(mut self, policy: ResamplingPolicy) -> Self {
        self.zoom_filter = policy;
        self
    }

    pub fn original(&self) -> &ImageBuffer {
        &self.original
    }

    pub fn current(&self) -> &ImageBuffer {
        &self.current
    }

    /// Cheap handle to the live buffer (pixels are shared, not copied).
    pub fn current_snapshot(&self) -> ImageBuffer {
        self.current.clone()
    }

    pub fn history(&self) -> &HistoryStack {
        &self.history
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn mark_clean(&mut self) {
        self.is_dirty = false;
    }

    // ========================================================================
    // ADJUSTMENTS
    // ========================================================================

    /// Capture the current buffer as the base for a slider gesture.
    /// An unfinished gesture is committed first.
    pub fn begin_adjustment(&mut self) {
        self.finish_gesture();
        self.gesture = Some(Gesture {
            base: self.current.clone(),
            last: None,
        });
    }

    /// Recompute `kind` from the gesture base and show it as `current`.
    /// No history entry is written until [`commit_adjustment`](Self::commit_adjustment).
    pub fn preview_adjustment(&mut self, kind: Adjustment) {
        if self.gesture.is_none() {
            self.begin_adjustment();
        }
        if let Some(gesture) = self.gesture.as_mut() {
            self.current = kind.apply(&gesture.base);
            gesture.last = Some(kind);
        }
    }

    /// End the gesture with exactly one history entry (none if nothing was
    /// previewed).  Returns true when an entry was written.
    pub fn commit_adjustment(&mut self) -> bool {
        let Some(gesture) = self.gesture.take() else {
            return false;
        };
        let Some(kind) = gesture.last else {
            return false;
        };
        let description = kind.description();
        self.history.save(description.clone(), self.current.clone());
        self.is_dirty = true;
        self.status = format!("Applied: {}", description);
        log_info!("Applied {} to '{}'", description, self.name);
        true
    }

    /// Drop the preview and restore the gesture base.
    pub fn cancel_adjustment(&mut self) {
        if let Some(gesture) = self.gesture.take() {
            self.current = gesture.base;
            self.status = "Adjustment cancelled".to_string();
        }
    }

    pub fn has_pending_adjustment(&self) -> bool {
        self.gesture.is_some()
    }

    /// One-shot adjustment: begin, preview and commit.
    pub fn apply_adjustment(&mut self, kind: Adjustment) {
        self.begin_adjustment();
        self.preview_adjustment(kind);
        self.commit_adjustment();
    }

    fn finish_gesture(&mut self) {
        if self.gesture.is_some() {
            self.commit_adjustment();
        }
    }

    // ========================================================================
    // HISTORY
    // ========================================================================

    /// Returns false when already at the oldest surviving entry.
    pub fn undo(&mut self) -> bool {
        self.finish_gesture();
        match self.history.undo() {
            Some(snapshot) => {
                self.current = snapshot;
                self.is_dirty = true;
                self.status = "Undo last operation".to_string();
                log_info!("Undo on '{}' ({} steps left)", self.name, self.history.undo_count() - 1);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        self.finish_gesture();
        match self.history.redo() {
            Some(snapshot) => {
                self.current = snapshot;
                self.is_dirty = true;
                self.status = "Redo last operation".to_string();
                log_info!("Redo on '{}'", self.name);
                true
            }
            None => false,
        }
    }

    /// Back to the loaded image.  Both logs are cleared and re-seeded with
    /// the original; zoom is reset.
    pub fn reset_to_original(&mut self) {
        self.finish_gesture();
        self.current = self.original.clone();
        self.history.reset(self.original.clone());
        self.zoom_level = 1.0;
        self.is_dirty = false;
        self.status = "Reset to original".to_string();
        log_info!("Reset '{}' to original", self.name);
    }

    // ========================================================================
    // BACKGROUND
    // ========================================================================

    /// Install a finished background-removal result as one history entry.
    pub fn commit_background_removal(&mut self, cutout: ImageBuffer) {
        self.finish_gesture();
        self.current = cutout;
        self.history.save("Remove Background", self.current.clone());
        self.is_dirty = true;
        self.status = "Background removed".to_string();
    }

    /// Composite the (transparent) current buffer over `background`.
    /// A pending gesture is committed only once the composite succeeds, so a
    /// rejected background leaves history untouched.
    pub fn set_background(&mut self, background: &Background) -> Result<(), CompositingError> {
        let composed = compositing::composite_over_background(&self.current, background)?;
        self.finish_gesture();
        let description = background.description();
        self.current = composed;
        self.history.save(description.clone(), self.current.clone());
        self.is_dirty = true;
        self.status = format!("Applied: {}", description);
        log_info!("{} on '{}'", description, self.name);
        Ok(())
    }

    // ========================================================================
    // VIEW
    // ========================================================================

    pub fn zoom_level(&self) -> f32 {
        self.zoom_level
    }

    /// Multiply the zoom level, clamped to [`MIN_ZOOM`, `MAX_ZOOM`].
    pub fn zoom_by(&mut self, factor: f32) -> f32 {
        if factor.is_finite() && factor > 0.0 {
            self.zoom_level = (self.zoom_level * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        }
        self.zoom_level
    }

    pub fn zoom_in(&mut self) -> f32 {
        self.zoom_by(ZOOM_IN_FACTOR)
    }

    pub fn zoom_out(&mut self) -> f32 {
        self.zoom_by(ZOOM_OUT_FACTOR)
    }

    pub fn reset_zoom(&mut self) {
        self.zoom_level = 1.0;
    }

    /// `current` scaled by the zoom level for rendering.  Never recorded.
    pub fn display_snapshot(&self) -> ImageBuffer {
        let w = (self.current.width() as f32 * self.zoom_level).round() as u32;
        let h = (self.current.height() as f32 * self.zoom_level).round() as u32;
        self.current.resize(w, h, self.zoom_filter)
    }

    /// "Size: 640x480 | Mode: RGB | Zoom: 100%"
    pub fn image_info(&self) -> String {
        format!(
            "Size: {}x{} | Mode: {} | Zoom: {:.0}%",
            self.current.width(),
            self.current.height(),
            self.current.mode(),
            self.zoom_level * 100.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::ChannelMode;

    fn session() -> EditSession {
        let img = ImageBuffer::new(
            2,
            1,
            ChannelMode::Rgb,
            vec![100, 150, 200, 10, 20, 30],
        )
        .unwrap();
        EditSession::new("test.png", img, HistoryStack::default())
    }

    #[test]
    fn gesture_previews_from_base_and_commits_once() {
        let mut s = session();
        s.begin_adjustment();
        s.preview_adjustment(Adjustment::Brightness(0.5));
        s.preview_adjustment(Adjustment::Brightness(2.0));
        s.preview_adjustment(Adjustment::Brightness(1.0));
        // Recomputed from the base each time, so returning to 1.0 is exact.
        assert_eq!(s.current(), s.original());
        assert_eq!(s.history().undo_count(), 1);
        assert!(s.commit_adjustment());
        assert_eq!(s.history().undo_count(), 2);
        assert_eq!(s.history().undo_description(), Some("Brightness (100%)"));
        assert!(!s.has_pending_adjustment());
    }

    #[test]
    fn cancel_restores_base_without_history() {
        let mut s = session();
        s.preview_adjustment(Adjustment::Saturation(0.0));
        assert_ne!(s.current(), s.original());
        s.cancel_adjustment();
        assert_eq!(s.current(), s.original());
        assert_eq!(s.history().undo_count(), 1);
        assert!(!s.commit_adjustment());
    }

    #[test]
    fn undo_mid_gesture_commits_first() {
        let mut s = session();
        s.apply_adjustment(Adjustment::Negative);
        s.preview_adjustment(Adjustment::Sepia);
        assert!(s.undo());
        // Sepia was committed then undone; the negative is showing.
        assert_eq!(s.current(), &crate::ops::adjustments::negative(s.original()));
        assert_eq!(s.history().redo_description(), Some("Sepia Tone"));
    }

    #[test]
    fn reset_clears_history_and_zoom() {
        let mut s = session();
        s.apply_adjustment(Adjustment::Grayscale);
        s.zoom_in();
        s.reset_to_original();
        assert_eq!(s.current(), s.original());
        assert_eq!(s.zoom_level(), 1.0);
        assert!(!s.history().can_undo());
        assert!(!s.history().can_redo());
        assert_eq!(s.status(), "Reset to original");
    }

    #[test]
    fn zoom_is_clamped_and_display_is_scaled() {
        let mut s = session();
        for _ in 0..100 {
            s.zoom_in();
        }
        assert_eq!(s.zoom_level(), MAX_ZOOM);
        for _ in 0..200 {
            s.zoom_out();
        }
        assert_eq!(s.zoom_level(), MIN_ZOOM);
        assert_eq!(s.display_snapshot().dimensions(), (1, 1));
        s.reset_zoom();
        s.zoom_by(2.0);
        assert_eq!(s.display_snapshot().dimensions(), (4, 2));
        assert_eq!(s.current().dimensions(), (2, 1));
        assert_eq!(s.image_info(), "Size: 2x1 | Mode: RGB | Zoom: 200%");
    }

    #[test]
    fn set_background_needs_alpha() {
        let mut s = session();
        assert_eq!(
            s.set_background(&Background::Solid([0, 0, 255])),
            Err(CompositingError::NotRgba(ChannelMode::Rgb))
        );
        assert_eq!(s.history().undo_count(), 1);
        assert_eq!(s.current(), s.original());
    }

    #[test]
    fn rejected_background_keeps_gesture_open() {
        let mut s = session();
        s.preview_adjustment(Adjustment::Brightness(1.5));
        let preview = s.current_snapshot();
        assert!(s.set_background(&Background::Solid([0, 0, 0])).is_err());
        assert_eq!(s.history().undo_count(), 1);
        assert!(s.has_pending_adjustment());
        assert_eq!(s.current(), &preview);
        s.cancel_adjustment();
        assert_eq!(s.current(), s.original());
    }

    #[test]
    fn every_session_gets_its_own_id() {
        assert_ne!(session().id, session().id);
    }
}
