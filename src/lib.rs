//! Image editing-session engine: decode an image, apply non-destructive
//! adjustments with bounded undo/redo, cut out the foreground with an
//! iterative graph-cut segmentation, composite it over a new background and
//! export the result.
//!
//! [`editor::Editor`] is the entry point for a UI or script; the engines under
//! [`ops`] are plain functions over [`canvas::ImageBuffer`].

#[macro_use]
pub mod logger;

pub mod canvas;
pub mod cli;
pub mod components;
pub mod editor;
pub mod io;
pub mod ops;
pub mod session;
pub mod settings;

pub use canvas::{BufferError, ChannelMode, ImageBuffer, ResamplingPolicy};
pub use components::history::HistoryStack;
pub use editor::Editor;
pub use io::{DecodeError, EncodeError, ExportFormat};
pub use ops::adjustments::Adjustment;
pub use ops::compositing::{Background, CompositingError};
pub use ops::segmentation::{SeedRegion, SegmentationError, SegmentationMask, SegmentationParams};
pub use session::EditSession;
pub use settings::EditorSettings;
