use std::path::{Path, PathBuf};

use crate::canvas::ResamplingPolicy;
use crate::components::history::{DEFAULT_MAX_HISTORY, HistoryStack};
use crate::io::DEFAULT_JPEG_MATTE;
use crate::ops::adjustments::DEFAULT_BLUR_RADIUS;
use crate::ops::segmentation::{
    DEFAULT_COMPONENTS, DEFAULT_ITERATIONS, DEFAULT_MARGIN, SegmentationParams,
};

pub const MAX_GMM_COMPONENTS: usize = 10;
const SETTINGS_FILE: &str = "retouch_settings.cfg";

/// Persistent editor preferences (`key=value` per line).
#[derive(Clone, Debug, PartialEq)]
pub struct EditorSettings {
    pub max_undo_steps: usize,
    /// Byte cap for the history in MiB; 0 = count cap only.
    pub history_memory_mb: usize,
    pub segmentation_iterations: u32,
    pub seed_margin: u32,
    pub gmm_components: usize,
    pub default_blur_radius: f32,
    pub jpeg_quality: u8,
    /// Colour that transparent pixels are flattened onto for JPEG.
    pub jpeg_matte: [u8; 3],
    pub zoom_filter: ResamplingPolicy,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            max_undo_steps: DEFAULT_MAX_HISTORY,
            history_memory_mb: 0,
            segmentation_iterations: DEFAULT_ITERATIONS,
            seed_margin: DEFAULT_MARGIN,
            gmm_components: DEFAULT_COMPONENTS,
            default_blur_radius: DEFAULT_BLUR_RADIUS,
            jpeg_quality: 90,
            jpeg_matte: DEFAULT_JPEG_MATTE,
            zoom_filter: ResamplingPolicy::Lanczos3,
        }
    }
}

impl EditorSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/retouch/retouch_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\retouch\retouch_settings.cfg
    /// On macOS:   ~/Library/Application Support/retouch/retouch_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("retouch");
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("retouch").join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("retouch")
                    .join(SETTINGS_FILE),
            );
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join(SETTINGS_FILE)))
        }
    }

    /// Load settings from disk (defaults if the file is missing or unreadable).
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::settings_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    /// Parse `key=value` lines.  Unknown keys, comments and bad values are
    /// skipped; the result is sanitised.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "max_undo_steps" => {
                    if let Ok(v) = val.parse() {
                        s.max_undo_steps = v;
                    }
                }
                "history_memory_mb" => {
                    if let Ok(v) = val.parse() {
                        s.history_memory_mb = v;
                    }
                }
                "segmentation_iterations" => {
                    if let Ok(v) = val.parse() {
                        s.segmentation_iterations = v;
                    }
                }
                "seed_margin" => {
                    if let Ok(v) = val.parse() {
                        s.seed_margin = v;
                    }
                }
                "gmm_components" => {
                    if let Ok(v) = val.parse() {
                        s.gmm_components = v;
                    }
                }
                "default_blur_radius" => {
                    if let Ok(v) = val.parse::<f32>()
                        && v.is_finite()
                        && v >= 0.0
                    {
                        s.default_blur_radius = v;
                    }
                }
                "jpeg_quality" => {
                    if let Ok(v) = val.parse() {
                        s.jpeg_quality = v;
                    }
                }
                "jpeg_matte" => {
                    if let Some(c) = parse_rgb(val) {
                        s.jpeg_matte = c;
                    }
                }
                "zoom_filter" => {
                    s.zoom_filter = match val.to_lowercase().as_str() {
                        "nearest" => ResamplingPolicy::Nearest,
                        "linear" => ResamplingPolicy::Linear,
                        "lanczos" | "lanczos3" => ResamplingPolicy::Lanczos3,
                        _ => s.zoom_filter,
                    };
                }
                _ => {}
            }
        }
        s.sanitize();
        s
    }

    pub fn to_config_string(&self) -> String {
        let filter_str = match self.zoom_filter {
            ResamplingPolicy::Nearest => "nearest",
            ResamplingPolicy::Linear => "linear",
            ResamplingPolicy::Lanczos3 => "lanczos",
        };
        let [r, g, b] = self.jpeg_matte;
        format!(
            "max_undo_steps={}\n\
             history_memory_mb={}\n\
             segmentation_iterations={}\n\
             seed_margin={}\n\
             gmm_components={}\n\
             default_blur_radius={}\n\
             jpeg_quality={}\n\
             jpeg_matte={},{},{}\n\
             zoom_filter={filter_str}\n",
            self.max_undo_steps,
            self.history_memory_mb,
            self.segmentation_iterations,
            self.seed_margin,
            self.gmm_components,
            self.default_blur_radius,
            self.jpeg_quality,
            r,
            g,
            b,
        )
    }

    fn sanitize(&mut self) {
        self.max_undo_steps = self.max_undo_steps.max(1);
        self.segmentation_iterations = self.segmentation_iterations.max(1);
        self.gmm_components = self.gmm_components.clamp(1, MAX_GMM_COMPONENTS);
        self.jpeg_quality = self.jpeg_quality.clamp(1, 100);
    }

    /// Fresh, empty history stack configured from these settings.
    pub fn history_stack(&self) -> HistoryStack {
        let cap = (self.history_memory_mb > 0).then(|| self.history_memory_mb * 1024 * 1024);
        HistoryStack::new(self.max_undo_steps).with_memory_limit(cap)
    }

    pub fn segmentation_params(&self) -> SegmentationParams {
        SegmentationParams {
            iterations: self.segmentation_iterations,
            margin: self.seed_margin,
            components: self.gmm_components,
        }
    }
}

/// Parse "r,g,b".
pub fn parse_rgb(s: &str) -> Option<[u8; 3]> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 3 {
        return None;
    }
    let r = parts[0].trim().parse::<u8>().ok()?;
    let g = parts[1].trim().parse::<u8>().ok()?;
    let b = parts[2].trim().parse::<u8>().ok()?;
    Some([r, g, b])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_text() {
        let s = EditorSettings::default();
        assert_eq!(EditorSettings::parse(&s.to_config_string()), s);
    }

    #[test]
    fn unknown_keys_and_bad_values_fall_back() {
        let s = EditorSettings::parse(
            "# comment\n\
             max_undo_steps=abc\n\
             theme=dark\n\
             jpeg_matte=1,2\n\
             zoom_filter=bicubic\n\
             default_blur_radius=-3\n\
             seed_margin=4\n",
        );
        let d = EditorSettings::default();
        assert_eq!(s.max_undo_steps, d.max_undo_steps);
        assert_eq!(s.jpeg_matte, d.jpeg_matte);
        assert_eq!(s.zoom_filter, d.zoom_filter);
        assert_eq!(s.default_blur_radius, d.default_blur_radius);
        assert_eq!(s.seed_margin, 4);
    }

    #[test]
    fn values_are_sanitised() {
        let s = EditorSettings::parse(
            "max_undo_steps=0\nsegmentation_iterations=0\ngmm_components=99\njpeg_quality=0\n",
        );
        assert_eq!(s.max_undo_steps, 1);
        assert_eq!(s.segmentation_iterations, 1);
        assert_eq!(s.gmm_components, MAX_GMM_COMPONENTS);
        assert_eq!(s.jpeg_quality, 1);
    }

    #[test]
    fn save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let s = EditorSettings {
            max_undo_steps: 7,
            jpeg_matte: [0, 0, 0],
            zoom_filter: ResamplingPolicy::Nearest,
            ..Default::default()
        };
        s.save_to(&path).unwrap();
        assert_eq!(EditorSettings::load_from(&path), s);
        assert_eq!(EditorSettings::load_from(&dir.path().join("missing.cfg")), EditorSettings::default());
    }

    #[test]
    fn history_stack_uses_caps() {
        let s = EditorSettings { max_undo_steps: 3, ..Default::default() };
        assert_eq!(s.history_stack().capacity(), 3);
        assert_eq!(s.segmentation_params(), SegmentationParams::default());
    }
}
