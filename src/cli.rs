// ============================================================================
// retouch CLI: headless batch editing via command-line arguments
// ============================================================================
//
// Usage examples:
//   retouch -i photo.png --op grayscale -o result.png
//   retouch -i photo.jpg --op saturation=1.4 --op blur=2 -o out.jpg -q 85
//   retouch -i *.jpg --remove-bg --bg-color 0,0,255 --output-dir processed/
//   retouch -i portrait.png --remove-bg --seed 40,20,300,420 -o cutout.png
//
// Every file goes through its own `Editor`, so operations run exactly as an
// interactive session would run them (history, background job and all).

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Instant;

use clap::Parser;

use crate::io::{self, ExportFormat};
use crate::editor::Editor;
use crate::ops::adjustments::Adjustment;
use crate::ops::compositing::Background;
use crate::ops::segmentation::SeedRegion;
use crate::settings::{self, EditorSettings};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// retouch headless image editor.
///
/// Apply adjustments, remove backgrounds and convert between formats.
#[derive(Parser, Debug)]
#[command(
    name = "retouch",
    about = "Headless photo retouching: adjustments, background removal, format conversion",
    long_about = "Apply colour adjustments and filters, cut out the foreground and\n\
                  replace the background, then write PNG, JPEG or BMP.\n\n\
                  Example:\n  \
                  retouch -i photo.png --op sepia --op brightness=1.2 -o result.png\n  \
                  retouch -i *.jpg --remove-bg --bg-color 255,255,255 --output-dir out/"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "shots/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    /// Files are written here with the original stem and the target format's extension.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpeg, bmp.
    /// When omitted, the format is inferred from --output's extension, defaulting to png.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG quality (1–100). Defaults to the configured quality.
    #[arg(short, long, value_name = "1-100")]
    pub quality: Option<u8>,

    /// Operation to apply, repeatable and run in order:
    /// grayscale, negative, sepia, blur[=RADIUS] (default from settings), saturation=F, brightness=F,
    /// undo, redo, reset.
    #[arg(long = "op", value_name = "KIND[=VALUE]")]
    pub ops: Vec<CliOp>,

    /// Cut out the foreground after the operations have run.
    #[arg(long)]
    pub remove_bg: bool,

    /// Seed rectangle for --remove-bg as X,Y,W,H (default: image inset by the margin).
    #[arg(long, value_name = "X,Y,W,H", requires = "remove_bg")]
    pub seed: Option<SeedRegion>,

    /// Solid colour to put behind the cut-out, as R,G,B.
    #[arg(long, value_name = "R,G,B", value_parser = parse_color, conflicts_with = "bg_image")]
    pub bg_color: Option<[u8; 3]>,

    /// Picture to put behind the cut-out (stretched to fit).
    #[arg(long, value_name = "FILE")]
    pub bg_image: Option<PathBuf>,

    /// Echo the session log to stderr and print per-file timing.
    #[arg(short, long)]
    pub verbose: bool,
}

/// One step of the per-file pipeline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CliOp {
    Adjust(Adjustment),
    /// `blur` without a radius: uses `default_blur_radius` from the settings.
    DefaultBlur,
    Undo,
    Redo,
    Reset,
}

impl FromStr for CliOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "undo" => Ok(CliOp::Undo),
            "redo" => Ok(CliOp::Redo),
            "reset" => Ok(CliOp::Reset),
            "blur" => Ok(CliOp::DefaultBlur),
            _ => s.parse::<Adjustment>().map(CliOp::Adjust),
        }
    }
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    crate::logger::set_echo(args.verbose);

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let settings = EditorSettings::load();
    let format = match parse_format(args.format.as_deref(), args.output.as_deref()) {
        Ok(f) => f.with_quality(args.quality.unwrap_or(settings.jpeg_quality)),
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let background = match (&args.bg_color, &args.bg_image) {
        (Some(c), _) => Some(Background::Solid(*c)),
        (None, Some(path)) => match io::load_file(path) {
            Ok(img) => Some(Background::Image(img)),
            Err(e) => {
                eprintln!("error: could not load background image '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        (None, None) => None,
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let job = Job {
        ops: &args.ops,
        remove_bg: args.remove_bg,
        seed: args.seed,
        background: background.as_ref(),
        format,
    };

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }

        let file_start = Instant::now();

        let Some(output_path) = build_output_path(
            input_path,
            args.output.as_deref(),
            args.output_dir.as_deref(),
            format,
        ) else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        match run_one(input_path, &output_path, &job, settings.clone()) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                log_err!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

/// Everything that is the same for every input file.
struct Job<'a> {
    ops: &'a [CliOp],
    remove_bg: bool,
    seed: Option<SeedRegion>,
    background: Option<&'a Background>,
    format: ExportFormat,
}

fn run_one(input: &Path, output: &Path, job: &Job<'_>, settings: EditorSettings) -> Result<(), String> {
    let mut editor = Editor::new(settings);

    // -- Step 1: Load ----------------------------------------------------
    editor
        .load_file(input)
        .map_err(|e| format!("load failed: {}", e))?;

    // -- Step 2: Operations ----------------------------------------------
    for op in job.ops {
        match op {
            CliOp::Adjust(kind) => {
                editor.apply_adjustment(*kind);
            }
            CliOp::DefaultBlur => {
                let radius = editor.settings().default_blur_radius;
                editor.apply_adjustment(Adjustment::Blur { radius });
            }
            CliOp::Undo => {
                editor.undo();
            }
            CliOp::Redo => {
                editor.redo();
            }
            CliOp::Reset => editor.reset_to_original(),
        }
    }

    // -- Step 3: Background ----------------------------------------------
    if job.remove_bg {
        editor
            .remove_background(job.seed)
            .map_err(|e| format!("background removal failed: {}", e))?;
        match editor.wait_background_removal() {
            Some(Ok(())) => {}
            Some(Err(e)) => return Err(format!("background removal failed: {}", e)),
            None => return Err("background removal did not complete".to_string()),
        }
    }
    if let Some(bg) = job.background {
        editor
            .set_background(bg)
            .map_err(|e| format!("set background failed: {}", e))?;
    }

    // -- Step 4: Save ----------------------------------------------------
    editor
        .export_file(output, Some(job.format))
        .map_err(|e| format!("save failed: {}", e))?;

    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Choose the format from `--format` or the output file extension.
/// Defaults to PNG when neither is given.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Result<ExportFormat, String> {
    if let Some(f) = format_arg {
        return ExportFormat::from_name(f).map_err(|e| e.to_string());
    }
    if let Some(out) = output
        && out.extension().is_some()
    {
        return ExportFormat::from_path(out).map_err(|e| e.to_string());
    }
    Ok(ExportFormat::Png)
}

/// `--bg-color` value parser.
fn parse_color(s: &str) -> Result<[u8; 3], String> {
    settings::parse_rgb(s).ok_or_else(|| format!("expected R,G,B with values 0-255, got '{}'", s))
}

/// Compute the output path for a single input file.
///
/// Priority:
/// 1. `--output` (explicit path, used for single-file input)
/// 2. `--output-dir` (batch directory, derives filename from input stem)
/// 3. Fallback: same directory as input, same stem, new extension
///    (appends `_out` to stem if it would collide with the input path)
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: ExportFormat,
) -> Option<PathBuf> {
    if let Some(out) = output {
        return Some(out.to_path_buf());
    }

    let ext = format.extension();
    let stem = input.file_stem()?.to_string_lossy().into_owned();

    if let Some(dir) = output_dir {
        return Some(dir.join(format!("{}.{}", stem, ext)));
    }

    let parent = input.parent().unwrap_or(Path::new("."));
    let candidate = parent.join(format!("{}.{}", stem, ext));

    // Avoid silent overwrite of the input
    if candidate == input {
        Some(parent.join(format!("{}_out.{}", stem, ext)))
    } else {
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{ChannelMode, ImageBuffer};
    use clap::CommandFactory;

    #[test]
    fn clap_definition_is_valid() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn parses_full_command_line() {
        let args = CliArgs::try_parse_from([
            "retouch", "-i", "a.png", "--op", "sepia", "--op", "blur=3", "--op", "undo",
            "--remove-bg", "--seed", "1,2,30,40", "--bg-color", "0,0,255", "-o", "out.jpg",
        ])
        .unwrap();
        assert_eq!(
            args.ops,
            vec![
                CliOp::Adjust(Adjustment::Sepia),
                CliOp::Adjust(Adjustment::Blur { radius: 3.0 }),
                CliOp::Undo
            ]
        );
        assert_eq!(args.seed, Some(SeedRegion::new(1, 2, 30, 40)));
        assert_eq!(args.bg_color, Some([0, 0, 255]));
        assert!(CliArgs::try_parse_from(["retouch", "-i", "a.png", "--op", "emboss"]).is_err());
        assert!(
            CliArgs::try_parse_from(["retouch", "-i", "a.png", "--bg-color", "1,2,3", "--bg-image", "b.png"])
                .is_err()
        );
    }

    #[test]
    fn format_selection() {
        assert_eq!(parse_format(None, None), Ok(ExportFormat::Png));
        assert_eq!(
            parse_format(None, Some(Path::new("x.jpeg"))),
            Ok(ExportFormat::Jpeg { quality: 90 })
        );
        assert_eq!(parse_format(Some("bmp"), Some(Path::new("x.png"))), Ok(ExportFormat::Bmp));
        assert!(parse_format(Some("tiff"), None).is_err());
    }

    #[test]
    fn output_paths() {
        let png = ExportFormat::Png;
        assert_eq!(
            build_output_path(Path::new("in/a.jpg"), None, Some(Path::new("out")), png),
            Some(PathBuf::from("out/a.png"))
        );
        assert_eq!(
            build_output_path(Path::new("in/a.png"), None, None, png),
            Some(PathBuf::from("in/a_out.png"))
        );
        assert_eq!(
            build_output_path(Path::new("in/a.png"), Some(Path::new("z.bmp")), None, png),
            Some(PathBuf::from("z.bmp"))
        );
    }

    #[test]
    fn run_one_writes_edited_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("red.png");
        let output = dir.path().join("gray.bmp");
        let red = ImageBuffer::filled(4, 4, ChannelMode::Rgb, &[255, 0, 0]).unwrap();
        io::write_file(&red, &input, ExportFormat::Png, [255, 255, 255]).unwrap();

        let ops = [CliOp::Adjust(Adjustment::Grayscale)];
        let job = Job {
            ops: &ops,
            remove_bg: false,
            seed: None,
            background: None,
            format: ExportFormat::Bmp,
        };
        run_one(&input, &output, &job, EditorSettings::default()).unwrap();
        let out = io::load_file(&output).unwrap();
        assert!(out.as_raw().chunks(3).all(|p| p == [76, 76, 76]));
    }

    #[test]
    fn bare_blur_uses_configured_radius() {
        assert_eq!("blur".parse::<CliOp>(), Ok(CliOp::DefaultBlur));
        assert_eq!("BLUR".parse::<CliOp>(), Ok(CliOp::DefaultBlur));

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("dot.png");
        let mut data = vec![0u8; 9 * 9 * 3];
        data[(4 * 9 + 4) * 3..(4 * 9 + 4) * 3 + 3].copy_from_slice(&[255, 255, 255]);
        let dot = ImageBuffer::new(9, 9, ChannelMode::Rgb, data).unwrap();
        io::write_file(&dot, &input, ExportFormat::Png, [255, 255, 255]).unwrap();

        let ops = [CliOp::DefaultBlur];
        let job = Job {
            ops: &ops,
            remove_bg: false,
            seed: None,
            background: None,
            format: ExportFormat::Png,
        };
        let settings = EditorSettings { default_blur_radius: 0.5, ..Default::default() };
        let narrow_path = dir.path().join("narrow.png");
        run_one(&input, &narrow_path, &job, settings).unwrap();
        let settings = EditorSettings { default_blur_radius: 3.0, ..Default::default() };
        let wide_path = dir.path().join("wide.png");
        run_one(&input, &wide_path, &job, settings).unwrap();

        let narrow = io::load_file(&narrow_path).unwrap();
        let wide = io::load_file(&wide_path).unwrap();
        assert_eq!(narrow, crate::ops::filters::gaussian_blur(&dot, 0.5));
        assert_eq!(wide, crate::ops::filters::gaussian_blur(&dot, 3.0));
        assert!(wide.pixel(4, 4)[0] < narrow.pixel(4, 4)[0]);
    }

    #[test]
    fn run_one_reports_background_on_opaque_image() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.png");
        let img = ImageBuffer::filled(4, 4, ChannelMode::Rgb, &[1, 2, 3]).unwrap();
        io::write_file(&img, &input, ExportFormat::Png, [255, 255, 255]).unwrap();
        let bg = Background::Solid([0, 0, 0]);
        let job = Job {
            ops: &[],
            remove_bg: false,
            seed: None,
            background: Some(&bg),
            format: ExportFormat::Png,
        };
        let err = run_one(&input, &dir.path().join("o.png"), &job, EditorSettings::default()).unwrap_err();
        assert!(err.starts_with("set background failed"));
    }
}
