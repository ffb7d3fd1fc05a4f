// End-to-end editing sessions driven through `Editor`, the way a UI would.

use retouch::io;
use retouch::{
    Adjustment, Background, ChannelMode, CompositingError, Editor, EditorSettings, ExportFormat,
    ImageBuffer,
};

fn png_bytes(img: &ImageBuffer) -> Vec<u8> {
    io::encode(img, ExportFormat::Png).unwrap()
}

fn loaded(img: &ImageBuffer) -> Editor {
    let mut editor = Editor::default();
    editor.load_image(&png_bytes(img)).unwrap();
    editor
}

/// `size`×`size` white canvas with a dark blue square spanning `lo..hi`.
fn subject(size: u32, lo: u32, hi: u32) -> ImageBuffer {
    let mut data = Vec::new();
    for y in 0..size {
        for x in 0..size {
            if (lo..hi).contains(&x) && (lo..hi).contains(&y) {
                data.extend_from_slice(&[20, 30, 120]);
            } else {
                data.extend_from_slice(&[250, 250, 250]);
            }
        }
    }
    ImageBuffer::new(size, size, ChannelMode::Rgb, data).unwrap()
}

#[test]
fn grayscale_then_undo_restores_red() {
    let red = ImageBuffer::filled(4, 4, ChannelMode::Rgb, &[255, 0, 0]).unwrap();
    let mut editor = loaded(&red);

    assert!(editor.apply_adjustment(Adjustment::Grayscale));
    let gray = editor.current_snapshot().unwrap();
    let v = gray.pixel(0, 0)[0];
    assert_eq!(v, 76);
    assert!(gray.as_raw().iter().all(|&s| s == v));

    assert!(editor.undo());
    assert_eq!(editor.current_snapshot().unwrap(), red);
}

#[test]
fn undo_right_after_load_is_noop() {
    let img = subject(8, 2, 6);
    let mut editor = loaded(&img);
    assert!(!editor.undo());
    assert_eq!(editor.current_snapshot().unwrap(), img);
    assert!(!editor.redo());
}

#[test]
fn redo_survives_and_new_edit_clears_it() {
    let img = subject(8, 2, 6);
    let mut editor = loaded(&img);
    editor.apply_adjustment(Adjustment::Grayscale);
    editor.apply_adjustment(Adjustment::Negative);
    let negated = editor.current_snapshot().unwrap();

    assert!(editor.undo());
    assert!(editor.undo());
    assert_eq!(editor.current_snapshot().unwrap(), img);
    assert!(editor.redo());
    assert!(editor.redo());
    assert_eq!(editor.current_snapshot().unwrap(), negated);
    assert!(!editor.redo());

    editor.undo();
    editor.apply_adjustment(Adjustment::Sepia);
    assert!(!editor.redo());
}

#[test]
fn history_is_capped_at_twenty() {
    let img = subject(8, 2, 6);
    let mut editor = loaded(&img);
    for _ in 0..25 {
        editor.apply_adjustment(Adjustment::Negative);
    }
    let history = editor.session().unwrap().history();
    assert_eq!(history.undo_count(), 20);
    let mut undos = 0;
    while editor.undo() {
        undos += 1;
    }
    assert_eq!(undos, 19);
}

#[test]
fn slider_gesture_writes_one_entry() {
    let img = subject(8, 2, 6);
    let mut editor = loaded(&img);
    editor.begin_adjustment();
    for f in [0.2, 0.9, 1.6, 1.25] {
        editor.preview_adjustment(Adjustment::Saturation(f));
    }
    let preview = editor.current_snapshot().unwrap();
    assert!(editor.commit_adjustment());
    assert_eq!(editor.current_snapshot().unwrap(), preview);
    assert_eq!(editor.session().unwrap().history().undo_count(), 2);
    assert_eq!(
        preview,
        retouch::ops::adjustments::adjust_saturation(&img, 1.25)
    );
}

#[test]
fn reset_returns_to_original_and_clears_history() {
    let img = subject(8, 2, 6);
    let mut editor = loaded(&img);
    editor.apply_adjustment(Adjustment::Sepia);
    editor.apply_adjustment(Adjustment::Blur { radius: 2.0 });
    editor.reset_to_original();
    assert_eq!(editor.current_snapshot().unwrap(), img);
    assert!(!editor.undo());
}

#[test]
fn remove_background_then_solid_fill() {
    let img = subject(30, 10, 20);
    let mut editor = loaded(&img);

    editor.remove_background(None).unwrap();
    assert_eq!(editor.wait_background_removal(), Some(Ok(())));
    assert!(!editor.is_background_removal_running());

    let cutout = editor.current_snapshot().unwrap();
    assert_eq!(cutout.mode(), ChannelMode::Rgba);
    assert_eq!(cutout.dimensions(), (30, 30));
    // The border outside the seed rectangle is always background.
    assert_eq!(cutout.pixel(0, 0)[3], 0);
    assert_eq!(cutout.pixel(29, 15)[3], 0);

    editor.set_background(&Background::Solid([0, 0, 255])).unwrap();
    let out = editor.current_snapshot().unwrap();
    for y in 0..30 {
        for x in 0..30 {
            let before = cutout.pixel(x, y);
            let after = out.pixel(x, y);
            assert_eq!(after[3], 255);
            if before[3] == 0 {
                assert_eq!(&after[..3], &[0, 0, 255], "pixel {},{}", x, y);
            } else {
                assert_eq!(&after[..3], &before[..3]);
            }
        }
    }

    let history = editor.session().unwrap().history();
    assert_eq!(history.undo_history()[..2], ["Background Color (0, 0, 255)", "Remove Background"]);
}

#[test]
fn removal_progress_is_reported_through_the_editor() {
    let img = subject(30, 10, 20);
    let mut editor = loaded(&img);
    editor.remove_background(None).unwrap();
    assert_eq!(editor.background_removal_progress(), Some((0, 5)));

    let mut seen = Vec::new();
    let outcome = loop {
        if let Some(done) = editor.poll_background_removal() {
            break done;
        }
        if let Some(p) = editor.background_removal_progress() {
            seen.push(p);
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    };
    assert_eq!(outcome, Ok(()));
    assert!(seen.windows(2).all(|w| w[0].0 <= w[1].0));
    assert!(seen.iter().all(|&(_, total)| total == 5));
    assert_eq!(editor.background_removal_progress(), Some((5, 5)));
    assert!(!editor.is_background_removal_running());
}

#[test]
fn rejected_background_does_not_commit_slider() {
    let img = subject(30, 10, 20);
    let mut editor = loaded(&img);
    editor.preview_adjustment(Adjustment::Brightness(1.5));
    assert_eq!(
        editor.set_background(&Background::Solid([0, 0, 255])),
        Err(CompositingError::NotRgba(ChannelMode::Rgb))
    );
    assert_eq!(editor.session().unwrap().history().undo_count(), 1);
    editor.cancel_adjustment();
    assert_eq!(editor.current_snapshot().unwrap(), img);
}

#[test]
fn set_background_requires_transparency() {
    let img = subject(30, 10, 20);
    let mut editor = loaded(&img);
    assert_eq!(
        editor.set_background(&Background::Solid([1, 2, 3])),
        Err(CompositingError::NotRgba(ChannelMode::Rgb))
    );
    assert_eq!(editor.current_snapshot().unwrap(), img);
}

#[test]
fn background_removal_on_tiny_image_fails_fast() {
    let img = subject(20, 5, 15);
    let mut editor = loaded(&img);
    assert!(matches!(
        editor.remove_background(None),
        Err(retouch::SegmentationError::ImageTooSmall { .. })
    ));
    assert_eq!(editor.current_snapshot().unwrap(), img);
    assert_eq!(editor.session().unwrap().history().undo_count(), 1);
}

#[test]
fn loading_during_removal_discards_result() {
    let first = subject(64, 16, 48);
    let second = ImageBuffer::filled(5, 5, ChannelMode::Rgb, &[9, 8, 7]).unwrap();
    let mut editor = loaded(&first);

    editor.remove_background(None).unwrap();
    editor.load_image(&png_bytes(&second)).unwrap();
    assert!(!editor.is_background_removal_running());
    assert_eq!(editor.wait_background_removal(), None);

    // Give the superseded worker time to finish and make sure its result
    // is ignored when drained.
    std::thread::sleep(std::time::Duration::from_millis(200));
    assert_eq!(editor.poll_background_removal(), None);
    assert_eq!(editor.current_snapshot().unwrap(), second);
    assert_eq!(editor.session().unwrap().history().undo_count(), 1);
}

#[test]
fn edit_during_removal_supersedes_it() {
    let img = subject(48, 12, 36);
    let mut editor = loaded(&img);
    editor.remove_background(None).unwrap();
    editor.apply_adjustment(Adjustment::Negative);
    assert_eq!(editor.wait_background_removal(), None);

    // A fresh job after the edit completes normally.
    editor.remove_background(None).unwrap();
    assert_eq!(editor.wait_background_removal(), Some(Ok(())));
    assert_eq!(editor.current_snapshot().unwrap().mode(), ChannelMode::Rgba);
    assert_eq!(editor.session().unwrap().history().undo_count(), 3);
}

#[test]
fn export_png_keeps_alpha_and_jpeg_flattens() {
    let img = subject(30, 10, 20);
    let mut editor = loaded(&img);
    editor.remove_background(None).unwrap();
    editor.wait_background_removal().unwrap().unwrap();
    let cutout = editor.current_snapshot().unwrap();

    let png = editor.export_image(ExportFormat::Png).unwrap();
    assert_eq!(io::decode(&png).unwrap(), cutout);

    let jpeg = editor.export_image(ExportFormat::Jpeg { quality: 95 }).unwrap();
    let flat = io::decode(&jpeg).unwrap();
    assert_eq!(flat.mode(), ChannelMode::Rgb);
    // Transparent corner flattened onto the white matte.
    assert!(flat.pixel(0, 0).iter().all(|&s| s >= 235));
}

#[test]
fn file_round_trip_with_configured_matte() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.png");
    let output = dir.path().join("out.jpg");

    let rgba = ImageBuffer::filled(6, 6, ChannelMode::Rgba, &[200, 10, 10, 0]).unwrap();
    io::write_file(&rgba, &input, ExportFormat::Png, [255, 255, 255]).unwrap();

    let settings = EditorSettings { jpeg_matte: [0, 0, 0], ..Default::default() };
    let mut editor = Editor::new(settings);
    editor.load_file(&input).unwrap();
    assert_eq!(editor.session().unwrap().name, "in.png");
    editor.export_file(&output, None).unwrap();

    let back = io::load_file(&output).unwrap();
    assert_eq!(back.dimensions(), (6, 6));
    assert!(back.as_raw().iter().all(|&s| s <= 10));
}

#[test]
fn failed_decode_leaves_session_alone() {
    let img = subject(8, 2, 6);
    let mut editor = loaded(&img);
    editor.apply_adjustment(Adjustment::Grayscale);
    let before = editor.current_snapshot().unwrap();
    assert!(editor.load_image(&[]).is_err());
    assert!(editor.load_image(&[0x89, b'P', b'N', b'G', 0, 0]).is_err());
    assert_eq!(editor.current_snapshot().unwrap(), before);
}
