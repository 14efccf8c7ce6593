//! Font resolution happens once per batch, however many names it holds.
//!
//! Kept in its own test binary so no other test moves the shared counter.

#![cfg(feature = "test-hooks")]

use certforge_core::fonts::{get_resolve_call_count, reset_resolve_call_count};
use certforge_core::{
    BatchOptions, BatchPipeline, FontResolver, PipelineError, RequestInput, Shaper,
};
use image::{Rgb, RgbImage};

#[test]
fn invariant_font_resolved_once_per_batch() {
    let font = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fonts/DejaVuSans.ttf");
    let scratch = tempfile::tempdir().unwrap();
    let template = scratch.path().join("template.png");
    RgbImage::from_pixel(300, 120, Rgb([255, 255, 255])).save(&template).unwrap();

    let pipeline = BatchPipeline::new(
        FontResolver::empty().with_font_file(font),
        Shaper::default(),
        BatchOptions {
            output_root: scratch.path().join("out"),
            ..BatchOptions::default()
        },
    );
    let input = RequestInput {
        names: "one\ntwo\nthree\nfour".to_string(),
        font_size: 32,
        y_position: 40,
        ..RequestInput::default()
    };

    reset_resolve_call_count();
    let manifest = pipeline.generate(&template, &input).unwrap();
    assert_eq!(manifest.artifacts.len(), 4);
    assert_eq!(get_resolve_call_count(), 1);

    // A failed lookup is also a single attempt.
    reset_resolve_call_count();
    let gujarati = RequestInput {
        style: "gujarati".to_string(),
        ..input
    };
    let empty = BatchPipeline::new(FontResolver::empty(), Shaper::default(), BatchOptions::default());
    assert!(matches!(
        empty.generate(&template, &gujarati),
        Err(PipelineError::FontNotFound { .. })
    ));
    assert_eq!(get_resolve_call_count(), 1);
}
