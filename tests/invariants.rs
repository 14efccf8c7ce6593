//! Contract Invariant Tests
//!
//! These tests verify the non-negotiable guarantees.
//! Fonts come from `tests/fonts` so results do not depend on the host.

use std::fs;
use std::path::{Path, PathBuf};

use certforge_core::{
    hashing::canonical_json,
    validation::Validator,
    BatchManifest, BatchOptions, BatchPipeline, DocumentAssembler, FailureMode, FontResolver,
    PipelineError, RequestInput, ScriptStyle, Shaper, ShapingEngine,
};
use image::{Rgb, RgbImage};

fn write_template(dir: &Path) -> PathBuf {
    let path = dir.join("template.png");
    RgbImage::from_pixel(600, 240, Rgb([255, 255, 255])).save(&path).unwrap();
    path
}

fn create_pipeline(output_root: &Path, resolver: FontResolver) -> BatchPipeline {
    BatchPipeline::new(
        resolver,
        Shaper::new(ShapingEngine::detect()),
        BatchOptions {
            output_root: output_root.to_path_buf(),
            failure_mode: FailureMode::Block,
            ..BatchOptions::default()
        },
    )
}

fn bundled_font(file: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fonts").join(file)
}

fn latin_resolver() -> FontResolver {
    FontResolver::empty().with_font_file(bundled_font("DejaVuSans.ttf"))
}

fn gujarati_resolver() -> FontResolver {
    FontResolver::empty().with_font_file(bundled_font("CertForgeTestGujarati-Regular.ttf"))
}

fn request(names: &str) -> RequestInput {
    RequestInput {
        names: names.to_string(),
        font_size: 40,
        y_position: 90,
        ..RequestInput::default()
    }
}

#[test]
fn invariant_latin_names_title_cased_and_sorted() {
    let scratch = tempfile::tempdir().unwrap();
    let template = write_template(scratch.path());
    let pipeline = create_pipeline(&scratch.path().join("out"), latin_resolver());

    let manifest = pipeline
        .generate(&template, &request("govind patel\nANJU SHAH"))
        .unwrap();

    assert_eq!(manifest.names, vec!["Anju Shah", "Govind Patel"]);
    let drawn: Vec<_> = manifest.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(drawn, vec!["Anju Shah", "Govind Patel"]);
}

#[test]
fn invariant_one_artifact_per_name() {
    let scratch = tempfile::tempdir().unwrap();
    let template = write_template(scratch.path());
    let out = scratch.path().join("out");
    let pipeline = create_pipeline(&out, latin_resolver());

    let manifest = pipeline
        .generate(&template, &request("a\nb\n\n  c  \nd\n"))
        .unwrap();

    assert_eq!(manifest.artifacts.len(), 4);
    let dir = out.join(&manifest.batch_id);
    for artifact in &manifest.artifacts {
        assert!(dir.join(&artifact.png).is_file());
        assert!(dir.join(&artifact.jpg).is_file());
        assert!(artifact.pdf.is_none());
    }
    assert!(!manifest.has_pdf);
    assert!(!manifest.has_combined_pdf);
}

#[test]
fn invariant_gujarati_without_font_writes_nothing() {
    let scratch = tempfile::tempdir().unwrap();
    let template = write_template(scratch.path());
    let out = scratch.path().join("out");
    let pipeline = create_pipeline(&out, FontResolver::empty());

    let input = RequestInput {
        names: "ગોવિંદ પટેલ\nઅંજુ શાહ".to_string(),
        style: "gujarati".to_string(),
        ..RequestInput::default()
    };
    let result = pipeline.generate(&template, &input);

    match result {
        Err(PipelineError::FontNotFound { style, .. }) => assert_eq!(style, ScriptStyle::Gujarati),
        other => panic!("expected FontNotFound, got {:?}", other.map(|m| m.batch_id)),
    }
    assert!(!out.exists());
}

#[test]
fn invariant_gujarati_batch_keeps_input_order() {
    let scratch = tempfile::tempdir().unwrap();
    let template = write_template(scratch.path());
    let out = scratch.path().join("out");
    let pipeline = create_pipeline(&out, gujarati_resolver());

    let submitted = ["ગોવિંદ પટેલ", "અંજુ શાહ", "ક્ષમા દવે"];
    let input = RequestInput {
        names: submitted.join("\n"),
        style: "gujarati".to_string(),
        ..request("")
    };
    let manifest = pipeline.generate(&template, &input).unwrap();

    assert_eq!(manifest.names, submitted);
    let drawn: Vec<_> = manifest.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(drawn, submitted);
    let dir = out.join(&manifest.batch_id);
    for (position, artifact) in manifest.artifacts.iter().enumerate() {
        assert!(artifact.png.to_string_lossy().starts_with(&format!("cert_{}_", position + 1)));
        assert!(dir.join(&artifact.png).is_file());
    }
    assert!(manifest.failures.is_empty());
}

#[test]
fn invariant_rendering_is_deterministic() {
    let scratch = tempfile::tempdir().unwrap();
    let template = write_template(scratch.path());
    let pipeline = create_pipeline(&scratch.path().join("out"), latin_resolver());

    let first = pipeline.generate(&template, &request("Anju Shah")).unwrap();
    let second = pipeline.generate(&template, &request("Anju Shah")).unwrap();

    assert_ne!(first.batch_id, second.batch_id);
    assert_eq!(first.request_hash, second.request_hash);
    assert_eq!(first.artifacts[0].png_sha256, second.artifacts[0].png_sha256);
}

#[test]
fn invariant_manifest_verifies_on_load() {
    let scratch = tempfile::tempdir().unwrap();
    let template = write_template(scratch.path());
    let out = scratch.path().join("out");
    let pipeline = create_pipeline(&out, latin_resolver());

    let manifest = pipeline.generate(&template, &request("Anju Shah")).unwrap();
    let dir = out.join(&manifest.batch_id);

    let loaded = BatchManifest::load(&dir).unwrap();
    assert_eq!(loaded.manifest_hash, manifest.manifest_hash);

    let path = dir.join("info.json");
    let tampered = fs::read_to_string(&path).unwrap().replace("Anju Shah", "Anju Shaw");
    fs::write(&path, tampered).unwrap();
    assert!(BatchManifest::load(&dir).is_err());
}

#[test]
fn invariant_merge_keeps_order_and_skips_missing() {
    let scratch = tempfile::tempdir().unwrap();
    let assembler = DocumentAssembler::default();

    let mut pdfs = Vec::new();
    for (label, width) in [("a", 30u32), ("b", 20), ("c", 10)] {
        let png = scratch.path().join(format!("{}.png", label));
        RgbImage::from_pixel(width, 8, Rgb([0, 0, 0])).save(&png).unwrap();
        let pdf = scratch.path().join(format!("{}.pdf", label));
        assembler.image_to_pdf(&png, &pdf).unwrap();
        pdfs.push(pdf);
    }
    fs::remove_file(&pdfs[1]).unwrap();

    let combined = scratch.path().join("combined.pdf");
    assert_eq!(assembler.merge(&pdfs, &combined).unwrap(), 2);

    let doc = lopdf::Document::load(&combined).unwrap();
    let widths: Vec<f32> = doc
        .get_pages()
        .into_values()
        .map(|id| {
            let media_box = doc.get_dictionary(id).unwrap().get(b"MediaBox").unwrap();
            media_box.as_array().unwrap()[2].as_float().unwrap()
        })
        .collect();
    // 96 dpi: 30px -> 22.5pt, 10px -> 7.5pt
    assert_eq!(widths, vec![22.5, 7.5]);
    assert!(pdfs[0].is_file() && pdfs[2].is_file());
}

#[test]
fn invariant_estimated_width_never_negative() {
    let font = latin_resolver().resolve(ScriptStyle::Arial, 40.0).unwrap();
    let shaper = Shaper::new(ShapingEngine::Unavailable);
    for text in ["", " ", "Anju", "ગોવિંદ", "\u{200d}"] {
        let width = shaper.estimate_width(&font, text, ScriptStyle::Arial.script());
        assert!(width >= 0, "{text:?} measured {width}");
    }
    assert_eq!(shaper.estimate_width(&font, "", ScriptStyle::Arial.script()), 0);
}

#[test]
fn invariant_invalid_request_is_structured() {
    let result = Validator::new().validate(&RequestInput {
        names: "Anju".to_string(),
        color: "#12".to_string(),
        ..RequestInput::default()
    });

    assert!(!result.valid);
    assert!(!result.violations.is_empty());
    for v in &result.violations {
        assert!(!v.rule.is_empty());
        assert!(!v.message.is_empty());
    }
}

#[test]
fn invariant_canonical_json_deterministic() {
    use serde_json::json;

    let obj1 = json!({"z": 1, "a": 2, "m": {"b": 1, "a": 2}});
    let obj2 = json!({"a": 2, "m": {"a": 2, "b": 1}, "z": 1});

    assert_eq!(canonical_json(&obj1).unwrap(), canonical_json(&obj2).unwrap());
}
