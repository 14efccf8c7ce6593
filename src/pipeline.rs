//! Batch Pipeline - Single Entry Point
//!
//! Every batch goes through `BatchPipeline::generate`, which validates the
//! request before anything is resolved, rendered or written.
//!
//! Order of work:
//! 1. Validate the request into `RenderParams`
//! 2. Load the template and resolve the font (once)
//! 3. Create the batch directory
//! 4. Render each name, then its PDF if requested
//! 5. Merge per-name PDFs and write the manifest

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::assembler::{AssemblyError, DocumentAssembler};
use crate::fonts::{FontError, FontResolver, ResolvedFont};
use crate::hashing::{compute_request_hash, sha256_hex};
use crate::manifest::{BatchManifest, CertificateArtifact, FailureStage, ManifestError, NameFailure};
use crate::print::PrintSpec;
use crate::renderer::{CertificateRenderer, RenderError};
use crate::shaper::{Shaper, ShapingError};
use crate::storage::{generate_batch_id, BatchDir, COMBINED_PDF_FILE};
use crate::templates::{CertificateTemplate, Script, ScriptStyle, TemplateError};
use crate::validation::{
    NamesRule, RenderParams, RequestInput, ValidationResult, ValidationViolation, Validator,
    MAX_FONT_SIZE, MIN_FONT_SIZE,
};
use crate::ENGINE_VERSION;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid template: {0}")]
    InvalidTemplate(#[from] TemplateError),

    #[error("No names provided")]
    EmptyNameList,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Font not found for style '{style}': {source}")]
    FontNotFound {
        style: ScriptStyle,
        #[source]
        source: FontError,
    },

    #[error("Error rendering {script} text for '{name}': {source}")]
    ShapingFailure {
        name: String,
        script: &'static str,
        #[source]
        source: ShapingError,
    },

    #[error("Failed to render certificate for '{name}': {source}")]
    Render {
        name: String,
        #[source]
        source: RenderError,
    },

    #[error("PDF conversion failed for '{name}': {source}")]
    PdfConversionFailure {
        name: String,
        #[source]
        source: AssemblyError,
    },

    #[error("Combining PDFs failed: {0}")]
    PdfMergeFailure(#[source] AssemblyError),

    #[error("Failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Human-readable next step for batch-level failures.
    pub fn remediation(&self) -> Option<String> {
        match self {
            PipelineError::InvalidTemplate(_) => {
                Some("Provide the template as a readable PNG or JPEG image".to_string())
            }
            PipelineError::EmptyNameList => Some("Enter one recipient name per line".to_string()),
            PipelineError::FontNotFound { source, .. } => source.remediation(),
            PipelineError::ShapingFailure { .. } => Some(
                "Please ensure a Gujarati font with OpenType shaping tables is installed, \
                 such as Noto Sans Gujarati"
                    .to_string(),
            ),
            _ => None,
        }
    }
}

/// What a per-name render failure does to the rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Abort the batch.
    #[default]
    Block,
    /// Skip the name and record it in the manifest.
    Warn,
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureMode::Block => "block",
            FailureMode::Warn => "warn",
        })
    }
}

impl FromStr for FailureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(FailureMode::Block),
            "warn" => Ok(FailureMode::Warn),
            other => Err(format!("unknown failure mode '{}' (expected block or warn)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub output_root: PathBuf,
    pub print: PrintSpec,
    pub failure_mode: FailureMode,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("output"),
            print: PrintSpec::default(),
            failure_mode: FailureMode::default(),
        }
    }
}

/// Latin names are title-cased and sorted; complex-script names keep the
/// submitted order and spelling.
pub fn order_names(names: &[String], style: ScriptStyle) -> Vec<String> {
    match style.script() {
        Script::Latin => {
            let mut ordered: Vec<String> = names.iter().map(|n| style.apply_casing(n)).collect();
            ordered.sort();
            ordered
        }
        Script::Gujarati => names.to_vec(),
    }
}

/// The batch pipeline - single entry point for certificate generation
pub struct BatchPipeline {
    resolver: FontResolver,
    renderer: CertificateRenderer,
    assembler: DocumentAssembler,
    validator: Validator,
    options: BatchOptions,
}

impl BatchPipeline {
    pub fn new(resolver: FontResolver, shaper: Shaper, options: BatchOptions) -> Self {
        Self {
            resolver,
            renderer: CertificateRenderer::new(shaper),
            assembler: DocumentAssembler::new(options.print),
            validator: Validator::new(),
            options,
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn resolver(&self) -> &FontResolver {
        &self.resolver
    }

    /// Turn raw input into `RenderParams`, or a structured error.
    pub fn validate_request(
        &self,
        input: &RequestInput,
    ) -> Result<(RenderParams, ValidationResult), PipelineError> {
        self.validator.build(input).map_err(|result| {
            if result.errors().any(|v| v.rule == NamesRule::NAME) {
                return PipelineError::EmptyNameList;
            }
            let messages: Vec<_> = result
                .errors()
                .map(|v| match &v.actual {
                    Some(actual) => format!("{}: {} ({})", v.rule, v.message, actual),
                    None => format!("{}: {}", v.rule, v.message),
                })
                .collect();
            PipelineError::InvalidRequest(messages.join("; "))
        })
    }

    /// Validate, then run the batch.
    ///
    /// This is the ONLY entry point that accepts unvalidated input.
    pub fn generate(&self, template: &Path, input: &RequestInput) -> Result<BatchManifest, PipelineError> {
        let (params, validation) = self.validate_request(input)?;
        let warnings = validation.warnings();
        for warning in &warnings {
            warn!(op = "pipeline::validate", rule = %warning.rule, "{}", warning.message);
        }
        self.execute(template, &params, warnings)
    }

    /// Render every name in `params` onto `template`.
    pub fn run(&self, template: &Path, params: &RenderParams) -> Result<BatchManifest, PipelineError> {
        self.execute(template, params, vec![])
    }

    fn execute(
        &self,
        template: &Path,
        params: &RenderParams,
        warnings: Vec<ValidationViolation>,
    ) -> Result<BatchManifest, PipelineError> {
        if params.names.is_empty() {
            return Err(PipelineError::EmptyNameList);
        }
        if !(MIN_FONT_SIZE..=MAX_FONT_SIZE).contains(&params.font_size) {
            return Err(PipelineError::InvalidRequest(format!(
                "font size {} outside {}..={}",
                params.font_size, MIN_FONT_SIZE, MAX_FONT_SIZE
            )));
        }

        let template = CertificateTemplate::load(template)?;
        let names = order_names(&params.names, params.style);

        let font = self
            .resolver
            .resolve(params.style, params.font_size as f32)
            .map_err(|source| PipelineError::FontNotFound {
                style: params.style,
                source,
            })?;

        let batch_id = generate_batch_id();
        let dir = BatchDir::create(&self.options.output_root, &batch_id).map_err(|source| PipelineError::Io {
            path: self.options.output_root.join(&batch_id),
            source,
        })?;

        info!(
            op = "pipeline::run",
            batch_id = %batch_id,
            style = %params.style,
            names = names.len(),
            font = ?font.source_path(),
            shaping = ?self.renderer.shaper().engine(),
            "Starting batch"
        );

        let mut artifacts = Vec::with_capacity(names.len());
        let mut failures = Vec::new();

        for (index, name) in names.iter().enumerate() {
            let stem = BatchDir::file_stem(index + 1, name);
            match self.render_one(&template, name, &font, params, &dir, &stem) {
                Ok(artifact) => artifacts.push(artifact),
                Err(err) => {
                    if self.options.failure_mode == FailureMode::Block || is_fatal(&err) {
                        error!(op = "pipeline::run", batch_id = %batch_id, name = %name, error = %err, "Batch aborted");
                        return Err(err);
                    }
                    warn!(op = "pipeline::run", batch_id = %batch_id, name = %name, error = %err, "Skipping name");
                    failures.push(NameFailure {
                        name: Some(name.clone()),
                        stage: FailureStage::Render,
                        message: err.to_string(),
                    });
                }
            }
        }

        let mut combined_pdf = None;
        if params.want_pdf {
            for artifact in artifacts.iter_mut() {
                if let Err(err) = self.attach_pdf(&dir, artifact) {
                    warn!(op = "pipeline::pdf", batch_id = %batch_id, error = %err, "PDF skipped");
                    failures.push(NameFailure {
                        name: Some(artifact.name.clone()),
                        stage: FailureStage::Pdf,
                        message: err.to_string(),
                    });
                }
            }

            let pdfs: Vec<PathBuf> = artifacts
                .iter()
                .filter_map(|a| a.pdf.as_ref().map(|p| dir.root.join(p)))
                .collect();
            if !pdfs.is_empty() {
                match self.assembler.merge(&pdfs, &dir.combined_pdf_path()) {
                    Ok(_) => combined_pdf = Some(PathBuf::from(COMBINED_PDF_FILE)),
                    Err(source) => {
                        let err = PipelineError::PdfMergeFailure(source);
                        warn!(op = "pipeline::merge", batch_id = %batch_id, error = %err, "Combined PDF skipped");
                        failures.push(NameFailure {
                            name: None,
                            stage: FailureStage::Merge,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        let template_sha256 = sha256_hex(template.image.as_raw());
        let mut manifest = BatchManifest {
            batch_id: batch_id.clone(),
            created_at: Utc::now(),
            engine_version: ENGINE_VERSION.to_string(),
            style: params.style,
            names,
            artifacts,
            has_pdf: params.want_pdf,
            has_combined_pdf: combined_pdf.is_some(),
            combined_pdf,
            failures,
            warnings,
            request_hash: compute_request_hash(&template_sha256, params, ENGINE_VERSION)?,
            manifest_hash: String::new(),
        };
        let path = manifest.persist(&dir)?;

        info!(
            op = "pipeline::run",
            batch_id = %batch_id,
            artifacts = manifest.artifacts.len(),
            failures = manifest.failures.len(),
            manifest = %path.display(),
            "Batch complete"
        );
        Ok(manifest)
    }

    fn render_one(
        &self,
        template: &CertificateTemplate,
        name: &str,
        font: &ResolvedFont,
        params: &RenderParams,
        dir: &BatchDir,
        stem: &str,
    ) -> Result<CertificateArtifact, PipelineError> {
        let spec = params.render_spec();
        let rendered = self
            .renderer
            .render(template, name, font, &spec, &dir.png_path(stem), &dir.jpg_path(stem))
            .map_err(|source| match source {
                RenderError::Shaping(source) => PipelineError::ShapingFailure {
                    name: name.to_string(),
                    script: params.style.script().display_name(),
                    source,
                },
                source => PipelineError::Render {
                    name: name.to_string(),
                    source,
                },
            })?;

        info!(op = "pipeline::render", name = %name, layout = ?rendered.layout, "Rendered certificate");

        Ok(CertificateArtifact {
            name: name.to_string(),
            png: relative_to(&dir.root, &rendered.png),
            jpg: relative_to(&dir.root, &rendered.jpg),
            pdf: None,
            png_sha256: rendered.png_sha256,
        })
    }

    /// Convert the artifact's PNG into its per-name PDF.
    fn attach_pdf(&self, dir: &BatchDir, artifact: &mut CertificateArtifact) -> Result<(), PipelineError> {
        let png = dir.root.join(&artifact.png);
        let stem = artifact
            .png
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| artifact.name.clone());
        let pdf = dir.pdf_path(&stem);

        self.assembler
            .image_to_pdf(&png, &pdf)
            .map_err(|source| PipelineError::PdfConversionFailure {
                name: artifact.name.clone(),
                source,
            })?;
        artifact.pdf = Some(relative_to(&dir.root, &pdf));
        Ok(())
    }
}

impl Default for BatchPipeline {
    fn default() -> Self {
        Self::new(FontResolver::system(), Shaper::default(), BatchOptions::default())
    }
}

/// Font-caused shaping failures abort regardless of failure mode.
fn is_fatal(err: &PipelineError) -> bool {
    matches!(err, PipelineError::ShapingFailure { source, .. } if source.is_font_failure())
}

fn relative_to(root: &Path, path: &Path) -> PathBuf {
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}
