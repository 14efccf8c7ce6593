//! CertForge Core - Certificate Batch Renderer
//!
//! # Guarantees
//! 1. Requests Are Validated Before Anything Runs
//! 2. One Font Lookup Per Batch
//! 3. Complex Scripts Are Shaped, Or Degrade Visibly
//! 4. Deterministic Output
//! 5. Files Are Complete Or Absent
//! 6. Manifests Verify Themselves

pub mod templates;
pub mod validation;
pub mod hashing;
pub mod print;
pub mod fonts;
pub mod shaper;
pub mod renderer;
pub mod assembler;
pub mod storage;
pub mod manifest;
pub mod pipeline;

pub use templates::{CertificateTemplate, Script, ScriptStyle, TemplateError};
pub use validation::{RenderParams, RequestInput, ValidationResult, ValidationRule, ValidationViolation, ViolationSeverity};
pub use hashing::{canonical_json, compute_manifest_hash, compute_request_hash, sha256_hex};
pub use print::PrintSpec;
pub use fonts::{FontError, FontResolver, ResolvedFont, SearchDir};
pub use shaper::{GlyphRun, LayoutPath, Shaper, ShapingEngine, ShapingError};
pub use renderer::{CertificateRenderer, RenderError, RenderSpec};
pub use assembler::{AssemblyError, DocumentAssembler};
pub use manifest::{BatchManifest, CertificateArtifact, ManifestError};
pub use pipeline::{BatchOptions, BatchPipeline, FailureMode, PipelineError};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
