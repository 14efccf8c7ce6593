//! CertForge CLI - Bridge interface for web front ends
//!
//! Commands: generate, fonts, show
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 when a batch or lookup fails

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use certforge_core::{
    storage::{is_valid_batch_id, BatchDir},
    validation::{DEFAULT_COLOR, DEFAULT_FONT_SIZE, DEFAULT_Y_POSITION, MAX_FONT_SIZE},
    BatchManifest, BatchOptions, BatchPipeline, FailureMode, FontResolver, PipelineError, PrintSpec,
    RequestInput, ScriptStyle, SearchDir, Shaper, ShapingEngine,
};

#[derive(Parser)]
#[command(name = "certforge-cli")]
#[command(about = "CertForge CLI - Certificate Batch Renderer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory that receives one folder per batch
    #[arg(short, long, env = "CERTFORGE_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// Extra font directories, searched recursively before the system ones
    #[arg(long = "font-dir", env = "CERTFORGE_FONT_DIRS", value_delimiter = ',')]
    font_dirs: Vec<PathBuf>,

    /// Font files tried before any directory scan
    #[arg(long = "font-file")]
    font_files: Vec<PathBuf>,

    /// Disable complex-script shaping even when it is compiled in
    #[arg(long, env = "CERTFORGE_NO_SHAPING")]
    no_shaping: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a batch of certificates
    Generate(GenerateArgs),

    /// Report which font a style resolves to
    Fonts {
        #[arg(short, long, default_value = "gujarati")]
        style: ScriptStyle,

        #[arg(long, default_value_t = 48, value_parser = clap::value_parser!(u32).range(1..=MAX_FONT_SIZE as i64))]
        size: u32,
    },

    /// Print and verify a batch manifest
    Show {
        /// Batch ID (cert_...)
        #[arg(short, long)]
        batch: String,
    },
}

#[derive(Args)]
struct GenerateArgs {
    /// Template image (PNG or JPEG)
    #[arg(short, long)]
    template: PathBuf,

    /// JSON payload (RequestInput); replaces the flags below
    #[arg(short, long, conflicts_with_all = ["names", "names_file"])]
    payload: Option<String>,

    /// Newline-separated names
    #[arg(long)]
    names: Option<String>,

    /// File with one name per line
    #[arg(long)]
    names_file: Option<PathBuf>,

    #[arg(long, default_value = "arial")]
    style: String,

    #[arg(long, default_value_t = DEFAULT_FONT_SIZE)]
    font_size: i64,

    #[arg(long, default_value_t = DEFAULT_Y_POSITION, allow_negative_numbers = true)]
    y_position: i32,

    #[arg(long, default_value = DEFAULT_COLOR)]
    color: String,

    /// Also produce per-name and combined PDFs
    #[arg(long)]
    pdf: bool,

    #[arg(long, env = "CERTFORGE_PDF_DPI", default_value_t = certforge_core::print::DEFAULT_DPI)]
    pdf_dpi: u32,

    #[arg(long, env = "CERTFORGE_FAILURE_MODE", default_value_t = FailureMode::Block)]
    failure_mode: FailureMode,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "certforge_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let resolver = build_resolver(&cli);
    let engine = if cli.no_shaping {
        ShapingEngine::Unavailable
    } else {
        ShapingEngine::detect()
    };

    match cli.command {
        Commands::Generate(args) => generate(args, cli.output_dir, resolver, engine),

        Commands::Fonts { style, size } => match resolver.resolve(style, size as f32) {
            Ok(font) => print_json(&serde_json::json!({
                "style": style,
                "script": style.script().display_name(),
                "font": font.source_path(),
                "covers_script": font.covers(style.script()),
                "shaping": engine,
            })),
            Err(e) => {
                print_json(&serde_json::json!({
                    "style": style,
                    "error": e.to_string(),
                    "remediation": e.remediation(),
                }));
                ExitCode::from(2)
            }
        },

        Commands::Show { batch } => {
            if !is_valid_batch_id(&batch) {
                print_json(&serde_json::json!({ "error": format!("Invalid batch ID: {}", batch) }));
                return ExitCode::FAILURE;
            }
            match BatchManifest::load(&BatchDir::open(&cli.output_dir, &batch).root) {
                Ok(manifest) => print_json(&manifest),
                Err(e) => {
                    print_json(&serde_json::json!({ "error": e.to_string() }));
                    ExitCode::from(2)
                }
            }
        }
    }
}

fn build_resolver(cli: &Cli) -> FontResolver {
    let resolver = cli
        .font_files
        .iter()
        .fold(FontResolver::system(), |r, file| r.with_font_file(file));
    cli.font_dirs
        .iter()
        .fold(resolver, |r, dir| r.with_search_dir(SearchDir::recursive(dir)))
}

fn generate(args: GenerateArgs, output_dir: PathBuf, resolver: FontResolver, engine: ShapingEngine) -> ExitCode {
    let input = match read_input(&args) {
        Ok(input) => input,
        Err(message) => {
            print_json(&serde_json::json!({ "success": false, "error": message }));
            return ExitCode::FAILURE;
        }
    };

    let print = match PrintSpec::from_user(args.pdf_dpi) {
        Ok(print) => print,
        Err(message) => {
            print_json(&serde_json::json!({ "success": false, "error": message }));
            return ExitCode::FAILURE;
        }
    };

    let pipeline = BatchPipeline::new(
        resolver,
        Shaper::new(engine),
        BatchOptions {
            output_root: output_dir,
            print,
            failure_mode: args.failure_mode,
        },
    );

    match pipeline.generate(&args.template, &input) {
        Ok(manifest) => {
            let output = serde_json::json!({
                "success": true,
                "batch_id": manifest.batch_id,
                "count": manifest.artifacts.len(),
                "has_pdf": manifest.has_pdf,
                "manifest": manifest,
            });
            print_json(&output)
        }
        Err(e) => {
            print_json(&failure(&e));
            ExitCode::from(2)
        }
    }
}

fn read_input(args: &GenerateArgs) -> Result<RequestInput, String> {
    if let Some(payload) = &args.payload {
        return serde_json::from_str(payload).map_err(|e| format!("Invalid payload: {}", e));
    }

    let names = match (&args.names, &args.names_file) {
        (_, Some(path)) => fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?,
        (Some(names), None) => names.clone(),
        (None, None) => String::new(),
    };

    Ok(RequestInput {
        names,
        style: args.style.clone(),
        font_size: args.font_size,
        y_position: args.y_position,
        color: args.color.clone(),
        want_pdf: args.pdf,
    })
}

fn failure(e: &PipelineError) -> serde_json::Value {
    serde_json::json!({
        "success": false,
        "error": e.to_string(),
        "remediation": e.remediation(),
    })
}

fn print_json<T: Serialize>(value: &T) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!(r#"{{"error": "Failed to serialize output: {}"}}"#, e);
            ExitCode::FAILURE
        }
    }
}
