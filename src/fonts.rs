//! Font Resolver - Script-Aware Font Lookup
//!
//! Resolution runs in fixed priority order and the first verified candidate wins:
//! 1. Exact well-known file paths for the style
//! 2. Keyword-matched files in the system font directories
//! 3. Recursive search for the script's name (complex scripts only)
//! 4. Broad-coverage fallback fonts
//!
//! A candidate is only accepted after it rasterizes at least one sample glyph of
//! the target script. Fonts that load but carry no glyphs for the script are
//! rejected instead of being drawn as missing-glyph boxes.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fontdue::{Font, FontSettings};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::templates::{Script, ScriptStyle};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static RESOLVE_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_resolve_call_count() -> u32 {
    RESOLVE_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_resolve_call_count() {
    RESOLVE_CALL_COUNT.store(0, Ordering::SeqCst);
}

const FONT_EXTENSIONS: &[&str] = &["ttf", "otf", "ttc"];

#[derive(Debug, Error)]
pub enum FontError {
    #[error("No usable {style} font found ({tried} candidate(s) checked)")]
    NotFound { style: ScriptStyle, tried: usize },

    #[error("Font {path} could not be read: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Font could not be parsed: {0}")]
    Parse(String),

    #[error("Font does not render {0} glyphs")]
    MissingCoverage(&'static str),
}

impl FontError {
    pub fn remediation(&self) -> Option<String> {
        match self {
            FontError::NotFound { style, .. } => Some(match style.script() {
                Script::Gujarati => "Install a Gujarati font such as Noto Sans Gujarati, Shruti or \
                    Lohit Gujarati (for example into ~/.local/share/fonts or C:/Windows/Fonts/), \
                    or point --font-dir at a directory containing one"
                    .to_string(),
                Script::Latin => format!(
                    "Install a font for the '{}' style (or DejaVu Sans / Liberation Sans), \
                     or point --font-dir at a directory containing one",
                    style
                ),
            }),
            _ => None,
        }
    }
}

/// Raw font file a handle was loaded from.
#[derive(Clone)]
pub struct FontSource {
    pub path: PathBuf,
    pub bytes: Arc<[u8]>,
}

impl fmt::Debug for FontSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FontSource")
            .field("path", &self.path)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// A drawable font at a fixed pixel size, plus the file it came from.
///
/// `source` is `None` when the font was built from in-memory bytes; such fonts
/// can only be laid out with the simple per-character path.
#[derive(Clone)]
pub struct ResolvedFont {
    handle: Font,
    source: Option<FontSource>,
    size: f32,
}

impl fmt::Debug for ResolvedFont {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedFont")
            .field("source", &self.source)
            .field("size", &self.size)
            .finish()
    }
}

impl ResolvedFont {
    /// Load a font file and keep its path and bytes for shaping.
    pub fn from_file(path: &Path, size: f32) -> Result<Self, FontError> {
        let bytes: Arc<[u8]> = fs::read(path)
            .map_err(|source| FontError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .into();
        let handle = parse_font(&bytes, size)?;
        Ok(Self {
            handle,
            source: Some(FontSource {
                path: path.to_path_buf(),
                bytes,
            }),
            size,
        })
    }

    /// Build a font from bytes with no file behind it.
    pub fn from_bytes(bytes: &[u8], size: f32) -> Result<Self, FontError> {
        Ok(Self {
            handle: parse_font(bytes, size)?,
            source: None,
            size,
        })
    }

    pub fn handle(&self) -> &Font {
        &self.handle
    }

    pub fn source(&self) -> Option<&FontSource> {
        self.source.as_ref()
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_ref().map(|s| s.path.as_path())
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    /// Distance from the top of the line box to the baseline, in pixels.
    pub fn ascent(&self) -> f32 {
        self.handle
            .horizontal_line_metrics(self.size)
            .map(|m| m.ascent)
            .unwrap_or(self.size)
    }

    pub fn covers(&self, script: Script) -> bool {
        covers_script(&self.handle, self.size, script)
    }
}

fn parse_font(bytes: &[u8], size: f32) -> Result<Font, FontError> {
    let settings = FontSettings {
        scale: size.max(1.0),
        ..FontSettings::default()
    };
    Font::from_bytes(bytes, settings).map_err(|e| FontError::Parse(e.to_string()))
}

/// True when at least one sample character maps to a real glyph that
/// rasterizes to a non-zero-width bitmap.
pub fn covers_script(font: &Font, size: f32, script: Script) -> bool {
    script.sample_chars().iter().any(|&ch| {
        if font.lookup_glyph_index(ch) == 0 {
            return false;
        }
        let (metrics, _) = font.rasterize(ch, size);
        metrics.width > 0
    })
}

/// A directory scanned for font files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchDir {
    pub path: PathBuf,
    pub recursive: bool,
}

impl SearchDir {
    pub fn flat(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), recursive: false }
    }

    pub fn recursive(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), recursive: true }
    }
}

/// Resolves a script style to a verified font.
#[derive(Debug, Clone)]
pub struct FontResolver {
    font_files: Vec<PathBuf>,
    extra_dirs: Vec<SearchDir>,
    include_system: bool,
}

impl FontResolver {
    /// Resolver over the well-known system locations.
    pub fn system() -> Self {
        Self {
            font_files: vec![],
            extra_dirs: vec![],
            include_system: true,
        }
    }

    /// Resolver with no locations at all; add them with the builder methods.
    pub fn empty() -> Self {
        Self {
            font_files: vec![],
            extra_dirs: vec![],
            include_system: false,
        }
    }

    /// Check `path` before any other location.
    pub fn with_font_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_files.push(path.into());
        self
    }

    /// Scan `dir` before the system directories.
    pub fn with_search_dir(mut self, dir: SearchDir) -> Self {
        self.extra_dirs.push(dir);
        self
    }

    /// Resolve `style` at `size` pixels.
    pub fn resolve(&self, style: ScriptStyle, size: f32) -> Result<ResolvedFont, FontError> {
        #[cfg(feature = "test-hooks")]
        RESOLVE_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let script = style.script();
        let mut attempt = Attempt::new(script, size);

        // 1. Exact paths
        let exact = self.font_files.iter().cloned().chain(
            self.include_system
                .then(|| exact_paths(style))
                .into_iter()
                .flatten(),
        );
        for path in exact {
            if let Some(font) = attempt.try_path(&path, "exact") {
                return Ok(font);
            }
        }

        // 2. Keyword scan
        let dirs = self.search_dirs();
        let keywords = keywords(style);
        for dir in &dirs {
            for path in font_files_in(dir) {
                if file_name_matches(&path, keywords) {
                    if let Some(font) = attempt.try_path(&path, "keyword") {
                        return Ok(font);
                    }
                }
            }
        }

        // 3. Script name, recursively
        if script.is_complex() {
            let needle = [script.display_name()];
            for dir in &dirs {
                for path in font_files_in(&SearchDir::recursive(&dir.path)) {
                    if file_name_matches(&path, &needle) {
                        if let Some(font) = attempt.try_path(&path, "script-name") {
                            return Ok(font);
                        }
                    }
                }
            }
        }

        // 4. Broad coverage
        if self.include_system {
            for path in broad_coverage_paths() {
                if let Some(font) = attempt.try_path(&path, "broad-coverage") {
                    return Ok(font);
                }
            }
        }

        warn!(
            op = "fonts::resolve",
            style = %style,
            tried = attempt.tried(),
            "No font passed verification"
        );
        Err(FontError::NotFound {
            style,
            tried: attempt.tried(),
        })
    }

    fn search_dirs(&self) -> Vec<SearchDir> {
        let mut dirs = self.extra_dirs.clone();
        if self.include_system {
            dirs.extend(system_dirs());
        }
        dirs
    }
}

impl Default for FontResolver {
    fn default() -> Self {
        Self::system()
    }
}

/// Tracks visited candidates so each file is verified at most once.
struct Attempt {
    script: Script,
    size: f32,
    seen: HashSet<PathBuf>,
}

impl Attempt {
    fn new(script: Script, size: f32) -> Self {
        Self {
            script,
            size,
            seen: HashSet::new(),
        }
    }

    fn tried(&self) -> usize {
        self.seen.len()
    }

    fn try_path(&mut self, path: &Path, stage: &'static str) -> Option<ResolvedFont> {
        if !path.is_file() || !self.seen.insert(path.to_path_buf()) {
            return None;
        }

        let font = match ResolvedFont::from_file(path, self.size) {
            Ok(font) => font,
            Err(err) => {
                debug!(op = "fonts::verify", stage, path = %path.display(), error = %err, "Candidate failed to load");
                return None;
            }
        };

        if !font.covers(self.script) {
            debug!(
                op = "fonts::verify",
                stage,
                path = %path.display(),
                script = self.script.display_name(),
                "Candidate has no glyphs for script"
            );
            return None;
        }

        info!(op = "fonts::resolve", stage, path = %path.display(), "Using font");
        Some(font)
    }
}

/// Font files directly in (or below, when recursive) a directory, sorted by path.
fn font_files_in(dir: &SearchDir) -> Vec<PathBuf> {
    if !dir.path.is_dir() {
        return vec![];
    }
    let walker = WalkDir::new(&dir.path)
        .follow_links(true)
        .sort_by_file_name()
        .max_depth(if dir.recursive { usize::MAX } else { 1 });

    walker
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_font_extension(path))
        .collect()
}

fn has_font_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FONT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn file_name_matches(path: &Path, keywords: &[&str]) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name.to_lowercase(),
        None => return false,
    };
    keywords.iter().any(|k| name.contains(k))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

fn windows_user_fonts() -> Option<PathBuf> {
    home_dir().map(|h| h.join("AppData/Local/Microsoft/Windows/Fonts"))
}

fn system_dirs() -> Vec<SearchDir> {
    let mut dirs = vec![SearchDir::flat("C:/Windows/Fonts")];
    if let Some(user) = windows_user_fonts() {
        dirs.push(SearchDir::flat(user));
    }
    dirs.push(SearchDir::flat("/System/Library/Fonts"));
    dirs.push(SearchDir::flat("/System/Library/Fonts/Supplemental"));
    dirs.push(SearchDir::flat("/Library/Fonts"));
    if let Some(home) = home_dir() {
        dirs.push(SearchDir::flat(home.join("Library/Fonts")));
    }
    dirs.push(SearchDir::recursive("/usr/share/fonts"));
    dirs.push(SearchDir::recursive("/usr/local/share/fonts"));
    if let Some(home) = home_dir() {
        dirs.push(SearchDir::recursive(home.join(".local/share/fonts")));
        dirs.push(SearchDir::recursive(home.join(".fonts")));
    }
    dirs
}

fn keywords(style: ScriptStyle) -> &'static [&'static str] {
    match style {
        ScriptStyle::Arial => &["arial", "liberationsans", "arimo"],
        ScriptStyle::Times => &["times", "liberationserif", "tinos"],
        ScriptStyle::Cursive | ScriptStyle::Mongolia | ScriptStyle::Brush | ScriptStyle::Lucida => {
            &["brushsc", "scriptbl", "lhandw", "mtcorsva", "chancery", "script", "handwriting"]
        }
        ScriptStyle::Gujarati => &[
            "shruti",
            "shvruti",
            "noto",
            "gujarati",
            "gujrati",
            "lohit-gujarati",
            "lohit gujarati",
            "mukta",
            "prabhki",
            "rekha",
            "kalapi",
        ],
    }
}

fn exact_paths(style: ScriptStyle) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = vec![];
    let fixed: &[&str] = match style {
        ScriptStyle::Arial => &[
            "C:/Windows/Fonts/arial.ttf",
            "/System/Library/Fonts/Supplemental/Arial.ttf",
            "/Library/Fonts/Arial.ttf",
            "/usr/share/fonts/truetype/msttcorefonts/Arial.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
            "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
        ],
        ScriptStyle::Times => &[
            "C:/Windows/Fonts/times.ttf",
            "/System/Library/Fonts/Supplemental/Times New Roman.ttf",
            "/Library/Fonts/Times New Roman.ttf",
            "/usr/share/fonts/truetype/msttcorefonts/Times_New_Roman.ttf",
            "/usr/share/fonts/truetype/liberation/LiberationSerif-Regular.ttf",
            "/usr/share/fonts/liberation/LiberationSerif-Regular.ttf",
        ],
        ScriptStyle::Brush => &["C:/Windows/Fonts/BRUSHSCI.TTF", "C:/Windows/Fonts/BRUSHSC.ttf"],
        ScriptStyle::Lucida => &["C:/Windows/Fonts/LHANDW.TTF"],
        ScriptStyle::Mongolia => &["C:/Windows/Fonts/MTCORSVA.TTF"],
        ScriptStyle::Cursive => &[],
        ScriptStyle::Gujarati => &[],
    };
    paths.extend(fixed.iter().map(PathBuf::from));

    match style {
        ScriptStyle::Cursive | ScriptStyle::Mongolia | ScriptStyle::Brush | ScriptStyle::Lucida => {
            paths.extend(
                [
                    "C:/Windows/Fonts/BRUSHSCI.TTF",
                    "C:/Windows/Fonts/BRUSHSC.ttf",
                    "C:/Windows/Fonts/SCRIPTBL.TTF",
                    "C:/Windows/Fonts/LHANDW.TTF",
                    "/System/Library/Fonts/Supplemental/Brush Script.ttf",
                    "/System/Library/Fonts/Supplemental/Apple Chancery.ttf",
                ]
                .iter()
                .map(PathBuf::from),
            );
        }
        ScriptStyle::Gujarati => {
            if let Some(user) = windows_user_fonts() {
                for file in [
                    "NotoSansGujarati-Regular.ttf",
                    "NotoSansGujarati-Bold.ttf",
                    "NotoSansGujarati-Medium.ttf",
                ] {
                    paths.push(user.join(file));
                }
            }
            paths.extend(
                [
                    "C:/Windows/Fonts/NotoSansGujarati-Regular.ttf",
                    "C:/Windows/Fonts/NotoSansGujarati-Bold.ttf",
                    "C:/Windows/Fonts/NotoSansGujarati-Medium.ttf",
                    "C:/Windows/Fonts/NotoSansGujarati-Regular.otf",
                    "C:/Windows/Fonts/NotoSansGujarati-Bold.otf",
                    "C:/Windows/Fonts/shvruti.ttf",
                    "C:/Windows/Fonts/SHRUTI.TTF",
                    "C:/Windows/Fonts/shruti.ttf",
                    "/usr/share/fonts/truetype/noto/NotoSansGujarati-Regular.ttf",
                    "/usr/share/fonts/noto/NotoSansGujarati-Regular.ttf",
                    "/usr/share/fonts/google-noto/NotoSansGujarati-Regular.ttf",
                    "/usr/share/fonts/truetype/lohit-gujarati/Lohit-Gujarati.ttf",
                    "/System/Library/Fonts/Supplemental/NotoSansGujarati-Regular.ttf",
                    "/System/Library/Fonts/Supplemental/Gujarati Sangam MN.ttc",
                ]
                .iter()
                .map(PathBuf::from),
            );
        }
        _ => {}
    }
    paths
}

fn broad_coverage_paths() -> Vec<PathBuf> {
    [
        "C:/Windows/Fonts/ARIALUNI.TTF",
        "C:/Windows/Fonts/arialuni.ttf",
        "C:/Windows/Fonts/Arial Unicode MS.ttf",
        "/Library/Fonts/Arial Unicode.ttf",
        "/System/Library/Fonts/Supplemental/Arial Unicode.ttf",
        "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/dejavu/DejaVuSans.ttf",
        "/usr/share/fonts/TTF/DejaVuSans.ttf",
        "/usr/share/fonts/truetype/freefont/FreeSerif.ttf",
        "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

/// Font shipped in `tests/fonts`, so tests do not depend on the host's fonts.
#[cfg(test)]
pub(crate) fn bundled_font(file: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fonts").join(file)
}
