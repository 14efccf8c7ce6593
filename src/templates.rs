//! Template System - Certificate Backgrounds and Script Styles

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template {path} could not be read: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Template {path} is not a decodable image: {reason}")]
    NotAnImage { path: PathBuf, reason: String },

    #[error("Template {path} has zero size")]
    Empty { path: PathBuf },
}

/// Writing system a style renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Script {
    Latin,
    Gujarati,
}

impl Script {
    /// Sample characters used to check that a font really covers the script.
    pub fn sample_chars(self) -> &'static [char] {
        match self {
            Script::Latin => &['A', 'a', 'M', 'e', 'g'],
            Script::Gujarati => &['અ', 'ક', 'ગ', 'જ', 'ન'],
        }
    }

    /// Scripts that need shaping for conjuncts and vowel signs.
    pub fn is_complex(self) -> bool {
        matches!(self, Script::Gujarati)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Script::Latin => "latin",
            Script::Gujarati => "gujarati",
        }
    }
}

/// Font style requested for the recipient name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStyle {
    Arial,
    Times,
    Cursive,
    Mongolia,
    Brush,
    Lucida,
    Gujarati,
}

impl ScriptStyle {
    pub const ALL: [ScriptStyle; 7] = [
        ScriptStyle::Arial,
        ScriptStyle::Times,
        ScriptStyle::Cursive,
        ScriptStyle::Mongolia,
        ScriptStyle::Brush,
        ScriptStyle::Lucida,
        ScriptStyle::Gujarati,
    ];

    pub fn script(self) -> Script {
        match self {
            ScriptStyle::Gujarati => Script::Gujarati,
            _ => Script::Latin,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScriptStyle::Arial => "arial",
            ScriptStyle::Times => "times",
            ScriptStyle::Cursive => "cursive",
            ScriptStyle::Mongolia => "mongolia",
            ScriptStyle::Brush => "brush",
            ScriptStyle::Lucida => "lucida",
            ScriptStyle::Gujarati => "gujarati",
        }
    }

    /// Apply the casing policy for this style.
    ///
    /// Latin names are title-cased with whitespace collapsed; other scripts are
    /// returned exactly as submitted.
    pub fn apply_casing(self, name: &str) -> String {
        match self.script() {
            Script::Latin => to_title_case(name),
            Script::Gujarati => name.to_string(),
        }
    }
}

impl fmt::Display for ScriptStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScriptStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ScriptStyle::ALL
            .iter()
            .copied()
            .find(|style| style.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<_> = ScriptStyle::ALL.iter().map(|s| s.as_str()).collect();
                format!("Unknown style '{}'. Valid styles: {}", s, known.join(", "))
            })
    }
}

/// "govind  PATEL" -> "Govind Patel"
pub fn to_title_case(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A decoded certificate background, forced to 8-bit RGB.
#[derive(Debug, Clone)]
pub struct CertificateTemplate {
    pub path: PathBuf,
    pub image: RgbImage,
}

impl CertificateTemplate {
    /// Load and validate a template. Anything that does not decode to a
    /// non-empty raster is rejected.
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        let reader = image::ImageReader::open(path).map_err(|source| TemplateError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let reader = reader.with_guessed_format().map_err(|source| TemplateError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let decoded = reader.decode().map_err(|e| TemplateError::NotAnImage {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_image(path, decoded.to_rgb8())
    }

    pub fn from_image(path: &Path, image: RgbImage) -> Result<Self, TemplateError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(TemplateError::Empty { path: path.to_path_buf() });
        }
        Ok(Self {
            path: path.to_path_buf(),
            image,
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_title_case_collapses_whitespace() {
        assert_eq!(to_title_case("  govind   patel "), "Govind Patel");
        assert_eq!(to_title_case("ANJU SHAH"), "Anju Shah");
        assert_eq!(to_title_case("o'neil mcdonald"), "O'neil Mcdonald");
    }

    #[test]
    fn test_gujarati_casing_untouched() {
        let name = "ઉમેશકુમાર પટેલ";
        assert_eq!(ScriptStyle::Gujarati.apply_casing(name), name);
    }

    #[test]
    fn test_style_parse() {
        assert_eq!("Gujarati".parse::<ScriptStyle>().unwrap(), ScriptStyle::Gujarati);
        assert_eq!("brush".parse::<ScriptStyle>().unwrap(), ScriptStyle::Brush);
        assert!("comic".parse::<ScriptStyle>().is_err());
    }

    #[test]
    fn test_non_image_template_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a png").unwrap();

        let err = CertificateTemplate::load(file.path()).unwrap_err();
        assert!(matches!(err, TemplateError::NotAnImage { .. }));
    }

    #[test]
    fn test_template_forced_to_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.png");
        image::RgbaImage::from_pixel(40, 20, image::Rgba([10, 20, 30, 128]))
            .save(&path)
            .unwrap();

        let template = CertificateTemplate::load(&path).unwrap();
        assert_eq!((template.width(), template.height()), (40, 20));
        assert_eq!(template.image.get_pixel(0, 0).0, [10, 20, 30]);
    }
}
