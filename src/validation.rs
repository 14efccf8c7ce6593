//! Validation System - Rule/Policy Separation
//!
//! Rules produce structured violations.
//! Errors reject the request; warnings are recorded and the value is corrected.

use serde::{Deserialize, Serialize};

use crate::renderer::RenderSpec;
use crate::templates::ScriptStyle;

pub const MIN_FONT_SIZE: u32 = 10;
/// Larger sizes would rasterize glyph bitmaps bigger than any template.
pub const MAX_FONT_SIZE: u32 = 1000;
pub const DEFAULT_FONT_SIZE: i64 = 48;
pub const DEFAULT_Y_POSITION: i32 = 300;
pub const DEFAULT_COLOR: &str = "#000000";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
}

impl ValidationResult {
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationViolation> {
        self.violations.iter().filter(|v| v.severity == ViolationSeverity::Error)
    }

    pub fn warnings(&self) -> Vec<ValidationViolation> {
        self.violations
            .iter()
            .filter(|v| v.severity != ViolationSeverity::Error)
            .cloned()
            .collect()
    }
}

/// Raw request as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestInput {
    /// Newline-separated recipient names.
    pub names: String,
    pub style: String,
    pub font_size: i64,
    pub y_position: i32,
    pub color: String,
    pub want_pdf: bool,
}

impl Default for RequestInput {
    fn default() -> Self {
        Self {
            names: String::new(),
            style: ScriptStyle::Arial.as_str().to_string(),
            font_size: DEFAULT_FONT_SIZE,
            y_position: DEFAULT_Y_POSITION,
            color: DEFAULT_COLOR.to_string(),
            want_pdf: false,
        }
    }
}

/// A validated request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderParams {
    pub names: Vec<String>,
    pub style: ScriptStyle,
    pub font_size: u32,
    pub y_position: i32,
    pub color: [u8; 3],
    pub want_pdf: bool,
}

impl RenderParams {
    pub fn render_spec(&self) -> RenderSpec {
        RenderSpec {
            style: self.style,
            y_position: self.y_position,
            color: self.color,
        }
    }
}

/// Trimmed, non-empty lines.
pub fn parse_names(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// `RRGGBB` with an optional leading `#`.
pub fn parse_color(text: &str) -> Option<[u8; 3]> {
    let hex_digits = text.trim().strip_prefix('#').unwrap_or(text.trim());
    if hex_digits.len() != 6 || !hex_digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex_digits[i..i + 2], 16).ok();
    Some([channel(0)?, channel(2)?, channel(4)?])
}

/// Validation rule trait - produces violations
pub trait ValidationRule {
    fn name(&self) -> &'static str;
    fn validate(&self, input: &RequestInput) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

pub struct NamesRule;

impl NamesRule {
    pub const NAME: &'static str = "names";
}

impl ValidationRule for NamesRule {
    fn name(&self) -> &'static str { Self::NAME }

    fn validate(&self, input: &RequestInput) -> Vec<ValidationViolation> {
        if !parse_names(&input.names).is_empty() {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Error,
            message: "No names provided".to_string(),
            expected: Some("at least one non-empty line".to_string()),
            actual: None,
            remediation: vec!["Enter one recipient name per line".to_string()],
        }]
    }
}

pub struct StyleRule;

impl ValidationRule for StyleRule {
    fn name(&self) -> &'static str { "style" }

    fn validate(&self, input: &RequestInput) -> Vec<ValidationViolation> {
        match input.style.parse::<ScriptStyle>() {
            Ok(_) => vec![],
            Err(message) => vec![ValidationViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Error,
                message,
                expected: Some(
                    ScriptStyle::ALL
                        .iter()
                        .map(|s| s.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                actual: Some(input.style.clone()),
                remediation: vec!["Choose one of the listed styles".to_string()],
            }],
        }
    }
}

pub struct FontSizeRule;

impl ValidationRule for FontSizeRule {
    fn name(&self) -> &'static str { "font_size" }

    fn validate(&self, input: &RequestInput) -> Vec<ValidationViolation> {
        if input.font_size > MAX_FONT_SIZE as i64 {
            return vec![ValidationViolation {
                rule: self.name().to_string(),
                severity: ViolationSeverity::Error,
                message: "Font size too large".to_string(),
                expected: Some(format!("<= {}", MAX_FONT_SIZE)),
                actual: Some(input.font_size.to_string()),
                remediation: vec![format!("Use a size between {} and {}", MIN_FONT_SIZE, MAX_FONT_SIZE)],
            }];
        }
        if input.font_size >= MIN_FONT_SIZE as i64 {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Warning,
            message: format!("Font size raised to {}", MIN_FONT_SIZE),
            expected: Some(format!(">= {}", MIN_FONT_SIZE)),
            actual: Some(input.font_size.to_string()),
            remediation: vec![],
        }]
    }
}

pub struct ColorRule;

impl ValidationRule for ColorRule {
    fn name(&self) -> &'static str { "color" }

    fn validate(&self, input: &RequestInput) -> Vec<ValidationViolation> {
        if parse_color(&input.color).is_some() {
            return vec![];
        }
        vec![ValidationViolation {
            rule: self.name().to_string(),
            severity: ViolationSeverity::Error,
            message: "Invalid text color".to_string(),
            expected: Some("#RRGGBB".to_string()),
            actual: Some(input.color.clone()),
            remediation: vec!["Use six hex digits, e.g. #1a2b3c".to_string()],
        }]
    }
}

/// Validator orchestrates rules and applies policy
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self {
            rules: vec![
                Box::new(NamesRule),
                Box::new(StyleRule),
                Box::new(FontSizeRule),
                Box::new(ColorRule),
            ],
        }
    }

    pub fn validate(&self, input: &RequestInput) -> ValidationResult {
        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(input))
            .collect();
        let valid = !violations.iter().any(|v| v.severity == ViolationSeverity::Error);
        ValidationResult { valid, violations }
    }

    /// Validate and build the immutable parameters, or return the failed result.
    pub fn build(&self, input: &RequestInput) -> Result<(RenderParams, ValidationResult), ValidationResult> {
        let result = self.validate(input);
        if !result.valid {
            return Err(result);
        }

        let (Ok(style), Some(color)) = (input.style.parse::<ScriptStyle>(), parse_color(&input.color)) else {
            return Err(result);
        };

        let params = RenderParams {
            names: parse_names(&input.names),
            style,
            font_size: input.font_size.clamp(MIN_FONT_SIZE as i64, MAX_FONT_SIZE as i64) as u32,
            y_position: input.y_position,
            color,
            want_pdf: input.want_pdf,
        };
        Ok((params, result))
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
