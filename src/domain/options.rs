//! Render option types shared by the HTTP boundary, the generator and the engine.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const PX_PER_INCH: f64 = 96.0;
const MM_PER_INCH: f64 = 25.4;
const CM_PER_INCH: f64 = 2.54;
const PT_PER_INCH: f64 = 72.0;
const PC_PER_INCH: f64 = 6.0;

/// Paper size tokens understood by the renderer. Names match case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PaperFormat {
    A3,
    A4,
    A5,
    Legal,
    Letter,
    Tabloid,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown paper format `{0}`")]
pub struct UnknownPaperFormat(pub String);

impl PaperFormat {
    /// Portrait dimensions in inches as `(width, height)`.
    pub fn dimensions_in(self) -> (f64, f64) {
        match self {
            PaperFormat::A3 => (11.69, 16.54),
            PaperFormat::A4 => (8.27, 11.69),
            PaperFormat::A5 => (5.83, 8.27),
            PaperFormat::Legal => (8.5, 14.0),
            PaperFormat::Letter => (8.5, 11.0),
            PaperFormat::Tabloid => (11.0, 17.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaperFormat::A3 => "A3",
            PaperFormat::A4 => "A4",
            PaperFormat::A5 => "A5",
            PaperFormat::Legal => "Legal",
            PaperFormat::Letter => "Letter",
            PaperFormat::Tabloid => "Tabloid",
        }
    }
}

impl FromStr for PaperFormat {
    type Err = UnknownPaperFormat;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "a3" => Ok(PaperFormat::A3),
            "a4" => Ok(PaperFormat::A4),
            "a5" => Ok(PaperFormat::A5),
            "legal" => Ok(PaperFormat::Legal),
            "letter" => Ok(PaperFormat::Letter),
            "tabloid" => Ok(PaperFormat::Tabloid),
            _ => Err(UnknownPaperFormat(value.to_string())),
        }
    }
}

impl TryFrom<String> for PaperFormat {
    type Error = UnknownPaperFormat;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PaperFormat> for String {
    fn from(value: PaperFormat) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LengthError {
    #[error("length must not be empty")]
    Empty,
    #[error("invalid length `{0}`")]
    Invalid(String),
    #[error("unsupported length unit `{0}`")]
    UnsupportedUnit(String),
    #[error("length must not be negative: `{0}`")]
    Negative(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthUnit {
    Px,
    In,
    Cm,
    Mm,
    Pt,
    Pc,
}

impl LengthUnit {
    fn suffix(self) -> &'static str {
        match self {
            LengthUnit::Px => "px",
            LengthUnit::In => "in",
            LengthUnit::Cm => "cm",
            LengthUnit::Mm => "mm",
            LengthUnit::Pt => "pt",
            LengthUnit::Pc => "pc",
        }
    }

    fn per_inch(self) -> f64 {
        match self {
            LengthUnit::Px => PX_PER_INCH,
            LengthUnit::In => 1.0,
            LengthUnit::Cm => CM_PER_INCH,
            LengthUnit::Mm => MM_PER_INCH,
            LengthUnit::Pt => PT_PER_INCH,
            LengthUnit::Pc => PC_PER_INCH,
        }
    }
}

/// A CSS absolute length such as `10mm` or `400px`. A bare number is read as pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CssLength {
    value: f64,
    unit: LengthUnit,
}

impl CssLength {
    pub fn new(value: f64, unit: LengthUnit) -> Self {
        Self { value, unit }
    }

    pub fn mm(value: f64) -> Self {
        Self::new(value, LengthUnit::Mm)
    }

    pub fn to_inches(self) -> f64 {
        self.value / self.unit.per_inch()
    }
}

impl FromStr for CssLength {
    type Err = LengthError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(LengthError::Empty);
        }

        let split = trimmed
            .find(|c: char| c.is_ascii_alphabetic())
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);

        let value: f64 = number
            .trim()
            .parse()
            .map_err(|_| LengthError::Invalid(raw.to_string()))?;
        if !value.is_finite() {
            return Err(LengthError::Invalid(raw.to_string()));
        }
        if value < 0.0 {
            return Err(LengthError::Negative(raw.to_string()));
        }

        let unit = match unit.to_ascii_lowercase().as_str() {
            "" | "px" => LengthUnit::Px,
            "in" => LengthUnit::In,
            "cm" => LengthUnit::Cm,
            "mm" => LengthUnit::Mm,
            "pt" => LengthUnit::Pt,
            "pc" => LengthUnit::Pc,
            other => return Err(LengthError::UnsupportedUnit(other.to_string())),
        };

        Ok(Self { value, unit })
    }
}

impl TryFrom<String> for CssLength {
    type Error = LengthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CssLength> for String {
    fn from(value: CssLength) -> Self {
        value.to_string()
    }
}

impl fmt::Display for CssLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.unit.suffix())
    }
}

/// Page margins. Unset sides fall back to zero in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Margin {
    pub top: Option<CssLength>,
    pub right: Option<CssLength>,
    pub bottom: Option<CssLength>,
    pub left: Option<CssLength>,
}

impl Margin {
    pub fn uniform(length: CssLength) -> Self {
        Self {
            top: Some(length),
            right: Some(length),
            bottom: Some(length),
            left: Some(length),
        }
    }
}

/// Engine-level render options handed to a page's PDF call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PdfOptions {
    /// Paper size token; cleared whenever an explicit width or height is set.
    pub format: Option<PaperFormat>,
    pub landscape: bool,
    pub margin: Margin,
    pub width: Option<CssLength>,
    pub height: Option<CssLength>,
    pub print_background: bool,
    pub display_header_footer: bool,
    pub header_template: Option<String>,
    pub footer_template: Option<String>,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            format: Some(PaperFormat::A4),
            landscape: false,
            margin: Margin::uniform(CssLength::mm(10.0)),
            width: None,
            height: None,
            print_background: true,
            display_header_footer: false,
            header_template: None,
            footer_template: None,
        }
    }
}

impl PdfOptions {
    /// Paper size in inches as `(width, height)` before orientation is applied.
    ///
    /// Explicit dimensions win; a missing one is taken from the format, or A4
    /// when no format is set.
    pub fn paper_size_in(&self) -> (f64, f64) {
        let (base_width, base_height) = self
            .format
            .unwrap_or(PaperFormat::A4)
            .dimensions_in();
        let width = self.width.map(CssLength::to_inches).unwrap_or(base_width);
        let height = self
            .height
            .map(CssLength::to_inches)
            .unwrap_or(base_height);
        (width, height)
    }
}

/// Partial border override supplied by callers.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BorderOptions {
    pub top: Option<CssLength>,
    pub right: Option<CssLength>,
    pub bottom: Option<CssLength>,
    pub left: Option<CssLength>,
}

/// Engine-agnostic options accepted by [`crate::application::generator::PdfGenerator`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GenerationOptions {
    /// Per-job render timeout in milliseconds.
    pub timeout: Option<u64>,
    pub format: Option<PaperFormat>,
    pub orientation: Option<Orientation>,
    pub border: Option<BorderOptions>,
    pub width: Option<CssLength>,
    pub height: Option<CssLength>,
}
