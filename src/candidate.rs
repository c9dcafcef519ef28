//! Raw table detections as emitted by an external page analyzer
//!
//! Nothing in here interprets the data; the validator is the first stage that
//! looks at the cells.

use serde::{Deserialize, Serialize};

/// A single cell value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    /// No content (also used as the padding marker for repaired rows)
    Empty,
    /// A value the analyzer already parsed as a number
    Number(f64),
    /// Raw cell text
    Text(String),
}

impl CellValue {
    /// Build a cell from text, mapping blank text to `Empty`
    pub fn text(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.trim().is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(s)
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            CellValue::Number(_) => false,
        }
    }

    /// Whether the cell holds numeric data (parsed or numeric-looking text)
    pub fn is_numeric(&self) -> bool {
        match self {
            CellValue::Number(_) => true,
            CellValue::Text(s) => looks_like_number(s),
            CellValue::Empty => false,
        }
    }

    /// Display text of the cell (`Empty` renders as an empty string)
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            CellValue::Text(s) => s.trim().to_string(),
        }
    }
}

/// Check if a string looks like a number, tolerating currency and percent marks
pub fn looks_like_number(s: &str) -> bool {
    let s = s.trim();
    let s = s
        .trim_start_matches(['$', '€', '£', '¥'])
        .trim_end_matches('%')
        .trim();
    if s.is_empty() {
        return false;
    }

    // Handle common number formats: 9.0, 10, 8.6, 1,200, (45.00)
    let s = s.strip_prefix('(').and_then(|r| r.strip_suffix(')')).unwrap_or(s);
    s.chars()
        .all(|c| c.is_ascii_digit() || c == '.' || c == ',' || c == '-' || c == '+')
        && s.chars().any(|c| c.is_ascii_digit())
}

/// Axis-aligned bounding box in page coordinates (origin top-left, y grows downward)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn area(&self) -> f32 {
        (self.x1 - self.x0).max(0.0) * (self.y1 - self.y0).max(0.0)
    }

    /// Intersection area divided by the smaller box's area
    pub fn overlap_ratio(&self, other: &BoundingBox) -> f32 {
        let w = (self.x1.min(other.x1) - self.x0.max(other.x0)).max(0.0);
        let h = (self.y1.min(other.y1) - self.y0.max(other.y0)).max(0.0);
        let smaller = self.area().min(other.area());
        if smaller <= 0.0 {
            return 0.0;
        }
        (w * h) / smaller
    }
}

/// Where a detection sits in the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Page number (1-indexed)
    pub page: u32,
    /// Bounding box, when the analyzer reports geometry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
    /// Position of the detection on its page (reading order)
    #[serde(default)]
    pub ordinal: u32,
}

impl Region {
    pub fn new(page: u32, ordinal: u32) -> Self {
        Self {
            page,
            bbox: None,
            ordinal,
        }
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }
}

/// Placement of a text span relative to the table region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanPlacement {
    Above,
    Below,
    Beside,
    /// Running header area of the page
    PageHeader,
    /// Running footer area of the page
    PageFooter,
}

/// Text near a detection that may be its title or caption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub text: String,
    pub placement: SpanPlacement,
    /// Vertical gap between the span and the table region, in points
    #[serde(default)]
    pub distance: f32,
    /// Rank of the span's font size on the page (higher = larger font)
    #[serde(default)]
    pub font_size_rank: u32,
}

impl TextSpan {
    pub fn new(text: impl Into<String>, placement: SpanPlacement, distance: f32, rank: u32) -> Self {
        Self {
            text: text.into(),
            placement,
            distance,
            font_size_rank: rank,
        }
    }
}

/// A raw table detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCandidate {
    /// Analyzer-assigned identifier
    pub id: String,
    pub region: Region,
    #[serde(default)]
    pub raw_headers: Vec<String>,
    #[serde(default)]
    pub raw_rows: Vec<Vec<CellValue>>,
    /// Analyzer confidence in [0, 1]
    pub detector_confidence: f32,
    #[serde(default)]
    pub nearby_text_spans: Vec<TextSpan>,
}
