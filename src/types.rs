use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Literal the extraction backend writes when a requested field was not found.
pub const NOT_FOUND: &str = "Не найдено";

/// Axis-aligned box in original image pixels (top-left, bottom-right).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Corners reordered so that (x1, y1) is the minimum.
    pub fn normalized(&self) -> Self {
        Self {
            x1: self.x1.min(self.x2),
            y1: self.y1.min(self.y2),
            x2: self.x1.max(self.x2),
            y2: self.y1.max(self.y2),
        }
    }

    /// Accepts exactly four finite numbers; anything else means "no geometry".
    fn from_wire(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        if items.len() != 4 {
            return None;
        }
        let mut nums = [0.0f64; 4];
        for (slot, item) in nums.iter_mut().zip(items) {
            let n = item.as_f64()?;
            if !n.is_finite() {
                return None;
            }
            *slot = n;
        }
        Some(Self::new(nums[0], nums[1], nums[2], nums[3]))
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One recognized value on a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireField")]
pub struct ExtractedField {
    pub name: String,
    pub value: String,
    pub confidence: f64,
    pub coordinate: Option<BoundingBox>,
    pub group: Option<String>,
    pub row_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_value: Option<String>,
    pub is_corrected: bool,
}

impl ExtractedField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            confidence: 0.0,
            coordinate: None,
            group: None,
            row_index: None,
            original_value: None,
            is_corrected: false,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_confidence(confidence);
        self
    }

    pub fn with_coordinate(mut self, coordinate: BoundingBox) -> Self {
        self.coordinate = Some(coordinate);
        self
    }

    pub fn in_group(mut self, group: impl Into<String>, row_index: u32) -> Self {
        self.group = Some(group.into());
        self.row_index = Some(row_index);
        self
    }

    /// False for empty values and the backend's "not found" literal.
    pub fn has_value(&self) -> bool {
        let v = self.value.trim();
        !v.is_empty() && v != NOT_FOUND
    }
}

fn clamp_confidence(c: f64) -> f64 {
    if c.is_finite() {
        c.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Field as the backend sends it. Nullable everywhere; normalized into `ExtractedField`.
#[derive(Debug, Deserialize)]
struct WireField {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    coordinate: Option<Value>,
    #[serde(default)]
    group: Option<String>,
    #[serde(default)]
    row_index: Option<u32>,
    #[serde(default)]
    original_value: Option<String>,
    #[serde(default)]
    is_corrected: bool,
}

impl From<WireField> for ExtractedField {
    fn from(w: WireField) -> Self {
        Self {
            name: w.name,
            value: w.value.unwrap_or_default(),
            confidence: clamp_confidence(w.confidence.unwrap_or(0.0)),
            coordinate: w.coordinate.as_ref().and_then(BoundingBox::from_wire),
            group: w.group.filter(|g| !g.trim().is_empty()),
            row_index: w.row_index,
            original_value: w.original_value,
            is_corrected: w.is_corrected,
        }
    }
}

/// A processed document as returned by the review API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDocument {
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub preview_image: Option<String>,
    #[serde(default)]
    pub extracted_fields: Vec<ExtractedField>,
}

/// A processing run with its documents (used for export).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRun {
    pub id: String,
    #[serde(default)]
    pub document_type_name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub documents: Vec<ReviewDocument>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_field_is_normalized() {
        let json = r#"{
            "name": "total",
            "value": null,
            "confidence": 1.7,
            "coordinate": [10, 20, 30],
            "group": "",
            "row_index": null
        }"#;
        let field: ExtractedField = serde_json::from_str(json).unwrap();
        assert_eq!(field.value, "");
        assert_eq!(field.confidence, 1.0);
        assert!(field.coordinate.is_none());
        assert!(field.group.is_none());
        assert!(!field.is_corrected);
    }

    #[test]
    fn coordinate_round_trips_as_array() {
        let field = ExtractedField::new("date", "2024-01-02")
            .with_coordinate(BoundingBox::new(1.0, 2.0, 3.0, 4.0));
        let json = serde_json::to_value(&field).unwrap();
        assert_eq!(json["coordinate"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));

        let back: ExtractedField = serde_json::from_value(json).unwrap();
        assert_eq!(back, field);
    }

    #[test]
    fn sentinel_and_blank_values_have_no_value() {
        assert!(!ExtractedField::new("a", NOT_FOUND).has_value());
        assert!(!ExtractedField::new("a", "   ").has_value());
        assert!(ExtractedField::new("a", "0").has_value());
    }

    #[test]
    fn document_tolerates_missing_optional_parts() {
        let doc: ReviewDocument = serde_json::from_str(r#"{"id": "d1"}"#).unwrap();
        assert!(doc.extracted_fields.is_empty());
        assert!(doc.raw_text.is_none());
    }
}
