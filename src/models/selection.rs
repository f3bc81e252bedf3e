use serde::{Deserialize, Serialize};

use crate::types::ExtractedField;

/// Which field the reviewer has selected. Owned by the review session and passed
/// into the text and overlay computations.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum FieldSelection {
    #[default]
    None,
    Index(usize),
    Name(String),
}

impl FieldSelection {
    pub fn matches(&self, index: usize, field: &ExtractedField) -> bool {
        match self {
            FieldSelection::None => false,
            FieldSelection::Index(i) => *i == index,
            FieldSelection::Name(name) => field.name == *name,
        }
    }

    /// First field in list order that the selection refers to.
    pub fn resolve(&self, fields: &[ExtractedField]) -> Option<usize> {
        match self {
            FieldSelection::None => None,
            FieldSelection::Index(i) => (*i < fields.len()).then_some(*i),
            FieldSelection::Name(_) => fields
                .iter()
                .enumerate()
                .position(|(i, f)| self.matches(i, f)),
        }
    }
}

/// Which field is under the pointer. The overlay reports the exact field it hit;
/// the text view reports names or values, matched against every field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum HoverTarget {
    #[default]
    None,
    Index(usize),
    Name(String),
    Value(String),
}

impl HoverTarget {
    pub fn matches(&self, index: usize, field: &ExtractedField) -> bool {
        match self {
            HoverTarget::None => false,
            HoverTarget::Index(i) => *i == index,
            HoverTarget::Name(name) => field.name == *name,
            HoverTarget::Value(value) => field.value == *value,
        }
    }

    pub fn resolve(&self, fields: &[ExtractedField]) -> Option<usize> {
        match self {
            HoverTarget::Index(i) => (*i < fields.len()).then_some(*i),
            _ => fields
                .iter()
                .enumerate()
                .position(|(i, f)| self.matches(i, f)),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, HoverTarget::None)
    }

    /// Set by the overlay hit-test rather than by the text view.
    pub fn from_pointer(&self) -> bool {
        matches!(self, HoverTarget::Index(_))
    }
}
