//! Cost record model
//!
//! A record is the full cost dataset for the presentation: per-slide payloads
//! plus the formatting rules used when values are written to the display.
//! Slide payloads stay semi-structured JSON; only the pieces the derivation
//! and formatting steps rely on are typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::LoadError;

/// The full cost dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Slide identifier -> slide payload
    #[serde(default)]
    pub slides: Map<String, Value>,
    #[serde(default)]
    pub configuration: Configuration,
    /// Top-level keys the pipeline does not interpret (kept for fingerprinting)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub format: FormatRules,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Display formatting rules carried by the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatRules {
    pub thousands_separator: String,
    pub currency_symbol: String,
}

impl Default for FormatRules {
    fn default() -> Self {
        Self {
            thousands_separator: ",".to_string(),
            currency_symbol: "$".to_string(),
        }
    }
}

/// Outcome of resolving a dotted field path against a slide.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Found(&'a Value),
    Missing,
}

impl<'a> FieldValue<'a> {
    pub fn found(self) -> Option<&'a Value> {
        match self {
            Self::Found(value) => Some(value),
            Self::Missing => None,
        }
    }
}

impl Record {
    /// Parse a record from a JSON document. `origin` names the URL or file
    /// for error reporting.
    pub fn from_json(text: &str, origin: &str) -> Result<Self, LoadError> {
        serde_json::from_str(text).map_err(|source| LoadError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    pub fn slide(&self, slide_id: &str) -> Option<&Value> {
        self.slides.get(slide_id)
    }

    pub fn slide_mut(&mut self, slide_id: &str) -> Option<&mut Value> {
        self.slides.get_mut(slide_id)
    }

    /// Walk `path` (segments separated by `.`) into the named slide.
    ///
    /// Object segments index by key, array segments by numeric position.
    /// Resolution stops at the first absent segment; an explicit `null` at the
    /// end of the path counts as absent too.
    pub fn resolve(&self, slide_id: &str, path: &str) -> FieldValue<'_> {
        let Some(mut current) = self.slide(slide_id) else {
            return FieldValue::Missing;
        };

        for segment in path.split('.') {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return FieldValue::Missing,
            }
        }

        if current.is_null() {
            FieldValue::Missing
        } else {
            FieldValue::Found(current)
        }
    }
}
