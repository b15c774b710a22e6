//! Binding renderer
//!
//! A binding ties one display target to a dotted field path inside a slide and
//! a value kind. Rendering resolves the path against the current record and,
//! when a value is present, writes its formatted text to the target. Absent
//! values leave the target as it was.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::format::{format_value, ValueKind};
use crate::record::{FieldValue, Record};

/// Where display targets live. Locating a target and mutating its text is the
/// surface's business.
pub trait DisplaySurface: Send + Sync {
    fn write_text(&self, target: &str, text: &str);
}

/// Declarative mapping from a record field to a display target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub target: String,
    pub slide: String,
    pub field: String,
    #[serde(default)]
    pub kind: ValueKind,
}

impl Binding {
    pub fn new(
        target: impl Into<String>,
        slide: impl Into<String>,
        field: impl Into<String>,
        kind: ValueKind,
    ) -> Self {
        Self {
            target: target.into(),
            slide: slide.into(),
            field: field.into(),
            kind,
        }
    }
}

/// Ad-hoc mapping rendered against a single slide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideMapping {
    pub target: String,
    pub field: String,
    #[serde(default)]
    pub kind: ValueKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Written,
    Missing,
}

#[derive(Clone)]
pub struct BindingRenderer {
    surface: Arc<dyn DisplaySurface>,
}

impl BindingRenderer {
    pub fn new(surface: Arc<dyn DisplaySurface>) -> Self {
        Self { surface }
    }

    pub fn render(&self, record: &Record, binding: &Binding) -> RenderOutcome {
        self.write(record, &binding.target, &binding.slide, &binding.field, binding.kind)
    }

    /// Render every binding; returns how many targets were written.
    pub fn render_all(&self, record: &Record, bindings: &[Binding]) -> usize {
        debug!(bindings = bindings.len(), "refreshing bound display targets");
        bindings
            .iter()
            .filter(|binding| self.render(record, binding) == RenderOutcome::Written)
            .count()
    }

    pub fn render_slide(&self, record: &Record, slide: &str, mappings: &[SlideMapping]) -> usize {
        mappings
            .iter()
            .filter(|m| self.write(record, &m.target, slide, &m.field, m.kind) == RenderOutcome::Written)
            .count()
    }

    fn write(
        &self,
        record: &Record,
        target: &str,
        slide: &str,
        field: &str,
        kind: ValueKind,
    ) -> RenderOutcome {
        if target.is_empty() {
            return RenderOutcome::Missing;
        }

        match record.resolve(slide, field) {
            FieldValue::Found(value) => {
                let text = format_value(value, kind, &record.configuration.format);
                trace!(target_id = target, slide, field, %kind, text = %text, "write");
                self.surface.write_text(target, &text);
                RenderOutcome::Written
            }
            FieldValue::Missing => {
                trace!(target_id = target, slide, field, "no value, target left untouched");
                RenderOutcome::Missing
            }
        }
    }
}

/// In-memory display surface: target id -> current text.
#[derive(Debug, Default)]
pub struct MemorySurface {
    targets: RwLock<HashMap<String, String>>,
    writes: RwLock<usize>,
}

impl MemorySurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a target with content, as markup would before any render.
    pub fn set(&self, target: &str, text: &str) {
        self.targets.write().insert(target.to_string(), text.to_string());
    }

    pub fn text(&self, target: &str) -> Option<String> {
        self.targets.read().get(target).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.targets.read().clone()
    }

    /// Total number of writes performed through [`DisplaySurface`].
    pub fn writes(&self) -> usize {
        *self.writes.read()
    }
}

impl DisplaySurface for MemorySurface {
    fn write_text(&self, target: &str, text: &str) {
        self.targets.write().insert(target.to_string(), text.to_string());
        *self.writes.write() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Record {
        serde_json::from_value(json!({
            "slides": {
                "slide19": {
                    "title": "Inversión",
                    "totals": { "firstPeriodInvestment": 6500, "commission": 12.5 },
                    "services": { "content": { "monthly": 0 } }
                }
            }
        }))
        .unwrap()
    }

    fn renderer() -> (BindingRenderer, Arc<MemorySurface>) {
        let surface = Arc::new(MemorySurface::new());
        (BindingRenderer::new(surface.clone()), surface)
    }

    #[test]
    fn test_render_formats_by_kind() {
        let (renderer, surface) = renderer();
        let bindings = vec![
            Binding::new("first", "slide19", "totals.firstPeriodInvestment", ValueKind::Currency),
            Binding::new("commission", "slide19", "totals.commission", ValueKind::Percentage),
            Binding::new("title", "slide19", "title", ValueKind::Text),
            Binding::new("content", "slide19", "services.content.monthly", ValueKind::Number),
        ];

        assert_eq!(renderer.render_all(&record(), &bindings), 4);
        assert_eq!(surface.text("first").as_deref(), Some("$6,500"));
        assert_eq!(surface.text("commission").as_deref(), Some("12.5%"));
        assert_eq!(surface.text("title").as_deref(), Some("Inversión"));
        assert_eq!(surface.text("content").as_deref(), Some("0"));
    }

    #[test]
    fn test_missing_path_leaves_target_untouched() {
        let (renderer, surface) = renderer();
        surface.set("media", "$—");

        let binding = Binding::new("media", "slide19", "totals.mediaInvestment", ValueKind::Currency);
        assert_eq!(renderer.render(&record(), &binding), RenderOutcome::Missing);

        let binding = Binding::new("media", "slide20", "totals", ValueKind::Text);
        assert_eq!(renderer.render(&record(), &binding), RenderOutcome::Missing);

        assert_eq!(surface.text("media").as_deref(), Some("$—"));
        assert_eq!(surface.writes(), 0);
    }

    #[test]
    fn test_render_slide_mappings() {
        let (renderer, surface) = renderer();
        let mappings = vec![
            SlideMapping {
                target: "total".into(),
                field: "totals.firstPeriodInvestment".into(),
                kind: ValueKind::Number,
            },
            SlideMapping {
                target: "missing".into(),
                field: "totals.unknown".into(),
                kind: ValueKind::Text,
            },
        ];
        assert_eq!(renderer.render_slide(&record(), "slide19", &mappings), 1);
        assert_eq!(surface.text("total").as_deref(), Some("6,500"));
        assert!(surface.text("missing").is_none());
    }

    #[test]
    fn test_binding_kind_defaults_to_text() {
        let binding: Binding =
            toml::from_str("target = \"t\"\nslide = \"slide14\"\nfield = \"costPerLead\"\n").unwrap();
        assert_eq!(binding.kind, ValueKind::Text);
    }
}
