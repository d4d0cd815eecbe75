//! Template rendering
//!
//! The placeholder grammar is intentionally small: `{{ name }}` or a dotted
//! path into a table, `{{ service.image }}`. Everything else is copied
//! through byte-for-byte, so identical input always renders identically.

use crate::error::RenderError;
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}\}")
        .expect("placeholder pattern is valid")
});

/// Lookup of template sources by identifier
pub trait TemplateSource {
    /// Source text of a template, if the identifier resolves
    fn template(&self, id: &str) -> Option<&str>;

    fn contains(&self, id: &str) -> bool {
        self.template(id).is_some()
    }
}

/// Renders a template identifier plus variables into bytes
pub trait Renderer {
    fn render(
        &self,
        template: &str,
        vars: &BTreeMap<String, Value>,
    ) -> Result<Vec<u8>, RenderError>;
}

impl<T: Renderer + ?Sized> Renderer for &T {
    fn render(
        &self,
        template: &str,
        vars: &BTreeMap<String, Value>,
    ) -> Result<Vec<u8>, RenderError> {
        (**self).render(template, vars)
    }
}

/// In-memory template registry
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    templates: BTreeMap<String, String>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a template
    pub fn insert(&mut self, id: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(id.into(), source.into());
    }

    /// Registered identifiers, sorted
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateSource for TemplateStore {
    fn template(&self, id: &str) -> Option<&str> {
        self.templates.get(id).map(String::as_str)
    }
}

impl Renderer for TemplateStore {
    fn render(
        &self,
        template: &str,
        vars: &BTreeMap<String, Value>,
    ) -> Result<Vec<u8>, RenderError> {
        let source = self
            .template(template)
            .ok_or_else(|| RenderError::TemplateNotFound {
                template: template.to_string(),
            })?;
        render_str(template, source, vars).map(String::into_bytes)
    }
}

/// Render template source text
///
/// `id` is only used for error messages.
pub fn render_str(
    id: &str,
    source: &str,
    vars: &BTreeMap<String, Value>,
) -> Result<String, RenderError> {
    let mut out = String::with_capacity(source.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(source) {
        let (whole, path) = split_match(&caps);
        out.push_str(&source[last..whole.0]);

        let value = lookup(vars, path).ok_or_else(|| RenderError::UndefinedVariable {
            template: id.to_string(),
            variable: path.to_string(),
        })?;
        out.push_str(&format_value(value));

        last = whole.1;
    }

    out.push_str(&source[last..]);
    Ok(out)
}

fn split_match<'a>(caps: &Captures<'a>) -> ((usize, usize), &'a str) {
    let whole = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));
    let path = caps.get(1).map_or("", |m| m.as_str());
    (whole, path)
}

fn lookup<'v>(vars: &'v BTreeMap<String, Value>, path: &str) -> Option<&'v Value> {
    let mut segments = path.split('.');
    let mut current = vars.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
