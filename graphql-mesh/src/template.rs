//! `{dotted.path}` string interpolation, used by invalidation rules and declarative resolvers.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::json_ext::Value;
use crate::json_ext::ValueExt;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([^{}]*)\}").expect("placeholder pattern is a valid regex")
});

/// A template failed to compile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, displaydoc::Display)]
pub(crate) enum TemplateError {
    /// template '{0}' has unbalanced braces
    Unbalanced(String),
    /// template '{0}' has an empty placeholder
    EmptyPlaceholder(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Renders the template. Missing values render as the empty string.
    pub(crate) fn render(&self, data: &Value) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.clone(),
                Segment::Placeholder(path) => data
                    .get_dotted(path)
                    .map(ValueExt::to_template_string)
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// Like [`Template::render`], but a template made of a single placeholder yields the
    /// referenced value as is instead of its text.
    pub(crate) fn render_value(&self, data: &Value) -> Value {
        match self.segments.as_slice() {
            [Segment::Placeholder(path)] => data.get_dotted(path).cloned().unwrap_or(Value::Null),
            _ => Value::from(self.render(data)),
        }
    }
}

impl FromStr for Template {
    type Err = TemplateError;

    fn from_str(source: &str) -> Result<Self, Self::Err> {
        let mut segments = Vec::new();
        let mut last = 0;
        for captures in PLACEHOLDER.captures_iter(source) {
            let (Some(whole), Some(path)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            push_literal(&mut segments, &source[last..whole.start()], source)?;
            let path = path.as_str().trim();
            if path.is_empty() {
                return Err(TemplateError::EmptyPlaceholder(source.to_string()));
            }
            segments.push(Segment::Placeholder(path.to_string()));
            last = whole.end();
        }
        push_literal(&mut segments, &source[last..], source)?;
        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }
}

fn push_literal(
    segments: &mut Vec<Segment>,
    text: &str,
    source: &str,
) -> Result<(), TemplateError> {
    if text.contains(['{', '}']) {
        return Err(TemplateError::Unbalanced(source.to_string()));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.source.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn renders_placeholders() {
        let template: Template = "Book:{result.id}-{args.lang}".parse().unwrap();
        let data = json!({"result": {"id": 7}, "args": {"lang": "en"}});
        assert_eq!(template.render(&data), "Book:7-en");
    }

    #[test]
    fn missing_values_render_empty() {
        let template: Template = "id:{args.id}".parse().unwrap();
        assert_eq!(template.render(&json!({"args": {}})), "id:");
    }

    #[test]
    fn single_placeholder_keeps_the_value() {
        let template: Template = "{root.ids}".parse().unwrap();
        let data = json!({"root": {"ids": ["a", "b"]}});
        assert_eq!(template.render_value(&data), json!(["a", "b"]));

        let template: Template = "id-{root.id}".parse().unwrap();
        assert_eq!(
            template.render_value(&json!({"root": {"id": 1}})),
            json!("id-1")
        );
    }

    #[test]
    fn rejects_malformed_templates() {
        assert_eq!(
            "id:{args.id".parse::<Template>(),
            Err(TemplateError::Unbalanced("id:{args.id".into()))
        );
        assert_eq!(
            "id:args.id}".parse::<Template>(),
            Err(TemplateError::Unbalanced("id:args.id}".into()))
        );
        assert_eq!(
            "id:{ }".parse::<Template>(),
            Err(TemplateError::EmptyPlaceholder("id:{ }".into()))
        );
    }
}
