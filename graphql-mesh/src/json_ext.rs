//! Performance oriented JSON manipulation.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map;
pub use serde_json_bytes::Value;

/// A JSON object.
pub type Object = Map<ByteString, Value>;

/// An element of a [`Path`].
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// An index into a list.
    Index(usize),
    /// A response key of an object.
    Key(String),
}

/// A path into a GraphQL response, as found in [`crate::graphql::Error::path`].
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathElement> {
        self.0.iter()
    }

    /// Returns a new path with `key` appended.
    pub fn join_key(&self, key: impl Into<String>) -> Self {
        let mut elements = self.0.clone();
        elements.push(PathElement::Key(key.into()));
        Self(elements)
    }

    /// Returns a new path with `index` appended.
    pub fn join_index(&self, index: usize) -> Self {
        let mut elements = self.0.clone();
        elements.push(PathElement::Index(index));
        Self(elements)
    }

    /// The first key of the path, if it starts with a key.
    pub fn first_key(&self) -> Option<&str> {
        match self.0.first() {
            Some(PathElement::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// The path as a JSON array, as it is exposed to templates and events.
    pub fn to_value(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|element| match element {
                    PathElement::Index(index) => Value::from(*index as u64),
                    PathElement::Key(key) => Value::from(key.as_str()),
                })
                .collect(),
        )
    }
}

impl From<Vec<PathElement>> for Path {
    fn from(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Key(key) => write!(f, "{key}")?,
            }
        }
        Ok(())
    }
}

pub(crate) trait ValueExt {
    /// Follows a dotted path (`a.b.0.c`) through objects and arrays.
    fn get_dotted(&self, path: &str) -> Option<&Value>;

    /// Renders the value the way it is interpolated into text: strings without quotes,
    /// null as the empty string and everything else as JSON.
    fn to_template_string(&self) -> String;
}

impl ValueExt for Value {
    fn get_dotted(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(self, |current, segment| match current {
                Value::Object(object) => object.get(segment),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index)),
                _ => None,
            })
    }

    fn to_template_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.as_str().to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}
