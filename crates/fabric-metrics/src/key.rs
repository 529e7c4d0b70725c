//! Metric identity keys.
//!
//! A [`MetricKey`] is an ordered list of `(name, value)` tag pairs. Its joined
//! string form is what observers index by, so two producers that build the
//! same pairs in the same order always land on the same aggregate.
//!
//! Joining escapes every name and value before concatenating them with
//! [`KEY_SEPARATOR`], which keeps the mapping injective:
//!
//! ```
//! use fabric_metrics::key::MetricKey;
//!
//! let a = MetricKey::from_pairs([("service", "a-b")]);
//! let b = MetricKey::from_pairs([("service-a", "b")]);
//! assert_ne!(a.join(), b.join());
//! ```

use serde::{Serialize, Serializer};
use smallvec::SmallVec;
use std::fmt;

use crate::error::{MetricError, Result};

/// Separator placed between every name and value of a joined key.
pub const KEY_SEPARATOR: char = '/';

/// Escape character protecting separators that occur inside names or values.
pub const KEY_ESCAPE: char = '\\';

/// Separator used by [`join_tag`] for auxiliary label strings.
pub const TAG_SEPARATOR: char = ':';

/// Segment name carrying the metric's own name (e.g. `rpc.requests`).
pub const NAME_SEGMENT: &str = "name";

/// One name/value segment of a metric key or an auxiliary label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Tag {
    /// Tag name (e.g. `service`).
    pub name: String,
    /// Tag value (e.g. `billing`).
    pub value: String,
}

impl Tag {
    /// Create a tag from anything string-like.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered identity of a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MetricKey {
    segments: SmallVec<[Tag; 4]>,
}

impl MetricKey {
    /// An empty key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a key from `(name, value)` pairs, keeping their order.
    pub fn from_pairs<I, N, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            segments: pairs
                .into_iter()
                .map(|(name, value)| Tag::new(name, value))
                .collect(),
        }
    }

    /// Append a segment, builder style.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    /// Append a segment.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.segments.push(Tag::new(name, value));
    }

    /// Segments in order.
    pub fn segments(&self) -> &[Tag] {
        &self.segments
    }

    /// Value of the first segment named `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }

    /// Value of the [`NAME_SEGMENT`], if any.
    pub fn metric_name(&self) -> Option<&str> {
        self.get(NAME_SEGMENT)
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// `true` when the key has no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Join the key into its canonical escaped string.
    pub fn join(&self) -> String {
        let mut out = String::with_capacity(
            self.segments
                .iter()
                .map(|t| t.name.len() + t.value.len() + 2)
                .sum(),
        );
        for (i, tag) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push(KEY_SEPARATOR);
            }
            escape_into(&mut out, &tag.name);
            out.push(KEY_SEPARATOR);
            escape_into(&mut out, &tag.value);
        }
        out
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join())
    }
}

impl Serialize for MetricKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.join())
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for MetricKey {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}

fn escape_into(out: &mut String, raw: &str) {
    for c in raw.chars() {
        if c == KEY_SEPARATOR || c == KEY_ESCAPE {
            out.push(KEY_ESCAPE);
        }
        out.push(c);
    }
}

/// Parse a joined key back into its segments.
///
/// Inverse of [`MetricKey::join`]. The empty string is the empty key.
pub fn split_key(joined: &str) -> Result<MetricKey> {
    if joined.is_empty() {
        return Ok(MetricKey::new());
    }

    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut chars = joined.chars();
    while let Some(c) = chars.next() {
        match c {
            KEY_ESCAPE => match chars.next() {
                Some(next) if next == KEY_SEPARATOR || next == KEY_ESCAPE => current.push(next),
                _ => return Err(MetricError::MalformedKey(joined.to_string())),
            },
            KEY_SEPARATOR => parts.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    parts.push(current);

    if parts.len() % 2 != 0 {
        return Err(MetricError::MalformedKey(joined.to_string()));
    }

    let mut key = MetricKey::new();
    let mut iter = parts.into_iter();
    while let (Some(name), Some(value)) = (iter.next(), iter.next()) {
        key.push(name, value);
    }
    Ok(key)
}

/// Render an auxiliary label as `name:value`.
pub fn join_tag(name: &str, value: &str) -> String {
    let mut out = String::with_capacity(name.len() + value.len() + 1);
    out.push_str(name);
    out.push(TAG_SEPARATOR);
    out.push_str(value);
    out
}

/// Split a `name:value` label at its first separator.
///
/// Labels without a separator become a tag with an empty value.
pub fn split_tag(tag: &str) -> Tag {
    match tag.split_once(TAG_SEPARATOR) {
        Some((name, value)) => Tag::new(name, value),
        None => Tag::new(tag, ""),
    }
}
