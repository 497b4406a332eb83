//! Path pattern parsing.
//!
//! A pattern such as `/api/user/:id` is split on `/` into segments. A segment
//! starting with `:` is a named parameter that matches exactly one non-empty
//! path segment; every other segment must match literally. A trailing `/`
//! becomes a final empty literal segment, so `/foo` and `/foo/` are distinct.

use crate::errors::RouteError;
use std::fmt;

const PARAM_MARKER: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Param(String),
}

impl Segment {
    pub fn is_param(&self) -> bool {
        matches!(self, Segment::Param(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathPattern {
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        let invalid = |reason: &str| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        if !pattern.starts_with('/') {
            return Err(invalid("pattern must start with '/'"));
        }
        if pattern.contains('?') || pattern.contains('#') {
            return Err(invalid("pattern must not contain a query or fragment"));
        }

        let mut segments = Vec::new();
        let mut seen_params: Vec<&str> = Vec::new();

        for raw in split_path(pattern) {
            match raw.strip_prefix(PARAM_MARKER) {
                Some(name) => {
                    if name.is_empty() {
                        return Err(invalid("parameter segment needs a name"));
                    }
                    if seen_params.contains(&name) {
                        return Err(invalid("parameter name used twice"));
                    }
                    seen_params.push(name);
                    segments.push(Segment::Param(name.to_string()));
                }
                None => segments.push(Segment::Literal(raw.to_string())),
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn param_count(&self) -> usize {
        self.segments.iter().filter(|s| s.is_param()).count()
    }

    pub fn has_trailing_slash(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Literal(s)) if s.is_empty())
    }

    /// The same pattern with the trailing slash toggled. `/` has no alternate.
    pub fn trailing_slash_variant(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        let mut segments = self.segments.clone();
        if self.has_trailing_slash() {
            segments.pop();
            if segments.is_empty() {
                return None;
            }
        } else {
            segments.push(Segment::Literal(String::new()));
        }
        Some(Self { segments })
    }

    /// Same shape: literal segments equal and parameters in the same slots,
    /// regardless of parameter names.
    pub fn same_shape(&self, other: &Self) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    (Segment::Param(_), Segment::Param(_)) => true,
                    _ => false,
                })
    }

    /// Whether some concrete path is matched by both patterns.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.segments.len() == other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|pair| match pair {
                    (Segment::Literal(a), Segment::Literal(b)) => a == b,
                    (Segment::Param(_), Segment::Literal(l))
                    | (Segment::Literal(l), Segment::Param(_)) => !l.is_empty(),
                    (Segment::Param(_), Segment::Param(_)) => true,
                })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => write!(f, "/{s}")?,
                Segment::Param(name) => write!(f, "/{PARAM_MARKER}{name}")?,
            }
        }
        Ok(())
    }
}

/// Split a request path (or pattern) into segments. `/` yields no segments.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let body = if trimmed.is_empty() { None } else { Some(trimmed) };
    body.into_iter().flat_map(|b| b.split('/'))
}

/// Join a group prefix with a route or child-group suffix.
///
/// The suffix may be empty (the prefix itself), start with `/`, or be bare
/// (`"search"`); a trailing `/` on the suffix is preserved.
pub fn join_paths(prefix: &str, suffix: &str) -> String {
    let base = prefix.trim_end_matches('/');
    let base = if base.starts_with('/') || base.is_empty() {
        base.to_string()
    } else {
        format!("/{base}")
    };

    if suffix.is_empty() {
        return if base.is_empty() { "/".to_string() } else { base };
    }

    format!("{base}/{}", suffix.trim_start_matches('/'))
}
