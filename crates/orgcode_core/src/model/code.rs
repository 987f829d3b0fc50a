//! Hierarchy code value type.
//!
//! # Responsibility
//! - Parse and validate segmented org codes.
//! - Provide the segment arithmetic used by code generation and subtree moves.
//!
//! # Invariants
//! - A code is one or more 4-digit decimal segments; segment count is depth.
//! - Lexicographic order equals numeric order for codes of equal depth.
//! - A child segment never exceeds `MAX_SEGMENT`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Width of one hierarchy level in characters.
pub const SEGMENT_WIDTH: usize = 4;
/// Largest sibling index representable in one segment.
pub const MAX_SEGMENT: u32 = 9999;

static CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[0-9]{4})+$").expect("valid org code regex"));

/// Errors from code parsing and segment arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeError {
    /// Value is empty, not digits, or not a multiple of the segment width.
    Malformed(String),
    /// Sibling index space under one parent is exhausted.
    CapacityExceeded {
        /// Parent code, `None` for the top level.
        parent: Option<String>,
    },
}

impl Display for CodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(value) => write!(f, "malformed org code `{value}`"),
            Self::CapacityExceeded { parent: Some(parent) } => write!(
                f,
                "sibling capacity of {MAX_SEGMENT} exhausted under code {parent}"
            ),
            Self::CapacityExceeded { parent: None } => {
                write!(f, "sibling capacity of {MAX_SEGMENT} exhausted at top level")
            }
        }
    }
}

impl Error for CodeError {}

/// Segmented hierarchy code, e.g. `"00010002"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrgCode(String);

impl OrgCode {
    /// Parses and validates a persisted or caller-provided code.
    pub fn parse(value: impl Into<String>) -> Result<Self, CodeError> {
        let value = value.into();
        if !CODE_RE.is_match(&value) {
            return Err(CodeError::Malformed(value));
        }
        Ok(Self(value))
    }

    /// Code of the first child created under `parent` (`None` = top level).
    pub fn first_child_of(parent: Option<&OrgCode>) -> Self {
        let mut value = parent.map(|code| code.0.clone()).unwrap_or_default();
        value.push_str(&format_segment(1));
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of segments (root = 1).
    pub fn depth(&self) -> usize {
        self.0.len() / SEGMENT_WIDTH
    }

    /// Numeric value of the deepest segment.
    pub fn last_segment(&self) -> u32 {
        let start = self.0.len() - SEGMENT_WIDTH;
        // Validated as ASCII digits on construction.
        self.0[start..].parse().unwrap_or(0)
    }

    /// Code with the deepest segment stripped; `None` for top-level codes.
    pub fn parent(&self) -> Option<OrgCode> {
        if self.depth() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - SEGMENT_WIDTH].to_string()))
    }

    /// Next code after this one under the same parent.
    pub fn next_sibling(&self) -> Result<OrgCode, CodeError> {
        let next = self.last_segment() + 1;
        if next > MAX_SEGMENT {
            return Err(CodeError::CapacityExceeded {
                parent: self.parent().map(|code| code.0),
            });
        }
        let stem = &self.0[..self.0.len() - SEGMENT_WIDTH];
        Ok(Self(format!("{stem}{}", format_segment(next))))
    }

    /// Whether this code equals `prefix` or lies in its subtree.
    pub fn is_within(&self, prefix: &OrgCode) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl Display for OrgCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for OrgCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OrgCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<OrgCode> for String {
    fn from(value: OrgCode) -> Self {
        value.0
    }
}

fn format_segment(index: u32) -> String {
    format!("{index:0width$}", width = SEGMENT_WIDTH)
}
