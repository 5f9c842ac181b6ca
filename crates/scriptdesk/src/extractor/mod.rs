//! Structural extraction of screenplay text.
//!
//! The orchestrator depends only on [`ScriptExtractor`]; [`PatternExtractor`]
//! is the line-oriented regex heuristic used today.

pub mod patterns;

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParsingError;

pub use patterns::PatternExtractor;

pub const PARSE_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedScript {
    pub metadata: ScriptInfo,
    pub scenes: Vec<Scene>,
    pub characters: BTreeSet<String>,
    pub resources: Vec<ResourceReference>,
    pub parsed_at: DateTime<Utc>,
}

impl ParsedScript {
    pub fn total_scenes(&self) -> usize {
        self.scenes.len()
    }

    pub fn total_characters(&self) -> usize {
        self.characters.len()
    }

    pub fn total_resources(&self) -> usize {
        self.resources.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptInfo {
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scene {
    /// 1-based position in document order.
    pub number: u32,
    /// The heading line, trimmed.
    pub name: String,
    /// Verbatim text from the heading up to the next heading.
    pub content: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Image,
    Sound,
    Prop,
}

impl ResourceKind {
    /// Maps an inline tag keyword to its category.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "IMAGE" | "IMG" | "PHOTO" => Some(ResourceKind::Image),
            "SOUND" | "SFX" | "MUSIC" => Some(ResourceKind::Sound),
            "PROP" | "ITEM" => Some(ResourceKind::Prop),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Image => "image",
            ResourceKind::Sound => "sound",
            ResourceKind::Prop => "prop",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inline `[KEYWORD:value]` tag found in the text. Not yet a persisted resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceReference {
    /// `{type}_{n}`, numbered per category.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub name: String,
    /// The tag exactly as written.
    pub reference: String,
}

pub trait ScriptExtractor: Send + Sync {
    /// Extracts structure from raw text. Never fails: no matches means empty collections.
    fn extract(&self, text: &str) -> ParsedScript;

    fn extract_file(&self, path: &Path) -> Result<ParsedScript, ParsingError> {
        let text = read_script_text(path)?;
        Ok(self.extract(&text))
    }
}

/// Reads a script file that must be UTF-8 text.
pub fn read_script_text(path: &Path) -> Result<String, ParsingError> {
    let bytes = std::fs::read(path).map_err(|e| ParsingError::ReadScript {
        path: path.to_path_buf(),
        source: e,
    })?;
    String::from_utf8(bytes).map_err(|_| ParsingError::NotText {
        path: path.to_path_buf(),
    })
}
