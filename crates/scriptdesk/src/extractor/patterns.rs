use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use super::{
    ParsedScript, ResourceKind, ResourceReference, Scene, ScriptExtractor, ScriptInfo,
    PARSE_FORMAT_VERSION,
};

static RE_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*Title:[ \t]*(.+)$").unwrap());
static RE_AUTHOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*Author:[ \t]*(.+)$").unwrap());
static RE_SCENE_HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*(?:Scene\b|INT\.|EXT\.)").unwrap());
static RE_CHARACTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]*([A-Z][A-Z ]*):").unwrap());
static RE_RESOURCE_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(IMAGE|IMG|PHOTO|SOUND|SFX|MUSIC|PROP|ITEM):([^\]]+)\]").unwrap()
});

/// Line-oriented regex heuristics for screenplay text.
///
/// - scene headings start with `Scene`, `INT.` or `EXT.`
/// - dialogue lines start with an upper-case name and a colon
/// - inline tags look like `[PROP:mask]`
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternExtractor;

impl PatternExtractor {
    pub fn new() -> Self {
        Self
    }

    fn extract_info(&self, text: &str) -> ScriptInfo {
        let title = first_capture(&RE_TITLE, text)
            .or_else(|| {
                text.lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_default();

        ScriptInfo {
            title,
            author: first_capture(&RE_AUTHOR, text),
            version: PARSE_FORMAT_VERSION.to_string(),
        }
    }

    fn extract_scenes(&self, text: &str) -> Vec<Scene> {
        let starts: Vec<usize> = RE_SCENE_HEADING.find_iter(text).map(|m| m.start()).collect();

        starts
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = starts.get(i + 1).copied().unwrap_or(text.len());
                let content = &text[start..end];
                let name = content.lines().next().unwrap_or_default().trim().to_string();
                Scene {
                    number: (i + 1) as u32,
                    name,
                    content: content.to_string(),
                }
            })
            .collect()
    }

    fn extract_characters(&self, text: &str) -> BTreeSet<String> {
        RE_CHARACTER
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    }

    fn extract_resources(&self, text: &str) -> Vec<ResourceReference> {
        let mut counters: HashMap<ResourceKind, usize> = HashMap::new();
        let mut resources = Vec::new();

        for caps in RE_RESOURCE_TAG.captures_iter(text) {
            let (Some(tag), Some(keyword), Some(value)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            let Some(kind) = ResourceKind::from_keyword(keyword.as_str()) else {
                continue;
            };
            // Blank values still count: every tag is one reference.
            let name = value.as_str().trim();

            let counter = counters.entry(kind).or_insert(0);
            *counter += 1;
            resources.push(ResourceReference {
                id: format!("{}_{}", kind, counter),
                kind,
                name: name.to_string(),
                reference: tag.as_str().to_string(),
            });
        }

        resources
    }
}

impl ScriptExtractor for PatternExtractor {
    fn extract(&self, text: &str) -> ParsedScript {
        ParsedScript {
            metadata: self.extract_info(text),
            scenes: self.extract_scenes(text),
            characters: self.extract_characters(text),
            resources: self.extract_resources(text),
            parsed_at: Utc::now(),
        }
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}
