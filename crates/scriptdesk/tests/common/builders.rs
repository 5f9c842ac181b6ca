//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use std::path::Path;

use serde_json::{json, Map, Value};

use scriptdesk::config::{RetrySettings, Settings, StorageSettings, UploadSettings};

/// Builder for `Settings` with fast retries and a given storage root.
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new(root: &Path) -> Self {
        Self {
            settings: Settings {
                storage: StorageSettings {
                    root: root.to_string_lossy().into_owned(),
                    database: "scriptdesk.db".to_string(),
                },
                retry: RetrySettings {
                    max_attempts: 3,
                    base_delay_ms: 1,
                    multiplier: 1.0,
                    max_delay_ms: 2,
                },
                ..Settings::default()
            },
        }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.settings.retry.max_attempts = attempts;
        self
    }

    pub fn allowed_extensions(mut self, extensions: &[&str]) -> Self {
        self.settings.upload = UploadSettings {
            allowed_extensions: extensions.iter().map(|e| e.to_string()).collect(),
            ..self.settings.upload
        };
        self
    }

    pub fn max_upload_bytes(mut self, limit: u64) -> Self {
        self.settings.upload.max_upload_bytes = limit;
        self
    }

    pub fn build(self) -> Settings {
        self.settings
    }
}

/// Builder for the resource analysis document the synthesizer reads.
#[derive(Default)]
pub struct ResourceAnalysisBuilder {
    by_type: Map<String, Value>,
    distribution: Map<String, Value>,
}

impl ResourceAnalysisBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(mut self, kind: &str, name: &str) -> Self {
        let names = self
            .by_type
            .entry(kind.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(names) = names {
            names.push(Value::String(name.to_string()));
        }
        self
    }

    pub fn first_appearance(mut self, name: &str, scene: u32) -> Self {
        self.distribution
            .insert(name.to_string(), json!({ "first_appearance": scene }));
        self
    }

    pub fn build(self) -> Value {
        json!({
            "resources_by_type": self.by_type,
            "scene_distribution": self.distribution,
        })
    }
}

/// Resource analysis matching the `HEIST` script.
pub fn heist_resources() -> Value {
    ResourceAnalysisBuilder::new()
        .resource("prop", "mask")
        .resource("prop", "getaway car")
        .resource("sound", "alarm")
        .first_appearance("mask", 1)
        .first_appearance("alarm", 1)
        .first_appearance("getaway car", 2)
        .build()
}

pub fn heist_characters() -> Value {
    json!({
        "characters": {
            "JOHN": {"lines": 2, "role": "lead"},
            "MARY": {"lines": 1, "role": "supporting"}
        }
    })
}

pub fn heist_scenes() -> Value {
    json!({
        "scenes": [
            {"number": 1, "location": "BANK", "time": "DAY"},
            {"number": 2, "location": "STREET", "time": "NIGHT"}
        ]
    })
}
