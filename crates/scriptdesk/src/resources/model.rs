//! Resource lifecycle enums.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Preparation state of a production resource.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    #[default]
    Pending,
    Confirmed,
    InPreparation,
    Ready,
    Completed,
}

impl ResourceStatus {
    pub const ALL: [ResourceStatus; 5] = [
        ResourceStatus::Pending,
        ResourceStatus::Confirmed,
        ResourceStatus::InPreparation,
        ResourceStatus::Ready,
        ResourceStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Confirmed => "confirmed",
            ResourceStatus::InPreparation => "in_preparation",
            ResourceStatus::Ready => "ready",
            ResourceStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownValue {
                kind: "resource status",
                value: s.to_string(),
            })
    }
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourcePriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl ResourcePriority {
    pub const ALL: [ResourcePriority; 4] = [
        ResourcePriority::Low,
        ResourcePriority::Medium,
        ResourcePriority::High,
        ResourcePriority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourcePriority::Low => "low",
            ResourcePriority::Medium => "medium",
            ResourcePriority::High => "high",
            ResourcePriority::Urgent => "urgent",
        }
    }
}

impl std::fmt::Display for ResourcePriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourcePriority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourcePriority::ALL
            .into_iter()
            .find(|priority| priority.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownValue {
                kind: "resource priority",
                value: s.to_string(),
            })
    }
}
