use serde::{Deserialize, Serialize};

/// One entry of a skill roadmap. Identified by its position in the roadmap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoadmapStep {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task: String,
    /// Minutes.
    pub estimated_time: u32,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

/// A link that helps with a task. Model output may give a bare URL; those keep `title = None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Resource {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: Some(title.into()),
        }
    }
}
