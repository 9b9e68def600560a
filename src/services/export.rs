use crate::core::config::NotionConfig;
use crate::core::error::AppError;
use crate::core::model::RoadmapStep;
use log::info;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const NOTION_VERSION: &str = "2022-06-28";

fn rich_text(content: &str) -> Value {
    json!([{ "type": "text", "text": { "content": content } }])
}

fn block(kind: &str, content: &str) -> Value {
    json!({
        "object": "block",
        "type": kind,
        kind: { "rich_text": rich_text(content) }
    })
}

/// The page body: title, intro, then a heading and description per step.
pub fn build_blocks(skill: &str, steps: &[RoadmapStep]) -> Vec<Value> {
    let mut blocks = vec![
        block("heading_1", &format!("Learning Path for {}", skill.to_uppercase())),
        json!({ "object": "block", "type": "divider", "divider": {} }),
        block(
            "paragraph",
            &format!(
                "A comprehensive roadmap to help you learn {} from beginner to advanced level.",
                skill
            ),
        ),
        block("paragraph", ""),
    ];

    for (i, step) in steps.iter().enumerate() {
        blocks.push(block("heading_2", &format!("Step {}: {}", i + 1, step.title)));
        blocks.push(block("paragraph", &step.description));
        blocks.push(block("paragraph", ""));
    }
    blocks
}

#[derive(Debug)]
pub struct NotionExporter {
    api_key: String,
    database_id: String,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct PageResponse {
    url: String,
}

impl NotionExporter {
    pub fn new(cfg: &NotionConfig) -> Result<Self, AppError> {
        if cfg.api_key.trim().is_empty() {
            return Err(AppError::configuration("Notion API key is not configured"));
        }
        if cfg.database_id.trim().is_empty() {
            return Err(AppError::configuration("Notion database id is not configured"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key: cfg.api_key.clone(),
            database_id: cfg.database_id.clone(),
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Creates a page for the roadmap and returns its URL.
    pub async fn export(&self, skill: &str, steps: &[RoadmapStep]) -> Result<String, AppError> {
        let body = json!({
            "parent": { "database_id": self.database_id },
            "properties": {
                "title": {
                    "title": [{ "text": { "content": format!("Learning Path for {}", skill) } }]
                }
            },
            "children": build_blocks(skill, steps),
        });

        let resp = self
            .client
            .post(format!("{}/v1/pages", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Notion-Version", NOTION_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::from_reqwest("Notion", e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AppError::from_reqwest("Notion", e))?;
        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(AppError::upstream_status("Notion", status.as_u16(), message));
        }

        let page: PageResponse = serde_json::from_str(&text).map_err(|e| {
            AppError::parse(format!("Failed to parse Notion response: {}", e), &text)
        })?;
        info!("Exported roadmap for {} to {}", skill, page.url);
        Ok(page.url)
    }
}
