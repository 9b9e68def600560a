use crate::core::config::GenerationConfig;
use crate::core::error::AppError;
use crate::core::model::{RoadmapStep, Task};
use crate::services::llm::{LlmClient, ResponseFormat};
use crate::services::normalize::{
    normalize, parse_roadmap, parse_tasks, NormalizerStats, StatsSnapshot,
};
use crate::services::prompt::{roadmap_prompt, tasks_prompt, validate_field};
use crate::services::search::ResourceAugmenter;
use log::info;
use serde_json::Value;
use std::sync::Arc;

/// Runs one generation request end to end: validate, prompt, complete, normalize, augment.
///
/// Either the whole roadmap or task list comes back, or an error. Nothing partial.
#[derive(Debug)]
pub struct RoadmapService {
    llm: Arc<dyn LlmClient>,
    augmenter: ResourceAugmenter,
    settings: GenerationConfig,
    stats: NormalizerStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepTasks {
    pub step_index: u32,
    pub step_title: String,
    pub tasks: Vec<Task>,
}

impl RoadmapService {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        augmenter: ResourceAugmenter,
        settings: GenerationConfig,
    ) -> Self {
        Self {
            llm,
            augmenter,
            settings,
            stats: NormalizerStats::default(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Extracts the `field` array and applies the typed schema. The outcome is counted
    /// once: output that extracts but fails the schema counts as failed.
    fn read_output<T>(
        &self,
        raw: &str,
        field: &str,
        schema: impl FnOnce(Vec<Value>) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let ratio = self.settings.malformed_warn_ratio;
        let outcome = normalize(raw, field)
            .and_then(|(items, how)| schema(items).map(|value| (value, how)));
        match outcome {
            Ok((value, how)) => {
                self.stats.record(Some(how), ratio);
                Ok(value)
            }
            Err(e) => {
                self.stats.record(None, ratio);
                Err(e)
            }
        }
    }

    pub async fn generate_roadmap(
        &self,
        skill: Option<&str>,
    ) -> Result<Vec<RoadmapStep>, AppError> {
        let skill = validate_field("Skill", skill)?;
        info!("Generating roadmap for {}", skill);

        let prompt = roadmap_prompt(&skill, self.settings.roadmap_steps);
        let raw = self.llm.chat(&prompt, ResponseFormat::Text).await?;

        self.read_output(&raw, "roadmap", |items| {
            parse_roadmap(items, self.settings.roadmap_steps, &raw)
        })
    }

    pub async fn generate_tasks(
        &self,
        skill: Option<&str>,
        step_title: Option<&str>,
        step_index: Option<u32>,
    ) -> Result<StepTasks, AppError> {
        let skill = validate_field("Skill", skill)?;
        let step_title = validate_field("Step title", step_title)?;
        let step_index =
            step_index.ok_or_else(|| AppError::validation("Step index is required"))?;
        info!("Generating tasks for {} step {} ({})", skill, step_index, step_title);

        let prompt = tasks_prompt(&skill, &step_title, self.settings.tasks_per_step);
        let raw = self.llm.chat(&prompt, ResponseFormat::JsonObject).await?;

        let tasks = self.read_output(&raw, "tasks", |items| parse_tasks(items, &raw))?;
        let tasks = self.augmenter.augment_all(tasks, &skill, &step_title).await;

        Ok(StepTasks {
            step_index,
            step_title,
            tasks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SearchConfig;
    use crate::services::prompt::Prompt;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns a fixed answer and remembers every prompt it saw.
    #[derive(Debug)]
    struct MockLlmClient {
        answer: String,
        calls: Arc<Mutex<Vec<(Prompt, ResponseFormat)>>>,
    }

    impl MockLlmClient {
        fn new(answer: impl Into<String>) -> Self {
            Self {
                answer: answer.into(),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn chat(&self, prompt: &Prompt, format: ResponseFormat) -> Result<String, AppError> {
            self.calls.lock().unwrap().push((prompt.clone(), format));
            Ok(self.answer.clone())
        }
    }

    #[derive(Debug)]
    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn chat(&self, _: &Prompt, _: ResponseFormat) -> Result<String, AppError> {
            Err(AppError::upstream_status("OpenAI", 503, "The server is overloaded"))
        }
    }

    fn roadmap_json(n: usize) -> String {
        let steps: Vec<_> = (0..n)
            .map(|i| {
                serde_json::json!({
                    "title": format!("Step {}", i + 1),
                    "description": format!("Learn part {}", i + 1),
                })
            })
            .collect();
        serde_json::to_string(&steps).unwrap()
    }

    fn service(llm: Arc<dyn LlmClient>) -> RoadmapService {
        RoadmapService::new(
            llm,
            ResourceAugmenter::new(None, &SearchConfig::default()),
            GenerationConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_roadmap_has_ten_steps() {
        let llm = Arc::new(MockLlmClient::new(roadmap_json(10)));
        let calls = llm.calls.clone();
        let svc = service(llm);

        let steps = svc.generate_roadmap(Some("  Rust ")).await.unwrap();

        assert_eq!(steps.len(), 10);
        assert!(steps.iter().all(|s| !s.title.is_empty() && !s.description.is_empty()));
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.user.contains("learning roadmap for Rust."));
        assert_eq!(calls[0].1, ResponseFormat::Text);
    }

    #[tokio::test]
    async fn test_roadmap_from_prose_is_extracted() {
        let answer = format!("Sure! Here is the roadmap:\n{}\nGood luck!", roadmap_json(10));
        let svc = service(Arc::new(MockLlmClient::new(answer)));

        let steps = svc.generate_roadmap(Some("Go")).await.unwrap();
        assert_eq!(steps[9].title, "Step 10");
        assert_eq!(svc.stats().tolerant, 1);
    }

    #[tokio::test]
    async fn test_empty_skill_never_calls_the_model() {
        let llm = Arc::new(MockLlmClient::new(roadmap_json(10)));
        let calls = llm.calls.clone();
        let svc = service(llm);

        for skill in [None, Some(""), Some("   ")] {
            let err = svc.generate_roadmap(skill).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_short_roadmap_is_not_returned_partially() {
        let svc = service(Arc::new(MockLlmClient::new(roadmap_json(7))));
        let err = svc.generate_roadmap(Some("Rust")).await.unwrap_err();
        assert!(matches!(err, AppError::Parse { .. }));
        assert_eq!(
            svc.stats(),
            StatsSnapshot { strict: 0, tolerant: 0, failed: 1 }
        );
    }

    #[tokio::test]
    async fn test_tasks_failing_schema_count_as_failed() {
        let answer = r#"{"tasks":[{"task":"Read the book","estimatedTime":"a while"}]}"#;
        let svc = service(Arc::new(MockLlmClient::new(answer)));

        let err = svc
            .generate_tasks(Some("Rust"), Some("Basics"), Some(0))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Parse { .. }));
        assert_eq!(svc.stats().strict, 0);
        assert_eq!(svc.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_garbage_output_is_a_parse_error() {
        let svc = service(Arc::new(MockLlmClient::new("I cannot help with that.")));
        let err = svc.generate_roadmap(Some("Rust")).await.unwrap_err();
        assert!(matches!(err, AppError::Parse { .. }));
        assert_eq!(svc.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_upstream_error_propagates() {
        let svc = service(Arc::new(FailingLlm));
        let err = svc.generate_roadmap(Some("Rust")).await.unwrap_err();
        assert!(err.public_message().contains("The server is overloaded"));
    }

    #[tokio::test]
    async fn test_tasks_are_generated_and_augmented() {
        let answer = r#"{"tasks":[
            {"task":"Install the toolchain","estimatedTime":15,"resources":["https://rustup.rs"]},
            {"task":"Write hello world","estimatedTime":"20 minutes"}
        ]}"#;
        let llm = Arc::new(MockLlmClient::new(answer));
        let calls = llm.calls.clone();
        let svc = service(llm);

        let out = svc
            .generate_tasks(Some("Rust"), Some("Setup"), Some(0))
            .await
            .unwrap();

        assert_eq!(out.step_index, 0);
        assert_eq!(out.step_title, "Setup");
        assert_eq!(out.tasks.len(), 2);
        assert!(out.tasks.iter().all(|t| t.resources.len() == 1));
        assert!(out.tasks[1].resources[0]
            .url
            .contains("Rust%20Setup%20Write%20hello%20world%20tutorial"));
        assert_eq!(calls.lock().unwrap()[0].1, ResponseFormat::JsonObject);
        assert_eq!(svc.stats().strict, 1);
    }

    #[tokio::test]
    async fn test_tasks_validation() {
        let llm = Arc::new(MockLlmClient::new("{}"));
        let calls = llm.calls.clone();
        let svc = service(llm);

        assert!(svc.generate_tasks(Some("Rust"), Some(" "), Some(0)).await.is_err());
        assert!(svc.generate_tasks(Some("Rust"), Some("Setup"), None).await.is_err());
        assert!(svc.generate_tasks(None, Some("Setup"), Some(0)).await.is_err());
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tasks_are_deterministic_for_a_fixed_model() {
        let answer = r#"{"tasks":[{"task":"Read chapter 4","estimatedTime":30,"resources":[]}]}"#;
        let svc = service(Arc::new(MockLlmClient::new(answer)));

        let first = svc.generate_tasks(Some("Rust"), Some("Ownership"), Some(3)).await.unwrap();
        let second = svc.generate_tasks(Some("Rust"), Some("Ownership"), Some(3)).await.unwrap();

        assert_eq!(
            serde_json::to_vec(&first.tasks).unwrap(),
            serde_json::to_vec(&second.tasks).unwrap()
        );
    }
}
