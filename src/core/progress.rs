//! Browser-side cache of generated roadmaps, task lists and completion flags.
//!
//! Everything lives in a flat [`Storage`] under keys derived from the skill name:
//!
//! - `{skill}_roadmap`
//! - `{skill}_completed_steps`
//! - `{skill}_step_{i}_title`
//! - `{skill}_step_{i}_tasks`
//! - `{skill}_step_{i}_completed_tasks`
//!
//! The skill segment is percent-encoded with `_` escaped as well, so no skill name can
//! produce a key that belongs to another skill. Values are wrapped in a versioned
//! envelope; anything that does not match [`SCHEMA_VERSION`] reads as a cache miss.

use crate::core::io::Storage;
use crate::core::model::{RoadmapStep, Task};
use anyhow::{bail, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Roadmap,
    CompletedSteps,
    StepTitle(usize),
    Tasks(usize),
    CompletedTasks(usize),
}

pub fn skill_prefix(skill: &str) -> String {
    format!("{}_", urlencoding::encode(skill).replace('_', "%5F"))
}

pub fn storage_key(skill: &str, purpose: Purpose) -> String {
    let prefix = skill_prefix(skill);
    match purpose {
        Purpose::Roadmap => format!("{}roadmap", prefix),
        Purpose::CompletedSteps => format!("{}completed_steps", prefix),
        Purpose::StepTitle(i) => format!("{}step_{}_title", prefix, i),
        Purpose::Tasks(i) => format!("{}step_{}_tasks", prefix, i),
        Purpose::CompletedTasks(i) => format!("{}step_{}_completed_tasks", prefix, i),
    }
}

#[derive(Clone)]
pub struct ProgressStore {
    storage: Arc<dyn Storage>,
}

impl ProgressStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(content) = self.storage.read(key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<Envelope<T>>(&content) {
            Ok(env) if env.version == SCHEMA_VERSION => Ok(Some(env.data)),
            Ok(env) => {
                log::warn!(
                    "Ignoring cached {} with schema version {} (expected {})",
                    key,
                    env.version,
                    SCHEMA_VERSION
                );
                Ok(None)
            }
            Err(e) => {
                log::warn!("Ignoring unreadable cached {}: {}", key, e);
                Ok(None)
            }
        }
    }

    async fn put<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        let content = serde_json::to_string(&Envelope {
            version: SCHEMA_VERSION,
            data,
        })?;
        self.storage.write(key, &content).await
    }

    pub async fn roadmap(&self, skill: &str) -> Result<Option<Vec<RoadmapStep>>> {
        self.get(&storage_key(skill, Purpose::Roadmap)).await
    }

    /// Caches a freshly generated roadmap and the step titles the task pages need.
    pub async fn save_roadmap(&self, skill: &str, steps: &[RoadmapStep]) -> Result<()> {
        self.put(&storage_key(skill, Purpose::Roadmap), &steps).await?;
        for (i, step) in steps.iter().enumerate() {
            self.save_step_title(skill, i, &step.title).await?;
        }
        Ok(())
    }

    pub async fn step_title(&self, skill: &str, step_index: usize) -> Result<Option<String>> {
        self.get(&storage_key(skill, Purpose::StepTitle(step_index))).await
    }

    pub async fn save_step_title(&self, skill: &str, step_index: usize, title: &str) -> Result<()> {
        self.put(&storage_key(skill, Purpose::StepTitle(step_index)), &title)
            .await
    }

    pub async fn tasks(&self, skill: &str, step_index: usize) -> Result<Option<Vec<Task>>> {
        self.get(&storage_key(skill, Purpose::Tasks(step_index))).await
    }

    pub async fn save_tasks(&self, skill: &str, step_index: usize, tasks: &[Task]) -> Result<()> {
        self.put(&storage_key(skill, Purpose::Tasks(step_index)), &tasks)
            .await
    }

    pub async fn completed_tasks(&self, skill: &str, step_index: usize) -> Result<BTreeSet<usize>> {
        Ok(self
            .get(&storage_key(skill, Purpose::CompletedTasks(step_index)))
            .await?
            .unwrap_or_default())
    }

    /// Loads this tab's view of a step. Requires the step's tasks to be cached.
    pub async fn open_step(&self, skill: &str, step_index: usize) -> Result<StepProgress> {
        let Some(tasks) = self.tasks(skill, step_index).await? else {
            bail!("No tasks cached for step {} of {}", step_index, skill);
        };
        let task_count = tasks.len();
        let completed = self
            .completed_tasks(skill, step_index)
            .await?
            .into_iter()
            .filter(|i| *i < task_count)
            .collect();

        Ok(StepProgress {
            store: self.clone(),
            skill: skill.to_string(),
            step_index,
            task_count,
            completed,
        })
    }

    /// Steps whose every task is completed, derived from the per-step task sets.
    pub async fn completed_steps(&self, skill: &str) -> Result<BTreeSet<usize>> {
        let step_count = match self.roadmap(skill).await? {
            Some(steps) => steps.len(),
            None => return Ok(BTreeSet::new()),
        };

        let mut done = BTreeSet::new();
        for i in 0..step_count {
            let Some(tasks) = self.tasks(skill, i).await? else {
                continue;
            };
            let completed = self.completed_tasks(skill, i).await?;
            if is_step_complete(tasks.len(), &completed) {
                done.insert(i);
            }
        }
        Ok(done)
    }

    /// Share of roadmap steps completed, rounded to a whole percent. 0 without a roadmap.
    pub async fn progress_percent(&self, skill: &str) -> Result<u8> {
        let step_count = match self.roadmap(skill).await? {
            Some(steps) if !steps.is_empty() => steps.len(),
            _ => return Ok(0),
        };
        let done = self.completed_steps(skill).await?.len();
        Ok((done as f64 / step_count as f64 * 100.0).round() as u8)
    }

    async fn refresh_completed_steps(&self, skill: &str) -> Result<BTreeSet<usize>> {
        let done = self.completed_steps(skill).await?;
        self.put(&storage_key(skill, Purpose::CompletedSteps), &done)
            .await?;
        Ok(done)
    }

    /// Drops everything cached for `skill` so the next visit generates a new roadmap.
    pub async fn regenerate_roadmap(&self, skill: &str) -> Result<()> {
        for key in self.storage.list(&skill_prefix(skill)).await? {
            self.storage.delete(&key).await?;
        }
        Ok(())
    }

    /// Drops one step's tasks and its completion so the task list is generated again.
    pub async fn regenerate_tasks(&self, skill: &str, step_index: usize) -> Result<()> {
        self.storage
            .delete(&storage_key(skill, Purpose::Tasks(step_index)))
            .await?;
        self.storage
            .delete(&storage_key(skill, Purpose::CompletedTasks(step_index)))
            .await?;
        self.refresh_completed_steps(skill).await?;
        Ok(())
    }
}

fn is_step_complete(task_count: usize, completed: &BTreeSet<usize>) -> bool {
    task_count > 0 && completed.iter().filter(|i| **i < task_count).count() == task_count
}

/// A single tab's in-memory view of one step's checklist.
///
/// Every toggle writes the whole completed set. Two tabs working on the same step
/// overwrite each other, the later write wins.
pub struct StepProgress {
    store: ProgressStore,
    skill: String,
    step_index: usize,
    task_count: usize,
    completed: BTreeSet<usize>,
}

impl StepProgress {
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    pub fn completed(&self) -> &BTreeSet<usize> {
        &self.completed
    }

    pub fn is_complete(&self) -> bool {
        is_step_complete(self.task_count, &self.completed)
    }

    /// Flips one task and returns whether the step is complete afterwards.
    pub async fn toggle(&mut self, task_index: usize) -> Result<bool> {
        if task_index >= self.task_count {
            bail!(
                "Task index {} out of range for step {} ({} tasks)",
                task_index,
                self.step_index,
                self.task_count
            );
        }

        if !self.completed.remove(&task_index) {
            self.completed.insert(task_index);
        }
        self.save().await
    }

    /// Marks every task of the step done.
    pub async fn complete_all(&mut self) -> Result<bool> {
        self.completed = (0..self.task_count).collect();
        self.save().await
    }

    async fn save(&self) -> Result<bool> {
        self.store
            .put(
                &storage_key(&self.skill, Purpose::CompletedTasks(self.step_index)),
                &self.completed,
            )
            .await?;
        self.store.refresh_completed_steps(&self.skill).await?;

        Ok(self.is_complete())
    }
}
