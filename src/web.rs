//! Browser bindings over the progress cache in `localStorage`.

use crate::core::io::WebStorage;
use crate::core::model::{RoadmapStep, Task};
use crate::core::progress::ProgressStore;
use std::sync::Arc;
use wasm_bindgen::prelude::*;

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn store() -> Result<ProgressStore, JsValue> {
    let storage = WebStorage::new().map_err(js_err)?;
    Ok(ProgressStore::new(Arc::new(storage)))
}

#[wasm_bindgen]
pub fn start() {
    console_error_panic_hook::set_once();
    console_log::init_with_level(log::Level::Debug).unwrap_or(());
}

/// Stores a roadmap as returned by `POST /roadmap` (the `data` array).
#[wasm_bindgen]
pub async fn cache_roadmap(skill: String, roadmap_json: String) -> Result<(), JsValue> {
    let steps: Vec<RoadmapStep> = serde_json::from_str(&roadmap_json).map_err(js_err)?;
    store()?.save_roadmap(&skill, &steps).await.map_err(js_err)
}

/// Stores a task list as returned by `POST /tasks` (the `tasks` array).
#[wasm_bindgen]
pub async fn cache_tasks(
    skill: String,
    step_index: u32,
    tasks_json: String,
) -> Result<(), JsValue> {
    let tasks: Vec<Task> = serde_json::from_str(&tasks_json).map_err(js_err)?;
    store()?
        .save_tasks(&skill, step_index as usize, &tasks)
        .await
        .map_err(js_err)
}

/// Flips one task and returns whether its step is now complete.
#[wasm_bindgen]
pub async fn toggle_task(skill: String, step_index: u32, task_index: u32) -> Result<bool, JsValue> {
    let mut step = store()?
        .open_step(&skill, step_index as usize)
        .await
        .map_err(js_err)?;
    step.toggle(task_index as usize).await.map_err(js_err)
}

/// Marks every task of a step done. Returns whether the step is complete.
#[wasm_bindgen]
pub async fn complete_all_tasks(skill: String, step_index: u32) -> Result<bool, JsValue> {
    let mut step = store()?
        .open_step(&skill, step_index as usize)
        .await
        .map_err(js_err)?;
    step.complete_all().await.map_err(js_err)
}

/// Whole-percent share of completed roadmap steps.
#[wasm_bindgen]
pub async fn progress_percent(skill: String) -> Result<u8, JsValue> {
    store()?.progress_percent(&skill).await.map_err(js_err)
}

#[wasm_bindgen]
pub async fn completed_steps(skill: String) -> Result<Vec<u32>, JsValue> {
    let done = store()?.completed_steps(&skill).await.map_err(js_err)?;
    Ok(done.into_iter().map(|i| i as u32).collect())
}

#[wasm_bindgen]
pub async fn regenerate_roadmap(skill: String) -> Result<(), JsValue> {
    store()?.regenerate_roadmap(&skill).await.map_err(js_err)
}

#[wasm_bindgen]
pub async fn regenerate_tasks(skill: String, step_index: u32) -> Result<(), JsValue> {
    store()?
        .regenerate_tasks(&skill, step_index as usize)
        .await
        .map_err(js_err)
}

#[wasm_bindgen]
pub async fn clear_cache() -> Result<(), JsValue> {
    use crate::core::io::Storage;
    WebStorage::new().map_err(js_err)?.clear_all().await.map_err(js_err)
}
