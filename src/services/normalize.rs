//! Turns free-form model output into the roadmap and task schemas.
//!
//! Extraction order:
//!
//! 1. strict parse of the whole text (after stripping a Markdown code fence): either an
//!    object carrying the expected array field, or a bare array which is taken as that field;
//! 2. last resort: the first balanced `[...]` substring that parses as a non-empty JSON
//!    array of objects.
//!
//! Nothing is ever synthesised. A value that is not present in the model output is a
//! [`AppError::Parse`], never a default.

use crate::core::error::AppError;
use crate::core::model::{Resource, RoadmapStep, Task};
use log::warn;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// The expected field was found in a strictly parsed object.
    Strict,
    /// The whole output was a bare array.
    Wrapped,
    /// The array was cut out of surrounding prose.
    Substring,
}

pub fn strip_code_blocks(s: &str) -> &str {
    let s = s.trim();
    let inner = if let Some(rest) = s.strip_prefix("```json") {
        rest
    } else if let Some(rest) = s.strip_prefix("```") {
        rest
    } else {
        return s;
    };
    inner.trim_end().trim_end_matches("```").trim()
}

/// Extracts the array stored under `field` from raw model output.
pub fn normalize(raw: &str, field: &str) -> Result<(Vec<Value>, Extraction), AppError> {
    if let Ok(value) = serde_json::from_str::<Value>(strip_code_blocks(raw)) {
        match value {
            Value::Array(items) => return Ok((items, Extraction::Wrapped)),
            Value::Object(mut map) => {
                if let Some(Value::Array(items)) = map.remove(field) {
                    return Ok((items, Extraction::Strict));
                }
            }
            _ => {}
        }
    }

    if let Some(items) = first_balanced_array(raw) {
        return Ok((items, Extraction::Substring));
    }

    Err(AppError::parse(
        format!("no '{}' array found in model output", field),
        raw,
    ))
}

/// Scans for the first `[` whose balanced closing `]` yields a JSON array of objects.
/// Brackets inside string literals are ignored, so are citations like `[1]`.
fn first_balanced_array(text: &str) -> Option<Vec<Value>> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find('[') {
        let open = start + offset;
        if let Some(close) = matching_bracket(bytes, open) {
            if let Ok(Value::Array(items)) = serde_json::from_str(&text[open..=close]) {
                if !items.is_empty() && items.iter().all(Value::is_object) {
                    return Some(items);
                }
            }
        }
        start = open + 1;
    }
    None
}

fn matching_bracket(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Deserialize)]
struct RawStep {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Deserialize)]
struct RawTask {
    #[serde(default)]
    task: Option<String>,
    #[serde(default, rename = "estimatedTime", alias = "estimated_time")]
    estimated_time: Option<Value>,
    #[serde(default)]
    resources: Vec<RawResource>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawResource {
    Url(String),
    Link {
        url: String,
        #[serde(default)]
        title: Option<String>,
    },
}

impl From<RawResource> for Resource {
    fn from(raw: RawResource) -> Self {
        match raw {
            RawResource::Url(url) => Resource {
                url: url.trim().to_string(),
                title: None,
            },
            RawResource::Link { url, title } => Resource {
                url: url.trim().to_string(),
                title: title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()),
            },
        }
    }
}

fn required_text(
    value: Option<String>,
    what: &str,
    index: usize,
    raw: &str,
) -> Result<String, AppError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(AppError::parse(
            format!("entry {} has no {}", index, what),
            raw,
        )),
    }
}

fn whole_minutes(f: f64) -> Option<u32> {
    (f.is_finite() && f >= 0.0 && f <= u32::MAX as f64).then(|| f.round() as u32)
}

/// Minutes from a JSON number, or a string like "45", "45 minutes", "2 hours" or "1.5h".
/// Any other unit is rejected.
fn minutes(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => whole_minutes(n.as_f64()?),
        Value::String(s) => {
            let s = s.trim();
            let split = s
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .unwrap_or(s.len());
            let amount: f64 = s[..split].parse().ok()?;
            let factor = match s[split..].trim().to_ascii_lowercase().as_str() {
                "" | "m" | "min" | "mins" | "minute" | "minutes" => 1.0,
                "h" | "hr" | "hrs" | "hour" | "hours" => 60.0,
                _ => return None,
            };
            whole_minutes(amount * factor)
        }
        _ => None,
    }
}

pub fn parse_roadmap(
    items: Vec<Value>,
    expected: usize,
    raw: &str,
) -> Result<Vec<RoadmapStep>, AppError> {
    if items.len() != expected {
        return Err(AppError::parse(
            format!("expected {} roadmap steps, got {}", expected, items.len()),
            raw,
        ));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let step: RawStep = serde_json::from_value(item)
                .map_err(|e| AppError::parse(format!("entry {} is not a step: {}", i, e), raw))?;
            Ok(RoadmapStep {
                title: required_text(step.title, "title", i, raw)?,
                description: required_text(step.description, "description", i, raw)?,
            })
        })
        .collect()
}

pub fn parse_tasks(items: Vec<Value>, raw: &str) -> Result<Vec<Task>, AppError> {
    if items.is_empty() {
        return Err(AppError::parse("model returned no tasks", raw));
    }

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let task: RawTask = serde_json::from_value(item)
                .map_err(|e| AppError::parse(format!("entry {} is not a task: {}", i, e), raw))?;
            let estimated_time = minutes(task.estimated_time.as_ref()).ok_or_else(|| {
                AppError::parse(format!("entry {} has no usable estimatedTime", i), raw)
            })?;
            Ok(Task {
                task: required_text(task.task, "task", i, raw)?,
                estimated_time,
                resources: task
                    .resources
                    .into_iter()
                    .map(Resource::from)
                    .filter(|r| !r.url.is_empty())
                    .collect(),
            })
        })
        .collect()
}

/// Counts how often the model needed the lenient paths, and complains when it is too often.
#[derive(Debug, Default)]
pub struct NormalizerStats {
    strict: AtomicU64,
    tolerant: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub strict: u64,
    pub tolerant: u64,
    pub failed: u64,
}

const MIN_SAMPLE: u64 = 10;

impl NormalizerStats {
    pub fn record(&self, outcome: Option<Extraction>, warn_ratio: f64) {
        match outcome {
            Some(Extraction::Strict) => self.strict.fetch_add(1, Ordering::Relaxed),
            Some(_) => self.tolerant.fetch_add(1, Ordering::Relaxed),
            None => self.failed.fetch_add(1, Ordering::Relaxed),
        };

        if outcome == Some(Extraction::Strict) {
            return;
        }
        let snap = self.snapshot();
        let total = snap.strict + snap.tolerant + snap.failed;
        let ratio = (snap.tolerant + snap.failed) as f64 / total as f64;
        if total >= MIN_SAMPLE && ratio > warn_ratio {
            warn!(
                "Malformed model output rate is {:.0}% ({} tolerant, {} failed of {} responses)",
                ratio * 100.0,
                snap.tolerant,
                snap.failed,
                total
            );
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            strict: self.strict.load(Ordering::Relaxed),
            tolerant: self.tolerant.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
