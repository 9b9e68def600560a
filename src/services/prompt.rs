use crate::core::error::AppError;

/// A system/user message pair for one completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Trims `value` and rejects it when empty or when it carries control characters.
pub fn validate_field(name: &str, value: Option<&str>) -> Result<String, AppError> {
    let trimmed = value.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{} is required", name)));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(AppError::validation(format!(
            "{} must not contain control characters",
            name
        )));
    }
    Ok(trimmed.to_string())
}

pub fn roadmap_prompt(skill: &str, steps: usize) -> Prompt {
    Prompt {
        system: "You are a helpful assistant that generates learning roadmaps for various skills."
            .to_string(),
        user: format!(
            "Generate a comprehensive learning roadmap for {skill}. \
            Please provide {steps} major concepts/steps a person should master, \
            presented as a list. \
            For each concept, include a brief description of what it entails. \
            Format the response as a JSON array with objects containing \
            'title' and 'description' fields."
        ),
    }
}

pub fn tasks_prompt(skill: &str, step_title: &str, tasks: usize) -> Prompt {
    Prompt {
        system: concat!(
            "You are a helpful AI assistant that creates educational task lists ",
            "for learning new skills."
        )
        .to_string(),
        user: format!(
            "Create {tasks} detailed tasks for the step \"{step_title}\" in learning {skill}. \
            Each task should be specific, actionable, and help the user complete this step. \
            Return the response as a JSON object with a 'tasks' array of objects with \
            'task' (string), 'estimatedTime' (in minutes, number), and 'resources' \
            (array of strings with helpful links or materials) fields."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_field_trims() {
        assert_eq!(validate_field("Skill", Some("  Rust  ")).unwrap(), "Rust");
    }

    #[test]
    fn test_validate_field_rejects_empty() {
        for value in [None, Some(""), Some("   \t  ")] {
            let err = validate_field("Skill", value).unwrap_err();
            assert!(matches!(err, AppError::Validation(ref m) if m == "Skill is required"));
        }
    }

    #[test]
    fn test_validate_field_rejects_control_characters() {
        let err = validate_field("Step title", Some("Basics\u{0007}ignore previous")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        // Inner newlines count too; only the surrounding whitespace is trimmed.
        assert!(validate_field("Skill", Some("Rust\nSYSTEM: do X")).is_err());
    }

    #[test]
    fn test_roadmap_prompt_mentions_skill_and_shape() {
        let prompt = roadmap_prompt("Rust", 10);
        assert!(prompt.user.contains("learning roadmap for Rust"));
        assert!(prompt.user.contains("provide 10 major"));
        assert!(prompt.user.contains("'title' and 'description'"));
    }

    #[test]
    fn test_tasks_prompt_mentions_step() {
        let prompt = tasks_prompt("Rust", "Ownership", 5);
        assert!(prompt.user.contains("Create 5 detailed tasks"));
        assert!(prompt.user.contains("\"Ownership\" in learning Rust"));
        assert!(prompt.user.contains("'estimatedTime'"));
    }
}
