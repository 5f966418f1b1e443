use serde::{Deserialize, Serialize};

/// One step of a structured plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanStep {
    pub action: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub description: String,
}

/// The JSON plan the model emits during the planning phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StructuredPlan {
    pub steps: Vec<PlanStep>,
}

impl StructuredPlan {
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Unique file paths referenced across all steps, in first-seen order.
    pub fn referenced_files(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for step in &self.steps {
            for f in &step.files {
                if seen.insert(f.clone()) {
                    out.push(f.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn referenced_files_dedups_across_steps() {
        let plan = StructuredPlan {
            steps: vec![
                PlanStep {
                    action: "read".into(),
                    files: vec!["src/main.rs".into(), "Cargo.toml".into()],
                    description: "look around".into(),
                },
                PlanStep {
                    action: "edit".into(),
                    files: vec!["src/main.rs".into()],
                    description: "apply fix".into(),
                },
            ],
        };
        assert_eq!(plan.referenced_files(), vec!["src/main.rs", "Cargo.toml"]);
    }
}
