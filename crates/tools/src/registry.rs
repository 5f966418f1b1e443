//! Tool registry and safety classification.
//!
//! The safe set is explicit and closed: a tool is only speculated on,
//! cached, or dispatched in parallel if its name appears in the configured
//! whitelist. Everything else is treated as mutating.

use std::collections::HashSet;

use dr_domain::config::ToolsConfig;
use dr_domain::ToolSchema;

pub struct ToolRegistry {
    safe: HashSet<String>,
    schemas: Vec<ToolSchema>,
}

impl ToolRegistry {
    pub fn from_config(cfg: &ToolsConfig) -> Self {
        Self {
            safe: cfg.safe.iter().cloned().collect(),
            schemas: builtin_schemas(),
        }
    }

    /// Read-only, idempotent, no external state mutation.
    pub fn is_safe(&self, tool_name: &str) -> bool {
        self.safe.contains(tool_name)
    }

    /// The tool schemas handed to the model. The processor passes an empty
    /// list instead during the review phase.
    pub fn schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.schemas.iter().map(|s| s.name.as_str()).collect()
    }
}

fn schema(name: &str, description: &str, parameters: serde_json::Value) -> ToolSchema {
    ToolSchema {
        name: name.into(),
        description: description.into(),
        parameters,
    }
}

fn string_arg(name: &str, description: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            name: { "type": "string", "description": description }
        },
        "required": [name]
    })
}

/// The built-in tool surface the orchestrator advertises. Execution is
/// delegated to the host through [`crate::ToolExecutor`].
fn builtin_schemas() -> Vec<ToolSchema> {
    vec![
        schema(
            "fetch_url",
            "Fetch a URL and return its textual content.",
            string_arg("url", "URL to fetch"),
        ),
        schema(
            "web_search",
            "Search the web and return result snippets.",
            string_arg("query", "Search query"),
        ),
        schema(
            "get_weather",
            "Current weather for a location.",
            string_arg("location", "City or place name"),
        ),
        schema(
            "get_crypto",
            "Current price for a crypto asset.",
            string_arg("symbol", "Asset symbol, e.g. BTC"),
        ),
        schema(
            "get_currency",
            "Exchange rate between two currencies.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "from": { "type": "string" },
                    "to": { "type": "string" }
                },
                "required": ["from", "to"]
            }),
        ),
        schema(
            "get_news",
            "Recent news headlines for a topic.",
            string_arg("topic", "Topic or keyword"),
        ),
        schema(
            "geolocate",
            "Resolve a place name to coordinates.",
            string_arg("place", "Place name"),
        ),
        schema(
            "github_read_file",
            "Read one file from a GitHub repository.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "repo": { "type": "string", "description": "OWNER/REPO" },
                    "path": { "type": "string", "description": "File path in the repository" }
                },
                "required": ["repo", "path"]
            }),
        ),
        schema(
            "github_list_dir",
            "List a directory in a GitHub repository.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "repo": { "type": "string", "description": "OWNER/REPO" },
                    "path": { "type": "string", "description": "Directory path, empty for root" }
                },
                "required": ["repo"]
            }),
        ),
        schema(
            "lookup_metadata",
            "Look up metadata for a URL or package.",
            string_arg("target", "URL or package identifier"),
        ),
        schema(
            "render_chart",
            "Render a chart from inline data and return an image URL.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "spec": { "type": "string", "description": "Chart spec as JSON" }
                },
                "required": ["spec"]
            }),
        ),
        // Mutating surface.
        schema(
            "run_command",
            "Run a shell command in the task sandbox.",
            string_arg("command", "Shell command to execute"),
        ),
        schema(
            "create_pull_request",
            "Open a pull request with staged changes.",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "repo": { "type": "string" },
                    "title": { "type": "string" },
                    "body": { "type": "string" },
                    "branch": { "type": "string" }
                },
                "required": ["repo", "title"]
            }),
        ),
        schema(
            "http_request",
            "Make an arbitrary HTTP request (any method).",
            serde_json::json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string" },
                    "method": { "type": "string" },
                    "body": { "type": "string" }
                },
                "required": ["url", "method"]
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_whitelist_classifies() {
        let reg = ToolRegistry::from_config(&ToolsConfig::default());
        assert!(reg.is_safe("fetch_url"));
        assert!(reg.is_safe("github_read_file"));
        assert!(!reg.is_safe("run_command"));
        assert!(!reg.is_safe("create_pull_request"));
        // Unknown tools default to mutating.
        assert!(!reg.is_safe("brand_new_tool"));
    }

    #[test]
    fn schemas_cover_the_safe_set() {
        let cfg = ToolsConfig::default();
        let reg = ToolRegistry::from_config(&cfg);
        let names = reg.tool_names();
        for safe in &cfg.safe {
            assert!(names.contains(&safe.as_str()), "missing schema for {safe}");
        }
    }
}
