//! Prompt catalog
//!
//! Agent instructions are Tera templates (`*.j2`) loaded from one directory
//! and rendered with the agent's configured context.

use glob::glob;
use serde_json::Value;
use std::error::Error as _;
use std::path::Path;
use tera::{Context, Tera};
use tracing::{debug, warn};

use super::error::{AgentError, AgentResult};
use crate::config::AgentConfig;

pub struct PromptCatalog {
    tera: Tera,
}

impl PromptCatalog {
    /// A catalog without any templates; only inline instructions render
    pub fn empty() -> Self {
        Self { tera: Tera::default() }
    }

    /// Load every `*.j2` file in `dir`. A missing directory yields an empty catalog.
    pub fn load(dir: impl AsRef<Path>) -> AgentResult<Self> {
        let dir = dir.as_ref();
        let mut tera = Tera::default();

        if !dir.exists() {
            warn!(dir = %dir.display(), "Prompt directory not found");
            return Ok(Self { tera });
        }

        let pattern = dir.join("*.j2");
        let entries = glob(&pattern.to_string_lossy())
            .map_err(|e| AgentError::Configuration(format!("bad prompt pattern: {}", e)))?;

        for path in entries.flatten() {
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            tera.add_template_file(&path, Some(&name))
                .map_err(|e| AgentError::Configuration(format!("template '{}': {}", name, e)))?;
            debug!(template = %name, "Loaded prompt template");
        }

        Ok(Self { tera })
    }

    pub fn contains(&self, template: &str) -> bool {
        self.tera.get_template_names().any(|n| n == template)
    }

    /// Template names, sorted
    pub fn templates(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tera.get_template_names().map(str::to_string).collect();
        names.sort();
        names
    }

    /// Render a named template
    pub fn render(&self, template: &str, context: &Value) -> AgentResult<String> {
        if !self.contains(template) {
            return Err(AgentError::NotFound(format!("prompt template '{}'", template)));
        }
        let context = build_context(context)?;
        self.tera
            .render(template, &context)
            .map_err(|e| AgentError::Configuration(format!("template '{}': {}", template, render_cause(&e))))
    }

    /// Render instruction text given inline
    pub fn render_inline(&self, text: &str, context: &Value) -> AgentResult<String> {
        if !text.contains("{{") && !text.contains("{%") {
            return Ok(text.to_string());
        }
        let context = build_context(context)?;
        Tera::one_off(text, &context, false)
            .map_err(|e| AgentError::Configuration(format!("inline instructions: {}", render_cause(&e))))
    }

    /// Instruction text for an agent; a template wins over inline text
    pub fn render_instructions(&self, agent: &AgentConfig) -> AgentResult<String> {
        match (&agent.template, &agent.instructions) {
            (Some(template), _) => self.render(template, &agent.context),
            (None, Some(text)) => self.render_inline(text, &agent.context),
            (None, None) => Err(AgentError::Configuration(format!(
                "agent '{}' has neither a template nor instructions",
                agent.name
            ))),
        }
    }
}

fn build_context(value: &Value) -> AgentResult<Context> {
    match value {
        Value::Null => Ok(Context::new()),
        Value::Object(_) => Context::from_serialize(value)
            .map_err(|e| AgentError::Configuration(format!("template context: {}", e))),
        _ => Err(AgentError::Configuration("template context must be a table".to_string())),
    }
}

/// Tera hides the interesting part of an error in its source chain
fn render_cause(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message = format!("{}: {}", message, cause);
        source = cause.source();
    }
    message
}
