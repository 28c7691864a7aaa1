//! Prompt templates for every pipeline stage
//!
//! Built-in templates are compiled in from `prompts/*.txt`. A configured directory may
//! override any of them by file name (`ideas.txt`, `requirements.txt`, ...).
//! Placeholders use the `{NAME}` form and are replaced verbatim.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{PipelineError, Result};

/// Stable identifiers of the templates the pipeline uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptId {
    Ideas,
    MoreIdeas,
    Requirements,
    Code,
    CodeWriter,
    Dependencies,
    WrongFormat,
}

impl PromptId {
    pub const ALL: [PromptId; 7] = [
        PromptId::Ideas,
        PromptId::MoreIdeas,
        PromptId::Requirements,
        PromptId::Code,
        PromptId::CodeWriter,
        PromptId::Dependencies,
        PromptId::WrongFormat,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            PromptId::Ideas => "ideas.txt",
            PromptId::MoreIdeas => "more_ideas.txt",
            PromptId::Requirements => "requirements.txt",
            PromptId::Code => "code.txt",
            PromptId::CodeWriter => "code_writer.txt",
            PromptId::Dependencies => "dependencies.txt",
            PromptId::WrongFormat => "wrong_format.txt",
        }
    }

    fn builtin(&self) -> &'static str {
        match self {
            PromptId::Ideas => include_str!("../prompts/ideas.txt"),
            PromptId::MoreIdeas => include_str!("../prompts/more_ideas.txt"),
            PromptId::Requirements => include_str!("../prompts/requirements.txt"),
            PromptId::Code => include_str!("../prompts/code.txt"),
            PromptId::CodeWriter => include_str!("../prompts/code_writer.txt"),
            PromptId::Dependencies => include_str!("../prompts/dependencies.txt"),
            PromptId::WrongFormat => include_str!("../prompts/wrong_format.txt"),
        }
    }
}

/// Registry of the templates in effect for a run
#[derive(Debug, Clone)]
pub struct PromptSet {
    templates: HashMap<PromptId, Arc<str>>,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PromptSet {
    /// Built-in templates only
    pub fn builtin() -> Self {
        let templates = PromptId::ALL
            .iter()
            .map(|id| (*id, Arc::from(id.builtin().trim_end())))
            .collect();
        Self { templates }
    }

    /// Built-in templates, with any `<name>.txt` found in `dir` taking precedence
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let mut set = Self::builtin();
        let Some(dir) = dir else {
            return Ok(set);
        };
        if !dir.is_dir() {
            return Err(PipelineError::Config {
                message: format!("Prompt directory not found: {}", dir.display()),
            });
        }

        for id in PromptId::ALL {
            let path = dir.join(id.file_name());
            match std::fs::read_to_string(&path) {
                Ok(content) => {
                    tracing::debug!("Prompt override loaded from {}", path.display());
                    set.register(id, content.trim_end());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(set)
    }

    pub fn register(&mut self, id: PromptId, template: impl Into<Arc<str>>) {
        self.templates.insert(id, template.into());
    }

    pub fn get(&self, id: PromptId) -> &str {
        self.templates
            .get(&id)
            .map(|t| &**t)
            .unwrap_or_else(|| id.builtin())
    }

    /// Render `id` with `{KEY}` placeholders replaced by their values
    pub fn render(&self, id: PromptId, vars: &[(&str, &str)]) -> String {
        render(self.get(id), vars)
    }

    pub fn ideas(&self, count: usize) -> String {
        self.render(PromptId::Ideas, &[("COUNT", &count.to_string())])
    }

    pub fn more_ideas(&self, count: usize) -> String {
        self.render(PromptId::MoreIdeas, &[("COUNT", &count.to_string())])
    }

    pub fn requirements(&self, idea_description: &str) -> String {
        self.render(PromptId::Requirements, &[("THE_IDEA", idea_description)])
    }

    /// The planning template followed by the requirements document
    pub fn code(&self, requirements: &str) -> String {
        format!("{}\n\n{}", self.get(PromptId::Code), requirements)
    }

    pub fn code_writer(&self) -> String {
        self.get(PromptId::CodeWriter).to_string()
    }

    pub fn dependencies(&self, code: &str) -> String {
        self.render(PromptId::Dependencies, &[("DETAILS", code)])
    }

    pub fn wrong_format(&self, expected: &str) -> String {
        self.render(PromptId::WrongFormat, &[("EXPECTED", expected)])
    }
}

pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{}}}", key), value)
    })
}
