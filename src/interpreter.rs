//! Response interpreter: turns raw LLM replies into typed stage payloads
//!
//! Every interaction follows the same protocol: send the prompt, try to parse the reply
//! for the expected payload kind, and on a parse failure send a correction turn that
//! restates the expected format. At most `retry_budget` replies are evaluated per
//! interaction; transport failures are not retried here (the client owns that policy).

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clients::{ChatMessage, LlmClient};
use crate::error::{PipelineError, Result};
use crate::model::{DependencyList, Idea};
use crate::prompts::PromptSet;
use crate::utils::{parse_lenient, truncate_chars};

/// The closed set of reply shapes the pipeline asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    IdeaList,
    RequirementText,
    CodeText,
    FrameworkList,
}

impl PayloadKind {
    pub fn label(&self) -> &'static str {
        match self {
            PayloadKind::IdeaList => "idea-list",
            PayloadKind::RequirementText => "requirement",
            PayloadKind::CodeText => "code",
            PayloadKind::FrameworkList => "framework-list",
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            PayloadKind::IdeaList => "You are a product strategist who answers in strict JSON.",
            PayloadKind::RequirementText => "You are a helpful Assistant.",
            PayloadKind::CodeText => "You are a helpful assistant.",
            PayloadKind::FrameworkList => {
                "You are a production engineer that analyzes code dependencies."
            }
        }
    }

    /// Format description substituted into the correction prompt
    pub fn expected_format(&self) -> &'static str {
        match self {
            PayloadKind::IdeaList => {
                "a JSON array of objects, each with the keys \"Product Idea\", \"Problem it solves\", \
                 \"Software Techstack\" (array of strings), \"Target hardware expectations\" (array of strings), \
                 \"Company profile\" and \"Engineering profile\""
            }
            PayloadKind::RequirementText => "a non-empty plain-text requirements document",
            PayloadKind::CodeText => "non-empty source code with its accompanying commentary",
            PayloadKind::FrameworkList => {
                "a JSON object with a \"frameworks\" array of framework and library names and a \"models\" \
                 array of pretrained model identifiers, e.g. {\"frameworks\": [\"torch\"], \"models\": [\"bert-base-uncased\"]}"
            }
        }
    }

    /// Conversation prefix for a fresh interaction of this kind
    pub fn base_history(&self) -> Vec<ChatMessage> {
        vec![ChatMessage::system(self.system_prompt())]
    }
}

/// Parsed reply, one variant per payload kind
#[derive(Debug, Clone, PartialEq)]
pub enum StagePayload {
    Ideas(Vec<Idea>),
    Requirement(String),
    Code(String),
    Dependencies(DependencyList),
}

impl StagePayload {
    pub fn into_ideas(self) -> Option<Vec<Idea>> {
        match self {
            StagePayload::Ideas(ideas) => Some(ideas),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            StagePayload::Requirement(text) | StagePayload::Code(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_dependencies(self) -> Option<DependencyList> {
        match self {
            StagePayload::Dependencies(list) => Some(list),
            _ => None,
        }
    }
}

/// Parse a raw reply against the schema for `kind`; the error text explains the mismatch.
pub fn parse_payload(kind: PayloadKind, raw: &str) -> std::result::Result<StagePayload, String> {
    match kind {
        PayloadKind::IdeaList => parse_ideas(raw).map(StagePayload::Ideas),
        PayloadKind::RequirementText => non_empty(raw).map(StagePayload::Requirement),
        PayloadKind::CodeText => non_empty(raw).map(StagePayload::Code),
        PayloadKind::FrameworkList => parse_dependencies(raw).map(StagePayload::Dependencies),
    }
}

fn non_empty(raw: &str) -> std::result::Result<String, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        Err("response was empty".to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

fn parse_ideas(raw: &str) -> std::result::Result<Vec<Idea>, String> {
    let value = parse_lenient(raw).ok_or_else(|| "response is not JSON".to_string())?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("ideas") {
            Some(Value::Array(items)) => items,
            _ => vec![Value::Object(obj)],
        },
        other => return Err(format!("expected a JSON array, got {}", json_type(&other))),
    };

    let total = items.len();
    let ideas: Vec<Idea> = items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value::<Idea>(item) {
            Ok(idea) if idea.is_valid() => Some(idea),
            Ok(_) => {
                debug!("Idea {} dropped: missing product name", i);
                None
            }
            Err(e) => {
                debug!("Idea {} dropped: {}", i, e);
                None
            }
        })
        .collect();

    if ideas.is_empty() {
        return Err(format!("none of the {} records was a valid idea", total));
    }
    if ideas.len() < total {
        warn!("{} of {} idea records were invalid", total - ideas.len(), total);
    }
    Ok(ideas)
}

/// A bare array lists frameworks only; an object carries `frameworks` and/or `models`.
fn parse_dependencies(raw: &str) -> std::result::Result<DependencyList, String> {
    let value = parse_lenient(raw).ok_or_else(|| "response is not JSON".to_string())?;
    match value {
        Value::Array(items) => Ok(DependencyList::new(name_list(items, "framework")?, Vec::new())),
        Value::Object(mut obj) => {
            let frameworks = obj.remove("frameworks");
            let models = obj.remove("models");
            if frameworks.is_none() && models.is_none() {
                return Err("expected a JSON array or an object with \"frameworks\"/\"models\" arrays".to_string());
            }
            Ok(DependencyList::new(
                optional_name_list(frameworks, "frameworks")?,
                optional_name_list(models, "models")?,
            ))
        }
        other => Err(format!("expected a JSON array, got {}", json_type(&other))),
    }
}

fn optional_name_list(value: Option<Value>, field: &str) -> std::result::Result<Vec<String>, String> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => name_list(items, field.trim_end_matches('s')),
        Some(other) => Err(format!("\"{}\" is {}, not an array", field, json_type(&other))),
    }
}

/// Entries are plain strings or `{"name": ...}` objects; blank names are dropped.
fn name_list(items: Vec<Value>, what: &str) -> std::result::Result<Vec<String>, String> {
    items
        .into_iter()
        .map(|item| match item {
            Value::String(name) => Ok(name),
            Value::Object(obj) => obj
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| format!("{} object without a \"name\"", what)),
            other => Err(format!("{} entry is {}", what, json_type(&other))),
        })
        .filter(|name| name.as_ref().map_or(true, |n| !n.trim().is_empty()))
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

static VERSION_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s=<>~^!]+v?\d.*$").unwrap());

/// Final segments that are part of a product name rather than a submodule path
const DOTTED_PRODUCT_SUFFIXES: &[&str] = &["js", "ts", "io", "net", "ai", "dev"];

fn is_module_segment(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Canonical key for a framework name: `"Torch.nn"` → `torch`, `"@angular/core"` → `angular`,
/// `"Next.js"` → `next.js`, `"numpy==1.26"` → `numpy`. Dotted product names such as
/// `.NET` or `socket.io` stay whole. Non-blank input never yields an empty key.
pub fn normalize_framework_name(name: &str) -> String {
    let original = name
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_lowercase();
    let mut name = original.clone();

    if let Some(stripped) = name.strip_prefix('@') {
        name = stripped.to_string();
    }
    if let Some(pos) = name.find(['/', '@']) {
        name.truncate(pos);
    }
    name = VERSION_SUFFIX.replace(&name, "").to_string();

    // `torch.nn.functional` → `torch`, only for a Python-style root plus submodule path
    let submodule_cut = name.split_once('.').and_then(|(root, rest)| {
        let product_suffix = rest
            .rsplit('.')
            .next()
            .is_some_and(|last| DOTTED_PRODUCT_SUFFIXES.contains(&last));
        (is_module_segment(root) && rest.split('.').all(is_module_segment) && !product_suffix)
            .then_some(root.len())
    });
    if let Some(pos) = submodule_cut {
        name.truncate(pos);
    }

    let name = name.trim();
    if name.is_empty() {
        original
    } else {
        name.to_string()
    }
}

/// Model identifiers are case-sensitive hub paths (`meta-llama/Llama-2-7b`), so only
/// surrounding whitespace and quotes are removed.
pub fn normalize_model_name(name: &str) -> String {
    name.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim()
        .to_string()
}

/// A completed interaction: its payload, how many corrections it took, and the full exchange
#[derive(Debug, Clone)]
pub struct Interaction {
    pub payload: StagePayload,
    pub corrections: u32,
    pub transcript: Vec<ChatMessage>,
}

/// Result of a batched idea request
#[derive(Debug, Clone)]
pub struct IdeaBatch {
    pub ideas: Vec<Idea>,
    pub requested: usize,
    pub follow_ups: u32,
}

impl IdeaBatch {
    pub fn is_complete(&self) -> bool {
        self.ideas.len() >= self.requested
    }
}

pub struct Interpreter {
    client: Arc<dyn LlmClient>,
    prompts: Arc<PromptSet>,
    retry_budget: u32,
}

impl Interpreter {
    pub fn new(client: Arc<dyn LlmClient>, prompts: Arc<PromptSet>, retry_budget: u32) -> Self {
        Self {
            client,
            prompts,
            retry_budget: retry_budget.max(1),
        }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub fn prompts(&self) -> &PromptSet {
        &self.prompts
    }

    /// Single interaction starting from the kind's system prompt
    pub async fn interact(&self, kind: PayloadKind, prompt: &str) -> Result<Interaction> {
        self.interact_with_history(kind, prompt, kind.base_history())
            .await
    }

    /// Send `prompt` after `history`, re-asking with a format correction until a reply
    /// parses or the budget is spent.
    pub async fn interact_with_history(
        &self,
        kind: PayloadKind,
        prompt: &str,
        mut history: Vec<ChatMessage>,
    ) -> Result<Interaction> {
        let mut turn = prompt.to_string();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let raw = self.client.send(&turn, &history).await?;
            history.push(ChatMessage::user(turn));

            match parse_payload(kind, &raw) {
                Ok(payload) => {
                    history.push(ChatMessage::assistant(raw));
                    return Ok(Interaction {
                        payload,
                        corrections: attempts - 1,
                        transcript: history,
                    });
                }
                Err(reason) => {
                    warn!(
                        "Attempt {}/{}: {} response did not parse: {}",
                        attempts,
                        self.retry_budget,
                        kind.label(),
                        reason
                    );
                    if attempts >= self.retry_budget {
                        return Err(PipelineError::Format {
                            kind: kind.label(),
                            attempts,
                            message: format!("{} (last reply: {})", reason, truncate_chars(raw.trim(), 200)),
                        });
                    }
                    history.push(ChatMessage::assistant(raw));
                    turn = self.prompts.wrong_format(kind.expected_format());
                }
            }
        }
    }

    /// Request `wanted` ideas, topping up with "give me M more" turns in the same
    /// conversation while short. A short final set is returned rather than failing;
    /// only a first exchange that yields no idea at all is an error.
    pub async fn generate_ideas(&self, wanted: usize) -> Result<IdeaBatch> {
        let first = self
            .interact(PayloadKind::IdeaList, &self.prompts.ideas(wanted))
            .await?;
        let mut transcript = first.transcript;
        let mut ideas = first.payload.into_ideas().unwrap_or_default();
        ideas.truncate(wanted);
        info!("First idea batch: {}/{} valid ideas", ideas.len(), wanted);

        let mut follow_ups = 0u32;
        while ideas.len() < wanted && follow_ups < self.retry_budget {
            follow_ups += 1;
            let deficit = wanted - ideas.len();
            info!("Requesting {} more ideas (follow-up {})", deficit, follow_ups);

            match self
                .interact_with_history(
                    PayloadKind::IdeaList,
                    &self.prompts.more_ideas(deficit),
                    transcript.clone(),
                )
                .await
            {
                Ok(more) => {
                    transcript = more.transcript;
                    let mut extra = more.payload.into_ideas().unwrap_or_default();
                    extra.truncate(deficit);
                    ideas.extend(extra);
                }
                Err(PipelineError::Format { message, .. }) => {
                    warn!("Follow-up {} yielded no usable ideas: {}", follow_ups, message);
                }
                Err(e) => {
                    warn!("Follow-up {} failed ({}): {}", follow_ups, e.kind(), e);
                    break;
                }
            }
        }

        if ideas.len() < wanted {
            warn!(
                "Returning partial idea set: {}/{} after {} follow-up(s)",
                ideas.len(),
                wanted,
                follow_ups
            );
        }
        Ok(IdeaBatch {
            ideas,
            requested: wanted,
            follow_ups,
        })
    }

    pub async fn requirements(&self, idea: &Idea) -> Result<String> {
        let prompt = self.prompts.requirements(&idea.describe());
        let reply = self.interact(PayloadKind::RequirementText, &prompt).await?;
        Ok(reply.payload.into_text().unwrap_or_default())
    }

    /// Two-turn code generation: a planning turn on the requirements, then a writer
    /// turn continuing that conversation.
    pub async fn code(&self, requirements: &str) -> Result<String> {
        let plan = self
            .interact(PayloadKind::CodeText, &self.prompts.code(requirements))
            .await?;
        debug!("Code plan accepted after {} correction(s)", plan.corrections);

        let written = self
            .interact_with_history(
                PayloadKind::CodeText,
                &self.prompts.code_writer(),
                plan.transcript,
            )
            .await?;
        Ok(written.payload.into_text().unwrap_or_default())
    }

    /// Frameworks and pretrained models named in one code artifact
    pub async fn dependencies(&self, code: &str) -> Result<DependencyList> {
        let reply = self
            .interact(PayloadKind::FrameworkList, &self.prompts.dependencies(code))
            .await?;
        Ok(reply.payload.into_dependencies().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framework_list_shapes() {
        let plain = parse_payload(PayloadKind::FrameworkList, r#"["react", "express"]"#).unwrap();
        assert_eq!(
            plain,
            StagePayload::Dependencies(DependencyList::new(
                vec!["react".into(), "express".into()],
                vec![]
            ))
        );

        let wrapped = parse_payload(
            PayloadKind::FrameworkList,
            "```json\n{\"frameworks\": [{\"name\": \"torch\"}, \"numpy\"]}\n```",
        )
        .unwrap();
        assert_eq!(
            wrapped,
            StagePayload::Dependencies(DependencyList::new(
                vec!["torch".into(), "numpy".into()],
                vec![]
            ))
        );

        let empty = parse_payload(PayloadKind::FrameworkList, "[]").unwrap();
        assert_eq!(empty, StagePayload::Dependencies(DependencyList::default()));
    }

    #[test]
    fn extraction_reply_carries_models() {
        let raw = r#"Here you go:
            {"frameworks": ["transformers", "torch"],
             "models": ["bert-base-uncased", {"name": "meta-llama/Llama-2-7b-hf"}, " "]}"#;
        let list = parse_payload(PayloadKind::FrameworkList, raw)
            .unwrap()
            .into_dependencies()
            .unwrap();
        assert_eq!(list.frameworks, vec!["transformers", "torch"]);
        assert_eq!(list.models, vec!["bert-base-uncased", "meta-llama/Llama-2-7b-hf"]);

        let models_only =
            parse_payload(PayloadKind::FrameworkList, r#"{"models": ["yolov5s"]}"#).unwrap();
        assert_eq!(
            models_only,
            StagePayload::Dependencies(DependencyList::new(vec![], vec!["yolov5s".into()]))
        );
        assert!(parse_payload(PayloadKind::FrameworkList, r#"{"frameworks": [], "models": "x"}"#).is_err());
    }

    #[test]
    fn model_names_keep_their_case() {
        assert_eq!(normalize_model_name(" 'meta-llama/Llama-2-7b' "), "meta-llama/Llama-2-7b");
        assert_eq!(normalize_model_name("\"\""), "");
    }

    #[test]
    fn idea_list_drops_invalid_records() {
        let raw = r#"[
            {"Product Idea": "Alpha", "Problem it solves": "a"},
            {"Problem it solves": "no name"},
            {"Product Idea": "Beta", "Problem it solves": "b", "Software Techstack": "not a list"},
            {"title": "Gamma", "description": "c"}
        ]"#;
        let ideas = parse_payload(PayloadKind::IdeaList, raw)
            .unwrap()
            .into_ideas()
            .unwrap();
        let titles: Vec<_> = ideas.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Alpha", "Gamma"]);
    }

    #[test]
    fn idea_list_without_valid_records_is_error() {
        assert!(parse_payload(PayloadKind::IdeaList, r#"[{"x": 1}]"#).is_err());
        assert!(parse_payload(PayloadKind::IdeaList, "\"just a string\"").is_err());
    }

    #[test]
    fn text_kinds_require_content() {
        assert!(parse_payload(PayloadKind::RequirementText, "  \n ").is_err());
        assert_eq!(
            parse_payload(PayloadKind::CodeText, " fn main() {} "),
            Ok(StagePayload::Code("fn main() {}".into()))
        );
    }

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize_framework_name(" Torch "), "torch");
        assert_eq!(normalize_framework_name("torch.nn"), "torch");
        assert_eq!(normalize_framework_name("@tensorflow/tfjs"), "tensorflow");
        assert_eq!(normalize_framework_name("Next.js"), "next.js");
        assert_eq!(normalize_framework_name("numpy==1.26.0"), "numpy");
        assert_eq!(normalize_framework_name("react@^18.2"), "react");
        assert_eq!(normalize_framework_name("`FastAPI`"), "fastapi");
        assert_eq!(normalize_framework_name("scikit-learn"), "scikit-learn");
        assert_eq!(normalize_framework_name("torch.nn.functional"), "torch");
        assert_eq!(normalize_framework_name("tf.keras"), "tf");
    }

    #[test]
    fn dotted_product_names_stay_whole() {
        assert_eq!(normalize_framework_name(".NET"), ".net");
        assert_eq!(normalize_framework_name("ASP.NET Core"), "asp.net core");
        assert_eq!(normalize_framework_name("socket.io"), "socket.io");
        assert_eq!(normalize_framework_name("Vue.js"), "vue.js");
        assert_eq!(normalize_framework_name("ASP.NET"), "asp.net");
    }

    #[test]
    fn non_blank_names_never_normalize_to_empty() {
        for name in [".NET", "@", "@/", "==1.0", "."] {
            assert!(!normalize_framework_name(name).is_empty(), "{name:?}");
        }
        assert_eq!(normalize_framework_name("  "), "");
        assert_eq!(normalize_framework_name("\"\""), "");
    }
}
