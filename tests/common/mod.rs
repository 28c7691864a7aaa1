//! Scripted in-memory LLM client shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use llm_coding_analysis::clients::{ChatMessage, LlmClient, LlmError, Role};

type Responder = Box<dyn Fn(&str, &[ChatMessage]) -> Result<String, LlmError> + Send + Sync>;

pub struct ScriptedClient {
    model: String,
    responder: Responder,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    /// Replies computed from the prompt and history of each call
    pub fn new(
        model: &str,
        responder: impl Fn(&str, &[ChatMessage]) -> Result<String, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            model: model.to_string(),
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Replies handed out in order; once exhausted every call is a transport error
    pub fn sequence<S: Into<String>>(replies: Vec<S>) -> Self {
        let queue: Mutex<VecDeque<String>> =
            Mutex::new(replies.into_iter().map(Into::into).collect());
        Self::new("scripted/model", move |_, _| {
            queue
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| LlmError::Transport("script exhausted".into()))
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn send(&self, prompt: &str, history: &[ChatMessage]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        (self.responder)(prompt, history)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// JSON array of `n` ideas titled `<prefix> 1`, `<prefix> 2`, ...
pub fn ideas_json(prefix: &str, n: usize) -> String {
    let items: Vec<serde_json::Value> = (1..=n)
        .map(|i| {
            serde_json::json!({
                "Product Idea": format!("{} {}", prefix, i),
                "Problem it solves": format!("Problem {}", i),
                "Software Techstack": ["Python"],
                "Target hardware expectations": ["Cloud"],
                "Company profile": "Startup",
                "Engineering profile": "Full-stack"
            })
        })
        .collect();
    serde_json::Value::Array(items).to_string()
}

/// Remainder of the first line in `text` that follows `marker`
pub fn value_after(text: &str, marker: &str) -> Option<String> {
    let start = text.find(marker)? + marker.len();
    Some(
        text[start..]
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string(),
    )
}

/// A well-behaved model: every stage answers in the right format, and each
/// artifact carries the idea title forward so the dependency reply can depend on it.
/// A format correction is answered as the request it corrects.
pub fn pipeline_responder(
    num_ideas: usize,
    frameworks_for: impl Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
) -> impl Fn(&str, &[ChatMessage]) -> Result<String, LlmError> + Send + Sync + 'static {
    move |prompt: &str, history: &[ChatMessage]| {
        let request = if prompt.contains("wrong format") {
            history
                .iter()
                .rev()
                .find(|m| m.role == Role::User && !m.content.contains("wrong format"))
                .map(|m| m.content.as_str())
                .unwrap_or(prompt)
        } else {
            prompt
        };
        route(request, history, num_ideas, &frameworks_for)
    }
}

fn route(
    prompt: &str,
    history: &[ChatMessage],
    num_ideas: usize,
    frameworks_for: &dyn Fn(&str) -> Result<String, LlmError>,
) -> Result<String, LlmError> {
    if prompt.contains("Generate ") && prompt.contains("product ideas") {
        Ok(ideas_json("Product", num_ideas))
    } else if prompt.contains("software requirements document") {
        let title = value_after(prompt, "Product Idea:").unwrap_or_default();
        Ok(format!("REQ for: {}\n- must work", title))
    } else if prompt.contains("Plan the implementation") {
        Ok("Plan: one module".to_string())
    } else if prompt.contains("Now write the complete source code") {
        let title = history
            .iter()
            .find_map(|m| value_after(&m.content, "REQ for:"))
            .unwrap_or_default();
        Ok(format!("CODE for: {}\nimport things", title))
    } else if prompt.contains("Analyze the code below") {
        let title = value_after(prompt, "CODE for:").unwrap_or_default();
        frameworks_for(&title)
    } else {
        Err(LlmError::Transport(format!("unexpected prompt: {}", prompt)))
    }
}
