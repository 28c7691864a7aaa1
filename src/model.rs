//! Records passed between pipeline stages

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One product concept produced by the ideas stage.
///
/// Serialized with the keys the ideas prompt asks for; plain snake_case aliases are
/// accepted on input and any other keys the model returned are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idea {
    #[serde(rename = "Product Idea", alias = "title", alias = "Idea", default)]
    pub title: String,
    #[serde(
        rename = "Problem it solves",
        alias = "description",
        alias = "Details",
        default
    )]
    pub description: String,
    #[serde(
        rename = "Software Techstack",
        alias = "techstack",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub techstack: Vec<String>,
    #[serde(
        rename = "Target hardware expectations",
        alias = "hardware",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub hardware: Vec<String>,
    #[serde(
        rename = "Company profile",
        alias = "company_profile",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub company_profile: Option<String>,
    #[serde(
        rename = "Engineering profile",
        alias = "engineering_profile",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub engineering_profile: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Idea {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            techstack: Vec::new(),
            hardware: Vec::new(),
            company_profile: None,
            engineering_profile: None,
            extra: Map::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty()
    }

    /// Text block substituted for `{THE_IDEA}` in the requirements prompt
    pub fn describe(&self) -> String {
        let mut out = format!(
            "Product Idea: {}\nProblem it solves: {}",
            self.title.trim(),
            self.description.trim()
        );
        if !self.techstack.is_empty() {
            out.push_str(&format!("\nSoftware Techstack: {}", self.techstack.join(", ")));
        }
        if !self.hardware.is_empty() {
            out.push_str(&format!("\nTarget hardware: {}", self.hardware.join(", ")));
        }
        if let Some(company) = &self.company_profile {
            out.push_str(&format!("\nCompany profile: {}", company));
        }
        if let Some(engineering) = &self.engineering_profile {
            out.push_str(&format!("\nEngineering profile: {}", engineering));
        }
        out
    }
}

/// What a dependency mention refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MentionKind {
    Framework,
    /// A pretrained model identifier (`from_pretrained`, `load_model`, `torch.hub.load` targets)
    Model,
}

/// A framework or model name extracted from one code artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyMention {
    pub kind: MentionKind,
    pub name: String,
    /// Slug of the code artifact the name was extracted from
    pub source: String,
}

impl DependencyMention {
    pub fn framework(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            kind: MentionKind::Framework,
            name: name.into(),
            source: source.into(),
        }
    }

    pub fn model(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            kind: MentionKind::Model,
            name: name.into(),
            source: source.into(),
        }
    }
}

/// Dependencies named in one code artifact, as parsed from the extraction reply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyList {
    pub frameworks: Vec<String>,
    pub models: Vec<String>,
}

impl DependencyList {
    pub fn new(frameworks: Vec<String>, models: Vec<String>) -> Self {
        Self { frameworks, models }
    }

    /// Tag every name with the artifact it came from
    pub fn into_mentions(self, source: &str) -> Vec<DependencyMention> {
        self.frameworks
            .into_iter()
            .map(|name| DependencyMention::framework(name, source))
            .chain(
                self.models
                    .into_iter()
                    .map(|name| DependencyMention::model(name, source)),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idea_reads_original_keys_and_keeps_extras() {
        let raw = serde_json::json!({
            "Product Idea": "AI Assistant",
            "Problem it solves": "Task automation",
            "Software Techstack": ["Python", "FastAPI"],
            "Target hardware expectations": ["Cloud servers"],
            "Company profile": "SaaS",
            "Engineering profile": "Backend developers",
            "Market": "SMB"
        });
        let idea: Idea = serde_json::from_value(raw).unwrap();
        assert_eq!(idea.title, "AI Assistant");
        assert_eq!(idea.techstack, vec!["Python", "FastAPI"]);
        assert_eq!(idea.extra.get("Market").unwrap(), "SMB");

        let back = serde_json::to_value(&idea).unwrap();
        assert_eq!(back["Product Idea"], "AI Assistant");
        assert_eq!(back["Market"], "SMB");
    }

    #[test]
    fn idea_accepts_plain_aliases() {
        let idea: Idea =
            serde_json::from_str(r#"{"title": "Smart Analytics", "description": "Insights"}"#)
                .unwrap();
        assert_eq!(idea.title, "Smart Analytics");
        assert_eq!(idea.description, "Insights");
        assert!(idea.is_valid());
    }

    #[test]
    fn describe_lists_available_fields() {
        let mut idea = Idea::new("Test Product", "Test Problem");
        idea.techstack = vec!["Python".into(), "React".into()];
        let text = idea.describe();
        assert!(text.starts_with("Product Idea: Test Product\nProblem it solves: Test Problem"));
        assert!(text.contains("Software Techstack: Python, React"));
        assert!(!text.contains("Company profile"));
    }

    #[test]
    fn dependency_list_tags_mentions_by_kind() {
        let list = DependencyList::new(vec!["torch".into()], vec!["bert-base-uncased".into()]);
        let mentions = list.into_mentions("vision_app");
        assert_eq!(
            mentions,
            vec![
                DependencyMention::framework("torch", "vision_app"),
                DependencyMention::model("bert-base-uncased", "vision_app"),
            ]
        );
    }
}
