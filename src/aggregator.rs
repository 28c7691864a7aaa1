//! Framework and model frequency tables across code artifacts

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::Mutex;

use crate::interpreter::{normalize_framework_name, normalize_model_name};
use crate::model::{DependencyMention, MentionKind};

/// Normalized name → number of artifacts that mention it, kept separately for
/// frameworks and pretrained models
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyReport {
    frameworks: BTreeMap<String, u64>,
    models: BTreeMap<String, u64>,
}

#[derive(Serialize, Deserialize)]
struct NamedCount {
    name: String,
    count: u64,
}

#[derive(Serialize, Deserialize)]
struct ReportFile {
    #[serde(default)]
    frameworks: Vec<NamedCount>,
    #[serde(default)]
    models: Vec<NamedCount>,
}

fn bump(table: &mut BTreeMap<String, u64>, name: &str, n: u64) {
    if n == 0 || name.is_empty() {
        return;
    }
    *table.entry(name.to_string()).or_insert(0) += n;
}

/// Entries by descending count, ties broken by name
fn rank(table: &BTreeMap<String, u64>) -> Vec<(&str, u64)> {
    let mut entries: Vec<(&str, u64)> = table
        .iter()
        .map(|(name, count)| (name.as_str(), *count))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    entries
}

fn to_file_entries(table: &BTreeMap<String, u64>) -> Vec<NamedCount> {
    rank(table)
        .into_iter()
        .map(|(name, count)| NamedCount {
            name: name.to_string(),
            count,
        })
        .collect()
}

impl DependencyReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, name: &str) -> u64 {
        self.frameworks.get(name).copied().unwrap_or(0)
    }

    pub fn model_count(&self, name: &str) -> u64 {
        self.models.get(name).copied().unwrap_or(0)
    }

    /// Number of distinct frameworks
    pub fn len(&self) -> usize {
        self.frameworks.len()
    }

    pub fn model_len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frameworks.is_empty() && self.models.is_empty()
    }

    /// Add `n` to the framework entry for `name` (already normalized)
    pub fn increment(&mut self, name: &str, n: u64) {
        bump(&mut self.frameworks, name, n);
    }

    pub fn increment_model(&mut self, name: &str, n: u64) {
        bump(&mut self.models, name, n);
    }

    /// Frameworks by descending count, ties broken by name
    pub fn ranked(&self) -> Vec<(&str, u64)> {
        rank(&self.frameworks)
    }

    pub fn ranked_models(&self) -> Vec<(&str, u64)> {
        rank(&self.models)
    }

    pub fn top(&self, n: usize) -> Vec<(&str, u64)> {
        let mut ranked = self.ranked();
        ranked.truncate(n);
        ranked
    }

    pub fn top_models(&self, n: usize) -> Vec<(&str, u64)> {
        let mut ranked = self.ranked_models();
        ranked.truncate(n);
        ranked
    }
}

impl Serialize for DependencyReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        ReportFile {
            frameworks: to_file_entries(&self.frameworks),
            models: to_file_entries(&self.models),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DependencyReport {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let file = ReportFile::deserialize(deserializer)?;
        let mut report = DependencyReport::new();
        // Hand-edited files may repeat a name or use a different spelling
        for entry in file.frameworks {
            report.increment(&normalize_framework_name(&entry.name), entry.count);
        }
        for entry in file.models {
            report.increment_model(&normalize_model_name(&entry.name), entry.count);
        }
        Ok(report)
    }
}

/// Fold `mentions` into `existing`. Each normalized name counts once per source artifact
/// and kind, so the result depends only on the set of (artifact, kind, name) triples, not
/// on arrival order.
pub fn aggregate(mut existing: DependencyReport, mentions: &[DependencyMention]) -> DependencyReport {
    let mut seen: HashSet<(&str, MentionKind, String)> = HashSet::new();
    for mention in mentions {
        let name = match mention.kind {
            MentionKind::Framework => normalize_framework_name(&mention.name),
            MentionKind::Model => normalize_model_name(&mention.name),
        };
        if name.is_empty() {
            continue;
        }
        if seen.insert((mention.source.as_str(), mention.kind, name.clone())) {
            match mention.kind {
                MentionKind::Framework => existing.increment(&name, 1),
                MentionKind::Model => existing.increment_model(&name, 1),
            }
        }
    }
    existing
}

/// Shared report with serialized read-modify-write access
#[derive(Debug, Default)]
pub struct Aggregator {
    report: Mutex<DependencyReport>,
}

impl Aggregator {
    pub fn new(existing: DependencyReport) -> Self {
        Self {
            report: Mutex::new(existing),
        }
    }

    /// Fold one artifact's (or one batch's) mentions into the report
    pub async fn record(&self, mentions: &[DependencyMention]) {
        let mut report = self.report.lock().await;
        let current = std::mem::take(&mut *report);
        *report = aggregate(current, mentions);
    }

    pub async fn snapshot(&self) -> DependencyReport {
        self.report.lock().await.clone()
    }

    pub fn into_report(self) -> DependencyReport {
        self.report.into_inner()
    }
}
