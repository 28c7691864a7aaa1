//! On-disk layout of one run's working directory
//!
//! ```text
//! <root>/
//!   ideas.json
//!   requirements/requirements_<slug>.txt
//!   code/<slug>.txt
//!   dependencies.json
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

use crate::aggregator::DependencyReport;
use crate::error::Result;
use crate::model::Idea;

const REQUIREMENTS_DIR: &str = "requirements";
const CODE_DIR: &str = "code";

/// Filesystem-safe form of a title: ASCII lowercase, runs of anything else collapsed to `_`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_sep = false;
    for ch in title.nfkd() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(ch.to_ascii_lowercase());
        } else if !ch.is_ascii() && !ch.is_alphanumeric() {
            // combining marks left over from decomposition ("é" -> "e" + U+0301)
            continue;
        } else {
            pending_sep = true;
        }
    }
    if slug.is_empty() {
        slug.push_str("idea");
    }
    slug
}

/// One slug per idea, in order; repeated slugs get `_2`, `_3`, ... in order of appearance.
pub fn assign_slugs(ideas: &[Idea]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut taken: HashSet<String> = HashSet::new();
    let mut slugs = Vec::with_capacity(ideas.len());

    for idea in ideas {
        let base = slugify(&idea.title);
        let counter = seen.entry(base.clone()).or_insert(0);
        let mut slug = base.clone();
        while taken.contains(&slug) {
            *counter += 1;
            slug = format!("{}_{}", base, *counter + 1);
        }
        taken.insert(slug.clone());
        slugs.push(slug);
    }
    slugs
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    ideas_filename: String,
    dependencies_filename: String,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ideas_filename: "ideas.json".to_string(),
            dependencies_filename: "dependencies.json".to_string(),
        }
    }

    pub fn with_filenames(mut self, ideas: impl Into<String>, dependencies: impl Into<String>) -> Self {
        self.ideas_filename = ideas.into();
        self.dependencies_filename = dependencies.into();
        self
    }

    /// Store for a nested sub-target (e.g. one model) below this root
    pub fn nested(&self, name: &str) -> Self {
        Self {
            root: self.root.join(name),
            ideas_filename: self.ideas_filename.clone(),
            dependencies_filename: self.dependencies_filename.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ideas_path(&self) -> PathBuf {
        self.root.join(&self.ideas_filename)
    }

    pub fn dependencies_path(&self) -> PathBuf {
        self.root.join(&self.dependencies_filename)
    }

    pub fn requirement_path(&self, slug: &str) -> PathBuf {
        self.root
            .join(REQUIREMENTS_DIR)
            .join(format!("requirements_{}.txt", slug))
    }

    pub fn code_path(&self, slug: &str) -> PathBuf {
        self.root.join(CODE_DIR).join(format!("{}.txt", slug))
    }

    /// `Ok(None)` when the file does not exist
    pub async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_text(&self, path: &Path) -> Result<Option<String>> {
        Ok(self
            .read(path)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Write `bytes`, creating parent directories as needed
    pub async fn write(&self, path: &Path, bytes: impl AsRef<[u8]>) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }

    pub async fn load_ideas(&self) -> Result<Option<Vec<Idea>>> {
        match self.read(&self.ideas_path()).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn save_ideas(&self, ideas: &[Idea]) -> Result<PathBuf> {
        let path = self.ideas_path();
        self.write(&path, serde_json::to_vec_pretty(ideas)?).await?;
        Ok(path)
    }

    pub async fn save_requirement(&self, slug: &str, text: &str) -> Result<PathBuf> {
        let path = self.requirement_path(slug);
        self.write(&path, text).await?;
        Ok(path)
    }

    pub async fn save_code(&self, slug: &str, text: &str) -> Result<PathBuf> {
        let path = self.code_path(slug);
        self.write(&path, text).await?;
        Ok(path)
    }

    /// Existing report, or an empty one when no report has been written yet
    pub async fn load_report(&self) -> Result<DependencyReport> {
        match self.read(&self.dependencies_path()).await? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(DependencyReport::default()),
        }
    }

    pub async fn save_report(&self, report: &DependencyReport) -> Result<PathBuf> {
        let path = self.dependencies_path();
        self.write(&path, serde_json::to_vec_pretty(report)?).await?;
        Ok(path)
    }
}
