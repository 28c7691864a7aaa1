//! Sequences the four stages over one working directory
//!
//! Stages run strictly one after another. Starting later than `ideas` loads the earlier
//! stages' files instead of regenerating them; a stage with zero successes ends the run.
//! Cancellation is honoured between stages; once the dependency stage has settled the run
//! completes with whatever it recorded.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::{Aggregator, DependencyReport};
use crate::clients::LlmClient;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::interpreter::Interpreter;
use crate::model::Idea;
use crate::pipeline::runner::{StageOutcome, StageSummary, TaskFailure, WorkItem, run_stage};
use crate::pipeline::Stage;
use crate::prompts::PromptSet;
use crate::store::{FileStore, assign_slugs, slugify};

const NOT_FOUND: &str = "not found";
const NO_IDEAS: &str = "contains no ideas";

/// An idea with its run-unique slug
#[derive(Debug, Clone)]
pub struct SluggedIdea {
    pub slug: String,
    pub idea: Idea,
}

/// Text artifact (requirement or code) addressed by slug
#[derive(Debug, Clone)]
pub struct Artifact {
    pub slug: String,
    pub text: String,
}

impl WorkItem for SluggedIdea {
    fn label(&self) -> String {
        self.slug.clone()
    }
}

impl WorkItem for Artifact {
    fn label(&self) -> String {
        self.slug.clone()
    }
}

/// Summary of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub model: String,
    pub root: PathBuf,
    pub start: Stage,
    pub stages: Vec<StageSummary>,
    pub report: DependencyReport,
}

pub struct Coordinator {
    store: FileStore,
    interpreter: Arc<Interpreter>,
    settings: PipelineConfig,
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn new(
        store: FileStore,
        interpreter: Arc<Interpreter>,
        settings: PipelineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            interpreter,
            settings,
            cancel,
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Run from `start` through the dependency stage
    pub async fn run(&self, start: Stage) -> Result<RunReport> {
        info!(
            "Pipeline starting at {} stage in {} (model {})",
            start,
            self.store.root().display(),
            self.interpreter.model()
        );
        tokio::fs::create_dir_all(self.store.root()).await?;

        let mut stages = Vec::new();
        let mut ideas: Option<Vec<SluggedIdea>> = None;
        let mut requirements: Option<Vec<Artifact>> = None;
        let mut code: Option<Vec<Artifact>> = None;
        let mut report = DependencyReport::default();

        for stage in start.from_here() {
            if self.cancel.is_cancelled() {
                warn!("Cancellation requested; not starting {} stage", stage);
                return Err(PipelineError::Cancelled);
            }

            let summary = match stage {
                Stage::Ideas => {
                    let (summary, produced) = self.ideas_stage().await?;
                    ideas = Some(produced);
                    summary
                }
                Stage::Requirements => {
                    let input = match ideas.take() {
                        Some(ideas) => ideas,
                        None => self.load_ideas(stage).await?,
                    };
                    let (summary, produced) = self.requirements_stage(input).await?;
                    requirements = Some(produced);
                    summary
                }
                Stage::Code => {
                    let (input, missing) = match requirements.take() {
                        Some(docs) => (docs, Vec::new()),
                        None => self.load_artifacts(stage).await?,
                    };
                    let (summary, produced) = self.code_stage(input, missing).await?;
                    code = Some(produced);
                    summary
                }
                Stage::Dependencies => {
                    let (input, missing) = match code.take() {
                        Some(docs) => (docs, Vec::new()),
                        None => self.load_artifacts(stage).await?,
                    };
                    let (summary, merged) = self.dependencies_stage(input, missing).await?;
                    report = merged;
                    summary
                }
            };

            stages.push(summary);
        }

        info!("Pipeline finished in {}", self.store.root().display());
        Ok(RunReport {
            model: self.interpreter.model().to_string(),
            root: self.store.root().to_path_buf(),
            start,
            stages,
            report,
        })
    }

    async fn ideas_stage(&self) -> Result<(StageSummary, Vec<SluggedIdea>)> {
        let interpreter = Arc::clone(&self.interpreter);
        let wanted = self.settings.num_ideas;
        let outcome = run_stage(
            Stage::Ideas,
            vec!["ideas".to_string()],
            move |_| {
                let interpreter = Arc::clone(&interpreter);
                async move { interpreter.generate_ideas(wanted).await }
            },
            1,
            &self.cancel,
        )
        .await;
        let summary = settle(&outcome, Vec::new())?;

        let ideas: Vec<Idea> = outcome.values().flat_map(|batch| batch.ideas).collect();
        let path = self.store.save_ideas(&ideas).await?;
        info!("Saved {} idea(s) to {}", ideas.len(), path.display());
        Ok((summary, slug_ideas(ideas)))
    }

    async fn requirements_stage(
        &self,
        ideas: Vec<SluggedIdea>,
    ) -> Result<(StageSummary, Vec<Artifact>)> {
        let interpreter = Arc::clone(&self.interpreter);
        let store = self.store.clone();
        let outcome = run_stage(
            Stage::Requirements,
            ideas,
            move |item: SluggedIdea| {
                let interpreter = Arc::clone(&interpreter);
                let store = store.clone();
                async move {
                    let text = interpreter.requirements(&item.idea).await?;
                    store.save_requirement(&item.slug, &text).await?;
                    Ok::<_, PipelineError>(Artifact {
                        slug: item.slug,
                        text,
                    })
                }
            },
            self.settings.max_parallelism,
            &self.cancel,
        )
        .await;
        let summary = settle(&outcome, Vec::new())?;
        Ok((summary, outcome.values().collect()))
    }

    async fn code_stage(
        &self,
        requirements: Vec<Artifact>,
        missing: Vec<TaskFailure>,
    ) -> Result<(StageSummary, Vec<Artifact>)> {
        let interpreter = Arc::clone(&self.interpreter);
        let store = self.store.clone();
        let outcome = run_stage(
            Stage::Code,
            requirements,
            move |item: Artifact| {
                let interpreter = Arc::clone(&interpreter);
                let store = store.clone();
                async move {
                    let text = interpreter.code(&item.text).await?;
                    store.save_code(&item.slug, &text).await?;
                    Ok::<_, PipelineError>(Artifact {
                        slug: item.slug,
                        text,
                    })
                }
            },
            self.settings.max_parallelism,
            &self.cancel,
        )
        .await;
        let summary = settle(&outcome, missing)?;
        Ok((summary, outcome.values().collect()))
    }

    async fn dependencies_stage(
        &self,
        code: Vec<Artifact>,
        missing: Vec<TaskFailure>,
    ) -> Result<(StageSummary, DependencyReport)> {
        let interpreter = Arc::clone(&self.interpreter);
        let outcome = run_stage(
            Stage::Dependencies,
            code,
            move |item: Artifact| {
                let interpreter = Arc::clone(&interpreter);
                async move {
                    let found = interpreter.dependencies(&item.text).await?;
                    Ok::<_, PipelineError>(found.into_mentions(&item.slug))
                }
            },
            self.settings.max_parallelism,
            &self.cancel,
        )
        .await;
        let summary = settle(&outcome, missing)?;

        let aggregator = Aggregator::new(self.store.load_report().await?);
        for mentions in outcome.values() {
            aggregator.record(&mentions).await;
        }
        let report = aggregator.into_report();
        let path = self.store.save_report(&report).await?;
        info!(
            "Dependency report with {} framework(s) and {} model(s) saved to {}",
            report.len(),
            report.model_len(),
            path.display()
        );
        Ok((summary, report))
    }

    /// Ideas saved by an earlier run; an absent or empty list cannot be resumed from.
    async fn load_ideas(&self, stage: Stage) -> Result<Vec<SluggedIdea>> {
        let reason = match self.store.load_ideas().await? {
            Some(ideas) if !ideas.is_empty() => {
                info!("Loaded {} idea(s) from previous run", ideas.len());
                return Ok(slug_ideas(ideas));
            }
            Some(_) => NO_IDEAS,
            None => NOT_FOUND,
        };
        Err(PipelineError::PrerequisiteMissing {
            stage,
            path: self.store.ideas_path(),
            reason,
        })
    }

    /// Previous stage's per-slug files for `stage`. Items whose file is absent come back
    /// as failures; if every item is absent the stage cannot run at all.
    async fn load_artifacts(&self, stage: Stage) -> Result<(Vec<Artifact>, Vec<TaskFailure>)> {
        let ideas = self.load_ideas(stage).await?;
        let mut present = Vec::with_capacity(ideas.len());
        let mut missing = Vec::new();
        let mut first_missing: Option<PathBuf> = None;

        for (index, item) in ideas.into_iter().enumerate() {
            let path = input_path(&self.store, stage, &item.slug);
            match self.store.read_text(&path).await? {
                Some(text) => present.push(Artifact {
                    slug: item.slug,
                    text,
                }),
                None => {
                    warn!(
                        stage = %stage,
                        item = %item.slug,
                        "Prerequisite missing: {}",
                        path.display()
                    );
                    missing.push(TaskFailure {
                        index,
                        item: item.slug,
                        error: PipelineError::PrerequisiteMissing {
                            stage,
                            path: path.clone(),
                            reason: NOT_FOUND,
                        },
                    });
                    first_missing.get_or_insert(path);
                }
            }
        }

        if present.is_empty() {
            return Err(PipelineError::PrerequisiteMissing {
                stage,
                path: first_missing.unwrap_or_else(|| self.store.ideas_path()),
                reason: NOT_FOUND,
            });
        }
        Ok((present, missing))
    }
}

/// Per-item file that `stage` reads when resuming
fn input_path(store: &FileStore, stage: Stage, slug: &str) -> PathBuf {
    match stage {
        Stage::Dependencies => store.code_path(slug),
        _ => store.requirement_path(slug),
    }
}

fn slug_ideas(ideas: Vec<Idea>) -> Vec<SluggedIdea> {
    let slugs = assign_slugs(&ideas);
    slugs
        .into_iter()
        .zip(ideas)
        .map(|(slug, idea)| SluggedIdea { slug, idea })
        .collect()
}

/// Stage summary including items that could not be dispatched; zero successes is fatal.
fn settle<T>(outcome: &StageOutcome<T>, missing: Vec<TaskFailure>) -> Result<StageSummary> {
    let mut summary = outcome.summary();
    if !missing.is_empty() {
        summary.total += missing.len();
        summary.failed += missing.len();
        summary
            .failures
            .extend(missing.iter().map(TaskFailure::describe));
    }

    if summary.failed > 0 && summary.succeeded > 0 {
        warn!(
            "{} stage partially failed: {}/{} item(s) succeeded",
            outcome.stage, summary.succeeded, summary.total
        );
    }
    if outcome.is_total_failure() {
        if outcome
            .failures
            .iter()
            .all(|f| matches!(f.error, PipelineError::Cancelled))
        {
            return Err(PipelineError::Cancelled);
        }
        return Err(PipelineError::TotalBatchFailure {
            stage: outcome.stage,
            failures: summary.failures,
        });
    }
    Ok(summary)
}

/// One model's output directory and LLM client
pub struct Target {
    pub model: String,
    pub client: Arc<dyn LlmClient>,
}

#[derive(Debug)]
pub enum TargetOutcome {
    Completed(RunReport),
    Failed(PipelineError),
    Skipped { reason: String },
}

#[derive(Debug)]
pub struct TargetRun {
    pub model: String,
    pub outcome: TargetOutcome,
}

/// Run each target in its own `<root>/<model slug>/` directory, one after another.
///
/// When resuming past the ideas stage a target with nothing to resume from (no ideas, or
/// none of the files `start` reads) is skipped with a warning rather than failing the
/// whole run.
pub async fn run_targets(
    root: &FileStore,
    targets: Vec<Target>,
    prompts: Arc<PromptSet>,
    settings: &PipelineConfig,
    start: Stage,
    cancel: &CancellationToken,
) -> Vec<TargetRun> {
    let mut runs = Vec::with_capacity(targets.len());

    for target in targets {
        if cancel.is_cancelled() {
            runs.push(TargetRun {
                model: target.model,
                outcome: TargetOutcome::Failed(PipelineError::Cancelled),
            });
            continue;
        }

        let store = root.nested(&slugify(&target.model));
        if let Some(reason) = resume_blocker(&store, start).await {
            warn!("Skipping model {}: {}", target.model, reason);
            runs.push(TargetRun {
                model: target.model,
                outcome: TargetOutcome::Skipped { reason },
            });
            continue;
        }

        let interpreter = Arc::new(Interpreter::new(
            target.client,
            Arc::clone(&prompts),
            settings.retry_budget,
        ));
        let coordinator = Coordinator::new(store, interpreter, settings.clone(), cancel.clone());
        let outcome = match coordinator.run(start).await {
            Ok(report) => TargetOutcome::Completed(report),
            Err(e) => {
                warn!("Model {} failed ({}): {}", target.model, e.kind(), e);
                TargetOutcome::Failed(e)
            }
        };
        runs.push(TargetRun {
            model: target.model,
            outcome,
        });
    }
    runs
}

/// Why `store` has nothing for a run starting at `start`, if so. Unreadable files are left
/// for the run itself to report.
async fn resume_blocker(store: &FileStore, start: Stage) -> Option<String> {
    if start == Stage::Ideas {
        return None;
    }
    let ideas = match store.load_ideas().await {
        Ok(Some(ideas)) if !ideas.is_empty() => ideas,
        Ok(Some(_)) => return Some(format!("{} {}", store.ideas_path().display(), NO_IDEAS)),
        Ok(None) => return Some(format!("no {} to resume from", store.ideas_path().display())),
        Err(_) => return None,
    };
    if start == Stage::Requirements {
        return None;
    }

    for slug in assign_slugs(&ideas) {
        let path = input_path(store, start, &slug);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return None;
        }
    }
    let previous = start.prerequisite().unwrap_or(Stage::Ideas);
    Some(format!(
        "no {} output under {} to resume from",
        previous,
        store.root().display()
    ))
}
