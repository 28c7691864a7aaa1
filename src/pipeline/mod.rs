//! Stage sequencing and bounded-concurrency execution

pub mod coordinator;
pub mod runner;
pub mod stage;

pub use coordinator::{
    Artifact, Coordinator, RunReport, SluggedIdea, Target, TargetOutcome, TargetRun, run_targets,
};
pub use runner::{StageOutcome, StageSummary, TaskFailure, TaskSuccess, WorkItem, run_stage};
pub use stage::Stage;
