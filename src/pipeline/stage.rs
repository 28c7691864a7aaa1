use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// The four pipeline phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ideas = 1,
    Requirements = 2,
    Code = 3,
    Dependencies = 4,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Ideas,
        Stage::Requirements,
        Stage::Code,
        Stage::Dependencies,
    ];

    /// 1-based position, as accepted by `--start-step`
    pub fn index(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Ideas => "ideas",
            Stage::Requirements => "requirements",
            Stage::Code => "code",
            Stage::Dependencies => "dependencies",
        }
    }

    /// Stage whose persisted output this stage consumes
    pub fn prerequisite(&self) -> Option<Stage> {
        match self {
            Stage::Ideas => None,
            Stage::Requirements => Some(Stage::Ideas),
            Stage::Code => Some(Stage::Requirements),
            Stage::Dependencies => Some(Stage::Code),
        }
    }

    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Ideas => Some(Stage::Requirements),
            Stage::Requirements => Some(Stage::Code),
            Stage::Code => Some(Stage::Dependencies),
            Stage::Dependencies => None,
        }
    }

    /// This stage and every later one
    pub fn from_here(self) -> impl Iterator<Item = Stage> {
        Stage::ALL.into_iter().filter(move |s| *s >= self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "ideas" => Ok(Stage::Ideas),
            "2" | "requirements" => Ok(Stage::Requirements),
            "3" | "code" => Ok(Stage::Code),
            "4" | "dependencies" => Ok(Stage::Dependencies),
            other => Err(PipelineError::Config {
                message: format!(
                    "Unknown stage '{}': expected 1-4 or ideas, requirements, code, dependencies",
                    other
                ),
            }),
        }
    }
}
