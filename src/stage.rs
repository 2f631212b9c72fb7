use std::time::{Duration, Instant};

use thiserror::Error;

use crate::{model::ModelError, script::ExecutionError};

/// Why a model-driven stage (plan, compile, correct) produced nothing.
///
/// Execution failures stay distinct from model failures so callers can tell
/// "could not build a candidate table" apart from "the model did not answer".
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{stage}: {source}")]
    Model {
        stage: &'static str,
        #[source]
        source: ModelError,
    },
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("{stage} exceeded its {limit:?} time limit after {elapsed:?}")]
    Deadline {
        stage: &'static str,
        limit: Duration,
        elapsed: Duration,
    },
}

/// Bounds the wall-clock time of one stage. Checked before every prompt.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    stage: &'static str,
    started: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn start(stage: &'static str, limit: Option<Duration>) -> Self {
        Self {
            stage,
            started: Instant::now(),
            limit,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn check(&self) -> Result<(), StageError> {
        let elapsed = self.started.elapsed();
        match self.limit {
            Some(limit) if elapsed > limit => Err(StageError::Deadline {
                stage: self.stage,
                limit,
                elapsed,
            }),
            _ => Ok(()),
        }
    }

    pub fn model_error(&self, source: ModelError) -> StageError {
        StageError::Model {
            stage: self.stage,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_trips_only_past_its_limit() {
        assert!(Deadline::start("plan", None).check().is_ok());
        assert!(Deadline::start("plan", Some(Duration::from_secs(60))).check().is_ok());
        let expired = Deadline::start("compile", Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));
        assert!(matches!(
            expired.check(),
            Err(StageError::Deadline { stage: "compile", .. })
        ));
    }
}
