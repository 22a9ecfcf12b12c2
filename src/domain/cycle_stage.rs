//! Per-cycle stage machine
//!
//! `Idle → Detecting → (Idle | Crawling) → Dispatching → Reconciling → Committing → Idle`
//!
//! Crawling and dispatching overlap in time; the machine records the point at
//! which crawling has finished and only outstanding classification calls remain.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

use super::errors::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleStage {
    Idle,
    Detecting,
    Crawling,
    Dispatching,
    Reconciling,
    Committing,
}

impl CycleStage {
    /// Whether `self → next` is a legal transition
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Detecting)
                | (Self::Detecting, Self::Idle | Self::Crawling)
                | (Self::Crawling, Self::Dispatching)
                | (Self::Dispatching, Self::Reconciling)
                | (Self::Reconciling, Self::Committing)
                | (Self::Committing, Self::Idle)
        )
    }
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "IDLE",
            Self::Detecting => "DETECTING",
            Self::Crawling => "CRAWLING",
            Self::Dispatching => "DISPATCHING",
            Self::Reconciling => "RECONCILING",
            Self::Committing => "COMMITTING",
        };
        f.write_str(name)
    }
}

/// Tracks the current stage of one cycle and the time spent in each
#[derive(Debug)]
pub struct CycleStateMachine {
    stage: CycleStage,
    entered_at: Instant,
    history: Vec<(CycleStage, Duration)>,
}

impl Default for CycleStateMachine {
    fn default() -> Self {
        Self {
            stage: CycleStage::Idle,
            entered_at: Instant::now(),
            history: Vec::new(),
        }
    }
}

impl CycleStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn stage(&self) -> CycleStage {
        self.stage
    }

    pub fn advance(&mut self, next: CycleStage) -> Result<(), DomainError> {
        if !self.stage.can_advance_to(next) {
            return Err(DomainError::IllegalTransition {
                from: self.stage,
                to: next,
            });
        }
        let spent = self.entered_at.elapsed();
        debug!("Cycle stage {} -> {} ({:?} in {})", self.stage, next, spent, self.stage);
        self.history.push((self.stage, spent));
        self.stage = next;
        self.entered_at = Instant::now();
        Ok(())
    }

    /// Stages left so far, with the time spent in each
    pub fn history(&self) -> &[(CycleStage, Duration)] {
        &self.history
    }
}
