//! Domain error types

use thiserror::Error;

use super::cycle_stage::CycleStage;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid item identifier: '{0}'")]
    InvalidItemId(String),

    #[error("Unknown listing section: '{0}'")]
    UnknownSection(String),

    #[error("Illegal cycle transition: {from} -> {to}")]
    IllegalTransition { from: CycleStage, to: CycleStage },
}
