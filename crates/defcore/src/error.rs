use thiserror::Error;

use crate::def::DefId;

/// Host-level failures that cannot be represented as a node in the graph itself.
///
/// These are distinct from the in-graph `Error(expected_type)` node produced by
/// builder calls that hit a typing or substructural violation (see [`crate::def::Tag::Error`]):
/// a builder call that violates a *typing* rule still returns `Ok(DefId)`, pointing at the
/// canonical error node, because such values must keep flowing through further builder
/// calls. A `DefError` means the call could not even produce a node to poison.
#[derive(Debug, Error)]
pub enum DefError {
    #[error("operand slot {index} out of range for nominal def {def:?} (has {len} slots)")]
    SlotOutOfRange { def: DefId, index: usize, len: usize },

    #[error("operand slot {index} of nominal def {def:?} was already set")]
    SlotAlreadySet { def: DefId, index: usize },

    #[error("nominal def {def:?} was sealed with {set} of {expected} slots filled")]
    IncompleteSeal { def: DefId, set: usize, expected: usize },

    #[error("def {0:?} is not nominal and has no settable slots")]
    NotNominal(DefId),

    #[error("def {0:?} does not belong to this world")]
    UnknownDef(DefId),

    #[error("expected a def tagged {expected}, found {found}")]
    WrongTag { expected: &'static str, found: &'static str },

    #[error("recursive allocation attempted while an allocation was already in progress")]
    ReentrantAllocation,

    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

/// Convenience alias used throughout the crate for host-level fallible operations.
pub type DefResult<T> = Result<T, DefError>;
