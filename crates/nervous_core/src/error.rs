use thiserror::Error;

use crate::ids::{AntId, AntigenId, HyphaId, NeuronId, ReflexArcId, TrailId};

/// Errors raised by fabric operations.
///
/// None of these are fatal to the host: callers either surface them to the
/// requester or log them and degrade the health score.
#[derive(Debug, Error)]
pub enum FabricError {
    #[error("unknown neuron: {0}")]
    UnknownNeuron(NeuronId),

    #[error("unknown hypha: {0}")]
    UnknownHypha(HyphaId),

    #[error("unknown antigen: {0}")]
    UnknownAntigen(AntigenId),

    #[error("unknown ant: {0}")]
    UnknownAnt(AntId),

    #[error("unknown pheromone trail: {0}")]
    UnknownTrail(TrailId),

    #[error("unknown reflex arc: {0}")]
    UnknownReflexArc(ReflexArcId),

    #[error("no antibody with effectiveness >= {min_effectiveness} binds signature {signature}")]
    NoEffectiveAntibody {
        signature: String,
        min_effectiveness: f64,
    },

    #[error("malformed event {id:?}: {reason}")]
    MalformedEvent { id: String, reason: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("hypha {0} cannot list itself as an alternative path")]
    SelfAlternative(HyphaId),

    #[error("corrupt record {record}: {reason}")]
    CorruptRecord { record: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type FabricResult<T> = Result<T, FabricError>;
