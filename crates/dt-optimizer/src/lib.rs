//! # dt-optimizer
//!
//! Search space definitions, seeded sampling strategies (random, grid) and
//! trial / study bookkeeping for DetTune hyperparameter studies.

mod search;
mod trial;

pub use search::{
    GridSearch, ParameterDef, ParameterKind, ParameterSample, ParameterValue, RandomSearch,
    SearchSpace, SearchStrategy,
};
pub use trial::{
    ObjectiveDirection, StudyId, StudyState, StudyStatus, Trial, TrialResult, TrialStatus,
};
