pub mod duplicates;

pub use duplicates::{
    summarize, DuplicateAnalyzer, DuplicateGroup, DuplicateSummary, MatchKind, SafetyClass,
    VolumeRole,
};
