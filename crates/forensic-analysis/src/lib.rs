mod analyzer;
mod miner;
mod recorder;
mod resolver;

pub use analyzer::{
    AnalysisError, FileStatisticsEntry, ForensicsAnalyzer, MiningOutcome, RecordOutcome,
    ResolveOutcome, RunOutcome, StatisticsReport,
};
pub use miner::{MiningRun, RepositoryStatisticsMiner};
pub use recorder::{BuildCommitRecorder, BuildHead, resolve_build_head};
pub use resolver::{HistoryEntry, ReferenceResolver, ReferenceSearchOptions};
