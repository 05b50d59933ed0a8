// Combined analysis pipeline.
// Phase 1 resolves both embeddings, phase 2 scores them and the keywords,
// phase 3 asks the narrative generator for a gap analysis.
// All provider calls go through the pool and the retry strategy.

pub mod gap;
pub mod handlers;
pub mod orchestrator;
pub mod result;

pub use orchestrator::{AnalysisOptions, MatchEngine};
pub use result::PipelineResult;
