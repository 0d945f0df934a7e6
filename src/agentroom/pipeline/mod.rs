//! Request pipeline: memory, planning, discussion, synthesis and graph updates in one pass.

pub mod executor;
pub mod fact_extractor;
pub mod stage;
pub mod synthesizer;

pub use executor::{PipelineError, PipelineExecutor};
pub use fact_extractor::FactExtractor;
pub use stage::{Fact, PipelineStage, TaskState};
pub use synthesizer::SolutionSynthesizer;
