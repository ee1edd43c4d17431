//! Enrichment pipeline
//!
//! Prompt construction, response decoding and the batch orchestrator that
//! ties the catalog, the rate-limited client and the durable store together.

mod orchestrator;
mod parser;
mod prompts;
mod report;
mod task;

pub use orchestrator::{EnrichOptions, Orchestrator};
pub use parser::{MalformedResponse, extract_json_array, parse_json_array};
pub use prompts::build_prompt;
pub use report::{PhaseReport, RecordCounts, RunReport};
pub use task::{ChunkKeys, ParsedOutput, parse_task_output};
