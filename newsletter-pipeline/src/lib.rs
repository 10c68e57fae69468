pub mod types;
pub mod config;
pub mod utils;
pub mod session;
pub mod fetcher;
pub mod extract;
pub mod traits;
pub mod links;
pub mod instructions;
pub mod resolver;
pub mod style;
pub mod prompt;
pub mod llm_adapter;
pub mod orchestrator;
pub mod assembler;
pub mod publish;
pub mod pipeline;

pub use types::*;
pub use config::NewsletterConfig;
pub use fetcher::Fetcher;
pub use extract::Extractor;
pub use session::SessionCache;
pub use resolver::resolve;
pub use instructions::{parse_instruction_plan, parse_instructions, InstructionPlan};
pub use style::StyleGuide;
pub use llm_adapter::{Backend, BackendChain};
pub use orchestrator::Orchestrator;
pub use assembler::Assembler;
pub use publish::GoogleDocsPublisher;
pub use traits::{DocumentPublisher, PublishedDocument, TextRecognizer};
pub use pipeline::{NewsletterPipeline, RunReport, RunRequest};
