mod config;
mod document;
mod translator;

pub use config::{init_default_config, Overrides, PipelineConfig, DEFAULT_PROMPT};
pub use document::{DocumentKind, DocumentPipeline, DocumentState};
pub use translator::{DocumentOutcome, Translator};
