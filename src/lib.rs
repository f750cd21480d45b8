//! Translates the text of Office Open XML packages (`.xlsx`, `.docx`) through an
//! OpenAI-compatible chat endpoint while leaving every other byte of the package alone.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod ffi;
pub mod ooxml;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod textutil;

pub use engine::{LlmEngine, TranslationCache, TranslationEngine};
pub use error::{ErrorKind, Result, TranslateError};
pub use events::{EventSink, Stage, TranslateEvent};
pub use orchestrator::BatchTranslator;
pub use pipeline::{PipelineConfig, Translator};
