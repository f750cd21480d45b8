use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{error, info, warn};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::engine::{LlmEngine, TranslationCache, TranslationEngine};
use crate::error::{ErrorKind, Result};
use crate::events::{EventSink, Stage, TranslateEvent};
use crate::ooxml::extract::{Extractor, ExtractorConfig};
use crate::orchestrator::BatchTranslator;

use super::document::{DocumentPipeline, DocumentState};
use super::PipelineConfig;

/// Result of one document in a multi-document run.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub input: PathBuf,
    pub output: PathBuf,
    pub state: DocumentState,
    pub result: Result<()>,
}

/// Front-end entry point: wraps [`DocumentPipeline`] with Start / Error / Complete events. One
/// cache and one concurrency limit are shared by every document it processes.
pub struct Translator {
    pipeline: DocumentPipeline,
    events: EventSink,
}

impl Translator {
    pub fn new(cfg: &PipelineConfig, events: EventSink) -> Result<Self> {
        let cache = Arc::new(TranslationCache::new());
        let engine = LlmEngine::new(cfg.engine_settings(), cache)?;
        Ok(Self::with_engine(cfg, Arc::new(engine), events))
    }

    pub fn with_engine(
        cfg: &PipelineConfig,
        engine: Arc<dyn TranslationEngine>,
        events: EventSink,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(cfg.max_concurrent_requests.max(1)));
        let batches =
            BatchTranslator::with_limiter(engine, limiter, events.clone(), cfg.cancel_grace);
        // The engine gates on CJK too; gating at extraction keeps non-CJK text out of batches.
        let extractor = Extractor::new(ExtractorConfig {
            cjk_only: cfg.only_translate_cjk,
        });
        let pipeline = DocumentPipeline::new(
            extractor,
            batches,
            cfg.continue_on_engine_failure,
            cfg.workbook_phases,
        );
        Self { pipeline, events }
    }

    pub async fn translate_document(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.run_document(input, output, cancel).await.1
    }

    async fn run_document(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> (DocumentState, Result<()>) {
        info!("translate {} -> {}", input.display(), output.display());
        self.events
            .emit(TranslateEvent::Start {
                input: input.to_path_buf(),
            })
            .await;

        let (state, result) = self.pipeline.translate_file(input, output, cancel).await;
        match &result {
            Ok(()) => info!("done: {}", output.display()),
            Err(err) => {
                let stage = match err.kind() {
                    ErrorKind::Cancelled => None,
                    ErrorKind::Engine => {
                        warn!("{}: {err}", input.display());
                        Some(Stage::Llm)
                    }
                    ErrorKind::Structural => {
                        error!("{}: {err}", input.display());
                        Some(Stage::FileProcessor)
                    }
                };
                match stage {
                    Some(stage) => {
                        self.events
                            .emit(TranslateEvent::Error {
                                stage,
                                kind: err.kind(),
                                message: err.to_string(),
                            })
                            .await;
                    }
                    None => info!("cancelled: {}", input.display()),
                }
            }
        }
        self.events
            .emit(TranslateEvent::Complete {
                input: input.to_path_buf(),
                error: result.as_ref().err().map(|e| e.to_string()),
            })
            .await;
        (state, result)
    }

    /// Processes `jobs` in order. A failed document does not stop the run; cancellation does.
    pub async fn translate_documents(
        &self,
        jobs: &[(PathBuf, PathBuf)],
        cancel: &CancellationToken,
    ) -> Vec<DocumentOutcome> {
        let mut outcomes = Vec::with_capacity(jobs.len());
        for (input, output) in jobs {
            let (state, result) = self.run_document(input, output, cancel).await;
            let stop = state == DocumentState::Cancelled;
            outcomes.push(DocumentOutcome {
                input: input.clone(),
                output: output.clone(),
                state,
                result,
            });
            if stop {
                break;
            }
        }
        outcomes
    }
}
