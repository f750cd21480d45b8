//! Bounded fan-out of one batch of fragments through a [`TranslationEngine`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::debug;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::engine::TranslationEngine;
use crate::error::{Result, TranslateError};
use crate::events::{EventSink, Stage, TranslateEvent};

/// Runs batches with at most `K` engine calls in flight. The limiter may be shared between
/// translators so that `K` holds across documents and parts.
#[derive(Clone)]
pub struct BatchTranslator {
    engine: Arc<dyn TranslationEngine>,
    limiter: Arc<Semaphore>,
    events: EventSink,
    grace: Duration,
}

impl BatchTranslator {
    pub fn new(
        engine: Arc<dyn TranslationEngine>,
        max_concurrent: usize,
        events: EventSink,
        grace: Duration,
    ) -> Self {
        Self::with_limiter(
            engine,
            Arc::new(Semaphore::new(max_concurrent.max(1))),
            events,
            grace,
        )
    }

    pub fn with_limiter(
        engine: Arc<dyn TranslationEngine>,
        limiter: Arc<Semaphore>,
        events: EventSink,
        grace: Duration,
    ) -> Self {
        Self {
            engine,
            limiter,
            events,
            grace,
        }
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Translates `texts` and returns the results in input order.
    ///
    /// The first non-cancellation failure cancels the rest of the batch and is returned. When
    /// `cancel` fires the call returns [`TranslateError::Cancelled`] after at most the grace
    /// period; tasks still running by then are aborted.
    ///
    /// No `Translated` events are sent for [`Stage::Sheet`]: sheet names are only final once the
    /// whole batch has been made unique, so the caller reports them.
    pub async fn translate_batch(
        &self,
        stage: Stage,
        part: &str,
        texts: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let total = texts.len();
        if total == 0 {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }
        debug!("{stage}: translating {total} fragments from {part}");

        let batch_cancel = cancel.child_token();
        let done = Arc::new(tokio::sync::Mutex::new(0usize));
        let first_err: Arc<Mutex<Option<TranslateError>>> = Arc::new(Mutex::new(None));

        let mut tasks = JoinSet::new();
        for (idx, text) in texts.into_iter().enumerate() {
            let engine = Arc::clone(&self.engine);
            let limiter = Arc::clone(&self.limiter);
            let token = batch_cancel.clone();
            let events = self.events.clone();
            let done = Arc::clone(&done);
            let first_err = Arc::clone(&first_err);
            let part = part.to_string();
            tasks.spawn(async move {
                let translated = match run_one(engine.as_ref(), &limiter, &token, &text).await {
                    Ok(translated) => Some(translated),
                    Err(err) if err.is_cancelled() => return (idx, None),
                    Err(err) => {
                        record_first(&first_err, err);
                        token.cancel();
                        None
                    }
                };

                // Serialises the counter with its events so `done` is seen in order.
                let mut n = done.lock().await;
                *n += 1;
                let changed = translated.as_ref().filter(|t| **t != text);
                if let Some(translated) = changed.filter(|_| stage != Stage::Sheet) {
                    events
                        .emit(TranslateEvent::Translated {
                            stage,
                            original: text.clone(),
                            translated: translated.clone(),
                        })
                        .await;
                }
                events
                    .emit(TranslateEvent::Progress {
                        stage,
                        part,
                        done: *n,
                        total,
                    })
                    .await;
                drop(n);
                (idx, translated)
            });
        }

        let mut slots: Vec<Option<String>> = vec![None; total];
        let mut deadline: Option<Instant> = None;
        loop {
            let joined = match deadline {
                None => tokio::select! {
                    joined = tasks.join_next() => joined,
                    _ = batch_cancel.cancelled() => {
                        deadline = Some(Instant::now() + self.grace);
                        continue;
                    }
                },
                Some(at) => match tokio::time::timeout_at(at, tasks.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        debug!("{stage}: aborting {} tasks of {part} after grace", tasks.len());
                        tasks.abort_all();
                        while tasks.join_next().await.is_some() {}
                        break;
                    }
                },
            };
            let Some(joined) = joined else { break };
            match joined {
                Ok((idx, translated)) => slots[idx] = translated,
                Err(join_err) if join_err.is_cancelled() => {}
                Err(join_err) => {
                    record_first(&first_err, TranslateError::Task(join_err.to_string()));
                    batch_cancel.cancel();
                }
            }
        }

        let captured = first_err.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(err) = captured {
            debug!("{stage}: batch for {part} failed: {err}");
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }
        slots
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| TranslateError::Task(format!("batch for {part} lost results")))
    }
}

fn record_first(slot: &Mutex<Option<TranslateError>>, err: TranslateError) {
    let mut guard = slot.lock().unwrap_or_else(|e| e.into_inner());
    if guard.is_none() {
        *guard = Some(err);
    }
}

async fn run_one(
    engine: &dyn TranslationEngine,
    limiter: &Semaphore,
    token: &CancellationToken,
    text: &str,
) -> Result<String> {
    if token.is_cancelled() {
        return Err(TranslateError::Cancelled);
    }
    let _permit = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(TranslateError::Cancelled),
        permit = limiter.acquire() => {
            permit.map_err(|_| TranslateError::Task("concurrency limiter closed".into()))?
        }
    };
    if token.is_cancelled() {
        return Err(TranslateError::Cancelled);
    }
    engine.translate(token, text).await
}
