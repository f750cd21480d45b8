//! Events a front end receives while documents are processed.

use std::fmt;
use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::error::ErrorKind;

/// Where an event originates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Sheet,
    Cell,
    Shape,
    Docx,
    Llm,
    FileProcessor,
    Init,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Sheet => "sheet",
            Stage::Cell => "cell",
            Stage::Shape => "shape",
            Stage::Docx => "docx",
            Stage::Llm => "llm",
            Stage::FileProcessor => "fileprocessor",
            Stage::Init => "init",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TranslateEvent {
    Start {
        input: PathBuf,
    },
    /// `done` only grows within one batch; `part` names the archive entry.
    Progress {
        stage: Stage,
        part: String,
        done: usize,
        total: usize,
    },
    Translated {
        stage: Stage,
        original: String,
        translated: String,
    },
    Error {
        stage: Stage,
        kind: ErrorKind,
        message: String,
    },
    /// `error` is `None` when the output file was written.
    Complete {
        input: PathBuf,
        error: Option<String>,
    },
}

/// Sending half of the event stream. Events are delivered in emission order over a bounded
/// channel; a slow consumer slows producers down. A sink without receiver drops everything.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<TranslateEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TranslateEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TranslateEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    pub async fn emit(&self, event: TranslateEvent) {
        if let Some(tx) = &self.tx {
            // A closed receiver means nobody is listening any more.
            let _ = tx.send(event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names() {
        let all = [
            Stage::Sheet,
            Stage::Cell,
            Stage::Shape,
            Stage::Docx,
            Stage::Llm,
            Stage::FileProcessor,
            Stage::Init,
        ];
        let names: Vec<&str> = all.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            ["sheet", "cell", "shape", "docx", "llm", "fileprocessor", "init"]
        );
        assert_eq!(Stage::FileProcessor.to_string(), "fileprocessor");
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (sink, mut rx) = EventSink::channel(4);
        for done in 1..=3 {
            sink.emit(TranslateEvent::Progress {
                stage: Stage::Docx,
                part: "word/document.xml".into(),
                done,
                total: 3,
            })
            .await;
        }
        drop(sink);
        let mut seen = Vec::new();
        while let Some(TranslateEvent::Progress { done, .. }) = rx.recv().await {
            seen.push(done);
        }
        assert_eq!(seen, [1, 2, 3]);
    }

    #[tokio::test]
    async fn disabled_and_closed_sinks_do_not_block() {
        EventSink::disabled()
            .emit(TranslateEvent::Start {
                input: "a.docx".into(),
            })
            .await;
        let (sink, rx) = EventSink::channel(1);
        drop(rx);
        sink.emit(TranslateEvent::Start {
            input: "a.docx".into(),
        })
        .await;
    }
}
