use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, Result, TranslateError};
use crate::events::{EventSink, Stage, TranslateEvent};
use crate::ooxml::extract::{scan_sheet_names, Extraction, Extractor, PartKind};
use crate::ooxml::package::{OoxmlPackage, PackageEntry};
use crate::ooxml::sheets::resolve_sheet_names;
use crate::orchestrator::BatchTranslator;
use crate::textutil::truncate_for_log;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    Workbook,
    WordDocument,
}

impl DocumentKind {
    /// Classifies by extension; anything but `.xlsx` / `.docx` is rejected.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("xlsx") => Ok(Self::Workbook),
            Some("docx") => Ok(Self::WordDocument),
            _ => Err(TranslateError::UnsupportedInput(path.display().to_string())),
        }
    }
}

/// Lifecycle of one document run. `Failed` and `Cancelled` are reachable from every other state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentState {
    Idle,
    Unzipped,
    Translating,
    Rezipped,
    Done,
    Failed,
    Cancelled,
}

struct StateTracker {
    name: String,
    state: DocumentState,
}

impl StateTracker {
    fn new(input: &Path) -> Self {
        Self {
            name: input.display().to_string(),
            state: DocumentState::Idle,
        }
    }

    fn advance(&mut self, next: DocumentState) {
        debug!("{}: {:?} -> {:?}", self.name, self.state, next);
        self.state = next;
    }
}

/// Unzip, translate every recognised part, rezip. Output appears only when the whole document
/// succeeded.
pub struct DocumentPipeline {
    extractor: Extractor,
    batches: BatchTranslator,
    continue_on_engine_failure: bool,
    workbook_phases: bool,
}

impl DocumentPipeline {
    pub fn new(
        extractor: Extractor,
        batches: BatchTranslator,
        continue_on_engine_failure: bool,
        workbook_phases: bool,
    ) -> Self {
        Self {
            extractor,
            batches,
            continue_on_engine_failure,
            workbook_phases,
        }
    }

    fn events(&self) -> &EventSink {
        self.batches.events()
    }

    /// Returns the terminal state together with the outcome.
    pub async fn translate_file(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> (DocumentState, Result<()>) {
        let mut tracker = StateTracker::new(input);
        let result = self.run(input, output, cancel, &mut tracker).await;
        match &result {
            Ok(()) => tracker.advance(DocumentState::Done),
            Err(err) if err.is_cancelled() => tracker.advance(DocumentState::Cancelled),
            Err(_) => tracker.advance(DocumentState::Failed),
        }
        (tracker.state, result)
    }

    async fn run(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
        tracker: &mut StateTracker,
    ) -> Result<()> {
        if !input.is_file() {
            return Err(TranslateError::InputNotFound(input.display().to_string()));
        }
        let kind = DocumentKind::from_path(input)?;
        if cancel.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }

        let path = input.to_path_buf();
        let pkg = tokio::task::spawn_blocking(move || OoxmlPackage::read(&path))
            .await
            .map_err(|e| TranslateError::Task(e.to_string()))??;
        tracker.advance(DocumentState::Unzipped);

        tracker.advance(DocumentState::Translating);
        let replacements = self.translate_parts(&pkg, kind, cancel).await?;
        if cancel.is_cancelled() {
            return Err(TranslateError::Cancelled);
        }
        info!(
            "{}: {} of {} entries rewritten",
            input.display(),
            replacements.len(),
            pkg.entries.len()
        );

        let out = output.to_path_buf();
        tokio::task::spawn_blocking(move || write_atomically(&pkg, &replacements, &out))
            .await
            .map_err(|e| TranslateError::Task(e.to_string()))??;
        tracker.advance(DocumentState::Rezipped);
        Ok(())
    }

    async fn translate_parts(
        &self,
        pkg: &OoxmlPackage,
        kind: DocumentKind,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Vec<u8>>> {
        let mut plan: Vec<(usize, PartKind)> = pkg
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.is_dir)
            .filter_map(|(i, e)| PartKind::classify(&e.name).map(|k| (i, k)))
            .collect();
        let phased = kind == DocumentKind::Workbook && self.workbook_phases;
        if phased {
            // Stable: archive order is kept within a phase.
            plan.sort_by_key(|(_, k)| phase_rank(*k));
        }

        let mut replacements = HashMap::new();
        let mut current_phase: Option<Stage> = None;
        for (idx, part_kind) in plan {
            if cancel.is_cancelled() {
                return Err(TranslateError::Cancelled);
            }
            let stage = part_kind.stage();
            if phased && current_phase != Some(stage) {
                info!("phase: {stage}");
                current_phase = Some(stage);
            }

            let entry = &pkg.entries[idx];
            match self.translate_part(entry, part_kind, cancel).await {
                Ok(Some(bytes)) => {
                    replacements.insert(entry.name.clone(), bytes);
                }
                Ok(None) => {}
                Err(err) if err.is_engine() && self.continue_on_engine_failure => {
                    warn!("{}: left untranslated: {err}", entry.name);
                    self.events()
                        .emit(TranslateEvent::Error {
                            stage: Stage::Llm,
                            kind: ErrorKind::Engine,
                            message: format!("{}: {err}", entry.name),
                        })
                        .await;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(replacements)
    }

    /// `None` when the part has nothing to translate and keeps its original bytes.
    async fn translate_part(
        &self,
        entry: &PackageEntry,
        kind: PartKind,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        let content = std::str::from_utf8(&entry.data)
            .map_err(|_| TranslateError::NotUtf8(entry.name.clone()))?;
        let extraction = self.extractor.extract(content, &entry.name);
        if extraction.items.is_empty() {
            return Ok(None);
        }
        debug!(
            "{}: {} fragments, first {:?}",
            entry.name,
            extraction.items.len(),
            truncate_for_log(&extraction.items[0].text, 80)
        );

        let texts = extraction.items.iter().map(|i| i.text.clone()).collect();
        let mut translations = self
            .batches
            .translate_batch(kind.stage(), &entry.name, texts, cancel)
            .await?;
        if kind == PartKind::SheetNames {
            translations = final_sheet_names(&extraction, translations);
            for (item, name) in extraction.items.iter().zip(&translations) {
                if *name != item.text {
                    self.events()
                        .emit(TranslateEvent::Translated {
                            stage: Stage::Sheet,
                            original: item.text.clone(),
                            translated: name.clone(),
                        })
                        .await;
                }
            }
        }

        let rebuilt =
            self.extractor
                .apply(&extraction.content, &entry.name, &extraction.items, &translations)?;
        Ok(Some(rebuilt.into_bytes()))
    }
}

fn phase_rank(kind: PartKind) -> u8 {
    match kind {
        PartKind::SheetNames => 0,
        PartKind::SharedStrings | PartKind::InlineStrings | PartKind::Comments => 1,
        PartKind::DrawingText => 2,
        PartKind::RunText => 3,
    }
}

/// Maps each extracted sheet fragment to its position among all sheets and makes the translated
/// names legal and unique.
fn final_sheet_names(extraction: &Extraction, translations: Vec<String>) -> Vec<String> {
    let all = scan_sheet_names(&extraction.content);
    let names: Vec<String> = all.iter().map(|(_, n)| n.clone()).collect();
    let renames: Vec<(usize, String)> = extraction
        .items
        .iter()
        .zip(translations)
        .filter_map(|(item, t)| {
            all.iter()
                .position(|(start, _)| *start == item.match_span.start)
                .map(|pos| (pos, t))
        })
        .collect();
    resolve_sheet_names(&names, &renames)
}

fn write_atomically(
    pkg: &OoxmlPackage,
    replacements: &HashMap<String, Vec<u8>>,
    output: &Path,
) -> Result<()> {
    let dir: PathBuf = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)
        .map_err(|e| TranslateError::io(format!("create output dir: {}", dir.display()), e))?;

    // Dropped (and deleted) on any early return.
    let tmp = tempfile::Builder::new()
        .prefix(".ooxml-translator-")
        .suffix(".tmp")
        .tempfile_in(&dir)
        .map_err(|e| TranslateError::io(format!("create temp file in: {}", dir.display()), e))?;
    pkg.write_to(tmp.as_file(), replacements)?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| TranslateError::io("flush output", e))?;
    tmp.persist(output)
        .map_err(|e| TranslateError::io(format!("write output: {}", output.display()), e.error))?;
    Ok(())
}
