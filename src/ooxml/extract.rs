//! Span-based text isolation for the fixed set of OOXML part shapes.
//!
//! Extraction records byte spans into the part content; applying translations replays exactly
//! those spans, so identical source strings at different positions stay independent.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, TranslateError};
use crate::events::Stage;
use crate::textutil::{contains_cjk, is_valid_text_content, truncate_runes, xml_escape, xml_unescape};

pub const MAX_SHEET_NAME_RUNES: usize = 31;

// Opening tags accept any attributes but never the self-closing form; captures stop at `<`.
static RUN_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<w:t(?:\s[^>]*?[^/>]|\s+)?>([^<]*)</w:t>").expect("run text")
});
static CELL_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<t(?:\s[^>]*?[^/>]|\s+)?>([^<]*)</t>").expect("cell text")
});
static DRAWING_TEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<a:t(?:\s[^>]*?[^/>]|\s+)?>([^<]*)</a:t>").expect("drawing text")
});
static SHEET_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<sheet\b[^>]*?\sname="([^"]*)"[^>]*>"#).expect("sheet name")
});
static PHONETIC_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<rPh\b[^>]*?>.*?</rPh>").expect("phonetic run"));
static PHONETIC_PROPERTY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<phoneticPr\b[^>]*?/?>").expect("phonetic property"));

/// Which translatable shape a part carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartKind {
    /// `word/document.xml`, headers, footers, footnotes, endnotes: `<w:t>`.
    RunText,
    /// `xl/sharedStrings.xml`: `<t>`, phonetic annotations stripped first.
    SharedStrings,
    /// `xl/worksheets/sheet*.xml`: `<t>` inside inline-string cells.
    InlineStrings,
    /// `xl/comments*.xml`: `<t>`.
    Comments,
    /// `xl/drawings/drawing*.xml`: `<a:t>`.
    DrawingText,
    /// `xl/workbook.xml`: the `name` attribute of `<sheet>`.
    SheetNames,
}

impl PartKind {
    pub fn classify(part_name: &str) -> Option<Self> {
        if !part_name.ends_with(".xml") {
            return None;
        }
        let kind = if part_name.contains("word/document.xml")
            || part_name.contains("word/header")
            || part_name.contains("word/footer")
            || part_name.contains("word/footnotes.xml")
            || part_name.contains("word/endnotes.xml")
        {
            PartKind::RunText
        } else if part_name.contains("xl/sharedStrings.xml") {
            PartKind::SharedStrings
        } else if part_name.contains("xl/worksheets/sheet") {
            PartKind::InlineStrings
        } else if part_name.contains("xl/comments") {
            PartKind::Comments
        } else if part_name.contains("xl/drawings/drawing") {
            PartKind::DrawingText
        } else if part_name.contains("xl/workbook.xml") {
            PartKind::SheetNames
        } else {
            return None;
        };
        Some(kind)
    }

    fn pattern(self) -> &'static Regex {
        match self {
            PartKind::RunText => &RUN_TEXT_RE,
            PartKind::SharedStrings | PartKind::InlineStrings | PartKind::Comments => {
                &CELL_TEXT_RE
            }
            PartKind::DrawingText => &DRAWING_TEXT_RE,
            PartKind::SheetNames => &SHEET_NAME_RE,
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            PartKind::RunText => Stage::Docx,
            PartKind::SharedStrings | PartKind::InlineStrings | PartKind::Comments => Stage::Cell,
            PartKind::DrawingText => Stage::Shape,
            PartKind::SheetNames => Stage::Sheet,
        }
    }
}

/// One translatable fragment. `match_span` covers the whole element (or tag, for sheet names);
/// `text_span` covers only the escaped payload inside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractionItem {
    pub text: String,
    pub match_span: Range<usize>,
    pub text_span: Range<usize>,
}

#[derive(Debug)]
pub struct Extraction {
    pub kind: Option<PartKind>,
    /// Baseline for [`Extractor::apply`]; differs from the input only for shared strings.
    pub content: String,
    pub items: Vec<ExtractionItem>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ExtractorConfig {
    pub cjk_only: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Extractor {
    config: ExtractorConfig,
}

impl Extractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn extract(&self, content: &str, part_name: &str) -> Extraction {
        let Some(kind) = PartKind::classify(part_name) else {
            return Extraction {
                kind: None,
                content: content.to_string(),
                items: Vec::new(),
            };
        };

        let content = if kind == PartKind::SharedStrings {
            remove_phonetic_annotations(content)
        } else {
            content.to_string()
        };

        let items = kind
            .pattern()
            .captures_iter(&content)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let payload = caps.get(1)?;
                let text = xml_unescape(payload.as_str());
                if !self.accepts(&text) {
                    return None;
                }
                Some(ExtractionItem {
                    text: text.into_owned(),
                    match_span: whole.range(),
                    text_span: payload.range(),
                })
            })
            .collect();

        Extraction {
            kind: Some(kind),
            content,
            items,
        }
    }

    /// Rebuilds `content` with each item's payload replaced by its escaped translation. `content`
    /// must be the baseline returned by [`Extractor::extract`] for the same part.
    pub fn apply(
        &self,
        content: &str,
        part_name: &str,
        items: &[ExtractionItem],
        translations: &[String],
    ) -> Result<String> {
        if items.len() != translations.len() {
            return Err(TranslateError::CountMismatch {
                items: items.len(),
                translations: translations.len(),
            });
        }
        if items.is_empty() {
            return Ok(content.to_string());
        }

        let sheet_names = PartKind::classify(part_name) == Some(PartKind::SheetNames);
        let mut out = String::with_capacity(content.len());
        let mut last = 0usize;
        for (item, translated) in items.iter().zip(translations) {
            check_span(item, last, content)?;
            let translated = if sheet_names {
                truncate_runes(translated, MAX_SHEET_NAME_RUNES)
            } else {
                translated.as_str()
            };
            out.push_str(&content[last..item.text_span.start]);
            out.push_str(&xml_escape(translated));
            out.push_str(&content[item.text_span.end..item.match_span.end]);
            last = item.match_span.end;
        }
        out.push_str(&content[last..]);
        Ok(out)
    }

    fn accepts(&self, text: &str) -> bool {
        is_valid_text_content(text) && (!self.config.cjk_only || contains_cjk(text))
    }
}

/// Every `name` attribute of `<sheet>` in a workbook part, unfiltered, with the tag's start offset.
pub fn scan_sheet_names(content: &str) -> Vec<(usize, String)> {
    SHEET_NAME_RE
        .captures_iter(content)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            Some((whole.start(), xml_unescape(name.as_str()).into_owned()))
        })
        .collect()
}

fn check_span(item: &ExtractionItem, last: usize, content: &str) -> Result<()> {
    let m = &item.match_span;
    let t = &item.text_span;
    let ordered = last <= m.start && m.start <= t.start && t.start <= t.end && t.end <= m.end;
    let on_boundaries = [m.start, t.start, t.end, m.end]
        .iter()
        .all(|i| content.is_char_boundary(*i));
    if !ordered || !on_boundaries {
        return Err(TranslateError::InvalidSpan {
            start: m.start,
            end: m.end,
            len: content.len(),
        });
    }
    Ok(())
}

fn remove_phonetic_annotations(content: &str) -> String {
    let stripped = PHONETIC_RUN_RE.replace_all(content, "");
    PHONETIC_PROPERTY_RE.replace_all(&stripped, "").into_owned()
}
