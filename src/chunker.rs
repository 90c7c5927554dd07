//! Element-sequence chunker.
//!
//! Pure transformation from an ordered, typed element sequence into an
//! ordered sequence of [`ChunkDraft`]s with position metadata. No I/O.
//!
//! The algorithm accumulates consecutive elements into a running buffer
//! bounded by `chunk_size` characters and flushes when the next element
//! would exceed the bound, carrying the trailing `chunk_overlap` characters
//! of the previous flush into the next buffer (overlap is not counted
//! toward size). Tables, image references, quotes, and code blocks over the
//! configured line threshold are always emitted as standalone chunks.
//! Oversized single elements are split at sentence boundaries, then at hard
//! character boundaries as a last resort. The chunker never fails on size —
//! the only error is a structurally inconsistent input sequence.
//!
//! The three named profiles (`semantic`, `structure`, `fixed`) parameterize
//! the same code path with different `(chunk_size, overlap, min_size)`
//! triples; they do not diverge in logic.

use crate::error::{PipelineError, Result};
use crate::models::{ChunkDraft, ChunkMetadata, ChunkType, Element, ElementKind};

/// Size constants for one named chunking configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkProfile {
    /// Upper bound on counted characters per chunk.
    pub chunk_size: usize,
    /// Trailing characters of the previous flush carried into the next
    /// buffer; not counted toward `chunk_size`.
    pub chunk_overlap: usize,
    /// Text chunks shorter than this after trimming are merged into the
    /// preceding text chunk when one is adjacent.
    pub min_size: usize,
}

pub const SEMANTIC: ChunkProfile = ChunkProfile {
    chunk_size: 1600,
    chunk_overlap: 200,
    min_size: 120,
};

pub const STRUCTURE: ChunkProfile = ChunkProfile {
    chunk_size: 1024,
    chunk_overlap: 0,
    min_size: 64,
};

pub const FIXED: ChunkProfile = ChunkProfile {
    chunk_size: 512,
    chunk_overlap: 64,
    min_size: 0,
};

impl ChunkProfile {
    pub fn named(name: &str) -> Option<ChunkProfile> {
        match name {
            "semantic" => Some(SEMANTIC),
            "structure" => Some(STRUCTURE),
            "fixed" => Some(FIXED),
            _ => None,
        }
    }
}

/// Running accumulation state for text-like elements.
struct Buffer {
    /// Overlap carried from the previous flush; prepended on flush, never
    /// counted toward size.
    carry: String,
    body: String,
    heading_path: Vec<String>,
    heading_level: i64,
    element_start: Option<i64>,
    element_end: i64,
    line_start: i64,
    line_end: i64,
}

impl Buffer {
    fn new() -> Self {
        Self {
            carry: String::new(),
            body: String::new(),
            heading_path: Vec::new(),
            heading_level: 0,
            element_start: None,
            element_end: 0,
            line_start: 0,
            line_end: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    fn push(&mut self, el: &Element, text: &str, headings: &[(i64, String)]) {
        if self.element_start.is_none() {
            self.element_start = Some(el.element_index);
            self.line_start = el.line_start;
            self.heading_path = headings.iter().map(|(_, t)| t.clone()).collect();
            self.heading_level = headings.last().map(|(l, _)| *l).unwrap_or(0);
        }
        if !self.body.is_empty() {
            self.body.push_str("\n\n");
        }
        self.body.push_str(text);
        self.element_end = el.element_index;
        self.line_end = el.line_end;
    }

    /// Counted size if `extra` characters were appended (plus separator).
    fn would_be(&self, extra: usize) -> usize {
        if self.body.is_empty() {
            extra
        } else {
            self.body.len() + 2 + extra
        }
    }

    /// Emit the buffered content as a text draft and reset, keeping the
    /// trailing `overlap` characters as carry for the next chunk.
    fn flush(&mut self, overlap: usize, out: &mut Vec<ChunkDraft>) {
        if self.body.is_empty() {
            return;
        }
        let mut text = String::with_capacity(self.carry.len() + self.body.len());
        if !self.carry.is_empty() {
            text.push_str(&self.carry);
            text.push_str("\n\n");
        }
        text.push_str(&self.body);

        let metadata = ChunkMetadata {
            heading_path: self.heading_path.clone(),
            heading_level: self.heading_level,
            line_start: self.line_start,
            line_end: self.line_end,
            code_language: None,
            table_headers: None,
            element_index_start: self.element_start,
            element_index_end: Some(self.element_end),
        };
        out.push(ChunkDraft::new(ChunkType::Text, text, metadata));

        self.carry = tail_chars(&self.body, overlap).to_string();
        self.body.clear();
        self.element_start = None;
    }

    /// Reset without emitting and without carrying overlap. Used at
    /// standalone-chunk boundaries where overlap would bleed content into
    /// an unrelated region.
    fn clear_carry(&mut self) {
        self.carry.clear();
    }
}

/// Chunk an element sequence under the given profile.
///
/// `code_line_threshold` is the line count above which a code block is
/// always emitted as its own chunk rather than merged into the running
/// buffer.
pub fn chunk_elements(
    elements: &[Element],
    profile: &ChunkProfile,
    code_line_threshold: usize,
) -> Result<Vec<ChunkDraft>> {
    let mut out: Vec<ChunkDraft> = Vec::new();
    let mut buf = Buffer::new();
    // Stack of (level, title) for heading_path tracking.
    let mut headings: Vec<(i64, String)> = Vec::new();

    for el in elements {
        match &el.kind {
            ElementKind::Heading { level } => {
                while headings.last().map(|(l, _)| *l >= *level).unwrap_or(false) {
                    headings.pop();
                }
                headings.push((*level, el.text.clone()));
                accumulate(&mut buf, el, &el.text, &headings, profile, &mut out);
            }
            ElementKind::Paragraph => {
                accumulate(&mut buf, el, &el.text, &headings, profile, &mut out);
            }
            ElementKind::Quote => {
                buf.flush(profile.chunk_overlap, &mut out);
                buf.clear_carry();
                emit_standalone(
                    ChunkType::Quote,
                    el,
                    &headings,
                    ChunkMetadata::default(),
                    &mut out,
                );
            }
            ElementKind::Table { headers, rows } => {
                if rows.is_empty() {
                    return Err(PipelineError::MalformedInput(format!(
                        "table element {} has zero rows",
                        el.element_index
                    )));
                }
                buf.flush(profile.chunk_overlap, &mut out);
                buf.clear_carry();
                emit_standalone(
                    ChunkType::Table,
                    el,
                    &headings,
                    ChunkMetadata {
                        table_headers: Some(headers.clone()),
                        ..ChunkMetadata::default()
                    },
                    &mut out,
                );
            }
            ElementKind::CodeBlock { language } => {
                let line_count = el.text.lines().count();
                if line_count > code_line_threshold || el.text.len() > profile.chunk_size {
                    buf.flush(profile.chunk_overlap, &mut out);
                    buf.clear_carry();
                    emit_standalone(
                        ChunkType::Code,
                        el,
                        &headings,
                        ChunkMetadata {
                            code_language: language.clone(),
                            ..ChunkMetadata::default()
                        },
                        &mut out,
                    );
                } else {
                    accumulate(&mut buf, el, &el.text, &headings, profile, &mut out);
                }
            }
            ElementKind::ImageRef { .. } => {
                buf.flush(profile.chunk_overlap, &mut out);
                buf.clear_carry();
                emit_standalone(
                    ChunkType::ImageRef,
                    el,
                    &headings,
                    ChunkMetadata::default(),
                    &mut out,
                );
            }
        }
    }

    buf.flush(profile.chunk_overlap, &mut out);

    Ok(merge_short_chunks(out, profile.min_size))
}

/// Add a text-like element to the buffer, flushing and splitting as needed.
fn accumulate(
    buf: &mut Buffer,
    el: &Element,
    text: &str,
    headings: &[(i64, String)],
    profile: &ChunkProfile,
    out: &mut Vec<ChunkDraft>,
) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }

    // Oversized single element: flush, then split it recursively.
    if trimmed.len() > profile.chunk_size {
        buf.flush(profile.chunk_overlap, out);
        for piece in split_oversized(trimmed, profile.chunk_size) {
            buf.push(el, &piece, headings);
            buf.flush(profile.chunk_overlap, out);
        }
        return;
    }

    if buf.would_be(trimmed.len()) > profile.chunk_size && !buf.is_empty() {
        buf.flush(profile.chunk_overlap, out);
    }
    buf.push(el, trimmed, headings);
}

fn emit_standalone(
    chunk_type: ChunkType,
    el: &Element,
    headings: &[(i64, String)],
    base: ChunkMetadata,
    out: &mut Vec<ChunkDraft>,
) {
    let metadata = ChunkMetadata {
        heading_path: headings.iter().map(|(_, t)| t.clone()).collect(),
        heading_level: headings.last().map(|(l, _)| *l).unwrap_or(0),
        line_start: el.line_start,
        line_end: el.line_end,
        element_index_start: Some(el.element_index),
        element_index_end: Some(el.element_index),
        ..base
    };
    out.push(ChunkDraft::new(chunk_type, el.text.clone(), metadata));
}

/// Split an oversized element at sentence boundaries, falling back to hard
/// character boundaries for any single sentence that still exceeds the
/// bound.
fn split_oversized(text: &str, max_size: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        if sentence.len() > max_size {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(hard_split(sentence, max_size));
            continue;
        }
        let sep = if current.is_empty() { 0 } else { 1 };
        if current.len() + sep + sentence.len() > max_size {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Split on sentence-final punctuation followed by whitespace, or on
/// newlines.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0usize;

    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        let end_here = b == b'\n'
            || (matches!(b, b'.' | b'!' | b'?')
                && bytes.get(i + 1).map(|n| n.is_ascii_whitespace()).unwrap_or(true));
        if end_here {
            let slice = text[start..=i].trim();
            if !slice.is_empty() {
                sentences.push(slice);
            }
            start = i + 1;
        }
        i += 1;
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}

/// Last-resort split at character boundaries, keeping UTF-8 intact.
fn hard_split(text: &str, max_size: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.len() <= max_size {
            pieces.push(rest.to_string());
            break;
        }
        let mut cut = max_size;
        while cut > 0 && !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            cut = rest
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
        }
        pieces.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }
    pieces
}

/// Trailing `n` characters of a string, on a char boundary.
fn tail_chars(text: &str, n: usize) -> &str {
    if n == 0 || text.is_empty() {
        return "";
    }
    if text.len() <= n {
        return text;
    }
    let mut cut = text.len() - n;
    while cut < text.len() && !text.is_char_boundary(cut) {
        cut += 1;
    }
    &text[cut..]
}

/// Merge sub-`min_size` text chunks into the immediately preceding text
/// chunk when one is adjacent. Short chunks with no adjacent text chunk are
/// kept only if non-empty; whitespace residue is dropped.
fn merge_short_chunks(drafts: Vec<ChunkDraft>, min_size: usize) -> Vec<ChunkDraft> {
    let mut out: Vec<ChunkDraft> = Vec::with_capacity(drafts.len());

    for draft in drafts {
        if draft.text.trim().is_empty() {
            continue;
        }
        if min_size > 0
            && draft.chunk_type == ChunkType::Text
            && draft.text.trim().len() < min_size
        {
            if let Some(prev) = out.last_mut() {
                if prev.chunk_type == ChunkType::Text {
                    let mut merged_text = prev.text.clone();
                    merged_text.push_str("\n\n");
                    merged_text.push_str(&draft.text);
                    let mut metadata = prev.metadata.clone();
                    metadata.line_end = draft.metadata.line_end;
                    metadata.element_index_end = draft.metadata.element_index_end;
                    *prev = ChunkDraft::new(ChunkType::Text, merged_text, metadata);
                    continue;
                }
            }
        }
        out.push(draft);
    }
    out
}
