//! Default element extraction for plain-text and Markdown-ish input.
//!
//! Turns a source string into the ordered, typed element sequence the
//! chunker consumes: headings, paragraphs, fenced code blocks, pipe tables,
//! quote blocks, and image references. Each element receives a monotonic
//! `element_index`, assigned exactly once here, which downstream components
//! use to restore original interleaved order.
//!
//! Richer formats (PDF, DOCX, OCR) are external collaborators: anything that
//! can produce a `Vec<Element>` can feed the pipeline.

use crate::error::{PipelineError, Result};
use crate::models::{Element, ElementKind};

/// Parse source text into an ordered element sequence.
///
/// Returns an error only for undecodable input; structural oddities (empty
/// tables, unterminated fences) are represented as-is and validated later by
/// the chunker.
pub fn parse_text(text: &str) -> Result<Vec<Element>> {
    let lines: Vec<&str> = text.lines().collect();
    let mut elements: Vec<Element> = Vec::new();
    let mut next_index: i64 = 0;
    let mut i = 0usize;

    let push = |kind: ElementKind, text: String, line_start: usize, line_end: usize,
                    elements: &mut Vec<Element>,
                    next_index: &mut i64| {
        elements.push(Element {
            element_index: *next_index,
            kind,
            text,
            line_start: line_start as i64 + 1,
            line_end: line_end as i64 + 1,
        });
        *next_index += 1;
    };

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if trimmed.is_empty() {
            i += 1;
            continue;
        }

        // Fenced code block
        if let Some(rest) = trimmed.strip_prefix("```") {
            let language = if rest.trim().is_empty() {
                None
            } else {
                Some(rest.trim().to_string())
            };
            let start = i;
            i += 1;
            let mut body = Vec::new();
            while i < lines.len() && !lines[i].trim().starts_with("```") {
                body.push(lines[i]);
                i += 1;
            }
            let end = i.min(lines.len().saturating_sub(1));
            if i < lines.len() {
                i += 1; // consume closing fence
            }
            push(
                ElementKind::CodeBlock { language },
                body.join("\n"),
                start,
                end,
                &mut elements,
                &mut next_index,
            );
            continue;
        }

        // Heading
        if trimmed.starts_with('#') {
            let level = trimmed.chars().take_while(|c| *c == '#').count() as i64;
            if level <= 6 {
                let title = trimmed.trim_start_matches('#').trim().to_string();
                push(
                    ElementKind::Heading { level },
                    title,
                    i,
                    i,
                    &mut elements,
                    &mut next_index,
                );
                i += 1;
                continue;
            }
        }

        // Image reference on its own line: ![alt](src)
        if let Some((alt, src)) = parse_image_line(trimmed) {
            push(
                ElementKind::ImageRef { src },
                alt,
                i,
                i,
                &mut elements,
                &mut next_index,
            );
            i += 1;
            continue;
        }

        // Pipe table
        if trimmed.starts_with('|') {
            let start = i;
            let mut table_lines = Vec::new();
            while i < lines.len() && lines[i].trim().starts_with('|') {
                table_lines.push(lines[i].trim());
                i += 1;
            }
            let (headers, rows) = parse_table(&table_lines)?;
            let text = table_lines.join("\n");
            push(
                ElementKind::Table { headers, rows },
                text,
                start,
                i - 1,
                &mut elements,
                &mut next_index,
            );
            continue;
        }

        // Quote block
        if trimmed.starts_with('>') {
            let start = i;
            let mut quote_lines = Vec::new();
            while i < lines.len() && lines[i].trim().starts_with('>') {
                quote_lines.push(lines[i].trim().trim_start_matches('>').trim());
                i += 1;
            }
            push(
                ElementKind::Quote,
                quote_lines.join("\n"),
                start,
                i - 1,
                &mut elements,
                &mut next_index,
            );
            continue;
        }

        // Paragraph: consecutive non-blank, non-structural lines
        let start = i;
        let mut para_lines = Vec::new();
        while i < lines.len() {
            let t = lines[i].trim();
            if t.is_empty() {
                break;
            }
            // The first line always belongs to this paragraph; it already
            // failed every structural branch above.
            if !para_lines.is_empty()
                && (t.starts_with('#')
                    || t.starts_with("```")
                    || t.starts_with('|')
                    || t.starts_with('>')
                    || parse_image_line(t).is_some())
            {
                break;
            }
            para_lines.push(t);
            i += 1;
        }
        push(
            ElementKind::Paragraph,
            para_lines.join("\n"),
            start,
            i - 1,
            &mut elements,
            &mut next_index,
        );
    }

    Ok(elements)
}

/// Recognize a line that consists solely of a Markdown image: `![alt](src)`.
fn parse_image_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("![")?;
    let close_bracket = rest.find(']')?;
    let alt = &rest[..close_bracket];
    let after = &rest[close_bracket + 1..];
    let src = after.strip_prefix('(')?.strip_suffix(')')?;
    if src.is_empty() {
        return None;
    }
    Some((alt.to_string(), src.to_string()))
}

/// Split a pipe-table block into headers and data rows. The first row is the
/// header row; a `|---|` separator row is skipped.
fn parse_table(lines: &[&str]) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    if lines.is_empty() {
        return Err(PipelineError::MalformedInput(
            "empty table block".to_string(),
        ));
    }

    let split_row = |line: &str| -> Vec<String> {
        line.trim()
            .trim_start_matches('|')
            .trim_end_matches('|')
            .split('|')
            .map(|c| c.trim().to_string())
            .collect()
    };

    let is_separator = |line: &str| {
        line.chars()
            .all(|c| matches!(c, '|' | '-' | ':' | ' '))
    };

    let headers = split_row(lines[0]);
    let rows: Vec<Vec<String>> = lines[1..]
        .iter()
        .filter(|l| !is_separator(l))
        .map(|l| split_row(l))
        .collect();

    Ok((headers, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headings_and_paragraphs() {
        let els = parse_text("# Intro\n\nhello world\n\ngoodbye").unwrap();
        assert_eq!(els.len(), 3);
        assert!(matches!(els[0].kind, ElementKind::Heading { level: 1 }));
        assert_eq!(els[0].text, "Intro");
        assert!(matches!(els[1].kind, ElementKind::Paragraph));
        assert_eq!(els[2].text, "goodbye");
        // Indices are monotonic from zero
        for (i, e) in els.iter().enumerate() {
            assert_eq!(e.element_index, i as i64);
        }
    }

    #[test]
    fn test_code_block_with_language() {
        let els = parse_text("```rust\nfn main() {}\n```\nafter").unwrap();
        assert_eq!(els.len(), 2);
        match &els[0].kind {
            ElementKind::CodeBlock { language } => {
                assert_eq!(language.as_deref(), Some("rust"));
            }
            other => panic!("expected code block, got {:?}", other),
        }
        assert_eq!(els[0].text, "fn main() {}");
    }

    #[test]
    fn test_table_headers_and_rows() {
        let els = parse_text("| a | b |\n|---|---|\n| 1 | 2 |\n| 3 | 4 |").unwrap();
        assert_eq!(els.len(), 1);
        match &els[0].kind {
            ElementKind::Table { headers, rows } => {
                assert_eq!(headers, &vec!["a".to_string(), "b".to_string()]);
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[0], vec!["1".to_string(), "2".to_string()]);
            }
            other => panic!("expected table, got {:?}", other),
        }
    }

    #[test]
    fn test_image_line() {
        let els = parse_text("before\n\n![diagram](assets/d.png)\n\nafter").unwrap();
        assert_eq!(els.len(), 3);
        match &els[1].kind {
            ElementKind::ImageRef { src } => assert_eq!(src, "assets/d.png"),
            other => panic!("expected image ref, got {:?}", other),
        }
        assert_eq!(els[1].text, "diagram");
    }

    #[test]
    fn test_quote_block() {
        let els = parse_text("> quoted line one\n> quoted line two").unwrap();
        assert_eq!(els.len(), 1);
        assert!(matches!(els[0].kind, ElementKind::Quote));
        assert_eq!(els[0].text, "quoted line one\nquoted line two");
    }

    #[test]
    fn test_line_numbers_one_based() {
        let els = parse_text("first\n\nsecond").unwrap();
        assert_eq!(els[0].line_start, 1);
        assert_eq!(els[1].line_start, 3);
    }

    #[test]
    fn test_over_deep_heading_is_a_paragraph() {
        let els = parse_text("####### too deep\nnext line").unwrap();
        assert_eq!(els.len(), 1);
        assert!(matches!(els[0].kind, ElementKind::Paragraph));
        assert_eq!(els[0].text, "####### too deep\nnext line");
    }

    #[test]
    fn test_empty_input() {
        let els = parse_text("").unwrap();
        assert!(els.is_empty());
    }
}
