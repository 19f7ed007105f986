use std::ops::Range;

use crate::block::{Block, CodeBlock, HeaderBlock, NarrativeBlock};
use crate::parser::error::ParseError;
use crate::parser::header::parse_header;
use crate::parser::inline::scan_inline_expressions;
use crate::parser::options::parse_chunk_header;

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Split source text into header, narrative and code blocks.
pub fn parse_blocks(source: &str, file_id: usize) -> Result<Vec<Block>, Vec<ParseError>> {
    let lines = split_lines(source);
    let mut state = ParseState::new(source, &lines, file_id);
    state.process_lines()?;
    state.finalize()
}

// ---------------------------------------------------------------------------
// Lines and fences
// ---------------------------------------------------------------------------

/// A source line. `end` excludes the line terminator, `next` is the start
/// of the following line.
#[derive(Debug, Clone, Copy)]
struct Line {
    start: usize,
    end: usize,
    next: usize,
}

fn split_lines(source: &str) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut start = 0;
    for piece in source.split_inclusive('\n') {
        let next = start + piece.len();
        let content = piece.trim_end_matches(['\n', '\r']);
        lines.push(Line {
            start,
            end: start + content.len(),
            next,
        });
        start = next;
    }
    lines
}

/// An open code fence: marker character and run length.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Fence {
    pub marker: char,
    pub len: usize,
}

/// If `line` opens a fence, return it with its info string and the info
/// string's byte offset within the line.
pub(crate) fn fence_opens(line: &str) -> Option<(Fence, (usize, &str))> {
    let rest = line.trim_start_matches(' ');
    let indent = line.len() - rest.len();
    if indent > 3 {
        return None;
    }
    let marker = rest.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let len = rest.chars().take_while(|&c| c == marker).count();
    if len < 3 {
        return None;
    }
    let info = &rest[len..];
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some((Fence { marker, len }, (indent + len, info)))
}

/// Whether `line` closes `fence`: same marker, at least as long, nothing after.
pub(crate) fn fence_closes(line: &str, fence: &Fence) -> bool {
    let rest = line.trim_start_matches(' ');
    if line.len() - rest.len() > 3 {
        return false;
    }
    let len = rest.chars().take_while(|&c| c == fence.marker).count();
    len >= fence.len && rest[len..].trim().is_empty()
}

fn is_header_delimiter(line: &str) -> bool {
    line.trim_end() == "---"
}

fn is_header_terminator(line: &str) -> bool {
    let line = line.trim_end();
    line == "---" || line == "..."
}

/// `key:` at the start of a line, the way a YAML mapping begins.
fn looks_like_yaml_key(line: &str) -> bool {
    let Some((key, _)) = line.split_once(':') else {
        return false;
    };
    !key.is_empty()
        && !key.starts_with(char::is_whitespace)
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
}

// ---------------------------------------------------------------------------
// Parse state
// ---------------------------------------------------------------------------

struct ParseState<'a> {
    source: &'a str,
    lines: &'a [Line],
    file_id: usize,
    blocks: Vec<Block>,
    /// Start of the narrative run being accumulated, as (byte offset, line index).
    narrative_start: Option<(usize, usize)>,
    /// A plain (non-executable) fence currently open inside narrative.
    plain_fence: Option<(Fence, usize)>,
    errors: Vec<ParseError>,
}

impl<'a> ParseState<'a> {
    fn new(source: &'a str, lines: &'a [Line], file_id: usize) -> Self {
        ParseState {
            source,
            lines,
            file_id,
            blocks: Vec::new(),
            narrative_start: None,
            plain_fence: None,
            errors: Vec::new(),
        }
    }

    fn text(&self, line: &Line) -> &'a str {
        &self.source[line.start..line.end]
    }

    fn error(&self, message: impl Into<String>, span: Range<usize>, line_idx: usize) -> ParseError {
        ParseError::new(message, span, line_idx + 1, self.file_id)
    }

    fn process_lines(&mut self) -> Result<(), Vec<ParseError>> {
        let mut i = self.process_header()?;

        while i < self.lines.len() {
            let line = self.lines[i];
            let text = self.text(&line);

            // Inside a plain fence everything is verbatim narrative.
            if let Some((fence, _)) = &self.plain_fence {
                if fence_closes(text, fence) {
                    self.plain_fence = None;
                }
                i += 1;
                continue;
            }

            if let Some((fence, (info_at, info))) = fence_opens(text) {
                if info.trim_start().starts_with('{') {
                    self.flush_narrative(line.start);
                    i = self.process_chunk(i, fence, line.start + info_at, info)?;
                    continue;
                }
                self.plain_fence = Some((fence, i));
                self.narrative_start.get_or_insert((line.start, i));
                i += 1;
                continue;
            }

            if self.is_misplaced_header(i) {
                let message = if self.has_header() {
                    "duplicate metadata header"
                } else {
                    "metadata header must appear at the start of the document"
                };
                self.errors.push(
                    self.error(message, line.start..line.end, i)
                        .with_note("a document may have one `---` header, as its first block"),
                );
            }

            self.narrative_start.get_or_insert((line.start, i));
            i += 1;
        }

        if let Some((fence, open_idx)) = self.plain_fence.take() {
            let line = self.lines[open_idx];
            let mut errors = std::mem::take(&mut self.errors);
            errors.push(self.error(
                format!(
                    "unterminated code fence (expected a closing `{}`)",
                    fence.marker.to_string().repeat(fence.len)
                ),
                line.start..line.end,
                open_idx,
            ));
            return Err(errors);
        }

        self.flush_narrative(self.source.len());
        Ok(())
    }

    /// Parse a leading `---` header. Returns the index of the first line after it.
    fn process_header(&mut self) -> Result<usize, Vec<ParseError>> {
        let Some(first) = self.lines.first() else {
            return Ok(0);
        };
        let first_text = self.text(first).trim_start_matches('\u{feff}');
        if !is_header_delimiter(first_text) {
            return Ok(0);
        }

        let Some(close) = (1..self.lines.len()).find(|&j| is_header_terminator(self.text(&self.lines[j])))
        else {
            return Err(vec![
                self.error("unterminated metadata header", first.start..first.end, 0)
                    .with_note("close the header with a `---` line"),
            ]);
        };

        let body_start = self.lines.get(1).map(|l| l.start).unwrap_or(first.next);
        let body_end = self.lines[close].start;
        let yaml = &self.source[body_start..body_end];
        let span = first.start..self.lines[close].next;

        let fields = parse_header(yaml, body_start, 2, span.clone(), 1, self.file_id)
            .map_err(|err| vec![err])?;

        self.blocks.push(Block::Header(HeaderBlock {
            index: 0,
            fields,
            source: yaml.to_string(),
            span,
            line: 1,
        }));
        Ok(close + 1)
    }

    /// Parse a code chunk opening at line `open`. Returns the index of the
    /// first line after its closing fence.
    fn process_chunk(
        &mut self,
        open: usize,
        fence: Fence,
        info_base: usize,
        info: &str,
    ) -> Result<usize, Vec<ParseError>> {
        let open_line = self.lines[open];

        let Some(close) = (open + 1..self.lines.len())
            .find(|&j| fence_closes(self.text(&self.lines[j]), &fence))
        else {
            let mut errors = std::mem::take(&mut self.errors);
            errors.push(
                self.error(
                    "unterminated code chunk",
                    open_line.start..open_line.end,
                    open,
                )
                .with_note(format!(
                    "close the chunk with a `{}` line",
                    fence.marker.to_string().repeat(fence.len)
                )),
            );
            return Err(errors);
        };

        let code_start = open_line.next;
        let code_end = self.lines[close].start;

        match parse_chunk_header(info, info_base, open + 1, self.file_id) {
            Ok(header) => {
                let index = self.blocks.len();
                self.blocks.push(Block::Code(CodeBlock {
                    index,
                    engine: header.engine,
                    label: header.label,
                    options: header.options,
                    code: self.source[code_start..code_end].to_string(),
                    span: open_line.start..self.lines[close].next,
                    line: open + 1,
                }));
            }
            Err(err) => self.errors.push(err),
        }

        Ok(close + 1)
    }

    fn has_header(&self) -> bool {
        matches!(self.blocks.first(), Some(Block::Header(_)))
    }

    /// A `---` line after a blank line, followed by `key:` and a later
    /// terminator, is a YAML header block in the wrong place.
    fn is_misplaced_header(&self, i: usize) -> bool {
        if !is_header_delimiter(self.text(&self.lines[i])) {
            return false;
        }
        let after_blank = i == 0 || self.text(&self.lines[i - 1]).trim().is_empty();
        let Some(next) = self.lines.get(i + 1) else {
            return false;
        };
        after_blank
            && looks_like_yaml_key(self.text(next))
            && (i + 2..self.lines.len()).any(|j| is_header_terminator(self.text(&self.lines[j])))
    }

    /// Close the current narrative run at byte offset `end`.
    fn flush_narrative(&mut self, end: usize) {
        let Some((start, line_idx)) = self.narrative_start.take() else {
            return;
        };
        let text = &self.source[start..end];
        if text.trim().is_empty() {
            return;
        }

        match scan_inline_expressions(text, start, line_idx + 1, self.file_id) {
            Ok(inlines) => {
                let index = self.blocks.len();
                self.blocks.push(Block::Narrative(NarrativeBlock {
                    index,
                    text: text.to_string(),
                    inlines,
                    span: start..end,
                    line: line_idx + 1,
                }));
            }
            Err(err) => self.errors.push(err),
        }
    }

    fn finalize(self) -> Result<Vec<Block>, Vec<ParseError>> {
        if self.errors.is_empty() {
            Ok(self.blocks)
        } else {
            Err(self.errors)
        }
    }
}
