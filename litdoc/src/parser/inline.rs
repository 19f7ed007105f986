use crate::block::narrative::{INLINE_CLOSE, INLINE_OPEN, InlineExpression};
use crate::parser::error::ParseError;
use crate::parser::structural::{Fence, fence_closes, fence_opens};

/// Find `«expr»` spans in narrative text.
///
/// Text inside plain fenced code blocks and backtick code spans is skipped.
/// Inline expressions cannot span lines. `base` and `first_line` locate
/// `text` in the document for error reporting.
pub(crate) fn scan_inline_expressions(
    text: &str,
    base: usize,
    first_line: usize,
    file_id: usize,
) -> Result<Vec<InlineExpression>, ParseError> {
    let mut found = Vec::new();
    let mut fence: Option<Fence> = None;
    let mut line_start = 0;

    for (line_no, line) in text.split_inclusive('\n').enumerate() {
        let start = line_start;
        line_start += line.len();
        let content = line.trim_end_matches(['\n', '\r']);

        if let Some(open) = &fence {
            if fence_closes(content, open) {
                fence = None;
            }
            continue;
        }
        if let Some((open, _)) = fence_opens(content) {
            fence = Some(open);
            continue;
        }

        scan_line(content, start, &mut found).map_err(|(message, at)| {
            let abs = base + start + at;
            ParseError::new(message, abs..abs + 2, first_line + line_no, file_id)
        })?;
    }

    Ok(found)
}

/// Scan one line. Errors are `(message, offset within line)`.
fn scan_line(
    line: &str,
    line_offset: usize,
    found: &mut Vec<InlineExpression>,
) -> Result<(), (&'static str, usize)> {
    let mut open: Option<usize> = None;
    let mut pos = 0;

    while pos < line.len() {
        let c = match line[pos..].chars().next() {
            Some(c) => c,
            None => break,
        };

        if c == '`' && open.is_none() {
            let run = line[pos..].chars().take_while(|&c| c == '`').count();
            pos = match find_backtick_run(line, pos + run, run) {
                Some(end) => end,
                None => pos + run,
            };
            continue;
        }

        if c == INLINE_OPEN {
            if open.is_some() {
                return Err(("nested inline expression", pos));
            }
            open = Some(pos);
        } else if c == INLINE_CLOSE {
            let Some(start) = open.take() else {
                return Err(("`»` without a matching `«`", pos));
            };
            let expression = line[start + INLINE_OPEN.len_utf8()..pos].trim();
            if expression.is_empty() {
                return Err(("empty inline expression", start));
            }
            found.push(InlineExpression {
                expression: expression.to_string(),
                range: line_offset + start..line_offset + pos + INLINE_CLOSE.len_utf8(),
            });
        }
        pos += c.len_utf8();
    }

    match open {
        Some(start) => Err(("unterminated inline expression", start)),
        None => Ok(()),
    }
}

/// Byte offset just past the next run of exactly `len` backticks at or after `from`.
fn find_backtick_run(line: &str, from: usize, len: usize) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'`' {
            let run = bytes[i..].iter().take_while(|&&b| b == b'`').count();
            if run == len {
                return Some(i + run);
            }
            i += run;
        } else {
            i += 1;
        }
    }
    None
}
