use crate::block::chunk::{ChunkOption, OptionValue};
use crate::parser::error::ParseError;

/// Parsed contents of a chunk's `{...}` info string.
#[derive(Debug)]
pub(crate) struct ChunkHeader {
    pub engine: String,
    pub label: Option<String>,
    pub options: Vec<ChunkOption>,
}

/// Parse a chunk info string such as `{calc summary, echo=FALSE, fig.width=7}`.
///
/// `base` is the absolute byte offset of `info` in the document; `line` is
/// the fence line, used for every error this produces.
pub(crate) fn parse_chunk_header(
    info: &str,
    base: usize,
    line: usize,
    file_id: usize,
) -> Result<ChunkHeader, ParseError> {
    let lead = info.len() - info.trim_start().len();
    let trimmed = info.trim();
    let whole = base..base + info.len();

    let Some(inner) = trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
    else {
        return Err(ParseError::new(
            "malformed chunk header: expected `{engine ...}`",
            whole,
            line,
            file_id,
        )
        .with_note("chunk headers look like ```{calc label, echo=FALSE}"));
    };
    // absolute offset of `inner`
    let inner_base = base + lead + 1;

    let segments = split_segments(inner).map_err(|at| {
        ParseError::new(
            "unterminated quoted string in chunk header",
            inner_base + at..inner_base + inner.len(),
            line,
            file_id,
        )
    })?;

    let mut segments = segments.into_iter();
    let (first_start, first) = segments.next().unwrap_or((0, ""));
    let first_lead = first.len() - first.trim_start().len();
    let first = first.trim();

    let (engine, rest) = match first.find(char::is_whitespace) {
        Some(pos) => (&first[..pos], first[pos..].trim_start()),
        None => (first, ""),
    };
    if engine.is_empty() || engine.contains('=') {
        return Err(ParseError::new(
            "chunk header is missing an engine name",
            whole,
            line,
            file_id,
        ));
    }

    let mut label = None;
    let mut options: Vec<ChunkOption> = Vec::new();
    let mut pending: Vec<(usize, &str)> = Vec::new();

    if !rest.is_empty() {
        // `{calc echo=FALSE}` has no label, just an option after the engine.
        let rest_start = first_start + first_lead + (first.len() - rest.len());
        if rest.contains('=') {
            pending.push((rest_start, rest));
        } else {
            label = Some(rest.to_string());
        }
    }
    pending.extend(segments);

    for (start, segment) in pending {
        let seg_lead = segment.len() - segment.trim_start().len();
        let text = segment.trim();
        let span = inner_base + start + seg_lead..inner_base + start + seg_lead + text.len();
        if text.is_empty() {
            return Err(ParseError::new("empty chunk option", span, line, file_id));
        }
        let Some((key, value)) = text.split_once('=') else {
            return Err(ParseError::new(
                format!("expected `key=value` in chunk header, found `{}`", text),
                span,
                line,
                file_id,
            ));
        };
        let key = key.trim().replace('.', "_");
        if key.is_empty() {
            return Err(ParseError::new("chunk option has no name", span, line, file_id));
        }
        let value = OptionValue::parse(value);

        if key == "label" {
            if label.is_some() {
                return Err(ParseError::new(
                    "chunk label given twice",
                    span,
                    line,
                    file_id,
                ));
            }
            label = Some(value.to_string());
            continue;
        }
        if options.iter().any(|opt| opt.key == key) {
            return Err(ParseError::new(
                format!("duplicate chunk option `{}`", key),
                span,
                line,
                file_id,
            ));
        }
        options.push(ChunkOption { key, value, span });
    }

    Ok(ChunkHeader {
        engine: engine.to_string(),
        label,
        options,
    })
}

/// Split on commas outside quotes. Returns `(offset, segment)` pairs, or the
/// offset of an unterminated quote.
fn split_segments(inner: &str) -> Result<Vec<(usize, &str)>, usize> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut quote: Option<(char, usize)> = None;

    for (pos, c) in inner.char_indices() {
        match quote {
            Some((q, _)) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some((c, pos)),
            None if c == ',' => {
                segments.push((start, &inner[start..pos]));
                start = pos + 1;
            }
            None => {}
        }
    }
    if let Some((_, at)) = quote {
        return Err(at);
    }
    segments.push((start, &inner[start..]));
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(info: &str) -> Result<ChunkHeader, ParseError> {
        parse_chunk_header(info, 100, 7, 0)
    }

    #[test]
    fn engine_only() {
        let h = parse("{calc}").unwrap();
        assert_eq!(h.engine, "calc");
        assert_eq!(h.label, None);
        assert!(h.options.is_empty());
    }

    #[test]
    fn label_and_options() {
        let h = parse(" {calc model-fit, echo=FALSE, fig.width=7, results=\"asis\"}").unwrap();
        assert_eq!(h.engine, "calc");
        assert_eq!(h.label.as_deref(), Some("model-fit"));
        let keys: Vec<&str> = h.options.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["echo", "fig_width", "results"]);
        assert_eq!(h.options[0].value, OptionValue::Boolean(false));
        assert_eq!(h.options[1].value, OptionValue::Number(7.0));
        assert_eq!(h.options[2].value, OptionValue::String("asis".into()));
    }

    #[test]
    fn option_directly_after_engine() {
        let h = parse("{sql connection=db, output_var=trials}").unwrap();
        assert_eq!(h.engine, "sql");
        assert_eq!(h.label, None);
        assert_eq!(h.options.len(), 2);
        assert_eq!(h.options[0].key, "connection");
    }

    #[test]
    fn option_spans_point_at_text() {
        let info = "{calc, echo=FALSE}";
        let h = parse(info).unwrap();
        let span = h.options[0].span.clone();
        assert_eq!(&info[span.start - 100..span.end - 100], "echo=FALSE");
    }

    #[test]
    fn label_option() {
        let h = parse("{calc, label=setup}").unwrap();
        assert_eq!(h.label.as_deref(), Some("setup"));
        assert!(h.options.is_empty());
        assert!(parse("{calc setup, label=other}").is_err());
    }

    #[test]
    fn quoted_commas_stay_together() {
        let h = parse("{calc, fig_cap=\"a, b\"}").unwrap();
        assert_eq!(h.options[0].value, OptionValue::String("a, b".into()));
    }

    #[test]
    fn malformed_headers() {
        assert!(parse("{calc").is_err());
        assert!(parse("{}").is_err());
        assert!(parse("{calc, echo}").is_err());
        assert!(parse("{calc, echo=TRUE, echo=FALSE}").is_err());
        assert!(parse("{calc, fig_cap=\"open}").is_err());
        let err = parse("{calc, =3}").unwrap_err();
        assert_eq!(err.line, 7);
    }
}
