use std::ops::Range;

/// Opening delimiter of an inline expression.
pub const INLINE_OPEN: char = '«';
/// Closing delimiter of an inline expression.
pub const INLINE_CLOSE: char = '»';

/// A run of prose between code chunks.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeBlock {
    pub index: usize,
    /// Source text, verbatim.
    pub text: String,
    /// Inline expressions in `text`, in order of appearance.
    pub inlines: Vec<InlineExpression>,
    /// Byte span in source.
    pub span: Range<usize>,
    /// 1-based line where the block starts.
    pub line: usize,
}

/// An `«expr»` span inside narrative text.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineExpression {
    /// Expression source with surrounding whitespace trimmed.
    pub expression: String,
    /// Byte range within the block's `text`, delimiters included.
    pub range: Range<usize>,
}

impl NarrativeBlock {
    /// Rebuild the text with every inline expression replaced by `render(expr)`.
    /// Expressions are rendered left to right; the first error stops the walk.
    pub fn substitute<E>(
        &self,
        mut render: impl FnMut(&InlineExpression) -> Result<String, E>,
    ) -> Result<String, E> {
        let mut out = String::with_capacity(self.text.len());
        let mut cursor = 0;
        for inline in &self.inlines {
            out.push_str(&self.text[cursor..inline.range.start]);
            out.push_str(&render(inline)?);
            cursor = inline.range.end;
        }
        out.push_str(&self.text[cursor..]);
        Ok(out)
    }

    /// Absolute source span of an inline expression.
    pub fn inline_span(&self, inline: &InlineExpression) -> Range<usize> {
        self.span.start + inline.range.start..self.span.start + inline.range.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(text: &str, inlines: Vec<InlineExpression>) -> NarrativeBlock {
        NarrativeBlock {
            index: 0,
            text: text.to_string(),
            inlines,
            span: 10..10 + text.len(),
            line: 1,
        }
    }

    #[test]
    fn substitute_replaces_ranges() {
        let text = "a «x» b «y»!";
        let x = text.find('«').unwrap();
        let y = text.rfind('«').unwrap();
        let b = block(
            text,
            vec![
                InlineExpression {
                    expression: "x".into(),
                    range: x..x + "«x»".len(),
                },
                InlineExpression {
                    expression: "y".into(),
                    range: y..y + "«y»".len(),
                },
            ],
        );
        let out: Result<String, ()> = b.substitute(|e| Ok(e.expression.to_uppercase()));
        assert_eq!(out.unwrap(), "a X b Y!");
        assert_eq!(b.inline_span(&b.inlines[0]).start, 10 + x);
    }

    #[test]
    fn substitute_stops_at_first_error() {
        let b = block(
            "«a»«b»",
            vec![
                InlineExpression {
                    expression: "a".into(),
                    range: 0..5,
                },
                InlineExpression {
                    expression: "b".into(),
                    range: 5..10,
                },
            ],
        );
        let mut seen = Vec::new();
        let out = b.substitute(|e| {
            seen.push(e.expression.clone());
            Err::<String, _>("boom")
        });
        assert_eq!(out, Err("boom"));
        assert_eq!(seen, vec!["a".to_string()]);
    }
}
