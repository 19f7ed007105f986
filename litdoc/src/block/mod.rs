pub mod chunk;
pub mod narrative;

use std::ops::Range;

use serde_yaml::Mapping;

pub use chunk::{ChunkOption, CodeBlock, OptionValue};
pub use narrative::{InlineExpression, NarrativeBlock};

/// One unit of a literate document.
/// Blocks are executed and rendered strictly in `index` order.
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    /// The YAML metadata header (at most one, always first).
    Header(HeaderBlock),
    /// Prose, possibly containing inline expressions.
    Narrative(NarrativeBlock),
    /// An executable code chunk.
    Code(CodeBlock),
}

/// The leading `---` delimited metadata block.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderBlock {
    pub index: usize,
    /// Parsed YAML mapping, keys in source order.
    pub fields: Mapping,
    /// Raw YAML text between the delimiter lines.
    pub source: String,
    /// Byte span in source, delimiter lines included.
    pub span: Range<usize>,
    /// 1-based line of the opening delimiter.
    pub line: usize,
}

impl Block {
    pub fn index(&self) -> usize {
        match self {
            Block::Header(b) => b.index,
            Block::Narrative(b) => b.index,
            Block::Code(b) => b.index,
        }
    }

    pub fn span(&self) -> &Range<usize> {
        match self {
            Block::Header(b) => &b.span,
            Block::Narrative(b) => &b.span,
            Block::Code(b) => &b.span,
        }
    }

    pub fn line(&self) -> usize {
        match self {
            Block::Header(b) => b.line,
            Block::Narrative(b) => b.line,
            Block::Code(b) => b.line,
        }
    }

    /// The block's source text: YAML for a header, prose for narrative,
    /// chunk body for code.
    pub fn source(&self) -> &str {
        match self {
            Block::Header(b) => &b.source,
            Block::Narrative(b) => &b.text,
            Block::Code(b) => &b.code,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Block::Header(_) => "header",
            Block::Narrative(_) => "narrative",
            Block::Code(_) => "code",
        }
    }
}
