pub mod block;
pub mod parser;

use crate::block::{Block, CodeBlock, HeaderBlock};

/// A parsed literate document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Blocks in source order. `blocks[i].index() == i`.
    pub blocks: Vec<Block>,
    /// The source file ID (for error reporting with codespan-reporting).
    pub source_id: usize,
}

impl Document {
    /// The metadata header, if the document has one.
    pub fn header(&self) -> Option<&HeaderBlock> {
        match self.blocks.first() {
            Some(Block::Header(header)) => Some(header),
            _ => None,
        }
    }

    /// All code chunks, in document order.
    pub fn code_blocks(&self) -> impl Iterator<Item = &CodeBlock> {
        self.blocks.iter().filter_map(|block| match block {
            Block::Code(code) => Some(code),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
