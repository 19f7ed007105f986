pub mod error;
mod header;
mod inline;
mod options;
mod structural;

pub use error::ParseError;

use crate::Document;

/// Parser entry point.
pub struct Parser {
    source: String,
    file_id: usize,
}

impl Parser {
    pub fn new(source: String, file_id: usize) -> Self {
        Parser { source, file_id }
    }

    /// Parse the source text into a complete Document.
    pub fn parse(&self) -> Result<Document, Vec<ParseError>> {
        let blocks = structural::parse_blocks(&self.source, self.file_id)?;
        Ok(Document {
            blocks,
            source_id: self.file_id,
        })
    }
}
