use serde::Serialize;

use crate::error::TerminalError;
use crate::evaluator::{Artifact, Image};
use crate::metadata::Metadata;
use crate::options::ResultsMode;
use crate::value::Table;

/// One piece of rendered content, tagged with the block that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "fragment", rename_all = "snake_case")]
pub enum Fragment {
    /// Narrative text with inline expressions substituted.
    Text { block: usize, text: String },
    /// A chunk's source, shown because `echo` is on.
    CodeEcho {
        block: usize,
        engine: String,
        code: String,
    },
    Output {
        block: usize,
        output: Output,
        results: ResultsMode,
        /// Prefix for text output lines.
        comment: String,
    },
    /// A chunk that was not evaluated (`eval=FALSE`).
    Skipped { block: usize, label: String },
}

impl Fragment {
    pub fn block(&self) -> usize {
        match self {
            Fragment::Text { block, .. }
            | Fragment::CodeEcho { block, .. }
            | Fragment::Output { block, .. }
            | Fragment::Skipped { block, .. } => *block,
        }
    }

    pub fn is_output(&self) -> bool {
        matches!(self, Fragment::Output { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Fragment::Output {
                output: Output::Error { .. },
                ..
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Output {
    Text(String),
    Table(Table),
    Image(Image),
    /// A failed block: the error and whatever it produced first.
    Error {
        message: String,
        partial: Vec<Artifact>,
    },
}

impl From<Artifact> for Output {
    fn from(artifact: Artifact) -> Self {
        match artifact {
            Artifact::Text(text) => Output::Text(text),
            Artifact::Table(table) => Output::Table(table),
            Artifact::Image(image) => Output::Image(image),
        }
    }
}

/// Everything a render produced, ready for a renderer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderOutcome {
    pub header: Metadata,
    pub fragments: Vec<Fragment>,
    /// Set when execution stopped early. Fragments then cover only the
    /// blocks up to and including the failed one.
    pub terminal_error: Option<TerminalError>,
}

impl RenderOutcome {
    pub fn is_complete(&self) -> bool {
        self.terminal_error.is_none()
    }

    /// Every image in document order, including those inside error fragments.
    pub fn images(&self) -> Vec<&Image> {
        let mut images = Vec::new();
        for fragment in &self.fragments {
            if let Fragment::Output { output, .. } = fragment {
                match output {
                    Output::Image(image) => images.push(image),
                    Output::Error { partial, .. } => {
                        images.extend(partial.iter().filter_map(|artifact| match artifact {
                            Artifact::Image(image) => Some(image),
                            _ => None,
                        }))
                    }
                    Output::Text(_) | Output::Table(_) => {}
                }
            }
        }
        images
    }
}
