use crate::fragment::RenderOutcome;

use super::{RenderError, Renderer, Report, figure_attachments};

/// The outcome itself, serialised. Useful for tooling and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn name(&self) -> &str {
        "json"
    }

    fn render(&self, outcome: &RenderOutcome) -> Result<Report, RenderError> {
        let mut body = serde_json::to_string_pretty(outcome)?;
        body.push('\n');
        Ok(Report {
            format: self.name().to_string(),
            extension: "json".to_string(),
            body,
            attachments: figure_attachments(outcome),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExecutionError, TerminalError};
    use crate::fragment::Fragment;

    #[test]
    fn serialises_fragments_and_error() {
        let outcome = RenderOutcome {
            fragments: vec![Fragment::Text {
                block: 0,
                text: "Hi".into(),
            }],
            terminal_error: Some(TerminalError {
                block: 1,
                line: 4,
                span: 3..9,
                error: ExecutionError::UnboundReference { name: "n".into() },
            }),
            ..RenderOutcome::default()
        };
        let report = JsonRenderer.render(&outcome).unwrap();
        let json: serde_json::Value = serde_json::from_str(&report.body).unwrap();
        assert_eq!(json["fragments"][0]["fragment"], "text");
        assert_eq!(json["fragments"][0]["text"], "Hi");
        assert_eq!(json["terminal_error"]["line"], 4);
        assert_eq!(json["terminal_error"]["error"]["kind"], "unbound_reference");
        assert_eq!(json["terminal_error"]["error"]["name"], "n");
    }
}
