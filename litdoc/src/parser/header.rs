use std::ops::Range;

use serde_yaml::{Mapping, Value};

use crate::parser::error::ParseError;

/// Parse the YAML body of a metadata header.
///
/// `offset` is the byte offset of `yaml` in the document and `first_line`
/// the document line it starts on, so YAML errors point into the document.
pub(crate) fn parse_header(
    yaml: &str,
    offset: usize,
    first_line: usize,
    header_span: Range<usize>,
    header_line: usize,
    file_id: usize,
) -> Result<Mapping, ParseError> {
    if yaml.trim().is_empty() {
        return Ok(Mapping::new());
    }

    let value: Value = serde_yaml::from_str(yaml).map_err(|err| {
        let message = format!("malformed metadata header: {}", err);
        match err.location() {
            Some(loc) => {
                let at = offset + loc.index().min(yaml.len());
                ParseError::new(message, at..at, first_line + loc.line() - 1, file_id)
            }
            None => ParseError::new(message, header_span.clone(), header_line, file_id),
        }
    })?;

    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        Value::Null => Mapping::new(),
        other => {
            return Err(ParseError::new(
                format!(
                    "metadata header must be a mapping of keys to values, found {}",
                    yaml_type_name(&other)
                ),
                header_span,
                header_line,
                file_id,
            ));
        }
    };

    for key in mapping.keys() {
        if !key.is_string() {
            return Err(ParseError::new(
                format!("metadata keys must be strings, found {}", yaml_type_name(key)),
                header_span,
                header_line,
                file_id,
            ));
        }
    }

    Ok(mapping)
}

fn yaml_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
