//! Typed view of the YAML metadata header.

use litdoc::block::HeaderBlock;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::error::ConfigError;
use crate::value::{Table, Value};

/// Document metadata. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Authors>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(
        rename = "abstract",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub abstract_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputSpec>,
    #[serde(default, skip_serializing_if = "Mapping::is_empty")]
    pub params: Mapping,
}

/// `author: Name` or `author: [A, B]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Authors {
    One(String),
    Many(Vec<String>),
}

/// `output: html_document`, or a mapping whose single key names the format
/// and whose value holds format options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputSpec {
    Name(String),
    Detailed(Mapping),
}

impl OutputSpec {
    pub fn format_name(&self) -> Option<&str> {
        match self {
            OutputSpec::Name(name) => Some(name),
            OutputSpec::Detailed(mapping) => mapping.keys().next()?.as_str(),
        }
    }
}

impl Metadata {
    /// Check the header's fields against the known keys and their shapes.
    pub fn from_header(header: &HeaderBlock) -> Result<Metadata, ConfigError> {
        let metadata: Metadata =
            serde_yaml::from_value(serde_yaml::Value::Mapping(header.fields.clone())).map_err(
                |err| {
                    ConfigError::at(
                        format!("invalid metadata header: {}", err),
                        header.index,
                        header.span.clone(),
                        header.line,
                    )
                    .with_note(
                        "recognised keys: title, subtitle, author, date, abstract, keywords, output, params",
                    )
                },
            )?;

        if let Some(OutputSpec::Detailed(mapping)) = &metadata.output {
            if mapping.len() != 1 || metadata.output_format().is_none() {
                return Err(ConfigError::at(
                    "`output` must name exactly one format",
                    header.index,
                    header.span.clone(),
                    header.line,
                ));
            }
        }

        metadata.param_values().map_err(|message| {
            ConfigError::at(message, header.index, header.span.clone(), header.line)
        })?;

        Ok(metadata)
    }

    pub fn authors(&self) -> Vec<&str> {
        match &self.author {
            Some(Authors::One(name)) => vec![name.as_str()],
            Some(Authors::Many(names)) => names.iter().map(String::as_str).collect(),
            None => Vec::new(),
        }
    }

    pub fn output_format(&self) -> Option<&str> {
        self.output.as_ref()?.format_name()
    }

    /// Declared parameters in header order, converted to values.
    pub fn param_values(&self) -> Result<Vec<(String, Value)>, String> {
        self.params
            .iter()
            .map(|(key, value)| {
                let name = key
                    .as_str()
                    .ok_or_else(|| "parameter names must be strings".to_string())?;
                let value = from_yaml(value)
                    .map_err(|found| format!("parameter `{}` cannot be {}", name, found))?;
                Ok((name.to_string(), value))
            })
            .collect()
    }

    /// The `params` record: declared parameters with overrides applied.
    /// Overriding an undeclared parameter is an error.
    pub fn params_table(&self, overrides: &[(String, Value)]) -> Result<Table, String> {
        let mut fields = self.param_values()?;
        for (name, value) in overrides {
            match fields.iter_mut().find(|(declared, _)| declared == name) {
                Some(field) => field.1 = value.clone(),
                None => {
                    return Err(format!(
                        "parameter `{}` is not declared in the document header",
                        name
                    ));
                }
            }
        }
        Ok(Table::record(fields))
    }
}

/// Convert a YAML scalar or sequence. Mappings have no value form.
pub fn from_yaml(value: &serde_yaml::Value) -> Result<Value, &'static str> {
    use serde_yaml::Value as Yaml;
    match value {
        Yaml::Null => Ok(Value::Null),
        Yaml::Bool(b) => Ok(Value::Boolean(*b)),
        Yaml::Number(n) => n.as_f64().map(Value::Number).ok_or("a non-finite number"),
        Yaml::String(s) => Ok(Value::String(s.clone())),
        Yaml::Sequence(items) => items.iter().map(from_yaml).collect::<Result<_, _>>().map(Value::List),
        Yaml::Mapping(_) => Err("a nested mapping"),
        Yaml::Tagged(tagged) => from_yaml(&tagged.value),
    }
}
