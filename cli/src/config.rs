use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use knitter::{MemoryDatabase, Resource, Resources, Table, Value};
use serde::Deserialize;

/// Name of the project configuration file looked up next to the document.
pub const CONFIG_FILE: &str = "litdoc.toml";

/// Project configuration (`litdoc.toml`).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Output format used when `--to` is not given. Overrides the header.
    #[serde(default)]
    pub format: Option<String>,

    /// Directory for rendered reports, relative to the config file.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// In-memory databases made available to `connection=` chunks.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub tables: BTreeMap<String, TableConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<toml::Value>>,
}

impl Config {
    /// Load `explicit` if given, else `litdoc.toml` beside `document`.
    /// A missing implicit config is not an error. `output_dir` comes back
    /// resolved against the config file's directory.
    pub fn load(explicit: Option<&Path>, document: &Path) -> Result<Config, String> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let candidate = document
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(CONFIG_FILE);
                if !candidate.is_file() {
                    return Ok(Config::default());
                }
                candidate
            }
        };

        let text = std::fs::read_to_string(&path)
            .map_err(|e| format!("cannot read config '{}': {}", path.display(), e))?;
        let mut config = Config::parse(&text).map_err(|e| format!("{}: {}", path.display(), e))?;

        if let Some(base) = path.parent() {
            config.output_dir = config
                .output_dir
                .take()
                .map(|dir| if dir.is_relative() { base.join(dir) } else { dir });
        }
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Config, String> {
        let config: Config = toml::from_str(text).map_err(|e| format!("invalid config: {}", e))?;
        for (name, connection) in &config.connections {
            connection.to_database(name)?;
        }
        Ok(config)
    }

    /// Fresh resources for one render. Each call builds new handles.
    pub fn resources(&self) -> Result<Resources, String> {
        connections_to_resources(&self.connections)
    }
}

pub fn connections_to_resources(connections: &BTreeMap<String, ConnectionConfig>) -> Result<Resources, String> {
    let mut resources: Resources = Vec::new();
    for (name, connection) in connections {
        let db = connection.to_database(name)?;
        resources.push((name.clone(), Box::new(db) as Box<dyn Resource>));
    }
    Ok(resources)
}

impl ConnectionConfig {
    fn to_database(&self, name: &str) -> Result<MemoryDatabase, String> {
        let mut db = MemoryDatabase::new(name);
        for (table_name, table) in &self.tables {
            let table = table
                .to_table()
                .map_err(|e| format!("connection '{}', table '{}': {}", name, table_name, e))?;
            db.insert_table(table_name.clone(), table);
        }
        Ok(db)
    }
}

impl TableConfig {
    fn to_table(&self) -> Result<Table, String> {
        let mut table = Table::new(self.columns.clone());
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(format!(
                    "row {} has {} value(s), expected {}",
                    i + 1,
                    row.len(),
                    self.columns.len()
                ));
            }
            let row = row.iter().map(toml_to_value).collect::<Result<Vec<_>, _>>()?;
            table.rows.push(row);
        }
        Ok(table)
    }
}

/// Convert a TOML scalar or array to a runtime value.
pub fn toml_to_value(val: &toml::Value) -> Result<Value, String> {
    match val {
        toml::Value::Integer(n) => Ok(Value::Number(*n as f64)),
        toml::Value::Float(f) => Ok(Value::Number(*f)),
        toml::Value::Boolean(b) => Ok(Value::Boolean(*b)),
        toml::Value::String(s) => Ok(Value::String(s.clone())),
        toml::Value::Datetime(d) => Ok(Value::String(d.to_string())),
        toml::Value::Array(items) => Ok(Value::List(
            items.iter().map(toml_to_value).collect::<Result<_, _>>()?,
        )),
        toml::Value::Table(_) => Err("tables are not supported as values".to_string()),
    }
}
