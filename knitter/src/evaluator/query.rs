//! `sql`: runs chunk code as a query against a named connection resource.

use crate::context::Context;
use crate::evaluator::{Artifact, EvalError, EvalResult, Evaluator};
use crate::options::ChunkOptions;
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryEvaluator;

impl Evaluator for QueryEvaluator {
    fn name(&self) -> &str {
        "sql"
    }

    fn aliases(&self) -> &[&str] {
        &["query"]
    }

    fn validate(&self, options: &ChunkOptions) -> Result<(), String> {
        if options.connection.is_none() {
            return Err(format!(
                "`{}` chunks need a `connection` option naming a resource",
                self.name()
            ));
        }
        Ok(())
    }

    fn evaluate(
        &self,
        code: &str,
        options: &ChunkOptions,
        ctx: &mut Context,
    ) -> Result<EvalResult, EvalError> {
        let Some(name) = options.connection.as_deref() else {
            return Err(EvalError::runtime("no `connection` option given"));
        };

        let table = {
            let closed = ctx.is_closed(name);
            let mut resource = ctx.resource(name).ok_or_else(|| {
                let message = if closed {
                    format!("resource '{}' was closed by an earlier block", name)
                } else {
                    format!("no resource named '{}'", name)
                };
                EvalError::resource(name, message)
            })?;
            let connection = resource.as_connection().ok_or_else(|| {
                EvalError::resource(name, format!("resource '{}' does not accept queries", name))
            })?;
            connection
                .query(code.trim())
                .map_err(|err| EvalError::resource(name, err.to_string()))?
        };

        match &options.output_var {
            Some(var) => {
                ctx.set(var.clone(), Value::Table(table.clone()));
                Ok(EvalResult {
                    value: Value::Table(table),
                    artifacts: Vec::new(),
                })
            }
            None => Ok(EvalResult {
                value: Value::Table(table.clone()),
                artifacts: vec![Artifact::Table(table)],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvalErrorKind;
    use crate::resource::MemoryDatabase;
    use crate::value::Table;

    fn trials() -> MemoryDatabase {
        let mut table = Table::new(vec!["arm".into(), "response".into()]);
        table.rows.push(vec!["placebo".into(), 0.2.into()]);
        table.rows.push(vec!["drug".into(), 0.7.into()]);
        MemoryDatabase::new("clinic").with_table("trials", table)
    }

    fn options(connection: Option<&str>, output_var: Option<&str>) -> ChunkOptions {
        ChunkOptions {
            connection: connection.map(String::from),
            output_var: output_var.map(String::from),
            ..ChunkOptions::default()
        }
    }

    #[test]
    fn requires_connection_option() {
        assert!(QueryEvaluator.validate(&options(None, None)).is_err());
        assert!(QueryEvaluator.validate(&options(Some("db"), None)).is_ok());
    }

    #[test]
    fn displays_result_table() {
        let mut ctx = Context::new();
        ctx.bind_resource("db", Box::new(trials())).unwrap();
        let result = QueryEvaluator
            .evaluate(
                "SELECT arm FROM trials WHERE response > 0.5",
                &options(Some("db"), None),
                &mut ctx,
            )
            .unwrap();
        match &result.artifacts[..] {
            [Artifact::Table(table)] => assert_eq!(table.rows, vec![vec![Value::from("drug")]]),
            other => panic!("unexpected artifacts {:?}", other),
        }
    }

    #[test]
    fn output_var_binds_without_display() {
        let mut ctx = Context::new();
        ctx.bind_resource("db", Box::new(trials())).unwrap();
        let result = QueryEvaluator
            .evaluate("SELECT * FROM trials", &options(Some("db"), Some("trials")), &mut ctx)
            .unwrap();
        assert!(result.artifacts.is_empty());
        assert!(matches!(ctx.get("trials"), Some(Value::Table(t)) if t.rows.len() == 2));
    }

    #[test]
    fn missing_resource() {
        let mut ctx = Context::new();
        let err = QueryEvaluator
            .evaluate("SELECT * FROM trials", &options(Some("db"), None), &mut ctx)
            .unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Resource("db".into()));
        assert_eq!(err.message, "no resource named 'db'");
    }

    #[test]
    fn closed_resource_fails() {
        let mut ctx = Context::new();
        ctx.bind_resource("db", Box::new(trials())).unwrap();
        ctx.close_resource("db").unwrap();
        let err = QueryEvaluator
            .evaluate("SELECT * FROM trials", &options(Some("db"), None), &mut ctx)
            .unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::Resource("db".into()));
        assert_eq!(err.message, "resource 'db' was closed by an earlier block");
    }
}
