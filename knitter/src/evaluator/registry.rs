//! Lookup of evaluators by engine name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{CalcEvaluator, Evaluator, QueryEvaluator};

/// Evaluators keyed by engine name and alias.
///
/// The default evaluator also handles inline expressions.
#[derive(Clone)]
pub struct EvaluatorRegistry {
    evaluators: HashMap<String, Arc<dyn Evaluator>>,
    default: Arc<dyn Evaluator>,
}

impl EvaluatorRegistry {
    /// The shipped evaluators: `calc` (default) and `sql`.
    pub fn new() -> Self {
        let mut registry = Self::with_default(Arc::new(CalcEvaluator));
        registry.register(Arc::new(QueryEvaluator));
        registry
    }

    /// A registry holding only `default`.
    pub fn with_default(default: Arc<dyn Evaluator>) -> Self {
        let mut registry = Self {
            evaluators: HashMap::new(),
            default: Arc::clone(&default),
        };
        registry.register(default);
        registry
    }

    /// Register under the evaluator's name and aliases, replacing whatever
    /// held those names before.
    pub fn register(&mut self, evaluator: Arc<dyn Evaluator>) {
        for alias in evaluator.aliases() {
            self.evaluators
                .insert(alias.to_string(), Arc::clone(&evaluator));
        }
        self.evaluators
            .insert(evaluator.name().to_string(), evaluator);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Evaluator>> {
        self.evaluators.get(name).cloned()
    }

    pub fn default_evaluator(&self) -> Arc<dyn Evaluator> {
        Arc::clone(&self.default)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.evaluators.contains_key(name)
    }

    /// Registered names and aliases, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.evaluators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for EvaluatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("evaluators", &self.names())
            .field("default", &self.default.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_evaluators() {
        let registry = EvaluatorRegistry::new();
        assert_eq!(registry.default_evaluator().name(), "calc");
        assert_eq!(registry.get("sql").map(|e| e.name().to_string()).as_deref(), Some("sql"));
        assert!(registry.get("python").is_none());
    }

    #[test]
    fn aliases_resolve_to_same_evaluator() {
        let registry = EvaluatorRegistry::new();
        let calc = registry.get("calc").unwrap();
        let r = registry.get("r").unwrap();
        assert!(Arc::ptr_eq(&calc, &r));
        assert!(registry.names().contains(&"query"));
    }
}
