use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use tracing::{debug, warn};

use crate::evaluator::EvalError;
use crate::resource::{Resource, ResourceError, ResourceHandle, Resources};
use crate::value::Value;

/// Mutable state shared by every block of one render.
///
/// Bindings are plain values; resources are owned handles that are closed
/// exactly once, by `close_resource`, by `release_resources` or when the
/// context is dropped. Evaluators only ever borrow a [`ResourceHandle`].
pub struct Context {
    bindings: HashMap<String, Value>,
    resources: BTreeMap<String, Box<dyn Resource>>,
    /// Names closed early through `close_resource`.
    closed: BTreeSet<String>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            bindings: HashMap::new(),
            resources: BTreeMap::new(),
            closed: BTreeSet::new(),
        }
    }

    /// A context seeded with render-time resources.
    ///
    /// A later entry with the same name replaces (and closes) an earlier one.
    pub fn with_resources(resources: Resources) -> Self {
        let mut ctx = Context::new();
        for (name, handle) in resources {
            if let Err(err) = ctx.bind_resource(name.clone(), handle) {
                warn!(resource = %name, "failed to close replaced resource: {}", err);
            }
        }
        ctx
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Like `get`, but an absent name is an unbound-reference error.
    pub fn lookup(&self, name: &str) -> Result<&Value, EvalError> {
        self.bindings
            .get(name)
            .ok_or_else(|| EvalError::unbound(name))
    }

    /// Bind or overwrite a name.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Bound names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Register a resource under `name`. Any resource previously registered
    /// under the same name is closed first.
    pub fn bind_resource(
        &mut self,
        name: impl Into<String>,
        handle: Box<dyn Resource>,
    ) -> Result<(), ResourceError> {
        let name = name.into();
        debug!(resource = %name, kind = %handle.describe(), "binding resource");
        self.closed.remove(&name);
        match self.resources.insert(name, handle) {
            Some(mut previous) => previous.close(),
            None => Ok(()),
        }
    }

    pub fn resource(&mut self, name: &str) -> Option<ResourceHandle<'_>> {
        self.resources
            .get_mut(name)
            .map(|handle| ResourceHandle::new(handle.as_mut()))
    }

    /// Whether `name` was bound and then closed by `close_resource`.
    pub fn is_closed(&self, name: &str) -> bool {
        self.closed.contains(name)
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Close and forget one resource. Returns `Ok(false)` if no resource has
    /// that name.
    pub fn close_resource(&mut self, name: &str) -> Result<bool, ResourceError> {
        match self.resources.remove(name) {
            Some(mut handle) => {
                debug!(resource = %name, "closing resource");
                self.closed.insert(name.to_string());
                handle.close().map(|_| true)
            }
            None => Ok(false),
        }
    }

    /// Close every remaining resource. Failures are collected, never raised,
    /// so one bad handle cannot keep the others open.
    pub fn release_resources(&mut self) -> Vec<(String, ResourceError)> {
        let mut failures = Vec::new();
        for (name, mut handle) in std::mem::take(&mut self.resources) {
            debug!(resource = %name, "releasing resource");
            if let Err(err) = handle.close() {
                warn!(resource = %name, "failed to release resource: {}", err);
                failures.push((name, err));
            }
        }
        failures
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.release_resources();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("bindings", &self.bindings)
            .field("resources", &self.resource_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::evaluator::EvalErrorKind;

    struct Counted {
        closes: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Resource for Counted {
        fn describe(&self) -> String {
            "counted".into()
        }

        fn close(&mut self) -> Result<(), ResourceError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ResourceError::Other("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    fn counted(closes: &Arc<AtomicUsize>, fail: bool) -> Box<dyn Resource> {
        Box::new(Counted {
            closes: Arc::clone(closes),
            fail,
        })
    }

    #[test]
    fn bindings_overwrite() {
        let mut ctx = Context::new();
        ctx.set("n", Value::Number(1.0));
        ctx.set("n", Value::Number(2.0));
        assert_eq!(ctx.get("n"), Some(&Value::Number(2.0)));
        assert_eq!(ctx.names(), vec!["n"]);
    }

    #[test]
    fn lookup_unbound() {
        let ctx = Context::new();
        let err = ctx.lookup("missing").unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::UnboundReference("missing".into()));
    }

    #[test]
    fn release_closes_each_resource_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut ctx = Context::with_resources(vec![
            ("a".into(), counted(&closes, false)),
            ("b".into(), counted(&closes, false)),
        ]);
        assert!(ctx.has_resource("a"));
        assert!(ctx.release_resources().is_empty());
        assert_eq!(closes.load(Ordering::SeqCst), 2);

        // Releasing again, and dropping, closes nothing further.
        assert!(ctx.release_resources().is_empty());
        drop(ctx);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn drop_releases_remaining_resources() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let mut ctx = Context::new();
            ctx.bind_resource("db", counted(&closes, false)).unwrap();
            assert_eq!(ctx.close_resource("db"), Ok(true));
            ctx.bind_resource("db2", counted(&closes, false)).unwrap();
        }
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failures_are_collected() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut ctx = Context::new();
        ctx.bind_resource("bad", counted(&closes, true)).unwrap();
        ctx.bind_resource("good", counted(&closes, false)).unwrap();
        let failures = ctx.release_resources();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "bad");
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn closing_early_is_final() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut ctx = Context::new();
        ctx.bind_resource("db", counted(&closes, false)).unwrap();
        assert_eq!(ctx.resource("db").map(|h| h.describe()), Some("counted".into()));

        assert_eq!(ctx.close_resource("db"), Ok(true));
        assert!(ctx.is_closed("db"));
        assert!(ctx.resource("db").is_none());
        assert_eq!(ctx.close_resource("db"), Ok(false));
        assert!(ctx.release_resources().is_empty());
        drop(ctx);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rebinding_closes_previous() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut ctx = Context::new();
        ctx.bind_resource("db", counted(&closes, false)).unwrap();
        ctx.bind_resource("db", counted(&closes, false)).unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.close_resource("missing"), Ok(false));
    }
}
