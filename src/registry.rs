//! Resolution of decoded targets to runnable handlers.
//!
//! A stored job only names its callable. Consumers build a [`JobRegistry`] at startup that
//! maps every name they are able to run to a handler; a target that is not registered fails
//! with [`SnakeError::Decode`] and the job is recorded as a failure without running anything.
//!
//! ```rust
//! use snakeq::{JobRegistry, registry::JobContext};
//! use serde_json::json;
//!
//! let registry = JobRegistry::new()
//!     .with_handler("math", "add", |ctx: JobContext| async move {
//!         let a = ctx.arguments.first().and_then(|v| v.as_i64()).unwrap_or(0);
//!         let b = ctx.arguments.get(1).and_then(|v| v.as_i64()).unwrap_or(0);
//!         Ok(json!(a + b))
//!     })
//!     .with_closure("scale", |ctx: JobContext| async move {
//!         let factor = ctx.env.as_ref().and_then(|env| env["factor"].as_i64()).unwrap_or(1);
//!         let value = ctx.arguments.first().and_then(|v| v.as_i64()).unwrap_or(0);
//!         Ok(json!(value * factor))
//!     });
//! assert_eq!(registry.len(), 2);
//! ```

use crate::{Result, SnakeError, Target, job::JobId};
use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Mutex},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = std::result::Result<Value, BoxError>;

pub type JobHandler = Arc<dyn Fn(JobContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Everything a handler receives for one invocation.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub queue_name: String,
    pub arguments: Vec<Value>,
    pub system_arguments: Vec<Value>,
    /// State captured by a closure target; `None` for named targets.
    pub env: Option<Value>,
    pub output: JobOutput,
}

/// Text sink for whatever a handler wants to report besides its return value.
/// The captured text is stored in the job's `output` column.
#[derive(Debug, Clone, Default)]
pub struct JobOutput {
    buffer: Arc<Mutex<String>>,
}

impl JobOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print(&self, text: &str) {
        self.lock().push_str(text);
    }

    pub fn println(&self, text: &str) {
        let mut buffer = self.lock();
        buffer.push_str(text);
        buffer.push('\n');
    }

    pub fn contents(&self) -> String {
        self.lock().clone()
    }

    /// Drain the buffer. Empty output is reported as `None`.
    pub fn take(&self) -> Option<String> {
        let text = std::mem::take(&mut *self.lock());
        if text.is_empty() { None } else { Some(text) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, String> {
        self.buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A target matched to its handler.
#[derive(Clone)]
pub struct ResolvedTarget {
    pub handler: JobHandler,
    pub env: Option<Value>,
}

/// Name → handler table for named targets and closure bodies.
#[derive(Clone, Default)]
pub struct JobRegistry {
    named: HashMap<String, JobHandler>,
    closures: HashMap<String, JobHandler>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, module: &str, symbol: &str, handler: F) -> &mut Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.named
            .insert(format!("{}::{}", module, symbol), boxed_handler(handler));
        self
    }

    pub fn register_closure<F, Fut>(&mut self, code: &str, handler: F) -> &mut Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.closures.insert(code.to_string(), boxed_handler(handler));
        self
    }

    pub fn with_handler<F, Fut>(mut self, module: &str, symbol: &str, handler: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(module, symbol, handler);
        self
    }

    pub fn with_closure<F, Fut>(mut self, code: &str, handler: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_closure(code, handler);
        self
    }

    pub fn resolve(&self, target: &Target) -> Result<ResolvedTarget> {
        match target {
            Target::Named { module, symbol } => self
                .named
                .get(&format!("{}::{}", module, symbol))
                .map(|handler| ResolvedTarget {
                    handler: handler.clone(),
                    env: None,
                })
                .ok_or_else(|| {
                    SnakeError::decode(format!("no handler registered for {}", target))
                }),
            Target::Closure { code, env } => self
                .closures
                .get(code)
                .map(|handler| ResolvedTarget {
                    handler: handler.clone(),
                    env: Some(env.clone()),
                })
                .ok_or_else(|| {
                    SnakeError::decode(format!("no closure registered for code '{}'", code))
                }),
        }
    }

    pub fn contains(&self, target: &Target) -> bool {
        self.resolve(target).is_ok()
    }

    pub fn len(&self) -> usize {
        self.named.len() + self.closures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut named: Vec<_> = self.named.keys().collect();
        named.sort();
        let mut closures: Vec<_> = self.closures.keys().collect();
        closures.sort();
        f.debug_struct("JobRegistry")
            .field("named", &named)
            .field("closures", &closures)
            .finish()
    }
}

fn boxed_handler<F, Fut>(handler: F) -> JobHandler
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |ctx| handler(ctx).boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(arguments: Vec<Value>, env: Option<Value>) -> JobContext {
        JobContext {
            job_id: 7,
            queue_name: "default".to_string(),
            arguments,
            system_arguments: Vec::new(),
            env,
            output: JobOutput::new(),
        }
    }

    fn registry() -> JobRegistry {
        JobRegistry::new()
            .with_handler("math", "double", |ctx: JobContext| async move {
                let value = ctx.arguments[0].as_i64().ok_or("expected an integer")?;
                ctx.output.println("doubling");
                Ok(json!(value * 2))
            })
            .with_closure("offset", |ctx: JobContext| async move {
                let offset = ctx.env.as_ref().and_then(|env| env["by"].as_i64()).unwrap_or(0);
                let value = ctx.arguments[0].as_i64().unwrap_or(0);
                Ok(json!(value + offset))
            })
    }

    #[tokio::test]
    async fn test_resolve_named_handler() {
        let registry = registry();
        let resolved = registry.resolve(&Target::named("math", "double")).unwrap();
        assert!(resolved.env.is_none());

        let ctx = context(vec![json!(21)], None);
        let output = ctx.output.clone();
        let result = (resolved.handler)(ctx).await.unwrap();
        assert_eq!(result, json!(42));
        assert_eq!(output.take().as_deref(), Some("doubling\n"));
    }

    #[tokio::test]
    async fn test_resolve_closure_passes_captured_state() {
        let registry = registry();
        let target = Target::closure("offset", json!({"by": 5}));
        let resolved = registry.resolve(&target).unwrap();
        assert_eq!(resolved.env, Some(json!({"by": 5})));

        let result = (resolved.handler)(context(vec![json!(10)], resolved.env.clone()))
            .await
            .unwrap();
        assert_eq!(result, json!(15));
    }

    #[tokio::test]
    async fn test_handler_errors_are_returned() {
        let registry = registry();
        let resolved = registry.resolve(&Target::named("math", "double")).unwrap();
        let err = (resolved.handler)(context(vec![json!("x")], None))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "expected an integer");
    }

    #[test]
    fn test_unknown_targets_fail_to_resolve() {
        let registry = registry();
        let err = registry.resolve(&Target::named("math", "triple")).err().unwrap();
        assert!(matches!(err, SnakeError::Decode { .. }));
        assert!(err.to_string().contains("math::triple"));

        assert!(!registry.contains(&Target::closure("missing", json!(null))));
        // closure codes and named targets live in separate tables
        assert!(!registry.contains(&Target::closure("math::double", json!(null))));
    }

    #[test]
    fn test_output_take_empties_buffer() {
        let output = JobOutput::new();
        assert_eq!(output.take(), None);
        output.print("a");
        output.print("b");
        assert_eq!(output.contents(), "ab");
        assert_eq!(output.take().as_deref(), Some("ab"));
        assert_eq!(output.take(), None);
    }

    #[test]
    fn test_debug_lists_registered_names() {
        let debug = format!("{:?}", registry());
        assert!(debug.contains("math::double"));
        assert!(debug.contains("offset"));
    }
}
