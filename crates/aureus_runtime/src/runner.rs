//! Single-task execution.
//!
//! The runner invokes a task's tool through the sandbox router, enforcing
//! the per-attempt timeout and retrying with backoff. After the final
//! failure it runs the task's compensation once. Tasks with an idempotency
//! key run at most once per key: later and concurrent submissions get the
//! first successful result back, flagged `cached`.

use crate::error::ErrorKind;
use crate::result::{CompensationOutcome, TaskExecutionResult};
use aureus_plan::{RetryConfig, TaskSpec};
use aureus_tool::{SandboxConfig, SandboxError, SandboxRouter, ToolArgs, ToolError};
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type Slot = Arc<tokio::sync::Mutex<Option<TaskExecutionResult>>>;

/// Successful results by idempotency key
///
/// Each key has its own async lock, held for the whole first execution, so
/// a duplicate submitted while the first is running waits for it instead of
/// invoking the tool again. A key whose run failed is dropped once nothing
/// waits on it.
#[derive(Clone, Default)]
pub struct IdempotencyCache {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl IdempotencyCache {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(slots.entry(key.to_string()).or_default())
    }

    /// Completed result for `key`; `None` while the first run is in flight
    #[must_use]
    pub fn get(&self, key: &str) -> Option<TaskExecutionResult> {
        let slot = {
            let slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            slots.get(key).cloned()
        }?;
        slot.try_lock().ok().and_then(|done| done.clone())
    }

    /// Drop `key` after a failed run unless another submission holds its slot
    fn release(&self, key: &str, slot: &Slot) {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        // One reference in the map, one held by the caller
        let idle = slots
            .get(key)
            .is_some_and(|held| Arc::ptr_eq(held, slot) && Arc::strong_count(slot) == 2);
        if idle {
            slots.remove(key);
        }
    }

    /// Number of keys held
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for IdempotencyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyCache").field("keys", &self.len()).finish()
    }
}

enum AttemptFailure {
    TimedOut(Duration),
    Failed(SandboxError),
}

impl AttemptFailure {
    const fn kind(&self) -> ErrorKind {
        match self {
            Self::TimedOut(_) => ErrorKind::TaskTimeout,
            Self::Failed(_) => ErrorKind::TaskExecutionFailure,
        }
    }

    const fn is_retryable(&self) -> bool {
        match self {
            Self::TimedOut(_) => true,
            Self::Failed(err) => err.is_retryable(),
        }
    }
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimedOut(limit) => write!(f, "timed out after {}ms", limit.as_millis()),
            Self::Failed(err) => write!(f, "{err}"),
        }
    }
}

/// Runs single tasks
#[derive(Debug, Clone, Default)]
pub struct TaskRunner {
    router: SandboxRouter,
    default_sandbox: Option<SandboxConfig>,
    cache: IdempotencyCache,
}

impl TaskRunner {
    /// Create a runner over `router`
    #[must_use]
    pub fn new(router: SandboxRouter) -> Self {
        Self {
            router,
            default_sandbox: None,
            cache: IdempotencyCache::new(),
        }
    }

    /// Sandbox for tasks that declare none
    #[must_use]
    pub fn with_default_sandbox(mut self, sandbox: Option<SandboxConfig>) -> Self {
        self.default_sandbox = sandbox;
        self
    }

    /// Share an idempotency cache
    #[must_use]
    pub fn with_cache(mut self, cache: IdempotencyCache) -> Self {
        self.cache = cache;
        self
    }

    /// The sandbox router
    #[must_use]
    pub fn router(&self) -> &SandboxRouter {
        &self.router
    }

    /// The idempotency cache
    #[must_use]
    pub fn cache(&self) -> &IdempotencyCache {
        &self.cache
    }

    /// Run `task` with its own tool
    pub async fn run(&self, task: &TaskSpec, cancel: &CancellationToken) -> TaskExecutionResult {
        let Some(key) = task.idempotency_key.as_deref() else {
            return self.execute(task, task.tool_name.as_deref(), cancel).await;
        };

        let slot = self.cache.slot(key);
        let mut done = slot.lock().await;
        if let Some(previous) = done.as_ref() {
            tracing::debug!(task = %task.id, key, "idempotent result reused");
            let mut cached = previous.clone();
            cached.task_id = task.id.clone();
            cached.cached = true;
            cached.attempts = 0;
            cached.duration_ms = 0.0;
            cached.compensation = None;
            return cached;
        }
        let result = self.execute(task, task.tool_name.as_deref(), cancel).await;
        if result.is_success() {
            *done = Some(result.clone());
        } else {
            self.cache.release(key, &slot);
        }
        result
    }

    /// Run `task` with `tool` in place of its own, bypassing the
    /// idempotency cache
    pub async fn run_with_tool(
        &self,
        task: &TaskSpec,
        tool: &str,
        cancel: &CancellationToken,
    ) -> TaskExecutionResult {
        self.execute(task, Some(tool), cancel).await
    }

    async fn execute(
        &self,
        task: &TaskSpec,
        tool: Option<&str>,
        cancel: &CancellationToken,
    ) -> TaskExecutionResult {
        let started = Instant::now();
        let retry = task.effective_retry();
        let max_attempts = retry.max_attempts.max(1);
        let sandbox = task.sandbox_config.as_ref().or(self.default_sandbox.as_ref());

        let mut attempt = 0;
        let failure = loop {
            attempt += 1;
            tracing::debug!(task = %task.id, tool = ?tool, attempt, max_attempts, "task attempt");
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return cancelled(task, attempt, started),
                outcome = self.attempt(task, tool, sandbox) => outcome,
            };
            match outcome {
                Ok(value) => {
                    return TaskExecutionResult::succeeded(task.id.clone(), value)
                        .with_attempts(attempt)
                        .with_duration(started.elapsed());
                }
                Err(failure) if attempt < max_attempts && failure.is_retryable() => {
                    let delay = backoff(&retry, attempt);
                    tracing::warn!(
                        task = %task.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure,
                        "task attempt failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return cancelled(task, attempt, started),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(failure) => break failure,
            }
        };

        tracing::warn!(task = %task.id, attempts = attempt, error = %failure, "task failed");
        let compensation = self.compensate(task, &failure, sandbox).await;
        let mut result = TaskExecutionResult::failed(task.id.clone(), failure.kind(), failure.to_string())
            .with_attempts(attempt)
            .with_duration(started.elapsed());
        result.compensation = compensation;
        result
    }

    async fn attempt(
        &self,
        task: &TaskSpec,
        tool: Option<&str>,
        sandbox: Option<&SandboxConfig>,
    ) -> Result<Value, AttemptFailure> {
        // No tool: the task passes its inputs through
        let Some(tool) = tool else {
            return Ok(Value::Object(task.inputs.clone()));
        };
        let call = self
            .router
            .invoke(tool, &task.inputs, sandbox, task.allowed_tools.as_deref());
        match task.timeout() {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(outcome) => outcome.map_err(AttemptFailure::Failed),
                Err(_) => Err(AttemptFailure::TimedOut(limit)),
            },
            None => call.await.map_err(AttemptFailure::Failed),
        }
    }

    async fn compensate(
        &self,
        task: &TaskSpec,
        failure: &AttemptFailure,
        sandbox: Option<&SandboxConfig>,
    ) -> Option<CompensationOutcome> {
        let (tool, args): (String, ToolArgs) = if let Some(action) = &task.compensation_action {
            (action.tool.clone(), action.args.clone())
        } else {
            let hook = task.compensation.as_ref()?;
            let chosen = match failure {
                AttemptFailure::TimedOut(_) => hook.on_timeout.as_ref().or(hook.on_failure.as_ref()),
                AttemptFailure::Failed(_) => hook.on_failure.as_ref(),
            }?;
            (chosen.clone(), task.inputs.clone())
        };

        tracing::info!(task = %task.id, tool = %tool, "running compensation");
        let call = self.router.invoke(&tool, &args, sandbox, None);
        let outcome = match task.timeout() {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or_else(|_| Err(ToolError::failed(&tool, "compensation timed out").into())),
            None => call.await,
        };
        Some(match outcome {
            Ok(_) => CompensationOutcome {
                tool,
                success: true,
                error: None,
            },
            Err(err) => {
                tracing::error!(task = %task.id, tool = %tool, error = %err, "compensation failed");
                CompensationOutcome {
                    tool,
                    success: false,
                    error: Some(err.to_string()),
                }
            }
        })
    }
}

fn cancelled(task: &TaskSpec, attempts: u32, started: Instant) -> TaskExecutionResult {
    tracing::debug!(task = %task.id, attempts, "task cancelled");
    TaskExecutionResult::failed(task.id.clone(), ErrorKind::Aborted, "cancelled before completion")
        .with_attempts(attempts)
        .with_duration(started.elapsed())
}

/// Delay before the attempt after `attempt`, with jitter when enabled
///
/// Jitter adds a uniform extra delay of up to half the base delay.
fn backoff(retry: &RetryConfig, attempt: u32) -> Duration {
    let base = retry.delay_after(attempt);
    if !retry.jitter_enabled() {
        return base;
    }
    let half = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
    if half == 0 {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0..=half);
    base.saturating_add(Duration::from_millis(extra))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use aureus_plan::{CompensationAction, CompensationHook};
    use aureus_tool::{FnTool, SandboxMode, Tool, ToolRegistry};
    use serde_json::{Map, json};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowTool {
        name: &'static str,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            self.name
        }

        async fn invoke(&self, args: &ToolArgs) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Value::Object(args.clone()))
        }
    }

    fn counting(name: &'static str, calls: &Arc<AtomicUsize>, fail: bool) -> Arc<dyn Tool> {
        let calls = Arc::clone(calls);
        Arc::new(FnTool::new(name, move |args: &ToolArgs| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if fail {
                Err(ToolError::failed(name, format!("failure {n}")))
            } else {
                Ok(json!({"call": n, "args": Value::Object(args.clone())}))
            }
        }))
    }

    fn registry(tools: Vec<Arc<dyn Tool>>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool).unwrap();
        }
        registry
    }

    fn runner(registry: ToolRegistry) -> TaskRunner {
        TaskRunner::new(SandboxRouter::new(registry))
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = runner(registry(vec![counting("read", &calls, false)]));
        let task = TaskSpec::action("read", "read").with_input("path", json!("/tmp/a"));
        let result = runner.run(&task, &CancellationToken::new()).await;
        assert!(result.is_success());
        assert_eq!(result.attempts, 1);
        assert_eq!(result.result.unwrap()["args"]["path"], json!("/tmp/a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_compensate_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let undo = Arc::new(AtomicUsize::new(0));
        let runner = runner(registry(vec![
            counting("charge", &calls, true),
            counting("refund", &undo, false),
        ]));
        let task = TaskSpec::action("pay", "charge")
            .with_retry(RetryConfig::new(4, 100).with_multiplier(2.0))
            .with_compensation_action(CompensationAction {
                tool: "refund".to_string(),
                args: Map::new(),
            });

        let started = Instant::now();
        let result = runner.run(&task, &CancellationToken::new()).await;
        assert_eq!(result.status, crate::result::TaskStatus::Failed);
        assert_eq!(result.error_kind, Some(ErrorKind::TaskExecutionFailure));
        assert_eq!(result.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(undo.load(Ordering::SeqCst), 1);
        assert!(result.compensation.unwrap().success);
        // 100 + 200 + 400
        assert!(started.elapsed() >= Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_triggers_timeout_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let undo = Arc::new(AtomicUsize::new(0));
        let slow = SlowTool {
            name: "export",
            delay: Duration::from_secs(10),
            calls: Arc::clone(&calls),
        };
        let runner = runner(registry(vec![Arc::new(slow), counting("cleanup", &undo, false)]));
        let task = TaskSpec::action("export", "export")
            .with_timeout_ms(50)
            .with_retry(RetryConfig::new(2, 10))
            .with_compensation(CompensationHook {
                on_failure: Some("missing".to_string()),
                on_timeout: Some("cleanup".to_string()),
            });
        let result = runner.run(&task, &CancellationToken::new()).await;
        assert_eq!(result.error_kind, Some(ErrorKind::TaskTimeout));
        assert_eq!(result.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(undo.load(Ordering::SeqCst), 1);
        assert_eq!(result.compensation.unwrap().tool, "cleanup");
    }

    #[tokio::test]
    async fn test_compensation_failure_does_not_mask_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = runner(registry(vec![counting("charge", &calls, true)]));
        let task = TaskSpec::action("pay", "charge").with_compensation(CompensationHook {
            on_failure: Some("refund".to_string()),
            on_timeout: None,
        });
        let result = runner.run(&task, &CancellationToken::new()).await;
        assert_eq!(result.error_kind, Some(ErrorKind::TaskExecutionFailure));
        assert!(result.error.unwrap().contains("failure 1"));
        let compensation = result.compensation.unwrap();
        assert!(!compensation.success);
        assert!(compensation.error.unwrap().contains("refund"));
    }

    #[tokio::test]
    async fn test_unknown_tool_not_retried() {
        let runner = runner(ToolRegistry::new());
        let task = TaskSpec::action("t", "nowhere").with_retry(RetryConfig::new(5, 1));
        let result = runner.run(&task, &CancellationToken::new()).await;
        assert_eq!(result.attempts, 1);
        assert!(result.error.unwrap().contains("nowhere"));
    }

    #[tokio::test]
    async fn test_idempotent_resubmission() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = runner(registry(vec![counting("send_email", &calls, false)]));
        let task = TaskSpec::action("notify", "send_email").with_idempotency_key("order-42");
        let cancel = CancellationToken::new();

        let first = runner.run(&task, &cancel).await;
        let second = runner.run(&task, &cancel).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(first.result, second.result);
        assert_eq!(runner.cache().get("order-42").map(|r| r.result), Some(first.result));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_duplicates_run_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let slow = SlowTool {
            name: "send_email",
            delay: Duration::from_millis(100),
            calls: Arc::clone(&calls),
        };
        let runner = runner(ToolRegistry::new().with_tool(slow));
        let task = TaskSpec::action("notify", "send_email").with_idempotency_key("order-7");
        let cancel = CancellationToken::new();

        let results = futures::future::join_all((0..5).map(|_| runner.run(&task, &cancel))).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(TaskExecutionResult::is_success));
        assert_eq!(results.iter().filter(|r| r.cached).count(), 4);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = runner(registry(vec![counting("charge", &calls, true)]));
        let task = TaskSpec::action("pay", "charge").with_idempotency_key("k");
        runner.run(&task, &CancellationToken::new()).await;
        runner.run(&task, &CancellationToken::new()).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(runner.cache().get("k").is_none());
    }

    #[tokio::test]
    async fn test_failed_keys_are_evicted() {
        let failures = Arc::new(AtomicUsize::new(0));
        let sends = Arc::new(AtomicUsize::new(0));
        let runner = runner(registry(vec![
            counting("charge", &failures, true),
            counting("send_email", &sends, false),
        ]));
        let cancel = CancellationToken::new();
        for n in 0..5 {
            let task = TaskSpec::action("pay", "charge").with_idempotency_key(format!("charge-{n}"));
            runner.run(&task, &cancel).await;
        }
        assert!(runner.cache().is_empty());

        let task = TaskSpec::action("notify", "send_email").with_idempotency_key("receipt-1");
        runner.run(&task, &cancel).await;
        assert_eq!(runner.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_waiter_reruns_after_failed_first_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let flaky = Arc::clone(&calls);
        let tool = FnTool::new("charge", move |_args: &ToolArgs| {
            if flaky.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ToolError::failed("charge", "declined"))
            } else {
                Ok(json!({"charged": true}))
            }
        });
        let runner = runner(ToolRegistry::new().with_tool(tool));
        let task = TaskSpec::action("pay", "charge").with_idempotency_key("order-9");
        let cancel = CancellationToken::new();

        let (first, second) = tokio::join!(runner.run(&task, &cancel), runner.run(&task, &cancel));
        assert!(!first.is_success());
        assert!(second.is_success());
        assert!(!second.cached);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(runner.cache().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_input_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let tool = FnTool::new("update_record", move |_args: &ToolArgs| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(ToolError::InvalidInput {
                tool: "update_record".to_string(),
                reason: "record id missing".to_string(),
            })
        });
        let runner = runner(ToolRegistry::new().with_tool(tool));
        let task = TaskSpec::action("update", "update_record").with_retry(RetryConfig::new(3, 10));
        let result = runner.run(&task, &CancellationToken::new()).await;
        assert_eq!(result.error_kind, Some(ErrorKind::TaskExecutionFailure));
        assert_eq!(result.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(result.error.unwrap().contains("record id missing"));
    }

    #[tokio::test]
    async fn test_simulated_sandbox_has_no_side_effects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = runner(registry(vec![counting("delete_record", &calls, false)]))
            .with_default_sandbox(Some(SandboxConfig::new(SandboxMode::Mock)));
        let task = TaskSpec::action("purge", "delete_record");
        let result = runner.run(&task, &CancellationToken::new()).await;
        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.result.unwrap()["simulated"], json!(true));
    }

    #[tokio::test]
    async fn test_task_without_tool_passes_inputs_through() {
        let runner = runner(ToolRegistry::new());
        let mut task = TaskSpec::action("decide", "unused").with_input("branch", json!("left"));
        task.tool_name = None;
        let result = runner.run(&task, &CancellationToken::new()).await;
        assert_eq!(result.result, Some(json!({"branch": "left"})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let runner = runner(registry(vec![counting("charge", &calls, true)]));
        let task = TaskSpec::action("pay", "charge").with_retry(RetryConfig::new(10, 60_000));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let result = runner.run(&task, &cancel).await;
        assert_eq!(result.error_kind, Some(ErrorKind::Aborted));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.compensation.is_none());
    }

    #[test]
    fn test_jitter_bounds() {
        let retry = RetryConfig::new(3, 100).with_jitter(true);
        for _ in 0..100 {
            let delay = backoff(&retry, 2);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
        assert_eq!(backoff(&RetryConfig::new(3, 100), 1), Duration::from_millis(100));
    }
}
