//! The workflow engine.
//!
//! A run resolves the dependency graph, then processes ready sets in
//! order. Tasks inside a ready set run concurrently, each going through
//! the goal guard, the task runner and (when one is bound) the CRV gate.
//! A task that does not succeed skips all of its transitive dependents.

use crate::config::EngineConfig;
use crate::error::{ErrorKind, ExecutionError};
use crate::result::{TaskExecutionResult, TaskStatus, WorkflowExecutionResult, WorkflowStatus};
use crate::runner::TaskRunner;
use crate::telemetry::{Emission, Metrics, Span, TelemetryEvent, TelemetryEventType, TelemetrySink, TracingSink};
use aureus_core::{ActionId, RunId, TaskId};
use aureus_crv::{
    Commit, CrvError, Gate, GateBindings, GateConfig, GateResult, GateVerdict, RecoveryResult,
    RecoveryStrategy, ValidatorRegistry,
};
use aureus_plan::{DependencyGraph, ExecutionPlan, PlanError, SpecValidator, TaskSpec, WorkflowSpec};
use aureus_policy::{
    Action, ApprovalEvent, GoalGuard, GoalGuardState, GuardDecision, GuardError, GuardEvaluation,
    HumanResponse, Principal,
};
use aureus_tool::{SandboxRouter, ToolRegistry};
use futures::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// A workflow together with its caller-supplied context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionRequest {
    /// Workflow to run
    pub workflow: WorkflowSpec,
    /// Context made available to policy checks as action metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
    /// Correlation id echoed on the result and on telemetry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl WorkflowExecutionRequest {
    /// Wrap a workflow
    #[must_use]
    pub fn new(workflow: WorkflowSpec) -> Self {
        Self {
            workflow,
            context: None,
            correlation_id: None,
        }
    }

    /// Decode a request document
    ///
    /// # Errors
    ///
    /// Returns [`PlanError::Decode`] if the JSON does not describe a request
    pub fn from_json(json: &str) -> Result<Self, ExecutionError> {
        serde_json::from_str(json).map_err(|e| PlanError::Decode(e.to_string()).into())
    }

    /// Execution context carrying the request's context and correlation id
    #[must_use]
    pub fn context(&self) -> ExecutionContext {
        let mut context = ExecutionContext::new();
        context.data = self.context.clone().unwrap_or_default();
        context.correlation_id = self.correlation_id.clone();
        context
    }
}

/// Per-run inputs that are not part of the workflow document
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Acting principal; the engine's default when unset
    pub principal: Option<Principal>,
    /// Correlation id
    pub correlation_id: Option<String>,
    /// Overrides the engine's deadline
    pub deadline: Option<Duration>,
    /// Gates bound to tasks
    pub gates: GateBindings,
    /// Action metadata for policy conditions
    pub data: Map<String, Value>,
    /// Cancels the run when triggered
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    /// Empty context
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Act as `principal`
    #[must_use]
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Set the correlation id
    #[must_use]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Bind gates
    #[must_use]
    pub fn with_gates(mut self, gates: GateBindings) -> Self {
        self.gates = gates;
        self
    }

    /// Add a metadata entry
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Cancel the run through `token`
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

/// State shared by every task of one run
struct Run<'a> {
    spec: &'a WorkflowSpec,
    run_id: RunId,
    span_id: String,
    principal: Principal,
    correlation_id: Option<String>,
    gates: &'a GateBindings,
    metadata: BTreeMap<String, Value>,
    cancel: CancellationToken,
}

enum Wait {
    Answered(Option<HumanResponse>),
    Expired,
    Cancelled,
}

/// Executes workflows
pub struct WorkflowEngine {
    config: EngineConfig,
    guard: GoalGuard,
    runner: TaskRunner,
    gate: Gate,
    telemetry: Arc<dyn TelemetrySink>,
}

impl WorkflowEngine {
    /// Create an engine running `tools` natively and checking commits
    /// against `validators`
    #[must_use]
    pub fn new(tools: ToolRegistry, validators: ValidatorRegistry, config: EngineConfig) -> Self {
        Self {
            guard: GoalGuard::new(config.guard.clone()),
            runner: TaskRunner::new(SandboxRouter::new(tools))
                .with_default_sandbox(config.default_sandbox.clone()),
            gate: Gate::new(validators),
            telemetry: Arc::new(TracingSink),
            config,
        }
    }

    /// Route tool calls through `router`
    #[must_use]
    pub fn with_router(mut self, router: SandboxRouter) -> Self {
        self.runner = TaskRunner::new(router)
            .with_default_sandbox(self.config.default_sandbox.clone())
            .with_cache(self.runner.cache().clone());
        self
    }

    /// Use a preconfigured guard
    #[must_use]
    pub fn with_guard(mut self, guard: GoalGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Send telemetry to `sink`
    #[must_use]
    pub fn with_telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = sink;
        self
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The goal guard
    #[must_use]
    pub fn guard(&self) -> &GoalGuard {
        &self.guard
    }

    /// The task runner
    #[must_use]
    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Validate `spec` and `gates` and resolve the ready sets
    ///
    /// # Errors
    ///
    /// Returns every spec violation, a gate binding error, or the
    /// resolver's error
    pub fn plan(&self, spec: &WorkflowSpec, gates: &GateBindings) -> Result<ExecutionPlan, ExecutionError> {
        SpecValidator::new()
            .with_max_tasks(self.config.max_tasks)
            .validate(spec)
            .map_err(ExecutionError::Invalid)?;
        for config in gates.default.iter().chain(gates.tasks.values()) {
            self.gate.check_config(config)?;
        }
        Ok(DependencyGraph::resolve(spec)?)
    }

    /// Execute a decoded request
    pub async fn execute_request(
        &self,
        request: &WorkflowExecutionRequest,
        gates: GateBindings,
    ) -> WorkflowExecutionResult {
        self.execute(&request.workflow, request.context().with_gates(gates))
            .await
    }

    /// Execute `spec`
    ///
    /// Never fails outright: errors that stop the workflow are reported on
    /// the result with status `failed`.
    pub async fn execute(&self, spec: &WorkflowSpec, ctx: ExecutionContext) -> WorkflowExecutionResult {
        let started = Instant::now();
        let run_id = RunId::new();
        let span = Span::start(run_id.to_string(), None, format!("workflow:{}", spec.id))
            .with_tag("workflow_id", spec.id.as_str());
        tracing::info!(workflow = %spec.id, run = %run_id, tasks = spec.tasks.len(), "workflow started");

        let plan = match self.plan(spec, &ctx.gates) {
            Ok(plan) => plan,
            Err(err) => {
                tracing::error!(workflow = %spec.id, error = %err, "workflow rejected before execution");
                return self.finish(spec, run_id, span, ctx.correlation_id, IndexMap::new(), Some(err), true, started);
            }
        };

        let fail_fast = self.config.fail_fast.unwrap_or_else(|| spec.fail_fast());
        let cancel = ctx.cancel.child_token();
        let deadline = ctx.deadline.or_else(|| self.config.deadline());
        let expired = Arc::new(AtomicBool::new(false));
        let watchdog = deadline.map(|limit| {
            let cancel = cancel.clone();
            let expired = Arc::clone(&expired);
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(limit) => {
                        expired.store(true, Ordering::SeqCst);
                        cancel.cancel();
                    }
                    () = cancel.cancelled() => {}
                }
            })
        });

        let run = Run {
            spec,
            run_id,
            span_id: span.id.clone(),
            principal: ctx.principal.clone().unwrap_or_else(|| self.config.principal.clone()),
            correlation_id: ctx.correlation_id.clone(),
            gates: &ctx.gates,
            metadata: ctx.data.clone().into_iter().collect(),
            cancel,
        };

        let mut results: HashMap<TaskId, TaskExecutionResult> = HashMap::new();
        let mut upstream: HashMap<TaskId, String> = HashMap::new();
        let mut aborted: Option<String> = None;

        for (level, ready) in plan.ready_sets.iter().enumerate() {
            let mut runnable = Vec::with_capacity(ready.len());
            for id in ready {
                let Some(task) = spec.task(id) else { continue };
                let skip = if run.cancel.is_cancelled() {
                    Some(stopped(id, expired.load(Ordering::SeqCst)))
                } else if let Some(reason) = &aborted {
                    Some(TaskExecutionResult::skipped(id.clone(), ErrorKind::Aborted, reason.clone()))
                } else {
                    upstream
                        .get(id)
                        .map(|reason| TaskExecutionResult::skipped(id.clone(), ErrorKind::UpstreamSkipped, reason.clone()))
                };
                match skip {
                    Some(result) => {
                        tracing::debug!(task = %id, reason = ?result.skip_reason, "task skipped");
                        self.emit(&run, task, TelemetryEventType::StepEnd, json!({
                            "status": result.status,
                            "error_kind": result.error_kind,
                        }));
                        results.insert(id.clone(), result);
                    }
                    None => runnable.push(task),
                }
            }

            tracing::debug!(workflow = %spec.id, level, tasks = runnable.len(), "running ready set");
            let outcomes = join_all(runnable.iter().map(|task| self.run_task(&run, task))).await;
            for mut result in outcomes {
                if result.error_kind == Some(ErrorKind::Aborted) && expired.load(Ordering::SeqCst) {
                    result.error_kind = Some(ErrorKind::Timeout);
                }
                if !result.is_success() {
                    let reason = format!("upstream task {} did not succeed", result.task_id);
                    for dependent in plan.transitive_dependents(&result.task_id) {
                        upstream.entry(dependent).or_insert_with(|| reason.clone());
                    }
                    if fail_fast && result.status == TaskStatus::Failed && aborted.is_none() {
                        tracing::warn!(task = %result.task_id, "fail_fast: aborting remaining tasks");
                        aborted = Some(format!("aborted after task {} failed", result.task_id));
                    }
                }
                results.insert(result.task_id.clone(), result);
            }
        }

        if let Some(handle) = watchdog {
            handle.abort();
        }
        let error = if expired.load(Ordering::SeqCst) {
            deadline.map(ExecutionError::DeadlineElapsed)
        } else if ctx.cancel.is_cancelled() {
            Some(ExecutionError::Cancelled)
        } else {
            None
        };

        let ordered = spec
            .tasks
            .iter()
            .filter_map(|task| results.remove(&task.id).map(|r| (task.id.clone(), r)))
            .collect();
        self.finish(spec, run_id, span, ctx.correlation_id, ordered, error, fail_fast, started)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        spec: &WorkflowSpec,
        run_id: RunId,
        span: Span,
        correlation_id: Option<String>,
        task_results: IndexMap<TaskId, TaskExecutionResult>,
        error: Option<ExecutionError>,
        fail_fast: bool,
        started: Instant,
    ) -> WorkflowExecutionResult {
        let mut metrics = Metrics::new();
        for result in task_results.values() {
            metrics.record(result);
        }
        let status = if error.is_some() {
            WorkflowStatus::Failed
        } else if task_results.values().all(TaskExecutionResult::is_success) {
            WorkflowStatus::Success
        } else if fail_fast {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Partial
        };

        for metric in metrics.to_metrics(&spec.id) {
            self.telemetry.emit(Emission::Metric(metric));
        }
        let status_tag = json!(status).as_str().unwrap_or_default().to_string();
        self.telemetry.emit(Emission::Span(span.with_tag("status", status_tag).finish()));

        let result = WorkflowExecutionResult {
            workflow_id: spec.id.clone(),
            run_id,
            status,
            task_results,
            error_kind: error.as_ref().map(ExecutionError::kind),
            error: error.map(|e| e.to_string()),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
            correlation_id,
            metrics,
        };
        tracing::info!(
            workflow = %spec.id,
            run = %run_id,
            status = ?result.status,
            succeeded = result.metrics.tasks_succeeded,
            failed = result.metrics.tasks_failed,
            skipped = result.metrics.tasks_skipped,
            "workflow finished"
        );
        result
    }

    async fn run_task(&self, run: &Run<'_>, task: &TaskSpec) -> TaskExecutionResult {
        let started = Instant::now();
        let span = Span::start(run.run_id.to_string(), Some(&run.span_id), format!("task:{}", task.id));
        self.emit(run, task, TelemetryEventType::StepStart, json!({
            "name": task.name,
            "tool": task.tool_name,
        }));

        let result = self.guarded(run, task).await.with_duration(started.elapsed());

        self.emit(run, task, TelemetryEventType::StepEnd, json!({
            "status": result.status,
            "attempts": result.attempts,
            "error_kind": result.error_kind,
        }));
        let status_tag = json!(result.status).as_str().unwrap_or_default().to_string();
        self.telemetry.emit(Emission::Span(span.with_tag("status", status_tag).finish()));
        tracing::info!(
            task = %task.id,
            status = ?result.status,
            attempts = result.attempts,
            kind = ?result.error_kind,
            "task finished"
        );
        result
    }

    async fn guarded(&self, run: &Run<'_>, task: &TaskSpec) -> TaskExecutionResult {
        let action = action_for(run, task);
        let decision = match self.authorize(run, task, &action).await {
            Ok(decision) => decision,
            Err(refused) => return refused,
        };

        let result = self.runner.run(task, &run.cancel).await;
        self.emit(run, task, TelemetryEventType::ToolCall, json!({
            "tool": task.tool_name,
            "attempts": result.attempts,
            "status": result.status,
            "cached": result.cached,
        }));
        if !result.is_success() {
            return result.with_guard_decision(decision);
        }

        let result = match run.gates.for_task(&task.id) {
            Some(gate) => self.validate(run, task, gate, result).await,
            None => result,
        };
        result.with_guard_decision(decision)
    }

    /// Evaluate `action`, waiting out human approval when the guard parks it
    ///
    /// A refusal comes back as the task's final result.
    async fn authorize(
        &self,
        run: &Run<'_>,
        task: &TaskSpec,
        action: &Action,
    ) -> Result<GuardDecision, TaskExecutionResult> {
        let evaluation = match self.guard.evaluate(&run.principal, action) {
            Ok(evaluation) => evaluation,
            Err(err) => {
                let err = ExecutionError::from(err);
                return Err(TaskExecutionResult::failed(task.id.clone(), err.kind(), err.to_string()));
            }
        };
        self.emit(run, task, TelemetryEventType::PolicyCheck, json!({
            "action": action.name,
            "state": evaluation.state,
            "decision": evaluation.decision,
        }));

        match evaluation.state {
            GoalGuardState::Approved => Ok(evaluation.decision),
            GoalGuardState::PendingHuman => self.await_approval(run, task, action, evaluation).await,
            _ => {
                let reason = evaluation.decision.reason.clone();
                Err(TaskExecutionResult::skipped(task.id.clone(), ErrorKind::GuardRejected, reason)
                    .with_guard_decision(evaluation.decision))
            }
        }
    }

    async fn await_approval(
        &self,
        run: &Run<'_>,
        task: &TaskSpec,
        action: &Action,
        evaluation: GuardEvaluation,
    ) -> Result<GuardDecision, TaskExecutionResult> {
        let parked = evaluation.decision;
        let Some(pending) = evaluation.pending else {
            return Err(
                TaskExecutionResult::skipped(task.id.clone(), ErrorKind::GuardRejected, "approval requested without a token")
                    .with_guard_decision(parked),
            );
        };
        let token = pending.token.token.clone();
        let remaining = (pending.token.expires_at - self.guard.clock().now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        tracing::info!(
            task = %task.id,
            token = %token,
            wait_ms = remaining.as_millis() as u64,
            "waiting for human approval"
        );

        let wait = tokio::select! {
            biased;
            response = pending.response => Wait::Answered(response.ok()),
            () = run.cancel.cancelled() => Wait::Cancelled,
            () = tokio::time::sleep(remaining) => Wait::Expired,
        };

        let refuse = |kind: ErrorKind, reason: String| -> Result<GuardDecision, TaskExecutionResult> {
            Err(TaskExecutionResult::skipped(task.id.clone(), kind, reason).with_guard_decision(parked.clone()))
        };
        match wait {
            Wait::Answered(Some(HumanResponse::Approve | HumanResponse::Respond { .. })) => {
                match self.guard.approve(&token, &action.id, &run.principal.id) {
                    Ok(decision) => Ok(decision),
                    Err(err @ GuardError::ApprovalTokenReused { .. }) => Err(
                        TaskExecutionResult::failed(task.id.clone(), ErrorKind::ApprovalTokenReused, err.to_string())
                            .with_guard_decision(parked.clone()),
                    ),
                    Err(err) => refuse(ErrorKind::from_guard(&err), err.to_string()),
                }
            }
            Wait::Answered(Some(HumanResponse::Deny { reason })) => {
                self.release(&token, &reason);
                refuse(ErrorKind::GuardRejected, format!("denied by human: {reason}"))
            }
            // The continuation was dropped: the token was settled through the
            // guard directly
            Wait::Answered(None) => match self.guard.resolution(&token) {
                Some(GoalGuardState::Approved) => Ok(GuardDecision::approved("approved by human")),
                _ => refuse(ErrorKind::GuardRejected, "approval request withdrawn".to_string()),
            },
            Wait::Expired => {
                self.release(&token, "approval deadline elapsed");
                refuse(ErrorKind::ApprovalExpired, "no approval before the token expired".to_string())
            }
            Wait::Cancelled => {
                self.release(&token, "workflow cancelled");
                refuse(ErrorKind::Aborted, "cancelled while awaiting approval".to_string())
            }
        }
    }

    /// Move a parked action to `rejected` unless it was already settled
    fn release(&self, token: &str, reason: &str) {
        if let Err(err) = self.guard.deny(token, reason) {
            tracing::warn!(token, error = %err, "parked action already settled");
        }
    }

    async fn validate(
        &self,
        run: &Run<'_>,
        task: &TaskSpec,
        gate: &GateConfig,
        result: TaskExecutionResult,
    ) -> TaskExecutionResult {
        let data = result.result.clone().unwrap_or(Value::Null);
        let commit = Commit::for_task(&task.id, task.tool_name.as_deref(), data)
            .with_previous_state(Value::Object(task.inputs.clone()));
        match self.submit(run, task, commit, gate) {
            Ok(GateVerdict::Accepted { commit, result: verdict }) => accept(result, commit.data, verdict),
            Ok(GateVerdict::Blocked { commit, result: verdict }) => {
                self.recover(run, task, gate, commit, verdict, result).await
            }
            Err(err) => gate_error(result, &err),
        }
    }

    fn submit(
        &self,
        run: &Run<'_>,
        task: &TaskSpec,
        commit: Commit,
        gate: &GateConfig,
    ) -> Result<GateVerdict, CrvError> {
        let verdict = self.gate.submit(commit, gate)?;
        let detail = verdict.result();
        self.emit(run, task, TelemetryEventType::CrvResult, json!({
            "gate": detail.gate_name,
            "passed": detail.passed,
            "crv_status": detail.crv_status,
            "failure_code": detail.failure_code,
        }));
        match &verdict {
            GateVerdict::Accepted { commit, .. } => {
                self.emit(run, task, TelemetryEventType::SnapshotCommit, json!({"commit_id": commit.id}));
            }
            GateVerdict::Blocked { commit, result } => {
                tracing::warn!(
                    task = %task.id,
                    gate = %result.gate_name,
                    code = ?result.failure_code,
                    "commit blocked"
                );
                self.emit(run, task, TelemetryEventType::Rollback, json!({
                    "commit_id": commit.id,
                    "failure_code": result.failure_code,
                }));
            }
        }
        Ok(verdict)
    }

    async fn recover(
        &self,
        run: &Run<'_>,
        task: &TaskSpec,
        gate: &GateConfig,
        commit: Commit,
        verdict: GateResult,
        result: TaskExecutionResult,
    ) -> TaskExecutionResult {
        let Some(strategy) = verdict.recovery_strategy.clone() else {
            return block(result, verdict);
        };
        tracing::info!(task = %task.id, strategy = strategy.kind(), "applying recovery strategy");

        match &strategy {
            RecoveryStrategy::Ignore { justification } => {
                tracing::warn!(task = %task.id, justification = %justification, "accepting blocked commit");
                let recovery = RecoveryResult::succeeded(
                    strategy.clone(),
                    justification.clone(),
                    Some(commit.data.clone()),
                );
                accept(result, commit.data, verdict).with_recovery(recovery)
            }
            RecoveryStrategy::RetryAltTool { tool_name, max_retries } => {
                self.retry_alt_tool(run, task, gate, &strategy, tool_name, *max_retries, verdict, result)
                    .await
            }
            RecoveryStrategy::AskUser { .. } | RecoveryStrategy::Escalate { .. } => {
                self.ask_human(run, task, gate, &strategy, commit, verdict, result).await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn retry_alt_tool(
        &self,
        run: &Run<'_>,
        task: &TaskSpec,
        gate: &GateConfig,
        strategy: &RecoveryStrategy,
        tool: &str,
        max_retries: u32,
        verdict: GateResult,
        mut result: TaskExecutionResult,
    ) -> TaskExecutionResult {
        let mut last = verdict;
        let action = alternate_action(run, task, tool);
        for round in 1..=max_retries {
            if let Err(refused) = self.authorize(run, task, &action).await {
                if refused.error_kind == Some(ErrorKind::Aborted) {
                    return refused.with_attempts(result.attempts);
                }
                let reason = refused.error.unwrap_or_default();
                tracing::warn!(task = %task.id, tool, round, reason = %reason, "alternate tool refused by guard");
                let recovery = RecoveryResult::failed(
                    strategy.clone(),
                    format!("alternate tool {tool} refused by guard: {reason}"),
                );
                return block(result, last).with_recovery(recovery);
            }
            let alternate = self.runner.run_with_tool(task, tool, &run.cancel).await;
            result.attempts += alternate.attempts;
            if !alternate.is_success() {
                tracing::warn!(task = %task.id, tool, round, error = ?alternate.error, "alternate tool failed");
                if alternate.error_kind == Some(ErrorKind::Aborted) {
                    return alternate.with_attempts(result.attempts);
                }
                continue;
            }
            let data = alternate.result.unwrap_or(Value::Null);
            let commit = Commit::for_task(&task.id, Some(tool), data)
                .with_previous_state(Value::Object(task.inputs.clone()));
            match self.submit(run, task, commit, gate) {
                Ok(GateVerdict::Accepted { commit, result: verdict }) => {
                    let recovery = RecoveryResult::succeeded(
                        strategy.clone(),
                        format!("alternate tool {tool} accepted on retry {round}"),
                        Some(commit.data.clone()),
                    );
                    return accept(result, commit.data, verdict).with_recovery(recovery);
                }
                Ok(GateVerdict::Blocked { result: verdict, .. }) => last = verdict,
                Err(err) => return gate_error(result, &err),
            }
        }
        let recovery = RecoveryResult::failed(
            strategy.clone(),
            format!("alternate tool {tool} not accepted after {max_retries} retries"),
        );
        block(result, last).with_recovery(recovery)
    }

    #[allow(clippy::too_many_arguments)]
    async fn ask_human(
        &self,
        run: &Run<'_>,
        task: &TaskSpec,
        gate: &GateConfig,
        strategy: &RecoveryStrategy,
        commit: Commit,
        verdict: GateResult,
        result: TaskExecutionResult,
    ) -> TaskExecutionResult {
        let hub = self.guard.hub();
        let key = format!("rec_{}", uuid::Uuid::new_v4().simple());
        let response = hub.request(
            key.clone(),
            ApprovalEvent::RecoveryRequested {
                request: key.clone(),
                task_id: task.id.clone(),
                strategy: strategy.kind().to_string(),
                prompt: strategy.prompt().unwrap_or_default().to_string(),
            },
        );
        let limit = Duration::from_millis(self.guard.config().token_ttl_ms);
        tracing::info!(task = %task.id, request = %key, strategy = strategy.kind(), "waiting for human recovery");

        let answer = tokio::select! {
            biased;
            answer = response => answer.ok(),
            () = run.cancel.cancelled() => None,
            () = tokio::time::sleep(limit) => None,
        };
        hub.withdraw(&key);

        match answer {
            Some(HumanResponse::Approve) => {
                let recovery = RecoveryResult::succeeded(
                    strategy.clone(),
                    "accepted by human",
                    Some(commit.data.clone()),
                );
                accept(result, commit.data, verdict).with_recovery(recovery)
            }
            Some(HumanResponse::Respond { input }) => {
                let revised = Commit::for_task(&task.id, task.tool_name.as_deref(), input)
                    .with_previous_state(Value::Object(task.inputs.clone()))
                    .with_metadata("revised_from", json!(commit.id));
                match self.submit(run, task, revised, gate) {
                    Ok(GateVerdict::Accepted { commit, result: verdict }) => {
                        let recovery = RecoveryResult::succeeded(
                            strategy.clone(),
                            "human input accepted",
                            Some(commit.data.clone()),
                        );
                        accept(result, commit.data, verdict).with_recovery(recovery)
                    }
                    Ok(GateVerdict::Blocked { result: verdict, .. }) => {
                        let recovery = RecoveryResult::failed(strategy.clone(), "human input was blocked");
                        block(result, verdict).with_recovery(recovery)
                    }
                    Err(err) => gate_error(result, &err),
                }
            }
            Some(HumanResponse::Deny { reason }) => {
                let recovery = RecoveryResult::failed(strategy.clone(), format!("declined: {reason}"));
                block(result, verdict).with_recovery(recovery)
            }
            None if run.cancel.is_cancelled() => {
                TaskExecutionResult::failed(task.id.clone(), ErrorKind::Aborted, "cancelled while awaiting recovery")
                    .with_attempts(result.attempts)
            }
            None => {
                let recovery = RecoveryResult::failed(strategy.clone(), "no response before the deadline");
                block(result, verdict).with_recovery(recovery)
            }
        }
    }

    fn emit(&self, run: &Run<'_>, task: &TaskSpec, kind: TelemetryEventType, data: Value) {
        let event = TelemetryEvent::new(kind, data)
            .for_workflow(&run.spec.id, run.correlation_id.as_deref())
            .for_task(&task.id, task.task_type);
        self.telemetry.emit(Emission::Event(event));
    }
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.config)
            .field("guard", &self.guard)
            .field("runner", &self.runner)
            .finish()
    }
}

/// The guarded action a task performs
fn action_for(run: &Run<'_>, task: &TaskSpec) -> Action {
    let name = task.tool_name.clone().unwrap_or_else(|| task.name.clone());
    let mut action = Action::new(
        format!("{}:{}", run.spec.id, task.id),
        name,
        task.effective_risk_tier(),
    );
    action.required_permissions = task.required_permissions.clone().unwrap_or_default();
    action.intent = task.intent;
    action.data_zone = task.data_zone;
    action.allowed_tools = task.allowed_tools.clone();
    if !run.metadata.is_empty() {
        action.metadata = Some(run.metadata.clone());
    }
    action
}

/// The action a recovery performs when it swaps in `tool`
fn alternate_action(run: &Run<'_>, task: &TaskSpec, tool: &str) -> Action {
    let mut action = action_for(run, task);
    action.id = ActionId::new(format!("{}:{}:{tool}", run.spec.id, task.id));
    action.name = tool.to_string();
    action
}

fn stopped(task: &TaskId, deadline_elapsed: bool) -> TaskExecutionResult {
    if deadline_elapsed {
        TaskExecutionResult::skipped(task.clone(), ErrorKind::Timeout, "workflow deadline elapsed")
    } else {
        TaskExecutionResult::skipped(task.clone(), ErrorKind::Aborted, "workflow cancelled")
    }
}

fn accept(mut result: TaskExecutionResult, data: Value, verdict: GateResult) -> TaskExecutionResult {
    result.status = TaskStatus::Success;
    result.result = Some(data);
    result.error = None;
    result.error_kind = None;
    result.with_gate_result(verdict)
}

fn block(mut result: TaskExecutionResult, verdict: GateResult) -> TaskExecutionResult {
    let code = verdict
        .failure_code
        .map_or_else(|| "validation failed".to_string(), |code| format!("{code:?}"));
    result.status = TaskStatus::Failed;
    result.result = None;
    result.error = Some(format!("commit blocked by gate {}: {code}", verdict.gate_name));
    result.error_kind = Some(ErrorKind::CrvBlocked);
    result.with_gate_result(verdict)
}

fn gate_error(mut result: TaskExecutionResult, err: &CrvError) -> TaskExecutionResult {
    let err = ExecutionError::Gate(err.clone());
    result.status = TaskStatus::Failed;
    result.result = None;
    result.error = Some(err.to_string());
    result.error_kind = Some(err.kind());
    result
}
