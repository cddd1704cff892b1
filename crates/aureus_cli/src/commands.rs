//! Subcommand implementations.
//!
//! Each command returns the JSON document printed on stdout, so the
//! binary stays a thin shell over these functions.

use aureus_crv::{GateBindings, ValidatorRegistry};
use aureus_plan::{DependencyGraph, SpecValidator, WorkflowSpec};
use aureus_policy::{ApprovalEvent, ApprovalHub, HumanResponse};
use aureus_runtime::{EngineConfig, WorkflowEngine, WorkflowExecutionRequest, WorkflowStatus};
use aureus_tool::{SandboxConfig, ToolRegistry};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::Path;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Read and decode a JSON document
fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("reading {what} {}", path.display()))?;
    serde_json::from_str(&text).wrap_err_with(|| format!("decoding {what} {}", path.display()))
}

/// Load a workflow file holding either a bare workflow or a request
/// wrapping one with `context` and `correlation_id`
pub fn load_request(path: &Path) -> Result<WorkflowExecutionRequest> {
    let document: Value = read_json(path, "workflow")?;
    let request = if document.get("workflow").is_some() {
        serde_json::from_value(document)
    } else {
        serde_json::from_value::<WorkflowSpec>(document).map(WorkflowExecutionRequest::new)
    };
    request.wrap_err_with(|| format!("decoding workflow {}", path.display()))
}

/// `validate`: report every violation, or `valid: true`
pub fn validate(path: &Path, max_tasks: usize) -> Result<Value> {
    let request = load_request(path)?;
    let spec = &request.workflow;
    let report = match SpecValidator::new().with_max_tasks(max_tasks).validate(spec) {
        Ok(()) => json!({
            "workflow_id": spec.id,
            "valid": true,
            "tasks": spec.tasks.len(),
        }),
        Err(errors) => json!({
            "workflow_id": spec.id,
            "valid": false,
            "errors": errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }),
    };
    Ok(report)
}

/// `plan`: the ready sets the engine would run, in order
pub fn plan(path: &Path) -> Result<Value> {
    let request = load_request(path)?;
    let plan = DependencyGraph::resolve(&request.workflow)?;
    Ok(json!({
        "workflow_id": request.workflow.id,
        "ready_sets": plan.ready_sets,
    }))
}

/// Options for `run`
#[derive(Debug, Default, Clone)]
pub struct RunOptions {
    /// Engine configuration file
    pub config: Option<std::path::PathBuf>,
    /// Gate bindings file
    pub gates: Option<std::path::PathBuf>,
    /// Approve every token and recovery request automatically
    pub auto_approve: bool,
}

/// `run`: execute the workflow with tools routed to a simulated sandbox
pub async fn run(path: &Path, options: &RunOptions) -> Result<(Value, WorkflowStatus)> {
    let request = load_request(path)?;
    let mut config: EngineConfig = match &options.config {
        Some(file) => read_json(file, "engine config")?,
        None => EngineConfig::default(),
    };
    if config.default_sandbox.is_none() {
        config.default_sandbox = Some(SandboxConfig::simulation());
    }
    let gates: GateBindings = match &options.gates {
        Some(file) => read_json(file, "gate bindings")?,
        None => GateBindings::new(),
    };

    let engine = WorkflowEngine::new(ToolRegistry::new(), ValidatorRegistry::with_builtins(), config);
    let approver = options
        .auto_approve
        .then(|| {
            let hub = engine.guard().hub().clone();
            let events = hub.subscribe();
            tokio::spawn(auto_approve(hub, events))
        });

    let result = engine.execute_request(&request, gates).await;
    if let Some(handle) = approver {
        handle.abort();
    }
    let status = result.status;
    Ok((serde_json::to_value(&result)?, status))
}

/// Answer every approval and recovery request with `approve`
async fn auto_approve(hub: ApprovalHub, mut events: broadcast::Receiver<ApprovalEvent>) {
    loop {
        let key = match events.recv().await {
            Ok(ApprovalEvent::TokenIssued { token, .. }) => token,
            Ok(ApprovalEvent::RecoveryRequested { request, .. }) => request,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "auto-approver fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        tracing::info!(key = %key, "auto-approving");
        hub.respond(&key, HumanResponse::Approve);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write(value: &Value) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(value.to_string().as_bytes()).unwrap();
        file
    }

    fn pipeline(transform_tier: &str) -> Value {
        json!({
            "id": "etl",
            "name": "nightly etl",
            "tasks": [
                {"id": "read", "name": "read", "type": "action", "tool_name": "read_document"},
                {"id": "transform", "name": "transform", "type": "action",
                 "tool_name": "transform_rows", "risk_tier": transform_tier},
                {"id": "save", "name": "save", "type": "action", "tool_name": "save_rows"}
            ],
            "dependencies": {"transform": ["read"], "save": ["transform"]}
        })
    }

    #[test]
    fn test_validate_reports_errors() {
        let mut spec = pipeline("LOW");
        spec["dependencies"]["save"] = json!(["ghost"]);
        let file = write(&spec);
        let report = validate(file.path(), 100).unwrap();
        assert_eq!(report["valid"], json!(false));
        assert!(report["errors"][0].as_str().unwrap().contains("ghost"));
    }

    #[test]
    fn test_plan_prints_ready_sets() {
        let file = write(&pipeline("LOW"));
        let report = plan(file.path()).unwrap();
        assert_eq!(report["ready_sets"], json!([["read"], ["transform"], ["save"]]));
    }

    #[test]
    fn test_load_request_wrapper() {
        let file = write(&json!({
            "workflow": pipeline("LOW"),
            "correlation_id": "nightly-42"
        }));
        let request = load_request(file.path()).unwrap();
        assert_eq!(request.correlation_id.as_deref(), Some("nightly-42"));
        assert_eq!(request.workflow.tasks.len(), 3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_request(Path::new("/nonexistent/workflow.json")).is_err());
    }

    #[tokio::test]
    async fn test_run_simulated() {
        let file = write(&pipeline("LOW"));
        let (report, status) = run(file.path(), &RunOptions::default()).await.unwrap();
        assert_eq!(status, WorkflowStatus::Success);
        assert_eq!(report["task_results"]["save"]["status"], json!("success"));
        assert_eq!(report["task_results"]["read"]["result"]["simulated"], json!(true));
    }

    #[tokio::test]
    async fn test_run_auto_approves_critical_task() {
        let file = write(&pipeline("CRITICAL"));
        let options = RunOptions {
            auto_approve: true,
            ..RunOptions::default()
        };
        let (report, status) = run(file.path(), &options).await.unwrap();
        assert_eq!(status, WorkflowStatus::Success);
        assert_eq!(
            report["task_results"]["transform"]["guard_decision"]["allowed"],
            json!(true)
        );
    }

    #[tokio::test]
    async fn test_run_with_config_and_gates() {
        let workflow = write(&pipeline("LOW"));
        let config = write(&json!({"guard": {"token_ttl_ms": 1000}, "fail_fast": true}));
        let gates = write(&json!({
            "default": {
                "name": "shape",
                "validators": ["balance_positive"],
                "block_on_failure": true
            }
        }));
        let options = RunOptions {
            config: Some(config.path().to_path_buf()),
            gates: Some(gates.path().to_path_buf()),
            auto_approve: false,
        };
        let (report, status) = run(workflow.path(), &options).await.unwrap();
        assert_eq!(status, WorkflowStatus::Failed);
        assert_eq!(report["task_results"]["read"]["error_kind"], json!("CrvBlocked"));
        assert_eq!(report["task_results"]["save"]["status"], json!("skipped"));
    }
}
