use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use conductor_core::config::ConductorConfig;
use conductor_core::error::ExecutorError;
use conductor_core::executor::traits::StageExecutor;
use conductor_core::executor::{PlanGraph, RunOutcome, StageContext, StageResult};
use conductor_core::stage::{ExecutionMode, Stage, StageId};
use conductor_plugins::factory::build_plan_executor;

/// Passes every stage with a short evidence note.
struct TouchExecutor;

#[async_trait]
impl StageExecutor for TouchExecutor {
    async fn run(&self, ctx: StageContext) -> Result<StageResult, ExecutorError> {
        ctx.heartbeat.beat();
        Ok(StageResult::pass().with_evidence(format!("touched {}", ctx.stage_id)))
    }
}

fn in_place(id: &str) -> Stage {
    Stage::new(id).with_mode(ExecutionMode::InPlace)
}

#[tokio::test]
async fn config_wired_executor_streams_jsonl_events() {
    let repo = tempfile::tempdir().unwrap();
    let events_path = repo.path().join("events.jsonl");

    let mut cfg = ConductorConfig::default();
    cfg.lock.acquire_timeout_ms = 2_000;
    cfg.lock.poll_interval_ms = 2;
    cfg.lock.max_poll_interval_ms = 10;
    cfg.executor.retry.strategy = "linear".to_string();
    cfg.executor.concurrency.strategy = "cpu-bound".to_string();
    cfg.events_out.enabled = true;
    cfg.events_out.path = events_path.to_string_lossy().into_owned();
    cfg.events_out.drop_when_full = false;

    let (plan, sink) = build_plan_executor(&cfg, repo.path(), Arc::new(TouchExecutor))
        .await
        .unwrap();
    let sink = sink.expect("events_out enabled");

    let mut graph = PlanGraph::from_stages(vec![
        in_place("fmt"),
        in_place("lint").depends_on(["fmt"]),
        in_place("docs").depends_on(["fmt"]),
    ])
    .unwrap();
    let report = plan.execute(&mut graph).await.unwrap();
    sink.shutdown().await;

    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(
        report.verified,
        vec![StageId::from("docs"), StageId::from("fmt"), StageId::from("lint")]
    );
    assert!(repo.path().join(".conductor").join("verification").join("fmt.json").exists());

    let text = std::fs::read_to_string(&events_path).unwrap();
    let kinds: Vec<String> = text
        .lines()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            v["type"].as_str().unwrap().to_string()
        })
        .collect();
    assert_eq!(kinds.first().map(String::as_str), Some("run_start"));
    assert_eq!(kinds.last().map(String::as_str), Some("run_end"));
    assert_eq!(kinds.iter().filter(|k| *k == "stage_verified").count(), 3);
    assert_eq!(sink.dropped_count(), 0);
}

#[tokio::test]
async fn unknown_strategy_fails_wiring() {
    let repo = tempfile::tempdir().unwrap();
    let mut cfg = ConductorConfig::default();
    cfg.executor.retry.strategy = "never-heard-of-it".to_string();
    let result = build_plan_executor(&cfg, repo.path(), Arc::new(TouchExecutor)).await;
    assert!(result.is_err());
}
