//! Integration tests for ingestion, scheduling, and workflow execution.

mod common;

use common::{Reply, harness, input, push_body, report_with_rows};
use pipeline_orchestrator::model::message::PushAckStatus;
use pipeline_orchestrator::model::{NewTask, StatusUpdate, TaskId, TaskStatus, WorkflowType};
use pipeline_orchestrator::resilience::CallError;
use pipeline_orchestrator::store::TaskStore;
use serde_json::json;

use common::FakeCollaborators;

fn input_for(workflow: WorkflowType) -> serde_json::Value {
    match workflow {
        WorkflowType::ReportAnalysis => json!({"file_path": "reports/q1.xlsx"}),
        WorkflowType::VisualizationOnly => json!({"file_path": "reports/q1.xlsx", "chart_type": "line"}),
        WorkflowType::VoiceAnalysis => json!({"query": "What was Q1 revenue?"}),
    }
}

// ---------------------------------------------------------------------------
// Successful runs
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn every_workflow_walks_exactly_its_sequence() {
    for workflow in WorkflowType::ALL {
        let h = harness(FakeCollaborators::new());
        let task = h
            .engine
            .create_task(workflow, input(input_for(workflow)))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);

        h.engine.wait_for_runs().await;

        assert_eq!(h.store.statuses(&task.id), workflow.states(), "{workflow}");
        let done = h.engine.get_task(&task.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.error_message.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn report_analysis_merges_every_step_output() {
    let mut h = harness(FakeCollaborators::new());
    let task = h
        .engine
        .create_task(
            WorkflowType::ReportAnalysis,
            input(json!({"file_path": "reports/q1.xlsx", "title": "Q1"})),
        )
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    let done = h.engine.get_task(&task.id).await.unwrap();
    let keys: Vec<&str> = done.output_data.keys().map(String::as_str).collect();
    assert_eq!(keys.len(), 3);
    for key in ["report_data", "analysis", "visualization"] {
        assert!(done.output_data.contains_key(key), "missing {key}");
    }
    assert_eq!(done.output_data["visualization"]["chart_id"], json!("chart_1"));
    assert_eq!(done.input_data, input(json!({"file_path": "reports/q1.xlsx", "title": "Q1"})));

    // The analysis saw the report; the chart was built from its rows.
    let analyze = h.collaborators.analyze_requests.lock().unwrap()[0].clone();
    assert_eq!(analyze.query, "Analyze this report");
    assert_eq!(
        analyze.context.unwrap()["report_data"],
        report_with_rows(3)
    );
    let chart = h.collaborators.chart_requests.lock().unwrap()[0].clone();
    assert_eq!(chart.chart_type, "bar");
    assert_eq!(chart.title, "Q1");
    assert_eq!(chart.data, json!({"labels": ["0", "1", "2"], "values": [10, 20, 30]}));

    let published = h.results.recv().await.unwrap();
    assert_eq!(published.task_id, task.id);
    assert_eq!(published.status, TaskStatus::Completed);
    assert_eq!(published.output_data, done.output_data);
}

#[tokio::test(start_paused = true)]
async fn visualization_skipped_when_report_has_no_rows() {
    let collaborators = FakeCollaborators::new().on_read([Reply::Ok(report_with_rows(0))]);
    let h = harness(collaborators);

    let task = h
        .engine
        .create_task(
            WorkflowType::VisualizationOnly,
            input(json!({"file_path": "a.csv", "chart_type": "bar"})),
        )
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    let done = h.engine.get_task(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.output_data["visualization"]["status"], json!("skipped"));
    assert_eq!(h.collaborators.charts(), 0);
}

#[tokio::test(start_paused = true)]
async fn visualization_only_prefers_supplied_chart_data() {
    let h = harness(FakeCollaborators::new());
    let data = json!({"labels": ["a", "b"], "values": [1, 2]});
    h.engine
        .create_task(
            WorkflowType::VisualizationOnly,
            input(json!({"spreadsheet_id": "sheet-9", "data": data, "title": "Mix"})),
        )
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    let chart = h.collaborators.chart_requests.lock().unwrap()[0].clone();
    assert_eq!(chart.data, data);
    assert_eq!(chart.title, "Mix");
    assert!(chart.save_to_storage);
}

#[tokio::test(start_paused = true)]
async fn completion_survives_publish_failure() {
    let h = harness(FakeCollaborators::new());
    drop(h.results);

    let task = h
        .engine
        .create_task(WorkflowType::VoiceAnalysis, input(input_for(WorkflowType::VoiceAnalysis)))
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    let done = h.engine.get_task(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn client_error_fails_task_without_retry() {
    let collaborators = FakeCollaborators::new()
        .on_read([Reply::Err(CallError::Client("unsupported file type".into()))]);
    let h = harness(collaborators);

    let task = h
        .engine
        .create_task(WorkflowType::ReportAnalysis, input(json!({"file_path": "x.pdf"})))
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    assert_eq!(h.collaborators.reads(), 1);
    assert_eq!(h.collaborators.analyses(), 0);
    assert_eq!(
        h.store.statuses(&task.id),
        vec![TaskStatus::Reading, TaskStatus::Failed]
    );
    let failed = h.engine.get_task(&task.id).await.unwrap();
    assert_eq!(
        failed.error_message.as_deref(),
        Some("read_report failed: client error: unsupported file type")
    );
}

#[tokio::test(start_paused = true)]
async fn three_transient_errors_fail_after_full_budget() {
    let transient = || Reply::Err(CallError::Transient("503".into()));
    let collaborators =
        FakeCollaborators::new().on_analyze([transient(), transient(), transient()]);
    let h = harness(collaborators);

    let started = tokio::time::Instant::now();
    let task = h
        .engine
        .create_task(WorkflowType::VoiceAnalysis, input(input_for(WorkflowType::VoiceAnalysis)))
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    assert_eq!(h.collaborators.analyses(), 3);
    // 100ms + 200ms of backoff between the three attempts.
    assert!(started.elapsed() >= std::time::Duration::from_millis(300));
    let failed = h.engine.get_task(&task.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error_message.unwrap().contains("transient error: 503"));
}

#[tokio::test(start_paused = true)]
async fn transient_error_then_success_continues() {
    let collaborators = FakeCollaborators::new()
        .on_read([Reply::Err(CallError::Transient("connection reset".into()))]);
    let h = harness(collaborators);

    let task = h
        .engine
        .create_task(WorkflowType::ReportAnalysis, input(input_for(WorkflowType::ReportAnalysis)))
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    assert_eq!(h.collaborators.reads(), 2);
    let done = h.engine.get_task(&task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(h.store.statuses(&task.id), WorkflowType::ReportAnalysis.states());
}

#[tokio::test(start_paused = true)]
async fn exhausted_rate_limit_gets_distinct_message() {
    let limited = || Reply::Err(CallError::RateLimited("inference returned 429".into()));
    let collaborators = FakeCollaborators::new().on_analyze([limited(), limited(), limited()]);
    let h = harness(collaborators);

    let task = h
        .engine
        .create_task(WorkflowType::VoiceAnalysis, input(input_for(WorkflowType::VoiceAnalysis)))
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    let failed = h.engine.get_task(&task.id).await.unwrap();
    let message = failed.error_message.unwrap();
    assert!(message.contains("rate limiting"), "{message}");
}

#[tokio::test(start_paused = true)]
async fn rate_limit_message_survives_a_final_server_error() {
    let limited = || Reply::Err(CallError::RateLimited("inference returned 429".into()));
    let collaborators = FakeCollaborators::new().on_analyze([
        limited(),
        limited(),
        Reply::Err(CallError::Transient("503".into())),
    ]);
    let h = harness(collaborators);

    let task = h
        .engine
        .create_task(WorkflowType::VoiceAnalysis, input(input_for(WorkflowType::VoiceAnalysis)))
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    assert_eq!(h.collaborators.analyses(), 3);
    let failed = h.engine.get_task(&task.id).await.unwrap();
    assert_eq!(
        failed.error_message.as_deref(),
        Some(
            "analyze failed: inference service is rate limiting requests, try again later (inference returned 429)"
        )
    );
}

#[tokio::test(start_paused = true)]
async fn hung_collaborator_times_out() {
    let collaborators = FakeCollaborators::new().on_chart([Reply::Hang, Reply::Hang, Reply::Hang]);
    let h = harness(collaborators);

    let task = h
        .engine
        .create_task(WorkflowType::ReportAnalysis, input(input_for(WorkflowType::ReportAnalysis)))
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    assert_eq!(h.collaborators.charts(), 3);
    let failed = h.engine.get_task(&task.id).await.unwrap();
    assert_eq!(
        failed.error_message.as_deref(),
        Some("visualize failed: chart service did not respond within 2000ms")
    );
    // Output of the steps that did finish is kept.
    assert!(failed.output_data.contains_key("report_data"));
    assert_eq!(
        h.store.statuses(&task.id),
        vec![
            TaskStatus::Reading,
            TaskStatus::Analyzing,
            TaskStatus::Visualizing,
            TaskStatus::Failed
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn missing_inputs_fail_without_calling_out() {
    let h = harness(FakeCollaborators::new());

    let report = h
        .engine
        .create_task(WorkflowType::ReportAnalysis, input(json!({"title": "no source"})))
        .await
        .unwrap();
    let voice = h
        .engine
        .create_task(WorkflowType::VoiceAnalysis, input(json!({})))
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    assert_eq!(h.collaborators.reads(), 0);
    assert_eq!(h.collaborators.analyses(), 0);
    for id in [&report.id, &voice.id] {
        let task = h.engine.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }
}

// ---------------------------------------------------------------------------
// Store failures and crashed runs
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn rejected_status_write_fails_the_task() {
    let h = harness(FakeCollaborators::new());
    h.store.fail_next_write_to(TaskStatus::Analyzing);

    let task = h
        .engine
        .create_task(WorkflowType::ReportAnalysis, input(input_for(WorkflowType::ReportAnalysis)))
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    let failed = h.engine.get_task(&task.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert_eq!(
        failed.error_message.as_deref(),
        Some("could not record status analyzing: connection reset by peer")
    );
    assert_eq!(
        h.store.statuses(&task.id),
        vec![TaskStatus::Reading, TaskStatus::Failed]
    );
    assert_eq!(h.collaborators.analyses(), 0);
    assert_eq!(h.engine.active_runs(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_write_is_retried_after_a_rejection() {
    let h = harness(FakeCollaborators::new());
    h.store.fail_next_write_to(TaskStatus::Visualizing);
    h.store.fail_next_write_to(TaskStatus::Failed);

    let task = h
        .engine
        .create_task(WorkflowType::ReportAnalysis, input(input_for(WorkflowType::ReportAnalysis)))
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    let failed = h.engine.get_task(&task.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.output_data.contains_key("report_data"));
    assert!(!failed.output_data.contains_key("analysis"));
    assert_eq!(
        h.store.statuses(&task.id),
        vec![TaskStatus::Reading, TaskStatus::Analyzing, TaskStatus::Failed]
    );
}

#[tokio::test(start_paused = true)]
async fn panicking_run_releases_its_active_slot() {
    let h = harness(FakeCollaborators::new().on_read([Reply::Panic]));

    let task = h
        .engine
        .create_task(WorkflowType::ReportAnalysis, input(input_for(WorkflowType::ReportAnalysis)))
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    assert_eq!(h.engine.active_runs(), 0);
    let stranded = h.engine.get_task(&task.id).await.unwrap();
    assert_eq!(stranded.status, TaskStatus::Reading);
    assert_eq!(h.engine.recover_interrupted().await.unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Idempotency and push delivery
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn submitting_same_id_twice_runs_once() {
    let h = harness(FakeCollaborators::new());
    let new = || {
        NewTask::new(WorkflowType::VoiceAnalysis)
            .id("client-key-1")
            .input(input(input_for(WorkflowType::VoiceAnalysis)))
    };

    let first = h.engine.submit(new()).await.unwrap();
    let second = h.engine.submit(new()).await.unwrap();
    assert!(first.is_created());
    assert!(!second.is_created());
    assert_eq!(second.task().id, first.task().id);

    h.engine.wait_for_runs().await;
    assert_eq!(h.collaborators.analyses(), 1);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn redelivered_push_message_is_a_no_op() {
    let h = harness(FakeCollaborators::new());
    let body = push_body(&json!({
        "task_id": "pubsub-77",
        "workflow_type": "analyze_report",
        "file_path": "reports/q2.xlsx"
    }));

    let first = h.engine.handle_push(&body).await;
    let second = h.engine.handle_push(&body).await;
    h.engine.wait_for_runs().await;
    let third = h.engine.handle_push(&body).await;

    assert_eq!(first.status, PushAckStatus::Accepted);
    assert_eq!(first.task_id, Some(TaskId::from("pubsub-77")));
    assert_eq!(second.status, PushAckStatus::Duplicate);
    assert_eq!(third.status, PushAckStatus::Duplicate);
    assert_eq!(h.store.len().await, 1);
    assert_eq!(h.collaborators.reads(), 1);

    let task = h.engine.get_task(&TaskId::from("pubsub-77")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.workflow_type, WorkflowType::ReportAnalysis);
    assert_eq!(task.input_data, input(json!({"file_path": "reports/q2.xlsx"})));
}

#[tokio::test]
async fn undecodable_push_is_dead_lettered_and_acked() {
    let h = harness(FakeCollaborators::new());

    let ack = h
        .engine
        .handle_push(&push_body(&json!({"task_id": "t-1", "workflow_type": "summarize"})))
        .await;
    assert_eq!(ack.status, PushAckStatus::DeadLettered);
    assert!(ack.message.unwrap().contains("unknown workflow_type"));

    let ack = h.engine.handle_push(b"{{{").await;
    assert_eq!(ack.status, PushAckStatus::DeadLettered);

    let letters = h.engine.dead_letters(10).await.unwrap();
    assert_eq!(letters.len(), 2);
    assert_eq!(letters[1].subscription, "projects/demo/subscriptions/orchestrator-push");
    assert_eq!(letters[1].message_id.as_deref(), Some("msg-1"));
    assert_eq!(h.store.len().await, 0);
}

#[tokio::test]
async fn oversized_push_body_is_dead_lettered_with_a_preview() {
    let h = harness(FakeCollaborators::new());
    let engine = h.engine.clone().with_max_push_bytes(2048);
    let body = push_body(&json!({
        "task_id": "t-big",
        "workflow_type": "voice-analysis",
        "query": "y".repeat(4096)
    }));

    let ack = engine.handle_push(&body).await;
    assert_eq!(ack.status, PushAckStatus::DeadLettered);
    assert!(ack.message.unwrap().contains("exceeds the 2048 byte limit"));

    let letters = engine.dead_letters(10).await.unwrap();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].payload.len(), 1024);
    assert_eq!(h.store.len().await, 0);
}

// ---------------------------------------------------------------------------
// Lookup and recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_task_is_not_found() {
    let h = harness(FakeCollaborators::new());
    let err = h
        .engine
        .get_task(&TaskId::from("task_000000000000"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn recovery_fails_tasks_left_mid_run() {
    let h = harness(FakeCollaborators::new());

    let pending = h
        .store
        .create(NewTask::new(WorkflowType::VoiceAnalysis))
        .await
        .unwrap()
        .into_task();
    let reading = h
        .store
        .create(NewTask::new(WorkflowType::ReportAnalysis))
        .await
        .unwrap()
        .into_task();
    h.store
        .update_status(&reading.id, StatusUpdate::to(TaskStatus::Reading))
        .await
        .unwrap();

    assert_eq!(h.engine.recover_interrupted().await.unwrap(), 2);
    for id in [&pending.id, &reading.id] {
        let task = h.engine.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error_message.as_deref(),
            Some("interrupted by orchestrator restart")
        );
    }
    assert_eq!(h.engine.recover_interrupted().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn list_tasks_filters_by_status() {
    let h = harness(FakeCollaborators::new().on_analyze([Reply::Err(CallError::Client("no".into()))]));
    h.engine
        .create_task(WorkflowType::VoiceAnalysis, input(input_for(WorkflowType::VoiceAnalysis)))
        .await
        .unwrap();
    h.engine
        .create_task(WorkflowType::VoiceAnalysis, input(input_for(WorkflowType::VoiceAnalysis)))
        .await
        .unwrap();
    h.engine.wait_for_runs().await;

    let failed = h.engine.list_tasks(Some(TaskStatus::Failed), 50).await.unwrap();
    let completed = h.engine.list_tasks(Some(TaskStatus::Completed), 50).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(completed.len(), 1);
    assert_eq!(h.engine.list_tasks(None, 1).await.unwrap().len(), 1);
    assert_eq!(h.engine.active_runs(), 0);
}
