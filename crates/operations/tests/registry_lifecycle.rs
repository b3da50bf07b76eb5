use std::sync::Arc;
use std::time::Duration;

use sw_domain::config::RegistryConfig;
use sw_operations::{
    OperationContext, OperationEvent, OperationFilter, OperationId, OperationRegistry,
    OperationStatus, OperationType, StartOperation,
};

fn registry() -> OperationRegistry {
    OperationRegistry::new(RegistryConfig {
        auto_cleanup: false,
        ..Default::default()
    })
}

fn runtime_in(reg: &OperationRegistry, session: &str, topic: Option<&str>) -> OperationId {
    let mut ctx = OperationContext::new(session);
    if let Some(t) = topic {
        ctx = ctx.topic(t);
    }
    reg.start_operation(StartOperation::new(OperationType::ExecAgentRuntime).context(ctx))
        .operation_id
}

fn assert_consistent(reg: &OperationRegistry) {
    let problems = reg.snapshot().check_consistency();
    assert!(problems.is_empty(), "inconsistent registry: {problems:#?}");
}

#[test]
fn cancelled_status_and_aborted_token_move_together() {
    let reg = registry();
    let root = runtime_in(&reg, "s1", None);
    let llm = reg
        .start_operation(StartOperation::new(OperationType::CallLlm).parent(&root))
        .operation_id;
    let tools = reg
        .start_operation(StartOperation::new(OperationType::ToolCalling).parent(&root))
        .operation_id;
    reg.complete_operation(&llm, None);

    for op in reg.snapshot().operations.values() {
        assert_eq!(op.is_aborted(), op.status == OperationStatus::Cancelled);
    }

    reg.cancel_operation(&root, "User cancelled");

    let snap = reg.snapshot();
    for op in snap.operations.values() {
        assert_eq!(op.is_aborted(), op.status == OperationStatus::Cancelled);
    }
    assert_eq!(snap.operations[&llm].status, OperationStatus::Completed);
    assert_eq!(snap.operations[&tools].status, OperationStatus::Cancelled);
    assert_consistent(&reg);
}

#[test]
fn cascade_reaches_every_descendant() {
    let reg = registry();
    let root = runtime_in(&reg, "s1", Some("t1"));
    let mut frontier = vec![root.clone()];
    let mut all = vec![root.clone()];
    // Three levels, fan-out of two.
    for _ in 0..3 {
        let mut next = Vec::new();
        for parent in &frontier {
            for _ in 0..2 {
                let id = reg
                    .start_operation(
                        StartOperation::new(OperationType::ExecuteToolCall).parent(parent),
                    )
                    .operation_id;
                next.push(id.clone());
                all.push(id);
            }
        }
        frontier = next;
    }

    let cancelled = reg.cancel_operation(&root, "stop everything");
    assert_eq!(cancelled.len(), all.len());
    for id in &all {
        let op = reg.get(id).unwrap();
        assert_eq!(op.status, OperationStatus::Cancelled);
        assert!(op.is_aborted());
        assert!(op.metadata.end_time.is_some());
    }
    assert_consistent(&reg);
}

#[test]
fn session_filter_matches_all_topics_but_topic_filter_is_exact() {
    let reg = registry();
    let no_topic = runtime_in(&reg, "s1", None);
    let t1 = runtime_in(&reg, "s1", Some("t1"));
    let t2 = runtime_in(&reg, "s1", Some("t2"));
    let other = runtime_in(&reg, "s2", Some("t1"));

    let hit = reg.cancel_operations(&OperationFilter::session("s1").topic("t1"), "narrow");
    assert_eq!(hit, vec![t1.clone()]);
    assert!(reg.get(&no_topic).unwrap().is_running());
    assert!(reg.get(&t2).unwrap().is_running());

    let hit = reg.cancel_operations(&OperationFilter::session("s1").without_topic(), "no topic");
    assert_eq!(hit, vec![no_topic.clone()]);
    assert!(reg.get(&t2).unwrap().is_running());

    let hit = reg.cancel_operations(&OperationFilter::session("s1"), "wide");
    assert_eq!(hit, vec![t2.clone()]);
    assert!(reg.get(&other).unwrap().is_running());
    assert_consistent(&reg);
}

#[test]
fn type_filter_limits_batch_cancel() {
    let reg = registry();
    let root = runtime_in(&reg, "s1", None);
    let send = reg
        .start_operation(
            StartOperation::new(OperationType::SendMessage).context(OperationContext::new("s1")),
        )
        .operation_id;

    let hit = reg.cancel_operations(
        &OperationFilter::session("s1").of_type(OperationType::SendMessage),
        "cancel send only",
    );
    assert_eq!(hit, vec![send]);
    assert!(reg.get(&root).unwrap().is_running());
}

#[test]
fn cancel_all_stops_every_running_operation() {
    let reg = registry();
    runtime_in(&reg, "s1", None);
    runtime_in(&reg, "s2", Some("t"));
    let done = runtime_in(&reg, "s3", None);
    reg.complete_operation(&done, None);

    assert_eq!(reg.cancel_all("shutdown").len(), 2);
    assert!(!reg.has_any_running_operation());
    assert_eq!(reg.get(&done).unwrap().status, OperationStatus::Completed);
}

#[test]
fn child_inherits_context_and_completion_has_duration() {
    let reg = registry();
    let root = runtime_in(&reg, "s1", Some("t1"));
    let child = reg
        .start_operation(StartOperation::new(OperationType::Reasoning).parent(&root))
        .operation_id;

    let child_op = reg.get(&child).unwrap();
    assert_eq!(child_op.context.session_id, "s1");
    assert_eq!(child_op.context.topic_id.as_deref(), Some("t1"));
    assert_eq!(reg.operations_in_context("s1", Some("t1")).len(), 2);

    std::thread::sleep(Duration::from_millis(2));
    assert!(reg.complete_operation(&child, None));
    let child_op = reg.get(&child).unwrap();
    let end = child_op.metadata.end_time.unwrap();
    assert!(end >= child_op.metadata.start_time);
    assert!(child_op.metadata.duration_ms.is_some());
}

#[test]
fn ai_generating_tracks_runtime_lifecycle() {
    let reg = registry();
    let root = runtime_in(&reg, "s1", None);
    assert!(reg.is_ai_generating("s1", None));
    assert!(!reg.can_send_message("s1", None));

    reg.fail_operation(
        &root,
        sw_operations::OperationError::new("model", "upstream closed"),
    );
    assert!(!reg.is_ai_generating("s1", None));
    assert!(reg.can_send_message("s1", None));
}

#[test]
fn two_sessions_are_isolated_end_to_end() {
    let reg = registry();
    let a = runtime_in(&reg, "s1", Some("t1"));
    let b = runtime_in(&reg, "s2", Some("t1"));
    let a_child = reg
        .start_operation(StartOperation::new(OperationType::CallLlm).parent(&a))
        .operation_id;

    assert!(reg.is_ai_generating("s1", Some("t1")));
    assert!(reg.is_ai_generating("s2", Some("t1")));

    let hit = reg.cancel_operations(&OperationFilter::session("s1").topic("t1"), "stop s1");
    assert_eq!(hit, vec![a.clone()]);
    assert!(reg.get(&a_child).unwrap().is_aborted());

    assert!(!reg.is_ai_generating("s1", Some("t1")));
    assert!(reg.is_ai_generating("s2", Some("t1")));
    assert!(!reg.get(&b).unwrap().is_aborted());
    assert_consistent(&reg);
}

#[test]
fn auto_cleanup_runs_on_top_level_start() {
    let reg = OperationRegistry::new(RegistryConfig {
        auto_cleanup: true,
        cleanup_after_ms: 0,
        ..Default::default()
    });
    let old = runtime_in(&reg, "s1", None);
    reg.complete_operation(&old, None);
    std::thread::sleep(Duration::from_millis(2));

    let fresh = runtime_in(&reg, "s1", None);
    assert!(reg.get(&old).is_none());
    assert!(reg.get(&fresh).is_some());
    assert_consistent(&reg);
}

#[test]
fn concurrent_mutations_keep_indices_consistent() {
    let reg = Arc::new(registry());
    let handles: Vec<_> = (0..8)
        .map(|n| {
            let reg = reg.clone();
            std::thread::spawn(move || {
                let session = format!("s{}", n % 3);
                for i in 0..50 {
                    let root = runtime_in(&reg, &session, Some("t"));
                    let child = reg
                        .start_operation(StartOperation::new(OperationType::CallLlm).parent(&root))
                        .operation_id;
                    match i % 3 {
                        0 => {
                            reg.cancel_operation(&root, "stop");
                        }
                        1 => {
                            reg.complete_operation(&child, None);
                            reg.complete_operation(&root, None);
                        }
                        _ => {
                            reg.cancel_operations(&OperationFilter::session(session.clone()), "batch");
                        }
                    }
                    reg.cleanup_completed(Duration::ZERO);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_consistent(&reg);
}

#[tokio::test]
async fn awaiting_work_observes_cascade() {
    let reg = Arc::new(registry());
    let root = runtime_in(&reg, "s1", None);
    let child = reg.start_operation(StartOperation::new(OperationType::ExecuteToolCall).parent(&root));

    let token = child.cancel_token.clone();
    let work = tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => token.reason(),
            _ = tokio::time::sleep(Duration::from_secs(10)) => None,
        }
    });

    tokio::task::yield_now().await;
    reg.cancel_operation(&root, "User cancelled");
    let reason = work.await.unwrap();
    assert_eq!(reason.as_deref(), Some("Parent operation cancelled"));
}

#[tokio::test]
async fn events_follow_lifecycle() {
    let reg = registry();
    let mut rx = reg.subscribe();
    let root = runtime_in(&reg, "s1", None);
    let child = reg
        .start_operation(StartOperation::new(OperationType::CallLlm).parent(&root))
        .operation_id;
    reg.complete_operation(&child, None);
    reg.cancel_operation(&root, "bye");

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    assert_eq!(seen.len(), 4);
    assert!(matches!(seen[0], OperationEvent::Started { .. }));
    assert!(matches!(&seen[1], OperationEvent::Started { parent_id: Some(p), .. } if *p == root));
    assert_eq!(seen[2].terminal_status(), Some(OperationStatus::Completed));
    assert_eq!(seen[3].terminal_status(), Some(OperationStatus::Cancelled));
    assert_eq!(seen[3].operation_id(), &root);
}
