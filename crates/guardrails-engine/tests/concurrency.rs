//! Concurrent votes on the same step settle exactly once.

mod common;

use common::{harness, post, publish};
use futures::future::join_all;
use guardrails_engine::{ActorProfile, ApprovalError, ApprovalStore, CaptureOptions, FlowBuilder};
use guardrails_types::{RequestState, StepStatus};
use serde_json::json;
use std::sync::Arc;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_complete_once() {
    let h = harness();
    let flow = FlowBuilder::new()
        .capabilities(["content.review"])
        .signed_by(5, Some("Quorum"))
        .build();
    let captured = h
        .service
        .capture(
            &post(),
            publish(),
            "updating",
            None,
            CaptureOptions::new().with_flow(flow),
        )
        .await
        .unwrap();
    let step_id = captured.steps[0].id;

    let service = Arc::new(h.service);
    let handles: Vec<_> = (0..12)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let signer =
                    ActorProfile::new(format!("reviewer-{i}")).with_capabilities(["content.review"]);
                service.approve(&step_id, &signer, None).await
            })
        })
        .collect();

    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let completions = results
        .iter()
        .filter(|result| matches!(result, Ok(outcome) if outcome.request_approved()))
        .count();
    assert_eq!(completions, 1);

    for result in &results {
        if let Err(err) = result {
            assert!(
                matches!(
                    err,
                    ApprovalError::StepNotPending { .. } | ApprovalError::RequestNotPending { .. }
                ),
                "unexpected error: {err}"
            );
        }
    }

    let accepted = results.iter().filter(|result| result.is_ok()).count();
    let signatures = service.store().list_signatures(&step_id).await.unwrap();
    assert_eq!(signatures.len(), accepted);
    assert!(accepted >= 5);

    let request = service
        .store()
        .get_request(&captured.request_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.state, RequestState::Approved);
    let step = service.store().get_step(&step_id).await.unwrap().unwrap();
    assert_eq!(step.status, StepStatus::Completed);

    let completed_events = h
        .sink
        .kinds()
        .into_iter()
        .filter(|kind| *kind == "request_completed")
        .count();
    assert_eq!(completed_events, 1);
    assert_eq!(h.targets.value(&post(), "published"), Some(json!(true)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mixed_votes_never_settle_twice() {
    let h = harness();
    let flow = FlowBuilder::new()
        .capabilities(["content.review"])
        .signed_by(3, Some("Quorum"))
        .build();
    let captured = h
        .service
        .capture(
            &post(),
            publish(),
            "updating",
            None,
            CaptureOptions::new().with_flow(flow),
        )
        .await
        .unwrap();
    let step_id = captured.steps[0].id;

    let service = Arc::new(h.service);
    let handles: Vec<_> = (0..10)
        .map(|i| {
            let service = service.clone();
            tokio::spawn(async move {
                let signer = ActorProfile::new(format!("reviewer-{i}"))
                    .with_capabilities(["content.review"]);
                if i % 2 == 0 {
                    service.approve(&step_id, &signer, None).await
                } else {
                    service.reject(&step_id, &signer, None).await
                }
            })
        })
        .collect();
    let results: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let settled = results
        .iter()
        .filter(|result| matches!(result, Ok(outcome) if !outcome.settlement.is_noop()))
        .count();
    assert_eq!(settled, 1);

    let request = service
        .store()
        .get_request(&captured.request_id())
        .await
        .unwrap()
        .unwrap();
    assert!(request.state.is_terminal());
}
