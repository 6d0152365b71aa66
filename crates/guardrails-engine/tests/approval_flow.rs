//! End-to-end approval scenarios: capture, decide, apply.

mod common;

use common::{changes, harness, harness_with, post, publish};
use guardrails_engine::{
    ActorProfile, ApprovalError, ApprovalStore, CaptureOptions, FlowBuilder, GuardrailsConfig,
    InMemoryTargets,
};
use guardrails_types::{
    FlowDefinition, RequestState, SignerRule, StepDefinition, StepStatus, TargetRef,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn author() -> ActorProfile {
    ActorProfile::new("author").with_capabilities(["content.write"])
}

fn editor() -> ActorProfile {
    ActorProfile::new("editor").with_capabilities(["content.publish"])
}

fn publish_flow() -> FlowDefinition {
    FlowBuilder::new()
        .any_of_capabilities(["content.publish"])
        .signed_by(1, Some("Editorial"))
        .build()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_step_publish_applies_changes() {
    let h = harness();
    let author = author();

    let captured = h
        .service
        .capture(
            &post(),
            publish(),
            "updating",
            Some(&author),
            CaptureOptions::new().with_flow(publish_flow()),
        )
        .await
        .unwrap();

    assert_eq!(captured.request.state, RequestState::Pending);
    assert_eq!(captured.steps.len(), 1);
    assert_eq!(captured.request.original_data.get("published"), Some(&json!(false)));
    assert_eq!(h.targets.value(&post(), "published"), Some(json!(false)));

    let outcome = h
        .service
        .approve(&captured.steps[0].id, &editor(), Some("ship it".into()))
        .await
        .unwrap();

    assert!(outcome.step_completed());
    assert!(outcome.request_approved());
    assert!(outcome.changes_applied);
    assert_eq!(outcome.step.status, StepStatus::Completed);
    assert!(outcome.step.completed_at.is_some());
    assert_eq!(outcome.signature.comment.as_deref(), Some("ship it"));
    assert_eq!(h.targets.value(&post(), "published"), Some(json!(true)));

    assert_eq!(
        h.sink.kinds(),
        vec!["captured", "step_approved", "request_completed"]
    );
}

#[tokio::test]
async fn initiator_preapproval_completes_at_capture() {
    let h = harness();
    let flow = FlowBuilder::new()
        .capabilities(["content.publish"])
        .include_initiator(true, true)
        .signed_by(1, Some("Self review"))
        .build();

    let captured = h
        .service
        .capture(
            &post(),
            publish(),
            "updating",
            Some(&editor()),
            CaptureOptions::new().with_flow(flow),
        )
        .await
        .unwrap();

    assert_eq!(captured.request.state, RequestState::Approved);
    assert_eq!(captured.steps[0].status, StepStatus::Completed);
    assert!(captured.changes_applied);
    assert_eq!(h.targets.value(&post(), "published"), Some(json!(true)));
    assert_eq!(h.sink.kinds(), vec!["captured", "request_completed"]);

    let signatures = h
        .service
        .store()
        .list_signatures(&captured.steps[0].id)
        .await
        .unwrap();
    assert_eq!(signatures.len(), 1);
    assert_eq!(signatures[0].signer_id.as_str(), "editor");
}

#[tokio::test]
async fn preapproval_skips_ineligible_initiator_and_partial_thresholds() {
    let h = harness();
    let flow = FlowBuilder::new()
        .capabilities(["content.publish"])
        .include_initiator(true, true)
        .signed_by(2, Some("Pair review"))
        .capabilities(["legal.review"])
        .include_initiator(true, true)
        .signed_by(1, Some("Legal"))
        .build();

    let captured = h
        .service
        .capture(
            &post(),
            publish(),
            "updating",
            Some(&editor()),
            CaptureOptions::new().with_flow(flow),
        )
        .await
        .unwrap();

    assert!(captured.request.is_pending());
    assert!(captured.steps.iter().all(|step| step.is_pending()));

    let view = h.service.request_view(&captured.request_id()).await.unwrap();
    assert_eq!(view.steps[0].tally.approvals, 1);
    assert_eq!(view.steps[1].tally.approvals, 0);
}

#[tokio::test]
async fn second_step_without_capabilities_is_open() {
    let h = harness();
    let flow = FlowBuilder::new()
        .capabilities(["content.publish"])
        .signed_by(1, Some("Editorial"))
        .signed_by(1, Some("Anyone"))
        .build();

    let captured = h
        .service
        .capture(
            &post(),
            publish(),
            "updating",
            Some(&author()),
            CaptureOptions::new().with_flow(flow),
        )
        .await
        .unwrap();

    assert_eq!(captured.steps[0].level, 1);
    assert_eq!(captured.steps[1].level, 2);
    assert!(captured.steps[1].signer_rule.capabilities.is_empty());

    let first = h
        .service
        .approve(&captured.steps[0].id, &editor(), None)
        .await
        .unwrap();
    assert!(first.step_completed());
    assert!(!first.request_approved());
    assert_eq!(first.request.state, RequestState::Pending);

    let second = h
        .service
        .approve(&captured.steps[1].id, &ActorProfile::opaque("passer-by"), None)
        .await
        .unwrap();
    assert!(second.request_approved());
    assert_eq!(h.targets.value(&post(), "published"), Some(json!(true)));
}

#[tokio::test]
async fn configured_flow_is_used_with_meta_defaults() {
    let config = GuardrailsConfig::from_toml_str(
        r#"
        [defaults.step_meta]
        summary = "Pending change"

        [[flows.post.updating]]
        name = "Review board"
        threshold = 2
        signers = { capabilities = ["content.review"] }
        "#,
    )
    .unwrap();
    let h = harness_with(config, InMemoryTargets::new());

    let captured = h
        .service
        .capture(&post(), publish(), "updating", None, CaptureOptions::new())
        .await
        .unwrap();

    let step = &captured.steps[0];
    assert_eq!(step.name, "Review board");
    assert_eq!(step.threshold, 2);
    assert_eq!(step.meta.get("summary"), Some(&json!("Pending change")));
    assert_eq!(captured.request.initiator_id, None);
}

#[tokio::test]
async fn explicit_flow_key_selects_configured_flow() {
    let config = GuardrailsConfig::from_toml_str(
        r#"
        [flows."posts.publish"]
        name = "Editorial"
        signers = { permissions = ["content.publish"] }
        "#,
    )
    .unwrap();
    let h = harness_with(config, InMemoryTargets::new());

    let captured = h
        .service
        .capture(
            &post(),
            publish(),
            "updating",
            None,
            CaptureOptions::new().with_flow_key("posts.publish"),
        )
        .await
        .unwrap();

    assert_eq!(captured.steps[0].name, "Editorial");
    assert_eq!(captured.steps[0].signer_rule.capabilities, vec!["content.publish"]);
}

#[tokio::test]
async fn flow_precedence() {
    let target_flow = FlowBuilder::new()
        .capabilities(["target.flow"])
        .signed_by(1, Some("From target"))
        .build();
    let h = harness_with(
        GuardrailsConfig::default(),
        InMemoryTargets::new().with_flow("post", target_flow),
    );

    let from_target = h
        .service
        .capture(&post(), publish(), "updating", None, CaptureOptions::new())
        .await
        .unwrap();
    assert_eq!(from_target.steps[0].name, "From target");

    let from_options = h
        .service
        .capture(
            &post(),
            publish(),
            "updating",
            None,
            CaptureOptions::new().with_flow(publish_flow()),
        )
        .await
        .unwrap();
    assert_eq!(from_options.steps[0].name, "Editorial");

    let empty_override = h
        .service
        .capture(
            &post(),
            publish(),
            "updating",
            None,
            CaptureOptions::new().with_flow(FlowDefinition::default()),
        )
        .await
        .unwrap();
    assert_eq!(empty_override.steps[0].name, "From target");
}

#[tokio::test]
async fn default_step_when_nothing_configured() {
    let h = harness();
    let captured = h
        .service
        .capture(&post(), publish(), "updating", None, CaptureOptions::new())
        .await
        .unwrap();

    assert_eq!(captured.steps.len(), 1);
    let step = &captured.steps[0];
    assert_eq!(step.name, "Default");
    assert_eq!(step.threshold, 1);
    assert_eq!(step.signer_rule.capabilities, vec!["approvals.manage"]);
}

#[tokio::test]
async fn capture_records_description_and_context() {
    let h = harness();
    let captured = h
        .service
        .capture(
            &post(),
            changes(&[("published", json!(true)), ("slug", json!("hello"))]),
            "updating",
            Some(&author()),
            CaptureOptions::new()
                .with_route("posts.update")
                .with_context("ip", json!("10.0.0.1"))
                .with_meta("ticket", json!("OPS-12")),
        )
        .await
        .unwrap();

    let request = &captured.request;
    assert_eq!(
        request.description.as_deref(),
        Some("Post update requires approval (published, slug).")
    );
    assert_eq!(request.context.get("event"), Some(&json!("updating")));
    assert_eq!(request.context.get("route"), Some(&json!("posts.update")));
    assert_eq!(request.context.get("ip"), Some(&json!("10.0.0.1")));
    assert_eq!(request.meta.get("ticket"), Some(&json!("OPS-12")));
    // The target has no slug yet.
    assert_eq!(request.original_data.get("slug"), Some(&json!(null)));
    assert_eq!(request.original_data.len(), request.new_data.len());

    let custom = h
        .service
        .capture(
            &post(),
            publish(),
            "updating",
            None,
            CaptureOptions::new().with_description("Publish launch post"),
        )
        .await
        .unwrap();
    assert_eq!(custom.request.description.as_deref(), Some("Publish launch post"));
}

#[tokio::test]
async fn unknown_target_is_unresolvable() {
    let h = harness();
    let err = h
        .service
        .capture(
            &TargetRef::new("post", "404"),
            publish(),
            "updating",
            None,
            CaptureOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::TargetUnresolvable { .. }));
}

#[tokio::test]
async fn invalid_flow_is_rejected_before_persisting() {
    let h = harness();
    let flow = FlowDefinition::new(vec![StepDefinition::new("Broken", 0, SignerRule::default())]);

    let err = h
        .service
        .capture(
            &post(),
            publish(),
            "updating",
            None,
            CaptureOptions::new().with_flow(flow),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApprovalError::Validation(_)));
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn intercept_captures_only_guarded_attributes() {
    use guardrails_engine::AttributeFilter;

    let h = harness();
    let filter = AttributeFilter::new().only(["published"]);

    let untouched = h
        .service
        .intercept(
            &post(),
            changes(&[("title", json!("Final"))]),
            &filter,
            "updating",
            None,
            CaptureOptions::new(),
        )
        .await
        .unwrap();
    assert!(!untouched.captured);
    assert!(untouched.request_id().is_none());
    assert_eq!(untouched.changes.get("title"), Some(&json!("Final")));

    let guarded = h
        .service
        .intercept(
            &post(),
            changes(&[("title", json!("Final")), ("published", json!(true))]),
            &filter,
            "updating",
            None,
            CaptureOptions::new(),
        )
        .await
        .unwrap();
    assert!(guarded.captured);
    assert!(guarded.request_id().is_some());
    assert_eq!(guarded.changes.len(), 1);
    let request = &guarded.request.as_ref().unwrap().request;
    assert!(!request.new_data.contains_key("title"));
}

#[tokio::test]
async fn intercept_uses_declared_attributes_and_target_rule() {
    use guardrails_engine::AttributeFilter;

    let targets = InMemoryTargets::new()
        .with_guarded_attributes("post", ["published", "slug"])
        .with_approval_rule("post", |guarded, event| {
            event == "deleting" || guarded.get("published") == Some(&json!(true))
        });
    let h = harness_with(GuardrailsConfig::default(), targets);

    // Declared list minus `except`; unpublishing is waved through by the rule.
    let filter = AttributeFilter::new().except(["slug"]);
    let waved = h
        .service
        .intercept(
            &post(),
            changes(&[("published", json!(false)), ("slug", json!("draft"))]),
            &filter,
            "updating",
            None,
            CaptureOptions::new(),
        )
        .await
        .unwrap();
    assert!(!waved.captured);
    assert_eq!(waved.changes.len(), 2);

    let captured = h
        .service
        .intercept(
            &post(),
            changes(&[
                ("published", json!(true)),
                ("slug", json!("launch")),
                ("title", json!("Launch")),
            ]),
            &filter,
            "updating",
            None,
            CaptureOptions::new(),
        )
        .await
        .unwrap();
    assert!(captured.captured);
    assert_eq!(captured.changes.keys().collect::<Vec<_>>(), vec!["published"]);

    // The rule forces capture even when no watched attribute changed.
    let forced = h
        .service
        .intercept(
            &post(),
            changes(&[("title", json!("Gone"))]),
            &AttributeFilter::new(),
            "deleting",
            None,
            CaptureOptions::new(),
        )
        .await
        .unwrap();
    assert!(forced.captured);
    assert!(forced.changes.is_empty());
    let request = &forced.request.as_ref().unwrap().request;
    assert_eq!(
        request.description.as_deref(),
        Some("Post deletion requires approval.")
    );
}

#[tokio::test]
async fn target_supplies_description_and_meta() {
    let mut meta = guardrails_types::AttributeMap::new();
    meta.insert("team".into(), json!("editorial"));
    let targets = InMemoryTargets::new()
        .with_description("post", "Publishing the launch post")
        .with_meta("post", meta);
    let h = harness_with(GuardrailsConfig::default(), targets);

    let from_target = h
        .service
        .capture(&post(), publish(), "updating", None, CaptureOptions::new())
        .await
        .unwrap();
    assert_eq!(
        from_target.request.description.as_deref(),
        Some("Publishing the launch post")
    );
    assert_eq!(from_target.request.meta.get("team"), Some(&json!("editorial")));

    let from_options = h
        .service
        .capture(
            &post(),
            publish(),
            "updating",
            None,
            CaptureOptions::new()
                .with_description("Hotfix publish")
                .with_meta("ticket", json!("OPS-7")),
        )
        .await
        .unwrap();
    let request = &from_options.request;
    assert_eq!(request.description.as_deref(), Some("Hotfix publish"));
    assert_eq!(request.meta.get("ticket"), Some(&json!("OPS-7")));
    assert!(!request.meta.contains_key("team"));
}
