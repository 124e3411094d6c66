// tests/events_contract.rs
//
// The event-stream contract as observed through the orchestrator: every
// subscriber sees emission order with the terminal event last; subscribers
// attached after the terminal still receive it; swept jobs are gone.

mod common;

use std::sync::Arc;

use common::{build_harness, hit, spawn_page_server, ScriptedLlm};
use research_deck_pipeline::events::PipelineEvent;
use research_deck_pipeline::theme::ThemeConfig;

#[tokio::test]
async fn two_subscribers_see_the_same_ordered_stream() {
    let addr = spawn_page_server().await;
    let hits = vec![hit(addr, "/good/1"), hit(addr, "/good/2")];
    let harness = build_harness(hits, Arc::new(ScriptedLlm::text_only()), |_| {});

    let id = harness
        .orchestrator
        .start("Shared Stream".into(), 2, ThemeConfig::default());
    let mut first = harness.orchestrator.subscribe(id).expect("subscriber one");
    let mut second = harness.orchestrator.subscribe(id).expect("subscriber two");

    let mut seen_first = Vec::new();
    while let Some(event) = first.next().await {
        seen_first.push(event);
    }
    let mut seen_second = Vec::new();
    while let Some(event) = second.next().await {
        seen_second.push(event);
    }

    assert_eq!(seen_first, seen_second);
    assert!(seen_first.last().expect("events").is_terminal());
    assert_eq!(seen_first.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn subscriber_after_completion_gets_only_the_terminal() {
    let addr = spawn_page_server().await;
    let hits = vec![hit(addr, "/good/1")];
    let harness = build_harness(hits, Arc::new(ScriptedLlm::text_only()), |_| {});

    let id = harness
        .orchestrator
        .start("Late Join".into(), 1, ThemeConfig::default());

    // Run the job to completion through a first subscriber.
    let mut live = harness.orchestrator.subscribe(id).expect("live subscriber");
    while live.next().await.is_some() {}

    // A late subscriber gets no replay, just the retained terminal event.
    let mut late = harness.orchestrator.subscribe(id).expect("late subscriber");
    let only = late.next().await.expect("terminal event");
    assert!(matches!(only, PipelineEvent::Done { .. }));
    assert!(late.next().await.is_none());
}

#[tokio::test]
async fn unknown_job_has_no_stream() {
    let harness = build_harness(Vec::new(), Arc::new(ScriptedLlm::text_only()), |_| {});
    assert!(harness.orchestrator.subscribe(uuid::Uuid::new_v4()).is_none());
}
