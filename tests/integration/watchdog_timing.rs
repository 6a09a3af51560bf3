//! Heartbeats, lifetime expiry and consumer timeouts in virtual time

use crate::integration::support::{
    args, collect_frames, harness_with, harness_with_capacity, settings, wait_until_idle,
    ScriptedRunner, Step,
};
use genpipe::channel::ChannelBackend;
use genpipe::error::GenerationError;
use genpipe::event::EventKind;
use genpipe::pipeline::{Frame, PipelineOutput};
use genpipe::runner::RunnerSet;
use std::sync::Arc;
use std::time::Duration;

fn runners(steps: Vec<Step>) -> RunnerSet {
    RunnerSet::new(Arc::new(ScriptedRunner::new(steps)))
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_while_worker_is_quiet() {
    let h = harness_with(
        settings(Duration::from_secs(600), Duration::from_secs(10)),
        runners(vec![Step::Sleep(Duration::from_secs(25)), Step::Message("done")]),
    );

    let stream = match h.orchestrator.generate(args("q", true)).await.unwrap() {
        PipelineOutput::Streaming(stream) => stream,
        other => panic!("expected streaming output, got {:?}", other),
    };
    let frames = collect_frames(stream).await;

    let kinds: Vec<EventKind> = frames.iter().map(Frame::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::Ping,
            EventKind::Ping,
            EventKind::Message,
            EventKind::MessageEnd
        ]
    );
    assert_eq!(frames[0].to_sse(), "event: ping\n\n");
    wait_until_idle(&h.orchestrator).await;
}

#[tokio::test(start_paused = true)]
async fn test_lifetime_expiry_stops_stream_silently() {
    let h = harness_with(
        settings(Duration::from_secs(25), Duration::from_secs(10)),
        runners(vec![
            Step::Message("partial"),
            Step::Sleep(Duration::from_secs(600)),
            Step::Message("too late"),
        ]),
    );

    let stream = match h.orchestrator.generate(args("q", true)).await.unwrap() {
        PipelineOutput::Streaming(stream) => stream,
        other => panic!("expected streaming output, got {:?}", other),
    };
    let handle = h.orchestrator.registry().get(stream.task_id()).unwrap();
    let frames = collect_frames(stream).await;

    let kinds: Vec<EventKind> = frames.iter().map(Frame::kind).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Message, EventKind::Ping, EventKind::Ping]
    );

    wait_until_idle(&h.orchestrator).await;
    assert!(handle.cancel.is_cancelled());
    assert_eq!(handle.channel.release_count(), 1);
    assert_eq!(h.backend.active_subscriptions(), 0);
    assert_eq!(h.store.release_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_lifetime_expiry_in_blocking_mode_is_a_stop() {
    let h = harness_with(
        settings(Duration::from_secs(25), Duration::from_secs(10)),
        runners(vec![Step::Sleep(Duration::from_secs(600))]),
    );

    let err = h.orchestrator.generate(args("q", false)).await.unwrap_err();
    assert!(matches!(err, GenerationError::Stopped));
    assert!(err.is_stopped());
    wait_until_idle(&h.orchestrator).await;
}

#[tokio::test(start_paused = true)]
async fn test_consumer_receive_timeout_releases_channel() {
    let mut short_wait = settings(Duration::from_secs(1_000), Duration::from_secs(600));
    short_wait.receive_timeout = Duration::from_secs(5);
    let h = harness_with(
        short_wait,
        runners(vec![Step::Sleep(Duration::from_secs(100)), Step::Message("late")]),
    );

    let stream = match h.orchestrator.generate(args("q", true)).await.unwrap() {
        PipelineOutput::Streaming(stream) => stream,
        other => panic!("expected streaming output, got {:?}", other),
    };
    let handle = h.orchestrator.registry().get(stream.task_id()).unwrap();

    let frames = collect_frames(stream).await;
    assert!(frames.is_empty());
    assert_eq!(handle.channel.release_count(), 1);

    wait_until_idle(&h.orchestrator).await;
    assert!(handle.cancel.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn test_lifetime_enforced_while_consumer_is_not_pulling() {
    let h = harness_with_capacity(
        settings(Duration::from_secs(25), Duration::from_secs(10)),
        runners(vec![
            Step::Message("one"),
            Step::Message("two"),
            Step::Message("three"),
            Step::Message("four"),
        ]),
        1,
    );

    // Held but never polled.
    let stream = match h.orchestrator.generate(args("q", true)).await.unwrap() {
        PipelineOutput::Streaming(stream) => stream,
        other => panic!("expected streaming output, got {:?}", other),
    };
    let handle = h.orchestrator.registry().get(stream.task_id()).unwrap();

    tokio::time::sleep(Duration::from_secs(36)).await;
    assert!(handle.cancel.is_cancelled());
    assert_eq!(handle.channel.release_count(), 1);

    wait_until_idle(&h.orchestrator).await;
    assert_eq!(h.store.release_count(), 1);

    drop(stream);
    assert_eq!(handle.channel.release_count(), 1);
}
