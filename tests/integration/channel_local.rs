//! Local channel behaviour seen from outside the crate

use genpipe::channel::{ChannelBackend, LocalBackend, ReceiveOutcome};
use genpipe::error::ChannelError;
use genpipe::event::{EventPayload, MessageEndPayload, PublishFrom, StopReason};
use genpipe::types::TaskId;
use std::time::Duration;

async fn drain(
    channel: &genpipe::channel::Subscription,
    expected: usize,
) -> Vec<genpipe::event::Event> {
    let mut events = Vec::with_capacity(expected);
    while events.len() < expected {
        match channel.receive(Duration::from_secs(5)).await {
            ReceiveOutcome::Event(event) => events.push(event),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
    events
}

#[tokio::test]
async fn test_concurrent_publishers_share_one_sequence() {
    let backend = LocalBackend::new(8);
    let channel = backend.subscribe(&TaskId::new()).await.unwrap();

    let mut producers = Vec::new();
    for name in ["worker", "watchdog"] {
        let channel = channel.clone();
        producers.push(tokio::spawn(async move {
            for i in 0..50 {
                channel
                    .publish(
                        EventPayload::message(format!("{}-{:02}", name, i)),
                        PublishFrom::ApplicationManager,
                    )
                    .await
                    .unwrap();
            }
        }));
    }

    let events = drain(&channel, 100).await;
    for producer in producers {
        producer.await.unwrap();
    }

    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=100).collect::<Vec<u64>>());

    // Each producer's own events keep their relative order.
    for name in ["worker", "watchdog"] {
        let texts: Vec<String> = events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::Message(m) if m.text.starts_with(name) => Some(m.text.clone()),
                _ => None,
            })
            .collect();
        let mut sorted = texts.clone();
        sorted.sort();
        assert_eq!(texts.len(), 50);
        assert_eq!(texts, sorted);
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_channel_blocks_publisher_instead_of_dropping() {
    let backend = LocalBackend::new(2);
    let channel = backend.subscribe(&TaskId::new()).await.unwrap();

    for text in ["a", "b"] {
        channel
            .publish(EventPayload::message(text), PublishFrom::ApplicationManager)
            .await
            .unwrap();
    }

    let blocked = {
        let channel = channel.clone();
        tokio::spawn(async move {
            channel
                .publish(EventPayload::message("c"), PublishFrom::ApplicationManager)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished());

    let events = drain(&channel, 1).await;
    assert_eq!(events[0].payload, EventPayload::message("a"));

    let third = blocked.await.unwrap().unwrap();
    assert_eq!(third.seq, 3);

    let rest = drain(&channel, 2).await;
    assert_eq!(rest[1].payload, EventPayload::message("c"));
}

#[tokio::test]
async fn test_terminal_event_rejects_late_stop() {
    let backend = LocalBackend::new(8);
    let channel = backend.subscribe(&TaskId::new()).await.unwrap();

    channel
        .publish(
            EventPayload::MessageEnd(MessageEndPayload::default()),
            PublishFrom::ApplicationManager,
        )
        .await
        .unwrap();

    let late = channel
        .publish(EventPayload::stop(StopReason::Timeout), PublishFrom::Watchdog)
        .await;
    assert!(matches!(late, Err(ChannelError::Terminated(_))));
    assert!(channel.is_terminated());
}

#[tokio::test]
async fn test_release_from_every_exit_path_counts_once() {
    let backend = LocalBackend::new(8);
    let task_id = TaskId::new();
    let channel = backend.subscribe(&task_id).await.unwrap();
    assert_eq!(backend.active_subscriptions(), 1);

    let mut releasers = Vec::new();
    for _ in 0..4 {
        let channel = channel.clone();
        releasers.push(tokio::spawn(async move { channel.unsubscribe() }));
    }
    for releaser in releasers {
        releaser.await.unwrap();
    }

    assert_eq!(channel.release_count(), 1);
    assert!(channel.is_closed());
    assert_eq!(backend.active_subscriptions(), 0);
    assert_eq!(
        channel.receive(Duration::from_millis(10)).await,
        ReceiveOutcome::Closed
    );
}

#[tokio::test]
async fn test_resubscribe_after_release_gets_fresh_channel() {
    let backend = LocalBackend::new(8);
    let task_id = TaskId::new();

    let first = backend.subscribe(&task_id).await.unwrap();
    first.unsubscribe();

    let second = backend.subscribe(&task_id).await.unwrap();
    assert!(!second.is_closed());
    assert_eq!(backend.subscriptions_created(), 2);
}
