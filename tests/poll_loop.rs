mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::timeout;

use common::FakeQueue;
use sqs_bridge::ingest::PollRequest;
use sqs_bridge::poll::PollLoop;
use sqs_bridge::util::backoff::Backoff;

#[tokio::test]
async fn stream_yields_bounded_and_empty_batches_until_cancelled() {
    let queue = FakeQueue::with_messages(["a", "b", "c"]);
    let request = PollRequest::new(2, 0, 0).unwrap();
    let (cancel, cancelled) = watch::channel(false);
    let mut batches = Box::pin(
        PollLoop::new(Arc::new(queue.clone()), request, Backoff::default(), cancelled).into_stream(5),
    );

    let first = batches.next().await.unwrap().unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].body_str(), "a");
    let second = batches.next().await.unwrap().unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].body_str(), "c");

    // Drained queue: the stream keeps going with empty batches.
    let third = batches.next().await.unwrap().unwrap();
    assert!(third.is_empty());

    assert!(queue.receives().iter().all(|&n| n == 2));

    cancel.send_replace(true);
    let end = timeout(Duration::from_secs(1), batches.next()).await.unwrap();
    assert!(end.is_none());
}

#[tokio::test]
async fn stream_limit_narrows_each_receive() {
    let queue = FakeQueue::with_messages(["a", "b", "c"]);
    let request = PollRequest::new(10, 0, 0).unwrap();
    let (_cancel, cancelled) = watch::channel(false);
    let mut batches = Box::pin(
        PollLoop::new(Arc::new(queue.clone()), request, Backoff::default(), cancelled).into_stream(1),
    );

    for body in ["a", "b", "c"] {
        let batch = batches.next().await.unwrap().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body_str(), body);
    }
    assert_eq!(queue.receives(), vec![1, 1, 1]);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_inside_one_batch() {
    let queue = FakeQueue::with_messages(["a"]);
    queue.fail_receives(2);
    let request = PollRequest::new(10, 0, 0).unwrap();
    let (_cancel, cancelled) = watch::channel(false);
    let mut poll = PollLoop::new(Arc::new(queue.clone()), request, Backoff::default(), cancelled);

    let batch = poll.next_batch(10).await.unwrap().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(queue.receive_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_backoff() {
    let queue = FakeQueue::default();
    queue.fail_receives(usize::MAX);
    let request = PollRequest::new(10, 0, 0).unwrap();
    let (cancel, cancelled) = watch::channel(false);
    let mut poll = PollLoop::new(Arc::new(queue.clone()), request, Backoff::default(), cancelled);

    let handle = tokio::spawn(async move { poll.next_batch(10).await });
    tokio::time::sleep(Duration::from_millis(1_500)).await;
    cancel.send_replace(true);
    let outcome = handle.await.unwrap();
    assert!(outcome.is_none());
}
