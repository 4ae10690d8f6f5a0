use super::*;
use crate::fake::FakeCluster;
use chat_api_server_core::{rocket::RocketStatus, Cluster};
use pretty_assertions::assert_eq;

fn line(pod: &str, message: &str) -> LogLine {
    LogLine {
        pod: pod.to_string(),
        message: message.to_string(),
    }
}

fn sources(cluster: &FakeCluster, pods: &[&str]) -> Vec<(String, crate::fake::FakeLogs)> {
    pods.iter()
        .map(|pod| (pod.to_string(), cluster.pod_logs("ns", pod)))
        .collect()
}

#[test]
fn reassembles_lines_across_chunks() {
    let mut buf = LineBuffer::default();
    assert!(buf.push(b"hel").is_empty());
    assert_eq!(buf.pending(), b"hel");
    assert_eq!(buf.push(b"lo\nwor"), vec!["hello".to_string()]);
    assert_eq!(
        buf.push(b"ld\r\n\nlast"),
        vec!["world".to_string(), "".to_string()]
    );
    assert_eq!(buf.pending(), b"last");
}

#[test]
fn overlong_lines_are_split() {
    let mut buf = LineBuffer::default();
    let long = vec![b'x'; LineBuffer::MAX_LINE + 10];
    let lines = buf.push(&long);
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].len(), LineBuffer::MAX_LINE);
    assert_eq!(buf.pending().len(), 10);

    assert!(buf.push(&vec![b'y'; LineBuffer::MAX_LINE - 20]).is_empty());
    let lines = buf.push(&vec![b'z'; 20]);
    assert_eq!(lines.len(), 1);
    assert_eq!(buf.pending(), b"zzzzzzzzzz");
    assert_eq!(buf.push(b"\n"), vec!["zzzzzzzzzz".to_string()]);
}

#[test]
fn resolves_requested_pod_or_status_pods() {
    let rocket = Rocket {
        status: Some(RocketStatus {
            pods: vec!["demo-0".to_string(), "demo-1".to_string()],
            ..Default::default()
        }),
        ..Default::default()
    };
    assert_eq!(resolve_pods(&rocket, None), vec!["demo-0", "demo-1"]);
    assert_eq!(resolve_pods(&rocket, Some("other")), vec!["other"]);
    assert!(resolve_pods(&Rocket::default(), None).is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn merges_pods_preserving_per_pod_order() {
    let cluster = FakeCluster::default();
    cluster.pod_log("p1").chunk("a\nb").chunk("\nc\n");
    cluster.pod_log("p2").chunk("x\ny\n");

    let (tx, mut rx) = mpsc::channel(16);
    let aggregator = LogAggregator::default();
    let srcs = sources(&cluster, &["p1", "p2"]);
    let task =
        tokio::spawn(async move { aggregator.run(srcs, tx, CancellationToken::new()).await });

    let mut received = Vec::new();
    for _ in 0..5 {
        received.push(rx.recv().await.expect("line must be delivered"));
    }
    drop(rx);
    task.await.expect("task must not panic").expect("must end cleanly");

    let of = |pod: &str| {
        received
            .iter()
            .filter(|l| l.pod == pod)
            .cloned()
            .collect::<Vec<_>>()
    };
    assert_eq!(of("p1"), vec![line("p1", "a"), line("p1", "b"), line("p1", "c")]);
    assert_eq!(of("p2"), vec![line("p2", "x"), line("p2", "y")]);
    assert_eq!(cluster.open_logs(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn resumes_after_backoff_at_end_of_input() {
    let cluster = FakeCluster::default();
    cluster.pod_log("p1").chunk("one\n").eof().chunk("two\n");

    let (tx, mut rx) = mpsc::channel(16);
    let aggregator = LogAggregator::new(Duration::from_secs(5));
    let srcs = sources(&cluster, &["p1"]);
    let cancel = CancellationToken::new();
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { aggregator.run(srcs, tx, cancel).await }
    });

    let start = time::Instant::now();
    assert_eq!(rx.recv().await, Some(line("p1", "one")));
    assert_eq!(rx.recv().await, Some(line("p1", "two")));
    assert!(start.elapsed() >= Duration::from_secs(5));

    cancel.cancel();
    task.await.expect("task must not panic").expect("must end cleanly");
    assert_eq!(cluster.open_logs(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn held_partial_line_is_dropped_at_end_of_input() {
    let cluster = FakeCluster::default();
    // The resumed follow re-sends the tail of "one\ntw" in full.
    cluster
        .pod_log("p1")
        .chunk("one\ntw")
        .eof()
        .chunk("two\nthree\n");

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let srcs = sources(&cluster, &["p1"]);
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { LogAggregator::new(Duration::from_secs(1)).run(srcs, tx, cancel).await }
    });

    assert_eq!(rx.recv().await, Some(line("p1", "one")));
    assert_eq!(rx.recv().await, Some(line("p1", "two")));
    assert_eq!(rx.recv().await, Some(line("p1", "three")));

    cancel.cancel();
    task.await.expect("task must not panic").expect("must end cleanly");
}

#[tokio::test(flavor = "current_thread")]
async fn first_failure_stops_every_worker() {
    let cluster = FakeCluster::default();
    cluster.pod_log("p1").fail("connection reset");
    // p2 has no output and would follow forever.
    let _idle = cluster.pod_log("p2");

    let (tx, _rx) = mpsc::channel(16);
    let srcs = sources(&cluster, &["p1", "p2"]);
    let res = LogAggregator::default()
        .run(srcs, tx, CancellationToken::new())
        .await;

    match res {
        Err(Error::Stream(msg)) => assert!(msg.contains("p1"), "unexpected message: {msg}"),
        res => panic!("expected a stream error, got {res:?}"),
    }
    assert_eq!(cluster.open_logs(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn cancellation_ends_cleanly() {
    let cluster = FakeCluster::default();
    let feed = cluster.pod_log("p1");
    feed.chunk("before\n");

    let (tx, mut rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let srcs = sources(&cluster, &["p1"]);
    let task = tokio::spawn({
        let cancel = cancel.clone();
        async move { LogAggregator::default().run(srcs, tx, cancel).await }
    });

    assert_eq!(rx.recv().await, Some(line("p1", "before")));
    cancel.cancel();
    task.await.expect("task must not panic").expect("must end cleanly");
    assert_eq!(cluster.open_logs(), 0);

    feed.chunk("after\n");
    assert_eq!(rx.recv().await, None);
}

#[tokio::test(flavor = "current_thread")]
async fn no_sources_ends_immediately() {
    let (tx, _rx) = mpsc::channel(1);
    LogAggregator::default()
        .run(Vec::<(String, crate::fake::FakeLogs)>::new(), tx, CancellationToken::new())
        .await
        .expect("must end cleanly");
}
