use chat_api_server_core::{Cluster, Error, Result, StatusEvent, WatchEvent, WatchObject, WatchStream};
use futures::prelude::*;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type StatusStream = Pin<Box<dyn Stream<Item = Result<StatusEvent>> + Send + 'static>>;

/// Streams status changes of a single rocket.
///
/// The relay watches until the server shuts down or the returned stream is
/// dropped, either of which ends it cleanly. A failed watch, or a
/// notification about anything other than a rocket, ends the stream with
/// [`Error::Stream`].
#[derive(Clone, Debug)]
pub struct StatusRelay {
    shutdown: CancellationToken,
}

// === impl StatusRelay ===

impl StatusRelay {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }

    pub async fn watch<C: Cluster>(
        &self,
        client: &C,
        namespace: &str,
        name: &str,
    ) -> Result<StatusStream> {
        let events = client.watch_rocket(namespace, name).await?;
        Ok(relay(events, self.shutdown.clone()))
    }
}

/// Converts watch notifications into status events, one for one and in
/// order. Nothing is buffered or coalesced.
pub fn relay(mut events: WatchStream, shutdown: CancellationToken) -> StatusStream {
    Box::pin(async_stream::stream! {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("Server shutting down; closing status stream");
                    return;
                }
                next = events.next() => next,
            };

            let event = match next {
                Some(Ok(event)) => event,
                Some(Err(error @ Error::Stream(_))) => {
                    yield Err(error);
                    return;
                }
                Some(Err(error)) => {
                    yield Err(Error::stream(format!("watch failed: {error}")));
                    return;
                }
                None => {
                    yield Err(Error::stream("watch ended unexpectedly"));
                    return;
                }
            };

            match event {
                WatchEvent::Added(object)
                | WatchEvent::Modified(object)
                | WatchEvent::Deleted(object) => match object {
                    WatchObject::Rocket(rocket) => yield Ok(StatusEvent::from(&rocket)),
                    WatchObject::Other { api_version, kind } => {
                        yield Err(Error::stream(format!(
                            "watch delivered unexpected object {api_version}/{kind}"
                        )));
                        return;
                    }
                },
                WatchEvent::Bookmark => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeCluster;
    use chat_api_server_core::{Rocket, RocketStatus};
    use pretty_assertions::assert_eq;

    fn rocket() -> Rocket {
        Rocket {
            name: "demo".to_string(),
            namespace: "ns".to_string(),
            ..Default::default()
        }
    }

    fn status(phase: &str, ready: bool) -> RocketStatus {
        RocketStatus {
            phase: phase.to_string(),
            message: format!("{phase} message"),
            ready,
            pods: vec![],
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn relays_status_changes_in_order() {
        let cluster = FakeCluster::default().with_rocket(rocket());
        let relay = StatusRelay::new(CancellationToken::new());
        let mut stream = relay.watch(&cluster, "ns", "demo").await.expect("must watch");

        let first = stream.next().await.expect("event").expect("ok");
        assert_eq!(first.phase, "Pending");
        assert!(!first.ready);
        {
            let mut next = tokio_test::task::spawn(stream.next());
            tokio_test::assert_pending!(next.poll());
        }

        cluster.set_status("ns", "demo", status("Creating", false));
        cluster.push_watch("ns", "demo", Ok(WatchEvent::Bookmark));
        cluster.set_status("ns", "demo", status("Running", true));

        let events = vec![
            stream.next().await.expect("event").expect("ok"),
            stream.next().await.expect("event").expect("ok"),
        ];
        assert_eq!(
            events,
            vec![
                StatusEvent {
                    message: "Creating message".to_string(),
                    phase: "Creating".to_string(),
                    ready: false,
                },
                StatusEvent {
                    message: "Running message".to_string(),
                    phase: "Running".to_string(),
                    ready: true,
                },
            ]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unexpected_kind_fails_the_stream() {
        let cluster = FakeCluster::default().with_rocket(rocket());
        let mut stream = StatusRelay::new(CancellationToken::new())
            .watch(&cluster, "ns", "demo")
            .await
            .expect("must watch");
        let _ = stream.next().await;

        cluster.push_watch(
            "ns",
            "demo",
            Ok(WatchEvent::Modified(WatchObject::Other {
                api_version: "v1".to_string(),
                kind: "Pod".to_string(),
            })),
        );
        match stream.next().await {
            Some(Err(Error::Stream(msg))) => assert!(msg.contains("v1/Pod"), "{msg}"),
            next => panic!("expected a stream error, got {next:?}"),
        }
        assert!(stream.next().await.is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn closed_watch_fails_the_stream() {
        let cluster = FakeCluster::default().with_rocket(rocket());
        let mut stream = StatusRelay::new(CancellationToken::new())
            .watch(&cluster, "ns", "demo")
            .await
            .expect("must watch");
        let _ = stream.next().await;

        cluster.close_watches();
        assert!(matches!(stream.next().await, Some(Err(Error::Stream(_)))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn shutdown_ends_the_stream_and_the_watch() {
        let cluster = FakeCluster::default().with_rocket(rocket());
        let shutdown = CancellationToken::new();
        let mut stream = StatusRelay::new(shutdown.clone())
            .watch(&cluster, "ns", "demo")
            .await
            .expect("must watch");
        let _ = stream.next().await;
        assert_eq!(cluster.open_watches(), 1);

        shutdown.cancel();
        assert!(stream.next().await.is_none());
        drop(stream);
        assert_eq!(cluster.open_watches(), 0);
    }
}
