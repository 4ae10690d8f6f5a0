use crate::{convert, upstream};
use chat_api_server_core::{Error, WatchEvent, WatchObject, WatchStream};
use chat_api_server_k8s_api as k8s;
use futures::prelude::*;
use kube::{
    api::{Api, ApiResource, DynamicObject, WatchParams},
    core::WatchEvent as KubeEvent,
    Resource,
};
use tokio::time;
use tracing::debug;

type Events = stream::BoxStream<'static, kube::Result<KubeEvent<DynamicObject>>>;

/// Limits the amount of time a watch can be idle before being reset.
///
/// Must be less than 295 or Kubernetes throws an error.
const TIMEOUT_SECS: u32 = 290;

/// Paces reopening a closed watch window.
const RESUME_DELAY: time::Duration = time::Duration::from_secs(1);

/// Watches a single rocket by name.
///
/// The API server closes every watch after [`TIMEOUT_SECS`]; the stream
/// resumes from the last resource version it saw, so callers only observe an
/// end when the watch fails. Objects are decoded by kind so that anything
/// other than a rocket surfaces as [`WatchObject::Other`].
pub(crate) async fn rocket(
    client: kube::Client,
    namespace: &str,
    name: &str,
) -> Result<WatchStream, Error> {
    let resource = ApiResource::erase::<k8s::Rocket>(&());
    let api = Api::<DynamicObject>::namespaced_with(client, namespace, &resource);
    let params = WatchParams::default()
        .fields(&format!("metadata.name={name}"))
        .timeout(TIMEOUT_SECS);

    // Version 0 replays the current state as the first event.
    let version = "0".to_string();
    let events = api
        .watch(&params, &version)
        .await
        .map_err(upstream("failed to watch rocket"))?
        .boxed();

    Ok(resume(version, events, move |version| {
        let api = api.clone();
        let params = params.clone();
        async move { Ok(api.watch(&params, &version).await?.boxed()) }
    }))
}

/// Relays watch windows, reopening each one from the last version seen after
/// a [`RESUME_DELAY`].
fn resume<F, Fut>(mut version: String, mut events: Events, mut reopen: F) -> WatchStream
where
    F: FnMut(String) -> Fut + Send + 'static,
    Fut: Future<Output = kube::Result<Events>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        loop {
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(error) => {
                        yield Err(Error::stream(format!("watch failed: {error}")));
                        return;
                    }
                };

                match event {
                    KubeEvent::Added(obj) => {
                        track(&mut version, &obj);
                        yield object(obj).map(WatchEvent::Added);
                    }
                    KubeEvent::Modified(obj) => {
                        track(&mut version, &obj);
                        yield object(obj).map(WatchEvent::Modified);
                    }
                    KubeEvent::Deleted(obj) => {
                        track(&mut version, &obj);
                        yield object(obj).map(WatchEvent::Deleted);
                    }
                    KubeEvent::Bookmark(bookmark) => {
                        version = bookmark.metadata.resource_version;
                        yield Ok(WatchEvent::Bookmark);
                    }
                    KubeEvent::Error(rsp) if rsp.code == 410 => {
                        debug!(%version, "Resource version expired; restarting watch");
                        version = "0".to_string();
                        break;
                    }
                    KubeEvent::Error(rsp) => {
                        yield Err(Error::stream(format!("watch failed: {}", rsp.message)));
                        return;
                    }
                }
            }

            debug!(%version, "Watch window closed; resuming");
            time::sleep(RESUME_DELAY).await;
            events = match reopen(version.clone()).await {
                Ok(events) => events,
                Err(error) => {
                    yield Err(Error::stream(format!("failed to resume watch: {error}")));
                    return;
                }
            };
        }
    })
}

fn track(version: &mut String, obj: &DynamicObject) {
    if let Some(v) = &obj.metadata.resource_version {
        version.clone_from(v);
    }
}

fn object(obj: DynamicObject) -> Result<WatchObject, Error> {
    let (api_version, kind) = obj
        .types
        .as_ref()
        .map(|t| (t.api_version.clone(), t.kind.clone()))
        .unwrap_or_default();

    if api_version != k8s::Rocket::api_version(&()) || kind != k8s::Rocket::kind(&()) {
        return Ok(WatchObject::Other { api_version, kind });
    }

    let rocket = obj
        .try_parse::<k8s::Rocket>()
        .map_err(|error| Error::stream(format!("failed to decode rocket: {error}")))?;
    Ok(WatchObject::Rocket(convert::rocket(rocket)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    fn dynamic(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).expect("object must parse")
    }

    #[test]
    fn decodes_rockets() {
        let obj = dynamic(json!({
            "apiVersion": "chat.accso.de/v1alpha1",
            "kind": "Rocket",
            "metadata": { "name": "demo", "namespace": "ns", "resourceVersion": "42" },
            "spec": { "replicas": 1 },
            "status": { "phase": "Creating", "ready": false }
        }));

        let mut version = "0".to_string();
        track(&mut version, &obj);
        assert_eq!(version, "42");

        match object(obj).expect("must decode") {
            WatchObject::Rocket(rocket) => {
                assert_eq!(rocket.name, "demo");
                assert_eq!(rocket.phase(), "Creating");
            }
            other => panic!("unexpected object: {other:?}"),
        }
    }

    #[test]
    fn other_kinds_are_reported() {
        let obj = dynamic(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "demo-0" }
        }));
        assert_eq!(
            object(obj).expect("must decode"),
            WatchObject::Other {
                api_version: "v1".to_string(),
                kind: "Pod".to_string(),
            }
        );
    }

    #[test]
    fn undecodable_rockets_fail() {
        let obj = dynamic(json!({
            "apiVersion": "chat.accso.de/v1alpha1",
            "kind": "Rocket",
            "metadata": { "name": "demo" },
            "spec": { "replicas": "many" }
        }));
        assert!(matches!(object(obj), Err(Error::Stream(_))));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn closed_windows_are_reopened_after_a_delay() {
        let opened = Arc::new(AtomicUsize::new(0));
        let versions = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let added = KubeEvent::Added(dynamic(json!({
            "apiVersion": "chat.accso.de/v1alpha1",
            "kind": "Rocket",
            "metadata": { "name": "demo", "namespace": "ns", "resourceVersion": "7" },
            "spec": { "replicas": 1 }
        })));
        let first: Events = stream::iter(vec![Ok(added)]).boxed();

        let mut events = resume("0".to_string(), first, {
            let opened = opened.clone();
            let versions = versions.clone();
            move |version| {
                versions.lock().push(version);
                let n = opened.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        return Ok(stream::empty().boxed());
                    }
                    Err(kube::Error::Api(kube::core::ErrorResponse {
                        status: "Failure".to_string(),
                        message: "unavailable".to_string(),
                        reason: "ServiceUnavailable".to_string(),
                        code: 503,
                    }))
                }
            }
        });

        assert!(matches!(
            events.next().await,
            Some(Ok(WatchEvent::Added(WatchObject::Rocket(_))))
        ));
        let start = time::Instant::now();
        assert!(matches!(events.next().await, Some(Err(Error::Stream(_)))));
        assert!(events.next().await.is_none());
        assert_eq!(opened.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= RESUME_DELAY * 3);
        assert_eq!(*versions.lock(), ["7", "7", "7"]);
    }
}
