use bytes::Bytes;
use chat_api_server_core::LogSource;
use chat_api_server_k8s_api::Pod;
use futures::{io::AsyncBufRead, AsyncReadExt};
use kube::api::{Api, LogParams};
use std::{io, pin::Pin};
use tokio::time::Instant;
use tracing::debug;

const CHUNK_SIZE: usize = 8 * 1024;

type Reader = Pin<Box<dyn AsyncBufRead + Send>>;

/// Follows one pod's log output.
///
/// The follow request is opened on first read. When the API server ends it,
/// the next read opens a new follow starting from when the previous one
/// ended.
pub struct PodLogs {
    api: Api<Pod>,
    pod: String,
    reader: Option<Reader>,
    ended_at: Option<Instant>,
}

// === impl PodLogs ===

impl PodLogs {
    pub(crate) fn new(api: Api<Pod>, pod: impl Into<String>) -> Self {
        Self {
            api,
            pod: pod.into(),
            reader: None,
            ended_at: None,
        }
    }

    fn params(&self) -> LogParams {
        LogParams {
            follow: true,
            since_seconds: self.ended_at.map(since_seconds),
            ..LogParams::default()
        }
    }
}

#[async_trait::async_trait]
impl LogSource for PodLogs {
    async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let mut reader = match self.reader.take() {
            Some(reader) => reader,
            None => open(&self.api, &self.pod, self.params()).await?,
        };

        let mut buf = vec![0; CHUNK_SIZE];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            self.ended_at = Some(Instant::now());
            return Ok(None);
        }

        self.reader = Some(reader);
        buf.truncate(n);
        Ok(Some(Bytes::from(buf)))
    }
}

impl std::fmt::Debug for PodLogs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodLogs")
            .field("pod", &self.pod)
            .field("open", &self.reader.is_some())
            .finish_non_exhaustive()
    }
}

async fn open(api: &Api<Pod>, pod: &str, params: LogParams) -> io::Result<Reader> {
    debug!(%pod, since_seconds = ?params.since_seconds, "Opening log stream");
    let reader = api
        .log_stream(pod, &params)
        .await
        .map_err(io::Error::other)?;
    Ok(Box::pin(reader))
}

/// Whole seconds since `ended_at`, rounded up so that no output is skipped.
fn since_seconds(ended_at: Instant) -> i64 {
    let elapsed = ended_at.elapsed();
    let secs = elapsed.as_secs() + u64::from(elapsed.subsec_nanos() > 0);
    i64::try_from(secs.max(1)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn resumes_from_end_of_previous_follow() {
        let ended_at = Instant::now();
        assert_eq!(since_seconds(ended_at), 1);

        tokio::time::advance(Duration::from_millis(5_200)).await;
        assert_eq!(since_seconds(ended_at), 6);
    }
}
