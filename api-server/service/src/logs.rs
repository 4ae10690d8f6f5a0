use chat_api_server_core::{Error, LogLine, LogSource, Result, Rocket};
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinSet, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

#[cfg(test)]
mod tests;

/// Follows the logs of a set of pods and merges them into one stream.
///
/// Lines from one pod keep their order; lines from different pods are
/// interleaved as they arrive.
#[derive(Clone, Debug)]
pub struct LogAggregator {
    backoff: Duration,
}

/// Accumulates raw log output and yields complete lines.
///
/// A partial line at the end of a chunk is held until a later chunk
/// completes it. A line that grows past [`LineBuffer::MAX_LINE`] bytes
/// without a newline is emitted as is.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

/// Picks the pods whose logs should be followed: the requested pod, or every
/// pod the rocket's status records.
pub fn resolve_pods(rocket: &Rocket, pod: Option<&str>) -> Vec<String> {
    match pod {
        Some(pod) => vec![pod.to_string()],
        None => rocket.pods().to_vec(),
    }
}

// === impl LogAggregator ===

impl LogAggregator {
    pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

    pub fn new(backoff: Duration) -> Self {
        Self { backoff }
    }

    /// Runs one worker per source until `cancel` fires, the sink is closed,
    /// or any worker fails.
    ///
    /// Cancellation and a closed sink end the aggregate cleanly. The first
    /// worker error stops every other worker and is returned. No worker
    /// outlives this call.
    pub async fn run<L: LogSource>(
        &self,
        sources: Vec<(String, L)>,
        sink: mpsc::Sender<LogLine>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let stop = cancel.child_token();
        let mut workers = JoinSet::new();
        for (pod, source) in sources {
            let span = info_span!("pod", %pod);
            workers.spawn(
                follow(pod, source, sink.clone(), stop.clone(), self.backoff).instrument(span),
            );
        }

        let res = loop {
            tokio::select! {
                biased;

                _ = stop.cancelled() => break Ok(()),

                _ = sink.closed() => {
                    debug!("Log receiver closed");
                    break Ok(());
                }

                next = workers.join_next() => match next {
                    None => break Ok(()),
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(error))) => break Err(error),
                    Some(Err(error)) => break Err(Error::stream(format!("log worker failed: {error}"))),
                },
            }
        };

        stop.cancel();
        workers.shutdown().await;
        res
    }
}

impl Default for LogAggregator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_BACKOFF)
    }
}

async fn follow<L: LogSource>(
    pod: String,
    mut source: L,
    sink: mpsc::Sender<LogLine>,
    stop: CancellationToken,
    backoff: Duration,
) -> Result<()> {
    let mut lines = LineBuffer::default();
    loop {
        let chunk = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            res = source.next_chunk() => res.map_err(|error| {
                Error::stream(format!("failed to read logs of pod {pod}: {error}"))
            })?,
        };

        let Some(chunk) = chunk else {
            debug!(?backoff, "Reached end of log input");
            // The resumed follow re-reads recent output, including whatever
            // completes the held line.
            lines.clear();
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = time::sleep(backoff) => {}
            }
            continue;
        };

        for message in lines.push(&chunk) {
            let line = LogLine {
                pod: pod.clone(),
                message,
            };
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                res = sink.send(line) => {
                    if res.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

// === impl LineBuffer ===

impl LineBuffer {
    pub const MAX_LINE: usize = 64 * 1024;

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(idx) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(idx);
            self.extend(head, &mut lines);
            if self.partial.last() == Some(&b'\r') {
                self.partial.pop();
            }
            lines.push(self.take());
            rest = &tail[1..];
        }
        self.extend(rest, &mut lines);
        lines
    }

    /// Drops any held partial line.
    pub fn clear(&mut self) {
        self.partial.clear();
    }

    fn extend(&mut self, mut bytes: &[u8], lines: &mut Vec<String>) {
        while self.partial.len() + bytes.len() > Self::MAX_LINE {
            let (head, tail) = bytes.split_at(Self::MAX_LINE - self.partial.len());
            self.partial.extend_from_slice(head);
            lines.push(self.take());
            bytes = tail;
        }
        self.partial.extend_from_slice(bytes);
    }

    fn take(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        line
    }

    /// Bytes held back while waiting for the rest of a line.
    pub fn pending(&self) -> &[u8] {
        &self.partial
    }
}
