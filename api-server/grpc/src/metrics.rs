use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, histogram::Histogram},
    registry::{Registry, Unit},
};
use tokio::time;

/// gRPC server metrics, labeled by service, method, type and code.
#[derive(Clone, Debug)]
pub struct GrpcServerMetricsFamily {
    started: Family<Labels, Counter>,
    handling: Family<Labels, Histogram>,
    handled: Family<CodeLabels, Counter>,
    msg_received: Family<Labels, Counter>,
    msg_sent: Family<Labels, Counter>,
}

#[derive(Clone, Debug)]
pub(crate) struct GrpcServerRPCMetrics {
    started: Counter,
    msg_received: Counter,
    msg_sent: Counter,
    handling: Histogram,
    handled: Family<CodeLabels, Counter>,
    labels: Labels,
}

/// Records the outcome of one call. A call whose observer is dropped without
/// an explicit end is counted as `OK`.
#[derive(Debug)]
pub(crate) struct ResponseObserver {
    msg_sent: Counter,
    handled: Option<ResponseHandle>,
}

#[derive(Debug)]
struct ResponseHandle {
    start: time::Instant,
    durations: Histogram,
    codes: Family<CodeLabels, Counter>,
    labels: Labels,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct Labels {
    grpc_service: &'static str,
    grpc_method: &'static str,
    grpc_type: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct CodeLabels {
    grpc_service: &'static str,
    grpc_method: &'static str,
    grpc_type: &'static str,
    grpc_code: &'static str,
}

// === GrpcServerMetricsFamily ===

impl GrpcServerMetricsFamily {
    pub fn register(reg: &mut Registry) -> Self {
        let started = Family::<Labels, Counter>::default();
        reg.register(
            "started",
            "Total number of RPCs started on the server",
            started.clone(),
        );

        let msg_received = Family::<Labels, Counter>::default();
        reg.register(
            "msg_received",
            "Total number of RPC stream messages received on the server",
            msg_received.clone(),
        );

        let msg_sent = Family::<Labels, Counter>::default();
        reg.register(
            "msg_sent",
            "Total number of gRPC stream messages sent by the server",
            msg_sent.clone(),
        );

        let handled = Family::<CodeLabels, Counter>::default();
        reg.register(
            "handled",
            "Total number of RPCs completed on the server, regardless of success or failure",
            handled.clone(),
        );

        let handling = Family::<Labels, Histogram>::new_with_constructor(|| {
            // Unary calls finish quickly; status and log streams stay open
            // for as long as a client keeps watching.
            Histogram::new([0.01, 0.1, 1.0, 60.0, 3600.0])
        });
        reg.register_with_unit(
            "handling",
            "Histogram of response latency (seconds) of gRPC that had been application-level handled by the server",
            Unit::Seconds,
            handling.clone(),
        );

        Self {
            started,
            msg_received,
            msg_sent,
            handled,
            handling,
        }
    }

    pub(crate) fn unary_rpc(
        &self,
        svc: &'static str,
        method: &'static str,
    ) -> GrpcServerRPCMetrics {
        self.rpc(svc, method, "unary")
    }

    pub(crate) fn server_stream_rpc(
        &self,
        svc: &'static str,
        method: &'static str,
    ) -> GrpcServerRPCMetrics {
        self.rpc(svc, method, "server_stream")
    }

    fn rpc(
        &self,
        grpc_service: &'static str,
        grpc_method: &'static str,
        grpc_type: &'static str,
    ) -> GrpcServerRPCMetrics {
        let labels = Labels {
            grpc_service,
            grpc_method,
            grpc_type,
        };
        GrpcServerRPCMetrics {
            started: self.started.get_or_create(&labels).clone(),
            msg_received: self.msg_received.get_or_create(&labels).clone(),
            msg_sent: self.msg_sent.get_or_create(&labels).clone(),
            handled: self.handled.clone(),
            handling: self.handling.get_or_create(&labels).clone(),
            labels,
        }
    }
}

// === GrpcServerRPCMetrics ===

impl GrpcServerRPCMetrics {
    pub(crate) fn start(&self) -> ResponseObserver {
        self.started.inc();

        // Every method is unary or server-streaming, so a request is always
        // exactly one received message.
        self.msg_received.inc();

        // Pre-register OK
        let _ = self.handled.get_or_create(&self.labels.with_code(tonic::Code::Ok));

        ResponseObserver {
            msg_sent: self.msg_sent.clone(),
            handled: Some(ResponseHandle {
                start: time::Instant::now(),
                durations: self.handling.clone(),
                codes: self.handled.clone(),
                labels: self.labels.clone(),
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn handled(&self, code: tonic::Code) -> u64 {
        self.handled.get_or_create(&self.labels.with_code(code)).get()
    }

    #[cfg(test)]
    pub(crate) fn sent(&self) -> u64 {
        self.msg_sent.get()
    }
}

// === ResponseObserver ===

impl ResponseObserver {
    pub(crate) fn msg_sent(&self) {
        self.msg_sent.inc();
    }

    pub(crate) fn end(mut self, code: tonic::Code) {
        if let Some(handle) = self.handled.take() {
            handle.inc_end(code);
        }
    }

    /// Ends a unary call with the outcome of `res`.
    pub(crate) fn end_with<T>(self, res: &Result<T, tonic::Status>) {
        match res {
            Ok(_) => {
                self.msg_sent();
                self.end(tonic::Code::Ok);
            }
            Err(status) => self.end(status.code()),
        }
    }
}

impl Drop for ResponseObserver {
    fn drop(&mut self) {
        if let Some(inner) = self.handled.take() {
            inner.inc_end(tonic::Code::Ok);
        }
    }
}

// === ResponseHandle ===

impl ResponseHandle {
    #[inline]
    fn inc_end(self, code: tonic::Code) {
        let Self {
            start,
            durations,
            codes,
            labels,
        } = self;
        durations.observe(start.elapsed().as_secs_f64());
        codes.get_or_create(&labels.with_code(code)).inc();
    }
}

// === Labels ===

impl Labels {
    fn with_code(&self, code: tonic::Code) -> CodeLabels {
        CodeLabels {
            grpc_service: self.grpc_service,
            grpc_method: self.grpc_method,
            grpc_type: self.grpc_type,
            grpc_code: code_str(code),
        }
    }
}

fn code_str(code: tonic::Code) -> &'static str {
    use tonic::Code::*;
    match code {
        Ok => "OK",
        Cancelled => "CANCELLED",
        Unknown => "UNKNOWN",
        InvalidArgument => "INVALID_ARGUMENT",
        DeadlineExceeded => "DEADLINE_EXCEEDED",
        NotFound => "NOT_FOUND",
        AlreadyExists => "ALREADY_EXISTS",
        PermissionDenied => "PERMISSION_DENIED",
        ResourceExhausted => "RESOURCE_EXHAUSTED",
        FailedPrecondition => "FAILED_PRECONDITION",
        Aborted => "ABORTED",
        OutOfRange => "OUT_OF_RANGE",
        Unimplemented => "UNIMPLEMENTED",
        Internal => "INTERNAL",
        Unavailable => "UNAVAILABLE",
        DataLoss => "DATA_LOSS",
        Unauthenticated => "UNAUTHENTICATED",
    }
}
