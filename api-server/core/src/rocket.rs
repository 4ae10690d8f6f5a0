use std::collections::BTreeMap;

/// Phase reported for a rocket that the reconciler has not yet observed.
pub const PENDING_PHASE: &str = "Pending";

/// A point-in-time snapshot of a chat instance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rocket {
    pub name: String,
    pub namespace: String,
    pub spec: RocketSpec,

    /// Written only by the external reconciler; `None` until it has run.
    pub status: Option<RocketStatus>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RocketSpec {
    pub replicas: i32,
    pub version: Option<String>,
    pub admin: Admin,
    pub ingress: Ingress,
    pub database: Database,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Admin {
    pub username: String,
    pub email: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ingress {
    pub host: Option<String>,
    pub annotations: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Database {
    pub replicas: i32,
    pub version: Option<String>,

    /// Requested storage, as a Kubernetes quantity (e.g. `10Gi`).
    pub storage: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RocketStatus {
    pub phase: String,
    pub message: String,
    pub ready: bool,
    pub pods: Vec<String>,
}

/// Everything a caller supplies to create a rocket.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateRocket {
    pub name: String,
    pub namespace: String,
    pub user: String,
    pub email: String,
    pub host: Option<String>,
    pub storage_gib: i64,
    pub replicas: i32,
}

/// A rocket's status as observed by a single watch notification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusEvent {
    pub message: String,
    pub phase: String,
    pub ready: bool,
}

/// One complete line of a pod's log output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogLine {
    pub pod: String,
    pub message: String,
}

// === impl Rocket ===

impl Rocket {
    pub fn phase(&self) -> &str {
        match &self.status {
            Some(status) if !status.phase.is_empty() => &status.phase,
            _ => PENDING_PHASE,
        }
    }

    pub fn message(&self) -> &str {
        self.status
            .as_ref()
            .map(|s| s.message.as_str())
            .unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    /// Names of the pods currently recorded in the rocket's status.
    pub fn pods(&self) -> &[String] {
        self.status
            .as_ref()
            .map(|s| s.pods.as_slice())
            .unwrap_or_default()
    }
}

// === impl StatusEvent ===

impl From<&Rocket> for StatusEvent {
    fn from(rocket: &Rocket) -> Self {
        Self {
            message: rocket.message().to_string(),
            phase: rocket.phase().to_string(),
            ready: rocket.is_ready(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreconciled_rocket_is_pending() {
        let rocket = Rocket {
            name: "demo".to_string(),
            namespace: "ns".to_string(),
            ..Default::default()
        };
        assert_eq!(rocket.phase(), PENDING_PHASE);
        assert!(!rocket.is_ready());
        assert!(rocket.pods().is_empty());
        assert_eq!(
            StatusEvent::from(&rocket),
            StatusEvent {
                message: String::new(),
                phase: PENDING_PHASE.to_string(),
                ready: false,
            }
        );
    }

    #[test]
    fn status_event_reflects_status() {
        let rocket = Rocket {
            status: Some(RocketStatus {
                phase: "Running".to_string(),
                message: "all replicas ready".to_string(),
                ready: true,
                pods: vec!["demo-0".to_string()],
            }),
            ..Default::default()
        };
        let event = StatusEvent::from(&rocket);
        assert!(event.ready);
        assert_eq!(event.phase, "Running");
        assert_eq!(event.message, "all replicas ready");
        assert_eq!(rocket.pods(), ["demo-0".to_string()]);
    }
}
