use chat_api_server_core::{
    rocket::{Admin, Database, Ingress},
    Rocket, RocketSpec, RocketStatus,
};
use chat_api_server_k8s_api::{self as k8s, rocket::StorageSpec, ObjectMeta, Pod};

pub(crate) fn rocket(resource: k8s::Rocket) -> Rocket {
    let k8s::Rocket {
        metadata,
        spec,
        status,
    } = resource;
    let admin = spec.admin_spec.unwrap_or_default();

    Rocket {
        name: metadata.name.unwrap_or_default(),
        namespace: metadata.namespace.unwrap_or_default(),
        spec: RocketSpec {
            replicas: spec.replicas,
            version: spec.version,
            admin: Admin {
                username: admin.username,
                email: admin.email,
            },
            ingress: Ingress {
                host: spec.ingress_spec.host,
                annotations: spec.ingress_spec.annotations,
            },
            database: Database {
                replicas: spec.database.replicas,
                storage: spec
                    .database
                    .storage_spec
                    .as_ref()
                    .and_then(StorageSpec::storage)
                    .map(str::to_string),
                version: spec.database.version,
            },
        },
        status: status.map(|status| RocketStatus {
            phase: status.phase,
            message: status.message,
            ready: status.ready,
            pods: status.pods.into_iter().map(|p| p.name).collect(),
        }),
    }
}

pub(crate) fn resource(rocket: &Rocket) -> k8s::Rocket {
    let spec = &rocket.spec;
    k8s::Rocket {
        metadata: ObjectMeta {
            name: Some(rocket.name.clone()),
            namespace: Some(rocket.namespace.clone()),
            ..Default::default()
        },
        spec: k8s::RocketSpec {
            version: spec.version.clone(),
            replicas: spec.replicas,
            admin_spec: Some(k8s::rocket::AdminSpec {
                username: spec.admin.username.clone(),
                email: spec.admin.email.clone(),
            }),
            database: k8s::rocket::DatabaseSpec {
                version: spec.database.version.clone(),
                replicas: spec.database.replicas,
                storage_spec: spec.database.storage.clone().map(StorageSpec::request),
            },
            ingress_spec: k8s::rocket::IngressSpec {
                host: spec.ingress.host.clone(),
                annotations: spec.ingress.annotations.clone(),
            },
        },
        status: None,
    }
}

/// Names of the persistent volume claims a pod mounts.
pub(crate) fn claims(pod: &Pod) -> Vec<String> {
    pod.spec
        .iter()
        .flat_map(|spec| spec.volumes.iter().flatten())
        .filter_map(|volume| volume.persistent_volume_claim.as_ref())
        .map(|claim| claim.claim_name.clone())
        .collect()
}
