#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use chat_api_server_auth as auth;
pub use chat_api_server_core as core;
pub use chat_api_server_grpc as grpc;
pub use chat_api_server_k8s_client as k8s;
pub use chat_api_server_service as service;

mod args;

pub use self::args::{Args, IssuerKindArg};
