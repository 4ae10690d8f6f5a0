#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod error;
mod metrics;
mod server;

pub mod proto {
    #![allow(clippy::all)]
    tonic::include_proto!("rocket.v1");
}

pub use self::{error::code, metrics::GrpcServerMetricsFamily, server::RocketServer};
