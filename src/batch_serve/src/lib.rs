//! This crate is the composite of the request server, the discovery
//! registry, and the client router that ties them together.
//!
//! Clients ask the registry for one live server, cache its address, and send
//! every call straight to it. The registry never carries inference traffic.

#![deny(warnings)]

pub mod config;
pub mod error;
pub mod grpc;
pub mod router;
pub mod server;

pub use config::{RegistryConfig, RouterConfig, ServerConfig};
pub use error::{Error, ErrorKind, ErrorPayload};
pub use router::{Connector, Router};
pub use server::{keep_registered, RequestServer};
