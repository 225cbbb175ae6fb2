//! stackup provider - remote resource clients over a control-plane API
//!
//! The engine only sees `ResourceClient`. Kinds live in src/kinds/ and are
//! registered in `ClientRegistry::standard()`.

pub mod client;
pub mod control_plane;
pub mod error;
pub mod http;
pub mod kinds;
pub mod memory;
pub mod registry;
pub mod retry;

pub use client::{ProviderContext, RemoteObject, ResourceClient, UpdatePolicy};
pub use control_plane::{ApiObject, ApiRequest, ControlPlane};
pub use error::{ProviderError, ProviderResult};
pub use http::HttpControlPlane;
pub use memory::{Call, MemoryControlPlane, Op};
pub use registry::ClientRegistry;
pub use retry::RetryPolicy;
