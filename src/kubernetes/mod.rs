pub mod backend;
mod client;
pub mod kinds;
pub mod topology;

pub use backend::{ClusterBackend, KubeBackend};
pub use client::ClientPool;
