//! Building blocks shared by the `spark` CLI and the volume backup tool.
//!
//! Everything in here is either a pure builder or a thin wrapper over the
//! Kubernetes API. Workflows live in the binaries.

pub mod backup;
pub mod bundle;
pub mod client;
pub mod connection;
pub mod constants;
pub mod names;
pub mod poll;
pub mod script;
