//! # Pinstore
//!
//! Dual-scope content-addressed artifact store over an IPFS pinning
//! service.
//!
//! Artifacts live in one of two strictly separated namespaces: `team`
//! (official, vetted) and `community` (user-generated). Each scope has its
//! own CID registry file and may use its own credentials; registries are
//! never merged and an upload never silently falls through to the other
//! scope. Every registry entry carries the SHA-256 of the uploaded bytes,
//! so provenance is verifiable from the registry alone.

pub mod client;
pub mod errors;
pub mod registry;
pub mod retriever;
pub mod scope;

pub use client::{PinClient, PinCredentials, UploadOptions, UploadReceipt};
pub use errors::{PinError, PinResult};
pub use registry::{CidRegistry, RegistryEntry};
pub use retriever::{RetrievedContext, Retriever};
pub use scope::{ArtifactKind, Scope};
