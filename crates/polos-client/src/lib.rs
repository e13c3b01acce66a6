//! Typed client for the orchestrator's HTTP + SSE surface (§4.1).
//!
//! `OrchestratorClient` is the seam the rest of the workspace programs
//! against; `HttpOrchestratorClient` is the production implementation and
//! `testing::InMemoryOrchestrator` is the in-process fake used by every other
//! crate's test suite (§13).

pub mod backoff;
pub mod client_trait;
pub mod config;
pub mod http;
pub mod stream;
pub mod testing;
pub mod types;

pub use client_trait::OrchestratorClient;
pub use config::ClientConfig;
pub use http::HttpOrchestratorClient;
pub use stream::EventStream;
