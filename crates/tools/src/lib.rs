//! Tool service clients for Quarry.
//!
//! The orchestrator never runs tool business logic itself. Tools live behind
//! a remote service that publishes a catalog of schemas and executes calls on
//! behalf of the caller; [`HttpToolService`] is the client for that service.
//! In-process tools use `quarry_core::tool::ToolRegistry` instead.

pub mod http_service;

pub use http_service::HttpToolService;
