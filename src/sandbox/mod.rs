//! Typed client for the external sandbox execution service (C3).

pub mod gateway;

pub use gateway::{SandboxError, SandboxGateway, SandboxRequest, SandboxResponse};
