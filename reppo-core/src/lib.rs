//! Core domain models for the Reppo orchestrator
//!
//! This crate contains the I/O-free building blocks shared by the protocol
//! and orchestrator crates: the worker manifest, operation descriptors and
//! their qualified names, and the worker status state machine.

pub mod error;
pub mod manifest;
pub mod operation;
pub mod worker;

pub use error::{Error, Result};
pub use manifest::{Manifest, ManifestEntry};
pub use operation::{qualify, split_qualified, OperationDescriptor, SEPARATOR};
pub use worker::WorkerStatus;
