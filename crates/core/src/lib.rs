#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # strom-core
//!
//! Core identifier types shared by every strom crate.
//!
//! - [`FlowId`], [`ExecutionId`] — Copy, 16-byte uuid wrappers
//! - [`NodeId`] — string key, unique within one flow definition
//!
//! Each identifier is a distinct type: passing a `FlowId` where an
//! `ExecutionId` is expected is a compile error.

pub mod id;

pub use id::{ExecutionId, FlowId, IdParseError, NodeId};
