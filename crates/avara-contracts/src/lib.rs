//! # avara-contracts
//!
//! Shared types, verdicts, and error contracts for the AVARA control plane.
//!
//! All crates in the workspace import from here. No decision logic lives in
//! this crate, only data definitions and error types.

pub mod action;
pub mod approval;
pub mod audit;
pub mod context;
pub mod error;
pub mod identity;
pub mod scope;
pub mod tool;
pub mod verdict;
