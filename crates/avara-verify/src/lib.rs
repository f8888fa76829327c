//! # avara-verify
//!
//! Tool argument verification for the AVARA control plane.
//!
//! This crate provides [`SchemaArgumentVerifier`], which implements the
//! [`avara_core::traits::ArgumentVerifier`] trait. It validates the
//! arguments of a tool call in two phases:
//!
//! 1. **Structural**: JSON Schema validation against the tool's declared
//!    parameter schema, via the `jsonschema` crate.
//! 2. **Custom**: per-tool checks registered by the hosting application.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use avara_verify::SchemaArgumentVerifier;
//!
//! let mut verifier = SchemaArgumentVerifier::new();
//! verifier.register_check("calculate_math", Box::new(|args| {
//!     let expr = args.get("expression").and_then(|v| v.as_str()).unwrap_or("");
//!     if expr.chars().all(|c| c.is_ascii_digit() || "+-*/() .".contains(c)) {
//!         None
//!     } else {
//!         Some("expression may only contain arithmetic".to_string())
//!     }
//! }));
//! ```

pub mod engine;

pub use engine::{ArgumentCheckFn, SchemaArgumentVerifier};
