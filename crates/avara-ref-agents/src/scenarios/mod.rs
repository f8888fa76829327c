//! Reference scenarios.
//!
//! Each scenario wires a fresh control plane from the bundled policy, drives
//! it through one family of decisions, and returns what the ledger recorded.
//! `run_scenario` keeps the chain in memory; `run_on` takes any
//! `ScenarioLedger`.

pub mod anomaly;
pub mod context;
pub mod lifecycle;
pub mod tool_gate;
