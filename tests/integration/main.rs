//! Integration tests for the autopilot control plane.

mod cli;
mod scheduler_flow;
