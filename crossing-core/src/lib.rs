//! # crossing-core
//!
//! Distributed mutual exclusion for vehicles sharing an intersection.
//! Agents order their entry requests with Lamport clocks and exchange
//! request/reply messages through a relay that stands in for a broadcast
//! wireless medium. Only vehicles on non-conflicting lanes cross together.

pub mod agent;
pub mod arbitration;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod connection;
pub mod error;
pub mod network;
pub mod observer;
pub mod relay;
pub mod simulation;
pub mod types;

#[cfg(test)]
mod agent_test;
