//! Deterministic group simulation.
//!
//! This crate connects member state machines through an in-process,
//! totally ordered transport. Given the same inputs it produces identical
//! results every run, which makes it the harness for the end-to-end
//! membership scenarios.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   SimulatedGroup                        │
//! │                                                         │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Event Queue (BTreeMap<EventKey, Event>)        │ │
//! │  │     Ordered by: time, sequence                     │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     nodes: Vec<MemberStateMachine>                 │ │
//! │  │     Each processes events sequentially             │ │
//! │  └────────────────────────┬───────────────────────────┘ │
//! │                           │                             │
//! │                           ▼                             │
//! │  ┌────────────────────────────────────────────────────┐ │
//! │  │     Actions → route messages, collect block acks,  │ │
//! │  │     run the coordinator, schedule views            │ │
//! │  └────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod event_queue;
mod network;
mod runner;

pub use event_queue::{EventKey, EventQueue};
pub use network::NetworkConfig;
pub use runner::{NodeLog, SimulatedGroup, SimulationStats};

/// Index of a node within a simulated group.
///
/// This is a simulation-only concept for routing between in-process nodes.
/// Members themselves are identified by `EndpointId`.
pub type NodeIndex = u32;
