//! Orchestration engine for the call-resolution core
//!
//! One invocation is one turn: the router selects a persona, the persona
//! streams a model response, pending tool calls execute under retry and
//! circuit-breaker policy, and control loops back to the same persona
//! until it stops requesting tools or the outbound call is placed. Every
//! step is surfaced as an ordered event stream terminated by a `final`
//! event carrying the resolved state.

pub mod driver;
pub mod execution;
pub mod router;
pub mod sink;
pub mod tool_node;

pub use driver::{after_persona, after_tools, DriverState, Orchestrator};
pub use execution::AgentNode;
pub use router::{route, RouteDecision};
pub use sink::EventSink;
pub use tool_node::ToolNode;
