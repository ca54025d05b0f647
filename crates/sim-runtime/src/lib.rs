#![deny(warnings)]

//! Agent runtime for fuelflow: the agent tree, message routing, market
//! agents, the monthly scheduler, and the per-simulation context.
//!
//! Everything runs single-threaded and cooperative: the scheduler is the
//! only driver, and agent callbacks run to completion in phase order
//! (decay when due, ticks, market resolves, the daily loop ending in
//! tocks). Behaviors are dispatched by taking them out of the agent arena,
//! which gives each callback free access to the context without aliasing.

pub mod agent;
pub mod arena;
pub mod context;
pub mod institution;
pub mod market;
pub mod message;
pub mod models;
pub mod planner;
pub mod region;
pub mod timer;
pub mod transaction;

pub use agent::{AgentKind, AgentMeta, Model};
pub use arena::{AgentId, Arena};
pub use context::Context;
pub use institution::{build_facility, InstModel};
pub use market::MarketModel;
pub use message::{Message, MessageDir};
pub use planner::{BuildOrder, BuildPlanner, CheapestFirstPlanner, ProducerInfo};
pub use region::RegionModel;
pub use sim_market::MatchPolicy;
pub use timer::Timer;
pub use transaction::{TransKind, Transaction};
