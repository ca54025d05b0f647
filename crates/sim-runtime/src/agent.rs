//! Agent shared state and the behavior trait dispatched by the scheduler.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use sim_core::{CoreError, Resource, Result};

use crate::arena::AgentId;
use crate::context::Context;
use crate::message::Message;
use crate::planner::ProducerInfo;
use crate::transaction::Transaction;

/// The four agent kinds in the tree. Regions root the tree, institutions
/// build and decommission facilities, facilities trade resources, markets
/// match them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentKind {
    Region,
    Inst,
    Facility,
    Market,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Region => "Region",
            AgentKind::Inst => "Inst",
            AgentKind::Facility => "Facility",
            AgentKind::Market => "Market",
        }
    }
}

static NEXT_AGENT_NUM: AtomicU32 = AtomicU32::new(1);

/// State every agent carries regardless of behavior.
#[derive(Debug)]
pub struct AgentMeta {
    /// Sequential number recorded in output rows.
    pub id: u32,
    pub name: String,
    pub kind: AgentKind,
    /// Behavior implementation name, e.g. "Source".
    pub model_impl: String,
    /// Prototype this agent was cloned from; empty for core entities.
    pub prototype: String,
    pub parent: Option<AgentId>,
    pub children: Vec<AgentId>,
    /// Simulation time of deployment; -1 until deployed.
    pub birth_time: i32,
    /// Simulation time of decommission; -1 while alive.
    pub death_time: i32,
    /// Operating lifetime in months; `i32::MAX` means unlimited.
    pub lifetime: i32,
    /// First time step at which the lifetime counts as elapsed. Set at
    /// deployment to `birth + lifetime`, clamped to the end of the
    /// simulation.
    pub decommission_date: i32,
}

impl AgentMeta {
    pub fn new(name: impl Into<String>, kind: AgentKind, model_impl: impl Into<String>) -> AgentMeta {
        AgentMeta {
            id: NEXT_AGENT_NUM.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            kind,
            model_impl: model_impl.into(),
            prototype: String::new(),
            parent: None,
            children: Vec::new(),
            birth_time: -1,
            death_time: -1,
            lifetime: i32::MAX,
            decommission_date: i32::MAX,
        }
    }

    pub fn lifetime_reached(&self, time: i32) -> bool {
        time >= self.decommission_date
    }
}

/// Behavior attached to an agent. The scheduler dispatches callbacks by
/// taking the behavior out of the arena, so implementations receive
/// `&mut Context` without aliasing their own slot.
pub trait Model: std::fmt::Debug {
    fn kind(&self) -> AgentKind;

    /// Implementation name recorded in the `Agents` table.
    fn model_impl(&self) -> &'static str;

    /// Fresh behavior carrying this prototype's parameters but none of its
    /// runtime state.
    fn clone_model(&self) -> Box<dyn Model>;

    /// Downcast hook for typed registry lookups.
    fn as_any(&self) -> &dyn Any;

    /// Called once after the agent is linked into the tree.
    fn deployed(&mut self, _ctx: &mut Context, _id: AgentId) -> Result<()> {
        Ok(())
    }

    /// Beginning-of-step callback.
    fn tick(&mut self, _ctx: &mut Context, _id: AgentId, _time: i32) -> Result<()> {
        Ok(())
    }

    /// End-of-step callback.
    fn tock(&mut self, _ctx: &mut Context, _id: AgentId, _time: i32) -> Result<()> {
        Ok(())
    }

    /// Called once per calendar day, independent of tick/tock.
    fn daily_tasks(&mut self, _ctx: &mut Context, _id: AgentId, _time: i32, _day: u32) -> Result<()> {
        Ok(())
    }

    /// Market matching phase; only markets implement this.
    fn resolve(&mut self, _ctx: &mut Context, _id: AgentId) -> Result<()> {
        Err(CoreError::state("agent does not resolve a market"))
    }

    /// Default behavior passes the message along its route.
    fn receive_message(&mut self, ctx: &mut Context, _id: AgentId, msg: Message) -> Result<()> {
        msg.send_on(ctx)
    }

    /// Supplier side of an order: extract the transacted resources.
    fn remove_resource(
        &mut self,
        _ctx: &mut Context,
        _id: AgentId,
        _trans: &Transaction,
    ) -> Result<Vec<Resource>> {
        Err(CoreError::state("agent cannot supply resources"))
    }

    /// Receiver side of an order: absorb the transferred resources.
    fn add_resource(
        &mut self,
        _ctx: &mut Context,
        _id: AgentId,
        _trans: &Transaction,
        _manifest: Vec<Resource>,
    ) -> Result<()> {
        Err(CoreError::state("agent cannot receive resources"))
    }

    /// A facility may refuse decommissioning even after its lifetime.
    fn check_decommission_condition(&self) -> bool {
        true
    }

    /// Global decay driver hook; facilities decay their inventories.
    fn decay_inventory(&mut self, _ctx: &mut Context, _id: AgentId, _time: i32) -> Result<()> {
        Ok(())
    }

    /// Commodities this behavior can produce, for build planning.
    fn produced_commodities(&self) -> Vec<ProducerInfo> {
        Vec::new()
    }

    /// Operating lifetime in months carried by this behavior's parameters;
    /// `None` means unlimited.
    fn lifetime_months(&self) -> Option<i32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_numbers_are_monotonic() {
        let a = AgentMeta::new("a", AgentKind::Facility, "Source");
        let b = AgentMeta::new("b", AgentKind::Facility, "Source");
        assert!(b.id > a.id);
    }

    #[test]
    fn lifetime_is_open_ended_by_default() {
        let meta = AgentMeta::new("a", AgentKind::Facility, "Source");
        assert!(!meta.lifetime_reached(1_000_000));
    }
}
