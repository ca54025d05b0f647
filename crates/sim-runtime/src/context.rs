//! The per-simulation registry and dispatch hub.
//!
//! One [`Context`] owns the agent arena, the name/prototype/recipe/market
//! registries, the scheduler state, the decay engine, and the event log.
//! It is threaded explicitly through construction and every callback; there
//! are no process-wide singletons apart from the read-only mass table.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use persistence::{EventBuilder, EventLog};
use tracing::{debug, info};

use sim_core::{Composition, CoreError, DecayEngine, NullDecay, Resource, Result};

use crate::agent::{AgentKind, AgentMeta, Model};
use crate::arena::{AgentId, Arena};
use crate::message::Message;
use crate::timer::Timer;
use crate::transaction::Transaction;

/// Maps event-sink failures into the flat error taxonomy.
pub(crate) fn io_err(err: anyhow::Error) -> CoreError {
    CoreError::io(format!("event sink failure: {err}"))
}

pub struct Context {
    pub(crate) arena: Arena,
    names: BTreeMap<String, AgentId>,
    protos: BTreeMap<String, Box<dyn Model>>,
    recipes: BTreeMap<String, Rc<Composition>>,
    markets: BTreeMap<String, AgentId>,
    pub(crate) timer: Timer,
    log: EventLog,
    decay_engine: Box<dyn DecayEngine>,
    recorded_types: BTreeSet<&'static str>,
}

impl Context {
    /// A context with the identity decay engine.
    pub fn new(log: EventLog) -> Context {
        Context::with_decay_engine(log, Box::new(NullDecay))
    }

    pub fn with_decay_engine(log: EventLog, decay_engine: Box<dyn DecayEngine>) -> Context {
        Context {
            arena: Arena::new(),
            names: BTreeMap::new(),
            protos: BTreeMap::new(),
            recipes: BTreeMap::new(),
            markets: BTreeMap::new(),
            timer: Timer::new(),
            log,
            decay_engine,
            recorded_types: BTreeSet::new(),
        }
    }

    pub fn decay_engine(&self) -> &dyn DecayEngine {
        self.decay_engine.as_ref()
    }

    // ---- time ----

    /// Configures the scheduler and records the `SimulationTimeInfo` row.
    pub fn init_time(
        &mut self,
        duration: i32,
        start_month: u32,
        start_year: i32,
        sim_start: i32,
        decay: i32,
        handle: &str,
    ) -> Result<()> {
        self.timer
            .initialize(duration, start_month, start_year, sim_start, decay, handle)?;
        self.new_event("SimulationTimeInfo")
            .add_val("SimHandle", handle)
            .add_val("InitialYear", start_year)
            .add_val("InitialMonth", start_month)
            .add_val("SimulationStart", sim_start)
            .add_val("Duration", duration)
            .record()
            .map_err(io_err)
    }

    /// Current time in months since the simulation started.
    pub fn time(&self) -> i32 {
        self.timer.time()
    }

    pub fn start_time(&self) -> i32 {
        self.timer.start_time()
    }

    pub fn sim_dur(&self) -> i32 {
        self.timer.duration()
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    // ---- agents ----

    /// Inserts an agent, enforcing name uniqueness. The agent is not yet
    /// part of the tree; call [`deploy`] to link it.
    ///
    /// [`deploy`]: Context::deploy
    pub fn add_agent(&mut self, meta: AgentMeta, model: Box<dyn Model>) -> Result<AgentId> {
        if self.names.contains_key(&meta.name) {
            return Err(CoreError::key(format!(
                "agent name '{}' is already registered",
                meta.name
            )));
        }
        let name = meta.name.clone();
        let id = self.arena.insert(meta, model);
        self.names.insert(name, id);
        Ok(id)
    }

    pub fn get_agent(&self, name: &str) -> Result<AgentId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::key(format!("invalid agent name '{name}'")))
    }

    /// Typed lookup: the named agent must be of `kind`.
    pub fn get_agent_of_kind(&self, name: &str, kind: AgentKind) -> Result<AgentId> {
        let id = self.get_agent(name)?;
        let actual = self.arena.meta(id)?.kind;
        if actual != kind {
            return Err(CoreError::cast(format!(
                "agent '{name}' is a {} not a {}",
                actual.as_str(),
                kind.as_str()
            )));
        }
        Ok(id)
    }

    pub fn agent_meta(&self, id: AgentId) -> Result<&AgentMeta> {
        self.arena.meta(id)
    }

    pub fn is_live(&self, id: AgentId) -> bool {
        self.arena.contains(id)
    }

    pub fn parent_of(&self, id: AgentId) -> Result<Option<AgentId>> {
        Ok(self.arena.meta(id)?.parent)
    }

    /// Dispatches `f` on the agent's behavior, taken out of the arena for
    /// the duration so the callback can reach the context freely.
    pub fn with_model<R>(
        &mut self,
        id: AgentId,
        f: impl FnOnce(&mut dyn Model, &mut Context, AgentId) -> Result<R>,
    ) -> Result<R> {
        let mut model = self.arena.take_model(id)?;
        let out = f(model.as_mut(), self, id);
        self.arena.put_model(id, model);
        out
    }

    /// Read-only access to a behavior not currently dispatched.
    pub fn peek_model<R>(&self, id: AgentId, f: impl FnOnce(&dyn Model) -> R) -> Result<R> {
        self.arena.peek_model(id, f)
    }

    /// Hands a message to the target agent's `receive_message`.
    pub fn deliver(&mut self, to: AgentId, msg: Message) -> Result<()> {
        self.with_model(to, |m, ctx, id| m.receive_message(ctx, id, msg))
    }

    /// Tallies supply/demand diagnostics when an upward message reaches a
    /// market.
    pub(crate) fn note_market_arrival(&mut self, to: AgentId, msg: &Message) {
        let is_market = self
            .arena
            .meta(to)
            .map(|m| m.kind == AgentKind::Market)
            .unwrap_or(false);
        if !is_market {
            return;
        }
        if let Ok(trans) = msg.trans() {
            let time = self.timer.time();
            let qty = trans.resource().quantity();
            if trans.is_offer() {
                self.timer.tally_offer(trans.commodity(), time, qty);
            } else {
                self.timer.tally_request(trans.commodity(), time, qty);
            }
        }
    }

    // ---- prototypes ----

    pub fn register_prototype(&mut self, name: &str, proto: Box<dyn Model>) -> Result<()> {
        if self.protos.contains_key(name) {
            return Err(CoreError::key(format!(
                "prototype '{name}' is already registered"
            )));
        }
        self.protos.insert(name.to_string(), proto);
        Ok(())
    }

    /// Clones the named prototype into a fresh agent (not yet deployed).
    pub fn create_agent(&mut self, proto_name: &str) -> Result<AgentId> {
        let proto = self
            .protos
            .get(proto_name)
            .ok_or_else(|| CoreError::key(format!("invalid prototype name '{proto_name}'")))?;
        let model = proto.clone_model();
        let mut meta = AgentMeta::new("", model.kind(), model.model_impl());
        meta.prototype = proto_name.to_string();
        meta.name = format!("{}_{}", proto_name, meta.id);
        if let Some(lifetime) = model.lifetime_months() {
            meta.lifetime = lifetime;
        }
        debug!(prototype = proto_name, name = %meta.name, "cloned prototype");
        self.add_agent(meta, model)
    }

    pub fn prototype_names(&self) -> Vec<String> {
        self.protos.keys().cloned().collect()
    }

    pub fn peek_prototype<R>(&self, name: &str, f: impl FnOnce(&dyn Model) -> R) -> Result<R> {
        let proto = self
            .protos
            .get(name)
            .ok_or_else(|| CoreError::key(format!("invalid prototype name '{name}'")))?;
        Ok(f(proto.as_ref()))
    }

    // ---- recipes ----

    pub fn register_recipe(&mut self, name: &str, comp: Rc<Composition>) -> Result<()> {
        if self.recipes.contains_key(name) {
            return Err(CoreError::key(format!(
                "recipe '{name}' is already registered"
            )));
        }
        self.record_composition(&comp)?;
        self.recipes.insert(name.to_string(), comp);
        Ok(())
    }

    pub fn get_recipe(&self, name: &str) -> Result<Rc<Composition>> {
        self.recipes
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::key(format!("invalid recipe name '{name}'")))
    }

    // ---- markets ----

    pub fn register_market(&mut self, commodity: &str, id: AgentId) -> Result<()> {
        if self.markets.contains_key(commodity) {
            return Err(CoreError::key(format!(
                "commodity '{commodity}' already has a market"
            )));
        }
        self.markets.insert(commodity.to_string(), id);
        Ok(())
    }

    pub fn market_for(&self, commodity: &str) -> Result<AgentId> {
        self.markets
            .get(commodity)
            .copied()
            .ok_or_else(|| CoreError::key(format!("no market for commodity '{commodity}'")))
    }

    // ---- events ----

    /// Starts a row in the output sink.
    pub fn new_event(&mut self, table: &str) -> EventBuilder<'_> {
        self.log.new_event(table)
    }

    /// Writes `Compositions` rows for `comp` if not already recorded.
    pub fn record_composition(&mut self, comp: &Rc<Composition>) -> Result<()> {
        if comp.is_recorded() {
            return Ok(());
        }
        for (nuc, frac) in comp.mass() {
            self.new_event("Compositions")
                .add_val("ID", comp.id().0)
                .add_val("NuclideID", nuc.0)
                .add_val("Quantity", *frac)
                .record()
                .map_err(io_err)?;
        }
        comp.mark_recorded();
        Ok(())
    }

    /// Writes the `Resources` row (and first-time `ResourceTypes` and
    /// `Compositions` rows) for a resource in transit.
    pub fn record_resource(&mut self, rsrc: &Resource) -> Result<()> {
        if let Resource::Material(m) = rsrc {
            let comp = Rc::clone(m.comp());
            self.record_composition(&comp)?;
        }
        let kind = rsrc.kind().as_str();
        if !self.recorded_types.contains(kind) {
            self.new_event("ResourceTypes")
                .add_val("Type", kind)
                .add_val("Name", kind)
                .add_val("Units", rsrc.units())
                .record()
                .map_err(io_err)?;
            self.recorded_types.insert(kind);
        }
        let (parent1, parent2) = rsrc.parents();
        self.new_event("Resources")
            .add_val("ID", rsrc.res_id().0)
            .add_val("Type", kind)
            .add_val("Quantity", rsrc.quantity())
            .add_val("Parent1", parent1)
            .add_val("Parent2", parent2)
            .add_val("StateId", rsrc.state_id())
            .record()
            .map_err(io_err)
    }

    /// Writes the `Transactions` row for a matched transaction.
    pub fn record_transaction(&mut self, trans: &Transaction) -> Result<()> {
        let sender = self.arena.meta(trans.supplier()?)?.id;
        let receiver = self.arena.meta(trans.requester()?)?.id;
        let time = self.timer.time();
        self.new_event("Transactions")
            .add_val("ID", trans.id())
            .add_val("SenderID", sender)
            .add_val("ReceiverID", receiver)
            .add_val("ResourceID", trans.resource().res_id().0)
            .add_val("Commodity", trans.commodity())
            .add_val("Price", trans.price_f64())
            .add_val("Time", time)
            .record()
            .map_err(io_err)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.log.flush().map_err(io_err)
    }

    /// Flushes and closes the sink; call once after the run.
    pub fn close_log(&mut self) -> Result<()> {
        self.log.close().map_err(io_err)
    }

    // ---- lifecycle ----

    /// Links an agent into the tree, stamps its birth time and
    /// decommission date, registers it with the scheduler, records its
    /// `Agents` row, and fires its `deployed` hook.
    pub fn deploy(&mut self, child: AgentId, parent: Option<AgentId>) -> Result<()> {
        let time = self.timer.time();
        let final_time = self.timer.final_time();
        {
            let meta = self.arena.meta_mut(child)?;
            if meta.birth_time > -1 {
                return Err(CoreError::state(format!(
                    "agent '{}' is already deployed",
                    meta.name
                )));
            }
            meta.birth_time = time;
            meta.parent = parent;
            meta.decommission_date = if meta.lifetime == i32::MAX {
                final_time
            } else {
                (time + meta.lifetime).min(final_time)
            };
        }
        if let Some(p) = parent {
            self.arena.meta_mut(p)?.children.push(child);
        }
        match self.arena.meta(child)?.kind {
            AgentKind::Market => self.timer.register_resolve_listener(child),
            _ => self.timer.register_tick_listener(child),
        }
        self.record_agent_row(child)?;
        self.with_model(child, |m, ctx, id| m.deployed(ctx, id))?;
        let meta = self.arena.meta(child)?;
        info!(name = %meta.name, kind = meta.kind.as_str(), time, "agent deployed");
        Ok(())
    }

    fn record_agent_row(&mut self, id: AgentId) -> Result<()> {
        let (num, kind, model_impl, prototype, birth, parent) = {
            let meta = self.arena.meta(id)?;
            (
                meta.id,
                meta.kind.as_str(),
                meta.model_impl.clone(),
                meta.prototype.clone(),
                meta.birth_time,
                meta.parent,
            )
        };
        // Roots record themselves as their own parent.
        let parent_num = match parent {
            Some(p) => self.arena.meta(p)?.id,
            None => num,
        };
        self.new_event("Agents")
            .add_val("ID", num)
            .add_val("Kind", kind)
            .add_val("ModelImpl", model_impl)
            .add_val("Prototype", prototype)
            .add_val("ParentID", parent_num)
            .add_val("EnterDate", birth)
            .record()
            .map_err(io_err)
    }

    /// Removes an agent and its subtree: records `AgentDeaths` for every
    /// deployed agent, unlinks from the parent, deregisters listeners and
    /// names, and frees the arena slots.
    pub fn decommission(&mut self, id: AgentId) -> Result<()> {
        let children = self.arena.meta(id)?.children.clone();
        for child in children {
            if self.arena.contains(child) {
                self.decommission(child)?;
            }
        }
        let time = self.timer.time();
        let (num, name, parent, deployed) = {
            let meta = self.arena.meta_mut(id)?;
            meta.death_time = time;
            (meta.id, meta.name.clone(), meta.parent, meta.birth_time > -1)
        };
        if deployed {
            self.new_event("AgentDeaths")
                .add_val("AgentID", num)
                .add_val("DeathDate", time)
                .record()
                .map_err(io_err)?;
        }
        if let Some(p) = parent {
            // A missing parent just means this agent is already a root.
            if let Ok(pm) = self.arena.meta_mut(p) {
                pm.children.retain(|&c| c != id);
            }
        }
        self.timer.deregister(id);
        self.names.remove(&name);
        self.markets.retain(|_, mid| *mid != id);
        self.arena.remove(id)?;
        info!(agent = %name, time, "agent decommissioned");
        Ok(())
    }

    /// End-of-run teardown: dispose of remaining roots; destructors
    /// cascade to children.
    pub(crate) fn dispose_remaining(&mut self) -> Result<()> {
        loop {
            let ids = self.arena.ids();
            if ids.is_empty() {
                break;
            }
            let root = ids.into_iter().find(|&id| match self.arena.meta(id) {
                Ok(meta) => meta.parent.map_or(true, |p| !self.arena.contains(p)),
                Err(_) => false,
            });
            match root {
                Some(id) => self.decommission(id)?,
                None => break,
            }
        }
        Ok(())
    }
}
