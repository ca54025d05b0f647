//! A producer facility: creates material from a recipe each step, offers
//! its inventory, and fills the orders the market sends back.

use std::any::Any;
use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use sim_core::{CoreError, Material, Product, Resource, ResourceBuffer, Result, EPS_RSRC};

use crate::agent::{AgentKind, Model};
use crate::arena::AgentId;
use crate::context::Context;
use crate::message::Message;
use crate::planner::ProducerInfo;
use crate::transaction::Transaction;

fn default_inventory() -> f64 {
    f64::MAX
}

fn default_build_cost() -> f64 {
    1.0
}

#[derive(Clone, Debug, Deserialize)]
pub struct SourceParams {
    /// Commodity offered on the market.
    pub commodity: String,
    /// Recipe name resolved through the context's registry.
    pub recipe: String,
    /// Production capacity in kg per time step.
    pub capacity: f64,
    /// Maximum inventory held, in kg.
    #[serde(default = "default_inventory")]
    pub inventory_size: f64,
    #[serde(default)]
    pub price: Decimal,
    /// Operating lifetime in months; absent means unlimited.
    #[serde(default)]
    pub lifetime: Option<i32>,
    /// Cost of building one clone, consumed by the build planner.
    #[serde(default = "default_build_cost")]
    pub build_cost: f64,
}

#[derive(Debug)]
pub struct SourceModel {
    params: SourceParams,
    inventory: ResourceBuffer,
    orders: VecDeque<Message>,
    prev_time: i32,
}

impl SourceModel {
    pub fn new(params: SourceParams) -> Result<SourceModel> {
        if params.capacity < 0.0 {
            return Err(CoreError::value(format!(
                "source capacity cannot be negative ({})",
                params.capacity
            )));
        }
        let inventory = ResourceBuffer::with_capacity(params.inventory_size)?;
        Ok(SourceModel {
            params,
            inventory,
            orders: VecDeque::new(),
            prev_time: -1,
        })
    }

    pub fn inventory(&self) -> &ResourceBuffer {
        &self.inventory
    }

    /// Produces up to `capacity` kg per elapsed step, bounded by the room
    /// left in the inventory.
    fn generate_material(&mut self, ctx: &mut Context, time: i32) -> Result<()> {
        let elapsed = time - self.prev_time;
        self.prev_time = time;
        let space = self.inventory.space();
        if space < EPS_RSRC {
            return Ok(());
        }
        let comp = ctx.get_recipe(&self.params.recipe)?;
        let amount = (self.params.capacity * elapsed as f64).min(space);
        if amount <= EPS_RSRC {
            return Ok(());
        }
        self.inventory
            .push(Resource::Material(Material::new(amount, comp, time)?))?;
        debug!(amount, total = self.inventory.quantity(), "material generated");
        Ok(())
    }

    fn send_offer(&self, ctx: &mut Context, id: AgentId) -> Result<()> {
        let amount = self.inventory.quantity();
        if amount <= EPS_RSRC {
            return Ok(());
        }
        let spec = Resource::Product(Product::new(amount, "kg", "")?);
        let trans = Transaction::offer(id, self.params.commodity.clone(), spec, self.params.price);
        let market = ctx.market_for(&self.params.commodity)?;
        info!(
            commodity = %self.params.commodity,
            amount,
            "offering inventory"
        );
        Message::new(id, market, trans).send_on(ctx)
    }
}

impl Model for SourceModel {
    fn kind(&self) -> AgentKind {
        AgentKind::Facility
    }

    fn model_impl(&self) -> &'static str {
        "Source"
    }

    fn clone_model(&self) -> Box<dyn Model> {
        // Parameters were validated at construction, so the buffer
        // rebuild cannot fail.
        let inventory = ResourceBuffer::with_capacity(self.params.inventory_size)
            .unwrap_or_else(|_| ResourceBuffer::new());
        Box::new(SourceModel {
            params: self.params.clone(),
            inventory,
            orders: VecDeque::new(),
            prev_time: -1,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn lifetime_months(&self) -> Option<i32> {
        self.params.lifetime
    }

    fn deployed(&mut self, ctx: &mut Context, _id: AgentId) -> Result<()> {
        self.prev_time = ctx.time() - 1;
        Ok(())
    }

    fn tick(&mut self, ctx: &mut Context, id: AgentId, time: i32) -> Result<()> {
        self.generate_material(ctx, time)?;
        self.send_offer(ctx, id)
    }

    /// Fills waiting orders while inventory lasts; the rest stay
    /// waitlisted for the next step.
    fn tock(&mut self, ctx: &mut Context, _id: AgentId, time: i32) -> Result<()> {
        loop {
            let fits = match self.orders.front() {
                None => break,
                Some(order) => {
                    order.trans()?.resource().quantity() - self.inventory.quantity() <= EPS_RSRC
                }
            };
            if !fits {
                info!("not enough inventory; waitlisting remaining orders");
                break;
            }
            let order = match self.orders.pop_front() {
                Some(order) => order,
                None => break,
            };
            order.trans()?.approve_transfer_with(ctx, |trans| {
                self.inventory.pop_qty(trans.resource().quantity())
            })?;
        }
        debug!(
            inventory = self.inventory.quantity(),
            time, "inventory at close of month"
        );
        Ok(())
    }

    /// Orders come back addressed to this facility as the supplier.
    fn receive_message(&mut self, _ctx: &mut Context, id: AgentId, msg: Message) -> Result<()> {
        if msg.trans()?.supplier()? != id {
            return Err(CoreError::value(
                "source facility received an order it is not supplying",
            ));
        }
        self.orders.push_back(msg);
        Ok(())
    }

    fn remove_resource(
        &mut self,
        _ctx: &mut Context,
        _id: AgentId,
        trans: &Transaction,
    ) -> Result<Vec<Resource>> {
        self.inventory.pop_qty(trans.resource().quantity())
    }

    fn decay_inventory(&mut self, ctx: &mut Context, _id: AgentId, time: i32) -> Result<()> {
        self.inventory.decay_all(time, ctx.decay_engine());
        Ok(())
    }

    fn produced_commodities(&self) -> Vec<ProducerInfo> {
        vec![ProducerInfo {
            prototype: String::new(),
            commodity: self.params.commodity.clone(),
            capacity: self.params.capacity,
            cost: self.params.build_cost,
        }]
    }
}
