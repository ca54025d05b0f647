//! A consumer facility: requests a fixed quantity of its commodity each
//! step and absorbs whatever the market delivers.

use std::any::Any;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use sim_core::{CoreError, Product, Resource, ResourceBuffer, Result, EPS_RSRC};

use crate::agent::{AgentKind, Model};
use crate::arena::AgentId;
use crate::context::Context;
use crate::message::Message;
use crate::transaction::Transaction;

fn default_inventory() -> f64 {
    f64::MAX
}

#[derive(Clone, Debug, Deserialize)]
pub struct SinkParams {
    /// Commodity requested on the market.
    pub commodity: String,
    /// Quantity requested per time step.
    pub capacity: f64,
    /// Maximum inventory held.
    #[serde(default = "default_inventory")]
    pub inventory_size: f64,
    #[serde(default)]
    pub price: Decimal,
    /// Operating lifetime in months; absent means unlimited.
    #[serde(default)]
    pub lifetime: Option<i32>,
}

#[derive(Debug)]
pub struct SinkModel {
    params: SinkParams,
    inventory: ResourceBuffer,
}

impl SinkModel {
    pub fn new(params: SinkParams) -> Result<SinkModel> {
        if params.capacity < 0.0 {
            return Err(CoreError::value(format!(
                "sink capacity cannot be negative ({})",
                params.capacity
            )));
        }
        let inventory = ResourceBuffer::with_capacity(params.inventory_size)?;
        Ok(SinkModel { params, inventory })
    }

    pub fn inventory(&self) -> &ResourceBuffer {
        &self.inventory
    }
}

impl Model for SinkModel {
    fn kind(&self) -> AgentKind {
        AgentKind::Facility
    }

    fn model_impl(&self) -> &'static str {
        "Sink"
    }

    fn clone_model(&self) -> Box<dyn Model> {
        // Parameters were validated at construction, so the buffer
        // rebuild cannot fail.
        let inventory = ResourceBuffer::with_capacity(self.params.inventory_size)
            .unwrap_or_else(|_| ResourceBuffer::new());
        Box::new(SinkModel {
            params: self.params.clone(),
            inventory,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn lifetime_months(&self) -> Option<i32> {
        self.params.lifetime
    }

    fn tick(&mut self, ctx: &mut Context, id: AgentId, _time: i32) -> Result<()> {
        let amount = self.params.capacity.min(self.inventory.space());
        if amount <= EPS_RSRC {
            return Ok(());
        }
        let spec = Resource::Product(Product::new(amount, "kg", "")?);
        let trans = Transaction::request(id, self.params.commodity.clone(), spec, self.params.price);
        let market = ctx.market_for(&self.params.commodity)?;
        info!(
            commodity = %self.params.commodity,
            amount,
            "requesting material"
        );
        Message::new(id, market, trans).send_on(ctx)
    }

    fn tock(&mut self, _ctx: &mut Context, _id: AgentId, time: i32) -> Result<()> {
        debug!(
            inventory = self.inventory.quantity(),
            time, "inventory at close of month"
        );
        Ok(())
    }

    fn receive_message(&mut self, _ctx: &mut Context, _id: AgentId, _msg: Message) -> Result<()> {
        Err(CoreError::value(
            "sink facilities do not accept direct messages",
        ))
    }

    fn add_resource(
        &mut self,
        _ctx: &mut Context,
        _id: AgentId,
        _trans: &Transaction,
        manifest: Vec<Resource>,
    ) -> Result<()> {
        self.inventory.push_all(manifest)
    }

    fn decay_inventory(&mut self, ctx: &mut Context, _id: AgentId, time: i32) -> Result<()> {
        self.inventory.decay_all(time, ctx.decay_engine());
        Ok(())
    }
}
