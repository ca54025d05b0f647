//! Transactions: records of a resource movement between two agents.

use std::sync::atomic::{AtomicU32, Ordering};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::info;

use sim_core::{CoreError, Resource, Result};

use crate::arena::AgentId;
use crate::context::Context;

static NEXT_TRANS_ID: AtomicU32 = AtomicU32::new(1);

/// Whether a transaction was created as supply or demand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransKind {
    Offer,
    Request,
}

/// A declared (and later matched) resource movement. Created by a facility
/// as either an offer or a request; the market fills in the counterparty
/// and mints the id when it matches the two sides.
#[derive(Clone, Debug)]
pub struct Transaction {
    id: u32,
    kind: TransKind,
    supplier: Option<AgentId>,
    requester: Option<AgentId>,
    commodity: String,
    resource: Resource,
    price: Decimal,
}

impl Transaction {
    pub fn offer(
        creator: AgentId,
        commodity: impl Into<String>,
        resource: Resource,
        price: Decimal,
    ) -> Transaction {
        Transaction {
            id: 0,
            kind: TransKind::Offer,
            supplier: Some(creator),
            requester: None,
            commodity: commodity.into(),
            resource,
            price,
        }
    }

    pub fn request(
        creator: AgentId,
        commodity: impl Into<String>,
        resource: Resource,
        price: Decimal,
    ) -> Transaction {
        Transaction {
            id: 0,
            kind: TransKind::Request,
            supplier: None,
            requester: Some(creator),
            commodity: commodity.into(),
            resource,
            price,
        }
    }

    /// Nonzero once matched.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn kind(&self) -> TransKind {
        self.kind
    }

    pub fn is_offer(&self) -> bool {
        self.kind == TransKind::Offer
    }

    pub fn commodity(&self) -> &str {
        &self.commodity
    }

    /// The resource description this transaction is about. For offers and
    /// requests this is a specification, not live inventory.
    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn resource_mut(&mut self) -> &mut Resource {
        &mut self.resource
    }

    pub fn price(&self) -> Decimal {
        self.price
    }

    pub fn supplier(&self) -> Result<AgentId> {
        self.supplier
            .ok_or_else(|| CoreError::state("transaction has no supplier"))
    }

    pub fn requester(&self) -> Result<AgentId> {
        self.requester
            .ok_or_else(|| CoreError::state("transaction has no requester"))
    }

    /// Pairs an offer with a request (in either order), filling in the
    /// missing counterparties and minting one shared transaction id.
    pub fn match_with(&mut self, other: &mut Transaction) -> Result<()> {
        if self.kind == other.kind {
            return Err(CoreError::value(
                "cannot match two transactions of the same kind",
            ));
        }
        if self.kind == TransKind::Offer {
            self.requester = other.requester;
            other.supplier = self.supplier;
        } else {
            self.supplier = other.supplier;
            other.requester = self.requester;
        }
        let id = NEXT_TRANS_ID.fetch_add(1, Ordering::Relaxed);
        self.id = id;
        other.id = id;
        Ok(())
    }

    /// Executes the transfer: the supplier extracts the manifest, the
    /// requester absorbs it, and rows are recorded. The transaction row is
    /// written before the supplier releases the resource, so the log stays
    /// consistent even if a later step fails.
    pub fn approve_transfer(&self, ctx: &mut Context) -> Result<()> {
        let supplier = self.supplier()?;
        ctx.record_transaction(self)?;
        let manifest =
            ctx.with_model(supplier, |m, ctx, id| m.remove_resource(ctx, id, self))?;
        self.finish_transfer(ctx, manifest)
    }

    /// Variant for the supplier's own callbacks: the supplier extracts the
    /// manifest through `supply` instead of a dispatched `remove_resource`,
    /// since its behavior is already out of the arena.
    pub fn approve_transfer_with(
        &self,
        ctx: &mut Context,
        supply: impl FnOnce(&Transaction) -> Result<Vec<Resource>>,
    ) -> Result<()> {
        ctx.record_transaction(self)?;
        let manifest = supply(self)?;
        self.finish_transfer(ctx, manifest)
    }

    fn finish_transfer(&self, ctx: &mut Context, manifest: Vec<Resource>) -> Result<()> {
        let requester = self.requester()?;
        for rsrc in &manifest {
            ctx.record_resource(rsrc)?;
        }
        let count = manifest.len();
        ctx.with_model(requester, |m, ctx, id| {
            m.add_resource(ctx, id, self, manifest)
        })?;
        info!(
            trans = self.id,
            commodity = %self.commodity,
            resources = count,
            "transfer approved"
        );
        Ok(())
    }

    /// Price as recorded to the sink.
    pub fn price_f64(&self) -> f64 {
        self.price.to_f64().unwrap_or(0.0)
    }
}
