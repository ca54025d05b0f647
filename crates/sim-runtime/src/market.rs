//! The market agent: books offer/request messages for one commodity and
//! turns engine matches into downward orders.

use std::any::Any;

use tracing::{debug, info};

use sim_core::{Result, EPS_RSRC};
use sim_market::{resolve, BookEntry, MatchPolicy};

use crate::agent::{AgentKind, Model};
use crate::arena::AgentId;
use crate::context::Context;
use crate::message::{Message, MessageDir};

/// Per-commodity matcher. Offers that survive a resolution (including
/// residual splits) carry over to the next step; requests are consumed
/// every step, matched or not.
#[derive(Debug)]
pub struct MarketModel {
    commodity: String,
    policy: MatchPolicy,
    offers: Vec<Message>,
    requests: Vec<Message>,
}

impl MarketModel {
    pub fn new(commodity: impl Into<String>, policy: MatchPolicy) -> MarketModel {
        MarketModel {
            commodity: commodity.into(),
            policy,
            offers: Vec::new(),
            requests: Vec::new(),
        }
    }

    pub fn commodity(&self) -> &str {
        &self.commodity
    }

    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Quantities of the offers currently booked, in book order.
    pub fn offer_quantities(&self) -> Vec<f64> {
        self.offers
            .iter()
            .filter_map(|m| m.trans().ok().map(|t| t.resource().quantity()))
            .collect()
    }

    fn book(messages: &[Message]) -> Result<Vec<BookEntry>> {
        let mut entries = Vec::with_capacity(messages.len());
        for (i, msg) in messages.iter().enumerate() {
            let trans = msg.trans()?;
            entries.push(BookEntry {
                key: i,
                qty: trans.resource().quantity(),
                units: trans.resource().units().to_string(),
                quality: trans.resource().quality().to_string(),
            });
        }
        Ok(entries)
    }
}

impl Model for MarketModel {
    fn kind(&self) -> AgentKind {
        AgentKind::Market
    }

    fn model_impl(&self) -> &'static str {
        "CommodityMarket"
    }

    fn clone_model(&self) -> Box<dyn Model> {
        Box::new(MarketModel::new(self.commodity.clone(), self.policy))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn deployed(&mut self, ctx: &mut Context, id: AgentId) -> Result<()> {
        ctx.register_market(&self.commodity, id)
    }

    /// Books an incoming offer or request.
    fn receive_message(&mut self, _ctx: &mut Context, _id: AgentId, msg: Message) -> Result<()> {
        if msg.trans()?.is_offer() {
            self.offers.push(msg);
        } else {
            self.requests.push(msg);
        }
        Ok(())
    }

    /// Matches the books and dispatches firm orders downward.
    fn resolve(&mut self, ctx: &mut Context, _id: AgentId) -> Result<()> {
        debug!(
            commodity = %self.commodity,
            offers = self.offers.len(),
            requests = self.requests.len(),
            "resolving market"
        );
        let resolution = resolve(
            Self::book(&self.offers)?,
            Self::book(&self.requests)?,
            self.policy,
        );

        for m in &resolution.matches {
            let mut order = self.offers[m.offer].clone();
            let mut offer_trans = order.trans()?.clone();
            let mut request_trans = self.requests[m.request].trans()?.clone();
            offer_trans.resource_mut().set_quantity(m.qty);
            offer_trans.match_with(&mut request_trans)?;
            info!(
                commodity = %self.commodity,
                trans = offer_trans.id(),
                qty = m.qty,
                "match resolved"
            );
            order.set_trans(offer_trans);
            order.set_dir(MessageDir::Down);
            order.send_on(ctx)?;
        }

        for key in &resolution.rejected {
            if let Ok(trans) = self.requests[*key].trans() {
                debug!(
                    commodity = %self.commodity,
                    qty = trans.resource().quantity(),
                    "request rejected"
                );
            }
        }

        // Surviving offers, residuals included, carry to the next step.
        let mut carried = Vec::with_capacity(resolution.leftovers.len());
        for left in resolution.leftovers {
            let mut msg = self.offers[left.key].clone();
            if (msg.trans()?.resource().quantity() - left.qty).abs() > EPS_RSRC {
                msg.trans_mut()?.resource_mut().set_quantity(left.qty);
            }
            carried.push(msg);
        }
        self.offers = carried;
        self.requests.clear();
        Ok(())
    }
}
