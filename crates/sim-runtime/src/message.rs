//! Routed envelopes carrying transactions up and down the agent tree.

use tracing::debug;

use sim_core::{CoreError, Result};

use crate::arena::AgentId;
use crate::context::Context;
use crate::transaction::Transaction;

/// Travel direction: up toward the market, down toward the supplier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageDir {
    Up,
    Down,
}

/// A message hops one agent at a time. Going up, each hop defaults to the
/// current owner's parent, with the tree root flipping to the declared
/// receiver; going down, hops retrace the recorded path. A message whose
/// sender has been destroyed is marked dead and silently dropped.
#[derive(Clone, Debug)]
pub struct Message {
    sender: AgentId,
    receiver: AgentId,
    dir: MessageDir,
    trans: Option<Transaction>,
    /// Route history; the last entry is the current owner once in flight.
    path: Vec<AgentId>,
    curr_owner: AgentId,
    dead: bool,
}

impl Message {
    pub fn new(sender: AgentId, receiver: AgentId, trans: Transaction) -> Message {
        Message {
            sender,
            receiver,
            dir: MessageDir::Up,
            trans: Some(trans),
            path: vec![sender],
            curr_owner: sender,
            dead: false,
        }
    }

    pub fn sender(&self) -> AgentId {
        self.sender
    }

    pub fn receiver(&self) -> AgentId {
        self.receiver
    }

    pub fn dir(&self) -> MessageDir {
        self.dir
    }

    pub fn set_dir(&mut self, dir: MessageDir) {
        self.dir = dir;
    }

    pub fn trans(&self) -> Result<&Transaction> {
        self.trans
            .as_ref()
            .ok_or_else(|| CoreError::state("message has no transaction payload"))
    }

    pub fn trans_mut(&mut self) -> Result<&mut Transaction> {
        self.trans
            .as_mut()
            .ok_or_else(|| CoreError::state("message has no transaction payload"))
    }

    pub fn set_trans(&mut self, trans: Transaction) {
        self.trans = Some(trans);
    }

    pub fn kill(&mut self) {
        self.dead = true;
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    /// Moves the message one hop and delivers it to the next agent's
    /// `receive_message`. Sending an agent a message it already owns is a
    /// fatal routing error.
    pub fn send_on(mut self, ctx: &mut Context) -> Result<()> {
        if self.dead {
            debug!("dropping dead message");
            return Ok(());
        }
        if !ctx.is_live(self.sender) {
            debug!(sender = %self.sender, "sender destroyed; killing message");
            self.dead = true;
            return Ok(());
        }

        let next = match self.dir {
            MessageDir::Down => {
                self.path.pop();
                *self
                    .path
                    .last()
                    .ok_or_else(|| CoreError::state("message path exhausted"))?
            }
            MessageDir::Up => {
                let next = match ctx.parent_of(self.curr_owner)? {
                    Some(parent) => parent,
                    // The tree root flips to the declared receiver.
                    None => self.receiver,
                };
                self.path.push(next);
                next
            }
        };

        if next == self.curr_owner {
            return Err(CoreError::value(
                "message receiver and sender are the same",
            ));
        }

        self.curr_owner = next;
        if self.dir == MessageDir::Up {
            ctx.note_market_arrival(next, &self);
        }
        ctx.deliver(next, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentKind, AgentMeta};
    use crate::arena::AgentId;
    use crate::market::MarketModel;
    use crate::region::RegionModel;
    use persistence::EventLog;
    use rust_decimal::Decimal;
    use sim_core::{Product, Resource};
    use sim_market::MatchPolicy;

    fn ctx_with_market() -> (Context, AgentId, AgentId) {
        let mut ctx = Context::new(EventLog::new());
        ctx.init_time(2, 1, 2005, 0, -1, "msg").unwrap();
        let market = ctx
            .add_agent(
                AgentMeta::new("m", AgentKind::Market, "CommodityMarket"),
                Box::new(MarketModel::new("c", MatchPolicy::Partial)),
            )
            .unwrap();
        ctx.deploy(market, None).unwrap();
        let region = ctx
            .add_agent(
                AgentMeta::new("r", AgentKind::Region, "Region"),
                Box::new(RegionModel::new(Vec::<String>::new())),
            )
            .unwrap();
        ctx.deploy(region, None).unwrap();
        (ctx, market, region)
    }

    fn spec(qty: f64) -> Resource {
        Resource::Product(Product::new(qty, "kg", "").unwrap())
    }

    fn booked(ctx: &Context, market: AgentId) -> Vec<f64> {
        ctx.peek_model(market, |m| {
            m.as_any()
                .downcast_ref::<MarketModel>()
                .map(|mk| mk.offer_quantities())
        })
        .unwrap()
        .unwrap()
    }

    #[test]
    fn upward_offers_reach_the_market_and_are_tallied() {
        let (mut ctx, market, region) = ctx_with_market();
        let trans = Transaction::offer(region, "c", spec(10.0), Decimal::ZERO);
        Message::new(region, market, trans).send_on(&mut ctx).unwrap();
        assert_eq!(booked(&ctx, market), vec![10.0]);
        // Ten on offer, nothing requested.
        assert_eq!(ctx.timer().unmet_demand("c", 0), -10.0);
    }

    #[test]
    fn sending_to_self_is_fatal() {
        let (mut ctx, _market, region) = ctx_with_market();
        let trans = Transaction::offer(region, "c", spec(1.0), Decimal::ZERO);
        let err = Message::new(region, region, trans)
            .send_on(&mut ctx)
            .unwrap_err();
        assert!(matches!(err, CoreError::Value(_)));
    }

    #[test]
    fn messages_from_destroyed_senders_are_dropped() {
        let (mut ctx, market, region) = ctx_with_market();
        let trans = Transaction::offer(region, "c", spec(5.0), Decimal::ZERO);
        let msg = Message::new(region, market, trans);
        ctx.decommission(region).unwrap();
        // Silently dropped, never booked.
        msg.send_on(&mut ctx).unwrap();
        assert!(booked(&ctx, market).is_empty());
    }
}
