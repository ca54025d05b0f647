//! Institutions: build facilities from prototypes and decommission the
//! ones whose operating lifetime has elapsed.

use std::any::Any;
use std::rc::Rc;

use tracing::info;

use sim_core::{CoreError, Result, EPS};

use crate::agent::{AgentKind, Model};
use crate::arena::AgentId;
use crate::context::Context;
use crate::planner::{BuildPlanner, ProducerInfo};
use crate::region::RegionModel;

/// Builds a clone of `prototype` under `inst`, after checking the parent
/// region's allowed set.
pub fn build_facility(ctx: &mut Context, inst: AgentId, prototype: &str) -> Result<AgentId> {
    let region = ctx
        .parent_of(inst)?
        .ok_or_else(|| CoreError::state("institution has no parent region"))?;
    let allowed = ctx.peek_model(region, |m| {
        m.as_any()
            .downcast_ref::<RegionModel>()
            .map(|r| r.allows(prototype))
    })?;
    match allowed {
        Some(true) => {}
        Some(false) => {
            return Err(CoreError::value(format!(
                "prototype '{prototype}' is not among the region's allowed facilities"
            )))
        }
        None => {
            return Err(CoreError::cast(
                "institution's parent is not a region",
            ))
        }
    }
    let child = ctx.create_agent(prototype)?;
    ctx.deploy(child, Some(inst))?;
    Ok(child)
}

#[derive(Debug)]
pub struct InstModel {
    /// Prototype name and count to build at deployment.
    initial_build: Vec<(String, u32)>,
    planner: Option<Rc<dyn BuildPlanner>>,
    /// Commodities whose unmet demand drives planned builds.
    tracked_commodities: Vec<String>,
}

impl InstModel {
    pub fn new(initial_build: Vec<(String, u32)>) -> InstModel {
        InstModel {
            initial_build,
            planner: None,
            tracked_commodities: Vec::new(),
        }
    }

    /// Enables demand-driven building: each tock, unmet demand for the
    /// tracked commodities is covered via the planner's decisions.
    pub fn with_planner(
        mut self,
        planner: Rc<dyn BuildPlanner>,
        commodities: Vec<String>,
    ) -> InstModel {
        self.planner = Some(planner);
        self.tracked_commodities = commodities;
        self
    }

    fn plan_builds(&self, ctx: &mut Context, id: AgentId, time: i32) -> Result<()> {
        let Some(planner) = &self.planner else {
            return Ok(());
        };
        let region = ctx
            .parent_of(id)?
            .ok_or_else(|| CoreError::state("institution has no parent region"))?;
        let allowed: Vec<String> = ctx
            .peek_model(region, |m| {
                m.as_any()
                    .downcast_ref::<RegionModel>()
                    .map(|r| r.allowed_prototypes().map(str::to_string).collect())
            })?
            .ok_or_else(|| CoreError::cast("institution's parent is not a region"))?;

        for commodity in &self.tracked_commodities {
            let unmet = ctx.timer().unmet_demand(commodity, time);
            if unmet <= EPS {
                continue;
            }
            let mut candidates: Vec<ProducerInfo> = Vec::new();
            for proto in &allowed {
                let infos = match ctx.peek_prototype(proto, |m| m.produced_commodities()) {
                    Ok(infos) => infos,
                    Err(CoreError::Key(_)) => continue,
                    Err(e) => return Err(e),
                };
                for mut info in infos {
                    if info.commodity == *commodity {
                        info.prototype = proto.clone();
                        candidates.push(info);
                    }
                }
            }
            let orders = planner.make_build_decision(commodity, unmet, &candidates)?;
            for order in orders {
                info!(
                    prototype = %order.prototype,
                    number = order.number,
                    commodity = %commodity,
                    unmet,
                    "planner ordered builds"
                );
                for _ in 0..order.number {
                    build_facility(ctx, id, &order.prototype)?;
                }
            }
        }
        Ok(())
    }
}

impl Model for InstModel {
    fn kind(&self) -> AgentKind {
        AgentKind::Inst
    }

    fn model_impl(&self) -> &'static str {
        "Inst"
    }

    fn clone_model(&self) -> Box<dyn Model> {
        Box::new(InstModel {
            initial_build: self.initial_build.clone(),
            planner: self.planner.clone(),
            tracked_commodities: self.tracked_commodities.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    /// Builds the initial facility fleet.
    fn deployed(&mut self, ctx: &mut Context, id: AgentId) -> Result<()> {
        for (proto, number) in self.initial_build.clone() {
            for _ in 0..number {
                build_facility(ctx, id, &proto)?;
            }
        }
        Ok(())
    }

    /// Decommission sweep: children whose lifetime has elapsed and that do
    /// not refuse are removed after the full pass over the child list.
    fn tock(&mut self, ctx: &mut Context, id: AgentId, time: i32) -> Result<()> {
        let children = ctx.agent_meta(id)?.children.clone();
        let mut to_decommission = Vec::new();
        for child in children {
            if !ctx.is_live(child) {
                continue;
            }
            if ctx.agent_meta(child)?.lifetime_reached(time)
                && ctx.peek_model(child, |m| m.check_decommission_condition())?
            {
                to_decommission.push(child);
            }
        }
        for child in to_decommission {
            let name = ctx.agent_meta(child)?.name.clone();
            info!(facility = %name, time, "facility has reached the end of its lifetime");
            ctx.decommission(child)?;
        }

        self.plan_builds(ctx, id, time)
    }
}
