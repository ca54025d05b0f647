//! Build planning: choosing which facility prototypes to build to cover
//! unmet commodity demand.
//!
//! The production deployment optimizer is a pluggable collaborator behind
//! [`BuildPlanner`]; [`CheapestFirstPlanner`] is the reference
//! implementation.

use sim_core::{CoreError, Result, EPS};

/// A candidate producer: a facility prototype with its per-step capacity
/// and build cost for one commodity.
#[derive(Clone, Debug, PartialEq)]
pub struct ProducerInfo {
    /// Prototype name; filled in by whoever enumerates the registry.
    pub prototype: String,
    pub commodity: String,
    /// Production capacity per time step, in the commodity's units.
    pub capacity: f64,
    /// Cost of building one facility of this prototype.
    pub cost: f64,
}

/// A planner decision: build `number` clones of `prototype`.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildOrder {
    pub prototype: String,
    pub number: u32,
}

/// Decides what to build to cover `unmet_demand` of a commodity.
pub trait BuildPlanner: std::fmt::Debug {
    fn make_build_decision(
        &self,
        commodity: &str,
        unmet_demand: f64,
        candidates: &[ProducerInfo],
    ) -> Result<Vec<BuildOrder>>;
}

/// Covers demand greedily, cheapest builder first (by cost per unit of
/// capacity), building as many of each as still needed.
#[derive(Debug)]
pub struct CheapestFirstPlanner;

impl BuildPlanner for CheapestFirstPlanner {
    fn make_build_decision(
        &self,
        commodity: &str,
        unmet_demand: f64,
        candidates: &[ProducerInfo],
    ) -> Result<Vec<BuildOrder>> {
        if unmet_demand <= EPS {
            return Ok(Vec::new());
        }
        let mut usable: Vec<&ProducerInfo> = candidates
            .iter()
            .filter(|c| c.commodity == commodity && c.capacity > EPS)
            .collect();
        if usable.is_empty() {
            return Err(CoreError::state(format!(
                "no registered producer can cover demand for '{commodity}'"
            )));
        }
        usable.sort_by(|a, b| {
            let ka = a.cost / a.capacity;
            let kb = b.cost / b.capacity;
            ka.partial_cmp(&kb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut orders = Vec::new();
        let mut remaining = unmet_demand;
        for candidate in usable {
            if remaining <= EPS {
                break;
            }
            let number = (remaining / candidate.capacity).ceil() as u32;
            orders.push(BuildOrder {
                prototype: candidate.prototype.clone(),
                number,
            });
            remaining -= candidate.capacity * number as f64;
        }
        Ok(orders)
    }
}
