//! Regions: roots of the agent tree, owning the set of facility
//! prototypes their institutions may build.

use std::any::Any;
use std::collections::BTreeSet;

use crate::agent::{AgentKind, Model};

#[derive(Debug)]
pub struct RegionModel {
    allowed: BTreeSet<String>,
}

impl RegionModel {
    pub fn new(allowed: impl IntoIterator<Item = String>) -> RegionModel {
        RegionModel {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Whether institutions under this region may build `prototype`.
    pub fn allows(&self, prototype: &str) -> bool {
        self.allowed.contains(prototype)
    }

    pub fn allowed_prototypes(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }
}

impl Model for RegionModel {
    fn kind(&self) -> AgentKind {
        AgentKind::Region
    }

    fn model_impl(&self) -> &'static str {
        "Region"
    }

    fn clone_model(&self) -> Box<dyn Model> {
        Box::new(RegionModel {
            allowed: self.allowed.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
