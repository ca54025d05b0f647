//! Reference facility models and the kind factory used to build them from
//! configuration.

mod sink;
mod source;

pub use sink::{SinkModel, SinkParams};
pub use source::{SourceModel, SourceParams};

use sim_core::{CoreError, Result};

use crate::agent::Model;

/// Constructs a facility behavior from its kind string and parameter
/// document. Unknown kinds fail with a key error, malformed parameters
/// with an io error.
pub fn construct(kind: &str, params: &serde_json::Value) -> Result<Box<dyn Model>> {
    match kind {
        "Source" => {
            let p: SourceParams = serde_json::from_value(params.clone())
                .map_err(|e| CoreError::io(format!("bad Source parameters: {e}")))?;
            Ok(Box::new(SourceModel::new(p)?))
        }
        "Sink" => {
            let p: SinkParams = serde_json::from_value(params.clone())
                .map_err(|e| CoreError::io(format!("bad Sink parameters: {e}")))?;
            Ok(Box::new(SinkModel::new(p)?))
        }
        other => Err(CoreError::key(format!("unknown facility kind '{other}'"))),
    }
}
