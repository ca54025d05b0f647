#![deny(warnings)]

//! Core resource model for fuelflow.
//!
//! This crate defines the immutable nuclide-composition model, the material
//! and product resource types with conservation-preserving split/merge
//! operations, and the capacity-bounded buffers facilities use to hold
//! inventory. Everything here is driven single-threaded by the runtime
//! crate; compositions are shared by reference and never mutated after
//! creation (their decay-chain cache is a private memoization side effect).

pub mod arith;
pub mod buffer;
pub mod compmath;
pub mod composition;
pub mod error;
pub mod material;
pub mod nuclide;
pub mod product;
pub mod resource;

pub use arith::{almost_eq_dbl, is_negative, kahan_sum, EPS, EPS_RSRC};
pub use buffer::{ResourceBuffer, ResourceMap};
pub use composition::{CompId, CompVec, Composition, DecayEngine, NullDecay, SimpleDecay};
pub use error::{CoreError, Result};
pub use material::Material;
pub use nuclide::{MassTable, NucId};
pub use product::Product;
pub use resource::{Resource, ResourceId, ResourceKind};
