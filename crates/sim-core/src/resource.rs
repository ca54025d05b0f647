//! The resource sum type shared by buffers, markets, and transactions.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::arith::EPS_RSRC;
use crate::error::{CoreError, Result};
use crate::material::Material;
use crate::product::Product;

static NEXT_RES_ID: AtomicU32 = AtomicU32::new(1);

/// Process-monotonic resource identifier. A resource's id changes whenever
/// its state is observably mutated (split, merge, transmute).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub u32);

impl ResourceId {
    pub(crate) fn next() -> ResourceId {
        ResourceId(NEXT_RES_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// The two resource implementations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    Material,
    Product,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Material => "Material",
            ResourceKind::Product => "Product",
        }
    }
}

/// Either a material (nuclide-typed matter) or a generic product.
#[derive(Clone, Debug)]
pub enum Resource {
    Material(Material),
    Product(Product),
}

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Resource::Material(_) => ResourceKind::Material,
            Resource::Product(_) => ResourceKind::Product,
        }
    }

    pub fn res_id(&self) -> ResourceId {
        match self {
            Resource::Material(m) => m.id(),
            Resource::Product(p) => p.id(),
        }
    }

    /// The composition id for materials; fixed at zero for products.
    pub fn state_id(&self) -> u32 {
        match self {
            Resource::Material(m) => m.comp().id().0,
            Resource::Product(_) => 0,
        }
    }

    pub fn quantity(&self) -> f64 {
        match self {
            Resource::Material(m) => m.quantity(),
            Resource::Product(p) => p.quantity(),
        }
    }

    /// Overwrites the quantity without bumping identity; order descriptions
    /// only.
    pub fn set_quantity(&mut self, qty: f64) {
        match self {
            Resource::Material(m) => m.set_quantity(qty),
            Resource::Product(p) => p.set_quantity(qty),
        }
    }

    pub fn units(&self) -> &str {
        match self {
            Resource::Material(_) => "kg",
            Resource::Product(p) => p.units(),
        }
    }

    /// The quality string for products; empty for materials.
    pub fn quality(&self) -> &str {
        match self {
            Resource::Material(_) => "",
            Resource::Product(p) => p.quality(),
        }
    }

    /// Lineage of the current state (up to two parent resource ids).
    pub fn parents(&self) -> (u32, u32) {
        match self {
            Resource::Material(m) => m.parents(),
            Resource::Product(p) => p.parents(),
        }
    }

    /// Quantities at or below epsilon count as empty.
    pub fn is_empty(&self) -> bool {
        self.quantity() <= EPS_RSRC
    }

    /// Splits off `qty`, returning it as a new resource of the same kind.
    pub fn extract(&mut self, qty: f64) -> Result<Resource> {
        match self {
            Resource::Material(m) => Ok(Resource::Material(m.extract_qty(qty)?)),
            Resource::Product(p) => Ok(Resource::Product(p.extract(qty)?)),
        }
    }

    /// Merges `other` into this resource. Kinds must match, and products
    /// must agree on units and quality.
    pub fn absorb(&mut self, other: Resource) -> Result<()> {
        match (self, other) {
            (Resource::Material(m), Resource::Material(o)) => m.absorb(o),
            (Resource::Product(p), Resource::Product(o)) => p.absorb(o),
            _ => Err(CoreError::value(
                "cannot absorb a resource of a different kind",
            )),
        }
    }
}
