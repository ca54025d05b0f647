//! Generic products: non-nuclide resources typed by a quality string.

use crate::error::{CoreError, Result};
use crate::resource::ResourceId;

/// A catch-all resource for anything that is not matter with a nuclide
/// composition: man-hours, electricity, separative work, and the like.
#[derive(Clone, Debug)]
pub struct Product {
    id: ResourceId,
    qty: f64,
    units: String,
    quality: String,
    parents: (u32, u32),
}

impl Product {
    pub fn new(qty: f64, units: impl Into<String>, quality: impl Into<String>) -> Result<Product> {
        if qty < 0.0 {
            return Err(CoreError::value(format!(
                "cannot create a product with negative quantity {qty}"
            )));
        }
        Ok(Product {
            id: ResourceId::next(),
            qty,
            units: units.into(),
            quality: quality.into(),
            parents: (0, 0),
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn quantity(&self) -> f64 {
        self.qty
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn quality(&self) -> &str {
        &self.quality
    }

    pub fn parents(&self) -> (u32, u32) {
        self.parents
    }

    /// Overwrites the quantity without bumping identity; order descriptions
    /// only.
    pub fn set_quantity(&mut self, qty: f64) {
        self.qty = qty;
    }

    /// Whether `other` can be combined with this product.
    pub fn compatible(&self, other: &Product) -> bool {
        self.units == other.units && self.quality == other.quality
    }

    /// Removes `qty` units, returned as a new product with the same units
    /// and quality. Fails without mutating if more is asked than exists.
    pub fn extract(&mut self, qty: f64) -> Result<Product> {
        if qty > self.qty {
            return Err(CoreError::value(format!(
                "extraction of {qty} {} exceeds the {} available",
                self.units, self.qty
            )));
        }
        self.qty -= qty;
        let old = self.id;
        self.id = ResourceId::next();
        self.parents = (old.0, 0);
        Ok(Product {
            id: ResourceId::next(),
            qty,
            units: self.units.clone(),
            quality: self.quality.clone(),
            parents: (self.id.0, 0),
        })
    }

    /// Merges `other` into this product. Units and quality must match.
    pub fn absorb(&mut self, other: Product) -> Result<()> {
        if !self.compatible(&other) {
            return Err(CoreError::value(format!(
                "incompatible product absorb: {}/{} vs {}/{}",
                self.units, self.quality, other.units, other.quality
            )));
        }
        let old = self.id;
        self.qty += other.qty;
        self.id = ResourceId::next();
        self.parents = (old.0, other.id.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_and_absorb_roundtrip() {
        let mut p = Product::new(9.0, "kg", "spent fuel casks").unwrap();
        let piece = p.extract(3.0).unwrap();
        assert_eq!(piece.quantity(), 3.0);
        assert_eq!(p.quantity(), 6.0);
        p.absorb(piece).unwrap();
        assert_eq!(p.quantity(), 9.0);
    }

    #[test]
    fn incompatible_absorb_is_rejected() {
        let mut p = Product::new(1.0, "kg", "casks").unwrap();
        let other = Product::new(1.0, "man-hours", "labor").unwrap();
        assert!(matches!(p.absorb(other), Err(CoreError::Value(_))));
        assert_eq!(p.quantity(), 1.0);
    }

    #[test]
    fn over_extraction_is_rejected() {
        let mut p = Product::new(1.0, "kg", "casks").unwrap();
        assert!(matches!(p.extract(1.5), Err(CoreError::Value(_))));
        assert_eq!(p.quantity(), 1.0);
    }
}
