//! Materials: resource quantities typed by a nuclide composition.

use std::rc::Rc;

use crate::compmath;
use crate::composition::{CompVec, Composition, DecayEngine};
use crate::error::{CoreError, Result};
use crate::resource::ResourceId;

/// A quantity of matter with a nuclide composition. Splitting, merging, and
/// transmuting preserve total mass up to one epsilon per combine and bump
/// the resource id so every observable state has its own identity.
#[derive(Clone, Debug)]
pub struct Material {
    id: ResourceId,
    qty: f64,
    comp: Rc<Composition>,
    /// Simulation time this material was last decayed to.
    prev_decay_time: i32,
    parents: (u32, u32),
}

impl Material {
    /// Creates a material of `qty` kg with composition `comp`. The material
    /// is considered decayed up to `birth_time`.
    pub fn new(qty: f64, comp: Rc<Composition>, birth_time: i32) -> Result<Material> {
        if qty < 0.0 {
            return Err(CoreError::value(format!(
                "cannot create a material with negative quantity {qty}"
            )));
        }
        Ok(Material {
            id: ResourceId::next(),
            qty,
            comp,
            prev_decay_time: birth_time,
            parents: (0, 0),
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Mass in kg.
    pub fn quantity(&self) -> f64 {
        self.qty
    }

    pub fn comp(&self) -> &Rc<Composition> {
        &self.comp
    }

    /// Lineage of the current state: resource ids of up to two parents,
    /// zero meaning none.
    pub fn parents(&self) -> (u32, u32) {
        self.parents
    }

    /// Overwrites the quantity without bumping identity. Only order
    /// descriptions use this; inventory mutations go through extract and
    /// absorb.
    pub fn set_quantity(&mut self, qty: f64) {
        self.qty = qty;
    }

    /// This material's mass vector scaled to its quantity.
    pub fn mass_vect(&self) -> CompVec {
        let mut v = self.comp.mass().clone();
        compmath::normalize(&mut v, self.qty);
        v
    }

    /// Removes `qty` kg, returned as a new material with the same
    /// composition. Fails without mutating if more is asked than exists.
    pub fn extract_qty(&mut self, qty: f64) -> Result<Material> {
        let comp = Rc::clone(&self.comp);
        self.extract_comp(qty, &comp, crate::arith::EPS_RSRC)
    }

    /// Removes `qty` kg with composition `comp`. The residual composition
    /// is recomputed by subtraction with `threshold` applied; a residual
    /// component negative beyond the threshold fails the whole operation,
    /// leaving this material untouched.
    pub fn extract_comp(
        &mut self,
        qty: f64,
        comp: &Rc<Composition>,
        threshold: f64,
    ) -> Result<Material> {
        if qty > self.qty {
            return Err(CoreError::value(format!(
                "mass extraction of {qty} kg exceeds the {} kg available",
                self.qty
            )));
        }

        if self.comp.id() != comp.id() {
            let mut v = self.comp.mass().clone();
            compmath::normalize(&mut v, self.qty);
            let mut otherv = comp.mass().clone();
            compmath::normalize(&mut otherv, qty);
            let mut newv = compmath::sub(&v, &otherv);
            compmath::apply_threshold(&mut newv, threshold)?;
            // Construction validates nonnegativity of the residual.
            self.comp = Composition::from_mass(newv)?;
        }

        self.qty -= qty;
        let old = self.id;
        self.id = ResourceId::next();
        self.parents = (old.0, 0);

        Ok(Material {
            id: ResourceId::next(),
            qty,
            comp: Rc::clone(comp),
            prev_decay_time: self.prev_decay_time,
            parents: (self.id.0, 0),
        })
    }

    /// Merges `other` into this material. Compositions combine by mass;
    /// the absorbed material ceases to exist.
    pub fn absorb(&mut self, other: Material) -> Result<()> {
        if self.comp.id() != other.comp.id() {
            let mut v = self.comp.mass().clone();
            compmath::normalize(&mut v, self.qty);
            let mut otherv = other.comp.mass().clone();
            compmath::normalize(&mut otherv, other.qty);
            self.comp = Composition::from_mass(compmath::add(&v, &otherv))?;
        }
        let old = self.id;
        self.qty += other.qty;
        self.id = ResourceId::next();
        self.parents = (old.0, other.id.0);
        Ok(())
    }

    /// Replaces the composition, preserving quantity.
    pub fn transmute(&mut self, comp: Rc<Composition>) {
        self.comp = comp;
        let old = self.id;
        self.id = ResourceId::next();
        self.parents = (old.0, 0);
    }

    /// Decays this material up to simulation time `time`. The delta since
    /// the previous decay is resolved through the composition's memoized
    /// chain, so all materials of one lineage share the computation.
    pub fn decay(&mut self, time: i32, engine: &dyn DecayEngine) {
        let dt = time - self.prev_decay_time;
        self.prev_decay_time = time;
        if dt > 0 {
            let decayed = self.comp.decay(dt as u32, engine);
            self.transmute(decayed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arith::{EPS, EPS_RSRC};
    use crate::composition::NullDecay;
    use crate::nuclide::NucId;

    fn u235() -> NucId {
        NucId::from_zam(92, 235, 0)
    }

    fn o16() -> NucId {
        NucId::from_zam(8, 16, 0)
    }

    fn uox() -> Rc<Composition> {
        let mut v = CompVec::new();
        v.insert(u235(), 2.4);
        v.insert(o16(), 4.8);
        Composition::from_atom(v).unwrap()
    }

    fn pure_u235() -> Rc<Composition> {
        let mut v = CompVec::new();
        v.insert(u235(), 1.0);
        Composition::from_mass(v).unwrap()
    }

    #[test]
    fn split_then_merge_conserves_mass_and_identity() {
        let mut m = Material::new(10.0, uox(), 0).unwrap();
        let comp_id = m.comp().id();
        let piece = m.extract_qty(4.0).unwrap();
        assert!((piece.quantity() + m.quantity() - 10.0).abs() <= EPS);
        assert_eq!(piece.comp().id(), comp_id);

        m.absorb(piece).unwrap();
        assert!((m.quantity() - 10.0).abs() <= EPS);
        assert_eq!(m.comp().id(), comp_id);
    }

    #[test]
    fn over_extraction_fails_without_mutation() {
        let mut m = Material::new(1.0, uox(), 0).unwrap();
        let id = m.id();
        let comp_id = m.comp().id();
        let err = m.extract_qty(1.0 + 2.0 * EPS_RSRC).unwrap_err();
        assert!(matches!(err, CoreError::Value(_)));
        assert_eq!(m.quantity(), 1.0);
        assert_eq!(m.id(), id);
        assert_eq!(m.comp().id(), comp_id);
    }

    #[test]
    fn exact_extraction_empties_the_source() {
        let mut m = Material::new(1.0, uox(), 0).unwrap();
        let piece = m.extract_qty(1.0).unwrap();
        assert_eq!(piece.quantity(), 1.0);
        assert_eq!(m.quantity(), 0.0);
    }

    #[test]
    fn extract_comp_reshapes_the_residual() {
        let mut m = Material::new(10.0, uox(), 0).unwrap();
        let wanted = pure_u235();
        let before = m.mass_vect();
        let piece = m.extract_comp(2.0, &wanted, EPS_RSRC).unwrap();
        assert_eq!(piece.quantity(), 2.0);
        assert_eq!(piece.comp().id(), wanted.id());
        // Residual keeps all the oxygen and the leftover uranium.
        let after = m.mass_vect();
        assert!((after[&o16()] - before[&o16()]).abs() <= 1e-9);
        assert!((after[&u235()] - (before[&u235()] - 2.0)).abs() <= 1e-9);
    }

    #[test]
    fn extract_comp_rejects_negative_residual() {
        let mut m = Material::new(1.0, uox(), 0).unwrap();
        // More U-235 than the material holds.
        let err = m.extract_comp(0.9, &pure_u235(), EPS_RSRC).unwrap_err();
        assert!(matches!(err, CoreError::Value(_)));
        assert_eq!(m.quantity(), 1.0);
    }

    #[test]
    fn absorb_merges_different_compositions_by_mass() {
        let mut m = Material::new(4.0, uox(), 0).unwrap();
        let other = Material::new(1.0, pure_u235(), 0).unwrap();
        m.absorb(other).unwrap();
        assert!((m.quantity() - 5.0).abs() <= EPS);
        let v = m.mass_vect();
        // 4 kg of UOX is ~3.54 kg U-235; plus 1 kg pure makes the uranium
        // dominate without losing the oxygen.
        assert!(v[&u235()] > 4.0);
        assert!(v[&o16()] > 0.0);
    }

    #[test]
    fn decay_shares_the_lineage_chain() {
        let engine = NullDecay;
        let comp = uox();
        let mut a = Material::new(1.0, Rc::clone(&comp), 0).unwrap();
        let mut b = Material::new(2.0, comp, 0).unwrap();
        a.decay(12, &engine);
        b.decay(12, &engine);
        assert_eq!(a.comp().id(), b.comp().id());
        // Staggered histories converge when the totals line up.
        a.decay(24, &engine);
        b.decay(18, &engine);
        b.decay(24, &engine);
        assert_eq!(a.comp().id(), b.comp().id());
    }

    #[test]
    fn decay_updates_identity() {
        let mut m = Material::new(1.0, uox(), 0).unwrap();
        let res_id = m.id();
        let comp_id = m.comp().id();
        m.decay(12, &NullDecay);
        assert_ne!(m.id(), res_id);
        assert_ne!(m.comp().id(), comp_id);
        // Re-decaying to the same time is a no-op.
        let stable = m.comp().id();
        m.decay(12, &NullDecay);
        assert_eq!(m.comp().id(), stable);
    }
}
