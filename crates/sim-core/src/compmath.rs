//! Pure arithmetic over raw nuclide vectors.
//!
//! These functions operate on unnormalized `CompVec` maps and never touch
//! composition identity; callers build new [`Composition`]s from the
//! results when identity matters.
//!
//! [`Composition`]: crate::composition::Composition

use crate::arith::kahan_sum;
use crate::composition::CompVec;
use crate::error::{CoreError, Result};
use crate::nuclide::MassTable;

/// Entry-wise sum of two nuclide vectors.
pub fn add(v1: &CompVec, v2: &CompVec) -> CompVec {
    let mut out = v1.clone();
    for (nuc, qty) in v2 {
        *out.entry(*nuc).or_insert(0.0) += qty;
    }
    out
}

/// Entry-wise difference `v1 - v2`.
pub fn sub(v1: &CompVec, v2: &CompVec) -> CompVec {
    let mut out = v1.clone();
    for (nuc, qty) in v2 {
        *out.entry(*nuc).or_insert(0.0) -= qty;
    }
    out
}

/// Erases entries whose magnitude is at most `threshold`.
pub fn apply_threshold(v: &mut CompVec, threshold: f64) -> Result<()> {
    if threshold < 0.0 {
        return Err(CoreError::value(format!(
            "the threshold cannot be negative; the value provided was {threshold}"
        )));
    }
    v.retain(|_, qty| qty.abs() > threshold);
    Ok(())
}

/// Scales `v` so its Kahan-compensated sum equals `val`. Zero vectors are
/// left unchanged.
pub fn normalize(v: &mut CompVec, val: f64) {
    let sum = kahan_sum(v.values().copied().collect());
    if sum != val && sum != 0.0 {
        for qty in v.values_mut() {
            *qty = *qty / sum * val;
        }
    }
}

/// Whether every nuclide in `v` is present in the mass table.
pub fn valid_nuclides(v: &CompVec) -> bool {
    let table = MassTable::global();
    v.keys().all(|nuc| table.contains(*nuc))
}

/// Whether every entry in `v` is nonnegative.
pub fn all_positive(v: &CompVec) -> bool {
    v.values().all(|qty| *qty >= 0.0)
}

/// Relative equality test: vectors must have identical nuclide sets and each
/// entry must differ by at most `threshold` times the entry magnitude.
/// Matching zero entries count as equal.
pub fn almost_eq(v1: &CompVec, v2: &CompVec, threshold: f64) -> Result<bool> {
    if threshold < 0.0 {
        return Err(CoreError::value(format!(
            "the threshold cannot be negative; the value provided was {threshold}"
        )));
    }

    if v1.len() != v2.len() {
        return Ok(false);
    }

    for (nuc, a) in v1 {
        let b = match v2.get(nuc) {
            Some(b) => *b,
            None => return Ok(false),
        };
        let diff = (b - *a).abs();
        if a.abs() == 0.0 || b.abs() == 0.0 {
            // A zero entry only matches another zero.
            if diff > diff * threshold {
                return Ok(false);
            }
        } else if diff > a.abs() * threshold || diff > b.abs() * threshold {
            return Ok(false);
        }
    }
    Ok(true)
}
