//! Nuclide identifiers and the process-wide molar mass table.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Nuclide identifier in `ZZZAAASSSS` form: atomic number, mass number, and
/// isomeric state packed into one integer, e.g. U-235 is `922350000`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NucId(pub u32);

impl NucId {
    /// Builds an id from atomic number, mass number, and isomeric state.
    pub fn from_zam(z: u32, a: u32, meta: u32) -> NucId {
        NucId(z * 10_000_000 + a * 10_000 + meta)
    }

    /// Atomic number (element).
    pub fn z(&self) -> u32 {
        self.0 / 10_000_000
    }

    /// Mass number.
    pub fn a(&self) -> u32 {
        (self.0 / 10_000) % 1000
    }

    /// Isomeric state (0 = ground).
    pub fn meta(&self) -> u32 {
        self.0 % 10_000
    }
}

impl fmt::Display for NucId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Measured atomic masses (g/mol) for nuclides commonly tracked in fuel
/// cycle studies, as (z, a, grams_per_mol). Nuclides outside this list fall
/// back to their mass number.
const MEASURED_MASSES: &[(u32, u32, f64)] = &[
    (1, 1, 1.00783),
    (1, 2, 2.01410),
    (1, 3, 3.01605),
    (2, 4, 4.00260),
    (3, 6, 6.01512),
    (3, 7, 7.01600),
    (5, 10, 10.01294),
    (6, 12, 12.00000),
    (7, 14, 14.00307),
    (8, 16, 15.99491),
    (8, 17, 16.99913),
    (9, 19, 18.99840),
    (11, 23, 22.98977),
    (13, 27, 26.98154),
    (14, 28, 27.97693),
    (17, 35, 34.96885),
    (20, 40, 39.96259),
    (26, 56, 55.93494),
    (27, 59, 58.93320),
    (28, 58, 57.93534),
    (36, 85, 84.91253),
    (38, 90, 89.90773),
    (40, 90, 89.90470),
    (40, 93, 92.90647),
    (42, 95, 94.90584),
    (43, 99, 98.90625),
    (44, 101, 100.90558),
    (46, 105, 104.90508),
    (47, 109, 108.90476),
    (53, 129, 128.90498),
    (53, 131, 130.90613),
    (54, 131, 130.90508),
    (54, 135, 134.90722),
    (55, 133, 132.90545),
    (55, 135, 134.90598),
    (55, 137, 136.90709),
    (56, 138, 137.90525),
    (60, 143, 142.90982),
    (60, 145, 144.91258),
    (62, 149, 148.91719),
    (62, 151, 150.91993),
    (63, 153, 152.92124),
    (64, 155, 154.92263),
    (64, 157, 156.92397),
    (82, 206, 205.97446),
    (82, 207, 206.97590),
    (82, 208, 207.97665),
    (83, 209, 208.98040),
    (86, 222, 222.01758),
    (88, 226, 226.02541),
    (90, 230, 230.03313),
    (90, 232, 232.03806),
    (91, 231, 231.03588),
    (91, 233, 233.04025),
    (92, 232, 232.03716),
    (92, 233, 233.03964),
    (92, 234, 234.04095),
    (92, 235, 235.04393),
    (92, 236, 236.04557),
    (92, 238, 238.05079),
    (93, 237, 237.04817),
    (94, 238, 238.04956),
    (94, 239, 239.05216),
    (94, 240, 240.05381),
    (94, 241, 241.05685),
    (94, 242, 242.05874),
    (95, 241, 241.05683),
    (95, 243, 243.06138),
    (96, 244, 244.06275),
    (96, 245, 245.06549),
];

/// Read-only mapping from nuclide to grams per mol, loaded once per
/// process. The table doubles as the validity oracle for nuclide ids.
pub struct MassTable {
    measured: BTreeMap<(u32, u32), f64>,
}

static GLOBAL: OnceLock<MassTable> = OnceLock::new();

impl MassTable {
    fn load() -> MassTable {
        let measured = MEASURED_MASSES
            .iter()
            .map(|&(z, a, g)| ((z, a), g))
            .collect();
        MassTable { measured }
    }

    /// The process-wide table.
    pub fn global() -> &'static MassTable {
        GLOBAL.get_or_init(MassTable::load)
    }

    /// Whether `nuc` names a physically meaningful nuclide.
    pub fn contains(&self, nuc: NucId) -> bool {
        let (z, a) = (nuc.z(), nuc.a());
        (1..=118).contains(&z) && a >= z && a <= 300
    }

    /// Grams per mol for `nuc`. Falls back to the mass number for valid
    /// nuclides without a measured entry.
    pub fn grams_per_mol(&self, nuc: NucId) -> Result<f64> {
        if !self.contains(nuc) {
            return Err(CoreError::value(format!("invalid nuclide id {nuc}")));
        }
        Ok(self.grams_per_mol_of_valid(nuc))
    }

    /// Infallible lookup for ids already validated with [`contains`].
    ///
    /// [`contains`]: MassTable::contains
    pub(crate) fn grams_per_mol_of_valid(&self, nuc: NucId) -> f64 {
        self.measured
            .get(&(nuc.z(), nuc.a()))
            .copied()
            .unwrap_or(nuc.a() as f64)
    }
}
