//! Immutable nuclide compositions with memoized decay chains.

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::compmath;
use crate::error::{CoreError, Result};
use crate::nuclide::{MassTable, NucId};

/// A raw nuclide-to-quantity vector. Scale is arbitrary; compositions
/// normalize on construction.
pub type CompVec = BTreeMap<NucId, f64>;

/// Process-unique composition identifier. Two compositions built from the
/// same vector still receive distinct ids; equality is by id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CompId(pub u32);

static NEXT_ID: AtomicU32 = AtomicU32::new(0);

impl CompId {
    fn next() -> CompId {
        CompId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

const MONTHS_PER_YEAR: f64 = 12.0;

/// Chain of compositions decayed from a common root ancestor, keyed by the
/// total decay duration in months from that ancestor.
type DecayChain = BTreeMap<u32, Rc<Composition>>;

/// Solves nuclide decay. The production engine is an external collaborator;
/// [`NullDecay`] and [`SimpleDecay`] ship for tests and reference runs.
pub trait DecayEngine {
    /// Decays `atoms` (arbitrary normalization) over `years`, returning the
    /// resulting atom vector.
    fn decay(&self, atoms: &CompVec, years: f64) -> CompVec;
}

/// Identity engine: nothing decays.
pub struct NullDecay;

impl DecayEngine for NullDecay {
    fn decay(&self, atoms: &CompVec, _years: f64) -> CompVec {
        atoms.clone()
    }
}

/// Exponential single-step decay over a table of half-lives. Daughters
/// beyond the first step are not tracked; activity that leaves the table is
/// dropped. Good enough to make decay observable end to end.
pub struct SimpleDecay {
    half_lives: BTreeMap<NucId, (f64, Option<NucId>)>,
}

impl SimpleDecay {
    pub fn new() -> SimpleDecay {
        let z = NucId::from_zam;
        let entries = [
            (z(1, 3, 0), 12.32, Some(z(2, 3, 0))),
            (z(36, 85, 0), 10.74, Some(z(37, 85, 0))),
            (z(38, 90, 0), 28.79, Some(z(39, 90, 0))),
            (z(55, 137, 0), 30.08, Some(z(56, 137, 0))),
            (z(92, 235, 0), 7.04e8, Some(z(90, 231, 0))),
            (z(92, 238, 0), 4.468e9, Some(z(90, 234, 0))),
            (z(94, 239, 0), 2.411e4, Some(z(92, 235, 0))),
            (z(94, 241, 0), 14.29, Some(z(95, 241, 0))),
            (z(95, 241, 0), 432.6, Some(z(93, 237, 0))),
            (z(96, 244, 0), 18.1, Some(z(94, 240, 0))),
        ];
        SimpleDecay {
            half_lives: entries
                .iter()
                .map(|&(nuc, t, d)| (nuc, (t, d)))
                .collect(),
        }
    }

    /// Adds or overrides a decay entry.
    pub fn with_nuclide(
        mut self,
        parent: NucId,
        half_life_years: f64,
        daughter: Option<NucId>,
    ) -> SimpleDecay {
        self.half_lives.insert(parent, (half_life_years, daughter));
        self
    }
}

impl Default for SimpleDecay {
    fn default() -> Self {
        SimpleDecay::new()
    }
}

impl DecayEngine for SimpleDecay {
    fn decay(&self, atoms: &CompVec, years: f64) -> CompVec {
        let mut out = CompVec::new();
        for (nuc, n0) in atoms {
            match self.half_lives.get(nuc) {
                Some((t_half, daughter)) => {
                    let remaining = n0 * 0.5f64.powf(years / t_half);
                    *out.entry(*nuc).or_insert(0.0) += remaining;
                    if let Some(d) = daughter {
                        *out.entry(*d).or_insert(0.0) += n0 - remaining;
                    }
                }
                None => {
                    *out.entry(*nuc).or_insert(0.0) += n0;
                }
            }
        }
        out
    }
}

/// An immutable nuclide composition.
///
/// Holds the normalized vector in both atom and mass bases, each computed
/// lazily from the other via the mass table. Every composition belongs to a
/// decay lineage: decaying it memoizes the result in a chain shared by the
/// whole lineage, keyed by total elapsed months from the root ancestor, so
/// identical `(ancestor, total)` queries return the same object.
pub struct Composition {
    id: CompId,
    atom: OnceCell<CompVec>,
    mass: OnceCell<CompVec>,
    /// Total months this composition has been decayed from its root.
    prev_decay: u32,
    /// Shared by the lineage; entries keep each other alive for its
    /// lifetime.
    chain: Rc<RefCell<DecayChain>>,
    recorded: Cell<bool>,
}

impl Composition {
    /// Builds a composition from atom-based ratios. The vector need not be
    /// normalized to any particular value.
    pub fn from_atom(mut v: CompVec) -> Result<Rc<Composition>> {
        Composition::validate(&v)?;
        compmath::normalize(&mut v, 1.0);
        let atom = OnceCell::new();
        let _ = atom.set(v);
        Ok(Rc::new(Composition {
            id: CompId::next(),
            atom,
            mass: OnceCell::new(),
            prev_decay: 0,
            chain: Rc::new(RefCell::new(DecayChain::new())),
            recorded: Cell::new(false),
        }))
    }

    /// Builds a composition from mass-based ratios. The vector need not be
    /// normalized to any particular value.
    pub fn from_mass(mut v: CompVec) -> Result<Rc<Composition>> {
        Composition::validate(&v)?;
        compmath::normalize(&mut v, 1.0);
        let mass = OnceCell::new();
        let _ = mass.set(v);
        Ok(Rc::new(Composition {
            id: CompId::next(),
            atom: OnceCell::new(),
            mass,
            prev_decay: 0,
            chain: Rc::new(RefCell::new(DecayChain::new())),
            recorded: Cell::new(false),
        }))
    }

    fn validate(v: &CompVec) -> Result<()> {
        if !compmath::valid_nuclides(v) || !compmath::all_positive(v) {
            return Err(CoreError::value(
                "invalid nuclide or negative quantity in composition vector",
            ));
        }
        Ok(())
    }

    pub fn id(&self) -> CompId {
        self.id
    }

    /// The normalized atom-based vector.
    pub fn atom(&self) -> &CompVec {
        self.atom.get_or_init(|| {
            let table = MassTable::global();
            let mass = self.mass.get().cloned().unwrap_or_default();
            let mut v = CompVec::new();
            for (nuc, qty) in &mass {
                v.insert(*nuc, qty / table.grams_per_mol_of_valid(*nuc));
            }
            compmath::normalize(&mut v, 1.0);
            v
        })
    }

    /// The normalized mass-based vector.
    pub fn mass(&self) -> &CompVec {
        self.mass.get_or_init(|| {
            let table = MassTable::global();
            let atom = self.atom.get().cloned().unwrap_or_default();
            let mut v = CompVec::new();
            for (nuc, qty) in &atom {
                v.insert(*nuc, qty * table.grams_per_mol_of_valid(*nuc));
            }
            compmath::normalize(&mut v, 1.0);
            v
        })
    }

    /// Returns this composition decayed by `dt` months. The receiver is
    /// unchanged. Results are memoized in the lineage's chain under the
    /// total elapsed duration from the root ancestor, never the delta.
    pub fn decay(self: &Rc<Self>, dt: u32, engine: &dyn DecayEngine) -> Rc<Composition> {
        if dt == 0 {
            return Rc::clone(self);
        }
        let total = self.prev_decay + dt;
        if let Some(hit) = self.chain.borrow().get(&total) {
            return Rc::clone(hit);
        }
        self.new_decay(dt, engine)
    }

    fn new_decay(self: &Rc<Self>, dt: u32, engine: &dyn DecayEngine) -> Rc<Composition> {
        let total = self.prev_decay + dt;
        let years = dt as f64 / MONTHS_PER_YEAR;
        let mut atoms = engine.decay(self.atom(), years);
        compmath::normalize(&mut atoms, 1.0);

        let atom = OnceCell::new();
        let _ = atom.set(atoms);
        let decayed = Rc::new(Composition {
            id: CompId::next(),
            atom,
            mass: OnceCell::new(),
            prev_decay: total,
            chain: Rc::clone(&self.chain),
            recorded: Cell::new(false),
        });
        self.chain
            .borrow_mut()
            .insert(total, Rc::clone(&decayed));
        decayed
    }

    /// Whether this composition's rows have been written to the sink.
    pub fn is_recorded(&self) -> bool {
        self.recorded.get()
    }

    /// Marks this composition as written; rows are emitted at most once.
    pub fn mark_recorded(&self) {
        self.recorded.set(true);
    }
}

impl PartialEq for Composition {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Composition {}

impl fmt::Debug for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composition")
            .field("id", &self.id)
            .field("prev_decay", &self.prev_decay)
            .finish()
    }
}
