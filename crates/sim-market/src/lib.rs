#![deny(warnings)]

//! Per-commodity matching of offers against requests.
//!
//! The engine is pure: the runtime's market agent snapshots its message
//! books into [`BookEntry`] values, calls [`resolve`], and turns the
//! returned matches into downward orders. Quantities compare against the
//! shared resource epsilon; ties in quantity resolve by insertion order.

use serde::{Deserialize, Serialize};
use tracing::debug;

use sim_core::EPS_RSRC;

/// How a commodity's market treats requests it cannot satisfy in full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// Requests may be partially fulfilled (the null variant).
    #[default]
    Partial,
    /// Partially satisfiable requests are rejected whole (the greedy
    /// variant).
    AllOrNothing,
}

/// One side of a book: an offer or a request, keyed by an opaque caller
/// token (the runtime uses message indices).
#[derive(Clone, Debug, PartialEq)]
pub struct BookEntry {
    pub key: usize,
    pub qty: f64,
    pub units: String,
    pub quality: String,
}

/// A firm match between one request and one offer for `qty`.
#[derive(Clone, Debug, PartialEq)]
pub struct Match {
    pub request: usize,
    pub offer: usize,
    pub qty: f64,
}

/// The outcome of one resolution pass.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    /// Firm matches, in commit order.
    pub matches: Vec<Match>,
    /// Requests that produced no order at all.
    pub rejected: Vec<usize>,
    /// Offers surviving the pass in book order, including residual splits
    /// re-injected at the back. These carry to the next resolution.
    pub leftovers: Vec<BookEntry>,
}

/// Whether `offer` can serve `request`: units must agree, and a request
/// with a declared quality only accepts offers of that quality.
pub fn quality_ok(offer: &BookEntry, request: &BookEntry) -> bool {
    offer.units == request.units
        && (request.quality.is_empty() || offer.quality == request.quality)
}

struct Slot {
    entry: BookEntry,
    alive: bool,
}

fn largest_alive(pool: &[Slot], blocked: &[usize]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, slot) in pool.iter().enumerate() {
        if !slot.alive || blocked.contains(&i) {
            continue;
        }
        // Strict comparison keeps the earliest entry on ties.
        if best.map_or(true, |b| slot.entry.qty > pool[b].entry.qty) {
            best = Some(i);
        }
    }
    best
}

/// Matches `offers` against `requests`, greedily and size-descending.
///
/// Requests are taken largest first. Each is served from the largest
/// eligible offers; an offer larger than the outstanding amount is split,
/// with any residual above epsilon pushed back into the pool as a fresh
/// offer. Under [`MatchPolicy::AllOrNothing`] a request that cannot be
/// fully covered rolls back its tentative orders and releases its offers;
/// under [`MatchPolicy::Partial`] whatever was covered stands.
pub fn resolve(offers: Vec<BookEntry>, requests: Vec<BookEntry>, policy: MatchPolicy) -> Resolution {
    let mut pool: Vec<Slot> = offers
        .into_iter()
        .map(|entry| Slot { entry, alive: true })
        .collect();

    let mut reqs = requests;
    reqs.sort_by(|a, b| b.qty.partial_cmp(&a.qty).unwrap_or(std::cmp::Ordering::Equal));

    let mut matches = Vec::new();
    let mut rejected = Vec::new();

    for req in reqs {
        let base_len = pool.len();
        let mut deadened: Vec<usize> = Vec::new();
        let mut blocked: Vec<usize> = Vec::new();
        let mut tentative: Vec<Match> = Vec::new();
        let mut remaining = req.qty;

        while remaining > EPS_RSRC {
            let Some(i) = largest_alive(&pool, &blocked) else {
                break;
            };
            if !quality_ok(&pool[i].entry, &req) {
                // Out of consideration for this request only.
                blocked.push(i);
                continue;
            }

            let offer_qty = pool[i].entry.qty;
            if remaining - offer_qty > EPS_RSRC {
                tentative.push(Match {
                    request: req.key,
                    offer: pool[i].entry.key,
                    qty: offer_qty,
                });
                pool[i].alive = false;
                deadened.push(i);
                remaining -= offer_qty;
            } else {
                // The offer covers the remainder; split off any residual.
                tentative.push(Match {
                    request: req.key,
                    offer: pool[i].entry.key,
                    qty: remaining,
                });
                let residual = offer_qty - remaining;
                pool[i].alive = false;
                deadened.push(i);
                if residual > EPS_RSRC {
                    let fresh = BookEntry {
                        qty: residual,
                        ..pool[i].entry.clone()
                    };
                    debug!(key = fresh.key, qty = residual, "re-injecting residual offer");
                    pool.push(Slot {
                        entry: fresh,
                        alive: true,
                    });
                }
                remaining = 0.0;
            }
        }

        let satisfied = remaining <= EPS_RSRC;
        let commit = satisfied || (policy == MatchPolicy::Partial && !tentative.is_empty());
        if commit {
            debug!(request = req.key, orders = tentative.len(), "request matched");
            matches.append(&mut tentative);
        } else {
            // Roll back: revive consumed offers, drop tentative residuals.
            for i in deadened {
                pool[i].alive = true;
            }
            pool.truncate(base_len);
        }
        if !satisfied && !commit {
            debug!(request = req.key, unmet = remaining, "request rejected");
            rejected.push(req.key);
        }
    }

    let leftovers = pool
        .into_iter()
        .filter(|s| s.alive)
        .map(|s| s.entry)
        .collect();

    Resolution {
        matches,
        rejected,
        leftovers,
    }
}
