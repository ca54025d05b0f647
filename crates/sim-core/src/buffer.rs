//! Capacity-bounded containers of resources.
//!
//! Buffers provide semi-automated management of facility stocks and
//! inventories. Popping occurs in the order resources were pushed (oldest
//! first), and the cached total quantity is recomputed with a Kahan sum
//! after every mutation.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use tracing::debug;

use crate::arith::{kahan_sum, EPS_RSRC};
use crate::composition::DecayEngine;
use crate::error::{CoreError, Result};
use crate::resource::Resource;

/// An ordered, capacity-bounded sequence of resources.
///
/// A default-constructed buffer has zero (finite) capacity. Resources are
/// never combined in the store; duplicate ids are rejected.
#[derive(Debug, Default)]
pub struct ResourceBuffer {
    capacity: f64,
    qty: f64,
    rsrcs: VecDeque<Resource>,
    present: BTreeSet<u32>,
}

impl ResourceBuffer {
    pub fn new() -> ResourceBuffer {
        ResourceBuffer::default()
    }

    pub fn with_capacity(capacity: f64) -> Result<ResourceBuffer> {
        let mut buf = ResourceBuffer::new();
        buf.set_capacity(capacity)?;
        Ok(buf)
    }

    /// Maximum total quantity this buffer can hold.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Sets the capacity. Fails if the new capacity is lower, beyond
    /// epsilon, than the quantity already stored.
    pub fn set_capacity(&mut self, capacity: f64) -> Result<()> {
        if capacity < 0.0 {
            return Err(CoreError::value(format!(
                "cannot set a negative capacity {capacity}"
            )));
        }
        if self.qty - capacity > EPS_RSRC {
            return Err(CoreError::value(format!(
                "new capacity {capacity} is below the stored quantity {}",
                self.qty
            )));
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Total stored quantity, maintained by Kahan summation.
    pub fn quantity(&self) -> f64 {
        self.qty
    }

    /// Number of constituent resource objects.
    pub fn count(&self) -> usize {
        self.rsrcs.len()
    }

    /// Remaining room: capacity minus quantity.
    pub fn space(&self) -> f64 {
        self.capacity - self.qty
    }

    pub fn is_empty(&self) -> bool {
        self.rsrcs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.rsrcs.iter()
    }

    /// Pushes one resource. Fails on over-capacity and on a duplicate
    /// resource id; the buffer is unchanged on failure.
    pub fn push(&mut self, rsrc: Resource) -> Result<()> {
        if rsrc.quantity() + self.qty > self.capacity + EPS_RSRC {
            return Err(CoreError::value(format!(
                "pushing {} {} would exceed the capacity of {}",
                rsrc.quantity(),
                rsrc.units(),
                self.capacity
            )));
        }
        if self.present.contains(&rsrc.res_id().0) {
            return Err(CoreError::value(format!(
                "resource id {} is already present in the buffer",
                rsrc.res_id().0
            )));
        }
        debug!(qty = rsrc.quantity(), total = self.qty, "buffer push");
        self.rsrcs.push_back(rsrc);
        self.refresh();
        Ok(())
    }

    /// Pushes several resources all-or-nothing: if any would overflow the
    /// capacity or duplicate an id, none are pushed.
    pub fn push_all(&mut self, rsrcs: Vec<Resource>) -> Result<()> {
        let total: f64 = kahan_sum(rsrcs.iter().map(Resource::quantity).collect());
        if total + self.qty > self.capacity + EPS_RSRC {
            return Err(CoreError::value(format!(
                "pushing {total} would exceed the capacity of {}",
                self.capacity
            )));
        }
        let mut seen = self.present.clone();
        for r in &rsrcs {
            if !seen.insert(r.res_id().0) {
                return Err(CoreError::value(format!(
                    "resource id {} is already present in the buffer",
                    r.res_id().0
                )));
            }
        }
        self.rsrcs.extend(rsrcs);
        self.refresh();
        Ok(())
    }

    /// Pops exactly `qty`, oldest first, splitting the last resource if
    /// needed. When the outstanding amount matches the head within epsilon
    /// the head is returned whole, never split. Fails, changing nothing,
    /// if `qty` exceeds the stored quantity beyond epsilon.
    pub fn pop_qty(&mut self, qty: f64) -> Result<Vec<Resource>> {
        if qty - self.qty > EPS_RSRC {
            return Err(CoreError::value(format!(
                "cannot pop {qty} from a buffer holding {}",
                self.qty
            )));
        }
        let mut out = Vec::new();
        let mut left = qty;
        while left > EPS_RSRC {
            let head_qty = match self.rsrcs.front() {
                Some(r) => r.quantity(),
                None => break,
            };
            if (left - head_qty).abs() <= EPS_RSRC || head_qty < left {
                // Head satisfies (or is consumed by) the remainder whole.
                let r = self.rsrcs.pop_front().unwrap_or_else(|| unreachable!());
                out.push(r);
                left -= head_qty;
            } else {
                let head = match self.rsrcs.front_mut() {
                    Some(r) => r,
                    None => break,
                };
                out.push(head.extract(left)?);
                left = 0.0;
            }
        }
        self.refresh();
        debug!(qty, popped = out.len(), left = self.qty, "buffer pop");
        Ok(out)
    }

    /// Pops `num` whole resources, oldest first. Fails if fewer are stored.
    pub fn pop_n(&mut self, num: usize) -> Result<Vec<Resource>> {
        if num > self.rsrcs.len() {
            return Err(CoreError::value(format!(
                "cannot pop {num} resources from a buffer holding {}",
                self.rsrcs.len()
            )));
        }
        let out: Vec<Resource> = self.rsrcs.drain(..num).collect();
        self.refresh();
        Ok(out)
    }

    /// Pops the oldest resource whole.
    pub fn pop(&mut self) -> Result<Resource> {
        let r = self
            .rsrcs
            .pop_front()
            .ok_or_else(|| CoreError::value("cannot pop from an empty buffer"))?;
        self.refresh();
        Ok(r)
    }

    /// Pops the newest resource whole.
    pub fn pop_back(&mut self) -> Result<Resource> {
        let r = self
            .rsrcs
            .pop_back()
            .ok_or_else(|| CoreError::value("cannot pop from an empty buffer"))?;
        self.refresh();
        Ok(r)
    }

    /// Decays every material in place up to simulation time `time`.
    pub fn decay_all(&mut self, time: i32, engine: &dyn DecayEngine) {
        for r in self.rsrcs.iter_mut() {
            if let Resource::Material(m) = r {
                m.decay(time, engine);
            }
        }
        // Transmutation bumps ids and can shift masses.
        self.refresh();
    }

    fn refresh(&mut self) {
        self.qty = kahan_sum(self.rsrcs.iter().map(Resource::quantity).collect());
        self.present = self.rsrcs.iter().map(|r| r.res_id().0).collect();
    }
}

/// A keyed, capacity-bounded mapping from caller-chosen keys to resources.
///
/// The total quantity is cached behind a dirty flag: mutable access to a
/// stored resource invalidates the cache, and the next read recomputes it
/// with a Kahan sum.
pub struct ResourceMap<K> {
    capacity: f64,
    qty: f64,
    dirty: bool,
    rsrcs: BTreeMap<K, Resource>,
}

impl<K: Ord + Clone + fmt::Debug> ResourceMap<K> {
    pub fn new() -> ResourceMap<K> {
        ResourceMap {
            capacity: 0.0,
            qty: 0.0,
            dirty: false,
            rsrcs: BTreeMap::new(),
        }
    }

    pub fn with_capacity(capacity: f64) -> Result<ResourceMap<K>> {
        let mut map = ResourceMap::new();
        map.set_capacity(capacity)?;
        Ok(map)
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: f64) -> Result<()> {
        if capacity < 0.0 {
            return Err(CoreError::value(format!(
                "cannot set a negative capacity {capacity}"
            )));
        }
        if self.quantity() - capacity > EPS_RSRC {
            return Err(CoreError::value(format!(
                "new capacity {capacity} is below the stored quantity {}",
                self.qty
            )));
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Total stored quantity, recomputed if a mutable borrow dirtied it.
    pub fn quantity(&mut self) -> f64 {
        if self.dirty {
            self.qty = kahan_sum(self.rsrcs.values().map(Resource::quantity).collect());
            self.dirty = false;
        }
        self.qty
    }

    pub fn count(&self) -> usize {
        self.rsrcs.len()
    }

    pub fn space(&mut self) -> f64 {
        self.capacity - self.quantity()
    }

    pub fn is_empty(&self) -> bool {
        self.rsrcs.is_empty()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.rsrcs.contains_key(key)
    }

    /// Inserts a resource under `key`. Fails on over-capacity, an occupied
    /// key, or a duplicate resource id.
    pub fn insert(&mut self, key: K, rsrc: Resource) -> Result<()> {
        if rsrc.quantity() + self.quantity() > self.capacity + EPS_RSRC {
            return Err(CoreError::value(format!(
                "inserting {} {} would exceed the capacity of {}",
                rsrc.quantity(),
                rsrc.units(),
                self.capacity
            )));
        }
        if self.rsrcs.contains_key(&key) {
            return Err(CoreError::value(format!(
                "key {key:?} is already present in the map"
            )));
        }
        if self.rsrcs.values().any(|r| r.res_id() == rsrc.res_id()) {
            return Err(CoreError::value(format!(
                "resource id {} is already present in the map",
                rsrc.res_id().0
            )));
        }
        self.qty += rsrc.quantity();
        self.rsrcs.insert(key, rsrc);
        Ok(())
    }

    /// Removes and returns the resource under `key`.
    pub fn remove(&mut self, key: &K) -> Result<Resource> {
        let r = self
            .rsrcs
            .remove(key)
            .ok_or_else(|| CoreError::key(format!("no resource under key {key:?}")))?;
        self.dirty = true;
        Ok(r)
    }

    pub fn get(&self, key: &K) -> Option<&Resource> {
        self.rsrcs.get(key)
    }

    /// Mutable access dirties the cached quantity.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut Resource> {
        self.dirty = true;
        self.rsrcs.get_mut(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.rsrcs.keys()
    }
}

impl<K: Ord + Clone + fmt::Debug> Default for ResourceMap<K> {
    fn default() -> Self {
        ResourceMap::new()
    }
}
