//! Generational-index arena for the agent tree.
//!
//! Back-references (parents, children, message paths) are [`AgentId`]
//! handles, never owners. Slots are reused; a handle to a removed agent
//! carries a stale generation and fails lookups with a key error.

use std::fmt;

use sim_core::{CoreError, Result};

use crate::agent::{AgentMeta, Model};

/// Handle to an agent slot: index plus generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AgentId {
    index: u32,
    generation: u32,
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

pub struct AgentEntry {
    pub meta: AgentMeta,
    /// Taken out while the agent's behavior is dispatched.
    model: Option<Box<dyn Model>>,
}

struct Slot {
    generation: u32,
    entry: Option<AgentEntry>,
}

/// Owns every agent in one simulation.
#[derive(Default)]
pub struct Arena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Arena {
    pub fn new() -> Arena {
        Arena::default()
    }

    pub fn insert(&mut self, meta: AgentMeta, model: Box<dyn Model>) -> AgentId {
        let entry = AgentEntry {
            meta,
            model: Some(model),
        };
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(entry);
                AgentId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(entry),
                });
                AgentId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn slot(&self, id: AgentId) -> Result<&Slot> {
        let slot = self
            .slots
            .get(id.index as usize)
            .ok_or_else(|| CoreError::key(format!("agent {id} does not exist")))?;
        if slot.generation != id.generation || slot.entry.is_none() {
            return Err(CoreError::key(format!("agent {id} no longer exists")));
        }
        Ok(slot)
    }

    fn slot_mut(&mut self, id: AgentId) -> Result<&mut Slot> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .ok_or_else(|| CoreError::key(format!("agent {id} does not exist")))?;
        if slot.generation != id.generation || slot.entry.is_none() {
            return Err(CoreError::key(format!("agent {id} no longer exists")));
        }
        Ok(slot)
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.slot(id).is_ok()
    }

    pub fn meta(&self, id: AgentId) -> Result<&AgentMeta> {
        self.slot(id)?
            .entry
            .as_ref()
            .map(|e| &e.meta)
            .ok_or_else(|| CoreError::key(format!("agent {id} no longer exists")))
    }

    pub fn meta_mut(&mut self, id: AgentId) -> Result<&mut AgentMeta> {
        self.slot_mut(id)?
            .entry
            .as_mut()
            .map(|e| &mut e.meta)
            .ok_or_else(|| CoreError::key(format!("agent {id} no longer exists")))
    }

    /// Takes the agent's behavior out for dispatch. Fails with a state
    /// error if it is already out (reentrant dispatch on one agent).
    pub fn take_model(&mut self, id: AgentId) -> Result<Box<dyn Model>> {
        let slot = self.slot_mut(id)?;
        let entry = slot
            .entry
            .as_mut()
            .ok_or_else(|| CoreError::key(format!("agent {id} no longer exists")))?;
        entry.model.take().ok_or_else(|| {
            CoreError::state(format!("agent {id} is already being dispatched"))
        })
    }

    /// Returns a behavior taken with [`take_model`]. If the agent was
    /// removed while dispatched, the behavior is dropped.
    ///
    /// [`take_model`]: Arena::take_model
    pub fn put_model(&mut self, id: AgentId, model: Box<dyn Model>) {
        if let Ok(slot) = self.slot_mut(id) {
            if let Some(entry) = slot.entry.as_mut() {
                entry.model = Some(model);
            }
        }
    }

    /// Read-only access to a behavior that is not currently dispatched.
    pub fn peek_model<R>(&self, id: AgentId, f: impl FnOnce(&dyn Model) -> R) -> Result<R> {
        let entry = self
            .slot(id)?
            .entry
            .as_ref()
            .ok_or_else(|| CoreError::key(format!("agent {id} no longer exists")))?;
        let model = entry.model.as_deref().ok_or_else(|| {
            CoreError::state(format!("agent {id} is currently being dispatched"))
        })?;
        Ok(f(model))
    }

    pub fn remove(&mut self, id: AgentId) -> Result<AgentEntry> {
        let slot = self.slot_mut(id)?;
        let entry = slot
            .entry
            .take()
            .ok_or_else(|| CoreError::key(format!("agent {id} no longer exists")))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Ok(entry)
    }

    /// Live agent ids in slot order.
    pub fn ids(&self) -> Vec<AgentId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.entry.is_some())
            .map(|(i, s)| AgentId {
                index: i as u32,
                generation: s.generation,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentKind;
    use crate::region::RegionModel;

    fn meta(name: &str) -> AgentMeta {
        AgentMeta::new(name, AgentKind::Region, "Region")
    }

    fn model() -> Box<dyn Model> {
        Box::new(RegionModel::new(Vec::<String>::new()))
    }

    #[test]
    fn stale_handles_fail_with_key_errors() {
        let mut arena = Arena::new();
        let id = arena.insert(meta("a"), model());
        assert!(arena.contains(id));
        arena.remove(id).unwrap();
        assert!(!arena.contains(id));
        assert!(matches!(arena.meta(id), Err(CoreError::Key(_))));

        // The slot is reused under a new generation; the old handle stays
        // dead.
        let id2 = arena.insert(meta("b"), model());
        assert_ne!(id, id2);
        assert!(arena.contains(id2));
        assert!(matches!(arena.meta(id), Err(CoreError::Key(_))));
    }

    #[test]
    fn double_dispatch_is_a_state_error() {
        let mut arena = Arena::new();
        let id = arena.insert(meta("a"), model());
        let m = arena.take_model(id).unwrap();
        assert!(matches!(arena.take_model(id), Err(CoreError::State(_))));
        arena.put_model(id, m);
        assert!(arena.take_model(id).is_ok());
    }
}
