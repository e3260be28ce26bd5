//! Storage seam for hyphae and mycelia.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::ids::{HyphaId, IdSequence, MyceliumId};
use crate::mycelium::hypha::{Hypha, Mycelium};

pub trait RoutingRepository: Send + Sync {
    /// Store a new hypha built by `create` from a fresh id and attach it to
    /// its mycelium, creating the mycelium on first reference.
    fn insert_hypha(&self, create: &mut dyn FnMut(HyphaId) -> Hypha, now: DateTime<Utc>) -> Hypha;

    fn hypha(&self, id: HyphaId) -> Option<Hypha>;

    fn hypha_ids(&self) -> Vec<HyphaId>;

    fn hyphae(&self) -> Vec<Hypha>;

    /// Apply `update` atomically; returns the updated record.
    fn update_hypha(&self, id: HyphaId, update: &mut dyn FnMut(&mut Hypha)) -> Option<Hypha>;

    fn mycelium(&self, id: &MyceliumId) -> Option<Mycelium>;

    fn mycelia(&self) -> Vec<Mycelium>;
}

type Slot<T> = Arc<Mutex<T>>;

#[derive(Default)]
pub struct InMemoryRouting {
    hyphae: RwLock<BTreeMap<HyphaId, Slot<Hypha>>>,
    mycelia: RwLock<BTreeMap<MyceliumId, Mycelium>>,
    ids: IdSequence,
}

impl InMemoryRouting {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: HyphaId) -> Option<Slot<Hypha>> {
        self.hyphae.read().get(&id).cloned()
    }
}

impl RoutingRepository for InMemoryRouting {
    fn insert_hypha(&self, create: &mut dyn FnMut(HyphaId) -> Hypha, now: DateTime<Utc>) -> Hypha {
        let hypha = create(HyphaId(self.ids.next()));
        // Insert the hypha before the mycelium references it.
        self.hyphae
            .write()
            .insert(hypha.id, Arc::new(Mutex::new(hypha.clone())));
        self.mycelia
            .write()
            .entry(hypha.mycelium.clone())
            .or_insert_with(|| Mycelium {
                id: hypha.mycelium.clone(),
                hypha_ids: Vec::new(),
                created_at: now,
            })
            .hypha_ids
            .push(hypha.id);
        hypha
    }

    fn hypha(&self, id: HyphaId) -> Option<Hypha> {
        self.slot(id).map(|slot| slot.lock().clone())
    }

    fn hypha_ids(&self) -> Vec<HyphaId> {
        self.hyphae.read().keys().copied().collect()
    }

    fn hyphae(&self) -> Vec<Hypha> {
        let slots: Vec<Slot<Hypha>> = self.hyphae.read().values().cloned().collect();
        slots.iter().map(|slot| slot.lock().clone()).collect()
    }

    fn update_hypha(&self, id: HyphaId, update: &mut dyn FnMut(&mut Hypha)) -> Option<Hypha> {
        let slot = self.slot(id)?;
        let mut hypha = slot.lock();
        update(&mut hypha);
        Some(hypha.clone())
    }

    fn mycelium(&self, id: &MyceliumId) -> Option<Mycelium> {
        self.mycelia.read().get(id).cloned()
    }

    fn mycelia(&self) -> Vec<Mycelium> {
        self.mycelia.read().values().cloned().collect()
    }
}
