use std::rc::Rc;

use glink_core::{PerStage, StageKind};

use crate::key::StageTuple;
use crate::stage::Stage;

/// The stage currently selected for each slot.
#[derive(Debug, Default)]
pub struct ActiveStageSet {
    slots: PerStage<Option<Rc<Stage>>>,
}

impl ActiveStageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put `stage` in `kind`'s slot. Returns `false` if the slot already
    /// held that exact stage, in which case nothing changed.
    pub fn set_stage(&mut self, kind: StageKind, stage: Option<Rc<Stage>>) -> bool {
        let slot = &mut self.slots[kind];
        let unchanged = match (slot.as_ref(), stage.as_ref()) {
            (Some(current), Some(new)) => Rc::ptr_eq(current, new),
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            *slot = stage;
        }
        !unchanged
    }

    pub fn get(&self, kind: StageKind) -> Option<&Rc<Stage>> {
        self.slots[kind].as_ref()
    }

    pub fn stages(&self) -> &PerStage<Option<Rc<Stage>>> {
        &self.slots
    }

    pub fn tuple(&self) -> StageTuple {
        StageTuple::new(self.slots.map(|_, slot| slot.as_ref().map(|s| s.id())))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots = PerStage::default();
    }
}
