//! Per-worker model slot registry
//!
//! Every model a worker advertises at registration becomes one slot with a
//! busy/free state. Acquisition is compare-and-set under the table lock so
//! two dispatches can never win the same free slot; release is idempotent
//! because it runs on every exit path — completion, error, timeout, and
//! forced removal of the whole worker.

use modelgrid_proto::ModelDescriptor;
use parking_lot::Mutex;

/// One worker-hosted model instance with a busy/free state.
#[derive(Debug, Clone)]
pub struct ModelSlot {
    pub descriptor: ModelDescriptor,
    pub busy: bool,
}

/// Slot table for one worker. The slot set is fixed at registration; a
/// worker with a changed model set re-registers as a new worker.
#[derive(Debug)]
pub struct SlotTable {
    slots: Mutex<Vec<ModelSlot>>,
}

impl SlotTable {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        let slots = models
            .into_iter()
            .map(|descriptor| ModelSlot {
                descriptor,
                busy: false,
            })
            .collect();

        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Atomically claim a free slot for `model_id`. Returns false when every
    /// matching slot is busy or the model is unknown.
    pub fn try_acquire(&self, model_id: &str) -> bool {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if slot.descriptor.id == model_id && !slot.busy {
                slot.busy = true;
                return true;
            }
        }
        false
    }

    /// Free one busy slot for `model_id`. Idempotent: releasing a slot that
    /// is already free (or was force-freed by worker removal) is a no-op.
    pub fn release(&self, model_id: &str) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots
            .iter_mut()
            .find(|slot| slot.descriptor.id == model_id && slot.busy)
        {
            slot.busy = false;
        }
    }

    /// Force-free every slot. Called when the owning worker is removed so no
    /// slot leaks busy across an abnormal disconnect.
    pub fn release_all(&self) {
        for slot in self.slots.lock().iter_mut() {
            slot.busy = false;
        }
    }

    /// Read-only copy for scoring.
    pub fn snapshot(&self) -> Vec<ModelSlot> {
        self.slots.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
