use eventide_core::{EventContext, INVALID_EVENT, INVALID_SLOT};

use super::types::SchedulerError;

/// Admission ledger: which event occupies which slot, from admission until
/// the event is popped.
#[derive(Debug)]
pub(crate) struct SlotTable {
    occupants: Vec<Option<u64>>,
}

impl SlotTable {
    pub fn new(slots: usize) -> Self {
        Self {
            occupants: vec![None; slots],
        }
    }

    pub fn capacity(&self) -> usize {
        self.occupants.len()
    }

    pub fn free(&self) -> usize {
        self.occupants.iter().filter(|o| o.is_none()).count()
    }

    pub fn occupant(&self, slot: usize) -> Option<u64> {
        self.occupants.get(slot).copied().flatten()
    }

    /// Give every context a slot, or none of them one.
    ///
    /// Contexts that already name a slot must name a free one; the rest get
    /// the lowest free slots in order.
    pub fn reserve(&mut self, ctxs: &mut [EventContext]) -> Result<(), SchedulerError> {
        let free = self.free();
        if ctxs.len() > free {
            return Err(SchedulerError::NoFreeSlots {
                requested: ctxs.len(),
                free,
            });
        }

        let mut taken = Vec::with_capacity(ctxs.len());
        for ctx in ctxs.iter() {
            if ctx.evt() == INVALID_EVENT {
                return Err(SchedulerError::InvalidContext(
                    "event number is not set".into(),
                ));
            }
            let slot = ctx.slot();
            if slot == INVALID_SLOT {
                continue;
            }
            if slot >= self.capacity() {
                return Err(SchedulerError::SlotOutOfRange {
                    slot,
                    slots: self.capacity(),
                });
            }
            if self.occupants[slot].is_some() {
                return Err(SchedulerError::SlotOccupied(slot));
            }
            if taken.contains(&slot) {
                return Err(SchedulerError::DuplicateSlot(slot));
            }
            taken.push(slot);
        }

        let mut assigned = Vec::with_capacity(ctxs.len());
        let mut next = 0;
        for ctx in ctxs.iter() {
            if ctx.slot() != INVALID_SLOT {
                assigned.push(ctx.slot());
                continue;
            }
            while next < self.capacity() && (self.occupants[next].is_some() || taken.contains(&next)) {
                next += 1;
            }
            if next == self.capacity() {
                return Err(SchedulerError::NoFreeSlots {
                    requested: ctxs.len(),
                    free,
                });
            }
            taken.push(next);
            assigned.push(next);
        }

        for (ctx, slot) in ctxs.iter_mut().zip(assigned) {
            let evt = ctx.evt();
            ctx.set(evt, slot);
            self.occupants[slot] = Some(evt);
        }
        Ok(())
    }

    /// Returns false if the slot was already free.
    pub fn release(&mut self, slot: usize) -> bool {
        self.occupants
            .get_mut(slot)
            .and_then(Option::take)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_assigns_lowest_free_slots() {
        let mut t = SlotTable::new(3);
        let mut batch = vec![EventContext::for_event(10), EventContext::for_event(11)];
        t.reserve(&mut batch).unwrap();
        assert_eq!(batch[0].slot(), 0);
        assert_eq!(batch[1].slot(), 1);
        assert!(batch.iter().all(EventContext::valid));
        assert_eq!(t.free(), 1);
        assert_eq!(t.occupant(1), Some(11));
    }

    #[test]
    fn explicit_slots_are_honoured_first() {
        let mut t = SlotTable::new(3);
        let mut batch = vec![EventContext::for_event(1), EventContext::new(2, 0)];
        t.reserve(&mut batch).unwrap();
        assert_eq!(batch[0].slot(), 1);
        assert_eq!(batch[1].slot(), 0);
    }

    #[test]
    fn batch_is_all_or_nothing() {
        let mut t = SlotTable::new(3);
        let mut first = vec![EventContext::new(1, 1)];
        t.reserve(&mut first).unwrap();

        let mut batch = vec![EventContext::for_event(2), EventContext::new(3, 1)];
        assert!(matches!(t.reserve(&mut batch), Err(SchedulerError::SlotOccupied(1))));
        assert_eq!(t.free(), 2);
        assert_eq!(batch[0].slot(), INVALID_SLOT);

        let mut too_many = vec![
            EventContext::for_event(4),
            EventContext::for_event(5),
            EventContext::for_event(6),
        ];
        assert!(matches!(
            t.reserve(&mut too_many),
            Err(SchedulerError::NoFreeSlots { requested: 3, free: 2 })
        ));
        assert_eq!(t.free(), 2);
        assert!(too_many.iter().all(|c| c.slot() == INVALID_SLOT));
    }

    #[test]
    fn rejects_bad_contexts() {
        let mut t = SlotTable::new(2);
        assert!(matches!(
            t.reserve(&mut [EventContext::default()]),
            Err(SchedulerError::InvalidContext(_))
        ));
        assert!(matches!(
            t.reserve(&mut [EventContext::new(1, 5)]),
            Err(SchedulerError::SlotOutOfRange { slot: 5, slots: 2 })
        ));
        assert!(matches!(
            t.reserve(&mut [EventContext::new(1, 0), EventContext::new(2, 0)]),
            Err(SchedulerError::DuplicateSlot(0))
        ));
        assert_eq!(t.free(), 2);
    }

    #[test]
    fn release_frees_once() {
        let mut t = SlotTable::new(1);
        t.reserve(&mut [EventContext::for_event(1)]).unwrap();
        assert!(t.release(0));
        assert!(!t.release(0));
        assert!(!t.release(9));
        assert_eq!(t.free(), 1);
    }
}
