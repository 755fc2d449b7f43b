#![forbid(unsafe_code)]

use pl_core::ids::MemberId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Slots = HashMap<MemberId, Arc<Mutex<()>>>;

/// One mutex per member id. Mutations of the same member run one at a time;
/// mutations of different members do not wait on each other here.
///
/// The slot mutexes guard no data, so a panic inside a section neither
/// poisons the member nor leaks its slot.
#[derive(Debug, Default)]
pub(crate) struct MemberLocks {
    slots: Mutex<Slots>,
}

impl MemberLocks {
    pub(crate) fn with_member<T>(&self, member_id: &MemberId, f: impl FnOnce() -> T) -> T {
        let slot = Arc::clone(self.slots().entry(member_id.clone()).or_default());
        let _release = SlotRelease {
            locks: self,
            member_id,
            slot: &slot,
        };
        let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots().len()
    }
}

/// Drops the member's slot once nobody else holds or waits on it. Runs on
/// unwind too.
struct SlotRelease<'a> {
    locks: &'a MemberLocks,
    member_id: &'a MemberId,
    slot: &'a Arc<Mutex<()>>,
}

impl Drop for SlotRelease<'_> {
    fn drop(&mut self) {
        let mut slots = self.locks.slots();
        if Arc::strong_count(self.slot) == 2 {
            slots.remove(self.member_id);
        }
    }
}
