//! Mutex allocation and the Immediate Priority Ceiling Protocol.
use arrayvec::ArrayVec;

use crate::{
    error::{KResult, KernelError},
    thread::{ThreadId, ThreadState, MAX_MUTEXES},
};

/// A single mutex table entry. The index into
/// [`MutexTable::mutexes`] is the mutex's immutable handle.
#[derive(Debug, Clone, Copy)]
pub struct MutexCb {
    pub ceiling_priority: u8,
    pub owner: Option<ThreadId>,
}

/// The fixed-capacity mutex table.
pub struct MutexTable {
    mutexes: ArrayVec<MutexCb, MAX_MUTEXES>,
}

impl MutexTable {
    pub const fn new() -> Self {
        Self {
            mutexes: ArrayVec::new_const(),
        }
    }

    pub fn ceiling(&self, m: usize) -> u8 {
        self.mutexes[m].ceiling_priority
    }

    pub fn owner(&self, m: usize) -> Option<ThreadId> {
        self.mutexes.get(m).and_then(|mc| mc.owner)
    }

    pub fn len(&self) -> usize {
        self.mutexes.len()
    }

    /// `mutex_init(max_prio)`: allocate the next free mutex.
    pub fn init(&mut self, max_prio: u8) -> KResult<usize> {
        if self.mutexes.is_full() {
            return Err(KernelError::MutexTableFull);
        }
        let idx = self.mutexes.len();
        self.mutexes.push(MutexCb {
            ceiling_priority: max_prio,
            owner: None,
        });
        Ok(idx)
    }

    fn get(&self, m: usize) -> KResult<&MutexCb> {
        self.mutexes.get(m).ok_or(KernelError::BadMutex)
    }
}

/// The effect of attempting `mutex_lock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// The mutex was free (and IPCP-eligible); the caller now owns it.
    Acquired,
    /// The caller is blocked; the scheduler must be asked for a new thread.
    Blocked,
    /// Double lock: caller already owns this mutex. No-op, warning logged.
    AlreadyOwned,
    /// The caller's static priority is weaker than the mutex's ceiling.
    /// The caller has been transitioned to `Done`.
    CeilingViolationKilled,
}

/// Implements `mutex_lock(m)` for thread `t`.
///
/// `tcbs` is the full TCB slice (user + idle + default); `t` and `m` must be
/// valid indices.
pub fn lock(
    mutexes: &mut MutexTable,
    tcbs: &mut [crate::thread::Tcb],
    t: ThreadId,
    m: usize,
) -> KResult<LockOutcome> {
    let ceiling = mutexes.get(m)?.ceiling_priority;

    if tcbs[t].static_priority < ceiling {
        log::warn!(
            "thread {t} violated mutex {m}'s declared ceiling {ceiling} \
             (static priority {}); killing it",
            tcbs[t].static_priority
        );
        tcbs[t].state = ThreadState::Done;
        return Ok(LockOutcome::CeilingViolationKilled);
    }

    if tcbs[t].held_mutex_bitmap.get(m) {
        log::warn!("thread {t} double-locked mutex {m}; ignoring");
        return Ok(LockOutcome::AlreadyOwned);
    }

    if is_eligible_to_acquire(mutexes, tcbs, t, m) {
        acquire(mutexes, tcbs, t, m);
        Ok(LockOutcome::Acquired)
    } else {
        tcbs[t].state = ThreadState::Blocked;
        tcbs[t].waiting_mutex_bitmap.set(m);
        Ok(LockOutcome::Blocked)
    }
}

/// `m` is free **and** no other currently-held mutex in the whole table has
/// a ceiling at or above `t`'s dynamic priority unless `t` is the one
/// holding it. A mutex `t` already owns never blocks it; a mutex someone
/// else owns with a ceiling that high is exactly the case IPCP exists to
/// rule out, since letting `t` in would invert priority against whichever
/// higher-ceiling thread is waiting on that other owner.
fn is_eligible_to_acquire(
    mutexes: &MutexTable,
    tcbs: &[crate::thread::Tcb],
    t: ThreadId,
    m: usize,
) -> bool {
    if mutexes.owner(m).is_some() {
        return false;
    }
    let dyn_prio = tcbs[t].dynamic_priority;
    for other in 0..mutexes.len() {
        if other == m {
            continue;
        }
        if let Some(owner) = mutexes.owner(other) {
            if owner != t && mutexes.ceiling(other) <= dyn_prio {
                return false;
            }
        }
    }
    true
}

fn acquire(mutexes: &mut MutexTable, tcbs: &mut [crate::thread::Tcb], t: ThreadId, m: usize) {
    mutexes.mutexes[m].owner = Some(t);
    let tcb = &mut tcbs[t];
    tcb.held_mutex_bitmap.set(m);
    tcb.waiting_mutex_bitmap.clear(m);
    tcb.dynamic_priority = tcb.dynamic_priority.min(mutexes.ceiling(m));
}

/// The effect of attempting `mutex_unlock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    Released,
    /// `m` unowned, owned by someone else, or `t` didn't hold it.
    NotOwner,
}

/// Implements `mutex_unlock(m)` for thread `t`.
pub fn unlock(
    mutexes: &mut MutexTable,
    tcbs: &mut [crate::thread::Tcb],
    t: ThreadId,
    m: usize,
) -> KResult<UnlockOutcome> {
    mutexes.get(m)?;

    if mutexes.owner(m) != Some(t) || !tcbs[t].held_mutex_bitmap.get(m) {
        log::warn!("thread {t} attempted to unlock mutex {m} it does not own; ignoring");
        return Ok(UnlockOutcome::NotOwner);
    }

    mutexes.mutexes[m].owner = None;
    tcbs[t].held_mutex_bitmap.clear(m);

    let ceilings = |idx: usize| mutexes.ceiling(idx);
    tcbs[t].recompute_dynamic_priority(ceilings);

    // Clear the waiting bit for every thread that was blocked on `m`; the
    // next scheduler pass arbitrates ownership via the acquisition rule
    // above.
    for tcb in tcbs.iter_mut() {
        tcb.waiting_mutex_bitmap.clear(m);
    }

    Ok(UnlockOutcome::Released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::Tcb;

    fn thread(static_priority: u8) -> Tcb {
        Tcb {
            static_priority,
            dynamic_priority: static_priority,
            state: ThreadState::Running,
            ..Tcb::default()
        }
    }

    #[test]
    fn lock_unlock_round_trip_restores_priority_and_bitmap() {
        let mut mutexes = MutexTable::new();
        let m = mutexes.init(1).unwrap();
        let mut tcbs = vec![thread(0), thread(1)];

        let before = (tcbs[0].dynamic_priority, tcbs[0].held_mutex_bitmap);
        assert_eq!(lock(&mut mutexes, &mut tcbs, 0, m).unwrap(), LockOutcome::Acquired);
        assert_eq!(tcbs[0].dynamic_priority, 1);
        assert!(tcbs[0].held_mutex_bitmap.get(m));

        assert_eq!(unlock(&mut mutexes, &mut tcbs, 0, m).unwrap(), UnlockOutcome::Released);
        assert_eq!(tcbs[0].dynamic_priority, before.0);
        assert_eq!(tcbs[0].held_mutex_bitmap, before.1);
    }

    #[test]
    fn ceiling_violation_kills_caller() {
        let mut mutexes = MutexTable::new();
        let m = mutexes.init(1).unwrap(); // ceiling 1: declared for no locker stronger than prio 1
        let mut tcbs = vec![thread(0)]; // static priority 0 is stronger than the declared ceiling
        let outcome = lock(&mut mutexes, &mut tcbs, 0, m).unwrap();
        assert_eq!(outcome, LockOutcome::CeilingViolationKilled);
        assert_eq!(tcbs[0].state, ThreadState::Done);
        assert_eq!(mutexes.owner(m), None);
    }

    #[test]
    fn double_lock_is_a_noop_with_unchanged_state() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut mutexes = MutexTable::new();
        let m = mutexes.init(0).unwrap();
        let mut tcbs = vec![thread(0)];
        assert_eq!(lock(&mut mutexes, &mut tcbs, 0, m).unwrap(), LockOutcome::Acquired);
        let snapshot = (tcbs[0].dynamic_priority, tcbs[0].held_mutex_bitmap);
        assert_eq!(lock(&mut mutexes, &mut tcbs, 0, m).unwrap(), LockOutcome::AlreadyOwned);
        assert_eq!((tcbs[0].dynamic_priority, tcbs[0].held_mutex_bitmap), snapshot);
    }

    #[test]
    fn double_unlock_is_a_noop() {
        let mut mutexes = MutexTable::new();
        let m = mutexes.init(0).unwrap();
        let mut tcbs = vec![thread(0)];
        lock(&mut mutexes, &mut tcbs, 0, m).unwrap();
        unlock(&mut mutexes, &mut tcbs, 0, m).unwrap();
        assert_eq!(unlock(&mut mutexes, &mut tcbs, 0, m).unwrap(), UnlockOutcome::NotOwner);
    }

    #[test]
    fn ceiling_held_by_another_thread_blocks_an_unrelated_free_mutex() {
        // m0 (ceiling 0) is held by thread 0. Thread 1 (dynamic priority 1)
        // tries to lock the separate, free m1 (ceiling 1, so locking it
        // alone would be no violation). m1 itself has no owner, but m0's
        // ceiling sits at or above thread 1's priority and thread 1 doesn't
        // own it -- IPCP must still block the lock, or a thread could
        // bypass the ceiling discipline entirely by picking an uninvolved
        // mutex to acquire.
        let mut mutexes = MutexTable::new();
        let m0 = mutexes.init(0).unwrap();
        let m1 = mutexes.init(1).unwrap();
        let mut tcbs = vec![thread(0), thread(1)];
        assert_eq!(lock(&mut mutexes, &mut tcbs, 0, m0).unwrap(), LockOutcome::Acquired);

        let outcome = lock(&mut mutexes, &mut tcbs, 1, m1).unwrap();
        assert_eq!(outcome, LockOutcome::Blocked);
        assert_eq!(tcbs[1].state, ThreadState::Blocked);
        assert!(tcbs[1].waiting_mutex_bitmap.get(m1));
        assert_eq!(mutexes.owner(m1), None);
    }

    #[test]
    fn lock_held_by_other_blocks_caller() {
        let mut mutexes = MutexTable::new();
        let m = mutexes.init(1).unwrap();
        let mut tcbs = vec![thread(0), thread(1)];
        lock(&mut mutexes, &mut tcbs, 0, m).unwrap();
        let outcome = lock(&mut mutexes, &mut tcbs, 1, m).unwrap();
        assert_eq!(outcome, LockOutcome::Blocked);
        assert_eq!(tcbs[1].state, ThreadState::Blocked);
        assert!(tcbs[1].waiting_mutex_bitmap.get(m));
    }
}
