//! Thread selection. Called only from the context-switch trampoline;
//! never touches budgets or timers.
use crate::thread::{ThreadId, ThreadState, Tcb};

/// Runs the four scheduler passes and returns the thread to run next,
/// having already set its state to `Running`.
///
/// `idle` and `default_thread` are the two reserved slot indices
/// (`max_threads` and `max_threads + 1`).
pub fn select_next(tcbs: &mut [Tcb], idle: ThreadId, default_thread: ThreadId) -> ThreadId {
    let prev_running = tcbs
        .iter()
        .position(|tcb| tcb.state == ThreadState::Running);

    unblock_pass(tcbs);
    ready_down_pass(tcbs);

    let chosen = select_ready_thread(tcbs, prev_running)
        .unwrap_or_else(|| fallback(tcbs, idle, default_thread));

    tcbs[chosen].state = ThreadState::Running;
    chosen
}

/// Step 1: any `Blocked` thread whose `waiting_mutex_bitmap` has drained to
/// empty is now eligible to retry its lock and becomes `Ready`.
fn unblock_pass(tcbs: &mut [Tcb]) {
    for tcb in tcbs.iter_mut() {
        if tcb.state == ThreadState::Blocked && tcb.waiting_mutex_bitmap.is_empty() {
            tcb.state = ThreadState::Ready;
        }
    }
}

/// Step 2: demote the (normally unique) `Running` thread back to `Ready` so
/// selection treats it like any other candidate.
fn ready_down_pass(tcbs: &mut [Tcb]) {
    for tcb in tcbs.iter_mut() {
        if tcb.state == ThreadState::Running {
            tcb.state = ThreadState::Ready;
        }
    }
}

/// Step 3: among `Ready` threads with no outstanding waiting bits, pick the
/// smallest `dynamic_priority`. Ties are broken in favor of the thread that
/// was `Running` going into this pass, then by smallest index. A tie can
/// only arise when a ceiling boost puts a lock holder's dynamic priority
/// exactly level with a higher-static-priority thread's release; resolving
/// it in favor of the incumbent is what makes the ceiling actually bound
/// the inversion instead of a release at the boundary undoing it.
fn select_ready_thread(tcbs: &[Tcb], prev_running: Option<ThreadId>) -> Option<ThreadId> {
    tcbs.iter()
        .enumerate()
        .filter(|(_, tcb)| tcb.state == ThreadState::Ready && tcb.waiting_mutex_bitmap.is_empty())
        .min_by_key(|(i, tcb)| (tcb.dynamic_priority, tie_break_key(*i, prev_running)))
        .map(|(i, _)| i)
}

/// `0` for the incumbent thread, `i + 1` otherwise, so comparing this key
/// reproduces plain index order among non-incumbents while always placing
/// the incumbent first on an exact `dynamic_priority` tie.
fn tie_break_key(i: ThreadId, prev_running: Option<ThreadId>) -> usize {
    if Some(i) == prev_running {
        0
    } else {
        i + 1
    }
}

/// Step 4: nothing is selectable. Run idle if some thread is merely resting
/// (`Waiting`/`Blocked`); otherwise every slot is `New`/`Done` and the
/// kernel falls back to the default (pre-`scheduler_start`) context.
fn fallback(tcbs: &[Tcb], idle: ThreadId, default_thread: ThreadId) -> ThreadId {
    let any_resting = tcbs
        .iter()
        .any(|tcb| matches!(tcb.state, ThreadState::Waiting | ThreadState::Blocked));
    if any_resting {
        idle
    } else {
        default_thread
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: ThreadId = 14;
    const DEFAULT: ThreadId = 15;

    fn make(prio: u8, state: ThreadState) -> Tcb {
        Tcb {
            static_priority: prio,
            dynamic_priority: prio,
            state,
            ..Tcb::default()
        }
    }

    fn slots(states: &[(u8, ThreadState)]) -> Vec<Tcb> {
        states.iter().map(|&(p, s)| make(p, s)).collect()
    }

    #[test]
    fn picks_smallest_dynamic_priority_among_ready() {
        let mut tcbs = slots(&[
            (2, ThreadState::Ready),
            (0, ThreadState::Ready),
            (1, ThreadState::Ready),
        ]);
        assert_eq!(select_next(&mut tcbs, IDLE, DEFAULT), 1);
        assert_eq!(tcbs[1].state, ThreadState::Running);
    }

    #[test]
    fn ties_break_on_smallest_index_when_neither_is_incumbent() {
        let mut tcbs = slots(&[
            (0, ThreadState::Ready),
            (0, ThreadState::Ready),
        ]);
        assert_eq!(select_next(&mut tcbs, IDLE, DEFAULT), 0);
    }

    #[test]
    fn tie_favors_incumbent_over_a_lower_index_newcomer() {
        // Slot 2 is Running with a ceiling-boosted dynamic priority tied
        // with slot 0, which has just become Ready. Index order alone
        // would hand the CPU to slot 0; IPCP requires the incumbent keep
        // running until it drops the ceiling.
        let mut tcbs = slots(&[
            (0, ThreadState::Ready),
            (1, ThreadState::Waiting),
            (2, ThreadState::Running),
        ]);
        tcbs[2].dynamic_priority = 0;
        assert_eq!(select_next(&mut tcbs, IDLE, DEFAULT), 2);
        assert_eq!(tcbs[2].state, ThreadState::Running);
        assert_eq!(tcbs[0].state, ThreadState::Ready);
    }

    #[test]
    fn blocked_thread_is_never_selected() {
        let mut tcbs = slots(&[(0, ThreadState::Blocked)]);
        tcbs[0].waiting_mutex_bitmap.set(2);
        tcbs.push(make(5, ThreadState::Ready));
        assert_eq!(select_next(&mut tcbs, IDLE, DEFAULT), 1);
    }

    #[test]
    fn unblock_pass_makes_drained_blocked_thread_selectable() {
        let mut tcbs = slots(&[(0, ThreadState::Blocked)]);
        // waiting_mutex_bitmap already empty -> should unblock to Ready and win
        assert_eq!(select_next(&mut tcbs, IDLE, DEFAULT), 0);
        assert_eq!(tcbs[0].state, ThreadState::Running);
    }

    #[test]
    fn falls_back_to_idle_when_something_is_resting() {
        let mut tcbs = slots(&[(0, ThreadState::Waiting)]);
        assert_eq!(select_next(&mut tcbs, IDLE, DEFAULT), IDLE);
    }

    #[test]
    fn falls_back_to_default_when_nothing_exists_yet() {
        let mut tcbs = slots(&[(0, ThreadState::New), (1, ThreadState::Done)]);
        assert_eq!(select_next(&mut tcbs, IDLE, DEFAULT), DEFAULT);
    }

    #[test]
    fn running_thread_is_reconsidered_not_pinned() {
        let mut tcbs = slots(&[(5, ThreadState::Running), (0, ThreadState::Ready)]);
        assert_eq!(select_next(&mut tcbs, IDLE, DEFAULT), 1);
        assert_eq!(tcbs[0].state, ThreadState::Ready);
    }
}
