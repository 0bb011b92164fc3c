//! The tick accountant: runs once per tick, strictly before the scheduler
//! is consulted.
use crate::thread::{ThreadId, ThreadState, Tcb};

/// Advance the kernel clock by one tick and run the debit/release passes.
/// Returns `true` if a switch should be requested (always `true` --
/// every tick requests a switch; whether that switch actually changes the
/// running thread is the scheduler's business).
///
/// `current` is the currently running thread's index; `idle` and
/// `default_thread` are the two reserved slots, which are exempt from
/// budget/period accounting (both have `C = T = 1` so tick accounting
/// never faults them).
pub fn on_tick(
    tick_count: &mut u32,
    tcbs: &mut [Tcb],
    current: ThreadId,
    idle: ThreadId,
    default_thread: ThreadId,
) -> bool {
    *tick_count = tick_count.wrapping_add(1);
    tcbs[current].elapsed += 1;

    if current != idle && current != default_thread {
        debit_current_job(&mut tcbs[current]);
    }

    release_pass(tcbs, *tick_count, idle, default_thread);

    true
}

/// Step 2: the running user thread's budget is consumed by one tick. If
/// that exhausts the budget, the job is complete for this period -- force
/// `Waiting` and reset the budget for next time. A thread that overruns
/// its declared `C` is cut off rather than allowed to keep running on
/// borrowed time; it waits for its next period like any other completed job.
fn debit_current_job(tcb: &mut Tcb) {
    if tcb.c_remaining > 0 {
        tcb.c_remaining -= 1;
    }
    if tcb.c_remaining == 0 {
        tcb.state = ThreadState::Waiting;
        tcb.c_remaining = tcb.c;
    }
}

/// Step 3: release a new job for every user thread at a period boundary.
/// Runs after the debit so a thread that is both "just used up its budget"
/// and "at a period boundary" in the same tick is released cleanly.
fn release_pass(tcbs: &mut [Tcb], tick_count: u32, idle: ThreadId, default_thread: ThreadId) {
    for (i, tcb) in tcbs.iter_mut().enumerate() {
        if i == idle || i == default_thread {
            continue;
        }
        if !matches!(
            tcb.state,
            ThreadState::Ready | ThreadState::Waiting | ThreadState::Running
        ) {
            continue;
        }
        if tcb.t != 0 && tick_count % tcb.t == 0 {
            log::trace!("thread {i} released a new job at tick {tick_count}");
            tcb.c_remaining = tcb.c;
            tcb.release_time = tick_count;
            tcb.state = ThreadState::Ready;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: ThreadId = 14;
    const DEFAULT: ThreadId = 15;

    fn periodic(c: u32, t: u32) -> Tcb {
        Tcb {
            c,
            t,
            c_remaining: c,
            state: ThreadState::Ready,
            ..Tcb::default()
        }
    }

    #[test]
    fn budget_exhaustion_forces_waiting_and_resets_remaining() {
        let mut tick_count = 0u32;
        let mut tcbs = vec![periodic(2, 100)];
        tcbs[0].state = ThreadState::Running;
        on_tick(&mut tick_count, &mut tcbs, 0, IDLE, DEFAULT);
        assert_eq!(tcbs[0].c_remaining, 1);
        assert_eq!(tcbs[0].state, ThreadState::Running);
        on_tick(&mut tick_count, &mut tcbs, 0, IDLE, DEFAULT);
        assert_eq!(tcbs[0].c_remaining, 2); // reset to C
        assert_eq!(tcbs[0].state, ThreadState::Waiting);
    }

    #[test]
    fn release_at_period_boundary_makes_waiting_thread_ready() {
        let mut tick_count = 199u32; // next tick lands on 200, a multiple of T=200
        let mut tcbs = vec![Tcb {
            t: 200,
            c: 50,
            c_remaining: 0,
            state: ThreadState::Waiting,
            ..Tcb::default()
        }];
        on_tick(&mut tick_count, &mut tcbs, IDLE, IDLE, DEFAULT);
        assert_eq!(tcbs[0].state, ThreadState::Ready);
        assert_eq!(tcbs[0].c_remaining, 50);
        assert_eq!(tcbs[0].release_time, 200);
    }

    #[test]
    fn debit_then_release_in_the_same_tick_rearms_cleanly() {
        // C=1, T=10: a thread that releases at tick 10 and is immediately
        // scheduled will exhaust its 1-tick budget on the very next tick,
        // which may itself be a period boundary if T were 1. Exercise the
        // ordering directly: debit first, then release overwrites state.
        let mut tick_count = 9u32;
        let mut tcbs = vec![Tcb {
            t: 10,
            c: 5,
            c_remaining: 1,
            state: ThreadState::Running,
            ..Tcb::default()
        }];
        on_tick(&mut tick_count, &mut tcbs, 0, IDLE, DEFAULT);
        // debit exhausts budget -> Waiting, c_remaining reset to C=5
        // release pass (tick 10 % 10 == 0) then re-releases -> Ready, c_remaining=5
        assert_eq!(tcbs[0].state, ThreadState::Ready);
        assert_eq!(tcbs[0].c_remaining, 5);
    }

    #[test]
    fn idle_and_default_are_never_debited() {
        let mut tick_count = 0u32;
        let mut tcbs = vec![periodic(1, 1)];
        // current == idle (slot 0 stands in for the idle slot here), so its
        // c_remaining must be left untouched even though a user thread with
        // the same c/t would be debited to 0 and re-released.
        on_tick(&mut tick_count, &mut tcbs, 0, 0, DEFAULT);
        assert_eq!(tcbs[0].c_remaining, 1);
    }
}
