//! The Liu-Layland utilization-bound admission test.
use crate::thread::{ThreadState, Tcb, MAX_USER_THREADS};

/// `UB_TABLE[k] = k * (2^(1/k) - 1)`, the Liu–Layland schedulability bound
/// for `k` fixed-priority periodic tasks, for `k = 0..=31`.
///
/// Computed offline in single precision and embedded as literals: the
/// kernel never evaluates a transcendental function on the target, so no
/// floating-point math library is a dependency of this crate.
pub const UB_TABLE: [f32; 32] = [
    0.0, 1.0, 0.828_427, 0.779_763, 0.756_828, 0.743_492, 0.734_772, 0.728_627, 0.724_062,
    0.720_538, 0.717_735, 0.715_452, 0.713_557, 0.711_959, 0.710_593, 0.709_412, 0.708_381,
    0.707_472, 0.706_666, 0.705_946, 0.705_298, 0.704_713, 0.704_182, 0.703_698, 0.703_254,
    0.702_846, 0.702_469, 0.702_121, 0.701_798, 0.701_497, 0.701_217, 0.700_955,
];

/// Sum of `Cᵢ/Tᵢ` over active user threads, plus the count of active user
/// threads. Excludes the idle and default slots (they never participate in
/// the UB test) and slots in `New`/`Done` state.
fn active_utilization(tcbs: &[Tcb]) -> (f32, usize) {
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for tcb in tcbs.iter().take(MAX_USER_THREADS) {
        if !matches!(tcb.state, ThreadState::New | ThreadState::Done) {
            sum += tcb.c as f32 / tcb.t as f32;
            count += 1;
        }
    }
    (sum, count)
}

/// `accept iff C/T + Σ Cᵢ/Tᵢ <= UB_TABLE[1 + active_count]`.
///
/// `tcbs` must be the user-thread slots only (not idle/default).
pub fn ub_admit(tcbs: &[Tcb], c: u32, t: u32) -> bool {
    let (existing_sum, active_count) = active_utilization(tcbs);
    let n = 1 + active_count;
    if n >= UB_TABLE.len() {
        // thread_init already rejects max_threads that could ever reach
        // this; defensively refuse rather than index out of bounds.
        return false;
    }
    let u = c as f32 / t as f32 + existing_sum;
    u <= UB_TABLE[n]
}
