//! Global kernel state and the thread lifecycle operations.
use arrayvec::ArrayVec;

use crate::{
    admission::ub_admit,
    error::{KResult, KernelError},
    mutex::MutexTable,
    scheduler,
    thread::{
        round_stack_words, CalleeContext, ExceptionFrame, PrivilegeLevel, SavedFrame, StackPools,
        Tcb, ThreadId, ThreadState, MAX_SLOTS, MAX_USER_THREADS, XPSR_THUMB_BIT,
    },
    tick,
};

/// Everything the kernel needs, in one value, created once by the port's
/// reset handler and mutated only by kernel operations taking it by mutable
/// reference -- there is no per-call allocation or global singleton beyond
/// this value itself.
pub struct KernelState {
    tcbs: ArrayVec<Tcb, MAX_SLOTS>,
    mutexes: MutexTable,
    tick_count: u32,
    current_thread: ThreadId,
    max_threads: usize,
    stack_words: usize,
    stacks: StackPools,
    initialized: bool,
    scheduler_started: bool,
    brk: usize,
}

/// Byte budget for the `sbrk` host-I/O surface, entirely separate from the
/// stack pools: dynamic memory for thread stacks beyond what admission
/// permits is out of scope, but a small bump heap backing the C-library
/// surface is not a thread stack and doesn't need admission control.
const HEAP_BYTES: usize = 4 * 1024;

impl KernelState {
    /// The state the system boots into before `thread_init` has ever run:
    /// a single slot (the default context) occupying index 0, in `Running`
    /// state, with no user threads and no mutexes. `thread_init` then
    /// reconfigures this in place -- the kernel-state value itself is
    /// created once, by the port's reset handler, and never replaced.
    pub fn bootstrap() -> Self {
        let mut tcbs = ArrayVec::new();
        tcbs.push(Tcb {
            state: ThreadState::Running,
            ..Tcb::default()
        });
        Self {
            tcbs,
            mutexes: MutexTable::new(),
            tick_count: 0,
            current_thread: 0,
            max_threads: 0,
            stack_words: round_stack_words(0),
            stacks: StackPools::empty(),
            initialized: false,
            scheduler_started: false,
            brk: 0,
        }
    }

    /// The idle slot's fixed index, once `thread_init` has run.
    pub fn idle(&self) -> ThreadId {
        self.max_threads
    }

    /// The default (pre-`scheduler_start`) slot's fixed index.
    pub fn default_thread(&self) -> ThreadId {
        self.max_threads + 1
    }

    pub fn current_thread(&self) -> ThreadId {
        self.current_thread
    }

    pub fn tick_count(&self) -> u32 {
        self.tick_count
    }

    pub fn tcb(&self, t: ThreadId) -> &Tcb {
        &self.tcbs[t]
    }

    pub fn tcbs(&self) -> &[Tcb] {
        &self.tcbs
    }

    /// Address of `t`'s saved-frame record, stable across the lifetime of
    /// an initialized kernel state (the TCB table never reallocates once
    /// `thread_init` has carved it). The port's naked context-switch code
    /// is the only consumer of this raw pointer.
    pub fn saved_frame_ptr(&mut self, t: ThreadId) -> *mut SavedFrame {
        &mut self.tcbs[t].saved_frame as *mut _
    }

    pub fn privilege_mut(&mut self, t: ThreadId) -> &mut PrivilegeLevel {
        &mut self.tcbs[t].privilege
    }

    /// `thread_init(max_threads, stack_words, idle_fn, max_mutexes)`.
    ///
    /// `idle_fn` is the idle thread's entry point; `None` selects the
    /// default "wait for interrupts" idle loop the port crate provides.
    /// `max_mutexes` is accepted for ABI compatibility but this kernel's
    /// mutex table capacity is the fixed [`crate::thread::MAX_MUTEXES`]
    /// regardless of what is requested here; a request exceeding it is
    /// rejected the same way an oversized `max_threads` is.
    pub fn thread_init(
        &mut self,
        max_threads: usize,
        stack_words: usize,
        idle_fn: Option<usize>,
        max_mutexes: usize,
    ) -> KResult<()> {
        if self.initialized {
            return Err(KernelError::SlotBusy);
        }
        if max_threads > MAX_USER_THREADS || max_mutexes > crate::thread::MAX_MUTEXES {
            return Err(KernelError::BadPriority);
        }

        let stack_words = round_stack_words(stack_words);
        let slots = max_threads + 2;

        let mut pools = StackPools::empty();
        pools.carve(slots, stack_words)?;

        let mut tcbs = ArrayVec::new();
        for _ in 0..slots {
            tcbs.push(Tcb::default());
        }

        let idle = max_threads;
        let default_thread = max_threads + 1;

        tcbs[idle] = Tcb {
            static_priority: idle as u8,
            dynamic_priority: idle as u8,
            c: 1,
            t: 1,
            state: ThreadState::New,
            saved_frame: SavedFrame {
                callee: CalleeContext::default(),
                user_sp: pools.user_stack_top(idle),
            },
            ..Tcb::default()
        };
        let _ = idle_fn; // the entry point itself is a port-level concern

        tcbs[default_thread] = Tcb {
            static_priority: default_thread as u8,
            dynamic_priority: default_thread as u8,
            c: 1,
            t: 1,
            state: ThreadState::Running,
            ..Tcb::default()
        };

        self.tcbs = tcbs;
        self.mutexes = MutexTable::new();
        self.tick_count = 0;
        self.current_thread = default_thread;
        self.max_threads = max_threads;
        self.stack_words = stack_words;
        self.stacks = pools;
        self.initialized = true;
        self.scheduler_started = false;
        Ok(())
    }

    /// `thread_create(fn, prio, C, T, argp)`.
    pub fn thread_create(&mut self, entry: usize, prio: u8, c: u32, t: u32, argp: usize) -> KResult<()> {
        if prio as usize >= self.max_threads {
            return Err(KernelError::BadPriority);
        }
        let slot = prio as usize;
        if matches!(
            self.tcbs[slot].state,
            ThreadState::Ready | ThreadState::Running | ThreadState::Waiting | ThreadState::Blocked
        ) {
            return Err(KernelError::SlotBusy);
        }

        // Admission is checked against every other active user thread, this
        // one excluded (it is New or Done right now either way).
        if !ub_admit(&self.tcbs[..self.max_threads], c, t) {
            return Err(KernelError::Oversubscribed);
        }

        // Fabricated so the first restore from this slot looks exactly like
        // a return from an ordinary exception; a target port writes
        // this frame to the top of the slot's user stack and points
        // `user_sp` at it. `lr` (the terminator return address) is a
        // port-level concern -- it is patched in by the port's thread
        // creation glue, which knows the terminator's real code address.
        let _frame = ExceptionFrame {
            r0: argp as u32,
            pc: entry as u32,
            lr: 0,
            xpsr: XPSR_THUMB_BIT,
            ..ExceptionFrame::default()
        };

        self.tcbs[slot] = Tcb {
            static_priority: prio,
            dynamic_priority: prio,
            c,
            t,
            c_remaining: c,
            release_time: self.tick_count,
            state: ThreadState::Ready,
            privilege: PrivilegeLevel::User,
            saved_frame: SavedFrame {
                callee: CalleeContext::default(),
                user_sp: self.stacks.user_stack_top(slot),
            },
            ..Tcb::default()
        };

        Ok(())
    }

    /// `thread_kill`, called by `caller` on itself.
    ///
    /// Returns `true` if a switch should be requested.
    pub fn thread_kill(&mut self, caller: ThreadId) -> bool {
        if caller == self.default_thread() {
            // "exit" -- the caller leaves via the host I/O surface, not a switch.
            return false;
        }
        if caller == self.idle() {
            log::warn!("idle thread terminated; restarting its default loop");
            self.tcbs[caller].saved_frame = SavedFrame::default();
            return false;
        }
        self.tcbs[caller].state = ThreadState::Done;
        true
    }

    /// `wait_until_next_period`, called by `caller`.
    pub fn wait_until_next_period(&mut self, caller: ThreadId) -> bool {
        if caller == self.idle() {
            log::warn!("idle thread called wait_until_next_period; ignoring");
            return false;
        }
        self.tcbs[caller].state = ThreadState::Waiting;
        true
    }

    /// `scheduler_start(frequency)`: marks the scheduler as live. The tick
    /// source itself is configured by the port crate; this just flips the
    /// flag that governs whether the default slot is still eligible to run.
    pub fn scheduler_start(&mut self) -> KResult<()> {
        if self.scheduler_started {
            return Err(KernelError::SlotBusy);
        }
        self.scheduler_started = true;
        let default_thread = self.default_thread();
        self.tcbs[default_thread].state = ThreadState::New;
        Ok(())
    }

    pub fn get_priority(&self, t: ThreadId) -> u8 {
        self.tcbs[t].dynamic_priority
    }

    pub fn thread_time(&self, t: ThreadId) -> u32 {
        self.tcbs[t].elapsed
    }

    pub fn mutex_init(&mut self, max_prio: u8) -> KResult<usize> {
        self.mutexes.init(max_prio)
    }

    pub fn mutex_lock(&mut self, t: ThreadId, m: usize) -> KResult<crate::mutex::LockOutcome> {
        crate::mutex::lock(&mut self.mutexes, &mut self.tcbs, t, m)
    }

    pub fn mutex_unlock(&mut self, t: ThreadId, m: usize) -> KResult<crate::mutex::UnlockOutcome> {
        crate::mutex::unlock(&mut self.mutexes, &mut self.tcbs, t, m)
    }

    /// Runs the tick accountant for one tick.
    pub fn on_tick(&mut self) {
        let idle = self.idle();
        let default_thread = self.default_thread();
        tick::on_tick(
            &mut self.tick_count,
            &mut self.tcbs,
            self.current_thread,
            idle,
            default_thread,
        );
    }

    /// Runs the scheduler and updates `current_thread`. This is the
    /// body of the context-switch trampoline's "call the scheduler" step;
    /// the port crate is responsible for the surrounding register
    /// save/restore.
    pub fn switch(&mut self) -> ThreadId {
        let idle = self.idle();
        let default_thread = self.default_thread();
        let next = scheduler::select_next(&mut self.tcbs, idle, default_thread);
        self.current_thread = next;
        next
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// `sbrk(incr)`: bump the host-I/O heap break by `incr` bytes, returning
    /// the break's previous value. This heap is unrelated to the stack
    /// pools carved by `thread_init` and exists only to back the C-library
    /// surface (`malloc` et al. in user code), not thread stacks.
    pub fn sbrk(&mut self, incr: i32) -> KResult<usize> {
        let prev = self.brk;
        let next = if incr >= 0 {
            prev.checked_add(incr as usize)
        } else {
            prev.checked_sub((-incr) as usize)
        };
        match next {
            Some(next) if next <= HEAP_BYTES => {
                self.brk = next;
                Ok(prev)
            }
            _ => Err(KernelError::HeapExhausted),
        }
    }

    /// `write`/`read`: no file descriptor table is modeled (peripheral
    /// drivers are out of scope); every descriptor but the two standard
    /// streams is rejected.
    pub fn check_fd(fd: i32) -> KResult<()> {
        match fd {
            0 | 1 | 2 => Ok(()),
            _ => Err(KernelError::BadFd),
        }
    }
}
