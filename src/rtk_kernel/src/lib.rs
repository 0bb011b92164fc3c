//! Core of a small preemptive real-time kernel implementing fixed-priority
//! Rate-Monotonic Scheduling with admission control and the Immediate
//! Priority Ceiling Protocol.
//!
//! This crate is target-independent: it owns the thread table, the
//! scheduler, the admission test, and the mutex protocol, but never touches
//! a register or a trap frame directly. A port crate (e.g. `rtk_port_arm_m`)
//! supplies the context-switch trampoline, the tick source, and the
//! supervisor-call trap-frame decoding, and calls into [`syscall::dispatch`]
//! to run the operation itself.
#![cfg_attr(not(any(test, feature = "host-sim")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod admission;
pub mod bitmap;
pub mod error;
pub mod mutex;
pub mod scheduler;
pub mod state;
pub mod syscall;
pub mod thread;
pub mod tick;

pub use error::KernelError;
pub use state::KernelState;
pub use thread::{ThreadId, ThreadState};
