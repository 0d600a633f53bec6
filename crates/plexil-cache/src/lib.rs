//! # plexil-cache
//!
//! The state cache, timebase and external-interface facade layer of the
//! PLEXIL execution kernel: the sole boundary between the single-threaded
//! exec driver in `plexil-exec` and the outside world.
//!
//! ## Core concepts
//!
//! - [`StateCache`] holds one [`StateCacheEntry`] per distinct `State` ever
//!   looked up. It deduplicates reads across `Lookup` consumers, stamps
//!   every write with the cycle it arrived in, and derives the aggregate
//!   notification band ([`ThresholdBand`]) that lets an external interface
//!   suppress uninteresting updates.
//! - [`Dispatcher`] is the outbound half of the facade: `lookup_now`,
//!   `set_thresholds`/`clear_thresholds`, and command/update dispatch.
//! - [`ExternalInterface`] is the inbound half: a thread-safe mailbox that
//!   timer threads, IPC listener threads and adapter I/O threads call into;
//!   the exec driver drains it at the top of every macro step.
//! - [`Timebase`] is the clock: either a fixed-tick wakeup or a one-shot
//!   deadline wakeup, feeding the driver's cycle boundary in the absence of
//!   other external events.
//! - [`BootRecorder`] is the optional checkpoint collaborator: it observes
//!   cache writes and node transitions after the fact and writes boot/crash
//!   records. It never reads back into the kernel.
//!
//! Nothing in this crate knows about the expression graph, the node arena,
//! or the macro-step algorithm — those live in `plexil-exec`, which depends
//! on this crate, not the other way around.

pub mod boot;
pub mod cache_entry;
pub mod config;
pub mod debug;
pub mod dispatcher;
pub mod error;
pub mod interface;
pub mod state_cache;
pub mod timebase;

pub use boot::{
    BootRecord, BootRecorder, CacheWriteRecord, CrashRecord, CrashReason, InMemoryBootRecorder,
    NodeTransitionRecord, NullBootRecorder,
};
pub use cache_entry::{
    LookupId, StateCacheEntry, ThresholdBand, ThresholdChange, WriteOutcome, DEFAULT_REAL_EPSILON,
};
pub use config::CacheConfig;
pub use debug::DebugController;
pub use dispatcher::{CommandId, CommandRequest, Dispatcher, MessageHandle, UpdateId, UpdateRequest};
pub use error::{CacheError, Result};
pub use interface::{ExternalInterface, InboundEvent};
pub use state_cache::StateCache;
pub use timebase::{now_seconds, Timebase, WakeupFn};
