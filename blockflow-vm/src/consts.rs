//! Engine-wide limits and defaults.

/// Maximum number of memory contexts.
pub const MAX_CONTEXTS: usize = 8;

/// Maximum dimensions of an array instance.
pub const MAX_DIMS: usize = 7;

/// Operand stack depth of the expression evaluator.
pub const EVAL_STACK_DEPTH: usize = 16;

/// Fastest allowed loop period.
pub const LOOP_PERIOD_MIN_US: u64 = 10_000;

/// Slowest allowed loop period.
pub const LOOP_PERIOD_MAX_US: u64 = 1_000_000;

/// Loop period applied when no `LOOP_CFG` packet arrived.
pub const DEFAULT_PERIOD_US: u64 = 10_000;

/// Ticks that may elapse without a completed cycle before the loop halts.
pub const DEFAULT_MAX_SKIPPED: u8 = 2;

/// Upper bound of one outbound transport frame.
pub const PUBLISH_MTU: usize = 512;

/// Bounded capacity of the wire log ring.
pub const LOG_RING_CAPACITY: usize = 64;
