//! Debug assertion macros for admission queue invariants.
//!
//! Only active in debug builds (`#[cfg(debug_assertions)]`), so release
//! builds pay nothing.

// =============================================================================
// Capacity bound
// =============================================================================

/// Assert that the queue never holds more items than its current capacity.
///
/// **Invariant**: `len ≤ capacity` after every successful enqueue
///
/// Used in: `AdaptiveQueue::enqueue()`
macro_rules! debug_assert_within_capacity {
    ($len:expr, $capacity:expr) => {
        debug_assert!(
            $len <= $capacity,
            "capacity bound violated: {} items queued with capacity {}",
            $len,
            $capacity
        )
    };
}

/// Assert that queued bytes stay within the memory budget.
///
/// **Invariant**: `Σ estimated_size ≤ budget_bytes` in memory-budget mode
///
/// Used in: `AdaptiveQueue::enqueue()`
macro_rules! debug_assert_within_budget {
    ($bytes:expr, $budget:expr) => {
        debug_assert!(
            $bytes <= $budget,
            "memory budget violated: {} bytes queued with budget {}",
            $bytes,
            $budget
        )
    };
}

// =============================================================================
// State machine
// =============================================================================

/// Assert that a state transition only moves forward.
///
/// **Invariant**: `Open → Draining → Closed`, never backwards
///
/// Used in: `AdaptiveQueue::begin_drain()`, `AdaptiveQueue::close()`
macro_rules! debug_assert_forward_transition {
    ($from:expr, $to:expr) => {
        debug_assert!(
            $from <= $to,
            "queue state moved backwards: {:?} -> {:?}",
            $from,
            $to
        )
    };
}

/// Assert that a closed queue holds no items.
///
/// **Invariant**: `state == Closed → len == 0`
///
/// Used in: `AdaptiveQueue::close()`, dequeue path on drain completion
macro_rules! debug_assert_closed_empty {
    ($closed:expr, $len:expr) => {
        debug_assert!(
            !$closed || $len == 0,
            "queue closed with {} items still buffered",
            $len
        )
    };
}

pub(crate) use debug_assert_closed_empty;
pub(crate) use debug_assert_forward_transition;
pub(crate) use debug_assert_within_budget;
pub(crate) use debug_assert_within_capacity;
