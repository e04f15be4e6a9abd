//! Native stack growth for the recursive evaluator.
//!
//! Every nested `evaluate` runs inside [`ensure_sufficient_stack`], so deep
//! but legal programs never overflow the thread stack. The evaluation depth
//! limit in [`crate::evaluator::EvalConfig`] is what stops runaway recursion.

/// If less than this remains, grow the stack.
const RED_ZONE: usize = 100 * 1024;

/// Size of each new stack segment.
const STACK_PER_RECURSION: usize = 1024 * 1024;

#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

#[inline]
#[cfg(target_arch = "wasm32")]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depth(n: u32) -> u32 {
        ensure_sufficient_stack(|| if n == 0 { 0 } else { 1 + depth(n - 1) })
    }

    #[test]
    fn test_deep_recursion_grows_stack() {
        assert_eq!(depth(100_000), 100_000);
    }
}
