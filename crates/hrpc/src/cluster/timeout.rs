// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Full-link timeout budget computation.
//!
//! The budget is a pair (original, remaining) propagated across service
//! hops. Each hop recomputes the remaining budget by subtracting the time
//! elapsed since the link started, so a request stops consuming resources
//! downstream once the caller upstream has given up. Budgets are
//! monotonically non-increasing across hops.

use std::time::Instant;

/// The (original, remaining) timeout budget for one hop.
///
/// `remaining` may go negative once the link budget is exhausted; the
/// handler fails fast before dispatch when full-link propagation is
/// enabled on both the call and the inherited link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeftTimeout {
    original_ms: u64,
    remaining_ms: i64,
}

impl LeftTimeout {
    pub fn new(original_ms: u64, remaining_ms: i64) -> Self {
        Self {
            original_ms,
            remaining_ms,
        }
    }

    pub fn original_ms(&self) -> u64 {
        self.original_ms
    }

    pub fn remaining_ms(&self) -> i64 {
        self.remaining_ms
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_ms <= 0
    }
}

/// Link budget inherited from the upstream caller.
#[derive(Debug, Clone)]
pub struct LinkContext {
    /// Total budget established at the first hop.
    pub total_ms: u64,
    /// Remaining budget as observed when this context was captured.
    pub remaining_ms: i64,
    /// When the captured remaining value was established.
    pub captured_at: Instant,
    /// Whether the upstream enabled full-link timeout propagation.
    pub full_link_enabled: bool,
}

impl LinkContext {
    /// Milliseconds elapsed since the remaining value was captured.
    fn elapsed_ms(&self) -> i64 {
        self.captured_at.elapsed().as_millis() as i64
    }
}

/// Compute this hop's budget from the explicit per-call timeout and the
/// inherited link context.
///
/// 1. No inherited link, or link without full-link propagation: the budget
///    is the per-call timeout (or the configured default); remaining equals
///    original.
/// 2. Inherited link, no per-call timeout: remaining = inherited remaining
///    minus elapsed, original = inherited total.
/// 3. Inherited link with per-call timeout: original = min(per-call,
///    inherited total); remaining = min(per-call, inherited remaining minus
///    elapsed).
pub fn compute_budget(
    per_call_ms: Option<u64>,
    default_ms: u64,
    link: Option<&LinkContext>,
) -> LeftTimeout {
    let link = match link {
        Some(link) if link.full_link_enabled => link,
        _ => {
            let t = per_call_ms.unwrap_or(default_ms);
            return LeftTimeout::new(t, t as i64);
        }
    };

    let inherited_remaining = link.remaining_ms - link.elapsed_ms();
    match per_call_ms {
        None => LeftTimeout::new(link.total_ms, inherited_remaining),
        Some(per_call) => LeftTimeout::new(
            per_call.min(link.total_ms),
            (per_call as i64).min(inherited_remaining),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn link(total: u64, remaining: i64, enabled: bool) -> LinkContext {
        LinkContext {
            total_ms: total,
            remaining_ms: remaining,
            captured_at: Instant::now(),
            full_link_enabled: enabled,
        }
    }

    #[test]
    fn test_first_hop_equals_per_call() {
        let budget = compute_budget(Some(2000), 1000, None);
        assert_eq!(budget.original_ms(), 2000);
        assert_eq!(budget.remaining_ms(), 2000);
    }

    #[test]
    fn test_first_hop_falls_back_to_default() {
        let budget = compute_budget(None, 1000, None);
        assert_eq!(budget.original_ms(), 1000);
        assert_eq!(budget.remaining_ms(), 1000);
    }

    #[test]
    fn test_disabled_link_ignored() {
        let budget = compute_budget(Some(500), 1000, Some(&link(5000, 4000, false)));
        assert_eq!(budget.original_ms(), 500);
        assert_eq!(budget.remaining_ms(), 500);
    }

    #[test]
    fn test_inherited_without_per_call() {
        let ctx = link(5000, 3000, true);
        let budget = compute_budget(None, 1000, Some(&ctx));
        assert_eq!(budget.original_ms(), 5000);
        // No measurable elapsed time in-test; allow a small scheduling slop.
        assert!(budget.remaining_ms() <= 3000 && budget.remaining_ms() > 2900);
    }

    #[test]
    fn test_inherited_with_per_call_takes_min() {
        let ctx = link(5000, 3000, true);
        let budget = compute_budget(Some(2000), 1000, Some(&ctx));
        assert_eq!(budget.original_ms(), 2000);
        assert!(budget.remaining_ms() <= 2000);

        let budget = compute_budget(Some(8000), 1000, Some(&ctx));
        assert_eq!(budget.original_ms(), 5000);
        assert!(budget.remaining_ms() <= 3000);
    }

    #[test]
    fn test_elapsed_time_is_subtracted() {
        let ctx = LinkContext {
            total_ms: 5000,
            remaining_ms: 100,
            captured_at: Instant::now() - Duration::from_millis(300),
            full_link_enabled: true,
        };
        let budget = compute_budget(None, 1000, Some(&ctx));
        assert!(budget.remaining_ms() <= -200);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_budgets_non_increasing_across_hops() {
        // Simulate three hops, each capturing the previous remaining.
        let mut remaining = 4000i64;
        let total = 4000u64;
        for _ in 0..3 {
            let ctx = link(total, remaining, true);
            let budget = compute_budget(None, 1000, Some(&ctx));
            assert!(budget.remaining_ms() <= remaining);
            assert_eq!(budget.original_ms(), total);
            remaining = budget.remaining_ms();
        }
    }
}
