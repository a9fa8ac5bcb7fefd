//! Planner state guarded by the scheduler lock.

use serde::{Deserialize, Serialize};

use super::allocation::{allocate_budget, apply_permutation, descending_order, truncate_to_top_n};
use crate::scan::{cv_matches, ScanRequest};

/// Bookkeeping for one CV value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConditionState {
    /// CV value
    pub cv: f64,
    /// Survey scans allowed this cycle; `None` means unset or forced off
    pub max_allowed: Option<u32>,
    /// Survey scans issued this cycle
    pub issued: u32,
    /// Candidate count reported during discovery
    pub precursor_count: usize,
    /// `precursor_count` rounded down to a multiple of top-N
    pub precursor_count_truncated: usize,
    /// Whether discovery feedback has arrived for this condition
    pub planned: bool,
}

impl ConditionState {
    /// Fresh state for `cv`.
    pub fn new(cv: f64) -> Self {
        Self {
            cv,
            max_allowed: None,
            issued: 0,
            precursor_count: 0,
            precursor_count_truncated: 0,
            planned: false,
        }
    }

    /// Surveys still available this cycle.
    pub fn remaining(&self) -> u32 {
        self.max_allowed
            .map_or(0, |max| max.saturating_sub(self.issued))
    }

    /// True once the budget is spent, or when it was never set.
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn reset(&mut self) {
        *self = Self::new(self.cv);
    }
}

/// Mutable planner state. Every field is touched only while the scheduler
/// holds its lock.
#[derive(Debug)]
pub(crate) struct PlannerState {
    pub conditions: Vec<ConditionState>,
    pub shelved: Vec<Vec<ScanRequest>>,
    pub current: usize,
    pub plan_mode: bool,
    pub unplanned_attempts: u32,
    pub visit_issued: u32,
    pub discovery_rounds: u64,
    pub cycles_completed: u64,
}

impl PlannerState {
    pub fn new(cv_values: &[f64]) -> Self {
        Self {
            conditions: cv_values.iter().copied().map(ConditionState::new).collect(),
            shelved: vec![Vec::new(); cv_values.len()],
            current: 0,
            plan_mode: true,
            unplanned_attempts: 0,
            visit_issued: 0,
            discovery_rounds: 0,
            cycles_completed: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn index_of(&self, cv: f64) -> Option<usize> {
        self.conditions.iter().position(|c| cv_matches(c.cv, cv))
    }

    pub fn current_cv(&self) -> Option<f64> {
        self.conditions.get(self.current).map(|c| c.cv)
    }

    pub fn all_planned(&self) -> bool {
        self.conditions.iter().all(|c| c.planned)
    }

    /// Reset every condition and leave discovery with the last index current.
    /// Returns the shelved requests, which are stale from here on.
    pub fn begin_discovery(&mut self) -> Vec<ScanRequest> {
        for condition in &mut self.conditions {
            condition.reset();
        }
        self.plan_mode = false;
        self.current = self.conditions.len().saturating_sub(1);
        self.unplanned_attempts = 0;
        self.visit_issued = 0;
        self.discovery_rounds += 1;
        self.shelved.iter_mut().flat_map(std::mem::take).collect()
    }

    /// Record discovery feedback. Returns false if the condition already
    /// reported during this phase.
    pub fn record(&mut self, index: usize, count: usize, top_n: usize) -> bool {
        let condition = &mut self.conditions[index];
        if condition.planned {
            return false;
        }
        condition.precursor_count = count;
        condition.precursor_count_truncated = truncate_to_top_n(count, top_n);
        condition.planned = true;
        true
    }

    /// Distribute `budget` across conditions from the recorded counts.
    pub fn allocate(&mut self, budget: u32) {
        let counts: Vec<usize> = self.conditions.iter().map(|c| c.precursor_count).collect();
        let truncated: Vec<usize> = self
            .conditions
            .iter()
            .map(|c| c.precursor_count_truncated)
            .collect();

        for (condition, max) in self
            .conditions
            .iter_mut()
            .zip(allocate_budget(&counts, &truncated, budget))
        {
            condition.max_allowed = Some(max);
        }
    }

    /// Sort conditions by descending precursor count, applying one
    /// permutation to every per-condition array.
    pub fn resort_by_precursor_count(&mut self) {
        let counts: Vec<usize> = self.conditions.iter().map(|c| c.precursor_count).collect();
        let order = descending_order(&counts);
        self.conditions = apply_permutation(std::mem::take(&mut self.conditions), &order);
        self.shelved = apply_permutation(std::mem::take(&mut self.shelved), &order);
        self.current = order.iter().position(|&i| i == self.current).unwrap_or(0);
    }

    /// Condition to visit after `from` during allocation, or `None` when the
    /// cycle is over.
    ///
    /// Step-constrained rotation walks down from `from - 1` to 0. With
    /// `wrap` set (rotation by switch interval) it continues from the top
    /// and may come back to `from`. Unconstrained rotation picks the condition
    /// with the most remaining budget, preferring any condition other than
    /// `from` and, on ties, the higher index.
    pub fn next_condition(&self, from: usize, step_constrained: bool, wrap: bool) -> Option<usize> {
        let n = self.conditions.len();
        if step_constrained {
            let below = (0..from).rev();
            if wrap {
                let above = (from..n).rev();
                below
                    .chain(above)
                    .find(|&i| !self.conditions[i].is_exhausted())
            } else {
                below.into_iter().find(|&i| !self.conditions[i].is_exhausted())
            }
        } else {
            let best_other = (0..n)
                .filter(|&i| i != from && !self.conditions[i].is_exhausted())
                .max_by_key(|&i| (self.conditions[i].remaining(), i));
            match best_other {
                Some(i) => Some(i),
                None if wrap && !self.conditions[from].is_exhausted() => Some(from),
                None => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planned_state(budgets: &[Option<u32>]) -> PlannerState {
        let cvs: Vec<f64> = (0..budgets.len()).map(|i| -40.0 - 10.0 * i as f64).collect();
        let mut state = PlannerState::new(&cvs);
        state.begin_discovery();
        for (condition, budget) in state.conditions.iter_mut().zip(budgets) {
            condition.planned = true;
            condition.max_allowed = *budget;
        }
        state
    }

    #[test]
    fn test_begin_discovery_resets_and_points_at_last() {
        let mut state = PlannerState::new(&[-40.0, -50.0, -60.0]);
        state.conditions[1].issued = 4;
        state.conditions[1].planned = true;

        let stale = state.begin_discovery();
        assert!(stale.is_empty());
        assert!(!state.plan_mode);
        assert_eq!(state.current, 2);
        assert_eq!(state.discovery_rounds, 1);
        assert!(state.conditions.iter().all(|c| !c.planned && c.issued == 0));
    }

    #[test]
    fn test_record_is_idempotent_within_phase() {
        let mut state = PlannerState::new(&[-40.0, -50.0]);
        state.begin_discovery();

        assert!(state.record(0, 23, 5));
        assert!(!state.record(0, 99, 5));
        assert_eq!(state.conditions[0].precursor_count, 23);
        assert_eq!(state.conditions[0].precursor_count_truncated, 20);
        assert!(!state.all_planned());
    }

    #[test]
    fn test_exhausted_includes_unset() {
        let mut condition = ConditionState::new(-45.0);
        assert!(condition.is_exhausted());
        condition.max_allowed = Some(2);
        assert!(!condition.is_exhausted());
        condition.issued = 2;
        assert!(condition.is_exhausted());
    }

    #[test]
    fn test_step_constrained_skips_exhausted_and_stops_at_zero() {
        let state = planned_state(&[Some(3), Some(0), None, Some(2)]);
        assert_eq!(state.next_condition(3, true, false), Some(0));
        assert_eq!(state.next_condition(0, true, false), None);
    }

    #[test]
    fn test_step_constrained_wrap_returns_to_top() {
        let state = planned_state(&[Some(0), Some(4), Some(1)]);
        assert_eq!(state.next_condition(0, true, true), Some(2));
        let drained = planned_state(&[Some(0), Some(0), Some(0)]);
        assert_eq!(drained.next_condition(1, true, true), None);
    }

    #[test]
    fn test_unconstrained_picks_largest_remaining() {
        let state = planned_state(&[Some(2), Some(7), Some(7), Some(1)]);
        assert_eq!(state.next_condition(3, false, false), Some(2));
        assert_eq!(state.next_condition(2, false, false), Some(1));

        let only_current = planned_state(&[Some(0), Some(5)]);
        assert_eq!(only_current.next_condition(1, false, false), None);
        assert_eq!(only_current.next_condition(1, false, true), Some(1));
    }

    #[test]
    fn test_resort_moves_busiest_condition_first() {
        let mut state = PlannerState::new(&[-40.0, -50.0, -60.0]);
        state.begin_discovery();
        state.record(0, 5, 5);
        state.record(1, 30, 5);
        state.record(2, 12, 5);
        state.shelved[1].push(ScanRequest::new(
            crate::scan::ScanKind::Targeted,
            crate::scan::Analyzer::Orbitrap,
            120.0,
            2000.0,
        ));

        state.resort_by_precursor_count();
        let cvs: Vec<f64> = state.conditions.iter().map(|c| c.cv).collect();
        assert_eq!(cvs, vec![-50.0, -60.0, -40.0]);
        // The shelf moved with its condition.
        assert_eq!(state.shelved[0].len(), 1);
        assert!(state.shelved[1].is_empty());
    }
}
