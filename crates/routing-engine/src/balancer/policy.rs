use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::agent::Agent;
use crate::config::LoadBalanceStrategy;

/// Pluggable agent selection.
///
/// Candidates have already been filtered for availability, spare capacity and
/// capability. A policy returns `None` only when it finds none of them
/// suitable.
pub trait SelectionPolicy: Debug + Send + Sync {
    fn name(&self) -> &'static str;

    fn select<'a>(&self, candidates: &[&'a Agent]) -> Option<&'a Agent>;
}

/// Lowest current load wins; ties go to the smallest agent id
#[derive(Debug, Default)]
pub struct LeastBusy;

impl SelectionPolicy for LeastBusy {
    fn name(&self) -> &'static str {
        "least_busy"
    }

    fn select<'a>(&self, candidates: &[&'a Agent]) -> Option<&'a Agent> {
        candidates
            .iter()
            .copied()
            .min_by(|a, b| a.current_load.cmp(&b.current_load).then_with(|| a.id.cmp(&b.id)))
    }
}

/// Rotates through candidates in id order
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl SelectionPolicy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select<'a>(&self, candidates: &[&'a Agent]) -> Option<&'a Agent> {
        if candidates.is_empty() {
            return None;
        }
        let mut ordered: Vec<&'a Agent> = candidates.to_vec();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let index = self.next.fetch_add(1, Ordering::Relaxed) % ordered.len();
        Some(ordered[index])
    }
}

/// Lowest load relative to capacity wins; ties go to the smallest agent id
#[derive(Debug, Default)]
pub struct WeightedCapacity;

impl SelectionPolicy for WeightedCapacity {
    fn name(&self) -> &'static str {
        "weighted_capacity"
    }

    fn select<'a>(&self, candidates: &[&'a Agent]) -> Option<&'a Agent> {
        candidates.iter().copied().min_by(|a, b| {
            a.load_ratio()
                .total_cmp(&b.load_ratio())
                .then_with(|| b.max_load.cmp(&a.max_load))
                .then_with(|| a.id.cmp(&b.id))
        })
    }
}

/// Build the policy for a configured strategy
pub fn policy_for(strategy: LoadBalanceStrategy) -> Arc<dyn SelectionPolicy> {
    match strategy {
        LoadBalanceStrategy::LeastBusy => Arc::new(LeastBusy),
        LoadBalanceStrategy::RoundRobin => Arc::new(RoundRobin::default()),
        LoadBalanceStrategy::WeightedCapacity => Arc::new(WeightedCapacity),
    }
}
