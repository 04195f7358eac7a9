use parking_lot::Mutex;
use tracing::info;

use crate::agent::PoolStats;
use crate::events::{ScalingDirection, ScalingSignal};

/// Turns pool utilization into scale-up / scale-down advisories.
///
/// A signal is emitted when utilization crosses a threshold and not again
/// until utilization has crossed the other way or returned to the band in
/// between.
#[derive(Debug)]
pub(crate) struct ScalingMonitor {
    scale_up: f64,
    scale_down: f64,
    last: Mutex<Option<ScalingDirection>>,
}

impl ScalingMonitor {
    pub(crate) fn new(scale_up: f64, scale_down: f64) -> Self {
        Self {
            scale_up,
            scale_down,
            last: Mutex::new(None),
        }
    }

    pub(crate) fn evaluate(&self, stats: &PoolStats) -> Option<ScalingSignal> {
        if stats.total_capacity == 0 {
            return None;
        }

        let direction = if stats.utilization >= self.scale_up {
            Some(ScalingDirection::Up)
        } else if stats.utilization <= self.scale_down {
            Some(ScalingDirection::Down)
        } else {
            None
        };

        let mut last = self.last.lock();
        if *last == direction {
            return None;
        }
        *last = direction;

        direction.map(|direction| {
            info!(
                "📈 Scaling signal {:?}: utilization {:.2} across {} agents",
                direction, stats.utilization, stats.total
            );
            ScalingSignal {
                direction,
                utilization: stats.utilization,
                available_agents: stats.available,
                total_agents: stats.total,
            }
        })
    }
}
