// ============================================================================
// HEALTH SCORER
// ============================================================================
// Pure scoring over a collected snapshot. The weighting of inputs is behind
// `HealthWeighting`; the bucketing into labels and messages is fixed.
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::collector::LoadStats;

// ----------------------------------------------------------------------------
// Health Model
// ----------------------------------------------------------------------------

/// Qualitative bucket of a health score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HealthStatus {
    Critical,
    Poor,
    Fair,
    Satisfactory,
    Good,
    Excellent,
}

impl HealthStatus {
    /// Bucket a 0-100 score.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 90.0 => HealthStatus::Excellent,
            s if s >= 85.0 => HealthStatus::Good,
            s if s >= 70.0 => HealthStatus::Satisfactory,
            s if s >= 50.0 => HealthStatus::Fair,
            s if s >= 30.0 => HealthStatus::Poor,
            _ => HealthStatus::Critical,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => "Excellent",
            HealthStatus::Good => "Good",
            HealthStatus::Satisfactory => "Satisfactory",
            HealthStatus::Fair => "Fair",
            HealthStatus::Poor => "Poor",
            HealthStatus::Critical => "Critical",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            HealthStatus::Excellent => {
                "[Excellent] Service health is optimal. All systems are operating within normal parameters."
            }
            HealthStatus::Good => {
                "[Good] Service health is performing well with minor optimizations recommended."
            }
            HealthStatus::Satisfactory => {
                "[Satisfactory] Service health is stable with room for performance improvements."
            }
            HealthStatus::Fair => {
                "[Fair] Service health is functional but requires attention to resource utilization."
            }
            HealthStatus::Poor => {
                "[Poor] Service health is degraded. Immediate investigation and remediation required."
            }
            HealthStatus::Critical => {
                "[Critical] Service health is severely compromised. Urgent intervention necessary."
            }
        }
    }
}

/// One scored dimension (service or system).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    /// 0-100
    pub percent: f64,
    /// `percent > 50`
    pub healthy: bool,
    pub status: HealthStatus,
    pub message: String,
}

impl Health {
    pub fn from_percent(percent: f64) -> Self {
        let percent = if percent.is_finite() { percent.clamp(0.0, 100.0) } else { 0.0 };
        let status = HealthStatus::from_score(percent);
        Self {
            percent,
            healthy: percent > 50.0,
            status,
            message: status.message().to_string(),
        }
    }
}

impl Default for Health {
    fn default() -> Self {
        Self::from_percent(0.0)
    }
}

/// Service and system health of one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service: Health,
    pub system: Health,
}

// ----------------------------------------------------------------------------
// Weighting
// ----------------------------------------------------------------------------

/// Maps load percentages to raw 0-100 scores.
pub trait HealthWeighting: Send + Sync {
    fn service_score(&self, load: &LoadStats) -> f64;

    fn system_score(&self, load: &LoadStats) -> f64;
}

/// Equal weight on CPU and memory load.
#[derive(Debug, Clone, Copy)]
pub struct LoadWeighting {
    pub cpu_weight: f64,
    pub memory_weight: f64,
}

impl Default for LoadWeighting {
    fn default() -> Self {
        Self {
            cpu_weight: 0.5,
            memory_weight: 0.5,
        }
    }
}

impl HealthWeighting for LoadWeighting {
    fn service_score(&self, load: &LoadStats) -> f64 {
        self.cpu_weight * load.service_cpu_load + self.memory_weight * load.service_memory_load
    }

    fn system_score(&self, load: &LoadStats) -> f64 {
        self.cpu_weight * load.system_cpu_load + self.memory_weight * load.system_memory_load
    }
}

/// Score a snapshot's load figures.
pub fn score(weighting: &dyn HealthWeighting, load: &LoadStats) -> ServiceHealth {
    ServiceHealth {
        service: Health::from_percent(weighting.service_score(load)),
        system: Health::from_percent(weighting.system_score(load)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn load(cpu: f64, mem: f64) -> LoadStats {
        LoadStats {
            service_cpu_load: cpu,
            service_memory_load: mem,
            system_cpu_load: cpu,
            system_memory_load: mem,
            ..Default::default()
        }
    }

    #[rstest]
    #[case(100.0, HealthStatus::Excellent)]
    #[case(90.0, HealthStatus::Excellent)]
    #[case(89.9, HealthStatus::Good)]
    #[case(85.0, HealthStatus::Good)]
    #[case(70.0, HealthStatus::Satisfactory)]
    #[case(50.0, HealthStatus::Fair)]
    #[case(30.0, HealthStatus::Poor)]
    #[case(29.9, HealthStatus::Critical)]
    #[case(0.0, HealthStatus::Critical)]
    fn test_bucket_boundaries(#[case] score: f64, #[case] expected: HealthStatus) {
        assert_eq!(HealthStatus::from_score(score), expected);
    }

    #[test]
    fn test_idle_snapshot_is_critical() {
        let health = score(&LoadWeighting::default(), &load(0.0, 0.0));
        assert_eq!(health.service.percent, 0.0);
        assert_eq!(health.service.status, HealthStatus::Critical);
        assert!(!health.service.healthy);
        assert!(health.system.message.starts_with("[Critical]"));
    }

    #[test]
    fn test_saturated_snapshot_clamps_to_hundred() {
        let health = score(&LoadWeighting::default(), &load(100.0, 100.0));
        assert_eq!(health.service.percent, 100.0);
        assert_eq!(health.service.status, HealthStatus::Excellent);
        assert!(health.service.healthy);

        let over = score(&LoadWeighting { cpu_weight: 1.0, memory_weight: 1.0 }, &load(100.0, 100.0));
        assert_eq!(over.system.percent, 100.0);
    }

    #[test]
    fn test_healthy_is_strictly_above_fifty() {
        assert!(!Health::from_percent(50.0).healthy);
        assert!(Health::from_percent(50.1).healthy);
    }

    #[test]
    fn test_nan_scores_as_zero() {
        assert_eq!(Health::from_percent(f64::NAN).percent, 0.0);
    }
}
