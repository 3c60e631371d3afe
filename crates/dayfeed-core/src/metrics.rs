//! Cross-service metrics aggregation.
//!
//! Each report fans out to all eight services and folds the results into one
//! [`MetricsReport`]. Section reports are synchronous in-memory reads, so
//! `join_all` runs them one after another on the calling task; it buys
//! per-section isolation, not parallelism. A service that fails or panics
//! while reporting gets an error in its own section and the rest of the
//! report is unaffected.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::health::HealthDimension;
use crate::services::Services;
use crate::strategy::ServiceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    Statistics,
    Health,
    Performance,
}

/// One service's contribution to a report.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSection {
    pub service: ServiceId,
    /// Service score in [0, 1]; absent when the section failed.
    pub score: Option<f64>,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ServiceSection {
    fn ok(service: ServiceId, score: f64, data: Value) -> Self {
        Self {
            service,
            score: Some(score.clamp(0.0, 1.0)),
            data: Some(data),
            error: None,
        }
    }

    fn failed(service: ServiceId, error: String) -> Self {
        Self {
            service,
            score: None,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedMetrics {
    /// Lowest-scoring service.
    pub bottleneck: Option<ServiceId>,
    pub bottleneck_score: Option<f64>,
    pub overall_hit_rate: f64,
    pub average_service_score: f64,
    pub failed_sections: usize,
}

impl DerivedMetrics {
    pub fn from_sections(sections: &[ServiceSection], overall_hit_rate: f64) -> Self {
        let scored: Vec<(ServiceId, f64)> = sections
            .iter()
            .filter_map(|s| s.score.map(|score| (s.service, score)))
            .collect();
        let bottleneck = scored
            .iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .copied();
        let average_service_score = if scored.is_empty() {
            0.0
        } else {
            scored.iter().map(|(_, s)| s).sum::<f64>() / scored.len() as f64
        };

        Self {
            bottleneck: bottleneck.map(|(service, _)| service),
            bottleneck_score: bottleneck.map(|(_, score)| score),
            overall_hit_rate,
            average_service_score,
            failed_sections: sections.iter().filter(|s| s.error.is_some()).count(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub kind: ReportKind,
    pub generated_at: DateTime<Utc>,
    pub sections: Vec<ServiceSection>,
    pub derived: DerivedMetrics,
    pub elapsed_ms: f64,
}

impl MetricsReport {
    pub fn section(&self, service: ServiceId) -> Option<&ServiceSection> {
        self.sections.iter().find(|s| s.service == service)
    }
}

pub struct MetricsAggregator {
    services: Arc<Services>,
}

impl MetricsAggregator {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    pub async fn get_all_statistics(&self) -> MetricsReport {
        self.collect(ReportKind::Statistics).await
    }

    pub async fn get_all_health_metrics(&self) -> MetricsReport {
        self.collect(ReportKind::Health).await
    }

    pub async fn get_performance_analytics(&self) -> MetricsReport {
        self.collect(ReportKind::Performance).await
    }

    async fn collect(&self, kind: ReportKind) -> MetricsReport {
        self.collect_with(kind, service_report).await
    }

    async fn collect_with<F>(&self, kind: ReportKind, report_fn: F) -> MetricsReport
    where
        F: Fn(&Services, ServiceId, ReportKind, DateTime<Utc>) -> Result<(f64, Value), String>,
    {
        let started = Instant::now();
        let now = Utc::now();

        let futures = ServiceId::STARTUP_ORDER.iter().map(|service| {
            let services = Arc::clone(&self.services);
            let service = *service;
            let report_fn = &report_fn;
            async move {
                let report = AssertUnwindSafe(async { report_fn(&services, service, kind, now) })
                    .catch_unwind()
                    .await;
                match report {
                    Ok(Ok((score, data))) => ServiceSection::ok(service, score, data),
                    Ok(Err(e)) => {
                        warn!(service = service.as_str(), error = %e, "Service report failed");
                        ServiceSection::failed(service, e)
                    }
                    Err(_) => {
                        warn!(service = service.as_str(), "Service report panicked");
                        ServiceSection::failed(service, "report panicked".to_string())
                    }
                }
            }
        });
        let sections = join_all(futures).await;

        let derived = DerivedMetrics::from_sections(&sections, self.services.stats.hit_rate());
        debug!(
            kind = ?kind,
            bottleneck = ?derived.bottleneck,
            failed = derived.failed_sections,
            "Metrics aggregated"
        );
        MetricsReport {
            kind,
            generated_at: now,
            sections,
            derived,
            elapsed_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Score and payload for one service.
fn service_report(
    services: &Services,
    service: ServiceId,
    kind: ReportKind,
    now: DateTime<Utc>,
) -> Result<(f64, Value), String> {
    let dimension = |d: HealthDimension| {
        services
            .health
            .dimension_scores_at(now)
            .get(&d)
            .copied()
            .unwrap_or(0.0)
    };

    match service {
        ServiceId::ContentStore => Ok((
            dimension(HealthDimension::Content),
            to_value(&services.store.status_at(now))?,
        )),
        ServiceId::Timezone => Ok((
            dimension(HealthDimension::Timezone),
            to_value(&services.timezone.status())?,
        )),
        ServiceId::Sync => Ok((
            dimension(HealthDimension::Sync),
            to_value(&services.sync.status())?,
        )),
        ServiceId::Maintenance => Ok((
            dimension(HealthDimension::Maintenance),
            to_value(&services.maintenance.status())?,
        )),
        ServiceId::Health => {
            let snapshot = match kind {
                ReportKind::Health => services.health.record_snapshot(),
                _ => services.health.snapshot_at(now),
            };
            Ok((snapshot.overall_score, to_value(&snapshot)?))
        }
        ServiceId::Statistics => {
            let snapshot = services.stats.snapshot();
            let score = if snapshot.reads == 0 { 1.0 } else { snapshot.hit_rate };
            let data = match kind {
                ReportKind::Performance => to_value(&snapshot.timings)?,
                _ => to_value(&snapshot)?,
            };
            Ok((score, data))
        }
        ServiceId::Performance => {
            let analysis = services.performance.analyze();
            Ok((analysis.score, to_value(&analysis)?))
        }
        ServiceId::Warming => Ok((
            services.warming.success_ratio(),
            to_value(&services.warming.status())?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, Environment};
    use crate::source::scripted::ScriptedSource;
    use crate::storage::MemoryStore;

    fn aggregator() -> MetricsAggregator {
        let config = CacheConfig::for_environment(Environment::Test);
        let services = Services::new(config, Arc::new(MemoryStore::new()), Arc::new(ScriptedSource::ok("x")));
        MetricsAggregator::new(Arc::new(services))
    }

    fn scored(service: ServiceId, score: f64) -> ServiceSection {
        ServiceSection::ok(service, score, Value::Null)
    }

    #[test]
    fn test_bottleneck_is_lowest_score() {
        let sections = vec![
            scored(ServiceId::ContentStore, 1.0),
            scored(ServiceId::Sync, 0.2),
            scored(ServiceId::Health, 0.8),
        ];
        let derived = DerivedMetrics::from_sections(&sections, 0.5);
        assert_eq!(derived.bottleneck, Some(ServiceId::Sync));
        assert_eq!(derived.bottleneck_score, Some(0.2));
        assert!((derived.average_service_score - (2.0 / 3.0)).abs() < 1e-9);
        assert_eq!(derived.overall_hit_rate, 0.5);
    }

    #[test]
    fn test_failed_section_does_not_abort_fold() {
        let sections = vec![
            scored(ServiceId::ContentStore, 0.9),
            ServiceSection::failed(ServiceId::Warming, "boom".to_string()),
        ];
        let derived = DerivedMetrics::from_sections(&sections, 1.0);
        assert_eq!(derived.failed_sections, 1);
        assert_eq!(derived.bottleneck, Some(ServiceId::ContentStore));
        assert!((derived.average_service_score - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_live_report_covers_every_service() {
        let report = aggregator().get_all_health_metrics().await;
        assert_eq!(report.sections.len(), ServiceId::STARTUP_ORDER.len());
        assert_eq!(report.derived.failed_sections, 0);
        assert!(report.sections.iter().all(|s| s.score.is_some() && s.data.is_some()));
    }

    #[tokio::test]
    async fn test_failing_and_panicking_sections_are_isolated() {
        let aggregator = aggregator();
        let report = aggregator
            .collect_with(ReportKind::Statistics, |services, service, kind, now| match service {
                ServiceId::Maintenance => Err("maintenance unavailable".to_string()),
                ServiceId::Warming => panic!("warming report blew up"),
                _ => service_report(services, service, kind, now),
            })
            .await;

        assert_eq!(report.sections.len(), ServiceId::STARTUP_ORDER.len());
        assert_eq!(report.derived.failed_sections, 2);

        let maintenance = report.section(ServiceId::Maintenance).unwrap();
        assert_eq!(maintenance.error.as_deref(), Some("maintenance unavailable"));
        assert!(maintenance.score.is_none());
        let warming = report.section(ServiceId::Warming).unwrap();
        assert_eq!(warming.error.as_deref(), Some("report panicked"));

        let healthy: Vec<_> = report
            .sections
            .iter()
            .filter(|s| !matches!(s.service, ServiceId::Maintenance | ServiceId::Warming))
            .collect();
        assert_eq!(healthy.len(), ServiceId::STARTUP_ORDER.len() - 2);
        assert!(healthy.iter().all(|s| s.score.is_some() && s.error.is_none()));
        assert!(report.derived.bottleneck.is_some());
    }

    #[test]
    fn test_empty_sections() {
        let derived = DerivedMetrics::from_sections(&[], 0.0);
        assert_eq!(derived.bottleneck, None);
        assert_eq!(derived.average_service_score, 0.0);
    }
}
