//! Baseline-vs-current regression analysis over performance summaries
//!
//! Every monitored metric is lower-is-better, so a regression is a relative
//! increase of the mean: `(current - baseline) / baseline > threshold`.
//! Increases above [`CRITICAL_CHANGE`] are critical, the rest moderate.
//! A decrease beyond the same threshold is reported as an improvement.

use super::thresholds::metric_names;
use super::PerformanceSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REGRESSION_THRESHOLD: f64 = 0.1;
pub const CRITICAL_CHANGE: f64 = 0.2;

pub const NO_REGRESSIONS: &str = "No significant performance regressions detected";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Moderate,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Regression {
    pub metric: String,
    pub baseline: f64,
    pub current: f64,
    /// Relative change, 0.25 = 25% slower
    pub change: f64,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Improvement {
    pub metric: String,
    pub baseline: f64,
    pub current: f64,
    /// Relative change, -0.25 = 25% faster
    pub change: f64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegressionReport {
    pub summary: String,
    pub regressions: Vec<Regression>,
    pub critical_regressions: Vec<Regression>,
    pub moderate_regressions: Vec<Regression>,
    #[serde(default)]
    pub improvements: Vec<Improvement>,
    pub recommendations: Vec<String>,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

impl RegressionReport {
    pub fn has_critical(&self) -> bool {
        !self.critical_regressions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionAnalyzer {
    threshold: f64,
}

impl Default for RegressionAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_REGRESSION_THRESHOLD)
    }
}

impl RegressionAnalyzer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compare the mean of every metric present in both summaries
    pub fn analyze(&self, baseline: &PerformanceSummary, current: &PerformanceSummary) -> RegressionReport {
        let mut regressions = Vec::new();
        let mut improvements = Vec::new();
        for (name, base) in &baseline.metrics {
            let Some(now) = current.metrics.get(name) else {
                continue;
            };
            match self.compare(name, base.mean, now.mean) {
                Some(Change::Regressed(r)) => regressions.push(r),
                Some(Change::Improved(i)) => improvements.push(i),
                None => {}
            }
        }

        let (critical_regressions, moderate_regressions): (Vec<_>, Vec<_>) = regressions
            .iter()
            .cloned()
            .partition(|r| r.severity == Severity::Critical);

        let mut summary = format!("Found {} performance regressions", regressions.len());
        if !critical_regressions.is_empty() {
            summary.push_str(&format!(" ({} critical)", critical_regressions.len()));
        }

        RegressionReport {
            summary,
            recommendations: recommendations(&regressions),
            regressions,
            critical_regressions,
            moderate_regressions,
            improvements,
            threshold: self.threshold,
            timestamp: Utc::now(),
        }
    }

    fn compare(&self, metric: &str, baseline: f64, current: f64) -> Option<Change> {
        if baseline.is_nan() || baseline <= 0.0 {
            return None;
        }
        let change = (current - baseline) / baseline;
        if change < -self.threshold {
            return Some(Change::Improved(Improvement {
                metric: metric.to_string(),
                baseline,
                current,
                change,
                description: format!("{metric} improved by {:.1}%", -change * 100.0),
            }));
        }
        if change <= self.threshold {
            return None;
        }
        Some(Change::Regressed(Regression {
            metric: metric.to_string(),
            baseline,
            current,
            change,
            severity: if change > CRITICAL_CHANGE {
                Severity::Critical
            } else {
                Severity::Moderate
            },
            description: format!("{metric} degraded by {:.1}%", change * 100.0),
        }))
    }
}

enum Change {
    Regressed(Regression),
    Improved(Improvement),
}

fn recommendations(regressions: &[Regression]) -> Vec<String> {
    use metric_names::*;
    let any = |names: &[&str]| regressions.iter().any(|r| names.contains(&r.metric.as_str()));

    let mut out = Vec::new();
    if any(&[LCP, FID, CLS, PAGE_LOAD]) {
        out.push(
            "Core Web Vitals degraded - optimize images, defer non-critical scripts and reserve layout space"
                .to_string(),
        );
    }
    if any(&[API_RESPONSE]) {
        out.push("API responses slowed down - check database queries, upstream services and server resources".to_string());
    }
    if any(&[COMPONENT_RENDER, QUIZ_RESPONSE, SESSION_LOAD]) {
        out.push("Learning flows slowed down - profile component renders and session loading".to_string());
    }
    if any(&[MEMORY_USAGE, MEMORY_LEAK]) {
        out.push("Memory footprint grew - look for retained listeners, caches and timers".to_string());
    }
    if regressions.iter().any(|r| r.severity == Severity::Critical) {
        out.push("Critical regressions detected - consider blocking deployment until resolved".to_string());
    }
    if out.is_empty() && !regressions.is_empty() {
        out.push("Custom metrics regressed - review recent changes to the instrumented code".to_string());
    }
    if out.is_empty() {
        out.push(NO_REGRESSIONS.to_string());
    }
    out
}
