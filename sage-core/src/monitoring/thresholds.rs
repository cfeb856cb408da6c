//! Fixed performance budgets and monitor configuration

use crate::error::{SageError, SageResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MB: f64 = 1024.0 * 1024.0;

/// Metric names recorded by the monitor
pub mod metric_names {
    pub const LCP: &str = "LCP";
    pub const FID: &str = "FID";
    pub const CLS: &str = "CLS";
    pub const PAGE_LOAD: &str = "page_load";
    pub const API_RESPONSE: &str = "api_response";
    pub const COMPONENT_RENDER: &str = "component_render";
    pub const SESSION_LOAD: &str = "session_load";
    pub const QUIZ_RESPONSE: &str = "quiz_response";
    pub const MEMORY_USAGE: &str = "memory_usage";
    pub const MEMORY_LEAK: &str = "memory_leak";
}

/// Budgets; times in milliseconds, CLS unitless, memory in bytes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceThresholds {
    pub lcp: f64,
    pub fid: f64,
    pub cls: f64,
    pub api_response: f64,
    pub component_render: f64,
    pub session_load: f64,
    pub quiz_response: f64,
    pub memory_usage: f64,
    pub memory_leak: f64,
}

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            lcp: 2500.0,
            fid: 100.0,
            cls: 0.1,
            api_response: 1000.0,
            component_render: 16.0,
            session_load: 2000.0,
            quiz_response: 200.0,
            memory_usage: 50.0 * MB,
            memory_leak: 100.0 * MB,
        }
    }
}

impl PerformanceThresholds {
    /// Budget for a metric name, if it is one the monitor knows
    pub fn for_metric(&self, name: &str) -> Option<f64> {
        use metric_names::*;
        Some(match name {
            LCP => self.lcp,
            FID => self.fid,
            CLS => self.cls,
            API_RESPONSE => self.api_response,
            COMPONENT_RENDER => self.component_render,
            // Full page loads share the learning-session budget
            SESSION_LOAD | PAGE_LOAD => self.session_load,
            QUIZ_RESPONSE => self.quiz_response,
            MEMORY_USAGE => self.memory_usage,
            MEMORY_LEAK => self.memory_leak,
            _ => return None,
        })
    }

    fn entries(&self) -> [(&'static str, f64); 9] {
        [
            ("lcp", self.lcp),
            ("fid", self.fid),
            ("cls", self.cls),
            ("api_response", self.api_response),
            ("component_render", self.component_render),
            ("session_load", self.session_load),
            ("quiz_response", self.quiz_response),
            ("memory_usage", self.memory_usage),
            ("memory_leak", self.memory_leak),
        ]
    }

    pub fn validate(&self) -> SageResult<()> {
        for (name, value) in self.entries() {
            if !(value.is_finite() && value > 0.0) {
                return Err(SageError::configuration(
                    "monitor",
                    format!("threshold '{name}' must be a positive number, got {value}"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub thresholds: PerformanceThresholds,
    #[serde(with = "humantime_serde")]
    pub memory_sample_interval: Duration,
    /// Capacity of the in-memory metric buffer
    pub buffer_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: PerformanceThresholds::default(),
            memory_sample_interval: Duration::from_secs(30),
            buffer_capacity: 100,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> SageResult<()> {
        self.thresholds.validate()?;
        if self.memory_sample_interval.is_zero() {
            return Err(SageError::configuration(
                "monitor",
                "memory_sample_interval must be greater than zero",
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(SageError::configuration(
                "monitor",
                "buffer_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_metric_budgets() {
        let t = PerformanceThresholds::default();
        assert_eq!(t.for_metric("LCP"), Some(2500.0));
        assert_eq!(t.for_metric("page_load"), Some(2000.0));
        assert_eq!(t.for_metric("memory_leak"), Some(100.0 * MB));
        assert_eq!(t.for_metric("custom"), None);
    }

    #[test]
    fn test_non_positive_threshold_rejected() {
        let t = PerformanceThresholds {
            cls: 0.0,
            ..Default::default()
        };
        assert!(t.validate().is_err());
        assert!(PerformanceThresholds::default().validate().is_ok());
    }
}
