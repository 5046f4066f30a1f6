//! Recording configuration
//!
//! The `*Settings` structs mirror the on-disk/env layout and are loosely
//! typed with serde defaults. [`RecordingConfig::validate`] turns them into
//! a [`RecordingPlan`] of typed, validated per-family metric configs which
//! workers take as an immutable snapshot when they start.

use crate::error::ConfigError;
use crate::supervisor::RestartPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_SECS: f64 = 60.0;
const DEFAULT_WAIT_INTERVAL_SECS: f64 = 10.0;
const DEFAULT_RECORD_INTERVAL_SECS: f64 = 300.0;
const DEFAULT_RESEND_HOURS: f64 = 6.0;
const DEFAULT_MAX_RESTARTS: u32 = 10;
const DEFAULT_RESET_WINDOW_SECS: u64 = 60;

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> f64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_wait_interval() -> f64 {
    DEFAULT_WAIT_INTERVAL_SECS
}

fn default_record_interval() -> f64 {
    DEFAULT_RECORD_INTERVAL_SECS
}

fn default_resend_hours() -> f64 {
    DEFAULT_RESEND_HOURS
}

fn default_max_restarts() -> u32 {
    DEFAULT_MAX_RESTARTS
}

fn default_reset_window() -> u64 {
    DEFAULT_RESET_WINDOW_SECS
}

/// Top-level recording configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default)]
    pub high_low: HighLowSettings,
    #[serde(default)]
    pub variance: VarianceSettings,
    #[serde(default)]
    pub interval: IntervalSettings,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
}

/// High/low trigger recording
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HighLowSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub metrics: Vec<ThresholdMetricSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdMetricSettings {
    pub metric: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: f64,
    pub channels: Vec<ChannelWindowSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelWindowSettings {
    pub channel: String,
    pub low: f64,
    pub high: f64,
}

/// Alerting for high/low triggers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Hours between repeated alerts for a metric stuck out of range (0 = never resend)
    #[serde(default = "default_resend_hours")]
    pub resend_interval_hours: f64,
    #[serde(default)]
    pub high: SeveritySettings,
    #[serde(default)]
    pub low: SeveritySettings,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            resend_interval_hours: DEFAULT_RESEND_HOURS,
            high: SeveritySettings::default(),
            low: SeveritySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeveritySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub send_on_normal: bool,
}

impl Default for SeveritySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            send_on_normal: false,
        }
    }
}

/// Variance trigger recording
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VarianceSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub metrics: Vec<VarianceMetricSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceMetricSettings {
    pub metric: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_wait_interval")]
    pub wait_interval_secs: f64,
    pub channels: Vec<ChannelVarianceSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelVarianceSettings {
    pub channel: String,
    pub variance: f64,
}

/// Unconditional interval recording
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntervalSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub metrics: Vec<IntervalMetricSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalMetricSettings {
    pub metric: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_record_interval")]
    pub interval_secs: f64,
    pub channels: Vec<String>,
}

/// Restart policy shared by every worker supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_reset_window")]
    pub reset_window_secs: u64,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            reset_window_secs: DEFAULT_RESET_WINDOW_SECS,
        }
    }
}

/// Low/high boundary for one channel; `low < high` always holds
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdWindow {
    pub channel: String,
    pub low: f64,
    pub high: f64,
}

impl ThresholdWindow {
    pub fn new(
        metric: &str,
        channel: impl Into<String>,
        low: f64,
        high: f64,
    ) -> Result<Self, ConfigError> {
        let channel = channel.into();
        if !low.is_finite() || !high.is_finite() || low >= high {
            return Err(ConfigError::InvalidWindow {
                metric: metric.to_string(),
                channel,
                low,
                high,
            });
        }
        Ok(Self { channel, low, high })
    }
}

/// A metric recorded on threshold crossings
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdMetric {
    pub metric: String,
    pub windows: Vec<ThresholdWindow>,
    pub poll_interval: Duration,
}

impl ThresholdMetric {
    pub fn new(
        metric: impl Into<String>,
        windows: Vec<ThresholdWindow>,
        poll_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let metric = metric.into();
        check_metric_name(&metric)?;
        check_channels(&metric, windows.iter().map(|w| w.channel.as_str()))?;
        check_duration(&metric, poll_interval)?;
        Ok(Self {
            metric,
            windows,
            poll_interval,
        })
    }

    fn from_settings(settings: &ThresholdMetricSettings) -> Result<Self, ConfigError> {
        let windows = settings
            .channels
            .iter()
            .map(|c| ThresholdWindow::new(&settings.metric, c.channel.clone(), c.low, c.high))
            .collect::<Result<Vec<_>, _>>()?;
        let poll_interval = seconds(&settings.metric, settings.poll_interval_secs)?;
        Self::new(settings.metric.clone(), windows, poll_interval)
    }
}

/// Per-channel change threshold; always finite and >= 0
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelVariance {
    pub channel: String,
    pub variance: f64,
}

impl ChannelVariance {
    pub fn new(metric: &str, channel: impl Into<String>, variance: f64) -> Result<Self, ConfigError> {
        let channel = channel.into();
        if !variance.is_finite() || variance < 0.0 {
            return Err(ConfigError::InvalidVariance {
                metric: metric.to_string(),
                channel,
                variance,
            });
        }
        Ok(Self { channel, variance })
    }
}

/// A metric recorded when consecutive readings differ enough
#[derive(Debug, Clone, PartialEq)]
pub struct VarianceMetric {
    pub metric: String,
    pub channels: Vec<ChannelVariance>,
    pub wait_interval: Duration,
}

impl VarianceMetric {
    pub fn new(
        metric: impl Into<String>,
        channels: Vec<ChannelVariance>,
        wait_interval: Duration,
    ) -> Result<Self, ConfigError> {
        let metric = metric.into();
        check_metric_name(&metric)?;
        check_channels(&metric, channels.iter().map(|c| c.channel.as_str()))?;
        check_duration(&metric, wait_interval)?;
        Ok(Self {
            metric,
            channels,
            wait_interval,
        })
    }

    fn from_settings(settings: &VarianceMetricSettings) -> Result<Self, ConfigError> {
        let channels = settings
            .channels
            .iter()
            .map(|c| ChannelVariance::new(&settings.metric, c.channel.clone(), c.variance))
            .collect::<Result<Vec<_>, _>>()?;
        let wait_interval = seconds(&settings.metric, settings.wait_interval_secs)?;
        Self::new(settings.metric.clone(), channels, wait_interval)
    }
}

/// A metric recorded on a fixed cadence
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalMetric {
    pub metric: String,
    pub channels: Vec<String>,
    pub interval: Duration,
}

impl IntervalMetric {
    pub fn new(
        metric: impl Into<String>,
        channels: Vec<String>,
        interval: Duration,
    ) -> Result<Self, ConfigError> {
        let metric = metric.into();
        check_metric_name(&metric)?;
        check_channels(&metric, channels.iter().map(String::as_str))?;
        check_duration(&metric, interval)?;
        Ok(Self {
            metric,
            channels,
            interval,
        })
    }

    fn from_settings(settings: &IntervalMetricSettings) -> Result<Self, ConfigError> {
        let interval = seconds(&settings.metric, settings.interval_secs)?;
        Self::new(settings.metric.clone(), settings.channels.clone(), interval)
    }
}

/// Alert forwarding rules for one severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityPolicy {
    pub enabled: bool,
    pub send_on_normal: bool,
}

impl From<SeveritySettings> for SeverityPolicy {
    fn from(settings: SeveritySettings) -> Self {
        Self {
            enabled: settings.enabled,
            send_on_normal: settings.send_on_normal,
        }
    }
}

/// Alert forwarding rules for high/low triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertPolicy {
    /// `None` disables resending while a state is held
    pub resend_interval: Option<Duration>,
    pub high: SeverityPolicy,
    pub low: SeverityPolicy,
}

impl AlertPolicy {
    fn from_settings(settings: &AlertSettings) -> Result<Self, ConfigError> {
        let hours = settings.resend_interval_hours;
        let invalid = || ConfigError::InvalidResendInterval { hours };
        if !hours.is_finite() {
            return Err(invalid());
        }
        let resend_interval = if hours > 0.0 {
            Some(Duration::try_from_secs_f64(hours * 3600.0).map_err(|_| invalid())?)
        } else {
            None
        };
        Ok(Self {
            resend_interval,
            high: settings.high.into(),
            low: settings.low.into(),
        })
    }
}

/// Validated, enabled-only view of the configuration
#[derive(Debug, Clone)]
pub struct RecordingPlan {
    pub thresholds: Vec<ThresholdMetric>,
    pub variances: Vec<VarianceMetric>,
    pub intervals: Vec<IntervalMetric>,
    pub alert_policy: Option<AlertPolicy>,
    pub restart_policy: RestartPolicy,
}

impl RecordingPlan {
    pub fn worker_count(&self) -> usize {
        self.thresholds.len() + self.variances.len() + self.intervals.len()
    }
}

impl RecordingConfig {
    /// Validate every metric (enabled or not) and keep the enabled ones
    pub fn validate(&self) -> Result<RecordingPlan, ConfigError> {
        let thresholds = self
            .high_low
            .metrics
            .iter()
            .map(|m| ThresholdMetric::from_settings(m).map(|t| (m.enabled, t)))
            .collect::<Result<Vec<_>, _>>()?;
        let variances = self
            .variance
            .metrics
            .iter()
            .map(|m| VarianceMetric::from_settings(m).map(|v| (m.enabled, v)))
            .collect::<Result<Vec<_>, _>>()?;
        let intervals = self
            .interval
            .metrics
            .iter()
            .map(|m| IntervalMetric::from_settings(m).map(|i| (m.enabled, i)))
            .collect::<Result<Vec<_>, _>>()?;

        if self.supervisor.max_restarts == 0 {
            return Err(ConfigError::InvalidRestartPolicy);
        }

        let alert_policy = if self.high_low.enabled && self.high_low.alerts.enabled {
            Some(AlertPolicy::from_settings(&self.high_low.alerts)?)
        } else {
            None
        };

        Ok(RecordingPlan {
            thresholds: enabled_only(self.high_low.enabled, thresholds),
            variances: enabled_only(self.variance.enabled, variances),
            intervals: enabled_only(self.interval.enabled, intervals),
            alert_policy,
            restart_policy: RestartPolicy {
                max_restarts: self.supervisor.max_restarts,
                reset_window: Duration::from_secs(self.supervisor.reset_window_secs),
            },
        })
    }
}

fn enabled_only<T>(family_enabled: bool, metrics: Vec<(bool, T)>) -> Vec<T> {
    if !family_enabled {
        return Vec::new();
    }
    metrics
        .into_iter()
        .filter_map(|(enabled, m)| enabled.then_some(m))
        .collect()
}

fn check_metric_name(metric: &str) -> Result<(), ConfigError> {
    if metric.trim().is_empty() {
        return Err(ConfigError::EmptyMetricName);
    }
    Ok(())
}

fn check_channels<'a>(
    metric: &str,
    channels: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for channel in channels {
        if !seen.insert(channel) {
            return Err(ConfigError::DuplicateChannel {
                metric: metric.to_string(),
                channel: channel.to_string(),
            });
        }
    }
    if seen.is_empty() {
        return Err(ConfigError::NoChannels {
            metric: metric.to_string(),
        });
    }
    Ok(())
}

fn check_duration(metric: &str, interval: Duration) -> Result<(), ConfigError> {
    if interval.is_zero() {
        return Err(ConfigError::InvalidInterval {
            metric: metric.to_string(),
            seconds: 0.0,
        });
    }
    Ok(())
}

fn seconds(metric: &str, secs: f64) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidInterval {
        metric: metric.to_string(),
        seconds: secs,
    };
    if !secs.is_finite() || secs <= 0.0 {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid())
}
