//! Line-protocol metric handler.
//!
//! Decodes frames of newline-separated samples:
//!
//! ```text
//! <name>[,<key>=<value>...] <value> [<time>]
//! ```
//!
//! for example `cpu_usage,host=node1,core=0 42.5 1633024800`. The series
//! interval and exposition type are not on the wire; they come from the
//! handler's configuration and apply to every sample it decodes.

use std::time::Duration;

use async_trait::async_trait;

use squall_core::config::parse_plugin_config;
use squall_core::data::{Metric, MetricType};
use squall_core::error::{ConfigError, HandlerError};
use squall_core::plugin::{BusPublisher, Handler};

fn default_interval() -> u64 {
    10
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineConfig {
    /// Arrival cadence promised for decoded series, in seconds.
    #[serde(default = "default_interval")]
    interval: u64,
    /// Exposition type stamped on decoded series.
    #[serde(default)]
    metric_type: MetricType,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            metric_type: MetricType::default(),
        }
    }
}

pub struct MetricsLineHandler {
    conf: LineConfig,
}

impl MetricsLineHandler {
    pub fn new() -> Self {
        Self {
            conf: LineConfig::default(),
        }
    }

    fn parse_line(&self, line: &str) -> Result<Metric, HandlerError> {
        let mut parts = line.split_whitespace();
        let series = parts.next().ok_or_else(|| HandlerError::Malformed {
            message: "empty sample".into(),
        })?;
        let value = parts.next().ok_or_else(|| HandlerError::Malformed {
            message: format!("sample '{line}' carries no value"),
        })?;
        let time = parts.next();
        if parts.next().is_some() {
            return Err(HandlerError::Malformed {
                message: format!("sample '{line}' has trailing fields"),
            });
        }

        let mut series_parts = series.split(',');
        let name = series_parts.next().unwrap_or_default();
        if name.is_empty() {
            return Err(HandlerError::Malformed {
                message: format!("sample '{line}' has an empty metric name"),
            });
        }

        let mut label_keys = Vec::new();
        let mut label_vals = Vec::new();
        for pair in series_parts {
            let (key, val) = pair.split_once('=').ok_or_else(|| HandlerError::Malformed {
                message: format!("label '{pair}' is not key=value"),
            })?;
            if key.is_empty() {
                return Err(HandlerError::Malformed {
                    message: format!("label '{pair}' has an empty key"),
                });
            }
            label_keys.push(key.to_string());
            label_vals.push(val.to_string());
        }

        let value: f64 = value.parse().map_err(|_| HandlerError::Malformed {
            message: format!("value '{value}' is not a number"),
        })?;
        if !value.is_finite() {
            return Err(HandlerError::Malformed {
                message: format!("value '{value}' is not finite"),
            });
        }

        let time: f64 = match time {
            Some(t) => t.parse().map_err(|_| HandlerError::Malformed {
                message: format!("timestamp '{t}' is not a number"),
            })?,
            None => 0.0,
        };

        Ok(Metric {
            name: name.to_string(),
            time,
            metric_type: self.conf.metric_type,
            interval: Duration::from_secs(self.conf.interval),
            value,
            label_keys,
            label_vals,
        })
    }
}

impl Default for MetricsLineHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for MetricsLineHandler {
    fn configure(&mut self, config: serde_yaml::Value) -> Result<(), ConfigError> {
        let conf: LineConfig = parse_plugin_config(config)?;
        if conf.interval == 0 {
            return Err(ConfigError::InvalidFields {
                fields: "interval".into(),
            });
        }
        self.conf = conf;
        Ok(())
    }

    async fn handle(&self, frame: &[u8], bus: &BusPublisher) -> Result<(), HandlerError> {
        let text =
            std::str::from_utf8(frame).map_err(|source| HandlerError::FrameUtf8 { source })?;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            bus.publish_metric(self.parse_line(line)?);
        }
        Ok(())
    }
}
