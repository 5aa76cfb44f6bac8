//! reclusterd.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

const DEFAULT_STEP_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_IDLE_COOLDOWN: Duration = Duration::from_secs(300);
const DEFAULT_STEP_DEADLINE: Duration = Duration::from_secs(2);
const DEFAULT_FEED_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_FEED_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_DATA_DIR: &str = "/var/lib/recluster";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub controller: Option<LoopConfig>,
    pub state: Option<StateConfig>,
    pub feeds: Option<FeedsConfig>,
    pub backend: Option<BackendConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopConfig {
    pub step_interval: Option<String>,
    pub idle_cooldown: Option<String>,
    pub step_deadline: Option<String>,
    /// Clock used for schedule windows, e.g. "+02:00".
    pub utc_offset: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedsConfig {
    pub sync_interval: Option<String>,
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    pub mode: Option<BackendMode>,
}

/// Which backend adapter executes planner actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendMode {
    /// Write desired/observed node state straight into the state store.
    #[default]
    Simulated,
    /// Log actions without executing them.
    DryRun,
}

/// Fully-resolved settings with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub step_interval: Duration,
    pub idle_cooldown: Duration,
    pub step_deadline: Duration,
    pub utc_offset: FixedOffset,
    pub data_dir: PathBuf,
    pub feed_interval: Duration,
    pub feed_timeout: Duration,
    pub backend: BackendMode,
}

impl ControllerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: ControllerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply defaults and validate every field.
    pub fn resolve(&self) -> anyhow::Result<Settings> {
        let lp = self.controller.clone().unwrap_or_default();
        let feeds = self.feeds.clone().unwrap_or_default();

        let utc_offset = match lp.utc_offset.as_deref() {
            Some(raw) => parse_offset(raw)?,
            None => FixedOffset::east_opt(0).ok_or_else(|| anyhow!("invalid zero offset"))?,
        };

        Ok(Settings {
            step_interval: duration_or(lp.step_interval.as_deref(), DEFAULT_STEP_INTERVAL, "step_interval")?,
            idle_cooldown: duration_or(lp.idle_cooldown.as_deref(), DEFAULT_IDLE_COOLDOWN, "idle_cooldown")?,
            step_deadline: duration_or(lp.step_deadline.as_deref(), DEFAULT_STEP_DEADLINE, "step_deadline")?,
            utc_offset,
            data_dir: self
                .state
                .as_ref()
                .and_then(|s| s.data_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            feed_interval: duration_or(feeds.sync_interval.as_deref(), DEFAULT_FEED_INTERVAL, "sync_interval")?,
            feed_timeout: duration_or(feeds.timeout.as_deref(), DEFAULT_FEED_TIMEOUT, "timeout")?,
            backend: self
                .backend
                .as_ref()
                .and_then(|b| b.mode)
                .unwrap_or_default(),
        })
    }
}

fn duration_or(raw: Option<&str>, default: Duration, field: &str) -> anyhow::Result<Duration> {
    match raw {
        Some(s) => parse_duration(s).ok_or_else(|| anyhow!("invalid duration for {field}: {s:?}")),
        None => Ok(default),
    }
}

/// Parse "+HH:MM" / "-HH:MM" / "Z" into a fixed offset.
pub fn parse_offset(raw: &str) -> anyhow::Result<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| anyhow!("invalid zero offset"));
    }
    let (sign, rest) = match raw.split_at_checked(1) {
        Some(("+", rest)) => (1, rest),
        Some(("-", rest)) => (-1, rest),
        _ => bail!("utc_offset must start with '+' or '-': {raw:?}"),
    };
    let (hours, minutes) = rest
        .split_once(':')
        .ok_or_else(|| anyhow!("utc_offset must look like +HH:MM: {raw:?}"))?;
    let hours: i32 = hours.parse().with_context(|| format!("utc_offset hours: {raw:?}"))?;
    let minutes: i32 = minutes.parse().with_context(|| format!("utc_offset minutes: {raw:?}"))?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        bail!("utc_offset out of range: {raw:?}");
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
        .ok_or_else(|| anyhow!("utc_offset out of range: {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: ControllerConfig = toml::from_str("").unwrap();
        let settings = config.resolve().unwrap();
        assert_eq!(settings.step_interval, Duration::from_secs(5));
        assert_eq!(settings.idle_cooldown, Duration::from_secs(300));
        assert_eq!(settings.data_dir, PathBuf::from("/var/lib/recluster"));
        assert_eq!(settings.backend, BackendMode::Simulated);
        assert_eq!(settings.utc_offset.local_minus_utc(), 0);
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
[controller]
step_interval = "10s"
idle_cooldown = "15m"
step_deadline = "500ms"
utc_offset = "+02:30"

[state]
data_dir = "/tmp/rc"

[feeds]
sync_interval = "2m"
timeout = "3s"

[backend]
mode = "dry-run"
"#;
        let config: ControllerConfig = toml::from_str(toml_str).unwrap();
        let settings = config.resolve().unwrap();
        assert_eq!(settings.step_interval, Duration::from_secs(10));
        assert_eq!(settings.idle_cooldown, Duration::from_secs(900));
        assert_eq!(settings.step_deadline, Duration::from_millis(500));
        assert_eq!(settings.utc_offset.local_minus_utc(), 9000);
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/rc"));
        assert_eq!(settings.feed_interval, Duration::from_secs(120));
        assert_eq!(settings.feed_timeout, Duration::from_secs(3));
        assert_eq!(settings.backend, BackendMode::DryRun);
    }

    #[test]
    fn rejects_bad_duration() {
        let config: ControllerConfig = toml::from_str(
            r#"
[controller]
idle_cooldown = "forever"
"#,
        )
        .unwrap();
        let err = config.resolve().unwrap_err();
        assert!(err.to_string().contains("idle_cooldown"));
    }

    #[test]
    fn offsets() {
        assert_eq!(parse_offset("-05:00").unwrap().local_minus_utc(), -18000);
        assert_eq!(parse_offset("Z").unwrap().local_minus_utc(), 0);
        assert!(parse_offset("05:00").is_err());
        assert!(parse_offset("+25:00").is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = ControllerConfig {
            backend: Some(BackendConfig {
                mode: Some(BackendMode::DryRun),
            }),
            ..Default::default()
        };
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("dry-run"));
    }
}
