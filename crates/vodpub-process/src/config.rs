//! Supervisor configuration and the TOML process table

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::CommandSpec;
use crate::error::{Result, SupervisorError};

/// Signal policy used when a process is stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopSignal {
    /// SIGKILL right away
    #[default]
    Kill,
    /// SIGTERM, then SIGKILL after `kill_grace_ms`
    Terminate,
}

/// Tunables shared by every supervisor of a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Lines kept per output stream; oldest lines are dropped first
    pub output_buffer_lines: usize,
    /// Deadline applied to processes registered without their own
    pub deadline_ms: Option<u64>,
    pub stop_signal: StopSignal,
    /// Delay between SIGTERM and SIGKILL for [`StopSignal::Terminate`]
    pub kill_grace_ms: u64,
    /// How long to wait for the output drains after the process is reaped
    pub drain_timeout_ms: u64,
    pub status_channel_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            output_buffer_lines: 1000,
            deadline_ms: None,
            stop_signal: StopSignal::Kill,
            kill_grace_ms: 200,
            drain_timeout_ms: 2000,
            status_channel_capacity: 64,
        }
    }
}

impl SupervisorConfig {
    pub fn default_deadline(&self) -> Option<Duration> {
        deadline_from_ms(self.deadline_ms)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// One named process declared in a configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl ProcessEntry {
    /// Build the launch descriptor for this entry
    pub fn command(&self) -> Result<CommandSpec> {
        let mut builder = CommandSpec::builder(&self.program).args(&self.args);
        for (key, value) in &self.env {
            builder = builder.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            builder = builder.working_dir(dir);
        }
        builder.build()
    }

    pub fn deadline(&self) -> Option<Duration> {
        deadline_from_ms(self.deadline_ms)
    }
}

/// Registry configuration: shared tunables plus the process table
///
/// ```toml
/// [supervisor]
/// output_buffer_lines = 200
/// stop_signal = "terminate"
///
/// [[process]]
/// name = "main"
/// program = "ffmpeg"
/// args = ["-re", "-i", "input.mp4"]
/// deadline_ms = 60000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub process: Vec<ProcessEntry>,
}

impl RegistryConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SupervisorError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            SupervisorError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }
}

fn deadline_from_ms(ms: Option<u64>) -> Option<Duration> {
    ms.filter(|ms| *ms > 0).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_sections_missing() {
        let config = RegistryConfig::from_toml_str("").unwrap();
        assert_eq!(config.supervisor, SupervisorConfig::default());
        assert!(config.process.is_empty());
        assert_eq!(config.supervisor.default_deadline(), None);
    }

    #[test]
    fn test_parse_process_table() {
        let config = RegistryConfig::from_toml_str(
            r#"
            [supervisor]
            output_buffer_lines = 10
            stop_signal = "terminate"
            kill_grace_ms = 50

            [[process]]
            name = "a"
            program = "sleep"
            args = ["5"]
            deadline_ms = 1000

            [[process]]
            name = "b"
            program = "true"
            deadline_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.supervisor.output_buffer_lines, 10);
        assert_eq!(config.supervisor.stop_signal, StopSignal::Terminate);
        assert_eq!(config.supervisor.kill_grace(), Duration::from_millis(50));
        assert_eq!(config.supervisor.drain_timeout_ms, 2000);

        let a = &config.process[0];
        assert_eq!(a.command().unwrap().args(), ["5"]);
        assert_eq!(a.deadline(), Some(Duration::from_secs(1)));
        assert_eq!(config.process[1].deadline(), None);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = RegistryConfig::from_toml_str("[[process]]\nname = 3").unwrap_err();
        assert!(matches!(err, SupervisorError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[process]]\nname = \"x\"\nprogram = \"echo\"").unwrap();

        let config = RegistryConfig::load(file.path()).unwrap();
        assert_eq!(config.process.len(), 1);
        assert_eq!(config.process[0].program, "echo");

        assert!(matches!(
            RegistryConfig::load("/nonexistent/vodpub.toml"),
            Err(SupervisorError::Config(_))
        ));
    }
}
