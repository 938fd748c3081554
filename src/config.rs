use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const CONFIG_FILENAME: &str = "config.toml";
const CONFIG_DIR: &str = ".covrun";

#[derive(Debug, Deserialize)]
pub struct ReportSettings {
    /// Directory coverage artifacts are written into.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct SignalSettings {
    /// Channel name the end-test receiver registers under.
    #[serde(default = "default_signal_channel")]
    pub channel: String,
}

#[derive(Debug, Deserialize)]
pub struct LogSettings {
    /// Directory run logs (`.jsonl`) are written into.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("coverage")
}

fn default_signal_channel() -> String {
    crate::signal::END_RUN_CHANNEL.to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("logs")
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            channel: default_signal_channel(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub report: ReportSettings,
    #[serde(default)]
    pub signal: SignalSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl ProjectConfig {
    /// Search upward from `start` for a `.covrun/config.toml` file and load it.
    /// Returns the default config if no file is found.
    pub fn load(start: &Path) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = Self::find_config_file(start) {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: ProjectConfig = toml::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((config, Some(path)))
        } else {
            Ok((ProjectConfig::default(), None))
        }
    }

    fn find_config_file(start: &Path) -> Option<PathBuf> {
        let mut dir = start.to_path_buf();
        loop {
            let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILENAME);
            if candidate.is_file() {
                return Some(candidate);
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn default_config_values() {
        let config = ProjectConfig::default();
        assert_eq!(config.report.output_dir, PathBuf::from("coverage"));
        assert_eq!(config.signal.channel, "end-run");
        assert_eq!(config.log.dir, PathBuf::from(".covrun/logs"));
    }

    #[test]
    fn loads_config_from_dot_covrun() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".covrun");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("config.toml"),
            r#"
[report]
output_dir = "/data/reports"

[signal]
channel = "stop-now"
"#,
        )
        .unwrap();

        let (config, path) = ProjectConfig::load(tmp.path()).unwrap();
        assert_eq!(config.report.output_dir, PathBuf::from("/data/reports"));
        assert_eq!(config.signal.channel, "stop-now");
        // Unspecified section falls back to defaults.
        assert_eq!(config.log.dir, PathBuf::from(".covrun/logs"));
        assert!(path.is_some());
    }

    #[test]
    fn missing_config_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, path) = ProjectConfig::load(tmp.path()).unwrap();
        assert_eq!(config.signal.channel, "end-run");
        assert!(path.is_none());
    }

    #[test]
    fn searches_parent_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".covrun");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.toml"), "[signal]\nchannel = \"up\"\n").unwrap();
        let nested = tmp.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let (config, _) = ProjectConfig::load(&nested).unwrap();
        assert_eq!(config.signal.channel, "up");
    }

    #[test]
    fn malformed_config_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(".covrun");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("config.toml"), "report = 3").unwrap();

        assert!(ProjectConfig::load(tmp.path()).is_err());
    }
}
