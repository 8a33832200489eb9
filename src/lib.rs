pub mod capture;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod telemetry;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use error::{Error, Result};
pub use pipeline::{OverflowPolicy, PipelineState, PipelineStats, ReadOutput, TensorStream};
pub use process::{FourCC, FrameParameters, Planes, ResizeType, Tensor};
pub use telemetry::{LogLevel, LogTarget};

/// Prefix for environment overrides, e.g. `TENSOR_STREAM__BUFFER__SIZE=20`
pub const ENV_PREFIX: &str = "TENSOR_STREAM";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub stream: StreamConfig,
    pub buffer: BufferConfig,
    pub logging: LoggingConfig,
    pub dump: DumpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub url: String,
    /// Initialization attempts before giving up
    pub repeat_number: u32,
    pub retry_backoff_ms: u64,
    /// Pace ingestion at the stream framerate
    pub realtime: bool,
    /// Probed framerates above this are treated as a failed probe
    pub max_framerate: u32,
    pub raw: RawStreamConfig,
}

/// Geometry of headerless NV12 files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawStreamConfig {
    pub width: u32,
    pub height: u32,
    pub framerate_num: u32,
    pub framerate_den: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Slots in the frame buffer
    pub size: usize,
    pub overflow_policy: OverflowPolicy,
    /// How long a write waits for lagging consumers before the policy applies
    pub overflow_wait_ms: u64,
    /// Block reads until a frame newer than the consumer's last one arrives
    pub wait_for_fresh: bool,
    pub read_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub stop_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub target: LogTarget,
    /// Log file for [`LogTarget::File`]
    pub path: PathBuf,
    /// Emit span timings (and Tracy zones with the `profiling` feature)
    pub instrumentation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    pub dir: PathBuf,
    pub format: process::DumpFormat,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            repeat_number: 1,
            retry_backoff_ms: 500,
            realtime: true,
            max_framerate: 240,
            raw: RawStreamConfig::default(),
        }
    }
}

impl Default for RawStreamConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            framerate_num: 30,
            framerate_den: 1,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            size: 10,
            overflow_policy: OverflowPolicy::default(),
            overflow_wait_ms: 100,
            wait_for_fresh: false,
            read_timeout_ms: 1000,
            poll_interval_ms: 10,
            stop_timeout_ms: 1000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            target: LogTarget::default(),
            path: PathBuf::from("tensor_stream.log"),
            instrumentation: false,
        }
    }
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("dumps"),
            format: process::DumpFormat::default(),
        }
    }
}

impl StreamConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl BufferConfig {
    pub fn overflow_wait(&self) -> Duration {
        Duration::from_millis(self.overflow_wait_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Config {
    /// Defaults, then `path` if given, then `TENSOR_STREAM__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), error::ValidationError> {
        let invalid = |what: &str| Err(error::ValidationError::Config(what.to_string()));
        if self.buffer.size == 0 {
            return invalid("buffer.size must be at least 1");
        }
        if self.stream.repeat_number == 0 {
            return invalid("stream.repeat_number must be at least 1");
        }
        if self.stream.max_framerate == 0 {
            return invalid("stream.max_framerate must be positive");
        }
        if self.buffer.read_timeout_ms == 0 || self.buffer.poll_interval_ms == 0 || self.buffer.stop_timeout_ms == 0 {
            return invalid("buffer timeouts must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.buffer.size, 10);
        assert_eq!(config.stream.repeat_number, 1);
        assert_eq!(config.buffer.overflow_policy, OverflowPolicy::DropOldest);
        assert!(!config.buffer.wait_for_fresh);
    }

    #[test]
    fn zero_sized_buffer_is_rejected() {
        let mut config = Config::default();
        config.buffer.size = 0;
        assert!(matches!(
            config.validate(),
            Err(error::ValidationError::Config(_))
        ));
    }

    #[test]
    fn loads_toml_over_defaults() {
        let path = std::env::temp_dir().join(format!("tensor_stream_config_{}.toml", std::process::id()));
        std::fs::write(
            &path,
            "[stream]\nurl = \"synthetic://64x32@25\"\nrepeat_number = 3\n\n[buffer]\nsize = 4\noverflow_policy = \"backpressure\"\n\n[logging]\nlevel = \"medium\"\n",
        )
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.stream.url, "synthetic://64x32@25");
        assert_eq!(config.stream.repeat_number, 3);
        assert_eq!(config.buffer.size, 4);
        assert_eq!(config.buffer.overflow_policy, OverflowPolicy::Backpressure);
        assert_eq!(config.logging.level, LogLevel::Medium);
        // untouched keys keep their defaults
        assert_eq!(config.buffer.read_timeout_ms, 1000);
        assert!(config.stream.realtime);
        assert!(!config.buffer.wait_for_fresh);
    }
}
