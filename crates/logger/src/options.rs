//! Recognised logging options.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::Level;

/// Where log lines are written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Destination {
    /// Standard output.
    Stdout,

    /// A rolling file at the given path.
    File(PathBuf),
}

/// How often the log file is rolled over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RotationInterval {
    /// Never roll; the file grows until rotated externally.
    Never,

    /// Roll every hour.
    Hourly,

    /// Roll every day.
    #[default]
    Daily,
}

impl FromStr for RotationInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(Self::Never),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            other => Err(format!(
                "unknown log rotation '{other}', expected never, hourly or daily"
            )),
        }
    }
}

/// Rotation and retention for file destinations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Roll-over interval.
    pub interval: RotationInterval,

    /// Number of rolled files to keep. `None` keeps everything.
    pub max_files: Option<usize>,
}

/// Options for building a [`crate::Logger`].
#[derive(Clone, Debug)]
pub struct LoggerOptions {
    /// Most verbose level that is emitted.
    pub level: Level,

    /// Output sink.
    pub destination: Destination,

    /// Rotation policy, only used for [`Destination::File`].
    pub rotation: RotationPolicy,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            destination: Destination::Stdout,
            rotation: RotationPolicy::default(),
        }
    }
}

/// Parses a level name, falling back to `INFO` for anything unrecognised.
///
/// The second element is `false` when the fallback was used.
#[must_use]
pub fn parse_level(level: &str) -> (Level, bool) {
    if level.trim().is_empty() {
        return (Level::INFO, true);
    }

    match Level::from_str(level.trim()) {
        Ok(level) => (level, true),
        Err(_) => (Level::INFO, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_known_names() {
        assert_eq!(parse_level("debug"), (Level::DEBUG, true));
        assert_eq!(parse_level("WARN"), (Level::WARN, true));
        assert_eq!(parse_level("error"), (Level::ERROR, true));
    }

    #[test]
    fn test_parse_level_falls_back_to_info() {
        assert_eq!(parse_level("chatty"), (Level::INFO, false));
        assert_eq!(parse_level(""), (Level::INFO, true));
    }

    #[test]
    fn test_rotation_interval_from_str() {
        assert_eq!(
            "Hourly".parse::<RotationInterval>(),
            Ok(RotationInterval::Hourly)
        );
        assert!("weekly".parse::<RotationInterval>().is_err());
    }
}
