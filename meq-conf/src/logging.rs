use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// `[log]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Log {
    pub to: To,
    pub level: Level,
    pub dir: String,
    pub file: String,
}

impl Default for Log {
    fn default() -> Self {
        Self { to: To::Console, level: Level(slog::Level::Info), dir: "/var/log/meq".into(), file: "meq.log".into() }
    }
}

impl Log {
    /// Log file path, empty when no file is configured.
    pub fn filename(&self) -> String {
        if self.file.is_empty() {
            return String::new();
        }
        Path::new(&self.dir).join(&self.file).to_string_lossy().into_owned()
    }
}

/// Log destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum To {
    Off,
    File,
    Console,
    Both,
}

impl To {
    #[inline]
    pub fn file(&self) -> bool {
        matches!(self, To::Both | To::File)
    }
    #[inline]
    pub fn console(&self) -> bool {
        matches!(self, To::Both | To::Console)
    }
    #[inline]
    pub fn off(&self) -> bool {
        matches!(self, To::Off)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Level(slog::Level);

impl Level {
    #[inline]
    pub fn inner(&self) -> slog::Level {
        self.0
    }
}

impl fmt::Debug for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl From<slog::Level> for Level {
    #[inline]
    fn from(level: slog::Level) -> Self {
        Level(level)
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        slog::Level::from_str(s).map(Level).map_err(|_| format!("invalid log level `{}`", s))
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?.parse().map_err(de::Error::custom)
    }
}
