use std::path::PathBuf;

use chrono_tz::Tz;

use crate::codec::{FilenameCodec, DEFAULT_TIMEZONE};
use crate::error::{Error, Result};

/// Root used when neither `--root` nor `PERSON_FOLDER` is given.
pub const DEFAULT_ROOT: &str = "./surveillance";
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// Everything the aggregator needs to know about its environment.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub root: PathBuf,
    pub timezone: Tz,
    /// Upper bound on day directories processed at once during a full walk.
    pub concurrency: usize,
}

impl ViewerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timezone: DEFAULT_TIMEZONE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn codec(&self) -> FilenameCodec {
        FilenameCodec::new(self.timezone)
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| Error::UnknownTimezone(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timezone_names_resolve() {
        assert_eq!(parse_timezone("Europe/Berlin").unwrap(), chrono_tz::Europe::Berlin);
        assert_eq!(parse_timezone("UTC").unwrap(), chrono_tz::UTC);
        assert!(matches!(
            parse_timezone("Mars/Olympus"),
            Err(Error::UnknownTimezone(name)) if name == "Mars/Olympus"
        ));
    }

    #[test]
    fn concurrency_never_drops_to_zero() {
        let config = ViewerConfig::new("/srv/cams").with_concurrency(0);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.timezone, DEFAULT_TIMEZONE);
    }
}
