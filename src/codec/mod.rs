//! Camera filename decoding.
//!
//! Cameras write `<cameraId>_<sequence>_<YYYYMMDDHHmmss>.<ext>` where the
//! timestamp is civil time in the cameras' own zone.

use std::ops::Range;
use std::sync::LazyLock;

use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;

use crate::error::ParseError;
use crate::models::{CameraFileRecord, MediaKind};

/// Zone the producing cameras stamp their filenames in.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Berlin;

/// `[0-9]` rather than `\d`: the latter matches non-ASCII digits.
const FILENAME_PATTERN: &str = r"^(.+?)_([0-9]+)_([0-9]{14})\.(.+)$";

static FILENAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(FILENAME_PATTERN).expect("valid regex"));

#[derive(Debug, Clone, Copy)]
pub struct FilenameCodec {
    timezone: Tz,
}

impl Default for FilenameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEZONE)
    }
}

impl FilenameCodec {
    pub fn new(timezone: Tz) -> Self {
        Self { timezone }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Decodes a camera filename. `byte_size` is left at zero; sizes come from the store.
    pub fn parse(&self, filename: &str) -> Result<CameraFileRecord, ParseError> {
        let caps = FILENAME_RE
            .captures(filename)
            .ok_or_else(|| ParseError::NoMatch(filename.to_string()))?;
        let (camera_id, sequence, timestamp, extension) = (&caps[1], &caps[2], &caps[3], &caps[4]);

        let sequence_id =
            sequence
                .parse::<u32>()
                .map_err(|_| ParseError::SequenceOutOfRange {
                    filename: filename.to_string(),
                    sequence: sequence.to_string(),
                })?;
        let capture_time =
            self.decode_timestamp(timestamp)
                .ok_or_else(|| ParseError::InvalidTimestamp {
                    filename: filename.to_string(),
                    timestamp: timestamp.to_string(),
                })?;

        Ok(CameraFileRecord {
            camera_id: camera_id.to_string(),
            sequence_id,
            capture_time,
            kind: MediaKind::from_extension(extension),
            extension: extension.to_string(),
            filename: filename.to_string(),
            byte_size: 0,
        })
    }

    fn decode_timestamp(&self, digits: &str) -> Option<DateTime<Utc>> {
        let field = |range: Range<usize>| digits.get(range)?.parse::<u32>().ok();
        let date = NaiveDate::from_ymd_opt(field(0..4)? as i32, field(4..6)?, field(6..8)?)?;
        let time = NaiveTime::from_hms_opt(field(8..10)?, field(10..12)?, field(12..14)?)?;
        self.resolve_local(date.and_time(time))
    }

    /// Ambiguous wall-clock times take the earlier instant; times inside a
    /// spring-forward gap are moved past it.
    fn resolve_local(&self, civil: NaiveDateTime) -> Option<DateTime<Utc>> {
        let local = match self.timezone.from_local_datetime(&civil) {
            LocalResult::Single(local) => local,
            LocalResult::Ambiguous(earliest, _) => earliest,
            LocalResult::None => self
                .timezone
                .from_local_datetime(&(civil + TimeDelta::hours(1)))
                .earliest()?,
        };
        Some(local.with_timezone(&Utc))
    }
}
