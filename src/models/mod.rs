use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::Error;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Clip,
    Other,
}

impl MediaKind {
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => MediaKind::Image,
            "mp4" => MediaKind::Clip,
            _ => MediaKind::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CameraFileRecord {
    pub camera_id: String,
    pub sequence_id: u32,
    #[serde(serialize_with = "serialize_iso_millis")]
    pub capture_time: DateTime<Utc>,
    pub kind: MediaKind,
    pub extension: String,
    pub filename: String,
    pub byte_size: u64,
}

impl CameraFileRecord {
    /// Ordering key shared by images and clips: time first, filename breaks ties.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.capture_time, self.filename.as_str())
    }
}

/// A still image together with the clips recorded until the next still image.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(flatten)]
    pub image: CameraFileRecord,
    pub clips: Vec<CameraFileRecord>,
}

impl Event {
    pub fn filename(&self) -> &str {
        &self.image.filename
    }

    pub fn capture_time(&self) -> DateTime<Utc> {
        self.image.capture_time
    }

    /// Own size plus the size of every owned clip.
    pub fn total_bytes(&self) -> u64 {
        self.image.byte_size + self.clips.iter().map(|clip| clip.byte_size).sum::<u64>()
    }
}

/// Calendar day as addressed by the `YYYY/MM/DD` directory layout.
///
/// Components are only checked for width and digits, never against the calendar,
/// so every day directory a camera writes round-trips to the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl DayDate {
    pub fn from_segments(year: &str, month: &str, day: &str) -> Option<Self> {
        Some(Self {
            year: fixed_width_number(year, 4)?,
            month: fixed_width_number(month, 2)?,
            day: fixed_width_number(day, 2)?,
        })
    }

    pub fn year_segment(&self) -> String {
        format!("{:04}", self.year)
    }

    pub fn month_segment(&self) -> String {
        format!("{:02}", self.month)
    }

    pub fn day_segment(&self) -> String {
        format!("{:02}", self.day)
    }

    /// Directory of this day relative to the store root.
    pub fn relative_dir(&self) -> PathBuf {
        [self.year_segment(), self.month_segment(), self.day_segment()]
            .iter()
            .collect()
    }
}

impl fmt::Display for DayDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for DayDate {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut parts = input.split('-');
        let parsed = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(year), Some(month), Some(day), None) => Self::from_segments(year, month, day),
            _ => None,
        };
        parsed.ok_or_else(|| Error::InvalidDate(input.to_string()))
    }
}

impl Serialize for DayDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub(crate) fn fixed_width_number<T: FromStr>(segment: &str, width: usize) -> Option<T> {
    if segment.len() != width || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySummary {
    pub date: DayDate,
    pub event_count: usize,
    pub total_bytes: u64,
    pub first_event: Option<String>,
    pub last_event: Option<String>,
}

impl Serialize for DaySummary {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DaySummary", 8)?;
        state.serialize_field("date", &self.date)?;
        state.serialize_field("year", &self.date.year_segment())?;
        state.serialize_field("month", &self.date.month_segment())?;
        state.serialize_field("day", &self.date.day_segment())?;
        state.serialize_field("eventCount", &self.event_count)?;
        state.serialize_field("totalBytes", &self.total_bytes)?;
        match self.first_event {
            Some(ref name) => state.serialize_field("firstEventFilename", name)?,
            None => state.skip_field("firstEventFilename")?,
        }
        match self.last_event {
            Some(ref name) => state.serialize_field("lastEventFilename", name)?,
            None => state.skip_field("lastEventFilename")?,
        }
        state.end()
    }
}

fn serialize_iso_millis<S: Serializer>(
    value: &DateTime<Utc>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
}
