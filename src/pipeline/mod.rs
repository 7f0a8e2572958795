use crate::models::{CameraFileRecord, DayDate, DaySummary, Event, MediaKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Association {
    /// Ascending by capture time, ties broken by filename.
    pub events: Vec<Event>,
    /// Clips recorded before the first image of the day; no event owns them.
    pub dropped_clips: Vec<CameraFileRecord>,
}

/// Groups one day's records into events.
///
/// Each image opens the half-open window `[image, next image)`, the last one
/// stays open. A clip belongs to the window containing its capture time, so a
/// clip stamped exactly at an image boundary goes to the later image.
/// Records of kind [`MediaKind::Other`] are ignored.
pub fn associate(records: impl IntoIterator<Item = CameraFileRecord>) -> Association {
    let mut images = Vec::new();
    let mut clips = Vec::new();
    for record in records {
        match record.kind {
            MediaKind::Image => images.push(record),
            MediaKind::Clip => clips.push(record),
            MediaKind::Other => {}
        }
    }
    images.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    clips.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let mut events: Vec<Event> = images
        .into_iter()
        .map(|image| Event {
            image,
            clips: Vec::new(),
        })
        .collect();
    let mut dropped_clips = Vec::new();

    for clip in clips {
        let opened = events.partition_point(|event| event.capture_time() <= clip.capture_time);
        match opened.checked_sub(1) {
            Some(owner) => events[owner].clips.push(clip),
            None => dropped_clips.push(clip),
        }
    }

    Association {
        events,
        dropped_clips,
    }
}

/// Rolls a day's events up into a summary; `None` when the day has no events.
pub fn summarize_day(date: DayDate, events: &[Event]) -> Option<DaySummary> {
    let first = events.first()?;
    let last = events.last()?;
    Some(DaySummary {
        date,
        event_count: events.len(),
        total_bytes: events.iter().map(Event::total_bytes).sum(),
        first_event: Some(first.filename().to_string()),
        last_event: Some(last.filename().to_string()),
    })
}
