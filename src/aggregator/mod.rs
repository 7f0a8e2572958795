use std::io;
use std::path::{Component, Path, PathBuf};

use futures::{stream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::codec::FilenameCodec;
use crate::config::ViewerConfig;
use crate::error::{Error, Result};
use crate::models::{CameraFileRecord, DayDate, DaySummary, Event};
use crate::pipeline::{associate, summarize_day, Association};
use crate::storage::{DirectoryStore, OpenedFile, StoreEntry};

const YEAR_WIDTH: usize = 4;
const MONTH_WIDTH: usize = 2;
const DAY_WIDTH: usize = 2;

/// Answers day-level questions about a `YYYY/MM/DD` tree of camera files.
///
/// Every call re-reads the store. Failures confined to one file or subtree
/// are logged and skipped; only an unreachable root fails a request.
pub struct DayAggregator<S> {
    store: S,
    config: ViewerConfig,
    codec: FilenameCodec,
}

impl<S: DirectoryStore> DayAggregator<S> {
    pub fn new(store: S, config: ViewerConfig) -> Self {
        let codec = config.codec();
        Self {
            store,
            config,
            codec,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    /// Events of one day, oldest first. A missing day directory is an empty day.
    pub async fn get_day(&self, date: &DayDate, cancel: &CancellationToken) -> Result<Vec<Event>> {
        self.ensure_root().await?;
        self.load_day(*date, cancel).await
    }

    /// Summaries of every day with at least one event, newest first.
    pub async fn list_days(&self, cancel: &CancellationToken) -> Result<Vec<DaySummary>> {
        self.ensure_root().await?;
        let dates = self.day_directories(cancel).await?;
        tracing::debug!(candidates = dates.len(), "walking day directories");

        let pending: Vec<_> = dates
            .into_iter()
            .map(|date| self.summarize(date, cancel))
            .collect();
        let summaries: Vec<Option<DaySummary>> = stream::iter(pending)
            .buffered(self.config.concurrency)
            .try_collect()
            .await?;

        let mut days: Vec<DaySummary> = summaries.into_iter().flatten().collect();
        days.sort_by(|a, b| b.date.cmp(&a.date));
        tracing::debug!(days = days.len(), "event days found");
        Ok(days)
    }

    /// Removes a day's directory. A day that does not exist counts as deleted.
    pub async fn delete_day(&self, date: &DayDate) -> bool {
        match self.store.remove_tree(&date.relative_dir()).await {
            Ok(()) => {
                tracing::info!(day = %date, "deleted event day");
                true
            }
            Err(err) => {
                tracing::error!(day = %date, error = %err, "failed to delete event day");
                false
            }
        }
    }

    /// Opens one file of a day directory for streaming. `None` when there is
    /// no regular file by that name.
    pub async fn open_file(
        &self,
        date: &DayDate,
        filename: &str,
    ) -> Result<Option<OpenedFile<S::Reader>>> {
        let mut components = Path::new(filename).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(Error::InvalidFileName(filename.to_string()));
        }
        match self.store.open_file(&date.relative_dir().join(filename)).await {
            Ok(opened) => Ok(Some(opened)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn ensure_root(&self) -> Result<()> {
        self.store
            .probe_root()
            .await
            .map_err(|source| Error::StoreUnavailable {
                root: self.store.root().to_path_buf(),
                source,
            })
    }

    async fn summarize(&self, date: DayDate, cancel: &CancellationToken) -> Result<Option<DaySummary>> {
        let events = self.load_day(date, cancel).await?;
        Ok(summarize_day(date, &events))
    }

    async fn load_day(&self, date: DayDate, cancel: &CancellationToken) -> Result<Vec<Event>> {
        ensure_active(cancel)?;
        let dir = date.relative_dir();
        let entries = match self.store.list_entries(&dir).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(day = %date, error = %err, "skipping unreadable day directory");
                return Ok(Vec::new());
            }
        };

        let records: Vec<CameraFileRecord> = entries
            .into_iter()
            .filter(|entry| !entry.is_dir)
            .filter_map(|entry| match self.codec.parse(&entry.name) {
                Ok(record) => Some(record),
                Err(err) => {
                    tracing::debug!(day = %date, error = %err, "skipping entry");
                    None
                }
            })
            .collect();

        let Association {
            mut events,
            dropped_clips,
        } = associate(records);
        if !dropped_clips.is_empty() {
            tracing::debug!(
                day = %date,
                dropped = dropped_clips.len(),
                "clips recorded before the first image have no event"
            );
        }

        for event in events.iter_mut() {
            self.annotate_size(&dir, &mut event.image, cancel).await?;
            for clip in event.clips.iter_mut() {
                self.annotate_size(&dir, clip, cancel).await?;
            }
        }
        Ok(events)
    }

    async fn annotate_size(
        &self,
        dir: &Path,
        record: &mut CameraFileRecord,
        cancel: &CancellationToken,
    ) -> Result<()> {
        ensure_active(cancel)?;
        record.byte_size = match self.store.stat_size(&dir.join(&record.filename)).await {
            Ok(size) => size,
            Err(err) => {
                tracing::warn!(file = %record.filename, error = %err, "size unavailable, counting as 0");
                0
            }
        };
        Ok(())
    }

    async fn day_directories(&self, cancel: &CancellationToken) -> Result<Vec<DayDate>> {
        ensure_active(cancel)?;
        let root_entries = self
            .store
            .list_entries(Path::new(""))
            .await
            .map_err(|source| Error::StoreUnavailable {
                root: self.store.root().to_path_buf(),
                source,
            })?;

        let mut dates = Vec::new();
        for year in layout_names(root_entries, YEAR_WIDTH) {
            let year_dir = PathBuf::from(&year);
            for month in self.subdirectories(&year_dir, MONTH_WIDTH, cancel).await? {
                let month_dir = year_dir.join(&month);
                for day in self.subdirectories(&month_dir, DAY_WIDTH, cancel).await? {
                    if let Some(date) = DayDate::from_segments(&year, &month, &day) {
                        dates.push(date);
                    }
                }
            }
        }
        Ok(dates)
    }

    async fn subdirectories(
        &self,
        dir: &Path,
        width: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        ensure_active(cancel)?;
        match self.store.list_entries(dir).await {
            Ok(entries) => Ok(layout_names(entries, width)),
            Err(err) => {
                tracing::warn!(dir = %dir.display(), error = %err, "skipping unreadable subtree");
                Ok(Vec::new())
            }
        }
    }
}

/// Directory names made of exactly `width` ASCII digits.
fn layout_names(entries: Vec<StoreEntry>, width: usize) -> Vec<String> {
    entries
        .into_iter()
        .filter(|entry| {
            entry.is_dir
                && entry.name.len() == width
                && entry.name.bytes().all(|b| b.is_ascii_digit())
        })
        .map(|entry| entry.name)
        .collect()
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn aggregator(store: MemoryStore) -> DayAggregator<MemoryStore> {
        DayAggregator::new(store, ViewerConfig::new("memory").with_concurrency(2))
    }

    fn date(text: &str) -> DayDate {
        text.parse().unwrap()
    }

    fn christmas_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.add_file("2024/12/25/camera1_01_20241225143000.jpg", vec![0; 10]);
        store.add_file("2024/12/25/camera1_02_20241225143005.mp4", vec![0; 200]);
        store.add_file("2024/12/25/camera1_03_20241225143030.jpg", vec![0; 20]);
        store.add_file("2024/12/25/camera1_04_20241225143035.mp4", vec![0; 400]);
        store
    }

    #[tokio::test]
    async fn get_day_associates_and_sizes_files() {
        let agg = aggregator(christmas_store());
        let events = agg
            .get_day(&date("2024-12-25"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].image.byte_size, 10);
        assert_eq!(events[0].clips[0].filename, "camera1_02_20241225143005.mp4");
        assert_eq!(events[0].clips[0].byte_size, 200);
        assert_eq!(events[1].clips[0].filename, "camera1_04_20241225143035.mp4");
        assert_eq!(events[1].total_bytes(), 420);
    }

    #[tokio::test]
    async fn get_day_on_missing_directory_is_empty() {
        let agg = aggregator(christmas_store());
        let events = agg
            .get_day(&date("2023-01-01"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn stat_failure_zeroes_only_that_file() {
        let store = christmas_store();
        store.fail_stat("2024/12/25/camera1_02_20241225143005.mp4");
        let agg = aggregator(store);
        let events = agg
            .get_day(&date("2024-12-25"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(events[0].image.byte_size, 10);
        assert_eq!(events[0].clips[0].byte_size, 0);
        assert_eq!(events[1].clips[0].byte_size, 400);
    }

    #[tokio::test]
    async fn unparseable_entries_and_subdirectories_are_skipped() {
        let store = christmas_store();
        store.add_file("2024/12/25/thumbs.db", "x");
        store.add_file("2024/12/25/.camera1_05_20241225143100.jpg.tmp", "x");
        store.add_dir("2024/12/25/camera1_09_20241225150000.jpg");
        let agg = aggregator(store);
        let events = agg
            .get_day(&date("2024-12-25"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn list_days_is_newest_first_and_omits_empty_days() {
        let store = christmas_store();
        store.add_file("2024/12/26/cam_01_20241226080000.jpg", vec![0; 5]);
        store.add_file("2024/12/27/cam_01_20241227080000.mp4", vec![0; 5]);
        store.add_file("2024/12/28/notes.txt", "x");
        store.add_dir("2024/12/29");
        store.add_file("2023/01/02/cam_01_20230102080000.jpg", vec![0; 1]);
        let agg = aggregator(store);

        let days = agg.list_days(&CancellationToken::new()).await.unwrap();
        let dates: Vec<String> = days.iter().map(|d| d.date.to_string()).collect();
        assert_eq!(dates, ["2024-12-26", "2024-12-25", "2023-01-02"]);

        let christmas = &days[1];
        assert_eq!(christmas.event_count, 2);
        assert_eq!(christmas.total_bytes, 630);
        assert_eq!(
            christmas.first_event.as_deref(),
            Some("camera1_01_20241225143000.jpg")
        );
        assert_eq!(
            christmas.last_event.as_deref(),
            Some("camera1_03_20241225143030.jpg")
        );
    }

    #[tokio::test]
    async fn list_days_ignores_entries_outside_the_layout() {
        let store = MemoryStore::new();
        store.add_file("2024/12/25/cam_01_20241225080000.jpg", "x");
        store.add_file("24/12/25/cam_01_20241225080000.jpg", "x");
        store.add_file("2024/1/25/cam_01_20241225080000.jpg", "x");
        store.add_file("2024/12/abc/cam_01_20241225080000.jpg", "x");
        store.add_file("backup/12/25/cam_01_20241225080000.jpg", "x");
        store.add_file("2025", "not a directory");
        let agg = aggregator(store);
        let days = agg.list_days(&CancellationToken::new()).await.unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, date("2024-12-25"));
    }

    #[tokio::test]
    async fn unreadable_subtrees_do_not_abort_the_walk() {
        let store = christmas_store();
        store.add_file("2024/11/01/cam_01_20241101080000.jpg", "x");
        store.add_file("2023/05/05/cam_01_20230505080000.jpg", "x");
        store.add_file("2022/02/02/cam_01_20220202080000.jpg", "x");
        store.make_unreadable("2024/11");
        store.make_unreadable("2022/02/02");
        let agg = aggregator(store);
        let days = agg.list_days(&CancellationToken::new()).await.unwrap();
        let dates: Vec<String> = days.iter().map(|d| d.date.to_string()).collect();
        assert_eq!(dates, ["2024-12-25", "2023-05-05"]);
    }

    #[tokio::test]
    async fn empty_tree_is_an_empty_success() {
        let agg = aggregator(MemoryStore::new());
        assert!(agg.list_days(&CancellationToken::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_root_fails_the_request() {
        let store = christmas_store();
        store.set_root_unavailable(true);
        let agg = aggregator(store);
        let cancel = CancellationToken::new();
        assert!(matches!(
            agg.list_days(&cancel).await,
            Err(Error::StoreUnavailable { .. })
        ));
        assert!(matches!(
            agg.get_day(&date("2024-12-25"), &cancel).await,
            Err(Error::StoreUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn cancelled_token_stops_work() {
        let agg = aggregator(christmas_store());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(agg.list_days(&cancel).await, Err(Error::Cancelled)));
        assert!(matches!(
            agg.get_day(&date("2024-12-25"), &cancel).await,
            Err(Error::Cancelled)
        ));
    }

    #[tokio::test]
    async fn delete_day_is_idempotent() {
        let agg = aggregator(christmas_store());
        assert!(agg.delete_day(&date("2024-12-25")).await);
        assert!(!agg.store().contains("2024/12/25"));
        assert!(agg.delete_day(&date("2024-12-25")).await);
        assert!(agg.delete_day(&date("1999-01-01")).await);
    }

    #[tokio::test]
    async fn delete_failure_is_reported() {
        let store = christmas_store();
        store.make_unremovable("2024/12/25");
        let agg = aggregator(store);
        assert!(!agg.delete_day(&date("2024-12-25")).await);
        assert!(agg.store().contains("2024/12/25/camera1_01_20241225143000.jpg"));
    }

    #[tokio::test]
    async fn open_file_rejects_paths_and_reports_missing() {
        use tokio::io::AsyncReadExt;

        let store = christmas_store();
        store.add_dir("2024/12/25/thumbs");
        let agg = aggregator(store);
        let day = date("2024-12-25");
        let mut opened = agg
            .open_file(&day, "camera1_02_20241225143005.mp4")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(opened.len, 200);
        let mut contents = Vec::new();
        opened.reader.read_to_end(&mut contents).await.unwrap();
        assert_eq!(contents.len(), 200);

        assert!(agg.open_file(&day, "missing.jpg").await.unwrap().is_none());
        assert!(agg.open_file(&day, "thumbs").await.unwrap().is_none());
        for bad in ["../secret", "a/b.jpg", "", "/etc/passwd", ".."] {
            assert!(
                matches!(agg.open_file(&day, bad).await, Err(Error::InvalidFileName(_))),
                "{bad} should be rejected"
            );
        }
    }
}
