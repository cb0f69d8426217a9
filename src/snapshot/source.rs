//! Snapshot sources consumed by the reporter

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::{CellMeasurement, DeviceSnapshot, PositionSample};

/// Produces the current device snapshot on demand
///
/// Each call resolves exactly once: with a fresh snapshot, or with `None`
/// when no data is available (no position fix yet, permission denied).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> Option<DeviceSnapshot>;
}

/// Publishing half of a live snapshot source
///
/// Location and radio subscriptions push their latest values here; the
/// paired [`LiveSource`] reads them when a tick asks for a snapshot.
#[derive(Debug)]
pub struct LiveFeed {
    position: watch::Sender<Option<PositionSample>>,
    cells: watch::Sender<Vec<CellMeasurement>>,
}

/// Reading half of a live snapshot source
#[derive(Debug, Clone)]
pub struct LiveSource {
    position: watch::Receiver<Option<PositionSample>>,
    cells: watch::Receiver<Vec<CellMeasurement>>,
}

impl LiveFeed {
    /// Create a feed with no fix and no cells, plus its reading half
    pub fn new() -> (Self, LiveSource) {
        let (position_tx, position_rx) = watch::channel(None);
        let (cells_tx, cells_rx) = watch::channel(Vec::new());

        (
            Self {
                position: position_tx,
                cells: cells_tx,
            },
            LiveSource {
                position: position_rx,
                cells: cells_rx,
            },
        )
    }

    /// Record the latest position fix
    pub fn publish_fix(&self, position: PositionSample) {
        self.position.send_replace(Some(position));
    }

    /// Forget the current fix; snapshots are unavailable until the next one
    pub fn clear_fix(&self) {
        self.position.send_replace(None);
    }

    /// Replace the latest cell scan
    ///
    /// Raw platform sentinels in the scan are mapped to `None`.
    pub fn publish_cells(&self, cells: Vec<CellMeasurement>) {
        self.cells
            .send_replace(cells.into_iter().map(CellMeasurement::normalized).collect());
    }
}

#[async_trait]
impl SnapshotSource for LiveSource {
    async fn snapshot(&self) -> Option<DeviceSnapshot> {
        let Some(position) = *self.position.borrow() else {
            debug!("No position fix yet");
            return None;
        };

        // Only cells the device is camped on are reported
        let cells: Vec<CellMeasurement> = self
            .cells
            .borrow()
            .iter()
            .filter(|cell| cell.registered)
            .copied()
            .collect();

        Some(DeviceSnapshot::new(position, cells))
    }
}

/// Reads a JSON snapshot from a file on every call
///
/// Used to bridge an external GPS/modem helper that keeps the file current.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SnapshotSource for FileSource {
    async fn snapshot(&self) -> Option<DeviceSnapshot> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Snapshot file {} not present yet", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Failed to read snapshot file {}: {}", self.path.display(), e);
                return None;
            }
        };

        match DeviceSnapshot::from_payload(&contents) {
            // The helper may write raw platform values
            Ok(snapshot) => Some(snapshot.normalized()),
            Err(e) => {
                warn!("Ignoring invalid snapshot file {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CellIdentity, CellSignal, BAND_UNKNOWN, CELL_VALUE_UNAVAILABLE};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fix() -> PositionSample {
        PositionSample::new(59.93, 30.33, 12.0, 1_000, 0.0, 3.0).unwrap()
    }

    fn cell(id: i32) -> CellIdentity {
        CellIdentity {
            cell_id: Some(id),
            ..CellIdentity::default()
        }
    }

    #[tokio::test]
    async fn test_live_source_unavailable_without_fix() {
        let (_feed, source) = LiveFeed::new();
        assert!(source.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_live_source_reports_latest_fix() {
        let (feed, source) = LiveFeed::new();
        feed.publish_fix(fix());

        let snapshot = source.snapshot().await.unwrap();
        assert_eq!(snapshot.position(), &fix());
        assert!(snapshot.cell_measurements().is_empty());
    }

    #[tokio::test]
    async fn test_live_source_keeps_only_registered_cells_in_scan_order() {
        let (feed, source) = LiveFeed::new();
        feed.publish_fix(fix());
        feed.publish_cells(vec![
            CellMeasurement::serving(cell(3), CellSignal::default()),
            CellMeasurement {
                registered: false,
                ..CellMeasurement::serving(cell(1), CellSignal::default())
            },
            CellMeasurement::serving(cell(2), CellSignal::default()),
        ]);

        let snapshot = source.snapshot().await.unwrap();
        let ids: Vec<_> = snapshot
            .cell_measurements()
            .iter()
            .map(|c| c.identity.cell_id)
            .collect();
        assert_eq!(ids, vec![Some(3), Some(2)]);
    }

    #[tokio::test]
    async fn test_live_source_normalizes_published_cells() {
        let (feed, source) = LiveFeed::new();
        feed.publish_fix(fix());
        feed.publish_cells(vec![CellMeasurement::serving(
            CellIdentity {
                band: Some(BAND_UNKNOWN),
                ..cell(5)
            },
            CellSignal {
                rsrp: Some(-101),
                cqi: Some(CELL_VALUE_UNAVAILABLE),
                ..CellSignal::default()
            },
        )]);

        let snapshot = source.snapshot().await.unwrap();
        let measured = snapshot.cell_measurements()[0];
        assert_eq!(measured.identity.band, None);
        assert_eq!(measured.identity.cell_id, Some(5));
        assert_eq!(measured.signal.rsrp, Some(-101));
        assert_eq!(measured.signal.cqi, None);
    }

    #[tokio::test]
    async fn test_live_source_unavailable_after_fix_cleared() {
        let (feed, source) = LiveFeed::new();
        feed.publish_fix(fix());
        feed.clear_fix();
        assert!(source.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_file_source_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileSource::new(dir.path().join("absent.json"));
        assert!(source.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_file_source_reads_snapshot() {
        let snapshot = DeviceSnapshot::new(fix(), vec![]);
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&snapshot.to_payload().unwrap()).unwrap();
        file.flush().unwrap();

        let source = FileSource::new(file.path());
        assert_eq!(source.snapshot().await, Some(snapshot));
    }

    #[tokio::test]
    async fn test_file_source_normalizes_raw_values() {
        let json = r#"{"position":{"latitude":1.0,"longitude":2.0,"altitude":3.0,
            "capturedAtMillis":4,"speed":0.0,"horizontalAccuracy":5.0},
            "cellMeasurements":[{
                "identity":{"band":-1,"physicalCellId":0,"trackingAreaCode":2147483647,
                    "mobileCountryCode":250,"mobileNetworkCode":1,"cellId":7,"channelNumber":null},
                "signal":{"asuLevel":null,"rsrp":-95,"rsrq":2147483647,"rssi":null,
                    "rssnr":null,"cqi":null,"timingAdvance":null}}]}"#;
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file.flush().unwrap();

        let snapshot = FileSource::new(file.path()).snapshot().await.unwrap();
        let measured = snapshot.cell_measurements()[0];
        assert_eq!(measured.identity.band, None);
        assert_eq!(measured.identity.physical_cell_id, Some(0));
        assert_eq!(measured.identity.tracking_area_code, None);
        assert_eq!(measured.signal.rsrp, Some(-95));
        assert_eq!(measured.signal.rsrq, None);
        assert!(measured.registered);
    }

    #[tokio::test]
    async fn test_file_source_invalid_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        file.flush().unwrap();

        let source = FileSource::new(file.path());
        assert!(source.snapshot().await.is_none());
    }
}
