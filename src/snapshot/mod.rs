//! # Snapshot Model
//!
//! Value types describing one device observation: a position fix plus the
//! cellular measurements seen at the same time.
//!
//! Every cellular field is an `Option<i32>`. `None` means the radio or OS did
//! not report the value, which is different from a reported zero. The JSON
//! encoding keeps that distinction by writing absent values as `null`.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TelemetryError};

pub mod source;

/// Band value radios report when the band is unknown
pub const BAND_UNKNOWN: i32 = -1;

/// Value the platform reports for an unavailable cell field
pub const CELL_VALUE_UNAVAILABLE: i32 = i32::MAX;

/// `None` for the platform's "unavailable" sentinel
fn reported(value: Option<i32>) -> Option<i32> {
    value.filter(|&v| v != CELL_VALUE_UNAVAILABLE)
}

/// One position fix
///
/// Immutable once constructed. Values are checked by [`PositionSample::new`]
/// and again when deserialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "PositionRecord")]
pub struct PositionSample {
    latitude: f64,
    longitude: f64,
    altitude: f64,
    captured_at_millis: i64,
    speed: f32,
    horizontal_accuracy: f32,
}

/// Unchecked wire form of [`PositionSample`]
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRecord {
    latitude: f64,
    longitude: f64,
    altitude: f64,
    captured_at_millis: i64,
    speed: f32,
    horizontal_accuracy: f32,
}

impl TryFrom<PositionRecord> for PositionSample {
    type Error = TelemetryError;

    fn try_from(r: PositionRecord) -> Result<Self> {
        PositionSample::new(
            r.latitude,
            r.longitude,
            r.altitude,
            r.captured_at_millis,
            r.speed,
            r.horizontal_accuracy,
        )
    }
}

impl PositionSample {
    /// Create a position sample
    ///
    /// # Arguments
    ///
    /// * `latitude` / `longitude` - Degrees (WGS84)
    /// * `altitude` - Meters
    /// * `captured_at_millis` - Epoch milliseconds of the fix
    /// * `speed` - Ground speed in m/s
    /// * `horizontal_accuracy` - Accuracy radius in meters
    ///
    /// # Errors
    ///
    /// Returns `InvalidSnapshot` if:
    /// - A coordinate is not finite or out of range
    /// - Speed or accuracy is negative or not finite
    pub fn new(
        latitude: f64,
        longitude: f64,
        altitude: f64,
        captured_at_millis: i64,
        speed: f32,
        horizontal_accuracy: f32,
    ) -> Result<Self> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(TelemetryError::InvalidSnapshot(format!(
                "latitude {} out of range",
                latitude
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(TelemetryError::InvalidSnapshot(format!(
                "longitude {} out of range",
                longitude
            )));
        }
        if !altitude.is_finite() {
            return Err(TelemetryError::InvalidSnapshot(
                "altitude must be finite".to_string(),
            ));
        }
        if !speed.is_finite() || speed < 0.0 {
            return Err(TelemetryError::InvalidSnapshot(format!(
                "speed {} must be >= 0",
                speed
            )));
        }
        if !horizontal_accuracy.is_finite() || horizontal_accuracy < 0.0 {
            return Err(TelemetryError::InvalidSnapshot(format!(
                "horizontal accuracy {} must be >= 0",
                horizontal_accuracy
            )));
        }

        Ok(Self {
            latitude,
            longitude,
            altitude,
            captured_at_millis,
            speed,
            horizontal_accuracy,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn altitude(&self) -> f64 {
        self.altitude
    }

    pub fn captured_at_millis(&self) -> i64 {
        self.captured_at_millis
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn horizontal_accuracy(&self) -> f32 {
        self.horizontal_accuracy
    }
}

/// Identity of an LTE cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellIdentity {
    /// Operating band; `None` when unknown
    pub band: Option<i32>,

    /// Physical cell id (PCI)
    pub physical_cell_id: Option<i32>,

    /// Tracking area code (TAC)
    pub tracking_area_code: Option<i32>,

    /// Mobile country code (MCC)
    pub mobile_country_code: Option<i32>,

    /// Mobile network code (MNC)
    pub mobile_network_code: Option<i32>,

    /// 28-bit E-UTRAN cell identity
    pub cell_id: Option<i32>,

    /// Downlink channel number (EARFCN)
    pub channel_number: Option<i32>,
}

impl CellIdentity {
    /// Replace raw platform sentinels with `None`
    ///
    /// Radios report [`BAND_UNKNOWN`] when the band list is empty or the OS
    /// version cannot query it, and [`CELL_VALUE_UNAVAILABLE`] for any field
    /// they do not know.
    pub fn normalized(self) -> Self {
        Self {
            band: reported(self.band.filter(|&b| b != BAND_UNKNOWN)),
            physical_cell_id: reported(self.physical_cell_id),
            tracking_area_code: reported(self.tracking_area_code),
            mobile_country_code: reported(self.mobile_country_code),
            mobile_network_code: reported(self.mobile_network_code),
            cell_id: reported(self.cell_id),
            channel_number: reported(self.channel_number),
        }
    }
}

/// Signal strength measurements of an LTE cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSignal {
    pub asu_level: Option<i32>,

    /// Reference signal received power, dBm
    pub rsrp: Option<i32>,

    /// Reference signal received quality, dB
    pub rsrq: Option<i32>,

    /// Received signal strength indicator, dBm
    pub rssi: Option<i32>,

    /// Reference signal signal-to-noise ratio, dB
    pub rssnr: Option<i32>,

    /// Channel quality indicator
    pub cqi: Option<i32>,

    pub timing_advance: Option<i32>,
}

impl CellSignal {
    /// Replace [`CELL_VALUE_UNAVAILABLE`] with `None`
    pub fn normalized(self) -> Self {
        Self {
            asu_level: reported(self.asu_level),
            rsrp: reported(self.rsrp),
            rsrq: reported(self.rsrq),
            rssi: reported(self.rssi),
            rssnr: reported(self.rssnr),
            cqi: reported(self.cqi),
            timing_advance: reported(self.timing_advance),
        }
    }
}

/// One cell identity paired with its signal measurements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellMeasurement {
    pub identity: CellIdentity,
    pub signal: CellSignal,

    /// Whether the device is registered (camped) on this cell
    #[serde(default = "default_registered")]
    pub registered: bool,
}

fn default_registered() -> bool { true }

impl CellMeasurement {
    /// Measurement of a registered (serving) cell
    pub fn serving(identity: CellIdentity, signal: CellSignal) -> Self {
        Self {
            identity,
            signal,
            registered: true,
        }
    }

    /// Same measurement with platform sentinels mapped to `None`
    pub fn normalized(self) -> Self {
        Self {
            identity: self.identity.normalized(),
            signal: self.signal.normalized(),
            ..self
        }
    }
}

/// One device observation: the unit serialized and sent per request
///
/// Each tick produces a fresh value; nothing mutates a snapshot after
/// creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    position: PositionSample,

    /// Scan order; may be empty
    #[serde(default)]
    cell_measurements: Vec<CellMeasurement>,
}

impl DeviceSnapshot {
    pub fn new(position: PositionSample, cell_measurements: Vec<CellMeasurement>) -> Self {
        Self {
            position,
            cell_measurements,
        }
    }

    pub fn position(&self) -> &PositionSample {
        &self.position
    }

    pub fn cell_measurements(&self) -> &[CellMeasurement] {
        &self.cell_measurements
    }

    /// Same snapshot with every cell's platform sentinels mapped to `None`
    pub fn normalized(self) -> Self {
        Self {
            cell_measurements: self
                .cell_measurements
                .into_iter()
                .map(CellMeasurement::normalized)
                .collect(),
            ..self
        }
    }

    /// Timestamp of the position fix, epoch milliseconds
    pub fn timestamp_millis(&self) -> i64 {
        self.position.captured_at_millis
    }

    /// Encode as the JSON request payload
    ///
    /// # Errors
    ///
    /// Returns `Serialize` if encoding fails
    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a JSON payload produced by [`DeviceSnapshot::to_payload`]
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}
