//! NMEA 0183 location sensor.
//!
//! Reads `RMC` (recommended minimum) sentences line by line from a GPS
//! receiver's device node, a log file, a FIFO, standard input, or any async
//! reader, and turns active fixes into [`Sample`]s.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace, warn};

use super::{LocationSensor, Sample, SensorEvent, WatchOptions};
use crate::error::{Error, Result};
use crate::float::Position;
use crate::subscription::Subscription;

/// Metres per second in one knot.
const KNOTS_TO_MPS: f64 = 0.514_444;

/// Errors that can occur while parsing a sentence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NmeaError {
    /// The line is not an NMEA sentence.
    #[error("sentence does not start with '$'")]
    MissingStart,

    /// The checksum field is not two hex digits.
    #[error("invalid checksum field: {0:?}")]
    InvalidChecksum(String),

    /// The checksum does not match the sentence body.
    #[error("checksum mismatch: expected {expected:02X}, computed {computed:02X}")]
    ChecksumMismatch {
        /// Checksum carried by the sentence.
        expected: u8,
        /// Checksum of the received body.
        computed: u8,
    },

    /// The sentence has fewer fields than `RMC` requires.
    #[error("RMC sentence has {0} fields, expected at least 10")]
    TooShort(usize),

    /// A field could not be parsed.
    #[error("invalid {field} field: {value:?}")]
    Field {
        /// Field name.
        field: &'static str,
        /// Raw field contents.
        value: String,
    },
}

/// A decoded `RMC` sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct RmcFix {
    /// UTC fix time, if both date and time were present.
    pub time: Option<DateTime<Utc>>,
    /// `A` status: the receiver has a fix.
    pub active: bool,
    /// Fix coordinate.
    pub position: Option<Position>,
    /// Speed over ground in knots.
    pub speed_knots: Option<f64>,
    /// Course over ground in degrees true.
    pub course: Option<f64>,
    /// NMEA 2.3 mode indicator.
    pub mode: Option<char>,
}

impl RmcFix {
    /// Convert to a sample, if this fix is usable.
    ///
    /// With `high_accuracy`, only autonomous, differential, precise and RTK
    /// fixes are accepted; otherwise only "no fix" modes are rejected.
    #[must_use]
    pub fn to_sample(&self, high_accuracy: bool) -> Option<Sample> {
        if !self.active {
            return None;
        }
        let mode_ok = match self.mode {
            None => true,
            Some(m) if high_accuracy => matches!(m, 'A' | 'D' | 'P' | 'R' | 'F'),
            Some(m) => m != 'N',
        };
        if !mode_ok {
            return None;
        }
        let position = self.position?;
        Some(Sample {
            lat: position.lat,
            lng: position.lng,
            heading: self.course,
            speed: self.speed_knots.map(|k| k * KNOTS_TO_MPS),
            timestamp: self.time.unwrap_or_else(Utc::now),
        })
    }
}

/// XOR checksum of a sentence body (between `$` and `*`).
#[must_use]
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Parse one line.
///
/// Returns `Ok(None)` for well-formed sentences that are not `RMC`.
///
/// # Errors
///
/// Returns an error if the line is not a valid sentence or the `RMC` fields
/// are malformed.
pub fn parse_rmc(line: &str) -> std::result::Result<Option<RmcFix>, NmeaError> {
    let line = line.trim();
    let Some(rest) = line.strip_prefix('$') else {
        return Err(NmeaError::MissingStart);
    };

    let body = match rest.split_once('*') {
        Some((body, sum)) => {
            let expected = u8::from_str_radix(sum, 16)
                .ok()
                .filter(|_| sum.len() == 2)
                .ok_or_else(|| NmeaError::InvalidChecksum(sum.to_string()))?;
            let computed = checksum(body);
            if expected != computed {
                return Err(NmeaError::ChecksumMismatch { expected, computed });
            }
            body
        }
        None => rest,
    };

    let fields: Vec<&str> = body.split(',').collect();
    if fields[0].len() != 5 || !fields[0].ends_with("RMC") {
        return Ok(None);
    }
    if fields.len() < 10 {
        return Err(NmeaError::TooShort(fields.len()));
    }

    let active = match fields[2] {
        "A" => true,
        "V" | "" => false,
        other => return Err(field_error("status", other)),
    };

    let lat = parse_coordinate(fields[3], fields[4], 2, "latitude")?;
    let lng = parse_coordinate(fields[5], fields[6], 3, "longitude")?;
    let position = match (lat, lng) {
        (Some(lat), Some(lng)) => Some(Position::new(lat, lng)),
        _ => None,
    };

    Ok(Some(RmcFix {
        time: parse_time(fields[1], fields[9])?,
        active,
        position,
        speed_knots: parse_optional(fields[7], "speed")?,
        course: parse_optional(fields[8], "course")?,
        mode: fields.get(12).and_then(|m| m.chars().next()),
    }))
}

fn field_error(field: &'static str, value: &str) -> NmeaError {
    NmeaError::Field {
        field,
        value: value.to_string(),
    }
}

fn parse_optional(value: &str, field: &'static str) -> std::result::Result<Option<f64>, NmeaError> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| field_error(field, value))
}

/// Parse `ddmm.mmmm` / `dddmm.mmmm` plus hemisphere into signed degrees.
fn parse_coordinate(
    value: &str,
    hemisphere: &str,
    degree_digits: usize,
    field: &'static str,
) -> std::result::Result<Option<f64>, NmeaError> {
    if value.is_empty() {
        return Ok(None);
    }
    if value.len() < degree_digits + 2 || !value.is_char_boundary(degree_digits) {
        return Err(field_error(field, value));
    }
    let (deg, min) = value.split_at(degree_digits);
    if !deg.bytes().all(|b| b.is_ascii_digit())
        || !min.bytes().all(|b| b.is_ascii_digit() || b == b'.')
    {
        return Err(field_error(field, value));
    }
    let degrees: f64 = deg.parse().map_err(|_| field_error(field, value))?;
    let minutes: f64 = min.parse().map_err(|_| field_error(field, value))?;
    if !(0.0..60.0).contains(&minutes) {
        return Err(field_error(field, value));
    }

    let magnitude = degrees + minutes / 60.0;
    match hemisphere {
        "N" | "E" => Ok(Some(magnitude)),
        "S" | "W" => Ok(Some(-magnitude)),
        other => Err(field_error("hemisphere", other)),
    }
}

/// Combine `hhmmss[.sss]` and `ddmmyy` into a UTC time.
fn parse_time(time: &str, date: &str) -> std::result::Result<Option<DateTime<Utc>>, NmeaError> {
    if time.is_empty() || date.is_empty() {
        return Ok(None);
    }
    let digits = |s: &str, field: &'static str| -> std::result::Result<u32, NmeaError> {
        s.parse::<u32>().map_err(|_| field_error(field, s))
    };

    if time.len() < 6 || !time.is_ascii() || date.len() != 6 || !date.is_ascii() {
        return Err(field_error("time", time));
    }
    let (hms, fraction) = time.split_at(6);
    let millis = if fraction.is_empty() {
        0
    } else {
        let secs: f64 = fraction.parse().map_err(|_| field_error("time", time))?;
        millis_from_fraction(secs)
    };

    let clock = NaiveTime::from_hms_milli_opt(
        digits(&hms[0..2], "time")?,
        digits(&hms[2..4], "time")?,
        digits(&hms[4..6], "time")?,
        millis,
    )
    .ok_or_else(|| field_error("time", time))?;

    let yy = digits(&date[4..6], "date")?;
    let year = if yy >= 80 { 1900 + yy } else { 2000 + yy };
    let day = NaiveDate::from_ymd_opt(
        i32::try_from(year).map_err(|_| field_error("date", date))?,
        digits(&date[2..4], "date")?,
        digits(&date[0..2], "date")?,
    )
    .ok_or_else(|| field_error("date", date))?;

    Ok(Some(Utc.from_utc_datetime(&day.and_time(clock))))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn millis_from_fraction(secs: f64) -> u32 {
    (secs * 1000.0).round().clamp(0.0, 999.0) as u32
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Where a [`NmeaSensor`] reads sentences from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NmeaSource {
    /// Standard input.
    Stdin,
    /// A device node, file or FIFO.
    Path(PathBuf),
    /// A reader handed to [`NmeaSensor::from_reader`]; usable for one watch.
    Stream,
}

impl NmeaSource {
    /// Interpret a command-line argument: `-` is standard input.
    #[must_use]
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            Self::Stdin
        } else {
            Self::Path(PathBuf::from(arg))
        }
    }
}

impl std::fmt::Display for NmeaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdin => write!(f, "stdin"),
            Self::Path(p) => write!(f, "{}", p.display()),
            Self::Stream => write!(f, "stream"),
        }
    }
}

/// A [`LocationSensor`] fed by NMEA sentences.
pub struct NmeaSensor {
    source: NmeaSource,
    stream: Mutex<Option<BoxedReader>>,
}

impl NmeaSensor {
    /// Create a sensor reading from `source`.
    #[must_use]
    pub fn new(source: NmeaSource) -> Self {
        Self {
            source,
            stream: Mutex::new(None),
        }
    }

    /// Create a sensor reading from an already-open stream.
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            source: NmeaSource::Stream,
            stream: Mutex::new(Some(Box::new(reader))),
        }
    }

    /// Get the sentence source.
    #[must_use]
    pub fn source(&self) -> &NmeaSource {
        &self.source
    }

    fn take_stream(&self) -> Option<BoxedReader> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl std::fmt::Debug for NmeaSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NmeaSensor")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl LocationSensor for NmeaSensor {
    fn name(&self) -> &'static str {
        "nmea"
    }

    fn is_available(&self) -> bool {
        match &self.source {
            NmeaSource::Stdin => true,
            NmeaSource::Path(path) => path.exists(),
            NmeaSource::Stream => self
                .stream
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some(),
        }
    }

    fn start_watch(
        &self,
        options: WatchOptions,
        tx: mpsc::Sender<SensorEvent>,
    ) -> Result<Subscription> {
        let source = self.source.clone();
        let stream = match source {
            NmeaSource::Stream => Some(
                self.take_stream()
                    .ok_or_else(|| Error::sensing("NMEA stream was already consumed"))?,
            ),
            _ => None,
        };

        debug!(
            source = %source,
            timeout_ms = options.timeout.as_millis(),
            high_accuracy = options.high_accuracy,
            "Starting NMEA watch"
        );

        let task = tokio::spawn(async move {
            let reader: BoxedReader = match (source, stream) {
                (_, Some(stream)) => stream,
                (NmeaSource::Path(path), None) => match tokio::fs::File::open(&path).await {
                    Ok(file) => Box::new(file),
                    Err(e) => {
                        let _ = tx
                            .send(SensorEvent::Error(format!(
                                "failed to open {}: {e}",
                                path.display()
                            )))
                            .await;
                        return;
                    }
                },
                _ => Box::new(tokio::io::stdin()),
            };
            run_watch(BufReader::new(reader), options, tx).await;
        });

        Ok(Subscription::new("nmea", move || task.abort()))
    }
}

/// Read sentences until the stream ends, fails, times out or `tx` closes.
async fn run_watch<R: AsyncBufRead + Unpin>(
    reader: R,
    options: WatchOptions,
    tx: mpsc::Sender<SensorEvent>,
) {
    let mut lines = reader.lines();
    let mut deadline = Instant::now() + options.timeout;
    let mut newest: Option<DateTime<Utc>> = None;
    let max_age = chrono::Duration::from_std(options.maximum_age).unwrap_or(chrono::Duration::MAX);

    let failure = loop {
        let line = match timeout_at(deadline, lines.next_line()).await {
            Err(_) => {
                break format!(
                    "no position fix within {} ms",
                    options.timeout.as_millis()
                )
            }
            Ok(Err(e)) => break format!("reading location source failed: {e}"),
            Ok(Ok(None)) => break "location source closed".to_string(),
            Ok(Ok(Some(line))) => line,
        };

        let fix = match parse_rmc(&line) {
            Ok(Some(fix)) => fix,
            Ok(None) => continue,
            Err(e) => {
                debug!(error = %e, "Skipping malformed NMEA sentence");
                continue;
            }
        };

        let Some(sample) = fix.to_sample(options.high_accuracy) else {
            trace!("Skipping RMC sentence without a usable fix");
            continue;
        };

        if let Some(latest) = newest {
            if latest - sample.timestamp > max_age {
                trace!(fix_time = %sample.timestamp, "Skipping stale fix");
                continue;
            }
        }
        newest = Some(newest.map_or(sample.timestamp, |n| n.max(sample.timestamp)));
        deadline = Instant::now() + options.timeout;

        if tx.send(SensorEvent::Sample(sample)).await.is_err() {
            debug!("Sample channel closed, stopping NMEA watch");
            return;
        }
    };

    warn!(reason = %failure, "NMEA watch ended");
    let _ = tx.send(SensorEvent::Error(failure)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    const WIKI_RMC: &str =
        "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";

    fn sentence(body: &str) -> String {
        format!("${body}*{:02X}", checksum(body))
    }

    fn options(timeout_ms: u64) -> WatchOptions {
        WatchOptions {
            high_accuracy: true,
            maximum_age: Duration::from_secs(2),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[test]
    fn test_parse_reference_sentence() {
        let fix = parse_rmc(WIKI_RMC).unwrap().unwrap();

        assert!(fix.active);
        let pos = fix.position.unwrap();
        assert!((pos.lat - 48.1173).abs() < 1e-4);
        assert!((pos.lng - 11.516_666).abs() < 1e-4);
        assert_eq!(fix.speed_knots, Some(22.4));
        assert_eq!(fix.course, Some(84.4));
        assert_eq!(
            fix.time,
            Some(Utc.with_ymd_and_hms(1994, 3, 23, 12, 35, 19).unwrap())
        );
        assert!(fix.mode.is_none());
    }

    #[test]
    fn test_southern_western_hemispheres() {
        let line = sentence("GNRMC,010203.50,A,3351.000,S,15112.000,W,0.0,,010125,,,A");
        let fix = parse_rmc(&line).unwrap().unwrap();

        let pos = fix.position.unwrap();
        assert!((pos.lat + 33.85).abs() < 1e-9);
        assert!((pos.lng + 151.2).abs() < 1e-9);
        assert!(fix.course.is_none());
        assert_eq!(fix.mode, Some('A'));
        assert_eq!(
            fix.time,
            Some(
                Utc.with_ymd_and_hms(2025, 1, 1, 1, 2, 3).unwrap()
                    + chrono::Duration::milliseconds(500)
            )
        );
    }

    #[test]
    fn test_checksum_mismatch() {
        let err = parse_rmc(&WIKI_RMC.replace("*6A", "*00")).unwrap_err();
        assert!(matches!(err, NmeaError::ChecksumMismatch { expected: 0, .. }));
    }

    #[test]
    fn test_invalid_checksum_field() {
        let err = parse_rmc("$GPRMC,123519,A*XYZ").unwrap_err();
        assert!(matches!(err, NmeaError::InvalidChecksum(_)));
    }

    #[test]
    fn test_not_a_sentence() {
        assert_eq!(parse_rmc("hello"), Err(NmeaError::MissingStart));
    }

    #[test]
    fn test_other_sentences_ignored() {
        let gga = sentence("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,");
        assert_eq!(parse_rmc(&gga), Ok(None));
    }

    #[test]
    fn test_too_short() {
        let err = parse_rmc(&sentence("GPRMC,123519,A")).unwrap_err();
        assert_eq!(err, NmeaError::TooShort(3));
    }

    #[test]
    fn test_bad_minutes() {
        let line = sentence("GPRMC,123519,A,4875.000,N,01131.000,E,,,230394,,");
        let err = parse_rmc(&line).unwrap_err();
        assert!(err.to_string().contains("latitude"));
    }

    #[test]
    fn test_non_numeric_coordinates_rejected() {
        let line = sentence("GPRMC,123519,A,4807.038,N,inf00.000,E,,,230394,,");
        let err = parse_rmc(&line).unwrap_err();
        assert!(err.to_string().contains("longitude"));

        let line = sentence("GPRMC,123519,A,+807.038,N,01131.000,E,,,230394,,");
        assert!(parse_rmc(&line).is_err());

        let line = sentence("GPRMC,123519,A,4807.038,N,011NaN,E,,,230394,,");
        assert!(parse_rmc(&line).is_err());
    }

    #[test]
    fn test_void_fix_is_not_a_sample() {
        let line = sentence("GPRMC,123519,V,,,,,,,230394,,");
        let fix = parse_rmc(&line).unwrap().unwrap();
        assert!(!fix.active);
        assert!(fix.position.is_none());
        assert!(fix.to_sample(false).is_none());
    }

    #[test]
    fn test_high_accuracy_rejects_estimated_fix() {
        let line = sentence("GPRMC,123519,A,4807.038,N,01131.000,E,1.0,90.0,230394,,,E");
        let fix = parse_rmc(&line).unwrap().unwrap();
        assert!(fix.to_sample(true).is_none());
        assert!(fix.to_sample(false).is_some());
    }

    #[test]
    fn test_sample_conversion() {
        let sample = parse_rmc(WIKI_RMC)
            .unwrap()
            .unwrap()
            .to_sample(true)
            .unwrap();
        assert!((sample.speed.unwrap() - 22.4 * KNOTS_TO_MPS).abs() < 1e-9);
        assert_eq!(sample.heading, Some(84.4));
    }

    #[test]
    fn test_source_from_arg() {
        assert_eq!(NmeaSource::from_arg("-"), NmeaSource::Stdin);
        assert_eq!(
            NmeaSource::from_arg("/dev/ttyUSB0"),
            NmeaSource::Path(PathBuf::from("/dev/ttyUSB0"))
        );
        assert_eq!(NmeaSource::Stdin.to_string(), "stdin");
    }

    #[test]
    fn test_availability() {
        assert!(NmeaSensor::new(NmeaSource::Stdin).is_available());
        assert!(!NmeaSensor::new(NmeaSource::Path(PathBuf::from("/nonexistent/gps"))).is_available());

        let sensor = NmeaSensor::from_reader(tokio::io::empty());
        assert!(sensor.is_available());
        assert_eq!(sensor.source(), &NmeaSource::Stream);
    }

    #[tokio::test]
    async fn test_watch_streams_samples_then_reports_close() {
        let input = format!(
            "{WIKI_RMC}\nnoise\n{}\n",
            sentence("GPRMC,123520,A,4807.040,N,01131.002,E,022.0,085.0,230394,,,A")
        );
        let sensor = NmeaSensor::from_reader(std::io::Cursor::new(input.into_bytes()));
        let (tx, mut rx) = mpsc::channel(8);

        let _watch = sensor.start_watch(options(1_000), tx).unwrap();

        assert!(matches!(rx.recv().await, Some(SensorEvent::Sample(_))));
        assert!(matches!(rx.recv().await, Some(SensorEvent::Sample(_))));
        assert_eq!(
            rx.recv().await,
            Some(SensorEvent::Error("location source closed".to_string()))
        );
        assert!(!sensor.is_available());
    }

    #[tokio::test]
    async fn test_watch_times_out_without_fix() {
        let (_writer, reader) = tokio::io::duplex(64);
        let sensor = NmeaSensor::from_reader(reader);
        let (tx, mut rx) = mpsc::channel(8);

        let _watch = sensor.start_watch(options(50), tx).unwrap();

        match rx.recv().await {
            Some(SensorEvent::Error(msg)) => assert!(msg.contains("no position fix")),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_watch_skips_stale_replay() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let sensor = NmeaSensor::from_reader(reader);
        let (tx, mut rx) = mpsc::channel(8);
        let _watch = sensor.start_watch(options(1_000), tx).unwrap();

        let newer = sentence("GPRMC,123530,A,4807.038,N,01131.000,E,1.0,1.0,230394,,,A");
        let older = sentence("GPRMC,123500,A,4807.038,N,01131.000,E,1.0,2.0,230394,,,A");
        let next = sentence("GPRMC,123531,A,4807.038,N,01131.000,E,1.0,3.0,230394,,,A");
        writer
            .write_all(format!("{newer}\n{older}\n{next}\n").as_bytes())
            .await
            .unwrap();

        let headings: Vec<Option<f64>> = [rx.recv().await, rx.recv().await]
            .into_iter()
            .map(|e| match e {
                Some(SensorEvent::Sample(s)) => s.heading,
                other => panic!("unexpected event: {other:?}"),
            })
            .collect();
        assert_eq!(headings, vec![Some(1.0), Some(3.0)]);
    }

    #[tokio::test]
    async fn test_second_watch_on_stream_fails() {
        let sensor = NmeaSensor::from_reader(tokio::io::empty());
        let (tx, _rx) = mpsc::channel(8);
        let first = sensor.start_watch(options(1_000), tx.clone()).unwrap();
        first.cancel();

        let err = sensor.start_watch(options(1_000), tx).unwrap_err();
        assert!(err.to_string().contains("already consumed"));
    }

    #[tokio::test]
    async fn test_watch_missing_file_reports_error() {
        let sensor = NmeaSensor::new(NmeaSource::Path(PathBuf::from("/nonexistent/gps.log")));
        let (tx, mut rx) = mpsc::channel(8);
        let _watch = sensor.start_watch(options(1_000), tx).unwrap();

        match rx.recv().await {
            Some(SensorEvent::Error(msg)) => assert!(msg.contains("failed to open")),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
