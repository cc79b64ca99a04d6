//! Load an eye-tracker gaze archive into time-ordered tables.
//!
//! A gaze archive is a directory or zip file holding three CSV tables, each of
//! which may also be stored gzip compressed with a `.gz` suffix:
//!
//! - `samples.csv`: `time, gx_left, gy_left, gx_right, gy_right`
//! - `events.csv`: `type, eye, start, end, gavx, gavy, gstx, gsty, genx, geny`
//! - `messages.csv`: `time, message`
//!
//! Column names are a fixed contract. A missing required column is an error
//! rather than a reason to look for alternatives. Extra columns are ignored.

use std::{
    io::Read,
    path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use gaze_types::{
    EventRow, Eye, Fixation, Message, MessageRow, Saccade, Sample, SampleRow, TimeInterval,
    UnknownEye,
};

mod archive;
mod writer;

pub use writer::{GazeTables, write_dir, write_zip};

pub const SAMPLES_FNAME: &str = "samples.csv";
pub const EVENTS_FNAME: &str = "events.csv";
pub const MESSAGES_FNAME: &str = "messages.csv";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("gaze archive not found: \"{}\"", .0.display())]
    NotFound(PathBuf),
    #[error("table \"{0}\" not found in gaze archive")]
    MissingTable(String),
    #[error("table \"{table}\" lacks required column \"{column}\"")]
    MissingColumn { table: String, column: String },
    #[error("row {row} of \"{table}\": {source}")]
    BadEye {
        table: String,
        row: usize,
        source: UnknownEye,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The parsed contents of a gaze archive.
///
/// All tables are sorted by time. Fixations and saccades are sorted by start
/// and do not overlap other events of the same kind and eye.
#[derive(Debug, Clone, Default)]
pub struct GazeRecording {
    pub samples_left: Vec<Sample>,
    pub samples_right: Vec<Sample>,
    pub fixations: Vec<Fixation>,
    pub saccades: Vec<Saccade>,
    pub messages: Vec<Message>,
}

impl GazeRecording {
    pub fn samples(&self, eye: Eye) -> &[Sample] {
        match eye {
            Eye::Left => &self.samples_left,
            Eye::Right => &self.samples_right,
        }
    }

    pub fn count_valid_samples(&self, eye: Eye) -> usize {
        self.samples(eye).iter().filter(|s| s.is_valid()).count()
    }

    pub fn fixations(&self, eye: Eye) -> Vec<Fixation> {
        self.fixations
            .iter()
            .filter(|f| f.eye == eye)
            .cloned()
            .collect()
    }

    pub fn saccades(&self, eye: Eye) -> Vec<Saccade> {
        self.saccades
            .iter()
            .filter(|s| s.eye == eye)
            .cloned()
            .collect()
    }

    /// Parse the three tables from readers of their CSV contents.
    pub fn from_readers<R1: Read, R2: Read, R3: Read>(
        samples: R1,
        events: R2,
        messages: R3,
    ) -> Result<Self> {
        let sample_rows = read_table(samples, SAMPLES_FNAME, SampleRow::COLUMNS)?;
        let event_rows = read_table(events, EVENTS_FNAME, EventRow::COLUMNS)?;
        let message_rows = read_table(messages, MESSAGES_FNAME, MessageRow::COLUMNS)?;
        Self::from_rows(sample_rows, event_rows, message_rows)
    }

    fn from_rows(
        sample_rows: Vec<SampleRow>,
        event_rows: Vec<EventRow>,
        message_rows: Vec<MessageRow>,
    ) -> Result<Self> {
        let (samples_left, samples_right) = convert_samples(sample_rows);
        let (fixations, saccades) = convert_events(event_rows)?;

        let mut messages: Vec<Message> = message_rows
            .into_iter()
            .map(|row| Message {
                time: row.time,
                text: row.message,
            })
            .collect();
        messages.sort_by_key(|m| m.time);

        Ok(Self {
            samples_left,
            samples_right,
            fixations,
            saccades,
            messages,
        })
    }
}

/// Open and parse the gaze archive at `path`.
pub fn load<P: AsRef<Path>>(path: P) -> Result<GazeRecording> {
    let path = path.as_ref();
    let mut archive = archive::GazeArchive::auto_from_path(path)?;

    // Tables are read one after the other because each reader borrows the
    // archive.
    let sample_rows: Vec<SampleRow> = read_table(
        archive.open_table(SAMPLES_FNAME)?,
        SAMPLES_FNAME,
        SampleRow::COLUMNS,
    )?;
    let event_rows: Vec<EventRow> = read_table(
        archive.open_table(EVENTS_FNAME)?,
        EVENTS_FNAME,
        EventRow::COLUMNS,
    )?;
    let message_rows: Vec<MessageRow> = read_table(
        archive.open_table(MESSAGES_FNAME)?,
        MESSAGES_FNAME,
        MessageRow::COLUMNS,
    )?;

    let rec = GazeRecording::from_rows(sample_rows, event_rows, message_rows)?;

    info!(
        "loaded \"{}\": {} samples, {} fixations, {} saccades, {} messages",
        path.display(),
        rec.samples_left.len(),
        rec.fixations.len(),
        rec.saccades.len(),
        rec.messages.len()
    );
    Ok(rec)
}

fn read_table<R: Read, T: DeserializeOwned>(
    rdr: R,
    table: &str,
    required: &[&str],
) -> Result<Vec<T>> {
    let mut csv_rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(rdr);
    let headers = csv_rdr.headers()?.clone();
    for column in required {
        if !headers.iter().any(|h| h == *column) {
            return Err(Error::MissingColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
    }
    let rows = csv_rdr.into_deserialize().collect::<csv::Result<Vec<T>>>()?;
    debug!("read {} rows from \"{table}\"", rows.len());
    Ok(rows)
}

fn convert_samples(mut rows: Vec<SampleRow>) -> (Vec<Sample>, Vec<Sample>) {
    if !rows.windows(2).all(|w| w[0].time <= w[1].time) {
        warn!("sample table not ordered by time, sorting");
        rows.sort_by_key(|r| r.time);
    }
    let coord = |v: Option<f64>| v.unwrap_or(f64::NAN);
    rows.into_iter()
        .map(|row| {
            (
                Sample {
                    time: row.time,
                    x: coord(row.gx_left),
                    y: coord(row.gy_left),
                    eye: Eye::Left,
                },
                Sample {
                    time: row.time,
                    x: coord(row.gx_right),
                    y: coord(row.gy_right),
                    eye: Eye::Right,
                },
            )
        })
        .unzip()
}

/// Return the value if all of `values` are present and finite.
fn finite<const N: usize>(values: [Option<f64>; N]) -> Option<[f64; N]> {
    let mut out = [0.0; N];
    for (o, v) in out.iter_mut().zip(values) {
        match v {
            Some(v) if v.is_finite() => *o = v,
            _ => return None,
        }
    }
    Some(out)
}

fn convert_events(rows: Vec<EventRow>) -> Result<(Vec<Fixation>, Vec<Saccade>)> {
    let mut fixations = Vec::new();
    let mut saccades = Vec::new();
    let mut n_incomplete = 0usize;
    let mut n_malformed = 0usize;

    for (i, row) in rows.into_iter().enumerate() {
        let kind = row.kind.to_ascii_lowercase();
        if kind != "fixation" && kind != "saccade" {
            continue;
        }
        let eye: Eye = row.eye.parse().map_err(|source| Error::BadEye {
            table: EVENTS_FNAME.to_string(),
            row: i + 1,
            source,
        })?;
        if row.end <= row.start {
            n_malformed += 1;
            continue;
        }
        if kind == "fixation" {
            let Some([x, y]) = finite([row.gavx, row.gavy]) else {
                n_incomplete += 1;
                continue;
            };
            fixations.push(Fixation {
                eye,
                start: row.start,
                end: row.end,
                x,
                y,
            });
        } else {
            let Some([start_x, start_y, end_x, end_y]) =
                finite([row.gstx, row.gsty, row.genx, row.geny])
            else {
                n_incomplete += 1;
                continue;
            };
            saccades.push(Saccade {
                eye,
                start: row.start,
                end: row.end,
                start_x,
                start_y,
                end_x,
                end_y,
            });
        }
    }

    if n_incomplete > 0 {
        debug!("dropped {n_incomplete} events with missing or non-finite coordinates");
    }
    if n_malformed > 0 {
        debug!("dropped {n_malformed} events with end <= start");
    }

    let fixations = drop_overlapping(fixations, |f| f.eye, "fixation");
    let saccades = drop_overlapping(saccades, |s| s.eye, "saccade");
    Ok((fixations, saccades))
}

/// Sort by start and drop events overlapping the previous kept event of the
/// same eye.
fn drop_overlapping<T, F>(mut events: Vec<T>, eye_of: F, kind: &str) -> Vec<T>
where
    T: TimeInterval,
    F: Fn(&T) -> Eye,
{
    events.sort_by_key(|e| e.start());
    let mut last_end_left: Option<i64> = None;
    let mut last_end_right: Option<i64> = None;
    events
        .into_iter()
        .filter(|ev| {
            let last_end = match eye_of(ev) {
                Eye::Left => &mut last_end_left,
                Eye::Right => &mut last_end_right,
            };
            if let Some(prev_end) = *last_end {
                if ev.start() <= prev_end {
                    warn!(
                        "dropping {kind} {}..{} overlapping previous event ending at {prev_end}",
                        ev.start(),
                        ev.end()
                    );
                    return false;
                }
            }
            *last_end = Some(ev.end());
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    const SAMPLES: &str = "time,gx_left,gy_left,gx_right,gy_right,pa_left\n\
        1000,10.0,20.0,11.0,21.0,900\n\
        1002,-32768,-32768,12.0,22.0,900\n\
        1004,,,13.0,23.0,900\n";

    const EVENTS: &str = "type,eye,start,end,gavx,gavy,gstx,gsty,genx,geny\n\
        fixation,left,1400,1600,100.0,100.0,,,,\n\
        saccade,left,1601,1650,,,100.0,100.0,300.0,200.0\n\
        blink,right,1700,1800,,,,,,\n\
        fixation,right,1000,1000,5.0,5.0,,,,\n\
        fixation,right,1100,1200,NaN,5.0,,,,\n\
        saccade,right,1100,1200,1.0,1.0,inf,1.0,2.0,2.0\n";

    const MESSAGES: &str = "time,message\n\
        2000,SCREEN_REC_END_sess1\n\
        1000,SCREEN_REC_START_sess1\n";

    #[test]
    fn test_parse_tables() -> eyre::Result<()> {
        let rec = GazeRecording::from_readers(
            SAMPLES.as_bytes(),
            EVENTS.as_bytes(),
            MESSAGES.as_bytes(),
        )?;
        assert_eq!(rec.samples_left.len(), 3);
        assert_eq!(rec.count_valid_samples(Eye::Left), 1);
        assert_eq!(rec.count_valid_samples(Eye::Right), 3);
        assert!(rec.samples_left[2].x.is_nan());

        assert_eq!(rec.fixations.len(), 1);
        assert_eq!(rec.fixations[0].x, 100.0);
        assert_eq!(rec.saccades.len(), 1);
        assert_eq!(rec.saccades[0].end_x, 300.0);
        assert!(rec.fixations(Eye::Right).is_empty());

        assert_eq!(rec.messages[0].time, 1000);
        assert_eq!(rec.messages[1].text, "SCREEN_REC_END_sess1");
        Ok(())
    }

    #[test]
    fn test_missing_time_column() {
        let samples = "t,gx_left,gy_left,gx_right,gy_right\n1,2,3,4,5\n";
        let result = GazeRecording::from_readers(
            samples.as_bytes(),
            EVENTS.as_bytes(),
            MESSAGES.as_bytes(),
        );
        match result {
            Err(Error::MissingColumn { table, column }) => {
                assert_eq!(table, SAMPLES_FNAME);
                assert_eq!(column, "time");
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_missing_gaze_column() {
        let samples = "time,gx_left,gy_left,gx_right\n1,2,3,4\n";
        let result = GazeRecording::from_readers(
            samples.as_bytes(),
            EVENTS.as_bytes(),
            MESSAGES.as_bytes(),
        );
        assert!(matches!(result, Err(Error::MissingColumn { .. })));
    }

    #[test]
    fn test_bad_eye_in_events() {
        let events = "type,eye,start,end,gavx,gavy,gstx,gsty,genx,geny\n\
            fixation,both,1,2,0,0,,,,\n";
        let result = GazeRecording::from_readers(
            SAMPLES.as_bytes(),
            events.as_bytes(),
            MESSAGES.as_bytes(),
        );
        assert!(matches!(result, Err(Error::BadEye { row: 1, .. })));
    }

    #[test]
    fn test_overlapping_events_dropped() -> eyre::Result<()> {
        let events = "type,eye,start,end,gavx,gavy,gstx,gsty,genx,geny\n\
            fixation,left,100,200,1,1,,,,\n\
            fixation,left,150,250,2,2,,,,\n\
            fixation,right,150,250,3,3,,,,\n\
            fixation,left,201,300,4,4,,,,\n";
        let rec = GazeRecording::from_readers(
            SAMPLES.as_bytes(),
            events.as_bytes(),
            MESSAGES.as_bytes(),
        )?;
        let left: Vec<i64> = rec.fixations(Eye::Left).iter().map(|f| f.start).collect();
        assert_eq!(left, vec![100, 201]);
        assert_eq!(rec.fixations(Eye::Right).len(), 1);
        Ok(())
    }

    #[test]
    fn test_unsorted_samples_are_sorted() -> eyre::Result<()> {
        let samples = "time,gx_left,gy_left,gx_right,gy_right\n\
            3,1,1,1,1\n1,2,2,2,2\n2,3,3,3,3\n";
        let rec = GazeRecording::from_readers(
            samples.as_bytes(),
            EVENTS.as_bytes(),
            MESSAGES.as_bytes(),
        )?;
        let times: Vec<i64> = rec.samples_right.iter().map(|s| s.time).collect();
        assert_eq!(times, vec![1, 2, 3]);
        assert_eq!(rec.samples_right[0].x, 2.0);
        Ok(())
    }

    #[test]
    fn test_load_plain_dir() -> eyre::Result<()> {
        let tempdir = tempfile::tempdir()?;
        std::fs::write(tempdir.path().join(SAMPLES_FNAME), SAMPLES)?;
        std::fs::write(tempdir.path().join(EVENTS_FNAME), EVENTS)?;
        std::fs::write(tempdir.path().join(MESSAGES_FNAME), MESSAGES)?;
        let rec = load(tempdir.path())?;
        assert_eq!(rec.samples_right.len(), 3);
        assert_eq!(rec.messages.len(), 2);
        Ok(())
    }

    #[test]
    fn test_load_missing_table() -> eyre::Result<()> {
        let tempdir = tempfile::tempdir()?;
        std::fs::write(tempdir.path().join(SAMPLES_FNAME), SAMPLES)?;
        std::fs::write(tempdir.path().join(EVENTS_FNAME), EVENTS)?;
        let result = load(tempdir.path());
        assert!(matches!(result, Err(Error::MissingTable(name)) if name == MESSAGES_FNAME));
        Ok(())
    }

    #[test]
    fn test_load_nonexistent() {
        let result = load("/nonexistent/gaze/archive.zip");
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
