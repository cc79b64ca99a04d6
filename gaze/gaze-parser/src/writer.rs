use std::{fs::File, io::Write, path::Path};

use serde::Serialize;

use gaze_types::{EventRow, MessageRow, SampleRow};

use crate::{EVENTS_FNAME, MESSAGES_FNAME, Result, SAMPLES_FNAME};

/// Rows of the three tables of a gaze archive, ready to be saved.
#[derive(Debug, Clone, Default)]
pub struct GazeTables {
    pub samples: Vec<SampleRow>,
    pub events: Vec<EventRow>,
    pub messages: Vec<MessageRow>,
}

impl GazeTables {
    fn encoded(&self) -> Result<[(String, Vec<u8>); 3]> {
        Ok([
            (
                format!("{SAMPLES_FNAME}.gz"),
                gz_csv(&self.samples, SampleRow::COLUMNS)?,
            ),
            (
                format!("{EVENTS_FNAME}.gz"),
                gz_csv(&self.events, EventRow::COLUMNS)?,
            ),
            (
                format!("{MESSAGES_FNAME}.gz"),
                gz_csv(&self.messages, MessageRow::COLUMNS)?,
            ),
        ])
    }
}

/// Encode rows as gzip compressed CSV. The header is always written, even
/// with zero rows.
fn gz_csv<T: Serialize>(rows: &[T], columns: &[&str]) -> Result<Vec<u8>> {
    let encoder = libflate::gzip::Encoder::new(Vec::new())?;
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(encoder);
    wtr.write_record(columns)?;
    for row in rows {
        wtr.serialize(row)?;
    }
    let encoder = wtr.into_inner().map_err(|e| e.into_error())?;
    Ok(encoder.finish().into_result()?)
}

/// Save the tables as `.csv.gz` entries of a zip file.
///
/// The entries are stored without additional zip compression since they are
/// already compressed.
pub fn write_zip<P: AsRef<Path>>(path: P, tables: &GazeTables) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut zip_writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    for (name, buf) in tables.encoded()? {
        zip_writer.start_file(name, options)?;
        zip_writer.write_all(&buf)?;
    }
    zip_writer.finish()?;
    tracing::debug!("saved gaze archive \"{}\"", path.as_ref().display());
    Ok(())
}

/// Save the tables as `.csv.gz` files in a directory, creating it if needed.
pub fn write_dir<P: AsRef<Path>>(path: P, tables: &GazeTables) -> Result<()> {
    std::fs::create_dir_all(path.as_ref())?;
    for (name, buf) in tables.encoded()? {
        std::fs::write(path.as_ref().join(name), buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaze_types::{Eye, Fixation, MISSING_VALUE};
    use test_log::test;

    fn example_tables() -> GazeTables {
        let fixation = Fixation {
            eye: Eye::Right,
            start: 1400,
            end: 1600,
            x: 100.0,
            y: 120.0,
        };
        GazeTables {
            samples: vec![
                SampleRow {
                    time: 1000,
                    gx_left: Some(MISSING_VALUE),
                    gy_left: Some(MISSING_VALUE),
                    gx_right: Some(100.0),
                    gy_right: Some(120.0),
                },
                SampleRow {
                    time: 1002,
                    gx_left: None,
                    gy_left: None,
                    gx_right: Some(101.0),
                    gy_right: Some(121.0),
                },
            ],
            events: vec![EventRow::from(&fixation)],
            messages: vec![MessageRow {
                time: 1000,
                message: "SCREEN_REC_START_abc".into(),
            }],
        }
    }

    #[test]
    fn test_zip_archive_loads() -> eyre::Result<()> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("gaze.zip");
        write_zip(&path, &example_tables())?;

        let rec = crate::load(&path)?;
        assert_eq!(rec.samples_right.len(), 2);
        assert_eq!(rec.count_valid_samples(Eye::Left), 0);
        assert_eq!(rec.count_valid_samples(Eye::Right), 2);
        assert_eq!(rec.fixations(Eye::Right)[0].y, 120.0);
        assert_eq!(rec.messages[0].text, "SCREEN_REC_START_abc");
        Ok(())
    }

    #[test]
    fn test_empty_dir_archive_loads() -> eyre::Result<()> {
        let tempdir = tempfile::tempdir()?;
        let path = tempdir.path().join("gaze");
        write_dir(&path, &GazeTables::default())?;

        let rec = crate::load(&path)?;
        assert!(rec.samples_left.is_empty());
        assert!(rec.messages.is_empty());
        Ok(())
    }
}
