use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use crate::{Error, Result};

/// Read access to the tables of a gaze archive, either a plain directory or a
/// zip file.
pub(crate) enum GazeArchive {
    Dir(PathBuf),
    Zip(Box<zip::ZipArchive<BufReader<File>>>),
}

impl GazeArchive {
    pub(crate) fn auto_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            Ok(Self::Dir(path.to_path_buf()))
        } else {
            let reader = BufReader::new(File::open(path)?);
            Ok(Self::Zip(Box::new(zip::ZipArchive::new(reader)?)))
        }
    }

    fn exists(&mut self, name: &str) -> bool {
        match self {
            Self::Dir(dirpath) => dirpath.join(name).is_file(),
            Self::Zip(zip_archive) => zip_archive.by_name(name).is_ok(),
        }
    }

    fn open_raw(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        match self {
            Self::Dir(dirpath) => Ok(Box::new(BufReader::new(File::open(dirpath.join(name))?))),
            Self::Zip(zip_archive) => Ok(Box::new(zip_archive.by_name(name)?)),
        }
    }

    /// Open table `name` (e.g. "samples.csv"), falling back to the gzip
    /// compressed "samples.csv.gz".
    pub(crate) fn open_table(&mut self, name: &str) -> Result<Box<dyn Read + '_>> {
        if self.exists(name) {
            return self.open_raw(name);
        }
        let gz_name = format!("{name}.gz");
        if self.exists(&gz_name) {
            let raw = self.open_raw(&gz_name)?;
            let decoder = libflate::gzip::Decoder::new(raw)?;
            return Ok(Box::new(decoder));
        }
        Err(Error::MissingTable(name.to_string()))
    }
}
