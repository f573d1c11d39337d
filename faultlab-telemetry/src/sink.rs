//! Persistence for synchronized records.
//!
//! One CSV file per entity under the output directory. The column set is
//! fixed by the first record written for an entity; metrics that appear
//! later are dropped from the row (and noted once at debug) so every row
//! in a file has the same shape.

use crate::recorder::SynchronizedRecord;
use faultlab_common::EntityId;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write record file: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for synchronized records.
pub trait RecordSink {
    fn write(&mut self, record: &SynchronizedRecord) -> Result<(), SinkError>;
}

/// Per-entity state for one open CSV file.
struct EntityFile {
    file: File,
    /// Metric columns in header order.
    columns: Vec<String>,
}

/// CSV sink writing one file per entity.
pub struct CsvSink {
    dir: PathBuf,
    files: HashMap<EntityId, EntityFile>,
}

impl CsvSink {
    /// Create a sink rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            files: HashMap::new(),
        })
    }

    /// Path of the file an entity's rows go to.
    pub fn entity_path(&self, entity: &EntityId) -> PathBuf {
        self.dir.join(format!("{}_metrics.csv", entity.as_str()))
    }

    fn open_entity(&mut self, record: &SynchronizedRecord) -> Result<&mut EntityFile, SinkError> {
        if !self.files.contains_key(&record.entity) {
            let path = self.entity_path(&record.entity);

            // A restart appends to the existing file, so the fixed
            // column order has to come from its header, not from the
            // current record.
            let existing_columns = Self::read_header_columns(&path)?;
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

            let columns = match existing_columns {
                Some(columns) => {
                    info!(entity = %record.entity, path = %path.display(),
                        columns = columns.len(), "appending to existing entity metrics file");
                    columns
                }
                None => {
                    // BTreeMap iteration gives the sorted column order.
                    let columns: Vec<String> = record.metrics.keys().cloned().collect();
                    let mut header = String::from("timestamp,timestamp_unix");
                    for column in &columns {
                        header.push(',');
                        header.push_str(column);
                    }
                    header.push('\n');
                    file.write_all(header.as_bytes())?;

                    info!(entity = %record.entity, path = %path.display(),
                        columns = columns.len(), "opened entity metrics file");
                    columns
                }
            };
            self.files
                .insert(record.entity.clone(), EntityFile { file, columns });
        }
        Ok(self.files.get_mut(&record.entity).expect("just inserted"))
    }

    /// Metric columns from an existing file's header, or `None` when the
    /// file is absent or empty.
    fn read_header_columns(path: &std::path::Path) -> Result<Option<Vec<String>>, SinkError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut header = String::new();
        BufReader::new(file).read_line(&mut header)?;
        if header.trim_end().is_empty() {
            return Ok(None);
        }
        // Skip the two timestamp columns.
        Ok(Some(
            header
                .trim_end()
                .split(',')
                .skip(2)
                .map(str::to_string)
                .collect(),
        ))
    }

    /// Flush all open files.
    pub fn flush(&mut self) -> Result<(), SinkError> {
        for entity_file in self.files.values_mut() {
            entity_file.file.flush()?;
        }
        Ok(())
    }
}

impl RecordSink for CsvSink {
    fn write(&mut self, record: &SynchronizedRecord) -> Result<(), SinkError> {
        let entity = record.entity.clone();
        let entity_file = self.open_entity(record)?;

        let mut row = format!("{},{:.6}", record.timestamp_iso, record.timestamp_unix);
        for column in &entity_file.columns {
            row.push(',');
            if let Some(value) = record.metrics.get(column) {
                row.push_str(&format!("{value}"));
            }
            // Absent metric leaves the cell empty.
        }
        row.push('\n');
        entity_file.file.write_all(row.as_bytes())?;

        let extra = record
            .metrics
            .keys()
            .filter(|k| !entity_file.columns.contains(k))
            .count();
        if extra > 0 {
            debug!(entity = %entity, extra, "dropping metrics absent from the fixed header");
        }
        Ok(())
    }
}
