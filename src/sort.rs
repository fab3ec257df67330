//! External merge sort of record files by key.
//!
//! ## Strategy
//!
//! 1. Read up to `run_capacity` records into memory
//! 2. Sort the run in parallel (stable, so equal keys keep file order)
//! 3. Spill the run to a temp file in the working directory
//! 4. K-way merge the runs through a min-heap into the sorted output
//!
//! Runs are written in the same layout as the input, so the merge reads them
//! back with the ordinary readers. An input that fits in a single run skips the
//! spill and goes straight to the output file. Every intermediate file is a
//! [`TempPath`] and disappears when dropped, on success and on error alike.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tempfile::{NamedTempFile, TempPath};
use tracing::{debug, info, warn};

use crate::config::DiffOptions;
use crate::cursor::ResultSet;
use crate::descriptor::Descriptor;
use crate::error::{DiffError, Result};
use crate::reader::{self, RecordSource};
use crate::record::{Key, Record};
use crate::writer::RecordWriter;

/// Upper bound on the up-front allocation for one run.
const PREALLOC_RECORDS: usize = 64 * 1024;

/// A key-ordered copy of one input, deleted when dropped.
pub struct SortedFile {
    path: TempPath,
    descriptor: Arc<Descriptor>,
    options: DiffOptions,
    records: u64,
    runs: usize,
}

impl SortedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Number of runs spilled to disk; zero when the input fit in memory.
    pub fn runs(&self) -> usize {
        self.runs
    }

    /// Streams the sorted records. Values are stored already converted, so
    /// they are not transformed a second time.
    pub fn open(&self) -> Result<ResultSet<'static>> {
        let source = reader::open(self.descriptor.clone(), &self.options, &self.path)?;
        Ok(ResultSet::streaming(source, false))
    }

    /// Moves the sorted file to `target`, copying when a rename is not
    /// possible (e.g. across file systems).
    pub fn persist(self, target: &Path) -> Result<()> {
        match self.path.persist(target) {
            Ok(()) => Ok(()),
            Err(e) => {
                std::fs::copy(&e.path, target)?;
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for SortedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedFile")
            .field("path", &self.path())
            .field("records", &self.records)
            .field("runs", &self.runs)
            .finish()
    }
}

/// Sorts record sources into temp files under the configured working
/// directory.
#[derive(Debug, Clone)]
pub struct ExternalSort {
    options: DiffOptions,
}

impl ExternalSort {
    pub fn new(options: &DiffOptions) -> Self {
        Self {
            options: options.clone(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.options.working_dir
    }

    /// Consumes `source` and returns its records ordered by key.
    ///
    /// The working directory is probed before the first record is read; a
    /// directory that cannot hold temp files is a configuration error.
    pub fn sort(&self, source: &mut dyn RecordSource) -> Result<SortedFile> {
        let descriptor = source.descriptor().clone();
        let output = self.temp_file("sorted-")?;
        let started = Instant::now();
        let capacity = self.options.run_capacity.max(1);

        let mut runs: Vec<TempPath> = Vec::new();
        let mut total = 0u64;
        loop {
            let mut chunk = Vec::with_capacity(capacity.min(PREALLOC_RECORDS));
            while chunk.len() < capacity {
                match source.read_record(self.options.apply_transform)? {
                    Some(record) => chunk.push(record),
                    None => break,
                }
            }
            let exhausted = chunk.len() < capacity;
            total += chunk.len() as u64;
            chunk.par_sort_by(|a, b| a.key().cmp(b.key()));

            if runs.is_empty() && exhausted {
                let (file, path) = output.into_parts();
                self.write_records(&descriptor, file, &chunk)?;
                debug!(records = total, "sorted in memory");
                return Ok(self.sorted_file(path, descriptor, total, 0));
            }
            if !chunk.is_empty() {
                let (file, path) = self.temp_file("run-")?.into_parts();
                self.write_records(&descriptor, file, &chunk)?;
                debug!(run = runs.len(), records = chunk.len(), "spilled sorted run");
                runs.push(path);
            }
            if exhausted {
                break;
            }
        }

        let run_count = runs.len();
        info!(runs = run_count, records = total, "merging sorted runs");
        let (file, path) = output.into_parts();
        let merged = self.merge(&descriptor, runs, file)?;
        debug_assert_eq!(merged, total);
        debug!(
            records = merged,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "external sort complete"
        );
        Ok(self.sorted_file(path, descriptor, merged, run_count))
    }

    fn sorted_file(
        &self,
        path: TempPath,
        descriptor: Arc<Descriptor>,
        records: u64,
        runs: usize,
    ) -> SortedFile {
        SortedFile {
            path,
            descriptor,
            options: self.read_options(),
            records,
            runs,
        }
    }

    /// Intermediate files always carry a header and hold converted values.
    /// Every line is a record, even a blank one.
    fn read_options(&self) -> DiffOptions {
        self.options
            .clone()
            .with_header(true)
            .with_transform(false)
            .with_skip_blank_lines(false)
    }

    fn temp_file(&self, prefix: &str) -> Result<NamedTempFile> {
        tempfile::Builder::new()
            .prefix(&format!(".flatdiff-{prefix}"))
            .tempfile_in(&self.options.working_dir)
            .map_err(|source| DiffError::WorkingDirectory {
                path: PathBuf::from(&self.options.working_dir),
                source,
            })
    }

    fn write_records(&self, descriptor: &Arc<Descriptor>, file: File, records: &[Record]) -> Result<()> {
        let mut writer = RecordWriter::new(
            descriptor.clone(),
            &self.options,
            BufWriter::with_capacity(1024 * 1024, file),
        );
        writer.write_header()?;
        for record in records {
            writer.put_record(record)?;
        }
        writer.close()
    }

    fn merge(&self, descriptor: &Arc<Descriptor>, runs: Vec<TempPath>, output: File) -> Result<u64> {
        let read_options = self.read_options();
        let mut readers = Vec::with_capacity(runs.len());
        let mut heap = BinaryHeap::with_capacity(runs.len());

        for (idx, path) in runs.into_iter().enumerate() {
            let mut run = RunReader {
                source: reader::open(descriptor.clone(), &read_options, &path)?,
                current: None,
                path: Some(path),
            };
            run.advance()?;
            if let Some(record) = &run.current {
                heap.push(HeapItem {
                    key: record.key().clone(),
                    run: idx,
                });
            }
            readers.push(run);
        }

        let mut writer = RecordWriter::new(
            descriptor.clone(),
            &self.options,
            BufWriter::with_capacity(1024 * 1024, output),
        );
        writer.write_header()?;

        let mut merged = 0u64;
        while let Some(item) = heap.pop() {
            let run = &mut readers[item.run];
            if let Some(record) = &run.current {
                writer.put_record(record)?;
                merged += 1;
            }
            run.advance()?;
            match &run.current {
                Some(record) => heap.push(HeapItem {
                    key: record.key().clone(),
                    run: item.run,
                }),
                None => {
                    // Exhausted runs are deleted right away to free disk space.
                    if let Some(path) = run.path.take() {
                        match path.close() {
                            Ok(()) => debug!(run = item.run, "deleted exhausted run"),
                            Err(e) => {
                                warn!(run = item.run, error = %e, "failed to delete exhausted run")
                            }
                        }
                    }
                }
            }
        }
        writer.close()?;
        Ok(merged)
    }
}

struct RunReader {
    source: Box<dyn RecordSource>,
    current: Option<Record>,
    path: Option<TempPath>,
}

impl RunReader {
    fn advance(&mut self) -> Result<()> {
        self.current = self.source.read_record(false)?;
        Ok(())
    }
}

/// Min-heap entry; ties go to the earlier run so equal keys keep input order.
#[derive(PartialEq, Eq)]
struct HeapItem {
    key: Key,
    run: usize,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.run.cmp(&self.run))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
