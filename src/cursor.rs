//! Forward-only cursor over the records of one input.
//!
//! A [`ResultSet`] either owns every record in memory (filled by
//! [`ResultSet::fetch`] and ordered by [`ResultSet::sort`]) or pulls records
//! lazily from a source that is already in key order, such as the output of
//! the external sort.

use crate::error::{DiffError, Result};
use crate::reader::RecordSource;
use crate::record::Record;

enum Backing<'a> {
    Memory {
        records: Vec<Record>,
        // Index of the current record plus one; zero before the first `next`.
        position: usize,
    },
    Stream {
        source: Box<dyn RecordSource + 'a>,
        apply_transform: bool,
        current: Option<Record>,
        exhausted: bool,
        started: bool,
    },
}

pub struct ResultSet<'a> {
    backing: Backing<'a>,
}

impl<'a> ResultSet<'a> {
    /// Reads the whole source into memory, in file order.
    pub fn fetch(source: &mut dyn RecordSource, apply_transform: bool) -> Result<Self> {
        let mut records = Vec::new();
        while let Some(record) = source.read_record(apply_transform)? {
            records.push(record);
        }
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        Self {
            backing: Backing::Memory {
                records,
                position: 0,
            },
        }
    }

    /// Streams records from a source whose rows are already in key order.
    pub fn streaming(source: Box<dyn RecordSource + 'a>, apply_transform: bool) -> Self {
        Self {
            backing: Backing::Stream {
                source,
                apply_transform,
                current: None,
                exhausted: false,
                started: false,
            },
        }
    }

    /// Stable sort by key; records sharing a key keep their file order.
    ///
    /// Rewinds the cursor. Streaming result sets are already ordered and
    /// reject the call.
    pub fn sort(&mut self) -> Result<()> {
        match &mut self.backing {
            Backing::Memory { records, position } => {
                records.sort_by(|a, b| a.key().cmp(b.key()));
                *position = 0;
                Ok(())
            }
            Backing::Stream { .. } => Err(DiffError::Usage(
                "a streaming result set cannot be re-sorted".into(),
            )),
        }
    }

    /// Advances to the next record; `false` once the input is exhausted.
    pub fn next(&mut self) -> Result<bool> {
        match &mut self.backing {
            Backing::Memory { records, position } => {
                if *position <= records.len() {
                    *position += 1;
                }
                Ok(*position <= records.len())
            }
            Backing::Stream {
                source,
                apply_transform,
                current,
                exhausted,
                started,
            } => {
                *started = true;
                if *exhausted {
                    return Ok(false);
                }
                *current = source.read_record(*apply_transform)?;
                if current.is_none() {
                    *exhausted = true;
                }
                Ok(current.is_some())
            }
        }
    }

    /// The current record. Calling before the first `next` or after the
    /// cursor is exhausted is a usage error.
    pub fn get(&self) -> Result<&Record> {
        match &self.backing {
            Backing::Memory { records, position } => match position.checked_sub(1) {
                None => Err(not_started()),
                Some(i) => records.get(i).ok_or_else(exhausted),
            },
            Backing::Stream {
                current, started, ..
            } => {
                if !*started {
                    return Err(not_started());
                }
                current.as_ref().ok_or_else(exhausted)
            }
        }
    }

    /// True once `next` has run past the last record.
    pub fn eof(&self) -> bool {
        match &self.backing {
            Backing::Memory { records, position } => *position > records.len(),
            Backing::Stream { exhausted, .. } => *exhausted,
        }
    }

    /// Records held in memory, or rows read so far when streaming.
    pub fn lines_processed(&self) -> u64 {
        match &self.backing {
            Backing::Memory { records, .. } => records.len() as u64,
            Backing::Stream { source, .. } => source.lines_processed(),
        }
    }
}

fn not_started() -> DiffError {
    DiffError::Usage("cursor read before the first call to next()".into())
}

fn exhausted() -> DiffError {
    DiffError::Usage("cursor read past the last record".into())
}
