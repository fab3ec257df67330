//! Sort-merge differencing of two key-ordered record streams.
//!
//! Both cursors advance in key order. A key seen only on the new side is an
//! addition, a key seen only on the old side a deletion, and a shared key is
//! either unchanged or modified depending on the payload hash. Once one side
//! runs dry the other is drained, since the ordering guarantees its remaining
//! keys have no counterpart.

use std::cmp::Ordering;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::DiffOptions;
use crate::cursor::ResultSet;
use crate::descriptor::Descriptor;
use crate::error::{DiffError, Result, Side};
use crate::reader::RecordSource;
use crate::record::Record;
use crate::sort::ExternalSort;
use crate::writer::{RecordWriter, Tag, TRANSACTION};

/// Classification of one record by the merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Change {
    Add,
    Delete,
    Modify,
    Equal,
}

impl Change {
    /// Transaction tag written for the change; `None` for unchanged records.
    pub fn tag(self) -> Option<Tag> {
        match self {
            Change::Add => Some(Tag::Create),
            Change::Delete => Some(Tag::Delete),
            Change::Modify => Some(Tag::Update),
            Change::Equal => None,
        }
    }
}

/// Receives every classified record.
///
/// Additions and modifications carry the new record, deletions the old one.
/// Unchanged records are reported with the new record as well.
pub trait ChangeHandler {
    fn handle(&mut self, change: Change, record: &Record) -> Result<()>;
}

impl<F> ChangeHandler for F
where
    F: FnMut(Change, &Record) -> Result<()>,
{
    fn handle(&mut self, change: Change, record: &Record) -> Result<()> {
        self(change, record)
    }
}

/// Default strategy: writes changed records prefixed with their tag and
/// skips unchanged ones.
pub struct TaggedOutput<'w, W: Write> {
    writer: &'w mut RecordWriter<W>,
}

impl<'w, W: Write> TaggedOutput<'w, W> {
    pub fn new(writer: &'w mut RecordWriter<W>) -> Self {
        Self { writer }
    }
}

impl<W: Write> ChangeHandler for TaggedOutput<'_, W> {
    fn handle(&mut self, change: Change, record: &Record) -> Result<()> {
        match change.tag() {
            Some(tag) => self.writer.put_tagged(tag, record),
            None => Ok(()),
        }
    }
}

/// Counters of one diff pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub additions: u64,
    pub deletions: u64,
    pub modifications: u64,
    pub unchanged: u64,
}

impl DiffSummary {
    /// True when at least one record was added, deleted or modified.
    pub fn changes(&self) -> bool {
        self.additions > 0 || self.deletions > 0 || self.modifications > 0
    }

    /// Distinct keys seen across both inputs.
    pub fn total(&self) -> u64 {
        self.additions + self.deletions + self.modifications + self.unchanged
    }

    fn record(&mut self, change: Change) {
        match change {
            Change::Add => self.additions += 1,
            Change::Delete => self.deletions += 1,
            Change::Modify => self.modifications += 1,
            Change::Equal => self.unchanged += 1,
        }
    }
}

/// Differencing engine bound to one descriptor.
///
/// An instance may be reused; every call starts from zeroed counters and the
/// accessors report the most recent pass only.
#[derive(Debug)]
pub struct Comparator {
    descriptor: Arc<Descriptor>,
    options: DiffOptions,
    summary: DiffSummary,
}

impl Comparator {
    /// Fails when the descriptor declares no identifier attribute.
    pub fn new(descriptor: Arc<Descriptor>, options: DiffOptions) -> Result<Self> {
        descriptor.require_identifier()?;
        Ok(Self {
            descriptor,
            options,
            summary: DiffSummary::default(),
        })
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    pub fn options(&self) -> &DiffOptions {
        &self.options
    }

    pub fn summary(&self) -> DiffSummary {
        self.summary
    }

    pub fn additions(&self) -> u64 {
        self.summary.additions
    }

    pub fn deletions(&self) -> u64 {
        self.summary.deletions
    }

    pub fn modifications(&self) -> u64 {
        self.summary.modifications
    }

    pub fn changes(&self) -> bool {
        self.summary.changes()
    }

    /// Merges two key-ordered cursors, reporting every record to `handler`.
    pub fn diff(
        &mut self,
        old: &mut ResultSet<'_>,
        new: &mut ResultSet<'_>,
        handler: &mut dyn ChangeHandler,
    ) -> Result<DiffSummary> {
        self.summary = DiffSummary::default();
        info!("processing");
        let started = Instant::now();

        let mut has_old = advance(old, Side::Old)?;
        let mut has_new = advance(new, Side::New)?;

        while has_old && has_new {
            let o = old.get()?;
            let n = new.get()?;
            match o.compare_key(n)? {
                Ordering::Greater => {
                    handler.handle(Change::Add, n)?;
                    self.summary.record(Change::Add);
                    has_new = advance(new, Side::New)?;
                }
                Ordering::Less => {
                    handler.handle(Change::Delete, o)?;
                    self.summary.record(Change::Delete);
                    has_old = advance(old, Side::Old)?;
                }
                Ordering::Equal => {
                    let change = if o.compare_payload(n)? {
                        Change::Equal
                    } else {
                        Change::Modify
                    };
                    handler.handle(change, n)?;
                    self.summary.record(change);
                    has_old = advance(old, Side::Old)?;
                    has_new = advance(new, Side::New)?;
                }
            }
        }

        while has_old {
            handler.handle(Change::Delete, old.get()?)?;
            self.summary.record(Change::Delete);
            has_old = advance(old, Side::Old)?;
        }
        while has_new {
            handler.handle(Change::Add, new.get()?)?;
            self.summary.record(Change::Add);
            has_new = advance(new, Side::New)?;
        }

        let summary = self.summary;
        if summary.changes() {
            info!(
                additions = summary.additions,
                deletions = summary.deletions,
                modifications = summary.modifications,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "completed"
            );
        } else {
            info!(records = summary.unchanged, "identical");
        }
        Ok(summary)
    }

    /// Loads both inputs into memory, sorts them and writes the change log.
    ///
    /// The writer is closed on every path; the first error wins.
    pub fn compare<W: Write>(
        &mut self,
        old: &mut dyn RecordSource,
        new: &mut dyn RecordSource,
        writer: &mut RecordWriter<W>,
    ) -> Result<DiffSummary> {
        self.summary = DiffSummary::default();
        let result = self.compare_in_memory(old, new, writer);
        finish(result, writer)
    }

    /// Sorts both inputs into temp files under `working_dir`, then streams
    /// them through the merge. Temp files are removed on every path.
    pub fn compare_external<W: Write>(
        &mut self,
        old: &mut dyn RecordSource,
        new: &mut dyn RecordSource,
        writer: &mut RecordWriter<W>,
        working_dir: &Path,
    ) -> Result<DiffSummary> {
        self.summary = DiffSummary::default();
        let result = self.compare_sorted(old, new, writer, working_dir);
        finish(result, writer)
    }

    fn compare_in_memory<W: Write>(
        &mut self,
        old: &mut dyn RecordSource,
        new: &mut dyn RecordSource,
        writer: &mut RecordWriter<W>,
    ) -> Result<DiffSummary> {
        self.check_schema(old, Side::Old)?;
        self.check_schema(new, Side::New)?;

        info!("loading");
        let apply = self.options.apply_transform;
        let mut old_rs = ResultSet::fetch(old, apply).map_err(|e| e.on(Side::Old))?;
        debug!(side = %Side::Old, lines = old_rs.lines_processed(), "loaded");
        let mut new_rs = ResultSet::fetch(new, apply).map_err(|e| e.on(Side::New))?;
        debug!(side = %Side::New, lines = new_rs.lines_processed(), "loaded");

        old_rs.sort()?;
        new_rs.sort()?;
        self.write_changes(&mut old_rs, &mut new_rs, writer)
    }

    fn compare_sorted<W: Write>(
        &mut self,
        old: &mut dyn RecordSource,
        new: &mut dyn RecordSource,
        writer: &mut RecordWriter<W>,
        working_dir: &Path,
    ) -> Result<DiffSummary> {
        self.check_schema(old, Side::Old)?;
        self.check_schema(new, Side::New)?;

        let sorter = ExternalSort::new(&self.options.clone().with_working_dir(working_dir));
        let old_sorted = sorter.sort(old).map_err(|e| e.on(Side::Old))?;
        debug!(side = %Side::Old, lines = old.lines_processed(), runs = old_sorted.runs(), "sorted");
        let new_sorted = sorter.sort(new).map_err(|e| e.on(Side::New))?;
        debug!(side = %Side::New, lines = new.lines_processed(), runs = new_sorted.runs(), "sorted");

        let mut old_rs = old_sorted.open().map_err(|e| e.on(Side::Old))?;
        let mut new_rs = new_sorted.open().map_err(|e| e.on(Side::New))?;
        self.write_changes(&mut old_rs, &mut new_rs, writer)
    }

    fn write_changes<W: Write>(
        &mut self,
        old: &mut ResultSet<'_>,
        new: &mut ResultSet<'_>,
        writer: &mut RecordWriter<W>,
    ) -> Result<DiffSummary> {
        if self.options.write_header {
            writer.put(TRANSACTION);
            writer.write_header()?;
        }
        self.diff(old, new, &mut TaggedOutput::new(writer))
    }

    fn check_schema(&self, source: &dyn RecordSource, side: Side) -> Result<()> {
        if source.descriptor().schema_id() != self.descriptor.schema_id() {
            return Err(DiffError::Usage(
                "record source was built from a different descriptor".into(),
            )
            .on(side));
        }
        Ok(())
    }
}

fn advance(cursor: &mut ResultSet<'_>, side: Side) -> Result<bool> {
    cursor.next().map_err(|e| e.on(side))
}

fn finish<W: Write>(result: Result<DiffSummary>, writer: &mut RecordWriter<W>) -> Result<DiffSummary> {
    let closed = writer.close();
    let summary = result?;
    closed?;
    Ok(summary)
}
