//! Record sources: delimited and fixed-width file readers plus an in-memory
//! source.
//!
//! Every source yields entities until it returns `Ok(None)`. A row consisting
//! of a single empty column is a blank line and is skipped silently unless
//! [`DiffOptions::skip_blank_lines`] is off; any other column count that
//! disagrees with the file's layout is malformed.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use crate::config::DiffOptions;
use crate::descriptor::{Attribute, Descriptor, Layout};
use crate::error::{DiffError, Result};
use crate::record::{Entity, Record};

/// A stream of entities of one schema.
pub trait RecordSource {
    fn descriptor(&self) -> &Arc<Descriptor>;

    /// Next entity, or `None` once the input is exhausted.
    fn read_entity(&mut self, apply_transform: bool) -> Result<Option<Entity>>;

    /// Physical rows consumed so far, header excluded.
    fn lines_processed(&self) -> u64;

    fn read_record(&mut self, apply_transform: bool) -> Result<Option<Record>> {
        Ok(self
            .read_entity(apply_transform)?
            .map(|entity| Record::new(self.descriptor(), entity)))
    }
}

impl<S: RecordSource + ?Sized> RecordSource for Box<S> {
    fn descriptor(&self) -> &Arc<Descriptor> {
        (**self).descriptor()
    }

    fn read_entity(&mut self, apply_transform: bool) -> Result<Option<Entity>> {
        (**self).read_entity(apply_transform)
    }

    fn lines_processed(&self) -> u64 {
        (**self).lines_processed()
    }
}

/// Column index of every attribute, resolved for one particular file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    indices: Vec<usize>,
    width: usize,
}

impl ColumnMap {
    /// Columns appear in descriptor order.
    pub fn positional(descriptor: &Descriptor) -> Self {
        Self {
            indices: (0..descriptor.size()).collect(),
            width: descriptor.size(),
        }
    }

    /// Matches attribute names against a header row. Extra columns are
    /// ignored; a missing attribute is a configuration error.
    pub fn from_header<S: AsRef<str>>(descriptor: &Descriptor, header: &[S]) -> Result<Self> {
        let names: Vec<&str> = header
            .iter()
            .map(|h| h.as_ref().trim_start_matches('\u{feff}').trim())
            .collect();
        let indices = descriptor
            .attributes()
            .iter()
            .map(|attribute| {
                names
                    .iter()
                    .position(|name| *name == attribute.name())
                    .ok_or_else(|| DiffError::UnknownColumn {
                        attribute: attribute.name().to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            indices,
            width: names.len(),
        })
    }

    pub fn index(&self, attribute: usize) -> usize {
        self.indices[attribute]
    }

    /// Number of columns a data row must have.
    pub fn width(&self) -> usize {
        self.width
    }
}

/// Runs inbound conversion and the transformer chain, then checks
/// mandatory attributes.
fn inbound(
    attribute: &Attribute,
    value: Option<String>,
    apply_transform: bool,
    line: u64,
) -> Result<Option<String>> {
    if !apply_transform {
        return Ok(value);
    }
    let value = attribute.transform_inbound(attribute.convert_external(value)?);
    if attribute.is_mandatory() && value.as_deref().map_or(true, str::is_empty) {
        return Err(DiffError::MandatoryMissing {
            line,
            attribute: attribute.name().to_string(),
        });
    }
    Ok(value)
}

/// Reader over separator-delimited text.
pub struct DelimitedReader<R: Read> {
    descriptor: Arc<Descriptor>,
    reader: csv::Reader<R>,
    columns: Option<ColumnMap>,
    has_header: bool,
    skip_blank: bool,
    row: csv::StringRecord,
    lines: u64,
}

impl<R: Read> DelimitedReader<R> {
    pub fn new(descriptor: Arc<Descriptor>, options: &DiffOptions, input: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .quote(options.quote)
            .has_headers(false)
            .flexible(true)
            .from_reader(input);
        Self {
            descriptor,
            reader,
            columns: None,
            has_header: options.has_header,
            skip_blank: options.skip_blank_lines,
            row: csv::StringRecord::new(),
            lines: 0,
        }
    }

    /// Column layout of this file; resolved from the header on first use.
    pub fn columns(&mut self) -> Result<Option<&ColumnMap>> {
        if self.columns.is_none() {
            if self.has_header {
                if !self.reader.read_record(&mut self.row)? {
                    return Ok(None);
                }
                let header: Vec<&str> = self.row.iter().collect();
                self.columns = Some(ColumnMap::from_header(&self.descriptor, &header)?);
            } else {
                self.columns = Some(ColumnMap::positional(&self.descriptor));
            }
        }
        Ok(self.columns.as_ref())
    }
}

impl<R: Read> RecordSource for DelimitedReader<R> {
    fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    fn read_entity(&mut self, apply_transform: bool) -> Result<Option<Entity>> {
        if self.columns()?.is_none() {
            return Ok(None);
        }
        let Some(columns) = self.columns.as_ref() else {
            return Ok(None);
        };
        loop {
            if !self.reader.read_record(&mut self.row)? {
                return Ok(None);
            }
            self.lines += 1;
            let line = self
                .row
                .position()
                .map(|p| p.line())
                .unwrap_or(self.lines);

            if self.skip_blank && self.row.len() == 1 && self.row[0].is_empty() {
                continue;
            }
            if self.row.len() != columns.width() {
                return Err(DiffError::Malformed {
                    line,
                    expected: columns.width(),
                    found: self.row.len(),
                });
            }

            let mut entity = Entity::with_capacity(self.descriptor.size());
            for (i, attribute) in self.descriptor.attributes().iter().enumerate() {
                let raw = &self.row[columns.index(i)];
                let value = (!raw.is_empty()).then(|| raw.to_string());
                let value = inbound(attribute, value, apply_transform, line)?;
                entity.insert(attribute.name().to_string(), value);
            }
            return Ok(Some(entity));
        }
    }

    fn lines_processed(&self) -> u64 {
        self.lines
    }
}

/// Reader over fixed-width text lines.
pub struct FixedWidthReader<R: BufRead> {
    descriptor: Arc<Descriptor>,
    input: R,
    trim: bool,
    skip_blank: bool,
    width: usize,
    buffer: String,
    lines: u64,
}

impl<R: BufRead> FixedWidthReader<R> {
    pub fn new(descriptor: Arc<Descriptor>, options: &DiffOptions, input: R) -> Self {
        let width = descriptor.line_width();
        Self {
            descriptor,
            input,
            trim: options.trim,
            skip_blank: options.skip_blank_lines,
            width,
            buffer: String::new(),
            lines: 0,
        }
    }
}

impl<R: BufRead> RecordSource for FixedWidthReader<R> {
    fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    fn read_entity(&mut self, apply_transform: bool) -> Result<Option<Entity>> {
        loop {
            self.buffer.clear();
            if self.input.read_line(&mut self.buffer)? == 0 {
                return Ok(None);
            }
            self.lines += 1;
            let line = self.buffer.trim_end_matches(['\n', '\r']);
            if self.skip_blank && line.trim().is_empty() {
                continue;
            }
            // Trailing blanks are routinely stripped by exporters; extra data is not.
            let found = line.trim_end().chars().count();
            if found > self.width {
                return Err(DiffError::Malformed {
                    line: self.lines,
                    expected: self.width,
                    found,
                });
            }

            let mut entity = Entity::with_capacity(self.descriptor.size());
            for attribute in self.descriptor.attributes() {
                let value = attribute.read_fixed(line, self.trim);
                let value = inbound(attribute, value, apply_transform, self.lines)?;
                entity.insert(attribute.name().to_string(), value);
            }
            return Ok(Some(entity));
        }
    }

    fn lines_processed(&self) -> u64 {
        self.lines
    }
}

/// Entities already held in memory, served in insertion order.
pub struct VecSource {
    descriptor: Arc<Descriptor>,
    entities: VecDeque<Entity>,
    lines: u64,
}

impl VecSource {
    pub fn new(descriptor: Arc<Descriptor>, entities: impl IntoIterator<Item = Entity>) -> Self {
        Self {
            descriptor,
            entities: entities.into_iter().collect(),
            lines: 0,
        }
    }
}

impl RecordSource for VecSource {
    fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    fn read_entity(&mut self, apply_transform: bool) -> Result<Option<Entity>> {
        let Some(entity) = self.entities.pop_front() else {
            return Ok(None);
        };
        self.lines += 1;
        if !apply_transform {
            return Ok(Some(entity));
        }
        let mut converted = Entity::with_capacity(entity.len());
        for attribute in self.descriptor.attributes() {
            let value = entity.get(attribute.name()).cloned().flatten();
            converted.insert(
                attribute.name().to_string(),
                inbound(attribute, value, true, self.lines)?,
            );
        }
        Ok(Some(converted))
    }

    fn lines_processed(&self) -> u64 {
        self.lines
    }
}

/// Opens a reader over any byte stream, picking the descriptor's layout.
pub fn from_reader<'a, R: Read + 'a>(
    descriptor: Arc<Descriptor>,
    options: &DiffOptions,
    input: R,
) -> Box<dyn RecordSource + 'a> {
    match descriptor.layout() {
        Layout::Delimited => Box::new(DelimitedReader::new(descriptor, options, input)),
        Layout::Fixed => Box::new(FixedWidthReader::new(
            descriptor,
            options,
            BufReader::new(input),
        )),
    }
}

/// Opens a file with the layout of its descriptor.
pub fn open(
    descriptor: Arc<Descriptor>,
    options: &DiffOptions,
    path: &Path,
) -> Result<Box<dyn RecordSource>> {
    let file = File::open(path)?;
    Ok(from_reader(
        descriptor,
        options,
        BufReader::with_capacity(1024 * 1024, file),
    ))
}
