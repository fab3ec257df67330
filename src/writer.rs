//! Record serialization in the layout of a descriptor.
//!
//! Output files, change logs and the intermediate files of the external sort
//! all go through [`RecordWriter`], so any of them can be reopened with the
//! matching reader.

use std::fmt;
use std::io::{BufWriter, Write};
use std::sync::Arc;

use crate::config::DiffOptions;
use crate::descriptor::{Descriptor, Layout};
use crate::error::{DiffError, Result};
use crate::record::{Entity, Record};

/// Leading column name of a change log header row.
pub const TRANSACTION: &str = "TRANSACTION";

/// Transaction tag prefixed to every changed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Create,
    Update,
    Delete,
}

impl Tag {
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Create => "CRE",
            Tag::Update => "UPD",
            Tag::Delete => "DEL",
        }
    }

    pub fn parse(token: &str) -> Option<Tag> {
        match token {
            "CRE" => Some(Tag::Create),
            "UPD" => Some(Tag::Update),
            "DEL" => Some(Tag::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Sink<W: Write> {
    Delimited(csv::Writer<W>),
    Fixed(BufWriter<W>),
}

pub struct RecordWriter<W: Write> {
    descriptor: Arc<Descriptor>,
    sink: Sink<W>,
    prefix: Option<String>,
    outbound: bool,
    lines: u64,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(descriptor: Arc<Descriptor>, options: &DiffOptions, output: W) -> Self {
        let sink = match descriptor.layout() {
            Layout::Delimited => Sink::Delimited(
                csv::WriterBuilder::new()
                    .delimiter(options.delimiter)
                    .quote(options.quote)
                    .has_headers(false)
                    .flexible(true)
                    .terminator(csv::Terminator::Any(b'\n'))
                    .from_writer(output),
            ),
            Layout::Fixed => Sink::Fixed(BufWriter::new(output)),
        };
        Self {
            descriptor,
            sink,
            prefix: None,
            outbound: false,
            lines: 0,
        }
    }

    /// Runs every value through its attribute's outbound transformers.
    pub fn with_outbound_transform(mut self, outbound: bool) -> Self {
        self.outbound = outbound;
        self
    }

    pub fn descriptor(&self) -> &Arc<Descriptor> {
        &self.descriptor
    }

    /// Data lines written so far, header excluded.
    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    /// Queues a leading token (a transaction tag) for the next line.
    pub fn put(&mut self, token: &str) {
        self.prefix = Some(token.to_string());
    }

    /// Writes the attribute names as a header row.
    ///
    /// Fixed-width files carry no header; the call only drops a queued token.
    pub fn write_header(&mut self) -> Result<()> {
        let prefix = self.prefix.take();
        if let Sink::Delimited(writer) = &mut self.sink {
            let names = prefix.iter().map(String::as_str).chain(self.descriptor.names());
            writer.write_record(names)?;
        }
        Ok(())
    }

    /// Writes one entity's values in descriptor order.
    pub fn put_line(&mut self, entity: &Entity) -> Result<()> {
        let prefix = self.prefix.take();
        let values: Vec<Option<String>> = self
            .descriptor
            .attributes()
            .iter()
            .map(|attribute| {
                let value = entity.get(attribute.name()).cloned().flatten();
                if self.outbound {
                    attribute.transform_outbound(value)
                } else {
                    value
                }
            })
            .collect();

        match &mut self.sink {
            Sink::Delimited(writer) => {
                let fields = prefix
                    .iter()
                    .map(String::as_str)
                    .chain(values.iter().map(|v| v.as_deref().unwrap_or("")));
                writer.write_record(fields)?;
            }
            Sink::Fixed(writer) => {
                let mut line = vec![' '; self.descriptor.line_width()];
                for (attribute, value) in self.descriptor.attributes().iter().zip(&values) {
                    let start = attribute.start().unwrap_or(0);
                    let length = attribute.length().unwrap_or(0);
                    for (slot, c) in line[start..start + length]
                        .iter_mut()
                        .zip(value.as_deref().unwrap_or("").chars())
                    {
                        *slot = c;
                    }
                }
                let text: String = line.into_iter().collect();
                if let Some(prefix) = prefix {
                    writer.write_all(prefix.as_bytes())?;
                }
                writer.write_all(text.trim_end().as_bytes())?;
                writer.write_all(b"\n")?;
            }
        }
        self.lines += 1;
        Ok(())
    }

    pub fn put_record(&mut self, record: &Record) -> Result<()> {
        self.put_line(record.entity())
    }

    /// Writes `tag` followed by the record.
    pub fn put_tagged(&mut self, tag: Tag, record: &Record) -> Result<()> {
        self.put(tag.as_str());
        self.put_record(record)
    }

    /// Flushes buffered output. Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        match &mut self.sink {
            Sink::Delimited(writer) => writer.flush()?,
            Sink::Fixed(writer) => writer.flush()?,
        }
        Ok(())
    }

    /// Flushes and hands back the underlying output.
    pub fn into_inner(self) -> Result<W> {
        match self.sink {
            Sink::Delimited(writer) => writer
                .into_inner()
                .map_err(|e| DiffError::Io(std::io::Error::new(e.error().kind(), e.to_string()))),
            Sink::Fixed(writer) => writer
                .into_inner()
                .map_err(|e| DiffError::Io(std::io::Error::new(e.error().kind(), e.to_string()))),
        }
    }
}
