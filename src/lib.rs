//! flatdiff - Sort-merge reconciliation of delimited and fixed-width record files
//!
//! Compares an old and a new export of the same record set and writes a
//! change log: every record that was created, updated or deleted, prefixed
//! with a `CRE` / `UPD` / `DEL` transaction tag.
//!
//! ## Strategy
//!
//! 1. Parse rows through a [`Descriptor`] into [`Record`]s with a composite
//!    [`Key`] and a payload digest
//! 2. Order both inputs by key, in memory or with an [`ExternalSort`] that
//!    spills sorted runs to a working directory
//! 3. Walk both ordered streams once with the [`Comparator`], classifying each
//!    key as added, deleted, modified or unchanged
//!
//! ```no_run
//! use std::sync::Arc;
//! use flatdiff::{reader, Comparator, Descriptor, DiffOptions, RecordWriter, TransformerRegistry};
//!
//! # fn main() -> flatdiff::Result<()> {
//! let registry = TransformerRegistry::default();
//! let descriptor = Arc::new(Descriptor::from_json_file("people.json".as_ref(), &registry)?);
//! let options = DiffOptions::default();
//!
//! let mut old = reader::open(descriptor.clone(), &options, "old.csv".as_ref())?;
//! let mut new = reader::open(descriptor.clone(), &options, "new.csv".as_ref())?;
//! let out = std::fs::File::create("changes.csv")?;
//! let mut writer = RecordWriter::new(descriptor.clone(), &options, out);
//!
//! let mut comparator = Comparator::new(descriptor, options.clone())?;
//! let summary = comparator.compare_external(&mut old, &mut new, &mut writer, &options.working_dir)?;
//! println!("{} changes", summary.total() - summary.unchanged);
//! # Ok(())
//! # }
//! ```

pub mod compare;
pub mod config;
pub mod cursor;
pub mod descriptor;
pub mod error;
pub mod reader;
pub mod record;
pub mod sort;
pub mod transform;
pub mod writer;

pub use compare::{Change, ChangeHandler, Comparator, DiffSummary, TaggedOutput};
pub use config::DiffOptions;
pub use cursor::ResultSet;
pub use descriptor::{Attribute, AttributeType, Descriptor, Layout, SchemaId};
pub use error::{DiffError, Result, Side};
pub use reader::RecordSource;
pub use record::{Entity, Key, PayloadHash, Record};
pub use sort::{ExternalSort, SortedFile};
pub use transform::{Transformer, TransformerChain, TransformerRegistry};
pub use writer::{RecordWriter, Tag, TRANSACTION};
