//! Options shared by readers, writers, the external sort and the comparator.

use std::path::{Path, PathBuf};

/// Default number of records held in memory per sort run before spilling.
pub const DEFAULT_RUN_CAPACITY: usize = 100_000;

/// Column separator of the upstream CSV exports.
pub const DEFAULT_DELIMITER: u8 = b';';

#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub delimiter: u8,
    pub quote: u8,
    /// Delimited files start with a header row naming their columns
    pub has_header: bool,
    /// Trim fixed-width values (attributes may still opt out)
    pub trim: bool,
    /// Run type conversion and inbound transformers while reading
    pub apply_transform: bool,
    /// Emit the `TRANSACTION` header line before the change records
    pub write_header: bool,
    /// Skip blank lines in delimited and fixed-width inputs. The external
    /// sort turns this off for its own files, where a blank line is a record
    /// whose fields are all empty.
    pub skip_blank_lines: bool,
    pub run_capacity: usize,
    pub working_dir: PathBuf,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            quote: b'"',
            has_header: true,
            trim: true,
            apply_transform: false,
            write_header: true,
            skip_blank_lines: true,
            run_capacity: DEFAULT_RUN_CAPACITY,
            working_dir: std::env::temp_dir(),
        }
    }
}

impl DiffOptions {
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_quote(mut self, quote: u8) -> Self {
        self.quote = quote;
        self
    }

    pub fn with_header(mut self, has_header: bool) -> Self {
        self.has_header = has_header;
        self
    }

    pub fn with_trim(mut self, trim: bool) -> Self {
        self.trim = trim;
        self
    }

    pub fn with_transform(mut self, apply_transform: bool) -> Self {
        self.apply_transform = apply_transform;
        self
    }

    pub fn with_write_header(mut self, write_header: bool) -> Self {
        self.write_header = write_header;
        self
    }

    pub fn with_skip_blank_lines(mut self, skip_blank_lines: bool) -> Self {
        self.skip_blank_lines = skip_blank_lines;
        self
    }

    /// Records per in-memory run; clamped to at least one.
    pub fn with_run_capacity(mut self, run_capacity: usize) -> Self {
        self.run_capacity = run_capacity.max(1);
        self
    }

    /// Directory for intermediate sort files. For large inputs prefer a
    /// directory on the same file system as the output.
    pub fn with_working_dir(mut self, working_dir: impl AsRef<Path>) -> Self {
        self.working_dir = working_dir.as_ref().to_path_buf();
        self
    }
}
