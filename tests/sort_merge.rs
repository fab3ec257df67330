//! End-to-end diffs over real files, in memory and through the external sort.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flatdiff::reader::VecSource;
use flatdiff::{
    reader, Comparator, Descriptor, DiffError, DiffOptions, DiffSummary, Entity, RecordSource,
    RecordWriter, Side, TransformerRegistry,
};
use tempfile::TempDir;

const PEOPLE: &str = r#"{
    "attributes": [
        { "name": "id", "identifier": true },
        { "name": "name", "inbound": ["upper"] }
    ]
}"#;

const ACCOUNTS: &str = r#"{
    "layout": "fixed",
    "attributes": [
        { "name": "id", "start": 0, "length": 4, "identifier": true },
        { "name": "name", "start": 4, "length": 10 }
    ]
}"#;

const LEDGER: &str = r#"{
    "layout": "fixed",
    "attributes": [
        { "name": "id", "start": 0, "length": 4, "identifier": true },
        { "name": "name", "start": 4, "length": 8, "trim": false }
    ]
}"#;

const CODES: &str = r#"{
    "attributes": [
        { "name": "code", "identifier": true }
    ]
}"#;

#[derive(Clone, Copy, Debug)]
enum Mode {
    InMemory,
    External,
}

struct Fixture {
    dir: TempDir,
    descriptor: Arc<Descriptor>,
}

impl Fixture {
    fn new(descriptor_json: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("work")).unwrap();
        let descriptor =
            Descriptor::from_json(descriptor_json, &TransformerRegistry::default()).unwrap();
        Self {
            dir,
            descriptor: Arc::new(descriptor),
        }
    }

    fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    fn file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn run(
        &self,
        comparator: &mut Comparator,
        mode: Mode,
        old: &str,
        new: &str,
    ) -> flatdiff::Result<(DiffSummary, String)> {
        let old = self.file("old.txt", old);
        let new = self.file("new.txt", new);
        self.run_files(comparator, mode, &old, &new, &self.work_dir())
    }

    fn run_files(
        &self,
        comparator: &mut Comparator,
        mode: Mode,
        old: &Path,
        new: &Path,
        work_dir: &Path,
    ) -> flatdiff::Result<(DiffSummary, String)> {
        let options = comparator.options().clone();
        let mut old = reader::open(self.descriptor.clone(), &options, old)?;
        let mut new = reader::open(self.descriptor.clone(), &options, new)?;
        let out_path = self.dir.path().join("changes.txt");
        let mut writer =
            RecordWriter::new(self.descriptor.clone(), &options, fs::File::create(&out_path)?);
        let summary = match mode {
            Mode::InMemory => comparator.compare(&mut old, &mut new, &mut writer)?,
            Mode::External => comparator.compare_external(&mut old, &mut new, &mut writer, work_dir)?,
        };
        drop(writer);
        Ok((summary, fs::read_to_string(out_path)?))
    }

    /// Diffs two record sources into an in-memory change log.
    fn run_sources(
        &self,
        comparator: &mut Comparator,
        mode: Mode,
        old: &mut dyn RecordSource,
        new: &mut dyn RecordSource,
    ) -> flatdiff::Result<(DiffSummary, String)> {
        let mut writer = RecordWriter::new(self.descriptor.clone(), comparator.options(), Vec::new());
        let result = match mode {
            Mode::InMemory => comparator.compare(old, new, &mut writer),
            Mode::External => comparator.compare_external(old, new, &mut writer, &self.work_dir()),
        };
        let out = String::from_utf8(writer.into_inner()?).unwrap_or_default();
        Ok((result?, out))
    }

    fn entities(&self, rows: &[&[Option<&str>]]) -> VecSource {
        let names: Vec<&str> = self.descriptor.names().collect();
        let entities = rows.iter().map(|values| {
            names
                .iter()
                .zip(values.iter())
                .map(|(name, value)| (name.to_string(), value.map(str::to_string)))
                .collect::<Entity>()
        });
        VecSource::new(self.descriptor.clone(), entities)
    }

    fn comparator(&self, options: DiffOptions) -> Comparator {
        Comparator::new(self.descriptor.clone(), options).unwrap()
    }

    fn work_dir_is_empty(&self) -> bool {
        fs::read_dir(self.work_dir()).unwrap().next().is_none()
    }
}

const MODES: [Mode; 2] = [Mode::InMemory, Mode::External];

fn diff(mode: Mode, old: &str, new: &str) -> (DiffSummary, String) {
    let fx = Fixture::new(PEOPLE);
    let mut comparator = fx.comparator(DiffOptions::default().with_run_capacity(1));
    let result = fx.run(&mut comparator, mode, old, new).unwrap();
    assert!(fx.work_dir_is_empty(), "{mode:?} left temp files behind");
    result
}

#[test]
fn test_identical_files_produce_header_only() {
    for mode in MODES {
        let (summary, out) = diff(mode, "id;name\n1;A\n", "id;name\n1;A\n");
        assert!(!summary.changes());
        assert_eq!(summary.unchanged, 1);
        assert_eq!(out, "TRANSACTION;id;name\n");
    }
}

#[test]
fn test_changed_payload_is_update() {
    for mode in MODES {
        let (summary, out) = diff(mode, "id;name\n1;A\n", "id;name\n1;B\n");
        assert_eq!(summary.modifications, 1);
        assert_eq!(summary.additions + summary.deletions, 0);
        assert_eq!(out, "TRANSACTION;id;name\nUPD;1;B\n");
    }
}

#[test]
fn test_missing_record_is_delete() {
    for mode in MODES {
        let (summary, out) = diff(mode, "id;name\n1;A\n", "id;name\n");
        assert_eq!(summary.deletions, 1);
        assert_eq!(out, "TRANSACTION;id;name\nDEL;1;A\n");
    }
}

#[test]
fn test_new_record_is_create() {
    for mode in MODES {
        let (summary, out) = diff(mode, "id;name\n", "id;name\n2;C\n");
        assert_eq!(summary.additions, 1);
        assert_eq!(out, "TRANSACTION;id;name\nCRE;2;C\n");
    }
}

#[test]
fn test_changes_are_emitted_in_key_order() {
    for mode in MODES {
        let (summary, out) = diff(mode, "id;name\n3;\n1;\n", "id;name\n2;\n");
        assert_eq!(summary.additions, 1);
        assert_eq!(summary.deletions, 2);
        assert_eq!(out, "TRANSACTION;id;name\nDEL;1;\nCRE;2;\nDEL;3;\n");
    }
}

#[test]
fn test_columns_are_matched_by_header_name() {
    for mode in MODES {
        let (summary, out) = diff(mode, "id;name\n1;A\n2;B\n", "name;id\nA;1\nX;2\n");
        assert_eq!(summary.modifications, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(out, "TRANSACTION;id;name\nUPD;2;X\n");
    }
}

#[test]
fn test_duplicate_keys_pair_in_arrival_order() {
    for mode in MODES {
        let (summary, out) = diff(mode, "id;name\n1;a\n1;b\n", "id;name\n1;a\n");
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.deletions, 1);
        assert_eq!(out, "TRANSACTION;id;name\nDEL;1;b\n");
    }
}

#[test]
fn test_counters_reflect_only_the_latest_pass() {
    let fx = Fixture::new(PEOPLE);
    let mut comparator = fx.comparator(DiffOptions::default());
    fx.run(&mut comparator, Mode::External, "id;name\n1;A\n2;B\n", "id;name\n")
        .unwrap();
    assert_eq!(comparator.deletions(), 2);

    fx.run(&mut comparator, Mode::External, "id;name\n1;A\n", "id;name\n1;A\n3;C\n")
        .unwrap();
    assert_eq!(comparator.deletions(), 0);
    assert_eq!(comparator.additions(), 1);
    assert_eq!(comparator.modifications(), 0);
    assert!(comparator.changes());
}

#[test]
fn test_inbound_transform_normalizes_before_hashing() {
    let fx = Fixture::new(PEOPLE);
    let old = "id;name\n1;ada\n";
    let new = "id;name\n1;ADA\n";

    let mut plain = fx.comparator(DiffOptions::default());
    let (summary, _) = fx.run(&mut plain, Mode::External, old, new).unwrap();
    assert_eq!(summary.modifications, 1);

    for mode in MODES {
        let mut transformed = fx.comparator(DiffOptions::default().with_transform(true));
        let (summary, out) = fx.run(&mut transformed, mode, old, new).unwrap();
        assert!(!summary.changes(), "{mode:?}");
        assert_eq!(out, "TRANSACTION;id;name\n");
    }
}

#[test]
fn test_fixed_width_files() {
    let fx = Fixture::new(ACCOUNTS);
    for mode in MODES {
        let mut comparator = fx.comparator(DiffOptions::default().with_run_capacity(2));
        let (summary, out) = fx
            .run(
                &mut comparator,
                mode,
                "0003Cid\n0001Ada\n\n0002Bob\n",
                "0002Bobby\n0004Dee\n0001Ada       \n",
            )
            .unwrap();
        assert_eq!(
            summary,
            DiffSummary {
                additions: 1,
                deletions: 1,
                modifications: 1,
                unchanged: 1
            }
        );
        assert_eq!(out, "UPD0002Bobby\nDEL0003Cid\nCRE0004Dee\n");
        assert!(fx.work_dir_is_empty());
    }
}

#[test]
fn test_malformed_input_fails_and_cleans_up() {
    let fx = Fixture::new(PEOPLE);
    for mode in MODES {
        let mut comparator = fx.comparator(DiffOptions::default().with_run_capacity(1));
        let err = fx
            .run(&mut comparator, mode, "id;name\n1;A\n2;B\n", "id;name\n1;A\n2;B;extra\n")
            .unwrap_err();
        match err {
            DiffError::Input { side, source } => {
                assert_eq!(side, Side::New);
                assert!(matches!(*source, DiffError::Malformed { line: 3, expected: 2, found: 3 }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fx.work_dir_is_empty(), "{mode:?} left temp files behind");
    }
}

#[test]
fn test_unusable_working_dir_is_configuration_error() {
    let fx = Fixture::new(PEOPLE);
    let old = fx.file("old.txt", "id;name\n1;A\n");
    let new = fx.file("new.txt", "id;name\n1;A\n");
    let mut comparator = fx.comparator(DiffOptions::default());
    let missing = fx.dir.path().join("does-not-exist");

    let err = fx
        .run_files(&mut comparator, Mode::External, &old, &new, &missing)
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(matches!(
        err,
        DiffError::Input { side: Side::Old, ref source } if matches!(**source, DiffError::WorkingDirectory { .. })
    ));
}

#[test]
fn test_unknown_header_column_is_configuration_error() {
    let fx = Fixture::new(PEOPLE);
    let mut comparator = fx.comparator(DiffOptions::default());
    let err = fx
        .run(&mut comparator, Mode::InMemory, "id;name\n", "id;label\n1;A\n")
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().starts_with("new input:"));
}

#[test]
fn test_headerless_inputs() {
    let fx = Fixture::new(PEOPLE);
    let options = DiffOptions::default().with_header(false).with_write_header(false);
    let mut comparator = fx.comparator(options);
    let (summary, out) = fx
        .run(&mut comparator, Mode::External, "2;B\n1;A\n", "1;A\n2;C\n")
        .unwrap();
    assert_eq!(summary.modifications, 1);
    assert_eq!(out, "UPD;2;C\n");
}

#[test]
fn test_untrimmed_fixed_width_slots_read_padded() {
    let fx = Fixture::new(LEDGER);
    for mode in MODES {
        let mut comparator = fx.comparator(DiffOptions::default().with_run_capacity(1));
        let (summary, out) = fx
            .run(
                &mut comparator,
                mode,
                "0001Ada     \n0002Bob\n",
                "0001Ada\n0002Bobby   \n",
            )
            .unwrap();
        assert_eq!(summary.unchanged, 1, "{mode:?}");
        assert_eq!(summary.modifications, 1, "{mode:?}");
        assert_eq!(out, "UPD0002Bobby\n");
        assert!(fx.work_dir_is_empty());
    }
}

#[test]
fn test_records_with_only_empty_fields_survive_the_sort() {
    let fx = Fixture::new(CODES);
    for mode in MODES {
        let mut comparator = fx.comparator(DiffOptions::default().with_run_capacity(1));
        let mut old = fx.entities(&[&[Some("b")]]);
        let mut new = fx.entities(&[&[Some("b")], &[None]]);
        let (summary, out) = fx.run_sources(&mut comparator, mode, &mut old, &mut new).unwrap();
        assert_eq!(summary.additions, 1, "{mode:?}");
        assert_eq!(summary.unchanged, 1, "{mode:?}");
        assert_eq!(out, "TRANSACTION;code\nCRE;\n");
    }

    let fx = Fixture::new(ACCOUNTS);
    for mode in MODES {
        let mut comparator = fx.comparator(DiffOptions::default().with_run_capacity(1));
        let mut old = fx.entities(&[&[None, None], &[Some("0001"), Some("Ada")]]);
        let mut new = fx.entities(&[&[Some("0001"), Some("Ada")]]);
        let (summary, out) = fx.run_sources(&mut comparator, mode, &mut old, &mut new).unwrap();
        assert_eq!(summary.deletions, 1, "{mode:?}");
        assert_eq!(summary.unchanged, 1, "{mode:?}");
        assert_eq!(out, "DEL\n");
    }
}

/// Accepts `budget` bytes, then fails every write.
struct FailingWrite {
    budget: usize,
}

impl Write for FailingWrite {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.budget == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
        }
        let n = buf.len().min(self.budget);
        self.budget -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Serves `healthy` entities, then fails like a dropped connection.
struct FailingSource {
    inner: VecSource,
    healthy: usize,
}

impl RecordSource for FailingSource {
    fn descriptor(&self) -> &Arc<Descriptor> {
        self.inner.descriptor()
    }

    fn read_entity(&mut self, apply_transform: bool) -> flatdiff::Result<Option<Entity>> {
        if self.healthy == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset").into());
        }
        self.healthy -= 1;
        self.inner.read_entity(apply_transform)
    }

    fn lines_processed(&self) -> u64 {
        self.inner.lines_processed()
    }
}

#[test]
fn test_output_failure_aborts_diff_and_cleans_up() {
    let fx = Fixture::new(PEOPLE);
    let old = fx.file("old.txt", "id;name\n1;A\n2;B\n3;C\n");
    let new = fx.file("new.txt", "id;name\n1;X\n3;C\n4;D\n");
    for mode in MODES {
        let options = DiffOptions::default().with_run_capacity(1);
        let mut comparator = fx.comparator(options.clone());
        let mut old = reader::open(fx.descriptor.clone(), &options, &old).unwrap();
        let mut new = reader::open(fx.descriptor.clone(), &options, &new).unwrap();
        let mut writer = RecordWriter::new(fx.descriptor.clone(), &options, FailingWrite { budget: 8 });
        let err = match mode {
            Mode::InMemory => comparator.compare(&mut old, &mut new, &mut writer),
            Mode::External => {
                comparator.compare_external(&mut old, &mut new, &mut writer, &fx.work_dir())
            }
        }
        .unwrap_err();
        assert!(
            matches!(err, DiffError::Io(ref e) if e.kind() == io::ErrorKind::Other),
            "{mode:?}: {err}"
        );
        assert!(fx.work_dir_is_empty(), "{mode:?} left temp files behind");
    }
}

#[test]
fn test_source_failure_is_attributed_and_cleans_up() {
    let fx = Fixture::new(PEOPLE);
    let rows: &[&[Option<&str>]] = &[
        &[Some("5"), Some("E")],
        &[Some("4"), Some("D")],
        &[Some("3"), Some("C")],
        &[Some("2"), Some("B")],
        &[Some("1"), Some("A")],
    ];
    for mode in MODES {
        let mut comparator = fx.comparator(DiffOptions::default().with_run_capacity(1));
        let mut old = fx.entities(rows);
        let mut new = FailingSource {
            inner: fx.entities(rows),
            healthy: 3,
        };
        let (err, out) = {
            let mut writer = RecordWriter::new(fx.descriptor.clone(), comparator.options(), Vec::new());
            let result = match mode {
                Mode::InMemory => comparator.compare(&mut old, &mut new, &mut writer),
                Mode::External => {
                    comparator.compare_external(&mut old, &mut new, &mut writer, &fx.work_dir())
                }
            };
            (result.unwrap_err(), writer.into_inner().unwrap())
        };
        match err {
            DiffError::Input { side, source } => {
                assert_eq!(side, Side::New, "{mode:?}");
                assert!(
                    matches!(*source, DiffError::Io(ref e) if e.kind() == io::ErrorKind::ConnectionReset),
                    "{mode:?}"
                );
            }
            other => panic!("{mode:?}: unexpected error: {other}"),
        }
        assert!(out.is_empty(), "{mode:?} wrote output before both inputs were read");
        assert!(fx.work_dir_is_empty(), "{mode:?} left temp files behind");
    }
}
