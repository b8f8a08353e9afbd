//! The shuffle layer: where map output lands and how reduce finds it.
//!
//! Every file is written under a temporary name and renamed into place once
//! complete, so a reader sees either nothing or a whole file. When a task is
//! executed twice (a straggler and its replacement) both produce identical
//! contents and whichever rename lands last wins.

use crate::partition::partition;
use anyhow::{Context, Result};
use common::{Application, KeyValue};
use itertools::Itertools;
use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use uuid::Uuid;

pub const DEFAULT_PREFIX: &str = "mr";

/// Naming convention for one job's files inside a shared directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    dir: PathBuf,
    prefix: String,
}

impl Default for Store {
    fn default() -> Self {
        Self::new(".", DEFAULT_PREFIX)
    }
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<prefix>-<map>-<bucket>`
    pub fn intermediate_path(&self, map_id: u64, bucket: u64) -> PathBuf {
        self.dir.join(format!("{}-{}-{}", self.prefix, map_id, bucket))
    }

    /// `<prefix>-out-<bucket>`
    pub fn output_path(&self, bucket: u64) -> PathBuf {
        self.dir.join(format!("{}-out-{}", self.prefix, bucket))
    }

    fn temp_path(&self) -> PathBuf {
        self.dir
            .join(format!(".{}-tmp-{}", self.prefix, Uuid::new_v4()))
    }

    /// Removes every intermediate file of a finished job. Missing files are
    /// not an error.
    pub fn remove_intermediate(&self, n_map: u64, n_reduce: u64) -> Result<()> {
        for m in 0..n_map {
            for b in 0..n_reduce {
                let path = self.intermediate_path(m, b);
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(e).with_context(|| format!("removing {}", path.display()))
                    }
                }
            }
        }
        Ok(())
    }
}

/// A file that only appears under its final name once committed. The
/// temporary file is removed when it is dropped uncommitted, including
/// after a failed commit.
struct AtomicFile {
    tmp: PathBuf,
    target: PathBuf,
    writer: BufWriter<File>,
    committed: bool,
}

impl AtomicFile {
    fn create(store: &Store, target: PathBuf) -> Result<Self> {
        let tmp = store.temp_path();
        let file =
            File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        Ok(Self {
            tmp,
            target,
            writer: BufWriter::new(file),
            committed: false,
        })
    }

    fn commit(mut self) -> Result<PathBuf> {
        self.writer
            .flush()
            .with_context(|| format!("flushing {}", self.tmp.display()))?;
        fs::rename(&self.tmp, &self.target).with_context(|| {
            format!(
                "renaming {} to {}",
                self.tmp.display(),
                self.target.display()
            )
        })?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Writes the output of one map task, one file per reduce bucket.
///
/// All bucket files are opened up front and only renamed into place by
/// [`PartitionWriter::finish`]. Dropping the writer without finishing
/// throws the temporary files away.
pub struct PartitionWriter {
    files: Vec<AtomicFile>,
}

impl PartitionWriter {
    pub fn create(store: &Store, map_id: u64, n_reduce: u64) -> Result<Self> {
        let files = (0..n_reduce)
            .map(|b| AtomicFile::create(store, store.intermediate_path(map_id, b)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { files })
    }

    /// Appends one record to the bucket that owns its key.
    pub fn emit(&mut self, kv: &KeyValue) -> Result<()> {
        let bucket = partition(&kv.key, self.files.len() as u64) as usize;
        let file = &mut self.files[bucket];
        serde_json::to_writer(&mut file.writer, kv)
            .with_context(|| format!("encoding into {}", file.tmp.display()))?;
        file.writer.write_all(b"\n")?;
        Ok(())
    }

    /// Renames every bucket file into place. On error the buckets not yet
    /// committed are thrown away.
    pub fn finish(self) -> Result<Vec<PathBuf>> {
        self.files.into_iter().map(AtomicFile::commit).collect()
    }
}

/// Gathers bucket `bucket` from the output of every map task. A map task
/// that produced nothing for the bucket may have left no file.
pub fn read_partition(store: &Store, bucket: u64, n_map: u64) -> Result<Vec<KeyValue>> {
    let mut records = Vec::new();
    for m in 0..n_map {
        let path = store.intermediate_path(m, bucket);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e).with_context(|| format!("opening {}", path.display())),
        };
        let stream = serde_json::Deserializer::from_reader(BufReader::new(file))
            .into_iter::<KeyValue>();
        for kv in stream {
            records.push(kv.with_context(|| format!("decoding {}", path.display()))?);
        }
    }
    Ok(records)
}

/// Sorts by key and reduces each run of equal keys. Values keep the order
/// they were read in.
pub fn reduce_partition(app: &dyn Application, mut records: Vec<KeyValue>) -> Vec<(String, String)> {
    records.sort_by(|a, b| a.key.cmp(&b.key));
    records
        .into_iter()
        .group_by(|kv| kv.key.clone())
        .into_iter()
        .map(|(key, group)| {
            let values = group.map(|kv| kv.value).collect_vec();
            let output = app.reduce(&key, values);
            (key, output)
        })
        .collect()
}

/// Writes the final `key value` lines of one bucket.
pub fn write_output(store: &Store, bucket: u64, groups: &[(String, String)]) -> Result<PathBuf> {
    let mut file = AtomicFile::create(store, store.output_path(bucket))?;
    for (key, output) in groups {
        writeln!(file.writer, "{} {}", key, output).context("writing reduce output")?;
    }
    file.commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::apps::WordCount;

    fn store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path(), "mr");
        (dir, store)
    }

    #[test]
    fn test_naming() {
        let store = Store::new("/data", "mr");
        assert_eq!(store.intermediate_path(3, 7), PathBuf::from("/data/mr-3-7"));
        assert_eq!(store.output_path(2), PathBuf::from("/data/mr-out-2"));
    }

    #[test]
    fn test_write_then_read() {
        let (_dir, store) = store();
        let mut writer = PartitionWriter::create(&store, 0, 3).unwrap();
        for w in ["the", "quick", "the", "fox"] {
            writer.emit(&KeyValue::new(w, "1")).unwrap();
        }
        let paths = writer.finish().unwrap();
        assert_eq!(paths.len(), 3);

        let mut all = Vec::new();
        for b in 0..3 {
            let records = read_partition(&store, b, 1).unwrap();
            assert!(records.iter().all(|kv| partition(&kv.key, 3) == b));
            all.extend(records);
        }
        all.sort();
        let keys = all.iter().map(|kv| kv.key.as_str()).collect_vec();
        assert_eq!(keys, vec!["fox", "quick", "the", "the"]);
    }

    #[test]
    fn test_nothing_visible_before_finish() {
        let (dir, store) = store();
        let mut writer = PartitionWriter::create(&store, 4, 2).unwrap();
        writer.emit(&KeyValue::new("a", "1")).unwrap();
        assert!(!store.intermediate_path(4, 0).exists());
        assert!(!store.intermediate_path(4, 1).exists());
        drop(writer);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let (_dir, store) = store();
        let mut writer = PartitionWriter::create(&store, 1, 1).unwrap();
        writer.emit(&KeyValue::new("x", "1")).unwrap();
        writer.finish().unwrap();
        // map 0 and 2 never wrote anything
        let records = read_partition(&store, 0, 3).unwrap();
        assert_eq!(records, vec![KeyValue::new("x", "1")]);
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let (_dir, store) = store();
        fs::write(store.intermediate_path(0, 0), "{\"key\":\"a\",\"value\":\"1\"}\n{oops").unwrap();
        assert!(read_partition(&store, 0, 1).is_err());
    }

    #[test]
    fn test_reduce_groups_sorted() {
        let records = vec![
            KeyValue::new("the", "1"),
            KeyValue::new("fox", "1"),
            KeyValue::new("the", "1"),
            KeyValue::new("quick", "1"),
        ];
        let groups = reduce_partition(&WordCount, records);
        assert_eq!(
            groups,
            vec![
                ("fox".to_string(), "1".to_string()),
                ("quick".to_string(), "1".to_string()),
                ("the".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_output_overwrites_atomically() {
        let (_dir, store) = store();
        let groups = vec![("a".to_string(), "1".to_string())];
        write_output(&store, 0, &groups).unwrap();
        write_output(&store, 0, &groups).unwrap();
        assert_eq!(fs::read_to_string(store.output_path(0)).unwrap(), "a 1\n");
    }

    fn temp_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".mr-tmp-"))
            .collect()
    }

    #[test]
    fn test_failed_finish_leaves_no_temp_files() {
        let (dir, store) = store();
        // a non-empty directory where bucket 1 should land cannot be replaced
        let blocked = store.intermediate_path(5, 1);
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), "x").unwrap();

        let mut writer = PartitionWriter::create(&store, 5, 3).unwrap();
        for w in ["a", "b", "c", "d", "e", "f"] {
            writer.emit(&KeyValue::new(w, "1")).unwrap();
        }
        assert!(writer.finish().is_err());
        assert!(temp_files(dir.path()).is_empty());
        assert!(!store.intermediate_path(5, 2).exists());
    }

    #[test]
    fn test_failed_output_commit_leaves_no_temp_file() {
        let (dir, store) = store();
        let blocked = store.output_path(0);
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("keep"), "x").unwrap();

        let groups = vec![("a".to_string(), "1".to_string())];
        assert!(write_output(&store, 0, &groups).is_err());
        assert!(temp_files(dir.path()).is_empty());
    }

    #[test]
    fn test_remove_intermediate() {
        let (_dir, store) = store();
        PartitionWriter::create(&store, 0, 2).unwrap().finish().unwrap();
        store.remove_intermediate(2, 2).unwrap();
        assert!(!store.intermediate_path(0, 0).exists());
        assert!(!store.intermediate_path(0, 1).exists());
    }
}
