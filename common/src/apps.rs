//! Applications bundled with the runtime, selectable by name.

use crate::{Application, KeyValue};
use itertools::Itertools;
use rand::Rng;
use std::{env, process, thread, time::Duration};

pub const NAMES: &[&str] = &["wc", "indexer", "crash"];

fn words(contents: &str) -> impl Iterator<Item = &str> {
    contents
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
}

/// Word count: one `(word, "1")` per occurrence, reduced to the number of
/// occurrences.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCount;

impl Application for WordCount {
    fn map(&self, _filename: &str, contents: &str) -> Vec<KeyValue> {
        words(contents).map(|w| KeyValue::new(w, "1")).collect()
    }

    fn reduce(&self, _key: &str, values: Vec<String>) -> String {
        values.len().to_string()
    }
}

/// Inverted index: for every word, the documents it appears in.
#[derive(Debug, Clone, Copy, Default)]
pub struct Indexer;

impl Application for Indexer {
    fn map(&self, filename: &str, contents: &str) -> Vec<KeyValue> {
        words(contents)
            .unique()
            .map(|w| KeyValue::new(w, filename))
            .collect()
    }

    fn reduce(&self, _key: &str, values: Vec<String>) -> String {
        let files = values.into_iter().sorted().dedup().collect_vec();
        format!("{} {}", files.len(), files.join(","))
    }
}

/// Emits a fixed set of keys describing its input. With `CRASH=1` in the
/// environment it randomly kills the process or stalls, which is how the
/// coordinator's reassignment path gets exercised by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crash;

impl Crash {
    fn maybe_crash() {
        if env::var("CRASH").unwrap_or_default() != "1" {
            return;
        }
        let rr = rand::thread_rng().gen_range(0..1000);
        if rr < 330 {
            process::exit(1);
        } else if rr < 660 {
            let ms = rand::thread_rng().gen_range(0..10000);
            thread::sleep(Duration::from_millis(ms));
        }
    }
}

impl Application for Crash {
    fn map(&self, filename: &str, contents: &str) -> Vec<KeyValue> {
        Self::maybe_crash();
        vec![
            KeyValue::new("a", filename),
            KeyValue::new("b", filename.len().to_string()),
            KeyValue::new("c", contents.len().to_string()),
            KeyValue::new("d", "xyzzy"),
        ]
    }

    fn reduce(&self, _key: &str, values: Vec<String>) -> String {
        Self::maybe_crash();
        values.into_iter().sorted().join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wc_map() {
        let kvs = WordCount.map("in", "the quick, the fox");
        let keys = kvs.iter().map(|kv| kv.key.as_str()).collect_vec();
        assert_eq!(keys, vec!["the", "quick", "the", "fox"]);
        assert!(kvs.iter().all(|kv| kv.value == "1"));
    }

    #[test]
    fn test_wc_reduce() {
        assert_eq!(WordCount.reduce("the", vec!["1".into(), "1".into()]), "2");
    }

    #[test]
    fn test_indexer() {
        let kvs = Indexer.map("doc1", "a b a");
        assert_eq!(
            kvs,
            vec![KeyValue::new("a", "doc1"), KeyValue::new("b", "doc1")]
        );
        let out = Indexer.reduce("a", vec!["doc2".into(), "doc1".into(), "doc2".into()]);
        assert_eq!(out, "2 doc1,doc2");
    }

    #[test]
    fn test_crash_without_env_is_deterministic() {
        if env::var("CRASH").unwrap_or_default() == "1" {
            return;
        }
        let kvs = Crash.map("f", "hello");
        assert_eq!(kvs[2], KeyValue::new("c", "5"));
        assert_eq!(Crash.reduce("a", vec!["y".into(), "x".into()]), "x y");
    }
}
