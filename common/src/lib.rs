use serde::{Deserialize, Serialize};
use std::{fmt, ops::Deref, sync::Arc};

pub mod apps;

/// A single intermediate pair. Ordering is by key first so a sorted
/// slice has all values of a key next to each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The user supplied half of a job.
///
/// `map` turns one input split into intermediate pairs, `reduce` folds all
/// values seen for one key into the text written next to that key in the
/// final output. Both must be deterministic for the output to be
/// independent of which worker ran which task.
pub trait Application: Send + Sync {
    fn map(&self, filename: &str, contents: &str) -> Vec<KeyValue>;
    fn reduce(&self, key: &str, values: Vec<String>) -> String;
}

/// A named, shareable handle to an [`Application`].
#[derive(Clone)]
pub struct App {
    pub app_name: String,
    inner: Arc<dyn Application>,
}

impl App {
    /// Binds one of the bundled applications by name.
    pub fn load(app_name: &str) -> anyhow::Result<Self> {
        let inner: Arc<dyn Application> = match app_name {
            "wc" => Arc::new(apps::WordCount),
            "indexer" => Arc::new(apps::Indexer),
            "crash" => Arc::new(apps::Crash),
            other => anyhow::bail!(
                "unknown application `{other}`, expected one of: {}",
                apps::NAMES.join(", ")
            ),
        };
        Ok(Self {
            app_name: app_name.to_string(),
            inner,
        })
    }

    pub fn new(app_name: &str, app: impl Application + 'static) -> Self {
        Self {
            app_name: app_name.to_string(),
            inner: Arc::new(app),
        }
    }
}

impl Deref for App {
    type Target = dyn Application;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App").field("app_name", &self.app_name).finish()
    }
}
