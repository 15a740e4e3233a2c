//! Whole-document JSON persistence.
//!
//! A document is replaced in one visible step: the new content is written to a uniquely named
//! temporary file next to the target, flushed to disk, then renamed over the target. Readers see
//! either the old or the new complete document, never a mix, and a crash mid-write leaves the
//! old document intact (plus at worst a stray temporary file, ignored by [`DocumentStore::list`]).
//!
//! The store does no merging. Every document has a single writer: the referee owning a match,
//! the league manager for rounds, the result processor for standings.
//!
//! All operations are blocking file system calls. Async callers go through
//! [`DocumentStore::write_async`] or [`DocumentStore::run_blocking`], which move the work to
//! tokio's blocking pool.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{instrument, trace, Span};

use crate::error::LeagueError;

/// Document holding the league's rounds.
pub const ROUNDS_DOCUMENT: &str = "rounds";
/// Document holding the standings.
pub const STANDINGS_DOCUMENT: &str = "standings";
/// Collection holding one document per match.
pub const MATCH_COLLECTION: &str = "matches";

/// Id of the document of match `match_id`.
pub fn match_document(match_id: &str) -> String {
    format!("{MATCH_COLLECTION}/{match_id}")
}

/// A directory of JSON documents.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, LeagueError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, document_id: &str) -> Result<PathBuf, LeagueError> {
        let valid_segment = |s: &str| {
            !s.is_empty()
                && !s.starts_with('.')
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        };
        if !document_id.split('/').all(valid_segment) {
            return Err(LeagueError::Validation(format!(
                "invalid document id '{document_id}'"
            )));
        }
        Ok(self.root.join(format!("{document_id}.json")))
    }

    /// Replace the whole content of `document_id` with `value`.
    pub fn write<T: Serialize>(&self, document_id: &str, value: &T) -> Result<(), LeagueError> {
        let bytes = encode(document_id, value)?;
        self.replace(document_id, &bytes)
    }

    /// [`write`](Self::write) on the blocking pool. `value` is encoded before the call returns
    /// control to the runtime.
    pub async fn write_async<T: Serialize>(
        &self,
        document_id: &str,
        value: &T,
    ) -> Result<(), LeagueError> {
        let bytes = encode(document_id, value)?;
        let id = document_id.to_string();
        self.run_blocking(move |store| store.replace(&id, &bytes)).await
    }

    /// Run `job` against this store on tokio's blocking pool.
    pub async fn run_blocking<R, F>(&self, job: F) -> Result<R, LeagueError>
    where
        R: Send + 'static,
        F: FnOnce(&DocumentStore) -> Result<R, LeagueError> + Send + 'static,
    {
        let store = self.clone();
        let span = Span::current();
        tokio::task::spawn_blocking(move || span.in_scope(|| job(&store)))
            .await
            .map_err(|e| LeagueError::Storage(format!("store job did not complete: {e}")))?
    }

    #[instrument(skip(self, bytes))]
    fn replace(&self, document_id: &str, bytes: &[u8]) -> Result<(), LeagueError> {
        let path = self.path_of(document_id)?;
        let dir = path
            .parent()
            .ok_or_else(|| LeagueError::Storage(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document");
        let temp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        let written = (|| {
            let mut file = File::create(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&temp_path, &path)
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(LeagueError::Storage(format!("writing {document_id}: {e}")));
        }

        // make the rename itself durable; not supported everywhere
        if let Ok(dir) = File::open(dir) {
            let _ = dir.sync_all();
        }
        trace!(bytes = bytes.len(), "document replaced");
        Ok(())
    }

    /// Load `document_id`, or `T::default()` if it does not exist.
    pub fn read<T>(&self, document_id: &str) -> Result<T, LeagueError>
    where
        T: DeserializeOwned + Default,
    {
        match self.load(document_id)? {
            Some(value) => Ok(value),
            None => Ok(T::default()),
        }
    }

    /// Load `document_id`, failing with not-found if it does not exist.
    pub fn read_required<T>(&self, document_id: &str) -> Result<T, LeagueError>
    where
        T: DeserializeOwned,
    {
        self.load(document_id)?
            .ok_or_else(|| LeagueError::NotFound(format!("document {document_id}")))
    }

    fn load<T: DeserializeOwned>(&self, document_id: &str) -> Result<Option<T>, LeagueError> {
        let path = self.path_of(document_id)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(LeagueError::Storage(format!("reading {document_id}: {e}"))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| LeagueError::Storage(format!("decoding {document_id}: {e}")))
    }

    /// Ids of the documents in `collection`, sorted.
    pub fn list(&self, collection: &str) -> Result<Vec<String>, LeagueError> {
        let dir = self.root.join(collection);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        let mut ids = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .filter_map(|name| name.strip_suffix(".json").map(str::to_string))
            .map(|name| format!("{collection}/{name}"))
            .collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }
}

fn encode<T: Serialize>(document_id: &str, value: &T) -> Result<Vec<u8>, LeagueError> {
    serde_json::to_vec_pretty(value)
        .map_err(|e| LeagueError::Storage(format!("encoding {document_id}: {e}")))
}
