//! Saved request storage
//!
//! A flat JSON list of named requests. Only the request half of a record is
//! stored; saving under an existing name replaces that entry in place.

use crate::capture::{CapturedRequest, ExchangeRecord, HeaderFields};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const STORAGE_DIR: &str = ".api-devtools";
const REQUESTS_FILE: &str = "requests.json";

/// A named request snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedRequest {
    pub name: String,
    pub method: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderFields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl SavedRequest {
    /// Project a record's request under `name`
    pub fn from_record(name: &str, record: &ExchangeRecord) -> Self {
        let request = &record.request;
        Self {
            name: name.to_string(),
            method: request.method.clone(),
            url: request.url.clone(),
            headers: Some(request.headers.clone()),
            body: request.body.clone(),
            created_at: Utc::now(),
        }
    }

    /// A response-less record carrying this request, for code generation
    pub fn to_record(&self) -> ExchangeRecord {
        let request = CapturedRequest {
            id: self.name.clone(),
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone().unwrap_or_default(),
            body: self.body.clone(),
            timestamp: self.created_at,
        };
        ExchangeRecord {
            id: self.name.clone(),
            request,
            response: None,
            error: None,
            timing: Default::default(),
        }
    }
}

/// Name used when saving from the proxy view: `<METHOD>-<epoch ms>`
pub fn auto_name(record: &ExchangeRecord) -> String {
    format!("{}-{}", record.request.method, Utc::now().timestamp_millis())
}

/// Default location of the request file in the user's home directory
pub fn default_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("could not determine the home directory")?;
    Ok(home.join(STORAGE_DIR).join(REQUESTS_FILE))
}

/// File-backed store of saved requests
#[derive(Debug, Clone)]
pub struct RequestStore {
    path: PathBuf,
}

impl RequestStore {
    /// Use the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Use the configured path, or the default one in the home directory
    pub fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Ok(Self::new(path)),
            None => Ok(Self::new(default_path()?)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory and an empty list if they do not exist yet
    pub fn init(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        if !self.path.exists() {
            self.write(&[])?;
        }
        Ok(())
    }

    /// All saved requests in file order. A corrupt file reads as empty.
    pub fn list(&self) -> Result<Vec<SavedRequest>> {
        self.init()?;

        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        match serde_json::from_str(&data) {
            Ok(requests) => Ok(requests),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Ignoring unreadable request file");
                Ok(Vec::new())
            }
        }
    }

    /// Save a record's request under `name`, replacing any entry with that name
    pub fn save(&self, name: &str, record: &ExchangeRecord) -> Result<SavedRequest> {
        let mut requests = self.list()?;
        let saved = SavedRequest::from_record(name, record);

        match requests.iter_mut().find(|r| r.name == name) {
            Some(existing) => *existing = saved.clone(),
            None => requests.push(saved.clone()),
        }

        self.write(&requests)?;
        tracing::debug!(name = %name, path = %self.path.display(), "Saved request");
        Ok(saved)
    }

    /// Look up a saved request by name
    pub fn get(&self, name: &str) -> Result<Option<SavedRequest>> {
        Ok(self.list()?.into_iter().find(|r| r.name == name))
    }

    /// Delete by name. Returns false when nothing was stored under it.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let requests = self.list()?;
        let before = requests.len();
        let remaining: Vec<_> = requests.into_iter().filter(|r| r.name != name).collect();

        if remaining.len() == before {
            return Ok(false);
        }

        self.write(&remaining)?;
        Ok(true)
    }

    fn write(&self, requests: &[SavedRequest]) -> Result<()> {
        let json = serde_json::to_string_pretty(requests)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{normalize_headers, ExchangeRecorder};

    fn store() -> (tempfile::TempDir, RequestStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RequestStore::new(dir.path().join("nested").join("requests.json"));
        (dir, store)
    }

    fn record(method: &str, url: &str, body: Option<&str>) -> ExchangeRecord {
        ExchangeRecorder::begin(
            method,
            url,
            normalize_headers([("Accept", "application/json")]),
            body.map(str::to_string),
        )
        .complete_error("not sent")
    }

    #[test]
    fn test_init_creates_empty_list() {
        let (_dir, store) = store();
        assert!(store.list().unwrap().is_empty());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "[]");
    }

    #[test]
    fn test_save_and_get() {
        let (_dir, store) = store();
        store
            .save("create-user", &record("post", "https://api.test/users", Some("{}")))
            .unwrap();

        let saved = store.get("create-user").unwrap().unwrap();
        assert_eq!(saved.method, "POST");
        assert_eq!(saved.url, "https://api.test/users");
        assert_eq!(saved.body.as_deref(), Some("{}"));
        assert_eq!(saved.headers.unwrap()["accept"], "application/json");
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_save_same_name_replaces_in_place() {
        let (_dir, store) = store();
        store.save("a", &record("GET", "https://one", None)).unwrap();
        store.save("b", &record("GET", "https://two", None)).unwrap();
        store.save("a", &record("DELETE", "https://three", None)).unwrap();

        let all = store.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "a");
        assert_eq!(all[0].url, "https://three");
        assert_eq!(store.get("a").unwrap().unwrap().method, "DELETE");
    }

    #[test]
    fn test_delete() {
        let (_dir, store) = store();
        store.save("a", &record("GET", "https://one", None)).unwrap();

        assert!(!store.delete("missing").unwrap());
        assert!(store.delete("a").unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let (_dir, store) = store();
        store.init().unwrap();
        std::fs::write(store.path(), "{ not a list").unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_file_format_uses_epoch_millis() {
        let (_dir, store) = store();
        store.save("a", &record("GET", "https://one", None)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert!(raw[0]["createdAt"].is_i64());
        assert!(raw[0].get("body").is_none());
    }

    #[test]
    fn test_to_record_projects_request() {
        let saved = SavedRequest::from_record("x", &record("PUT", "https://one", Some("hi")));
        let projected = saved.to_record();
        assert_eq!(projected.request.method, "PUT");
        assert_eq!(projected.request.body.as_deref(), Some("hi"));
        assert!(projected.response.is_none());
    }
}
