//! Reference documents (policies, competency lists, examples).
//!
//! Documents are addressed by `(category, name)`, e.g.
//! `("pace_note", "cpl.md")`. Backends: a local directory tree or an
//! S3-compatible bucket reached over HTTP.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::fs;

use crate::error::DocumentError;

/// Read-only document store.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    async fn get(&self, category: &str, name: &str) -> Result<String, DocumentError>;
}

/// UTF-8 first, then ISO-8859-1 (which accepts every byte).
fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| char::from(b)).collect(),
    }
}

fn object_key(category: &str, name: &str) -> String {
    if category.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", category.trim_matches('/'), name)
    }
}

/// Reject keys that would escape the document root.
fn check_key(category: &str, name: &str) -> Result<(), DocumentError> {
    let key = object_key(category, name);
    if key.split('/').any(|part| part == "..") || key.starts_with('/') {
        return Err(DocumentError::NotFound {
            category: category.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Documents stored as `<root>/<category>/<name>`.
pub struct FsDocumentRetriever {
    root: PathBuf,
}

impl FsDocumentRetriever {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl DocumentRetriever for FsDocumentRetriever {
    async fn get(&self, category: &str, name: &str) -> Result<String, DocumentError> {
        check_key(category, name)?;
        let path = self.root.join(object_key(category, name));
        match fs::read(&path).await {
            Ok(bytes) => Ok(decode(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Document not found");
                Err(DocumentError::NotFound {
                    category: category.to_string(),
                    name: name.to_string(),
                })
            }
            Err(e) => Err(DocumentError::Unavailable {
                category: category.to_string(),
                name: name.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Documents fetched with `GET <base_url>/<category>/<name>`.
///
/// Works against path-style S3-compatible buckets that allow public or
/// pre-authorised reads.
pub struct HttpDocumentRetriever {
    client: Client,
    base_url: String,
}

impl HttpDocumentRetriever {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DocumentError> {
        let base_url = base_url.into();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DocumentError::Unavailable {
                category: String::new(),
                name: base_url.clone(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, category: &str, name: &str) -> String {
        format!("{}/{}", self.base_url, object_key(category, name))
    }
}

#[async_trait]
impl DocumentRetriever for HttpDocumentRetriever {
    async fn get(&self, category: &str, name: &str) -> Result<String, DocumentError> {
        check_key(category, name)?;
        let unavailable = |reason: String| DocumentError::Unavailable {
            category: category.to_string(),
            name: name.to_string(),
            reason,
        };

        let response = self
            .client
            .get(self.url(category, name))
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::FORBIDDEN {
            // S3 answers 403 for missing keys when listing is not allowed.
            return Err(DocumentError::NotFound {
                category: category.to_string(),
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| unavailable(e.to_string()))?;
        Ok(decode(bytes.to_vec()))
    }
}

/// In-memory documents keyed by `category/name`.
#[derive(Debug, Clone, Default)]
pub struct StaticDocumentRetriever {
    docs: HashMap<String, String>,
}

impl StaticDocumentRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: &str, name: &str, text: impl Into<String>) -> Self {
        self.docs.insert(object_key(category, name), text.into());
        self
    }
}

#[async_trait]
impl DocumentRetriever for StaticDocumentRetriever {
    async fn get(&self, category: &str, name: &str) -> Result<String, DocumentError> {
        self.docs
            .get(&object_key(category, name))
            .cloned()
            .ok_or_else(|| DocumentError::NotFound {
                category: category.to_string(),
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latin1_fallback() {
        // "café" in ISO-8859-1
        assert_eq!(decode(vec![0x63, 0x61, 0x66, 0xE9]), "café");
        assert_eq!(decode("café".as_bytes().to_vec()), "café");
    }

    #[test]
    fn object_keys() {
        assert_eq!(object_key("pace_note", "cpl.md"), "pace_note/cpl.md");
        assert_eq!(object_key("", "x.md"), "x.md");
        assert_eq!(object_key("/doad/", "5019-0.md"), "doad/5019-0.md");
    }

    #[tokio::test]
    async fn fs_retriever_reads_category_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pace_note")).unwrap();
        std::fs::write(dir.path().join("pace_note/cpl.md"), "Competencies").unwrap();

        let docs = FsDocumentRetriever::new(dir.path());
        assert_eq!(docs.get("pace_note", "cpl.md").await.unwrap(), "Competencies");
        assert!(matches!(
            docs.get("pace_note", "wo.md").await,
            Err(DocumentError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let docs = FsDocumentRetriever::new(dir.path());
        assert!(docs.get("..", "etc/passwd").await.is_err());
    }

    #[test]
    fn http_urls_are_path_style() {
        let docs = HttpDocumentRetriever::new("https://s3.example.com/bucket/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            docs.url("leave_policy", "leave_policy.md"),
            "https://s3.example.com/bucket/leave_policy/leave_policy.md"
        );
    }

    #[tokio::test]
    async fn static_retriever() {
        let docs = StaticDocumentRetriever::new().with("doad", "5019-0.md", "Conduct");
        assert_eq!(docs.get("doad", "5019-0.md").await.unwrap(), "Conduct");
        assert!(docs.get("doad", "1000-1.md").await.is_err());
    }
}
