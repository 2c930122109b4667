use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::propfind::parse_multistatus;

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<propfind xmlns="DAV:"><prop><resourcetype/><getcontentlength/><getlastmodified/></prop></propfind>"#;

#[derive(Debug, Error)]
pub enum WebdavError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("malformed multistatus response: {0}")]
    Multistatus(String),
    #[error("xml parse error: {0}")]
    Xml(#[from] quick_xml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Collection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub size: Option<u64>,
    pub modified: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub success: bool,
    pub path_exists: bool,
    pub error: Option<String>,
}

impl ConnectionCheck {
    fn failed(error: String) -> Self {
        Self {
            success: false,
            path_exists: false,
            error: Some(error),
        }
    }
}

#[derive(Clone)]
pub struct WebdavClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
}

impl WebdavClient {
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, WebdavError> {
        Self::build(base_url, username, password, None)
    }

    pub fn with_timeout(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, WebdavError> {
        Self::build(base_url, username, password, Some(timeout))
    }

    fn build(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, WebdavError> {
        let mut base_url = Url::parse(base_url)?;
        // Relative joins drop the last segment unless the base ends in a slash.
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            base_url,
            username: username.into(),
            password: password.into(),
        })
    }

    pub async fn exists(&self, path: &str) -> bool {
        let Ok(url) = self.endpoint(path) else {
            return false;
        };
        let response = self
            .http
            .request(Self::propfind(), url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Depth", "0")
            .body(PROPFIND_BODY)
            .send()
            .await;
        match response {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    pub async fn get_file(&self, path: &str) -> Result<String, WebdavError> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .get(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(WebdavError::NotFound(path.to_string()));
        }
        Self::read_body(response).await
    }

    pub async fn put_file(&self, path: &str, body: &str) -> Result<(), WebdavError> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .put(url)
            .basic_auth(&self.username, Some(&self.password))
            .body(body.to_string())
            .send()
            .await?;
        Self::ensure_success(response).await
    }

    pub async fn delete_file(&self, path: &str) -> Result<(), WebdavError> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .delete(url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        // Deleting something already gone is a success, not a failure.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::ensure_success(response).await
    }

    pub async fn move_file(&self, old_path: &str, new_path: &str) -> Result<(), WebdavError> {
        let url = self.endpoint(old_path)?;
        let destination = self.endpoint(new_path)?;
        let response = self
            .http
            .request(Self::move_method(), url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Destination", destination.to_string())
            .header("Overwrite", "T")
            .send()
            .await?;
        Self::ensure_success(response).await
    }

    pub async fn create_directory(&self, path: &str) -> Result<(), WebdavError> {
        let url = self.endpoint(path)?;
        let response = self
            .http
            .request(Self::mkcol(), url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await?;
        // MKCOL on an existing collection answers 405.
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Ok(());
        }
        Self::ensure_success(response).await
    }

    pub async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, WebdavError> {
        let url = self.endpoint(path)?;
        let collection_path = url.path().trim_end_matches('/').to_string();
        let response = self
            .http
            .request(Self::propfind(), url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Depth", "1")
            .body(PROPFIND_BODY)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(WebdavError::NotFound(path.to_string()));
        }
        let body = Self::read_body(response).await?;
        let mut entries = Vec::new();
        for entry in parse_multistatus(&body)? {
            let Some(name) = relative_name(&collection_path, &entry.href) else {
                continue;
            };
            entries.push(DirEntry {
                name,
                entry_type: if entry.is_collection {
                    EntryType::Collection
                } else {
                    EntryType::File
                },
                size: entry.size,
                modified: entry.modified,
            });
        }
        Ok(entries)
    }

    /// Three-phase probe: reach the server root, re-verify with the listing
    /// primitive, then check whether the sync path has been created yet.
    /// A missing sync path is a normal first-use state, never a failure.
    pub async fn test_connection(&self, sync_path: &str) -> ConnectionCheck {
        if let Err(err) = self.probe_root().await {
            return ConnectionCheck::failed(describe_probe_error(&err));
        }
        if let Err(err) = self.list_directory("/").await {
            return ConnectionCheck::failed(format!("listing the remote root failed: {err}"));
        }
        ConnectionCheck {
            success: true,
            path_exists: self.exists(sync_path).await,
            error: None,
        }
    }

    async fn probe_root(&self) -> Result<(), WebdavError> {
        let url = self.endpoint("/")?;
        let response = self
            .http
            .request(Self::propfind(), url)
            .basic_auth(&self.username, Some(&self.password))
            .header("Depth", "0")
            .body(PROPFIND_BODY)
            .send()
            .await?;
        Self::ensure_success(response).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, WebdavError> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }

    fn propfind() -> Method {
        Method::from_bytes(b"PROPFIND").expect("static method token")
    }

    fn mkcol() -> Method {
        Method::from_bytes(b"MKCOL").expect("static method token")
    }

    fn move_method() -> Method {
        Method::from_bytes(b"MOVE").expect("static method token")
    }

    async fn read_body(response: reqwest::Response) -> Result<String, WebdavError> {
        if response.status().is_success() {
            Ok(response.text().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(WebdavError::Status { status, body })
        }
    }

    async fn ensure_success(response: reqwest::Response) -> Result<(), WebdavError> {
        if response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(WebdavError::Status { status, body })
    }
}

impl WebdavError {
    pub fn classification(&self) -> Option<ErrorClass> {
        match self {
            WebdavError::Status { status, .. } => Some(classify_status(*status)),
            WebdavError::Request(err) if err.is_timeout() || err.is_connect() => {
                Some(ErrorClass::Transient)
            }
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ErrorClass::RateLimit | ErrorClass::Transient)
        )
    }
}

fn classify_status(status: StatusCode) -> ErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::LOCKED | StatusCode::TOO_EARLY
        )
    {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

fn describe_probe_error(err: &WebdavError) -> String {
    match err.classification() {
        Some(ErrorClass::Auth) => format!("authentication failed: {err}"),
        _ => match err {
            WebdavError::Status { status, .. } if *status == StatusCode::NOT_FOUND => {
                format!("remote root not found: {err}")
            }
            _ => format!("server unreachable: {err}"),
        },
    }
}

/// Maps a multistatus href onto a child name relative to the listed
/// collection. The collection's own entry yields `None`.
fn relative_name(collection_path: &str, href: &str) -> Option<String> {
    let href_path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.to_string(),
    };
    let trimmed = href_path.trim_end_matches('/');
    let rest = trimmed.strip_prefix(collection_path)?;
    let name = rest.trim_start_matches('/');
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_name_skips_collection_itself() {
        assert_eq!(relative_name("/dav/sync", "/dav/sync/"), None);
        assert_eq!(
            relative_name("/dav/sync", "/dav/sync/a.json"),
            Some("a.json".to_string())
        );
    }

    #[test]
    fn relative_name_accepts_absolute_hrefs() {
        assert_eq!(
            relative_name("/dav/sync", "http://host/dav/sync/chunks/"),
            Some("chunks".to_string())
        );
    }

    #[test]
    fn relative_name_rejects_foreign_paths() {
        assert_eq!(relative_name("/dav/sync", "/dav/other/a.json"), None);
    }

    #[test]
    fn classify_distinguishes_auth_from_transient() {
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), ErrorClass::Auth);
        assert_eq!(classify_status(StatusCode::FORBIDDEN), ErrorClass::Auth);
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            ErrorClass::Transient
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            ErrorClass::RateLimit
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), ErrorClass::Permanent);
    }
}
