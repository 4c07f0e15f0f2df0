use serde::{Deserialize, Serialize};
use thiserror::Error;

pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

/// A non-success reply from the server.
#[derive(Debug, Error)]
#[error("HTTP error {status}: {body}")]
pub struct ApiError {
    pub status: reqwest::StatusCode,
    pub body: String,
}

impl ApiError {
    /// Stable error code from the JSON body, if there is one.
    pub fn code(&self) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.body).ok()?;
        value.get("code")?.as_str().map(str::to_string)
    }
}

// --- Browse types ---

#[derive(Debug, Deserialize)]
pub struct Listing {
    pub path: String,
    pub entries: Vec<DirEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
    pub modified: String,
}

#[derive(Debug, Serialize)]
struct PathRequest<'a> {
    path: &'a str,
}

#[derive(Debug, Serialize)]
struct MoveRequest<'a> {
    source: &'a str,
    destination: &'a str,
}

#[derive(Debug, Serialize)]
struct ZipRequest<'a> {
    paths: &'a [String],
}

// --- Upload types ---

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    path: &'a str,
    size: u64,
    resume: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    overwrite: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadView {
    pub upload_id: String,
    pub target_path: String,
    pub total_size: u64,
    pub received: u64,
    pub overwrite: bool,
    pub completed: bool,
}

/// `Content-Range` for the bytes `[start, start + len)` of a `total`-byte upload.
pub fn chunk_range(start: u64, len: u64, total: u64) -> String {
    if len == 0 {
        format!("bytes */{}", total)
    } else {
        format!("bytes {}-{}/{}", start, start + len - 1, total)
    }
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Check response status; on error, read body for detail message.
    async fn ensure_ok(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(ApiError { status, body }.into())
        }
    }

    /// URL of a shared file, with each path segment escaped.
    pub fn file_url(&self, remote: &str) -> anyhow::Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Server URL cannot carry a path: {}", self.base_url))?
            .pop_if_empty()
            .push("files")
            .extend(remote.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    pub async fn info(&self) -> anyhow::Result<serde_json::Value> {
        let resp = self
            .client
            .get(format!("{}/api/info", self.base_url))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn list(&self, path: &str) -> anyhow::Result<Listing> {
        let resp = self
            .client
            .get(format!("{}/api/list", self.base_url))
            .query(&[("path", path)])
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn mkdir(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        let resp = self
            .client
            .post(format!("{}/api/mkdir", self.base_url))
            .json(&PathRequest { path })
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn delete(&self, path: &str) -> anyhow::Result<serde_json::Value> {
        let resp = self
            .client
            .post(format!("{}/api/delete", self.base_url))
            .json(&PathRequest { path })
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn move_entry(
        &self,
        source: &str,
        destination: &str,
    ) -> anyhow::Result<serde_json::Value> {
        let resp = self
            .client
            .post(format!("{}/api/move", self.base_url))
            .json(&MoveRequest {
                source,
                destination,
            })
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    /// Start a download, optionally from `offset`. The caller inspects the
    /// status to tell a full (200) from a partial (206) reply.
    pub async fn download(&self, remote: &str, offset: u64) -> anyhow::Result<reqwest::Response> {
        let mut req = self.client.get(self.file_url(remote)?);
        if offset > 0 {
            req = req.header(reqwest::header::RANGE, format!("bytes={}-", offset));
        }
        let resp = req.send().await?;
        if resp.status() == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(resp);
        }
        Self::ensure_ok(resp).await
    }

    pub async fn zip(&self, paths: &[String]) -> anyhow::Result<reqwest::Response> {
        let resp = self
            .client
            .post(format!("{}/api/zip", self.base_url))
            .json(&ZipRequest { paths })
            .send()
            .await?;
        Self::ensure_ok(resp).await
    }

    pub async fn create_session(
        &self,
        path: &str,
        size: u64,
        resume: bool,
        overwrite: Option<bool>,
    ) -> anyhow::Result<UploadView> {
        let resp = self
            .client
            .post(format!("{}/api/upload/session", self.base_url))
            .json(&CreateSessionRequest {
                path,
                size,
                resume,
                overwrite,
            })
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn upload_chunk(
        &self,
        upload_id: &str,
        start: u64,
        total: u64,
        data: Vec<u8>,
    ) -> anyhow::Result<UploadView> {
        let range = chunk_range(start, data.len() as u64, total);
        let resp = self
            .client
            .put(format!("{}/api/upload/{}", self.base_url, upload_id))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_RANGE, range)
            .body(data)
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }

    pub async fn upload_status(&self, upload_id: &str) -> anyhow::Result<UploadView> {
        let resp = self
            .client
            .get(format!("{}/api/upload/{}/status", self.base_url, upload_id))
            .send()
            .await?;
        Ok(Self::ensure_ok(resp).await?.json().await?)
    }
}
