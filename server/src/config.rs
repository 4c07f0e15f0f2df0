use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const MIB: usize = 1024 * 1024;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Directory tree exposed to clients
    pub share_root: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    /// Upload records and staging files
    pub state_dir: PathBuf,
    /// Optional web UI assets (`index.html` + `/static`)
    pub static_dir: Option<PathBuf>,
    pub read_only: bool,
    /// Default for upload sessions that do not say whether to overwrite
    pub allow_overwrite: bool,
    /// Request body limit, which bounds a single upload chunk
    pub max_chunk_bytes: usize,
    /// Archives larger than this spill from memory to a temp file
    pub zip_spool_bytes: usize,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        Ok(Config {
            share_root: get("SHARE_ROOT").map(PathBuf::from),
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: get("PORT")
                .unwrap_or_else(|| "8000".to_string())
                .parse()?,
            state_dir: get("STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".shareport_state")),
            static_dir: get("STATIC_DIR").map(PathBuf::from),
            read_only: !get("READ_WRITE").as_deref().is_some_and(parse_flag),
            allow_overwrite: get("ALLOW_OVERWRITE").as_deref().is_some_and(parse_flag),
            max_chunk_bytes: match get("MAX_CHUNK_BYTES") {
                Some(v) => v.parse()?,
                None => 64 * MIB,
            },
            zip_spool_bytes: match get("ZIP_SPOOL_BYTES") {
                Some(v) => v.parse()?,
                None => 64 * MIB,
            },
        })
    }

    pub fn share_root(&self) -> anyhow::Result<&Path> {
        self.share_root
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No share root configured (set SHARE_ROOT or pass --share-root)"))
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        };
        Ok(addr.parse()?)
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
