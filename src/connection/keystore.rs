//! # Credential Staging
//!
//! TLS and OAuth2 constructors want file paths. Connection settings may carry
//! either plain paths or structured file objects (`{"content": "...base64,<data>"}`).
//! Structured objects are decoded into a private temp directory that lives as
//! long as the [`Keystore`]; plain paths are passed through untouched.
//!
//! When any credential setting is a plain path, nothing is staged and every
//! setting is treated as a path.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use tempfile::TempDir;
use tracing::debug;

use crate::config::ConnectionSettings;
use crate::error::{ConnectorError, Result};

pub const CA_CERT_FILE: &str = "cacert.pem";
pub const CERT_FILE: &str = "certfile.pem";
pub const KEY_FILE: &str = "keyfile.pem";
pub const PRIVATE_KEY_FILE: &str = "privateKey.json";

const BASE64_HEADER: &str = "base64,";

/// Staged credential files; removed from disk on [`release`](Keystore::release) or drop
#[derive(Debug, Default)]
pub struct Keystore {
    dir: Option<TempDir>,
}

impl Keystore {
    /// A keystore with nothing staged
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn stage(settings: &ConnectionSettings) -> Result<Self> {
        if !settings.has_credential_material() {
            return Ok(Self::empty());
        }

        let dir = tempfile::Builder::new().prefix("pulsar").tempdir()?;
        debug!(dir = %dir.path().display(), "Staging connection credentials");

        let entries = [
            (&settings.ca_cert, CA_CERT_FILE),
            (&settings.cert_file, CERT_FILE),
            (&settings.key_file, KEY_FILE),
            (&settings.private_key, PRIVATE_KEY_FILE),
        ];

        let mut all_structured = true;
        for (value, file_name) in entries {
            if value.is_empty() {
                continue;
            }
            match serde_json::from_str::<serde_json::Value>(value) {
                Ok(serde_json::Value::Object(object)) => {
                    if let Some(bytes) = decode_file_setting(&object)? {
                        fs::write(dir.path().join(file_name), bytes)?;
                    }
                }
                _ => all_structured = false,
            }
        }

        if !all_structured {
            debug!("Credential settings reference files directly; discarding staging directory");
            dir.close()?;
            return Ok(Self::empty());
        }

        Ok(Self { dir: Some(dir) })
    }

    pub fn is_staged(&self) -> bool {
        self.dir.is_some()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }

    /// Path of a staged file, whether or not it was written
    pub fn file(&self, name: &str) -> Option<PathBuf> {
        self.dir().map(|dir| dir.join(name))
    }

    /// Remove staged files now
    pub fn release(&mut self) -> Result<()> {
        if let Some(dir) = self.dir.take() {
            debug!(dir = %dir.path().display(), "Removing staged credentials");
            dir.close()?;
        }
        Ok(())
    }
}

fn decode_file_setting(object: &serde_json::Map<String, serde_json::Value>) -> Result<Option<Vec<u8>>> {
    let content = object
        .get("content")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    if content.is_empty() {
        return Ok(None);
    }

    let Some(start) = content.find(BASE64_HEADER) else {
        return Err(ConnectorError::credential(
            "file based setting not formatted correctly",
        ));
    };

    let encoded = &content[start + BASE64_HEADER.len()..];
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map(Some)
        .map_err(|e| {
            ConnectorError::credential(format!("file based setting not base64 encoded: [{e}]"))
        })
}
