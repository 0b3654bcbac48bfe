// Copyright 2026 U.S. Federal Government (in countries where recognized)
// SPDX-License-Identifier: Apache-2.0

//! The daemon's JSON configuration document.
//!
//! ```json
//! {
//!   "clientMode": { "enabled": true, "servers": [ ... ], ... },
//!   "serverMode": { "enabled": true, "listeners": [ ... ], ... }
//! }
//! ```
//!
//! Loading is two-phase: structural deserialization, then range/token
//! validation that aggregates every diagnostic so a broken config reports
//! all its problems at once.

use std::path::Path;

use serde::Deserialize;

use fptp_client::config::{ClientModeConfig, ResolvedClientMode};
use fptp_server::config::{ResolvedServerMode, ServerModeConfig};

/// The top-level configuration document.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Client-mode section.
    pub client_mode: Option<ClientModeConfig>,
    /// Server-mode section.
    pub server_mode: Option<ServerModeConfig>,
}

/// The validated runtime configuration.
#[derive(Debug)]
pub struct ResolvedConfig {
    /// Client mode, when configured.
    pub client: Option<ResolvedClientMode>,
    /// Server mode, when configured.
    pub server: Option<ResolvedServerMode>,
}

impl Config {
    /// Read and parse the document at `path`.
    pub fn load(path: &Path) -> Result<Config, Vec<String>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| vec![format!("could not read {}: {e}", path.display())])?;
        Config::from_json(&text)
    }

    /// Parse a document from a JSON string.
    pub fn from_json(text: &str) -> Result<Config, Vec<String>> {
        serde_json::from_str(text).map_err(|e| vec![format!("invalid configuration: {e}")])
    }

    /// Validate both sections, aggregating diagnostics.
    pub fn resolve(&self) -> Result<ResolvedConfig, Vec<String>> {
        let mut errs = Vec::new();

        let client = match &self.client_mode {
            Some(section) => match section.resolve() {
                Ok(resolved) => Some(resolved),
                Err(mut section_errs) => {
                    errs.append(&mut section_errs);
                    None
                }
            },
            None => None,
        };

        let server = match &self.server_mode {
            Some(section) => match section.resolve() {
                Ok(resolved) => Some(resolved),
                Err(mut section_errs) => {
                    errs.append(&mut section_errs);
                    None
                }
            },
            None => None,
        };

        if !errs.is_empty() {
            return Err(errs);
        }
        Ok(ResolvedConfig { client, server })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_document() {
        let config = Config::from_json(
            r#"{
                "clientMode": {
                    "enabled": true,
                    "servers": [ { "dstAddress": "10.0.1.2", "srcInterface": "eth0" } ]
                },
                "serverMode": {
                    "enabled": true,
                    "listeners": [ { "interface": "eth0", "utcOffset": 37 } ]
                }
            }"#,
        )
        .unwrap();
        let resolved = config.resolve().unwrap();
        assert!(resolved.client.is_some());
        assert!(resolved.server.is_some());
    }

    #[test]
    fn test_empty_document() {
        let config = Config::from_json("{}").unwrap();
        let resolved = config.resolve().unwrap();
        assert!(resolved.client.is_none());
        assert!(resolved.server.is_none());
    }

    #[test]
    fn test_errors_from_both_sections_aggregate() {
        let config = Config::from_json(
            r#"{
                "clientMode": {
                    "servers": [ { "dstAddress": "bogus", "srcInterface": "eth0" } ]
                },
                "serverMode": { "clockAccuracy": "0x99" }
            }"#,
        )
        .unwrap();
        let errs = config.resolve().unwrap_err();
        assert!(errs.iter().any(|e| e.contains("dstAddress")));
        assert!(errs.iter().any(|e| e.contains("clockAccuracy")));
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(Config::from_json("{ nope").is_err());
    }
}
