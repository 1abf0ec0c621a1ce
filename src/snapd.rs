/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Notifies snapd around dbx writes so snapd-managed FDE can reseal
//! against the new PCR7 values.
//!
//! snapd speaks HTTP over a Unix socket; the requests here are small
//! one-shot JSON POSTs, so this writes HTTP/1.1 directly on the stream
//! rather than pulling in an HTTP client that cannot talk AF_UNIX.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;

use crate::error::{Error, Result};

const SNAPD_ENDPOINT: &str = "/v2/system-secureboot";
const SNAPD_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) struct SnapdNotifier {
    socket_path: PathBuf,
}

impl SnapdNotifier {
    /// The socket path differs inside the snap sandbox.
    pub(crate) fn new() -> Self {
        let socket = if std::env::var_os("SNAP").is_some() {
            "/run/snapd-snap.socket"
        } else {
            "/run/snapd.socket"
        };
        Self::with_socket(socket)
    }

    pub(crate) fn with_socket(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub(crate) fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    fn request(&self, body: &serde_json::Value) -> Result<()> {
        let stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            Error::Internal(format!(
                "failed to communicate with snapd at {}: {e}",
                self.socket_path.display()
            ))
        })?;
        stream.set_read_timeout(Some(SNAPD_TIMEOUT)).ok();
        stream.set_write_timeout(Some(SNAPD_TIMEOUT)).ok();
        let payload = body.to_string();
        let mut stream = stream;
        let request = format!(
            "POST {SNAPD_ENDPOINT} HTTP/1.1\r\n\
             Host: localhost\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\r\n{payload}",
            payload.len()
        );
        stream
            .write_all(request.as_bytes())
            .map_err(|e| Error::Internal(format!("failed to send snapd request: {e}")))?;

        let mut response = String::new();
        stream
            .read_to_string(&mut response)
            .map_err(|e| Error::Internal(format!("failed to read snapd response: {e}")))?;
        let status = parse_status_line(&response)?;
        if status == 404 {
            return Err(Error::NotSupported(
                "snapd notification endpoint not supported by snapd API".to_string(),
            ));
        }
        if !(200..300).contains(&status) {
            let body = response
                .split_once("\r\n\r\n")
                .map(|(_, b)| b)
                .unwrap_or_default();
            log::info!("snapd request failed with status {status}, response: {body}");
            return Err(Error::Internal(format!(
                "snapd request failed with status {status}"
            )));
        }
        Ok(())
    }

    /// Tell snapd the dbx manager is running; a 404 means the integration
    /// is absent on this system.
    pub(crate) fn dbx_manager_startup(&self) -> Result<()> {
        self.request(&json!({"action": "efi-secureboot-update-startup"}))
            .map_err(|e| prefix(e, "failed to notify snapd of startup"))
    }

    /// Announce an imminent dbx write; snapd starts tracking the change.
    pub(crate) fn dbx_update_prepare(&self, payload: &[u8]) -> Result<()> {
        let b64 = openssl::base64::encode_block(payload);
        self.request(&json!({
            "action": "efi-secureboot-update-db-prepare",
            "key-database": "DBX",
            "payload": b64,
        }))
        .map_err(|e| prefix(e, "failed to notify snapd of prepare"))
    }

    /// Complete the change opened by [`Self::dbx_update_prepare`].
    pub(crate) fn dbx_update_cleanup(&self) -> Result<()> {
        self.request(&json!({"action": "efi-secureboot-update-db-cleanup"}))
            .map_err(|e| prefix(e, "failed to notify snapd of cleanup"))
    }
}

fn prefix(e: Error, msg: &str) -> Error {
    match e {
        Error::NotSupported(inner) => Error::NotSupported(format!("{msg}: {inner}")),
        Error::Internal(inner) => Error::Internal(format!("{msg}: {inner}")),
        other => other,
    }
}

fn parse_status_line(response: &str) -> Result<u32> {
    let line = response
        .lines()
        .next()
        .ok_or_else(|| Error::Internal("empty response from snapd".to_string()))?;
    let mut parts = line.split_whitespace();
    let proto = parts
        .next()
        .ok_or_else(|| Error::Internal("malformed snapd status line".to_string()))?;
    if !proto.starts_with("HTTP/1.") {
        return Err(Error::Internal(format!(
            "unexpected protocol from snapd: {proto}"
        )));
    }
    parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| Error::Internal(format!("malformed snapd status line: {line}")))
}
