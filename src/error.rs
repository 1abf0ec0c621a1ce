/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

use std::io;

/// The error surface shared by the whole capsule core.
///
/// Callers that need to distinguish outcomes (e.g. "this platform simply
/// cannot do that" versus "the payload was garbage") match on the variant;
/// the CLI layer wraps these in `anyhow` for display.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// The platform lacks EFI, the variable store is not mounted writable,
    /// or the operation is unavailable on this firmware.
    #[error("not supported: {0}")]
    NotSupported(String),
    /// A requested variable or target GUID does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The capsule payload is malformed.
    #[error("invalid file: {0}")]
    InvalidFile(String),
    /// An EFI variable's contents are corrupt.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// Secure Boot is enabled but shim is not installed where expected.
    #[error("broken system: {0}")]
    BrokenSystem(String),
    /// The operation would leave the system unbootable until the user
    /// intervenes, e.g. a dbx update revoking the installed bootloader.
    #[error("needs user action: {0}")]
    NeedsUserAction(String),
    /// A programming-error invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
    /// An ESP or variable write failed.
    #[error("write failed: {0}")]
    Write(String),
    /// efivarfs refused the write, typically an immutable flag issue.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Classify an I/O failure, keeping the path or operation in the message.
    pub(crate) fn from_io(what: impl AsRef<str>, err: io::Error) -> Self {
        let msg = format!("{}: {err}", what.as_ref());
        match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound(msg),
            io::ErrorKind::PermissionDenied => Error::PermissionDenied(msg),
            _ => Error::Write(msg),
        }
    }

    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub(crate) fn is_not_supported(&self) -> bool {
        matches!(self, Error::NotSupported(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_classification() {
        let e = Error::from_io(
            "/nonexistent",
            io::Error::new(io::ErrorKind::NotFound, "enoent"),
        );
        assert!(e.is_not_found());
        let e = Error::from_io(
            "efivarfs",
            io::Error::new(io::ErrorKind::PermissionDenied, "eperm"),
        );
        assert!(matches!(e, Error::PermissionDenied(_)));
        let e = Error::from_io("esp", io::Error::other("short write"));
        assert!(matches!(e, Error::Write(_)));
    }
}
