/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! The dbx revocation database device: a virtual child of the system
//! firmware whose payloads are KEK-signed signature list appends.

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;

use crate::authenticode;
use crate::efivars::{self, Efivars};
use crate::error::{Error, Result};
use crate::esp::EspVolume;
use crate::siglist::{self, SignatureList};
use crate::snapd::SnapdNotifier;

/// Attributes for dbx appends: the payload is an authenticated variable
/// update signed by a KEK, relayed as-is.
const DBX_WRITE_ATTRS: u32 = efivars::ATTR_APPEND_WRITE
    | efivars::ATTR_TIME_BASED_AUTHENTICATED_WRITE_ACCESS
    | efivars::ATTR_RUNTIME_ACCESS
    | efivars::ATTR_BOOTSERVICE_ACCESS
    | efivars::ATTR_NON_VOLATILE;

/// The reported identity of the installed dbx: its final entry's SHA-256.
pub(crate) fn ensure_checksum(efivars: &dyn Efivars) -> Result<Option<String>> {
    let blob = efivars.get_data_bytes(&efivars::GUID_SECURITY_DATABASE, "dbx")?;
    let siglists = siglist::parse_all(&blob, false)?;
    Ok(siglist::last_entry_checksum(&siglists))
}

/// Every EFI executable on the ESP: first-stage shim and the second-stage
/// loaders behind it.
pub(crate) fn esp_executables(esp_mount: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut files = Vec::new();
    for entry in WalkDir::new(esp_mount.join("EFI"))
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(path) = Utf8Path::from_path(entry.path()) else {
            continue;
        };
        let is_efi = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("efi"))
            .unwrap_or(false);
        if is_efi {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    files
}

/// Assert that no currently-bootable ESP binary is revoked by the new dbx.
///
/// Binaries we cannot parse are skipped with a debug log; only a positive
/// Authenticode match fails, with NeedsUserAction so the user knows to
/// update shim/grub first.
pub(crate) fn validate_esp(esp: &EspVolume, siglists: &[SignatureList]) -> Result<()> {
    for fn_ in esp_executables(&esp.mount_point) {
        let buf = match std::fs::read(&fn_) {
            Ok(buf) => buf,
            Err(e) => {
                log::debug!("failed to read {fn_}: {e}");
                continue;
            }
        };
        let checksum = match authenticode::authenticode_sha256(&buf) {
            Ok(digest) => hex::encode(digest),
            Err(e) => {
                log::debug!("failed to get checksum for {fn_}: {e}");
                continue;
            }
        };
        log::debug!("fn={fn_}, checksum={checksum}");
        if siglist::contains_checksum(siglists, &checksum) {
            return Err(Error::NeedsUserAction(format!(
                "{fn_} Authenticode checksum [{checksum}] is present in dbx"
            )));
        }
    }
    Ok(())
}

/// Parse and safety-check a dbx update payload before anything is written.
pub(crate) fn prepare(esp: &EspVolume, payload: &[u8], force: bool) -> Result<Vec<SignatureList>> {
    // signed payloads carry a PKCS#7 wrapper in front of the first list
    let siglists = siglist::parse_all(payload, true)
        .map_err(|e| Error::InvalidFile(format!("cannot parse DBX update: {e}")))?;
    if siglists.is_empty() {
        return Err(Error::InvalidFile(
            "DBX update contains no signature lists".to_string(),
        ));
    }
    if !force {
        validate_esp(esp, &siglists).map_err(|e| match e {
            Error::NeedsUserAction(msg) => Error::NeedsUserAction(format!(
                "Blocked executable in the ESP, ensure grub and shim are up to date: {msg}"
            )),
            other => other,
        })?;
    }
    Ok(siglists)
}

/// Relay the signed payload into the dbx variable, bracketing the write
/// with snapd notifications when the integration is active.
pub(crate) fn write(
    efivars: &dyn Efivars,
    payload: &[u8],
    notifier: Option<&SnapdNotifier>,
) -> Result<Option<String>> {
    if let Some(notifier) = notifier {
        notifier.dbx_update_prepare(payload)?;
    }
    efivars.set_data(
        &efivars::GUID_SECURITY_DATABASE,
        "dbx",
        payload,
        DBX_WRITE_ATTRS,
    )?;
    if let Some(notifier) = notifier {
        notifier.dbx_update_cleanup()?;
    }

    // the reported identity follows the newly appended entries
    ensure_checksum(efivars)
}
