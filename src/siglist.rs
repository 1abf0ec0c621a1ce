/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! EFI_SIGNATURE_LIST parsing and writing (UEFI §32), the format of the
//! db/dbx/KEK security databases.

use uuid::{uuid, Uuid};

use crate::error::{Error, Result};

pub(crate) const SIG_TYPE_SHA256: Uuid = uuid!("c1c41626-504c-4092-aca9-41f936934328");
pub(crate) const SIG_TYPE_X509: Uuid = uuid!("a5c059a1-94e4-4aa7-87b5-ab155c2bf072");

/// EFI_SIGNATURE_LIST fixed header: type GUID + three u32 sizes.
const SIGLIST_HEADER_SIZE: usize = 0x1c;
/// Each signature entry starts with the owner GUID.
const SIG_OWNER_SIZE: u32 = 16;

const SIZE_SANE_MAX: u32 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SignatureKind {
    Sha256,
    X509,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignatureEntry {
    pub(crate) owner: Uuid,
    pub(crate) data: Vec<u8>,
}

impl SignatureEntry {
    /// For SHA-256 lists the entry data literally is the checksum;
    /// anything else is hashed.
    pub(crate) fn checksum(&self, kind: SignatureKind) -> String {
        if kind == SignatureKind::Sha256 {
            hex::encode(&self.data)
        } else {
            hex::encode(openssl::sha::sha256(&self.data))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignatureList {
    pub(crate) signature_type: Uuid,
    /// Vendor header, typically empty.
    pub(crate) header: Vec<u8>,
    pub(crate) signature_size: u32,
    pub(crate) entries: Vec<SignatureEntry>,
}

impl SignatureList {
    pub(crate) fn kind(&self) -> SignatureKind {
        if self.signature_type == SIG_TYPE_SHA256 {
            SignatureKind::Sha256
        } else if self.signature_type == SIG_TYPE_X509 {
            SignatureKind::X509
        } else {
            SignatureKind::Unknown
        }
    }

    pub(crate) fn serialize(&self) -> Result<Vec<u8>> {
        for entry in &self.entries {
            if entry.data.len() as u32 != self.signature_size - SIG_OWNER_SIZE {
                return Err(Error::InvalidData(format!(
                    "signature entry data is {} bytes, signature_size says {}",
                    entry.data.len(),
                    self.signature_size - SIG_OWNER_SIZE
                )));
            }
        }
        let list_size = SIGLIST_HEADER_SIZE
            + self.header.len()
            + self.entries.len() * self.signature_size as usize;
        let mut buf = Vec::with_capacity(list_size);
        buf.extend_from_slice(&self.signature_type.to_bytes_le());
        buf.extend_from_slice(&(list_size as u32).to_le_bytes());
        buf.extend_from_slice(&(self.header.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.signature_size.to_le_bytes());
        buf.extend_from_slice(&self.header);
        for entry in &self.entries {
            buf.extend_from_slice(&entry.owner.to_bytes_le());
            buf.extend_from_slice(&entry.data);
        }
        Ok(buf)
    }
}

fn parse_list(buf: &[u8], offset: &mut usize) -> Result<SignatureList> {
    let remaining = &buf[*offset..];
    if remaining.len() < SIGLIST_HEADER_SIZE {
        return Err(Error::InvalidData(
            "trailing bytes do not form a signature list".to_string(),
        ));
    }
    let signature_type = Uuid::from_bytes_le(remaining[0..16].try_into().unwrap());
    let list_size = u32::from_le_bytes(remaining[16..20].try_into().unwrap());
    let header_size = u32::from_le_bytes(remaining[20..24].try_into().unwrap());
    let signature_size = u32::from_le_bytes(remaining[24..28].try_into().unwrap());

    if list_size < SIGLIST_HEADER_SIZE as u32 || list_size > SIZE_SANE_MAX {
        return Err(Error::InvalidData(format!(
            "SignatureListSize invalid: 0x{list_size:x}"
        )));
    }
    if header_size > SIZE_SANE_MAX {
        return Err(Error::InvalidData(format!(
            "SignatureHeaderSize invalid: 0x{header_size:x}"
        )));
    }
    if signature_size < SIG_OWNER_SIZE {
        // an entry cannot even hold its owner GUID
        return Err(Error::Internal(format!(
            "SignatureSize invalid: 0x{signature_size:x}"
        )));
    }
    if signature_size > SIZE_SANE_MAX {
        return Err(Error::InvalidData(format!(
            "SignatureSize invalid: 0x{signature_size:x}"
        )));
    }
    if remaining.len() < list_size as usize {
        return Err(Error::InvalidData(
            "signature list overruns the payload".to_string(),
        ));
    }

    let payload_size = list_size
        .checked_sub(SIGLIST_HEADER_SIZE as u32 + header_size)
        .ok_or_else(|| Error::InvalidData("signature header overruns the list".to_string()))?;
    if payload_size % signature_size != 0 {
        return Err(Error::InvalidData(format!(
            "signature entries (0x{payload_size:x} bytes) do not fill the list evenly"
        )));
    }

    let header =
        remaining[SIGLIST_HEADER_SIZE..SIGLIST_HEADER_SIZE + header_size as usize].to_vec();
    let mut entries = Vec::with_capacity((payload_size / signature_size) as usize);
    let mut entry_off = SIGLIST_HEADER_SIZE + header_size as usize;
    for _ in 0..payload_size / signature_size {
        let owner = Uuid::from_bytes_le(remaining[entry_off..entry_off + 16].try_into().unwrap());
        let data = remaining[entry_off + 16..entry_off + signature_size as usize].to_vec();
        entries.push(SignatureEntry { owner, data });
        entry_off += signature_size as usize;
    }

    *offset += list_size as usize;
    Ok(SignatureList {
        signature_type,
        header,
        signature_size,
        entries,
    })
}

/// Parse a buffer of concatenated EFI_SIGNATURE_LISTs.
///
/// With `scan_for_first_list`, leading non-list bytes (the EFI variable
/// permissions word or an authenticated-update PKCS#7 wrapper) are skipped
/// by searching for the first SHA-256 type GUID.
pub(crate) fn parse_all(buf: &[u8], scan_for_first_list: bool) -> Result<Vec<SignatureList>> {
    let mut offset = 0usize;
    if scan_for_first_list {
        let needle = &SIG_TYPE_SHA256.to_bytes_le()[0..5];
        if let Some(found) = buf.windows(needle.len()).position(|w| w == needle) {
            log::debug!("found EFI_SIGNATURE_LIST @0x{found:x}");
            offset = found;
        }
    }
    let mut siglists = Vec::new();
    while offset < buf.len() {
        siglists.push(parse_list(buf, &mut offset)?);
    }
    Ok(siglists)
}

/// Whether any list holds an entry with this checksum.
pub(crate) fn contains_checksum(siglists: &[SignatureList], checksum: &str) -> bool {
    siglists.iter().any(|list| {
        let kind = list.kind();
        list.entries
            .iter()
            .any(|entry| entry.checksum(kind) == checksum)
    })
}

/// The identity checksum of the database: its final entry's SHA-256.
pub(crate) fn last_entry_checksum(siglists: &[SignatureList]) -> Option<String> {
    let list = siglists.iter().rev().find(|l| !l.entries.is_empty())?;
    let entry = list.entries.last()?;
    Some(entry.checksum(list.kind()))
}
