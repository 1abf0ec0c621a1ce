/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! The ACPI `UEFI` table, used to decide whether Capsule-on-Disk actually
//! works on InsydeH2O firmware.

use std::path::Path;

use uuid::{uuid, Uuid};

use crate::error::{Error, Result};

/// The UEFI table GUID Insyde firmware uses for its quirk block.
const INSYDE_GUID: Uuid = uuid!("9d4bf935-a674-4710-ba02-bf0aa1758c7b");

const INSYDE_QUIRK_COD_WORKING: u32 = 0x1;

/// ACPI SDT header size; the table body starts after it.
const SDT_HEADER_SIZE: usize = 36;

#[derive(Debug, Default)]
pub(crate) struct AcpiUefi {
    is_insyde: bool,
    insyde_cod_status: u32,
}

impl AcpiUefi {
    /// Parse `/sys/firmware/acpi/tables/UEFI`.
    pub(crate) fn load(sysfs_fw_dir: &Path) -> Result<Self> {
        let fn_ = sysfs_fw_dir.join("acpi/tables/UEFI");
        let buf = std::fs::read(&fn_).map_err(|e| Error::from_io(fn_.display().to_string(), e))?;
        Self::parse(&buf)
    }

    pub(crate) fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < SDT_HEADER_SIZE + 16 {
            return Err(Error::InvalidData(format!(
                "ACPI UEFI table too small: {} bytes",
                buf.len()
            )));
        }
        let signature = &buf[0..4];
        if signature != b"UEFI" {
            return Err(Error::NotSupported(format!(
                "not a UEFI table, got {}",
                String::from_utf8_lossy(signature)
            )));
        }
        let guid = Uuid::from_bytes_le(buf[0x24..0x34].try_into().unwrap());
        let mut table = AcpiUefi {
            is_insyde: guid == INSYDE_GUID,
            insyde_cod_status: 0,
        };
        if table.is_insyde {
            if let Err(e) = table.parse_insyde(buf) {
                log::debug!("{e}");
            }
        }
        Ok(table)
    }

    /// `$QUIRK` block: 6-byte signature, u32 size, u32 flags.
    fn parse_insyde(&mut self, buf: &[u8]) -> Result<()> {
        let needle = b"$QUIRK";
        let offset = buf
            .windows(needle.len())
            .position(|w| w == needle)
            .ok_or_else(|| Error::NotFound("$QUIRK not found".to_string()))?;
        if buf.len() < offset + 14 {
            return Err(Error::InvalidData("$QUIRK structure is truncated".to_string()));
        }
        let size = u32::from_le_bytes(buf[offset + 6..offset + 10].try_into().unwrap());
        if (size as usize) < 14 {
            return Err(Error::InvalidData("$QUIRK structure is too small".to_string()));
        }
        let flags = u32::from_le_bytes(buf[offset + 10..offset + 14].try_into().unwrap());
        self.insyde_cod_status = flags & INSYDE_QUIRK_COD_WORKING;
        Ok(())
    }

    /// Whether Capsule-on-Disk can be trusted on this firmware.  Non-Insyde
    /// tables never veto it.
    pub(crate) fn cod_functional(&self) -> Result<()> {
        if !self.is_insyde || self.insyde_cod_status > 0 {
            return Ok(());
        }
        Err(Error::NotSupported(
            "Capsule-on-Disk may have a firmware bug".to_string(),
        ))
    }

    /// InsydeH2O needs the indexed CapsuleUpdateFile%04X.bin naming.
    pub(crate) fn cod_indexed_filename(&self) -> bool {
        self.is_insyde
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_table(guid: Uuid, quirk_flags: Option<u32>) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"UEFI");
        buf.extend_from_slice(&[0u8; SDT_HEADER_SIZE - 4]);
        buf.extend_from_slice(&guid.to_bytes_le());
        buf.extend_from_slice(&[0u8; 2]); // DataOffset
        if let Some(flags) = quirk_flags {
            buf.extend_from_slice(b"$QUIRK");
            buf.extend_from_slice(&14u32.to_le_bytes());
            buf.extend_from_slice(&flags.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_non_insyde_is_functional() -> Result<()> {
        let table = AcpiUefi::parse(&build_table(Uuid::nil(), None))?;
        table.cod_functional()?;
        assert!(!table.cod_indexed_filename());
        Ok(())
    }

    #[test]
    fn test_insyde_without_working_bit_vetoes_cod() -> Result<()> {
        let table = AcpiUefi::parse(&build_table(INSYDE_GUID, Some(0)))?;
        assert!(table.cod_functional().unwrap_err().is_not_supported());
        assert!(table.cod_indexed_filename());
        Ok(())
    }

    #[test]
    fn test_insyde_with_working_bit() -> Result<()> {
        let table = AcpiUefi::parse(&build_table(INSYDE_GUID, Some(1)))?;
        table.cod_functional()?;
        Ok(())
    }

    #[test]
    fn test_wrong_signature() {
        let mut buf = build_table(Uuid::nil(), None);
        buf[0..4].copy_from_slice(b"BGRT");
        assert!(AcpiUefi::parse(&buf).is_err());
    }
}
