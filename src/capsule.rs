/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Capsule staging: header fixup, writing the payload onto the ESP, and
//! composing the UPDATE_INFO variable that binds the two together.

use camino::{Utf8Path, Utf8PathBuf};
use uuid::{uuid, Uuid};

use crate::device::CapsuleTarget;
use crate::efidp::DevicePathNode;
use crate::efivars::{self, Efivars};
use crate::error::{Error, Result};
use crate::esp::{self, EspVolume};
use crate::updateinfo::{UpdateInfo, UpdateInfoStatus};

/// Firmware Management Protocol capsule wrapper; payloads starting with
/// this GUID are complete capsules already.
pub(crate) const FMP_CAPSULE_GUID: Uuid = uuid!("6dcbd5ed-e82d-4c44-bda1-7194199ad92a");

pub(crate) const CAPSULE_FLAGS_PERSIST_ACROSS_RESET: u32 = 0x0001_0000;

/// EFI_CAPSULE_HEADER, 28 packed bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CapsuleHeader {
    pub(crate) guid: Uuid,
    pub(crate) header_size: u32,
    pub(crate) flags: u32,
    pub(crate) image_size: u32,
}

pub(crate) const CAPSULE_HEADER_SIZE: usize = 28;

impl CapsuleHeader {
    pub(crate) fn serialize(&self) -> [u8; CAPSULE_HEADER_SIZE] {
        let mut buf = [0u8; CAPSULE_HEADER_SIZE];
        buf[0..16].copy_from_slice(&self.guid.to_bytes_le());
        buf[16..20].copy_from_slice(&self.header_size.to_le_bytes());
        buf[20..24].copy_from_slice(&self.flags.to_le_bytes());
        buf[24..28].copy_from_slice(&self.image_size.to_le_bytes());
        buf
    }

    pub(crate) fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < CAPSULE_HEADER_SIZE {
            return Err(Error::InvalidFile(format!(
                "capsule header needs {CAPSULE_HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        Ok(CapsuleHeader {
            guid: Uuid::from_bytes_le(buf[0..16].try_into().unwrap()),
            header_size: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            flags: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            image_size: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
        })
    }
}

/// Make sure the payload is a well-formed capsule.
///
/// Payloads already carrying the target GUID or the FMP wrapper pass
/// through untouched; anything else gets a synthesized header padded to
/// `header_size` (a page, so the firmware can reuse the allocation).
pub(crate) fn fixup_firmware(
    target: &mut CapsuleTarget,
    fw: &[u8],
    header_size: usize,
) -> Result<Vec<u8>> {
    target.missing_header = false;

    // GUID is the first 16 bytes
    if fw.len() < 16 {
        return Err(Error::InvalidFile("invalid payload".to_string()));
    }
    let guid = Uuid::from_bytes_le(fw[0..16].try_into().unwrap());
    if guid == target.firmware_class {
        log::debug!("ESRT matches payload GUID");
        return Ok(fw.to_vec());
    }
    if guid == FMP_CAPSULE_GUID || target.flags.no_capsule_header_fixup {
        return Ok(fw.to_vec());
    }

    log::info!("missing or invalid embedded capsule header");
    target.missing_header = true;
    let header = CapsuleHeader {
        guid: target.firmware_class,
        header_size: header_size as u32,
        flags: target.capsule_flags,
        image_size: (fw.len() + header_size) as u32,
    };
    let mut buf = Vec::with_capacity(header_size + fw.len());
    buf.extend_from_slice(&header.serialize());
    buf.resize(header_size, 0);
    buf.extend_from_slice(fw);
    Ok(buf)
}

/// What must be free on the ESP before we stage anything.
pub(crate) fn required_free_space(configured: u64, fw_len: u64) -> u64 {
    if configured != 0 {
        return configured;
    }
    let fallback = fw_len * 2 + 20 * 1024 * 1024;
    log::info!(
        "required ESP free space is not configured, using 2 x {}MB + 20MB",
        fw_len / (1024 * 1024)
    );
    fallback
}

pub(crate) fn capsule_basename(guid: &Uuid) -> String {
    format!("fwupd-{guid}.cap")
}

pub(crate) fn page_size() -> usize {
    // SAFETY: sysconf has no side effects
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz <= 0 {
        4096
    } else {
        sz as usize
    }
}

/// Stage the capsule at `EFI/<os_dir>/fw/fwupd-<GUID>.cap`.
///
/// The ESP free-space check runs before any byte is written; nothing lands
/// on the ESP when it fails.  Returns the ESP-relative path of the staged
/// file.
pub(crate) fn stage_capsule(
    esp: &EspVolume,
    target: &mut CapsuleTarget,
    payload: &[u8],
    require_esp_free_space: u64,
) -> Result<Utf8PathBuf> {
    let required = required_free_space(require_esp_free_space, payload.len() as u64);
    esp.check_free_space(required)?;

    let fixed = fixup_firmware(target, payload, page_size())?;
    let directory = esp::esp_path_for_os(&esp.mount_point);
    let capsule_path = directory
        .join("fw")
        .join(capsule_basename(&target.firmware_class));
    esp.write_target(&capsule_path, &fixed)?;
    log::debug!("staged capsule at {capsule_path}");
    Ok(capsule_path)
}

/// Write the UPDATE_INFO variable pointing the pre-boot updater at a
/// staged capsule.  `varname` and `guid` differ from the target's own for
/// the UX splash binding.
pub(crate) fn write_update_info(
    efivars: &dyn Efivars,
    esp: &EspVolume,
    target: &CapsuleTarget,
    capsule_path: &Utf8Path,
    varname: &str,
    guid: Uuid,
) -> Result<()> {
    let device_path = vec![
        DevicePathNode::HardDrive(esp.hard_drive_node()),
        DevicePathNode::file_path(esp::to_uefi_path(capsule_path))?,
    ];
    let info = UpdateInfo::new(
        guid,
        target.capsule_flags,
        target.hardware_instance,
        UpdateInfoStatus::AttemptUpdate,
        device_path,
    );
    efivars
        .set_data(
            &efivars::GUID_FWUPDATE,
            varname,
            &info.serialize()?,
            efivars::ATTR_DEFAULT,
        )
        .map_err(|e| Error::Write(format!("could not set {varname} for {capsule_path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TargetKind;

    const GUID: Uuid = uuid!("ddc0ee61-e7f0-4e7d-acc5-c070a398838e");

    fn target() -> CapsuleTarget {
        let mut t = CapsuleTarget::new(GUID, TargetKind::SystemFirmware);
        t.capsule_flags = 0xfe;
        t
    }

    #[test]
    fn test_fixup_passthrough() -> Result<()> {
        let mut t = target();
        let mut payload = GUID.to_bytes_le().to_vec();
        payload.extend_from_slice(&[0xAA; 100]);
        let fixed = fixup_firmware(&mut t, &payload, 4096)?;
        // idempotence: a payload already carrying the ESRT GUID is untouched
        assert_eq!(fixed, payload);
        assert!(!t.missing_header);
        Ok(())
    }

    #[test]
    fn test_fixup_fmp_passthrough() -> Result<()> {
        let mut t = target();
        let mut payload = FMP_CAPSULE_GUID.to_bytes_le().to_vec();
        payload.extend_from_slice(&[0xBB; 64]);
        assert_eq!(fixup_firmware(&mut t, &payload, 4096)?, payload);
        assert!(!t.missing_header);
        Ok(())
    }

    #[test]
    fn test_fixup_synthesizes_header() -> Result<()> {
        let mut t = target();
        let payload = vec![0xCC; 100];
        let fixed = fixup_firmware(&mut t, &payload, 4096)?;
        assert!(t.missing_header);
        assert_eq!(fixed.len(), 4096 + 100);
        let header = CapsuleHeader::parse(&fixed)?;
        assert_eq!(header.guid, GUID);
        assert_eq!(header.header_size, 4096);
        assert_eq!(header.flags, 0xfe);
        // completeness: image_size equals the file's total length
        assert_eq!(header.image_size as usize, fixed.len());
        // padding is zeroed, payload follows
        assert!(fixed[CAPSULE_HEADER_SIZE..4096].iter().all(|&b| b == 0));
        assert_eq!(&fixed[4096..], &payload[..]);
        Ok(())
    }

    #[test]
    fn test_fixup_flag_disables() -> Result<()> {
        let mut t = target();
        t.flags.no_capsule_header_fixup = true;
        let payload = vec![0xDD; 32];
        assert_eq!(fixup_firmware(&mut t, &payload, 4096)?, payload);
        Ok(())
    }

    #[test]
    fn test_fixup_short_payload() {
        let mut t = target();
        assert!(matches!(
            fixup_firmware(&mut t, &[0u8; 8], 4096),
            Err(Error::InvalidFile(_))
        ));
    }

    #[test]
    fn test_required_free_space() {
        assert_eq!(required_free_space(12345, 1000), 12345);
        assert_eq!(
            required_free_space(0, 4 * 1024 * 1024),
            8 * 1024 * 1024 + 20 * 1024 * 1024
        );
    }

    #[test]
    fn test_capsule_header_roundtrip() -> Result<()> {
        let header = CapsuleHeader {
            guid: GUID,
            header_size: 4096,
            flags: CAPSULE_FLAGS_PERSIST_ACROSS_RESET,
            image_size: 5000,
        };
        assert_eq!(CapsuleHeader::parse(&header.serialize())?, header);
        Ok(())
    }
}
