/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! EFI boot manager handling: load options, the fwupd BootXXXX entry,
//! BootNext arming, and the shim SBAT safety check.

use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};

use crate::device::TargetFlags;
use crate::efidp::{self, DevicePathNode};
use crate::efivars::{self, Efivars};
use crate::error::{Error, Result};
use crate::esp::{self, EspVolume};
use crate::esrt;
use crate::ucs2;

/// Description of the boot entry that chain-loads the updater.
pub(crate) const BOOTMGR_DESC: &str = "Linux Firmware Updater";
/// Some legacy devices deduplicate against the old hyphenated name.
pub(crate) const BOOTMGR_DESC_LEGACY: &str = "Linux-Firmware-Updater";

pub(crate) const LOAD_OPTION_ACTIVE: u32 = 1 << 0;

/// One EFI_LOAD_OPTION, the payload of a `Boot%04X` variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BootEntry {
    pub(crate) attributes: u32,
    pub(crate) description: String,
    pub(crate) device_path: Vec<DevicePathNode>,
    /// Consumed by shim to find the next binary to load.
    pub(crate) optional_data: Vec<u8>,
}

impl BootEntry {
    pub(crate) fn serialize(&self) -> Result<Vec<u8>> {
        let dp = efidp::serialize(&self.device_path)?;
        if dp.len() > u16::MAX as usize {
            return Err(Error::InvalidData(
                "device path list too long for a load option".to_string(),
            ));
        }
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.attributes.to_le_bytes());
        buf.extend_from_slice(&(dp.len() as u16).to_le_bytes());
        buf.extend_from_slice(&ucs2::utf8_to_ucs2(&self.description)?);
        buf.extend_from_slice(&dp);
        buf.extend_from_slice(&self.optional_data);
        Ok(buf)
    }

    pub(crate) fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < 6 {
            return Err(Error::InvalidData("load option is truncated".to_string()));
        }
        let attributes = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let dp_len = u16::from_le_bytes([buf[4], buf[5]]) as usize;

        // scan for the description's UCS-2 nul terminator
        let mut offset = 6;
        loop {
            if buf.len() < offset + 2 {
                return Err(Error::InvalidData(
                    "load option description is unterminated".to_string(),
                ));
            }
            if buf[offset] == 0 && buf[offset + 1] == 0 {
                break;
            }
            offset += 2;
        }
        let description = ucs2::ucs2_to_string(&buf[6..offset + 2]);
        offset += 2;

        if buf.len() < offset + dp_len {
            return Err(Error::InvalidData(
                "load option device path overruns the variable".to_string(),
            ));
        }
        let device_path = efidp::parse(&buf[offset..offset + dp_len])?;
        let optional_data = buf[offset + dp_len..].to_vec();
        Ok(BootEntry {
            attributes,
            description,
            device_path,
            optional_data,
        })
    }

    fn is_fwupd(&self) -> bool {
        self.description == BOOTMGR_DESC || self.description == BOOTMGR_DESC_LEGACY
    }
}

/// Parse the slot out of a `Boot%04X` variable name.
pub(crate) fn parse_slot_name(name: &str) -> Option<u16> {
    let re = regex::Regex::new(r"^Boot([0-9A-F]{4})$").unwrap();
    let caps = re.captures(name)?;
    u16::from_str_radix(&caps[1], 16).ok()
}

/// Fetch and parse one `Boot%04X` entry.
pub(crate) fn get_boot_entry(efivars: &dyn Efivars, slot: u16) -> Result<BootEntry> {
    BootEntry::parse(&efivars.get_boot_data(slot)?)
}

/// Check a fwupd-described boot entry still exists; NotFound when a
/// firmware setup option (or another OS) removed it behind our back.
pub(crate) fn verify_fwupd(efivars: &dyn Efivars) -> Result<u16> {
    let names = efivars.get_names(&efivars::GUID_EFI_GLOBAL)?;
    for name in names {
        let Some(slot) = parse_slot_name(&name) else {
            continue;
        };
        let entry = match get_boot_entry(efivars, slot) {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("{name} -> load option was invalid: {e}");
                continue;
            }
        };
        if entry.is_fwupd() {
            log::debug!("found {} at Boot{slot:04X}", entry.description);
            return Ok(slot);
        }
    }
    Err(Error::NotFound(format!("no '{BOOTMGR_DESC}' entry found")))
}

/// Append a slot to `BootOrder` unless it is already present.
pub(crate) fn add_to_boot_order(efivars: &dyn Efivars, slot: u16) -> Result<()> {
    let mut order = efivars.get_boot_order()?;
    if order.contains(&slot) {
        return Ok(());
    }
    order.push(slot);
    efivars
        .set_boot_order(&order)
        .map_err(|e| Error::Write(format!("could not set BootOrder({slot}): {e}")))
}

/// Install `entry` as the fwupd boot entry and point BootNext at it.
///
/// An existing entry with a fwupd description is reused; its payload is
/// rewritten only when the bytes differ.  Otherwise the lowest unused slot
/// is allocated.  Returns the chosen slot.
pub(crate) fn setup_bootnext_with_entry(
    efivars: &dyn Efivars,
    entry: &BootEntry,
    modify_bootorder: bool,
) -> Result<u16> {
    let blob = entry.serialize()?;
    let names = match efivars.get_names(&efivars::GUID_EFI_GLOBAL) {
        Ok(names) => names,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e),
    };

    let mut set_slots = vec![false; u16::MAX as usize + 1];
    let mut existing: Option<(u16, Vec<u8>)> = None;
    for name in &names {
        let Some(slot) = parse_slot_name(name) else {
            continue;
        };
        set_slots[slot as usize] = true;
        if existing.is_some() {
            continue;
        }
        let blob_tmp = match efivars.get_boot_data(slot) {
            Ok(blob) => blob,
            Err(e) => {
                log::debug!("failed to get data for {name}: {e}");
                continue;
            }
        };
        match BootEntry::parse(&blob_tmp) {
            Ok(parsed) if parsed.is_fwupd() => {
                existing = Some((slot, blob_tmp));
            }
            Ok(parsed) => log::debug!("{name} -> '{}' : does not match", parsed.description),
            Err(e) => log::debug!("{name} -> load option was invalid: {e}"),
        }
    }

    let slot = match existing {
        Some((slot, old_blob)) => {
            if old_blob != blob {
                log::debug!("Boot{slot:04X}: updating existing boot entry");
                efivars
                    .set_boot_data(slot, &blob)
                    .map_err(|e| Error::Write(format!("could not update Boot{slot:04X}: {e}")))?;
            } else {
                log::debug!("Boot{slot:04X}: re-using existing boot entry");
            }
            slot
        }
        None => {
            let slot = set_slots
                .iter()
                .position(|used| !used)
                .map(|v| v as u16)
                .ok_or_else(|| Error::NotSupported("no free boot variables".to_string()))?;
            log::debug!("Boot{slot:04X} -> creating new entry");
            efivars
                .set_boot_data(slot, &blob)
                .map_err(|e| Error::Write(format!("could not set Boot{slot:04X}: {e}")))?;
            slot
        }
    };

    if modify_bootorder {
        add_to_boot_order(efivars, slot)?;
    }
    efivars
        .set_boot_next(slot)
        .map_err(|e| Error::Write(format!("could not set BootNext({slot}): {e}")))?;
    Ok(slot)
}

/// A firmware bug can leave BootNext set after a successful boot, silently
/// dropping the user into the updater on every reboot; delete it if it
/// still points at our entry.
pub(crate) fn cleanup_bootnext(efivars: &dyn Efivars) -> Result<()> {
    if !efivars.exists(&efivars::GUID_EFI_GLOBAL, "BootNext") {
        return Ok(());
    }
    let boot_next = efivars.get_boot_next()?;
    let entry = get_boot_entry(efivars, boot_next)?;
    if entry.is_fwupd() {
        log::warn!(
            "BootNext was not deleted automatically, so removing: \
             this normally indicates a BIOS bug"
        );
        efivars.delete(&efivars::GUID_EFI_GLOBAL, "BootNext")?;
    }
    Ok(())
}

/// The arch suffix for EFI binary names, from the firmware word size
/// crossed with the host architecture.
pub(crate) fn efi_arch_suffix(sysfs_fw_dir: &Path) -> Result<&'static str> {
    let bits = esrt::fw_platform_size(sysfs_fw_dir);
    if bits == 0 {
        return Err(Error::NotFound(format!(
            "{}/efi/fw_platform_size cannot be found",
            sysfs_fw_dir.display()
        )));
    }
    let suffix = match bits {
        64 => {
            if cfg!(target_arch = "x86_64") || cfg!(target_arch = "x86") {
                Some("x64")
            } else if cfg!(target_arch = "aarch64") {
                Some("aa64")
            } else if cfg!(target_arch = "loongarch64") {
                Some("loongarch64")
            } else if cfg!(target_arch = "riscv64") {
                Some("riscv64")
            } else {
                None
            }
        }
        32 => {
            if cfg!(target_arch = "x86") || cfg!(target_arch = "x86_64") {
                Some("ia32")
            } else if cfg!(target_arch = "arm") {
                Some("arm")
            } else {
                None
            }
        }
        _ => None,
    };
    suffix.ok_or_else(|| {
        Error::NotFound(format!(
            "fw_platform_size has unhandled value {bits} for this architecture"
        ))
    })
}

/// ESP-relative path of an EFI app under this OS's vendor directory.
pub(crate) fn esp_app_path(esp_mount: &Utf8Path, base: &str, suffix: &str) -> Utf8PathBuf {
    esp::esp_path_for_os(esp_mount).join(format!("{base}{suffix}.efi"))
}

/// The local binary to copy onto the ESP: the `.signed` variant is
/// mandatory under Secure Boot and preferred otherwise.
pub(crate) fn built_app_path(
    efivars: &dyn Efivars,
    efi_app_dir: &Path,
    base: &str,
    suffix: &str,
) -> Result<PathBuf> {
    let source = efi_app_dir.join(format!("{base}{suffix}.efi"));
    let source_signed = efi_app_dir.join(format!("{base}{suffix}.efi.signed"));
    let secureboot_enabled = efivars.get_secure_boot()?;
    if secureboot_enabled {
        if !source_signed.exists() {
            return Err(Error::NotFound(format!(
                "{} cannot be found",
                source_signed.display()
            )));
        }
        return Ok(source_signed);
    }
    if source.exists() {
        return Ok(source);
    }
    if source_signed.exists() {
        return Ok(source_signed);
    }
    Err(Error::NotFound(format!(
        "{} and {} cannot be found",
        source.display(),
        source_signed.display()
    )))
}

/// Parsed `.sbatlevel` PE section: a version header and two CSV tables.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SbatLevelSection {
    pub(crate) previous: String,
    pub(crate) latest: String,
}

pub(crate) fn parse_sbatlevel_section(data: &[u8]) -> Result<SbatLevelSection> {
    if data.len() < 12 {
        return Err(Error::InvalidFile(
            ".sbatlevel section is truncated".to_string(),
        ));
    }
    let previous_off = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
    let latest_off = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
    let read_csv = |offset: usize| -> Result<String> {
        if offset >= data.len() {
            return Err(Error::InvalidFile(
                ".sbatlevel table offset out of bounds".to_string(),
            ));
        }
        let tail = &data[offset..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        String::from_utf8(tail[..end].to_vec())
            .map_err(|_| Error::InvalidFile(".sbatlevel table is not UTF-8".to_string()))
    };
    Ok(SbatLevelSection {
        previous: read_csv(previous_off)?,
        latest: read_csv(latest_off)?,
    })
}

/// Parse `component,generation[,date]` rows.
fn parse_sbat_csv(csv: &str) -> Result<Vec<(String, u64)>> {
    let mut entries = Vec::new();
    for line in csv.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(',');
        let id = fields
            .next()
            .ok_or_else(|| Error::InvalidFile(format!("sbat row has no id: {line}")))?;
        let generation: u64 = fields
            .next()
            .ok_or_else(|| Error::InvalidFile(format!("sbat row has no generation: {line}")))?
            .parse()
            .map_err(|_| Error::InvalidFile(format!("sbat generation is not a number: {line}")))?;
        entries.push((id.to_string(), generation));
    }
    Ok(entries)
}

/// Refuse a shim whose SBAT floor would revoke the running OS.
///
/// Every entry in the candidate shim's "previous" table needs a matching
/// entry in the current SbatLevelRT with a generation at least as new;
/// a missing or older current entry means installing this shim could make
/// the installed bootloader unbootable.
pub(crate) fn sbat_level_check(current_csv: &str, shim_csv: &str, source: &str) -> Result<()> {
    let current = parse_sbat_csv(current_csv)?;
    for (id, shim_generation) in parse_sbat_csv(shim_csv)? {
        let Some((_, current_generation)) = current.iter().find(|(cid, _)| *cid == id) else {
            return Err(Error::InvalidFile(format!(
                "shim sbatlevel for {source} has a bricking update for entry {id} \
                 (missing entry in current UEFI variable)"
            )));
        };
        if *current_generation < shim_generation {
            return Err(Error::InvalidFile(format!(
                "sbatlevel for shim {source} has a bricking update for entry {id} \
                 (newer generation)"
            )));
        }
    }
    Ok(())
}

/// Check whether installing `source_shim` is safe on this system.
pub(crate) fn shim_is_safe(efivars: &dyn Efivars, source_shim: &Path) -> Result<()> {
    let buf = std::fs::read(source_shim)
        .map_err(|e| Error::InvalidFile(format!("failed to load {}: {e}", source_shim.display())))?;
    let pe = goblin::pe::PE::parse(&buf)
        .map_err(|e| Error::InvalidFile(format!("failed to parse {}: {e}", source_shim.display())))?;

    let Some(section) = pe
        .sections
        .iter()
        .find(|s| s.name().map(|n| n == ".sbatlevel").unwrap_or(false))
    else {
        // a shim with no sbatlevel section will not update SbatLevelRT
        log::debug!("no sbatlevel section was found");
        return Ok(());
    };
    let start = section.pointer_to_raw_data as usize;
    let size = section.virtual_size.min(section.size_of_raw_data) as usize;
    if start + size > buf.len() {
        return Err(Error::InvalidFile(
            ".sbatlevel section overruns the file".to_string(),
        ));
    }
    let sbatlevel = parse_sbatlevel_section(&buf[start..start + size])?;

    let current = efivars
        .get_data_bytes(&efivars::GUID_SHIM, "SbatLevelRT")
        .map_err(|e| Error::InvalidFile(format!("failed to load SbatLevelRT: {e}")))?;
    let current_csv = String::from_utf8_lossy(&current).to_string();
    sbat_level_check(
        &current_csv,
        &sbatlevel.previous,
        &source_shim.display().to_string(),
    )
}

/// Make the firmware launch the updater on next boot.
///
/// Copies the updater (and possibly shim) onto the ESP, builds the load
/// option, installs it in a BootXXXX slot and arms BootNext.
pub(crate) fn bootnext(
    efivars: &dyn Efivars,
    esp: &EspVolume,
    efi_app_dir: &Path,
    sysfs_fw_dir: &Path,
    description: &str,
    flags: &TargetFlags,
) -> Result<()> {
    let suffix = efi_arch_suffix(sysfs_fw_dir)?;
    let source_app = built_app_path(efivars, efi_app_dir, "fwupd", suffix)?;
    let secureboot_enabled = efivars.get_secure_boot()?;

    let mut use_fwup_path = true;
    let mut filepath = Utf8PathBuf::new();
    if secureboot_enabled {
        let shim_app = esp_app_path(&esp.mount_point, "shim", suffix);

        // copy in an updated shim if the host provides one
        if let Ok(source_shim) = built_app_path(efivars, efi_app_dir, "shim", suffix) {
            if !esp.target_verify(&source_shim, &shim_app) {
                shim_is_safe(efivars, &source_shim)?;
                esp.target_copy(&source_shim, &shim_app)?;
            }
        }

        if esp.target_exists(&shim_app) {
            if flags.use_shim_unique {
                let shim_cpy = esp_app_path(&esp.mount_point, "shimfwupd", suffix);
                let shim_app_abs = esp.mount_point.join(&shim_app);
                if !esp.target_verify(shim_app_abs.as_std_path(), &shim_cpy) {
                    esp.target_copy(shim_app_abs.as_std_path(), &shim_cpy)?;
                }
                filepath = shim_cpy;
            } else {
                filepath = shim_app;
            }
            use_fwup_path = false;
        } else if flags.use_shim_for_sb {
            return Err(Error::BrokenSystem(format!(
                "Secure boot is enabled, but shim isn't installed to {shim_app}"
            )));
        }
    }

    // make sure the updater binary on the ESP is current
    let target_app = esp_app_path(&esp.mount_point, "fwupd", suffix);
    if !esp.target_verify(&source_app, &target_app) {
        esp.target_copy(&source_app, &target_app)?;
    }
    if use_fwup_path {
        filepath = target_app.clone();
    }

    // when chaining through shim, the optional data names the next binary
    let optional_data = if use_fwup_path {
        Vec::new()
    } else {
        let basename = target_app
            .file_name()
            .ok_or_else(|| Error::Internal("updater path has no basename".to_string()))?;
        ucs2::utf8_to_ucs2(basename)?
    };

    let entry = BootEntry {
        attributes: LOAD_OPTION_ACTIVE,
        description: description.to_string(),
        device_path: vec![
            DevicePathNode::HardDrive(esp.hard_drive_node()),
            DevicePathNode::file_path(esp::to_uefi_path(&filepath))?,
        ],
        optional_data,
    };
    setup_bootnext_with_entry(efivars, &entry, flags.modify_bootorder)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efivars::memory::MemoryEfivars;

    fn sample_entry(description: &str) -> BootEntry {
        BootEntry {
            attributes: LOAD_OPTION_ACTIVE,
            description: description.to_string(),
            device_path: vec![
                DevicePathNode::file_path("\\EFI\\fedora\\shimx64.efi").unwrap()
            ],
            optional_data: ucs2::utf8_to_ucs2("fwupdx64.efi").unwrap(),
        }
    }

    #[test]
    fn test_load_option_roundtrip() -> Result<()> {
        let entry = sample_entry(BOOTMGR_DESC);
        let buf = entry.serialize()?;
        assert_eq!(BootEntry::parse(&buf)?, entry);

        // empty optional data also round-trips
        let mut entry = sample_entry("Fedora");
        entry.optional_data.clear();
        assert_eq!(BootEntry::parse(&entry.serialize()?)?, entry);
        Ok(())
    }

    #[test]
    fn test_parse_slot_name() {
        assert_eq!(parse_slot_name("Boot0001"), Some(1));
        assert_eq!(parse_slot_name("Boot1F00"), Some(0x1F00));
        assert_eq!(parse_slot_name("BootOrder"), None);
        assert_eq!(parse_slot_name("Boot001"), None);
        assert_eq!(parse_slot_name("Boot00012"), None);
        // lower case hex is not how the firmware names entries
        assert_eq!(parse_slot_name("Boot00ab"), None);
    }

    #[test]
    fn test_new_entry_gets_lowest_free_slot() -> Result<()> {
        let efivars = MemoryEfivars::new();
        efivars.set_boot_data(0, &sample_entry("Fedora").serialize()?)?;
        efivars.set_boot_data(2, &sample_entry("UiApp").serialize()?)?;

        let slot = setup_bootnext_with_entry(&efivars, &sample_entry(BOOTMGR_DESC), false)?;
        assert_eq!(slot, 1);
        assert_eq!(efivars.get_boot_next()?, 1);
        // exactly one fwupd-described entry exists afterwards
        assert_eq!(verify_fwupd(&efivars)?, 1);
        Ok(())
    }

    #[test]
    fn test_legacy_description_reused() -> Result<()> {
        let efivars = MemoryEfivars::new();
        // Boot0000 is someone else's, Boot0001 is a stale legacy entry
        efivars.set_boot_data(0, &sample_entry("Fedora").serialize()?)?;
        efivars.set_boot_data(1, &sample_entry(BOOTMGR_DESC_LEGACY).serialize()?)?;

        let mut entry = sample_entry(BOOTMGR_DESC_LEGACY);
        entry.device_path = vec![DevicePathNode::file_path("\\EFI\\dell\\shimx64.efi").unwrap()];
        let slot = setup_bootnext_with_entry(&efivars, &entry, false)?;
        // slot 0001 is reused, not a new slot allocated
        assert_eq!(slot, 0x0001);
        assert_eq!(efivars.get_boot_next()?, 0x0001);
        assert_eq!(get_boot_entry(&efivars, 1)?, entry);
        Ok(())
    }

    #[test]
    fn test_identical_entry_not_rewritten() -> Result<()> {
        let efivars = MemoryEfivars::new();
        let entry = sample_entry(BOOTMGR_DESC);
        let first = setup_bootnext_with_entry(&efivars, &entry, false)?;
        let second = setup_bootnext_with_entry(&efivars, &entry, false)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn test_boot_order_idempotent() -> Result<()> {
        let efivars = MemoryEfivars::new();
        efivars.set_boot_order(&[3, 0])?;
        add_to_boot_order(&efivars, 7)?;
        add_to_boot_order(&efivars, 7)?;
        assert_eq!(efivars.get_boot_order()?, vec![3, 0, 7]);
        Ok(())
    }

    #[test]
    fn test_verify_fwupd_missing() {
        let efivars = MemoryEfivars::new();
        efivars
            .set_boot_data(0, &sample_entry("Fedora").serialize().unwrap())
            .unwrap();
        assert!(verify_fwupd(&efivars).unwrap_err().is_not_found());
    }

    #[test]
    fn test_cleanup_bootnext() -> Result<()> {
        let efivars = MemoryEfivars::new();
        efivars.set_boot_data(4, &sample_entry(BOOTMGR_DESC).serialize()?)?;
        efivars.set_boot_next(4)?;
        cleanup_bootnext(&efivars)?;
        assert!(!efivars.exists(&efivars::GUID_EFI_GLOBAL, "BootNext"));

        // BootNext pointing at another OS is left alone
        efivars.set_boot_data(5, &sample_entry("Fedora").serialize()?)?;
        efivars.set_boot_next(5)?;
        cleanup_bootnext(&efivars)?;
        assert_eq!(efivars.get_boot_next()?, 5);
        Ok(())
    }

    #[test]
    fn test_sbat_level_check() {
        // a shim generation newer than the platform floor is a
        // potential brick
        let err = sbat_level_check("shim,3,2023010100", "shim,4,2024010100", "shimx64.efi")
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFile(_)));

        // equal or older generations are fine
        sbat_level_check("shim,3,2023010100", "shim,3,2023010100", "shimx64.efi").unwrap();
        sbat_level_check("shim,3,2023010100\ngrub,4", "shim,2", "shimx64.efi").unwrap();

        // an entry missing from SbatLevelRT is also treated as bricking
        let err = sbat_level_check("shim,3", "grub,1", "shimx64.efi").unwrap_err();
        assert!(matches!(err, Error::InvalidFile(_)));

        // an empty shim table has nothing to revoke
        sbat_level_check("shim,3", "", "shimx64.efi").unwrap();
    }

    #[test]
    fn test_parse_sbatlevel_section() -> Result<()> {
        // header: version, previous offset, latest offset
        let previous = b"sbat,1,2021030218\nshim,2\n\0";
        let latest = b"sbat,1,2021030218\nshim,3\ngrub,4\n\0";
        let mut data = Vec::new();
        data.extend_from_slice(&0u32.to_le_bytes());
        data.extend_from_slice(&12u32.to_le_bytes());
        data.extend_from_slice(&((12 + previous.len()) as u32).to_le_bytes());
        data.extend_from_slice(previous);
        data.extend_from_slice(latest);

        let section = parse_sbatlevel_section(&data)?;
        assert_eq!(section.previous, "sbat,1,2021030218\nshim,2\n");
        assert_eq!(section.latest, "sbat,1,2021030218\nshim,3\ngrub,4\n");

        assert!(parse_sbatlevel_section(&[0u8; 4]).is_err());
        Ok(())
    }
}
