/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! ESRT (EFI System Resource Table) enumeration.
//!
//! The kernel exposes one directory per updatable firmware resource under
//! `/sys/firmware/efi/esrt/entries/`; each becomes a [`CapsuleTarget`].

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::device::{CapsuleTarget, LastAttemptStatus, TargetKind};
use crate::error::{Error, Result};
use crate::util::read_file_as_u64;

pub(crate) struct Esrt {
    entries_dir: PathBuf,
}

impl Esrt {
    /// `sysfs_fw_dir` is normally `/sys/firmware`; tests point it at a
    /// scratch directory.
    pub(crate) fn new(sysfs_fw_dir: &Path) -> Self {
        Self {
            entries_dir: sysfs_fw_dir.join("efi/esrt/entries"),
        }
    }

    /// All update-capable devices the firmware advertises.
    pub(crate) fn enumerate(&self) -> Result<Vec<CapsuleTarget>> {
        let entries = std::fs::read_dir(&self.entries_dir).map_err(|e| {
            Error::NotSupported(format!(
                "no ESRT support at {}: {e}",
                self.entries_dir.display()
            ))
        })?;
        let mut targets = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::from_io("readdir", e))?;
            targets.push(self.target_from_entry(&entry.path())?);
        }
        // sorted by GUID so enumeration order is stable across boots
        targets.sort_by_key(|t| t.firmware_class);

        let system_count = targets
            .iter()
            .filter(|t| t.kind == TargetKind::SystemFirmware)
            .count();
        if system_count > 1 {
            log::warn!("ESRT lists {system_count} system firmware entries, expected one");
        }
        Ok(targets)
    }

    fn target_from_entry(&self, path: &Path) -> Result<CapsuleTarget> {
        let fw_class = std::fs::read_to_string(path.join("fw_class"))
            .map_err(|e| Error::NotSupported(format!("failed to read fw_class: {e}")))?;
        let fw_class: Uuid = fw_class.trim().parse().map_err(|_| {
            Error::NotSupported(format!("ESRT GUID '{}' was not valid", fw_class.trim()))
        })?;

        let kind = TargetKind::from_raw(read_file_as_u64(path, "fw_type"));
        let mut target = CapsuleTarget::new(fw_class, kind);
        target.capsule_flags = read_file_as_u64(path, "capsule_flags") as u32;
        target.fw_version = read_file_as_u64(path, "fw_version") as u32;
        target.fw_version_lowest = read_file_as_u64(path, "lowest_supported_fw_version") as u32;
        target.last_attempt_version = read_file_as_u64(path, "last_attempt_version") as u32;
        target.last_attempt_status =
            LastAttemptStatus::from_raw(read_file_as_u64(path, "last_attempt_status"))
                .unwrap_or(LastAttemptStatus::ErrUnsuccessful);
        // the hardware instance is not in the ESRT; only FMP devices ever
        // have a nonzero one and we have never seen one in the wild
        target.hardware_instance = 0;
        Ok(target)
    }
}

/// The firmware word size from `/sys/firmware/efi/fw_platform_size`,
/// needed to pick the EFI binary architecture suffix.
pub(crate) fn fw_platform_size(sysfs_fw_dir: &Path) -> u64 {
    read_file_as_u64(&sysfs_fw_dir.join("efi"), "fw_platform_size")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_entry(dir: &Path, name: &str, fields: &[(&str, &str)]) -> anyhow::Result<()> {
        let entry = dir.join("efi/esrt/entries").join(name);
        std::fs::create_dir_all(&entry)?;
        for (k, v) in fields {
            std::fs::write(entry.join(k), v)?;
        }
        Ok(())
    }

    #[test]
    fn test_enumerate() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        write_entry(
            td.path(),
            "entry0",
            &[
                ("fw_class", "ddc0ee61-e7f0-4e7d-acc5-c070a398838e\n"),
                ("fw_type", "1"),
                ("capsule_flags", "0xfe"),
                ("fw_version", "65586"),
                ("lowest_supported_fw_version", "65582"),
                ("last_attempt_status", "1"),
                ("last_attempt_version", "18472960"),
            ],
        )?;
        write_entry(
            td.path(),
            "entry1",
            &[
                ("fw_class", "671d19d0-d43c-4852-98d9-1ce16f9967e4\n"),
                ("fw_type", "99"),
                ("fw_version", "2"),
            ],
        )?;

        let targets = Esrt::new(td.path()).enumerate()?;
        assert_eq!(targets.len(), 2);
        let sysfw = &targets[1];
        assert_eq!(
            sysfw.firmware_class,
            uuid::uuid!("ddc0ee61-e7f0-4e7d-acc5-c070a398838e")
        );
        assert_eq!(sysfw.kind, TargetKind::SystemFirmware);
        assert_eq!(sysfw.capsule_flags, 0xfe);
        assert_eq!(sysfw.fw_version, 65586);
        assert_eq!(sysfw.fw_version_lowest, 65582);
        assert_eq!(
            sysfw.last_attempt_status,
            LastAttemptStatus::ErrUnsuccessful
        );
        assert_eq!(sysfw.last_attempt_version, 18472960);

        // unknown fw_type still enumerates, with kind Unknown
        let unknown = &targets[0];
        assert_eq!(unknown.kind, TargetKind::Unknown);
        assert_eq!(unknown.fw_version, 2);
        Ok(())
    }

    #[test]
    fn test_invalid_guid_rejected() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        write_entry(td.path(), "entry0", &[("fw_class", "not-a-guid\n")])?;
        let err = Esrt::new(td.path()).enumerate().unwrap_err();
        assert!(err.is_not_supported());
        Ok(())
    }

    #[test]
    fn test_missing_esrt() {
        let err = Esrt::new(Path::new("/nonexistent")).enumerate().unwrap_err();
        assert!(err.is_not_supported());
    }
}
