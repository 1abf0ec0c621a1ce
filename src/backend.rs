/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! The three strategies for handing control to the pre-boot firmware
//! updater: NVRAM/BootNext, Capsule-on-Disk, and GRUB chainload.
//!
//! The back-end is resolved once at device-creation time from platform
//! detection plus configuration, then dispatched through
//! [`CapsuleBackend::write_capsule`] and [`CapsuleBackend::get_results`].

use std::path::Path;

use camino::Utf8PathBuf;

use crate::acpi::AcpiUefi;
use crate::bootmgr;
use crate::capsule;
use crate::config::Config;
use crate::device::{CapsuleTarget, LastAttemptStatus, UpdateState};
use crate::efivars::{self, Efivars};
use crate::error::{Error, Result};
use crate::esp::EspVolume;
use crate::ucs2;
use crate::util::{find_program, CommandRunExt};

/// OsIndications / OsIndicationsSupported bit 2.
const EFI_OS_INDICATIONS_FILE_CAPSULE_DELIVERY_SUPPORTED: u64 = 0x4;

/// Everything a back-end needs from the host to perform an install.
pub(crate) struct HostEnv<'a> {
    pub(crate) efivars: &'a dyn Efivars,
    pub(crate) esp: &'a EspVolume,
    pub(crate) efi_app_dir: &'a Path,
    pub(crate) sysfs_fw_dir: &'a Path,
    pub(crate) localstatedir: &'a Path,
    pub(crate) require_esp_free_space: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CapsuleBackend {
    Nvram,
    Cod,
    Grub,
}

impl CapsuleBackend {
    /// Pick the delivery strategy for this platform.
    pub(crate) fn detect(
        efivars: &dyn Efivars,
        acpi_uefi: Option<&AcpiUefi>,
        config: &Config,
    ) -> Self {
        if config.enable_grub_chain_load {
            return CapsuleBackend::Grub;
        }
        if !config.disable_capsule_update_on_disk {
            match check_cod_support(efivars, acpi_uefi) {
                Ok(()) => return CapsuleBackend::Cod,
                Err(e) => log::debug!("not using CapsuleOnDisk support: {e}"),
            }
        }
        CapsuleBackend::Nvram
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            CapsuleBackend::Nvram => "nvram",
            CapsuleBackend::Cod => "cod",
            CapsuleBackend::Grub => "grub",
        }
    }

    /// Stage the payload and arm the platform so the next reboot applies it.
    pub(crate) fn write_capsule(
        &self,
        env: &HostEnv,
        target: &mut CapsuleTarget,
        payload: &[u8],
    ) -> Result<()> {
        match self {
            CapsuleBackend::Nvram => nvram_write_capsule(env, target, payload),
            CapsuleBackend::Cod => cod_write_capsule(env, target, payload),
            CapsuleBackend::Grub => grub_write_capsule(env, target, payload),
        }
    }

    /// Map what happened during the reboot onto the target's update state.
    pub(crate) fn get_results(
        &self,
        efivars: &dyn Efivars,
        target: &mut CapsuleTarget,
    ) -> Result<()> {
        match self {
            CapsuleBackend::Cod => cod_get_results(efivars, target),
            CapsuleBackend::Nvram => nvram_get_results(efivars, target),
            // GRUB installs report through the ESRT like NVRAM, minus the
            // boot entry check
            CapsuleBackend::Grub => {
                target.set_status(target.last_attempt_status);
                Ok(())
            }
        }
    }
}

/// CoD must be advertised in OsIndicationsSupported and not vetoed by the
/// InsydeH2O ACPI quirk.
fn check_cod_support(efivars: &dyn Efivars, acpi_uefi: Option<&AcpiUefi>) -> Result<()> {
    let buf = efivars
        .get_data_bytes(&efivars::GUID_EFI_GLOBAL, "OsIndicationsSupported")
        .map_err(|e| Error::NotSupported(format!("failed to read EFI variable: {e}")))?;
    if buf.len() < 8 {
        return Err(Error::InvalidData(
            "OsIndicationsSupported is truncated".to_string(),
        ));
    }
    let value = u64::from_le_bytes(buf[0..8].try_into().unwrap());
    if value & EFI_OS_INDICATIONS_FILE_CAPSULE_DELIVERY_SUPPORTED == 0 {
        return Err(Error::NotSupported(
            "Capsule-on-Disk is not supported".to_string(),
        ));
    }
    if let Some(acpi_uefi) = acpi_uefi {
        acpi_uefi.cod_functional()?;
    }
    Ok(())
}

/// Arm or disarm verbose logging in the pre-boot binary.
fn perhaps_enable_debugging(efivars: &dyn Efivars, target: &CapsuleTarget) -> Result<()> {
    if target.flags.enable_debugging {
        efivars
            .set_data(
                &efivars::GUID_FWUPDATE,
                "FWUPDATE_VERBOSE",
                &[1],
                efivars::ATTR_DEFAULT,
            )
            .map_err(|e| Error::Write(format!("failed to enable debugging: {e}")))?;
        return Ok(());
    }
    if efivars.exists(&efivars::GUID_FWUPDATE, "FWUPDATE_VERBOSE") {
        efivars.delete(&efivars::GUID_FWUPDATE, "FWUPDATE_VERBOSE")?;
    }
    Ok(())
}

/// Pull the UCS-2 debug log the pre-boot binary left behind into ours.
fn capture_efi_debugging(efivars: &dyn Efivars) {
    match efivars.get_data_bytes(&efivars::GUID_FWUPDATE, "FWUPDATE_DEBUG_LOG") {
        Ok(buf) => log::info!("EFI debugging: {}", ucs2::ucs2_to_string(&buf)),
        Err(e) => log::warn!("failed to capture EFI debugging: {e}"),
    }
}

fn stage_and_bind(env: &HostEnv, target: &mut CapsuleTarget, payload: &[u8]) -> Result<Utf8PathBuf> {
    let capsule_path =
        capsule::stage_capsule(env.esp, target, payload, env.require_esp_free_space)?;

    perhaps_enable_debugging(env.efivars, target)?;
    // delete the old log to save NVRAM space
    if env
        .efivars
        .exists(&efivars::GUID_FWUPDATE, "FWUPDATE_DEBUG_LOG")
    {
        env.efivars
            .delete(&efivars::GUID_FWUPDATE, "FWUPDATE_DEBUG_LOG")?;
    }

    capsule::write_update_info(
        env.efivars,
        env.esp,
        target,
        &capsule_path,
        &target.build_varname(),
        target.firmware_class,
    )?;
    Ok(capsule_path)
}

fn nvram_write_capsule(env: &HostEnv, target: &mut CapsuleTarget, payload: &[u8]) -> Result<()> {
    stage_and_bind(env, target, payload)?;

    let description = if target.flags.use_legacy_bootmgr_desc {
        bootmgr::BOOTMGR_DESC_LEGACY
    } else {
        bootmgr::BOOTMGR_DESC
    };
    bootmgr::bootnext(
        env.efivars,
        env.esp,
        env.efi_app_dir,
        env.sysfs_fw_dir,
        description,
        &target.flags,
    )
}

fn nvram_get_results(efivars: &dyn Efivars, target: &mut CapsuleTarget) -> Result<()> {
    if target.flags.enable_debugging {
        capture_efi_debugging(efivars);
    }

    // check if something rudely removed our BOOTXXXX entry
    if target.last_attempt_status == LastAttemptStatus::Success {
        match bootmgr::verify_fwupd(efivars) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                if target.flags.supports_boot_order_lock {
                    target.set_update_failure(
                        UpdateState::FailedTransient,
                        "boot entry missing; perhaps Boot Order Lock enabled in the BIOS",
                    );
                } else {
                    target.set_update_failure(UpdateState::Failed, "boot entry missing");
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
    target.set_status(target.last_attempt_status);
    Ok(())
}

/// The CoD capsule location, which is firmware-defined rather than ours.
fn cod_filename(env: &HostEnv, target: &CapsuleTarget) -> Result<Utf8PathBuf> {
    let efivars = env.efivars;
    // InsydeH2O wants sequentially indexed filenames
    if target.flags.cod_indexed_filename {
        for i in 0..0xFFFFu32 {
            let path =
                Utf8PathBuf::from(format!("EFI/UpdateCapsule/CapsuleUpdateFile{i:04X}.bin"));
            if !env.esp.target_exists(&path) {
                return Ok(path);
            }
        }
        return Err(Error::Internal(
            "all potential CapsuleUpdateFile file names are taken".to_string(),
        ));
    }

    // Dell recovery-partition flow: only when the capability variable
    // exists and its first byte reads 1
    if target.flags.cod_dell_recovery {
        if let Ok(data) =
            efivars.get_data_bytes(&efivars::GUID_DELL_FLASH_CAPABILITY, "DellFwuCapSupported")
        {
            if data.first() == Some(&1) {
                efivars.set_data(&efivars::GUID_DELL_FLASH_CAPABILITY, "DellFwuCap", &[1], 0)?;
                return Ok(Utf8PathBuf::from("EFI/dell/bios/recovery/BIOS_TRS.rcv"));
            }
        }
    }

    Ok(Utf8PathBuf::from(format!(
        "EFI/UpdateCapsule/{}",
        capsule::capsule_basename(&target.firmware_class)
    )))
}

fn cod_write_capsule(env: &HostEnv, target: &mut CapsuleTarget, payload: &[u8]) -> Result<()> {
    let required = capsule::required_free_space(env.require_esp_free_space, payload.len() as u64);
    env.esp.check_free_space(required)?;

    let fixed = capsule::fixup_firmware(target, payload, capsule::page_size())?;
    let cod_path = cod_filename(env, target)?;
    log::info!("using {cod_path}");
    env.esp.write_target(&cod_path, &fixed)?;

    // The EFI spec requires setting OsIndications.  RT->SetVariable is not
    // supported for all hardware; U-Boot applies the capsule even when the
    // bit is unset and deletes the file afterwards.
    if !target.flags.no_rt_set_variable {
        let os_indications = match env
            .efivars
            .get_data_bytes(&efivars::GUID_EFI_GLOBAL, "OsIndications")
        {
            Ok(buf) if buf.len() >= 8 => u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            Ok(_) => 0,
            Err(e) => {
                // the firmware does not normally populate this by default
                log::debug!("failed to read EFI variable: {e}");
                0
            }
        };
        let os_indications = os_indications | EFI_OS_INDICATIONS_FILE_CAPSULE_DELIVERY_SUPPORTED;
        env.efivars
            .set_data(
                &efivars::GUID_EFI_GLOBAL,
                "OsIndications",
                &os_indications.to_le_bytes(),
                efivars::ATTR_DEFAULT,
            )
            .map_err(|e| Error::Write(format!("could not set OsIndications: {e}")))?;
    }
    Ok(())
}

/// Read `CapsuleLast`-style variables holding a UCS-2 "CapsuleNNNN".
fn cod_variable_idx(efivars: &dyn Efivars, name: &str) -> Result<u32> {
    let buf = efivars.get_data_bytes(&efivars::GUID_EFI_CAPSULE_REPORT, name)?;
    let value = ucs2::ucs2_to_string(&buf);
    let Some(idx) = value.strip_prefix("Capsule") else {
        return Err(Error::InvalidData(format!(
            "wrong contents, got '{value}' for {name}"
        )));
    };
    idx.parse()
        .map_err(|_| Error::InvalidData(format!("wrong contents, got '{value}' for {name}")))
}

/// EFI_CAPSULE_RESULT_VARIABLE_HEADER is 44 bytes.
const CAPSULE_RESULT_HEADER_SIZE: usize = 44;

fn cod_result_status(raw: u32) -> LastAttemptStatus {
    // low values carry the last-attempt code directly; higher ones are
    // EFI_STATUS codes from the firmware
    LastAttemptStatus::from_raw(u64::from(raw)).unwrap_or(match raw {
        9 | 11 => LastAttemptStatus::ErrInsufficientResources,
        25 => LastAttemptStatus::ErrIncorrectVersion,
        15 | 26 => LastAttemptStatus::ErrAuthError,
        _ => LastAttemptStatus::ErrUnsuccessful,
    })
}

fn cod_get_results_for_idx(
    efivars: &dyn Efivars,
    target: &mut CapsuleTarget,
    idx: u32,
) -> Result<()> {
    let name = format!("Capsule{idx:04}");
    let blob = efivars.get_data_bytes(&efivars::GUID_EFI_CAPSULE_REPORT, &name)?;
    if blob.len() < CAPSULE_RESULT_HEADER_SIZE {
        return Err(Error::InvalidData(format!(
            "failed to parse {name}: {} bytes",
            blob.len()
        )));
    }
    let total_size = u32::from_le_bytes(blob[0..4].try_into().unwrap());
    if (total_size as usize) < CAPSULE_RESULT_HEADER_SIZE {
        return Err(Error::Internal(format!(
            "EFI_CAPSULE_RESULT_VARIABLE_HEADER too small: {total_size:#x}"
        )));
    }
    let guid = uuid::Uuid::from_bytes_le(blob[8..24].try_into().unwrap());
    if guid != target.firmware_class {
        return Err(Error::NotFound(format!(
            "wrong GUID, expected {}, got {guid}",
            target.firmware_class
        )));
    }
    let status = u32::from_le_bytes(blob[40..44].try_into().unwrap());
    target.set_status(cod_result_status(status));
    Ok(())
}

fn cod_get_results(efivars: &dyn Efivars, target: &mut CapsuleTarget) -> Result<()> {
    let capsule_last = cod_variable_idx(efivars, "CapsuleLast")?;
    for idx in 0..=capsule_last {
        match cod_get_results_for_idx(efivars, target, idx) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e),
        }
    }
    // nothing recorded for this GUID
    Ok(())
}

fn grub_write_capsule(env: &HostEnv, target: &mut CapsuleTarget, payload: &[u8]) -> Result<()> {
    stage_and_bind(env, target, payload)?;

    let suffix = bootmgr::efi_arch_suffix(env.sysfs_fw_dir)?;
    let source_app = bootmgr::built_app_path(env.efivars, env.efi_app_dir, "fwupd", suffix)?;
    let target_app = bootmgr::esp_app_path(&env.esp.mount_point, "fwupd", suffix);
    if !env.esp.target_verify(&source_app, &target_app) {
        env.esp.target_copy(&source_app, &target_app)?;
    }

    grub_mkconfig(env, target_app.as_str())
}

/// Rewrite our GRUB snippet variables and make `grub-reboot fwupd` the
/// one-shot default.
fn grub_mkconfig(env: &HostEnv, target_app: &str) -> Result<()> {
    let mut grub_cfg = Path::new("/boot/grub/grub.cfg");
    if !grub_cfg.exists() {
        grub_cfg = Path::new("/boot/grub2/grub.cfg");
    }
    if !grub_cfg.exists() {
        return Err(Error::NotFound("could not find grub.conf".to_string()));
    }
    let grub_mkconfig = find_program(&["grub-mkconfig", "grub2-mkconfig"])
        .ok_or_else(|| Error::NotFound("could not find grub-mkconfig".to_string()))?;
    let grub_reboot = find_program(&["grub-reboot", "grub2-reboot"])
        .ok_or_else(|| Error::NotFound("could not find grub-reboot".to_string()))?;

    let conf = format!("EFI_PATH={target_app}\nESP={}\n", env.esp.mount_point);
    let conf_path = env.localstatedir.join("uefi_capsule.conf");
    if let Some(parent) = conf_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::from_io(parent.display().to_string(), e))?;
    }
    std::fs::write(&conf_path, conf)
        .map_err(|e| Error::from_io(conf_path.display().to_string(), e))?;

    std::process::Command::new(grub_mkconfig)
        .arg("-o")
        .arg(grub_cfg)
        .run()
        .map_err(|e| Error::Write(format!("grub-mkconfig failed: {e:#}")))?;
    std::process::Command::new(grub_reboot)
        .arg("fwupd")
        .run()
        .map_err(|e| Error::Write(format!("grub-reboot failed: {e:#}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::TargetKind;
    use crate::efivars::memory::MemoryEfivars;
    use camino::Utf8Path;
    use uuid::Uuid;

    const GUID: Uuid = uuid::uuid!("cc4cbfa9-bf9d-540b-b92b-172ce31013c1");

    fn target() -> CapsuleTarget {
        CapsuleTarget::new(GUID, TargetKind::SystemFirmware)
    }

    fn set_os_indications_supported(efivars: &MemoryEfivars, value: u64) {
        efivars
            .set_data(
                &efivars::GUID_EFI_GLOBAL,
                "OsIndicationsSupported",
                &value.to_le_bytes(),
                efivars::ATTR_DEFAULT,
            )
            .unwrap();
    }

    #[test]
    fn test_detect() {
        let efivars = MemoryEfivars::new();
        let config = Config::default();

        // no OsIndicationsSupported at all
        assert_eq!(
            CapsuleBackend::detect(&efivars, None, &config),
            CapsuleBackend::Nvram
        );

        set_os_indications_supported(&efivars, EFI_OS_INDICATIONS_FILE_CAPSULE_DELIVERY_SUPPORTED);
        assert_eq!(
            CapsuleBackend::detect(&efivars, None, &config),
            CapsuleBackend::Cod
        );

        let mut config_no_cod = Config::default();
        config_no_cod.disable_capsule_update_on_disk = true;
        assert_eq!(
            CapsuleBackend::detect(&efivars, None, &config_no_cod),
            CapsuleBackend::Nvram
        );

        let mut config_grub = Config::default();
        config_grub.enable_grub_chain_load = true;
        assert_eq!(
            CapsuleBackend::detect(&efivars, None, &config_grub),
            CapsuleBackend::Grub
        );
    }

    fn utf16le(s: &str) -> Vec<u8> {
        crate::ucs2::utf8_to_ucs2(s).unwrap()
    }

    fn build_capsule_result(guid: Uuid, status: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0x3Au32.to_le_bytes()); // VariableTotalSize
        buf.extend_from_slice(&0xFFu32.to_le_bytes()); // Reserved
        buf.extend_from_slice(&guid.to_bytes_le());
        buf.extend_from_slice(&[0u8; 16]); // CapsuleProcessed
        buf.extend_from_slice(&status.to_le_bytes());
        buf
    }

    #[test]
    fn test_cod_results_pwr_evt_batt() -> Result<()> {
        let efivars = MemoryEfivars::new();
        efivars.set_data(
            &efivars::GUID_EFI_CAPSULE_REPORT,
            "CapsuleLast",
            &utf16le("Capsule0001"),
            0,
        )?;
        efivars.set_data(
            &efivars::GUID_EFI_CAPSULE_REPORT,
            "CapsuleMax",
            &utf16le("Capsule9999"),
            0,
        )?;
        // an unrelated GUID at index 0 is skipped
        efivars.set_data(
            &efivars::GUID_EFI_CAPSULE_REPORT,
            "Capsule0000",
            &build_capsule_result(uuid::uuid!("99999999-bf9d-540b-b92b-172ce31013c1"), 0),
            0,
        )?;
        efivars.set_data(
            &efivars::GUID_EFI_CAPSULE_REPORT,
            "Capsule0001",
            &build_capsule_result(GUID, 7),
            0,
        )?;

        let mut target = target();
        CapsuleBackend::Cod.get_results(&efivars, &mut target)?;
        assert_eq!(target.update_state, UpdateState::FailedTransient);
        assert_eq!(
            target.update_error.as_deref(),
            Some("failed to update to 0: error-pwr-evt-batt")
        );
        Ok(())
    }

    #[test]
    fn test_cod_results_nothing_recorded() -> Result<()> {
        let efivars = MemoryEfivars::new();
        efivars.set_data(
            &efivars::GUID_EFI_CAPSULE_REPORT,
            "CapsuleLast",
            &utf16le("Capsule0000"),
            0,
        )?;
        let mut target = target();
        CapsuleBackend::Cod.get_results(&efivars, &mut target)?;
        assert_eq!(target.update_state, UpdateState::Unknown);
        Ok(())
    }

    #[test]
    fn test_cod_write_capsule() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let esp = EspVolume::new_from_mount_path(Utf8Path::from_path(td.path()).unwrap());
        let efivars = MemoryEfivars::new();
        let env = HostEnv {
            efivars: &efivars,
            esp: &esp,
            efi_app_dir: Path::new("/nonexistent"),
            sysfs_fw_dir: Path::new("/nonexistent"),
            localstatedir: Path::new("/nonexistent"),
            require_esp_free_space: 1,
        };

        let mut t = target();
        let mut payload = GUID.to_bytes_le().to_vec();
        payload.extend_from_slice(&[0xAA; 128]);
        CapsuleBackend::Cod.write_capsule(&env, &mut t, &payload)?;

        let staged = td.path().join(format!("EFI/UpdateCapsule/fwupd-{GUID}.cap"));
        assert_eq!(std::fs::read(staged)?, payload);
        let os_ind = efivars.get_data_bytes(&efivars::GUID_EFI_GLOBAL, "OsIndications")?;
        assert_eq!(
            u64::from_le_bytes(os_ind[0..8].try_into().unwrap()),
            EFI_OS_INDICATIONS_FILE_CAPSULE_DELIVERY_SUPPORTED
        );
        Ok(())
    }

    #[test]
    fn test_cod_indexed_filename() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let esp = EspVolume::new_from_mount_path(Utf8Path::from_path(td.path()).unwrap());
        let efivars = MemoryEfivars::new();
        let env = HostEnv {
            efivars: &efivars,
            esp: &esp,
            efi_app_dir: Path::new("/nonexistent"),
            sysfs_fw_dir: Path::new("/nonexistent"),
            localstatedir: Path::new("/nonexistent"),
            require_esp_free_space: 1,
        };
        std::fs::create_dir_all(td.path().join("EFI/UpdateCapsule"))?;
        std::fs::write(
            td.path().join("EFI/UpdateCapsule/CapsuleUpdateFile0000.bin"),
            b"old",
        )?;

        let mut t = target();
        t.flags.cod_indexed_filename = true;
        let path = cod_filename(&env, &t)?;
        // the lowest unused index is picked
        assert_eq!(
            path,
            Utf8PathBuf::from("EFI/UpdateCapsule/CapsuleUpdateFile0001.bin")
        );
        Ok(())
    }

    #[test]
    fn test_cod_dell_recovery() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let esp = EspVolume::new_from_mount_path(Utf8Path::from_path(td.path()).unwrap());
        let efivars = MemoryEfivars::new();
        let env = HostEnv {
            efivars: &efivars,
            esp: &esp,
            efi_app_dir: Path::new("/nonexistent"),
            sysfs_fw_dir: Path::new("/nonexistent"),
            localstatedir: Path::new("/nonexistent"),
            require_esp_free_space: 1,
        };
        let mut t = target();
        t.flags.cod_dell_recovery = true;

        // capability variable absent: the default path is used
        assert_eq!(
            cod_filename(&env, &t)?,
            Utf8PathBuf::from(format!("EFI/UpdateCapsule/fwupd-{GUID}.cap"))
        );

        // capability advertised: recovery path, and DellFwuCap is armed
        efivars.set_data(
            &efivars::GUID_DELL_FLASH_CAPABILITY,
            "DellFwuCapSupported",
            &[1],
            0,
        )?;
        assert_eq!(
            cod_filename(&env, &t)?,
            Utf8PathBuf::from("EFI/dell/bios/recovery/BIOS_TRS.rcv")
        );
        assert_eq!(
            efivars.get_data_bytes(&efivars::GUID_DELL_FLASH_CAPABILITY, "DellFwuCap")?,
            vec![1]
        );
        Ok(())
    }

    #[test]
    fn test_nvram_results_boot_entry_missing() -> Result<()> {
        let efivars = MemoryEfivars::new();
        // one unrelated boot entry so get_names succeeds
        efivars.set_boot_data(
            0,
            &bootmgr::BootEntry {
                attributes: bootmgr::LOAD_OPTION_ACTIVE,
                description: "Fedora".to_string(),
                device_path: vec![],
                optional_data: vec![],
            }
            .serialize()?,
        )?;

        let mut t = target();
        t.set_status(LastAttemptStatus::Success);
        CapsuleBackend::Nvram.get_results(&efivars, &mut t)?;
        assert_eq!(t.update_state, UpdateState::Failed);
        assert_eq!(t.update_error.as_deref(), Some("boot entry missing"));

        let mut t = target();
        t.flags.supports_boot_order_lock = true;
        t.set_status(LastAttemptStatus::Success);
        CapsuleBackend::Nvram.get_results(&efivars, &mut t)?;
        assert_eq!(t.update_state, UpdateState::FailedTransient);
        assert_eq!(
            t.update_error.as_deref(),
            Some("boot entry missing; perhaps Boot Order Lock enabled in the BIOS")
        );
        Ok(())
    }

    #[test]
    fn test_nvram_results_entry_present() -> Result<()> {
        let efivars = MemoryEfivars::new();
        efivars.set_boot_data(
            1,
            &bootmgr::BootEntry {
                attributes: bootmgr::LOAD_OPTION_ACTIVE,
                description: bootmgr::BOOTMGR_DESC.to_string(),
                device_path: vec![],
                optional_data: vec![],
            }
            .serialize()?,
        )?;

        let mut t = target();
        t.last_attempt_status = LastAttemptStatus::Success;
        CapsuleBackend::Nvram.get_results(&efivars, &mut t)?;
        assert_eq!(t.update_state, UpdateState::Success);

        // a failed ESRT status is reported even with the entry gone
        let efivars = MemoryEfivars::new();
        let mut t = target();
        t.last_attempt_version = 2;
        t.last_attempt_status = LastAttemptStatus::ErrInvalidFormat;
        CapsuleBackend::Nvram.get_results(&efivars, &mut t)?;
        assert_eq!(t.update_state, UpdateState::Failed);
        assert_eq!(
            t.update_error.as_deref(),
            Some("failed to update to 2: error-invalid-format")
        );
        Ok(())
    }

    #[test]
    fn test_cod_variable_idx_validation() -> Result<()> {
        let efivars = MemoryEfivars::new();
        efivars.set_data(
            &efivars::GUID_EFI_CAPSULE_REPORT,
            "CapsuleLast",
            &utf16le("Banana0001"),
            0,
        )?;
        assert!(matches!(
            cod_variable_idx(&efivars, "CapsuleLast"),
            Err(Error::InvalidData(_))
        ));
        Ok(())
    }
}
