/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! The model for one updatable firmware region discovered from the ESRT.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::efivars::{self, Efivars};
use crate::error::{Error, Result};
use crate::updateinfo::{UpdateInfo, UpdateInfoStatus};

/// ESRT `fw_type` values; anything else maps to Unknown but the device is
/// still exposed.  DellTpmFirmware is never in the ESRT, it is assigned by
/// the platform quirk layer.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum TargetKind {
    Unknown,
    SystemFirmware,
    DeviceFirmware,
    UefiDriver,
    Fmp,
    DellTpmFirmware,
}

impl TargetKind {
    pub(crate) fn from_raw(value: u64) -> Self {
        match value {
            1 => TargetKind::SystemFirmware,
            2 => TargetKind::DeviceFirmware,
            3 => TargetKind::UefiDriver,
            4 => TargetKind::Fmp,
            _ => TargetKind::Unknown,
        }
    }

    pub(crate) fn display_name(&self) -> &'static str {
        match self {
            TargetKind::Unknown => "Unknown Firmware",
            TargetKind::SystemFirmware => "System Firmware",
            TargetKind::DeviceFirmware => "UEFI Device Firmware",
            TargetKind::UefiDriver => "UEFI Driver",
            TargetKind::Fmp => "Firmware Management Protocol",
            TargetKind::DellTpmFirmware => "TPM Firmware",
        }
    }
}

/// The ESRT last-attempt status, a closed set.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum LastAttemptStatus {
    #[default]
    Success,
    ErrUnsuccessful,
    ErrInsufficientResources,
    ErrIncorrectVersion,
    ErrInvalidFormat,
    ErrAuthError,
    ErrPwrEvtAc,
    ErrPwrEvtBatt,
}

impl LastAttemptStatus {
    pub(crate) fn from_raw(value: u64) -> Option<Self> {
        match value {
            0 => Some(LastAttemptStatus::Success),
            1 => Some(LastAttemptStatus::ErrUnsuccessful),
            2 => Some(LastAttemptStatus::ErrInsufficientResources),
            3 => Some(LastAttemptStatus::ErrIncorrectVersion),
            4 => Some(LastAttemptStatus::ErrInvalidFormat),
            5 => Some(LastAttemptStatus::ErrAuthError),
            6 => Some(LastAttemptStatus::ErrPwrEvtAc),
            7 => Some(LastAttemptStatus::ErrPwrEvtBatt),
            _ => None,
        }
    }

    /// The stable identifier used in error messages and reports.
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            LastAttemptStatus::Success => "success",
            LastAttemptStatus::ErrUnsuccessful => "error-unsuccessful",
            LastAttemptStatus::ErrInsufficientResources => "error-insufficient-resources",
            LastAttemptStatus::ErrIncorrectVersion => "error-incorrect-version",
            LastAttemptStatus::ErrInvalidFormat => "error-invalid-format",
            LastAttemptStatus::ErrAuthError => "error-auth-error",
            LastAttemptStatus::ErrPwrEvtAc => "error-pwr-evt-ac",
            LastAttemptStatus::ErrPwrEvtBatt => "error-pwr-evt-batt",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum UpdateState {
    #[default]
    Unknown,
    Success,
    Failed,
    /// The attempt failed for a reason the user can fix by retrying, e.g.
    /// AC power or battery charge.
    FailedTransient,
}

/// Per-device behavior switches, set from quirks and configuration.
#[derive(Debug, Clone, Default)]
pub(crate) struct TargetFlags {
    /// Never synthesize a capsule header around the payload.
    pub(crate) no_capsule_header_fixup: bool,
    /// Deduplicate boot entries against the legacy hyphenated description.
    pub(crate) use_legacy_bootmgr_desc: bool,
    /// The firmware setup has a "Boot Order Lock" toggle that silently
    /// discards our BootXXXX entry.
    pub(crate) supports_boot_order_lock: bool,
    pub(crate) no_ux_capsule: bool,
    /// Require shim when Secure Boot is enabled.
    pub(crate) use_shim_for_sb: bool,
    /// Chain through a dedicated shimfwupd copy.
    pub(crate) use_shim_unique: bool,
    pub(crate) modify_bootorder: bool,
    /// RT->SetVariable is unusable (e.g. U-Boot); skip OsIndications.
    pub(crate) no_rt_set_variable: bool,
    /// InsydeH2O wants CapsuleUpdateFile%04X.bin naming for CoD.
    pub(crate) cod_indexed_filename: bool,
    /// Dell recovery-partition CoD flow.
    pub(crate) cod_dell_recovery: bool,
    /// Turn on verbose logging in the pre-boot binary.
    pub(crate) enable_debugging: bool,
}

/// One updatable firmware region as enumerated from the ESRT.
#[derive(Debug, Clone)]
pub(crate) struct CapsuleTarget {
    pub(crate) firmware_class: Uuid,
    pub(crate) kind: TargetKind,
    pub(crate) capsule_flags: u32,
    pub(crate) fw_version: u32,
    pub(crate) fw_version_lowest: u32,
    pub(crate) last_attempt_status: LastAttemptStatus,
    pub(crate) last_attempt_version: u32,
    pub(crate) hardware_instance: u64,
    pub(crate) flags: TargetFlags,
    pub(crate) update_state: UpdateState,
    pub(crate) update_error: Option<String>,
    /// The staged payload had no embedded capsule header; recorded for the
    /// post-update report.
    pub(crate) missing_header: bool,
}

impl CapsuleTarget {
    pub(crate) fn new(firmware_class: Uuid, kind: TargetKind) -> Self {
        let mut target = CapsuleTarget {
            firmware_class,
            kind,
            capsule_flags: 0,
            fw_version: 0,
            fw_version_lowest: 0,
            last_attempt_status: LastAttemptStatus::Success,
            last_attempt_version: 0,
            hardware_instance: 0,
            flags: TargetFlags::default(),
            update_state: UpdateState::Unknown,
            update_error: None,
            missing_header: false,
        };
        // these kinds carry a vendor-specific wrapper already
        if matches!(kind, TargetKind::Fmp | TargetKind::DellTpmFirmware) {
            target.flags.no_capsule_header_fixup = true;
        }
        target
    }

    /// The `fwupd-<GUID>-<hw_inst>` variable name binding this target to
    /// its UPDATE_INFO record.
    pub(crate) fn build_varname(&self) -> String {
        format!("fwupd-{}-{}", self.firmware_class, self.hardware_instance)
    }

    /// Record the outcome of the last attempt, deriving the update state
    /// and a user-facing error per the power-event transiency rules.
    pub(crate) fn set_status(&mut self, status: LastAttemptStatus) {
        self.last_attempt_status = status;
        if status == LastAttemptStatus::Success {
            self.update_state = UpdateState::Success;
            self.update_error = None;
            return;
        }
        self.update_state = match status {
            LastAttemptStatus::ErrPwrEvtAc | LastAttemptStatus::ErrPwrEvtBatt => {
                UpdateState::FailedTransient
            }
            _ => UpdateState::Failed,
        };
        self.update_error = Some(format!(
            "failed to update to {}: {}",
            self.last_attempt_version,
            status.as_str()
        ));
    }

    pub(crate) fn set_update_failure(&mut self, state: UpdateState, message: impl Into<String>) {
        self.update_state = state;
        self.update_error = Some(message.into());
    }

    pub(crate) fn load_update_info(&self, efivars: &dyn Efivars) -> Result<UpdateInfo> {
        let varname = self.build_varname();
        let buf = efivars.get_data_bytes(&efivars::GUID_FWUPDATE, &varname)?;
        UpdateInfo::parse(&buf)
    }

    /// Reset the persisted status to Unknown so the next install starts
    /// from a clean slate; the rest of the record is preserved.
    pub(crate) fn clear_status(&self, efivars: &dyn Efivars) -> Result<()> {
        let varname = self.build_varname();
        let buf = efivars.get_data_bytes(&efivars::GUID_FWUPDATE, &varname)?;
        let mut info = UpdateInfo::parse(&buf)
            .map_err(|e| Error::InvalidData(format!("EFI variable is corrupt: {e}")))?;
        info.status = UpdateInfoStatus::Unknown;
        efivars.set_data(
            &efivars::GUID_FWUPDATE,
            &varname,
            &info.serialize()?,
            efivars::ATTR_DEFAULT,
        )
    }

    pub(crate) fn status(&self) -> TargetStatus {
        TargetStatus {
            guid: self.firmware_class,
            kind: self.kind,
            fw_version: self.fw_version,
            fw_version_lowest: self.fw_version_lowest,
            last_attempt_version: self.last_attempt_version,
            last_attempt_status: self.last_attempt_status,
            update_state: self.update_state,
            update_error: self.update_error.clone(),
        }
    }
}

/// Stable status view emitted by `capsuleupd status --json`.
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct TargetStatus {
    pub(crate) guid: Uuid,
    pub(crate) kind: TargetKind,
    pub(crate) fw_version: u32,
    pub(crate) fw_version_lowest: u32,
    pub(crate) last_attempt_version: u32,
    pub(crate) last_attempt_status: LastAttemptStatus,
    pub(crate) update_state: UpdateState,
    pub(crate) update_error: Option<String>,
}
