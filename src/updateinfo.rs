/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! The UPDATE_INFO record shared with the pre-boot updater binary.
//!
//! This is the binding persisted in NVRAM that tells fwupd.efi where the
//! staged capsule lives; the layout is fixed by that binary and must not
//! drift.  All integers are little-endian.

use chrono::{Datelike, Timelike, Utc};
use uuid::Uuid;

use crate::efidp::{self, DevicePathNode};
use crate::error::{Error, Result};

pub(crate) const UPDATE_INFO_VERSION: u32 = 0x7;

/// Fixed-size prefix before the variable-length device path.
const UPDATE_INFO_SIZE: usize = 52;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateInfoStatus {
    Unknown,
    AttemptUpdate,
    Attempted,
}

impl UpdateInfoStatus {
    fn from_raw(value: u32) -> Result<Self> {
        match value {
            0 => Ok(UpdateInfoStatus::Unknown),
            1 => Ok(UpdateInfoStatus::AttemptUpdate),
            2 => Ok(UpdateInfoStatus::Attempted),
            other => Err(Error::InvalidData(format!(
                "unknown update info status {other}"
            ))),
        }
    }

    fn to_raw(self) -> u32 {
        match self {
            UpdateInfoStatus::Unknown => 0,
            UpdateInfoStatus::AttemptUpdate => 1,
            UpdateInfoStatus::Attempted => 2,
        }
    }
}

/// EFI_TIME, 16 packed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct EfiTime {
    pub(crate) year: u16,
    pub(crate) month: u8,
    pub(crate) day: u8,
    pub(crate) hour: u8,
    pub(crate) minute: u8,
    pub(crate) second: u8,
    pub(crate) nanosecond: u32,
    pub(crate) timezone: i16,
    pub(crate) daylight: u8,
}

impl EfiTime {
    pub(crate) fn now() -> Self {
        let now = Utc::now();
        EfiTime {
            year: now.year() as u16,
            month: now.month() as u8,
            day: now.day() as u8,
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            second: now.second() as u8,
            nanosecond: now.nanosecond(),
            timezone: 0,
            daylight: 0,
        }
    }

    fn serialize(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[0..2].copy_from_slice(&self.year.to_le_bytes());
        buf[2] = self.month;
        buf[3] = self.day;
        buf[4] = self.hour;
        buf[5] = self.minute;
        buf[6] = self.second;
        // buf[7] is pad1
        buf[8..12].copy_from_slice(&self.nanosecond.to_le_bytes());
        buf[12..14].copy_from_slice(&self.timezone.to_le_bytes());
        buf[14] = self.daylight;
        // buf[15] is pad2
        buf
    }

    fn parse(buf: &[u8]) -> Self {
        EfiTime {
            year: u16::from_le_bytes([buf[0], buf[1]]),
            month: buf[2],
            day: buf[3],
            hour: buf[4],
            minute: buf[5],
            second: buf[6],
            nanosecond: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            timezone: i16::from_le_bytes([buf[12], buf[13]]),
            daylight: buf[14],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UpdateInfo {
    pub(crate) guid: Uuid,
    pub(crate) capsule_flags: u32,
    pub(crate) hw_inst: u64,
    pub(crate) time_attempted: EfiTime,
    pub(crate) status: UpdateInfoStatus,
    pub(crate) device_path: Vec<DevicePathNode>,
}

impl UpdateInfo {
    pub(crate) fn new(
        guid: Uuid,
        capsule_flags: u32,
        hw_inst: u64,
        status: UpdateInfoStatus,
        device_path: Vec<DevicePathNode>,
    ) -> Self {
        UpdateInfo {
            guid,
            capsule_flags,
            hw_inst,
            time_attempted: EfiTime::now(),
            status,
            device_path,
        }
    }

    pub(crate) fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(UPDATE_INFO_SIZE + 64);
        buf.extend_from_slice(&UPDATE_INFO_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.guid.to_bytes_le());
        buf.extend_from_slice(&self.capsule_flags.to_le_bytes());
        buf.extend_from_slice(&self.hw_inst.to_le_bytes());
        buf.extend_from_slice(&self.time_attempted.serialize());
        buf.extend_from_slice(&self.status.to_raw().to_le_bytes());
        if !self.device_path.is_empty() {
            buf.extend_from_slice(&efidp::serialize(&self.device_path)?);
        }
        Ok(buf)
    }

    pub(crate) fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < UPDATE_INFO_SIZE {
            return Err(Error::InvalidData(format!(
                "UPDATE_INFO variable is corrupt: {} bytes",
                buf.len()
            )));
        }
        let version = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if version != UPDATE_INFO_VERSION {
            // the pre-boot binary would misparse everything after this
            return Err(Error::Internal(format!(
                "UPDATE_INFO version {version:#x}, expected {UPDATE_INFO_VERSION:#x}"
            )));
        }
        let guid = Uuid::from_bytes_le(buf[4..20].try_into().unwrap());
        let capsule_flags = u32::from_le_bytes(buf[20..24].try_into().unwrap());
        let hw_inst = u64::from_le_bytes(buf[24..32].try_into().unwrap());
        let time_attempted = EfiTime::parse(&buf[32..48]);
        let status = UpdateInfoStatus::from_raw(u32::from_le_bytes(buf[48..52].try_into().unwrap()))?;
        let device_path = if buf.len() > UPDATE_INFO_SIZE {
            efidp::parse(&buf[UPDATE_INFO_SIZE..])?
        } else {
            Vec::new()
        };
        Ok(UpdateInfo {
            guid,
            capsule_flags,
            hw_inst,
            time_attempted,
            status,
            device_path,
        })
    }

    /// The staged capsule location from the File() node, if bound.
    pub(crate) fn capsule_path(&self) -> Option<&str> {
        efidp::find_file_path(&self.device_path)
    }
}
