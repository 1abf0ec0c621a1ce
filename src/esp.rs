/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! The EFI System Partition: volume model, scoped mount locker, and the
//! on-ESP file helpers shared by the delivery back-ends.

use std::path::Path;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use uuid::{uuid, Uuid};

use crate::efidp::{HardDriveNode, PartitionScheme};
use crate::error::{Error, Result};
use crate::util::CommandRunExt;

/// The GPT partition type of a real ESP.
pub(crate) const ESP_PARTITION_KIND: Uuid = uuid!("c12a7328-f81f-11d2-ba4b-00a0c93ec93b");

#[derive(Debug, Clone)]
pub(crate) struct EspVolume {
    pub(crate) mount_point: Utf8PathBuf,
    /// Block device to mount when the volume is not already mounted; a
    /// plain directory tree (tests, chroots) has none.
    pub(crate) device: Option<Utf8PathBuf>,
    pub(crate) partition_kind: Option<Uuid>,
    /// GPT partition GUID, or nil with the MBR disk signature in the low
    /// four bytes.
    pub(crate) partition_uuid: Uuid,
    pub(crate) partition_number: u32,
    pub(crate) partition_start: u64,
    pub(crate) partition_size: u64,
    pub(crate) scheme: PartitionScheme,
}

impl EspVolume {
    /// A volume with no partition identity; enough for staging into a
    /// directory tree and for the test suite.
    pub(crate) fn new_from_mount_path(mount_point: impl AsRef<Utf8Path>) -> Self {
        EspVolume {
            mount_point: mount_point.as_ref().to_path_buf(),
            device: None,
            partition_kind: None,
            partition_uuid: Uuid::nil(),
            partition_number: 0,
            partition_start: 0,
            partition_size: 0,
            scheme: PartitionScheme::Gpt,
        }
    }

    pub(crate) fn is_esp(&self) -> bool {
        self.partition_kind == Some(ESP_PARTITION_KIND)
    }

    /// Fails with NotSupported when fewer than `required` bytes are free,
    /// so a cramped ESP is reported as a platform limitation rather than a
    /// write error halfway through.
    pub(crate) fn check_free_space(&self, required: u64) -> Result<()> {
        let free = fs2::available_space(self.mount_point.as_std_path())
            .map_err(|e| Error::from_io(self.mount_point.as_str(), e))?;
        if free < required {
            return Err(Error::NotSupported(format!(
                "ESP free space {free} is less than required {required}"
            )));
        }
        Ok(())
    }

    pub(crate) fn hard_drive_node(&self) -> HardDriveNode {
        let signature = match self.scheme {
            PartitionScheme::Gpt => self.partition_uuid.to_bytes_le(),
            PartitionScheme::Mbr => {
                let mut sig = [0u8; 16];
                sig[0..4].copy_from_slice(&self.partition_uuid.to_bytes_le()[0..4]);
                sig
            }
        };
        HardDriveNode {
            partition_number: self.partition_number,
            partition_start: self.partition_start,
            partition_size: self.partition_size,
            signature,
            scheme: self.scheme,
        }
    }

    pub(crate) fn target_exists(&self, target: &Utf8Path) -> bool {
        self.mount_point.join(target).exists()
    }

    /// Whether the on-ESP copy of `target` already matches `source`,
    /// compared by SHA-256.
    pub(crate) fn target_verify(&self, source: &Path, target: &Utf8Path) -> bool {
        let target_fn = self.mount_point.join(target);
        let (Ok(source_data), Ok(target_data)) =
            (std::fs::read(source), std::fs::read(target_fn))
        else {
            return false;
        };
        openssl::sha::sha256(&source_data) == openssl::sha::sha256(&target_data)
    }

    pub(crate) fn target_copy(&self, source: &Path, target: &Utf8Path) -> Result<()> {
        let target_fn = self.mount_point.join(target);
        if let Some(parent) = target_fn.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::from_io(parent.as_str(), e))?;
        }
        std::fs::copy(source, &target_fn).map_err(|e| {
            Error::Write(format!(
                "failed to copy {} to {target_fn}: {e}",
                source.display()
            ))
        })?;
        Ok(())
    }

    /// Write bytes to an ESP-relative path, creating parents.
    pub(crate) fn write_target(&self, target: &Utf8Path, data: &[u8]) -> Result<()> {
        let target_fn = self.mount_point.join(target);
        if let Some(parent) = target_fn.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::from_io(parent.as_str(), e))?;
        }
        std::fs::write(&target_fn, data).map_err(|e| Error::from_io(target_fn.as_str(), e))
    }
}

/// Scoped mount state for the ESP.
///
/// Acquired when staging starts and released on all exit paths: mounts on
/// entry if the volume is not already mounted, and leaves a user-mounted
/// ESP alone on drop.
pub(crate) struct EspLocker<'a> {
    volume: &'a EspVolume,
    mounted_by_us: bool,
}

impl<'a> EspLocker<'a> {
    pub(crate) fn acquire(volume: &'a EspVolume) -> Result<Self> {
        if is_mount_point(&volume.mount_point) {
            log::debug!("reusing existing mount point {}", volume.mount_point);
            return Ok(Self {
                volume,
                mounted_by_us: false,
            });
        }
        let Some(device) = volume.device.as_deref() else {
            // a plain directory stand-in; nothing to mount
            return Ok(Self {
                volume,
                mounted_by_us: false,
            });
        };
        Command::new("mount")
            .arg(device)
            .arg(&volume.mount_point)
            .run()
            .map_err(|e| Error::Write(format!("failed to mount {device}: {e:#}")))?;
        log::debug!("mounted {} at {}", device, volume.mount_point);
        Ok(Self {
            volume,
            mounted_by_us: true,
        })
    }
}

impl Drop for EspLocker<'_> {
    fn drop(&mut self) {
        if !self.mounted_by_us {
            return;
        }
        if let Err(e) = Command::new("umount").arg(&self.volume.mount_point).run() {
            log::warn!("failed to unmount {}: {e:#}", self.volume.mount_point);
        } else {
            log::trace!("unmounted {}", self.volume.mount_point);
        }
    }
}

fn is_mount_point(path: &Utf8Path) -> bool {
    let Ok(mounts) = std::fs::read_to_string("/proc/mounts") else {
        // no procfs; a present directory is as mounted as it gets
        return path.is_dir();
    };
    mounts
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .any(|mnt| mnt == path.as_str())
}

/// Well-known paths the ESP may have been mounted at by the distribution.
pub(crate) const ESP_MOUNTS: &[&str] = &["boot/efi", "efi", "boot"];

/// Find a mounted ESP, preferring an explicit override from configuration.
pub(crate) fn discover_system_esp(override_mount: Option<&str>) -> Result<Option<EspVolume>> {
    if let Some(mnt) = override_mount {
        return Ok(Some(volume_from_mount(Utf8Path::new(mnt))));
    }
    for mnt in ESP_MOUNTS {
        let path = Utf8PathBuf::from("/").join(mnt);
        if !path.exists() {
            continue;
        }
        let Ok(st) = rustix::fs::statfs(path.as_std_path()) else {
            continue;
        };
        if st.f_type == libc::MSDOS_SUPER_MAGIC {
            log::debug!("found ESP at {path}");
            return Ok(Some(volume_from_mount(&path)));
        }
    }
    Ok(None)
}

/// Build the volume model for a mounted ESP, pulling the partition
/// identity the HD() device path node needs out of sysfs.
fn volume_from_mount(mount: &Utf8Path) -> EspVolume {
    let mut volume = EspVolume::new_from_mount_path(mount);
    let Some(device) = device_for_mount(mount) else {
        log::warn!("no block device found for {mount}, device paths will be incomplete");
        return volume;
    };
    volume.device = Some(device.clone());
    let Some(devname) = device.file_name() else {
        return volume;
    };
    let sys = Utf8PathBuf::from("/sys/class/block").join(devname);
    volume.partition_number =
        crate::util::read_file_as_u64(sys.as_std_path(), "partition") as u32;
    // sysfs reports 512-byte sectors, which is also what HD() wants
    volume.partition_start = crate::util::read_file_as_u64(sys.as_std_path(), "start");
    volume.partition_size = crate::util::read_file_as_u64(sys.as_std_path(), "size");
    if let Some((uuid, scheme)) = partition_identity(devname) {
        volume.partition_uuid = uuid;
        volume.scheme = scheme;
        if scheme == PartitionScheme::Gpt {
            volume.partition_kind = Some(ESP_PARTITION_KIND);
        }
    }
    volume
}

fn device_for_mount(mount: &Utf8Path) -> Option<Utf8PathBuf> {
    let mounts = std::fs::read_to_string("/proc/mounts").ok()?;
    for line in mounts.lines() {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mnt)) = (fields.next(), fields.next()) else {
            continue;
        };
        if mnt == mount.as_str() && device.starts_with("/dev/") {
            return Some(Utf8PathBuf::from(device));
        }
    }
    None
}

/// Resolve the partition UUID and table scheme via /dev/disk/by-partuuid.
/// GPT symlinks are named with the full partition GUID; MBR ones use the
/// `<disksig>-<part>` form.
fn partition_identity(devname: &str) -> Option<(Uuid, PartitionScheme)> {
    let entries = std::fs::read_dir("/dev/disk/by-partuuid").ok()?;
    for entry in entries.flatten() {
        let target = std::fs::read_link(entry.path()).ok()?;
        if target.file_name().and_then(|f| f.to_str()) != Some(devname) {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_str()?;
        if let Ok(uuid) = Uuid::parse_str(name) {
            return Some((uuid, PartitionScheme::Gpt));
        }
        if let Some((sig, _part)) = name.split_once('-') {
            if let Ok(sig) = u32::from_str_radix(sig, 16) {
                return Some((
                    Uuid::from_fields(sig, 0, 0, &[0u8; 8]),
                    PartitionScheme::Mbr,
                ));
            }
        }
    }
    None
}

/// The `EFI/<os_dir>` directory this OS owns on the ESP.
///
/// systemd-boot wins if its directory exists, then the os-release ID, then
/// each ID_LIKE entry, falling back to the ID-derived path even when it
/// does not exist yet.
pub(crate) fn esp_path_for_os(esp_base: &Utf8Path) -> Utf8PathBuf {
    let systemd_path = Utf8PathBuf::from("EFI/systemd");
    if esp_base.join(&systemd_path).is_dir() {
        return systemd_path;
    }
    let release = os_release::OsRelease::new().ok();
    let os_id = release
        .as_ref()
        .map(|r| r.id.clone())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| "unknown".to_string());
    let esp_path = Utf8PathBuf::from("EFI").join(&os_id);
    if esp_base.join(&esp_path).is_dir() {
        return esp_path;
    }
    if let Some(release) = &release {
        for id_like in release.id_like.split_whitespace() {
            let id_like_path = Utf8PathBuf::from("EFI").join(id_like);
            if esp_base.join(&id_like_path).is_dir() {
                log::debug!("using ID_LIKE key from os-release");
                return id_like_path;
            }
        }
    }
    esp_path
}

/// `\EFI\<os>\...` form of an ESP-relative path for UCS-2 device path and
/// load option encoding.
pub(crate) fn to_uefi_path(relative: &Utf8Path) -> String {
    format!("\\{}", relative.as_str().replace('/', "\\"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_uefi_path() {
        assert_eq!(
            to_uefi_path(Utf8Path::new("EFI/fedora/fw/fwupd.cap")),
            "\\EFI\\fedora\\fw\\fwupd.cap"
        );
    }

    #[test]
    fn test_esp_path_for_os_systemd() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let base = Utf8Path::from_path(td.path()).unwrap();
        std::fs::create_dir_all(base.join("EFI/systemd"))?;
        assert_eq!(esp_path_for_os(base), Utf8PathBuf::from("EFI/systemd"));
        Ok(())
    }

    #[test]
    fn test_free_space() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let base = Utf8Path::from_path(td.path()).unwrap();
        let esp = EspVolume::new_from_mount_path(base);
        esp.check_free_space(1)?;
        let err = esp.check_free_space(u64::MAX).unwrap_err();
        assert!(err.is_not_supported());
        Ok(())
    }

    #[test]
    fn test_target_copy_verify() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let base = Utf8Path::from_path(td.path()).unwrap();
        let esp = EspVolume::new_from_mount_path(base);

        let source = td.path().join("shimx64.efi");
        std::fs::write(&source, b"shim data")?;
        let target = Utf8Path::new("EFI/fedora/shimx64.efi");
        assert!(!esp.target_exists(target));
        assert!(!esp.target_verify(&source, target));

        esp.target_copy(&source, target)?;
        assert!(esp.target_exists(target));
        assert!(esp.target_verify(&source, target));

        std::fs::write(&source, b"newer shim data")?;
        assert!(!esp.target_verify(&source, target));
        Ok(())
    }

    #[test]
    fn test_hard_drive_node_mbr_signature() {
        let mut esp = EspVolume::new_from_mount_path("/tmp");
        esp.partition_uuid = uuid::uuid!("deadbeef-0000-0000-0000-000000000000");
        esp.scheme = PartitionScheme::Mbr;
        let node = esp.hard_drive_node();
        assert_eq!(&node.signature[0..4], &[0xef, 0xbe, 0xad, 0xde]);
        assert_eq!(&node.signature[4..], &[0u8; 12]);
    }
}
