/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Typed access to the platform EFI variable store.
//!
//! Everything else in the crate goes through the [`Efivars`] trait so the
//! variable store can be faked in tests; the only production implementation
//! is [`Efivarfs`] over `/sys/firmware/efi/efivars`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use uuid::{uuid, Uuid};

use crate::error::{Error, Result};

/// EFI_GLOBAL_VARIABLE: BootOrder, BootNext, Boot%04X, SecureBoot, OsIndications.
pub(crate) const GUID_EFI_GLOBAL: Uuid = uuid!("8be4df61-93ca-11d2-aa0d-00e098032b8c");
/// Variables shared with the pre-boot updater binary.
pub(crate) const GUID_FWUPDATE: Uuid = uuid!("0abba7dc-e516-4167-bbf5-4d9d1c739416");
/// Capsule identifier for the UX splash; never used as a variable name.
pub(crate) const GUID_UX_CAPSULE: Uuid = uuid!("3b8c8162-188c-46a4-aec9-be43f1d65697");
/// db/dbx/KEK security database owner.
pub(crate) const GUID_SECURITY_DATABASE: Uuid = uuid!("d719b2cb-3d3a-4596-a3bc-dad00e67656f");
/// EFI_CAPSULE_REPORT: CapsuleLast/Capsule%04u result records.
pub(crate) const GUID_EFI_CAPSULE_REPORT: Uuid = uuid!("39b68c46-f7fb-441b-b6ec-16b0f69821f3");
/// shim's SbatLevelRT lives here.
pub(crate) const GUID_SHIM: Uuid = uuid!("605dab50-e046-4300-abb6-3dd810dd8b23");
/// Dell flash capability variables (DellFwuCapSupported / DellFwuCap).
pub(crate) const GUID_DELL_FLASH_CAPABILITY: Uuid = uuid!("abba7dc1-e516-4167-bbf5-4d9d1c739416");

pub(crate) const ATTR_NON_VOLATILE: u32 = 1 << 0;
pub(crate) const ATTR_BOOTSERVICE_ACCESS: u32 = 1 << 1;
pub(crate) const ATTR_RUNTIME_ACCESS: u32 = 1 << 2;
#[allow(dead_code)]
pub(crate) const ATTR_HARDWARE_ERROR_RECORD: u32 = 1 << 3;
#[allow(dead_code)]
pub(crate) const ATTR_AUTHENTICATED_WRITE_ACCESS: u32 = 1 << 4;
pub(crate) const ATTR_TIME_BASED_AUTHENTICATED_WRITE_ACCESS: u32 = 1 << 5;
pub(crate) const ATTR_APPEND_WRITE: u32 = 1 << 6;

/// The attributes used for every variable the core creates itself.
pub(crate) const ATTR_DEFAULT: u32 =
    ATTR_NON_VOLATILE | ATTR_BOOTSERVICE_ACCESS | ATTR_RUNTIME_ACCESS;

/// Abstraction over the platform variable store.
///
/// All data crosses the boundary as owned buffers; implementations never
/// hand out references to internal storage.
pub(crate) trait Efivars {
    /// Fails with NotSupported when the platform has no writable EFI
    /// variable service.
    fn supported(&self) -> Result<()>;

    /// Sum of all visible variable sizes, used to warn before staging when
    /// NVRAM is nearly full.
    fn space_used(&self) -> Result<u64>;

    fn exists(&self, guid: &Uuid, name: &str) -> bool;

    /// Returns the payload and its attribute bits.
    fn get_data(&self, guid: &Uuid, name: &str) -> Result<(Vec<u8>, u32)>;

    fn set_data(&self, guid: &Uuid, name: &str, data: &[u8], attrs: u32) -> Result<()>;

    /// Idempotent: succeeds if the variable is already absent.
    fn delete(&self, guid: &Uuid, name: &str) -> Result<()>;

    /// Bulk delete by shell-style glob over the variable name.
    fn delete_with_glob(&self, guid: &Uuid, name_glob: &str) -> Result<()>;

    /// All variable names under the GUID; NotFound when none match.
    fn get_names(&self, guid: &Uuid) -> Result<Vec<String>>;

    fn get_data_bytes(&self, guid: &Uuid, name: &str) -> Result<Vec<u8>> {
        self.get_data(guid, name).map(|(data, _)| data)
    }

    /// `BootOrder` as a typed slot list; an absent variable is an empty order.
    fn get_boot_order(&self) -> Result<Vec<u16>> {
        let buf = match self.get_data_bytes(&GUID_EFI_GLOBAL, "BootOrder") {
            Ok(buf) => buf,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(buf
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    fn set_boot_order(&self, order: &[u16]) -> Result<()> {
        let mut buf = Vec::with_capacity(order.len() * 2);
        for slot in order {
            buf.extend_from_slice(&slot.to_le_bytes());
        }
        self.set_data(&GUID_EFI_GLOBAL, "BootOrder", &buf, ATTR_DEFAULT)
    }

    fn get_boot_next(&self) -> Result<u16> {
        let buf = self.get_data_bytes(&GUID_EFI_GLOBAL, "BootNext")?;
        if buf.len() < 2 {
            return Err(Error::InvalidData("BootNext is truncated".to_string()));
        }
        Ok(u16::from_le_bytes([buf[0], buf[1]]))
    }

    fn set_boot_next(&self, slot: u16) -> Result<()> {
        self.set_data(
            &GUID_EFI_GLOBAL,
            "BootNext",
            &slot.to_le_bytes(),
            ATTR_DEFAULT,
        )
    }

    /// Raw `Boot%04X` load option payload.
    fn get_boot_data(&self, slot: u16) -> Result<Vec<u8>> {
        self.get_data_bytes(&GUID_EFI_GLOBAL, &format!("Boot{slot:04X}"))
    }

    fn set_boot_data(&self, slot: u16, data: &[u8]) -> Result<()> {
        self.set_data(
            &GUID_EFI_GLOBAL,
            &format!("Boot{slot:04X}"),
            data,
            ATTR_DEFAULT,
        )
    }

    /// Whether Secure Boot is enabled; an absent variable reads as disabled.
    fn get_secure_boot(&self) -> Result<bool> {
        match self.get_data_bytes(&GUID_EFI_GLOBAL, "SecureBoot") {
            Ok(buf) => Ok(!buf.is_empty() && buf[0] & 1 > 0),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// The Linux efivarfs implementation.
///
/// On-disk format per variable file: a u32 of attribute bits followed by the
/// payload; unprivileged modification is blocked by the filesystem immutable
/// flag which has to be toggled around every write (see [`ImmutableGuard`]).
pub(crate) struct Efivarfs {
    path: PathBuf,
}

impl Efivarfs {
    pub(crate) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The production store at `/sys/firmware/efi/efivars`.
    pub(crate) fn system() -> Self {
        Self::new("/sys/firmware/efi/efivars")
    }

    fn filename(&self, guid: &Uuid, name: &str) -> PathBuf {
        self.path.join(format!("{name}-{guid}"))
    }
}

/// Scoped handling of the efivarfs immutable flag.
///
/// Opening the guard records whether FS_IMMUTABLE_FL was set and clears it;
/// dropping the guard restores the flag if it was set, including on error
/// paths.  ENOTTY/ENOSYS from the ioctl mean the file is not backed by
/// efivarfs (tmpfs in tests) and are treated as "no flag existed".
struct ImmutableGuard {
    file: File,
    was_immutable: bool,
}

impl ImmutableGuard {
    fn clear(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::from_io(path.display().to_string(), e))?;
        let was_immutable = match rustix::fs::ioctl_getflags(&file) {
            Ok(flags) => flags.contains(rustix::fs::IFlags::IMMUTABLE),
            // not backed by efivarfs, e.g. tmpfs in the test suite
            Err(e) if e == rustix::io::Errno::NOTTY || e == rustix::io::Errno::NOSYS => false,
            Err(e) => {
                return Err(Error::Write(format!(
                    "failed to get flags of {}: {e}",
                    path.display()
                )))
            }
        };
        if was_immutable {
            let mut flags = rustix::fs::ioctl_getflags(&file)
                .map_err(|e| Error::Write(format!("failed to get flags: {e}")))?;
            flags.remove(rustix::fs::IFlags::IMMUTABLE);
            rustix::fs::ioctl_setflags(&file, flags).map_err(|e| {
                Error::PermissionDenied(format!(
                    "failed to clear immutable flag on {}: {e}",
                    path.display()
                ))
            })?;
        }
        Ok(Self {
            file,
            was_immutable,
        })
    }
}

impl Drop for ImmutableGuard {
    fn drop(&mut self) {
        if !self.was_immutable {
            return;
        }
        let flags = match rustix::fs::ioctl_getflags(&self.file) {
            Ok(f) => f | rustix::fs::IFlags::IMMUTABLE,
            Err(e) => {
                log::warn!("failed to re-read flags to restore immutable: {e}");
                return;
            }
        };
        if let Err(e) = rustix::fs::ioctl_setflags(&self.file, flags) {
            log::warn!("failed to restore immutable flag: {e}");
        }
    }
}

impl Efivars for Efivarfs {
    fn supported(&self) -> Result<()> {
        if !self.path.is_dir() {
            return Err(Error::NotSupported(format!(
                "kernel efivars support missing: {}",
                self.path.display()
            )));
        }
        let stat = rustix::fs::statvfs(&self.path)
            .map_err(|e| Error::NotSupported(format!("statvfs: {e}")))?;
        if stat.f_flag.contains(rustix::fs::StatVfsMountFlags::RDONLY) {
            return Err(Error::NotSupported(format!(
                "{} is mounted read-only",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn space_used(&self) -> Result<u64> {
        let entries = std::fs::read_dir(&self.path)
            .map_err(|e| Error::from_io(self.path.display().to_string(), e))?;
        let mut total = 0u64;
        for entry in entries {
            let entry = entry.map_err(|e| Error::from_io("readdir", e))?;
            if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
        Ok(total)
    }

    fn exists(&self, guid: &Uuid, name: &str) -> bool {
        self.filename(guid, name).exists()
    }

    fn get_data(&self, guid: &Uuid, name: &str) -> Result<(Vec<u8>, u32)> {
        let fn_ = self.filename(guid, name);
        let buf = std::fs::read(&fn_).map_err(|e| Error::from_io(fn_.display().to_string(), e))?;
        if buf.len() < 4 {
            return Err(Error::InvalidData(format!(
                "efivars file too small: {} bytes",
                buf.len()
            )));
        }
        let attrs = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        Ok((buf[4..].to_vec(), attrs))
    }

    fn set_data(&self, guid: &Uuid, name: &str, data: &[u8], attrs: u32) -> Result<()> {
        let fn_ = self.filename(guid, name);
        // create an empty file so the immutable bit can be inspected first
        if !fn_.exists() {
            File::create(&fn_).map_err(|e| Error::from_io(fn_.display().to_string(), e))?;
        }
        let _guard = ImmutableGuard::clear(&fn_)?;

        let mut buf = Vec::with_capacity(4 + data.len());
        buf.extend_from_slice(&attrs.to_le_bytes());
        buf.extend_from_slice(data);

        // the attributes and payload must land in a single write(2)
        let mut f = OpenOptions::new()
            .write(true)
            .open(&fn_)
            .map_err(|e| Error::from_io(fn_.display().to_string(), e))?;
        let n = f
            .write(&buf)
            .map_err(|e| Error::from_io(fn_.display().to_string(), e))?;
        if n != buf.len() {
            return Err(Error::Write(format!(
                "short write to {}: {n} of {} bytes",
                fn_.display(),
                buf.len()
            )));
        }
        Ok(())
    }

    fn delete(&self, guid: &Uuid, name: &str) -> Result<()> {
        let fn_ = self.filename(guid, name);
        if !fn_.exists() {
            return Ok(());
        }
        let _guard = ImmutableGuard::clear(&fn_)?;
        std::fs::remove_file(&fn_).map_err(|e| Error::from_io(fn_.display().to_string(), e))
    }

    fn delete_with_glob(&self, guid: &Uuid, name_glob: &str) -> Result<()> {
        let re = crate::util::glob_to_regex(&format!("{name_glob}-{guid}"));
        let entries = std::fs::read_dir(&self.path)
            .map_err(|e| Error::from_io(self.path.display().to_string(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::from_io("readdir", e))?;
            let fname = entry.file_name();
            let Some(fname) = fname.to_str() else {
                continue;
            };
            if re.is_match(fname) {
                log::debug!("deleting EFI variable {fname}");
                let path = entry.path();
                let _guard = ImmutableGuard::clear(&path)?;
                std::fs::remove_file(&path)
                    .map_err(|e| Error::from_io(path.display().to_string(), e))?;
            }
        }
        Ok(())
    }

    fn get_names(&self, guid: &Uuid) -> Result<Vec<String>> {
        let suffix = format!("-{guid}");
        let entries = std::fs::read_dir(&self.path)
            .map_err(|e| Error::from_io(self.path.display().to_string(), e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::from_io("readdir", e))?;
            if let Some(fname) = entry.file_name().to_str() {
                if let Some(name) = fname.strip_suffix(&suffix) {
                    names.push(name.to_string());
                }
            }
        }
        if names.is_empty() {
            return Err(Error::NotFound(format!("no variables under {guid}")));
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! An in-memory variable store for tests.

    use std::cell::RefCell;
    use std::collections::BTreeMap;

    use super::*;

    #[derive(Default)]
    pub(crate) struct MemoryEfivars {
        vars: RefCell<BTreeMap<(Uuid, String), (Vec<u8>, u32)>>,
    }

    impl MemoryEfivars {
        pub(crate) fn new() -> Self {
            Self::default()
        }
    }

    impl Efivars for MemoryEfivars {
        fn supported(&self) -> Result<()> {
            Ok(())
        }

        fn space_used(&self) -> Result<u64> {
            Ok(self
                .vars
                .borrow()
                .values()
                .map(|(data, _)| 4 + data.len() as u64)
                .sum())
        }

        fn exists(&self, guid: &Uuid, name: &str) -> bool {
            self.vars
                .borrow()
                .contains_key(&(*guid, name.to_string()))
        }

        fn get_data(&self, guid: &Uuid, name: &str) -> Result<(Vec<u8>, u32)> {
            self.vars
                .borrow()
                .get(&(*guid, name.to_string()))
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("{name}-{guid}")))
        }

        fn set_data(&self, guid: &Uuid, name: &str, data: &[u8], attrs: u32) -> Result<()> {
            let key = (*guid, name.to_string());
            let mut vars = self.vars.borrow_mut();
            // the firmware implements append semantics for AppendWrite
            if attrs & ATTR_APPEND_WRITE > 0 {
                if let Some((existing, _)) = vars.get_mut(&key) {
                    existing.extend_from_slice(data);
                    return Ok(());
                }
            }
            vars.insert(key, (data.to_vec(), attrs));
            Ok(())
        }

        fn delete(&self, guid: &Uuid, name: &str) -> Result<()> {
            self.vars.borrow_mut().remove(&(*guid, name.to_string()));
            Ok(())
        }

        fn delete_with_glob(&self, guid: &Uuid, name_glob: &str) -> Result<()> {
            let re = crate::util::glob_to_regex(name_glob);
            self.vars
                .borrow_mut()
                .retain(|(g, name), _| g != guid || !re.is_match(name));
            Ok(())
        }

        fn get_names(&self, guid: &Uuid) -> Result<Vec<String>> {
            let names: Vec<String> = self
                .vars
                .borrow()
                .keys()
                .filter(|(g, _)| g == guid)
                .map(|(_, name)| name.clone())
                .collect();
            if names.is_empty() {
                return Err(Error::NotFound(format!("no variables under {guid}")));
            }
            Ok(names)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryEfivars;
    use super::*;

    #[test]
    fn test_efivarfs_roundtrip() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let efivars = Efivarfs::new(td.path());
        efivars.supported()?;

        let guid = GUID_FWUPDATE;
        assert!(!efivars.exists(&guid, "FWUPDATE_VERBOSE"));
        assert!(efivars
            .get_data(&guid, "FWUPDATE_VERBOSE")
            .unwrap_err()
            .is_not_found());

        efivars.set_data(&guid, "FWUPDATE_VERBOSE", &[1], ATTR_DEFAULT)?;
        let (data, attrs) = efivars.get_data(&guid, "FWUPDATE_VERBOSE")?;
        assert_eq!(data, vec![1]);
        assert_eq!(attrs, ATTR_DEFAULT);
        assert!(efivars.space_used()? >= 5);

        // delete is idempotent
        efivars.delete(&guid, "FWUPDATE_VERBOSE")?;
        efivars.delete(&guid, "FWUPDATE_VERBOSE")?;
        assert!(!efivars.exists(&guid, "FWUPDATE_VERBOSE"));
        Ok(())
    }

    #[test]
    fn test_efivarfs_glob_delete() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let efivars = Efivarfs::new(td.path());
        efivars.set_data(&GUID_FWUPDATE, "fwupd-aaaa-0", &[0], ATTR_DEFAULT)?;
        efivars.set_data(&GUID_FWUPDATE, "fwupd-bbbb-0", &[0], ATTR_DEFAULT)?;
        efivars.set_data(&GUID_FWUPDATE, "FWUPDATE_VERBOSE", &[1], ATTR_DEFAULT)?;
        efivars.delete_with_glob(&GUID_FWUPDATE, "fwupd*-*")?;
        assert!(!efivars.exists(&GUID_FWUPDATE, "fwupd-aaaa-0"));
        assert!(!efivars.exists(&GUID_FWUPDATE, "fwupd-bbbb-0"));
        assert!(efivars.exists(&GUID_FWUPDATE, "FWUPDATE_VERBOSE"));
        Ok(())
    }

    #[test]
    fn test_boot_wrappers() -> anyhow::Result<()> {
        let efivars = MemoryEfivars::new();
        assert_eq!(efivars.get_boot_order()?, Vec::<u16>::new());
        efivars.set_boot_order(&[3, 0, 1])?;
        assert_eq!(efivars.get_boot_order()?, vec![3, 0, 1]);

        assert!(efivars.get_boot_next().unwrap_err().is_not_found());
        efivars.set_boot_next(0x0001)?;
        assert_eq!(efivars.get_boot_next()?, 1);

        assert!(!efivars.get_secure_boot()?);
        efivars.set_data(&GUID_EFI_GLOBAL, "SecureBoot", &[1], ATTR_DEFAULT)?;
        assert!(efivars.get_secure_boot()?);
        Ok(())
    }

    #[test]
    fn test_memory_append() -> anyhow::Result<()> {
        let efivars = MemoryEfivars::new();
        efivars.set_data(&GUID_SECURITY_DATABASE, "dbx", &[1, 2], ATTR_DEFAULT)?;
        efivars.set_data(
            &GUID_SECURITY_DATABASE,
            "dbx",
            &[3, 4],
            ATTR_DEFAULT | ATTR_APPEND_WRITE | ATTR_TIME_BASED_AUTHENTICATED_WRITE_ACCESS,
        )?;
        assert_eq!(
            efivars.get_data_bytes(&GUID_SECURITY_DATABASE, "dbx")?,
            vec![1, 2, 3, 4]
        );
        Ok(())
    }
}
