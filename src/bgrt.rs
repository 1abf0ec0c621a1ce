/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! Boot Graphics Resource Table: where the firmware drew the boot logo,
//! so the UX splash can be placed underneath it.

use std::path::Path;

use crate::error::{Error, Result};
use crate::splash::BitmapImage;
use crate::util::read_file_as_u64;

#[derive(Debug, Default)]
pub(crate) struct Bgrt {
    pub(crate) xoffset: u32,
    pub(crate) yoffset: u32,
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl Bgrt {
    /// Load from `<sysfs_fw>/acpi/bgrt`; missing support is NotSupported,
    /// which callers treat as "skip the splash".
    pub(crate) fn setup(sysfs_fw_dir: &Path) -> Result<Self> {
        let bgrtdir = sysfs_fw_dir.join("acpi/bgrt");
        if !bgrtdir.exists() {
            return Err(Error::NotSupported("BGRT is not supported".to_string()));
        }
        let type_ = read_file_as_u64(&bgrtdir, "type");
        if type_ != 0 {
            return Err(Error::NotSupported(format!("BGRT type was {type_}")));
        }
        let version = read_file_as_u64(&bgrtdir, "version");
        if version != 1 {
            return Err(Error::NotSupported(format!("BGRT version was {version}")));
        }

        let imagefn = bgrtdir.join("image");
        let image = std::fs::read(&imagefn)
            .map_err(|e| Error::from_io(imagefn.display().to_string(), e))?;
        let bmp = BitmapImage::parse(&image)
            .map_err(|e| Error::InvalidData(format!("BGRT image invalid: {e}")))?;

        Ok(Bgrt {
            xoffset: read_file_as_u64(&bgrtdir, "xoffset") as u32,
            yoffset: read_file_as_u64(&bgrtdir, "yoffset") as u32,
            width: bmp.width,
            height: bmp.height,
        })
    }

    pub(crate) fn supported(&self) -> bool {
        self.width != 0 && self.height != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splash::tests::build_bmp;

    #[test]
    fn test_setup() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let bgrtdir = td.path().join("acpi/bgrt");
        std::fs::create_dir_all(&bgrtdir)?;
        std::fs::write(bgrtdir.join("type"), "0")?;
        std::fs::write(bgrtdir.join("version"), "1")?;
        std::fs::write(bgrtdir.join("xoffset"), "123")?;
        std::fs::write(bgrtdir.join("yoffset"), "456")?;
        std::fs::write(bgrtdir.join("image"), build_bmp(54, 24))?;

        let bgrt = Bgrt::setup(td.path())?;
        assert!(bgrt.supported());
        assert_eq!(bgrt.xoffset, 123);
        assert_eq!(bgrt.yoffset, 456);
        assert_eq!(bgrt.width, 54);
        assert_eq!(bgrt.height, 24);
        Ok(())
    }

    #[test]
    fn test_missing_is_not_supported() {
        let err = Bgrt::setup(Path::new("/nonexistent")).unwrap_err();
        assert!(err.is_not_supported());
    }

    #[test]
    fn test_wrong_version() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let bgrtdir = td.path().join("acpi/bgrt");
        std::fs::create_dir_all(&bgrtdir)?;
        std::fs::write(bgrtdir.join("type"), "0")?;
        std::fs::write(bgrtdir.join("version"), "2")?;
        assert!(Bgrt::setup(td.path()).unwrap_err().is_not_supported());
        Ok(())
    }
}
