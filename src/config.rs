/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Persistent daemon configuration, stored as JSON.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub(crate) struct Config {
    /// Bytes that must be free on the ESP before staging; zero selects
    /// the 2x-payload-plus-20MiB heuristic.
    pub(crate) require_esp_free_space: u64,
    pub(crate) disable_capsule_update_on_disk: bool,
    pub(crate) disable_shim_for_secure_boot: bool,
    /// Turn on verbose logging in the pre-boot binary.
    pub(crate) enable_efi_debugging: bool,
    pub(crate) enable_grub_chain_load: bool,
    pub(crate) override_esp_mount_point: Option<String>,
    /// Remove stale capsules, variables and BootNext on startup.
    pub(crate) reboot_cleanup: bool,
    /// Fallback framebuffer size for the UX splash, in pixels.
    pub(crate) screen_width: u32,
    pub(crate) screen_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            require_esp_free_space: 0,
            disable_capsule_update_on_disk: false,
            disable_shim_for_secure_boot: false,
            enable_efi_debugging: false,
            enable_grub_chain_load: false,
            override_esp_mount_point: None,
            reboot_cleanup: true,
            screen_width: 0,
            screen_height: 0,
        }
    }
}

pub(crate) const CONFIG_PATH: &str = "/etc/capsuleupd/config.json";

impl Config {
    /// Load configuration, treating a missing file as all-defaults.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config at {}, using defaults", path.display());
                return Ok(Config::default());
            }
            Err(e) => return Err(Error::from_io(path.display().to_string(), e)),
        };
        serde_json::from_str(&data)
            .map_err(|e| Error::InvalidData(format!("failed to parse {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.require_esp_free_space, 0);
        assert!(config.reboot_cleanup);
        assert!(!config.enable_grub_chain_load);
        assert_eq!(config.override_esp_mount_point, None);
    }

    #[test]
    fn test_load() -> anyhow::Result<()> {
        let td = tempfile::tempdir()?;
        let path = td.path().join("config.json");

        // missing file is fine
        let config = Config::load(&path)?;
        assert!(config.reboot_cleanup);

        std::fs::write(
            &path,
            r#"{"require-esp-free-space": 33554432, "reboot-cleanup": false,
               "override-esp-mount-point": "/efi"}"#,
        )?;
        let config = Config::load(&path)?;
        assert_eq!(config.require_esp_free_space, 32 * 1024 * 1024);
        assert!(!config.reboot_cleanup);
        assert_eq!(config.override_esp_mount_point.as_deref(), Some("/efi"));

        std::fs::write(&path, "{nope")?;
        assert!(matches!(
            Config::load(&path),
            Err(Error::InvalidData(_))
        ));
        Ok(())
    }
}
