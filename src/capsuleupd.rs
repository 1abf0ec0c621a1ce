/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! The top-level install/report/cleanup flows, tying the ESRT device model
//! to the variable store, the ESP and the delivery back-ends.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _, Result};
use fn_error_context::context;
use uuid::Uuid;

use crate::acpi::AcpiUefi;
use crate::backend::{CapsuleBackend, HostEnv};
use crate::bgrt::Bgrt;
use crate::bootmgr;
use crate::config::{Config, CONFIG_PATH};
use crate::device::{CapsuleTarget, TargetStatus};
use crate::efivars::{self, Efivars, Efivarfs};
use crate::error::Error;
use crate::esp::{self, EspLocker, EspVolume};
use crate::esrt::Esrt;
use crate::snapd::SnapdNotifier;
use crate::splash::{self, SplashDir, SplashSource};
use crate::util::read_file_as_u64;

/// Where the signed fwupd/shim EFI binaries are installed by the distro.
const EFI_APP_DIR: &str = "/usr/libexec/fwupd/efi";
const SYSFS_FW_DIR: &str = "/sys/firmware";
const LOCALSTATEDIR: &str = "/var/lib/capsuleupd";
const DATADIR: &str = "/usr/share/capsuleupd";

/// Everything an operation needs, injected so tests can run against an
/// in-memory variable store and a scratch directory standing in for the
/// ESP.
pub(crate) struct Context {
    pub(crate) efivars: Box<dyn Efivars>,
    pub(crate) config: Config,
    pub(crate) esp: Option<EspVolume>,
    pub(crate) sysfs_fw_dir: PathBuf,
    pub(crate) efi_app_dir: PathBuf,
    pub(crate) localstatedir: PathBuf,
    pub(crate) splash_source: Option<Box<dyn SplashSource>>,
    pub(crate) acpi_uefi: Option<AcpiUefi>,
}

impl Context {
    #[context("Initializing system context")]
    pub(crate) fn new_system() -> Result<Self> {
        let config = Config::load(Path::new(CONFIG_PATH))?;
        let esp = esp::discover_system_esp(config.override_esp_mount_point.as_deref())?;
        if esp.is_none() {
            log::warn!("no ESP detected, capsule staging will be unavailable");
        } else if let Some(esp) = &esp {
            if esp.partition_kind.is_some() && !esp.is_esp() {
                log::warn!("{} is not a real ESP partition", esp.mount_point);
            }
        }
        let sysfs_fw_dir = PathBuf::from(SYSFS_FW_DIR);
        let acpi_uefi = match AcpiUefi::load(&sysfs_fw_dir) {
            Ok(table) => Some(table),
            Err(e) => {
                log::debug!("failed to load ACPI UEFI table: {e}");
                None
            }
        };
        Ok(Context {
            efivars: Box::new(Efivarfs::system()),
            config,
            esp,
            sysfs_fw_dir,
            efi_app_dir: PathBuf::from(EFI_APP_DIR),
            localstatedir: PathBuf::from(LOCALSTATEDIR),
            splash_source: Some(Box::new(SplashDir::new(
                Path::new(DATADIR).join("splash"),
            ))),
            acpi_uefi,
        })
    }

    fn esp(&self) -> Result<&EspVolume> {
        self.esp
            .as_ref()
            .ok_or_else(|| anyhow!(Error::NotSupported("no ESP found".to_string())))
    }

    /// Per-device switches that come from configuration rather than
    /// hardware quirks.
    fn apply_config_flags(&self, target: &mut CapsuleTarget) {
        target.flags.use_shim_for_sb = !self.config.disable_shim_for_secure_boot;
        target.flags.enable_debugging = self.config.enable_efi_debugging;
        if let Some(acpi_uefi) = &self.acpi_uefi {
            if acpi_uefi.cod_indexed_filename() {
                target.flags.cod_indexed_filename = true;
            }
        }
    }

    fn host_env<'a>(&'a self, esp: &'a EspVolume) -> HostEnv<'a> {
        HostEnv {
            efivars: self.efivars.as_ref(),
            esp,
            efi_app_dir: &self.efi_app_dir,
            sysfs_fw_dir: &self.sysfs_fw_dir,
            localstatedir: &self.localstatedir,
            require_esp_free_space: self.config.require_esp_free_space,
        }
    }

    /// UX splash framebuffer size: configuration wins, then the legacy
    /// efi-framebuffer sysfs node.
    fn screen_size(&self) -> Option<(u32, u32)> {
        if self.config.screen_width > 0 && self.config.screen_height > 0 {
            return Some((self.config.screen_width, self.config.screen_height));
        }
        let fbdir = Path::new("/sys/bus/platform/drivers/efi-framebuffer/efi-framebuffer.0");
        if fbdir.exists() {
            let width = read_file_as_u64(fbdir, "width") as u32;
            let height = read_file_as_u64(fbdir, "height") as u32;
            if width > 0 && height > 0 {
                return Some((width, height));
            }
        }
        None
    }
}

fn find_target(ctx: &Context, guid: Uuid) -> Result<CapsuleTarget> {
    let mut targets = Esrt::new(&ctx.sysfs_fw_dir).enumerate()?;
    let mut target = targets
        .drain(..)
        .find(|t| t.firmware_class == guid)
        .ok_or_else(|| anyhow!(Error::NotFound(format!("no ESRT device with GUID {guid}"))))?;
    ctx.apply_config_flags(&mut target);
    Ok(target)
}

/// Enumerate the update targets and their current state.
#[context("Querying status")]
pub(crate) fn status(ctx: &Context) -> Result<Vec<TargetStatus>> {
    let mut targets = Esrt::new(&ctx.sysfs_fw_dir).enumerate()?;
    for target in &mut targets {
        ctx.apply_config_flags(target);
        target.set_status(target.last_attempt_status);
    }
    Ok(targets.iter().map(|t| t.status()).collect())
}

/// Stage the payload, bind it in NVRAM and arm the chosen delivery
/// back-end for the next reboot.
#[context("Installing firmware update")]
pub(crate) fn install(ctx: &Context, guid: Uuid, payload: &[u8]) -> Result<()> {
    ctx.efivars.supported()?;
    match ctx.efivars.space_used() {
        Ok(used) => log::debug!("EFI NVRAM space used: {used} bytes"),
        Err(e) => log::debug!("cannot query NVRAM usage: {e}"),
    }

    let mut target = find_target(ctx, guid)?;
    let esp = ctx.esp()?;
    let backend = CapsuleBackend::detect(ctx.efivars.as_ref(), ctx.acpi_uefi.as_ref(), &ctx.config);
    log::info!("using {} capsule delivery", backend.as_str());
    // the firmware draws no splash when it applies the capsule itself
    if backend == CapsuleBackend::Cod {
        target.flags.no_ux_capsule = true;
    }

    let _locker = EspLocker::acquire(esp)?;

    // a splash failure never fails the install
    if let Err(e) = update_splash(ctx, esp, &target) {
        log::info!("failed to upload UX capsule: {e}");
    }

    backend
        .write_capsule(&ctx.host_env(esp), &mut target, payload)
        .with_context(|| format!("writing capsule for {guid}"))?;
    log::info!("staged update for {guid}; reboot to apply");
    Ok(())
}

fn update_splash(ctx: &Context, esp: &EspVolume, target: &CapsuleTarget) -> Result<()> {
    let source = ctx
        .splash_source
        .as_deref()
        .ok_or_else(|| anyhow!("no splash source configured"))?;
    let bgrt = Bgrt::setup(&ctx.sysfs_fw_dir)?;
    let (width, height) = ctx
        .screen_size()
        .ok_or_else(|| anyhow!("framebuffer size unknown"))?;
    splash::update_splash(
        ctx.efivars.as_ref(),
        esp,
        target,
        source,
        &bgrt,
        width,
        height,
    )?;
    Ok(())
}

/// Post-reboot reporting: read back what the firmware did, clear the
/// UPDATE_INFO status, then remove anything stale.
#[context("Reporting update results")]
pub(crate) fn report(ctx: &Context) -> Result<Vec<TargetStatus>> {
    let mut targets = Esrt::new(&ctx.sysfs_fw_dir).enumerate()?;
    let backend = CapsuleBackend::detect(ctx.efivars.as_ref(), ctx.acpi_uefi.as_ref(), &ctx.config);
    let mut results = Vec::new();
    for target in &mut targets {
        ctx.apply_config_flags(target);
        let varname = target.build_varname();
        if !ctx.efivars.exists(&efivars::GUID_FWUPDATE, &varname) {
            continue;
        }
        match target.load_update_info(ctx.efivars.as_ref()) {
            Ok(info) => log::debug!(
                "found update info for {}: {:?}",
                target.firmware_class,
                info.status
            ),
            Err(e) => {
                log::warn!("corrupt update info for {}: {e}", target.firmware_class);
                continue;
            }
        }
        backend.get_results(ctx.efivars.as_ref(), target)?;
        target.clear_status(ctx.efivars.as_ref())?;
        results.push(target.status());
    }

    if ctx.config.reboot_cleanup {
        reboot_cleanup(ctx)?;
    }
    Ok(results)
}

/// Remove staged capsules, their binding variables and a stale BootNext.
#[context("Cleaning up after reboot")]
pub(crate) fn reboot_cleanup(ctx: &Context) -> Result<()> {
    if let Some(esp) = &ctx.esp {
        let _locker = EspLocker::acquire(esp)?;
        cleanup_esp(esp)?;
    }
    ctx.efivars
        .delete_with_glob(&efivars::GUID_FWUPDATE, "fwupd*-*")?;
    // this should not be required, but, hey -- here we are
    bootmgr::cleanup_bootnext(ctx.efivars.as_ref())?;
    Ok(())
}

/// Delete every staged `EFI/*/fw/fwupd*.cap` on the ESP.
fn cleanup_esp(esp: &EspVolume) -> Result<()> {
    let efi_dir = esp.mount_point.join("EFI");
    let Ok(vendors) = std::fs::read_dir(&efi_dir) else {
        return Ok(());
    };
    for vendor in vendors.flatten() {
        let fw_dir = vendor.path().join("fw");
        let Ok(files) = std::fs::read_dir(&fw_dir) else {
            continue;
        };
        for file in files.flatten() {
            let name = file.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with("fwupd") && name.ends_with(".cap") {
                log::debug!("deleting {:?}", file.path());
                std::fs::remove_file(file.path())
                    .with_context(|| format!("deleting {:?}", file.path()))?;
            }
        }
    }
    Ok(())
}

/// Apply a KEK-signed dbx update after checking it revokes nothing we
/// currently boot through.
#[context("Updating dbx")]
pub(crate) fn dbx_update(ctx: &Context, payload: &[u8], force: bool) -> Result<String> {
    ctx.efivars.supported()?;
    let esp = ctx.esp()?;
    let _locker = EspLocker::acquire(esp)?;
    let siglists = crate::dbx::prepare(esp, payload, force)?;
    log::debug!("dbx payload parsed into {} signature lists", siglists.len());

    let notifier = detect_snapd();
    let checksum = crate::dbx::write(ctx.efivars.as_ref(), payload, notifier.as_ref())?;
    let checksum = checksum.unwrap_or_default();
    log::info!("dbx updated, identity now {checksum}");
    Ok(checksum)
}

/// snapd integration is active only when the socket exists and the
/// endpoint is implemented; a 404 means this system does not need the
/// FDE resealing dance.
fn detect_snapd() -> Option<SnapdNotifier> {
    let notifier = SnapdNotifier::new();
    if !notifier.socket_exists() {
        return None;
    }
    match notifier.dbx_manager_startup() {
        Ok(()) => Some(notifier),
        Err(e) if e.is_not_supported() => {
            log::debug!("snapd secureboot endpoint not available: {e}");
            None
        }
        Err(e) => {
            log::warn!("snapd startup notification failed: {e}");
            Some(notifier)
        }
    }
}
