/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

//! The UX splash capsule: a localized "Installing firmware update…" bitmap
//! the firmware draws while applying the real capsule.

use std::path::PathBuf;

use camino::Utf8PathBuf;

use crate::bgrt::Bgrt;
use crate::capsule::{
    self, CapsuleHeader, CAPSULE_FLAGS_PERSIST_ACROSS_RESET, CAPSULE_HEADER_SIZE,
};
use crate::device::CapsuleTarget;
use crate::efivars::{self, Efivars};
use crate::error::{Error, Result};
use crate::esp::{self, EspVolume};

/// Pre-rendered image sizes shipped in the splash archive.
const SPLASH_SIZES: &[(u32, u32)] = &[
    (640, 480),
    (800, 600),
    (1024, 768),
    (1920, 1080),
    (3840, 2160),
    (5120, 2880),
    (5688, 3200),
    (7680, 4320),
];

const UX_CAPSULE_HEADER_SIZE: usize = 12;

/// Where the localized BMPs come from; the archive extraction itself is a
/// collaborator, we only need lookups by locale and size.
pub(crate) trait SplashSource {
    fn lookup(&self, lang: &str, width: u32, height: u32) -> Option<Vec<u8>>;
}

/// Plain-directory source with the `fwupd-<lang>-<w>-<h>.bmp` naming used
/// by the shipped archive.
pub(crate) struct SplashDir {
    dir: PathBuf,
}

impl SplashDir {
    pub(crate) fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SplashSource for SplashDir {
    fn lookup(&self, lang: &str, width: u32, height: u32) -> Option<Vec<u8>> {
        let fn_ = self.dir.join(format!("fwupd-{lang}-{width}-{height}.bmp"));
        std::fs::read(fn_).ok()
    }
}

/// Locale candidates in preference order, ending with the `en` and `C`
/// fallbacks the archive always carries.
pub(crate) fn language_names() -> Vec<String> {
    let mut langs = Vec::new();
    let mut push = |value: String| {
        let value = value
            .split('.')
            .next()
            .unwrap_or_default()
            .to_string();
        if !value.is_empty() && !langs.contains(&value) {
            langs.push(value);
        }
    };
    if let Ok(language) = std::env::var("LANGUAGE") {
        for lang in language.split(':') {
            push(lang.to_string());
        }
    }
    for var in ["LC_ALL", "LC_MESSAGES", "LANG"] {
        if let Ok(value) = std::env::var(var) {
            push(value);
        }
    }
    push("en".to_string());
    push("C".to_string());
    langs
}

/// Just enough BMP parsing to get the pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BitmapImage {
    pub(crate) width: u32,
    pub(crate) height: u32,
}

impl BitmapImage {
    pub(crate) fn parse(buf: &[u8]) -> Result<Self> {
        // 14-byte file header then at least a BITMAPINFOHEADER prefix
        if buf.len() < 26 {
            return Err(Error::InvalidFile("image is corrupt".to_string()));
        }
        if &buf[0..2] != b"BM" {
            return Err(Error::InvalidFile("not a BMP image".to_string()));
        }
        let width = i32::from_le_bytes(buf[18..22].try_into().unwrap());
        let height = i32::from_le_bytes(buf[22..26].try_into().unwrap());
        if width <= 0 || height == 0 {
            return Err(Error::InvalidFile(format!(
                "BMP has invalid size {width}x{height}"
            )));
        }
        Ok(BitmapImage {
            width: width as u32,
            // top-down BMPs have a negative height
            height: height.unsigned_abs(),
        })
    }
}

fn sum8(buf: &[u8]) -> u8 {
    buf.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Assemble the complete UX capsule file: capsule header, UX header, BMP.
/// The byte sum of the whole file is zero mod 256.
pub(crate) fn compose_ux_capsule(
    bgrt: &Bgrt,
    screen_width: u32,
    screen_height: u32,
    blob: &[u8],
) -> Result<Vec<u8>> {
    let bmp = BitmapImage::parse(blob).map_err(|e| Error::InvalidFile(format!("splash invalid: {e}")))?;

    let cap_header = CapsuleHeader {
        guid: efivars::GUID_UX_CAPSULE,
        header_size: CAPSULE_HEADER_SIZE as u32,
        flags: CAPSULE_FLAGS_PERSIST_ACROSS_RESET,
        image_size: (CAPSULE_HEADER_SIZE + UX_CAPSULE_HEADER_SIZE + blob.len()) as u32,
    }
    .serialize();

    let x_offset = (screen_width / 2).saturating_sub(bmp.width / 2);
    // when the BGRT logo fills the screen height, fall back to the lower band
    let y_offset = if screen_height == bgrt.height {
        (f64::from(screen_height) * 0.8) as u32
    } else {
        bgrt.yoffset + bgrt.height
    };

    let mut ux_header = [0u8; UX_CAPSULE_HEADER_SIZE];
    ux_header[0] = 1; // version
    ux_header[1] = 0; // checksum, patched below
    ux_header[2] = 0; // image type
    ux_header[3] = 0; // reserved
    ux_header[4..8].copy_from_slice(&x_offset.to_le_bytes());
    ux_header[8..12].copy_from_slice(&y_offset.to_le_bytes());

    let csum = sum8(&cap_header)
        .wrapping_add(sum8(&ux_header))
        .wrapping_add(sum8(blob));
    ux_header[1] = 0u8.wrapping_sub(csum);

    let mut out = Vec::with_capacity(cap_header.len() + ux_header.len() + blob.len());
    out.extend_from_slice(&cap_header);
    out.extend_from_slice(&ux_header);
    out.extend_from_slice(blob);
    Ok(out)
}

/// Pick the largest pre-rendered image fitting the framebuffer, by the
/// fewest border pixels left over.
fn best_splash_size(screen_width: u32, screen_height: u32) -> Option<(u32, u32)> {
    let screen_pixels = u64::from(screen_width) * u64::from(screen_height);
    SPLASH_SIZES
        .iter()
        .filter(|(w, h)| *w <= screen_width && *h <= screen_height)
        .min_by_key(|(w, h)| screen_pixels - u64::from(*w) * u64::from(*h))
        .copied()
}

/// Stage the UX splash capsule and bind it with a second UPDATE_INFO
/// record under `fwupd-ux-capsule`.
///
/// Failures here never abort the firmware install; the caller logs and
/// carries on without a splash.
pub(crate) fn update_splash(
    efivars: &dyn Efivars,
    esp: &EspVolume,
    target: &CapsuleTarget,
    source: &dyn SplashSource,
    bgrt: &Bgrt,
    screen_width: u32,
    screen_height: u32,
) -> Result<()> {
    // firmware without UX capsule support: drop any stale binding
    if target.flags.no_ux_capsule {
        log::info!("not providing UX capsule");
        if efivars.exists(&efivars::GUID_FWUPDATE, "fwupd-ux-capsule") {
            return efivars.delete(&efivars::GUID_FWUPDATE, "fwupd-ux-capsule");
        }
        return Ok(());
    }
    if !bgrt.supported() {
        return Err(Error::NotSupported("BGRT is not supported".to_string()));
    }
    log::debug!("framebuffer size {screen_width} x{screen_height}");

    let (width, height) = best_splash_size(screen_width, screen_height)
        .ok_or_else(|| Error::NotSupported("failed to find a suitable image to use".to_string()))?;

    let mut blob = None;
    for lang in language_names() {
        if let Some(found) = source.lookup(&lang, width, height) {
            log::debug!("using UX image fwupd-{lang}-{width}-{height}.bmp");
            blob = Some(found);
            break;
        }
    }
    let blob = blob.ok_or_else(|| {
        Error::NotSupported(format!("failed to get splash file for {width}x{height}"))
    })?;

    let capsule = compose_ux_capsule(bgrt, screen_width, screen_height, &blob)?;
    let directory = esp::esp_path_for_os(&esp.mount_point);
    let capsule_path: Utf8PathBuf = directory
        .join("fw")
        .join(capsule::capsule_basename(&efivars::GUID_UX_CAPSULE));
    esp.write_target(&capsule_path, &capsule)?;

    capsule::write_update_info(
        efivars,
        esp,
        target,
        &capsule_path,
        "fwupd-ux-capsule",
        efivars::GUID_UX_CAPSULE,
    )
}
