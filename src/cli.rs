/*
 * Copyright (C) 2024 Red Hat, Inc.
 *
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Parser;
use log::LevelFilter;
use uuid::Uuid;

use crate::capsuleupd::{self, Context};
use crate::device::TargetStatus;

/// `capsuleupd` sub-commands.
#[derive(Debug, Parser)]
#[clap(name = "capsuleupd", about = "UEFI capsule updater", version)]
pub(crate) struct CtlCommand {
    /// Verbosity level (higher is more verbose).
    #[clap(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbosity: u8,

    /// CLI sub-command.
    #[clap(subcommand)]
    pub(crate) cmd: CtlVerb,
}

impl CtlCommand {
    /// Return the log-level set via command-line flags.
    pub(crate) fn loglevel(&self) -> LevelFilter {
        match self.verbosity {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// CLI sub-commands.
#[derive(Debug, Parser)]
pub(crate) enum CtlVerb {
    #[clap(name = "status", about = "Show firmware update targets")]
    Status(StatusOpts),
    #[clap(name = "update", about = "Stage a capsule for the next reboot")]
    Update(UpdateOpts),
    #[clap(name = "report", about = "Report results from the last reboot")]
    Report(StatusOpts),
    #[clap(name = "dbx-update", about = "Apply a signed dbx revocation update")]
    DbxUpdate(DbxOpts),
    #[clap(name = "cleanup", about = "Remove staged capsules and stale variables")]
    Cleanup,
}

#[derive(Debug, Parser)]
pub(crate) struct StatusOpts {
    /// Output JSON
    #[clap(long, action)]
    json: bool,
}

#[derive(Debug, Parser)]
pub(crate) struct UpdateOpts {
    /// The ESRT firmware class GUID to update
    guid: Uuid,
    /// Path to the capsule payload
    payload: PathBuf,
}

#[derive(Debug, Parser)]
pub(crate) struct DbxOpts {
    /// Path to the signed signature list payload
    payload: PathBuf,

    /// Skip the check that no installed bootloader is revoked
    #[clap(long, action)]
    force: bool,
}

impl CtlCommand {
    /// Run CLI application.
    pub(crate) fn run(self) -> Result<()> {
        let ctx = Context::new_system()?;
        match self.cmd {
            CtlVerb::Status(opts) => {
                let statuses = capsuleupd::status(&ctx)?;
                print_statuses(&statuses, opts.json)
            }
            CtlVerb::Update(opts) => {
                let payload = std::fs::read(&opts.payload)
                    .with_context(|| format!("reading {:?}", opts.payload))?;
                capsuleupd::install(&ctx, opts.guid, &payload)
            }
            CtlVerb::Report(opts) => {
                let statuses = capsuleupd::report(&ctx)?;
                print_statuses(&statuses, opts.json)
            }
            CtlVerb::DbxUpdate(opts) => {
                let payload = std::fs::read(&opts.payload)
                    .with_context(|| format!("reading {:?}", opts.payload))?;
                let checksum = capsuleupd::dbx_update(&ctx, &payload, opts.force)?;
                println!("dbx: {checksum}");
                Ok(())
            }
            CtlVerb::Cleanup => capsuleupd::reboot_cleanup(&ctx),
        }
    }
}

fn print_statuses(statuses: &[TargetStatus], json: bool) -> Result<()> {
    if json {
        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();
        serde_json::to_writer_pretty(&mut stdout, statuses)?;
        return Ok(());
    }
    for status in statuses {
        println!(
            "{} ({}): version {}, last attempt {} -> {}",
            status.guid,
            status.kind.display_name(),
            status.fw_version,
            status.last_attempt_version,
            status.last_attempt_status.as_str(),
        );
        if let Some(err) = &status.update_error {
            println!("  error: {err}");
        }
    }
    Ok(())
}
