/*!
**UEFI caps**ule **upd**ater.

Stages UEFI capsule payloads on the EFI System Partition, writes the
binding structures into EFI NVRAM so the pre-boot updater consumes them
on the next reboot, and records the outcome afterwards.  Also validates
and applies dbx revocation updates, which share the same EFI variable
plumbing.

Refs:
 * <https://uefi.org/specs/UEFI/2.10/08_Services_Runtime_Services.html#update-capsule>
!*/

#![deny(unused_must_use)]

mod acpi;
mod authenticode;
mod backend;
mod bgrt;
mod bootmgr;
mod capsule;
mod capsuleupd;
mod cli;
mod config;
mod dbx;
mod device;
mod efidp;
mod efivars;
mod error;
mod esp;
mod esrt;
mod siglist;
mod snapd;
mod splash;
mod ucs2;
mod updateinfo;
mod util;

use clap::crate_name;
use clap::Parser;

/// Binary entrypoint.
fn main() {
    let exit_code = run_cli();
    std::process::exit(exit_code);
}

/// CLI logic.
fn run_cli() -> i32 {
    // Parse command-line options.
    let cli_opts = cli::CtlCommand::parse();

    // Setup logging.
    env_logger::Builder::from_default_env()
        .format_timestamp(None)
        .format_module_path(false)
        .filter(Some(crate_name!()), cli_opts.loglevel())
        .init();

    // Dispatch CLI subcommand.
    match cli_opts.run() {
        Ok(_) => libc::EXIT_SUCCESS,
        Err(e) => {
            // Use the alternative formatter to get everything on a single line... it reads better.
            eprintln!("error: {:#}", e);
            libc::EXIT_FAILURE
        }
    }
}
