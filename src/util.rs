use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};

pub(crate) trait CommandRunExt {
    fn run(&mut self) -> Result<()>;
}

impl CommandRunExt for Command {
    fn run(&mut self) -> Result<()> {
        let r = self.status()?;
        if !r.success() {
            bail!("Child [{:?}] exited: {}", self, r);
        }
        Ok(())
    }
}

/// Runs the provided Command object, captures its stdout, and swallows its stderr except on
/// failure. Returns a Result<String> describing whether the command failed, and if not, its
/// standard output. Output is assumed to be UTF-8.
#[allow(dead_code)]
pub(crate) fn cmd_output(cmd: &mut Command) -> Result<String> {
    let result = cmd
        .output()
        .with_context(|| format!("running {:#?}", cmd))?;
    if !result.status.success() {
        eprintln!("{}", String::from_utf8_lossy(&result.stderr));
        bail!("{:#?} failed with {}", cmd, result.status);
    }
    String::from_utf8(result.stdout)
        .with_context(|| format!("decoding as UTF-8 output of `{:#?}`", cmd))
}

/// Read a sysfs-style attribute as an integer.  Missing files read as zero,
/// matching what the firmware exposes for absent ESRT fields; unparseable
/// contents read as u64::MAX so callers can treat them as bogus.
pub(crate) fn read_file_as_u64(path: &Path, attr_name: &str) -> u64 {
    let fn_ = path.join(attr_name);
    let Ok(data) = std::fs::read_to_string(&fn_) else {
        return 0;
    };
    let data = data.trim();
    let parsed = if let Some(hex) = data.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else {
        data.parse::<u64>()
    };
    match parsed {
        Ok(v) => v,
        Err(e) => {
            log::warn!("invalid integer in {:?}: {e}", fn_);
            u64::MAX
        }
    }
}

/// Find a program on $PATH, trying each name in order.
pub(crate) fn find_program(names: &[&str]) -> Option<std::path::PathBuf> {
    let path = std::env::var_os("PATH")?;
    for name in names {
        for dir in std::env::split_paths(&path) {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

/// Translate a shell-style glob (only `*` and `?` are special) to an
/// anchored regex.
pub(crate) fn glob_to_regex(glob: &str) -> regex::Regex {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push('^');
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            c => pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    pattern.push('$');
    regex::Regex::new(&pattern).expect("escaped glob is always a valid regex")
}
