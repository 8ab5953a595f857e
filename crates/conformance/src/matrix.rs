//! What each OCI mount option must look like in the mount table.
use std::fmt;
use std::str::FromStr;

use crate::mountinfo::{KernelOption, MountRecord, OptionGroup};

/// Mount option tokens accepted in `mounts[].options` that have a visible
/// effect on the mount point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OciMountOption {
    Ro,
    Rw,
    Relatime,
    Strictatime,
    Noatime,
    Exec,
    Noexec,
    Suid,
    Nosuid,
    Dev,
    Nodev,
    Sync,
    Dirsync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    Present(KernelOption),
    Absent(KernelOption),
}

impl Expectation {
    pub fn option(&self) -> KernelOption {
        match self {
            Expectation::Present(o) | Expectation::Absent(o) => *o,
        }
    }

    pub fn holds(&self, record: &MountRecord, group: OptionGroup) -> bool {
        let opts = record.options(group);
        match self {
            Expectation::Present(o) => opts.has(*o),
            Expectation::Absent(o) => !opts.has(*o),
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Present(o) => write!(f, "\"{o}\" present"),
            Expectation::Absent(o) => write!(f, "\"{o}\" absent"),
        }
    }
}

/// How the mount under test is backed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    Tmpfs,
    Bind,
}

impl fmt::Display for Backing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backing::Tmpfs => write!(f, "tmpfs"),
            Backing::Bind => write!(f, "bind"),
        }
    }
}

const ALL_BACKINGS: &[Backing] = &[Backing::Tmpfs, Backing::Bind];
// sync and dirsync are superblock flags, a bind mount shares the superblock
// of its source and cannot set them
const TMPFS_ONLY: &[Backing] = &[Backing::Tmpfs];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpectationRule {
    pub option: OciMountOption,
    pub group: OptionGroup,
    pub expectations: &'static [Expectation],
    pub backings: &'static [Backing],
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{option} on {target}: expected {violated} in {group} options, got \"{observed}\"")]
pub struct ExpectationError {
    pub option: OciMountOption,
    pub target: String,
    pub group: OptionGroup,
    pub violated: String,
    pub observed: String,
}

impl ExpectationRule {
    pub fn applies_to(&self, backing: Backing) -> bool {
        self.backings.contains(&backing)
    }

    /// Checks every predicate of the rule and reports all that failed
    pub fn verify(&self, record: &MountRecord) -> Result<(), ExpectationError> {
        let violated: Vec<String> = self
            .expectations
            .iter()
            .filter(|e| !e.holds(record, self.group))
            .map(|e| e.to_string())
            .collect();
        if violated.is_empty() {
            return Ok(());
        }
        Err(ExpectationError {
            option: self.option,
            target: record.target.clone(),
            group: self.group,
            violated: violated.join(", "),
            observed: record.options(self.group).to_string(),
        })
    }
}

/// Builds a rule read from the group its first kernel option is reported in
macro_rules! rule {
    ($opt:ident, [$($exp:ident($kopt:ident)),+], $backings:expr) => {
        ExpectationRule {
            option: OciMountOption::$opt,
            group: [$(KernelOption::$kopt),+][0].group(),
            expectations: &[$(Expectation::$exp(KernelOption::$kopt)),+],
            backings: $backings,
        }
    };
}

impl OciMountOption {
    pub const ALL: [OciMountOption; 13] = [
        OciMountOption::Ro,
        OciMountOption::Rw,
        OciMountOption::Relatime,
        OciMountOption::Strictatime,
        OciMountOption::Noatime,
        OciMountOption::Exec,
        OciMountOption::Noexec,
        OciMountOption::Suid,
        OciMountOption::Nosuid,
        OciMountOption::Dev,
        OciMountOption::Nodev,
        OciMountOption::Sync,
        OciMountOption::Dirsync,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OciMountOption::Ro => "ro",
            OciMountOption::Rw => "rw",
            OciMountOption::Relatime => "relatime",
            OciMountOption::Strictatime => "strictatime",
            OciMountOption::Noatime => "noatime",
            OciMountOption::Exec => "exec",
            OciMountOption::Noexec => "noexec",
            OciMountOption::Suid => "suid",
            OciMountOption::Nosuid => "nosuid",
            OciMountOption::Dev => "dev",
            OciMountOption::Nodev => "nodev",
            OciMountOption::Sync => "sync",
            OciMountOption::Dirsync => "dirsync",
        }
    }

    pub fn rule(&self) -> ExpectationRule {
        match self {
            OciMountOption::Ro => rule!(Ro, [Present(Ro)], ALL_BACKINGS),
            OciMountOption::Rw => rule!(Rw, [Present(Rw)], ALL_BACKINGS),
            OciMountOption::Relatime => rule!(Relatime, [Present(Relatime)], ALL_BACKINGS),
            // the kernel never prints strictatime, it only drops relatime
            OciMountOption::Strictatime => rule!(Strictatime, [Absent(Relatime)], ALL_BACKINGS),
            OciMountOption::Noatime => rule!(Noatime, [Present(Noatime)], ALL_BACKINGS),
            OciMountOption::Exec => rule!(Exec, [Absent(Noexec)], ALL_BACKINGS),
            OciMountOption::Noexec => rule!(Noexec, [Present(Noexec)], ALL_BACKINGS),
            OciMountOption::Suid => rule!(Suid, [Absent(Nosuid)], ALL_BACKINGS),
            OciMountOption::Nosuid => rule!(Nosuid, [Present(Nosuid)], ALL_BACKINGS),
            OciMountOption::Dev => rule!(Dev, [Absent(Nodev)], ALL_BACKINGS),
            OciMountOption::Nodev => rule!(Nodev, [Present(Nodev)], ALL_BACKINGS),
            OciMountOption::Sync => rule!(Sync, [Present(Sync)], TMPFS_ONLY),
            OciMountOption::Dirsync => rule!(Dirsync, [Present(Dirsync)], TMPFS_ONLY),
        }
    }
}

impl FromStr for OciMountOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OciMountOption::ALL
            .iter()
            .find(|o| o.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown mount option {s:?}"))
    }
}

impl fmt::Display for OciMountOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
