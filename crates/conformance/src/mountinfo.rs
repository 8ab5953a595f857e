//! Parser for the `/proc/<pid>/mountinfo` format.
//!
//! ```text
//! 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue
//! (1)(2)(3)   (4)   (5)      (6)      (7)   (8) (9)   (10)         (11)
//! ```
//!
//! Field (6) holds the per mount point (VFS) options and field (11) the
//! options of the superblock. The same token, e.g. `ro`, can show up in
//! either group, so both are kept apart. Lines are split by `procfs`, which
//! leaves octal escapes such as `\040` in paths as they are.
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use procfs::process::{MountInfo, MountOptFields};

use crate::error::MountInfoError;

/// Which of the two option fields of a record an option is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionGroup {
    Vfs,
    Filesystem,
}

impl fmt::Display for OptionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionGroup::Vfs => write!(f, "vfs"),
            OptionGroup::Filesystem => write!(f, "filesystem"),
        }
    }
}

/// Option names the kernel reports in mountinfo that the harness asserts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelOption {
    Ro,
    Rw,
    Nosuid,
    Nodev,
    Noexec,
    Relatime,
    Noatime,
    Strictatime,
    Sync,
    Dirsync,
}

impl KernelOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            KernelOption::Ro => "ro",
            KernelOption::Rw => "rw",
            KernelOption::Nosuid => "nosuid",
            KernelOption::Nodev => "nodev",
            KernelOption::Noexec => "noexec",
            KernelOption::Relatime => "relatime",
            KernelOption::Noatime => "noatime",
            KernelOption::Strictatime => "strictatime",
            KernelOption::Sync => "sync",
            KernelOption::Dirsync => "dirsync",
        }
    }

    /// Group the kernel reports this option in. `ro`/`rw` also appear among
    /// the superblock options, but the mount point flag is what a bind mount
    /// or a remount changes.
    pub fn group(&self) -> OptionGroup {
        match self {
            KernelOption::Sync | KernelOption::Dirsync => OptionGroup::Filesystem,
            KernelOption::Ro
            | KernelOption::Rw
            | KernelOption::Nosuid
            | KernelOption::Nodev
            | KernelOption::Noexec
            | KernelOption::Relatime
            | KernelOption::Noatime
            | KernelOption::Strictatime => OptionGroup::Vfs,
        }
    }
}

impl fmt::Display for KernelOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comma separated option list, `key` or `key=value` per entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionSet(BTreeMap<String, Option<String>>);

impl OptionSet {
    pub fn parse(s: &str) -> Self {
        let opts = s
            .split(',')
            .filter(|o| !o.is_empty())
            .map(|o| match o.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (o.to_string(), None),
            })
            .collect();
        OptionSet(opts)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn has(&self, opt: KernelOption) -> bool {
        self.contains(opt.as_str())
    }

    /// Value of a `key=value` option
    pub fn value(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, Option<String>>> for OptionSet {
    fn from(opts: HashMap<String, Option<String>>) -> Self {
        OptionSet(opts.into_iter().filter(|(k, _)| !k.is_empty()).collect())
    }
}

impl fmt::Display for OptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            first = false;
            match v {
                Some(v) => write!(f, "{k}={v}")?,
                None => f.write_str(k)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    pub mount_id: i32,
    pub parent_id: i32,
    pub major: u32,
    pub minor: u32,
    pub root: String,
    pub target: String,
    pub vfs_options: OptionSet,
    /// shared:N, master:N, propagate_from:N, unbindable
    pub optional_fields: Vec<String>,
    pub fs_type: String,
    pub source: String,
    pub fs_options: OptionSet,
}

impl MountRecord {
    pub fn options(&self, group: OptionGroup) -> &OptionSet {
        match group {
            OptionGroup::Vfs => &self.vfs_options,
            OptionGroup::Filesystem => &self.fs_options,
        }
    }

    /// Checks the flags no single mount point can carry together
    pub fn check_consistency(&self) -> Result<(), String> {
        let vfs = &self.vfs_options;
        if vfs.has(KernelOption::Ro) && vfs.has(KernelOption::Rw) {
            return Err(format!("{} is both ro and rw: {vfs}", self.target));
        }
        let atime: Vec<&str> = [
            KernelOption::Relatime,
            KernelOption::Strictatime,
            KernelOption::Noatime,
        ]
        .iter()
        .filter(|o| vfs.has(**o))
        .map(|o| o.as_str())
        .collect();
        if atime.len() > 1 {
            return Err(format!(
                "{} has conflicting atime flags {}",
                self.target,
                atime.join(",")
            ));
        }
        Ok(())
    }
}

fn optional_field(field: &MountOptFields) -> String {
    match field {
        MountOptFields::Shared(id) => format!("shared:{id}"),
        MountOptFields::Master(id) => format!("master:{id}"),
        MountOptFields::PropagateFrom(id) => format!("propagate_from:{id}"),
        MountOptFields::Unbindable => "unbindable".to_string(),
    }
}

impl MountRecord {
    fn from_mountinfo(line: usize, info: MountInfo) -> Result<Self, MountInfoError> {
        let (major, minor) = info
            .majmin
            .split_once(':')
            .and_then(|(ma, mi)| Some((ma.parse().ok()?, mi.parse().ok()?)))
            .ok_or_else(|| MountInfoError::Device {
                line,
                majmin: info.majmin.clone(),
            })?;

        Ok(MountRecord {
            mount_id: info.mnt_id,
            parent_id: info.pid,
            major,
            minor,
            root: info.root,
            target: info.mount_point.to_string_lossy().into_owned(),
            vfs_options: info.mount_options.into(),
            optional_fields: info.opt_fields.iter().map(optional_field).collect(),
            fs_type: info.fs_type,
            source: info.mount_source.unwrap_or_else(|| "none".to_string()),
            fs_options: info.super_options.into(),
        })
    }
}

/// One snapshot of a mount table
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    records: Vec<MountRecord>,
}

impl MountTable {
    pub fn parse(text: &str) -> Result<Self, MountInfoError> {
        let records = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                let info = MountInfo::from_line(line).map_err(|e| MountInfoError::Malformed {
                    line: idx + 1,
                    reason: e.to_string(),
                })?;
                MountRecord::from_mountinfo(idx + 1, info)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MountTable { records })
    }

    pub fn records(&self) -> &[MountRecord] {
        &self.records
    }

    /// Mount visible at `path`. Later entries are mounted on top of earlier
    /// ones, so the last match wins.
    pub fn find_target(&self, path: &str) -> Option<&MountRecord> {
        let wanted = normalize(path);
        self.records
            .iter()
            .rev()
            .find(|r| normalize(&r.target) == wanted)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromStr for MountTable {
    type Err = MountInfoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MountTable::parse(s)
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}
