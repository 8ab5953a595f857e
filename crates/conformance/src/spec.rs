//! Synthesizes the runtime configuration handed to the runtime under test.
//!
//! Every test starts from [`base_config`], a single process container running
//! the init helper, and layers its overrides on top through [`ConfigBuilder`].
//! Each call produces a fresh [`Spec`] value, so no template is ever shared
//! between tests.
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use oci_spec::runtime::{
    get_default_mounts, LinuxBuilder, LinuxNamespace, LinuxNamespaceBuilder, LinuxNamespaceType,
    Mount, MountBuilder, Process, ProcessBuilder, RootBuilder, Spec, SpecBuilder, User,
    UserBuilder,
};
use oci_spec::OciSpecError;

/// Path of the init helper inside every container
pub const INIT_PATH: &str = "/init";

const DEFAULT_ENV: [&str; 2] = ["PATH=/bin", "TERM=xterm"];

/// Namespaces requested by [`add_all_namespaces`]. Cgroup and user
/// namespaces change what the mount table looks like, so they are opt-in.
const ALL_NAMESPACES: [LinuxNamespaceType; 5] = [
    LinuxNamespaceType::Pid,
    LinuxNamespaceType::Network,
    LinuxNamespaceType::Ipc,
    LinuxNamespaceType::Uts,
    LinuxNamespaceType::Mount,
];

fn namespace(typ: LinuxNamespaceType) -> Result<LinuxNamespace, OciSpecError> {
    LinuxNamespaceBuilder::default().typ(typ).build()
}

fn default_user() -> Result<User, OciSpecError> {
    UserBuilder::default().uid(0u32).gid(0u32).build()
}

fn init_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    std::iter::once(INIT_PATH.to_string())
        .chain(args.into_iter().map(Into::into))
        .collect()
}

/// Minimal valid configuration: `/init true` as root with a private mount
/// namespace, a read-only rootfs and the standard pseudo filesystems.
pub fn base_config() -> Result<Spec, OciSpecError> {
    ConfigBuilder::new().build()
}

/// Returns `spec` with the full standard set of namespaces requested.
/// Namespaces the config already has are left untouched.
pub fn add_all_namespaces(mut spec: Spec) -> Result<Spec, OciSpecError> {
    let mut linux = spec.linux().clone().unwrap_or_default();
    let mut namespaces = linux.namespaces().clone().unwrap_or_default();
    let present: HashSet<LinuxNamespaceType> = namespaces.iter().map(|ns| ns.typ()).collect();
    for typ in ALL_NAMESPACES {
        if !present.contains(&typ) {
            namespaces.push(namespace(typ)?);
        }
    }
    linux.set_namespaces(Some(namespaces));
    spec.set_linux(Some(linux));
    Ok(spec)
}

/// Tmpfs mount at `destination` with the given raw option tokens
pub fn tmpfs_mount<P: Into<PathBuf>>(
    destination: P,
    options: &[&str],
) -> Result<Mount, OciSpecError> {
    MountBuilder::default()
        .destination(destination.into())
        .typ("tmpfs")
        .source(PathBuf::from("tmpfs"))
        .options(options.iter().map(|o| o.to_string()).collect::<Vec<String>>())
        .build()
}

/// Bind mount of a host path. Bind mounts inherit their flags from the source,
/// so `bind` and a propagation token always come first.
pub fn bind_mount<S, D>(source: S, destination: D, options: &[&str]) -> Result<Mount, OciSpecError>
where
    S: Into<PathBuf>,
    D: Into<PathBuf>,
{
    let options: Vec<String> = ["bind", "rprivate"]
        .iter()
        .chain(options.iter())
        .map(|o| o.to_string())
        .collect();
    raw_bind_mount(source, destination, options)
}

/// Bind mount with exactly the given options, for tests that need a
/// propagation mode other than rprivate or no propagation token at all
pub fn raw_bind_mount<S, D>(
    source: S,
    destination: D,
    options: Vec<String>,
) -> Result<Mount, OciSpecError>
where
    S: Into<PathBuf>,
    D: Into<PathBuf>,
{
    MountBuilder::default()
        .destination(destination.into())
        .typ("bind")
        .source(source.into())
        .options(options)
        .build()
}

/// Builder for per-test configurations
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    args: Vec<String>,
    env: Vec<String>,
    cwd: PathBuf,
    uid: u32,
    gid: u32,
    additional_gids: Vec<u32>,
    no_new_privileges: bool,
    mounts: Vec<Mount>,
    all_namespaces: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        ConfigBuilder {
            args: init_args(["true"]),
            env: DEFAULT_ENV.iter().map(|e| e.to_string()).collect(),
            cwd: PathBuf::from("/"),
            uid: 0,
            gid: 0,
            additional_gids: Vec::new(),
            no_new_privileges: true,
            mounts: Vec::new(),
            all_namespaces: false,
        }
    }

    /// Arguments for the init helper, `/init` itself is prepended
    pub fn init_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = init_args(args);
        self
    }

    pub fn user(mut self, uid: u32, gid: u32) -> Self {
        self.uid = uid;
        self.gid = gid;
        self
    }

    pub fn additional_gids(mut self, gids: Vec<u32>) -> Self {
        self.additional_gids = gids;
        self
    }

    pub fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn all_namespaces(mut self) -> Self {
        self.all_namespaces = true;
        self
    }

    fn build_user(&self) -> Result<User, OciSpecError> {
        if self.uid == 0 && self.gid == 0 && self.additional_gids.is_empty() {
            return default_user();
        }
        UserBuilder::default()
            .uid(self.uid)
            .gid(self.gid)
            .additional_gids(self.additional_gids.clone())
            .build()
    }

    /// Standalone process document, as taken by `exec --process`
    pub fn build_process(&self) -> Result<Process, OciSpecError> {
        ProcessBuilder::default()
            .terminal(false)
            .user(self.build_user()?)
            .args(self.args.clone())
            .env(self.env.clone())
            .cwd(self.cwd.clone())
            .no_new_privileges(self.no_new_privileges)
            .build()
    }

    pub fn build(self) -> Result<Spec, OciSpecError> {
        let mut mounts = get_default_mounts();
        mounts.extend(self.mounts.iter().cloned());

        let spec = SpecBuilder::default()
            .root(RootBuilder::default().path("rootfs").readonly(true).build()?)
            .process(self.build_process()?)
            .hostname("conformance")
            .mounts(mounts)
            .linux(
                LinuxBuilder::default()
                    .namespaces(vec![namespace(LinuxNamespaceType::Mount)?])
                    .build()?,
            )
            .build()?;

        if self.all_namespaces {
            add_all_namespaces(spec)
        } else {
            Ok(spec)
        }
    }
}

/// Writes `spec` as the bundle's config.json
pub fn save_config(spec: &Spec, config_path: &Path) -> Result<(), OciSpecError> {
    spec.save(config_path)
}

/// Writes a process document for `exec --process`
pub fn save_process(process: &Process, path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, process)?;
    Ok(())
}
