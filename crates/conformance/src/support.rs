use std::fs::{self, File};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use once_cell::sync::OnceCell;
use rand::Rng;
use tar::Archive;
use tempfile::TempDir;
use uuid::Uuid;

use crate::spec::INIT_PATH;

static RUNTIME_PATH: OnceCell<PathBuf> = OnceCell::new();
static INIT_BINARY_PATH: OnceCell<PathBuf> = OnceCell::new();
static ROOTFS_TARBALL: OnceCell<Option<PathBuf>> = OnceCell::new();

pub fn set_runtime_path(path: &Path) -> Result<()> {
    RUNTIME_PATH
        .set(path.to_owned())
        .map_err(|p| anyhow::anyhow!("runtime path is already set to {p:?}"))
}

pub fn get_runtime_path() -> Result<&'static PathBuf> {
    RUNTIME_PATH.get().context("runtime path is not set")
}

pub fn set_init_path(path: &Path) -> Result<()> {
    INIT_BINARY_PATH
        .set(path.to_owned())
        .map_err(|p| anyhow::anyhow!("init path is already set to {p:?}"))
}

pub fn get_init_path() -> Result<&'static PathBuf> {
    INIT_BINARY_PATH.get().context("init path is not set")
}

pub fn set_rootfs_tarball(path: Option<&Path>) -> Result<()> {
    ROOTFS_TARBALL
        .set(path.map(Path::to_owned))
        .map_err(|_| anyhow::anyhow!("rootfs tarball is already set"))
}

pub fn get_rootfs_tarball() -> Option<&'static Path> {
    ROOTFS_TARBALL.get().and_then(|p| p.as_deref())
}

/// Symlink planted at `/etc/localtime` inside every rootfs, relative so it
/// only resolves correctly against the container root
pub const LOCALTIME_LINK: (&str, &str) = ("etc/localtime", "../usr/share/zoneinfo/Europe/Rome");
/// Zone file the localtime link points at
pub const ZONE_FILE: &str = "usr/share/zoneinfo/Europe/Rome";
/// Absolute symlink whose target does not exist in the rootfs
pub const DANGLING_LINK: (&str, &str) = ("etc/not-existing", "/foo/bar");

/// This will generate the id needed when creating the container.
pub fn generate_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    Uuid::from_bytes(bytes).to_string()
}

/// Temporary directory laid out as
///   bundle/config.json
///   bundle/rootfs/init
///   runtime/            (state directory handed to the runtime as --root)
#[derive(Debug)]
pub struct Bundle {
    dir: TempDir,
}

impl Bundle {
    pub fn create(init_binary: &Path, rootfs_tarball: Option<&Path>) -> Result<Self> {
        let dir = tempfile::tempdir().context("could not create bundle directory")?;
        let bundle = Bundle { dir };
        fs::create_dir_all(bundle.rootfs())
            .with_context(|| format!("could not create {:?}", bundle.rootfs()))?;
        fs::create_dir_all(bundle.state_root())
            .with_context(|| format!("could not create {:?}", bundle.state_root()))?;

        if let Some(tarball) = rootfs_tarball {
            let tar_gz =
                File::open(tarball).with_context(|| format!("could not open {tarball:?}"))?;
            let mut archive = Archive::new(GzDecoder::new(tar_gz));
            archive.unpack(bundle.rootfs()).with_context(|| {
                format!("failed to unpack {:?} to {:?}", tarball, bundle.rootfs())
            })?;
        }

        let init_target = bundle.rootfs().join(INIT_PATH.trim_start_matches('/'));
        fs::copy(init_binary, &init_target)
            .with_context(|| format!("could not copy {init_binary:?} to {init_target:?}"))?;
        fs::set_permissions(&init_target, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("could not make {init_target:?} executable"))?;

        plant_symlink_fixture(&bundle.rootfs())?;
        Ok(bundle)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn bundle_dir(&self) -> PathBuf {
        self.dir.path().join("bundle")
    }

    pub fn rootfs(&self) -> PathBuf {
        self.bundle_dir().join("rootfs")
    }

    pub fn config_path(&self) -> PathBuf {
        self.bundle_dir().join("config.json")
    }

    pub fn state_root(&self) -> PathBuf {
        self.dir.path().join("runtime")
    }
}

/// Adds the zone file and the two links mount destinations are resolved
/// through. Entries a rootfs tarball already brought along are replaced.
fn plant_symlink_fixture(rootfs: &Path) -> Result<()> {
    let zone = rootfs.join(ZONE_FILE);
    if let Some(parent) = zone.parent() {
        fs::create_dir_all(parent).with_context(|| format!("could not create {parent:?}"))?;
    }
    fs::write(&zone, b"TZif2").with_context(|| format!("could not write {zone:?}"))?;

    for (link, target) in [LOCALTIME_LINK, DANGLING_LINK] {
        let link = rootfs.join(link);
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent).with_context(|| format!("could not create {parent:?}"))?;
        }
        if fs::symlink_metadata(&link).is_ok() {
            fs::remove_file(&link).with_context(|| format!("could not replace {link:?}"))?;
        }
        symlink(target, &link)
            .with_context(|| format!("could not link {link:?} to {target}"))?;
    }
    Ok(())
}

/// Creates a bundle from the globally configured init binary and rootfs tarball
pub fn prepare_bundle() -> Result<Bundle> {
    Bundle::create(get_init_path()?, get_rootfs_tarball())
}
