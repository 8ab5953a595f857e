use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use nix::unistd::{self, AccessFlags, Gid};

/// how long `pause` keeps the container alive
const PAUSE_TIME: Duration = Duration::from_secs(120);

pub fn echo(text: &str) -> Result<()> {
    let mut out = io::stdout().lock();
    out.write_all(text.as_bytes())?;
    out.flush()?;
    Ok(())
}

pub fn printenv(name: &str) -> Result<()> {
    match std::env::var(name) {
        Ok(value) => echo(&value),
        Err(_) => bail!("variable {name} is not set"),
    }
}

pub fn format_groups(groups: &[Gid]) -> String {
    let joined: Vec<String> = groups.iter().map(|g| g.as_raw().to_string()).collect();
    format!("GROUPS=[{}]\n", joined.join(" "))
}

pub fn groups() -> Result<()> {
    let groups = unistd::getgroups().context("getgroups")?;
    echo(&format_groups(&groups))
}

pub fn cat(path: &str) -> Result<()> {
    let mut file = File::open(path).with_context(|| format!("could not open {path}"))?;
    io::copy(&mut file, &mut io::stdout().lock())
        .with_context(|| format!("could not read {path}"))?;
    Ok(())
}

pub fn open(path: &str) -> Result<()> {
    File::open(path).with_context(|| format!("could not open {path}"))?;
    Ok(())
}

pub fn access(path: &str) -> Result<()> {
    unistd::access(path, AccessFlags::F_OK).with_context(|| format!("could not access {path}"))?;
    Ok(())
}

pub fn cwd() -> Result<()> {
    let wd = std::env::current_dir().context("getcwd")?;
    echo(&format!("{}\n", wd.display()))
}

pub fn hostname() -> Result<()> {
    let name = unistd::gethostname().context("gethostname")?;
    echo(&format!("{}\n", name.to_string_lossy()))
}

pub fn isatty(fd: &str) -> Result<()> {
    let fd: i32 = fd.parse().with_context(|| format!("invalid fd {fd}"))?;
    let tty = unistd::isatty(fd).unwrap_or(false);
    echo(if tty { "true" } else { "false" })
}

pub fn write(path: &str, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("could not open {path}"))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("could not write {path}"))?;
    Ok(())
}

pub fn list_dir(path: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(path).with_context(|| format!("opendir {}", path.display()))? {
        let entry = entry.context("readdir")?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

pub fn ls(path: &str) -> Result<()> {
    let mut out = String::new();
    for name in list_dir(Path::new(path))? {
        out.push_str(&name);
        out.push('\n');
    }
    echo(&out)
}

/// Keeps the container alive without holding the caller's output pipes open,
/// so a detached `run` returns as soon as the container is started.
pub fn pause() -> Result<()> {
    let _ = unistd::close(1);
    let _ = unistd::close(2);
    sleep(PAUSE_TIME);
    Ok(())
}
