//! Builds and spawns the child process for one server start: `JAVA_HOME`/
//! `JAVA_OPTS` plus `-D` system properties layered onto whatever argv the
//! identity's command supplier produces.

use std::env;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use super::error::SupervisorError;
use crate::identity::ServerIdentity;

/// `JAVA_HOME` is resolved once, at supervisor construction, not re-read on
/// every start: the environment is assumed stable for a harness run.
pub fn resolve_java_home() -> PathBuf {
    if let Ok(home) = env::var("JAVA_HOME") {
        return PathBuf::from(home);
    }
    // Best-effort stand-in for "this runtime's home" when nothing else is
    // configured: the directory containing the current executable.
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn java_opts(identity: &ServerIdentity) -> String {
    let mut opts = format!(
        "-Xms{}m -Xmx{}m",
        identity.heap_mb(),
        identity.heap_mb()
    );
    if identity.debug_port() > 0 {
        opts.push_str(&format!(
            " -Xdebug -Xrunjdwp:transport=dt_socket,server=y,address={}",
            identity.debug_port()
        ));
    }
    for (key, value) in identity.system_properties() {
        opts.push_str(&format!(" -D{key}={value}"));
    }
    opts
}

pub struct Spawned {
    pub child: Child,
    pub stdout_log: File,
    pub stderr_log: File,
}

pub fn spawn(identity: &ServerIdentity, java_home: &Path) -> Result<Spawned, SupervisorError> {
    if !identity.working_dir().is_dir() {
        return Err(SupervisorError::WorkingDirMissing(
            identity.working_dir().clone(),
        ));
    }

    let argv = identity.command();
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| SupervisorError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty startup command",
        )))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(identity.working_dir())
        .env("JAVA_HOME", java_home)
        .env("JAVA_OPTS", java_opts(identity))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let child = command.spawn()?;

    let stdout_log = open_log(identity.working_dir(), "stdout.log")?;
    let stderr_log = open_log(identity.working_dir(), "stderr.log")?;

    Ok(Spawned {
        child,
        stdout_log,
        stderr_log,
    })
}

fn open_log(dir: &Path, name: &str) -> Result<File, SupervisorError> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(name))?)
}
