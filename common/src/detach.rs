use std::io;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const DAEMON_BINARY: &str = "lunaflow-daemon";

/// The daemon binary installed next to the running executable, or the
/// bare name for a `$PATH` lookup.
pub fn daemon_binary() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(DAEMON_BINARY)))
        .filter(|path| path.exists())
        .unwrap_or_else(|| PathBuf::from(DAEMON_BINARY))
}

/// Starts `program` in a new session with no stdio, so it keeps running
/// after the caller and its terminal are gone. Returns the child's pid.
pub fn spawn_detached(program: &Path, args: &[String]) -> io::Result<u32> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            Ok(())
        });
    }

    let child = cmd.spawn()?;
    log::info!("Started {} as pid {}", program.display(), child.id());
    Ok(child.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_detached_returns_pid() {
        let pid = spawn_detached(Path::new("true"), &[]).unwrap();
        assert!(pid > 0);
    }

    #[test]
    fn test_spawn_missing_program() {
        assert!(spawn_detached(Path::new("/nonexistent/lunaflow-daemon"), &[]).is_err());
    }
}
