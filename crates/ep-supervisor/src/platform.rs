//! OS process termination primitives
//!
//! All functions are best-effort and return the OS error for logging.
//! Callers escalate from [`terminate`] to [`kill_tree`] and never treat a
//! failure as fatal.

use std::io;

/// Ask the process to exit
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    signal(pid, libc::SIGTERM, false)
}

/// Forcibly kill the process and every process in its group
///
/// The core is spawned as the leader of its own process group, so the group
/// id equals its pid.
#[cfg(unix)]
pub fn kill_tree(pid: u32) -> io::Result<()> {
    signal(pid, libc::SIGKILL, true)
}

#[cfg(unix)]
fn signal(pid: u32, sig: libc::c_int, group: bool) -> io::Result<()> {
    // 0 and negative values address whole groups, never allowed here
    if pid == 0 || pid > i32::MAX as u32 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid pid {}", pid),
        ));
    }
    let result = unsafe {
        if group {
            libc::killpg(pid as libc::pid_t, sig)
        } else {
            libc::kill(pid as libc::pid_t, sig)
        }
    };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Ask the process to exit
#[cfg(windows)]
pub fn terminate(pid: u32) -> io::Result<()> {
    taskkill(&["/PID", &pid.to_string()])
}

/// Forcibly kill the process and all of its children
#[cfg(windows)]
pub fn kill_tree(pid: u32) -> io::Result<()> {
    taskkill(&["/F", "/T", "/PID", &pid.to_string()])
}

#[cfg(windows)]
fn taskkill(args: &[&str]) -> io::Result<()> {
    use std::os::windows::process::CommandExt;
    use std::process::{Command, Stdio};

    let status = Command::new("taskkill")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("taskkill exited with {}", status),
        ))
    }
}

/// Creation flags that keep the core from opening a console window
#[cfg(windows)]
pub fn creation_flags() -> u32 {
    CREATE_NO_WINDOW
}
