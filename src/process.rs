//! Platform helpers for child processes.
//!
//! Children are placed in their own process group so a whole tree can be killed
//! at once. Where process groups are unavailable the helpers fall back to the
//! single process.

use std::io;

use tokio::process::Command;

/// Puts the spawned child in a new process group.
pub fn new_process_group(command: &mut Command) {
    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x00000200;
        command.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    #[cfg(unix)]
    unsafe {
        command.pre_exec(|| {
            let _ = libc::setpgid(0, 0);
            Ok(())
        });
    }

    #[cfg(not(any(unix, windows)))]
    let _ = command;
}

/// Best-effort forceful kill of `pid` and its process group.
///
/// Returns an error only when not even the single process could be signalled.
#[cfg(unix)]
pub fn kill_tree(pid: u32) -> io::Result<()> {
    let pid = checked_pid(pid)?;
    unsafe {
        if libc::kill(-pid, libc::SIGKILL) == 0 {
            return Ok(());
        }
        if libc::kill(pid, libc::SIGKILL) == 0 {
            return Ok(());
        }
    }
    Err(io::Error::last_os_error())
}

#[cfg(windows)]
pub fn kill_tree(pid: u32) -> io::Result<()> {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, TerminateProcess, PROCESS_TERMINATE};
    // No group kill here; terminate the single process.
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        let ok = TerminateProcess(handle, 1);
        CloseHandle(handle);
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
pub fn kill_tree(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "process termination is not supported on this platform",
    ))
}

// Pids 0 and 1 never name a task: as a group they mean "caller's group" and
// "every process we may signal", and 1 is init.
#[cfg(unix)]
fn checked_pid(pid: u32) -> io::Result<libc::pid_t> {
    match libc::pid_t::try_from(pid) {
        Ok(pid) if pid > 1 => Ok(pid),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {}", pid),
        )),
    }
}

/// Checks that `pid` still refers to a live process.
#[cfg(unix)]
pub fn resolve_pid(pid: u32) -> io::Result<()> {
    let pid = checked_pid(pid)?;
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    // EPERM: alive but owned by someone else.
    if err.raw_os_error() == Some(libc::EPERM) {
        return Ok(());
    }
    Err(err)
}

#[cfg(windows)]
pub fn resolve_pid(pid: u32) -> io::Result<()> {
    use windows_sys::Win32::Foundation::CloseHandle;
    use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_QUERY_LIMITED_INFORMATION};
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
        if handle == 0 {
            return Err(io::Error::last_os_error());
        }
        CloseHandle(handle);
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
pub fn resolve_pid(_pid: u32) -> io::Result<()> {
    Ok(())
}

/// Splits a `KEY=VALUE` entry. Entries without `=` or with an empty key are rejected.
pub fn split_env(entry: &str) -> Option<(&str, &str)> {
    let (key, value) = entry.split_once('=')?;
    if key.is_empty() {
        return None;
    }
    Some((key, value))
}
