use respawn_core::{Error, Result};
use std::process::{Command, Stdio};
use tracing::debug;
use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::System::Threading::{OpenProcess, PROCESS_TERMINATE, TerminateProcess};

/// Windows has no signals; every request ends in a hard termination.
pub fn terminate(pid: u32, tree: bool) -> Result<()> {
    if tree {
        terminate_tree(pid)
    } else {
        terminate_one(pid)
    }
}

fn terminate_tree(pid: u32) -> Result<()> {
    debug!("taskkill /T for pid {}", pid);
    let status = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::Signal(format!("taskkill failed for pid {}: {}", pid, status)))
    }
}

fn terminate_one(pid: u32) -> Result<()> {
    // SAFETY: the handle is checked for null and closed on every path.
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle.is_null() {
            return Err(std::io::Error::last_os_error().into());
        }
        let ok = TerminateProcess(handle, 1);
        CloseHandle(handle);
        if ok == 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    Ok(())
}
