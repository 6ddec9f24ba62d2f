//! Signal delivery to a child and, optionally, everything it spawned.
//!
//! The tree is captured before the first signal goes out: once the root
//! dies its children are re-parented and can no longer be found by walking
//! parent links.

use respawn_core::{Error, Result, Signal};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal;
#[cfg(unix)]
use nix::unistd::Pid;
#[cfg(unix)]
use tracing::warn;

/// Breadth-first walk of a `ppid -> children` table, excluding `root`.
/// Parents always come before their children.
#[cfg_attr(windows, allow(dead_code))]
pub(crate) fn walk_tree(root: u32, children: &HashMap<u32, Vec<u32>>) -> Vec<u32> {
    let mut found = Vec::new();
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        for &kid in children.get(&pid).into_iter().flatten() {
            if seen.insert(kid) {
                found.push(kid);
                queue.push_back(kid);
            }
        }
    }
    found
}

#[cfg(target_os = "linux")]
fn descendants(pid: u32) -> Vec<u32> {
    crate::linux::descendants(pid)
}

#[cfg(all(unix, not(target_os = "linux")))]
fn descendants(pid: u32) -> Vec<u32> {
    crate::macos::descendants(pid)
}

#[cfg(unix)]
fn deliver(pid: u32, sig: Signal) -> Result<()> {
    let raw = i32::try_from(pid)
        .map_err(|_| Error::Signal(format!("PID {} too large for system", pid)))?;
    match signal::kill(Pid::from_raw(raw), sig.to_nix()) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// The process table scan runs on the blocking pool.
#[cfg(unix)]
async fn capture_tree(pid: u32) -> Vec<u32> {
    match tokio::task::spawn_blocking(move || descendants(pid)).await {
        Ok(family) => family,
        Err(e) => {
            warn!(pid, "Failed to capture process tree: {}", e);
            Vec::new()
        }
    }
}

/// Sends `sig` to `pid`, and to its descendants when `tree` is set. A
/// process that is already gone is not an error.
#[cfg(unix)]
pub async fn terminate(pid: u32, tree: bool, sig: Signal) -> Result<()> {
    let family = if tree { capture_tree(pid).await } else { Vec::new() };
    debug!(pid, signal = %sig, descendants = family.len(), "signalling child");

    deliver(pid, sig)?;
    for kid in family {
        if let Err(e) = deliver(kid, sig) {
            debug!("Failed to signal descendant {}: {}", kid, e);
        }
    }
    Ok(())
}

#[cfg(windows)]
pub async fn terminate(pid: u32, tree: bool, sig: Signal) -> Result<()> {
    debug!(pid, signal = %sig, tree, "terminating child");
    tokio::task::spawn_blocking(move || crate::windows::terminate(pid, tree))
        .await
        .map_err(|e| Error::Signal(format!("termination of pid {} did not finish: {}", pid, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_tree_collects_grandchildren() {
        let mut table = HashMap::new();
        table.insert(1, vec![2, 3]);
        table.insert(3, vec![4]);
        table.insert(9, vec![10]);

        let mut found = walk_tree(1, &table);
        found.sort_unstable();
        assert_eq!(found, vec![2, 3, 4]);
        assert!(walk_tree(4, &table).is_empty());
    }

    #[test]
    fn test_walk_tree_is_level_ordered() {
        let mut table = HashMap::new();
        table.insert(1, vec![2, 3]);
        table.insert(2, vec![5]);
        table.insert(3, vec![4]);
        table.insert(5, vec![6]);

        assert_eq!(walk_tree(1, &table), vec![2, 3, 5, 4, 6]);
    }

    #[test]
    fn test_walk_tree_tolerates_cycles() {
        let mut table = HashMap::new();
        table.insert(1, vec![2]);
        table.insert(2, vec![1, 3]);
        table.insert(3, vec![2]);

        assert_eq!(walk_tree(1, &table), vec![2, 3]);
    }

    #[cfg(target_os = "linux")]
    fn is_alive(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rfind(')')
                .and_then(|i| stat[i + 1..].split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X"),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_terminate_reaches_grandchild() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

        let mut child = tokio::process::Command::new("sh")
            .args(["-c", &script])
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        let grandchild: i32 = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if let Ok(text) = tokio::fs::read_to_string(&pid_file).await
                    && let Ok(pid) = text.trim().parse()
                {
                    return pid;
                }
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        terminate(pid, true, Signal::Kill).await.unwrap();
        child.wait().await.unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while is_alive(grandchild) {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_missing_process_is_ok() {
        // pid far above any default pid_max
        assert!(terminate(i32::MAX as u32, false, Signal::Terminate).await.is_ok());
        assert!(terminate(i32::MAX as u32, true, Signal::Kill).await.is_ok());
    }
}
