//! Process table lookup through `ps`, for macOS and the BSDs where there is
//! no procfs to read.

use std::collections::HashMap;
use std::process::Command;
use tracing::warn;

fn parse_ps(output: &str) -> HashMap<u32, Vec<u32>> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for line in output.lines() {
        let mut cols = line.split_whitespace();
        let (Some(pid), Some(ppid)) = (cols.next(), cols.next()) else {
            continue;
        };
        if let (Ok(pid), Ok(ppid)) = (pid.parse::<u32>(), ppid.parse::<u32>()) {
            children.entry(ppid).or_default().push(pid);
        }
    }
    children
}

pub fn descendants(root: u32) -> Vec<u32> {
    match Command::new("ps").args(["-A", "-o", "pid=", "-o", "ppid="]).output() {
        Ok(output) if output.status.success() => {
            let table = parse_ps(&String::from_utf8_lossy(&output.stdout));
            super::kill::walk_tree(root, &table)
        }
        Ok(output) => {
            warn!("ps exited with {}; signalling the root process only", output.status);
            Vec::new()
        }
        Err(e) => {
            warn!("Failed to run ps: {}; signalling the root process only", e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ps_columns() {
        let table = parse_ps("  10     1\n  11    10\n  12    10\nbogus line\n");
        assert_eq!(table.get(&10), Some(&vec![11, 12]));
        assert_eq!(table.get(&1), Some(&vec![10]));
    }
}
