use std::collections::HashMap;
use std::fs;

/// Parent pid from the contents of `/proc/<pid>/stat`. The command name can
/// hold spaces and parentheses, so fields are counted from the last `)`.
fn parse_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

fn read_parent_map() -> HashMap<u32, Vec<u32>> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return children;
    };

    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        // processes can vanish between readdir and read
        let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid)) else {
            continue;
        };
        if let Some(ppid) = parse_ppid(&stat) {
            children.entry(ppid).or_default().push(pid);
        }
    }
    children
}

/// Every live descendant of `root`, parents before children.
pub fn descendants(root: u32) -> Vec<u32> {
    super::kill::walk_tree(root, &read_parent_map())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ppid_plain() {
        let stat = "1234 (node) S 42 1234 1234 0 -1 4194560 ...";
        assert_eq!(parse_ppid(stat), Some(42));
    }

    #[test]
    fn test_parse_ppid_odd_command_name() {
        let stat = "77 (my (weird) app) R 9 77 77 0 -1";
        assert_eq!(parse_ppid(stat), Some(9));
        assert_eq!(parse_ppid("garbage"), None);
    }

    #[test]
    fn test_own_process_is_a_child_of_its_parent() {
        let me = std::process::id();
        let parent = std::os::unix::process::parent_id();
        assert!(read_parent_map()
            .get(&parent)
            .is_some_and(|kids| kids.contains(&me)));
    }
}
