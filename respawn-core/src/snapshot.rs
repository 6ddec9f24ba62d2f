use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::{LifecycleState, Uid};

/// Point-in-time view of a monitor and its child, for list/report tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub uid: Uid,
    pub id: Option<String>,
    pub state: LifecycleState,
    pub running: bool,
    pub restarts: u32,
    pub command: String,
    /// First argument (the script), relative to `source_dir` when one is set.
    pub file: Option<String>,
    /// Arguments after `file`.
    pub args: Vec<String>,
    pub pid: Option<u32>,
    pub supervisor_pid: u32,
    /// Start time of the current child, in milliseconds since the epoch.
    pub ctime: Option<u64>,
    pub silent: bool,
    pub cwd: PathBuf,
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pid_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub log_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub out_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub err_file: Option<PathBuf>,
}

impl Snapshot {
    /// Splits a monitor's argument list into the `file`/`args` pair shown in
    /// listings.
    pub fn split_args(args: &[String], source_dir: Option<&Path>) -> (Option<String>, Vec<String>) {
        let file = args.first().map(|first| match source_dir {
            Some(dir) => Path::new(first)
                .strip_prefix(dir)
                .map(|rel| rel.to_string_lossy().into_owned())
                .unwrap_or_else(|_| first.clone()),
            None => first.clone(),
        });
        let rest = args.iter().skip(1).cloned().collect();
        (file, rest)
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
