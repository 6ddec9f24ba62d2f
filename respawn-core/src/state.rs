use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};

/// Short identifier distinguishing one monitor from another in listings.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct Uid(String);

impl Uid {
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        let sanitized = Self::sanitize(&name);
        if sanitized.is_empty() {
            return Err(crate::Error::InvalidUid(name));
        }
        Ok(Self(sanitized))
    }

    /// Four random alphanumeric characters.
    pub fn random() -> Self {
        let id: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(4)
            .map(char::from)
            .collect();
        Self(id)
    }

    fn sanitize(name: &str) -> String {
        name.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '-'
                }
            })
            .collect::<String>()
            .trim_matches('-')
            .to_string()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a monitor is in its supervision cycle.
///
/// ```text
/// Idle ──start──► Starting ──spawned──► Running ──exit──► Exiting ─┬─► Starting
///                    │                                            └─► Stopped
///                    └── spawn failure ──► Idle / Stopped
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Idle,
    Starting,
    Running,
    Exiting,
    Stopped,
}

impl LifecycleState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Exiting => "exiting",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
