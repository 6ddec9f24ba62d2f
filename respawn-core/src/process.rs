use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use tokio::process::{Child, Command};

/// Descriptor number the message channel occupies inside the child.
pub const CHANNEL_FD: i32 = 3;

#[cfg(windows)]
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Terminate,
    Kill,
    Interrupt,
    Quit,
    Reload,
    User1,
    User2,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Terminate => "SIGTERM",
            Signal::Kill => "SIGKILL",
            Signal::Interrupt => "SIGINT",
            Signal::Quit => "SIGQUIT",
            Signal::Reload => "SIGHUP",
            Signal::User1 => "SIGUSR1",
            Signal::User2 => "SIGUSR2",
        }
    }

    #[cfg(unix)]
    pub fn to_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal as NixSignal;
        match self {
            Signal::Terminate => NixSignal::SIGTERM,
            Signal::Kill => NixSignal::SIGKILL,
            Signal::Interrupt => NixSignal::SIGINT,
            Signal::Quit => NixSignal::SIGQUIT,
            Signal::Reload => NixSignal::SIGHUP,
            Signal::User1 => NixSignal::SIGUSR1,
            Signal::User2 => NixSignal::SIGUSR2,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        match name {
            "TERM" => Ok(Signal::Terminate),
            "KILL" => Ok(Signal::Kill),
            "INT" => Ok(Signal::Interrupt),
            "QUIT" => Ok(Signal::Quit),
            "HUP" => Ok(Signal::Reload),
            "USR1" => Ok(Signal::User1),
            "USR2" => Ok(Signal::User2),
            _ => Err(crate::Error::Signal(format!("Unknown signal: {}", s))),
        }
    }
}

impl Serialize for Signal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Signal {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    code: Option<i32>,
    signal: Option<i32>,
}

impl ExitStatus {
    pub fn from_std(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
            #[cfg(not(unix))]
            signal: None,
        }
    }

    pub fn new(code: Option<i32>, signal: Option<i32>) -> Self {
        Self { code, signal }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn signal(&self) -> Option<i32> {
        self.signal
    }
}

/// One set of standard streams for a single spawn.
pub struct StdioSet {
    pub stdin: Stdio,
    pub stdout: Stdio,
    pub stderr: Stdio,
}

/// Produces fresh caller-owned streams for every spawn, since a `Stdio`
/// cannot be reused across restarts.
#[derive(Clone)]
pub struct StdioFactory(Arc<dyn Fn() -> std::io::Result<StdioSet> + Send + Sync>);

impl StdioFactory {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> std::io::Result<StdioSet> + Send + Sync + 'static,
    {
        Self(Arc::new(factory))
    }

    pub fn make(&self) -> std::io::Result<StdioSet> {
        (self.0)()
    }
}

impl fmt::Debug for StdioFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StdioFactory(<fn>)")
    }
}

pub struct ProcessBuilder {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    stdout: Stdio,
    stderr: Stdio,
    stdin: Stdio,
    #[cfg(unix)]
    channel: Option<std::os::fd::OwnedFd>,
    detached: bool,
}

impl ProcessBuilder {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            stdout: Stdio::piped(),
            stderr: Stdio::piped(),
            stdin: Stdio::null(),
            #[cfg(unix)]
            channel: None,
            detached: false,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args = args.into_iter().map(|s| s.as_ref().to_string()).collect();
        self
    }

    /// The complete environment; nothing is inherited beyond these entries.
    pub fn envs(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn env<K, V>(mut self, key: K, value: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.env
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<std::path::Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn stdio(mut self, set: StdioSet) -> Self {
        self.stdin = set.stdin;
        self.stdout = set.stdout;
        self.stderr = set.stderr;
        self
    }

    /// Installs `fd` as descriptor [`CHANNEL_FD`] in the child.
    #[cfg(unix)]
    pub fn channel(mut self, fd: std::os::fd::OwnedFd) -> Self {
        self.channel = Some(fd);
        self
    }

    /// New process group on Windows, so console signals aimed at the
    /// supervisor do not reach the child.
    pub fn detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn spawn(self) -> crate::Result<Child> {
        tracing::info!(
            "Spawning process: command='{}', args={:?}",
            self.command,
            self.args
        );

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdout(self.stdout)
            .stderr(self.stderr)
            .stdin(self.stdin)
            .env_clear()
            .envs(&self.env)
            .kill_on_drop(true);

        if let Some(cwd) = &self.cwd {
            tracing::debug!("Setting working directory to: {:?}", cwd);
            cmd.current_dir(cwd);
        }

        #[cfg(unix)]
        {
            if let Some(fd) = &self.channel {
                use std::os::fd::AsRawFd;
                let raw = fd.as_raw_fd();
                // SAFETY: the hook only calls async-signal-safe fcntl/dup2.
                unsafe {
                    cmd.pre_exec(move || install_channel_fd(raw));
                }
            }
        }

        #[cfg(windows)]
        {
            if self.detached {
                cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
            }
        }

        #[cfg(not(windows))]
        let _ = self.detached;

        // The child's copy of the channel is closed once `self` drops below.
        cmd.spawn()
            .map_err(|e| crate::Error::SpawnFailed(format!("{}: {}", self.command, e)))
    }
}

#[cfg(unix)]
fn install_channel_fd(raw: std::os::fd::RawFd) -> std::io::Result<()> {
    if raw == CHANNEL_FD {
        // dup2 onto itself keeps FD_CLOEXEC, so clear it by hand.
        let flags = unsafe { libc::fcntl(raw, libc::F_GETFD) };
        if flags < 0 || unsafe { libc::fcntl(raw, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
            return Err(std::io::Error::last_os_error());
        }
    } else if unsafe { libc::dup2(raw, CHANNEL_FD) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
