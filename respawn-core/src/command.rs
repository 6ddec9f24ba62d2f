//! Turns a raw command string into an executable plus argument list without
//! going through a shell.
//!
//! Each host family has its own grammar for telling the executable apart from
//! an inline argument tail. [`platform_parser`] picks the grammar for the
//! platform the crate was built for; callers can plug in any other
//! [`CommandParser`].

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    pub command: String,
    pub args: Vec<String>,
}

/// `None` means the command string is not acceptable ("bad command").
pub trait CommandParser: Send + Sync {
    fn parse(&self, command: &str, args: &[String]) -> Option<ResolvedCommand>;

    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> CommandParser for F
where
    F: Fn(&str, &[String]) -> Option<ResolvedCommand> + Send + Sync,
{
    fn parse(&self, command: &str, args: &[String]) -> Option<ResolvedCommand> {
        self(command, args)
    }
}

impl fmt::Debug for dyn CommandParser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandParser({})", self.name())
    }
}

// Executable ends at the first space that is not escaped with a backslash.
static POSIX_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^(.*?[^\\])(?: (.*)|$)").expect("valid posix grammar"));

static WINDOWS_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<command>(?:(?:[A-Za-z]:\\|\.\.?\\)(?:[\w\s.-]+\\)*)?[\w.-]+)(?P<tail>(?:\s+\S+)*)\s*$",
    )
    .expect("valid windows grammar")
});

static WINDOWS_QUOTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^"(?P<command>[^"]+)"(?P<tail>(?:\s+\S+)*)\s*$"#).expect("valid quoted grammar")
});

/// Grammar for POSIX-like hosts: spaces inside the executable path are
/// escaped as `\ `.
#[derive(Debug, Clone, Copy, Default)]
pub struct PosixGrammar;

impl CommandParser for PosixGrammar {
    fn parse(&self, command: &str, args: &[String]) -> Option<ResolvedCommand> {
        let captures = POSIX_COMMAND.captures(command.trim())?;
        let executable = captures.get(1)?.as_str().replace("\\ ", " ");
        let tail = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        Some(ResolvedCommand {
            command: executable,
            args: prepend_tail(tail, args),
        })
    }

    fn name(&self) -> &str {
        "posix"
    }
}

/// Grammar for Windows hosts: a drive or relative path made of word
/// characters, or a double-quoted path.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsGrammar;

impl CommandParser for WindowsGrammar {
    fn parse(&self, command: &str, args: &[String]) -> Option<ResolvedCommand> {
        let command = command.trim();
        let captures = WINDOWS_QUOTED
            .captures(command)
            .or_else(|| WINDOWS_COMMAND.captures(command))?;
        let executable = captures.name("command")?.as_str().to_string();
        let tail = captures.name("tail").map(|m| m.as_str()).unwrap_or_default();
        Some(ResolvedCommand {
            command: executable,
            args: prepend_tail(tail, args),
        })
    }

    fn name(&self) -> &str {
        "windows"
    }
}

fn prepend_tail(tail: &str, args: &[String]) -> Vec<String> {
    tail.split_whitespace()
        .map(str::to_string)
        .chain(args.iter().cloned())
        .collect()
}

/// Grammar matching the host the crate was compiled for.
pub fn platform_parser() -> Arc<dyn CommandParser> {
    if cfg!(windows) {
        Arc::new(WindowsGrammar)
    } else {
        Arc::new(PosixGrammar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_posix_plain_executable() {
        let resolved = PosixGrammar.parse("node", &strings(&["app.js"])).unwrap();
        assert_eq!(resolved.command, "node");
        assert_eq!(resolved.args, strings(&["app.js"]));
    }

    #[test]
    fn test_posix_inline_arguments_come_first() {
        let resolved = PosixGrammar
            .parse("node --inspect  --harmony", &strings(&["app.js"]))
            .unwrap();
        assert_eq!(resolved.command, "node");
        assert_eq!(resolved.args, strings(&["--inspect", "--harmony", "app.js"]));
    }

    #[test]
    fn test_posix_escaped_space_in_path() {
        let resolved = PosixGrammar
            .parse(r"/opt/my\ tools/run -v", &[])
            .unwrap();
        assert_eq!(resolved.command, "/opt/my tools/run");
        assert_eq!(resolved.args, strings(&["-v"]));
    }

    #[test]
    fn test_posix_rejects_empty() {
        assert!(PosixGrammar.parse("", &[]).is_none());
        assert!(PosixGrammar.parse("   ", &[]).is_none());
        assert!(PosixGrammar.parse("\\", &[]).is_none());
    }

    #[test]
    fn test_windows_drive_path_with_spaces() {
        let resolved = WindowsGrammar
            .parse(r"C:\Program Files\nodejs\node.exe app.js", &strings(&["-p"]))
            .unwrap();
        assert_eq!(resolved.command, r"C:\Program Files\nodejs\node.exe");
        assert_eq!(resolved.args, strings(&["app.js", "-p"]));
    }

    #[test]
    fn test_windows_quoted_path() {
        let resolved = WindowsGrammar
            .parse(r#""C:\Program Files\My App\run.exe" --fast"#, &[])
            .unwrap();
        assert_eq!(resolved.command, r"C:\Program Files\My App\run.exe");
        assert_eq!(resolved.args, strings(&["--fast"]));
    }

    #[test]
    fn test_windows_relative_and_bad() {
        let resolved = WindowsGrammar.parse(r"..\bin\tool", &[]).unwrap();
        assert_eq!(resolved.command, r"..\bin\tool");
        assert!(resolved.args.is_empty());
        assert!(WindowsGrammar.parse("", &[]).is_none());
        assert!(WindowsGrammar.parse("|pipe", &[]).is_none());
    }

    #[test]
    fn test_closure_parser() {
        let parser = |command: &str, args: &[String]| {
            Some(ResolvedCommand {
                command: command.to_uppercase(),
                args: args.to_vec(),
            })
        };
        let resolved = parser.parse("run", &strings(&["x"])).unwrap();
        assert_eq!(resolved.command, "RUN");
        assert_eq!(CommandParser::name(&parser), "custom");
    }
}
