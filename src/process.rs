use std::{
    io::Read,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::config::{COMMAND_TIMEOUT, INSTALL_DIRS};
use crate::error::{ProviderError, Result};

/// Runs an external executable to completion and returns its stdout.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[&str]) -> Result<String>;
}

/// Spawns the real executable. A child still running after `timeout` is
/// killed so a hung tool cannot pin a worker thread forever.
pub struct SystemRunner {
    timeout: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::with_timeout(COMMAND_TIMEOUT)
    }
}

impl SystemRunner {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[&str]) -> Result<String> {
        if program.is_absolute() && !program.exists() {
            return Err(ProviderError::Missing(program.to_path_buf()));
        }
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::NotFound {
                    ProviderError::Missing(program.to_path_buf())
                } else {
                    ProviderError::Spawn {
                        path: program.to_path_buf(),
                        source,
                    }
                }
            })?;
        // Drain both pipes while waiting; a full pipe would stall the child.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProviderError::Timeout {
                        program: program_name(program),
                        seconds: self.timeout.as_secs_f64(),
                    });
                }
                Ok(None) => thread::sleep(WAIT_POLL),
                Err(source) => {
                    return Err(ProviderError::Spawn {
                        path: program.to_path_buf(),
                        source,
                    });
                }
            }
        };
        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        if !status.success() {
            return Err(ProviderError::Exit {
                program: program_name(program),
                status: status.to_string(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&stdout).to_string())
    }
}

fn drain(pipe: Option<impl Read + Send + 'static>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

pub(crate) fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

const WAIT_POLL: Duration = Duration::from_millis(5);

/// Locates a tool: conventional install dirs, then `PATH`, then the first
/// install dir as the fallback default.
pub fn resolve_binary(name: &str) -> PathBuf {
    resolve_binary_in(name, &INSTALL_DIRS)
}

fn resolve_binary_in(name: &str, dirs: &[&str]) -> PathBuf {
    dirs.iter()
        .map(|dir| Path::new(dir).join(name))
        .find(|path| path.is_file())
        .or_else(|| which::which(name).ok())
        .unwrap_or_else(|| Path::new(dirs.first().copied().unwrap_or("/usr/local/bin")).join(name))
}

/// One entry of the running process list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessInfo {
    pub path: PathBuf,
}

impl ProcessInfo {
    pub fn name(&self) -> String {
        program_name(&self.path)
    }

    /// The enclosing `.app` bundle, if the executable lives inside one.
    pub fn bundle_path(&self) -> Option<PathBuf> {
        self.path
            .ancestors()
            .find(|dir| dir.extension().is_some_and(|ext| ext == "app"))
            .map(Path::to_path_buf)
    }
}

/// Snapshot of running processes, used for provider probing and app lookup.
pub trait ProcessProbe: Send + Sync {
    fn processes(&self) -> Vec<ProcessInfo>;
}

#[derive(Default)]
pub struct SystemProbe;

impl ProcessProbe for SystemProbe {
    fn processes(&self) -> Vec<ProcessInfo> {
        let output = match Command::new("ps").args(["-axo", "comm="]).output() {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                tracing::warn!("ps exited with {}", output.status);
                return Vec::new();
            }
            Err(err) => {
                tracing::warn!("failed to list processes: {err}");
                return Vec::new();
            }
        };
        parse_process_list(&String::from_utf8_lossy(&output.stdout))
    }
}

fn parse_process_list(text: &str) -> Vec<ProcessInfo> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| ProcessInfo {
            path: PathBuf::from(line),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_process_paths() {
        let text = "/sbin/launchd\n  /opt/homebrew/bin/yabai\n\n/Applications/Safari.app/Contents/MacOS/Safari\n";
        let processes = parse_process_list(text);
        assert_eq!(processes.len(), 3);
        assert_eq!(processes[1].name(), "yabai");
        assert_eq!(
            processes[2].bundle_path(),
            Some(PathBuf::from("/Applications/Safari.app"))
        );
        assert_eq!(processes[0].bundle_path(), None);
    }

    #[test]
    fn nested_helper_resolves_innermost_bundle() {
        let info = ProcessInfo {
            path: PathBuf::from(
                "/Applications/Slack.app/Contents/Frameworks/Slack Helper.app/Contents/MacOS/Slack Helper",
            ),
        };
        assert_eq!(
            info.bundle_path(),
            Some(PathBuf::from(
                "/Applications/Slack.app/Contents/Frameworks/Slack Helper.app"
            ))
        );
    }

    #[test]
    fn missing_absolute_binary_is_reported() {
        let err = SystemRunner::default()
            .run(Path::new("/nonexistent/spacesync-test/yabai"), &["-m", "query"])
            .unwrap_err();
        assert!(matches!(err, ProviderError::Missing(_)));
    }

    #[test]
    fn captures_stdout_and_exit_status() {
        let runner = SystemRunner::default();
        let out = runner.run(Path::new("/bin/sh"), &["-c", "echo 1; echo 2"]).unwrap();
        assert_eq!(out, "1\n2\n");

        let err = runner
            .run(Path::new("/bin/sh"), &["-c", "echo nope >&2; exit 3"])
            .unwrap_err();
        match err {
            ProviderError::Exit { stderr, .. } => assert_eq!(stderr, "nope"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn hung_child_is_killed_after_timeout() {
        let runner = SystemRunner::with_timeout(Duration::from_millis(100));
        let started = Instant::now();
        let err = runner.run(Path::new("/bin/sleep"), &["5"]).unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn unresolvable_binary_falls_back_to_first_dir() {
        let path = resolve_binary_in(
            "spacesync-no-such-tool",
            &["/nonexistent/spacesync-a", "/nonexistent/spacesync-b"],
        );
        assert_eq!(
            path,
            PathBuf::from("/nonexistent/spacesync-a/spacesync-no-such-tool")
        );
    }
}
