use crate::cluster::{Cluster, SshConfig};
use crate::defaults::SshDefaults;
use crate::error::{Error, RemoteCommandFailedDetails, Result};
use crate::utils::shell;
use std::io::{BufRead, BufReader, IsTerminal, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use super::RemoteExecutor;

pub struct SshClient {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    pub password: Option<String>,
    pub key_passphrase: Option<String>,
    pub connect_timeout_secs: u32,
    /// When true, all commands run locally instead of over SSH.
    /// Set automatically when the host is localhost/127.0.0.1/::1.
    pub is_local: bool,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    fn spawn_error(program: &str, err: std::io::Error) -> Self {
        CommandOutput {
            stdout: String::new(),
            stderr: format!("{} error: {}", program, err),
            success: false,
            exit_code: -1,
        }
    }

    fn combined(&self) -> String {
        let mut text = self.stdout.trim_end().to_string();
        let stderr = self.stderr.trim_end();
        if !stderr.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr);
        }
        text
    }
}

/// Program, arguments and secret environment for one process invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Option<(String, String)>,
}

impl Invocation {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some((key, value)) = &self.env {
            cmd.env(key, value);
        }
        cmd
    }
}

impl SshClient {
    /// Build a client for `ip` from the cluster-wide SSH settings overlaid
    /// with the host group's override.
    pub fn connect(ip: &str, cluster: &Cluster, defaults: &SshDefaults) -> Result<Self> {
        Self::from_config(ip, &cluster.ssh_for(ip), defaults)
    }

    pub fn from_config(ip: &str, ssh: &SshConfig, defaults: &SshDefaults) -> Result<Self> {
        let identity_file = match &ssh.pk {
            Some(path) if !path.is_empty() => {
                let expanded = shellexpand::tilde(path).to_string();
                if !Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(ip, expanded));
                }
                Some(expanded)
            }
            _ => None,
        };

        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());

        Ok(Self {
            host: ip.to_string(),
            user: non_empty(&ssh.user).unwrap_or_else(|| defaults.user.clone()),
            port: ssh.port.unwrap_or(defaults.port),
            identity_file,
            password: non_empty(&ssh.passwd),
            key_passphrase: non_empty(&ssh.pk_passwd),
            connect_timeout_secs: defaults.connect_timeout_secs,
            is_local: is_local_host(ip),
        })
    }

    fn transport_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];

        // Password prompts must reach sshpass.
        if self.password.is_none() && self.key_passphrase.is_none() {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        args
    }

    /// Wrap an ssh/scp argument list with sshpass when a secret is configured.
    fn authenticated(&self, program: &str, args: Vec<String>) -> Invocation {
        let secret = match (&self.identity_file, &self.key_passphrase, &self.password) {
            (Some(_), Some(passphrase), _) => Some((true, passphrase.clone())),
            (_, _, Some(password)) => Some((false, password.clone())),
            _ => None,
        };

        match secret {
            Some((is_passphrase, value)) => {
                let mut wrapped = Vec::new();
                if is_passphrase {
                    wrapped.push("-P".to_string());
                    wrapped.push("passphrase".to_string());
                }
                wrapped.push("-e".to_string());
                wrapped.push(program.to_string());
                wrapped.extend(args);
                Invocation {
                    program: "sshpass".to_string(),
                    args: wrapped,
                    env: Some(("SSHPASS".to_string(), value)),
                }
            }
            None => Invocation {
                program: program.to_string(),
                args,
                env: None,
            },
        }
    }

    /// The process invocation that runs `command` on this host.
    pub fn ssh_invocation(&self, command: &str) -> Invocation {
        if self.is_local {
            return Invocation {
                program: "sh".to_string(),
                args: vec!["-c".to_string(), command.to_string()],
                env: None,
            };
        }

        let mut args = self.transport_options();
        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }
        args.push(format!("{}@{}", self.user, self.host));
        args.push(command.to_string());

        self.authenticated("ssh", args)
    }

    /// The process invocation that copies `sources` to `remote` on this host.
    pub fn copy_invocation(&self, sources: &[String], remote: &str) -> Invocation {
        if self.is_local {
            let mut args = vec!["-r".to_string()];
            args.extend(sources.iter().cloned());
            args.push(remote.to_string());
            return Invocation {
                program: "cp".to_string(),
                args,
                env: None,
            };
        }

        let mut args = vec!["-r".to_string()];
        args.extend(self.transport_options());
        if self.port != 22 {
            args.push("-P".to_string());
            args.push(self.port.to_string());
        }
        args.extend(sources.iter().cloned());
        args.push(format!("{}@{}:{}", self.user, self.host, remote));

        self.authenticated("scp", args)
    }

    pub fn execute(&self, command: &str) -> CommandOutput {
        self.execute_with_retry(&self.ssh_invocation(command), 3, false)
    }

    fn execute_streaming(&self, command: &str) -> CommandOutput {
        self.execute_with_retry(&self.ssh_invocation(&merge_stderr(command)), 3, true)
    }

    fn execute_with_retry(
        &self,
        invocation: &Invocation,
        max_attempts: u32,
        stream: bool,
    ) -> CommandOutput {
        let backoff_secs = [0, 2, 5]; // delays before retry 1, 2, 3

        let mut attempt = 0;
        loop {
            let result = if stream {
                self.execute_once_streaming(invocation)
            } else {
                execute_once(invocation)
            };

            // Only retry on transient connection errors, not command failures
            attempt += 1;
            if result.success
                || attempt >= max_attempts
                || self.is_local
                || !is_transient_ssh_error(&result)
            {
                return result;
            }

            let delay = backoff_secs.get(attempt as usize).copied().unwrap_or(5);
            log_status!(
                "ssh",
                "Connection to {} failed (attempt {}/{}), retrying in {}s...",
                self.host,
                attempt,
                max_attempts,
                delay
            );
            thread::sleep(std::time::Duration::from_secs(delay));
        }
    }

    fn execute_once_streaming(&self, invocation: &Invocation) -> CommandOutput {
        let mut cmd = invocation.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return CommandOutput::spawn_error(&invocation.program, e),
        };

        // Drain stderr on its own thread so a chatty transport cannot block stdout.
        let stderr_reader = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        let mut stdout = String::new();
        if let Some(pipe) = child.stdout.take() {
            for line in BufReader::new(pipe).lines() {
                let Ok(line) = line else { break };
                stream_line(&self.host, &line);
                stdout.push_str(&line);
                stdout.push('\n');
            }
        }

        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        match child.wait() {
            Ok(status) => CommandOutput {
                stdout,
                stderr,
                success: status.success(),
                exit_code: status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput::spawn_error(&invocation.program, e),
        }
    }

    fn command_failed(&self, command: &str, output: &CommandOutput) -> Error {
        if !self.is_local && is_ssh_transport_failure(output) {
            return Error::ssh_connect_failed(&self.host, output.combined());
        }
        if output.exit_code == -1 {
            return Error::ssh_connect_failed(&self.host, output.stderr.trim().to_string());
        }
        Error::remote_command_failed(RemoteCommandFailedDetails {
            command: command.to_string(),
            exit_code: output.exit_code,
            output: output.combined(),
            host: self.host.clone(),
        })
    }
}

impl RemoteExecutor for SshClient {
    fn host(&self) -> &str {
        &self.host
    }

    fn cmd_async(&self, commands: &[String]) -> Result<()> {
        for command in commands {
            if command.trim().is_empty() {
                continue;
            }
            let output = self.execute_streaming(command);
            if !output.success {
                return Err(self.command_failed(command, &output));
            }
        }
        Ok(())
    }

    fn cmd(&self, command: &str) -> Result<String> {
        let output = self.execute(&merge_stderr(command));
        if !output.success {
            return Err(self.command_failed(command, &output));
        }
        Ok(output.stdout)
    }

    fn cmd_to_string(&self, command: &str) -> Result<String> {
        let output = self.execute(command);
        if !output.success {
            return Err(self.command_failed(command, &output));
        }
        Ok(output.stdout.trim().to_string())
    }

    fn copy(&self, local: &Path, remote: &str) -> Result<()> {
        if !local.exists() {
            return Err(Error::internal_io(
                format!("{} does not exist", local.display()),
                Some(format!("copy to {}:{}", self.host, remote)),
            ));
        }

        // A directory is merged into `remote` entry by entry, so a repeat
        // copy never nests it as `remote/<name>`.
        let (sources, target_dir) = if local.is_dir() {
            (directory_entries(local)?, remote.to_string())
        } else {
            let parent = Path::new(remote)
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
            (vec![local.to_string_lossy().to_string()], parent)
        };

        if !target_dir.is_empty() {
            self.cmd(&format!("mkdir -p {}", shell::quote_path(&target_dir)))?;
        }
        if sources.is_empty() {
            return Ok(());
        }

        let invocation = self.copy_invocation(&sources, remote);
        let output = self.execute_with_retry(&invocation, 3, false);
        if !output.success {
            let command = format!("copy {} -> {}", local.display(), remote);
            return Err(self.command_failed(&command, &output));
        }
        Ok(())
    }
}

fn execute_once(invocation: &Invocation) -> CommandOutput {
    match invocation.command().stdin(Stdio::null()).output() {
        Ok(out) => CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput::spawn_error(&invocation.program, e),
    }
}

/// Run `command` in a subshell with stderr folded into stdout.
///
/// The closing parenthesis goes on its own line so a trailing heredoc
/// terminator stays alone on its line.
fn merge_stderr(command: &str) -> String {
    format!("( {}\n) 2>&1", command)
}

/// Entries of `dir` as copy sources, sorted for a stable argument order.
fn directory_entries(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", dir.display())))
    })?;

    let mut sources = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", dir.display())))
        })?;
        sources.push(entry.path().to_string_lossy().to_string());
    }
    sources.sort();
    Ok(sources)
}

/// Echo one line of remote output, prefixed with its host.
fn stream_line(host: &str, line: &str) {
    if std::io::stderr().is_terminal() {
        eprintln!("[{}] {}", host, line);
    }
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

const TRANSIENT_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "no route to host",
    "network is unreachable",
    "temporary failure in name resolution",
    "broken pipe",
    "ssh_exchange_identification",
    "kex_exchange_identification",
    "connection closed by remote host",
];

const TRANSPORT_PATTERNS: &[&str] = &[
    "ssh:",
    "permission denied (",
    "host key verification failed",
    "could not resolve hostname",
];

/// Check if a failure came from the ssh transport rather than the remote command.
///
/// ssh exits 255 on its own errors, but a remote command may exit 255 too.
/// Only an exit 255 with no remote output and an ssh-style diagnostic
/// counts as a transport failure.
fn is_ssh_transport_failure(output: &CommandOutput) -> bool {
    if output.exit_code != 255 || !output.stdout.trim().is_empty() {
        return false;
    }
    let stderr = output.stderr.to_lowercase();
    TRANSPORT_PATTERNS
        .iter()
        .chain(TRANSIENT_PATTERNS)
        .any(|p| stderr.contains(p))
}

/// Check if an SSH failure is a transient connection error worth retrying.
fn is_transient_ssh_error(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();
    is_ssh_transport_failure(output) && TRANSIENT_PATTERNS.iter().any(|p| stderr.contains(p))
}
