//! External issuance agent (certbot-compatible CLI)
//!
//! The agent is driven in standalone mode: it binds its own HTTP-01
//! responder on the gateway's hostname, answers the CA, and leaves the
//! issued certificate as `0000_cert.pem` in its working directory. All of
//! its state (`config/`, `work/`, `logs/`) lives under one state directory.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use certomat_config::validate::agent::resolve_agent_binary;
use certomat_config::Config;

use super::error::IssuanceError;
use super::token::SerializationToken;
use crate::errors::StartupError;

/// Number of stderr lines kept for error reports
const STDERR_TAIL_LINES: usize = 20;

/// How long to wait for output readers once the agent has exited
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Handle to the external agent and its fixed invocation settings
#[derive(Debug, Clone)]
pub struct IssuanceAgent {
    binary: PathBuf,
    state_dir: PathBuf,
    /// Address the standalone HTTP-01 responder binds
    hostname: String,
    http01_port: Option<u16>,
    test_cert: bool,
    email: Option<String>,
    timeout: Duration,
}

impl IssuanceAgent {
    /// Create an agent handle
    ///
    /// `state_dir` is made absolute so the agent's view does not depend on
    /// its working directory.
    pub fn new(
        binary: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
        hostname: impl Into<String>,
    ) -> Self {
        let state_dir = state_dir.into();
        let state_dir = std::path::absolute(&state_dir).unwrap_or(state_dir);

        Self {
            binary: binary.into(),
            state_dir,
            hostname: hostname.into(),
            http01_port: None,
            test_cert: true,
            email: None,
            timeout: Duration::from_secs(300),
        }
    }

    /// Locate the configured binary and build a handle from configuration
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let binary = resolve_agent_binary(&config.agent.binary)
            .ok_or_else(|| StartupError::AgentMissing(config.agent.binary.clone()))?;

        info!(agent = %binary.display(), "Found issuance agent");

        Ok(Self::new(
            binary,
            &config.agent.state_dir,
            config.gateway.canonical_hostname(),
        )
        .with_test_cert(!config.gateway.production)
        .with_email(config.gateway.email.clone())
        .with_http01_port(config.agent.http01_port)
        .with_timeout(Duration::from_secs(config.agent.timeout_secs)))
    }

    /// Ask the CA's staging environment for test certificates
    pub fn with_test_cert(mut self, test_cert: bool) -> Self {
        self.test_cert = test_cert;
        self
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    pub fn with_http01_port(mut self, port: Option<u16>) -> Self {
        self.http01_port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether an agent account already exists under the state directory
    pub fn is_registered(&self) -> bool {
        self.state_dir.join("config").is_dir()
    }

    fn common_args(&self, args: &mut Vec<OsString>) {
        for (flag, dir) in [
            ("--config-dir", "config"),
            ("--work-dir", "work"),
            ("--logs-dir", "logs"),
        ] {
            args.push(flag.into());
            args.push(self.state_dir.join(dir).into_os_string());
        }
        args.push("--non-interactive".into());
    }

    /// Arguments of a `certonly` run for one staged CSR
    pub fn certonly_args(&self, csr_path: &Path, name: Option<&str>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "certonly".into(),
            "--standalone".into(),
            "--http-01-addr".into(),
            self.hostname.clone().into(),
        ];
        if let Some(port) = self.http01_port {
            args.push("--http-01-port".into());
            args.push(port.to_string().into());
        }
        args.push("--csr".into());
        args.push(csr_path.as_os_str().to_owned());
        self.common_args(&mut args);
        args.push("--preferred-challenges".into());
        args.push("http".into());
        if let Some(name) = name {
            args.push("-d".into());
            args.push(name.into());
        }
        if self.test_cert {
            args.push("--test-cert".into());
        }
        args
    }

    /// Arguments of the one-time account registration
    pub fn register_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["register".into(), "--agree-tos".into()];
        match &self.email {
            Some(email) => {
                args.push("--email".into());
                args.push(email.into());
            }
            None => args.push("--register-unsafely-without-email".into()),
        }
        self.common_args(&mut args);
        if self.test_cert {
            args.push("--test-cert".into());
        }
        args
    }

    /// Register an agent account unless one exists
    ///
    /// Runs under the serialization token like any other agent invocation.
    pub async fn ensure_registered(&self, token: &SerializationToken) -> Result<(), StartupError> {
        let _token = token.acquire("agent-registration").await;

        if self.is_registered() {
            debug!(state_dir = %self.state_dir.display(), "Agent account already registered");
            return Ok(());
        }

        info!(
            state_dir = %self.state_dir.display(),
            email = ?self.email,
            "Registering issuance agent account"
        );
        self.run("register", self.register_args())
            .await
            .map_err(StartupError::Registration)
    }

    /// Obtain a certificate for a staged CSR
    ///
    /// The caller holds the serialization token and owns the result files.
    pub async fn certonly(&self, csr_path: &Path, name: Option<&str>) -> Result<(), IssuanceError> {
        self.run("certonly", self.certonly_args(csr_path, name)).await
    }

    async fn run(&self, purpose: &'static str, args: Vec<OsString>) -> Result<(), IssuanceError> {
        tokio::fs::create_dir_all(&self.state_dir)
            .await
            .map_err(IssuanceError::Spawn)?;

        info!(
            agent = %self.binary.display(),
            purpose,
            args = ?args,
            "Running issuance agent"
        );

        let mut child = Command::new(&self.binary)
            .args(&args)
            .current_dir(&self.state_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(IssuanceError::Spawn)?;

        let stdout = child.stdout.take().map(|out| forward_lines(out, false));
        let stderr = child.stderr.take().map(|err| forward_lines(err, true));

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                abort_readers(stdout, stderr);
                return Err(IssuanceError::Spawn(e));
            }
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out agent");
                }
                abort_readers(stdout, stderr);
                error!(purpose, timeout = ?self.timeout, "Issuance agent timed out");
                return Err(IssuanceError::Timeout(self.timeout));
            }
        };

        if let Some(reader) = stdout {
            let _ = timeout(OUTPUT_DRAIN_TIMEOUT, reader).await;
        }
        let stderr_tail = match stderr {
            Some(reader) => match timeout(OUTPUT_DRAIN_TIMEOUT, reader).await {
                Ok(Ok(tail)) => tail,
                _ => Vec::new(),
            },
            None => Vec::new(),
        };

        if status.success() {
            info!(purpose, "Issuance agent finished");
            return Ok(());
        }

        error!(purpose, status = %status, "Issuance agent failed");
        Err(IssuanceError::Failed {
            detail: failure_detail(status, &stderr_tail),
        })
    }
}

fn failure_detail(status: ExitStatus, stderr_tail: &[String]) -> String {
    if stderr_tail.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, stderr_tail.join("\n"))
    }
}

/// Log each output line; stderr lines are also collected (last few only)
fn forward_lines<R>(stream: R, is_stderr: bool) -> JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        let mut tail = Vec::new();

        while let Ok(Some(line)) = lines.next_line().await {
            if is_stderr {
                warn!(target: "certomat::agent", "{}", line);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            } else {
                info!(target: "certomat::agent", "{}", line);
            }
        }

        tail
    })
}

fn abort_readers(stdout: Option<JoinHandle<Vec<String>>>, stderr: Option<JoinHandle<Vec<String>>>) {
    for reader in [stdout, stderr].into_iter().flatten() {
        reader.abort();
    }
}
