//! Process boundary to the WireGuard tooling
//!
//! A single narrow trait covers everything the engine asks of the
//! daemon host: live peer set manipulation, interface lifecycle, and
//! dump queries. The real implementation shells out to `wg`/`wg-quick`
//! with a bounded timeout; tests inject [`MockRunner`].

use async_trait::async_trait;
use meshgate_core::error::CommandError;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Narrow interface to the peer tooling on the daemon host
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Add or update one peer on a running interface, without
    /// disturbing the other peers' sessions
    async fn set_live_peer(
        &self,
        interface: &str,
        public_key: &str,
        allowed_ip: &str,
    ) -> Result<(), CommandError>;

    /// Remove one peer from a running interface
    async fn remove_live_peer(&self, interface: &str, public_key: &str)
        -> Result<(), CommandError>;

    /// Bring an interface up from its config file
    async fn interface_up(&self, interface: &str) -> Result<(), CommandError>;

    /// Tear an interface down
    async fn interface_down(&self, interface: &str) -> Result<(), CommandError>;

    /// Query the per-peer transfer/handshake dump for an interface
    async fn query_dump(&self, interface: &str) -> Result<String, CommandError>;
}

/// Run an external command with a bounded timeout
///
/// Non-zero exit and timeout both surface as [`CommandError`]; a
/// dispatched command is never cancelled mid-flight, it runs to
/// completion or times out.
pub(crate) async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, CommandError> {
    debug!(program, ?args, "running external command");

    let output = tokio::time::timeout(timeout, Command::new(program).args(args).output())
        .await
        .map_err(|_| CommandError::Timeout {
            program: program.to_string(),
            seconds: timeout.as_secs(),
        })?
        .map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(CommandError::NonZero {
            program: program.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Real runner shelling out to `wg` and `wg-quick`
pub struct WgTools {
    timeout: Duration,
}

impl WgTools {
    /// Create a runner with the given per-command timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for WgTools {
    async fn set_live_peer(
        &self,
        interface: &str,
        public_key: &str,
        allowed_ip: &str,
    ) -> Result<(), CommandError> {
        run_command(
            "wg",
            &[
                "set",
                interface,
                "peer",
                public_key,
                "allowed-ips",
                allowed_ip,
            ],
            self.timeout,
        )
        .await
        .map(|_| ())
    }

    async fn remove_live_peer(
        &self,
        interface: &str,
        public_key: &str,
    ) -> Result<(), CommandError> {
        run_command(
            "wg",
            &["set", interface, "peer", public_key, "remove"],
            self.timeout,
        )
        .await
        .map(|_| ())
    }

    async fn interface_up(&self, interface: &str) -> Result<(), CommandError> {
        run_command("wg-quick", &["up", interface], self.timeout)
            .await
            .map(|_| ())
    }

    async fn interface_down(&self, interface: &str) -> Result<(), CommandError> {
        run_command("wg-quick", &["down", interface], self.timeout)
            .await
            .map(|_| ())
    }

    async fn query_dump(&self, interface: &str) -> Result<String, CommandError> {
        run_command("wg", &["show", interface, "dump"], self.timeout).await
    }
}

/// Recording runner for tests
///
/// Every call is logged as a flat string; dump output is configurable
/// per interface; all commands can be switched to failure to exercise
/// the soft-failure paths.
#[derive(Default)]
pub struct MockRunner {
    calls: Mutex<Vec<String>>,
    dumps: Mutex<HashMap<String, String>>,
    fail: Mutex<bool>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the dump output returned for an interface
    pub fn set_dump(&self, interface: &str, output: &str) {
        self.dumps
            .lock()
            .unwrap()
            .insert(interface.to_string(), output.to_string());
    }

    /// Make every subsequent command fail
    pub fn fail_all(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    /// Calls recorded so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), CommandError> {
        self.calls.lock().unwrap().push(call);
        if *self.fail.lock().unwrap() {
            return Err(CommandError::NonZero {
                program: "wg".to_string(),
                stderr: "mock failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn set_live_peer(
        &self,
        interface: &str,
        public_key: &str,
        allowed_ip: &str,
    ) -> Result<(), CommandError> {
        self.record(format!("set_peer {interface} {public_key} {allowed_ip}"))
    }

    async fn remove_live_peer(
        &self,
        interface: &str,
        public_key: &str,
    ) -> Result<(), CommandError> {
        self.record(format!("remove_peer {interface} {public_key}"))
    }

    async fn interface_up(&self, interface: &str) -> Result<(), CommandError> {
        self.record(format!("up {interface}"))
    }

    async fn interface_down(&self, interface: &str) -> Result<(), CommandError> {
        self.record(format!("down {interface}"))
    }

    async fn query_dump(&self, interface: &str) -> Result<String, CommandError> {
        self.record(format!("dump {interface}"))?;
        Ok(self
            .dumps
            .lock()
            .unwrap()
            .get(interface)
            .cloned()
            .unwrap_or_default())
    }
}
