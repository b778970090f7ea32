//! Packet-filter boundary
//!
//! Maps [`FirewallRule`] records to filter arguments and defines the
//! three primitives the reconciler needs on its chain: flush, default
//! deny, append. The real implementation shells out to `iptables`;
//! tests inject [`MockFilter`].

use async_trait::async_trait;
use meshgate_core::error::CommandError;
use meshgate_store::{FirewallRule, RuleAction};
use std::sync::Mutex;
use std::time::Duration;

use crate::runner::run_command;

/// Packet-filter operations on a named chain
#[async_trait]
pub trait PacketFilter: Send + Sync {
    /// Remove every rule from the chain
    async fn flush_chain(&self, chain: &str) -> Result<(), CommandError>;

    /// Set the chain's default policy to deny
    async fn set_default_deny(&self, chain: &str) -> Result<(), CommandError>;

    /// Append one rule at the end of the chain
    async fn append_rule(&self, chain: &str, rule: &FirewallRule) -> Result<(), CommandError>;
}

/// iptables arguments for appending a rule to a chain
///
/// Empty source/destination match anything; `any` protocol adds no
/// protocol match.
pub fn rule_args(chain: &str, rule: &FirewallRule) -> Vec<String> {
    let mut args = vec!["-A".to_string(), chain.to_string()];

    if !rule.source.is_empty() {
        args.push("-s".to_string());
        args.push(rule.source.clone());
    }
    if !rule.destination.is_empty() {
        args.push("-d".to_string());
        args.push(rule.destination.clone());
    }
    if let Some(protocol) = rule.protocol.as_filter_arg() {
        args.push("-p".to_string());
        args.push(protocol.to_string());
    }

    args.push("-j".to_string());
    args.push(
        match rule.action {
            RuleAction::Allow => "ACCEPT",
            RuleAction::Deny => "DROP",
        }
        .to_string(),
    );

    args
}

/// Real packet filter shelling out to `iptables`
pub struct IptablesFilter {
    timeout: Duration,
}

impl IptablesFilter {
    /// Create a filter with the given per-command timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl PacketFilter for IptablesFilter {
    async fn flush_chain(&self, chain: &str) -> Result<(), CommandError> {
        run_command("iptables", &["-F", chain], self.timeout)
            .await
            .map(|_| ())
    }

    async fn set_default_deny(&self, chain: &str) -> Result<(), CommandError> {
        run_command("iptables", &["-P", chain, "DROP"], self.timeout)
            .await
            .map(|_| ())
    }

    async fn append_rule(&self, chain: &str, rule: &FirewallRule) -> Result<(), CommandError> {
        let args = rule_args(chain, rule);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        run_command("iptables", &arg_refs, self.timeout)
            .await
            .map(|_| ())
    }
}

/// One operation observed by [`MockFilter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOp {
    Flush(String),
    DefaultDeny(String),
    Append { chain: String, rule_name: String },
}

/// Recording packet filter for tests
///
/// Can be told to start failing after N successful appends, which is
/// how the fail-closed mid-apply behavior gets exercised.
#[derive(Default)]
pub struct MockFilter {
    ops: Mutex<Vec<FilterOp>>,
    fail_appends_after: Mutex<Option<usize>>,
    appends_seen: Mutex<usize>,
}

impl MockFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every append after the first `n` succeed
    pub fn fail_appends_after(&self, n: usize) {
        *self.fail_appends_after.lock().unwrap() = Some(n);
    }

    /// Operations observed so far
    pub fn ops(&self) -> Vec<FilterOp> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl PacketFilter for MockFilter {
    async fn flush_chain(&self, chain: &str) -> Result<(), CommandError> {
        self.ops
            .lock()
            .unwrap()
            .push(FilterOp::Flush(chain.to_string()));
        Ok(())
    }

    async fn set_default_deny(&self, chain: &str) -> Result<(), CommandError> {
        self.ops
            .lock()
            .unwrap()
            .push(FilterOp::DefaultDeny(chain.to_string()));
        Ok(())
    }

    async fn append_rule(&self, chain: &str, rule: &FirewallRule) -> Result<(), CommandError> {
        let seen = {
            let mut appends = self.appends_seen.lock().unwrap();
            *appends += 1;
            *appends
        };

        if let Some(limit) = *self.fail_appends_after.lock().unwrap() {
            if seen > limit {
                return Err(CommandError::NonZero {
                    program: "iptables".to_string(),
                    stderr: "mock failure".to_string(),
                });
            }
        }

        self.ops.lock().unwrap().push(FilterOp::Append {
            chain: chain.to_string(),
            rule_name: rule.name.clone(),
        });
        Ok(())
    }
}
