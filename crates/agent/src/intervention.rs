//! Human-in-the-loop gating for tool calls.
//!
//! In `manual` mode each call follows its manifest: the API-level
//! `humanIntervention` entry wins over the tool-level one, and an absent
//! policy (or `never`) lets the call run. `auto-run` executes everything;
//! `allow-list` executes only listed `identifier/apiName` keys.
//!
//! The [`SecurityBlacklist`] is consulted first and overrides every mode.

use std::collections::HashMap;

use sw_domain::config::{AgentConfig, ApprovalMode};
use sw_domain::tool::{ToolCallPayload, ToolManifest};

use crate::blacklist::SecurityBlacklist;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterventionPolicy {
    pub mode: ApprovalMode,
    pub allow_list: Vec<String>,
    pub blacklist: SecurityBlacklist,
}

/// Tool calls split by whether they may run immediately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub to_execute: Vec<ToolCallPayload>,
    pub needs_approval: Vec<ToolCallPayload>,
}

impl InterventionPolicy {
    pub fn manual() -> Self {
        Self::default()
    }

    pub fn auto_run() -> Self {
        Self {
            mode: ApprovalMode::AutoRun,
            ..Self::default()
        }
    }

    pub fn allow_list<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mode: ApprovalMode::AllowList,
            allow_list: keys.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_blacklist(mut self, blacklist: SecurityBlacklist) -> Self {
        self.blacklist = blacklist;
        self
    }

    pub fn requires_approval(
        &self,
        call: &ToolCallPayload,
        manifests: &HashMap<String, ToolManifest>,
    ) -> bool {
        if let Some(rule) = self.blacklist.check(&call.parsed_arguments()) {
            tracing::warn!(
                tool = %call.tool_key(),
                tool_call_id = %call.id,
                rule = %rule.description,
                "tool call matched security blacklist, approval required"
            );
            return true;
        }
        match self.mode {
            ApprovalMode::AutoRun => false,
            ApprovalMode::AllowList => {
                let key = call.tool_key();
                !self.allow_list.iter().any(|k| *k == key)
            }
            ApprovalMode::Manual => manifests
                .get(&call.identifier)
                .and_then(|m| m.intervention_for(&call.api_name))
                .is_some_and(|policy| policy.requires_approval()),
        }
    }

    /// Split calls preserving their relative order in both halves.
    pub fn partition(
        &self,
        calls: &[ToolCallPayload],
        manifests: &HashMap<String, ToolManifest>,
    ) -> Partition {
        let mut out = Partition::default();
        for call in calls {
            if self.requires_approval(call, manifests) {
                out.needs_approval.push(call.clone());
            } else {
                out.to_execute.push(call.clone());
            }
        }
        out
    }
}

impl From<&AgentConfig> for InterventionPolicy {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            mode: cfg.approval_mode,
            allow_list: cfg.allow_list.clone(),
            blacklist: SecurityBlacklist::default(),
        }
    }
}
