//! Argument patterns that force human approval regardless of mode.
//!
//! A rule names one or more argument fields (`command`, `path`, ...) and a
//! regex for each. It matches when every named field is a string in the
//! call's arguments and its pattern finds a match there. The check runs
//! before the approval mode, so `auto-run` and `allow-list` cannot skip it.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
struct FieldMatcher {
    field: String,
    pattern: Regex,
}

/// One blacklist entry. Serialized as `{"description": .., "match": {field: regex}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RuleForm", into = "RuleForm")]
pub struct SecurityRule {
    pub description: String,
    matchers: Vec<FieldMatcher>,
}

#[derive(Serialize, Deserialize)]
struct RuleForm {
    description: String,
    #[serde(rename = "match")]
    fields: BTreeMap<String, String>,
}

impl TryFrom<RuleForm> for SecurityRule {
    type Error = regex::Error;

    fn try_from(form: RuleForm) -> Result<Self, Self::Error> {
        let matchers = form
            .fields
            .into_iter()
            .map(|(field, pattern)| {
                Ok(FieldMatcher {
                    field,
                    pattern: Regex::new(&pattern)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self {
            description: form.description,
            matchers,
        })
    }
}

impl From<SecurityRule> for RuleForm {
    fn from(rule: SecurityRule) -> Self {
        Self {
            description: rule.description,
            fields: rule
                .matchers
                .into_iter()
                .map(|m| (m.field, m.pattern.as_str().to_owned()))
                .collect(),
        }
    }
}

impl PartialEq for SecurityRule {
    fn eq(&self, other: &Self) -> bool {
        self.description == other.description
            && self.matchers.len() == other.matchers.len()
            && self
                .matchers
                .iter()
                .zip(&other.matchers)
                .all(|(a, b)| a.field == b.field && a.pattern.as_str() == b.pattern.as_str())
    }
}

impl Eq for SecurityRule {}

impl SecurityRule {
    /// Build a rule from `(field, regex)` pairs.
    pub fn new<'a>(
        description: impl Into<String>,
        fields: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, regex::Error> {
        SecurityRule::try_from(RuleForm {
            description: description.into(),
            fields: fields
                .into_iter()
                .map(|(f, p)| (f.to_owned(), p.to_owned()))
                .collect(),
        })
    }

    pub fn matches(&self, args: &serde_json::Value) -> bool {
        !self.matchers.is_empty()
            && self.matchers.iter().all(|m| {
                args.get(&m.field)
                    .and_then(serde_json::Value::as_str)
                    .is_some_and(|value| m.pattern.is_match(value))
            })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blacklist
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ordered rule list; the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecurityBlacklist {
    rules: Vec<SecurityRule>,
}

impl Default for SecurityBlacklist {
    fn default() -> Self {
        Self::builtin()
    }
}

const HOME_DIR: &str = "Recursive deletion of home directory";
const ENV_FILES: &str = "Reading .env files";
const SSH_KEYS: &str = "Reading SSH private keys";
const AWS: &str = "Reading AWS credentials";
const KUBERNETES: &str = "Reading Kubernetes config";

const BUILTIN_RULES: &[(&str, &str, &str)] = &[
    (
        HOME_DIR,
        "command",
        r"rm\s+-[a-zA-Z]*r[a-zA-Z]*\s+(~|\$HOME|/Users/[^/\s]+|/home/[^/\s]+)/?(\s|$)",
    ),
    (
        "Recursive deletion of root directory",
        "command",
        r"rm\s+-[a-zA-Z]*r[a-zA-Z]*\s+/(\*|\s|$)",
    ),
    (
        "Recursive deletion of current directory",
        "command",
        r"rm\s+-[a-zA-Z]*r[a-zA-Z]*\s+\./?(\s|$)",
    ),
    ("Access to passwd or shadow files", "command", r"/etc/(passwd|shadow)\b"),
    ("Modification of sudoers file", "command", r"/etc/sudoers\b"),
    ("Fork bomb", "command", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
    (
        "Raw writes to disk devices",
        "command",
        r"\bdd\s+.*of=/dev/(sd|hd|vd|nvme|disk)",
    ),
    (
        "Disk partition or format operations",
        "command",
        r"\b(mkfs(\.\w+)?|fdisk|parted)\s+/dev/",
    ),
    (
        "Disabling the firewall",
        "command",
        r"ufw\s+disable|iptables\s+-F|systemctl\s+(stop|disable)\s+firewalld",
    ),
    ("Direct kernel memory access", "command", r"/dev/(mem|kmem|port)\b"),
    (
        ENV_FILES,
        "command",
        r"(^|\s)(cat|less|more|head|tail|vi|vim|nano|bat)\s+(\S*/)?\.env(\.[\w-]+)?(\s|$)",
    ),
    (ENV_FILES, "path", r"(^|/)\.env(\.[\w-]+)?$"),
    (SSH_KEYS, "command", r"\.ssh/id_(rsa|dsa|ecdsa|ed25519)(\s|$)"),
    (SSH_KEYS, "path", r"\.ssh/id_(rsa|dsa|ecdsa|ed25519)$"),
    (AWS, "command", r"\.aws/credentials\b"),
    (AWS, "path", r"\.aws/credentials$"),
    (KUBERNETES, "command", r"\.kube/config\b"),
    (KUBERNETES, "path", r"\.kube/config$"),
];

impl SecurityBlacklist {
    pub fn new(rules: Vec<SecurityRule>) -> Self {
        Self { rules }
    }

    /// No rules; every call falls through to the approval mode.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The rules shipped with the agent.
    pub fn builtin() -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .filter_map(|(description, field, pattern)| {
                SecurityRule::new(*description, [(*field, *pattern)])
                    .map_err(|e| {
                        tracing::warn!(rule = *description, error = %e, "skipping invalid blacklist rule");
                    })
                    .ok()
            })
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[SecurityRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule matching the parsed tool arguments.
    pub fn check(&self, args: &serde_json::Value) -> Option<&SecurityRule> {
        self.rules.iter().find(|rule| rule.matches(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn blocked(args: serde_json::Value) -> Option<String> {
        SecurityBlacklist::builtin()
            .check(&args)
            .map(|rule| rule.description.clone())
    }

    #[test]
    fn every_builtin_rule_compiles() {
        assert_eq!(SecurityBlacklist::builtin().len(), BUILTIN_RULES.len());
    }

    #[test]
    fn home_directory_deletion_is_blocked() {
        for command in [
            "rm -rf ~/",
            "rm -rf ~",
            "rm -rf $HOME",
            "rm -rf /Users/alice",
            "rm -rf /home/user123",
        ] {
            let reason = blocked(json!({ "command": command }));
            assert!(reason.unwrap().contains("home directory"), "{command}");
        }
    }

    #[test]
    fn root_and_current_directory_deletion_is_blocked() {
        for command in ["rm -rf /", "rm -r /", "rm -rf /*"] {
            assert!(blocked(json!({ "command": command })).unwrap().contains("root directory"));
        }
        assert!(blocked(json!({ "command": "rm -rf ." })).is_some());
    }

    #[test]
    fn ordinary_cleanup_is_allowed() {
        for command in [
            "rm -rf /tmp/test",
            "rm -rf /var/tmp/build",
            "rm -rf ./node_modules",
            "rm -rf /opt/app/cache",
            "dd if=/dev/zero of=/tmp/test.img bs=1M count=100",
            "apt remove vim",
            "chown user:user /opt/myapp/file.txt",
        ] {
            assert_eq!(blocked(json!({ "command": command })), None, "{command}");
        }
    }

    #[test]
    fn system_files_and_devices_are_blocked() {
        let cases = [
            ("echo x >> /etc/passwd", "passwd"),
            ("cat /etc/shadow", "passwd"),
            ("vim /etc/sudoers", "sudoers"),
            (":(){ :|:& };:", "Fork bomb"),
            ("dd if=/dev/urandom of=/dev/nvme0n1", "disk devices"),
            ("mkfs.ext4 /dev/sda1", "partition"),
            ("parted /dev/nvme0n1", "partition"),
            ("iptables -F", "firewall"),
            ("cat /dev/mem", "memory"),
        ];
        for (command, needle) in cases {
            let reason = blocked(json!({ "command": command })).unwrap_or_default();
            assert!(reason.contains(needle), "{command}: {reason}");
        }
    }

    #[test]
    fn credentials_are_blocked_by_command_or_path() {
        assert!(blocked(json!({ "command": "cat .env" })).unwrap().contains(".env"));
        assert!(blocked(json!({ "path": "/app/.env.local" })).unwrap().contains(".env"));
        assert!(blocked(json!({ "path": "/home/u/.ssh/id_ed25519" })).is_some());
        assert!(blocked(json!({ "path": "/home/u/.aws/credentials" })).unwrap().contains("AWS"));
        assert!(blocked(json!({ "path": "/home/u/.kube/config" })).unwrap().contains("Kubernetes"));
        // Public keys are fine to read.
        assert_eq!(blocked(json!({ "path": "/home/u/.ssh/id_ed25519.pub" })), None);
        assert_eq!(blocked(json!({ "command": "cat ~/.ssh/id_rsa.pub" })), None);
    }

    #[test]
    fn non_string_and_missing_fields_never_match() {
        assert_eq!(blocked(json!({ "command": 42 })), None);
        assert_eq!(blocked(json!({})), None);
        assert_eq!(blocked(json!("rm -rf /")), None);
    }

    #[test]
    fn custom_rules_round_trip_through_json() {
        let list: SecurityBlacklist = serde_json::from_value(json!([
            {"description": "No prod deploys", "match": {"command": "deploy\\s+prod", "env": "^prod$"}}
        ]))
        .unwrap();
        assert!(list.check(&json!({"command": "deploy prod", "env": "prod"})).is_some());
        // Every field must match.
        assert!(list.check(&json!({"command": "deploy prod", "env": "dev"})).is_none());

        let back: SecurityBlacklist =
            serde_json::from_value(serde_json::to_value(&list).unwrap()).unwrap();
        assert_eq!(back, list);
    }

    #[test]
    fn invalid_pattern_is_a_parse_error() {
        let err = serde_json::from_value::<SecurityBlacklist>(json!([
            {"description": "broken", "match": {"command": "("}}
        ]));
        assert!(err.is_err());
    }
}
