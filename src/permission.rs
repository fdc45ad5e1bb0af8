//! Permission modes and the decisions sent back for tool permission requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Permission mode requested from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    Plan,
    BypassPermissions,
}

impl PermissionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::Plan => "plan",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }
}

impl fmt::Display for PermissionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "default" => Ok(PermissionMode::Default),
            "acceptEdits" => Ok(PermissionMode::AcceptEdits),
            "plan" => Ok(PermissionMode::Plan),
            "bypassPermissions" => Ok(PermissionMode::BypassPermissions),
            other => Err(format!("unknown permission mode: {other}")),
        }
    }
}

/// Settings layer a permission update is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionScope {
    UserSettings,
    ProjectSettings,
    LocalSettings,
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleBehavior {
    Allow,
    Deny,
    Ask,
}

/// A tool, optionally narrowed by a rule specifier such as a command prefix.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRule {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_content: Option<String>,
}

impl PermissionRule {
    pub fn tool(name: impl Into<String>) -> Self {
        Self {
            tool_name: name.into(),
            rule_content: None,
        }
    }

    pub fn matching(mut self, content: impl Into<String>) -> Self {
        self.rule_content = Some(content.into());
        self
    }
}

/// Change to the CLI's permission settings, attached to an allow decision.
///
/// Serialises with a `type` tag; `destination` is omitted when unset and the
/// CLI picks its default layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PermissionUpdate {
    AddRules {
        rules: Vec<PermissionRule>,
        behavior: RuleBehavior,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionScope>,
    },
    ReplaceRules {
        rules: Vec<PermissionRule>,
        behavior: RuleBehavior,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionScope>,
    },
    RemoveRules {
        rules: Vec<PermissionRule>,
        behavior: RuleBehavior,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionScope>,
    },
    SetMode {
        mode: PermissionMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionScope>,
    },
    AddDirectories {
        directories: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionScope>,
    },
    RemoveDirectories {
        directories: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        destination: Option<PermissionScope>,
    },
}

impl PermissionUpdate {
    pub fn add_rules(behavior: RuleBehavior, rules: Vec<PermissionRule>) -> Self {
        PermissionUpdate::AddRules {
            rules,
            behavior,
            destination: None,
        }
    }

    pub fn set_mode(mode: PermissionMode) -> Self {
        PermissionUpdate::SetMode {
            mode,
            destination: None,
        }
    }

    pub fn add_directories<I, S>(directories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PermissionUpdate::AddDirectories {
            directories: directories.into_iter().map(Into::into).collect(),
            destination: None,
        }
    }

    /// Write the update to `scope` instead of the CLI's default layer.
    pub fn in_scope(mut self, scope: PermissionScope) -> Self {
        match &mut self {
            PermissionUpdate::AddRules { destination, .. }
            | PermissionUpdate::ReplaceRules { destination, .. }
            | PermissionUpdate::RemoveRules { destination, .. }
            | PermissionUpdate::SetMode { destination, .. }
            | PermissionUpdate::AddDirectories { destination, .. }
            | PermissionUpdate::RemoveDirectories { destination, .. } => {
                *destination = Some(scope)
            }
        }
        self
    }
}

/// Decision for a single tool permission request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "behavior", rename_all = "lowercase")]
pub enum PermissionResult {
    #[serde(rename = "allow")]
    Allow {
        #[serde(rename = "updatedInput", skip_serializing_if = "Option::is_none")]
        updated_input: Option<Map<String, Value>>,
        #[serde(rename = "updatedPermissions", skip_serializing_if = "Option::is_none")]
        updated_permissions: Option<Vec<PermissionUpdate>>,
    },
    #[serde(rename = "deny")]
    Deny {
        #[serde(default, skip_serializing_if = "String::is_empty")]
        message: String,
        #[serde(default)]
        interrupt: bool,
    },
}

impl PermissionResult {
    /// Allow the tool call with its original input.
    pub fn allow() -> Self {
        PermissionResult::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    }

    /// Allow the tool call but substitute its input.
    pub fn allow_with_input(input: Map<String, Value>) -> Self {
        PermissionResult::Allow {
            updated_input: Some(input),
            updated_permissions: None,
        }
    }

    /// Allow the tool call and apply `updates` to the CLI's permission settings.
    pub fn allow_with_updates(updates: Vec<PermissionUpdate>) -> Self {
        PermissionResult::Allow {
            updated_input: None,
            updated_permissions: Some(updates),
        }
    }

    pub fn deny(message: impl Into<String>) -> Self {
        PermissionResult::Deny {
            message: message.into(),
            interrupt: false,
        }
    }

    /// Deny the call and ask the CLI to stop the current turn.
    pub fn deny_and_interrupt(message: impl Into<String>) -> Self {
        PermissionResult::Deny {
            message: message.into(),
            interrupt: true,
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, PermissionResult::Allow { .. })
    }

    /// JSON object placed in the `response` field of a permission response frame.
    pub fn to_response(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
