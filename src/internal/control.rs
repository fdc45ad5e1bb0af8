//! Frames written to the CLI's stdin.

use serde_json::{json, Value};

use crate::permission::PermissionMode;

pub fn interrupt() -> Value {
    json!({ "type": "interrupt" })
}

/// Follow-up user turn. `content` is a string or an array of content blocks.
pub fn user_message(content: Value) -> Value {
    json!({
        "type": "user",
        "message": { "role": "user", "content": content },
    })
}

pub fn set_permission_mode(mode: PermissionMode) -> Value {
    json!({
        "type": "set_permission_mode",
        "permission_mode": mode.as_str(),
    })
}

pub fn permission_response(tool_use_id: &str, response: Value) -> Value {
    json!({
        "type": "permission_response",
        "tool_use_id": tool_use_id,
        "response": response,
    })
}

pub fn rewind_files() -> Value {
    json!({ "type": "rewind_files" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionResult;

    #[test]
    fn frames_match_wire_shapes() {
        assert_eq!(interrupt(), json!({"type": "interrupt"}));
        assert_eq!(rewind_files(), json!({"type": "rewind_files"}));
        assert_eq!(
            user_message(json!("and 3+3?")),
            json!({"type": "user", "message": {"role": "user", "content": "and 3+3?"}})
        );
        assert_eq!(
            set_permission_mode(PermissionMode::AcceptEdits),
            json!({"type": "set_permission_mode", "permission_mode": "acceptEdits"})
        );
    }

    #[test]
    fn permission_response_embeds_decision() {
        let decision = PermissionResult::deny("nope").to_response().unwrap();
        assert_eq!(
            permission_response("toolu_1", decision),
            json!({
                "type": "permission_response",
                "tool_use_id": "toolu_1",
                "response": {"behavior": "deny", "message": "nope", "interrupt": false},
            })
        );
    }
}
