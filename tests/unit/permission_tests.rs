//! Unit tests for permission model serialization.

use agent_conduit::models::permission::{
    PermissionBehavior, PermissionMode, PermissionResult, PermissionRuleValue, PermissionUpdate,
    PermissionUpdateDestination, PermissionUpdateKind,
};
use serde_json::json;

#[test]
fn rule_update_uses_camel_case_wire_names() {
    let update = PermissionUpdate {
        kind: PermissionUpdateKind::AddRules,
        rules: Some(vec![PermissionRuleValue {
            tool_name: "Bash".into(),
            rule_content: Some("git status".into()),
        }]),
        behavior: Some(PermissionBehavior::Allow),
        mode: None,
        directories: None,
        destination: Some(PermissionUpdateDestination::LocalSettings),
    };
    assert_eq!(
        serde_json::to_value(&update).expect("serialize"),
        json!({
            "type": "addRules",
            "rules": [{"toolName": "Bash", "ruleContent": "git status"}],
            "behavior": "allow",
            "destination": "localSettings",
        })
    );
}

#[test]
fn mode_and_directory_updates_parse() {
    let set_mode: PermissionUpdate = serde_json::from_value(json!({
        "type": "setMode",
        "mode": "acceptEdits",
        "destination": "session",
    }))
    .expect("parse");
    assert_eq!(set_mode.kind, PermissionUpdateKind::SetMode);
    assert_eq!(set_mode.mode, Some(PermissionMode::AcceptEdits));
    assert_eq!(set_mode.destination, Some(PermissionUpdateDestination::Session));
    assert_eq!(set_mode.rules, None);

    let dirs: PermissionUpdate = serde_json::from_value(json!({
        "type": "addDirectories",
        "directories": ["/work/src", "/work/tests"],
    }))
    .expect("parse");
    assert_eq!(dirs.kind, PermissionUpdateKind::AddDirectories);
    assert_eq!(
        dirs.directories,
        Some(vec!["/work/src".to_owned(), "/work/tests".to_owned()])
    );
}

#[test]
fn unknown_update_kind_is_rejected() {
    let parsed = serde_json::from_value::<PermissionUpdate>(json!({"type": "grantEverything"}));
    assert!(parsed.is_err());
}

#[test]
fn mode_serde_matches_wire_spelling() {
    for mode in [
        PermissionMode::Default,
        PermissionMode::AcceptEdits,
        PermissionMode::Plan,
        PermissionMode::BypassPermissions,
    ] {
        let wire = serde_json::to_value(mode).expect("serialize");
        assert_eq!(wire, json!(mode.as_str()));
        let back: PermissionMode = serde_json::from_value(wire).expect("parse");
        assert_eq!(back, mode);
    }
}

#[test]
fn result_constructors() {
    assert_eq!(
        PermissionResult::allow(),
        PermissionResult::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    );
    assert_eq!(
        PermissionResult::deny("not in CI"),
        PermissionResult::Deny {
            message: "not in CI".into(),
            interrupt: false,
        }
    );
}
