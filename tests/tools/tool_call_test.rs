//! Tool catalog and argument normalization.

use serde_json::json;

use routing_triage::tools::{tool_definitions, tool_names, ErrorKind, ToolCall, ToolName, ToolResult};

#[test]
fn catalog_is_closed_and_ordered() {
    assert_eq!(
        tool_names(),
        vec!["backstage_catalog_groups", "send_backstage_notification"]
    );
    assert_eq!(ToolName::parse(" send_backstage_notification "), Some(ToolName::SendNotification));
    assert_eq!(ToolName::parse("execute_command"), None);

    let definitions = tool_definitions();
    assert_eq!(definitions.len(), 2);
    assert_eq!(definitions[1].input_schema["required"], json!(["notification_data"]));
}

#[test]
fn bare_string_becomes_primary_argument() {
    let call = match ToolCall::from_json("send_backstage_notification", &json!("{\"title\":\"t\"}")) {
        Ok(call) => call,
        Err(err) => panic!("known tool should accept a string: {err}"),
    };
    assert_eq!(call.argument("notification_data"), Some("{\"title\":\"t\"}"));

    let call = match ToolCall::from_json("backstage_catalog_groups", &json!(null)) {
        Ok(call) => call,
        Err(err) => panic!("catalog call should accept null: {err}"),
    };
    assert!(call.arguments.is_empty());
}

#[test]
fn unwrapped_notification_fields_are_re_encoded() {
    let call = match ToolCall::from_json(
        "send_backstage_notification",
        &json!({"title": "t", "description": "d"}),
    ) {
        Ok(call) => call,
        Err(err) => panic!("unwrapped notification should be accepted: {err}"),
    };
    let raw = call.argument("notification_data").unwrap_or_default();
    let decoded: serde_json::Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => panic!("re-encoded data should be JSON: {err}"),
    };
    assert_eq!(decoded, json!({"title": "t", "description": "d"}));
}

#[test]
fn non_string_values_keep_their_json_text() {
    let call = match ToolCall::from_json("backstage_catalog_groups", &json!({"query": 3, "limit": true})) {
        Ok(call) => call,
        Err(err) => panic!("catalog call should accept objects: {err}"),
    };
    assert_eq!(call.argument("query"), Some("3"));
    assert_eq!(call.argument("limit"), Some("true"));
}

#[test]
fn unknown_tool_names_the_valid_ones() {
    let err = match ToolCall::from_json("lookup_owner", &json!({})) {
        Ok(call) => panic!("unknown tool should be rejected, got {call:?}"),
        Err(err) => err,
    };
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        err.to_string(),
        "lookup_owner is not a valid tool, try one of \
         [backstage_catalog_groups, send_backstage_notification]."
    );

    let result = ToolResult::from(err);
    assert!(result.is_error());
    assert_eq!(result.error_kind(), Some(ErrorKind::Validation));
}

#[test]
fn only_protocol_and_validation_errors_are_local() {
    assert!(ErrorKind::Protocol.is_local());
    assert!(ErrorKind::Validation.is_local());
    assert!(!ErrorKind::Transport.is_local());
    assert!(!ErrorKind::Upstream.is_local());
    assert!(!ErrorKind::Unexpected.is_local());
}
