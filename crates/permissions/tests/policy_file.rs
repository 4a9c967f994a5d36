use sc_domain::config::PermissionMode;
use sc_permissions::defaults::default_policies;
use sc_permissions::{
    resolve_precedence, CommandGuard, Permission, PermissionContext, PolicyFile,
};
use sc_domain::tool::ToolCall;
use serde_json::json;

fn call(name: &str) -> ToolCall {
    ToolCall {
        call_id: "call_1".into(),
        tool_name: name.into(),
        arguments: json!({}),
    }
}

#[test]
fn yaml_document_converts_in_category_order() {
    let yaml = r#"
allow:
  - Read
  - List
ask:
  - Write
exclude:
  - Bash
"#;
    let policies = PolicyFile::parse(yaml).unwrap().to_policies().unwrap();
    let names: Vec<_> = policies.iter().map(|p| p.tool_pattern.as_str()).collect();
    assert_eq!(names, vec!["Bash", "Write", "Read", "List"]);
    let perms: Vec<_> = policies.iter().map(|p| p.permission).collect();
    assert_eq!(
        perms,
        vec![Permission::Exclude, Permission::Ask, Permission::Allow, Permission::Allow]
    );
}

#[test]
fn persisted_approval_is_picked_up_on_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("permissions.yaml");

    let initial = PolicyFile::load(&path).unwrap();
    assert_eq!(initial, PolicyFile::default());

    let personal = initial.to_policies().unwrap();
    let ctx = PermissionContext::new(
        PermissionMode::Normal,
        resolve_precedence(&default_policies(), &[], &personal, true),
        CommandGuard::default(),
    );
    assert_eq!(ctx.check(&call("Write")).permission, Permission::Ask);

    let mut file = initial;
    file.add_allow("Write");
    file.save(&path).unwrap();

    let reloaded = PolicyFile::load(&path).unwrap().to_policies().unwrap();
    let ctx = ctx.with_normal_policies(resolve_precedence(
        &default_policies(),
        &[],
        &reloaded,
        true,
    ));
    assert_eq!(ctx.check(&call("Write")).permission, Permission::Allow);
}

#[test]
fn malformed_file_pattern_is_an_error() {
    let file = PolicyFile::parse("ask:\n  - Write(src/**\n").unwrap();
    assert!(file.to_policies().is_err());
}
