//! Source validation and language tables

use moonbind_engine::language;

use crate::harness::Harness;

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_validate_lists_functions() {
    let h = Harness::new();
    let validation = h.rt.engine().validate(
        "res://door.lua",
        r#"local Door = class("Node")

function Door:open()
end

function Door:_ready()
    self:open()
end

Door.speed = 4

return Door
"#,
    );
    assert!(validation.is_ok(), "{:?}", validation.errors);
    assert_eq!(validation.functions, vec!["_ready:6", "open:3"]);
}

#[test]
fn test_validate_does_not_register() {
    let h = Harness::new();
    let validation = h
        .rt
        .engine()
        .validate("res://door.lua", "local D = class()\nreturn D");
    assert!(validation.is_ok());
    assert!(h.rt.engine().script("res://door.lua").is_none());
}

#[test]
fn test_validate_syntax_error_line() {
    let h = Harness::new();
    let validation = h.rt.engine().validate(
        "res://broken.lua",
        "local B = class()\nfunction B:f()\n    if true then\n    end\n",
    );
    assert!(!validation.is_ok());
    assert!(validation.functions.is_empty());
    let err = &validation.errors[0];
    assert_eq!(err.path, "res://broken.lua");
    assert_eq!(err.line, 2);
    assert!(err.message.contains("'end' expected"));
}

#[test]
fn test_validate_runtime_error_line() {
    let h = Harness::new();
    let validation = h.rt.engine().validate(
        "res://raise.lua",
        "local R = class()\n\nlocal n = nil\nlocal m = n + 1\nreturn R\n",
    );
    assert_eq!(validation.errors.len(), 1);
    assert_eq!(validation.errors[0].line, 4);
    assert!(validation.errors[0].message.contains("arithmetic"));
}

#[test]
fn test_validate_requires_table() {
    let h = Harness::new();
    let validation = h.rt.engine().validate("res://number.lua", "return 42");
    assert_eq!(validation.errors.len(), 1);
    assert_eq!(validation.errors[0].message, "table expected, got number");
}

// ============================================================================
// Language Tables
// ============================================================================

#[test]
fn test_reserved_words() {
    let h = Harness::new();
    let words = h.rt.engine().reserved_words();
    assert!(words.contains(&"function"));
    assert!(words.contains(&"local"));
    assert!(!words.contains(&"class"));
    assert!(language::is_control_flow_keyword("do"));
}

#[test]
fn test_template_validates() {
    let h = Harness::new();
    let source = language::template("Hero", "Node2D");
    let validation = h.rt.engine().validate("res://hero.lua", &source);
    assert!(validation.is_ok(), "{:?}", validation.errors);
    assert_eq!(validation.functions, vec!["_ready:9"]);
}
