//! Unit tests for the error tiers

use core_types::{ExceptionKind, LinkError, LinkErrorKind, Reference, ValueTag, VmError};

#[test]
fn test_link_error_carries_method_context() {
    let err = LinkError::new(
        "app/Game",
        "tick",
        "(I)V",
        LinkErrorKind::MissingField {
            class: "app/Sprite".to_string(),
            name: "x".to_string(),
            descriptor: "I".to_string(),
        },
    );
    let text = err.to_string();
    assert!(text.contains("app/Game.tick(I)V"));
    assert!(text.contains("app/Sprite.x:I"));
}

#[test]
fn test_vm_error_wraps_link_error_transparently() {
    let link = LinkError::new("A", "b", "()V", LinkErrorKind::MissingNative);
    let vm = VmError::from(link.clone());
    assert_eq!(vm.to_string(), link.to_string());
}

#[test]
fn test_tag_mismatch_message() {
    let err = VmError::TagMismatch {
        expected: ValueTag::Int,
        found: ValueTag::Reference,
    };
    assert_eq!(
        err.to_string(),
        "expected int on operand stack, found reference"
    );
}

#[test]
fn test_dangling_reference_message() {
    let err = VmError::DanglingReference(Reference::new(5));
    assert_eq!(err.to_string(), "dangling reference @5");
}

#[test]
fn test_uncaught_exception_without_message() {
    let err = VmError::UncaughtException {
        class: "java/lang/NullPointerException".to_string(),
        message: None,
        trace: vec![],
    };
    assert_eq!(
        err.to_string(),
        "uncaught exception java/lang/NullPointerException"
    );
}

#[test]
fn test_exception_kind_class_names_are_distinct() {
    let mut names: Vec<_> = ExceptionKind::ALL.iter().map(|k| k.class_name()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), ExceptionKind::ALL.len());
}
