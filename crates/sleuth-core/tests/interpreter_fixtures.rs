//! Integration tests interpreting recorded backend replies.

use sleuth_core::ResponseInterpreter;
use sleuth_proto::{FieldSource, InterpretationStatus};
use std::path::PathBuf;

fn fixture(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("fixture {} should be readable: {e}", path.display()))
}

#[test]
fn test_colored_token_reply() {
    let parsed = ResponseInterpreter::new().parse(&fixture("colored_complete_reply.txt"));

    assert_eq!(parsed.status, InterpretationStatus::Complete);
    assert_eq!(parsed.action, "Summarize memory regression");
    assert_eq!(parsed.findings.keys(), vec!["heap_mb", "gc_pause"]);
    assert_eq!(parsed.findings.get("gc_pause"), Some("420ms"));
    assert_eq!(
        parsed.answer.as_deref(),
        Some("The v2.3 deployment doubled the cache size. Roll back or cap the cache.")
    );
    assert_eq!(parsed.sources.status, FieldSource::Token);
}

#[test]
fn test_freeform_conclusion_reply() {
    let parsed = ResponseInterpreter::new().parse(&fixture("freeform_conclusion_reply.txt"));

    assert_eq!(parsed.status, InterpretationStatus::Complete);
    assert_eq!(parsed.sources.status, FieldSource::Heuristic);
    assert_eq!(parsed.findings.get("memory_usage"), Some("92%"));
    assert_eq!(
        parsed.answer.as_deref(),
        Some("the leak was introduced by the latest deployment")
    );
}

#[test]
fn test_freeform_progress_reply() {
    let parsed = ResponseInterpreter::new().parse(&fixture("freeform_progress_reply.txt"));

    assert_eq!(parsed.status, InterpretationStatus::Continuing);
    assert_eq!(
        parsed.action,
        "compare heap dumps from before and after the release"
    );
    assert_eq!(parsed.sources.action, FieldSource::Pattern);
    assert!(parsed.findings.is_empty());
    assert!(parsed.answer.is_none());
}
