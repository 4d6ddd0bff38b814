//! Integration tests for the nsres REPL.
//!
//! These run scripts through the REPL and check what it prints.

use nsres_repl::Repl;
use rstest::rstest;

/// Run lines through a fresh REPL, collecting outputs and errors in order.
fn run_script(script: &str) -> Vec<String> {
    let mut repl = Repl::new().expect("Failed to create REPL");
    let mut outputs = Vec::new();

    for line in script.lines() {
        match repl.process_line(line) {
            Ok(Some(output)) => outputs.push(output),
            Ok(None) => {}
            Err(e) => outputs.push(format!("ERROR: {}", e)),
        }
    }

    outputs
}

fn last(outputs: &[String]) -> &str {
    outputs.last().map(String::as_str).unwrap_or("")
}

// ============================================================================
// Namespaces
// ============================================================================

#[test]
fn eval_moves_the_current_namespace() {
    let outputs = run_script(
        r#"
        namespace eval ::a::b
        namespace current
        leave
        namespace current
    "#,
    );
    assert_eq!(outputs, ["::a::b", "::a::b", "left namespace eval ::a::b", "::"]);
}

#[test]
fn children_and_tree() {
    let mut repl = Repl::new().expect("Failed to create REPL");
    for line in ["namespace eval ::x::y", "leave", "namespace eval ::w", "leave"] {
        repl.process_line(line).expect("line failed");
    }

    let children = repl.process_line("namespace children").unwrap();
    assert_eq!(children.as_deref(), Some("::w ::x"));

    let tree = repl.process_line("/tree").unwrap().unwrap();
    assert_eq!(tree, "::\n  w\n  x\n    y");
}

#[test]
fn deleted_namespace_disappears() {
    let outputs = run_script(
        r#"
        namespace eval ::gone
        leave
        namespace delete ::gone
        namespace exists ::gone
    "#,
    );
    assert_eq!(last(&outputs), "0");
}

// ============================================================================
// Commands and imports
// ============================================================================

#[test]
fn import_and_origin() {
    let outputs = run_script(
        r#"
        namespace eval ::lib
        proc helper
        namespace export helper
        leave
        namespace eval ::app
        namespace import ::lib::*
        resolve cmd helper
        namespace origin helper
    "#,
    );
    assert_eq!(&outputs[outputs.len() - 2..], ["::app::helper", "::lib::helper"]);
}

#[test]
fn duplicate_import_is_an_error() {
    let outputs = run_script(
        r#"
        namespace eval ::lib
        proc helper
        namespace export helper
        leave
        namespace import ::lib::helper
        namespace import ::lib::helper
    "#,
    );
    assert!(last(&outputs).starts_with("ERROR: can't import command"));
}

#[rstest]
#[case::visible("command puts", "resolve cmd puts", "::puts")]
#[case::qualified("command ::puts", "resolve cmd ::puts", "::puts")]
#[case::hidden("hidden secret", "resolve cmd secret", "ERROR: invalid command name \"secret\"")]
fn command_resolution(#[case] define: &str, #[case] query: &str, #[case] expected: &str) {
    let outputs = run_script(&format!("{define}\n{query}"));
    assert_eq!(last(&outputs), expected);
}

// ============================================================================
// Variables and frames
// ============================================================================

#[test]
fn procedure_frames_get_their_own_scope() {
    let mut repl = Repl::new().expect("Failed to create REPL");
    let global = repl.process_line("resolve var x").unwrap().unwrap();
    repl.process_line("call p").unwrap();
    let local = repl.process_line("resolve var x").unwrap().unwrap();
    let forced = repl.process_line("resolve global x").unwrap().unwrap();

    assert_ne!(global, local);
    assert_eq!(global, forced);
}

#[test]
fn leave_at_global_frame_fails() {
    let outputs = run_script("leave");
    assert_eq!(outputs, ["ERROR: already at the global frame"]);
}

#[test]
fn reset_clears_namespaces() {
    let outputs = run_script(
        r#"
        namespace eval ::a
        leave
        reset -keep
        namespace children
    "#,
    );
    assert_eq!(outputs, ["::a", "left namespace eval ::a"]);
}

// ============================================================================
// Meta-commands
// ============================================================================

#[test]
fn quit_sets_flag() {
    let mut repl = Repl::new().expect("Failed to create REPL");
    assert!(!repl.should_quit());
    assert_eq!(repl.process_line("/quit").unwrap(), None);
    assert!(repl.should_quit());
}

#[rstest]
#[case::help("/help", "nsres REPL")]
#[case::entities("/entities", "(no entities)")]
#[case::frames("/frames", "#0 global [-]")]
#[case::unknown("/bogus", "Unknown command: /bogus")]
fn meta_commands(#[case] input: &str, #[case] expected: &str) {
    let mut repl = Repl::new().expect("Failed to create REPL");
    let output = repl.process_line(input).unwrap().unwrap();
    assert!(output.contains(expected), "output was: {output}");
}

#[test]
fn unknown_input_is_an_error() {
    let outputs = run_script("frobnicate now");
    assert_eq!(outputs, ["ERROR: unknown command: frobnicate"]);
}
