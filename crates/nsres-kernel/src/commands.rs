//! The `namespace` command.
//!
//! A thin argument-parsing layer over [`Runtime`]. Arguments arrive already
//! split into words; results are strings, with lists space-joined.

use crate::error::{NamespaceError, Result, wrap};
use crate::frame::CallStack;
use crate::name;
use crate::runtime::{CommandLookup, LookupOptions, ResolutionMode, Runtime};
use crate::tree::NamespaceId;

/// Subcommands, in the order they are listed in error messages.
pub const SUBCOMMANDS: &[&str] = &[
    "children",
    "current",
    "delete",
    "descendants",
    "enable",
    "eval",
    "exists",
    "export",
    "forget",
    "import",
    "mappings",
    "origin",
    "parent",
    "qualifiers",
    "tail",
    "which",
];

/// Run `namespace <subcommand> ?arg ...?`.
pub fn namespace(runtime: &Runtime, stack: &mut CallStack, args: &[&str]) -> Result<String> {
    let Some((&subcommand, rest)) = args.split_first() else {
        return Err(usage("namespace subcommand ?arg ...?"));
    };

    match subcommand {
        "children" => list_namespaces(runtime, stack, rest, false),
        "descendants" => list_namespaces(runtime, stack, rest, true),
        "current" => {
            expect_args(rest, 0, 0, "namespace current")?;
            let current = runtime.current_namespace(stack)?;
            runtime.qualified_name(current)
        }
        "delete" => {
            for name in rest {
                let id = existing(runtime, stack, name)?;
                runtime.delete_namespace(stack, id)?;
            }
            Ok(String::new())
        }
        "enable" => enable(runtime, stack, rest),
        "eval" => {
            expect_args(rest, 1, 1, "namespace eval name")?;
            let id = runtime.enter_namespace(stack, rest[0])?;
            runtime.qualified_name(id)
        }
        "exists" => {
            expect_args(rest, 1, 1, "namespace exists name")?;
            Ok(flag(runtime.exists(stack, rest[0])?))
        }
        "export" => {
            let (clear, patterns) = take_switch(rest, "-clear");
            let exported = runtime.export(stack, None, patterns, clear)?;
            Ok(exported.join(" "))
        }
        "forget" => {
            runtime.forget(stack, rest)?;
            Ok(String::new())
        }
        "import" => {
            let (force, patterns) = take_switch(rest, "-force");
            let imported = runtime.import(stack, patterns, force)?;
            if patterns.is_empty() {
                Ok(imported.join(" "))
            } else {
                Ok(String::new())
            }
        }
        "mappings" => {
            expect_args(rest, 0, 0, "namespace mappings")?;
            Ok(runtime
                .mappings()
                .into_iter()
                .flat_map(|(from, to)| [from, to])
                .collect::<Vec<_>>()
                .join(" "))
        }
        "origin" => {
            expect_args(rest, 1, 1, "namespace origin name")?;
            runtime.origin(stack, None, rest[0])
        }
        "parent" => {
            expect_args(rest, 0, 1, "namespace parent ?name?")?;
            let id = target(runtime, stack, rest.first().copied())?;
            runtime.parent(id)
        }
        "qualifiers" => {
            expect_args(rest, 1, 1, "namespace qualifiers string")?;
            Ok(name::split(rest[0]).qualifiers.to_string())
        }
        "tail" => {
            expect_args(rest, 1, 1, "namespace tail string")?;
            Ok(name::tail_only(rest[0]).to_string())
        }
        "which" => which(runtime, stack, rest),
        other => Err(NamespaceError::invalid_argument(format!(
            "bad option {}: must be {}",
            wrap(other),
            SUBCOMMANDS.join(", ")
        ))),
    }
}

fn list_namespaces(
    runtime: &Runtime,
    stack: &mut CallStack,
    args: &[&str],
    recursive: bool,
) -> Result<String> {
    let syntax = if recursive {
        "namespace descendants ?name? ?pattern?"
    } else {
        "namespace children ?name? ?pattern?"
    };
    expect_args(args, 0, 2, syntax)?;

    let id = target(runtime, stack, args.first().copied())?;
    let pattern = args.get(1).copied();
    let names = if recursive {
        runtime.descendants(id, pattern, false)?
    } else {
        runtime.children(id, pattern, false)?
    };
    Ok(names.join(" "))
}

fn enable(runtime: &Runtime, stack: &mut CallStack, args: &[&str]) -> Result<String> {
    expect_args(args, 0, 2, "namespace enable ?enabled? ?force?")?;

    let Some(&value) = args.first() else {
        return Ok(flag(runtime.mode()? == ResolutionMode::Namespaced));
    };
    let enable = parse_bool(value)?;
    let force = args.get(1).map(|v| parse_bool(v)).transpose()?.unwrap_or(false);
    runtime.set_namespaces_enabled(stack, enable, force)?;
    Ok(String::new())
}

fn which(runtime: &Runtime, stack: &mut CallStack, args: &[&str]) -> Result<String> {
    let name = match args {
        [name] | ["-command", name] => *name,
        ["-variable", _] => {
            return Err(NamespaceError::invalid_argument(
                "namespace which -variable is not supported",
            ));
        }
        _ => return Err(usage("namespace which ?-command? name")),
    };

    match runtime.resolve_command(stack, name, CommandLookup::default()) {
        Ok(found) => Ok(found),
        Err(err) if err.kind() == crate::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(err),
    }
}

fn existing(runtime: &Runtime, stack: &mut CallStack, name: &str) -> Result<NamespaceId> {
    runtime.lookup(stack, None, name, LookupOptions::existing())
}

/// The named namespace, or the current one.
fn target(runtime: &Runtime, stack: &mut CallStack, name: Option<&str>) -> Result<NamespaceId> {
    match name {
        Some(name) => existing(runtime, stack, name),
        None => runtime.current_namespace(stack),
    }
}

fn take_switch<'a, 'b>(args: &'a [&'b str], switch: &str) -> (bool, &'a [&'b str]) {
    match args.split_first() {
        Some((&first, rest)) if first == switch => (true, rest),
        _ => (false, args),
    }
}

fn expect_args(args: &[&str], min: usize, max: usize, syntax: &str) -> Result<()> {
    if args.len() < min || args.len() > max {
        return Err(usage(syntax));
    }
    Ok(())
}

fn usage(syntax: &str) -> NamespaceError {
    NamespaceError::invalid_argument(format!("wrong # args: should be {}", wrap(syntax)))
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(NamespaceError::invalid_argument(format!(
            "expected boolean value but got {}",
            wrap(value)
        ))),
    }
}
