//! nsres-kernel: namespace resolution for a Tcl-style interpreter.
//!
//! This crate provides:
//!
//! - **Names**: splitting, joining and normalizing `::`-qualified names
//! - **Tree**: the namespace hierarchy, with generation-checked handles
//! - **Frames**: call frames bound to namespaces, and how that binding decays
//! - **Runtime**: lookup, variable/command resolution, pattern matching
//! - **Imports**: export tables, import aliases, `forget` and `origin`
//! - **Commands**: the `namespace` command ensemble over all of the above
//!
//! A [`Runtime`] owns the tree and the entity store behind one lock. Call
//! stacks belong to the caller and are passed in by `&mut`.

pub mod commands;
pub mod config;
pub mod entity;
pub mod error;
pub mod frame;
pub mod imports;
pub mod name;
pub mod runtime;
pub mod tree;

pub use config::RuntimeConfig;
pub use entity::{Entity, EntityKind, EntityStore, MemoryEntityStore};
pub use error::{ErrorKind, NamespaceError, Result};
pub use frame::{CallFrame, CallStack, FrameFlags};
pub use runtime::{CommandLookup, LookupOptions, MatchOptions, ResolutionMode, Runtime};
pub use tree::{NamespaceId, NamespaceTree, ResolveHook, ScopeId, VariableTarget};
