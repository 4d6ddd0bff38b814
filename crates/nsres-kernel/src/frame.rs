//! Call frames and their namespace bindings.
//!
//! Each frame may carry a "current namespace" binding. The binding is a
//! plain handle: the frame never keeps a namespace alive. When a namespace
//! is disposed, stale bindings are either cleared in bulk with
//! [`invalidate_all`] or noticed and cleared lazily by [`get_current`].
//!
//! A [`CallStack`] stores frames outermost-first. The global frame is always
//! at index 0 and cannot be popped.

use crate::error::{NamespaceError, Result};
use crate::tree::{NamespaceId, NamespaceTree, ScopeId};

/// What kind of frame this is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags {
    /// The frame owns variable storage (procedure bodies, the global frame).
    pub variables: bool,
    /// This is the process-wide global frame.
    pub global: bool,
    /// Unqualified variables go to the bound namespace's store
    /// (`namespace eval` bodies).
    pub use_namespace: bool,
}

/// One execution-stack frame.
#[derive(Debug, Clone)]
pub struct CallFrame {
    name: String,
    flags: FrameFlags,
    variables: Option<ScopeId>,
    binding: Option<NamespaceId>,
}

impl CallFrame {
    /// The bottom frame of a stack; `scope` is the global variable store.
    pub fn global(scope: ScopeId) -> Self {
        Self {
            name: "global".to_string(),
            flags: FrameFlags {
                variables: true,
                global: true,
                use_namespace: false,
            },
            variables: Some(scope),
            binding: None,
        }
    }

    /// A frame with its own locals, e.g. a procedure call.
    pub fn procedure(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: FrameFlags {
                variables: true,
                ..FrameFlags::default()
            },
            variables: Some(ScopeId::fresh()),
            binding: None,
        }
    }

    /// A frame without variable storage (loop bodies, `catch`, and so on).
    pub fn block(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: FrameFlags::default(),
            variables: None,
            binding: None,
        }
    }

    /// A frame that evaluates inside `namespace`.
    pub fn namespace_eval(name: impl Into<String>, namespace: NamespaceId) -> Self {
        Self {
            name: name.into(),
            flags: FrameFlags {
                use_namespace: true,
                ..FrameFlags::default()
            },
            variables: None,
            binding: Some(namespace),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn flags(&self) -> FrameFlags {
        self.flags
    }

    pub fn variables(&self) -> Option<ScopeId> {
        self.variables
    }

    /// The raw binding, without any validity check.
    pub fn binding(&self) -> Option<NamespaceId> {
        self.binding
    }

    /// Does this frame count when looking for the nearest variable frame?
    pub fn is_variable_frame(&self) -> bool {
        self.flags.variables || self.flags.use_namespace
    }
}

/// Frames of one execution, outermost-first.
#[derive(Debug, Clone)]
pub struct CallStack {
    frames: Vec<CallFrame>,
}

impl CallStack {
    /// A stack holding only a global frame backed by `global_scope`.
    pub fn new(global_scope: ScopeId) -> Self {
        Self {
            frames: vec![CallFrame::global(global_scope)],
        }
    }

    pub fn push(&mut self, frame: CallFrame) {
        self.frames.push(frame);
    }

    /// Pop the nearest frame. The global frame stays put.
    pub fn pop(&mut self) -> Option<CallFrame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Never true: the global frame is always present.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn global_frame(&self) -> &CallFrame {
        &self.frames[0]
    }

    pub fn global_frame_mut(&mut self) -> &mut CallFrame {
        &mut self.frames[0]
    }

    /// The nearest (innermost) frame.
    pub fn top(&self) -> &CallFrame {
        &self.frames[self.frames.len() - 1]
    }

    pub fn top_mut(&mut self) -> &mut CallFrame {
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Frames from nearest to outermost.
    pub fn iter_nearest(&self) -> impl Iterator<Item = &CallFrame> {
        self.frames.iter().rev()
    }

    pub fn iter_nearest_mut(&mut self) -> impl Iterator<Item = &mut CallFrame> {
        self.frames.iter_mut().rev()
    }

    /// The nearest frame that owns variables or redirects them to a
    /// namespace. Falls back to the global frame.
    pub fn nearest_variable_frame(&self) -> &CallFrame {
        self.iter_nearest()
            .find(|frame| frame.is_variable_frame())
            .unwrap_or_else(|| self.global_frame())
    }

    /// Replace the global frame's variable store, e.g. after the runtime
    /// rebuilt its tree around a different root scope.
    pub fn set_global_scope(&mut self, scope: ScopeId) {
        self.frames[0].variables = Some(scope);
    }
}

/// The namespace bound to `frame`, if it is still alive.
///
/// A binding to a disposed namespace is a recoverable inconsistency: it is
/// logged, cleared, and reported as no binding.
pub fn get_current(tree: &NamespaceTree, frame: &mut CallFrame) -> Option<NamespaceId> {
    let id = frame.binding?;
    if tree.is_disposed(id) {
        tracing::warn!(frame = %frame.name, "forcibly cleared namespace for frame {}", frame.name);
        frame.binding = None;
        return None;
    }
    Some(id)
}

/// Bind (or with `None`, unbind) a frame. Fails only when there is no frame.
pub fn set_current(frame: Option<&mut CallFrame>, namespace: Option<NamespaceId>) -> bool {
    match frame {
        Some(frame) => {
            frame.binding = namespace;
            true
        }
        None => false,
    }
}

/// Bind every frame of `stack`, nearest first. Returns how many changed.
pub fn propagate_down(stack: &mut CallStack, namespace: Option<NamespaceId>) -> usize {
    let mut count = 0;
    for frame in stack.iter_nearest_mut() {
        if set_current(Some(frame), namespace) {
            count += 1;
        }
    }
    count
}

/// Clear every binding in `stack` that points at `namespace`.
///
/// This only reaches the stack it is handed. Other executions notice the
/// disposal through [`get_current`].
pub fn invalidate_all(stack: &mut CallStack, namespace: NamespaceId) -> Result<usize> {
    let mut count = 0;
    for frame in stack.iter_nearest_mut() {
        if frame.binding != Some(namespace) {
            continue;
        }
        let name = frame.name.clone();
        if !set_current(Some(frame), None) {
            return Err(NamespaceError::invalid_state(format!(
                "could not clear namespace for frame {name}"
            )));
        }
        count += 1;
    }
    Ok(count)
}

/// The stack's current namespace: the nearest live binding, else global.
pub fn current_namespace(tree: &NamespaceTree, stack: &mut CallStack) -> NamespaceId {
    for frame in stack.iter_nearest_mut() {
        if let Some(id) = get_current(tree, frame) {
            return id;
        }
    }
    tree.global()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_with_child() -> (NamespaceTree, CallStack, NamespaceId) {
        let mut tree = NamespaceTree::new();
        let global = tree.global();
        let a = tree.create("a", global, None, None).unwrap();
        tree.add_child(global, a).unwrap();
        let scope = tree.get(global).unwrap().variable_scope().unwrap();
        (tree, CallStack::new(scope), a)
    }

    #[test]
    fn global_frame_cannot_be_popped() {
        let (_, mut stack, _) = stack_with_child();
        assert!(stack.pop().is_none());
        assert_eq!(stack.len(), 1);
        assert!(stack.global_frame().flags().global);
    }

    #[test]
    fn current_defaults_to_global() {
        let (tree, mut stack, _) = stack_with_child();
        assert_eq!(current_namespace(&tree, &mut stack), tree.global());
    }

    #[test]
    fn nearest_binding_wins() {
        let (tree, mut stack, a) = stack_with_child();
        stack.push(CallFrame::namespace_eval("eval", a));
        stack.push(CallFrame::block("loop"));
        assert_eq!(current_namespace(&tree, &mut stack), a);
    }

    #[test]
    fn set_current_without_frame_fails() {
        assert!(!set_current(None, None));
    }

    #[test]
    fn disposed_binding_is_cleared_lazily() {
        let (mut tree, mut stack, a) = stack_with_child();
        stack.push(CallFrame::namespace_eval("eval", a));
        tree.dispose(a);

        assert_eq!(get_current(&tree, stack.top_mut()), None);
        assert_eq!(stack.top().binding(), None);
    }

    #[test]
    fn invalidate_all_clears_matching_frames_only() {
        let (mut tree, mut stack, a) = stack_with_child();
        let global = tree.global();
        let b = tree.create("b", global, None, None).unwrap();
        tree.add_child(global, b).unwrap();

        stack.push(CallFrame::namespace_eval("one", a));
        stack.push(CallFrame::namespace_eval("two", b));
        stack.push(CallFrame::namespace_eval("three", a));

        assert_eq!(invalidate_all(&mut stack, a).unwrap(), 2);
        assert_eq!(current_namespace(&tree, &mut stack), b);
    }

    #[test]
    fn propagate_down_binds_every_frame() {
        let (tree, mut stack, a) = stack_with_child();
        stack.push(CallFrame::procedure("p"));
        stack.push(CallFrame::block("b"));
        assert_eq!(propagate_down(&mut stack, Some(a)), 3);
        assert!(stack.iter_nearest().all(|f| f.binding() == Some(a)));
        assert_eq!(propagate_down(&mut stack, None), 3);
        assert_eq!(current_namespace(&tree, &mut stack), tree.global());
    }

    #[test]
    fn nearest_variable_frame_skips_blocks() {
        let (_, mut stack, a) = stack_with_child();
        stack.push(CallFrame::procedure("p"));
        stack.push(CallFrame::block("loop"));
        assert_eq!(stack.nearest_variable_frame().name(), "p");

        stack.push(CallFrame::namespace_eval("eval", a));
        assert_eq!(stack.nearest_variable_frame().name(), "eval");
    }
}
