//! Deferred "on registrar ready" actions.
//!
//! Mirrors the header's reliance on static/global constructors to register
//! startup hooks ahead of `main`, which has no direct Rust analogue without
//! unsafe linker tricks. Instead, the embedding application owns one
//! [`StartupRegistry`], populates it explicitly (each call site typically
//! lives next to the module whose channels it wires up), and runs it once
//! against a freshly constructed [`Registrar`]. Actions run in registration
//! order, but per spec must not depend on that order — they are expected to
//! just call `lookup`, which is idempotent.

use crate::registrar::Registrar;

struct StartupAction {
    label: String,
    action: Box<dyn FnMut(&Registrar)>,
}

/// A registration-order list of actions to run against a `Registrar` at
/// startup.
#[derive(Default)]
pub struct StartupRegistry {
    actions: Vec<StartupAction>,
}

impl StartupRegistry {
    pub fn new() -> Self {
        StartupRegistry { actions: Vec::new() }
    }

    /// Registers `action` under `label`. `label` is for diagnostics only;
    /// duplicates are allowed.
    pub fn register(&mut self, label: impl Into<String>, action: impl FnMut(&Registrar) + 'static) {
        self.actions.push(StartupAction {
            label: label.into(),
            action: Box::new(action),
        });
    }

    /// Runs every registered action against `registrar`, in registration
    /// order.
    pub fn run(&mut self, registrar: &Registrar) {
        for action in &mut self.actions {
            (action.action)(registrar);
        }
    }

    pub fn labels(&self) -> Vec<String> {
        self.actions.iter().map(|a| a.label.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
