//! The per-signature dispatch engine.
//!
//! A [`Channel<Args, R>`] owns one ordered subscriber list and one ordered
//! resolve list for exactly one signature `Args -> R`. Both lists are held
//! behind `Rc<RefCell<_>>` so that [`crate::registrar::Registrar::alias`]
//! can fuse two channels onto one shared sequence (spec invariant I4)
//! without either channel's identity changing.
//!
//! Subscribers and resolvers are stored as `Rc<dyn Fn>`, not `Box<dyn
//! FnMut>` behind a per-entry `RefCell`: calling a `Fn` needs only a
//! shared reference, so a subscriber that reaches back into its own
//! channel mid-call — to unsubscribe itself, or to invoke the channel
//! again — never collides with a borrow the dispatch loop is holding.
//! Any mutable state a subscriber closure needs, it owns through its own
//! `Cell`/`RefCell`, same as everywhere else in this crate. Dispatch
//! itself still snapshots the list of callables before calling anything
//! and drops the list's own borrow first, so the *list* — as opposed to
//! an individual callable — is equally free to be read or mutated
//! reentrantly.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::dynval::{DynArgs, DynValue, FromDynValue, IntoDynValue};
use crate::error::ConduitResult;

type SubscriberFn<Args, R> = Rc<dyn Fn(Args) -> Option<R>>;
type ResolveFn<R> = Rc<dyn Fn(&[Option<R>])>;

struct SubscriberEntry<Args, R> {
    label: String,
    group: i32,
    callable: SubscriberFn<Args, R>,
}

struct ResolveEntry<R> {
    label: String,
    group: i32,
    callable: ResolveFn<R>,
}

/// RAII guard implementing the "scoped acquisition" design note: sets a
/// flag to `true` for the guard's lifetime and restores the previous value
/// on drop, including on unwind from a panicking subscriber.
struct ScopedFlag<'a> {
    flag: &'a Cell<bool>,
    prev: bool,
}

impl<'a> ScopedFlag<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        let prev = flag.get();
        flag.set(true);
        ScopedFlag { flag, prev }
    }
}

impl Drop for ScopedFlag<'_> {
    fn drop(&mut self) {
        self.flag.set(self.prev);
    }
}

/// Finds the stable sorted-insert position: the first entry whose group
/// exceeds `group`, so that equal-group entries keep insertion order
/// (spec invariant I1 / property P2).
fn upper_bound<T>(items: &[T], group: i32, group_of: impl Fn(&T) -> i32) -> usize {
    items.partition_point(|item| group_of(item) <= group)
}

/// One typed dispatch endpoint, named and owned by a [`crate::registrar::Registrar`].
///
/// Not constructed directly outside the crate; obtained via
/// [`Registrar::lookup`](crate::registrar::Registrar::lookup), which
/// returns a [`crate::interface::ChannelInterface`] bound to it.
pub struct Channel<Args, R> {
    name: String,
    registrar_name: String,
    subscribers: RefCell<Rc<RefCell<Vec<SubscriberEntry<Args, R>>>>>,
    resolves: RefCell<Rc<RefCell<Vec<ResolveEntry<R>>>>>,
    dispatching: Cell<bool>,
    resolving: Cell<bool>,
    pending_unsubscribe: RefCell<Vec<usize>>,
    pending_unresolve: RefCell<Vec<usize>>,
    debug: Cell<bool>,
}

impl<Args, R> Channel<Args, R>
where
    Args: Clone + fmt::Debug + 'static,
    R: 'static,
{
    pub(crate) fn new(name: impl Into<String>, registrar_name: impl Into<String>) -> Self {
        Channel {
            name: name.into(),
            registrar_name: registrar_name.into(),
            subscribers: RefCell::new(Rc::new(RefCell::new(Vec::new()))),
            resolves: RefCell::new(Rc::new(RefCell::new(Vec::new()))),
            dispatching: Cell::new(false),
            resolving: Cell::new(false),
            pending_unsubscribe: RefCell::new(Vec::new()),
            pending_unresolve: RefCell::new(Vec::new()),
            debug: Cell::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn debug(&self) -> bool {
        self.debug.get()
    }

    pub fn set_debug(&self, debug: bool) {
        self.debug.set(debug);
    }

    pub fn count(&self) -> usize {
        self.subscribers.borrow().borrow().len()
    }

    pub fn labels(&self) -> Vec<String> {
        self.subscribers
            .borrow()
            .borrow()
            .iter()
            .map(|s| s.label.clone())
            .collect()
    }

    /// Dispatches `args` to every subscriber in order, then to every
    /// resolver with the aggregated returns. `source` is only used for the
    /// debug trace line; pass `""` when invoking without a handle.
    pub fn invoke(&self, source: &str, args: Args) -> Vec<Option<R>> {
        if self.subscribers.borrow().borrow().is_empty() {
            return Vec::new();
        }

        if self.debug.get() {
            tracing::debug!(
                source,
                registrar = %self.registrar_name,
                channel = %self.name,
                "{source} -> {}.{}({args:?})",
                self.registrar_name,
                self.name,
            );
        }

        let rets = {
            let _guard = ScopedFlag::enter(&self.dispatching);
            // Snapshot the callables, then drop the list borrow before
            // calling anything: a subscriber reaching back into this
            // channel (to unsubscribe itself, or to invoke again) must
            // find the list free to borrow, and calling a plain `Rc<dyn
            // Fn>` never holds a borrow at all.
            let callables: Vec<SubscriberFn<Args, R>> = self
                .subscribers
                .borrow()
                .borrow()
                .iter()
                .map(|s| s.callable.clone())
                .collect();
            callables.iter().map(|f| f(args.clone())).collect::<Vec<_>>()
        };
        self.apply_pending_unsubscribe();

        if !self.resolves.borrow().borrow().is_empty() {
            let _guard = ScopedFlag::enter(&self.resolving);
            let callables: Vec<ResolveFn<R>> = self
                .resolves
                .borrow()
                .borrow()
                .iter()
                .map(|r| r.callable.clone())
                .collect();
            for f in &callables {
                f(&rets);
            }
            self.apply_pending_unresolve();
        }

        rets
    }

    fn require_idle(&self, what: &str) {
        if self.dispatching.get() {
            crate::error::fatal!(
                "cannot {what} on channel \"{}\" while a dispatch is in progress",
                self.name
            );
        }
    }

    fn require_not_resolving(&self, what: &str) {
        if self.resolving.get() {
            crate::error::fatal!(
                "cannot {what} on channel \"{}\" while resolvers are running",
                self.name
            );
        }
    }

    /// Subscribes `f`, whose return converts into `R` via [`Into`]. This is
    /// the adapter for both the "exact `R`" and "convertible to `R`" cases
    /// from the spec: callers needing the convertible case simply name a
    /// `R2: Into<R>` return type.
    pub fn subscribe<R2, F>(&self, f: F, label: impl Into<String>, group: i32) -> String
    where
        R2: Into<R>,
        F: Fn(Args) -> R2 + 'static,
    {
        self.require_idle("subscribe");
        self.insert_subscriber(move |args| Some(f(args).into()), label, group)
    }

    /// Subscribes `f`, which already returns `Option<R>` verbatim.
    pub fn subscribe_opt<F>(&self, f: F, label: impl Into<String>, group: i32) -> String
    where
        F: Fn(Args) -> Option<R> + 'static,
    {
        self.require_idle("subscribe");
        self.insert_subscriber(f, label, group)
    }

    /// Subscribes `f`, which returns nothing; its contribution to the
    /// aggregate is always an empty `Option<R>`.
    pub fn subscribe_void<F>(&self, f: F, label: impl Into<String>, group: i32) -> String
    where
        F: Fn(Args) + 'static,
    {
        self.require_idle("subscribe");
        self.insert_subscriber(
            move |args| {
                f(args);
                None
            },
            label,
            group,
        )
    }

    fn insert_subscriber<F>(&self, f: F, label: impl Into<String>, group: i32) -> String
    where
        F: Fn(Args) -> Option<R> + 'static,
    {
        let label = label.into();
        let entry = SubscriberEntry {
            label: label.clone(),
            group,
            callable: Rc::new(f),
        };
        let subs = self.subscribers.borrow();
        let mut subs = subs.borrow_mut();
        let pos = upper_bound(&subs, group, |s| s.group);
        subs.insert(pos, entry);
        label
    }

    pub fn unsubscribe(&self, label: &str) {
        if label.is_empty() {
            crate::error::fatal!("no unsubscribe of an unlabeled subscriber");
        }
        let pos = self
            .subscribers
            .borrow()
            .borrow()
            .iter()
            .position(|s| s.label == label);
        let Some(pos) = pos else { return };
        self.remove_subscriber_at(pos);
    }

    pub fn unsubscribe_index(&self, index: usize) {
        self.remove_subscriber_at(index);
    }

    fn remove_subscriber_at(&self, index: usize) {
        if self.dispatching.get() {
            self.pending_unsubscribe.borrow_mut().push(index);
        } else {
            let subs = self.subscribers.borrow();
            let mut subs = subs.borrow_mut();
            if index < subs.len() {
                subs.remove(index);
            }
        }
    }

    fn apply_pending_unsubscribe(&self) {
        let mut pending = self.pending_unsubscribe.borrow_mut();
        if pending.is_empty() {
            return;
        }
        pending.sort_unstable_by(|a, b| b.cmp(a));
        pending.dedup();
        let subs = self.subscribers.borrow();
        let mut subs = subs.borrow_mut();
        for &idx in pending.iter() {
            if idx < subs.len() {
                subs.remove(idx);
            }
        }
        pending.clear();
    }

    pub fn subscribe_resolve<F>(&self, f: F, label: impl Into<String>, group: i32) -> String
    where
        F: Fn(&[Option<R>]) + 'static,
    {
        self.require_not_resolving("subscribe_resolve");
        let label = label.into();
        let entry = ResolveEntry {
            label: label.clone(),
            group,
            callable: Rc::new(f),
        };
        let resolves = self.resolves.borrow();
        let mut resolves = resolves.borrow_mut();
        let pos = upper_bound(&resolves, group, |r| r.group);
        resolves.insert(pos, entry);
        label
    }

    pub fn unsubscribe_resolve(&self, label: &str) {
        if label.is_empty() {
            crate::error::fatal!("no unresolve of an unlabeled resolver");
        }
        let pos = self
            .resolves
            .borrow()
            .borrow()
            .iter()
            .position(|r| r.label == label);
        let Some(pos) = pos else { return };
        self.remove_resolve_at(pos);
    }

    pub fn unsubscribe_resolve_index(&self, index: usize) {
        self.remove_resolve_at(index);
    }

    fn remove_resolve_at(&self, index: usize) {
        if self.resolving.get() {
            self.pending_unresolve.borrow_mut().push(index);
        } else {
            let resolves = self.resolves.borrow();
            let mut resolves = resolves.borrow_mut();
            if index < resolves.len() {
                resolves.remove(index);
            }
        }
    }

    fn apply_pending_unresolve(&self) {
        let mut pending = self.pending_unresolve.borrow_mut();
        if pending.is_empty() {
            return;
        }
        pending.sort_unstable_by(|a, b| b.cmp(a));
        pending.dedup();
        let resolves = self.resolves.borrow();
        let mut resolves = resolves.borrow_mut();
        for &idx in pending.iter() {
            if idx < resolves.len() {
                resolves.remove(idx);
            }
        }
        pending.clear();
    }

    /// Fuses this channel's subscriber/resolve lists with `other`'s,
    /// appending `other`'s entries first so both channels observe the
    /// union from that point on (spec invariant I4, Open Question 1
    /// resolved as "append-then-share").
    pub(crate) fn fuse_from(&self, other: &Channel<Args, R>) {
        {
            let mine = self.subscribers.borrow().clone();
            let theirs = other.subscribers.borrow().clone();
            mine.borrow_mut().extend(theirs.borrow_mut().drain(..));
            *other.subscribers.borrow_mut() = mine;
        }
        {
            let mine = self.resolves.borrow().clone();
            let theirs = other.resolves.borrow().clone();
            mine.borrow_mut().extend(theirs.borrow_mut().drain(..));
            *other.resolves.borrow_mut() = mine;
        }
    }
}

impl<Args, R> Channel<Args, R>
where
    Args: DynArgs + Clone + fmt::Debug + 'static,
    R: IntoDynValue + 'static,
{
    /// Type-erased invocation for scripting collaborators: converts a flat
    /// `DynValue` argument list to `Args`, aborting with a descriptive
    /// error on conversion failure rather than invoking.
    pub fn invoke_dynamic(
        &self,
        source: &str,
        args: &[DynValue],
    ) -> ConduitResult<Vec<Option<DynValue>>> {
        let args = Args::from_dyn_args(&self.name, args)?;
        let rets = self.invoke(source, args);
        Ok(rets
            .into_iter()
            .map(|r| r.map(|v| v.into_dyn_value()))
            .collect())
    }
}

impl<Args, R> Channel<Args, R>
where
    Args: DynArgs + Clone + fmt::Debug + 'static,
    R: FromDynValue + 'static,
{
    /// Wraps an externally-supplied, dynamically-typed callable as a
    /// subscriber. If its result cannot be converted to `R`, the wrapper
    /// discards it (an empty `Option<R>`), matching the spec's
    /// `subscribe_dynamic` contract.
    pub fn subscribe_dynamic<F>(&self, f: F, label: impl Into<String>, group: i32) -> String
    where
        F: Fn(&[DynValue]) -> Option<DynValue> + 'static,
    {
        self.require_idle("subscribe");
        self.insert_subscriber(
            move |args: Args| {
                let dyn_args = args.into_dyn_args();
                let ret = f(&dyn_args)?;
                R::from_dyn_value(&ret).ok()
            },
            label,
            group,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc as StdRc;

    fn chan<Args, R>() -> Channel<Args, R>
    where
        Args: Clone + fmt::Debug + 'static,
        R: 'static,
    {
        Channel::new("test", "reg")
    }

    #[test]
    fn empty_channel_invoke_is_noop() {
        let c: Channel<(), ()> = chan();
        let rets = c.invoke("", ());
        assert!(rets.is_empty());
    }

    #[test]
    fn subscribers_fire_in_subscription_order_within_group() {
        let c: Channel<(), ()> = chan();
        let log = StdRc::new(StdRefCell::new(Vec::new()));
        let a = log.clone();
        c.subscribe_void(move |_| a.borrow_mut().push(1), "a", 0);
        let b = log.clone();
        c.subscribe_void(move |_| b.borrow_mut().push(2), "b", 0);
        c.invoke("", ());
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn group_ordering_overrides_subscription_order() {
        let c: Channel<(), ()> = chan();
        let log = StdRc::new(StdRefCell::new(Vec::new()));
        let a = log.clone();
        c.subscribe_void(move |_| a.borrow_mut().push("A"), "a", 10);
        let b = log.clone();
        c.subscribe_void(move |_| b.borrow_mut().push("B"), "b", 0);
        let cc = log.clone();
        c.subscribe_void(move |_| cc.borrow_mut().push("C"), "c", 5);
        c.invoke("", ());
        assert_eq!(*log.borrow(), vec!["B", "C", "A"]);
    }

    #[test]
    fn return_aggregation_preserves_order() {
        let c: Channel<(), i32> = chan();
        c.subscribe(|_| 7, "one", 0);
        c.subscribe(|_| 8, "two", 0);
        c.subscribe(|_| 9, "three", 0);
        let rets = c.invoke("", ());
        assert_eq!(rets, vec![Some(7), Some(8), Some(9)]);
    }

    #[test]
    fn reentrant_unsubscribe_of_self_is_staged() {
        let c: StdRc<Channel<(), ()>> = StdRc::new(chan());
        let log = StdRc::new(StdRefCell::new(Vec::new()));

        let c_self = c.clone();
        c.subscribe_void(
            move |_| {
                c_self.unsubscribe("a");
            },
            "a",
            0,
        );
        let b_log = log.clone();
        c.subscribe_void(move |_| b_log.borrow_mut().push("b"), "b", 0);

        c.invoke("", ());
        assert_eq!(*log.borrow(), vec!["b"]);
        assert_eq!(c.count(), 1);

        log.borrow_mut().clear();
        c.invoke("", ());
        assert_eq!(*log.borrow(), vec!["b"]);
    }

    #[test]
    fn nested_invoke_of_same_channel_is_allowed() {
        let c: StdRc<Channel<(), ()>> = StdRc::new(chan());
        let depth = StdRc::new(std::cell::Cell::new(0));
        let log = StdRc::new(StdRefCell::new(Vec::new()));

        let c_self = c.clone();
        let d = depth.clone();
        let l = log.clone();
        c.subscribe_void(
            move |_| {
                l.borrow_mut().push(d.get());
                if d.get() < 2 {
                    d.set(d.get() + 1);
                    c_self.invoke("", ());
                }
            },
            "recurse",
            0,
        );

        c.invoke("", ());
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn subscribe_during_dispatch_is_fatal() {
        let c: StdRc<Channel<(), ()>> = StdRc::new(chan());
        let c_self = c.clone();
        c.subscribe_void(
            move |_| {
                c_self.subscribe_void(|_| {}, "late", 0);
            },
            "a",
            0,
        );
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| c.invoke("", ())));
        assert!(result.is_err());
        assert!(
            !c.dispatching.get(),
            "dispatching flag must be restored after unwind"
        );
    }

    #[test]
    fn empty_label_unsubscribe_is_fatal() {
        let c: Channel<(), ()> = chan();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| c.unsubscribe("")));
        assert!(result.is_err());
    }

    #[test]
    fn resolves_see_the_aggregate_after_subscribers_complete() {
        let c: Channel<(), i32> = chan();
        c.subscribe(|_| 1, "a", 0);
        c.subscribe(|_| 2, "b", 0);
        let seen = StdRc::new(StdRefCell::new(Vec::new()));
        let s = seen.clone();
        c.subscribe_resolve(move |rets| s.borrow_mut().push(rets.to_vec()), "resolver", 0);
        c.invoke("", ());
        assert_eq!(*seen.borrow(), vec![vec![Some(1), Some(2)]]);
    }

    #[test]
    fn subscribe_resolve_during_resolve_is_fatal() {
        let c: StdRc<Channel<(), i32>> = StdRc::new(chan());
        c.subscribe(|_| 1, "a", 0);
        let c_self = c.clone();
        c.subscribe_resolve(
            move |_rets| {
                c_self.subscribe_resolve(|_| {}, "late", 0);
            },
            "resolver",
            0,
        );
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| c.invoke("", ())));
        assert!(result.is_err());
    }

    #[test]
    fn dynamic_invoke_converts_and_dispatches() {
        let c: Channel<(i32, String), i32> = chan();
        c.subscribe(|(a, b): (i32, String)| a + b.len() as i32, "h", 0);
        let rets = c
            .invoke_dynamic("", &[DynValue::Int(10), DynValue::Str("hey".into())])
            .unwrap();
        assert_eq!(rets, vec![Some(DynValue::Int(13))]);
    }

    #[test]
    fn dynamic_invoke_reports_conversion_failure() {
        let c: Channel<(i32,), ()> = chan();
        c.subscribe_void(|_| {}, "h", 0);
        let err = c
            .invoke_dynamic("", &[DynValue::Str("nope".into())])
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::ConduitError::ConversionFailure { .. }
        ));
    }

    #[test]
    fn subscribe_dynamic_discards_unconvertible_return() {
        let c: Channel<(i32,), String> = chan();
        c.subscribe_dynamic(|_args| Some(DynValue::Int(1)), "dyn", 0);
        let rets = c.invoke("", (1,));
        assert_eq!(rets, vec![None]);
    }
}
