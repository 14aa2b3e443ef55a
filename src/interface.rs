//! The lightweight, non-owning handle callers actually hold.
//!
//! A [`ChannelInterface`] is the value type returned by
//! [`Registrar::lookup`](crate::registrar::Registrar::lookup): cheap to
//! clone, carrying only a source label and a reference-counted pointer to
//! the channel it is bound to. It never outlives the [`crate::registrar::Registrar`]
//! that produced the underlying [`Channel`] — there is no lifetime enforcing
//! that in safe Rust without borrowing the registrar, so, matching spec
//! invariant R2, it is the caller's responsibility not to retain one past
//! the registrar's lifetime.

use std::fmt;
use std::rc::Rc;

use crate::channel::Channel;
use crate::dynval::{DynArgs, DynValue, FromDynValue, IntoDynValue};
use crate::error::ConduitResult;
use crate::names;

/// A handle binding a source label to a [`Channel`]. Equality compares
/// `(source-id, channel pointer)`, per spec.
pub struct ChannelInterface<Args, R> {
    source_id: u32,
    channel: Rc<Channel<Args, R>>,
}

impl<Args, R> ChannelInterface<Args, R>
where
    Args: Clone + fmt::Debug + 'static,
    R: 'static,
{
    pub(crate) fn new(channel: Rc<Channel<Args, R>>, source_label: &str) -> Self {
        ChannelInterface {
            source_id: names::intern(source_label),
            channel,
        }
    }

    /// The label this handle currently attributes calls to.
    pub fn source_label(&self) -> String {
        names::resolve(self.source_id)
    }

    /// Re-interns `label` and rebinds this handle to it.
    pub fn set_source_label(&mut self, label: &str) {
        self.source_id = names::intern(label);
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    pub fn count(&self) -> usize {
        self.channel.count()
    }

    pub fn labels(&self) -> Vec<String> {
        self.channel.labels()
    }

    pub fn debug(&self) -> bool {
        self.channel.debug()
    }

    pub fn set_debug(&self, debug: bool) {
        self.channel.set_debug(debug);
    }

    /// Invokes the bound channel, attributing the trace line (if `debug` is
    /// set) to this handle's source label.
    pub fn invoke(&self, args: Args) -> Vec<Option<R>> {
        let label = self.source_label();
        self.channel.invoke(&label, args)
    }

    pub fn subscribe<R2, F>(&self, f: F, label: impl Into<String>, group: i32) -> String
    where
        R2: Into<R>,
        F: Fn(Args) -> R2 + 'static,
    {
        self.channel.subscribe(f, label, group)
    }

    pub fn subscribe_opt<F>(&self, f: F, label: impl Into<String>, group: i32) -> String
    where
        F: Fn(Args) -> Option<R> + 'static,
    {
        self.channel.subscribe_opt(f, label, group)
    }

    pub fn subscribe_void<F>(&self, f: F, label: impl Into<String>, group: i32) -> String
    where
        F: Fn(Args) + 'static,
    {
        self.channel.subscribe_void(f, label, group)
    }

    pub fn unsubscribe(&self, label: &str) {
        self.channel.unsubscribe(label)
    }

    pub fn unsubscribe_index(&self, index: usize) {
        self.channel.unsubscribe_index(index)
    }

    pub fn subscribe_resolve<F>(&self, f: F, label: impl Into<String>, group: i32) -> String
    where
        F: Fn(&[Option<R>]) + 'static,
    {
        self.channel.subscribe_resolve(f, label, group)
    }

    pub fn unsubscribe_resolve(&self, label: &str) {
        self.channel.unsubscribe_resolve(label)
    }

    pub(crate) fn channel_rc(&self) -> &Rc<Channel<Args, R>> {
        &self.channel
    }
}

impl<Args, R> ChannelInterface<Args, R>
where
    Args: DynArgs + Clone + fmt::Debug + 'static,
    R: IntoDynValue + 'static,
{
    pub fn invoke_dynamic(&self, args: &[DynValue]) -> ConduitResult<Vec<Option<DynValue>>> {
        let label = self.source_label();
        self.channel.invoke_dynamic(&label, args)
    }
}

impl<Args, R> ChannelInterface<Args, R>
where
    Args: DynArgs + Clone + fmt::Debug + 'static,
    R: FromDynValue + 'static,
{
    pub fn subscribe_dynamic<F>(&self, f: F, label: impl Into<String>, group: i32) -> String
    where
        F: Fn(&[DynValue]) -> Option<DynValue> + 'static,
    {
        self.channel.subscribe_dynamic(f, label, group)
    }
}

impl<Args, R> Clone for ChannelInterface<Args, R> {
    fn clone(&self) -> Self {
        ChannelInterface {
            source_id: self.source_id,
            channel: self.channel.clone(),
        }
    }
}

impl<Args, R> PartialEq for ChannelInterface<Args, R> {
    fn eq(&self, other: &Self) -> bool {
        self.source_id == other.source_id && Rc::ptr_eq(&self.channel, &other.channel)
    }
}

impl<Args, R> Eq for ChannelInterface<Args, R> {}

impl<Args, R> fmt::Debug for ChannelInterface<Args, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelInterface")
            .field("source", &names::resolve(self.source_id))
            .field("channel", &self.channel.name())
            .finish()
    }
}
