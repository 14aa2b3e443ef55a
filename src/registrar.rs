//! The name→channel directory.
//!
//! A [`Registrar`] owns one [`Channel`] per name, created on first
//! [`lookup`](Registrar::lookup) and type-checked on every subsequent one
//! (spec invariant R1). Channels of differing signatures are stored side by
//! side behind [`ChannelErased`], a small trait object giving the directory
//! enough uniform surface (debug flag, dynamic invoke/subscribe, fusing) to
//! operate without knowing each channel's concrete `Args`/`R`.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::channel::Channel;
use crate::dynval::{DynArgs, DynValue, FromDynValue, IntoDynValue};
use crate::error::{ConduitError, ConduitResult};
use crate::interface::ChannelInterface;

trait ChannelErased {
    fn as_any(&self) -> &dyn Any;
    fn type_name(&self) -> &'static str;
    fn name(&self) -> &str;
    fn count(&self) -> usize;
    fn debug(&self) -> bool;
    fn set_debug(&self, debug: bool);
    fn invoke_dynamic(
        &self,
        source: &str,
        args: &[DynValue],
    ) -> ConduitResult<Vec<Option<DynValue>>>;
    fn subscribe_dynamic(
        &self,
        f: Box<dyn Fn(&[DynValue]) -> Option<DynValue>>,
        label: String,
        group: i32,
    ) -> String;
    fn fuse_with(&self, other: &dyn ChannelErased) -> bool;
}

struct TypedEntry<Args, R> {
    channel: Rc<Channel<Args, R>>,
}

impl<Args, R> ChannelErased for TypedEntry<Args, R>
where
    Args: DynArgs + Clone + fmt::Debug + 'static,
    R: IntoDynValue + FromDynValue + 'static,
{
    fn as_any(&self) -> &dyn Any {
        &self.channel
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<(Args, R)>()
    }

    fn name(&self) -> &str {
        self.channel.name()
    }

    fn count(&self) -> usize {
        self.channel.count()
    }

    fn debug(&self) -> bool {
        self.channel.debug()
    }

    fn set_debug(&self, debug: bool) {
        self.channel.set_debug(debug);
    }

    fn invoke_dynamic(
        &self,
        source: &str,
        args: &[DynValue],
    ) -> ConduitResult<Vec<Option<DynValue>>> {
        self.channel.invoke_dynamic(source, args)
    }

    fn subscribe_dynamic(
        &self,
        f: Box<dyn Fn(&[DynValue]) -> Option<DynValue>>,
        label: String,
        group: i32,
    ) -> String {
        self.channel
            .subscribe_dynamic(move |args| f(args), label, group)
    }

    fn fuse_with(&self, other: &dyn ChannelErased) -> bool {
        match other.as_any().downcast_ref::<Rc<Channel<Args, R>>>() {
            Some(other_channel) => {
                self.channel.fuse_from(other_channel);
                true
            }
            None => false,
        }
    }
}

/// A namespace mapping channel names to channels, one per logical process
/// component. Not `Send`/`Sync`: the whole bus is single-threaded by
/// contract (spec §5).
pub struct Registrar {
    name: String,
    directory: RefCell<HashMap<String, Box<dyn ChannelErased>>>,
}

impl Registrar {
    pub fn new(name: impl Into<String>) -> Self {
        Registrar {
            name: name.into(),
            directory: RefCell::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up (creating on first call) the channel named `channel_name`
    /// with signature `Args -> R`, returning a handle attributed to
    /// `source_label`. A later call under the same name with a different
    /// signature is a fatal programming error (spec invariant R1).
    pub fn lookup<Args, R>(&self, channel_name: &str, source_label: &str) -> ChannelInterface<Args, R>
    where
        Args: DynArgs + Clone + fmt::Debug + 'static,
        R: IntoDynValue + FromDynValue + 'static,
    {
        let mut directory = self.directory.borrow_mut();
        if let Some(entry) = directory.get(channel_name) {
            let channel = entry
                .as_any()
                .downcast_ref::<Rc<Channel<Args, R>>>()
                .unwrap_or_else(|| {
                    crate::error::fatal!(
                        "registrar \"{}\": channel \"{channel_name}\" already registered \
                         with a different signature (registered {}, requested {})",
                        self.name,
                        entry.type_name(),
                        std::any::type_name::<(Args, R)>(),
                    )
                });
            return ChannelInterface::new(channel.clone(), source_label);
        }
        let channel = Rc::new(Channel::new(channel_name, self.name.clone()));
        directory.insert(
            channel_name.to_string(),
            Box::new(TypedEntry {
                channel: channel.clone(),
            }),
        );
        ChannelInterface::new(channel, source_label)
    }

    /// Fuses the local channel named `channel_name` with its counterpart in
    /// `other`, creating the counterpart (with the same signature) if
    /// necessary. Both channels observe one shared subscriber/resolve
    /// sequence from this point on. Not transitive: aliasing `self` with
    /// `other` and then `other` with a third registrar does not alias
    /// `self` with the third.
    ///
    /// Fatal if `self` has no channel named `channel_name` yet, or if
    /// `other`'s channel of that name has a different signature.
    pub fn alias<Args, R>(&self, other: &Registrar, channel_name: &str)
    where
        Args: DynArgs + Clone + fmt::Debug + 'static,
        R: IntoDynValue + FromDynValue + 'static,
    {
        let directory = self.directory.borrow();
        let local = directory.get(channel_name).unwrap_or_else(|| {
            crate::error::fatal!(
                "registrar \"{}\": alias of unknown channel \"{channel_name}\"",
                self.name
            )
        });
        // Ensures the counterpart exists in `other` and agrees on types;
        // panics via the same type-mismatch path as a direct lookup would.
        other.lookup::<Args, R>(channel_name, "");
        let remote_directory = other.directory.borrow();
        let remote = remote_directory.get(channel_name).expect("just looked up");
        if !local.fuse_with(remote.as_ref()) {
            crate::error::fatal!(
                "registrar \"{}\": alias of channel \"{channel_name}\" \
                 found a type mismatch against registrar \"{}\"",
                self.name,
                other.name
            );
        }
    }

    /// Toggles the debug trace flag on every channel currently registered.
    pub fn set_debug(&self, debug: bool) {
        for entry in self.directory.borrow().values() {
            entry.set_debug(debug);
        }
    }

    /// Invokes `f` once per registered channel, passing its name and
    /// subscriber count. Used for enumeration/diagnostics.
    pub fn visit(&self, mut f: impl FnMut(&str, usize)) {
        for entry in self.directory.borrow().values() {
            f(entry.name(), entry.count());
        }
    }

    /// Type-erased invocation for scripting collaborators: looks up
    /// `channel_name`, converts `args` to the channel's parameter types,
    /// and invokes. Unknown-channel and conversion failures are reported as
    /// [`ConduitError`], not panics — this is the dynamic surface's "soft"
    /// carve-out from the otherwise-fatal lookup/conversion errors.
    pub fn invoke_dynamic(
        &self,
        channel_name: &str,
        source: &str,
        args: &[DynValue],
    ) -> ConduitResult<Vec<Option<DynValue>>> {
        let directory = self.directory.borrow();
        let entry = directory
            .get(channel_name)
            .ok_or_else(|| ConduitError::UnknownChannel(channel_name.to_string()))?;
        entry.invoke_dynamic(source, args)
    }

    /// Wraps an external, dynamically-typed callable as a subscriber on
    /// `channel_name`. Returns an error if no such channel is registered.
    pub fn subscribe_dynamic(
        &self,
        channel_name: &str,
        f: impl Fn(&[DynValue]) -> Option<DynValue> + 'static,
        label: impl Into<String>,
        group: i32,
    ) -> ConduitResult<String> {
        let directory = self.directory.borrow();
        let entry = directory
            .get(channel_name)
            .ok_or_else(|| ConduitError::UnknownChannel(channel_name.to_string()))?;
        Ok(entry.subscribe_dynamic(Box::new(f), label.into(), group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_creates_then_reuses_the_same_channel() {
        let r = Registrar::new("sim");
        let h1: ChannelInterface<(), i32> = r.lookup("poll", "a");
        h1.subscribe(|_| 1, "x", 0);
        let h2: ChannelInterface<(), i32> = r.lookup("poll", "b");
        assert_eq!(h2.invoke(()), vec![Some(1)]);
    }

    #[test]
    #[should_panic(expected = "different signature")]
    fn lookup_with_a_different_signature_is_fatal() {
        let r = Registrar::new("sim");
        let _h: ChannelInterface<(i32,), ()> = r.lookup("x", "");
        let _h2: ChannelInterface<(String,), ()> = r.lookup("x", "");
    }

    #[test]
    #[should_panic(expected = "unknown channel")]
    fn alias_of_unknown_local_channel_is_fatal() {
        let a = Registrar::new("a");
        let b = Registrar::new("b");
        a.alias::<(), ()>(&b, "missing");
    }

    #[test]
    fn alias_fuses_subscriber_lists_both_ways() {
        let a = Registrar::new("a");
        let b = Registrar::new("b");
        let ha: ChannelInterface<(), ()> = a.lookup("tick", "");
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_a = log.clone();
        ha.subscribe_void(move |_| log_a.borrow_mut().push("a"), "a", 0);

        a.alias::<(), ()>(&b, "tick");

        let hb: ChannelInterface<(), ()> = b.lookup("tick", "");
        let log_b = log.clone();
        hb.subscribe_void(move |_| log_b.borrow_mut().push("b"), "b", 0);

        ha.invoke(());
        assert_eq!(*log.borrow(), vec!["a", "b"]);

        log.borrow_mut().clear();
        hb.invoke(());
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn invoke_dynamic_on_unknown_channel_is_a_soft_error() {
        let r = Registrar::new("sim");
        let err = r.invoke_dynamic("nope", "", &[]).unwrap_err();
        assert!(matches!(err, ConduitError::UnknownChannel(_)));
    }

    #[test]
    fn set_debug_reaches_every_channel() {
        let r = Registrar::new("sim");
        let h: ChannelInterface<(), ()> = r.lookup("a", "");
        r.set_debug(true);
        assert!(h.debug());
    }

    #[test]
    fn visit_enumerates_every_registered_channel() {
        let r = Registrar::new("sim");
        let _a: ChannelInterface<(), ()> = r.lookup("a", "");
        let _b: ChannelInterface<(), ()> = r.lookup("b", "");
        let mut names: Vec<String> = Vec::new();
        r.visit(|name, _count| names.push(name.to_string()));
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }
}
