//! N-way join over heterogeneous channels.
//!
//! [`merge`] subscribes a dynamically-typed subscriber (see
//! [`crate::dynval`]) to every supplied channel; once every channel has
//! delivered at least one value since the last reset, the user's callback
//! fires once with the concatenated latest values — channels in supplied
//! order, each channel's own parameters in declaration order — then the
//! optional response, then the join resets automatically (spec invariant
//! O1, properties P7/P8). A join may cover any channel signature and up to
//! [`MAX_JOINED_CHANNELS`] channels; the dynamic surface is what makes one
//! storage shape work across arbitrarily different channel signatures —
//! see design note §9's "arena of typed slots," realized here as a flat
//! `DynValue` arena rather than compile-time-indexed typed storage.
//!
//! `merge2`/`merge3`/`merge4` are typed convenience wrappers over [`merge`]
//! for the common case of joining a handful of single-parameter channels
//! with an ergonomic, non-erased callback.
//!
//! The returned `Rc` *is* the handle: shared ownership, and dropping the
//! last reference unsubscribes from every joined channel (the resolution of
//! the spec's open question on optuple teardown).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::dynval::{DynArgs, DynValue, FromDynValue, IntoDynValue};
use crate::interface::ChannelInterface;

/// Upper bound on the number of channels a single optuple may join (spec
/// invariant O1); the completion bitmask is a `u64`.
pub const MAX_JOINED_CHANNELS: usize = 64;

/// A channel prepared to take part in a join: carries its own
/// subscribe/unsubscribe logic behind a closure so [`merge`] can hold a
/// list of channels of differing signatures. Built via [`IntoJoinable`].
pub struct Joinable {
    attach: Box<dyn FnOnce(&Rc<Optuple>, usize) -> Box<dyn Fn()>>,
}

/// Converts a channel handle into a [`Joinable`] for [`merge`]. Implemented
/// for every `ChannelInterface<Args, R>` whose signature supports the
/// dynamic invocation surface — which, per this crate's uniform channel
/// bound, is all of them.
pub trait IntoJoinable {
    fn into_joinable(self) -> Joinable;
}

impl<Args, R> IntoJoinable for ChannelInterface<Args, R>
where
    Args: DynArgs + Clone + fmt::Debug + 'static,
    R: IntoDynValue + FromDynValue + 'static,
{
    fn into_joinable(self) -> Joinable {
        Joinable {
            attach: Box::new(move |optuple: &Rc<Optuple>, index: usize| {
                let weak = Rc::downgrade(optuple);
                let label = format!("optuple-{:p}-{index}", Rc::as_ptr(optuple));
                let sub_label = self.subscribe_dynamic(
                    move |args: &[DynValue]| {
                        if let Some(o) = weak.upgrade() {
                            o.fill(index, args.to_vec());
                        }
                        None
                    },
                    label,
                    0,
                );
                let detach_channel = self.clone();
                Box::new(move || detach_channel.unsubscribe(&sub_label)) as Box<dyn Fn()>
            }),
        }
    }
}

/// A multi-channel join. Not constructed directly; see [`merge`],
/// [`merge2`], [`merge3`], [`merge4`].
pub struct Optuple {
    slots: RefCell<Vec<Option<Vec<DynValue>>>>,
    state: Cell<u64>,
    target_mask: u64,
    callback: RefCell<Box<dyn Fn(&[DynValue])>>,
    response: RefCell<Option<Box<dyn Fn()>>>,
    detach: RefCell<Vec<Box<dyn Fn()>>>,
}

impl Optuple {
    /// Destroys every constructed slot and clears the completion mask.
    /// Called automatically after firing; callers may also reset to
    /// discard partial progress.
    pub fn reset(&self) {
        for slot in self.slots.borrow_mut().iter_mut() {
            *slot = None;
        }
        self.state.set(0);
    }

    fn fill(&self, index: usize, values: Vec<DynValue>) {
        self.slots.borrow_mut()[index] = Some(values);
        self.state.set(self.state.get() | (1u64 << index));
        self.try_fire();
    }

    fn try_fire(&self) {
        if self.state.get() != self.target_mask {
            return;
        }
        let flat: Vec<DynValue> = self
            .slots
            .borrow()
            .iter()
            .flat_map(|slot| slot.clone().expect("bit set implies slot filled"))
            .collect();
        (self.callback.borrow())(&flat);
        if let Some(response) = self.response.borrow().as_ref() {
            response();
        }
        self.reset();
    }
}

impl Drop for Optuple {
    fn drop(&mut self) {
        for detacher in self.detach.borrow().iter() {
            detacher();
        }
    }
}

/// Joins `channels`, firing `callback` with the flattened, concatenated
/// argument lists once every channel has delivered since the last reset.
/// Fatal if `channels` is empty or exceeds [`MAX_JOINED_CHANNELS`] — the
/// same construction-time assertion the header uses
/// (`static_assert(sizeof...(cis) <= 64, ...)`), rendered as a runtime
/// panic since Rust can't enforce a `Vec`'s length at compile time.
pub fn merge(
    callback: impl Fn(&[DynValue]) + 'static,
    response: Option<impl Fn() + 'static>,
    channels: Vec<Joinable>,
) -> Rc<Optuple> {
    let n = channels.len();
    if n == 0 || n > MAX_JOINED_CHANNELS {
        crate::error::fatal!(
            "optuple supports 1 to {MAX_JOINED_CHANNELS} channels, got {n}"
        );
    }
    let target_mask = if n == 64 { u64::MAX } else { (1u64 << n) - 1 };

    let optuple = Rc::new(Optuple {
        slots: RefCell::new(vec![None; n]),
        state: Cell::new(0),
        target_mask,
        callback: RefCell::new(Box::new(callback)),
        response: RefCell::new(response.map(|r| Box::new(r) as Box<dyn Fn()>)),
        detach: RefCell::new(Vec::new()),
    });

    let detachers: Vec<Box<dyn Fn()>> = channels
        .into_iter()
        .enumerate()
        .map(|(index, joinable)| (joinable.attach)(&optuple, index))
        .collect();
    *optuple.detach.borrow_mut() = detachers;

    optuple
}

fn unpack<T: FromDynValue>(vals: &[DynValue], index: usize) -> T {
    T::from_dyn_value(&vals[index]).expect("optuple slot type matches the subscribed channel")
}

/// Joins two single-parameter channels with a typed callback.
pub fn merge2<A, B, F, Resp>(
    callback: F,
    response: Option<Resp>,
    ca: ChannelInterface<(A,), ()>,
    cb: ChannelInterface<(B,), ()>,
) -> Rc<Optuple>
where
    A: IntoDynValue + FromDynValue + Clone + fmt::Debug + 'static,
    B: IntoDynValue + FromDynValue + Clone + fmt::Debug + 'static,
    F: Fn(A, B) + 'static,
    Resp: Fn() + 'static,
{
    merge(
        move |vals: &[DynValue]| callback(unpack(vals, 0), unpack(vals, 1)),
        response,
        vec![ca.into_joinable(), cb.into_joinable()],
    )
}

/// Joins three single-parameter channels with a typed callback.
pub fn merge3<A, B, C, F, Resp>(
    callback: F,
    response: Option<Resp>,
    ca: ChannelInterface<(A,), ()>,
    cb: ChannelInterface<(B,), ()>,
    cc: ChannelInterface<(C,), ()>,
) -> Rc<Optuple>
where
    A: IntoDynValue + FromDynValue + Clone + fmt::Debug + 'static,
    B: IntoDynValue + FromDynValue + Clone + fmt::Debug + 'static,
    C: IntoDynValue + FromDynValue + Clone + fmt::Debug + 'static,
    F: Fn(A, B, C) + 'static,
    Resp: Fn() + 'static,
{
    merge(
        move |vals: &[DynValue]| callback(unpack(vals, 0), unpack(vals, 1), unpack(vals, 2)),
        response,
        vec![ca.into_joinable(), cb.into_joinable(), cc.into_joinable()],
    )
}

/// Joins four single-parameter channels with a typed callback.
pub fn merge4<A, B, C, D, F, Resp>(
    callback: F,
    response: Option<Resp>,
    ca: ChannelInterface<(A,), ()>,
    cb: ChannelInterface<(B,), ()>,
    cc: ChannelInterface<(C,), ()>,
    cd: ChannelInterface<(D,), ()>,
) -> Rc<Optuple>
where
    A: IntoDynValue + FromDynValue + Clone + fmt::Debug + 'static,
    B: IntoDynValue + FromDynValue + Clone + fmt::Debug + 'static,
    C: IntoDynValue + FromDynValue + Clone + fmt::Debug + 'static,
    D: IntoDynValue + FromDynValue + Clone + fmt::Debug + 'static,
    F: Fn(A, B, C, D) + 'static,
    Resp: Fn() + 'static,
{
    merge(
        move |vals: &[DynValue]| {
            callback(
                unpack(vals, 0),
                unpack(vals, 1),
                unpack(vals, 2),
                unpack(vals, 3),
            )
        },
        response,
        vec![
            ca.into_joinable(),
            cb.into_joinable(),
            cc.into_joinable(),
            cd.into_joinable(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::Registrar;

    #[test]
    fn fires_once_when_complete_with_latest_values() {
        let reg = Registrar::new("sim");
        let u: ChannelInterface<(i32,), ()> = reg.lookup("u", "");
        let v: ChannelInterface<(String,), ()> = reg.lookup("v", "");

        let fired = Rc::new(RefCell::new(Vec::new()));
        let f = fired.clone();
        let _optuple = merge2::<i32, String, _, fn()>(
            move |i, s| f.borrow_mut().push((i, s)),
            None,
            u.clone(),
            v.clone(),
        );

        u.invoke((42,));
        assert!(fired.borrow().is_empty(), "must not fire until every channel has delivered");

        v.invoke(("hi".to_string(),));
        assert_eq!(*fired.borrow(), vec![(42, "hi".to_string())]);
    }

    #[test]
    fn resets_after_firing_so_a_fresh_cycle_is_required() {
        let reg = Registrar::new("sim");
        let u: ChannelInterface<(i32,), ()> = reg.lookup("u", "");
        let v: ChannelInterface<(String,), ()> = reg.lookup("v", "");

        let fired = Rc::new(RefCell::new(Vec::new()));
        let f = fired.clone();
        let _optuple = merge2::<i32, String, _, fn()>(
            move |i, s| f.borrow_mut().push((i, s)),
            None,
            u.clone(),
            v.clone(),
        );

        u.invoke((42,));
        v.invoke(("hi".to_string(),));
        fired.borrow_mut().clear();

        v.invoke(("bye".to_string(),));
        assert!(fired.borrow().is_empty(), "only one channel refired; join is not complete");
    }

    #[test]
    fn dropping_the_handle_unsubscribes_from_every_channel() {
        let reg = Registrar::new("sim");
        let u: ChannelInterface<(i32,), ()> = reg.lookup("u", "");
        let v: ChannelInterface<(String,), ()> = reg.lookup("v", "");
        assert_eq!(u.count(), 0);

        let optuple = merge2::<i32, String, _, fn()>(|_i, _s| {}, None, u.clone(), v.clone());
        assert_eq!(u.count(), 1);
        assert_eq!(v.count(), 1);

        drop(optuple);
        assert_eq!(u.count(), 0);
        assert_eq!(v.count(), 0);
    }

    #[test]
    fn explicit_reset_discards_partial_progress() {
        let reg = Registrar::new("sim");
        let u: ChannelInterface<(i32,), ()> = reg.lookup("u", "");
        let v: ChannelInterface<(String,), ()> = reg.lookup("v", "");

        let fired = Rc::new(RefCell::new(Vec::new()));
        let f = fired.clone();
        let optuple = merge2::<i32, String, _, fn()>(
            move |i, s| f.borrow_mut().push((i, s)),
            None,
            u.clone(),
            v.clone(),
        );

        u.invoke((1,));
        optuple.reset();
        v.invoke(("hi".to_string(),));
        assert!(fired.borrow().is_empty());
    }

    #[test]
    fn three_way_join_fires_with_all_latest_values() {
        let reg = Registrar::new("sim");
        let a: ChannelInterface<(i32,), ()> = reg.lookup("a", "");
        let b: ChannelInterface<(i32,), ()> = reg.lookup("b", "");
        let c: ChannelInterface<(i32,), ()> = reg.lookup("c", "");

        let fired = Rc::new(RefCell::new(Vec::new()));
        let f = fired.clone();
        let _optuple =
            merge3::<i32, i32, i32, _, fn()>(move |x, y, z| f.borrow_mut().push((x, y, z)), None, a.clone(), b.clone(), c.clone());

        a.invoke((1,));
        b.invoke((2,));
        assert!(fired.borrow().is_empty());
        c.invoke((3,));
        assert_eq!(*fired.borrow(), vec![(1, 2, 3)]);
    }

    #[test]
    fn general_merge_joins_a_multi_parameter_channel_with_two_others() {
        let reg = Registrar::new("sim");
        let a: ChannelInterface<(i32,), ()> = reg.lookup("a", "");
        let bc: ChannelInterface<(i32, String), ()> = reg.lookup("bc", "");

        let fired = Rc::new(RefCell::new(Vec::new()));
        let f = fired.clone();
        let _optuple = merge(
            move |vals: &[DynValue]| {
                f.borrow_mut().push(vals.to_vec());
            },
            None::<fn()>,
            vec![a.clone().into_joinable(), bc.clone().into_joinable()],
        );

        a.invoke((1,));
        assert!(fired.borrow().is_empty());

        bc.invoke((2, "hi".to_string()));
        assert_eq!(
            *fired.borrow(),
            vec![vec![
                DynValue::Int(1),
                DynValue::Int(2),
                DynValue::Str("hi".to_string()),
            ]]
        );
    }

    #[test]
    #[should_panic(expected = "optuple supports 1 to 64 channels")]
    fn merge_with_no_channels_is_fatal() {
        let _optuple = merge(|_vals: &[DynValue]| {}, None::<fn()>, Vec::new());
    }
}
