//! The dynamic (scripting-facing) value protocol.
//!
//! The core never embeds a scripting runtime — that is deliberately out of
//! scope (see the crate docs). Instead it exposes [`invoke_dynamic`] and
//! [`subscribe_dynamic`] on every channel, built on top of `DynValue`: a
//! small, closed set of dynamically-typed values plus an escape hatch for
//! anything else via `Box<dyn Any>`. A real embedding (Lua, a WASM guest, a
//! JSON-RPC peer) supplies its own marshaling down to `DynValue` and is then
//! indistinguishable, from the channel's point of view, from a native
//! subscriber.
//!
//! [`invoke_dynamic`]: crate::registrar::Registrar::invoke_dynamic
//! [`subscribe_dynamic`]: crate::registrar::Registrar::subscribe_dynamic

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::error::{ConduitError, ConduitResult};

/// A dynamically-typed value crossing the native/scripting boundary.
#[derive(Clone)]
pub enum DynValue {
    Unit,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Escape hatch for values with no dynamic representation above;
    /// carries the original value behind a type-erased, reference-counted
    /// pointer so dynamic subscribers can still pass it through untouched.
    Any(Rc<dyn Any>),
}

impl PartialEq for DynValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DynValue::Unit, DynValue::Unit) => true,
            (DynValue::Bool(a), DynValue::Bool(b)) => a == b,
            (DynValue::Int(a), DynValue::Int(b)) => a == b,
            (DynValue::Float(a), DynValue::Float(b)) => a == b,
            (DynValue::Str(a), DynValue::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for DynValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DynValue::Unit => write!(f, "()"),
            DynValue::Bool(b) => write!(f, "{b}"),
            DynValue::Int(i) => write!(f, "{i}"),
            DynValue::Float(x) => write!(f, "{x}"),
            DynValue::Str(s) => write!(f, "{s:?}"),
            DynValue::Any(_) => write!(f, "<opaque>"),
        }
    }
}

/// Converts a concrete value into its [`DynValue`] representation, for
/// handing a native argument to a dynamically-typed subscriber.
pub trait IntoDynValue {
    fn into_dyn_value(&self) -> DynValue;
}

/// Converts a [`DynValue`] back into a concrete type, for accepting an
/// argument from a dynamic caller (a scripting collaborator).
pub trait FromDynValue: Sized {
    fn from_dyn_value(v: &DynValue) -> Result<Self, String>;
}

macro_rules! impl_dyn_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl IntoDynValue for $t {
                fn into_dyn_value(&self) -> DynValue { DynValue::Int(*self as i64) }
            }
            impl FromDynValue for $t {
                fn from_dyn_value(v: &DynValue) -> Result<Self, String> {
                    match v {
                        DynValue::Int(i) => Ok(*i as $t),
                        other => Err(format!("expected an integer, got {other:?}")),
                    }
                }
            }
        )*
    };
}
impl_dyn_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! impl_dyn_float {
    ($($t:ty),* $(,)?) => {
        $(
            impl IntoDynValue for $t {
                fn into_dyn_value(&self) -> DynValue { DynValue::Float(*self as f64) }
            }
            impl FromDynValue for $t {
                fn from_dyn_value(v: &DynValue) -> Result<Self, String> {
                    match v {
                        DynValue::Float(x) => Ok(*x as $t),
                        DynValue::Int(i) => Ok(*i as $t),
                        other => Err(format!("expected a float, got {other:?}")),
                    }
                }
            }
        )*
    };
}
impl_dyn_float!(f32, f64);

impl IntoDynValue for bool {
    fn into_dyn_value(&self) -> DynValue {
        DynValue::Bool(*self)
    }
}
impl FromDynValue for bool {
    fn from_dyn_value(v: &DynValue) -> Result<Self, String> {
        match v {
            DynValue::Bool(b) => Ok(*b),
            other => Err(format!("expected a bool, got {other:?}")),
        }
    }
}

impl IntoDynValue for String {
    fn into_dyn_value(&self) -> DynValue {
        DynValue::Str(self.clone())
    }
}
impl FromDynValue for String {
    fn from_dyn_value(v: &DynValue) -> Result<Self, String> {
        match v {
            DynValue::Str(s) => Ok(s.clone()),
            other => Err(format!("expected a string, got {other:?}")),
        }
    }
}

impl IntoDynValue for () {
    fn into_dyn_value(&self) -> DynValue {
        DynValue::Unit
    }
}
impl FromDynValue for () {
    fn from_dyn_value(_v: &DynValue) -> Result<Self, String> {
        Ok(())
    }
}

/// Converts a channel's argument tuple to and from a flat `DynValue` list,
/// so the registrar's type-erased surface can marshal calls without
/// knowing the concrete argument types.
pub trait DynArgs: Sized {
    fn into_dyn_args(&self) -> Vec<DynValue>;
    fn from_dyn_args(channel: &str, args: &[DynValue]) -> ConduitResult<Self>;
}

fn arity_check(channel: &str, expected: usize, got: usize) -> ConduitResult<()> {
    if expected != got {
        return Err(ConduitError::ArityMismatch {
            channel: channel.to_string(),
            expected,
            got,
        });
    }
    Ok(())
}

fn convert<T: FromDynValue>(channel: &str, index: usize, v: &DynValue) -> ConduitResult<T> {
    T::from_dyn_value(v).map_err(|reason| ConduitError::ConversionFailure {
        channel: channel.to_string(),
        index,
        reason,
    })
}

impl DynArgs for () {
    fn into_dyn_args(&self) -> Vec<DynValue> {
        Vec::new()
    }
    fn from_dyn_args(channel: &str, args: &[DynValue]) -> ConduitResult<Self> {
        arity_check(channel, 0, args.len())?;
        Ok(())
    }
}

macro_rules! impl_dyn_args_tuple {
    ($n:expr; $($idx:tt : $t:ident),+) => {
        impl<$($t: IntoDynValue + FromDynValue),+> DynArgs for ($($t,)+) {
            fn into_dyn_args(&self) -> Vec<DynValue> {
                vec![$(self.$idx.into_dyn_value()),+]
            }
            fn from_dyn_args(channel: &str, args: &[DynValue]) -> ConduitResult<Self> {
                arity_check(channel, $n, args.len())?;
                Ok(($(convert::<$t>(channel, $idx, &args[$idx])?,)+))
            }
        }
    };
}

impl_dyn_args_tuple!(1; 0: A);
impl_dyn_args_tuple!(2; 0: A, 1: B);
impl_dyn_args_tuple!(3; 0: A, 1: B, 2: C);
impl_dyn_args_tuple!(4; 0: A, 1: B, 2: C, 3: D);
