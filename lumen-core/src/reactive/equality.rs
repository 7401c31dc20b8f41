//! Equality policies for signals and computeds.
//!
//! A write is only propagated when the policy says the new value differs
//! from the old one. The default policy is [`SameValue`]:
//!
//! - floats compare bitwise, except that every NaN equals every other NaN;
//!   `+0.0` and `-0.0` are therefore different values
//! - `Rc` and `Arc` compare by pointer identity, not by contents
//! - everything else compares structurally

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Identity-style equality used by default.
pub trait SameValue {
    fn same_value(&self, other: &Self) -> bool;
}

macro_rules! same_value_by_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SameValue for $ty {
                #[inline]
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

same_value_by_eq!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    String,
    str,
    serde_json::Value,
);

macro_rules! same_value_float {
    ($($ty:ty),*) => {
        $(
            impl SameValue for $ty {
                #[inline]
                fn same_value(&self, other: &Self) -> bool {
                    self.to_bits() == other.to_bits() || (self.is_nan() && other.is_nan())
                }
            }
        )*
    };
}

same_value_float!(f32, f64);

impl<T: SameValue + ?Sized> SameValue for &T {
    fn same_value(&self, other: &Self) -> bool {
        (**self).same_value(*other)
    }
}

impl<T: SameValue + ?Sized> SameValue for Box<T> {
    fn same_value(&self, other: &Self) -> bool {
        (**self).same_value(&**other)
    }
}

impl<T: SameValue> SameValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: SameValue> SameValue for [T] {
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_value(b))
    }
}

impl<T: SameValue> SameValue for Vec<T> {
    fn same_value(&self, other: &Self) -> bool {
        self.as_slice().same_value(other.as_slice())
    }
}

impl<T: ?Sized> SameValue for Rc<T> {
    fn same_value(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: ?Sized> SameValue for Arc<T> {
    fn same_value(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

macro_rules! same_value_tuple {
    ($(($($name:ident : $idx:tt),+)),*) => {
        $(
            impl<$($name: SameValue),+> SameValue for ($($name,)+) {
                fn same_value(&self, other: &Self) -> bool {
                    $(self.$idx.same_value(&other.$idx))&&+
                }
            }
        )*
    };
}

same_value_tuple!(
    (A: 0),
    (A: 0, B: 1),
    (A: 0, B: 1, C: 2),
    (A: 0, B: 1, C: 2, D: 3)
);

/// How a signal or computed decides whether a new value is a change.
pub enum EqualityPolicy<T> {
    /// A plain comparison function (the default wraps [`SameValue`]).
    Compare(fn(&T, &T) -> bool),
    /// An arbitrary comparison closure.
    Custom(Rc<dyn Fn(&T, &T) -> bool>),
    /// Every write is a change.
    Disabled,
}

impl<T> EqualityPolicy<T> {
    pub fn same_value() -> Self
    where
        T: SameValue,
    {
        EqualityPolicy::Compare(T::same_value)
    }

    pub fn partial_eq() -> Self
    where
        T: PartialEq,
    {
        EqualityPolicy::Compare(|a, b| a == b)
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        EqualityPolicy::Custom(Rc::new(f))
    }

    /// Whether `old` and `new` count as the same value.
    pub fn is_equal(&self, old: &T, new: &T) -> bool {
        match self {
            EqualityPolicy::Compare(f) => f(old, new),
            EqualityPolicy::Custom(f) => f(old, new),
            EqualityPolicy::Disabled => false,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, EqualityPolicy::Disabled)
    }
}

impl<T: SameValue> Default for EqualityPolicy<T> {
    fn default() -> Self {
        Self::same_value()
    }
}

impl<T> Clone for EqualityPolicy<T> {
    fn clone(&self) -> Self {
        match self {
            EqualityPolicy::Compare(f) => EqualityPolicy::Compare(*f),
            EqualityPolicy::Custom(f) => EqualityPolicy::Custom(Rc::clone(f)),
            EqualityPolicy::Disabled => EqualityPolicy::Disabled,
        }
    }
}

impl<T> fmt::Debug for EqualityPolicy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EqualityPolicy::Compare(_) => f.write_str("Compare"),
            EqualityPolicy::Custom(_) => f.write_str("Custom(..)"),
            EqualityPolicy::Disabled => f.write_str("Disabled"),
        }
    }
}
