//! Capability descriptors and negotiation
//!
//! A [`Caps`] is an ordered list of [`Structure`] descriptors published by a
//! pad. Descriptors are immutable once published; negotiation walks the
//! upstream list in declared order and picks the first descriptor the
//! downstream side can also accept.

use serde::{Deserialize, Serialize};

use crate::domain::object::Handle;

/// Media type string for raw audio descriptors.
pub const MEDIA_AUDIO_RAW: &str = "audio/raw";
/// Media type string for raw video descriptors.
pub const MEDIA_VIDEO_RAW: &str = "video/raw";

/// A typed field value inside a [`Structure`].
///
/// Ranges and lists describe what a pad *could* accept; fixed values are
/// what a negotiated link actually carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Int(i32),
    UInt(u32),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Str(String),
    IntRange { min: i32, max: i32 },
    List(Vec<Value>),
}

impl Value {
    /// Intersect two field values, preferring a fixed result.
    ///
    /// Returns `None` when the values have no common point.
    fn intersect(&self, other: &Value) -> Option<Value> {
        use Value::*;
        match (self, other) {
            (a, b) if a == b => Some(a.clone()),
            (Int(v), IntRange { min, max }) | (IntRange { min, max }, Int(v)) => {
                (*min <= *v && *v <= *max).then(|| Int(*v))
            }
            (IntRange { min: a0, max: a1 }, IntRange { min: b0, max: b1 }) => {
                let min = (*a0).max(*b0);
                let max = (*a1).min(*b1);
                if min > max {
                    None
                } else if min == max {
                    Some(Int(min))
                } else {
                    Some(IntRange { min, max })
                }
            }
            (List(items), b) => items.iter().find_map(|a| a.intersect(b)),
            (a, List(items)) => items.iter().find_map(|b| a.intersect(b)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }
}

/// A named descriptor: a media type plus an ordered set of typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    name: String,
    fields: Vec<(String, Value)>,
}

impl Structure {
    pub fn new(name: impl Into<String>) -> Self {
        Structure {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style field append. Re-setting an existing field replaces it.
    pub fn field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if let Some(slot) = self.fields.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.fields.push((key, value));
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(Value::as_int)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Intersect two descriptors.
    ///
    /// The media types must match and every field present on both sides
    /// must have a common point; fields present on one side only are
    /// carried through unchanged.
    pub fn intersect(&self, other: &Structure) -> Option<Structure> {
        if self.name != other.name {
            return None;
        }
        let mut out = Structure::new(self.name.clone());
        for (key, value) in &self.fields {
            match other.get(key) {
                Some(theirs) => out.set(key.clone(), value.intersect(theirs)?),
                None => out.set(key.clone(), value.clone()),
            }
        }
        for (key, value) in &other.fields {
            if out.get(key).is_none() {
                out.set(key.clone(), value.clone());
            }
        }
        Some(out)
    }

    /// A descriptor with no ranges or lists left.
    pub fn is_fixed(&self) -> bool {
        self.fields
            .iter()
            .all(|(_, v)| !matches!(v, Value::IntRange { .. } | Value::List(_)))
    }
}

/// Immutable payload behind a [`Caps`] handle.
pub struct CapsObject {
    any: bool,
    structures: Vec<Structure>,
}

/// An ordered, reference-counted capability set.
///
/// Cloning a `Caps` bumps the native reference count; the descriptor list
/// itself is immutable once published.
#[derive(Clone, PartialEq, Default)]
pub struct Caps {
    handle: Handle<CapsObject>,
}

impl Caps {
    /// Caps that accept anything; intersecting with them yields the peer.
    pub fn any() -> Self {
        Caps {
            handle: Handle::alloc(CapsObject {
                any: true,
                structures: Vec::new(),
            }),
        }
    }

    pub fn from_structures(structures: Vec<Structure>) -> Self {
        Caps {
            handle: Handle::alloc(CapsObject {
                any: false,
                structures,
            }),
        }
    }

    pub fn from_structure(structure: Structure) -> Self {
        Caps::from_structures(vec![structure])
    }

    /// The empty (unset) caps; negotiates with nothing.
    pub fn none() -> Self {
        Caps {
            handle: Handle::null(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.handle.is_null()
    }

    pub fn is_any(&self) -> bool {
        self.handle.get().map(|c| c.any).unwrap_or(false)
    }

    pub fn size(&self) -> usize {
        self.handle.get().map(|c| c.structures.len()).unwrap_or(0)
    }

    pub fn at(&self, index: usize) -> Option<&Structure> {
        self.handle.get().and_then(|c| c.structures.get(index))
    }

    pub fn structures(&self) -> &[Structure] {
        self.handle.get().map(|c| c.structures.as_slice()).unwrap_or(&[])
    }

    pub fn ref_count(&self) -> usize {
        self.handle.ref_count()
    }

    /// First-match negotiation.
    ///
    /// Walks this side's descriptors in declared order and returns a caps
    /// holding the first descriptor the other side also accepts, or `None`
    /// when nothing is mutually acceptable.
    pub fn intersect_first(&self, other: &Caps) -> Option<Caps> {
        if self.is_null() || other.is_null() {
            return None;
        }
        if self.is_any() {
            return Some(other.clone());
        }
        if other.is_any() {
            return Some(self.clone());
        }
        for ours in self.structures() {
            for theirs in other.structures() {
                if let Some(merged) = ours.intersect(theirs) {
                    return Some(Caps::from_structure(merged));
                }
            }
        }
        None
    }
}

impl std::fmt::Debug for Caps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            return write!(f, "Caps(none)");
        }
        if self.is_any() {
            return write!(f, "Caps(any)");
        }
        write!(f, "Caps[")?;
        for (i, s) in self.structures().iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", s.name())?;
            for (k, v) in s.fields() {
                write!(f, " {k}={v:?}")?;
            }
        }
        write!(f, "]")
    }
}

/// A raw-audio descriptor with the engine's default field layout.
pub fn audio_structure(format: &str, rate: Value, channels: Value) -> Structure {
    Structure::new(MEDIA_AUDIO_RAW)
        .field("format", Value::Str(format.to_string()))
        .field("rate", rate)
        .field("channels", channels)
}
