use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Number;

use crate::error::{ProtocolError, Result};
use crate::function::Function;
use crate::transfer::{Endpoint, Transferable};

/// Dynamic payload value carried in message `args` and `data`.
///
/// Composite variants ([`Array`], [`Object`]) are shared handles: cloning
/// one clones the reference, so a payload can contain the same composite
/// twice or refer back to one of its ancestors.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Array),
    Object(Object),
    Transferable(Transferable),
    Function(Function),
}

/// Shared, growable list of values.
#[derive(Clone, Default)]
pub struct Array(Arc<RwLock<Vec<Value>>>);

/// Shared, string-keyed map of values.
#[derive(Clone, Default)]
pub struct Object(Arc<RwLock<BTreeMap<String, Value>>>);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn push(&self, value: impl Into<Value>) {
        write(&self.0).push(value.into());
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        read(&self.0).get(index).cloned()
    }

    pub fn len(&self) -> usize {
        read(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.0).is_empty()
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        read(&self.0).clone()
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<String, Value>) -> Self {
        Self(Arc::new(RwLock::new(map)))
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        write(&self.0).insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        read(&self.0).get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        read(&self.0).contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        write(&self.0).remove(key)
    }

    pub fn len(&self) -> usize {
        read(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.0).is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        read(&self.0).keys().cloned().collect()
    }

    pub fn values(&self) -> Vec<Value> {
        read(&self.0).values().cloned().collect()
    }

    /// Snapshot of the current entries.
    pub fn to_map(&self) -> BTreeMap<String, Value> {
        read(&self.0).clone()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl Value {
    /// Build an array value from anything convertible.
    pub fn array<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Value::Array(Array::from_vec(items.into_iter().map(Into::into).collect()))
    }

    /// Build an object value from key/value pairs.
    pub fn object<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Object(Object::from_map(
            entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        ))
    }

    /// Convert any serializable Rust value.
    pub fn from_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(serde_json::to_value(value)?.into())
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Transferable(transferable) => transferable.kind(),
            Value::Function(_) => "function",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(number) => number.as_i64(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Number(number) => number.as_u64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(number) => number.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_transferable(&self) -> Option<&Transferable> {
        match self {
            Value::Transferable(transferable) => Some(transferable),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Convert to JSON.
    ///
    /// Fails on functions, transferables and circular references. A
    /// composite that appears twice without forming a cycle is written twice.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut ancestors = HashSet::new();
        to_json_inner(self, &mut ancestors)
    }

    /// Deserialize into a concrete Rust type through its JSON form.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_json()?)?)
    }
}

fn to_json_inner(value: &Value, ancestors: &mut HashSet<usize>) -> Result<serde_json::Value> {
    match value {
        Value::Null => Ok(serde_json::Value::Null),
        Value::Bool(value) => Ok(serde_json::Value::Bool(*value)),
        Value::Number(number) => Ok(serde_json::Value::Number(number.clone())),
        Value::String(value) => Ok(serde_json::Value::String(value.clone())),
        Value::Array(array) => {
            let addr = array.addr();
            if !ancestors.insert(addr) {
                return Err(ProtocolError::Circular);
            }
            let items = array
                .to_vec()
                .iter()
                .map(|item| to_json_inner(item, ancestors))
                .collect::<Result<Vec<_>>>();
            ancestors.remove(&addr);
            Ok(serde_json::Value::Array(items?))
        }
        Value::Object(object) => {
            let addr = object.addr();
            if !ancestors.insert(addr) {
                return Err(ProtocolError::Circular);
            }
            let entries = object
                .to_map()
                .iter()
                .map(|(key, item)| Ok((key.clone(), to_json_inner(item, ancestors)?)))
                .collect::<Result<serde_json::Map<_, _>>>();
            ancestors.remove(&addr);
            Ok(serde_json::Value::Object(entries?))
        }
        Value::Transferable(_) | Value::Function(_) => {
            Err(ProtocolError::NotSerializable(value.kind()))
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(value) => Value::Bool(value),
            serde_json::Value::Number(number) => Value::Number(number),
            serde_json::Value::String(value) => Value::String(value),
            serde_json::Value::Array(items) => Value::array(items),
            serde_json::Value::Object(map) => Value::object(map),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Number(Number::from(value))
                }
            }
        )*
    };
}

from_integer!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl From<f64> for Value {
    /// Non-finite floats become `Null`, as in JSON.
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::from(f64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Array::from_vec(items))
    }
}

impl From<Array> for Value {
    fn from(array: Array) -> Self {
        Value::Array(array)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(Object::from_map(map))
    }
}

impl From<Transferable> for Value {
    fn from(transferable: Transferable) -> Self {
        Value::Transferable(transferable)
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Transferable(Transferable::Buffer(bytes))
    }
}

impl From<Endpoint> for Value {
    fn from(endpoint: Endpoint) -> Self {
        Value::Transferable(Transferable::Endpoint(endpoint))
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(function)
    }
}

impl PartialEq for Value {
    /// Structural equality. Composites short-circuit on identity; two
    /// distinct cyclic structures never compare equal in finite time, so
    /// compare those with [`Array::ptr_eq`]/[`Object::ptr_eq`] instead.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b) || a.to_vec() == b.to_vec(),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b) || a.to_map() == b.to_map(),
            (Value::Transferable(a), Value::Transferable(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ancestors = HashSet::new();
        debug_inner(self, f, &mut ancestors)
    }
}

fn debug_inner(
    value: &Value,
    f: &mut fmt::Formatter<'_>,
    ancestors: &mut HashSet<usize>,
) -> fmt::Result {
    match value {
        Value::Null => f.write_str("null"),
        Value::Bool(value) => write!(f, "{value}"),
        Value::Number(number) => write!(f, "{number}"),
        Value::String(value) => write!(f, "{value:?}"),
        Value::Array(array) => {
            if !ancestors.insert(array.addr()) {
                return f.write_str("[Circular]");
            }
            f.write_str("[")?;
            for (index, item) in array.to_vec().iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                debug_inner(item, f, ancestors)?;
            }
            ancestors.remove(&array.addr());
            f.write_str("]")
        }
        Value::Object(object) => {
            if !ancestors.insert(object.addr()) {
                return f.write_str("[Circular]");
            }
            f.write_str("{")?;
            for (index, (key, item)) in object.to_map().iter().enumerate() {
                if index > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key:?}: ")?;
                debug_inner(item, f, ancestors)?;
            }
            ancestors.remove(&object.addr());
            f.write_str("}")
        }
        Value::Transferable(transferable) => write!(f, "{transferable:?}"),
        Value::Function(function) => write!(f, "{function:?}"),
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Array(self.clone()), f)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&Value::Object(self.clone()), f)
    }
}
