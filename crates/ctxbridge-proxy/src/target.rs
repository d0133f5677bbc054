use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use ctxbridge_protocol::{Function, Value};
use futures_util::future::{BoxFuture, FutureExt};

use crate::error::ProxyError;
use crate::injector::Handle;

/// Failure raised by a provider method. Its `Display` text is what the
/// injector receives.
pub type MethodError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a provider method.
pub type MethodResult = std::result::Result<Value, MethodError>;

type MethodFn = dyn Fn(Vec<Value>) -> BoxFuture<'static, MethodResult> + Send + Sync;

/// A remotely callable member.
#[derive(Clone)]
pub struct Method(Arc<MethodFn>);

impl Method {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        Self(Arc::new(move |args| f(args).boxed()))
    }

    pub fn call(&self, args: Vec<Value>) -> BoxFuture<'static, MethodResult> {
        (self.0)(args)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Method({:p})", Arc::as_ptr(&self.0))
    }
}

/// One named entry of a [`Target`].
#[derive(Clone, Debug)]
pub enum Member {
    Method(Method),
    Object(Target),
    Property(Value),
}

#[derive(Clone)]
enum Repr {
    Members(Arc<BTreeMap<String, Member>>),
    Relay(Handle),
}

/// The object a provider exposes.
///
/// Either a tree of members built with [`Target::builder`], or a relay that
/// forwards every call to an injected [`Handle`]. Cloning is cheap and the
/// tree is immutable once built.
#[derive(Clone)]
pub struct Target {
    repr: Repr,
}

/// What a path resolved to.
pub(crate) enum Resolved {
    Method(Method),
    Function(Function),
    Relay(Handle, Vec<String>),
}

impl Target {
    pub fn builder() -> TargetBuilder {
        TargetBuilder::default()
    }

    /// A target with no members.
    pub fn empty() -> Self {
        TargetBuilder::default().build()
    }

    /// A target that forwards every call to `handle`, extending its path.
    pub fn relay(handle: Handle) -> Self {
        Self {
            repr: Repr::Relay(handle),
        }
    }

    /// The handle behind a relay target.
    pub fn as_relay(&self) -> Option<&Handle> {
        match &self.repr {
            Repr::Relay(handle) => Some(handle),
            Repr::Members(_) => None,
        }
    }

    /// Direct member lookup. Always `None` on a relay.
    pub fn get(&self, name: &str) -> Option<&Member> {
        match &self.repr {
            Repr::Members(members) => members.get(name),
            Repr::Relay(_) => None,
        }
    }

    /// Names of the direct members.
    pub fn member_names(&self) -> Vec<String> {
        match &self.repr {
            Repr::Members(members) => members.keys().cloned().collect(),
            Repr::Relay(_) => Vec::new(),
        }
    }

    /// Whether `path` names something on this target. Relays answer from
    /// the handle's own snapshot, if it has one.
    pub fn contains(&self, path: &[String]) -> bool {
        let Some((last, parents)) = path.split_last() else {
            return true;
        };

        let mut current = self.clone();
        for (index, name) in parents.iter().enumerate() {
            let next = match &current.repr {
                Repr::Relay(handle) => {
                    return handle.path(path[index..path.len() - 1].iter().cloned()).has(last)
                }
                Repr::Members(members) => match members.get(name) {
                    Some(Member::Object(target)) => target.clone(),
                    Some(Member::Property(value)) => {
                        return value_contains(value, &path[index + 1..]);
                    }
                    Some(Member::Method(_)) | None => return false,
                },
            };
            current = next;
        }

        match &current.repr {
            Repr::Relay(handle) => handle.has(last),
            Repr::Members(members) => members.contains_key(last),
        }
    }

    /// Look up the member at `path` by walking it one name at a time.
    pub(crate) fn resolve(&self, path: &[String]) -> Result<Resolved, ProxyError> {
        if path.is_empty() {
            return Err(ProxyError::EmptyPath);
        }

        let mut current = self.clone();
        for (index, name) in path.iter().enumerate() {
            let rest = &path[index + 1..];
            let next = match &current.repr {
                Repr::Relay(handle) => {
                    return Ok(Resolved::Relay(handle.clone(), path[index..].to_vec()));
                }
                Repr::Members(members) => match members.get(name) {
                    None => return Err(ProxyError::MemberNotFound(path.join("."))),
                    Some(Member::Method(method)) if rest.is_empty() => {
                        return Ok(Resolved::Method(method.clone()));
                    }
                    Some(Member::Method(_)) => {
                        return Err(ProxyError::MemberNotFound(path.join(".")));
                    }
                    Some(Member::Property(value)) => return resolve_value(value, rest, path),
                    Some(Member::Object(target)) => target.clone(),
                },
            };
            current = next;
        }

        Err(ProxyError::NotCallable(path.join(".")))
    }

    /// Invoke the member at `path` locally.
    pub async fn invoke(&self, path: &[String], args: Vec<Value>) -> MethodResult {
        match self.resolve(path)? {
            Resolved::Method(method) => method.call(args).await,
            Resolved::Function(function) => {
                function.call(args).await;
                Ok(Value::Null)
            }
            Resolved::Relay(handle, rest) => handle
                .path(rest)
                .call(args)
                .await
                .map_err(MethodError::from),
        }
    }
}

fn value_at(value: &Value, path: &[String]) -> Option<Value> {
    let mut current = value.clone();
    for name in path {
        let next = current.as_object()?.get(name)?;
        current = next;
    }
    Some(current)
}

fn value_contains(value: &Value, path: &[String]) -> bool {
    value_at(value, path).is_some()
}

fn resolve_value(value: &Value, rest: &[String], path: &[String]) -> Result<Resolved, ProxyError> {
    match value_at(value, rest) {
        Some(Value::Function(function)) => Ok(Resolved::Function(function)),
        Some(_) => Err(ProxyError::NotCallable(path.join("."))),
        None => Err(ProxyError::MemberNotFound(path.join("."))),
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Members(members) => f.debug_map().entries(members.iter()).finish(),
            Repr::Relay(handle) => f.debug_tuple("Relay").field(handle).finish(),
        }
    }
}

/// Builder for a member tree.
#[derive(Default)]
pub struct TargetBuilder {
    members: BTreeMap<String, Member>,
}

impl TargetBuilder {
    /// Add an async method.
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MethodResult> + Send + 'static,
    {
        self.members
            .insert(name.into(), Member::Method(Method::new(f)));
        self
    }

    /// Add a method that completes without suspending.
    pub fn sync_method<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> MethodResult + Send + Sync + 'static,
    {
        self.method(name, move |args| {
            let result = f(args);
            async move { result }
        })
    }

    /// Add a nested object.
    pub fn object(mut self, name: impl Into<String>, target: Target) -> Self {
        self.members.insert(name.into(), Member::Object(target));
        self
    }

    /// Add a plain value. Function values inside it stay callable.
    pub fn property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.members
            .insert(name.into(), Member::Property(value.into()));
        self
    }

    /// Add a member that forwards calls to an injected handle.
    pub fn relay(self, name: impl Into<String>, handle: Handle) -> Self {
        self.object(name, Target::relay(handle))
    }

    pub fn build(self) -> Target {
        Target {
            repr: Repr::Members(Arc::new(self.members)),
        }
    }
}
