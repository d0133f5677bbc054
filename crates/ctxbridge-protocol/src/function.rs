use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};

use crate::value::Value;

type Callable = dyn Fn(Vec<Value>) -> BoxFuture<'static, ()> + Send + Sync;

/// A callable value carried inside a payload.
///
/// On the injector side this wraps a local closure handed to a remote method.
/// On the provider side it is a stub that forwards its arguments back across
/// the channel. Either way the caller sees the same shape: positional
/// arguments in, nothing out.
#[derive(Clone)]
pub struct Function {
    inner: Arc<Callable>,
}

impl Function {
    /// Wrap a synchronous closure. The closure runs when [`Function::call`]
    /// is invoked, not when the returned future is polled.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(move |args| {
                f(args);
                future::ready(()).boxed()
            }),
        }
    }

    /// Wrap a closure returning a future.
    pub fn new_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |args| f(args).boxed()),
        }
    }

    /// Invoke the function with positional arguments.
    pub fn call(&self, args: Vec<Value>) -> BoxFuture<'static, ()> {
        (self.inner)(args)
    }

    /// Returns true if both handles wrap the same closure.
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({:p})", Arc::as_ptr(&self.inner))
    }
}
