use std::fmt;
use std::sync::{Arc, OnceLock};

use ctxbridge_adapter::Adapter;
use ctxbridge_protocol::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{ProxyError, Result};
use crate::injector::Handle;
use crate::options::Options;
use crate::provider;
use crate::target::Target;

type Factory = dyn Fn(Vec<Value>) -> Target + Send + Sync;

/// Define a proxy: a provider half that serves the target built by `factory`,
/// and an injector half that calls it remotely.
///
/// Options are validated here, before any channel is touched.
///
/// ```no_run
/// use ctxbridge_adapter::LoopbackAdapter;
/// use ctxbridge_protocol::Value;
/// use ctxbridge_proxy::{define_proxy, Options, Target};
///
/// # async fn run() -> ctxbridge_proxy::Result<()> {
/// let (provide, inject) = define_proxy(
///     |_args| {
///         Target::builder()
///             .sync_method("add", |args| {
///                 let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
///                 Ok(Value::from(sum))
///             })
///             .build()
///     },
///     Options::default(),
/// )?;
///
/// let (left, right) = LoopbackAdapter::pair();
/// provide.provide(left, Vec::new()).await?;
/// let counter = inject.inject(right);
/// let sum: i64 = counter
///     .member("add")
///     .call_as(vec![Value::from(1), Value::from(2)])
///     .await?;
/// assert_eq!(sum, 3);
/// # Ok(())
/// # }
/// ```
pub fn define_proxy<F>(factory: F, options: Options) -> Result<(Provide, Inject)>
where
    F: Fn(Vec<Value>) -> Target + Send + Sync + 'static,
{
    options.validate()?;
    let factory: Arc<Factory> = Arc::new(factory);
    Ok((
        Provide {
            factory: factory.clone(),
            options: options.clone(),
            target: Arc::new(OnceCell::new()),
        },
        Inject {
            factory,
            options,
            handle: Arc::new(OnceLock::new()),
        },
    ))
}

/// Provider half of a proxy definition.
#[derive(Clone)]
pub struct Provide {
    factory: Arc<Factory>,
    options: Options,
    target: Arc<OnceCell<Target>>,
}

impl Provide {
    /// Build the target from `args` and serve it on `adapter`.
    ///
    /// Only the first call builds and binds. Later calls, whatever their
    /// adapter or arguments, return the same target.
    pub async fn provide<A>(&self, adapter: A, args: Vec<Value>) -> Result<Target>
    where
        A: Adapter + 'static,
    {
        let target = self
            .target
            .get_or_try_init(|| async move {
                let target = (self.factory)(args);
                provider::bind(Arc::new(adapter), self.options.clone(), target.clone()).await?;
                debug!(namespace = %self.options.namespace, "target provided");
                Ok::<_, ProxyError>(target)
            })
            .await?;
        Ok(target.clone())
    }

    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl fmt::Debug for Provide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provide")
            .field("options", &self.options)
            .field("provided", &self.target.initialized())
            .finish()
    }
}

/// Injector half of a proxy definition.
#[derive(Clone)]
pub struct Inject {
    factory: Arc<Factory>,
    options: Options,
    handle: Arc<OnceLock<Handle>>,
}

impl Inject {
    /// The root handle for calls over `adapter`.
    ///
    /// Only the first call creates a handle. With `backup` set, the factory
    /// runs once here, without arguments, to build the membership snapshot.
    pub fn inject<A>(&self, adapter: A) -> Handle
    where
        A: Adapter + 'static,
    {
        self.handle
            .get_or_init(|| {
                let snapshot = self.options.backup.then(|| (self.factory)(Vec::new()));
                debug!(
                    namespace = %self.options.namespace,
                    backup = self.options.backup,
                    "handle injected"
                );
                Handle::new(Arc::new(adapter), self.options.clone(), snapshot)
            })
            .clone()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl fmt::Debug for Inject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inject")
            .field("options", &self.options)
            .field("injected", &self.handle.get().is_some())
            .finish()
    }
}
