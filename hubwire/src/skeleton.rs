use std::{backtrace::Backtrace, future::Future, panic::AssertUnwindSafe, sync::Arc};

use dashmap::DashMap;
use foldhash::fast::RandomState;
use futures_util::{FutureExt, future::BoxFuture};

use crate::{
    Arguments, Codec, Message,
    error::{Error, ErrorKind, Result},
};

/// Type-erased method: decodes its own arguments and returns the encoded result.
pub type Method<C> =
    Arc<dyn Fn(Arguments<C>) -> BoxFuture<'static, Result<<C as Codec>::Value>> + Send + Sync>;

/// One callable method of a service.
pub struct MethodEntry<C: Codec> {
    pub name: String,
    pub arity: usize,
    pub method: Method<C>,
}

impl<C: Codec> MethodEntry<C> {
    pub fn new<F, Fut>(name: impl Into<String>, arity: usize, f: F) -> Self
    where
        F: Fn(Arguments<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C::Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            arity,
            method: Arc::new(move |args| f(args).boxed()),
        }
    }
}

impl<C: Codec> Clone for MethodEntry<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            arity: self.arity,
            method: self.method.clone(),
        }
    }
}

impl<C: Codec> std::fmt::Debug for MethodEntry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// An object that can be exposed as a hub.
///
/// Implemented by the `<Trait>Service` wrappers generated by
/// [`#[service]`](crate::service) and by [`ServiceBuilder`].
pub trait Service<C: Codec>: Send + Sync + 'static {
    /// Default hub name.
    fn name(&self) -> &str;

    fn methods(&self) -> Vec<MethodEntry<C>>;
}

/// Method table assembled by hand, for services that are not described by a
/// trait or that need several overloads of one name.
///
/// ```rust
/// # use hubwire::{JsonCodec, ServiceBuilder};
/// let service = ServiceBuilder::<JsonCodec>::new("Echo")
///     .method("echo", 1, |mut args| async move {
///         let text: String = args.next()?;
///         args.reply(&text)
///     });
/// ```
pub struct ServiceBuilder<C: Codec> {
    name: String,
    entries: Vec<MethodEntry<C>>,
}

impl<C: Codec> ServiceBuilder<C> {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn method<F, Fut>(mut self, name: impl Into<String>, arity: usize, f: F) -> Self
    where
        F: Fn(Arguments<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C::Value>> + Send + 'static,
    {
        self.entries.push(MethodEntry::new(name, arity, f));
        self
    }
}

impl<C: Codec> Service<C> for ServiceBuilder<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn methods(&self) -> Vec<MethodEntry<C>> {
        self.entries.clone()
    }
}

/// Server side of a hub: resolves method names and runs invocations.
pub struct Skeleton<C: Codec> {
    name: String,
    entries: Vec<MethodEntry<C>>,
    cache: DashMap<(String, usize), usize, RandomState>,
}

impl<C: Codec> Skeleton<C> {
    /// # Errors
    ///
    /// Returns [`ErrorKind::Configuration`] if two entries share a name
    /// (ignoring case) and an arity, since no request could tell them apart.
    pub fn new(name: String, entries: Vec<MethodEntry<C>>) -> Result<Self> {
        for (i, a) in entries.iter().enumerate() {
            if let Some(b) = entries[i + 1..]
                .iter()
                .find(|b| b.arity == a.arity && b.name.eq_ignore_ascii_case(&a.name))
            {
                return Err(Error::new(
                    ErrorKind::Configuration,
                    format!(
                        "{name}: methods {} and {} both take {} arguments",
                        a.name, b.name, a.arity
                    ),
                ));
            }
        }

        Ok(Self {
            name,
            entries,
            cache: DashMap::default(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn method_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Finds the entry a request for `method` with `arity` arguments targets.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::NoSuchMethod`] when nothing matches, or
    /// [`ErrorKind::ArgumentCountMismatch`] when the only method of that name
    /// takes a different number of arguments.
    pub fn resolve(&self, method: &str, arity: usize) -> Result<&MethodEntry<C>> {
        let key = (method.to_ascii_lowercase(), arity);
        if let Some(index) = self.cache.get(&key) {
            return Ok(&self.entries[*index]);
        }

        let candidates: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.name.eq_ignore_ascii_case(method))
            .map(|(i, _)| i)
            .collect();

        let index = match candidates.as_slice() {
            [] => {
                return Err(Error::new(
                    ErrorKind::NoSuchMethod,
                    format!("no such method: {}.{method}", self.name),
                ));
            }
            [index] => {
                let entry = &self.entries[*index];
                if entry.arity != arity {
                    return Err(Error::new(
                        ErrorKind::ArgumentCountMismatch,
                        format!(
                            "{}.{method} takes {} arguments, got {arity}",
                            self.name, entry.arity
                        ),
                    ));
                }
                *index
            }
            overloads => *overloads
                .iter()
                .find(|i| self.entries[**i].arity == arity)
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::NoSuchMethod,
                        format!("no overload of {}.{method} takes {arity} arguments", self.name),
                    )
                })?,
        };

        self.cache.insert(key, index);
        Ok(&self.entries[index])
    }

    /// Runs the request and builds the response to send back.
    ///
    /// Resolution failures, method errors and panics all become error
    /// responses carrying a trace.
    pub async fn invoke(&self, codec: Arc<C>, request: Message<C::Value>) -> Message<C::Value> {
        let Message {
            id,
            method,
            arguments,
            ..
        } = request;
        let outcome = self.execute(codec, &method, arguments.unwrap_or_default()).await;
        self.reply(id, &method, outcome)
    }

    /// Resolves `method` and runs it, turning a panic into
    /// [`ErrorKind::Remote`].
    ///
    /// # Errors
    ///
    /// Returns the resolution error, or whatever the method returned.
    pub async fn execute(
        &self,
        codec: Arc<C>,
        method: &str,
        arguments: Vec<C::Value>,
    ) -> Result<C::Value> {
        let call = async {
            let entry = self.resolve(method, arguments.len())?;
            (entry.method)(Arguments::new(codec, arguments)).await
        };
        AssertUnwindSafe(call)
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(Error::new(ErrorKind::Remote, format!("panicked: {reason}")))
            })
    }

    /// Builds the response message for the outcome of `method`.
    #[must_use]
    pub fn reply(&self, id: String, method: &str, outcome: Result<C::Value>) -> Message<C::Value> {
        match outcome {
            Ok(results) => Message::success(id, results),
            Err(err) => {
                tracing::debug!("{}.{method} failed: {err}", self.name);
                let trace = format!("{}.{method}\n{}", self.name, Backtrace::force_capture());
                Message::failure(id, err.wire_message(), Some(trace))
            }
        }
    }
}

impl<C: Codec> std::fmt::Debug for Skeleton<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skeleton")
            .field("name", &self.name)
            .field("entries", &self.entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArgWriter, JsonCodec};

    fn overloaded() -> Skeleton<JsonCodec> {
        let service = ServiceBuilder::<JsonCodec>::new("Math")
            .method("Sum", 2, |mut args| async move {
                let a: i64 = args.next()?;
                let b: i64 = args.next()?;
                args.reply(&(a + b))
            })
            .method("sum", 3, |mut args| async move {
                let a: i64 = args.next()?;
                let b: i64 = args.next()?;
                let c: i64 = args.next()?;
                args.reply(&(a + b + c))
            })
            .method("negate", 1, |mut args| async move {
                let a: i64 = args.next()?;
                args.reply(&-a)
            });
        Skeleton::new("Math".into(), service.methods()).unwrap()
    }

    fn request(method: &str, values: &[i64]) -> Message<<JsonCodec as Codec>::Value> {
        let mut writer = ArgWriter::new(Arc::new(JsonCodec));
        for v in values {
            writer.push(v).unwrap();
        }
        let mut msg = Message::request("Math", method, writer.into_values());
        msg.id = "B".into();
        msg
    }

    #[test]
    fn test_resolve() {
        let skeleton = overloaded();
        assert_eq!(skeleton.method_names(), ["Sum", "sum", "negate"]);

        assert_eq!(skeleton.resolve("SUM", 2).unwrap().name, "Sum");
        assert_eq!(skeleton.resolve("sum", 3).unwrap().name, "sum");
        assert_eq!(skeleton.resolve("Negate", 1).unwrap().name, "negate");
        // cached resolution gives the same answer.
        assert_eq!(skeleton.resolve("SUM", 2).unwrap().name, "Sum");

        let err = skeleton.resolve("sum", 1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchMethod);
        let err = skeleton.resolve("negate", 2).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ArgumentCountMismatch);
        let err = skeleton.resolve("doesNotExist", 0).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NoSuchMethod);
        assert!(err.msg.contains("doesNotExist"));
    }

    #[test]
    fn test_resolve_cache_ignores_case() {
        let skeleton = overloaded();
        for name in ["SUM", "sum", "Sum", "sUm"] {
            assert_eq!(skeleton.resolve(name, 2).unwrap().name, "Sum");
        }
        assert_eq!(skeleton.cache.len(), 1);
        assert_eq!(skeleton.resolve("SUM", 3).unwrap().name, "sum");
        assert_eq!(skeleton.cache.len(), 2);
        // failed lookups are not cached.
        assert!(skeleton.resolve("missing", 0).is_err());
        assert_eq!(skeleton.cache.len(), 2);
    }

    #[test]
    fn test_ambiguous_overloads() {
        let service = ServiceBuilder::<JsonCodec>::new("Math")
            .method("sum", 2, |args| async move { args.reply(&0) })
            .method("SUM", 2, |args| async move { args.reply(&1) });
        let err = Skeleton::new("Math".into(), service.methods()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_invoke() {
        let skeleton = overloaded();
        let codec = Arc::new(JsonCodec);

        let rsp = skeleton.invoke(codec.clone(), request("sum", &[1, 2, 3])).await;
        assert_eq!(rsp.id, "B");
        let sum: i64 = codec.from_value(rsp.into_outcome().unwrap().as_ref()).unwrap();
        assert_eq!(sum, 6);

        let rsp = skeleton.invoke(codec.clone(), request("nope", &[])).await;
        assert_eq!(rsp.error.as_deref(), Some("no such method: Math.nope"));
        assert!(rsp.stack_trace.unwrap().starts_with("Math.nope"));
    }

    #[tokio::test]
    async fn test_invoke_panic() {
        let service =
            ServiceBuilder::<JsonCodec>::new("Bad").method("explode", 0, |args| async move {
                if args.remaining() == 0 {
                    panic!("kaboom");
                }
                args.reply(&())
            });
        let skeleton = Skeleton::new("Bad".into(), service.methods()).unwrap();

        let mut msg = Message::request("Bad", "explode", vec![]);
        msg.id = "C".into();
        let rsp = skeleton.invoke(Arc::new(JsonCodec), msg).await;
        assert_eq!(rsp.id, "C");
        assert_eq!(rsp.error.as_deref(), Some("panicked: kaboom"));

        let err = skeleton
            .execute(Arc::new(JsonCodec), "explode", vec![])
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Remote);
    }
}
