//! Process-wide isolation domains.
//!
//! Two ways to share one domain across a program:
//!
//! - [`global_domain!`](crate::global_domain) declares a marker type whose
//!   `shared()` returns a lazily created, never torn down domain.
//! - [`DomainRegistry`] is an ordinary value holding named domains. Create it
//!   once and pass it to whoever needs it, when ownership should stay visible.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::IsolationDomain;
use crate::tracing_compat::debug;

/// A marker type standing for one process-wide isolation domain.
///
/// Implemented by [`global_domain!`](crate::global_domain).
pub trait GlobalDomain: 'static {
    /// The isolated state.
    type State: Send + 'static;

    /// Returns the process-wide domain, creating it on first use.
    fn shared() -> &'static IsolationDomain<Self::State>;
}

/// Declares marker types for process-wide isolation domains.
///
/// ```ignore
/// taskweave::global_domain! {
///     /// Session bookkeeping shared by every request handler.
///     pub SessionActor: HashMap<u64, Session> = HashMap::new();
/// }
///
/// SessionActor::shared().run(&cx, |sessions| sessions.len()).await?;
/// ```
///
/// The initializer runs once, on first access, from whichever thread gets
/// there first.
#[macro_export]
macro_rules! global_domain {
    ($($(#[$meta:meta])* $vis:vis $name:ident : $state:ty = $init:expr;)+) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
            $vis struct $name;

            impl $crate::sync::GlobalDomain for $name {
                type State = $state;

                fn shared() -> &'static $crate::sync::IsolationDomain<$state> {
                    static DOMAIN: ::std::sync::OnceLock<$crate::sync::IsolationDomain<$state>> =
                        ::std::sync::OnceLock::new();
                    DOMAIN.get_or_init(|| {
                        $crate::sync::IsolationDomain::new($init).named(stringify!($name))
                    })
                }
            }

            impl $name {
                /// Returns the process-wide domain, creating it on first use.
                #[allow(dead_code)]
                pub fn shared() -> &'static $crate::sync::IsolationDomain<$state> {
                    <Self as $crate::sync::GlobalDomain>::shared()
                }
            }
        )+
    };
}

type AnyDomain = Arc<dyn Any + Send + Sync>;

/// Named isolation domains, created on demand and shared by name.
///
/// A name may hold one domain per state type; asking for the same name
/// with another type yields a different domain.
#[derive(Default)]
pub struct DomainRegistry {
    domains: Mutex<HashMap<(String, TypeId), AnyDomain>>,
}

impl DomainRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the domain registered under `name`, creating it with `init`
    /// if absent.
    ///
    /// `init` runs under the registry lock and must not call back into the
    /// registry.
    pub fn get_or_init<S, F>(&self, name: &str, init: F) -> Arc<IsolationDomain<S>>
    where
        S: Send + 'static,
        F: FnOnce() -> S,
    {
        let key = (name.to_owned(), TypeId::of::<S>());
        let mut domains = self.domains.lock();
        if let Some(found) = domains.get(&key).and_then(|d| Arc::clone(d).downcast().ok()) {
            return found;
        }
        debug!(domain = name, "domain created");
        let domain = Arc::new(IsolationDomain::new(init()).named(name.to_owned()));
        domains.insert(key, Arc::clone(&domain) as AnyDomain);
        domain
    }

    /// Returns the domain registered under `name` for state type `S`.
    #[must_use]
    pub fn get<S: Send + 'static>(&self, name: &str) -> Option<Arc<IsolationDomain<S>>> {
        let key = (name.to_owned(), TypeId::of::<S>());
        let domains = self.domains.lock();
        domains.get(&key).and_then(|d| Arc::clone(d).downcast().ok())
    }

    /// Number of registered domains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.lock().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.lock().is_empty()
    }
}

impl fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let domains = self.domains.lock();
        let mut names: Vec<&str> = domains.keys().map(|(name, _)| name.as_str()).collect();
        names.sort_unstable();
        f.debug_struct("DomainRegistry").field("names", &names).finish()
    }
}
