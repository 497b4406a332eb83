//! Middleware chain.
//!
//! Policies run in registration order, outermost first. A policy continues by
//! awaiting [`Next::run`] and stops by writing a response on the context and
//! returning without calling it. Policies that already started always get to
//! finish their post-processing, so outer layers observe the final status.
//!
//! Standard order:
//!
//! ```text
//! recovery → access_log → cors → ip_allow → route dispatch (handler)
//! ```

pub mod access_log;
pub mod cors;
pub mod ip_allow;
pub mod recovery;

pub use access_log::{AccessLog, AccessLogEntry, AccessLogger};
pub use cors::CorsPolicy;
pub use ip_allow::{AllowListError, IpAllowGuard, IpMatcher};
pub use recovery::{PanicRecovery, install_panic_hook};

use crate::http::RequestContext;
use futures_util::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// One policy in the chain.
pub trait Middleware: Send + Sync {
    /// Stable name, used for logging and for inspecting chain order.
    fn name(&self) -> &'static str;

    fn handle<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> BoxFuture<'a, ()>;
}

/// The innermost step the chain delegates to once every policy has passed.
pub trait Endpoint: Send + Sync {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ()>;
}

/// Remainder of the chain after the current policy.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub fn run<'b>(self, ctx: &'b mut RequestContext) -> BoxFuture<'b, ()>
    where
        'a: 'b,
    {
        match self.rest.split_first() {
            Some((policy, rest)) => policy.handle(
                ctx,
                Next {
                    rest,
                    endpoint: self.endpoint,
                },
            ),
            None => self.endpoint.call(ctx),
        }
    }
}

/// Ordered, immutable list of policies built once at startup.
#[derive(Clone, Default)]
pub struct Chain {
    policies: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    /// Policy names, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    pub fn execute<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        endpoint: &'a dyn Endpoint,
    ) -> BoxFuture<'a, ()> {
        Next {
            rest: &self.policies,
            endpoint,
        }
        .run(ctx)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[derive(Default)]
pub struct ChainBuilder {
    policies: Vec<Arc<dyn Middleware>>,
}

impl ChainBuilder {
    /// Append a policy inside every policy added before it.
    pub fn with(mut self, policy: impl Middleware + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn build(self) -> Chain {
        tracing::debug!(
            policies = ?self.policies.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Middleware chain built"
        );
        Chain {
            policies: self.policies,
        }
    }
}
