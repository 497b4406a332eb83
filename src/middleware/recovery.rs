//! Panic recovery.
//!
//! Outermost policy. Every poll of the inner chain runs under
//! `catch_unwind`; a panic anywhere below becomes a generic 500 (or, when a
//! response was already started, a logged conflict) and the worker keeps
//! serving. This is the only place a fault is allowed to stop propagating.
//!
//! While a guarded poll is on the stack the process panic hook records the
//! panic location and backtrace instead of printing them, so the diagnostic
//! ends up in one structured log event.

use super::{Middleware, Next};
use crate::errors::AppError;
use crate::http::RequestContext;
use crate::metrics::SharedMetrics;
use axum::response::IntoResponse;
use futures_util::future::BoxFuture;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Once;
use std::task::{Context, Poll};
use tracing::error;

struct PanicSite {
    location: Option<String>,
    backtrace: Backtrace,
}

thread_local! {
    static GUARD_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_PANIC: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Install the process panic hook. Idempotent.
///
/// Panics outside a guarded poll still go to the previous hook.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if GUARD_DEPTH.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let site = PanicSite {
                location: info.location().map(|l| l.to_string()),
                backtrace: Backtrace::force_capture(),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(site));
        }));
    });
}

struct GuardScope;

impl GuardScope {
    fn enter() -> Self {
        GUARD_DEPTH.with(|d| d.set(d.get() + 1));
        GuardScope
    }
}

impl Drop for GuardScope {
    fn drop(&mut self) {
        GUARD_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Polls the inner future under `catch_unwind`, one guarded scope per poll.
/// The inner future is not polled again after it panicked.
struct Guarded<'a> {
    inner: BoxFuture<'a, ()>,
}

impl Future for Guarded<'_> {
    type Output = Result<(), Box<dyn Any + Send>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let _scope = GuardScope::enter();
        let inner = &mut self.inner;
        match panic::catch_unwind(AssertUnwindSafe(|| inner.as_mut().poll(cx))) {
            Ok(Poll::Pending) => Poll::Pending,
            Ok(Poll::Ready(())) => Poll::Ready(Ok(())),
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

/// Human-readable panic message from a payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

pub struct PanicRecovery {
    include_stack: bool,
    metrics: SharedMetrics,
}

impl PanicRecovery {
    pub fn new(include_stack: bool, metrics: SharedMetrics) -> Self {
        install_panic_hook();
        Self {
            include_stack,
            metrics,
        }
    }

    fn report(&self, ctx: &RequestContext, payload: &(dyn Any + Send)) {
        let message = panic_message(payload);
        let site = LAST_PANIC.with(|slot| slot.borrow_mut().take());
        let location = site
            .as_ref()
            .and_then(|s| s.location.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let stack = match (&site, self.include_stack) {
            (Some(site), true) => site.backtrace.to_string(),
            _ => String::new(),
        };

        if ctx.response_started() {
            error!(
                method = %ctx.method(),
                path = %ctx.path(),
                client_ip = %ctx.client_ip(),
                status = ctx.status().map(|s| s.as_u16()),
                panic = %message,
                location = %location,
                stack = %stack,
                "Panic after response was started; response left as written"
            );
        } else {
            error!(
                method = %ctx.method(),
                path = %ctx.path(),
                client_ip = %ctx.client_ip(),
                panic = %message,
                location = %location,
                stack = %stack,
                "Recovered from panic"
            );
        }
    }
}

impl Middleware for PanicRecovery {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn handle<'a>(&'a self, ctx: &'a mut RequestContext, next: Next<'a>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let outcome = Guarded {
                inner: next.run(ctx),
            }
            .await;

            let Err(payload) = outcome else {
                return;
            };

            self.metrics.http_panics_recovered_total.inc();
            self.report(ctx, payload.as_ref());

            if !ctx.response_started() {
                let response =
                    AppError::Internal(anyhow::anyhow!("handler panicked")).into_response();
                ctx.respond_or_report(response, self.name());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::middleware::{Chain, Endpoint};
    use axum::{
        body::Body,
        extract::Request,
        http::StatusCode,
    };
    use std::sync::Arc;

    fn explode(message: &str) {
        panic!("{message}");
    }

    struct Panics;

    impl Endpoint for Panics {
        fn call<'a>(&'a self, _ctx: &'a mut RequestContext) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                tokio::task::yield_now().await;
                explode("boom");
            })
        }
    }

    struct WritesThenPanics;

    impl Endpoint for WritesThenPanics {
        fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                ctx.respond_or_report(StatusCode::CREATED.into_response(), "test");
                explode("late boom");
            })
        }
    }

    struct Fine;

    impl Endpoint for Fine {
        fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                ctx.respond_or_report(StatusCode::OK.into_response(), "test");
            })
        }
    }

    fn context() -> RequestContext {
        let request = Request::builder().uri("/boom").body(Body::empty()).unwrap();
        RequestContext::new(request, "127.0.0.1".parse().unwrap())
    }

    fn chain(metrics: &SharedMetrics) -> Chain {
        Chain::builder()
            .with(PanicRecovery::new(true, metrics.clone()))
            .build()
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let metrics = Arc::new(Metrics::new());
        let chain = chain(&metrics);

        let mut ctx = context();
        chain.execute(&mut ctx, &Panics).await;

        assert_eq!(ctx.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(metrics.http_panics_recovered_total.get(), 1);

        // The same chain keeps serving.
        let mut ctx = context();
        chain.execute(&mut ctx, &Fine).await;
        assert_eq!(ctx.status(), Some(StatusCode::OK));
    }

    #[tokio::test]
    async fn test_panic_after_write_keeps_first_response() {
        let metrics = Arc::new(Metrics::new());
        let chain = chain(&metrics);

        let mut ctx = context();
        chain.execute(&mut ctx, &WritesThenPanics).await;

        assert_eq!(ctx.status(), Some(StatusCode::CREATED));
        assert_eq!(metrics.http_panics_recovered_total.get(), 1);
    }

    #[test]
    fn test_panic_message_payloads() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("static");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "static");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
