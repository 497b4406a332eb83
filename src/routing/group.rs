//! Construction-time route groups.
//!
//! A group only carries a path prefix while routes are being registered;
//! every route lands in the flat [`RouteTable`] under the joined path and
//! nothing about the group survives into request handling.

use super::pattern::join_paths;
use super::table::{RouteTable, TrailingSlash};
use crate::errors::RouteError;
use crate::http::Handler;
use axum::http::Method;
use std::sync::Arc;

pub struct RouteGroup<'t> {
    table: &'t mut RouteTable,
    prefix: String,
}

impl<'t> RouteGroup<'t> {
    pub(crate) fn new(table: &'t mut RouteTable, prefix: &str) -> Self {
        Self {
            table,
            prefix: join_paths("", prefix),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Nested scope; borrows this group until it is dropped.
    pub fn group(&mut self, suffix: &str) -> RouteGroup<'_> {
        let prefix = join_paths(&self.prefix, suffix);
        RouteGroup {
            table: &mut *self.table,
            prefix,
        }
    }

    pub fn route<H: Handler>(
        &mut self,
        method: Method,
        suffix: &str,
        handler: H,
    ) -> Result<&mut Self, RouteError> {
        let path = join_paths(&self.prefix, suffix);
        self.table.register(method, &path, handler)?;
        Ok(self)
    }

    pub fn route_with(
        &mut self,
        method: Method,
        suffix: &str,
        trailing_slash: TrailingSlash,
        handler: Arc<dyn Handler>,
    ) -> Result<&mut Self, RouteError> {
        let path = join_paths(&self.prefix, suffix);
        self.table
            .register_with(method, &path, trailing_slash, handler)?;
        Ok(self)
    }

    pub fn get<H: Handler>(&mut self, suffix: &str, handler: H) -> Result<&mut Self, RouteError> {
        self.route(Method::GET, suffix, handler)
    }

    pub fn post<H: Handler>(&mut self, suffix: &str, handler: H) -> Result<&mut Self, RouteError> {
        self.route(Method::POST, suffix, handler)
    }

    pub fn put<H: Handler>(&mut self, suffix: &str, handler: H) -> Result<&mut Self, RouteError> {
        self.route(Method::PUT, suffix, handler)
    }

    pub fn delete<H: Handler>(
        &mut self,
        suffix: &str,
        handler: H,
    ) -> Result<&mut Self, RouteError> {
        self.route(Method::DELETE, suffix, handler)
    }
}
