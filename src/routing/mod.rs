//! Routing subsystem.
//!
//! ```text
//! startup:  RouteTable::group("api") → RouteGroup::get/post(...) → flat RouteTable
//! request:  RouteTable::lookup(method, path)
//!               → Ok(RouteMatch { handler, params, route })
//!               → Err(NotFound) | Err(MethodNotAllowed { allowed })
//! ```
//!
//! The table is built once before serving and only read afterwards, so it is
//! shared behind an `Arc` without locking.

pub mod group;
pub mod pattern;
pub mod table;

pub use group::RouteGroup;
pub use pattern::{PathPattern, Segment};
pub use table::{Params, RouteMatch, RouteTable, TrailingSlash};
