//! Declarative routing: descriptor files and the record binder.

pub mod binder;
pub mod descriptor;

pub use binder::{bind, BindError, Binding, BindingSet, HttpMethod};
pub use descriptor::{load_dir, parse, Disposition, LoadedRouteFile, RouteRecord, SkipReason};
