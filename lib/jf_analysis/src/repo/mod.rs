//! Class repository: registered classes, method and field resolution.

mod field;
mod method;
mod repository;

pub use field::{FieldInfo, FieldKey};
pub use method::{Method, MethodKey};
pub use repository::Repo;
