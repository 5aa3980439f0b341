//! Row structs and DTOs.
//!
//! Each submodule contains a `FromRow` entity matching its table and, where
//! the pipeline inserts or patches rows, the `Create*` / update DTOs.

pub mod avatar;
pub mod build;
pub mod caption;
pub mod option;
pub mod owner;
pub mod project;
pub mod status;
