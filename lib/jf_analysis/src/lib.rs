//! This crate provides the dataflow inference substrate of the `jflow`
//! project: a generic fixpoint engine, value numbering, type qualifier
//! inference, null value analysis and return path analysis.

pub mod annotations;
pub mod assertions;
pub mod config;
pub mod context;
pub mod controlflow;
pub mod dataflow;
pub mod driver;
pub mod errors;
pub mod fields;
pub mod frame;
pub mod hierarchy;
pub mod npe;
pub mod repo;
pub mod returnpath;
pub mod summary;
pub mod typequal;
pub mod vna;

#[cfg(test)]
mod testing;

