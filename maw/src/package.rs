//! Handling of source bundles: extraction under strict layout rules and builds of the
//! extracted source directory.
pub mod builder;
pub mod name;
pub mod source_bundle;
