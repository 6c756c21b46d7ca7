//! This crate defines [structs for the on-disk minidump format](format/index.html), a
//! [reader for variable-shape records](layout/index.html) such as CPU contexts, and
//! [some common traits](traits/index.html) used by related crates.
//!
//! You probably don't want to use this crate directly, the `grokdump` crate provides
//! the actual functionality of inspecting minidumps using the types defined here.

pub mod format;
pub mod layout;
pub mod traits;
