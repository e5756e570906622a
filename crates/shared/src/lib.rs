//! Domain and wire types shared between the collation client and its front-ends.

pub mod domain;
pub mod error;
pub mod protocol;
