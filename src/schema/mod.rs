//! Input payload schema
//!
//! This module defines the typed sign-in interaction payload and the
//! declared shape that strict flattening validates records against.

mod input;
mod shape;

pub use input::*;
pub use shape::*;
