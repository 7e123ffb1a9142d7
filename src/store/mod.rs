//! In-memory property model.
//!
//! This module handles:
//! - The ordered entry collection and its modified flag
//! - Parsing from and serializing to `key=value` text

mod parse;
mod properties;

pub use parse::{split_line, ParseOptions};
pub use properties::{Entry, PropertyStore};
