pub mod description;
pub mod fields;
pub mod listing;

#[cfg(test)]
pub mod fixtures;

pub use fields::{extract, FieldError};
