//! Small shared helpers.

pub mod lock;
