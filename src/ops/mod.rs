//! Operations across tree versions

mod diff;

pub use diff::{diff_roots, Diff, DiffEntry};
