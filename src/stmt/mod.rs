//! Statement registry, prepared-statement cache and select templates.

pub mod cache;
pub mod registry;
pub mod template;

use std::fmt;

pub use cache::{PreparedStatement, StatementCache};
pub use registry::{StatementRegistry, StatementVariant, NUM_FILTERS};
pub use template::{Predicate, SelectTemplate, Selection};

/// Handle returned by registration. Only meaningful within one process run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatementCode(pub usize);

impl fmt::Display for StatementCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
