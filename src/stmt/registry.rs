//! Statement registry: statement code → SQL text and expected arity.
//!
//! Registration happens once during initialisation. The registry is an
//! explicit value handed to the cache and dispatcher, so independent stores
//! (e.g. in tests) never share codes.

use std::sync::Arc;

use tracing::error;

use crate::errors::{DbError, Result};
use crate::filter::Shape;
use crate::stmt::template::{placeholders, SelectTemplate, Selection};
use crate::stmt::StatementCode;

/// Token replaced by a fixed-width parameter list at registration time.
pub const NUM_FILTERS: &str = "{num_filters}";

/// Template and shape a select statement was rendered from.
#[derive(Debug, Clone)]
pub(crate) struct SelectSource {
    pub(crate) template: Arc<SelectTemplate>,
    pub(crate) shape: Shape,
}

#[derive(Debug, Clone)]
pub struct StatementVariant {
    pub code: StatementCode,
    pub sql: Arc<str>,
    pub arity: usize,
    pub(crate) source: Option<SelectSource>,
}

impl StatementVariant {
    pub(crate) fn template(&self) -> Option<&SelectSource> {
        self.source.as_ref()
    }
}

#[derive(Debug, Default)]
pub struct StatementRegistry {
    variants: Vec<StatementVariant>,
}

impl StatementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a SQL statement and return its code.
    ///
    /// With `num_filters = Some(k)`, every `{num_filters}` token in `sql` is
    /// replaced by `k` positional parameters.
    pub fn register(&mut self, sql: &str, num_filters: Option<usize>) -> StatementCode {
        let sql = match num_filters {
            Some(width) => sql.replace(NUM_FILTERS, &placeholders(width)),
            None => sql.to_string(),
        };
        let arity = count_placeholders(&sql);
        self.push(sql.trim().to_string(), arity, None)
    }

    /// Register the equality form of `template` for `shape`.
    pub fn register_select(
        &mut self,
        template: &Arc<SelectTemplate>,
        shape: Shape,
    ) -> StatementCode {
        let selection = if shape.is_empty() {
            Selection::All
        } else {
            Selection::Eq(shape)
        };
        let sql = template.render(selection);
        let arity = template.arity(selection);
        self.push(
            sql,
            arity,
            Some(SelectSource {
                template: Arc::clone(template),
                shape,
            }),
        )
    }

    /// Register a fixed fan-out form of `template`: each field of `shape`
    /// becomes an IN-list of exactly `width` parameters.
    pub fn register_fanout(
        &mut self,
        template: &Arc<SelectTemplate>,
        shape: Shape,
        width: usize,
    ) -> StatementCode {
        let text = template.render(Selection::Variadic(shape));
        self.register(&text, Some(width))
    }

    fn push(&mut self, sql: String, arity: usize, source: Option<SelectSource>) -> StatementCode {
        let code = StatementCode(self.variants.len());
        self.variants.push(StatementVariant {
            code,
            sql: Arc::from(sql),
            arity,
            source,
        });
        code
    }

    pub fn get(&self, code: StatementCode) -> Result<&StatementVariant> {
        self.variants.get(code.0).ok_or_else(|| {
            error!(code = %code, "no statement registered with code");
            DbError::UnregisteredStatement(code)
        })
    }

    /// Number of parameters the statement expects.
    pub fn num_filters(&self, code: StatementCode) -> Result<usize> {
        self.get(code).map(|v| v.arity)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StatementVariant> {
        self.variants.iter()
    }
}

/// Positional parameters in `sql`, ignoring quoted text and comments.
fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '?' => count += 1,
            '\'' | '"' | '`' => {
                // A doubled quote reopens the literal at once.
                for q in chars.by_ref() {
                    if q == c {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for q in chars.by_ref() {
                    if q == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for q in chars.by_ref() {
                    if prev == '*' && q == '/' {
                        break;
                    }
                    prev = q;
                }
            }
            _ => {}
        }
    }
    count
}
