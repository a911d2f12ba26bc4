//! Select templates with structurally tracked predicate slots.
//!
//! A template never rewrites SQL text: every WHERE clause is generated from
//! the predicate list, so an IN-list can only ever replace the predicate it
//! was generated for.

use crate::filter::Shape;
use crate::stmt::registry::NUM_FILTERS;

/// One filterable field and the column expression it constrains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub field: &'static str,
    pub column: String,
}

impl Predicate {
    pub fn new(field: &'static str, column: impl Into<String>) -> Self {
        Self {
            field,
            column: column.into(),
        }
    }
}

/// What a rendered statement selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// No WHERE clause.
    All,
    /// `column = ?` for every field in the shape.
    Eq(Shape),
    /// `rows` alternatives for the shape: `column IN (?, ...)` for a single
    /// field, `(a, b) IN (VALUES (?, ?), ...)` for several.
    In { shape: Shape, rows: usize },
    /// `column IN ({num_filters})`, expanded by the registry.
    Variadic(Shape),
}

#[derive(Debug, Clone)]
pub struct SelectTemplate {
    head: String,
    predicates: Vec<Predicate>,
    order_by: String,
}

impl SelectTemplate {
    /// `head` is the `SELECT ... FROM ...` part, `order_by` the column list
    /// after `ORDER BY`.
    pub fn new(
        head: impl Into<String>,
        predicates: Vec<Predicate>,
        order_by: impl Into<String>,
    ) -> Self {
        Self {
            head: head.into(),
            predicates,
            order_by: order_by.into(),
        }
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn fields(&self) -> Vec<&'static str> {
        self.predicates.iter().map(|p| p.field).collect()
    }

    /// Positional parameters the rendered selection expects. Variadic
    /// selections are sized by the registry, not the template.
    pub fn arity(&self, selection: Selection) -> usize {
        match selection {
            Selection::All | Selection::Variadic(_) => 0,
            Selection::Eq(shape) => shape.len(),
            Selection::In { shape, rows } => shape.len() * rows,
        }
    }

    pub fn render(&self, selection: Selection) -> String {
        let mut sql = self.head.trim().to_string();
        if let Some(clause) = self.where_clause(selection) {
            sql.push_str("\n  WHERE ");
            sql.push_str(&clause);
        }
        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order_by);
        }
        sql
    }

    fn columns(&self, shape: Shape) -> Vec<&str> {
        shape
            .indices()
            .filter_map(|i| self.predicates.get(i))
            .map(|p| p.column.as_str())
            .collect()
    }

    fn where_clause(&self, selection: Selection) -> Option<String> {
        match selection {
            Selection::All => None,
            Selection::Eq(shape) if shape.is_empty() => None,
            Selection::Eq(shape) => Some(
                self.columns(shape)
                    .iter()
                    .map(|c| format!("{c} = ?"))
                    .collect::<Vec<_>>()
                    .join(" AND "),
            ),
            Selection::In { shape, .. } if shape.is_empty() => None,
            Selection::In { shape, rows } => {
                let columns = self.columns(shape);
                let rows = rows.max(1);
                if columns.len() == 1 {
                    Some(format!("{} IN ({})", columns[0], placeholders(rows)))
                } else {
                    let tuple = format!("({})", placeholders(columns.len()));
                    let values = vec![tuple; rows].join(", ");
                    Some(format!("({}) IN (VALUES {values})", columns.join(", ")))
                }
            }
            Selection::Variadic(shape) => {
                let columns = self.columns(shape);
                Some(
                    columns
                        .iter()
                        .map(|c| format!("{c} IN ({NUM_FILTERS})"))
                        .collect::<Vec<_>>()
                        .join(" AND "),
                )
            }
        }
    }
}

/// `?, ?, ?` with `n` parameters.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n.max(1)].join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> SelectTemplate {
        SelectTemplate::new(
            "SELECT things.id, things.name FROM things",
            vec![
                Predicate::new("id", "things.id"),
                Predicate::new("name", "things.name"),
                Predicate::new("kind", "things.kind"),
            ],
            "things.name",
        )
    }

    #[test]
    fn test_render_all() {
        assert_eq!(
            template().render(Selection::All),
            "SELECT things.id, things.name FROM things ORDER BY things.name"
        );
    }

    #[test]
    fn test_render_eq_follows_field_order() {
        let shape = Shape::from_indices([2, 1]);
        let sql = template().render(Selection::Eq(shape));
        assert!(sql.contains("WHERE things.name = ? AND things.kind = ? ORDER BY"));
        assert_eq!(template().arity(Selection::Eq(shape)), 2);
    }

    #[test]
    fn test_render_single_field_in_list() {
        let sql = template().render(Selection::In {
            shape: Shape::from_indices([1]),
            rows: 3,
        });
        assert!(sql.contains("WHERE things.name IN (?, ?, ?) ORDER BY"));
    }

    #[test]
    fn test_render_row_value_in_list() {
        let shape = Shape::from_indices([0, 2]);
        let sql = template().render(Selection::In { shape, rows: 2 });
        assert!(sql.contains("WHERE (things.id, things.kind) IN (VALUES (?, ?), (?, ?))"));
        assert_eq!(template().arity(Selection::In { shape, rows: 2 }), 4);
    }

    #[test]
    fn test_name_substring_is_not_rewritten() {
        // "things.name" must not be confused with a column that merely
        // contains the same text.
        let t = SelectTemplate::new(
            "SELECT a.name, a.nickname FROM a",
            vec![
                Predicate::new("nickname", "a.nickname"),
                Predicate::new("name", "a.name"),
            ],
            "a.name",
        );
        let sql = t.render(Selection::In {
            shape: Shape::from_indices([1]),
            rows: 2,
        });
        assert!(sql.contains("WHERE a.name IN (?, ?)"));
        assert!(!sql.contains("a.nickname IN"));
    }

    #[test]
    fn test_render_variadic_slot() {
        let sql = template().render(Selection::Variadic(Shape::from_indices([2])));
        assert!(sql.contains("things.kind IN ({num_filters})"));
    }
}
