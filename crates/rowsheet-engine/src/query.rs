//! Query specs: column filters and sort directives over body rows.
//!
//! A spec is a run of clauses, in any order, each of the form
//! `[-]"<column>":<directive>`:
//!
//! ```text
//! "Due":ASC   "Done":"はい"   -"Title":"draft"   "Title":/^cat/i
//! ```
//!
//! `ASC`/`DESC` sort, a quoted literal filters by case-insensitive equality,
//! `/pattern/flags` filters by regex, and a leading `-` negates a filter.
//! Anything that does not parse, names an unknown column, or carries an
//! invalid pattern is dropped so the rest of the view still renders.

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use crate::engine::{EvalContext, RowFields, resolve_property, stringify_formula_value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Clone, Debug)]
pub enum FilterPattern {
    Text(String),
    Regex {
        regex: Regex,
        source: String,
        flags: String,
    },
}

#[derive(Clone, Debug)]
pub struct Filter {
    pub column: String,
    pub pattern: FilterPattern,
    pub negated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sort {
    pub column: String,
    pub direction: SortDirection,
}

/// A parsed query spec.
#[derive(Clone, Debug, Default)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub sorts: Vec<Sort>,
}

/// A body row that survived filtering, with its index in the unfiltered body.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryRow {
    pub index: usize,
    pub fields: RowFields,
}

fn clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?x)
            (?P<neg>-)?
            "(?P<col>(?:[^"\\]|\\.)*)"
            \s*:\s*
            (?:
                (?P<dir>(?i:asc|desc))\b
              | "(?P<lit>(?:[^"\\]|\\.)*)"
              | /(?P<pat>(?:[^/\\]|\\.)+)/(?P<flags>[A-Za-z]*)
            )"#,
        )
        .unwrap()
    })
}

fn unescape_quoted(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn escape_quoted(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn build_regex(source: &str, flags: &str) -> Option<Regex> {
    let mut builder = RegexBuilder::new(source);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            // Global, unicode and sticky have no meaning for a single test.
            'g' | 'u' | 'y' => &mut builder,
            other => {
                tracing::debug!(flag = %other, "dropping regex filter with unknown flag");
                return None;
            }
        };
    }
    match builder.build() {
        Ok(regex) => Some(regex),
        Err(err) => {
            tracing::debug!(pattern = %source, %err, "dropping invalid regex filter");
            None
        }
    }
}

impl Query {
    /// Parse a spec. Never fails; unusable clauses are skipped.
    pub fn parse(spec: &str) -> Self {
        let mut query = Query::default();
        for caps in clause_re().captures_iter(spec) {
            let column = unescape_quoted(&caps["col"]);
            let negated = caps.name("neg").is_some();

            if let Some(dir) = caps.name("dir") {
                let direction = if dir.as_str().eq_ignore_ascii_case("desc") {
                    SortDirection::Desc
                } else {
                    SortDirection::Asc
                };
                query.sorts.push(Sort { column, direction });
                continue;
            }

            let pattern = if let Some(lit) = caps.name("lit") {
                FilterPattern::Text(unescape_quoted(lit.as_str()))
            } else {
                let source = caps["pat"].replace("\\/", "/");
                let flags = caps.name("flags").map_or("", |m| m.as_str()).to_string();
                let Some(regex) = build_regex(&source, &flags) else {
                    continue;
                };
                FilterPattern::Regex {
                    regex,
                    source,
                    flags,
                }
            };
            query.filters.push(Filter {
                column,
                pattern,
                negated,
            });
        }
        query
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.sorts.is_empty()
    }

    /// Canonical spec text: filters first, then sorts, space separated.
    pub fn to_spec(&self) -> String {
        let filters = self.filters.iter().map(|filter| {
            let neg = if filter.negated { "-" } else { "" };
            let directive = match &filter.pattern {
                FilterPattern::Text(text) => format!("\"{}\"", escape_quoted(text)),
                FilterPattern::Regex { source, flags, .. } => {
                    format!("/{}/{}", source.replace('/', "\\/"), flags)
                }
            };
            format!("{}\"{}\":{}", neg, escape_quoted(&filter.column), directive)
        });
        let sorts = self.sorts.iter().map(|sort| {
            let dir = match sort.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            format!("\"{}\":{}", escape_quoted(&sort.column), dir)
        });
        filters.chain(sorts).collect::<Vec<_>>().join(" ")
    }

    /// Filter then sort `rows`, keeping each row's original index.
    ///
    /// Column names resolve case-insensitively against `ctx.columns`; values
    /// resolve like `prop()` does, following formulas and date coercion.
    pub fn apply(&self, rows: &[RowFields], ctx: &EvalContext) -> Vec<QueryRow> {
        let filters: Vec<(&str, &Filter)> = self
            .filters
            .iter()
            .filter_map(|filter| known_column(ctx, &filter.column).map(|c| (c, filter)))
            .collect();
        let sorts: Vec<(&str, SortDirection)> = self
            .sorts
            .iter()
            .filter_map(|sort| known_column(ctx, &sort.column).map(|c| (c, sort.direction)))
            .collect();

        let mut kept: Vec<(QueryRow, Vec<String>)> = Vec::new();
        for (index, fields) in rows.iter().enumerate() {
            let row_ctx = ctx.clone().with_row(index, fields.clone());
            let passes = filters
                .iter()
                .all(|(column, filter)| filter_matches(filter, &resolved_text(column, &row_ctx)));
            if !passes {
                continue;
            }
            let keys = sorts
                .iter()
                .map(|(column, _)| resolved_text(column, &row_ctx))
                .collect();
            kept.push((
                QueryRow {
                    index,
                    fields: fields.clone(),
                },
                keys,
            ));
        }

        if !sorts.is_empty() {
            kept.sort_by(|(a, a_keys), (b, b_keys)| {
                for (idx, (_, direction)) in sorts.iter().enumerate() {
                    let ord = natural_cmp(&a_keys[idx], &b_keys[idx]);
                    let ord = match direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.index.cmp(&b.index)
            });
        }

        kept.into_iter().map(|(row, _)| row).collect()
    }
}

fn known_column<'a>(ctx: &'a EvalContext, name: &str) -> Option<&'a str> {
    let found = ctx.find_column(name);
    if found.is_none() {
        tracing::debug!(column = %name, "dropping query clause for unknown column");
    }
    found
}

fn resolved_text(column: &str, ctx: &EvalContext) -> String {
    resolve_property(column, ctx)
        .map(|value| stringify_formula_value(&value))
        .unwrap_or_default()
}

fn filter_matches(filter: &Filter, value: &str) -> bool {
    let matched = match &filter.pattern {
        FilterPattern::Text(text) => value.to_lowercase() == text.to_lowercase(),
        FilterPattern::Regex { regex, .. } => regex.is_match(value),
    };
    matched != filter.negated
}

/// Natural ordering: digit runs compare numerically, text compares
/// case-insensitively, so "2" < "10" and "a" == "A".
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a_chunks = Chunks::new(a);
    let mut b_chunks = Chunks::new(b);
    loop {
        match (a_chunks.next(), b_chunks.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x, y) {
                    (Chunk::Digits(x), Chunk::Digits(y)) => cmp_digits(x, y),
                    (Chunk::Digits(_), Chunk::Text(_)) => Ordering::Less,
                    (Chunk::Text(_), Chunk::Digits(_)) => Ordering::Greater,
                    (Chunk::Text(x), Chunk::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn cmp_digits(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

struct Chunks<'a> {
    rest: &'a str,
}

impl<'a> Chunks<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .rest
            .char_indices()
            .find(|(_, c)| c.is_ascii_digit() != digits)
            .map_or(self.rest.len(), |(idx, _)| idx);
        let (chunk, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(if digits {
            Chunk::Digits(chunk)
        } else {
            Chunk::Text(chunk)
        })
    }
}
