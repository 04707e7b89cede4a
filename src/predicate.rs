//! Row filter predicates for partial table copies.
//!
//! A predicate is a small boolean expression over a table's columns:
//!
//! ```text
//! session_date >= '2024-01-01' AND (subject_id IN (1, 2) OR notes IS NULL)
//! ```
//!
//! It is parsed up front, validated against the table's columns, and rendered
//! as parameterized SQL, so no operator-supplied text reaches the backend
//! verbatim.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map, opt, recognize},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, tuple},
};

use chrono::{NaiveDate, NaiveDateTime};

use crate::catalog::TableDescriptor;
use crate::dialect::Dialect;
use crate::error::{MigrateError, Result};
use crate::value::Value;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
}

impl CompareOp {
    fn sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Like => "LIKE",
        }
    }
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    IsNull {
        column: String,
        negated: bool,
    },
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    /// Parse a filter expression. The whole input must be consumed.
    pub fn parse(input: &str) -> Result<Self> {
        match parse_expr(input) {
            Ok((rest, pred)) => {
                let rest = rest.trim();
                if rest.is_empty() {
                    Ok(pred)
                } else {
                    Err(MigrateError::InvalidPredicate(format!(
                        "unexpected input near `{}`",
                        rest
                    )))
                }
            }
            Err(_) => Err(MigrateError::InvalidPredicate(format!(
                "cannot parse `{}`",
                input
            ))),
        }
    }

    /// Parse and validate against a table in one step.
    pub fn parse_for(input: &str, table: &TableDescriptor) -> Result<Self> {
        let pred = Self::parse(input)?;
        pred.validate(table)?;
        Ok(pred)
    }

    /// Column names referenced by this predicate.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Compare { column, .. }
            | Predicate::IsNull { column, .. }
            | Predicate::In { column, .. } => out.push(column.as_str()),
            Predicate::And(items) | Predicate::Or(items) => {
                for item in items {
                    item.collect_columns(out);
                }
            }
        }
    }

    /// Fail unless every referenced column exists in `table`.
    pub fn validate(&self, table: &TableDescriptor) -> Result<()> {
        let unknown: Vec<&str> = self
            .columns()
            .into_iter()
            .filter(|c| !table.has_column(c))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(MigrateError::InvalidPredicate(format!(
                "unknown column(s) {} in table `{}`",
                unknown.join(", "),
                table.name
            )))
        }
    }

    /// Render as a SQL fragment, appending bound literals to `params`.
    pub fn to_sql(&self, dialect: Dialect, table: &TableDescriptor, params: &mut Vec<Value>) -> String {
        match self {
            Predicate::Compare { column, op, value } => {
                let placeholder = push_param(dialect, table, column, value, params);
                format!("{} {} {}", dialect.quote_identifier(column), op.sql(), placeholder)
            }
            Predicate::IsNull { column, negated } => {
                let not = if *negated { " NOT" } else { "" };
                format!("{} IS{} NULL", dialect.quote_identifier(column), not)
            }
            Predicate::In {
                column,
                values,
                negated,
            } => {
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| push_param(dialect, table, column, v, params))
                    .collect();
                let not = if *negated { " NOT" } else { "" };
                format!(
                    "{}{} IN ({})",
                    dialect.quote_identifier(column),
                    not,
                    placeholders.join(", ")
                )
            }
            Predicate::And(items) => join_sql(items, " AND ", dialect, table, params),
            Predicate::Or(items) => join_sql(items, " OR ", dialect, table, params),
        }
    }

    /// Evaluate against a row laid out as `table.columns`.
    ///
    /// Comparisons involving NULL are false, as in SQL.
    pub fn evaluate(&self, table: &TableDescriptor, row: &[Value]) -> bool {
        let cell = |column: &str| table.column_index(column).and_then(|i| row.get(i));
        match self {
            Predicate::Compare { column, op, value } => match cell(column) {
                Some(actual) => compare(actual, *op, value),
                None => false,
            },
            Predicate::IsNull { column, negated } => {
                let is_null = cell(column).is_none_or(|v| v.is_null());
                is_null != *negated
            }
            Predicate::In {
                column,
                values,
                negated,
            } => match cell(column) {
                Some(actual) if !actual.is_null() => {
                    let found = values.iter().any(|v| compare(actual, CompareOp::Eq, v));
                    found != *negated
                }
                _ => false,
            },
            Predicate::And(items) => items.iter().all(|p| p.evaluate(table, row)),
            Predicate::Or(items) => items.iter().any(|p| p.evaluate(table, row)),
        }
    }
}

fn join_sql(
    items: &[Predicate],
    sep: &str,
    dialect: Dialect,
    table: &TableDescriptor,
    params: &mut Vec<Value>,
) -> String {
    let parts: Vec<String> = items
        .iter()
        .map(|p| format!("({})", p.to_sql(dialect, table, params)))
        .collect();
    parts.join(sep)
}

fn push_param(
    dialect: Dialect,
    table: &TableDescriptor,
    column: &str,
    value: &Value,
    params: &mut Vec<Value>,
) -> String {
    params.push(value.clone());
    let placeholder = dialect.placeholder(params.len());
    // Postgres will not compare a text parameter with a date or numeric column.
    match (dialect, value) {
        (Dialect::Postgresql, Value::Text(_)) => {
            let ty = table
                .columns
                .iter()
                .find(|c| c.name == column)
                .map(|c| c.column_type.as_str())
                .unwrap_or("text");
            if is_textual(ty) {
                placeholder
            } else {
                format!("CAST({} AS {})", placeholder, ty)
            }
        }
        _ => placeholder,
    }
}

fn is_textual(column_type: &str) -> bool {
    let ty = column_type.to_ascii_lowercase();
    ty.contains("char") || ty.contains("text") || ty.contains("enum")
}

fn compare(actual: &Value, op: CompareOp, literal: &Value) -> bool {
    if actual.is_null() || literal.is_null() {
        return false;
    }
    let literal = coerce_literal(literal, actual);
    if op == CompareOp::Like {
        return match (actual, &literal) {
            (Value::Text(s), Value::Text(pattern)) => like_match(s, pattern),
            _ => false,
        };
    }
    let ord = actual.total_cmp(&literal);
    match op {
        CompareOp::Eq => ord.is_eq(),
        CompareOp::Ne => ord.is_ne(),
        CompareOp::Gt => ord.is_gt(),
        CompareOp::Gte => ord.is_ge(),
        CompareOp::Lt => ord.is_lt(),
        CompareOp::Lte => ord.is_le(),
        CompareOp::Like => false,
    }
}

/// Interpret a text literal as a date when compared against a date column.
fn coerce_literal(literal: &Value, like: &Value) -> Value {
    match (literal, like) {
        (Value::Text(s), Value::Date(_)) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .map(Value::Date)
            .unwrap_or_else(|| literal.clone()),
        (Value::Text(s), Value::DateTime(_)) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
            .map(Value::DateTime)
            .unwrap_or_else(|| literal.clone()),
        _ => literal.clone(),
    }
}

/// SQL `LIKE` with `%` and `_` wildcards.
fn like_match(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    let (mut ti, mut pi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ti < t.len() {
        if pi < p.len() && (p[pi] == '_' || p[pi] == t[ti]) {
            ti += 1;
            pi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}

// --- parser ---

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    delimited(multispace0, inner, multispace0)
}

fn parse_expr(input: &str) -> IResult<&str, Predicate> {
    let (input, items) = separated_list1(keyword("OR"), parse_and)(input)?;
    Ok((input, flatten(items, Predicate::Or)))
}

fn parse_and(input: &str) -> IResult<&str, Predicate> {
    let (input, items) = separated_list1(keyword("AND"), parse_term)(input)?;
    Ok((input, flatten(items, Predicate::And)))
}

fn flatten(mut items: Vec<Predicate>, wrap: fn(Vec<Predicate>) -> Predicate) -> Predicate {
    if items.len() == 1 {
        items.remove(0)
    } else {
        wrap(items)
    }
}

/// A keyword surrounded by whitespace, e.g. ` AND `.
fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    delimited(multispace1, tag_no_case(word), multispace1)
}

fn parse_term(input: &str) -> IResult<&str, Predicate> {
    let (input, _) = multispace0(input)?;
    alt((
        delimited(char('('), ws(parse_expr), char(')')),
        parse_is_null,
        parse_in,
        parse_compare,
    ))(input)
}

fn parse_is_null(input: &str) -> IResult<&str, Predicate> {
    let (input, column) = parse_identifier(input)?;
    let (input, _) = tuple((multispace1, tag_no_case("IS"), multispace1))(input)?;
    let (input, negated) = opt(pair(tag_no_case("NOT"), multispace1))(input)?;
    let (input, _) = tag_no_case("NULL")(input)?;
    Ok((
        input,
        Predicate::IsNull {
            column,
            negated: negated.is_some(),
        },
    ))
}

fn parse_in(input: &str) -> IResult<&str, Predicate> {
    let (input, column) = parse_identifier(input)?;
    let (input, _) = multispace1(input)?;
    let (input, negated) = opt(pair(tag_no_case("NOT"), multispace1))(input)?;
    let (input, _) = tag_no_case("IN")(input)?;
    let (input, _) = multispace0(input)?;
    let (input, values) = delimited(
        char('('),
        separated_list1(ws(char(',')), ws(parse_literal)),
        char(')'),
    )(input)?;
    Ok((
        input,
        Predicate::In {
            column,
            values,
            negated: negated.is_some(),
        },
    ))
}

fn parse_compare(input: &str) -> IResult<&str, Predicate> {
    let (input, column) = parse_identifier(input)?;
    let (input, op) = ws(parse_operator)(input)?;
    let (input, value) = parse_literal(input)?;
    Ok((input, Predicate::Compare { column, op, value }))
}

fn parse_operator(input: &str) -> IResult<&str, CompareOp> {
    alt((
        map(tag(">="), |_| CompareOp::Gte),
        map(tag("<="), |_| CompareOp::Lte),
        map(tag("!="), |_| CompareOp::Ne),
        map(tag("<>"), |_| CompareOp::Ne),
        map(tag("="), |_| CompareOp::Eq),
        map(tag(">"), |_| CompareOp::Gt),
        map(tag("<"), |_| CompareOp::Lt),
        map(tag_no_case("LIKE"), |_| CompareOp::Like),
    ))(input)
}

/// Bare or quoted (backtick / double quote) column name.
fn parse_identifier(input: &str) -> IResult<&str, String> {
    alt((
        map(
            delimited(char('`'), take_while1(|c: char| c != '`'), char('`')),
            String::from,
        ),
        map(
            delimited(char('"'), take_while1(|c: char| c != '"'), char('"')),
            String::from,
        ),
        map(
            take_while1(|c: char| c.is_alphanumeric() || c == '_'),
            String::from,
        ),
    ))(input)
}

fn parse_literal(input: &str) -> IResult<&str, Value> {
    alt((
        parse_quoted_string,
        parse_number,
        map(tag_no_case("true"), |_| Value::Bool(true)),
        map(tag_no_case("false"), |_| Value::Bool(false)),
    ))(input)
}

fn parse_number(input: &str) -> IResult<&str, Value> {
    let (rest, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(preceded(char('.'), digit1)),
    )))(input)?;
    let value = if text.contains('.') {
        text.parse::<f64>().map(Value::Float)
            .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float)))?
    } else {
        text.parse::<i64>().map(Value::Int)
            .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))?
    };
    Ok((rest, value))
}

/// Single-quoted string with `''` as the escaped quote.
fn parse_quoted_string(input: &str) -> IResult<&str, Value> {
    let (mut rest, _) = char('\'')(input)?;
    let mut out = String::new();
    loop {
        match rest.find('\'') {
            Some(pos) => {
                out.push_str(&rest[..pos]);
                let after = &rest[pos + 1..];
                if let Some(stripped) = after.strip_prefix('\'') {
                    out.push('\'');
                    rest = stripped;
                } else {
                    return Ok((after, Value::Text(out)));
                }
            }
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Char,
                )));
            }
        }
    }
}
