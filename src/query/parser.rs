//! Decoder for string-keyed query parameters, as they arrive from a URL
//! query string (already percent-decoded).
//!
//! ```text
//! select   := node *( "," node )
//! node     := [ "-" ] field / field "[" select "]"
//! where    := clause *( ";" clause )                 ; implicit AND
//! clause   := ("some" | "every") "(" where ")"       ; OR / AND group
//!           / field "," value
//! value    := [ op ] literal
//! op       := ">=" / "<=" / "!=" / ">" / "<" / "=" / "!~" / "~" / "!in:" / "in:"
//! literal  := "null" / "true" / "false" / number / text ; in-lists split on "|"
//! order    := [ "-" ] field *( "," [ "-" ] field )
//! populate := "true" / "false" / select
//! ```
//!
//! `\` escapes the next character; an escaped literal is always text.
//! Repeated `where` keys and `where[field]=value` keys are AND-ed.
//! Unrecognized keys are ignored.

use log::trace;
use serde_json::{Number, Value};
use thiserror::Error;

use super::descriptor::{Pagination, PopulateSpec, QueryDescriptor, Selection, SortKey};
use super::filter::{FilterExpr, Operator};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Invalid '{key}' parameter at offset {offset}: {message}")]
    Syntax {
        key: String,
        offset: usize,
        message: String,
    },

    #[error("Invalid number for '{key}': '{value}'")]
    Number { key: String, value: String },
}

fn syntax(key: &str, offset: usize, message: impl Into<String>) -> ParseError {
    ParseError::Syntax {
        key: key.to_string(),
        offset,
        message: message.into(),
    }
}

type ParseResult<T> = Result<T, ParseError>;

/// Longest prefixes first so `>=` wins over `>`.
const OPERATORS: &[(&str, Operator)] = &[
    ("!in:", Operator::NotIn),
    ("in:", Operator::In),
    (">=", Operator::Gte),
    ("<=", Operator::Lte),
    ("!=", Operator::Ne),
    ("!~", Operator::NotLike),
    (">", Operator::Gt),
    ("<", Operator::Lt),
    ("=", Operator::Eq),
    ("~", Operator::Like),
];

/// Decode a parameter map into a descriptor for `collection`.
pub fn parse_params<I, K, V>(collection: &str, params: I) -> ParseResult<QueryDescriptor>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut descriptor = QueryDescriptor::new(collection);
    let mut page = None;
    let mut per_page = None;
    let mut offset = None;
    let mut limit = None;

    for (key, value) in params {
        let (key, value) = (key.as_ref(), value.as_ref());
        match key {
            "select" => descriptor.selection = Some(parse_selection(key, value, 0)?),
            "where" => descriptor.filters.extend(parse_where(key, value, 0)?),
            "order" => descriptor.sort = parse_order(key, value)?,
            "page" => page = Some(parse_u64(key, value)?),
            "perPage" => per_page = Some(parse_u64(key, value)?),
            "offset" => offset = Some(parse_u64(key, value)?),
            "limit" => limit = Some(parse_u64(key, value)?),
            "populate" => descriptor.populate = Some(parse_populate(key, value)?),
            "language" if !value.trim().is_empty() => descriptor.language = Some(value.trim().to_string()),
            _ => match where_field(key) {
                Some(field) => {
                    check_field_name(key, field, 0)?;
                    descriptor.filters.push(parse_condition(key, field, value, 0)?);
                }
                None => trace!("Ignoring unrecognized query parameter '{}'", key),
            },
        }
    }

    descriptor.pagination = if page.is_some() || per_page.is_some() {
        Some(Pagination::Page {
            page: page.unwrap_or(1),
            per_page,
        })
    } else if offset.is_some() || limit.is_some() {
        Some(Pagination::Offset {
            offset: offset.unwrap_or(0),
            limit,
        })
    } else {
        None
    };

    Ok(descriptor)
}

fn where_field(key: &str) -> Option<&str> {
    key.strip_prefix("where[")?.strip_suffix(']')
}

fn parse_u64(key: &str, value: &str) -> ParseResult<u64> {
    value.trim().parse().map_err(|_| ParseError::Number {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Split on `sep` outside brackets and escapes, keeping each part's offset.
fn split_top<'a>(
    key: &str,
    input: &'a str,
    base: usize,
    sep: char,
    brackets: Option<(char, char)>,
) -> ParseResult<Vec<(usize, &'a str)>> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut escaped = false;

    for (i, ch) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (ch, brackets) {
            ('\\', _) => escaped = true,
            (c, Some((open, _))) if c == open => depth += 1,
            (c, Some((_, close))) if c == close => {
                if depth == 0 {
                    return Err(syntax(key, base + i, format!("unexpected '{}'", close)));
                }
                depth -= 1;
            }
            (c, _) if c == sep && depth == 0 => {
                parts.push((base + start, &input[start..i]));
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    if escaped {
        return Err(syntax(key, base + input.len(), "dangling escape"));
    }
    if let (true, Some((open, _))) = (depth > 0, brackets) {
        return Err(syntax(key, base + input.len(), format!("unclosed '{}'", open)));
    }
    parts.push((base + start, &input[start..]));
    Ok(parts)
}

fn find_unescaped(input: &str, target: char) -> Option<usize> {
    let mut escaped = false;
    for (i, ch) in input.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == target {
            return Some(i);
        }
    }
    None
}

fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut escaped = false;
    for ch in input.chars() {
        if escaped || ch != '\\' {
            out.push(ch);
            escaped = false;
        } else {
            escaped = true;
        }
    }
    out
}

fn check_field_name(key: &str, field: &str, offset: usize) -> ParseResult<()> {
    let valid = !field.is_empty()
        && !field.starts_with('-')
        && field.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(syntax(key, offset, format!("invalid field name '{}'", field)))
    }
}

/// Trimmed view of `part` and the offset where it starts.
fn trimmed(part: &str, offset: usize) -> (&str, usize) {
    let lead = part.len() - part.trim_start().len();
    (part.trim(), offset + lead)
}

fn parse_selection(key: &str, input: &str, base: usize) -> ParseResult<Selection> {
    let mut selection = Selection::new();
    for (offset, node) in split_top(key, input, base, ',', Some(('[', ']')))? {
        let (node, offset) = trimmed(node, offset);
        if node.is_empty() {
            continue;
        }
        match node.find('[') {
            Some(open) => {
                if !node.ends_with(']') {
                    return Err(syntax(key, offset + node.len(), "expected ']' to close the sub-selection"));
                }
                let field = node[..open].trim();
                check_field_name(key, field, offset)?;
                let inner = parse_selection(key, &node[open + 1..node.len() - 1], offset + open + 1)?;
                selection.nest(field, inner);
            }
            None => match node.strip_prefix('-') {
                Some(field) => {
                    check_field_name(key, field, offset + 1)?;
                    selection.exclude(field);
                }
                None => {
                    check_field_name(key, node, offset)?;
                    selection.include(node);
                }
            },
        }
    }
    Ok(selection)
}

fn parse_where(key: &str, input: &str, base: usize) -> ParseResult<Vec<FilterExpr>> {
    let mut filters = Vec::new();
    for (offset, clause) in split_top(key, input, base, ';', Some(('(', ')')))? {
        let (clause, offset) = trimmed(clause, offset);
        if clause.is_empty() {
            continue;
        }
        filters.push(parse_clause(key, clause, offset)?);
    }
    Ok(filters)
}

fn parse_clause(key: &str, clause: &str, offset: usize) -> ParseResult<FilterExpr> {
    for group in ["some", "every"] {
        let Some(rest) = clause.strip_prefix(group) else {
            continue;
        };
        let body = rest.trim_start();
        if body.starts_with('(') && clause.ends_with(')') {
            let inner_offset = offset + (clause.len() - body.len()) + 1;
            let children = parse_where(key, &body[1..body.len() - 1], inner_offset)?;
            return Ok(if group == "some" {
                FilterExpr::Or(children)
            } else {
                FilterExpr::And(children)
            });
        }
    }

    let comma = find_unescaped(clause, ',')
        .ok_or_else(|| syntax(key, offset, "expected 'field,value'"))?;
    let field = clause[..comma].trim();
    check_field_name(key, field, offset)?;
    parse_condition(key, field, &clause[comma + 1..], offset + comma + 1)
}

fn parse_condition(key: &str, field: &str, raw: &str, offset: usize) -> ParseResult<FilterExpr> {
    let raw = raw.trim_start();
    let (op, literal) = OPERATORS
        .iter()
        .find_map(|(symbol, op)| raw.strip_prefix(symbol).map(|rest| (*op, rest)))
        .unwrap_or((Operator::Eq, raw));

    let value = if op.is_set() {
        let items = split_top(key, literal, offset, '|', None)?;
        Value::Array(items.into_iter().map(|(_, item)| parse_literal(item)).collect())
    } else {
        parse_literal(literal)
    };

    Ok(FilterExpr::Condition {
        field: field.to_string(),
        op,
        value,
    })
}

/// Type an unescaped literal; anything escaped stays text.
fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();
    if raw.contains('\\') {
        return Value::String(unescape(raw));
    }
    match raw {
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Value::from(n);
    }
    if let Ok(n) = raw.parse::<u64>() {
        return Value::from(n);
    }
    let numeric = raw.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.');
    if numeric {
        if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

fn parse_order(key: &str, input: &str) -> ParseResult<Vec<SortKey>> {
    let mut sort = Vec::new();
    for (offset, part) in split_top(key, input, 0, ',', None)? {
        let (part, offset) = trimmed(part, offset);
        if part.is_empty() {
            continue;
        }
        let key_for = |field: &str, offset| check_field_name(key, field, offset).map(|_| field.to_string());
        sort.push(match part.strip_prefix('-') {
            Some(field) => SortKey::desc(key_for(field, offset + 1)?),
            None => SortKey::asc(key_for(part.strip_prefix('+').unwrap_or(part), offset)?),
        });
    }
    Ok(sort)
}

fn parse_populate(key: &str, input: &str) -> ParseResult<PopulateSpec> {
    match input.trim() {
        "true" => Ok(PopulateSpec::All),
        "false" | "" => Ok(PopulateSpec::none()),
        other => Ok(PopulateSpec::from_selection(&parse_selection(key, other, 0)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::descriptor::{SortDirection, Selector};
    use serde_json::json;

    fn parse(pairs: &[(&str, &str)]) -> ParseResult<QueryDescriptor> {
        parse_params("posts", pairs.iter().copied())
    }

    fn cond(field: &str, op: Operator, value: Value) -> FilterExpr {
        FilterExpr::condition(field, op, value)
    }

    #[test]
    fn test_plain_equality() {
        let d = parse(&[("where", "id,5")]).unwrap();
        assert_eq!(d.filters, vec![cond("id", Operator::Eq, json!(5))]);
    }

    #[test]
    fn test_operator_prefixes() {
        let d = parse(&[("where", "views,>=10;title,!~draft;status,in:a|b|null;rating,<4.5")]).unwrap();
        assert_eq!(
            d.filters,
            vec![
                cond("views", Operator::Gte, json!(10)),
                cond("title", Operator::NotLike, json!("draft")),
                cond("status", Operator::In, json!(["a", "b", null])),
                cond("rating", Operator::Lt, json!(4.5)),
            ]
        );
    }

    #[test]
    fn test_groups_nest() {
        let d = parse(&[("where", "some(kind,bar;every(kind,baz;views,>1))")]).unwrap();
        assert_eq!(
            d.filters,
            vec![FilterExpr::Or(vec![
                cond("kind", Operator::Eq, json!("bar")),
                FilterExpr::And(vec![
                    cond("kind", Operator::Eq, json!("baz")),
                    cond("views", Operator::Gt, json!(1)),
                ]),
            ])]
        );
    }

    #[test]
    fn test_escapes_force_text() {
        let d = parse(&[("where", r"code,\5;title,a\;b;note,\>x")]).unwrap();
        assert_eq!(
            d.filters,
            vec![
                cond("code", Operator::Eq, json!("5")),
                cond("title", Operator::Eq, json!("a;b")),
                cond("note", Operator::Eq, json!(">x")),
            ]
        );
    }

    #[test]
    fn test_repeated_and_bracketed_where_keys_are_anded() {
        let d = parse(&[("where", "a,1"), ("where[b]", "!=2"), ("where", "c,x")]).unwrap();
        assert_eq!(d.filters.len(), 3);
        assert_eq!(d.filters[1], cond("b", Operator::Ne, json!(2)));
    }

    #[test]
    fn test_select_and_populate() {
        let d = parse(&[("select", "title,author[name,company[title]],-body"), ("populate", "author")]).unwrap();
        let selection = d.selection.unwrap();
        assert_eq!(selection.0.get("title"), Some(&Selector::Include(true)));
        assert_eq!(selection.0.get("body"), Some(&Selector::Include(false)));
        let author = selection.nested("author").unwrap();
        assert!(author.nested("company").is_some());
        assert_eq!(d.populate, Some(PopulateSpec::fields(["author"])));

        assert_eq!(parse(&[("populate", "true")]).unwrap().populate, Some(PopulateSpec::All));
        assert_eq!(parse(&[("populate", "false")]).unwrap().populate, Some(PopulateSpec::none()));
    }

    #[test]
    fn test_order_and_pagination() {
        let d = parse(&[("order", "-createdAt,title"), ("page", "3"), ("perPage", "20"), ("offset", "5")]).unwrap();
        assert_eq!(d.sort[0].direction, SortDirection::Desc);
        assert_eq!(d.sort[1], SortKey::asc("title"));
        assert_eq!(d.pagination, Some(Pagination::Page { page: 3, per_page: Some(20) }));

        let d = parse(&[("offset", "5"), ("limit", "2")]).unwrap();
        assert_eq!(d.pagination, Some(Pagination::Offset { offset: 5, limit: Some(2) }));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let d = parse(&[("utm_source", "mail"), ("where", "id,1")]).unwrap();
        assert_eq!(d.filters.len(), 1);
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse(&[("where", "id")]), Err(ParseError::Syntax { .. })));
        assert!(matches!(parse(&[("where", "some(id,1")]), Err(ParseError::Syntax { .. })));
        assert!(matches!(parse(&[("select", "author[name")]), Err(ParseError::Syntax { .. })));
        assert!(matches!(parse(&[("where", "bad name,1")]), Err(ParseError::Syntax { .. })));
        assert!(matches!(parse(&[("page", "two")]), Err(ParseError::Number { .. })));
    }
}
