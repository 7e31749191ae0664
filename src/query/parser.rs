//! Query language parser using nom combinators.
//!
//! Accepts statements of the form
//! `[select * [where]] <condition> [order by <prop> [asc|desc], ...] [limit N]`:
//! - Comparisons: `name = 'Bob'`, `age >= 21`, `title contains 'rust'`
//!   (word forms `eq`, `lt`, `lte`, `gt`, `gte` also work)
//! - Geo radius: `location within 1000 of 37.77, -122.41`
//! - Logical: `and`, `or`, `not`, parentheses
//! - Literals: quoted strings, integers, decimals, `true`/`false`, bare UUIDs
//!
//! Keywords are case-insensitive and need word boundaries, so `order_id`
//! parses as a property, not as `order`.

use super::ast::{Comparison, Literal, Operand, ParsedQuery, SortDirection, SortPredicate, WithinOperand};
use crate::error::{IndexError, Result};
use crate::types::GeoPoint;
use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while1, take_while_m_n},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{cut, map, map_res, opt, value},
    multi::{many0, separated_list1},
    sequence::{delimited, preceded, terminated, tuple},
    IResult,
};
use uuid::Uuid;

/// Parse a query string.
///
/// # Errors
/// [`IndexError::QueryParse`] if the input is malformed or has trailing input.
pub fn parse_query(input: &str) -> Result<ParsedQuery> {
    match query(input.trim()) {
        Ok(("", q)) => Ok(q),
        Ok((remaining, _)) => Err(IndexError::QueryParse(format!(
            "Unexpected input after query: '{}'",
            remaining
        ))),
        Err(e) => Err(IndexError::QueryParse(format!("Parse error: {}", e))),
    }
}

fn query(input: &str) -> IResult<&str, ParsedQuery> {
    let (input, _) = opt(terminated(select_clause, multispace0))(input)?;
    let (input, _) = opt(terminated(keyword("where"), multispace1))(input)?;
    let (input, root) = opt(condition)(input)?;
    let (input, sort) = opt(preceded(multispace0, order_clause))(input)?;
    let (input, limit) = opt(preceded(multispace0, limit_clause))(input)?;
    let (input, _) = multispace0(input)?;
    Ok((
        input,
        ParsedQuery {
            root,
            sort: sort.unwrap_or_default(),
            limit,
        },
    ))
}

fn keyword<'a>(kw: &'static str) -> impl Fn(&'a str) -> IResult<&'a str, &'a str> {
    move |input: &'a str| {
        let (remaining, matched) = tag_no_case(kw)(input)?;

        if remaining
            .chars()
            .next()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Tag,
            )));
        }

        Ok((remaining, matched))
    }
}

fn select_clause(input: &str) -> IResult<&str, ()> {
    let (input, _) = keyword("select")(input)?;
    let (input, _) = cut(preceded(
        multispace1,
        alt((
            value((), char('*')),
            value(
                (),
                separated_list1(delimited(multispace0, char(','), multispace0), property),
            ),
        )),
    ))(input)?;
    Ok((input, ()))
}

fn condition(input: &str) -> IResult<&str, Operand> {
    or_expr(input)
}

fn or_expr(input: &str) -> IResult<&str, Operand> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(
        delimited(multispace0, keyword("or"), multispace0),
        cut(and_expr),
    ))(input)?;
    Ok((input, rest.into_iter().fold(first, Operand::or)))
}

fn and_expr(input: &str) -> IResult<&str, Operand> {
    let (input, first) = not_expr(input)?;
    let (input, rest) = many0(preceded(
        delimited(multispace0, keyword("and"), multispace0),
        cut(not_expr),
    ))(input)?;
    Ok((input, rest.into_iter().fold(first, Operand::and)))
}

fn not_expr(input: &str) -> IResult<&str, Operand> {
    alt((
        map(
            preceded(
                terminated(keyword("not"), multispace0),
                cut(not_expr),
            ),
            Operand::negate,
        ),
        atom,
    ))(input)
}

fn atom(input: &str) -> IResult<&str, Operand> {
    alt((
        delimited(
            terminated(char('('), multispace0),
            condition,
            cut(preceded(multispace0, char(')'))),
        ),
        within,
        comparison,
    ))(input)
}

fn within(input: &str) -> IResult<&str, Operand> {
    let (input, prop) = terminated(property, multispace1)(input)?;
    let (input, _) = keyword("within")(input)?;
    let (input, (_, distance, _, _, _, lat, _, _, _, lon)) = cut(tuple((
        multispace1,
        number_literal,
        multispace1,
        keyword("of"),
        multispace1,
        number_literal,
        multispace0,
        char(','),
        multispace0,
        number_literal,
    )))(input)?;
    Ok((
        input,
        Operand::Within(WithinOperand {
            property: prop.to_string(),
            distance_m: distance,
            center: GeoPoint::new(lat, lon),
        }),
    ))
}

#[derive(Clone, Copy)]
enum Op {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
}

fn operator(input: &str) -> IResult<&str, Op> {
    alt((
        value(Op::Lte, tag("<=")),
        value(Op::Gte, tag(">=")),
        value(Op::Eq, tag("=")),
        value(Op::Lt, tag("<")),
        value(Op::Gt, tag(">")),
        value(Op::Contains, keyword("contains")),
        value(Op::Lte, keyword("lte")),
        value(Op::Lt, keyword("lt")),
        value(Op::Gte, keyword("gte")),
        value(Op::Gt, keyword("gt")),
        value(Op::Eq, keyword("eq")),
    ))(input)
}

fn comparison(input: &str) -> IResult<&str, Operand> {
    let (input, prop) = terminated(property, multispace0)(input)?;
    let (input, op) = terminated(operator, multispace0)(input)?;
    let (input, literal) = cut(literal)(input)?;

    let c = Comparison {
        property: prop.to_string(),
        value: literal,
    };
    let operand = match op {
        Op::Eq => Operand::Equal(c),
        Op::Lt => Operand::LessThan(c),
        Op::Lte => Operand::LessThanEqual(c),
        Op::Gt => Operand::GreaterThan(c),
        Op::Gte => Operand::GreaterThanEqual(c),
        Op::Contains => Operand::Contains(c),
    };
    Ok((input, operand))
}

fn property(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '.')(input)
}

fn literal(input: &str) -> IResult<&str, Literal> {
    alt((
        map(quoted('\''), Literal::String),
        map(quoted('"'), Literal::String),
        map(uuid_literal, Literal::Uuid),
        value(Literal::Boolean(true), keyword("true")),
        value(Literal::Boolean(false), keyword("false")),
        number_value,
    ))(input)
}

/// A string between `quote` characters. Backslash escapes the next character.
fn quoted<'a>(quote: char) -> impl Fn(&'a str) -> IResult<&'a str, String> {
    move |input: &'a str| {
        let (rest, _) = char(quote)(input)?;
        let mut out = String::new();
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            if c == '\\' {
                if let Some((_, escaped)) = chars.next() {
                    out.push(escaped);
                }
            } else if c == quote {
                return Ok((&rest[i + c.len_utf8()..], out));
            } else {
                out.push(c);
            }
        }
        Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )))
    }
}

fn uuid_literal(input: &str) -> IResult<&str, Uuid> {
    let (rest, uuid) = map_res(
        take_while_m_n(36, 36, |c: char| c.is_ascii_hexdigit() || c == '-'),
        Uuid::parse_str,
    )(input)?;
    if rest.chars().next().is_some_and(|c| c.is_alphanumeric()) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    Ok((rest, uuid))
}

fn number_literal(input: &str) -> IResult<&str, f64> {
    let (input, num_str) = nom::number::complete::recognize_float(input)?;
    let val = num_str.parse::<f64>().map_err(|_| {
        nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))
    })?;
    Ok((input, val))
}

fn number_value(input: &str) -> IResult<&str, Literal> {
    let (input, num_str) = nom::number::complete::recognize_float(input)?;
    if num_str.contains('.') || num_str.contains('e') || num_str.contains('E') {
        let val = num_str.parse::<f64>().map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Float))
        })?;
        Ok((input, Literal::Double(val)))
    } else {
        let val = num_str.parse::<i64>().map_err(|_| {
            nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
        })?;
        Ok((input, Literal::Long(val)))
    }
}

fn order_clause(input: &str) -> IResult<&str, Vec<SortPredicate>> {
    let (input, _) = tuple((keyword("order"), multispace1, keyword("by"), multispace1))(input)?;
    cut(separated_list1(
        delimited(multispace0, char(','), multispace0),
        sort_predicate,
    ))(input)
}

fn sort_predicate(input: &str) -> IResult<&str, SortPredicate> {
    let (input, prop) = property(input)?;
    let (input, direction) = opt(preceded(
        multispace1,
        alt((
            value(SortDirection::Asc, keyword("asc")),
            value(SortDirection::Desc, keyword("desc")),
        )),
    ))(input)?;
    Ok((
        input,
        SortPredicate::new(prop, direction.unwrap_or(SortDirection::Asc)),
    ))
}

fn limit_clause(input: &str) -> IResult<&str, usize> {
    preceded(
        terminated(keyword("limit"), multispace1),
        cut(map_res(digit1, |d: &str| d.parse::<usize>())),
    )(input)
}
