//! Parser for range expressions such as `[5000-10000]` or `[1-5, 10]`.
//!
//! Used for the configured project-ID range. Brackets are optional and
//! whitespace is tolerated between tokens.

use nom::{
    IResult, Parser,
    character::complete::{char, digit1, multispace0},
    combinator::{all_consuming, map_res, opt},
    multi::separated_list1,
    sequence::{delimited, preceded},
};

use crate::error::{FencerError, Result};
use crate::interval::IntervalSet;

fn number(input: &str) -> IResult<&str, u64> {
    map_res(preceded(multispace0, digit1), str::parse::<u64>).parse(input)
}

/// Parses `a-b` or a single value `a`.
fn range(input: &str) -> IResult<&str, (u64, u64)> {
    let (input, lo) = number(input)?;
    let (input, hi) = opt(preceded((multispace0, char('-')), number)).parse(input)?;
    Ok((input, (lo, hi.unwrap_or(lo))))
}

fn range_list(input: &str) -> IResult<&str, Vec<(u64, u64)>> {
    separated_list1((multispace0, char(',')), range).parse(input)
}

fn expression(input: &str) -> IResult<&str, Vec<(u64, u64)>> {
    let bracketed = delimited(
        (multispace0, char('[')),
        range_list,
        (multispace0, char(']')),
    );
    let (input, list) = nom::branch::alt((bracketed, range_list)).parse(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, list))
}

/// Parses a range expression into its raw `(lo, hi)` pairs.
///
/// # Errors
///
/// Returns [`FencerError::Parse`] if the input is not a well-formed
/// expression or a range has its bounds inverted.
pub fn parse_ranges(input: &str) -> Result<Vec<(u64, u64)>> {
    let (_, list) = all_consuming(expression)
        .parse(input)
        .map_err(|e| FencerError::Parse {
            input: input.to_string(),
            message: e.to_string(),
        })?;

    if let Some((lo, hi)) = list.iter().find(|(lo, hi)| lo > hi) {
        return Err(FencerError::Parse {
            input: input.to_string(),
            message: format!("range {lo}-{hi} has its bounds inverted"),
        });
    }
    Ok(list)
}

/// Parses a range expression into an [`IntervalSet<u32>`].
///
/// # Errors
///
/// Returns an error if the expression is malformed or any bound does not
/// fit in a `u32`.
pub fn parse_u32_ranges(input: &str) -> Result<IntervalSet<u32>> {
    let mut set = IntervalSet::new();
    for (lo, hi) in parse_ranges(input)? {
        let (Ok(lo), Ok(hi)) = (u32::try_from(lo), u32::try_from(hi)) else {
            return Err(FencerError::Config {
                message: format!("value {hi} in '{input}' is out of range"),
            });
        };
        set.insert_range(lo, hi);
    }
    Ok(set)
}

/// Parses a range expression into an [`IntervalSet<u16>`], as used for ports.
///
/// # Errors
///
/// Returns an error if the expression is malformed or any bound does not
/// fit in a `u16`.
pub fn parse_u16_ranges(input: &str) -> Result<IntervalSet<u16>> {
    let mut set = IntervalSet::new();
    for (lo, hi) in parse_ranges(input)? {
        let (Ok(lo), Ok(hi)) = (u16::try_from(lo), u16::try_from(hi)) else {
            return Err(FencerError::Config {
                message: format!("value {hi} in '{input}' is out of range"),
            });
        };
        set.insert_range(lo, hi);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracketed_single_range() {
        let set = parse_u32_ranges("[5000-10000]").expect("parse");
        assert_eq!(set.size(), 5001);
        assert_eq!(set.lower_bound(), Some(5000));
    }

    #[test]
    fn parses_list_with_whitespace() {
        let ranges = parse_ranges(" [ 1 - 5 , 10 ,20-21 ] ").expect("parse");
        assert_eq!(ranges, vec![(1, 5), (10, 10), (20, 21)]);
    }

    #[test]
    fn brackets_are_optional() {
        assert_eq!(parse_ranges("31000-32000").expect("parse"), vec![(31000, 32000)]);
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(matches!(
            parse_ranges("[10-5]"),
            Err(FencerError::Parse { .. })
        ));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_ranges("[a-b]").is_err());
        assert!(parse_ranges("[1-5").is_err());
        assert!(parse_ranges("").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(matches!(
            parse_u32_ranges("[1-4294967296]"),
            Err(FencerError::Config { .. })
        ));
        assert!(parse_u16_ranges("[80-65536]").is_err());
    }

    #[test]
    fn overlapping_ranges_are_merged() {
        let set = parse_u16_ranges("[8080-8085, 8083-8090]").expect("parse");
        assert_eq!(set.interval_count(), 1);
        assert_eq!(set.size(), 11);
    }
}
