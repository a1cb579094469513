//! Placeholder scanner.
//!
//! Tokenizes a raw query string into an ordered sequence of literal spans
//! and placeholder tokens, preserving exact byte boundaries so literal text
//! can be copied verbatim into the output.
//!
//! # Token forms
//!
//! ```text
//! <SCHEMA>           schema substitution point
//! <DRUG-TEMPLATE>    template invocation for category DRUG
//! <ARG-DRUG>         argument reference for category DRUG
//! <0>                positional index into a category's argument list
//! ```
//!
//! Bracketed content matching none of these forms is passed through as
//! literal text; no grouping or lookahead happens here.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1},
    combinator::map,
    sequence::{delimited, preceded, terminated},
    IResult,
};

/// A single recognized placeholder token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `<SCHEMA>` — replaced verbatim by the configured schema name.
    Schema,
    /// `<CAT-TEMPLATE>` — a template invocation for the named category.
    Template(String),
    /// `<ARG-CAT>` — an argument reference for the named category.
    Arg(String),
    /// `<n>` — a 0-based position into a category's argument list.
    Index(usize),
}

/// One span of the scanned input: either literal text or a classified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Verbatim source text, copied unchanged into the output.
    Literal { text: String, start: usize },
    /// A recognized placeholder with its byte span into the source.
    Placeholder {
        token: Token,
        start: usize,
        end: usize,
    },
}

impl Segment {
    /// The byte offset where this segment starts.
    pub fn start(&self) -> usize {
        match self {
            Segment::Literal { start, .. } => *start,
            Segment::Placeholder { start, .. } => *start,
        }
    }
}

/// Scan a query string into literal and placeholder segments.
///
/// Literal spans between tokens are never empty; two placeholder segments
/// adjacent in the returned sequence were adjacent in the source, which is
/// what the resolver's unit grouping relies on.
pub fn scan(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut lit_start = 0;
    let mut pos = 0;

    while pos < input.len() {
        if input.as_bytes()[pos] == b'<' {
            if let Ok((rest, token)) = parse_token(&input[pos..]) {
                if lit_start < pos {
                    segments.push(Segment::Literal {
                        text: input[lit_start..pos].to_string(),
                        start: lit_start,
                    });
                }
                let end = input.len() - rest.len();
                segments.push(Segment::Placeholder {
                    token,
                    start: pos,
                    end,
                });
                pos = end;
                lit_start = end;
                continue;
            }
        }
        // Advance one char; '<' that opens no token stays literal.
        pos += input[pos..].chars().next().map_or(1, char::len_utf8);
    }

    if lit_start < input.len() {
        segments.push(Segment::Literal {
            text: input[lit_start..].to_string(),
            start: lit_start,
        });
    }

    segments
}

/// True if the text contains anything the scanner would classify as a token.
pub fn contains_placeholder(input: &str) -> bool {
    scan(input)
        .iter()
        .any(|s| matches!(s, Segment::Placeholder { .. }))
}

/// Parse one `<...>` token at the start of the input.
fn parse_token(input: &str) -> IResult<&str, Token> {
    delimited(char('<'), parse_token_body, char('>'))(input)
}

fn parse_token_body(input: &str) -> IResult<&str, Token> {
    alt((
        // <CAT-TEMPLATE> must come before <SCHEMA> so that a category
        // literally named SCHEMA would still need the suffix to bind.
        map(terminated(parse_category, tag("-TEMPLATE")), |c: &str| {
            Token::Template(c.to_string())
        }),
        map(tag("SCHEMA"), |_| Token::Schema),
        map(preceded(tag("ARG-"), parse_category), |c: &str| {
            Token::Arg(c.to_string())
        }),
        // Saturate on overflow so an absurd index still reads as
        // out-of-range downstream instead of aliasing a real position.
        map(digit1, |n: &str| {
            Token::Index(n.parse().unwrap_or(usize::MAX))
        }),
    ))(input)
}

/// Parse a category name (uppercase identifier, no hyphens).
fn parse_category(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')(input)
}
