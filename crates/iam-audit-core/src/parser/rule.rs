//! Dynamic-group matching-rule parser.
//!
//! Matching rules combine attribute comparisons with `ANY {...}` / `ALL {...}`
//! groups, which may nest:
//!
//! ```text
//! rule    = clause / ("ANY" / "ALL") "{" rule ("," rule)* "}"
//! clause  = attribute ("=" / "!=") value
//! ```
//!
//! Each leaf clause becomes one [`DynamicGroupRule`].

use serde::{Deserialize, Serialize};

use super::ParseError;
use super::tokenizer::{Token, TokenKind, Tokenizer};

/// One clause of a dynamic group's matching rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicGroupRule {
    /// Identity domain of the owning group.
    pub domain: String,
    /// Source text of the clause.
    pub rule_text: String,
    /// OCID the clause compares against, if any.
    pub referenced_ocid: Option<String>,
    /// Attribute path, e.g. `instance.compartment.id` or `resource.type`.
    pub rule_type: Option<String>,
    /// Value of a `resource.type` clause, e.g. `fnfunc`.
    pub resource_type: Option<String>,
    /// Whether the clause uses `!=`.
    #[serde(default)]
    pub negated: bool,
    pub parse_warning: Option<ParseError>,
}

/// Split a matching rule into its clauses.
///
/// A rule that cannot be parsed yields a single entry carrying the whole text
/// and a `parse_warning`, so the group is still reported.
#[must_use]
pub fn parse_matching_rule(text: &str, domain: &str) -> Vec<DynamicGroupRule> {
    match RuleParser::new(text).and_then(|mut p| p.parse().map(|()| p.clauses)) {
        Ok(clauses) => clauses
            .into_iter()
            .map(|clause| clause.into_rule(domain))
            .collect(),
        Err(error) => vec![DynamicGroupRule {
            domain: domain.to_string(),
            rule_text: text.trim().to_string(),
            referenced_ocid: None,
            rule_type: None,
            resource_type: None,
            negated: false,
            parse_warning: Some(error),
        }],
    }
}

struct Clause {
    text: String,
    attribute: String,
    value: String,
    negated: bool,
}

impl Clause {
    fn into_rule(self, domain: &str) -> DynamicGroupRule {
        let referenced_ocid = self
            .value
            .starts_with("ocid1.")
            .then(|| self.value.clone());
        let resource_type = self
            .attribute
            .eq_ignore_ascii_case("resource.type")
            .then(|| self.value.clone());
        DynamicGroupRule {
            domain: domain.to_string(),
            rule_text: self.text,
            referenced_ocid,
            rule_type: Some(self.attribute),
            resource_type,
            negated: self.negated,
            parse_warning: None,
        }
    }
}

struct RuleParser<'a> {
    input: &'a str,
    tokenizer: Tokenizer<'a>,
    current: Token,
    clauses: Vec<Clause>,
}

impl<'a> RuleParser<'a> {
    fn new(input: &'a str) -> Result<Self, ParseError> {
        let mut tokenizer = Tokenizer::new(input);
        let current = tokenizer.next_token()?;
        Ok(Self {
            input,
            tokenizer,
            current,
            clauses: Vec::new(),
        })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current = self.tokenizer.next_token()?;
        Ok(())
    }

    fn expected(&self, what: &str) -> ParseError {
        ParseError::Expected {
            expected: what.to_string(),
            found: self.current.describe(),
            offset: self.current.start,
        }
    }

    fn parse(&mut self) -> Result<(), ParseError> {
        if self.current.kind == TokenKind::Eof {
            return Err(ParseError::Empty);
        }
        self.parse_rule()?;
        match self.current.kind {
            TokenKind::Eof => Ok(()),
            _ => Err(ParseError::TrailingInput {
                found: self.current.describe(),
                offset: self.current.start,
            }),
        }
    }

    fn parse_rule(&mut self) -> Result<(), ParseError> {
        if self.current.is_keyword("any") || self.current.is_keyword("all") {
            self.advance()?;
            if self.current.kind != TokenKind::OpenBrace {
                return Err(self.expected("'{'"));
            }
            self.advance()?;
            loop {
                self.parse_rule()?;
                match self.current.kind {
                    TokenKind::Comma => self.advance()?,
                    TokenKind::CloseBrace => return self.advance(),
                    _ => return Err(self.expected("',' or '}'")),
                }
            }
        }
        self.parse_clause()
    }

    fn parse_clause(&mut self) -> Result<(), ParseError> {
        let start = self.current.start;
        let attribute = match &self.current.kind {
            TokenKind::Word(w) => w.clone(),
            _ => return Err(self.expected("attribute")),
        };
        self.advance()?;

        let negated = match self.current.kind {
            TokenKind::Equals => false,
            TokenKind::NotEquals => true,
            _ => return Err(self.expected("'=' or '!='")),
        };
        self.advance()?;

        let value = match self.current.text() {
            Some(v) => v.to_string(),
            None => return Err(self.expected("value")),
        };
        let end = self.current.end;
        self.advance()?;

        self.clauses.push(Clause {
            text: self.input[start..end].to_string(),
            attribute,
            value,
            negated,
        });
        Ok(())
    }
}
