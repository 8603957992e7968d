//! Recursive-descent parser for policy statements.

use super::tokenizer::{Token, TokenKind, Tokenizer};
use super::{
    ParseError, ParseFailure, StatementFields, StatementKind, Subject, SubjectKind, Verb,
};
use crate::index::CompartmentIndex;

/// Parse one policy statement.
///
/// `index` resolves `in tenancy` to the root compartment name and
/// `compartment id <ocid>` to a compartment name.
///
/// # Errors
///
/// Returns a [`ParseFailure`] holding the error and every field recognised
/// before it. An unknown verb is reported this way too, but only after the
/// rest of the statement has been parsed, so its partial fields are complete.
pub fn parse_statement(
    text: &str,
    index: &CompartmentIndex,
) -> Result<StatementFields, ParseFailure> {
    let mut parser = match Parser::new(text, index) {
        Ok(parser) => parser,
        Err(error) => {
            return Err(ParseFailure {
                error,
                partial: StatementFields::default(),
            });
        }
    };

    match parser.parse() {
        Ok(()) => match parser.warning.take() {
            None => Ok(parser.fields),
            Some(error) => Err(ParseFailure {
                error,
                partial: parser.fields,
            }),
        },
        Err(error) => Err(ParseFailure {
            error,
            partial: parser.fields,
        }),
    }
}

/// Words that open a new subject inside a comma-joined list.
const SUBJECT_KEYWORDS: [&str; 5] = ["group", "dynamic-group", "service", "any-user", "any-group"];

struct Parser<'a> {
    input: &'a str,
    tokenizer: Tokenizer<'a>,
    current: Token,
    index: &'a CompartmentIndex,
    fields: StatementFields,
    /// Soft error that does not stop parsing.
    warning: Option<ParseError>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str, index: &'a CompartmentIndex) -> Result<Self, ParseError> {
        let mut tokenizer = Tokenizer::new(input);
        let current = tokenizer.next_token()?;
        Ok(Self {
            input,
            tokenizer,
            current,
            index,
            fields: StatementFields::default(),
            warning: None,
        })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current = self.tokenizer.next_token()?;
        Ok(())
    }

    /// Look at the token after `current` without consuming anything.
    fn peek(&self) -> Result<Token, ParseError> {
        self.tokenizer.clone().next_token()
    }

    fn expected(&self, what: &str) -> ParseError {
        ParseError::Expected {
            expected: what.to_string(),
            found: self.current.describe(),
            offset: self.current.start,
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if !self.current.is_keyword(keyword) {
            return Err(self.expected(&format!("'{keyword}'")));
        }
        self.advance()
    }

    /// Consume a bare word.
    fn expect_word(&mut self, what: &str) -> Result<String, ParseError> {
        match &self.current.kind {
            TokenKind::Word(w) => {
                let w = w.clone();
                self.advance()?;
                Ok(w)
            }
            _ => Err(self.expected(what)),
        }
    }

    /// Consume a bare or quoted name.
    fn expect_name(&mut self, what: &str) -> Result<String, ParseError> {
        match self.current.text() {
            Some(name) => {
                let name = name.to_string();
                self.advance()?;
                Ok(name)
            }
            None => Err(self.expected(what)),
        }
    }

    /// `id` followed by a name, as opposed to something named `id`.
    fn at_id_marker(&self) -> Result<bool, ParseError> {
        if !self.current.is_keyword("id") {
            return Ok(false);
        }
        let next = self.peek()?;
        Ok(next.text().is_some() && !next.is_keyword("to") && !next.is_keyword("where"))
    }

    fn parse(&mut self) -> Result<(), ParseError> {
        if self.current.kind == TokenKind::Eof {
            return Err(ParseError::Empty);
        }

        let keyword = self.expect_word("statement keyword")?;
        let kind: StatementKind = keyword.parse()?;
        self.fields.kind = Some(kind);

        match kind {
            StatementKind::Define => self.parse_define(),
            StatementKind::Allow | StatementKind::Endorse | StatementKind::Admit => {
                self.parse_grant()
            }
        }
    }

    // -------------------------------------------------------------------------
    // Productions
    // -------------------------------------------------------------------------

    fn parse_define(&mut self) -> Result<(), ParseError> {
        let target = self.expect_word("'tenancy', 'group' or 'dynamic-group'")?;
        let kind = match target.to_ascii_lowercase().as_str() {
            "tenancy" => SubjectKind::Tenancy,
            "group" => SubjectKind::Group,
            "dynamic-group" => SubjectKind::DynamicGroup,
            _ => return Err(ParseError::UnknownSubject { subject: target }),
        };
        let alias = self.expect_name("alias")?;
        self.fields.subjects.push(Subject {
            kind,
            name: alias,
            by_id: false,
        });
        self.expect_keyword("as")?;
        self.fields.defined_ocid = Some(self.expect_name("OCID")?);
        self.expect_end()
    }

    fn parse_grant(&mut self) -> Result<(), ParseError> {
        self.parse_subjects()?;

        if self.current.is_keyword("of") {
            self.advance()?;
            self.expect_keyword("tenancy")?;
            self.fields.subject_tenancy = Some(self.expect_name("tenancy name")?);
        }

        self.expect_keyword("to")?;
        self.parse_action()?;
        self.expect_keyword("in")?;
        self.parse_location()?;
        self.parse_condition()
    }

    fn parse_subjects(&mut self) -> Result<(), ParseError> {
        let mut previous: Option<SubjectKind> = None;
        loop {
            let subject = match previous {
                Some(kind) if self.at_continuation_name() => self.parse_subject_name(kind)?,
                _ => self.parse_subject()?,
            };
            previous = Some(subject.kind);
            self.fields.subjects.push(subject);

            if self.current.kind == TokenKind::Comma {
                self.advance()?;
            } else {
                return Ok(());
            }
        }
    }

    /// A name after a comma that reuses the previous subject's keyword, as in
    /// `group A, B` or `group A, 'Default'/'B'`.
    fn at_continuation_name(&self) -> bool {
        match &self.current.kind {
            TokenKind::Quoted(_) => true,
            TokenKind::Word(w) => {
                !w.eq_ignore_ascii_case("to")
                    && !SUBJECT_KEYWORDS.iter().any(|k| w.eq_ignore_ascii_case(k))
            }
            _ => false,
        }
    }

    fn parse_subject(&mut self) -> Result<Subject, ParseError> {
        let word = self.expect_word("subject")?;
        let kind = match word.to_ascii_lowercase().as_str() {
            "any-user" => {
                return Ok(Subject {
                    kind: SubjectKind::AnyUser,
                    name: "any-user".to_string(),
                    by_id: false,
                });
            }
            "any-group" => {
                return Ok(Subject {
                    kind: SubjectKind::AnyGroup,
                    name: "any-group".to_string(),
                    by_id: false,
                });
            }
            "group" => SubjectKind::Group,
            "dynamic-group" => SubjectKind::DynamicGroup,
            "service" => SubjectKind::Service,
            _ => return Err(ParseError::UnknownSubject { subject: word }),
        };
        self.parse_subject_name(kind)
    }

    fn parse_subject_name(&mut self, kind: SubjectKind) -> Result<Subject, ParseError> {
        if matches!(kind, SubjectKind::AnyUser | SubjectKind::AnyGroup) {
            let found = self.current.text().unwrap_or_default().to_string();
            return Err(ParseError::UnknownSubject { subject: found });
        }
        let by_id = self.at_id_marker()?;
        if by_id {
            self.advance()?;
        }
        let name = self.expect_name("subject name")?;
        Ok(Subject { kind, name, by_id })
    }

    fn parse_action(&mut self) -> Result<(), ParseError> {
        if self.current.kind == TokenKind::OpenBrace {
            self.advance()?;
            loop {
                let permission = self.expect_word("permission name")?;
                self.fields.permissions.push(permission);
                match self.current.kind {
                    TokenKind::Comma => self.advance()?,
                    TokenKind::CloseBrace => return self.advance(),
                    _ => return Err(self.expected("',' or '}'")),
                }
            }
        }

        let verb = self.expect_word("verb")?;
        match verb.parse::<Verb>() {
            Ok(known) => self.fields.verb = Some(known.as_str().to_string()),
            Err(unknown) => {
                self.fields.verb = Some(verb);
                self.warning.get_or_insert(unknown);
            }
        }

        if self.current.is_keyword("in") {
            return Err(self.expected("resource type"));
        }
        self.fields.resource_type = Some(self.expect_word("resource type")?);
        Ok(())
    }

    fn parse_location(&mut self) -> Result<(), ParseError> {
        let start = self.current.start;
        let word = self.expect_word("'tenancy' or 'compartment'")?;
        let location = match word.to_ascii_lowercase().as_str() {
            "tenancy" => {
                // `in tenancy <alias>` on endorse/admit statements.
                if self.current.text().is_some() && !self.current.is_keyword("where") {
                    self.expect_name("tenancy alias")?
                } else {
                    self.index.root_name().to_string()
                }
            }
            "any-tenancy" => "any".to_string(),
            "compartment" => {
                if self.at_id_marker()? {
                    self.advance()?;
                    let ocid = self.expect_name("compartment OCID")?;
                    self.index.name_of(&ocid).map_or(ocid.clone(), str::to_string)
                } else {
                    self.expect_name("compartment name")?
                }
            }
            _ => {
                return Err(ParseError::Expected {
                    expected: "'tenancy' or 'compartment'".to_string(),
                    found: format!("'{word}'"),
                    offset: start,
                });
            }
        };
        self.fields.location = Some(location);
        Ok(())
    }

    fn parse_condition(&mut self) -> Result<(), ParseError> {
        if self.current.is_keyword("where") {
            let condition = self.input[self.current.end..].trim();
            self.fields.condition = Some(condition.to_string());
            return Ok(());
        }
        self.expect_end()
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        match self.current.kind {
            TokenKind::Eof => Ok(()),
            _ => Err(ParseError::TrailingInput {
                found: self.current.describe(),
                offset: self.current.start,
            }),
        }
    }
}
