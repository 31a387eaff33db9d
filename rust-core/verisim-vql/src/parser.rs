// SPDX-License-Identifier: PMPL-1.0-or-later
//! Recursive-descent parser for the VQL grammar.
//!
//! Clause order is fixed: WHERE, GROUP BY, HAVING, PROOF, ORDER BY, LIMIT,
//! OFFSET. Keywords are case-insensitive; no statement may silently succeed
//! with unknown trailing tokens.

use verisim_model::{CmpOp, Modality, Value};
use verisim_proof::ProofKind;

use crate::ast::*;
use crate::lexer::{tokenize, Span, Token, TokenKind};
use crate::{ParseError, ParseErrorKind};

/// Parse one VQL statement.
pub fn parse(input: &str) -> Result<Statement, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        input_len: input.len(),
    };
    let statement = parser.parse_statement()?;
    if let Some(tok) = parser.peek() {
        return Err(ParseError::new(
            ParseErrorKind::TrailingInput,
            tok.span,
            "statement already complete; remove the trailing tokens",
        ));
    }
    Ok(statement)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    input_len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eof_span(&self) -> Span {
        Span::new(self.input_len, self.input_len)
    }

    fn expect(&mut self, kind: &TokenKind, expected: &str) -> Result<Token, ParseError> {
        match self.advance() {
            Some(tok) if tok.kind == *kind => Ok(tok),
            Some(tok) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    expected: expected.to_string(),
                    found: describe(&tok.kind),
                },
                tok.span,
                format!("insert {expected} here"),
            )),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof {
                    expected: expected.to_string(),
                },
                self.eof_span(),
                "statement ends too early",
            )),
        }
    }

    /// True when the current token is the given keyword (case-insensitive).
    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Ident(s), .. }) if s.eq_ignore_ascii_case(kw))
    }

    fn at_keyword_at(&self, offset: usize, kw: &str) -> bool {
        matches!(self.peek_at(offset), Some(Token { kind: TokenKind::Ident(s), .. }) if s.eq_ignore_ascii_case(kw))
    }

    /// Consume the given keyword, erroring otherwise.
    fn expect_keyword(&mut self, kw: &str) -> Result<Token, ParseError> {
        if self.at_keyword(kw) {
            Ok(self.advance().unwrap())
        } else {
            match self.peek() {
                Some(tok) => Err(ParseError::new(
                    ParseErrorKind::UnexpectedToken {
                        expected: format!("'{kw}'"),
                        found: describe(&tok.kind),
                    },
                    tok.span,
                    format!("the {kw} keyword is required here"),
                )),
                None => Err(ParseError::new(
                    ParseErrorKind::UnexpectedEof {
                        expected: format!("'{kw}'"),
                    },
                    self.eof_span(),
                    "statement ends too early",
                )),
            }
        }
    }

    /// Consume the keyword if present.
    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ident(&mut self, expected: &str) -> Result<(String, Span), ParseError> {
        match self.advance() {
            Some(Token { kind: TokenKind::Ident(s), span }) => Ok((s, span)),
            Some(tok) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    expected: expected.to_string(),
                    found: describe(&tok.kind),
                },
                tok.span,
                format!("expected {expected}"),
            )),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof {
                    expected: expected.to_string(),
                },
                self.eof_span(),
                "statement ends too early",
            )),
        }
    }

    // -- statement ---------------------------------------------------------

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        if self.at_keyword("SELECT") {
            return Ok(Statement::Query(self.parse_query()?));
        }
        if self.at_keyword("INSERT") {
            return Ok(Statement::Insert(self.parse_insert()?));
        }
        if self.at_keyword("UPDATE") {
            return Ok(Statement::Update(self.parse_update()?));
        }
        if self.at_keyword("DELETE") {
            return Ok(Statement::Delete(self.parse_delete()?));
        }
        match self.peek() {
            Some(tok) => {
                let found = describe(&tok.kind);
                Err(ParseError::new(
                    ParseErrorKind::UnknownKeyword(found),
                    tok.span,
                    "statements start with SELECT, INSERT, UPDATE, or DELETE",
                ))
            }
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof {
                    expected: "a statement".to_string(),
                },
                self.eof_span(),
                "empty input",
            )),
        }
    }

    // -- query -------------------------------------------------------------

    fn parse_query(&mut self) -> Result<Query, ParseError> {
        self.expect_keyword("SELECT")?;

        if self.at_keyword("FROM") {
            let span = self.peek().map(|t| t.span).unwrap_or_else(|| self.eof_span());
            return Err(ParseError::new(
                ParseErrorKind::EmptyProjection,
                span,
                "list at least one projection, or '*'",
            ));
        }

        let projections = self.parse_projection_list()?;
        self.expect_keyword("FROM")?;
        let source = self.parse_source()?;

        let where_clause = if self.eat_keyword("WHERE") {
            Some(self.parse_condition()?)
        } else {
            None
        };

        let group_by = if self.at_keyword("GROUP") {
            self.expect_keyword("GROUP")?;
            self.expect_keyword("BY")?;
            self.parse_field_list()?
        } else {
            Vec::new()
        };

        let having = if self.eat_keyword("HAVING") {
            Some(self.parse_condition()?)
        } else {
            None
        };

        let proof = if self.eat_keyword("PROOF") {
            Some(self.parse_proof_clause()?)
        } else {
            None
        };

        let order_by = if self.at_keyword("ORDER") {
            self.expect_keyword("ORDER")?;
            self.expect_keyword("BY")?;
            self.parse_order_list()?
        } else {
            Vec::new()
        };

        let limit = if self.eat_keyword("LIMIT") {
            Some(self.parse_usize("LIMIT count")?)
        } else {
            None
        };

        let offset = if self.eat_keyword("OFFSET") {
            Some(self.parse_usize("OFFSET count")?)
        } else {
            None
        };

        Ok(Query {
            projections,
            source,
            where_clause,
            group_by,
            having,
            proof,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_projection_list(&mut self) -> Result<Vec<Projection>, ParseError> {
        let mut projections = vec![self.parse_projection()?];
        while matches!(self.peek(), Some(Token { kind: TokenKind::Comma, .. })) {
            self.advance();
            projections.push(self.parse_projection()?);
        }
        Ok(projections)
    }

    fn parse_projection(&mut self) -> Result<Projection, ParseError> {
        if let Some(Token { kind: TokenKind::Star, span }) = self.peek().cloned() {
            self.advance();
            return Ok(Projection::All { span });
        }

        // Aggregate?
        if let Some(func) = self.peek_agg_func() {
            if matches!(self.peek_at(1), Some(Token { kind: TokenKind::LParen, .. })) {
                return self.parse_aggregate(func);
            }
        }

        let (name, span) = self.ident("a projection")?;
        let modality = parse_modality(&name, span)?;

        if matches!(self.peek(), Some(Token { kind: TokenKind::Dot, .. })) {
            self.advance();
            let (field, field_span) = self.ident("a field name")?;
            Ok(Projection::Field(FieldRef {
                modality,
                field,
                span: span.merge(field_span),
            }))
        } else {
            Ok(Projection::Modality { modality, span })
        }
    }

    fn peek_agg_func(&self) -> Option<AggFunc> {
        let Some(Token { kind: TokenKind::Ident(s), .. }) = self.peek() else {
            return None;
        };
        match s.to_uppercase().as_str() {
            "COUNT" => Some(AggFunc::Count),
            "SUM" => Some(AggFunc::Sum),
            "AVG" => Some(AggFunc::Avg),
            "MIN" => Some(AggFunc::Min),
            "MAX" => Some(AggFunc::Max),
            _ => None,
        }
    }

    fn parse_aggregate(&mut self, func: AggFunc) -> Result<Projection, ParseError> {
        let start = self.advance().unwrap().span; // function name
        self.expect(&TokenKind::LParen, "'('")?;

        let arg = if matches!(self.peek(), Some(Token { kind: TokenKind::Star, .. })) {
            self.advance();
            None
        } else {
            let (name, span) = self.ident("'*' or MOD.field")?;
            let modality = parse_modality(&name, span)?;
            self.expect(&TokenKind::Dot, "'.'")?;
            let (field, field_span) = self.ident("a field name")?;
            Some(FieldRef {
                modality,
                field,
                span: span.merge(field_span),
            })
        };

        let close = self.expect(&TokenKind::RParen, "')'")?;
        Ok(Projection::Aggregate(Aggregate {
            func,
            arg,
            span: start.merge(close.span),
        }))
    }

    fn parse_source(&mut self) -> Result<Source, ParseError> {
        if self.at_keyword("HEXAD") {
            let start = self.advance().unwrap().span;
            let (id, span) = self.source_id("a hexad id")?;
            if id.is_empty() {
                return Err(ParseError::new(
                    ParseErrorKind::EmptyHexadId,
                    span,
                    "give the hexad's id, e.g. HEXAD ent-1",
                ));
            }
            return Ok(Source::Hexad {
                id,
                span: start.merge(span),
            });
        }
        if self.at_keyword("FEDERATION") {
            let start = self.advance().unwrap().span;
            let (pattern, span) = self.parse_glob()?;
            let mut policy = DriftPolicy::default();
            if self.at_keyword("WITH") {
                self.expect_keyword("WITH")?;
                self.expect_keyword("DRIFT")?;
                let (name, pspan) = self.ident("a drift policy")?;
                policy = match name.to_uppercase().as_str() {
                    "STRICT" => DriftPolicy::Strict,
                    "REPAIR" => DriftPolicy::Repair,
                    "TOLERATE" => DriftPolicy::Tolerate,
                    "LATEST" => DriftPolicy::Latest,
                    other => {
                        return Err(ParseError::new(
                            ParseErrorKind::UnknownKeyword(other.to_string()),
                            pspan,
                            "drift policies: STRICT, REPAIR, TOLERATE, LATEST",
                        ))
                    }
                };
            }
            return Ok(Source::Federation {
                pattern,
                policy,
                span: start.merge(span),
            });
        }
        if self.at_keyword("STORE") {
            let start = self.advance().unwrap().span;
            let (store_id, span) = self.source_id("a store id")?;
            return Ok(Source::Store {
                store_id,
                span: start.merge(span),
            });
        }
        match self.peek() {
            Some(tok) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    expected: "HEXAD, FEDERATION, or STORE".to_string(),
                    found: describe(&tok.kind),
                },
                tok.span,
                "FROM takes a HEXAD, FEDERATION, or STORE source",
            )),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof {
                    expected: "a source".to_string(),
                },
                self.eof_span(),
                "statement ends too early",
            )),
        }
    }

    /// Ids may be bare identifiers or quoted strings.
    fn source_id(&mut self, expected: &str) -> Result<(String, Span), ParseError> {
        match self.advance() {
            Some(Token { kind: TokenKind::Ident(s), span }) => Ok((s, span)),
            Some(Token { kind: TokenKind::Str(s), span }) => Ok((s, span)),
            Some(tok) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    expected: expected.to_string(),
                    found: describe(&tok.kind),
                },
                tok.span,
                format!("expected {expected}"),
            )),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof {
                    expected: expected.to_string(),
                },
                self.eof_span(),
                "statement ends too early",
            )),
        }
    }

    /// A federation glob: `/path/*`, `*`, an identifier, or a string.
    fn parse_glob(&mut self) -> Result<(String, Span), ParseError> {
        match self.advance() {
            Some(Token { kind: TokenKind::Glob(g), span }) => Ok((g, span)),
            Some(Token { kind: TokenKind::Star, span }) => Ok(("*".to_string(), span)),
            Some(Token { kind: TokenKind::Ident(s), span }) => Ok((s, span)),
            Some(Token { kind: TokenKind::Str(s), span }) => Ok((s, span)),
            Some(tok) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    expected: "a glob pattern".to_string(),
                    found: describe(&tok.kind),
                },
                tok.span,
                "e.g. FEDERATION /universities/*",
            )),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof {
                    expected: "a glob pattern".to_string(),
                },
                self.eof_span(),
                "statement ends too early",
            )),
        }
    }

    fn parse_usize(&mut self, what: &str) -> Result<usize, ParseError> {
        match self.advance() {
            Some(Token { kind: TokenKind::Int(n), span }) => {
                usize::try_from(n).map_err(|_| {
                    ParseError::new(
                        ParseErrorKind::InvalidNumber,
                        span,
                        format!("{what} must be non-negative"),
                    )
                })
            }
            Some(tok) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    expected: what.to_string(),
                    found: describe(&tok.kind),
                },
                tok.span,
                format!("{what} takes a decimal integer"),
            )),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof {
                    expected: what.to_string(),
                },
                self.eof_span(),
                "statement ends too early",
            )),
        }
    }

    fn parse_field_list(&mut self) -> Result<Vec<FieldRef>, ParseError> {
        let mut fields = vec![self.parse_field_ref()?];
        while matches!(self.peek(), Some(Token { kind: TokenKind::Comma, .. })) {
            self.advance();
            fields.push(self.parse_field_ref()?);
        }
        Ok(fields)
    }

    fn parse_field_ref(&mut self) -> Result<FieldRef, ParseError> {
        let (name, span) = self.ident("MOD.field")?;
        let modality = parse_modality(&name, span)?;
        self.expect(&TokenKind::Dot, "'.'")?;
        let (field, field_span) = self.ident("a field name")?;
        Ok(FieldRef {
            modality,
            field,
            span: span.merge(field_span),
        })
    }

    fn parse_order_list(&mut self) -> Result<Vec<OrderKey>, ParseError> {
        let mut keys = vec![self.parse_order_key()?];
        while matches!(self.peek(), Some(Token { kind: TokenKind::Comma, .. })) {
            self.advance();
            keys.push(self.parse_order_key()?);
        }
        Ok(keys)
    }

    fn parse_order_key(&mut self) -> Result<OrderKey, ParseError> {
        // Aggregate column, e.g. `COUNT(*)`, or `MOD.field`.
        let (column, span) = if let Some(func) = self.peek_agg_func() {
            if matches!(self.peek_at(1), Some(Token { kind: TokenKind::LParen, .. })) {
                let proj = self.parse_aggregate(func)?;
                let Projection::Aggregate(agg) = proj else {
                    unreachable!()
                };
                (agg.column_name(), agg.span)
            } else {
                let field = self.parse_field_ref()?;
                (field.column_name(), field.span)
            }
        } else {
            let field = self.parse_field_ref()?;
            (field.column_name(), field.span)
        };

        let ascending = if self.eat_keyword("DESC") {
            false
        } else {
            self.eat_keyword("ASC");
            true
        };

        Ok(OrderKey {
            column,
            ascending,
            span,
        })
    }

    fn parse_proof_clause(&mut self) -> Result<ProofClause, ParseError> {
        let first = self.parse_proof_spec()?;
        let mut rest = Vec::new();
        loop {
            let connective = if self.at_keyword("AND") {
                ProofConnective::And
            } else if self.at_keyword("OR") {
                ProofConnective::Or
            } else {
                break;
            };
            self.advance();
            rest.push((connective, self.parse_proof_spec()?));
        }
        Ok(ProofClause { first, rest })
    }

    fn parse_proof_spec(&mut self) -> Result<ProofSpec, ParseError> {
        let (kind_name, span) = self.ident("a proof kind")?;
        let kind: ProofKind = kind_name.parse().map_err(|_| {
            ParseError::new(
                ParseErrorKind::UnknownProofKind(kind_name.clone()),
                span,
                "kinds: EXISTENCE, INTEGRITY, CONSISTENCY, PROVENANCE, FRESHNESS, ACCESS, CITATION, CUSTOM",
            )
        })?;
        self.expect(&TokenKind::LParen, "'('")?;
        let (contract, _) = self.source_id("a contract name")?;
        let close = self.expect(&TokenKind::RParen, "')'")?;
        Ok(ProofSpec {
            kind,
            contract,
            span: span.merge(close.span),
        })
    }

    // -- conditions --------------------------------------------------------

    fn parse_condition(&mut self) -> Result<Condition, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Condition, ParseError> {
        let mut left = self.parse_and()?;
        while self.at_keyword("OR") {
            self.advance();
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, ParseError> {
        let mut left = self.parse_not()?;
        while self.at_keyword("AND") {
            self.advance();
            let right = self.parse_not()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Condition, ParseError> {
        if self.at_keyword("NOT") && !self.at_keyword_at(1, "EXISTS") {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Condition, ParseError> {
        if matches!(self.peek(), Some(Token { kind: TokenKind::LParen, .. })) {
            self.advance();
            let cond = self.parse_condition()?;
            self.expect(&TokenKind::RParen, "')'")?;
            return Ok(cond);
        }

        if self.at_keyword("DRIFT") {
            return self.parse_drift();
        }
        if self.at_keyword("CONSISTENT") {
            return self.parse_consistent();
        }

        // Aggregate comparison (HAVING): `COUNT(*) > 1`.
        if let Some(func) = self.peek_agg_func() {
            if matches!(self.peek_at(1), Some(Token { kind: TokenKind::LParen, .. })) {
                let proj = self.parse_aggregate(func)?;
                let Projection::Aggregate(agg) = proj else { unreachable!() };
                let op = self.parse_cmp_op()?;
                let (value, vspan) = self.parse_literal()?;
                let span = agg.span.merge(vspan);
                return Ok(Condition::Pred(Predicate::CompareAggregate {
                    agg,
                    op,
                    value,
                    span,
                }));
            }
        }

        // Modality-anchored predicates.
        if let Some(Token { kind: TokenKind::Ident(name), span }) = self.peek().cloned() {
            if let Ok(modality) = name.parse::<Modality>() {
                self.advance();
                return self.parse_modality_predicate(modality, span);
            }
        }

        // Graph pattern: subj edge obj.
        self.parse_graph_pattern()
    }

    fn parse_drift(&mut self) -> Result<Condition, ParseError> {
        let start = self.advance().unwrap().span; // DRIFT
        self.expect(&TokenKind::LParen, "'('")?;
        let a = self.parse_modality_name()?;
        self.expect(&TokenKind::Comma, "','")?;
        let b = self.parse_modality_name()?;
        self.expect(&TokenKind::RParen, "')'")?;
        let op = self.parse_cmp_op()?;
        let (threshold, tspan) = self.parse_number("a drift threshold")?;
        Ok(Condition::Pred(Predicate::Drift {
            a,
            b,
            op,
            threshold,
            span: start.merge(tspan),
        }))
    }

    fn parse_consistent(&mut self) -> Result<Condition, ParseError> {
        let start = self.advance().unwrap().span; // CONSISTENT
        self.expect(&TokenKind::LParen, "'('")?;
        let a = self.parse_modality_name()?;
        self.expect(&TokenKind::Comma, "','")?;
        let b = self.parse_modality_name()?;
        let mut end = self.expect(&TokenKind::RParen, "')'")?.span;

        let metric = if self.eat_keyword("USING") {
            let (name, span) = self.ident("a metric name")?;
            end = span;
            name
        } else {
            "COSINE".to_string()
        };

        // Optional comparison; bare CONSISTENT(A, B) means similarity >= 0.8.
        let (op, threshold) = if self.peek_cmp_op().is_some() {
            let op = self.parse_cmp_op()?;
            let (t, tspan) = self.parse_number("a similarity threshold")?;
            end = tspan;
            (op, t)
        } else {
            (CmpOp::Ge, 0.8)
        };

        Ok(Condition::Pred(Predicate::Consistent {
            a,
            b,
            metric,
            op,
            threshold,
            span: start.merge(end),
        }))
    }

    fn parse_modality_predicate(
        &mut self,
        modality: Modality,
        start: Span,
    ) -> Result<Condition, ParseError> {
        // MOD EXISTS / MOD NOT EXISTS
        if self.at_keyword("EXISTS") {
            let end = self.advance().unwrap().span;
            return Ok(Condition::Pred(Predicate::Exists {
                modality,
                span: start.merge(end),
            }));
        }
        if self.at_keyword("NOT") && self.at_keyword_at(1, "EXISTS") {
            self.advance();
            let end = self.advance().unwrap().span;
            return Ok(Condition::Pred(Predicate::NotExists {
                modality,
                span: start.merge(end),
            }));
        }

        // MOD SIMILAR TO [..] WITHIN t
        if self.at_keyword("SIMILAR") {
            self.advance();
            self.expect_keyword("TO")?;
            let (embedding, _) = self.parse_vector_literal()?;
            self.expect_keyword("WITHIN")?;
            let (threshold, tspan) = self.parse_number("a similarity threshold")?;
            return Ok(Condition::Pred(Predicate::SimilarTo {
                embedding,
                threshold,
                span: start.merge(tspan),
            }));
        }

        // MOD CONTAINS / MOD MATCHES over the whole modality.
        if self.at_keyword("CONTAINS") || self.at_keyword("MATCHES") {
            return self.parse_text_predicate(modality, None, start);
        }

        // MOD.field ...
        self.expect(&TokenKind::Dot, "'.'")?;
        let (field, _) = self.ident("a field name")?;

        if self.at_keyword("CONTAINS") || self.at_keyword("MATCHES") {
            return self.parse_text_predicate(modality, Some(field), start);
        }

        let op = self.parse_cmp_op()?;
        let left = FieldRef {
            modality,
            field,
            span: start,
        };

        // Cross-modal field compare: right side is MOD.field.
        if let Some(Token { kind: TokenKind::Ident(name), span }) = self.peek().cloned() {
            if let Ok(right_modality) = name.parse::<Modality>() {
                if matches!(self.peek_at(1), Some(Token { kind: TokenKind::Dot, .. })) {
                    self.advance();
                    self.advance(); // dot
                    let (right_field, rspan) = self.ident("a field name")?;
                    return Ok(Condition::Pred(Predicate::CompareFields {
                        left,
                        op,
                        right: FieldRef {
                            modality: right_modality,
                            field: right_field,
                            span: span.merge(rspan),
                        },
                        span: start.merge(rspan),
                    }));
                }
            }
        }

        let (value, vspan) = self.parse_literal()?;
        Ok(Condition::Pred(Predicate::Compare {
            field: left,
            op,
            value,
            span: start.merge(vspan),
        }))
    }

    fn parse_text_predicate(
        &mut self,
        modality: Modality,
        field: Option<String>,
        start: Span,
    ) -> Result<Condition, ParseError> {
        let is_contains = self.at_keyword("CONTAINS");
        self.advance();
        match self.advance() {
            Some(Token { kind: TokenKind::Str(text), span }) => {
                if is_contains {
                    Ok(Condition::Pred(Predicate::Contains {
                        modality,
                        field,
                        needle: text,
                        span: start.merge(span),
                    }))
                } else {
                    Ok(Condition::Pred(Predicate::MatchesTerms {
                        modality,
                        field,
                        terms: text.split_whitespace().map(String::from).collect(),
                        span: start.merge(span),
                    }))
                }
            }
            Some(tok) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    expected: "a quoted string".to_string(),
                    found: describe(&tok.kind),
                },
                tok.span,
                "CONTAINS/MATCHES take a double-quoted string",
            )),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof {
                    expected: "a quoted string".to_string(),
                },
                self.eof_span(),
                "statement ends too early",
            )),
        }
    }

    fn parse_graph_pattern(&mut self) -> Result<Condition, ParseError> {
        let (subject, start) = self.pattern_atom("a graph pattern subject")?;
        let (edge, _) = self.pattern_atom("a graph pattern edge")?;
        let (object, end) = self.pattern_atom("a graph pattern object")?;
        let subject = if subject == "_" { None } else { Some(subject) };
        Ok(Condition::Pred(Predicate::GraphPattern {
            subject,
            edge,
            object,
            span: start.merge(end),
        }))
    }

    fn pattern_atom(&mut self, expected: &str) -> Result<(String, Span), ParseError> {
        match self.advance() {
            Some(Token { kind: TokenKind::Ident(s), span }) => Ok((s, span)),
            Some(Token { kind: TokenKind::Str(s), span }) => Ok((s, span)),
            Some(tok) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    expected: expected.to_string(),
                    found: describe(&tok.kind),
                },
                tok.span,
                "graph patterns are three atoms: subject edge object",
            )),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof {
                    expected: expected.to_string(),
                },
                self.eof_span(),
                "statement ends too early",
            )),
        }
    }

    fn parse_modality_name(&mut self) -> Result<Modality, ParseError> {
        let (name, span) = self.ident("a modality name")?;
        parse_modality(&name, span)
    }

    fn peek_cmp_op(&self) -> Option<CmpOp> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Eq) => Some(CmpOp::Eq),
            Some(TokenKind::Neq) => Some(CmpOp::Ne),
            Some(TokenKind::Lt) => Some(CmpOp::Lt),
            Some(TokenKind::Le) => Some(CmpOp::Le),
            Some(TokenKind::Gt) => Some(CmpOp::Gt),
            Some(TokenKind::Ge) => Some(CmpOp::Ge),
            _ => None,
        }
    }

    fn parse_cmp_op(&mut self) -> Result<CmpOp, ParseError> {
        match self.peek_cmp_op() {
            Some(op) => {
                self.advance();
                Ok(op)
            }
            None => match self.peek() {
                Some(tok) => Err(ParseError::new(
                    ParseErrorKind::UnexpectedToken {
                        expected: "a comparison operator".to_string(),
                        found: describe(&tok.kind),
                    },
                    tok.span,
                    "operators: = != < <= > >=",
                )),
                None => Err(ParseError::new(
                    ParseErrorKind::UnexpectedEof {
                        expected: "a comparison operator".to_string(),
                    },
                    self.eof_span(),
                    "statement ends too early",
                )),
            },
        }
    }

    fn parse_number(&mut self, what: &str) -> Result<(f64, Span), ParseError> {
        match self.advance() {
            Some(Token { kind: TokenKind::Float(f), span }) => Ok((f, span)),
            Some(Token { kind: TokenKind::Int(n), span }) => Ok((n as f64, span)),
            Some(tok) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    expected: what.to_string(),
                    found: describe(&tok.kind),
                },
                tok.span,
                format!("{what} is a decimal number"),
            )),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof {
                    expected: what.to_string(),
                },
                self.eof_span(),
                "statement ends too early",
            )),
        }
    }

    fn parse_literal(&mut self) -> Result<(Value, Span), ParseError> {
        if matches!(self.peek(), Some(Token { kind: TokenKind::LBracket, .. })) {
            let (vec, span) = self.parse_vector_literal()?;
            return Ok((Value::Vector(vec), span));
        }
        match self.advance() {
            Some(Token { kind: TokenKind::Str(s), span }) => Ok((Value::Str(s), span)),
            Some(Token { kind: TokenKind::Int(n), span }) => Ok((Value::Int(n), span)),
            Some(Token { kind: TokenKind::Float(f), span }) => Ok((Value::Float(f), span)),
            Some(Token { kind: TokenKind::Ident(s), span }) => match s.to_uppercase().as_str() {
                "TRUE" => Ok((Value::Bool(true), span)),
                "FALSE" => Ok((Value::Bool(false), span)),
                "NULL" => Ok((Value::Null, span)),
                _ => Err(ParseError::new(
                    ParseErrorKind::UnexpectedToken {
                        expected: "a literal".to_string(),
                        found: format!("identifier '{s}'"),
                    },
                    span,
                    "literals are strings, numbers, booleans, NULL, or vectors",
                )),
            },
            Some(tok) => Err(ParseError::new(
                ParseErrorKind::UnexpectedToken {
                    expected: "a literal".to_string(),
                    found: describe(&tok.kind),
                },
                tok.span,
                "literals are strings, numbers, booleans, NULL, or vectors",
            )),
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEof {
                    expected: "a literal".to_string(),
                },
                self.eof_span(),
                "statement ends too early",
            )),
        }
    }

    fn parse_vector_literal(&mut self) -> Result<(Vec<f32>, Span), ParseError> {
        let open = self.expect(&TokenKind::LBracket, "'['")?;
        let mut values = Vec::new();
        if !matches!(self.peek(), Some(Token { kind: TokenKind::RBracket, .. })) {
            loop {
                let (v, _) = self.parse_number("a vector component")?;
                values.push(v as f32);
                if matches!(self.peek(), Some(Token { kind: TokenKind::Comma, .. })) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let close = self.expect(&TokenKind::RBracket, "']'")?;
        Ok((values, open.span.merge(close.span)))
    }

    // -- mutations ---------------------------------------------------------

    fn parse_insert(&mut self) -> Result<InsertStmt, ParseError> {
        self.expect_keyword("INSERT")?;
        self.expect_keyword("HEXAD")?;
        self.expect_keyword("WITH")?;

        let mut data = vec![self.parse_modality_data()?];
        while matches!(self.peek(), Some(Token { kind: TokenKind::Comma, .. })) {
            self.advance();
            data.push(self.parse_modality_data()?);
        }

        let proof = if self.eat_keyword("PROOF") {
            Some(self.parse_proof_clause()?)
        } else {
            None
        };

        Ok(InsertStmt { data, proof })
    }

    fn parse_modality_data(&mut self) -> Result<ModalityData, ParseError> {
        let (name, start) = self.ident("a modality name")?;
        let modality = parse_modality(&name, start)?;
        self.expect(&TokenKind::LBrace, "'{'")?;

        let mut fields = Vec::new();
        if !matches!(self.peek(), Some(Token { kind: TokenKind::RBrace, .. })) {
            loop {
                let (field, _) = self.ident("a field name")?;
                self.expect(&TokenKind::Colon, "':'")?;
                let (value, _) = self.parse_literal()?;
                fields.push((field, value));
                if matches!(self.peek(), Some(Token { kind: TokenKind::Comma, .. })) {
                    self.advance();
                } else {
                    break;
                }
            }
        }
        let close = self.expect(&TokenKind::RBrace, "'}'")?;
        Ok(ModalityData {
            modality,
            fields,
            span: start.merge(close.span),
        })
    }

    fn parse_update(&mut self) -> Result<UpdateStmt, ParseError> {
        self.expect_keyword("UPDATE")?;
        self.expect_keyword("HEXAD")?;
        let (id, _) = self.source_id("a hexad id")?;
        self.expect_keyword("SET")?;

        let mut sets = Vec::new();
        loop {
            let field = self.parse_field_ref()?;
            self.expect(&TokenKind::Eq, "'='")?;
            let (value, _) = self.parse_literal()?;
            sets.push((field, value));
            if matches!(self.peek(), Some(Token { kind: TokenKind::Comma, .. })) {
                self.advance();
            } else {
                break;
            }
        }

        let proof = if self.eat_keyword("PROOF") {
            Some(self.parse_proof_clause()?)
        } else {
            None
        };

        Ok(UpdateStmt { id, sets, proof })
    }

    fn parse_delete(&mut self) -> Result<DeleteStmt, ParseError> {
        self.expect_keyword("DELETE")?;
        self.expect_keyword("HEXAD")?;
        let (id, _) = self.source_id("a hexad id")?;

        let proof = if self.eat_keyword("PROOF") {
            Some(self.parse_proof_clause()?)
        } else {
            None
        };

        Ok(DeleteStmt { id, proof })
    }
}

fn parse_modality(name: &str, span: Span) -> Result<Modality, ParseError> {
    name.parse::<Modality>().map_err(|_| {
        ParseError::new(
            ParseErrorKind::UnknownModality(name.to_string()),
            span,
            format!("modalities: {}", Modality::names().join(", ").to_uppercase()),
        )
    })
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(s) => format!("identifier '{s}'"),
        TokenKind::Str(_) => "a string literal".to_string(),
        TokenKind::Int(n) => format!("integer {n}"),
        TokenKind::Float(f) => format!("float {f}"),
        TokenKind::Glob(g) => format!("glob '{g}'"),
        TokenKind::LParen => "'('".to_string(),
        TokenKind::RParen => "')'".to_string(),
        TokenKind::LBrace => "'{'".to_string(),
        TokenKind::RBrace => "'}'".to_string(),
        TokenKind::LBracket => "'['".to_string(),
        TokenKind::RBracket => "']'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Dot => "'.'".to_string(),
        TokenKind::Colon => "':'".to_string(),
        TokenKind::Star => "'*'".to_string(),
        TokenKind::Eq => "'='".to_string(),
        TokenKind::Neq => "'!='".to_string(),
        TokenKind::Lt => "'<'".to_string(),
        TokenKind::Le => "'<='".to_string(),
        TokenKind::Gt => "'>'".to_string(),
        TokenKind::Ge => "'>='".to_string(),
    }
}
