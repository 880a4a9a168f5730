use crate::frontend::{
    ast::{
        ArgumentList, AssignOp, Assignment, BinaryOp, CodeBlock, ConditionedBlock, Expression,
        ExpressionKind, ForeachStatement, FunctionCall, GetAttribute, IfStatement, Statement,
        StatementKind, UnaryOp,
    },
    lexer::{Keyword, Lexer, Span, Token, TokenKind},
    SourceFile,
};
use crate::{Error, Result};

#[derive(Debug)]
pub struct Parser<'source> {
    lexer: Lexer<'source>,
}

impl<'source> Parser<'source> {
    pub fn parse_program(source: &'source SourceFile) -> Result<CodeBlock> {
        let mut parser = Self {
            lexer: Lexer::new(source),
        };

        let block = parser.parse_code_block(&[])?;

        if let Some(token) = parser.lexer.peek()? {
            return Err(parser.error_at(
                token.span,
                format!("unexpected {}", parser.describe(token)),
            ));
        }

        Ok(block)
    }

    fn error_at(&self, span: Span, message: impl Into<String>) -> Error {
        Error::Parse {
            file: self.lexer.source().origin.to_string(),
            line: self.lexer.source().row_for_position(span.start),
            column: self.lexer.source().column_for_position(span.start),
            message: message.into(),
        }
    }

    fn error_eof(&self, expecting: &str) -> Error {
        Error::Parse {
            file: self.lexer.source().origin.to_string(),
            line: self.lexer.source().row_for_position(usize::MAX),
            column: self.lexer.source().column_for_position(usize::MAX),
            message: format!("expected {expecting} but reached end of file"),
        }
    }

    fn describe(&self, token: Token) -> String {
        format!(
            "`{}` ({:?})",
            self.lexer.source().value_of_span(token.span),
            token.kind
        )
    }

    fn expect_peek(&mut self, expecting: &str) -> Result<Token> {
        match self.lexer.peek()? {
            Some(token) => Ok(token),
            None => Err(self.error_eof(expecting)),
        }
    }

    fn expect_next(&mut self, expecting: &str) -> Result<Token> {
        match self.lexer.next()? {
            Some(token) => Ok(token),
            None => Err(self.error_eof(expecting)),
        }
    }

    fn expect_next_to_be(&mut self, kind: TokenKind) -> Result<Token> {
        let token = self.expect_next(&format!("{kind:?}"))?;

        if token.kind != kind {
            return Err(self.error_at(
                token.span,
                format!("expected {:?} but found {}", kind, self.describe(token)),
            ));
        }

        Ok(token)
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<Token> {
        self.expect_next_to_be(TokenKind::Keyword(keyword))
    }

    fn skip_newlines(&mut self) -> Result<()> {
        while let Some(token) = self.lexer.peek()? {
            if token.kind != TokenKind::Newline {
                break;
            }
            self.lexer.next()?;
        }
        Ok(())
    }

    /// Consume the statement separator: a newline, or end of file.
    fn end_of_statement(&mut self) -> Result<()> {
        match self.lexer.peek()? {
            None => Ok(()),
            Some(token) if token.kind == TokenKind::Newline => {
                self.lexer.next()?;
                Ok(())
            }
            Some(token) => Err(self.error_at(
                token.span,
                format!("expected end of statement but found {}", self.describe(token)),
            )),
        }
    }

    /// Parse statements until one of `terminators` (or end of file, if the
    /// terminator list is empty). The terminating keyword is left in the
    /// stream for the caller.
    fn parse_code_block(&mut self, terminators: &[Keyword]) -> Result<CodeBlock> {
        let mut block = CodeBlock::default();

        loop {
            self.skip_newlines()?;

            let Some(token) = self.lexer.peek()? else {
                if terminators.is_empty() {
                    break;
                }
                return Err(self.error_eof(&format!("{terminators:?}")));
            };

            if let TokenKind::Keyword(keyword) = token.kind {
                if terminators.contains(&keyword) {
                    break;
                }
            }

            block.statements.push(self.parse_statement()?);
        }

        Ok(block)
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        let token = self.expect_peek("a statement")?;

        match token.kind {
            TokenKind::Keyword(Keyword::If) => self.parse_if_statement(),
            TokenKind::Keyword(Keyword::Foreach) => self.parse_foreach_statement(),
            TokenKind::Keyword(Keyword::Break) => {
                self.lexer.next()?;
                self.end_of_statement()?;
                Ok(Statement {
                    span: token.span,
                    kind: StatementKind::Break,
                })
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.lexer.next()?;
                self.end_of_statement()?;
                Ok(Statement {
                    span: token.span,
                    kind: StatementKind::Continue,
                })
            }
            _ => {
                let expr = self.parse_expression()?;

                let kind = match self.lexer.peek()? {
                    Some(op)
                        if op.kind == TokenKind::Equals || op.kind == TokenKind::PlusEquals =>
                    {
                        self.lexer.next()?;
                        let rhs = self.parse_expression()?;
                        StatementKind::Assignment(Box::new(Assignment {
                            lhs: expr,
                            op: if op.kind == TokenKind::Equals {
                                AssignOp::Equal
                            } else {
                                AssignOp::PlusEqual
                            },
                            rhs,
                        }))
                    }
                    _ => StatementKind::Expression(expr),
                };

                self.end_of_statement()?;

                Ok(Statement {
                    span: token.span,
                    kind,
                })
            }
        }
    }

    fn parse_if_statement(&mut self) -> Result<Statement> {
        let if_token = self.expect_keyword(Keyword::If)?;

        let condition = self.parse_expression()?;
        self.end_of_statement()?;
        let block = self.parse_code_block(&[Keyword::Elif, Keyword::Else, Keyword::Endif])?;

        let mut statement = IfStatement {
            if_block: ConditionedBlock { condition, block },
            elif_blocks: Vec::new(),
            else_block: None,
        };

        loop {
            let token = self.expect_peek("`elif`, `else`, or `endif`")?;
            match token.kind {
                TokenKind::Keyword(Keyword::Elif) => {
                    self.lexer.next()?;
                    let condition = self.parse_expression()?;
                    self.end_of_statement()?;
                    let block =
                        self.parse_code_block(&[Keyword::Elif, Keyword::Else, Keyword::Endif])?;
                    statement
                        .elif_blocks
                        .push(ConditionedBlock { condition, block });
                }
                TokenKind::Keyword(Keyword::Else) => {
                    self.lexer.next()?;
                    self.end_of_statement()?;
                    statement.else_block = Some(self.parse_code_block(&[Keyword::Endif])?);
                }
                TokenKind::Keyword(Keyword::Endif) => {
                    self.lexer.next()?;
                    break;
                }
                _ => unreachable!("parse_code_block stops only at terminators"),
            }
        }

        Ok(Statement {
            span: if_token.span,
            kind: StatementKind::If(Box::new(statement)),
        })
    }

    fn parse_foreach_statement(&mut self) -> Result<Statement> {
        let foreach_token = self.expect_keyword(Keyword::Foreach)?;

        let mut variables = Vec::new();
        loop {
            let name = self.expect_next_to_be(TokenKind::Identifier)?;
            variables.push(self.lexer.source().value_of_span(name.span).to_owned());

            let token = self.expect_peek("`,` or `:`")?;
            match token.kind {
                TokenKind::Comma => {
                    self.lexer.next()?;
                }
                TokenKind::Colon => {
                    self.lexer.next()?;
                    break;
                }
                _ => {
                    return Err(self.error_at(
                        token.span,
                        format!("expected `,` or `:` but found {}", self.describe(token)),
                    ))
                }
            }
        }

        let iterable = self.parse_expression()?;
        self.end_of_statement()?;
        let block = self.parse_code_block(&[Keyword::Endforeach])?;
        self.expect_keyword(Keyword::Endforeach)?;

        Ok(Statement {
            span: foreach_token.span,
            kind: StatementKind::Foreach(Box::new(ForeachStatement {
                variables,
                iterable,
                block,
            })),
        })
    }

    pub fn parse_expression(&mut self) -> Result<Expression> {
        let condition = self.parse_or_expression()?;

        if self
            .lexer
            .peek()?
            .is_some_and(|t| t.kind == TokenKind::QuestionMark)
        {
            self.lexer.next()?;
            let if_true = self.parse_expression()?;
            self.expect_next_to_be(TokenKind::Colon)?;
            let if_false = self.parse_expression()?;

            return Ok(Expression {
                span: condition.span,
                kind: ExpressionKind::Ternary(
                    Box::new(condition),
                    Box::new(if_true),
                    Box::new(if_false),
                ),
            });
        }

        Ok(condition)
    }

    fn parse_or_expression(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_and_expression()?;

        while self
            .lexer
            .peek()?
            .is_some_and(|t| t.kind == TokenKind::Keyword(Keyword::Or))
        {
            self.lexer.next()?;
            let rhs = self.parse_and_expression()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }

        Ok(lhs)
    }

    fn parse_and_expression(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_not_expression()?;

        while self
            .lexer
            .peek()?
            .is_some_and(|t| t.kind == TokenKind::Keyword(Keyword::And))
        {
            self.lexer.next()?;
            let rhs = self.parse_not_expression()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }

        Ok(lhs)
    }

    fn parse_not_expression(&mut self) -> Result<Expression> {
        if let Some(token) = self.lexer.peek()? {
            if token.kind == TokenKind::Keyword(Keyword::Not)
                // `not in` belongs to the comparison below us
                && !self
                    .lexer
                    .peek_nth(1)?
                    .is_some_and(|t| t.kind == TokenKind::Keyword(Keyword::In))
            {
                self.lexer.next()?;
                let operand = self.parse_not_expression()?;
                return Ok(Expression {
                    span: token.span,
                    kind: ExpressionKind::Unary(UnaryOp::Not, Box::new(operand)),
                });
            }
        }

        self.parse_comparison_expression()
    }

    fn parse_comparison_expression(&mut self) -> Result<Expression> {
        let lhs = self.parse_additive_expression()?;

        let Some(token) = self.lexer.peek()? else {
            return Ok(lhs);
        };

        let op = match token.kind {
            TokenKind::DoubleEquals => BinaryOp::Eq,
            TokenKind::NotEquals => BinaryOp::Ne,
            TokenKind::LessThan => BinaryOp::Lt,
            TokenKind::LessThanOrEqualTo => BinaryOp::Le,
            TokenKind::GreaterThan => BinaryOp::Gt,
            TokenKind::GreaterThanOrEqualTo => BinaryOp::Ge,
            TokenKind::Keyword(Keyword::In) => BinaryOp::In,
            TokenKind::Keyword(Keyword::Not)
                if self
                    .lexer
                    .peek_nth(1)?
                    .is_some_and(|t| t.kind == TokenKind::Keyword(Keyword::In)) =>
            {
                self.lexer.next()?;
                BinaryOp::NotIn
            }
            _ => return Ok(lhs),
        };

        self.lexer.next()?;
        let rhs = self.parse_additive_expression()?;
        Ok(binary(op, lhs, rhs))
    }

    fn parse_additive_expression(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_multiplicative_expression()?;

        while let Some(token) = self.lexer.peek()? {
            let op = match token.kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.lexer.next()?;
            let rhs = self.parse_multiplicative_expression()?;
            lhs = binary(op, lhs, rhs);
        }

        Ok(lhs)
    }

    fn parse_multiplicative_expression(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_unary_expression()?;

        while let Some(token) = self.lexer.peek()? {
            let op = match token.kind {
                TokenKind::Asterisk => BinaryOp::Mul,
                TokenKind::Divide => BinaryOp::Div,
                TokenKind::Modulus => BinaryOp::Mod,
                _ => break,
            };
            self.lexer.next()?;
            let rhs = self.parse_unary_expression()?;
            lhs = binary(op, lhs, rhs);
        }

        Ok(lhs)
    }

    fn parse_unary_expression(&mut self) -> Result<Expression> {
        if let Some(token) = self.lexer.peek()? {
            if token.kind == TokenKind::Minus {
                self.lexer.next()?;
                let operand = self.parse_unary_expression()?;
                return Ok(Expression {
                    span: token.span,
                    kind: ExpressionKind::Unary(UnaryOp::Neg, Box::new(operand)),
                });
            }
        }

        self.parse_postfix_expression()
    }

    fn parse_postfix_expression(&mut self) -> Result<Expression> {
        let mut expr = self.parse_primary_expression()?;

        while let Some(token) = self.lexer.peek()? {
            match token.kind {
                // Methods: `holder.name(...)`. Attribute access that is not a
                // call has no meaning in the DSL.
                TokenKind::Dot => {
                    self.lexer.next()?;
                    let name = self.expect_next_to_be(TokenKind::Identifier)?;
                    let callee = Expression {
                        span: name.span,
                        kind: ExpressionKind::Identifier(
                            self.lexer.source().value_of_span(name.span).to_owned(),
                        ),
                    };
                    self.expect_next_to_be(TokenKind::OpenParen)?;
                    let args = self.parse_argument_list()?;

                    let span = expr.span;
                    expr = Expression {
                        span,
                        kind: ExpressionKind::GetAttribute(Box::new(GetAttribute {
                            holder: expr,
                            held: Expression {
                                span: name.span,
                                kind: ExpressionKind::FunctionCall(Box::new(FunctionCall {
                                    callee,
                                    args,
                                })),
                            },
                        })),
                    };
                }
                TokenKind::OpenParen => {
                    self.lexer.next()?;
                    let args = self.parse_argument_list()?;
                    let span = expr.span;
                    expr = Expression {
                        span,
                        kind: ExpressionKind::FunctionCall(Box::new(FunctionCall {
                            callee: expr,
                            args,
                        })),
                    };
                }
                TokenKind::OpenBracket => {
                    self.lexer.next()?;
                    let index = self.parse_expression()?;
                    self.expect_next_to_be(TokenKind::CloseBracket)?;
                    let span = expr.span;
                    expr = Expression {
                        span,
                        kind: ExpressionKind::Subscript(Box::new(expr), Box::new(index)),
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    /// Arguments after an already consumed `(`, up to and including the `)`.
    fn parse_argument_list(&mut self) -> Result<ArgumentList> {
        let mut args = ArgumentList::default();

        loop {
            let token = self.expect_peek("an argument or `)`")?;
            if token.kind == TokenKind::CloseParen {
                self.lexer.next()?;
                break;
            }

            let expr = self.parse_expression()?;

            // An identifier followed by `:` is a keyword argument
            if self
                .lexer
                .peek()?
                .is_some_and(|t| t.kind == TokenKind::Colon)
            {
                self.lexer.next()?;
                let ExpressionKind::Identifier(name) = expr.kind else {
                    return Err(
                        self.error_at(expr.span, "keyword argument names must be identifiers")
                    );
                };
                let value = self.parse_expression()?;
                args.keyword.push((name, value));
            } else {
                args.positional.push(expr);
            }

            let token = self.expect_peek("`,` or `)`")?;
            match token.kind {
                TokenKind::Comma => {
                    self.lexer.next()?;
                }
                TokenKind::CloseParen => {
                    self.lexer.next()?;
                    break;
                }
                _ => {
                    return Err(self.error_at(
                        token.span,
                        format!("expected `,` or `)` but found {}", self.describe(token)),
                    ))
                }
            }
        }

        Ok(args)
    }

    fn parse_primary_expression(&mut self) -> Result<Expression> {
        let token = self.expect_next("an expression")?;
        let value = self.lexer.source().value_of_span(token.span);

        let kind = match token.kind {
            TokenKind::StringLiteral => {
                ExpressionKind::String(unescape(&value[1..value.len() - 1]))
            }
            // Triple-quoted strings are literal; no escape processing
            TokenKind::TripleStringLiteral => {
                ExpressionKind::String(value[3..value.len() - 3].to_owned())
            }
            TokenKind::FStringLiteral => {
                ExpressionKind::FString(unescape(&value[2..value.len() - 1]))
            }
            TokenKind::BooleanLiteral => ExpressionKind::Boolean(value == "true"),
            TokenKind::IntegerLiteral => ExpressionKind::Number(parse_number(value).ok_or_else(
                || self.error_at(token.span, format!("invalid integer literal `{value}`")),
            )?),
            TokenKind::Identifier => ExpressionKind::Identifier(value.to_owned()),
            TokenKind::OpenParen => {
                let inner = self.parse_expression()?;
                self.expect_next_to_be(TokenKind::CloseParen)?;
                return Ok(inner);
            }
            TokenKind::OpenBracket => return self.parse_array_literal(token.span),
            TokenKind::OpenBrace => return self.parse_dict_literal(token.span),
            _ => {
                return Err(self.error_at(
                    token.span,
                    format!("expected an expression but found {}", self.describe(token)),
                ))
            }
        };

        Ok(Expression {
            span: token.span,
            kind,
        })
    }

    /// An array literal after an already consumed `[`.
    fn parse_array_literal(&mut self, open: Span) -> Result<Expression> {
        let mut elements = Vec::new();

        loop {
            let token = self.expect_peek("an array element or `]`")?;
            if token.kind == TokenKind::CloseBracket {
                self.lexer.next()?;
                break;
            }

            elements.push(self.parse_expression()?);

            let token = self.expect_peek("`,` or `]`")?;
            match token.kind {
                TokenKind::Comma => {
                    self.lexer.next()?;
                }
                TokenKind::CloseBracket => {
                    self.lexer.next()?;
                    break;
                }
                _ => {
                    return Err(self.error_at(
                        token.span,
                        format!("expected `,` or `]` but found {}", self.describe(token)),
                    ))
                }
            }
        }

        Ok(Expression {
            span: open,
            kind: ExpressionKind::Array(elements),
        })
    }

    /// A dict literal after an already consumed `{`.
    fn parse_dict_literal(&mut self, open: Span) -> Result<Expression> {
        let mut entries = Vec::new();

        loop {
            let token = self.expect_peek("a dict entry or `}`")?;
            if token.kind == TokenKind::CloseBrace {
                self.lexer.next()?;
                break;
            }

            let key = self.parse_expression()?;
            self.expect_next_to_be(TokenKind::Colon)?;
            let value = self.parse_expression()?;
            entries.push((key, value));

            let token = self.expect_peek("`,` or `}`")?;
            match token.kind {
                TokenKind::Comma => {
                    self.lexer.next()?;
                }
                TokenKind::CloseBrace => {
                    self.lexer.next()?;
                    break;
                }
                _ => {
                    return Err(self.error_at(
                        token.span,
                        format!("expected `,` or `}}` but found {}", self.describe(token)),
                    ))
                }
            }
        }

        Ok(Expression {
            span: open,
            kind: ExpressionKind::Dict(entries),
        })
    }
}

fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Expression {
    Expression {
        span: lhs.span,
        kind: ExpressionKind::Binary(op, Box::new(lhs), Box::new(rhs)),
    }
}

fn parse_number(value: &str) -> Option<i64> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(oct) = value.strip_prefix("0o").or_else(|| value.strip_prefix("0O")) {
        i64::from_str_radix(oct, 8).ok()
    } else if let Some(bin) = value.strip_prefix("0b").or_else(|| value.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2).ok()
    } else {
        value.parse().ok()
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }

    out
}
