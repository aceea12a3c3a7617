//! Filter expression parser
//!
//! Grammar, loosely:
//!
//! ```text
//! expr    := term (binop term)*
//! term    := '!' expr-to-end-of-group | '(' expr ')' | leaf
//! leaf    := field relop value
//! binop   := '&&' | '&' | '||' | '|' | '^'
//! relop   := '==' | '=' | '!=' | '<' | '<=' | '>' | '>='
//! value   := bare-word | '"' quoted '"'
//! ```
//!
//! `&&` binds tighter than `^`, which binds tighter than `||`. A `!` negates
//! everything that follows it up to the end of the enclosing parentheses.

use crate::error::{Result, TraceError};
use crate::source::FieldCatalog;

use super::expression::{FieldSelector, RelOp, SimpleExpression};
use super::tree::{FilterTree, LogicalOp};

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Open,
    Close,
    Not,
    Logic(LogicalOp),
    Rel(RelOp),
    Word(String),
    Quoted(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && !"()&|^!=<>\"".contains(c)
}

struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn error(&self, offset: usize, reason: impl Into<String>) -> TraceError {
        syntax_error(self.input, offset, reason)
    }

    /// Consume `next` if it follows
    fn eat(&mut self, next: char) -> bool {
        self.chars.next_if(|&(_, c)| c == next).is_some()
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        while let Some((offset, c)) = self.chars.next() {
            let kind = match c {
                c if c.is_whitespace() => continue,
                '(' => TokenKind::Open,
                ')' => TokenKind::Close,
                '^' => TokenKind::Logic(LogicalOp::XOR),
                '&' => {
                    self.eat('&');
                    TokenKind::Logic(LogicalOp::AND)
                }
                '|' => {
                    self.eat('|');
                    TokenKind::Logic(LogicalOp::OR)
                }
                '!' if self.eat('=') => TokenKind::Rel(RelOp::Ne),
                '!' => TokenKind::Not,
                '=' => {
                    self.eat('=');
                    TokenKind::Rel(RelOp::Eq)
                }
                '<' if self.eat('=') => TokenKind::Rel(RelOp::Le),
                '<' => TokenKind::Rel(RelOp::Lt),
                '>' if self.eat('=') => TokenKind::Rel(RelOp::Ge),
                '>' => TokenKind::Rel(RelOp::Gt),
                '"' => TokenKind::Quoted(self.quoted(offset)?),
                _ => {
                    let mut end = offset + c.len_utf8();
                    while let Some((i, c)) = self.chars.next_if(|&(_, c)| is_word_char(c)) {
                        end = i + c.len_utf8();
                    }
                    TokenKind::Word(self.input[offset..end].to_string())
                }
            };
            tokens.push(Token { kind, offset });
        }
        Ok(tokens)
    }

    fn quoted(&mut self, start: usize) -> Result<String> {
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => return Ok(value),
                Some((i, '\\')) => match self.chars.next() {
                    Some((_, c)) => value.push(c),
                    None => return Err(self.error(i, "dangling escape")),
                },
                Some((_, c)) => value.push(c),
                None => return Err(self.error(start, "unterminated string")),
            }
        }
    }
}

fn syntax_error(expression: &str, offset: usize, reason: impl Into<String>) -> TraceError {
    TraceError::FilterSyntax {
        expression: expression.to_string(),
        offset,
        reason: reason.into(),
    }
}

/// Operator stack entries
#[derive(Debug, Clone, Copy)]
enum Pending {
    Open(usize),
    Not,
    Binary(LogicalOp),
}

fn precedence(op: LogicalOp) -> u8 {
    if op.contains(LogicalOp::AND) {
        3
    } else if op.contains(LogicalOp::XOR) {
        2
    } else {
        1
    }
}

/// Deepest tree the parser will build; evaluating and printing a tree
/// recurse once per level
pub const MAX_DEPTH: usize = 256;

struct Operand {
    tree: FilterTree,
    depth: usize,
}

struct Builder<'a> {
    expression: &'a str,
    operands: Vec<Operand>,
    operators: Vec<Pending>,
}

impl Builder<'_> {
    fn pop_operand(&mut self) -> Operand {
        self.operands.pop().unwrap_or(Operand {
            tree: FilterTree::Idle,
            depth: 0,
        })
    }

    /// Reduce one pending operator; `offset` is where the reduction was
    /// triggered, for errors
    fn apply(&mut self, pending: Pending, offset: usize) -> Result<()> {
        let operand = match pending {
            Pending::Not => {
                let Operand { tree, depth } = self.pop_operand();
                let depth = if matches!(tree, FilterTree::Node { .. }) { depth } else { depth + 1 };
                Operand {
                    tree: tree.negate(),
                    depth,
                }
            }
            Pending::Binary(op) => {
                let right = self.pop_operand();
                let left = self.pop_operand();
                Operand {
                    depth: 1 + left.depth.max(right.depth),
                    tree: FilterTree::combine(op, left.tree, right.tree),
                }
            }
            Pending::Open(_) => return Ok(()),
        };
        if operand.depth > MAX_DEPTH {
            return Err(syntax_error(
                self.expression,
                offset,
                format!("expression nests deeper than {} levels", MAX_DEPTH),
            ));
        }
        self.operands.push(operand);
        Ok(())
    }

    /// Reduce back to the innermost open parenthesis, returning it
    fn close_group(&mut self, offset: usize) -> Result<Option<usize>> {
        while let Some(pending) = self.operators.pop() {
            if let Pending::Open(open) = pending {
                return Ok(Some(open));
            }
            self.apply(pending, offset)?;
        }
        Ok(None)
    }

    fn push_binary(&mut self, op: LogicalOp, offset: usize) -> Result<()> {
        while let Some(&Pending::Binary(top)) = self.operators.last() {
            if precedence(top) < precedence(op) {
                break;
            }
            self.operators.pop();
            self.apply(Pending::Binary(top), offset)?;
        }
        self.operators.push(Pending::Binary(op));
        Ok(())
    }
}

/// Parse `expression` into a tree, resolving fields against `catalog`
///
/// Blank input parses to [`FilterTree::Idle`].
pub fn parse(expression: &str, catalog: &FieldCatalog) -> Result<FilterTree> {
    let tokens = Lexer::new(expression).tokenize()?;
    if tokens.is_empty() {
        return Ok(FilterTree::Idle);
    }

    let mut builder = Builder {
        expression,
        operands: Vec::new(),
        operators: Vec::new(),
    };
    let mut expect_operand = true;
    let mut tokens = tokens.into_iter();

    while let Some(token) = tokens.next() {
        let offset = token.offset;
        match (token.kind, expect_operand) {
            (TokenKind::Open, true) => builder.operators.push(Pending::Open(offset)),
            (TokenKind::Not, true) => builder.operators.push(Pending::Not),
            (TokenKind::Word(path), true) => {
                let field = FieldSelector::resolve(&path, catalog)?;
                let op = match tokens.next() {
                    Some(Token {
                        kind: TokenKind::Rel(op),
                        ..
                    }) => op,
                    Some(other) => {
                        return Err(syntax_error(
                            expression,
                            other.offset,
                            "expected a comparison operator",
                        ))
                    }
                    None => {
                        return Err(syntax_error(
                            expression,
                            expression.len(),
                            "expected a comparison operator",
                        ))
                    }
                };
                let literal = match tokens.next() {
                    Some(Token {
                        kind: TokenKind::Word(value) | TokenKind::Quoted(value),
                        ..
                    }) => value,
                    Some(other) => {
                        return Err(syntax_error(expression, other.offset, "expected a value"))
                    }
                    None => {
                        return Err(syntax_error(expression, expression.len(), "expected a value"))
                    }
                };
                builder.operands.push(Operand {
                    tree: FilterTree::leaf(SimpleExpression::new(field, op, &literal)?),
                    depth: 1,
                });
                expect_operand = false;
            }
            (TokenKind::Close, false) => {
                if builder.close_group(offset)?.is_none() {
                    return Err(syntax_error(expression, offset, "unmatched ')'"));
                }
            }
            (TokenKind::Logic(op), false) => {
                builder.push_binary(op, offset)?;
                expect_operand = true;
            }
            (TokenKind::Close, true) => {
                return Err(syntax_error(expression, offset, "empty group or missing operand"))
            }
            (_, true) => return Err(syntax_error(expression, offset, "expected a field")),
            (_, false) => {
                return Err(syntax_error(expression, offset, "expected '&&', '||', '^' or ')'"))
            }
        }
    }

    if expect_operand {
        return Err(syntax_error(
            expression,
            expression.len(),
            "expression ends where an operand is expected",
        ));
    }
    if let Some(open) = builder.close_group(expression.len())? {
        return Err(syntax_error(expression, open, "unmatched '('"));
    }
    match (builder.operands.pop(), builder.operands.is_empty()) {
        (Some(Operand { tree, .. }), true) => Ok(tree),
        _ => Err(TraceError::InternalError {
            reason: format!("filter parser left a malformed stack for '{}'", expression),
        }),
    }
}
