//! AST and recursive-descent parser for the embedded expression language.
//!
//! The language is deliberately small: literals, names, lists, calls,
//! method calls, attribute access, assignment and a handful of operators.
//! Statements are newline- or `;`-separated; single-line `%` pattern lines
//! hold one statement, `%%` blocks hold a sequence.

use crate::embedded::lexer::{Lexer, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Str(String),
    Bool(bool),
    None,
    Name(String),
    List(Vec<Expr>),
    Attr {
        target: Box<Expr>,
        name: String,
    },
    Call {
        target: Box<Expr>,
        args: Vec<Expr>,
    },
    Method {
        target: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { name: String, expr: Expr },
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

pub fn parse_block(src: &str) -> Result<Block, String> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.parse_block()
}

pub fn parse_expression(src: &str) -> Result<Expr, String> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.skip_newlines();
    let expr = parser.parse_expr()?;
    parser.skip_newlines();
    parser.expect(Token::Eof)?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn current(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn peek(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        if self.current() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(format!("expected {}, found {}", expected, self.current()))
        }
    }

    fn skip_newlines(&mut self) {
        while self.current() == &Token::Newline {
            self.advance();
        }
    }

    fn parse_block(&mut self) -> Result<Block, String> {
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            if self.current() == &Token::Eof {
                break;
            }
            stmts.push(self.parse_stmt()?);
            match self.current() {
                Token::Newline => {
                    self.advance();
                }
                Token::Eof => break,
                other => return Err(format!("expected end of statement, found {}", other)),
            }
        }
        Ok(Block { stmts })
    }

    fn parse_stmt(&mut self) -> Result<Stmt, String> {
        if let Token::Ident(name) = self.current() {
            if self.peek(1) == &Token::Assign {
                let name = name.clone();
                self.advance();
                self.advance();
                let expr = self.parse_expr()?;
                return Ok(Stmt::Assign { name, expr });
            }
        }
        Ok(Stmt::Expr(self.parse_expr()?))
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.parse_additive()?;
        let op = match self.current() {
            Token::EqEq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.parse_additive()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.current() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        while self.current() == &Token::Star {
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op: BinaryOp::Mul,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.current() {
            Token::Minus => {
                self.advance();
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    expr: Box::new(self.parse_unary()?),
                })
            }
            Token::Not => {
                self.advance();
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    expr: Box::new(self.parse_unary()?),
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.current() {
                Token::Dot => {
                    self.advance();
                    let name = match self.advance() {
                        Token::Ident(name) => name,
                        other => return Err(format!("expected attribute name, found {}", other)),
                    };
                    if self.current() == &Token::LParen {
                        let args = self.parse_args()?;
                        expr = Expr::Method {
                            target: Box::new(expr),
                            name,
                            args,
                        };
                    } else {
                        expr = Expr::Attr {
                            target: Box::new(expr),
                            name,
                        };
                    }
                }
                Token::LParen => {
                    let args = self.parse_args()?;
                    expr = Expr::Call {
                        target: Box::new(expr),
                        args,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, String> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        self.skip_newlines();
        if self.current() == &Token::RParen {
            self.advance();
            return Ok(args);
        }
        loop {
            self.skip_newlines();
            args.push(self.parse_expr()?);
            self.skip_newlines();
            match self.advance() {
                Token::Comma => {}
                Token::RParen => return Ok(args),
                other => return Err(format!("expected ',' or ')', found {}", other)),
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::Int(v) => Ok(Expr::Int(v)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::None => Ok(Expr::None),
            Token::Ident(name) => Ok(Expr::Name(name)),
            Token::LParen => {
                self.skip_newlines();
                let expr = self.parse_expr()?;
                self.skip_newlines();
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                self.skip_newlines();
                if self.current() == &Token::RBracket {
                    self.advance();
                    return Ok(Expr::List(items));
                }
                loop {
                    self.skip_newlines();
                    items.push(self.parse_expr()?);
                    self.skip_newlines();
                    match self.advance() {
                        Token::Comma => {}
                        Token::RBracket => return Ok(Expr::List(items)),
                        other => return Err(format!("expected ',' or ']', found {}", other)),
                    }
                }
            }
            other => Err(format!("unexpected token {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assignment_with_method_chain() {
        let block = parse_block("cursor = cursor.next().next()").unwrap();
        assert_eq!(block.stmts.len(), 1);
        assert!(matches!(
            &block.stmts[0],
            Stmt::Assign { name, expr: Expr::Method { .. } } if name == "cursor"
        ));
    }

    #[test]
    fn parses_call_with_list_and_string() {
        let expr = parse_expression("find_single([a, b], 'mov r0, r1')").unwrap();
        match expr {
            Expr::Call { target, args } => {
                assert_eq!(*target, Expr::Name("find_single".into()));
                assert_eq!(args.len(), 2);
                assert!(matches!(args[0], Expr::List(_)));
            }
            other => panic!("unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn parses_multi_statement_block() {
        let block = parse_block("x = 1\n\ny = x + 2\nexpect(y == 3)").unwrap();
        assert_eq!(block.stmts.len(), 3);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_block("x = = 2").is_err());
        assert!(parse_expression("").is_err());
    }
}
