use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("unexpected end of target")]
    UnexpectedEof,
    #[error("unterminated string literal starting at position {0}")]
    UnterminatedString(usize),
    #[error("trailing input at position {0}")]
    TrailingInput(usize),
    #[error("empty target")]
    EmptyTarget,
}

/// Parsed form of one target string.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Graphite metric glob: `servers.*.cpu.{user,system}`.
    Path(String),
    Call {
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    /// `template(expr, name=value, ...)`; substitution happens at
    /// evaluation time.
    Template {
        inner: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Integer(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

pub fn parse_target(target: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(target);
    parser.skip_ws();
    if parser.at_end() {
        return Err(ParseError::EmptyTarget);
    }
    let expr = parser.parse_expr()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(ParseError::TrailingInput(parser.pos));
    }
    Ok(expr)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(input: &str) -> Parser {
        Parser {
            chars: input.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.skip_ws();
        match self.peek() {
            | None => Err(ParseError::UnexpectedEof),
            | Some(quote @ ('\'' | '"')) => self.parse_string(quote),
            | Some(_) => self.parse_word(),
        }
    }

    fn parse_string(&mut self, quote: char) -> Result<Expr, ParseError> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                | None => {
                    return Err(ParseError::UnterminatedString(start));
                }
                | Some(c) if c == quote => break,
                | Some(c) => out.push(c),
            }
        }
        Ok(Expr::Str(out))
    }

    /// A word is a path expression, a number, a boolean, or a function name
    /// when followed by an argument list. Commas inside braces and brackets
    /// belong to the glob, not the argument separator.
    fn parse_word(&mut self) -> Result<Expr, ParseError> {
        let start = self.pos;
        let mut word = String::new();
        let mut depth = 0usize;

        // A leading sign is part of a numeric literal.
        if matches!(self.peek(), Some('+' | '-')) {
            word.push(self.bump().unwrap());
        }

        while let Some(c) = self.peek() {
            let part_of_word = match c {
                | '{' | '[' => {
                    depth += 1;
                    true
                }
                | '}' | ']' => {
                    depth = depth.saturating_sub(1);
                    true
                }
                | ',' => depth > 0,
                | c if c.is_alphanumeric() => true,
                | '.' | '_' | '-' | '*' | '?' | '$' | ':' | '%' | '#' => true,
                | _ => false,
            };
            if !part_of_word {
                break;
            }
            word.push(c);
            self.pos += 1;
        }

        if word.is_empty() {
            return match self.peek() {
                | Some(c) => Err(ParseError::UnexpectedChar(c, self.pos)),
                | None => Err(ParseError::UnexpectedEof),
            };
        }

        if self.peek() == Some('(') && is_identifier(&word) {
            return self.parse_call(word);
        }

        Ok(classify_word(word, start))
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, ParseError> {
        self.bump(); // consume '('
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();

        loop {
            self.skip_ws();
            match self.peek() {
                | None => return Err(ParseError::UnexpectedEof),
                | Some(')') => {
                    self.bump();
                    break;
                }
                | Some(',') if !args.is_empty() || !kwargs.is_empty() => {
                    self.bump();
                    continue;
                }
                | Some(_) => {
                    let expr = self.parse_expr()?;
                    self.skip_ws();
                    // identifier followed by '=' is a keyword argument
                    match (&expr, self.peek()) {
                        | (Expr::Path(key), Some('='))
                            if is_identifier(key) =>
                        {
                            let key = key.clone();
                            self.bump();
                            let value = self.parse_expr()?;
                            kwargs.push((key, value));
                        }
                        | _ => args.push(expr),
                    }
                }
            }
        }

        if name == "template" {
            let mut args = args.into_iter();
            let inner = args
                .next()
                .ok_or(ParseError::UnexpectedEof)?;
            return Ok(Expr::Template {
                inner: Box::new(inner),
                args: args.collect(),
                kwargs,
            });
        }
        Ok(Expr::Call { name, args, kwargs })
    }
}

fn is_identifier(word: &str) -> bool {
    !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !word.chars().next().unwrap().is_ascii_digit()
}

fn classify_word(word: String, _start: usize) -> Expr {
    match word.as_str() {
        | "true" => return Expr::Bool(true),
        | "false" => return Expr::Bool(false),
        | _ => {}
    }
    if let Ok(int) = word.parse::<i64>() {
        return Expr::Integer(int);
    }
    // Floats including scientific notation; "1e3.x" style paths fall
    // through because the full word must parse.
    if word.chars().any(|c| c.is_ascii_digit())
        && word
            .chars()
            .all(|c| c.is_ascii_digit() || "+-.eE".contains(c))
    {
        if let Ok(float) = word.parse::<f64>() {
            return Expr::Float(float);
        }
    }
    Expr::Path(word)
}
