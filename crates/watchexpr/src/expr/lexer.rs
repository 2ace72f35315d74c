use smallvec::SmallVec;
use std::str;
use thiserror::Error;

/// Capacity of a token sequence.
pub const MAX_TOKENS: usize = 32;

/// Longest literal text a single token may carry, in bytes.
pub const MAX_TOKEN_TEXT: usize = 31;

/// A tokenized expression.
pub type Tokens = SmallVec<[Token; MAX_TOKENS]>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexError {
    /// No lexical rule matches the input at the given byte offset.
    #[error("no rule matches the input at offset {offset}")]
    NoMatch { offset: usize },
    /// A literal starting at the given byte offset is longer than
    /// [`MAX_TOKEN_TEXT`] bytes.
    #[error("literal at offset {offset} is too long")]
    TokenTooLong { offset: usize },
    /// The expression produced more than [`MAX_TOKENS`] tokens.
    #[error("expression has more than 32 tokens")]
    TooManyTokens,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// A decimal literal, like `42`.
    Number,
    /// A hex literal, like `0x2a`.
    HexNumber,
    /// A register reference, like `$pc`.
    Register,
    /// `(`.
    LParen,
    /// `)`.
    RParen,
    /// Binary `+`.
    Add,
    /// Binary `-`.
    Sub,
    /// Binary `*`.
    Mul,
    /// `/`.
    Div,
    /// `<`.
    Lt,
    /// `>`.
    Gt,
    /// `<=`.
    Le,
    /// `>=`.
    Ge,
    /// `==`.
    Eq,
    /// `!=`.
    Ne,
    /// `&&`.
    And,
    /// `||`.
    Or,
    /// Unary `+`.
    UnaryPlus,
    /// Unary `-`.
    UnaryMinus,
    /// Unary `*`, the dereference operator.
    Deref,
}

impl TokenKind {
    /// Test if a token of this kind can terminate a value. An operator
    /// directly after one of these is binary, not unary.
    fn ends_value(self) -> bool {
        match self {
            Self::RParen | Self::Number | Self::HexNumber | Self::Register => true,
            _ => false,
        }
    }
}

/// A classified lexical unit of an expression.
///
/// `text` carries the matched substring for the literal-bearing kinds
/// (`Number`, `HexNumber`, `Register`) and is empty otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    kind: TokenKind,
    text: String,
}

impl Token {
    fn fixed(kind: TokenKind) -> Token {
        Token {
            kind,
            text: String::new(),
        }
    }

    /// The kind of the token.
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// The matched substring, empty unless the kind is literal-bearing.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Tokenize an expression.
///
/// The scanner applies the lexical rules in a fixed order so that
/// overlapping patterns resolve deterministically: two-character operators
/// are probed before their one-character prefixes, and the `0x` hex rule
/// before the bare-digit decimal rule. A `+`, `-` or `*` lexes as unary
/// unless the previously emitted token can terminate a value.
pub fn tokenize(input: &str) -> Result<Tokens, LexError> {
    let mut lexer = Lexer::new(input);
    let mut tokens = Tokens::new();

    loop {
        let prev = tokens.last().map(|t| t.kind());

        let token = match lexer.scan_token(prev)? {
            Some(token) => token,
            None => return Ok(tokens),
        };

        if tokens.len() == MAX_TOKENS {
            return Err(LexError::TooManyTokens);
        }

        log::trace!("matched {:?}", token);
        tokens.push(token);
    }
}

/// Scanner over an expression string.
struct Lexer<'a> {
    /// The raw input.
    input: &'a str,
    /// Iterator over the input.
    iter: str::CharIndices<'a>,
    /// First character lookahead.
    c1: Option<(usize, char)>,
    /// Second character lookahead.
    c2: Option<(usize, char)>,
    /// Third character lookahead.
    c3: Option<(usize, char)>,
    /// Shared buffer for literal text.
    buf: String,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Lexer<'a> {
        let mut iter = input.char_indices();

        let c1 = iter.next();
        let c2 = iter.next();
        let c3 = iter.next();

        Lexer {
            input,
            iter,
            c1,
            c2,
            c3,
            buf: String::with_capacity(MAX_TOKEN_TEXT),
        }
    }

    /// Advance the scanner one character.
    fn step(&mut self) {
        self.c1 = self.c2.take();
        self.c2 = self.c3.take();
        self.c3 = self.iter.next();
    }

    /// Advance the scanner `n` characters.
    fn step_n(&mut self, n: usize) {
        for _ in 0..n {
            self.step();
        }
    }

    /// Current byte offset into the input.
    fn pos(&self) -> usize {
        self.c1
            .as_ref()
            .map(|(pos, _)| *pos)
            .unwrap_or_else(|| self.input.len())
    }

    /// Peek a single character.
    fn peek(&self) -> Option<(usize, char)> {
        self.c1
    }

    /// Peek two characters.
    fn peek2(&self) -> Option<(usize, char, char)> {
        match (self.c1, self.c2) {
            (Some((p, c1)), Some((_, c2))) => Some((p, c1, c2)),
            _ => None,
        }
    }

    /// Peek three characters.
    fn peek3(&self) -> Option<(usize, char, Option<char>, Option<char>)> {
        let (p, c1) = self.c1?;
        Some((p, c1, self.c2.map(|(_, c)| c), self.c3.map(|(_, c)| c)))
    }

    /// Scan the next token, or `None` at end of input.
    ///
    /// `prev` is the kind of the previously emitted token, consulted to
    /// classify the overloaded `+ - *` characters.
    fn scan_token(&mut self, prev: Option<TokenKind>) -> Result<Option<Token>, LexError> {
        loop {
            // Two-character operators win over their one-character
            // prefixes; the probe order here is load-bearing.
            let two = match self.peek2() {
                Some((_, '<', '=')) => Some(TokenKind::Le),
                Some((_, '>', '=')) => Some(TokenKind::Ge),
                Some((_, '=', '=')) => Some(TokenKind::Eq),
                Some((_, '!', '=')) => Some(TokenKind::Ne),
                Some((_, '&', '&')) => Some(TokenKind::And),
                Some((_, '|', '|')) => Some(TokenKind::Or),
                _ => None,
            };

            if let Some(kind) = two {
                self.step_n(2);
                return Ok(Some(Token::fixed(kind)));
            }

            let (offset, c) = match self.peek() {
                Some(c) => c,
                None => return Ok(None),
            };

            let kind = match c {
                c if c.is_ascii_whitespace() => {
                    self.step();
                    continue;
                }
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '/' => TokenKind::Div,
                '<' => TokenKind::Lt,
                '>' => TokenKind::Gt,
                '+' | '-' | '*' => overloaded(c, prev),
                '0'..='9' => return self.scan_number().map(Some),
                '$' => return self.scan_register().map(Some),
                _ => return Err(LexError::NoMatch { offset }),
            };

            self.step();
            return Ok(Some(Token::fixed(kind)));
        }
    }

    /// Scan a decimal or hex literal.
    fn scan_number(&mut self) -> Result<Token, LexError> {
        self.buf.clear();
        let offset = self.pos();

        // The hex rule needs `0x` plus at least one hex digit; anything
        // short of that falls back to the decimal rule, leaving the `x`
        // for the next scan to reject.
        let hex = match self.peek3() {
            Some((_, '0', Some('x'), Some(c))) | Some((_, '0', Some('X'), Some(c))) => {
                c.is_ascii_hexdigit()
            }
            _ => false,
        };

        if hex {
            self.buf.push('0');
            self.step();

            if let Some((_, marker)) = self.peek() {
                self.buf.push(marker);
                self.step();
            }

            while let Some((_, c)) = self.peek() {
                if !c.is_ascii_hexdigit() {
                    break;
                }

                self.buf.push(c);
                self.step();
            }

            return self.literal(TokenKind::HexNumber, offset);
        }

        while let Some((_, c)) = self.peek() {
            if !c.is_ascii_digit() {
                break;
            }

            self.buf.push(c);
            self.step();
        }

        self.literal(TokenKind::Number, offset)
    }

    /// Scan a `$`-prefixed register reference. The sigil is kept in the
    /// stored text; the evaluator strips it.
    fn scan_register(&mut self) -> Result<Token, LexError> {
        self.buf.clear();
        let offset = self.pos();

        self.buf.push('$');
        self.step();

        while let Some((_, c)) = self.peek() {
            match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => {
                    self.buf.push(c);
                    self.step();
                }
                _ => break,
            }
        }

        if self.buf.len() == 1 {
            // a bare `$` matches no rule
            return Err(LexError::NoMatch { offset });
        }

        self.literal(TokenKind::Register, offset)
    }

    /// Finish a literal-bearing token out of the scan buffer.
    fn literal(&self, kind: TokenKind, offset: usize) -> Result<Token, LexError> {
        if self.buf.len() > MAX_TOKEN_TEXT {
            return Err(LexError::TokenTooLong { offset });
        }

        Ok(Token {
            kind,
            text: self.buf.clone(),
        })
    }
}

/// Classify one of the overloaded `+ - *` characters.
fn overloaded(c: char, prev: Option<TokenKind>) -> TokenKind {
    let binary = prev.map(TokenKind::ends_value).unwrap_or(false);

    match (c, binary) {
        ('+', true) => TokenKind::Add,
        ('-', true) => TokenKind::Sub,
        ('*', true) => TokenKind::Mul,
        ('+', false) => TokenKind::UnaryPlus,
        ('-', false) => TokenKind::UnaryMinus,
        _ => TokenKind::Deref,
    }
}
