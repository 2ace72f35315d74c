//! Expression evaluation against live machine state.
//!
//! Each evaluation re-tokenizes the input and recursively folds the token
//! sequence; there is no cached parse tree.

use crate::machine::{Machine, MemoryFault, UnknownRegister};
use thiserror::Error;

use self::lexer::{LexError, Token, TokenKind};

pub mod lexer;

/// Width in bytes of a dereference read.
const DEREF_WIDTH: u8 = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The evaluated token range is empty.
    ///
    /// Callers branch on this variant: an empty left operand range is how
    /// a unary operator is recognized, so it has to stay distinguishable
    /// from genuine failure.
    #[error("expression is empty")]
    Empty,
    /// The token sequence does not form an expression.
    #[error("malformed expression")]
    Malformed,
    /// A division with a zero divisor.
    #[error("division by zero")]
    DivisionByZero,
    #[error(transparent)]
    UnknownRegister(#[from] UnknownRegister),
    #[error(transparent)]
    MemoryFault(#[from] MemoryFault),
}

/// Failure of [`evaluate_expression`]: either phase can reject the input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExprError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Eval(#[from] EvalError),
}

/// Evaluate an expression string against the given machine.
pub fn evaluate_expression(input: &str, machine: &impl Machine) -> Result<i64, ExprError> {
    let tokens = lexer::tokenize(input)?;
    Ok(eval(&tokens, machine)?)
}

/// Recursively evaluate a token range.
///
/// The range shrinks through subslices: stripping a parenthesis pair or
/// splitting at the major operator, whose left side may legitimately be
/// empty when the operator is unary.
fn eval(tokens: &[Token], machine: &impl Machine) -> Result<i64, EvalError> {
    if tokens.is_empty() {
        return Err(EvalError::Empty);
    }

    if tokens.len() == 1 {
        return eval_literal(&tokens[0], machine);
    }

    if enclosed_in_parens(tokens) {
        return eval(&tokens[1..tokens.len() - 1], machine);
    }

    let op = find_major(tokens)?;
    let kind = tokens[op].kind();

    // The right operand is always mandatory; emptiness there is as fatal
    // as any other failure.
    let rhs = eval(&tokens[op + 1..], machine)?;

    match eval(&tokens[..op], machine) {
        Ok(lhs) => apply_binary(kind, lhs, rhs),
        // No left operand, so the major operator has to be unary.
        Err(EvalError::Empty) => apply_unary(kind, rhs, machine),
        Err(e) => Err(e),
    }
}

/// Evaluate a single literal-bearing token.
fn eval_literal(token: &Token, machine: &impl Machine) -> Result<i64, EvalError> {
    match token.kind() {
        TokenKind::Number => token.text().parse().map_err(|_| EvalError::Malformed),
        TokenKind::HexNumber => {
            // hex literals are machine words; wrap into the value domain
            u64::from_str_radix(&token.text()[2..], 16)
                .map(|value| value as i64)
                .map_err(|_| EvalError::Malformed)
        }
        TokenKind::Register => Ok(machine.lookup_register(&token.text()[1..])?),
        _ => Err(EvalError::Malformed),
    }
}

/// Test if the whole range is a single parenthesized expression: the outer
/// pair matches each other, not some interior pair.
fn enclosed_in_parens(tokens: &[Token]) -> bool {
    if tokens.first().map(|t| t.kind()) != Some(TokenKind::LParen) {
        return false;
    }

    if tokens.last().map(|t| t.kind()) != Some(TokenKind::RParen) {
        return false;
    }

    let mut depth = 0u32;

    for (index, token) in tokens.iter().enumerate() {
        match token.kind() {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                depth -= 1;

                if depth == 0 {
                    return index == tokens.len() - 1;
                }
            }
            _ => {}
        }
    }

    false
}

/// Locate the major operator of a token range: the top-level operator with
/// the loosest binding, which becomes the root of the expression tree.
///
/// Among equals the first one wins, so chains of the same precedence
/// associate right-to-left (`8-3-2` is `8-(3-2)`). That matches the
/// original evaluator this one is compatible with, not conventional left
/// association.
fn find_major(tokens: &[Token]) -> Result<usize, EvalError> {
    let mut depth = 0u32;
    let mut major: Option<(usize, u8)> = None;

    for (index, token) in tokens.iter().enumerate() {
        let kind = token.kind();

        match kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => {
                if depth == 0 {
                    return Err(EvalError::Malformed);
                }

                depth -= 1;
            }
            _ => {
                if depth > 0 {
                    continue;
                }

                let power = match binding_power(kind) {
                    Some(power) => power,
                    None => continue,
                };

                if major.map(|(_, best)| power < best).unwrap_or(true) {
                    major = Some((index, power));
                }
            }
        }
    }

    if depth != 0 {
        return Err(EvalError::Malformed);
    }

    major.map(|(index, _)| index).ok_or(EvalError::Malformed)
}

/// Binding precedence of an operator, loosest to tightest. `None` for the
/// literal-bearing kinds, which never act as operators.
fn binding_power(kind: TokenKind) -> Option<u8> {
    let power = match kind {
        TokenKind::Or => 1,
        TokenKind::And => 2,
        TokenKind::Eq | TokenKind::Ne => 3,
        TokenKind::Lt | TokenKind::Gt | TokenKind::Le | TokenKind::Ge => 4,
        TokenKind::Add | TokenKind::Sub => 5,
        TokenKind::Mul | TokenKind::Div => 6,
        TokenKind::UnaryPlus | TokenKind::UnaryMinus | TokenKind::Deref => 7,
        TokenKind::Number
        | TokenKind::HexNumber
        | TokenKind::Register
        | TokenKind::LParen
        | TokenKind::RParen => return None,
    };

    Some(power)
}

/// Apply a binary operator. Both operands were evaluated before this
/// point, so `&&` and `||` do not short-circuit.
fn apply_binary(kind: TokenKind, lhs: i64, rhs: i64) -> Result<i64, EvalError> {
    let value = match kind {
        TokenKind::Add => lhs.wrapping_add(rhs),
        TokenKind::Sub => lhs.wrapping_sub(rhs),
        TokenKind::Mul => lhs.wrapping_mul(rhs),
        TokenKind::Div => {
            if rhs == 0 {
                return Err(EvalError::DivisionByZero);
            }

            lhs.wrapping_div(rhs)
        }
        TokenKind::Lt => (lhs < rhs) as i64,
        TokenKind::Gt => (lhs > rhs) as i64,
        TokenKind::Le => (lhs <= rhs) as i64,
        TokenKind::Ge => (lhs >= rhs) as i64,
        TokenKind::Eq => (lhs == rhs) as i64,
        TokenKind::Ne => (lhs != rhs) as i64,
        TokenKind::And => (lhs != 0 && rhs != 0) as i64,
        TokenKind::Or => (lhs != 0 || rhs != 0) as i64,
        // a unary operator with a left operand
        _ => return Err(EvalError::Malformed),
    };

    Ok(value)
}

/// Apply a unary operator to the value on its right.
fn apply_unary(kind: TokenKind, value: i64, machine: &impl Machine) -> Result<i64, EvalError> {
    match kind {
        TokenKind::UnaryPlus => Ok(value),
        TokenKind::UnaryMinus => Ok(value.wrapping_neg()),
        TokenKind::Deref => Ok(machine.read_memory(value, DEREF_WIDTH)?),
        // a binary operator with no left operand
        _ => Err(EvalError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::{evaluate_expression, EvalError, ExprError};
    use crate::machine::{Machine, MemoryFault, UnknownRegister};
    use byteorder::{ByteOrder, LittleEndian};
    use std::collections::HashMap;
    use std::convert::TryFrom;

    struct TestMachine {
        registers: HashMap<&'static str, i64>,
        memory: Vec<u8>,
    }

    impl TestMachine {
        fn new() -> TestMachine {
            let mut registers = HashMap::new();
            registers.insert("pc", 0x100);
            registers.insert("r0", 7);
            registers.insert("sp", 0x40);

            let mut memory = vec![0u8; 0x80];
            LittleEndian::write_i64(&mut memory[0x10..0x18], 0xbeef);
            LittleEndian::write_i64(&mut memory[0x40..0x48], -1);
            TestMachine { registers, memory }
        }
    }

    impl Machine for TestMachine {
        fn lookup_register(&self, name: &str) -> Result<i64, UnknownRegister> {
            self.registers
                .get(name)
                .copied()
                .ok_or_else(|| UnknownRegister {
                    name: name.to_owned(),
                })
        }

        fn read_memory(&self, address: i64, width: u8) -> Result<i64, MemoryFault> {
            let fault = MemoryFault { address, width };

            let start = usize::try_from(address).map_err(|_| fault)?;
            let end = start.checked_add(width as usize).ok_or(fault)?;

            if end > self.memory.len() {
                return Err(fault);
            }

            Ok(LittleEndian::read_int(
                &self.memory[start..end],
                width as usize,
            ))
        }
    }

    fn eval(input: &str) -> Result<i64, ExprError> {
        evaluate_expression(input, &TestMachine::new())
    }

    #[test]
    fn literals() -> anyhow::Result<()> {
        assert_eq!(42, eval("42")?);
        assert_eq!(42, eval("0x2a")?);
        assert_eq!(0, eval("0")?);
        assert_eq!(7, eval("$r0")?);
        assert_eq!(0x100, eval("$pc")?);
        Ok(())
    }

    #[test]
    fn precedence() {
        assert_eq!(Ok(7), eval("1 + 2 * 3"));
        assert_eq!(Ok(7), eval("2 * 3 + 1"));
        assert_eq!(Ok(2), eval("10 / 2 - 3"));
        assert_eq!(Ok(1), eval("1 + 2 == 3"));
        assert_eq!(Ok(1), eval("1 < 2 && 3 > 2"));
        assert_eq!(Ok(1), eval("0 || 2 >= 2"));
        assert_eq!(Ok(0), eval("1 != 1 || 3 <= 2"));
    }

    #[test]
    fn same_precedence_chains_associate_right_to_left() {
        // deliberate compatibility behavior, not conventional association
        assert_eq!(Ok(7), eval("8-3-2"));
        assert_eq!(Ok(3), eval("8-3+2"));
        assert_eq!(Ok(8), eval("16/4/2"));
        assert_eq!(Ok(-2), eval("2-3-4-5"));
    }

    #[test]
    fn parentheses() {
        assert_eq!(Ok(9), eval("(1 + 2) * 3"));
        assert_eq!(Ok(3), eval("(8-3)-2"));
        assert_eq!(Ok(2), eval("(5+1) / (1+2)"));

        let mut wrapped = String::from("5");

        for _ in 0..8 {
            assert_eq!(Ok(5), eval(&wrapped));
            wrapped = format!("({})", wrapped);
        }
    }

    #[test]
    fn unary_operators() {
        assert_eq!(Ok(-3), eval("-3"));
        assert_eq!(Ok(2), eval("5 - 3"));
        assert_eq!(Ok(8), eval("5 - -3"));
        assert_eq!(Ok(-15), eval("5 * -3"));
        assert_eq!(Ok(7), eval("+7"));
        assert_eq!(Ok(3), eval("--3"));
        assert_eq!(Ok(-6), eval("2 * (0 - 3)"));
        assert_eq!(Ok(-249), eval("-$pc + 7"));
    }

    #[test]
    fn dereference() -> anyhow::Result<()> {
        assert_eq!(0xbeef, eval("*0x10")?);
        assert_eq!(-1, eval("*$sp")?);
        assert_eq!(0xbeef, eval("*(0x8 + 8)")?);
        assert_eq!(0xbef0, eval("*0x10 + 1")?);
        Ok(())
    }

    #[test]
    fn division_by_zero() {
        assert_eq!(
            Err(ExprError::Eval(EvalError::DivisionByZero)),
            eval("1/0")
        );
        assert_eq!(
            Err(ExprError::Eval(EvalError::DivisionByZero)),
            eval("2 + 6 / (3 - 3)")
        );
    }

    #[test]
    fn logical_operators_do_not_short_circuit() {
        assert_eq!(
            Err(ExprError::Eval(EvalError::DivisionByZero)),
            eval("1 || 1/0")
        );
        assert_eq!(
            Err(ExprError::Eval(EvalError::DivisionByZero)),
            eval("0 && 1/0")
        );
    }

    #[test]
    fn unknown_register() {
        assert_eq!(
            Err(ExprError::Eval(EvalError::UnknownRegister(
                UnknownRegister {
                    name: "nosuch".to_owned(),
                }
            ))),
            eval("$nosuch")
        );
    }

    #[test]
    fn memory_faults() {
        assert_eq!(
            Err(ExprError::Eval(EvalError::MemoryFault(MemoryFault {
                address: 0x7f,
                width: 8,
            }))),
            eval("*0x7f")
        );
        assert_eq!(
            Err(ExprError::Eval(EvalError::MemoryFault(MemoryFault {
                address: -8,
                width: 8,
            }))),
            eval("*-8")
        );
    }

    #[test]
    fn malformed_input() {
        assert_eq!(Err(ExprError::Eval(EvalError::Malformed)), eval("(1+2"));
        assert_eq!(Err(ExprError::Eval(EvalError::Malformed)), eval("1+2)"));
        assert_eq!(Err(ExprError::Eval(EvalError::Malformed)), eval("3 4"));
        assert_eq!(Err(ExprError::Eval(EvalError::Empty)), eval(""));
        assert_eq!(Err(ExprError::Eval(EvalError::Empty)), eval("()"));
        assert_eq!(Err(ExprError::Eval(EvalError::Empty)), eval("1+"));
    }

    #[test]
    fn literal_out_of_range() {
        assert_eq!(
            Err(ExprError::Eval(EvalError::Malformed)),
            eval("9223372036854775808")
        );
        // a full-width hex word wraps into the signed value domain
        assert_eq!(Ok(-1), eval("0xffffffffffffffff"));
    }
}
