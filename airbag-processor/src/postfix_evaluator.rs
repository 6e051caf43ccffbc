// Copyright 2015 Ted Mielczarek. See the COPYRIGHT
// file at the top-level directory of this distribution.

//! A postfix (reverse Polish) expression evaluator.
//!
//! Symbol files carry frame-unwind hints as postfix program strings: a
//! whitespace-separated sequence of integer literals, identifiers, and
//! operators, evaluated against a dictionary of identifier values and a
//! memory region. Identifiers beginning with `$` are variables and may be
//! assigned; other non-numeric identifiers are constants. Evaluating a
//! program string mutates the dictionary through `=` and records which
//! variables were assigned, which is how a caller frame's registers are
//! recovered.

use failure::Fail;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::fmt;

use airbag_common::traits::MemoryRegion;

/// An integer type the evaluator can compute with, the natural register
/// width of the target CPU.
pub trait PostfixValue: Copy + PartialEq + fmt::Debug + fmt::LowerHex {
    fn to_u64(self) -> u64;
    /// Parse a decimal or `0x`-prefixed hex literal.
    fn parse_literal(token: &str) -> Option<Self>;
    fn wrapping_add(self, other: Self) -> Self;
    fn wrapping_sub(self, other: Self) -> Self;
    fn wrapping_mul(self, other: Self) -> Self;
    fn checked_div(self, other: Self) -> Option<Self>;
    fn checked_rem(self, other: Self) -> Option<Self>;
    /// Read a value of this width from `region` at `address`.
    fn read_from(region: &dyn MemoryRegion, address: u64) -> Option<Self>;
}

impl PostfixValue for u32 {
    fn to_u64(self) -> u64 {
        self as u64
    }
    fn parse_literal(token: &str) -> Option<u32> {
        if token.starts_with("0x") || token.starts_with("0X") {
            u32::from_str_radix(&token[2..], 16).ok()
        } else {
            token.parse().ok()
        }
    }
    fn wrapping_add(self, other: u32) -> u32 {
        u32::wrapping_add(self, other)
    }
    fn wrapping_sub(self, other: u32) -> u32 {
        u32::wrapping_sub(self, other)
    }
    fn wrapping_mul(self, other: u32) -> u32 {
        u32::wrapping_mul(self, other)
    }
    fn checked_div(self, other: u32) -> Option<u32> {
        u32::checked_div(self, other)
    }
    fn checked_rem(self, other: u32) -> Option<u32> {
        u32::checked_rem(self, other)
    }
    fn read_from(region: &dyn MemoryRegion, address: u64) -> Option<u32> {
        region.memory_at_address_u32(address)
    }
}

impl PostfixValue for u64 {
    fn to_u64(self) -> u64 {
        self
    }
    fn parse_literal(token: &str) -> Option<u64> {
        if token.starts_with("0x") || token.starts_with("0X") {
            u64::from_str_radix(&token[2..], 16).ok()
        } else {
            token.parse().ok()
        }
    }
    fn wrapping_add(self, other: u64) -> u64 {
        u64::wrapping_add(self, other)
    }
    fn wrapping_sub(self, other: u64) -> u64 {
        u64::wrapping_sub(self, other)
    }
    fn wrapping_mul(self, other: u64) -> u64 {
        u64::wrapping_mul(self, other)
    }
    fn checked_div(self, other: u64) -> Option<u64> {
        u64::checked_div(self, other)
    }
    fn checked_rem(self, other: u64) -> Option<u64> {
        u64::checked_rem(self, other)
    }
    fn read_from(region: &dyn MemoryRegion, address: u64) -> Option<u64> {
        region.memory_at_address_u64(address)
    }
}

/// Ways an expression can fail to evaluate.
///
/// An error reports the first violation encountered; assignments made
/// earlier in the same expression have already taken effect.
#[derive(Debug, Fail, PartialEq)]
pub enum ExpressionError {
    #[fail(display = "not enough operands on the stack")]
    NotEnoughOperands,
    #[fail(display = "undefined identifier {}", _0)]
    UndefinedIdentifier(String),
    #[fail(display = "assignment target is not a variable")]
    BadAssignmentTarget,
    #[fail(display = "memory dereference failed")]
    DereferenceFailure,
    #[fail(display = "division by zero")]
    DivisionByZero,
    #[fail(display = "values left on the stack after evaluation")]
    UnbalancedStack,
}

/// An operand on the evaluation stack. Identifiers resolve against the
/// dictionary only when they are popped as values, so that `=` can assign
/// to a variable that has no value yet.
enum StackItem<T> {
    Value(T),
    Identifier(String),
}

/// Evaluates postfix expressions over a dictionary and a memory region.
pub struct PostfixEvaluator<'a, T: PostfixValue> {
    dictionary: &'a mut HashMap<String, T>,
    memory: Option<&'a dyn MemoryRegion>,
}

fn pop_value<T: PostfixValue>(
    stack: &mut Vec<StackItem<T>>,
    dictionary: &HashMap<String, T>,
) -> Result<T, ExpressionError> {
    match stack.pop() {
        None => Err(ExpressionError::NotEnoughOperands),
        Some(StackItem::Value(value)) => Ok(value),
        Some(StackItem::Identifier(ident)) => dictionary
            .get(&ident)
            .cloned()
            .ok_or(ExpressionError::UndefinedIdentifier(ident)),
    }
}

impl<'a, T: PostfixValue> PostfixEvaluator<'a, T> {
    /// Create an evaluator over `dictionary`, dereferencing through
    /// `memory`.
    pub fn new(
        dictionary: &'a mut HashMap<String, T>,
        memory: Option<&'a dyn MemoryRegion>,
    ) -> PostfixEvaluator<'a, T> {
        PostfixEvaluator { dictionary, memory }
    }

    /// Evaluate `expression`, recording in `assigned` every variable that
    /// `=` stores to.
    ///
    /// Succeeds only if every token parses, every operator finds its
    /// operands, every identifier read is defined, every dereference is in
    /// bounds, and the stack is empty at the end of the expression.
    pub fn evaluate(
        &mut self,
        expression: &str,
        assigned: &mut HashSet<String>,
    ) -> Result<(), ExpressionError> {
        let mut stack: Vec<StackItem<T>> = Vec::new();
        for token in expression.split_whitespace() {
            match token {
                "+" | "-" | "*" | "/" | "%" => {
                    let rhs = pop_value(&mut stack, self.dictionary)?;
                    let lhs = pop_value(&mut stack, self.dictionary)?;
                    let result = match token {
                        "+" => lhs.wrapping_add(rhs),
                        "-" => lhs.wrapping_sub(rhs),
                        "*" => lhs.wrapping_mul(rhs),
                        "/" => lhs
                            .checked_div(rhs)
                            .ok_or(ExpressionError::DivisionByZero)?,
                        "%" => lhs
                            .checked_rem(rhs)
                            .ok_or(ExpressionError::DivisionByZero)?,
                        _ => unreachable!(),
                    };
                    stack.push(StackItem::Value(result));
                }
                "^" => {
                    let address = pop_value(&mut stack, self.dictionary)?.to_u64();
                    let memory = self.memory.ok_or(ExpressionError::DereferenceFailure)?;
                    let value =
                        T::read_from(memory, address).ok_or(ExpressionError::DereferenceFailure)?;
                    stack.push(StackItem::Value(value));
                }
                "=" => {
                    let value = pop_value(&mut stack, self.dictionary)?;
                    match stack.pop() {
                        None => return Err(ExpressionError::NotEnoughOperands),
                        Some(StackItem::Identifier(ref ident)) if ident.starts_with('$') => {
                            self.dictionary.insert(ident.clone(), value);
                            assigned.insert(ident.clone());
                        }
                        // A literal or a constant can't be assigned to.
                        Some(_) => return Err(ExpressionError::BadAssignmentTarget),
                    }
                }
                _ => match T::parse_literal(token) {
                    Some(value) => stack.push(StackItem::Value(value)),
                    None => stack.push(StackItem::Identifier(token.to_string())),
                },
            }
        }
        if !stack.is_empty() {
            debug!("postfix expression left values on the stack: {}", expression);
            return Err(ExpressionError::UnbalancedStack);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Dereferencing any address yields the address plus one.
    struct FakeMemoryRegion;

    impl MemoryRegion for FakeMemoryRegion {
        fn base_address(&self) -> u64 {
            0
        }
        fn size(&self) -> u64 {
            0
        }
        fn memory_at_address_u8(&self, address: u64) -> Option<u8> {
            Some(address.wrapping_add(1) as u8)
        }
        fn memory_at_address_u16(&self, address: u64) -> Option<u16> {
            Some(address.wrapping_add(1) as u16)
        }
        fn memory_at_address_u32(&self, address: u64) -> Option<u32> {
            Some(address.wrapping_add(1) as u32)
        }
        fn memory_at_address_u64(&self, address: u64) -> Option<u64> {
            Some(address.wrapping_add(1))
        }
    }

    fn evaluate_test_set(
        dictionary: &mut HashMap<String, u32>,
        tests: &[(&str, bool)],
        validate: &[(&str, u32)],
    ) {
        let memory = FakeMemoryRegion;
        let mut assigned = HashSet::new();
        for &(expression, evaluable) in tests {
            let result = {
                let mut evaluator = PostfixEvaluator::new(dictionary, Some(&memory));
                evaluator.evaluate(expression, &mut assigned)
            };
            assert_eq!(
                result.is_ok(),
                evaluable,
                "expression {:?}: expected {}, observed {:?}",
                expression,
                if evaluable { "evaluable" } else { "not evaluable" },
                result
            );
        }
        for &(identifier, expected) in validate {
            assert_eq!(
                dictionary.get(identifier),
                Some(&expected),
                "identifier {:?}",
                identifier
            );
            // Variables must be marked assigned; constants must not be.
            assert_eq!(
                assigned.contains(identifier),
                identifier.starts_with('$'),
                "assignment of {:?}",
                identifier
            );
        }
    }

    #[test]
    fn test_basic_operations_and_failure_modes() {
        let tests: &[(&str, bool)] = &[
            ("$rAdd 2 2 + =", true),     // $rAdd = 2 + 2 = 4
            ("$rAdd $rAdd 2 + =", true), // $rAdd = $rAdd + 2 = 6
            ("$rAdd 2 $rAdd + =", true), // $rAdd = 2 + $rAdd = 8
            ("99", false),               // put some junk on the stack...
            ("$rAdd2 2 2 + =", true),    // ...and make sure things still work
            ("$rAdd2\t2\n2 + =", true),  // same but with different whitespace
            ("$rAdd2 2 2 + = ", true),   // trailing whitespace
            (" $rAdd2 2 2 + =", true),   // leading whitespace
            ("$rAdd2  2 2 +   =", true), // extra whitespace
            ("$T0 2 = +", false),        // too few operands for add
            ("2 + =", false),            // too few operands for add
            ("2 +", false),              // too few operands for add
            ("+", false),                // too few operands for add
            ("^", false),                // too few operands for dereference
            ("=", false),                // too few operands for assignment
            ("2 =", false),              // too few operands for assignment
            ("2 2 + =", false),          // too few operands for assignment
            ("2 2 =", false),            // can't assign into a literal
            ("k 2 =", false),            // can't assign into a constant
            ("2", false),                // leftover data on stack
            ("2 2 +", false),            // leftover data on stack
            ("$rAdd", false),            // leftover data on stack
            ("0 $T1 0 0 + =", false),    // leftover data on stack
            ("$T2 $T2 2 + =", false),    // can't operate on an undefined value
            ("$rMul 9 6 * =", true),     // $rMul = 9 * 6 = 54
            ("$rSub 9 6 - =", true),     // $rSub = 9 - 6 = 3
            ("$rDivQ 9 6 / =", true),    // $rDivQ = 9 / 6 = 1
            ("$rDivM 9 6 % =", true),    // $rDivM = 9 % 6 = 3
            ("$rDeref 9 ^ =", true),     // $rDeref = ^9 = 10 (FakeMemoryRegion)
        ];
        let validate: &[(&str, u32)] = &[
            ("$rAdd", 8),
            ("$rAdd2", 4),
            ("$rSub", 3),
            ("$rMul", 54),
            ("$rDivQ", 1),
            ("$rDivM", 3),
            ("$rDeref", 10),
        ];
        let mut dictionary = HashMap::new();
        evaluate_test_set(&mut dictionary, tests, validate);
    }

    #[test]
    fn test_msvc_program_strings() {
        // These program strings come from MSVC frame data; the values are
        // fudged since dereferencing goes through FakeMemoryRegion instead
        // of a real stack snapshot.
        let mut dictionary = HashMap::new();
        dictionary.insert("$ebp".to_string(), 0xbfff0010u32);
        dictionary.insert("$eip".to_string(), 0x10000000);
        dictionary.insert("$esp".to_string(), 0xbfff0000);
        dictionary.insert(".cbSavedRegs".to_string(), 4);
        dictionary.insert(".cbParams".to_string(), 4);
        dictionary.insert(".raSearchStart".to_string(), 0xbfff0020);
        let tests: &[(&str, bool)] = &[
            (
                "$T0 $ebp = $eip $T0 4 + ^ = $ebp $T0 ^ = $esp $T0 8 + = \
                 $L $T0 .cbSavedRegs - = $P $T0 8 + .cbParams + =",
                true,
            ),
            // Intermediate state: $T0  = 0xbfff0010, $eip = 0xbfff0015,
            //                     $ebp = 0xbfff0011, $esp = 0xbfff0018,
            //                     $L   = 0xbfff000c, $P   = 0xbfff001c
            (
                "$T0 $ebp = $eip $T0 4 + ^ = $ebp $T0 ^ = $esp $T0 8 + = \
                 $L $T0 .cbSavedRegs - = $P $T0 8 + .cbParams + = $ebx $T0 28 - ^ =",
                true,
            ),
            // Intermediate state: $T0  = 0xbfff0011, $eip = 0xbfff0016,
            //                     $ebp = 0xbfff0012, $esp = 0xbfff0019,
            //                     $L   = 0xbfff000d, $P   = 0xbfff001d,
            //                     $ebx = 0xbffefff6
            (
                "$T0 $ebp = $T2 $esp = $T1 .raSearchStart = $eip $T1 ^ = $ebp $T0 = \
                 $esp $T1 4 + = $L $T0 .cbSavedRegs - = $P $T1 4 + .cbParams + = \
                 $ebx $T0 28 - ^ =",
                true,
            ),
        ];
        let validate: &[(&str, u32)] = &[
            ("$T0", 0xbfff0012),
            ("$T1", 0xbfff0020),
            ("$T2", 0xbfff0019),
            ("$eip", 0xbfff0021),
            ("$ebp", 0xbfff0012),
            ("$esp", 0xbfff0024),
            ("$L", 0xbfff000e),
            ("$P", 0xbfff0028),
            ("$ebx", 0xbffefff7),
            (".cbSavedRegs", 4),
            (".cbParams", 4),
        ];
        evaluate_test_set(&mut dictionary, tests, validate);
    }

    #[test]
    fn test_hex_literals() {
        let mut dictionary: HashMap<String, u32> = HashMap::new();
        let mut assigned = HashSet::new();
        {
            let mut evaluator = PostfixEvaluator::new(&mut dictionary, None);
            evaluator
                .evaluate("$result 0x10 0x2 + =", &mut assigned)
                .unwrap();
        }
        assert_eq!(dictionary["$result"], 0x12);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        for _ in 0..3 {
            let mut dictionary: HashMap<String, u32> = HashMap::new();
            dictionary.insert("$in".to_string(), 40);
            let mut assigned = HashSet::new();
            let memory = FakeMemoryRegion;
            {
                let mut evaluator = PostfixEvaluator::new(&mut dictionary, Some(&memory));
                evaluator
                    .evaluate("$out $in 2 + ^ =", &mut assigned)
                    .unwrap();
            }
            assert_eq!(dictionary["$out"], 43);
            assert!(assigned.contains("$out"));
            assert!(!assigned.contains("$in"));
        }
    }

    #[test]
    fn test_u64_word_size() {
        let mut dictionary: HashMap<String, u64> = HashMap::new();
        dictionary.insert("$rsp".to_string(), 0x7fff_ffff_0000);
        let mut assigned = HashSet::new();
        let memory = FakeMemoryRegion;
        {
            let mut evaluator = PostfixEvaluator::new(&mut dictionary, Some(&memory));
            evaluator
                .evaluate("$rip $rsp ^ =", &mut assigned)
                .unwrap();
        }
        assert_eq!(dictionary["$rip"], 0x7fff_ffff_0001);
    }
}
