//! Stack-based expression evaluator shared by the math and logic blocks.
//!
//! A program is a flat array of 2-byte instructions operating on a fixed
//! 16-slot `f32` stack plus a constant pool. Booleans are encoded as
//! `0.0`/`1.0`; truthiness on the stack is `x > 0.5`.

use crate::consts::EVAL_STACK_DEPTH;
use blockflow_asm::{Fault, Instr, Op, Unpacker};

/// Bytecode program of one math or logic block.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Expression {
    /// Instruction stream.
    pub code: Vec<Instr>,
    /// Constant pool referenced by `CONST`.
    pub constants: Vec<f32>,
}

fn is_true(x: f32) -> bool {
    x > 0.5
}

fn bool_f32(b: bool) -> f32 {
    b as u8 as f32
}

impl Expression {
    /// Replace the constant pool from a `CONSTANTS` payload.
    pub fn parse_constants(&mut self, payload: &[u8]) -> Result<(), Fault> {
        let mut r = Unpacker::new(payload);
        let count = r.u8()?;
        let mut constants = Vec::with_capacity(count as usize);
        for _ in 0..count {
            constants.push(r.f32()?);
        }
        self.constants = constants;
        tracing::trace!(count, "constants parsed");
        Ok(())
    }

    /// Replace the instruction stream from an `INSTRUCTIONS` payload.
    pub fn parse_instructions(&mut self, payload: &[u8]) -> Result<(), Fault> {
        let mut r = Unpacker::new(payload);
        let count = r.u8()?;
        let mut code = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let bytes = r.take(Instr::LEN)?;
            code.push(Instr::from([bytes[0], bytes[1]]));
        }
        self.code = code;
        tracing::trace!(count, "instructions parsed");
        Ok(())
    }

    /// Run the program over the cached input values.
    ///
    /// `inputs[i]` is the current value of block input `i` coerced to
    /// `f32`; position 0 carries the enable line and is never referenced
    /// by well-formed programs. Returns the top of stack, or `0.0` when
    /// the program leaves the stack empty.
    pub fn eval(&self, inputs: &[f32]) -> Result<f32, Fault> {
        let mut stack = [0f32; EVAL_STACK_DEPTH];
        let mut top = 0usize;

        macro_rules! push {
            ($v:expr) => {{
                if top == EVAL_STACK_DEPTH {
                    return Err(Fault::InvalidData);
                }
                stack[top] = $v;
                top += 1;
            }};
        }
        macro_rules! pop {
            () => {{
                if top == 0 {
                    return Err(Fault::InvalidData);
                }
                top -= 1;
                stack[top]
            }};
        }

        for instr in &self.code {
            match instr.op()? {
                Op::Var => {
                    let v = *inputs
                        .get(instr.arg() as usize)
                        .ok_or(Fault::InvalidData)?;
                    push!(v);
                }
                Op::Const => {
                    let v = *self
                        .constants
                        .get(instr.arg() as usize)
                        .ok_or(Fault::InvalidData)?;
                    push!(v);
                }

                Op::Add => {
                    let b = pop!();
                    let a = pop!();
                    push!(a + b);
                }
                Op::Sub => {
                    let b = pop!();
                    let a = pop!();
                    push!(a - b);
                }
                Op::Mul => {
                    let b = pop!();
                    let a = pop!();
                    push!(a * b);
                }
                Op::Div => {
                    let b = pop!();
                    let a = pop!();
                    if b.abs() < f32::EPSILON {
                        return Err(Fault::BlockDivByZero);
                    }
                    push!(a / b);
                }
                Op::Sin => {
                    let a = pop!();
                    push!(a.sin());
                }
                Op::Cos => {
                    let a = pop!();
                    push!(a.cos());
                }
                Op::Pow => {
                    let b = pop!();
                    let a = pop!();
                    push!(a.powf(b));
                }
                Op::Sqrt => {
                    let a = pop!();
                    push!(a.sqrt());
                }

                Op::Gt => {
                    let b = pop!();
                    let a = pop!();
                    push!(bool_f32(a > b));
                }
                Op::Lt => {
                    let b = pop!();
                    let a = pop!();
                    push!(bool_f32(a < b));
                }
                Op::Eq => {
                    let b = pop!();
                    let a = pop!();
                    push!(bool_f32((a - b).abs() < f32::EPSILON));
                }
                Op::Gte => {
                    let b = pop!();
                    let a = pop!();
                    push!(bool_f32(a >= b));
                }
                Op::Lte => {
                    let b = pop!();
                    let a = pop!();
                    push!(bool_f32(a <= b));
                }
                Op::And => {
                    let b = pop!();
                    let a = pop!();
                    push!(bool_f32(is_true(a) && is_true(b)));
                }
                Op::Or => {
                    let b = pop!();
                    let a = pop!();
                    push!(bool_f32(is_true(a) || is_true(b)));
                }
                Op::Not => {
                    let a = pop!();
                    push!(bool_f32(!is_true(a)));
                }
            }
        }

        Ok(if top > 0 { stack[top - 1] } else { 0.0 })
    }

    /// Result of [`Expression::eval`] thresholded to a boolean.
    pub fn eval_bool(&self, inputs: &[f32]) -> Result<bool, Fault> {
        Ok(is_true(self.eval(inputs)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(code: &[(Op, u8)], constants: &[f32]) -> Expression {
        Expression {
            code: code.iter().map(|&(op, arg)| Instr::new(op, arg)).collect(),
            constants: constants.to_vec(),
        }
    }

    #[test]
    fn mul_add_with_constant() {
        // VAR 1, VAR 2, MUL, CONST 0, ADD over a=3, b=4 => 13
        let expr = program(
            &[(Op::Var, 1), (Op::Var, 2), (Op::Mul, 0), (Op::Const, 0), (Op::Add, 0)],
            &[1.0],
        );
        assert_eq!(expr.eval(&[1.0, 3.0, 4.0]).unwrap(), 13.0);
    }

    #[test]
    fn div_by_near_zero_fails() {
        let expr = program(&[(Op::Const, 0), (Op::Const, 1), (Op::Div, 0)], &[1.0, 0.0]);
        assert_eq!(expr.eval(&[]), Err(Fault::BlockDivByZero));

        let expr = program(
            &[(Op::Const, 0), (Op::Const, 1), (Op::Div, 0)],
            &[1.0, 2.0 * f32::EPSILON],
        );
        assert!(expr.eval(&[]).is_ok());
    }

    #[test]
    fn eq_uses_epsilon_window() {
        let expr = program(&[(Op::Var, 1), (Op::Const, 0), (Op::Eq, 0)], &[1.0]);
        assert_eq!(expr.eval(&[0.0, 1.0 + f32::EPSILON / 2.0]).unwrap(), 1.0);
        assert_eq!(expr.eval(&[0.0, 1.1]).unwrap(), 0.0);
    }

    #[test]
    fn logic_thresholds_at_half() {
        let expr = program(&[(Op::Var, 1), (Op::Var, 2), (Op::And, 0)], &[]);
        assert_eq!(expr.eval(&[0.0, 0.6, 1.0]).unwrap(), 1.0);
        assert_eq!(expr.eval(&[0.0, 0.5, 1.0]).unwrap(), 0.0);
        assert!(expr.eval_bool(&[0.0, 0.9, 0.9]).unwrap());
    }

    #[test]
    fn stack_underflow_fails_the_block() {
        let expr = program(&[(Op::Add, 0)], &[]);
        assert_eq!(expr.eval(&[]), Err(Fault::InvalidData));
    }

    #[test]
    fn stack_overflow_is_guarded() {
        let code: Vec<_> = (0..17).map(|_| (Op::Const, 0)).collect();
        let expr = program(&code, &[1.0]);
        assert_eq!(expr.eval(&[]), Err(Fault::InvalidData));
    }

    #[test]
    fn empty_program_yields_zero() {
        let expr = program(&[], &[]);
        assert_eq!(expr.eval(&[]).unwrap(), 0.0);
        assert!(!expr.eval_bool(&[]).unwrap());
    }

    #[test]
    fn payload_round_trip() {
        let mut expr = Expression::default();
        expr.parse_constants(&{
            let mut p = vec![2u8];
            p.extend_from_slice(&1.5f32.to_le_bytes());
            p.extend_from_slice(&2.5f32.to_le_bytes());
            p
        })
        .unwrap();
        expr.parse_instructions(&[3, 0x01, 0x00, 0x01, 0x01, 0x02, 0x00])
            .unwrap();
        assert_eq!(expr.constants, vec![1.5, 2.5]);
        assert_eq!(expr.eval(&[]).unwrap(), 4.0);
    }
}
