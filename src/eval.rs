/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use crate::ast::{Expr, LabelName};
use crate::errors::AssemblyError;
use std::collections::HashMap;

/// Result type accepted by [`Evaluator::completely_evaluate`]: either a
/// label or an integer reinterpreting the low bytes of the stored 64-bit
/// value (little-endian semantics, never a checked narrowing).
pub trait EvalValue: Sized {
    fn zero() -> Self;
    fn from_expr(e: &Expr) -> Result<Self, AssemblyError>;
}

macro_rules! impl_eval_value_int {
    ($($t:ty),*) => {$(
        impl EvalValue for $t {
            fn zero() -> Self {
                0
            }

            fn from_expr(e: &Expr) -> Result<Self, AssemblyError> {
                match e {
                    Expr::Num(v) => Ok(*v as $t),
                    _ => Err(AssemblyError::InvalidType { expected: "num" }),
                }
            }
        }
    )*};
}

impl_eval_value_int!(u8, u16, u32, u64);

impl EvalValue for LabelName {
    fn zero() -> Self {
        LabelName {
            section: 0,
            index: 0,
        }
    }

    fn from_expr(e: &Expr) -> Result<Self, AssemblyError> {
        match e {
            Expr::Label(l) => Ok(*l),
            _ => Err(AssemblyError::InvalidType {
                expected: "labelname",
            }),
        }
    }
}

/// Symbolic calculator over expression trees. Holds the label bindings
/// filled in by the layout engine and read back during emission.
#[derive(Debug, Default)]
pub struct Evaluator {
    pub labels: HashMap<LabelName, Expr>,
}

impl Evaluator {
    /// Reduce `e` as far as currently possible, in place. Returns true iff
    /// the expression collapsed to a plain value (a number or a label).
    pub fn evaluate(&self, e: &mut Expr) -> Result<bool, AssemblyError> {
        // Reduce the subexpressions first so the folds below only see nums
        // and labels at the top level.
        let mut is_finished = true;
        match e {
            Expr::Neg(a) => is_finished = self.evaluate(a)?,
            Expr::Shl(a, b) | Expr::Shr(a, b) => {
                let fa = self.evaluate(a)?;
                let fb = self.evaluate(b)?;
                is_finished = fa && fb;
            }
            Expr::Add(args)
            | Expr::Sub(args)
            | Expr::Mul(args)
            | Expr::Div(args)
            | Expr::Mod(args) => {
                for a in args.iter_mut() {
                    let fin = self.evaluate(a)?;
                    is_finished = fin && is_finished;
                }
            }
            _ => {}
        }

        match e {
            Expr::Num(_) => return Ok(true),
            Expr::Label(name) => {
                // Substitute a known label and keep reducing.
                if let Some(bound) = self.labels.get(name) {
                    *e = bound.clone();
                    return self.evaluate(e);
                }
                return Ok(false);
            }
            Expr::Undef => return Ok(false),
            _ => {}
        }

        // Nothing to fold without at least one numeric component.
        if !has_num_child(e) {
            return Ok(false);
        }

        match e {
            Expr::Neg(a) => {
                if is_finished {
                    let v = a
                        .as_num()
                        .ok_or(AssemblyError::InvalidExpression("neg of non-number"))?;
                    *e = Expr::Num(v.wrapping_neg());
                    return Ok(true);
                }
                Ok(false)
            }
            Expr::Shl(a, b) => {
                if is_finished {
                    // A label operand stays symbolic; shifts only fold over
                    // two plain numbers.
                    let (Some(x), Some(y)) = (a.as_num(), b.as_num()) else {
                        return Ok(false);
                    };
                    *e = Expr::Num(x.wrapping_shl(y as u32));
                    return Ok(true);
                }
                Ok(false)
            }
            Expr::Shr(a, b) => {
                if is_finished {
                    let (Some(x), Some(y)) = (a.as_num(), b.as_num()) else {
                        return Ok(false);
                    };
                    // arithmetic shift on signed 64-bit
                    *e = Expr::Num(x.wrapping_shr(y as u32));
                    return Ok(true);
                }
                Ok(false)
            }
            Expr::Add(args) => {
                fold_commutative(args, |a, b| Ok(a.wrapping_add(b)))?;
                collapse_single(e);
                Ok(is_finished)
            }
            Expr::Mul(args) => {
                fold_commutative(args, |a, b| Ok(a.wrapping_mul(b)))?;
                collapse_single(e);
                Ok(is_finished)
            }
            Expr::Div(args) => {
                fold_commutative(args, |a, b| {
                    if b == 0 {
                        Err(AssemblyError::DivisionByZero)
                    } else {
                        Ok(a.wrapping_div(b))
                    }
                })?;
                collapse_single(e);
                Ok(is_finished)
            }
            Expr::Mod(args) => {
                fold_commutative(args, |a, b| {
                    if b == 0 {
                        Err(AssemblyError::DivisionByZero)
                    } else {
                        Ok(a.wrapping_rem(b))
                    }
                })?;
                collapse_single(e);
                Ok(is_finished)
            }
            Expr::Sub(args) => {
                fold_noncommutative(args, |a, b| Ok(a.wrapping_sub(b)))?;
                collapse_single(e);
                Ok(is_finished)
            }
            _ => Err(AssemblyError::InvalidExpression("invalid type in evaluate")),
        }
    }

    /// Rewrite `e` into its simplest form: alternate folding and flattening
    /// until a whole pass changes nothing.
    pub fn simplify(&self, e: &mut Expr) -> Result<(), AssemblyError> {
        while self.simplify_once(e)? {}
        Ok(())
    }

    fn simplify_once(&self, e: &mut Expr) -> Result<bool, AssemblyError> {
        self.evaluate(e)?;
        if self.simplify_eliminate(e) {
            return Ok(true);
        }
        if simplify_flatten(e) {
            return Ok(true);
        }
        match e {
            Expr::Neg(a) => self.simplify_once(a),
            Expr::Shl(a, b) | Expr::Shr(a, b) => {
                Ok(self.simplify_once(a)? || self.simplify_once(b)?)
            }
            Expr::Add(args)
            | Expr::Sub(args)
            | Expr::Mul(args)
            | Expr::Div(args)
            | Expr::Mod(args) => {
                for a in args.iter_mut() {
                    if self.simplify_once(a)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    // Like-term elimination, so offsetof-style arithmetic over labels can
    // collapse to a small immediate. Reserved.
    fn simplify_eliminate(&self, _e: &mut Expr) -> bool {
        false
    }

    /// Force `e` all the way down to a value. `Undef` yields the zero value;
    /// anything else that fails to reduce is `NotReducible`.
    pub fn completely_evaluate<T: EvalValue>(&self, e: &mut Expr) -> Result<T, AssemblyError> {
        if matches!(e, Expr::Undef) {
            return Ok(T::zero());
        }

        if !self.evaluate(e)? {
            return Err(AssemblyError::NotReducible);
        }

        T::from_expr(e)
    }
}

fn has_num_child(e: &Expr) -> bool {
    match e {
        Expr::Neg(a) => a.is_num(),
        Expr::Shl(a, b) | Expr::Shr(a, b) => a.is_num() || b.is_num(),
        Expr::Add(args) | Expr::Sub(args) | Expr::Mul(args) | Expr::Div(args) | Expr::Mod(args) => {
            args.iter().any(Expr::is_num)
        }
        _ => false,
    }
}

// Fold every numeric child into a single leading Num, preserving the
// relative order of the symbolic children behind it.
fn fold_commutative<F>(args: &mut Vec<Expr>, f: F) -> Result<(), AssemblyError>
where
    F: Fn(i64, i64) -> Result<i64, AssemblyError>,
{
    let mut acc: Option<i64> = None;
    let mut rest = Vec::with_capacity(args.len());
    for a in args.drain(..) {
        match a {
            Expr::Num(v) => {
                acc = Some(match acc {
                    None => v,
                    Some(x) => f(x, v)?,
                })
            }
            other => rest.push(other),
        }
    }

    let folded = acc.ok_or(AssemblyError::InvalidExpression(
        "commutative fold without numeric child",
    ))?;
    args.push(Expr::Num(folded));
    args.append(&mut rest);
    Ok(())
}

// Collapse numeric runs into the nearest preceding Num; a symbolic child
// breaks the run. The first child is kept as-is so operand order survives.
fn fold_noncommutative<F>(args: &mut Vec<Expr>, f: F) -> Result<(), AssemblyError>
where
    F: Fn(i64, i64) -> Result<i64, AssemblyError>,
{
    let mut new_args: Vec<Expr> = Vec::with_capacity(args.len());
    for a in args.drain(..) {
        match a {
            Expr::Num(v) => match new_args.last_mut() {
                Some(Expr::Num(last)) => *last = f(*last, v)?,
                _ => new_args.push(Expr::Num(v)),
            },
            other => new_args.push(other),
        }
    }
    *args = new_args;
    Ok(())
}

// Splice children of the same operator into the parent's child list.
fn simplify_flatten(e: &mut Expr) -> bool {
    let fired = match e {
        Expr::Add(args) => splice(args, |c| match c {
            Expr::Add(inner) => Ok(inner),
            other => Err(other),
        }),
        Expr::Mul(args) => splice(args, |c| match c {
            Expr::Mul(inner) => Ok(inner),
            other => Err(other),
        }),
        Expr::Div(args) => splice(args, |c| match c {
            Expr::Div(inner) => Ok(inner),
            other => Err(other),
        }),
        Expr::Mod(args) => splice(args, |c| match c {
            Expr::Mod(inner) => Ok(inner),
            other => Err(other),
        }),
        _ => return false,
    };
    collapse_single(e);
    fired
}

fn splice<F>(args: &mut Vec<Expr>, extract: F) -> bool
where
    F: Fn(Expr) -> Result<Vec<Expr>, Expr>,
{
    let mut fired = false;
    let mut new_args = Vec::with_capacity(args.len());
    for a in args.drain(..) {
        match extract(a) {
            Ok(mut inner) => {
                fired = true;
                new_args.append(&mut inner);
            }
            Err(other) => new_args.push(other),
        }
    }
    *args = new_args;
    fired
}

// A variable-arity node left with a single child becomes that child.
fn collapse_single(e: &mut Expr) {
    let repl = match e {
        Expr::Add(args) | Expr::Sub(args) | Expr::Mul(args) | Expr::Div(args) | Expr::Mod(args)
            if args.len() == 1 =>
        {
            args.pop()
        }
        _ => None,
    };
    if let Some(r) = repl {
        *e = r;
    }
}
