//! Per-axiom normalizers: literal folding, algebraic rewrites, commutative
//! canonicalization and pointwise tuple/pack lifting for the built-in arithmetic,
//! bitwise and comparison primops, plus the curry-chain mechanism that lets a
//! higher-arity primop axiom stay inert until it has collected all its arguments.
//!
//! A primop axiom is typed `Pi(width: Arity, Pi(operands: Sigma(T, T), T))`: applying
//! the width first yields a partially-applied node whose own normalizer is the next
//! curry stage; applying the operand pair to that node is what actually fires folding,
//! rewriting, canonicalization or lifting. This mirrors the reference normalizer this
//! module is grounded on, which generates the same two-stage shape for every binary
//! primop via macro expansion.

use crate::def::{Payload, Tag};
use crate::error::DefResult;
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Shl,
    AShr,
    LShr,
    And,
    Or,
    Xor,
    Div,
    Mod,
}

impl ArithOp {
    fn is_commutative(self) -> bool {
        matches!(self, ArithOp::Add | ArithOp::Mul | ArithOp::And | ArithOp::Or | ArithOp::Xor)
    }

    fn fold(self, width: u32, a: u64, b: u64) -> Option<u64> {
        let mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
        let (a, b) = (a & mask, b & mask);
        let result = match self {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            ArithOp::Shl => a.wrapping_shl(b as u32 % width.max(1)),
            ArithOp::LShr => a.wrapping_shr(b as u32 % width.max(1)),
            ArithOp::AShr => {
                let signed = sign_extend(a, width);
                (signed >> (b as u32 % width.max(1))) as u64
            }
            ArithOp::And => a & b,
            ArithOp::Or => a | b,
            ArithOp::Xor => a ^ b,
            ArithOp::Div | ArithOp::Mod => return None, // no fold rule; see trap handling in apply_operands
        };
        Some(result & mask)
    }
}

fn sign_extend(value: u64, width: u32) -> i64 {
    if width == 0 || width >= 64 {
        return value as i64;
    }
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CmpOp {
    fn is_commutative(self) -> bool {
        matches!(self, CmpOp::Eq | CmpOp::Ne)
    }

    fn eval(self, width: u32, a: u64, b: u64) -> bool {
        let (sa, sb) = (sign_extend(a, width), sign_extend(b, width));
        match self {
            CmpOp::Eq => sa == sb,
            CmpOp::Ne => sa != sb,
            CmpOp::Slt => sa < sb,
            CmpOp::Sle => sa <= sb,
            CmpOp::Sgt => sa > sb,
            CmpOp::Sge => sa >= sb,
        }
    }
}

/// The per-axiom (or per-partial-application) normalizer. Stored on the `Def` it
/// applies to; `crate::builder`'s `app` constructor consults it before falling back
/// to interning a plain `App`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormalizerKind {
    /// First curry stage: expects a literal width, curries to `ArithOperands`.
    ArithWidth(ArithOp),
    /// Second curry stage: expects the two-operand tuple; folds or rewrites.
    ArithOperands(ArithOp, u32),
    CmpWidth(CmpOp),
    CmpOperands(CmpOp, u32),
}

/// Consults `kind` given the partial-application node `callee` is about to receive
/// `arg`. Returns `Ok(None)` to fall back to interning a plain `App`, `Ok(Some(id))`
/// to replace the application with `id` entirely.
pub fn apply(world: &World, kind: NormalizerKind, arg: crate::def::DefId) -> DefResult<Option<crate::def::DefId>> {
    use crate::def::DefId;
    match kind {
        NormalizerKind::ArithWidth(op) => curry_width(world, arg, |w| NormalizerKind::ArithOperands(op, w)),
        NormalizerKind::CmpWidth(op) => curry_width(world, arg, |w| NormalizerKind::CmpOperands(op, w)),
        NormalizerKind::ArithOperands(op, width) => arith_operands(world, op, width, arg),
        NormalizerKind::CmpOperands(op, width) => cmp_operands(world, op, width, arg),
    }
    .map(|r| r.map(|id: DefId| id))
}

fn curry_width(
    world: &World,
    arg: crate::def::DefId,
    next: impl Fn(u32) -> NormalizerKind,
) -> DefResult<Option<crate::def::DefId>> {
    let width = match world.arena.payload(arg) {
        Payload::Nat(n) => n as u32,
        _ => return Ok(None),
    };
    // The caller (builder::app) interns the partial-application node itself and
    // attaches this stage's successor normalizer to it; signal that by returning
    // `None` would be wrong here since a replacement *is* produced, so the actual
    // App node is built by the caller using the normalizer we hand back indirectly
    // through a second call. To keep a single entry point, build it directly here.
    world.intern_app_with_normalizer(arg, Some(next(width))).map(Some)
}

fn as_two_operands(world: &World, arg: crate::def::DefId) -> Option<(crate::def::DefId, crate::def::DefId)> {
    if world.arena.tag(arg) != Tag::Tuple {
        return None;
    }
    let ops = world.arena.ops(arg);
    if ops.len() != 2 {
        return None;
    }
    Some((ops[0], ops[1]))
}

fn lit_payload(world: &World, id: crate::def::DefId) -> Option<u64> {
    if world.arena.tag(id) != Tag::Axiom {
        return None;
    }
    match world.arena.payload(id) {
        Payload::Lit(bits) => Some(bits),
        _ => None,
    }
}

fn arith_operands(
    world: &World,
    op: ArithOp,
    width: u32,
    arg: crate::def::DefId,
) -> DefResult<Option<crate::def::DefId>> {
    let Some((a, b)) = as_two_operands(world, arg) else { return Ok(None) };
    let result_ty = world.arena.ty(a).expect("operand has a type");

    if let (Some(x), Some(y)) = (lit_payload(world, a), lit_payload(world, b)) {
        if matches!(op, ArithOp::Div | ArithOp::Mod) && y & mask(width) == 0 {
            return Ok(Some(world.error(result_ty)?));
        }
        if let Some(folded) = op.fold(width, x, y) {
            return Ok(Some(world.lit(result_ty, folded)?));
        }
        return Ok(None);
    }

    if matches!(op, ArithOp::Div | ArithOp::Mod) {
        if let Some(0) = lit_payload(world, b) {
            return Ok(Some(world.error(result_ty)?));
        }
        return Ok(None);
    }

    if a == b {
        match op {
            ArithOp::Sub => return Ok(Some(world.lit(result_ty, 0)?)),
            ArithOp::Add => {
                let two = world.lit(result_ty, 2)?;
                return Ok(Some(world.build_arith(op, width, two, a)?));
            }
            _ => {}
        }
    }

    if let Some(zero) = lit_payload(world, b).filter(|v| *v == 0) {
        let _ = zero;
        if matches!(op, ArithOp::Add) {
            return Ok(Some(a));
        }
        if matches!(op, ArithOp::Mul) {
            return Ok(Some(b));
        }
    }
    if let Some(one) = lit_payload(world, b).filter(|v| *v == 1) {
        let _ = one;
        if matches!(op, ArithOp::Mul) {
            return Ok(Some(a));
        }
    }
    if let Some(zero) = lit_payload(world, a).filter(|v| *v == 0) {
        let _ = zero;
        if matches!(op, ArithOp::Add) {
            return Ok(Some(b));
        }
    }

    if let Some(lifted) = lift_pointwise(world, a, b, |w, x, y| w.build_arith(op, width, x, y))? {
        return Ok(Some(lifted));
    }

    if op.is_commutative() && should_swap(world, a, b) {
        return Ok(Some(world.build_arith(op, width, b, a)?));
    }

    Ok(None)
}

fn cmp_operands(world: &World, op: CmpOp, width: u32, arg: crate::def::DefId) -> DefResult<Option<crate::def::DefId>> {
    let Some((a, b)) = as_two_operands(world, arg) else { return Ok(None) };
    let bool_ty = world.bool_type();

    if let (Some(x), Some(y)) = (lit_payload(world, a), lit_payload(world, b)) {
        let v = op.eval(width, x, y);
        return Ok(Some(world.lit(bool_ty, v as u64)?));
    }

    if op.is_commutative() && should_swap(world, a, b) {
        return Ok(Some(world.build_cmp(op, width, b, a)?));
    }

    Ok(None)
}

/// The type to give an `App` node when [`apply`] declines to fold or rewrite it —
/// i.e. the normalizer fires but leaves a symbolic application in place. Width-stage
/// normalizers never reach here in practice (a non-literal width is rejected by the
/// caller before this is consulted); operand-stage ones return the scalar element
/// type (arithmetic) or `Bool` (comparison).
pub(crate) fn fallback_result_type(world: &World, kind: NormalizerKind, arg: crate::def::DefId) -> crate::def::DefId {
    match kind {
        NormalizerKind::ArithWidth(_) | NormalizerKind::CmpWidth(_) => world.universe(),
        NormalizerKind::ArithOperands(..) => as_two_operands(world, arg)
            .map(|(a, _)| world.arena.ty(a).expect("operand has a type"))
            .unwrap_or_else(|| world.arena.ty(arg).unwrap_or_else(|| world.universe())),
        NormalizerKind::CmpOperands(..) => world.bool_type(),
    }
}

fn mask(width: u32) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

/// Prefer the literal on the left; otherwise prefer the smaller `gid` on the left.
fn should_swap(world: &World, a: crate::def::DefId, b: crate::def::DefId) -> bool {
    let a_is_lit = lit_payload(world, a).is_some();
    let b_is_lit = lit_payload(world, b).is_some();
    if a_is_lit != b_is_lit {
        return b_is_lit; // swap so the Lit ends up on the left
    }
    a.gid() > b.gid()
}

/// When both operands are `Tuple`/`Pack` of the same shape, push the op pointwise
/// and rebuild the aggregate; `None` if the shapes don't match (fall through to the
/// scalar path, which will itself decline and leave a plain `App`).
fn lift_pointwise(
    world: &World,
    a: crate::def::DefId,
    b: crate::def::DefId,
    mut scalar: impl FnMut(&World, crate::def::DefId, crate::def::DefId) -> DefResult<crate::def::DefId>,
) -> DefResult<Option<crate::def::DefId>> {
    let ta = world.arena.tag(a);
    let tb = world.arena.tag(b);
    if ta != tb || !matches!(ta, Tag::Tuple | Tag::Pack) {
        return Ok(None);
    }
    if ta == Tag::Pack {
        let a_ops = world.arena.ops(a);
        let b_ops = world.arena.ops(b);
        if a_ops[0] != b_ops[0] {
            return Ok(None); // different arities
        }
        let combined = scalar(world, a_ops[1], b_ops[1])?;
        return Ok(Some(world.pack(a_ops[0], combined)?));
    }
    let a_ops = world.arena.ops(a);
    let b_ops = world.arena.ops(b);
    if a_ops.len() != b_ops.len() {
        return Ok(None);
    }
    let mut elems = Vec::with_capacity(a_ops.len());
    for (x, y) in a_ops.iter().zip(b_ops.iter()) {
        elems.push(scalar(world, *x, *y)?);
    }
    Ok(Some(world.tuple(elems)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;

    #[test]
    fn fold_add_sub_mul() {
        let w = World::new();
        let i32_ty = w.int_type(32);
        let two = w.lit(i32_ty, 2).unwrap();
        let three = w.lit(i32_ty, 3).unwrap();
        let sum = w.build_arith(ArithOp::Add, 32, two, three).unwrap();
        assert_eq!(w.arena.payload(sum), Payload::Lit(5));

        let diff = w.build_arith(ArithOp::Sub, 32, two, two).unwrap();
        assert_eq!(w.arena.payload(diff), Payload::Lit(0));

        let zero = w.lit(i32_ty, 0).unwrap();
        let prod = w.build_arith(ArithOp::Mul, 32, two, zero).unwrap();
        assert_eq!(w.arena.payload(prod), Payload::Lit(0));
    }

    #[test]
    fn add_zero_identity_without_folding() {
        let w = World::new();
        let i32_ty = w.int_type(32);
        let x = w.axiom_var("x", i32_ty).unwrap();
        let zero = w.lit(i32_ty, 0).unwrap();
        let result = w.build_arith(ArithOp::Add, 32, x, zero).unwrap();
        assert_eq!(result, x);
    }

    #[test]
    fn sub_self_is_zero_even_symbolically() {
        let w = World::new();
        let i32_ty = w.int_type(32);
        let x = w.axiom_var("x", i32_ty).unwrap();
        let result = w.build_arith(ArithOp::Sub, 32, x, x).unwrap();
        assert_eq!(w.arena.payload(result), Payload::Lit(0));
    }

    #[test]
    fn division_by_literal_zero_traps() {
        let w = World::new();
        let i32_ty = w.int_type(32);
        let x = w.axiom_var("x", i32_ty).unwrap();
        let zero = w.lit(i32_ty, 0).unwrap();
        let result = w.build_arith(ArithOp::Div, 32, x, zero).unwrap();
        assert_eq!(w.arena.tag(result), Tag::Error);
    }

    #[test]
    fn commutative_canonicalization_by_gid() {
        let w = World::new();
        let i32_ty = w.int_type(32);
        let x = w.axiom_var("x", i32_ty).unwrap();
        let y = w.axiom_var("y", i32_ty).unwrap();
        let ab = w.build_arith(ArithOp::Add, 32, x, y).unwrap();
        let ba = w.build_arith(ArithOp::Add, 32, y, x).unwrap();
        assert_eq!(ab, ba);
    }
}
