//! Capture-avoiding substitution and the fixpoint pass that closes cyclic nominal defs.
//!
//! `reduce(world, d, args, shift)` returns a def equal to
//! `d[args_0/Var(shift), args_1/Var(shift+1), ...]`, with every other free variable
//! shifted down by `args.len()` once it crosses the binder. Nominal operands are
//! never walked eagerly: a stub is allocated immediately and its slots are filled in
//! a worklist drained once the outermost call returns, so mutually recursive nominal
//! graphs are closed in one pass no matter how deep the cycle.

use std::collections::HashMap;

use crate::def::{DefId, Payload, Tag};
use crate::error::DefResult;
use crate::freevars::FreeVarSet;
use crate::world::World;

/// How many extra binders operand `op_index` of a node tagged `tag` sits under,
/// relative to the node itself. Drives both the reducer's per-op shift and the
/// affine/relevant occurrence counter in `crate::builder`.
pub(crate) fn op_shift(tag: Tag, op_index: usize) -> usize {
    match tag {
        Tag::Pi => if op_index == 1 { 1 } else { 0 }, // ops = [domain, codomain, q]; codomain binds
        Tag::Lambda => if op_index == 1 { 1 } else { 0 }, // ops = [domain, body]
        Tag::Sigma => op_index.saturating_sub(1), // ops = [q, c0, c1, ...]; c_i depends on c_0..c_{i-1}
        Tag::Variadic | Tag::Pack => if op_index == 1 { 1 } else { 0 }, // ops = [arity, body]
        _ => 0,
    }
}

struct Reducer<'w> {
    world: &'w World,
    memo: HashMap<(DefId, usize), DefId>,
    worklist: Vec<(DefId, DefId, usize)>, // (old nominal, stub, shift)
}

pub fn reduce(world: &World, d: DefId, args: &[DefId], shift: usize) -> DefResult<DefId> {
    if args.is_empty() {
        return Ok(d); // idempotent reduction with no arguments
    }
    let mut r = Reducer { world, memo: HashMap::new(), worklist: Vec::new() };
    let result = r.go(d, args, shift)?;
    r.drain(args)?;
    Ok(result)
}

/// Adds `delta` to every free variable of `d` at or above its own top level (used
/// when hoisting a subterm out through `delta` binders, e.g. lambda's eta rule).
/// `delta` may be negative. Nominal operands reached along the way are re-stubbed
/// and closed through the same worklist discipline as [`reduce`], since a nominal
/// def can itself be open over the binders being removed.
pub fn shift_free_vars(world: &World, d: DefId, delta: i64) -> DefResult<DefId> {
    if delta == 0 || world.arena.free_vars(d).is_empty() {
        return Ok(d);
    }
    let mut s = Shifter { world, delta, memo: HashMap::new(), worklist: Vec::new() };
    let result = s.go(d, 0)?;
    s.drain()?;
    Ok(result)
}

struct Shifter<'w> {
    world: &'w World,
    delta: i64,
    memo: HashMap<(DefId, usize), DefId>,
    worklist: Vec<(DefId, DefId, usize)>, // (old nominal, stub, cutoff)
}

impl<'w> Shifter<'w> {
    fn go(&mut self, d: DefId, cutoff: usize) -> DefResult<DefId> {
        if self.world.arena.free_vars(d).none_from(cutoff) {
            return Ok(d);
        }
        if let Some(cached) = self.memo.get(&(d, cutoff)) {
            return Ok(*cached);
        }
        if self.world.arena.is_nominal(d) {
            let ty = self.world.arena.ty(d).expect("nominal def has a type");
            let new_ty = self.go(ty, cutoff)?;
            let num_ops = self.world.arena.raw_ops(d).len();
            let stub = self.world.arena.alloc_nominal(
                self.world.arena.tag(d),
                Some(new_ty),
                num_ops,
                self.world.arena.payload(d),
                self.world.arena.debug(d),
                self.world.arena.normalizer(d),
            )?;
            self.memo.insert((d, cutoff), stub);
            self.worklist.push((d, stub, cutoff));
            return Ok(stub);
        }
        if self.world.arena.tag(d) == Tag::Var {
            let i = match self.world.arena.payload(d) {
                Payload::Index(i) => i as usize,
                _ => unreachable!(),
            };
            if i < cutoff {
                return Ok(d);
            }
            let ty = self.world.arena.ty(d).expect("Var has a type");
            let new_ty = self.go(ty, cutoff)?;
            return self.world.var(new_ty, (i as i64 + self.delta) as u32);
        }
        let tag = self.world.arena.tag(d);
        let world = self.world;
        let result = rebuild(world, d, &mut |_w, op, idx| self.go(op, cutoff + op_shift(tag, idx)))?;
        self.memo.insert((d, cutoff), result);
        Ok(result)
    }

    fn drain(&mut self) -> DefResult<()> {
        let mut i = 0;
        while i < self.worklist.len() {
            let (old, stub, cutoff) = self.worklist[i];
            let old_ops = self.world.arena.ops(old);
            let tag = self.world.arena.tag(old);
            for (op_idx, op) in old_ops.iter().enumerate() {
                let shifted = self.go(*op, cutoff + op_shift(tag, op_idx))?;
                self.world.arena.set_op(stub, op_idx, shifted)?;
            }
            let fv = recompute_free_vars(self.world, tag, &self.world.arena.ops(stub));
            self.world.arena.seal(stub, fv)?;
            i += 1;
        }
        Ok(())
    }
}

impl<'w> Reducer<'w> {
    fn go(&mut self, d: DefId, args: &[DefId], shift: usize) -> DefResult<DefId> {
        if self.world.arena.free_vars(d).none_from(shift) {
            return Ok(d);
        }
        if let Some(cached) = self.memo.get(&(d, shift)) {
            return Ok(*cached);
        }
        if self.world.arena.is_nominal(d) {
            let ty = self.world.arena.ty(d).expect("nominal def has a type");
            let new_ty = self.go(ty, args, shift)?;
            let num_ops = self.world.arena.raw_ops(d).len();
            let debug = self.world.arena.debug(d);
            let normalizer = self.world.arena.normalizer(d);
            let stub = self
                .world
                .arena
                .alloc_nominal(self.world.arena.tag(d), Some(new_ty), num_ops, self.world.arena.payload(d), debug, normalizer)?;
            self.memo.insert((d, shift), stub);
            self.worklist.push((d, stub, shift));
            return Ok(stub);
        }
        if self.world.arena.tag(d) == Tag::Var {
            return self.reduce_var(d, args, shift);
        }
        let tag = self.world.arena.tag(d);
        let world = self.world;
        let result = rebuild(world, d, &mut |_w, op, idx| {
            // Safety-net against borrowck: re-enter through self, not the closure's
            // captured world reference, so memoization keeps working recursively.
            self.go(op, args, shift + op_shift(tag, idx))
        })?;
        self.memo.insert((d, shift), result);
        Ok(result)
    }

    fn reduce_var(&mut self, d: DefId, args: &[DefId], shift: usize) -> DefResult<DefId> {
        let i = match self.world.arena.payload(d) {
            Payload::Index(i) => i as i64,
            _ => unreachable!("Var always carries Payload::Index"),
        };
        let arg_index = args.len() as i64 - 1 - i + shift as i64;
        if arg_index >= 0 && (arg_index as usize) < args.len() {
            let replacement = args[arg_index as usize];
            let expected_ty = self.world.arena.ty(d).expect("Var has a type");
            let actual_ty = self.world.arena.ty(replacement).unwrap_or(expected_ty);
            if actual_ty != expected_ty {
                return self.world.error(expected_ty);
            }
            return Ok(replacement);
        }
        if arg_index < 0 {
            // Free above the binder: shift down by however many args we eliminated.
            let new_index = (i as i64 - args.len() as i64) as u32;
            let ty = self.world.arena.ty(d).expect("Var has a type");
            let new_ty = self.go(ty, args, shift)?;
            return self.world.var(new_ty, new_index);
        }
        // Inner variable: rebuild with a recursively-reduced type only.
        let ty = self.world.arena.ty(d).expect("Var has a type");
        let new_ty = self.go(ty, args, shift)?;
        self.world.var(new_ty, i as u32)
    }

    fn drain(&mut self, args: &[DefId]) -> DefResult<()> {
        let mut i = 0;
        while i < self.worklist.len() {
            let (old, stub, shift) = self.worklist[i];
            let old_ops = self.world.arena.ops(old);
            let tag = self.world.arena.tag(old);
            for (op_idx, op) in old_ops.iter().enumerate() {
                let reduced = self.go(*op, args, shift + op_shift(tag, op_idx))?;
                self.world.arena.set_op(stub, op_idx, reduced)?;
            }
            let fv = recompute_free_vars(self.world, tag, &self.world.arena.ops(stub));
            self.world.arena.seal(stub, fv)?;
            i += 1;
        }
        Ok(())
    }
}

/// Recomputes a node's free-variable set from its (already reduced) operands, used
/// when sealing a nominal stub after the fixpoint pass fills its slots in.
pub(crate) fn recompute_free_vars(world: &World, tag: Tag, ops: &[DefId]) -> FreeVarSet {
    let sets: Vec<FreeVarSet> = ops.iter().map(|op| world.arena.free_vars(*op)).collect();
    FreeVarSet::from_children(sets.iter().enumerate().map(|(i, fv)| (fv, op_shift(tag, i))))
}

/// Recursively reduces `d`'s type and every operand (via `step`, which already knows
/// the right shift for each operand index) and reconstructs the node through the
/// matching `crate::builder` smart constructor, so canonical rewrites re-apply after
/// substitution exactly as they did at first construction.
fn rebuild(world: &World, d: DefId, step: &mut dyn FnMut(&World, DefId, usize) -> DefResult<DefId>) -> DefResult<DefId> {
    let tag = world.arena.tag(d);
    let ops = world.arena.ops(d);
    let mut new_ops = Vec::with_capacity(ops.len());
    for (idx, op) in ops.iter().enumerate() {
        new_ops.push(step(world, *op, idx)?);
    }
    crate::builder::rebuild_with_ops(world, d, tag, new_ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualifier::Qualifier;

    #[test]
    fn idempotent_reduction_with_no_args() {
        let w = World::new();
        let star = w.star(Qualifier::Unrestricted);
        assert_eq!(reduce(&w, star, &[], 0).unwrap(), star);
    }

    #[test]
    fn beta_substitutes_var_zero() {
        let w = World::new();
        let star = w.star(Qualifier::Unrestricted);
        let body = w.var(star, 0).unwrap();
        let arg = w.int_type(32);
        let arg_as_ty_of_star = w.lit(star, 0).unwrap();
        let _ = arg;
        // body is `Var(star, 0)`; substituting with an argument of type `star` yields it back.
        let result = reduce(&w, body, &[arg_as_ty_of_star], 0).unwrap();
        assert_eq!(result, arg_as_ty_of_star);
    }

    #[test]
    fn free_var_above_binder_shifts_down() {
        let w = World::new();
        let star = w.star(Qualifier::Unrestricted);
        // Var(star, 2) is free above a single eliminated binder (shift=0, one arg).
        let v2 = w.var(star, 2).unwrap();
        let arg = w.lit(star, 0).unwrap();
        let result = reduce(&w, v2, &[arg], 0).unwrap();
        assert_eq!(world_payload_index(&w, result), 1);
    }

    fn world_payload_index(w: &World, d: DefId) -> u32 {
        match w.arena.payload(d) {
            Payload::Index(i) => i,
            _ => panic!("expected a Var"),
        }
    }
}
