//! The owning root: one arena, one intern set, and the eagerly-built sentinel defs
//! (universe, per-qualifier stars, qualifier constants, unit, bool, integer types,
//! primop axioms) that every other constructor call refers to by handle.
//!
//! A `World` is single-owner and not `Sync`; it is meant to be driven by one logical
//! constructor (a type-checking pass, a parser, a test) at a time, matching the
//! single-threaded cooperative scheduling model this crate assumes throughout.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::arena::Arena;
use crate::axioms::{ArithOp, CmpOp, NormalizerKind};
use crate::def::{DefId, Payload, Tag};
use crate::error::DefResult;
use crate::freevars::FreeVarSet;
use crate::qualifier::Qualifier;

pub struct World {
    pub(crate) arena: Arena,
    pub(crate) universe: DefId,
    pub(crate) stars: HashMap<Qualifier, DefId>,
    pub(crate) qualifier_type: DefId,
    pub(crate) qualifier_const: HashMap<Qualifier, DefId>,
    pub(crate) unit_type: DefId,
    pub(crate) unit_value: DefId,
    pub(crate) bool_type: DefId,
    int_types: RefCell<HashMap<u32, DefId>>,
    arith_axioms: RefCell<HashMap<ArithOp, DefId>>,
    cmp_axioms: RefCell<HashMap<CmpOp, DefId>>,
}

impl World {
    pub fn new() -> Self {
        let arena = Arena::new();
        let universe = arena
            .intern_structural(Tag::Universe, None, vec![], Payload::None, FreeVarSet::new(), None)
            .expect("constructing the root Universe cannot fail");

        let mut stars = HashMap::new();
        let qualifier_type = arena
            .intern_structural(Tag::QualifierType, Some(universe), vec![], Payload::None, FreeVarSet::new(), None)
            .unwrap();

        let mut qualifier_const = HashMap::new();
        for q in Qualifier::ALL {
            let id = arena
                .intern_structural(Tag::QualifierConst, Some(qualifier_type), vec![], Payload::Qualifier(q), FreeVarSet::new(), None)
                .unwrap();
            qualifier_const.insert(q, id);
        }

        for q in Qualifier::ALL {
            let qc = qualifier_const[&q];
            let id = arena
                .intern_structural(Tag::Star, Some(universe), vec![qc], Payload::None, FreeVarSet::new(), None)
                .unwrap();
            stars.insert(q, id);
        }

        let star_u = stars[&Qualifier::Unrestricted];
        let unit_type = arena
            .intern_structural(Tag::Sigma, Some(star_u), vec![qualifier_const[&Qualifier::Unrestricted]], Payload::None, FreeVarSet::new(), None)
            .unwrap();
        let unit_value = arena
            .intern_structural(Tag::Tuple, Some(unit_type), vec![], Payload::None, FreeVarSet::new(), None)
            .unwrap();

        let bool_variant = arena
            .intern_structural(
                Tag::Variant,
                Some(star_u),
                vec![unit_type, unit_type],
                Payload::Nat(0), // distinguishes the 2-arm bool variant from other unit-pair variants
                FreeVarSet::new(),
                None,
            )
            .unwrap();

        World {
            arena,
            universe,
            stars,
            qualifier_type,
            qualifier_const,
            unit_type,
            unit_value,
            bool_type: bool_variant,
            int_types: RefCell::new(HashMap::new()),
            arith_axioms: RefCell::new(HashMap::new()),
            cmp_axioms: RefCell::new(HashMap::new()),
        }
    }

    pub fn universe(&self) -> DefId {
        self.universe
    }

    pub fn star(&self, q: Qualifier) -> DefId {
        self.stars[&q]
    }

    pub fn qualifier_type(&self) -> DefId {
        self.qualifier_type
    }

    pub fn qualifier_const(&self, q: Qualifier) -> DefId {
        self.qualifier_const[&q]
    }

    pub fn unit_type(&self) -> DefId {
        self.unit_type
    }

    pub fn unit_value(&self) -> DefId {
        self.unit_value
    }

    pub fn bool_type(&self) -> DefId {
        self.bool_type
    }

    /// An opaque integer type of the given bit width, represented as a nominal axiom
    /// of `Star U`. Dialect-specific integer semantics (signedness, target width
    /// tables) belong to the out-of-scope axiom tables this core exposes a hook for,
    /// not to this crate; this is the minimal handle such a table would build on.
    pub fn int_type(&self, width: u32) -> DefId {
        if let Some(id) = self.int_types.borrow().get(&width) {
            return *id;
        }
        let star_u = self.stars[&Qualifier::Unrestricted];
        let id = self
            .arena
            .alloc_nominal(Tag::Axiom, Some(star_u), 0, Payload::Nat(width as u64), Some(crate::def::DebugInfo::named(format!("int{width}"))), None)
            .and_then(|id| self.arena.seal(id, FreeVarSet::new()).map(|_| id))
            .expect("sealing a zero-op nominal axiom cannot fail");
        self.int_types.borrow_mut().insert(width, id);
        id
    }

    /// A fresh opaque nominal axiom standing in for a free variable of type `ty`, for
    /// use in tests and symbolic (non-literal) algebraic-rewrite scenarios.
    pub fn axiom_var(&self, name: &str, ty: DefId) -> DefResult<DefId> {
        let id = self.arena.alloc_nominal(Tag::Axiom, Some(ty), 0, Payload::None, Some(crate::def::DebugInfo::named(name)), None)?;
        self.arena.seal(id, FreeVarSet::new())?;
        Ok(id)
    }

    pub fn lit(&self, ty: DefId, bits: u64) -> DefResult<DefId> {
        self.arena.intern_structural(Tag::Axiom, Some(ty), vec![], Payload::Lit(bits), FreeVarSet::new(), None)
    }

    pub fn error(&self, expected_type: DefId) -> DefResult<DefId> {
        self.arena.intern_structural(Tag::Error, Some(expected_type), vec![expected_type], Payload::None, FreeVarSet::new(), None)
    }

    fn arith_axiom(&self, op: ArithOp) -> DefResult<DefId> {
        if let Some(id) = self.arith_axioms.borrow().get(&op) {
            return Ok(*id);
        }
        let arity_kind = self
            .arena
            .intern_structural(Tag::ArityKind, Some(self.universe), vec![self.qualifier_const[&Qualifier::Unrestricted]], Payload::None, FreeVarSet::new(), None)?;
        let id = self.arena.alloc_nominal(
            Tag::Axiom,
            Some(arity_kind),
            0,
            Payload::None,
            Some(crate::def::DebugInfo::named(format!("{op:?}"))),
            Some(NormalizerKind::ArithWidth(op)),
        )?;
        self.arena.seal(id, FreeVarSet::new())?;
        self.arith_axioms.borrow_mut().insert(op, id);
        Ok(id)
    }

    fn cmp_axiom(&self, op: CmpOp) -> DefResult<DefId> {
        if let Some(id) = self.cmp_axioms.borrow().get(&op) {
            return Ok(*id);
        }
        let arity_kind = self
            .arena
            .intern_structural(Tag::ArityKind, Some(self.universe), vec![self.qualifier_const[&Qualifier::Unrestricted]], Payload::None, FreeVarSet::new(), None)?;
        let id = self.arena.alloc_nominal(
            Tag::Axiom,
            Some(arity_kind),
            0,
            Payload::None,
            Some(crate::def::DebugInfo::named(format!("{op:?}"))),
            Some(NormalizerKind::CmpWidth(op)),
        )?;
        self.arena.seal(id, FreeVarSet::new())?;
        self.cmp_axioms.borrow_mut().insert(op, id);
        Ok(id)
    }

    /// Builds (or looks up the interned) partial application of `callee` to `arg`,
    /// directly attaching `normalizer` to the result. Used by the curry-chain stages
    /// in [`crate::axioms`] to hand back the next stage's node without going through
    /// the general [`crate::builder`] `app` path recursively.
    pub(crate) fn intern_app_with_normalizer(&self, arg: DefId, normalizer: Option<NormalizerKind>) -> DefResult<DefId> {
        // The callee is implicit: this is only ever invoked from within `app`'s own
        // normalizer dispatch, where `self` doesn't need to re-derive it structurally
        // (two different axioms curried to the same width would otherwise collide).
        // We key the partial application on the *normalizer itself* plus `arg`, by
        // folding the normalizer into the payload, so Add-curried-to-32 and
        // Sub-curried-to-32 remain distinct nodes.
        let payload = match normalizer {
            Some(NormalizerKind::ArithOperands(op, w)) => Payload::Lit(encode_arith(op, w)),
            Some(NormalizerKind::CmpOperands(op, w)) => Payload::Lit(encode_cmp(op, w)),
            _ => Payload::None,
        };
        let ty = self.arena.ty(arg).unwrap_or(self.universe);
        self.arena.intern_structural(Tag::App, Some(ty), vec![arg], payload, self.arena.free_vars(arg), normalizer)
    }

    /// Convenience entry point used by tests and by [`crate::axioms`]: builds the full
    /// curry chain for a binary arithmetic primop and returns the final result.
    pub fn build_arith(&self, op: ArithOp, width: u32, a: DefId, b: DefId) -> DefResult<DefId> {
        let axiom = self.arith_axiom(op)?;
        let width_arity = self.arity(width as u64, Qualifier::Unrestricted)?;
        let stage1 = self.app(axiom, width_arity)?;
        let pair = self.tuple(vec![a, b])?;
        self.app(stage1, pair)
    }

    pub fn build_cmp(&self, op: CmpOp, width: u32, a: DefId, b: DefId) -> DefResult<DefId> {
        let axiom = self.cmp_axiom(op)?;
        let width_arity = self.arity(width as u64, Qualifier::Unrestricted)?;
        let stage1 = self.app(axiom, width_arity)?;
        let pair = self.tuple(vec![a, b])?;
        self.app(stage1, pair)
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// A minimal, non-parseable rendering of `d` for panic messages, `DefError`
    /// contexts, and test assertion failures. Resolving a subterm's own rendering
    /// requires the arena, so this lives on `World` rather than as a bare `Def`
    /// accessor; see §6 for why a full surface-syntax pretty-printer is out of scope.
    pub fn display(&self, d: DefId) -> DefDisplay<'_> {
        DefDisplay { world: self, d }
    }
}

pub struct DefDisplay<'w> {
    world: &'w World,
    d: DefId,
}

impl<'w> std::fmt::Display for DefDisplay<'w> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        render(self.world, self.d, f, 0)
    }
}

fn render(world: &World, d: DefId, f: &mut std::fmt::Formatter<'_>, depth: u32) -> std::fmt::Result {
    if depth > 32 {
        return write!(f, "{d}...");
    }
    let tag = world.arena.tag(d);
    if let Some(info) = world.arena.debug(d) {
        if let Some(name) = info.name {
            return write!(f, "{name}");
        }
    }
    match world.arena.payload(d) {
        Payload::Qualifier(q) => return write!(f, "{q}"),
        Payload::Nat(n) if tag == Tag::Arity => return write!(f, "{n}"),
        Payload::Lit(bits) => return write!(f, "{bits}"),
        Payload::Index(i) if tag == Tag::Var => return write!(f, "%{i}"),
        _ => {}
    }
    write!(f, "{tag}")?;
    if world.arena.is_sealed(d) {
        let ops = world.arena.ops(d);
        if !ops.is_empty() {
            write!(f, "(")?;
            for (i, op) in ops.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                render(world, *op, f, depth + 1)?;
            }
            write!(f, ")")?;
        }
    } else {
        write!(f, "<unsealed>")?;
    }
    Ok(())
}

impl Default for World {
    fn default() -> Self {
        World::new()
    }
}

fn encode_arith(op: ArithOp, width: u32) -> u64 {
    (op as u64) << 32 | width as u64
}

fn encode_cmp(op: CmpOp, width: u32) -> u64 {
    (1u64 << 48) | (op as u64) << 32 | width as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_distinct_and_stable() {
        let w = World::new();
        assert_ne!(w.star(Qualifier::Linear), w.star(Qualifier::Unrestricted));
        assert_eq!(w.int_type(32), w.int_type(32));
        assert_ne!(w.int_type(32), w.int_type(64));
    }

    #[test]
    fn qualifier_constants_are_unique_defs() {
        let w = World::new();
        let all: Vec<_> = Qualifier::ALL.iter().map(|q| w.qualifier_const(*q)).collect();
        for i in 0..all.len() {
            for j in (i + 1)..all.len() {
                assert_ne!(all[i], all[j]);
            }
        }
    }
}
