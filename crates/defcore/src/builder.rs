//! The smart constructors clients call to build the graph: `pi`, `lambda`, `app`,
//! `sigma`, `tuple`, `extract`, `insert`, `variadic`, `pack`, `variant`, `any`,
//! `match_`, `intersection`, `all`, `pick`, `singleton`, `arity`, `index`, `var`, and
//! the nominal-construction entry points (`cn`, `begin_nominal_lambda`, ...).
//!
//! Every constructor does three things in order: compute the result's type/kind,
//! apply the canonical rewrites from the spec (eta, beta where allowed, iota for
//! extract-of-tuple, arity collapses), and intern the canonical node. A violated
//! typing or substructural rule never returns `Err` — it returns `Ok` of the
//! canonical `Error(expected_type)` node, so the poison value keeps flowing through
//! further builder calls exactly like any other def (see `crate::error` for the
//! host-level failures that *do* return `Err`).
//!
//! `rebuild_with_ops` is the inverse hook the reducer uses: substitution rebuilds a
//! node from its (already-substituted) operands by calling back into the matching
//! constructor here, so every canonical rewrite re-applies after substitution exactly
//! as it did at first construction.

use crate::def::{DebugInfo, DefId, Payload, Tag};
use crate::error::DefResult;
use crate::freevars::FreeVarSet;
use crate::qualifier::Qualifier;
use crate::reduce::{self, recompute_free_vars};
use crate::world::World;

/// The depth of a def's `type` chain before reaching `Universe`; used to decide
/// whether a Pi/Sigma/Variant/Intersection component lives at the type level or the
/// kind level, and to forbid a Pi codomain that is a plain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sort {
    Universe,
    Kind,
    Type,
    Term,
}

impl World {
    fn sort_of(&self, d: DefId) -> Sort {
        if d == self.universe() {
            return Sort::Universe;
        }
        let t1 = self.arena.ty(d).expect("non-Universe def has a type");
        if t1 == self.universe() {
            return Sort::Kind;
        }
        let t2 = self.arena.ty(t1).expect("a Kind-sorted def's type has a type");
        if t2 == self.universe() {
            return Sort::Type;
        }
        Sort::Term
    }

    fn is_kind_or_above(&self, d: DefId) -> bool {
        matches!(self.sort_of(d), Sort::Kind | Sort::Universe)
    }

    fn qualifier_const_of(&self, q: DefId) -> Option<Qualifier> {
        if self.arena.tag(q) == Tag::QualifierConst {
            match self.arena.payload(q) {
                Payload::Qualifier(qc) => Some(qc),
                _ => None,
            }
        } else {
            None
        }
    }

    /// The qualifier operand of `ty`'s own kind (`ty`'s type must be a `Star q`), or
    /// `Unrestricted` for anything whose kind isn't a plain `Star` (kinds, kind
    /// operators, and the like default to the least restrictive qualifier).
    fn qualifier_of_type(&self, ty: DefId) -> DefId {
        match self.arena.ty(ty) {
            Some(kind) if self.arena.tag(kind) == Tag::Star => self.arena.ops(kind)[0],
            _ => self.qualifier_const(Qualifier::Unrestricted),
        }
    }

    /// LUB of each def's own qualifier (via [`Self::qualifier_of_type`]); falls back
    /// to `Unrestricted` the moment any component's qualifier is symbolic rather than
    /// a constant, since the lattice join on a free qualifier variable isn't decidable
    /// here (see DESIGN.md).
    fn join_qualifiers_of(&self, defs: &[DefId]) -> DefId {
        let mut acc: Option<Qualifier> = None;
        for d in defs {
            match self.qualifier_const_of(self.qualifier_of_type(*d)) {
                Some(q) => acc = Some(acc.map_or(q, |a| a.join(q))),
                None => return self.qualifier_const(Qualifier::Unrestricted),
            }
        }
        self.qualifier_const(acc.unwrap_or(Qualifier::Unrestricted))
    }

    /// Counts the free occurrences of the variable at absolute De Bruijn depth
    /// `target_depth` within `d`, descending through binders by tracking how much
    /// each operand shifts that depth (mirrors [`crate::reduce::op_shift`]). Used to
    /// check the affine/relevant/linear occurrence rules on a freshly built `Lambda`.
    fn count_free_occurrences(&self, d: DefId, target_depth: usize) -> u32 {
        if !self.arena.free_vars(d).test(target_depth) {
            return 0;
        }
        if self.arena.tag(d) == Tag::Var {
            return match self.arena.payload(d) {
                Payload::Index(i) if i as usize == target_depth => 1,
                _ => 0,
            };
        }
        let tag = self.arena.tag(d);
        self.arena
            .ops(d)
            .iter()
            .enumerate()
            .map(|(i, op)| self.count_free_occurrences(*op, target_depth + crate::reduce::op_shift(tag, i)))
            .sum()
    }

    // ---- Universe-level kinds, generalized to a symbolic qualifier operand ----

    /// `Star q`, for an arbitrary qualifier def (constant or free variable). The
    /// `World::star(Qualifier)` convenience wraps the four eagerly-cached constants;
    /// this is the general form the reducer rebuilds through when `q` is itself open.
    pub fn star_of(&self, q: DefId) -> DefResult<DefId> {
        let fv = self.arena.free_vars(q);
        self.arena.intern_structural(Tag::Star, Some(self.universe()), vec![q], Payload::None, fv, None)
    }

    pub fn arity_kind_of(&self, q: DefId) -> DefResult<DefId> {
        let fv = self.arena.free_vars(q);
        self.arena.intern_structural(Tag::ArityKind, Some(self.universe()), vec![q], Payload::None, fv, None)
    }

    pub fn multi_arity_kind_of(&self, q: DefId) -> DefResult<DefId> {
        let fv = self.arena.free_vars(q);
        self.arena.intern_structural(Tag::MultiArityKind, Some(self.universe()), vec![q], Payload::None, fv, None)
    }

    // ---- Variables, arities, indices ----

    pub fn var(&self, ty: DefId, index: u32) -> DefResult<DefId> {
        let mut fv = self.arena.free_vars(ty);
        fv.set(index as usize);
        self.arena.intern_structural(Tag::Var, Some(ty), vec![], Payload::Index(index), fv, None)
    }

    /// A literal arity `n`, typed `ArityKind q`.
    pub fn arity(&self, n: u64, q: Qualifier) -> DefResult<DefId> {
        let kind = self.arity_kind_of(self.qualifier_const(q))?;
        self.arena.intern_structural(Tag::Arity, Some(kind), vec![], Payload::Nat(n), FreeVarSet::new(), None)
    }

    /// `variadic(arities[0], variadic(arities[1], ... body))`, folding right. This is
    /// the multi-arity sugar from the spec's arity-list syntax (`[arity(2), arity(3)]`
    /// applied to a variadic), expressed directly as nested single-arity `Variadic`s
    /// rather than by flattening a `Sigma`-of-arities at construction time.
    pub fn variadic_multi(&self, arities: &[DefId], body: DefId) -> DefResult<DefId> {
        match arities {
            [] => Ok(body),
            [a] => self.variadic(*a, body),
            [a, rest @ ..] => {
                let inner = self.variadic_multi(rest, body)?;
                self.variadic(*a, inner)
            }
        }
    }

    /// An index literal `i` into the `n`-element domain named by arity `a`. The
    /// arity def itself doubles as the index's type (there is no separate "Fin n"
    /// kind in this core — see DESIGN.md for why that's a reasonable reading of the
    /// spec's informal `iₐ` notation).
    pub fn index(&self, a: DefId, i: u64) -> DefResult<DefId> {
        self.arena.intern_structural(Tag::Axiom, Some(a), vec![], Payload::Lit(i), FreeVarSet::new(), None)
    }

    // ---- Pi / Lambda / App ----

    fn pi_bound(&self, domain: DefId, codomain: DefId, q: DefId) -> DefResult<DefId> {
        if self.is_kind_or_above(domain) || self.is_kind_or_above(codomain) {
            Ok(self.universe())
        } else {
            self.star_of(q)
        }
    }

    pub fn pi(&self, domain: DefId, codomain: DefId, q: DefId) -> DefResult<DefId> {
        if self.sort_of(codomain) == Sort::Term {
            // the codomain must be a type or kind, never a plain value
            return self.error(self.universe());
        }
        let bound = self.pi_bound(domain, codomain, q)?;
        let fv = recompute_free_vars(self, Tag::Pi, &[domain, codomain, q]);
        self.arena.intern_structural(Tag::Pi, Some(bound), vec![domain, codomain, q], Payload::None, fv, None)
    }

    /// `lambda(f, App(f, Var 0))` contracts to `f` shifted down one binder, provided
    /// `f` doesn't itself mention the binder being removed.
    fn try_eta_lambda(&self, body: DefId) -> DefResult<Option<DefId>> {
        if self.arena.tag(body) != Tag::App {
            return Ok(None);
        }
        let ops = self.arena.ops(body);
        let (f, a) = (ops[0], ops[1]);
        if self.arena.tag(a) != Tag::Var || !matches!(self.arena.payload(a), Payload::Index(0)) {
            return Ok(None);
        }
        if self.arena.free_vars(f).test(0) {
            return Ok(None);
        }
        Ok(Some(reduce::shift_free_vars(self, f, -1)?))
    }

    pub fn lambda(&self, domain: DefId, body: DefId) -> DefResult<DefId> {
        if let Some(contracted) = self.try_eta_lambda(body)? {
            return Ok(contracted);
        }
        let body_ty = self.arena.ty(body).expect("lambda body has a type");
        let q = self.qualifier_of_type(domain);
        let pi_ty = self.pi(domain, body_ty, q)?;
        if let Some(qc) = self.qualifier_const_of(q) {
            let uses = self.count_free_occurrences(body, 0);
            let ok = match qc {
                Qualifier::Unrestricted => true,
                Qualifier::Affine => uses <= 1,
                Qualifier::Relevant => uses >= 1,
                Qualifier::Linear => uses == 1,
            };
            if !ok {
                return self.error(pi_ty);
            }
        }
        let fv = recompute_free_vars(self, Tag::Lambda, &[domain, body]);
        self.arena.intern_structural(Tag::Lambda, Some(pi_ty), vec![domain, body], Payload::None, fv, None)
    }

    /// Allocates a nominal (never hash-consed) `Lambda` whose body can reference the
    /// stub's own `DefId` before it's sealed, to support directly-recursive
    /// functions. The caller must `set(id, 1, body)` and `seal(id)`.
    pub fn begin_nominal_lambda(&self, domain: DefId, codomain: DefId, q: DefId, debug: Option<DebugInfo>) -> DefResult<DefId> {
        let pi_ty = self.pi(domain, codomain, q)?;
        let id = self.arena.alloc_nominal(Tag::Lambda, Some(pi_ty), 2, Payload::None, debug, None)?;
        self.arena.set_op(id, 0, domain)?;
        Ok(id)
    }

    /// Drives one more normalization step on an inert `App` node, caching the result
    /// on the node itself so repeated forcing doesn't redo normalizer dispatch. Only
    /// meaningful for the final operand stage of a primop curry chain, where a
    /// symbolic application may have been left un-folded at construction time but
    /// becomes foldable once its operands are later specialized (e.g. to literals).
    pub fn force(&self, d: DefId) -> DefResult<DefId> {
        if self.arena.tag(d) != Tag::App {
            return Ok(d);
        }
        if let Some(cached) = self.arena.app_cache(d) {
            return Ok(cached);
        }
        let ops = self.arena.ops(d);
        let (callee, arg) = (ops[0], ops[1]);
        let result = match self.arena.normalizer(callee) {
            Some(kind) => crate::axioms::apply(self, kind, arg)?.unwrap_or(d),
            None => d,
        };
        self.arena.set_app_cache(d, result);
        Ok(result)
    }

    /// Axiom-normalizer callees (the primop curry chain) never carry a real `Pi`
    /// type — they're polymorphic over the operand type in a way this core's simple
    /// Pi can't express, and are validated by the normalizer itself rather than by
    /// domain matching. Ordinary callees go through the full Pi-typed path below.
    pub fn app(&self, callee: DefId, arg: DefId) -> DefResult<DefId> {
        if let Some(kind) = self.arena.normalizer(callee) {
            use crate::axioms::NormalizerKind;
            return match crate::axioms::apply(self, kind, arg)? {
                Some(result) => Ok(result),
                None if matches!(kind, NormalizerKind::ArithWidth(_) | NormalizerKind::CmpWidth(_)) => {
                    self.error(self.universe())
                }
                None => {
                    let result_ty = crate::axioms::fallback_result_type(self, kind, arg);
                    let fv = self.arena.free_vars(callee).union(&self.arena.free_vars(arg));
                    self.arena.intern_structural(Tag::App, Some(result_ty), vec![callee, arg], Payload::None, fv, None)
                }
            };
        }

        let callee_ty = self.arena.ty(callee).expect("callee has a type");
        if self.arena.tag(callee_ty) != Tag::Pi {
            return self.error(self.universe());
        }
        let ops = self.arena.ops(callee_ty);
        let (domain, codomain, q) = (ops[0], ops[1], ops[2]);
        if self.arena.ty(arg) != Some(domain) {
            return self.error(domain);
        }
        let result_ty = reduce::reduce(self, codomain, &[arg], 0)?;

        if self.arena.tag(callee) == Tag::Lambda && !self.arena.is_nominal(callee) {
            let domain_q = self.qualifier_const_of(q);
            let eager = !matches!(domain_q, Some(Qualifier::Affine) | Some(Qualifier::Linear));
            if eager {
                let body = self.arena.ops(callee)[1];
                return reduce::reduce(self, body, &[arg], 0);
            }
        }

        let fv = self.arena.free_vars(callee).union(&self.arena.free_vars(arg));
        self.arena.intern_structural(Tag::App, Some(result_ty), vec![callee, arg], Payload::None, fv, None)
    }

    // ---- Sigma / Tuple / Extract / Insert ----

    fn sigma_unit(&self, q: DefId) -> DefResult<DefId> {
        let ty = self.star_of(q)?;
        self.arena.intern_structural(Tag::Sigma, Some(ty), vec![q], Payload::None, FreeVarSet::new(), None)
    }

    pub fn sigma(&self, q: DefId, components: Vec<DefId>) -> DefResult<DefId> {
        if components.is_empty() {
            return self.sigma_unit(q);
        }
        if components.len() == 1 {
            return Ok(components[0]);
        }
        if components.iter().all(|c| *c == components[0]) && self.arena.free_vars(components[0]).is_empty() {
            let qc = self.qualifier_const_of(q).unwrap_or(Qualifier::Unrestricted);
            let n = self.arity(components.len() as u64, qc)?;
            return self.variadic(n, components[0]);
        }
        let ty = if components.iter().any(|c| self.is_kind_or_above(*c)) {
            self.universe()
        } else {
            self.star_of(q)?
        };
        let mut ops = Vec::with_capacity(components.len() + 1);
        ops.push(q);
        ops.extend(components);
        let fv = recompute_free_vars(self, Tag::Sigma, &ops);
        self.arena.intern_structural(Tag::Sigma, Some(ty), ops, Payload::None, fv, None)
    }

    /// Allocates a nominal `Sigma` with `n_components` reserved component slots
    /// beyond the qualifier slot, for recursive record types. `q` is set immediately
    /// since it never depends on the recursive reference; components are set later.
    pub fn begin_nominal_sigma(&self, q: DefId, n_components: usize, debug: Option<DebugInfo>) -> DefResult<DefId> {
        let ty = self.star_of(q)?;
        let id = self.arena.alloc_nominal(Tag::Sigma, Some(ty), n_components + 1, Payload::None, debug, None)?;
        self.arena.set_op(id, 0, q)?;
        Ok(id)
    }

    fn arity_of_sigma(&self, t: DefId) -> Option<usize> {
        let ty = self.arena.ty(t)?;
        (self.arena.tag(ty) == Tag::Sigma).then(|| self.arena.ops(ty).len() - 1)
    }

    /// `tuple([extract(t,0), ..., extract(t,n-1)]) == t` when `t`'s Sigma has arity `n`.
    fn try_eta_tuple(&self, elems: &[DefId]) -> Option<DefId> {
        let first = elems.first()?;
        if self.arena.tag(*first) != Tag::Extract {
            return None;
        }
        let t = self.arena.ops(*first)[0];
        for (i, e) in elems.iter().enumerate() {
            if self.arena.tag(*e) != Tag::Extract || self.arena.ops(*e)[0] != t {
                return None;
            }
            match self.arena.payload(*e) {
                Payload::Index(idx) if idx as usize == i => {}
                _ => return None,
            }
        }
        (self.arity_of_sigma(t)? == elems.len()).then_some(t)
    }

    pub fn tuple(&self, elems: Vec<DefId>) -> DefResult<DefId> {
        if let Some(t) = self.try_eta_tuple(&elems) {
            return Ok(t);
        }
        if elems.len() >= 2 && elems.iter().all(|e| *e == elems[0]) && self.arena.free_vars(elems[0]).is_empty() {
            let ty = self.arena.ty(elems[0]).expect("tuple elem has a type");
            let qc = self.qualifier_const_of(self.qualifier_of_type(ty)).unwrap_or(Qualifier::Unrestricted);
            let n = self.arity(elems.len() as u64, qc)?;
            return self.pack(n, elems[0]);
        }
        let tys: Vec<DefId> = elems.iter().map(|e| self.arena.ty(*e).expect("tuple elem has a type")).collect();
        let q = self.join_qualifiers_of(&tys);
        let sigma_ty = self.sigma(q, tys)?;
        let fv = recompute_free_vars(self, Tag::Tuple, &elems);
        self.arena.intern_structural(Tag::Tuple, Some(sigma_ty), elems, Payload::None, fv, None)
    }

    pub fn extract(&self, t: DefId, i: u64) -> DefResult<DefId> {
        match self.arena.tag(t) {
            Tag::Tuple => {
                let ops = self.arena.ops(t);
                match ops.get(i as usize) {
                    Some(v) => Ok(*v),
                    None => self.error(self.universe()),
                }
            }
            Tag::Pack => {
                let ops = self.arena.ops(t);
                let (a, body) = (ops[0], ops[1]);
                let idx = self.index(a, i)?;
                reduce::reduce(self, body, &[idx], 0)
            }
            _ => self.extract_dependent(t, i),
        }
    }

    fn extract_dependent(&self, t: DefId, i: u64) -> DefResult<DefId> {
        let ty = self.arena.ty(t).expect("extract target has a type");
        match self.arena.tag(ty) {
            Tag::Sigma => {
                let sigma_ops = self.arena.ops(ty); // [q, c0, c1, ...]
                let n = sigma_ops.len() - 1;
                if i as usize >= n {
                    return self.error(self.universe());
                }
                let comp_ty = sigma_ops[i as usize + 1];
                // comp_ty's Var(k) refers to extract(t, i-1-k); substitute the prior
                // projections in, most-recently-bound first.
                let mut args = Vec::with_capacity(i as usize);
                for k in 0..i {
                    args.push(self.extract(t, k)?);
                }
                let result_ty = if args.is_empty() { comp_ty } else { reduce::reduce(self, comp_ty, &args, 0)? };
                let fv = self.arena.free_vars(t);
                self.arena.intern_structural(Tag::Extract, Some(result_ty), vec![t], Payload::Index(i as u32), fv, None)
            }
            Tag::Variadic => {
                let vops = self.arena.ops(ty);
                let (a, body) = (vops[0], vops[1]);
                let idx = self.index(a, i)?;
                let result_ty = reduce::reduce(self, body, &[idx], 0)?;
                let fv = self.arena.free_vars(t);
                self.arena.intern_structural(Tag::Extract, Some(result_ty), vec![t], Payload::Index(i as u32), fv, None)
            }
            _ => self.error(self.universe()),
        }
    }

    pub fn insert(&self, t: DefId, i: u64, v: DefId) -> DefResult<DefId> {
        let ty = self.arena.ty(t).expect("insert target has a type");
        if self.arena.tag(t) == Tag::Tuple {
            let ops = self.arena.ops(t);
            let Some(slot) = ops.get(i as usize) else { return self.error(ty) };
            let expected = self.arena.ty(*slot).expect("tuple elem has a type");
            if self.arena.ty(v) != Some(expected) {
                return self.error(ty);
            }
        }
        let fv = self.arena.free_vars(t).union(&self.arena.free_vars(v));
        self.arena.intern_structural(Tag::Insert, Some(ty), vec![t, v], Payload::Index(i as u32), fv, None)
    }

    // ---- Variadic / Pack ----

    pub fn variadic(&self, a: DefId, body: DefId) -> DefResult<DefId> {
        if self.arena.tag(a) == Tag::Arity {
            if let Payload::Nat(n) = self.arena.payload(a) {
                let q = self.arena.ops(self.arena.ty(a).expect("arity has a kind"))[0];
                if n == 0 {
                    return self.sigma_unit(q);
                }
                if n == 1 {
                    let idx0 = self.index(a, 0)?;
                    return reduce::reduce(self, body, &[idx0], 0);
                }
                // n >= 2 with a closed body is already the canonical Variadic shape
                // (see Tag::Sigma's own collapse, which goes the other direction);
                // fall through to plain interning rather than bouncing to `sigma`.
                let _ = n;
            }
        }
        let ty = if self.is_kind_or_above(body) { self.universe() } else { self.star_of(self.qualifier_of_type(body))? };
        let fv = recompute_free_vars(self, Tag::Variadic, &[a, body]);
        self.arena.intern_structural(Tag::Variadic, Some(ty), vec![a, body], Payload::None, fv, None)
    }

    pub fn pack(&self, a: DefId, body: DefId) -> DefResult<DefId> {
        if self.arena.tag(a) == Tag::Arity {
            if let Payload::Nat(n) = self.arena.payload(a) {
                if n == 0 {
                    return Ok(self.unit_value());
                }
                if n == 1 {
                    let idx0 = self.index(a, 0)?;
                    return reduce::reduce(self, body, &[idx0], 0);
                }
                // n >= 2 with a closed body is already the canonical Pack shape (see
                // Tag::Tuple's own collapse, which goes the other direction); fall
                // through to plain interning rather than bouncing to `tuple`.
                let _ = n;
            }
        }
        let body_ty = self.arena.ty(body).expect("pack body has a type");
        let variadic_ty = self.variadic(a, body_ty)?;
        let fv = recompute_free_vars(self, Tag::Pack, &[a, body]);
        self.arena.intern_structural(Tag::Pack, Some(variadic_ty), vec![a, body], Payload::None, fv, None)
    }

    // ---- Variant / Any / Match ----

    pub fn variant(&self, components: Vec<DefId>) -> DefResult<DefId> {
        let ty = if components.iter().any(|c| self.is_kind_or_above(*c)) {
            self.universe()
        } else {
            self.star_of(self.join_qualifiers_of(&components))?
        };
        let fv = recompute_free_vars(self, Tag::Variant, &components);
        self.arena.intern_structural(Tag::Variant, Some(ty), components, Payload::None, fv, None)
    }

    /// Allocates a nominal `Variant` with `n_components` reserved slots, for
    /// recursive sum types (e.g. a list-shaped variant whose cons arm refers back to
    /// the variant itself).
    pub fn begin_nominal_variant(&self, q: DefId, n_components: usize, debug: Option<DebugInfo>) -> DefResult<DefId> {
        let ty = self.star_of(q)?;
        self.arena.alloc_nominal(Tag::Variant, Some(ty), n_components, Payload::None, debug, None)
    }

    pub fn any(&self, variant_ty: DefId, value: DefId) -> DefResult<DefId> {
        let value_ty = self.arena.ty(value).expect("value has a type");
        if self.arena.tag(variant_ty) == Tag::Variant && !self.arena.ops(variant_ty).contains(&value_ty) {
            return self.error(variant_ty);
        }
        let fv = recompute_free_vars(self, Tag::Any, &[variant_ty, value]);
        self.arena.intern_structural(Tag::Any, Some(variant_ty), vec![variant_ty, value], Payload::None, fv, None)
    }

    fn handler_domain(&self, h: DefId) -> DefId {
        let ty = self.arena.ty(h).expect("handler has a type");
        self.arena.ops(ty)[0]
    }

    fn handler_codomain(&self, h: DefId) -> DefId {
        let ty = self.arena.ty(h).expect("handler has a type");
        self.arena.ops(ty)[1]
    }

    /// Sorts handlers by their domain's `gid` (so two callers who list the same arms
    /// in different order still build the same node), then either reduces directly
    /// (scrutinee statically `Any`) or interns the dispatch node after checking the
    /// sorted domains line up with the scrutinee's variant components.
    pub fn match_(&self, scrutinee: DefId, handlers: Vec<DefId>) -> DefResult<DefId> {
        let mut sorted = handlers;
        sorted.sort_by_key(|h| self.handler_domain(*h).gid());

        if self.arena.tag(scrutinee) == Tag::Any {
            let value = self.arena.ops(scrutinee)[1];
            let value_ty = self.arena.ty(value).expect("value has a type");
            return match sorted.iter().find(|h| self.handler_domain(**h) == value_ty) {
                Some(h) => self.app(*h, value),
                None => self.error(self.universe()),
            };
        }

        let scrutinee_ty = self.arena.ty(scrutinee).expect("scrutinee has a type");
        if self.arena.tag(scrutinee_ty) == Tag::Variant {
            let components = self.arena.ops(scrutinee_ty);
            let domains: Vec<DefId> = sorted.iter().map(|h| self.handler_domain(*h)).collect();
            if domains != components {
                return self.error(self.universe());
            }
        }
        let result_ty = sorted.first().map(|h| self.handler_codomain(*h)).unwrap_or_else(|| self.unit_type());
        let mut ops = Vec::with_capacity(sorted.len() + 1);
        ops.push(scrutinee);
        ops.extend(sorted);
        let fv = recompute_free_vars(self, Tag::Match, &ops);
        self.arena.intern_structural(Tag::Match, Some(result_ty), ops, Payload::None, fv, None)
    }

    // ---- Intersection / All / Pick ----

    pub fn intersection(&self, components: Vec<DefId>) -> DefResult<DefId> {
        let ty = if components.iter().any(|c| self.is_kind_or_above(*c)) {
            self.universe()
        } else {
            self.star_of(self.join_qualifiers_of(&components))?
        };
        let fv = recompute_free_vars(self, Tag::Intersection, &components);
        self.arena.intern_structural(Tag::Intersection, Some(ty), components, Payload::None, fv, None)
    }

    /// The intersection introduction form. Its type is inferred from the values'
    /// own types (mirroring `tuple`'s inference of its `Sigma`) rather than taking a
    /// caller-supplied intersection type, so substitution can rebuild it purely from
    /// its operands like every other structural node (see DESIGN.md).
    pub fn all(&self, values: Vec<DefId>) -> DefResult<DefId> {
        let tys: Vec<DefId> = values.iter().map(|v| self.arena.ty(*v).expect("value has a type")).collect();
        let ty = self.intersection(tys)?;
        let fv = recompute_free_vars(self, Tag::All, &values);
        self.arena.intern_structural(Tag::All, Some(ty), values, Payload::None, fv, None)
    }

    pub fn pick(&self, value: DefId, i: u64) -> DefResult<DefId> {
        if self.arena.tag(value) == Tag::All {
            let ops = self.arena.ops(value);
            return match ops.get(i as usize) {
                Some(v) => Ok(*v),
                None => self.error(self.arena.ty(value).expect("value has a type")),
            };
        }
        let ty = self.arena.ty(value).expect("value has a type");
        let result_ty = if self.arena.tag(ty) == Tag::Intersection {
            match self.arena.ops(ty).get(i as usize) {
                Some(c) => *c,
                None => return self.error(ty),
            }
        } else {
            ty
        };
        let fv = self.arena.free_vars(value);
        self.arena.intern_structural(Tag::Pick, Some(result_ty), vec![value], Payload::Index(i as u32), fv, None)
    }

    // ---- Singleton ----

    pub fn singleton(&self, v: DefId) -> DefResult<DefId> {
        let ty = self.arena.ty(v).expect("value has a type");
        let fv = self.arena.free_vars(v);
        self.arena.intern_structural(Tag::Singleton, Some(ty), vec![v], Payload::None, fv, None)
    }

    // ---- Nominal continuations ----

    /// A one-shot nominal `Cn(return_type)`. Continuations don't need the
    /// allocate-then-set dance `begin_nominal_lambda`/`begin_nominal_sigma` use,
    /// since `return_type` never needs to mention the continuation itself.
    pub fn cn(&self, return_type: DefId, debug: Option<DebugInfo>) -> DefResult<DefId> {
        let ty = self.star_of(self.qualifier_const(Qualifier::Unrestricted))?;
        let id = self.arena.alloc_nominal(Tag::Cn, Some(ty), 1, Payload::None, debug, None)?;
        self.arena.set_op(id, 0, return_type)?;
        self.seal(id)?;
        Ok(id)
    }

    // ---- Shared nominal lifecycle surface ----

    pub fn set(&self, id: DefId, index: usize, value: DefId) -> DefResult<()> {
        self.arena.set_op(id, index, value)
    }

    /// Seals a nominal node once every slot is filled, recomputing its free-variable
    /// set from the (now complete) operands via the same per-tag binder-shift table
    /// the reducer uses.
    pub fn seal(&self, id: DefId) -> DefResult<()> {
        let tag = self.arena.tag(id);
        let raw = self.arena.raw_ops(id);
        if raw.iter().any(Option::is_none) {
            return self.arena.seal(id, FreeVarSet::new());
        }
        let ops: Vec<DefId> = raw.into_iter().map(|o| o.expect("checked above")).collect();
        let fv = recompute_free_vars(self, tag, &ops);
        self.arena.seal(id, fv)
    }
}

/// Reconstructs a node of `tag` from its already-substituted `ops`, by calling back
/// into the matching smart constructor above. This is how the reducer's rebuild step
/// re-applies canonical rewrites (collapsing a now-closed `Variadic(arity(1), _)`,
/// re-firing a normalizer whose operands just became literals, etc.) after
/// substitution instead of just patching operands in place.
pub(crate) fn rebuild_with_ops(world: &World, d: DefId, tag: Tag, ops: Vec<DefId>) -> DefResult<DefId> {
    match tag {
        // Closed nodes (no free vars ever cross their own top level) are never
        // actually routed here by the reducer's short-circuit, but every tag needs an
        // arm so the match stays exhaustive as the node set grows.
        Tag::Universe | Tag::QualifierType | Tag::QualifierConst | Tag::Arity | Tag::Axiom => Ok(d),
        Tag::Var => unreachable!("the reducer special-cases Var before ever calling rebuild"),
        Tag::Star => world.star_of(ops[0]),
        Tag::ArityKind => world.arity_kind_of(ops[0]),
        Tag::MultiArityKind => world.multi_arity_kind_of(ops[0]),
        Tag::Pi => world.pi(ops[0], ops[1], ops[2]),
        Tag::Lambda => world.lambda(ops[0], ops[1]),
        Tag::App => world.app(ops[0], ops[1]),
        Tag::Sigma => world.sigma(ops[0], ops[1..].to_vec()),
        Tag::Tuple => world.tuple(ops),
        Tag::Extract => {
            let i = index_payload(world, d);
            world.extract(ops[0], i)
        }
        Tag::Insert => {
            let i = index_payload(world, d);
            world.insert(ops[0], i, ops[1])
        }
        Tag::Variadic => world.variadic(ops[0], ops[1]),
        Tag::Pack => world.pack(ops[0], ops[1]),
        Tag::Variant => world.variant(ops),
        Tag::Any => world.any(ops[0], ops[1]),
        Tag::Match => world.match_(ops[0], ops[1..].to_vec()),
        Tag::Intersection => world.intersection(ops),
        Tag::All => world.all(ops),
        Tag::Pick => {
            let i = index_payload(world, d);
            world.pick(ops[0], i)
        }
        Tag::Singleton => world.singleton(ops[0]),
        Tag::Cn => unreachable!("Cn is always nominal; the reducer closes it via the stub/worklist path"),
        Tag::Error => world.error(ops[0]),
    }
}

fn index_payload(world: &World, d: DefId) -> u64 {
    match world.arena.payload(d) {
        Payload::Index(i) => i as u64,
        _ => unreachable!("tag carries Payload::Index"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::Tag;

    fn nat_ty(w: &World) -> DefId {
        w.int_type(32)
    }

    #[test]
    fn hash_cons_across_equal_structural_calls() {
        let w = World::new();
        let star = w.star(Qualifier::Unrestricted);
        let a = w.pi(star, star, w.qualifier_const(Qualifier::Unrestricted)).unwrap();
        let b = w.pi(star, star, w.qualifier_const(Qualifier::Unrestricted)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn poly_identity_applies_at_a_type() {
        let w = World::new();
        let star = w.star(Qualifier::Unrestricted);
        let u = w.qualifier_const(Qualifier::Unrestricted);
        // \T:*. \x:T. x
        let inner_body = w.var(w.var(star, 0).unwrap(), 0).unwrap();
        let inner = w.lambda(w.var(star, 0).unwrap(), inner_body).unwrap();
        let poly_id = w.lambda(star, inner).unwrap();
        assert_eq!(w.arena.tag(poly_id), Tag::Lambda);

        let nat = nat_ty(&w);
        let applied = w.app(poly_id, nat).unwrap();
        // applying at Nat should beta-reduce to \x:Nat. x
        let expected_body = w.var(nat, 0).unwrap();
        let expected = w.lambda(nat, expected_body).unwrap();
        assert_eq!(applied, expected);
        let _ = u;
    }

    #[test]
    fn affine_misuse_yields_error_used_twice_not_once() {
        let w = World::new();
        let star_a = w.star(Qualifier::Affine);
        let u = w.qualifier_const(Qualifier::Unrestricted);
        // An affine-qualified domain: a free type variable of kind `*ᴬ`.
        let domain = w.axiom_var("T", star_a).unwrap();
        let g_ty = w.pi(domain, w.pi(domain, domain, u).unwrap(), u).unwrap();
        let g = w.axiom_var("g", g_ty).unwrap();
        let v = w.var(domain, 0).unwrap();
        // lambda(T_A, app(app(g, Var 0), Var 0)) uses Var 0 twice; doesn't collapse
        // to a Pack the way `tuple([v, v])` would.
        let twice = w.app(w.app(g, v).unwrap(), v).unwrap();
        let result = w.lambda(domain, twice).unwrap();
        assert_eq!(w.arena.tag(result), Tag::Error);

        let once = w.lambda(domain, v).unwrap();
        assert_ne!(w.arena.tag(once), Tag::Error);
    }

    #[test]
    fn extract_of_tuple_projects_directly() {
        let w = World::new();
        let nat = nat_ty(&w);
        let a = w.lit(nat, 1).unwrap();
        let b = w.lit(nat, 2).unwrap();
        let t = w.tuple(vec![a, b]).unwrap();
        assert_eq!(w.extract(t, 0).unwrap(), a);
        assert_eq!(w.extract(t, 1).unwrap(), b);
    }

    #[test]
    fn eta_tuple_of_extracts_collapses_to_original() {
        let w = World::new();
        let nat = nat_ty(&w);
        let q = w.qualifier_const(Qualifier::Unrestricted);
        let sigma = w.sigma(q, vec![nat, nat]).unwrap();
        let t = w.axiom_var("t", sigma).unwrap();
        let e0 = w.extract(t, 0).unwrap();
        let e1 = w.extract(t, 1).unwrap();
        let rebuilt = w.tuple(vec![e0, e1]).unwrap();
        assert_eq!(rebuilt, t);
    }

    #[test]
    fn dependent_sigma_second_component_depends_on_first() {
        let w = World::new();
        let star = w.star(Qualifier::Unrestricted);
        let u = w.qualifier_const(Qualifier::Unrestricted);
        // Sigma(T:*, T) -- second component is Var(0), referring to the first.
        let second = w.var(star, 0).unwrap();
        let sigma = w.sigma(u, vec![star, second]).unwrap();
        let v = w.axiom_var("v", sigma).unwrap();
        let fst = w.extract(v, 0).unwrap();
        assert_eq!(w.arena.ty(fst), Some(star));
        let snd = w.extract(v, 1).unwrap();
        assert_eq!(w.arena.ty(snd), Some(fst));
    }

    #[test]
    fn variadic_of_arity_one_reduces_by_the_sole_index() {
        let w = World::new();
        let nat = nat_ty(&w);
        let one = w.arity(1, Qualifier::Unrestricted).unwrap();
        let idx0 = w.index(one, 0).unwrap();
        let direct = w.variadic(one, nat).unwrap();
        let expected = reduce::reduce(&w, nat, &[idx0], 0).unwrap();
        assert_eq!(direct, expected);
    }

    #[test]
    fn nested_variadic_matches_multi_arity_sugar() {
        let w = World::new();
        let star = w.star(Qualifier::Unrestricted);
        let a2 = w.arity(2, Qualifier::Unrestricted).unwrap();
        let a3 = w.arity(3, Qualifier::Unrestricted).unwrap();
        let nested = w.variadic(a2, w.variadic(a3, star).unwrap()).unwrap();
        let sugared = w.variadic_multi(&[a2, a3], star).unwrap();
        assert_eq!(nested, sugared);
    }

    #[test]
    fn match_sorts_handlers_regardless_of_call_order() {
        let w = World::new();
        let nat = nat_ty(&w);
        let bool_ty = w.bool_type();
        let variant = w.variant(vec![nat, bool_ty]).unwrap();
        let u = w.qualifier_const(Qualifier::Unrestricted);
        let nat_handler = w.lambda(nat, w.var(nat, 0).unwrap()).unwrap();
        let bool_handler = w.lambda(bool_ty, w.var(bool_ty, 0).unwrap()).unwrap();
        let scrutinee = w.axiom_var("s", variant).unwrap();

        let m1 = w.match_(scrutinee, vec![nat_handler, bool_handler]).unwrap();
        let m2 = w.match_(scrutinee, vec![bool_handler, nat_handler]).unwrap();
        assert_eq!(m1, m2);
        let _ = u;
    }

    #[test]
    fn match_on_any_reduces_to_the_applicable_handler() {
        let w = World::new();
        let nat = nat_ty(&w);
        let bool_ty = w.bool_type();
        let variant = w.variant(vec![nat, bool_ty]).unwrap();
        let nat_handler = w.lambda(nat, w.var(nat, 0).unwrap()).unwrap();
        let bool_handler = w.lambda(bool_ty, w.var(bool_ty, 0).unwrap()).unwrap();
        let twenty_three = w.lit(nat, 23).unwrap();
        let injected = w.any(variant, twenty_three).unwrap();
        let result = w.match_(injected, vec![nat_handler, bool_handler]).unwrap();
        assert_eq!(result, twenty_three);
    }

    #[test]
    fn pick_projects_a_component_of_an_intersection() {
        let w = World::new();
        let nat = nat_ty(&w);
        let bool_ty = w.bool_type();
        let n = w.lit(nat, 7).unwrap();
        let b = w.lit(bool_ty, 1).unwrap();
        let both = w.all(vec![n, b]).unwrap();
        assert_eq!(w.pick(both, 0).unwrap(), n);
        let _ = w.intersection(vec![nat, bool_ty]).unwrap();
    }

    #[test]
    fn qualifier_lub_and_glb_on_a_sigma_of_affine_and_relevant() {
        let w = World::new();
        let star_a = w.star(Qualifier::Affine);
        let star_r = w.star(Qualifier::Relevant);
        let u = w.qualifier_const(Qualifier::Unrestricted);
        let sigma = w.sigma(u, vec![star_a, star_r]).unwrap();
        assert_eq!(w.arena.tag(sigma), Tag::Sigma);
        assert_eq!(Qualifier::Affine.meet(Qualifier::Relevant), Qualifier::Linear);
    }
}
