//! Bump-allocated storage for [`crate::def::Tag`] nodes plus the structural hash-cons
//! set that guarantees at most one node per `(tag, type, ops, payload)` tuple.
//!
//! Unlike a classic bump allocator that allocates speculatively and rolls back the
//! allocation pointer on a hash-cons hit, this interner computes the structural key
//! *before* allocating storage: a hit never allocates at all, so there is nothing to
//! roll back and no wasted `gid`. Storage still grows monotonically in fixed-capacity
//! pages that are never relocated once allocated, mirroring the page-chain contract
//! this component is specified against; see DESIGN.md for why a lookup-then-allocate
//! shape was chosen over pointer-rollback.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use crate::axioms::NormalizerKind;
use crate::def::{DebugInfo, DefId, Payload, Tag};
use crate::error::{DefError, DefResult};
use crate::freevars::FreeVarSet;

/// A page holds a fixed number of records; once full, a new page is started. Indices
/// into the arena are stable forever because pages are never moved or resized.
const PAGE_CAPACITY: usize = 4096;

pub(crate) struct DefRecord {
    pub gid: DefId,
    pub tag: Tag,
    pub ty: Option<DefId>,
    pub ops: RefCell<Vec<Option<DefId>>>,
    pub payload: Payload,
    pub free_vars: RefCell<FreeVarSet>,
    pub is_nominal: bool,
    pub sealed: Cell<bool>,
    pub debug: RefCell<Option<DebugInfo>>,
    pub normalizer: Option<NormalizerKind>,
    pub app_cache: RefCell<Option<DefId>>,
    pub uses: RefCell<Vec<DefId>>,
}

#[derive(PartialEq, Eq, Hash)]
struct StructuralKey {
    tag: Tag,
    ty: Option<DefId>,
    ops: Vec<DefId>,
    payload: Payload,
}

pub(crate) struct Arena {
    pages: RefCell<Vec<Vec<DefRecord>>>,
    intern: RefCell<HashMap<StructuralKey, DefId>>,
    alloc_guard: Cell<bool>,
}

impl Arena {
    pub fn new() -> Self {
        Arena {
            pages: RefCell::new(vec![Vec::with_capacity(PAGE_CAPACITY)]),
            intern: RefCell::new(HashMap::new()),
            alloc_guard: Cell::new(false),
        }
    }

    fn next_gid(&self) -> u32 {
        let pages = self.pages.borrow();
        let full_pages = pages.len().saturating_sub(1);
        (full_pages * PAGE_CAPACITY + pages.last().map_or(0, Vec::len)) as u32
    }

    fn guarded<R>(&self, f: impl FnOnce() -> R) -> DefResult<R> {
        if self.alloc_guard.get() {
            return Err(DefError::ReentrantAllocation);
        }
        self.alloc_guard.set(true);
        let result = f();
        self.alloc_guard.set(false);
        Ok(result)
    }

    fn push(&self, record: DefRecord) -> DefId {
        let id = record.gid;
        let mut pages = self.pages.borrow_mut();
        if pages.last().map_or(true, |p| p.len() >= PAGE_CAPACITY) {
            pages.push(Vec::with_capacity(PAGE_CAPACITY));
        }
        pages.last_mut().unwrap().push(record);
        id
    }

    /// Runs `f` with a short-lived shared reference to the record for `id`. Never
    /// holds the borrow past the call, so it composes safely with nested arena calls
    /// that touch a record's own interior-mutable fields (`ops`, `uses`, ...), which
    /// live behind their own `RefCell`/`Cell` and don't conflict with this one.
    fn with_record<R>(&self, id: DefId, f: impl FnOnce(&DefRecord) -> R) -> R {
        let pages = self.pages.borrow();
        let gid = id.0 as usize;
        let page = gid / PAGE_CAPACITY;
        let offset = gid % PAGE_CAPACITY;
        f(&pages[page][offset])
    }

    fn wire_uses(&self, user: DefId, ops: &[DefId], ty: Option<DefId>) {
        if let Some(t) = ty {
            self.with_record(t, |r| r.uses.borrow_mut().push(user));
        }
        for op in ops {
            self.with_record(*op, |r| r.uses.borrow_mut().push(user));
        }
    }

    /// Returns the existing node if one with the same structural key already exists;
    /// otherwise allocates, wires uses, and registers the new key.
    pub fn intern_structural(
        &self,
        tag: Tag,
        ty: Option<DefId>,
        ops: Vec<DefId>,
        payload: Payload,
        free_vars: FreeVarSet,
        normalizer: Option<NormalizerKind>,
    ) -> DefResult<DefId> {
        let key = StructuralKey { tag, ty, ops: ops.clone(), payload };
        if let Some(existing) = self.intern.borrow().get(&key) {
            return Ok(*existing);
        }
        self.guarded(|| {
            let gid = DefId(self.next_gid());
            self.wire_uses(gid, &ops, ty);
            let record = DefRecord {
                gid,
                tag,
                ty,
                ops: RefCell::new(ops.into_iter().map(Some).collect()),
                payload,
                free_vars: RefCell::new(free_vars),
                is_nominal: false,
                sealed: Cell::new(true),
                debug: RefCell::new(None),
                normalizer,
                app_cache: RefCell::new(None),
                uses: RefCell::new(Vec::new()),
            };
            self.push(record);
            self.intern.borrow_mut().insert(key, gid);
            gid
        })
    }

    /// Allocates an empty nominal stub with `num_ops` reserved, unset slots. Bypasses
    /// the intern set entirely: every call is a fresh node, identified by its own `gid`.
    pub fn alloc_nominal(
        &self,
        tag: Tag,
        ty: Option<DefId>,
        num_ops: usize,
        payload: Payload,
        debug: Option<DebugInfo>,
        normalizer: Option<NormalizerKind>,
    ) -> DefResult<DefId> {
        self.guarded(|| {
            let gid = DefId(self.next_gid());
            if let Some(t) = ty {
                self.with_record(t, |r| r.uses.borrow_mut().push(gid));
            }
            let record = DefRecord {
                gid,
                tag,
                ty,
                ops: RefCell::new(vec![None; num_ops]),
                payload,
                free_vars: RefCell::new(FreeVarSet::new()),
                is_nominal: true,
                sealed: Cell::new(num_ops == 0),
                debug: RefCell::new(debug),
                normalizer,
                app_cache: RefCell::new(None),
                uses: RefCell::new(Vec::new()),
            };
            self.push(record);
            gid
        })
    }

    pub fn set_op(&self, id: DefId, index: usize, value: DefId) -> DefResult<()> {
        let is_nominal = self.with_record(id, |r| r.is_nominal);
        if !is_nominal {
            return Err(DefError::NotNominal(id));
        }
        self.with_record(id, |r| {
            let mut ops = r.ops.borrow_mut();
            if index >= ops.len() {
                return Err(DefError::SlotOutOfRange { def: id, index, len: ops.len() });
            }
            if ops[index].is_some() {
                return Err(DefError::SlotAlreadySet { def: id, index });
            }
            ops[index] = Some(value);
            Ok(())
        })?;
        self.with_record(value, |r| r.uses.borrow_mut().push(id));
        Ok(())
    }

    /// Seals a nominal node once every slot is set, recording its (already computed
    /// by the caller, since only the caller knows each tag's binder-shift rules)
    /// free-variable set.
    pub fn seal(&self, id: DefId, free_vars: FreeVarSet) -> DefResult<()> {
        self.with_record(id, |r| {
            let ops = r.ops.borrow();
            let set_count = ops.iter().filter(|o| o.is_some()).count();
            if set_count != ops.len() {
                return Err(DefError::IncompleteSeal { def: id, set: set_count, expected: ops.len() });
            }
            drop(ops);
            *r.free_vars.borrow_mut() = free_vars;
            r.sealed.set(true);
            Ok(())
        })
    }

    pub fn tag(&self, id: DefId) -> Tag {
        self.with_record(id, |r| r.tag)
    }

    pub fn ty(&self, id: DefId) -> Option<DefId> {
        self.with_record(id, |r| r.ty)
    }

    /// The node's operands. Panics if called on an unsealed nominal node; callers on
    /// the nominal-construction path must not inspect `ops` until after `seal`.
    pub fn ops(&self, id: DefId) -> Vec<DefId> {
        self.with_record(id, |r| {
            r.ops
                .borrow()
                .iter()
                .map(|o| o.expect("ops() called on an unsealed nominal def"))
                .collect()
        })
    }

    /// The node's operand slots, with `None` for not-yet-set nominal slots.
    pub fn raw_ops(&self, id: DefId) -> Vec<Option<DefId>> {
        self.with_record(id, |r| r.ops.borrow().clone())
    }

    pub fn payload(&self, id: DefId) -> Payload {
        self.with_record(id, |r| r.payload)
    }

    pub fn free_vars(&self, id: DefId) -> FreeVarSet {
        self.with_record(id, |r| r.free_vars.borrow().clone())
    }

    pub fn is_nominal(&self, id: DefId) -> bool {
        self.with_record(id, |r| r.is_nominal)
    }

    pub fn is_sealed(&self, id: DefId) -> bool {
        self.with_record(id, |r| r.sealed.get())
    }

    pub fn debug(&self, id: DefId) -> Option<DebugInfo> {
        self.with_record(id, |r| r.debug.borrow().clone())
    }

    pub fn set_debug(&self, id: DefId, info: DebugInfo) {
        self.with_record(id, |r| *r.debug.borrow_mut() = Some(info));
    }

    pub fn normalizer(&self, id: DefId) -> Option<NormalizerKind> {
        self.with_record(id, |r| r.normalizer)
    }

    pub fn uses(&self, id: DefId) -> Vec<DefId> {
        self.with_record(id, |r| r.uses.borrow().clone())
    }

    pub fn app_cache(&self, id: DefId) -> Option<DefId> {
        self.with_record(id, |r| *r.app_cache.borrow())
    }

    pub fn set_app_cache(&self, id: DefId, result: DefId) {
        self.with_record(id, |r| *r.app_cache.borrow_mut() = Some(result));
    }

    pub fn len(&self) -> usize {
        self.next_gid() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn universe() -> (Arena, DefId) {
        let arena = Arena::new();
        let universe = arena
            .intern_structural(Tag::Universe, None, vec![], Payload::None, FreeVarSet::new(), None)
            .unwrap();
        (arena, universe)
    }

    #[test]
    fn structural_interning_deduplicates() {
        let (arena, universe) = universe();
        let a = arena
            .intern_structural(Tag::Arity, Some(universe), vec![], Payload::Nat(3), FreeVarSet::new(), None)
            .unwrap();
        let b = arena
            .intern_structural(Tag::Arity, Some(universe), vec![], Payload::Nat(3), FreeVarSet::new(), None)
            .unwrap();
        assert_eq!(a, b);
        let c = arena
            .intern_structural(Tag::Arity, Some(universe), vec![], Payload::Nat(4), FreeVarSet::new(), None)
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn nominal_allocations_never_merge() {
        let (arena, universe) = universe();
        let a = arena.alloc_nominal(Tag::Cn, Some(universe), 1, Payload::None, None, None).unwrap();
        let b = arena.alloc_nominal(Tag::Cn, Some(universe), 1, Payload::None, None, None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn nominal_seal_lifecycle() {
        let (arena, universe) = universe();
        let stub = arena.alloc_nominal(Tag::Cn, Some(universe), 1, Payload::None, None, None).unwrap();
        assert!(matches!(arena.seal(stub, FreeVarSet::new()), Err(DefError::IncompleteSeal { .. })));
        arena.set_op(stub, 0, universe).unwrap();
        assert!(matches!(arena.set_op(stub, 0, universe), Err(DefError::SlotAlreadySet { .. })));
        arena.seal(stub, FreeVarSet::new()).unwrap();
        assert!(arena.is_sealed(stub));
    }

    #[test]
    fn set_op_out_of_range() {
        let (arena, universe) = universe();
        let stub = arena.alloc_nominal(Tag::Cn, Some(universe), 1, Payload::None, None, None).unwrap();
        assert!(matches!(
            arena.set_op(stub, 5, universe),
            Err(DefError::SlotOutOfRange { .. })
        ));
    }

    #[test]
    fn uses_are_wired_on_intern_and_on_set() {
        let (arena, universe) = universe();
        let arity = arena
            .intern_structural(Tag::Arity, Some(universe), vec![], Payload::Nat(1), FreeVarSet::new(), None)
            .unwrap();
        assert!(arena.uses(universe).contains(&arity));

        let stub = arena.alloc_nominal(Tag::Cn, Some(universe), 1, Payload::None, None, None).unwrap();
        arena.set_op(stub, 0, arity).unwrap();
        assert!(arena.uses(arity).contains(&stub));
    }

    #[test]
    fn pages_roll_over_past_capacity() {
        let (arena, universe) = universe();
        for i in 0..(PAGE_CAPACITY + 10) {
            arena
                .intern_structural(Tag::Arity, Some(universe), vec![], Payload::Nat(i as u64), FreeVarSet::new(), None)
                .unwrap();
        }
        assert_eq!(arena.pages.borrow().len(), 2);
    }
}
