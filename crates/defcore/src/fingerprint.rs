//! A deterministic content digest over a Def's structural shape, independent of its
//! `gid`. Not consulted by the intern path (structural equality there is by `DefId`,
//! per the arena's own hash-cons key) — this exists purely for diagnostics, export,
//! and snapshot-style test assertions where two different `World`s should agree on
//! whether they built "the same" term.
//!
//! Grounded on the same technique `torc-core::hash` uses for its `ContentHash`: hash
//! a `serde`-serializable view with SHA-256. The view here walks the Def's actual
//! operands recursively (rather than hashing `gid`s), so equal structure fingerprints
//! equal regardless of construction order or which `World` built it.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::def::{DefId, Payload};
use crate::world::World;

/// A 32-byte SHA-256 content fingerprint.
pub type Fingerprint = [u8; 32];

#[derive(Serialize)]
struct View {
    tag: &'static str,
    ty: Option<Fingerprint>,
    ops: Vec<Fingerprint>,
    payload: PayloadView,
}

#[derive(Serialize)]
enum PayloadView {
    None,
    Qualifier(&'static str),
    Nat(u64),
    Index(u32),
    Lit(u64),
}

fn payload_view(p: Payload) -> PayloadView {
    match p {
        Payload::None => PayloadView::None,
        Payload::Qualifier(q) => PayloadView::Qualifier(match q {
            crate::qualifier::Qualifier::Linear => "L",
            crate::qualifier::Qualifier::Affine => "A",
            crate::qualifier::Qualifier::Relevant => "R",
            crate::qualifier::Qualifier::Unrestricted => "U",
        }),
        Payload::Nat(n) => PayloadView::Nat(n),
        Payload::Index(i) => PayloadView::Index(i),
        Payload::Lit(bits) => PayloadView::Lit(bits),
    }
}

fn digest(view: &View) -> Fingerprint {
    let json = serde_json::to_vec(view).expect("fingerprint view serialization cannot fail");
    let mut hasher = Sha256::new();
    hasher.update(&json);
    hasher.finalize().into()
}

/// The fingerprint of `d` as a stable content digest of its shape.
///
/// Nominal (potentially cyclic) operands are resolved through a visited-set guard:
/// re-entering a node already on the current recursion stack folds in its `gid`
/// rather than recursing further, since the cyclic portion can't be fully flattened
/// into a finite structural view. This makes the fingerprint of a genuinely
/// self-referential def depend on its `gid` (not stable across `World`s for that
/// part), which is an accepted limitation for a diagnostics-only tool.
pub fn fingerprint(world: &World, d: DefId) -> Fingerprint {
    let mut memo = HashMap::new();
    let mut on_stack = HashSet::new();
    go(world, d, &mut memo, &mut on_stack)
}

fn go(world: &World, d: DefId, memo: &mut HashMap<DefId, Fingerprint>, on_stack: &mut HashSet<DefId>) -> Fingerprint {
    if let Some(f) = memo.get(&d) {
        return *f;
    }
    if on_stack.contains(&d) {
        let mut hasher = Sha256::new();
        hasher.update(b"cycle:");
        hasher.update(d.gid().to_le_bytes());
        return hasher.finalize().into();
    }
    on_stack.insert(d);

    let ty = world.arena.ty(d).map(|t| go(world, t, memo, on_stack));
    let ops = if world.arena.is_sealed(d) {
        world.arena.ops(d).iter().map(|op| go(world, *op, memo, on_stack)).collect()
    } else {
        Vec::new()
    };
    let view = View { tag: world.arena.tag(d).name(), ty, ops, payload: payload_view(world.arena.payload(d)) };
    let f = digest(&view);

    on_stack.remove(&d);
    memo.insert(d, f);
    f
}

/// Hex-encode a fingerprint for logging/assertion messages.
pub fn fingerprint_hex(f: &Fingerprint) -> String {
    f.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qualifier::Qualifier;

    #[test]
    fn equal_terms_fingerprint_equal_across_worlds() {
        let w1 = World::new();
        let w2 = World::new();
        let s1 = w1.star(Qualifier::Unrestricted);
        let s2 = w2.star(Qualifier::Unrestricted);
        assert_eq!(fingerprint(&w1, s1), fingerprint(&w2, s2));
    }

    #[test]
    fn different_terms_fingerprint_different() {
        let w = World::new();
        let a = w.star(Qualifier::Affine);
        let u = w.star(Qualifier::Unrestricted);
        assert_ne!(fingerprint(&w, a), fingerprint(&w, u));
    }

    #[test]
    fn fingerprint_hex_is_64_chars() {
        let w = World::new();
        let u = w.universe();
        let hex = fingerprint_hex(&fingerprint(&w, u));
        assert_eq!(hex.len(), 64);
    }
}
