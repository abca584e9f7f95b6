//! The node representation: [`DefId`] (a stable handle into a [`crate::world::World`]),
//! [`Tag`] (the closed set of node kinds) and [`Payload`] (the non-def data a tag
//! carries besides its `type` and `ops`, e.g. a De Bruijn index or a literal's bits).

use std::fmt;

use crate::axioms::NormalizerKind;
use crate::qualifier::Qualifier;

/// A stable handle to an interned or nominal node.
///
/// Doubles as the node's `gid`: assignment is monotonic in construction order and
/// `DefId` ordering is therefore the tie-breaker used for commutative-operand
/// canonicalization and `Match`/`Any` handler dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefId(pub(crate) u32);

impl DefId {
    pub fn gid(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// The closed set of node kinds. Carries no payload itself; non-def data specific to
/// a tag lives in [`Payload`], and def-valued operands live in `ops` on the node
/// record (see [`crate::arena::DefRecord`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// The single top sort; has no type of its own.
    Universe,
    /// `Star q`: the kind of `q`-qualified types. `ops = [q]`.
    Star,
    /// `ArityKind q`. `ops = [q]`.
    ArityKind,
    /// `MultiArityKind q`. `ops = [q]`.
    MultiArityKind,
    /// The kind of qualifiers.
    QualifierType,
    /// One of the four qualifier constants; carries the constant in [`Payload::Qualifier`].
    QualifierConst,
    /// A literal arity `n`; carries `n` in [`Payload::Nat`].
    Arity,
    /// A De Bruijn variable; carries the index in [`Payload::Index`].
    Var,
    /// `Pi(domain, codomain, q)`. `ops = [domain, codomain, q]`.
    Pi,
    /// `Lambda(domain, body)`. `ops = [domain, body]`.
    Lambda,
    /// `App(callee, arg)`. `ops = [callee, arg]`.
    App,
    /// `Sigma(q, components...)`. `ops = [q, c0, c1, ...]`.
    Sigma,
    /// `Tuple(elems...)`. `ops = [e0, e1, ...]`.
    Tuple,
    /// `Extract(tuple, i)`; carries `i` in [`Payload::Index`]. `ops = [tuple]`.
    Extract,
    /// `Insert(tuple, i, value)`; carries `i` in [`Payload::Index`]. `ops = [tuple, value]`.
    Insert,
    /// `Variadic(arity, body)`. `ops = [arity, body]`.
    Variadic,
    /// `Pack(arity, body)`. `ops = [arity, body]`.
    Pack,
    /// `Variant(components...)`. `ops = [c0, c1, ...]`.
    Variant,
    /// `Any(variant_type, value)`. `ops = [variant_type, value]`.
    Any,
    /// `Match(scrutinee, handlers...)`, handlers sorted by domain `gid`. `ops = [scrutinee, h0, h1, ...]`.
    Match,
    /// `Intersection(components...)`. `ops = [c0, c1, ...]`.
    Intersection,
    /// `All(components...)`, the intersection introduction form. `ops = [c0, c1, ...]`.
    All,
    /// `Pick(value, i)`, the intersection projection; carries `i` in [`Payload::Index`]. `ops = [value]`.
    Pick,
    /// `Singleton(v)`. `ops = [v]`.
    Singleton,
    /// Opaque or literal constant. Structural when [`Payload::Lit`] is present (a `Lit`),
    /// nominal when it carries a symbolic name instead.
    Axiom,
    /// A nominal continuation type; `ops = [return_type]`.
    Cn,
    /// The canonical poison value for some expected type. `ops = [expected_type]` (the type
    /// itself is also `expected_type`, restated as an op so hashing distinguishes errors
    /// of different expected types).
    Error,
}

impl Tag {
    pub fn name(self) -> &'static str {
        match self {
            Tag::Universe => "Universe",
            Tag::Star => "Star",
            Tag::ArityKind => "ArityKind",
            Tag::MultiArityKind => "MultiArityKind",
            Tag::QualifierType => "QualifierType",
            Tag::QualifierConst => "QualifierConst",
            Tag::Arity => "Arity",
            Tag::Var => "Var",
            Tag::Pi => "Pi",
            Tag::Lambda => "Lambda",
            Tag::App => "App",
            Tag::Sigma => "Sigma",
            Tag::Tuple => "Tuple",
            Tag::Extract => "Extract",
            Tag::Insert => "Insert",
            Tag::Variadic => "Variadic",
            Tag::Pack => "Pack",
            Tag::Variant => "Variant",
            Tag::Any => "Any",
            Tag::Match => "Match",
            Tag::Intersection => "Intersection",
            Tag::All => "All",
            Tag::Pick => "Pick",
            Tag::Singleton => "Singleton",
            Tag::Axiom => "Axiom",
            Tag::Cn => "Cn",
            Tag::Error => "Error",
        }
    }

    /// Tags that are always nominal regardless of how they're constructed.
    pub fn always_nominal(self) -> bool {
        matches!(self, Tag::Cn)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Non-def data a node carries alongside its `type` and `ops`. Part of the structural
/// hash-cons key for structural nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Payload {
    None,
    Qualifier(Qualifier),
    /// A compile-time natural number (arity value, or extract/insert/pick component index).
    Nat(u64),
    /// A De Bruijn index, kept distinct from `Nat` for clarity at call sites.
    Index(u32),
    /// The raw bits of a literal axiom.
    Lit(u64),
}

/// Optional, equality-irrelevant debugging metadata.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DebugInfo {
    pub name: Option<String>,
    pub location: Option<String>,
}

impl DebugInfo {
    pub fn named(name: impl Into<String>) -> Self {
        DebugInfo { name: Some(name.into()), location: None }
    }
}

/// Attaches to `Axiom` nodes; consulted by `app` when the callee is (transitively) an
/// axiom of this normalizer kind. See [`crate::axioms`] for the dispatch table.
pub type Normalizer = NormalizerKind;
