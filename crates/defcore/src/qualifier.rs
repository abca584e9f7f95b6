//! The substructural qualifier lattice: a 4-point diamond `L <= {A, R} <= U`.
//!
//! Qualifiers are also ordinary [`crate::def::Def`] values at runtime (instances of
//! `QualifierType`), so a type's qualifier can be a free variable rather than one of
//! these four constants. This module only implements the lattice operations on the
//! concrete constants; callers decide whether a qualifier position holds a constant or
//! a symbolic def (see [`crate::def::Tag::QualifierConst`]).

use std::fmt;

/// One of the four substructural qualifiers.
///
/// Ordered `Linear < Affine, Relevant < Unrestricted` with `Affine` and `Relevant`
/// mutually incomparable (the "diamond").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Qualifier {
    /// Used exactly once: affine and relevant.
    Linear,
    /// Used at most once.
    Affine,
    /// Used at least once.
    Relevant,
    /// No usage restriction.
    Unrestricted,
}

impl Qualifier {
    pub const ALL: [Qualifier; 4] = [
        Qualifier::Linear,
        Qualifier::Affine,
        Qualifier::Relevant,
        Qualifier::Unrestricted,
    ];

    /// Greatest lower bound: the most restrictive qualifier both inputs satisfy.
    pub fn meet(self, other: Qualifier) -> Qualifier {
        use Qualifier::*;
        match (self, other) {
            (Linear, _) | (_, Linear) => Linear,
            (Unrestricted, x) | (x, Unrestricted) => x,
            (Affine, Affine) => Affine,
            (Relevant, Relevant) => Relevant,
            (Affine, Relevant) | (Relevant, Affine) => Linear,
        }
    }

    /// Least upper bound: the least restrictive qualifier that covers both inputs.
    pub fn join(self, other: Qualifier) -> Qualifier {
        use Qualifier::*;
        match (self, other) {
            (Unrestricted, _) | (_, Unrestricted) => Unrestricted,
            (Linear, x) | (x, Linear) => x,
            (Affine, Affine) => Affine,
            (Relevant, Relevant) => Relevant,
            (Affine, Relevant) | (Relevant, Affine) => Unrestricted,
        }
    }

    /// True if values of this qualifier may be used at most once.
    pub fn is_affine(self) -> bool {
        matches!(self, Qualifier::Linear | Qualifier::Affine)
    }

    /// True if values of this qualifier must be used at least once.
    pub fn is_relevant(self) -> bool {
        matches!(self, Qualifier::Linear | Qualifier::Relevant)
    }
}

impl fmt::Display for Qualifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Qualifier::Linear => "L",
            Qualifier::Affine => "A",
            Qualifier::Relevant => "R",
            Qualifier::Unrestricted => "U",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Qualifier::*;

    #[test]
    fn meet_diamond_table() {
        assert_eq!(Affine.meet(Relevant), Linear);
        assert_eq!(Relevant.meet(Affine), Linear);
        assert_eq!(Linear.meet(Unrestricted), Linear);
        assert_eq!(Unrestricted.meet(Linear), Linear);
        assert_eq!(Affine.meet(Affine), Affine);
        assert_eq!(Unrestricted.meet(Unrestricted), Unrestricted);
    }

    #[test]
    fn join_diamond_table() {
        assert_eq!(Affine.join(Relevant), Unrestricted);
        assert_eq!(Relevant.join(Affine), Unrestricted);
        assert_eq!(Linear.join(Affine), Affine);
        assert_eq!(Linear.join(Unrestricted), Unrestricted);
        assert_eq!(Unrestricted.join(Linear), Unrestricted);
    }

    #[test]
    fn meet_join_are_commutative_and_idempotent() {
        for a in Qualifier::ALL {
            for b in Qualifier::ALL {
                assert_eq!(a.meet(b), b.meet(a));
                assert_eq!(a.join(b), b.join(a));
            }
            assert_eq!(a.meet(a), a);
            assert_eq!(a.join(a), a);
        }
    }

    #[test]
    fn affine_relevant_flags() {
        assert!(Linear.is_affine() && Linear.is_relevant());
        assert!(Affine.is_affine() && !Affine.is_relevant());
        assert!(Relevant.is_relevant() && !Relevant.is_affine());
        assert!(!Unrestricted.is_affine() && !Unrestricted.is_relevant());
    }
}
