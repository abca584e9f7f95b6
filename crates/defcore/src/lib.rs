//! The term-construction and normalization core of a dependently-typed intermediate
//! representation: a single hash-consed def graph encoding a lambda calculus
//! extended with dependent Pi/Sigma, a variadic family indexed by arity, sum and
//! intersection types, a substructural qualifier lattice, and axioms with optional
//! normalizers for primop folding.
//!
//! [`world::World`] is the entry point: it owns the arena and the eagerly-built
//! sentinel defs (universe, stars, qualifier constants, unit, bool, integer types)
//! that every constructor call in [`builder`] refers to by handle. Clients build
//! terms exclusively through `World`'s inherent methods; [`reduce`] and [`axioms`]
//! are invoked internally by those constructors and are not meant to be called
//! directly except by tests.

pub mod arena;
pub mod axioms;
pub mod builder;
pub mod def;
pub mod error;
pub mod fingerprint;
pub mod freevars;
pub mod qualifier;
pub mod reduce;
pub mod world;

pub use def::{DebugInfo, DefId, Payload, Tag};
pub use error::{DefError, DefResult};
pub use fingerprint::{fingerprint, Fingerprint};
pub use freevars::FreeVarSet;
pub use qualifier::Qualifier;
pub use world::World;
