//! Skarn - a Damas-Milner type inference core with type classes and
//! region-checked references.
//!
//! The engine infers types for a small polymorphic expression language,
//! either bottom-up ([`Expr::infer`], Algorithm J) or against a top-down
//! expectation ([`Expr::check`], Algorithm M). On top of classic
//! let-polymorphism it supports type classes with inheritance (including
//! implicit conversion to an existential class type) and a region system
//! that statically rejects references escaping the scope of their
//! referent.

pub mod ast;
pub mod env;
pub mod error;
pub mod infer;
pub mod pretty;
pub mod types;
pub mod unify;

pub use ast::{BinaryOp, Expr};
pub use env::{TypeData, TypeEnv, TypeMap};
pub use error::TypeError;
pub use pretty::render;
pub use types::{
    depend, mono_handle, solved, solved_region, type_name, unwrap_ref, Binding, Constraints,
    RefTypeClass, Region, RegionRef, Scheme, Type, TypeClass, TypeInfo, TypeInfoRef, TypeRef,
};
pub use unify::{convert, unify_function, unify_type, unify_with_ref, ImplicitCast};
