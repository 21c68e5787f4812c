//! Internal representation of types, regions, constraints and type classes.
//!
//! The type graph is mutable and shared: unification solves variables in
//! place, generalisation rewrites children of function and reference nodes,
//! and region conversion sinks solved regions into their handles. Every
//! node therefore lives behind `Rc<RefCell<…>>` and identity (not
//! structure) is what the engine compares with `Rc::ptr_eq`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::env::{Scope, TypeEnv, TypeMap};
use crate::error::TypeError;
use crate::unify::unify_with_ref;

/// Shared handle to a type node.
pub type TypeRef = Rc<RefCell<Type>>;

/// Shared handle to a region node.
pub type RegionRef = Rc<RefCell<Region>>;

/// Shared handle to a context-carrying type entry.
pub type TypeInfoRef = Rc<RefCell<TypeInfo>>;

/// Shared handle to a type class. Classes are immutable once built, so a
/// plain `Rc` suffices; two classes are the same class exactly when the
/// handles are the same allocation.
pub type RefTypeClass = Rc<TypeClass>;

/// A type.
#[derive(Debug)]
pub enum Type {
    /// A nominal primitive. Two `Base` nodes are equal only by identity.
    Base { name: String },

    /// A function type. `base` points at the ground `fn` nominal so a
    /// function can still answer "what is your type name" for table
    /// lookups.
    Function {
        base: TypeRef,
        param: TypeRef,
        ret: TypeRef,
    },

    /// A unifiable metavariable. `depth` is the scope depth it was born
    /// at; unification always points the deeper variable at the shallower
    /// one.
    Var {
        constraints: Constraints,
        solve: Option<TypeRef>,
        depth: usize,
    },

    /// A scheme-bound position. Immutable after creation; `index` is the
    /// position inside the owning scheme's `vals`.
    Param { constraints: Constraints, index: usize },

    /// The existential "type class" type: some value implementing
    /// `classes`, held by reference to storage in `region`.
    Class {
        classes: Constraints,
        region: RegionRef,
    },

    /// A reference to `pointee` whose referent lives in `region`. `base`
    /// points at the ground `ref` nominal.
    Ref {
        base: TypeRef,
        pointee: TypeRef,
        region: RegionRef,
    },
}

/// A region: where a reference's referent lives.
///
/// Regions form a lattice with `Temporary` at the bottom, scope regions
/// ordered by nesting, and unsolved variables acting as top.
#[derive(Debug)]
pub enum Region {
    /// The region of identifier bindings in one scope. The scope is held
    /// weakly; environments are stack-scoped and outlive every region
    /// comparison made during the traversal that created them.
    Base { scope: Weak<Scope> },

    /// The region of temporaries; bottom of the lattice.
    Temporary,

    /// A unifiable region variable.
    Var { solve: Option<RegionRef>, depth: usize },

    /// A scheme-bound region position.
    Param { index: usize },
}

/// A universally quantified type: the body plus the positional `Param`
/// nodes it closes over. `Param { index: i }` inside `ty` denotes
/// `vals[i]` (or `region_vals[i]` for regions) by node identity.
#[derive(Debug, Clone)]
pub struct Scheme {
    pub vals: Vec<TypeRef>,
    pub region_vals: Vec<RegionRef>,
    pub ty: TypeRef,
}

/// What a name (or a class method) is bound to: a plain monotype or a
/// scheme that must be instantiated at every use.
#[derive(Debug, Clone)]
pub enum Binding {
    Mono(TypeRef),
    Poly(Scheme),
}

impl From<TypeRef> for Binding {
    fn from(ty: TypeRef) -> Self {
        Binding::Mono(ty)
    }
}

impl From<Scheme> for Binding {
    fn from(scheme: Scheme) -> Self {
        Binding::Poly(scheme)
    }
}

/// A binding together with the region its value lives in.
#[derive(Debug)]
pub struct TypeInfo {
    pub binding: Binding,
    pub region: RegionRef,
}

/// Extract the monotype handle out of an info entry. Schemes never reach
/// the places that call this; identifiers instantiate them first.
pub fn mono_handle(info: &TypeInfoRef) -> TypeRef {
    match &info.borrow().binding {
        Binding::Mono(ty) => ty.clone(),
        Binding::Poly(_) => unreachable!("schemes are instantiated before unification"),
    }
}

/// Resolve a solved variable chain, writing the final representative back
/// into every intermediate variable so later lookups are O(1). Idempotent
/// and allocation-free.
pub fn solved(ty: &TypeRef) -> TypeRef {
    let next = match &*ty.borrow() {
        Type::Var { solve: Some(inner), .. } => inner.clone(),
        _ => return ty.clone(),
    };
    let repr = solved(&next);
    if let Type::Var { solve, .. } = &mut *ty.borrow_mut() {
        *solve = Some(repr.clone());
    }
    repr
}

/// Region counterpart of [`solved`].
pub fn solved_region(region: &RegionRef) -> RegionRef {
    let next = match &*region.borrow() {
        Region::Var { solve: Some(inner), .. } => inner.clone(),
        _ => return region.clone(),
    };
    let repr = solved_region(&next);
    if let Region::Var { solve, .. } = &mut *region.borrow_mut() {
        *solve = Some(repr.clone());
    }
    repr
}

/// Resolve, then strip any chain of reference types, compressing the
/// pointee handles along the way. Yields the value shape constraints are
/// applied to.
pub fn unwrap_ref(ty: &TypeRef) -> TypeRef {
    let mut t = solved(ty);
    loop {
        let pointee = match &*t.borrow() {
            Type::Ref { pointee, .. } => Some(pointee.clone()),
            _ => None,
        };
        let Some(pointee) = pointee else {
            return t;
        };
        let pointee = solved(&pointee);
        if let Type::Ref { pointee: slot, .. } = &mut *t.borrow_mut() {
            *slot = pointee.clone();
        }
        t = pointee;
    }
}

/// Occurs check: does `target` appear anywhere inside `ty`? The walk
/// descends both sides of functions, the pointee of references, and the
/// resolution of solved variables; it stops at base types, parameters,
/// class types and unsolved variables.
pub fn depend(ty: &TypeRef, target: &TypeRef) -> bool {
    if Rc::ptr_eq(ty, target) {
        return true;
    }
    match &*ty.borrow() {
        Type::Function { param, ret, .. } => depend(param, target) || depend(ret, target),
        Type::Var { solve: Some(inner), .. } => depend(inner, target),
        Type::Ref { pointee, .. } => depend(pointee, target),
        _ => false,
    }
}

/// The nominal name of a type, when it has one at top level.
pub fn type_name(ty: &TypeRef) -> Option<String> {
    match &*ty.borrow() {
        Type::Base { name } => Some(name.clone()),
        Type::Function { base, .. } | Type::Ref { base, .. } => type_name(base),
        _ => None,
    }
}

/// An insertion-ordered set of type classes, contracted under the subclass
/// order so that no element is a superclass of another. Membership is by
/// class identity.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub list: Vec<RefTypeClass>,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_classes(list: Vec<RefTypeClass>) -> Self {
        let mut constraints = Self::new();
        constraints.merge(&list);
        constraints
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Merge classes into the set, contracting along the inheritance
    /// lattice: an incoming class already covered by a member is dropped,
    /// an incoming class stronger than members replaces them, and an
    /// incomparable class is appended.
    pub fn merge(&mut self, incoming: &[RefTypeClass]) {
        for class in incoming {
            if self.list.iter().any(|existing| existing.derived(class)) {
                continue;
            }
            match self.list.iter().position(|existing| class.derived(existing)) {
                Some(index) => {
                    self.list[index] = Rc::clone(class);
                    let mut i = index + 1;
                    while i < self.list.len() {
                        if class.derived(&self.list[i]) {
                            self.list.remove(i);
                        } else {
                            i += 1;
                        }
                    }
                }
                None => self.list.push(Rc::clone(class)),
            }
        }
    }

    /// Is `class` (or a subclass of it) a member?
    pub fn has(&self, class: &TypeClass) -> bool {
        self.list.iter().any(|member| member.derived(class))
    }

    /// Find the class that provides method `name`, preferring derived
    /// definitions over base ones. Two incomparable member classes that
    /// both define the method directly make the lookup ambiguous.
    pub fn get_class_method(&self, name: &str) -> Result<Option<RefTypeClass>, TypeError> {
        for (i, candidate) in self.list.iter().enumerate() {
            let found = if candidate.methods.contains_key(name) {
                Some(Rc::clone(candidate))
            } else {
                candidate.bases.get_class_method(name)?
            };
            let Some(found) = found else { continue };

            for later in &self.list[i + 1..] {
                if Rc::ptr_eq(later, &found) {
                    continue;
                }
                // a base of the found class never shadows it
                if !found.derived(later) && later.methods.contains_key(name) {
                    if later.derived(&found) {
                        return Ok(Some(Rc::clone(later)));
                    }
                    return Err(TypeError::AmbiguousClassMethod(name.to_string()));
                }
            }
            return Ok(Some(found));
        }
        Ok(None)
    }
}

/// A type class: a name, the classes it inherits from, the `Param` node
/// standing for the implementing type, and the method signatures. The
/// self parameter is a fresh unconstrained `Param` unique to the class and
/// appears as the first formal of every method.
#[derive(Debug)]
pub struct TypeClass {
    pub name: String,
    pub bases: Constraints,
    pub self_param: TypeRef,
    pub methods: HashMap<String, Binding>,
}

impl TypeClass {
    /// Is `self` the same class as `other`, or derived from it through any
    /// chain of bases?
    pub fn derived(&self, other: &TypeClass) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.bases.list.iter().any(|base| base.derived(other))
    }

    /// Materialise method `name` for a concrete receiver: instantiate the
    /// method scheme if it is one, instantiate the class's self parameter
    /// into a fresh variable, then unify the first formal against the
    /// receiver (reference-aware, so a receiver held by reference can call
    /// a value-typed method). Returns the self-applied function type.
    pub fn instantiated_method(
        &self,
        type_map: &TypeMap,
        env: &TypeEnv,
        name: &str,
        receiver: &TypeInfoRef,
    ) -> Result<TypeRef, TypeError> {
        let Some(method) = self.methods.get(name) else {
            unreachable!("class method `{name}` was resolved but is missing from its class");
        };
        let body = match method {
            Binding::Poly(scheme) => env.instantiate(type_map, scheme, Vec::new())?,
            Binding::Mono(ty) => ty.clone(),
        };
        let scheme = Scheme {
            vals: vec![self.self_param.clone()],
            region_vals: Vec::new(),
            ty: body,
        };
        let method_ty = env.instantiate(type_map, &scheme, Vec::new())?;

        let (mut first, ret) = match &*method_ty.borrow() {
            Type::Function { param, ret, .. } => (param.clone(), ret.clone()),
            _ => unreachable!("class methods take the receiver as their first parameter"),
        };
        unify_with_ref(type_map, &mut first, receiver)?;
        if let Type::Function { param, .. } = &mut *method_ty.borrow_mut() {
            *param = first;
        }
        Ok(ret)
    }
}
