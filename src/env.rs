//! Type environments and the process-wide type table.
//!
//! An environment is one lexical scope: a map from identifiers to their
//! [`TypeInfo`] plus a pointer to the enclosing scope. Environments also
//! act as the allocation site for fresh types, regions and infos, and host
//! the scheme transforms (`generalize`, `instantiate`) whose free-variable
//! test depends on the scope depth.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::TypeError;
use crate::types::{
    solved, solved_region, type_name, unwrap_ref, Binding, Constraints, RefTypeClass, Region,
    RegionRef, Scheme, Type, TypeInfo, TypeInfoRef, TypeRef,
};

/// One lexical scope. Shared so that regions can point back at the scope
/// that owns their bindings.
#[derive(Debug)]
pub struct Scope {
    pub(crate) parent: Option<TypeEnv>,
    pub(crate) depth: usize,
    bindings: RefCell<HashMap<String, TypeInfoRef>>,
}

/// A lexically nested type environment. Cloning is cheap and yields a
/// handle to the same scope.
#[derive(Debug, Clone)]
pub struct TypeEnv {
    pub(crate) scope: Rc<Scope>,
}

impl Default for TypeEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeEnv {
    /// The root scope. Depth starts at 1 and grows inward.
    pub fn new() -> Self {
        TypeEnv {
            scope: Rc::new(Scope {
                parent: None,
                depth: 1,
                bindings: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Open a scope one level deeper.
    pub fn child(&self) -> Self {
        TypeEnv {
            scope: Rc::new(Scope {
                parent: Some(self.clone()),
                depth: self.scope.depth + 1,
                bindings: RefCell::new(HashMap::new()),
            }),
        }
    }

    pub fn depth(&self) -> usize {
        self.scope.depth
    }

    /// Look a name up here or in any enclosing scope.
    pub fn lookup(&self, name: &str) -> Option<TypeInfoRef> {
        if let Some(info) = self.scope.bindings.borrow().get(name) {
            return Some(info.clone());
        }
        self.scope.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    /// Bind a name in this scope, shadowing any outer binding.
    pub fn insert(&self, name: impl Into<String>, info: TypeInfoRef) {
        self.scope.bindings.borrow_mut().insert(name.into(), info);
    }

    /// Is the name bound in this scope itself (not an ancestor)?
    pub fn defined_here(&self, name: &str) -> bool {
        self.scope.bindings.borrow().contains_key(name)
    }

    // ── node factories ──────────────────────────────────────────────

    pub fn new_type(&self, ty: Type) -> TypeRef {
        Rc::new(RefCell::new(ty))
    }

    pub fn new_region(&self, region: Region) -> RegionRef {
        Rc::new(RefCell::new(region))
    }

    pub fn new_info(&self, binding: impl Into<Binding>, region: RegionRef) -> TypeInfoRef {
        Rc::new(RefCell::new(TypeInfo {
            binding: binding.into(),
            region,
        }))
    }

    /// A fresh unconstrained variable born at this scope's depth.
    pub fn fresh_var(&self) -> TypeRef {
        self.new_type(Type::Var {
            constraints: Constraints::new(),
            solve: None,
            depth: self.depth(),
        })
    }

    /// A fresh variable one level deeper than this scope, so that a
    /// following `generalize` at this depth treats it as free. Used when
    /// assembling polymorphic signatures by hand.
    pub fn generic_var(&self) -> TypeRef {
        self.new_type(Type::Var {
            constraints: Constraints::new(),
            solve: None,
            depth: self.depth() + 1,
        })
    }

    /// A fresh region variable at this scope's depth.
    pub fn fresh_region(&self) -> RegionRef {
        self.new_region(Region::Var {
            solve: None,
            depth: self.depth(),
        })
    }

    /// A fresh region variable one level deeper than this scope, so that
    /// a following `generalize` at this depth closes over it.
    pub fn generic_region(&self) -> RegionRef {
        self.new_region(Region::Var {
            solve: None,
            depth: self.depth() + 1,
        })
    }

    /// The region of temporaries.
    pub fn temporary(&self) -> RegionRef {
        self.new_region(Region::Temporary)
    }

    /// The region of this scope's own bindings.
    pub fn base_region(&self) -> RegionRef {
        self.new_region(Region::Base {
            scope: Rc::downgrade(&self.scope),
        })
    }

    /// A named nominal type.
    pub fn base(&self, name: impl Into<String>) -> TypeRef {
        self.new_type(Type::Base { name: name.into() })
    }

    /// A scheme parameter with the given position.
    pub fn param(&self, index: usize) -> TypeRef {
        self.new_type(Type::Param {
            constraints: Constraints::new(),
            index,
        })
    }

    /// A scheme parameter carrying declared constraints.
    pub fn param_with(&self, index: usize, classes: Vec<RefTypeClass>) -> TypeRef {
        self.new_type(Type::Param {
            constraints: Constraints::from_classes(classes),
            index,
        })
    }

    /// A function type built through the registered `fn` scheme.
    pub fn function(
        &self,
        type_map: &TypeMap,
        param: TypeRef,
        ret: TypeRef,
    ) -> Result<TypeRef, TypeError> {
        self.instantiate(type_map, type_map.fn_scheme(), vec![param, ret])
    }

    /// A reference type built through the registered `ref` scheme. Its
    /// region starts out undetermined one level deeper than this scope,
    /// like [`TypeEnv::generic_var`], so that a `generalize` at this depth
    /// quantifies over it and every instantiation gets a region of its
    /// own.
    pub fn reference(&self, type_map: &TypeMap, pointee: TypeRef) -> Result<TypeRef, TypeError> {
        let ty = self.instantiate(type_map, type_map.ref_scheme(), vec![pointee])?;
        if let Type::Ref { region, .. } = &mut *ty.borrow_mut() {
            *region = self.generic_region();
        }
        Ok(ty)
    }

    /// An existential class type over `classes`, with an undetermined
    /// region one level deeper than this scope.
    pub fn class_type(&self, classes: Vec<RefTypeClass>) -> TypeRef {
        self.new_type(Type::Class {
            classes: Constraints::from_classes(classes),
            region: self.generic_region(),
        })
    }

    /// Wrap a binding in an info entry anchored to this scope's region.
    pub fn info(&self, binding: impl Into<Binding>) -> TypeInfoRef {
        self.new_info(binding, self.base_region())
    }

    // ── scheme transforms ───────────────────────────────────────────

    /// Close the type over every variable that is free at this depth.
    ///
    /// Free type variables become `Param`s (inheriting their constraints)
    /// and are recorded in the variable's `solve` slot so that every later
    /// encounter reuses the same parameter. Region variables inside class
    /// and reference types are promoted the same way. `explicit` seeds the
    /// parameter list with caller-declared `Param`s, which keep their
    /// positions.
    pub fn generalize(&self, ty: &TypeRef, explicit: Vec<TypeRef>) -> Binding {
        let mut vals = explicit;
        let mut region_vals = Vec::new();
        let body = self.generalize_walk(ty, &mut vals, &mut region_vals);
        if vals.is_empty() && region_vals.is_empty() {
            Binding::Mono(body)
        } else {
            Binding::Poly(Scheme {
                vals,
                region_vals,
                ty: body,
            })
        }
    }

    fn generalize_walk(
        &self,
        ty: &TypeRef,
        vals: &mut Vec<TypeRef>,
        region_vals: &mut Vec<RegionRef>,
    ) -> TypeRef {
        enum Step {
            Keep,
            Promote,
            Function(TypeRef, TypeRef),
            Class,
            Reference(TypeRef),
        }

        let t = solved(ty);
        let step = match &*t.borrow() {
            Type::Base { .. } | Type::Param { .. } => Step::Keep,
            Type::Var { depth, .. } => {
                if self.depth() < *depth {
                    Step::Promote
                } else {
                    Step::Keep
                }
            }
            Type::Function { param, ret, .. } => Step::Function(param.clone(), ret.clone()),
            Type::Class { .. } => Step::Class,
            Type::Ref { pointee, .. } => Step::Reference(pointee.clone()),
        };

        match step {
            Step::Keep => t,
            Step::Promote => {
                // free at this depth: replace by the next parameter and
                // leave the parameter behind in the solve slot so shared
                // occurrences agree
                let constraints = match &mut *t.borrow_mut() {
                    Type::Var { constraints, .. } => std::mem::take(constraints),
                    _ => unreachable!("promotion only applies to variables"),
                };
                let param = self.new_type(Type::Param {
                    constraints,
                    index: vals.len(),
                });
                if let Type::Var { solve, .. } = &mut *t.borrow_mut() {
                    *solve = Some(param.clone());
                }
                vals.push(param.clone());
                param
            }
            Step::Function(param, ret) => {
                let new_param = self.generalize_walk(&param, vals, region_vals);
                let new_ret = self.generalize_walk(&ret, vals, region_vals);
                if let Type::Function { param, ret, .. } = &mut *t.borrow_mut() {
                    if !Rc::ptr_eq(param, &new_param) {
                        *param = new_param;
                    }
                    if !Rc::ptr_eq(ret, &new_ret) {
                        *ret = new_ret;
                    }
                }
                t
            }
            Step::Class => {
                let mut region = match &*t.borrow() {
                    Type::Class { region, .. } => region.clone(),
                    _ => unreachable!(),
                };
                self.generalize_region(&mut region, region_vals);
                if let Type::Class { region: slot, .. } = &mut *t.borrow_mut() {
                    *slot = region;
                }
                t
            }
            Step::Reference(pointee) => {
                let new_pointee = self.generalize_walk(&pointee, vals, region_vals);
                let mut region = match &*t.borrow() {
                    Type::Ref { region, .. } => region.clone(),
                    _ => unreachable!(),
                };
                self.generalize_region(&mut region, region_vals);
                if let Type::Ref { pointee, region: slot, .. } = &mut *t.borrow_mut() {
                    if !Rc::ptr_eq(pointee, &new_pointee) {
                        *pointee = new_pointee;
                    }
                    *slot = region;
                }
                t
            }
        }
    }

    fn generalize_region(&self, slot: &mut RegionRef, region_vals: &mut Vec<RegionRef>) {
        let region = solved_region(slot);
        *slot = region.clone();

        let free = matches!(
            &*region.borrow(),
            Region::Var { depth, .. } if self.depth() < *depth
        );
        if free {
            let param = self.new_region(Region::Param {
                index: region_vals.len(),
            });
            if let Region::Var { solve, .. } = &mut *region.borrow_mut() {
                *solve = Some(param.clone());
            }
            *slot = param.clone();
            region_vals.push(param);
        }
    }

    /// Open a scheme: pad `vals` up to the scheme's arity with fresh
    /// variables that inherit each parameter's constraints, validate any
    /// caller-supplied arguments against those constraints, allocate fresh
    /// region variables for every region parameter, and rebuild the body
    /// with parameters replaced positionally. Sharing (and the `base`
    /// nominals) is preserved: nodes are only re-allocated on the path to
    /// a substitution.
    pub fn instantiate(
        &self,
        type_map: &TypeMap,
        scheme: &Scheme,
        mut vals: Vec<TypeRef>,
    ) -> Result<TypeRef, TypeError> {
        vals.truncate(scheme.vals.len());
        for (i, param) in scheme.vals.iter().enumerate() {
            let constraints = match &*param.borrow() {
                Type::Param { constraints, .. } => constraints.clone(),
                _ => unreachable!("scheme parameters are always Param nodes"),
            };
            if i < vals.len() {
                type_map.apply_constraint(&vals[i], &constraints.list)?;
            } else {
                vals.push(self.new_type(Type::Var {
                    constraints,
                    solve: None,
                    depth: self.depth(),
                }));
            }
        }
        let region_vals: Vec<RegionRef> =
            scheme.region_vals.iter().map(|_| self.fresh_region()).collect();

        Ok(self.instantiate_walk(&scheme.ty, scheme, &vals, &region_vals))
    }

    fn instantiate_walk(
        &self,
        ty: &TypeRef,
        scheme: &Scheme,
        vals: &[TypeRef],
        region_vals: &[RegionRef],
    ) -> TypeRef {
        enum Step {
            Keep,
            Substitute(usize),
            Function(TypeRef, TypeRef, TypeRef),
            Class(Constraints, RegionRef),
            Reference(TypeRef, TypeRef, RegionRef),
        }

        let step = match &*ty.borrow() {
            Type::Base { .. } | Type::Var { .. } => Step::Keep,
            Type::Param { index, .. } => {
                if *index < scheme.vals.len() && Rc::ptr_eq(&scheme.vals[*index], ty) {
                    Step::Substitute(*index)
                } else {
                    Step::Keep
                }
            }
            Type::Function { base, param, ret } => {
                Step::Function(base.clone(), param.clone(), ret.clone())
            }
            Type::Class { classes, region } => Step::Class(classes.clone(), region.clone()),
            Type::Ref { base, pointee, region } => {
                Step::Reference(base.clone(), pointee.clone(), region.clone())
            }
        };

        match step {
            Step::Keep => ty.clone(),
            Step::Substitute(index) => vals[index].clone(),
            Step::Function(base, param, ret) => {
                let new_param = self.instantiate_walk(&param, scheme, vals, region_vals);
                let new_ret = self.instantiate_walk(&ret, scheme, vals, region_vals);
                if Rc::ptr_eq(&new_param, &param) && Rc::ptr_eq(&new_ret, &ret) {
                    ty.clone()
                } else {
                    self.new_type(Type::Function {
                        base,
                        param: new_param,
                        ret: new_ret,
                    })
                }
            }
            Step::Class(classes, region) => {
                let new_region = instantiate_region(&region, scheme, region_vals);
                if Rc::ptr_eq(&new_region, &region) {
                    ty.clone()
                } else {
                    self.new_type(Type::Class {
                        classes,
                        region: new_region,
                    })
                }
            }
            Step::Reference(base, pointee, region) => {
                let new_pointee = self.instantiate_walk(&pointee, scheme, vals, region_vals);
                let new_region = instantiate_region(&region, scheme, region_vals);
                if Rc::ptr_eq(&new_pointee, &pointee) && Rc::ptr_eq(&new_region, &region) {
                    ty.clone()
                } else {
                    self.new_type(Type::Ref {
                        base,
                        pointee: new_pointee,
                        region: new_region,
                    })
                }
            }
        }
    }

    /// Does the region denote storage visible from this scope? True for
    /// temporaries and for the binding region of this scope or any
    /// enclosing one; region variables and parameters are still abstract
    /// and lie outside every scope.
    pub fn include(&self, region: &mut RegionRef) -> bool {
        *region = solved_region(region);
        let scope = match &*region.borrow() {
            Region::Temporary => return true,
            Region::Base { scope } => scope.clone(),
            _ => return false,
        };
        let Some(scope) = scope.upgrade() else {
            unreachable!("a region outlived the scope that defined it");
        };
        if scope.depth > self.depth() {
            return false;
        }
        let mut current = Rc::clone(&self.scope);
        while current.depth != scope.depth {
            current = match &current.parent {
                Some(parent) => Rc::clone(&parent.scope),
                None => unreachable!("scope chain shorter than its recorded depth"),
            };
        }
        Rc::ptr_eq(&current, &scope)
    }
}

fn instantiate_region(region: &RegionRef, scheme: &Scheme, region_vals: &[RegionRef]) -> RegionRef {
    if let Region::Param { index } = &*region.borrow() {
        if *index < scheme.region_vals.len() && Rc::ptr_eq(&scheme.region_vals[*index], region) {
            return region_vals[*index].clone();
        }
    }
    region.clone()
}

/// A registered type: its representation plus the classes implemented for
/// it.
#[derive(Debug)]
pub struct TypeData {
    pub binding: Binding,
    pub classes: Constraints,
}

/// The process-wide registry of named types and type classes, carrying the
/// built-in `fn` and `ref` schemes every function and reference type is
/// minted from.
#[derive(Debug)]
pub struct TypeMap {
    types: HashMap<String, TypeData>,
    classes: HashMap<String, RefTypeClass>,
    fn_scheme: Scheme,
    ref_scheme: Scheme,
}

impl TypeMap {
    /// Build the table with the `fn` and `ref` builtins pre-registered.
    pub fn new(env: &TypeEnv) -> Self {
        let fn_scheme = {
            let p0 = env.param(0);
            let p1 = env.param(1);
            Scheme {
                vals: vec![p0.clone(), p1.clone()],
                region_vals: Vec::new(),
                ty: env.new_type(Type::Function {
                    base: env.base("fn"),
                    param: p0,
                    ret: p1,
                }),
            }
        };
        let ref_scheme = {
            let p0 = env.param(0);
            let r0 = env.new_region(Region::Param { index: 0 });
            Scheme {
                vals: vec![p0.clone()],
                region_vals: vec![r0.clone()],
                ty: env.new_type(Type::Ref {
                    base: env.base("ref"),
                    pointee: p0,
                    region: r0,
                }),
            }
        };

        let mut types = HashMap::new();
        types.insert(
            "fn".to_string(),
            TypeData {
                binding: Binding::Poly(fn_scheme.clone()),
                classes: Constraints::new(),
            },
        );
        types.insert(
            "ref".to_string(),
            TypeData {
                binding: Binding::Poly(ref_scheme.clone()),
                classes: Constraints::new(),
            },
        );

        TypeMap {
            types,
            classes: HashMap::new(),
            fn_scheme,
            ref_scheme,
        }
    }

    pub fn fn_scheme(&self) -> &Scheme {
        &self.fn_scheme
    }

    pub fn ref_scheme(&self) -> &Scheme {
        &self.ref_scheme
    }

    /// Register a named type. The name is read off the type itself.
    pub fn add_type(&mut self, binding: impl Into<Binding>) -> Result<(), TypeError> {
        let binding = binding.into();
        let ty = match &binding {
            Binding::Mono(ty) => ty.clone(),
            Binding::Poly(scheme) => scheme.ty.clone(),
        };
        let Some(name) = type_name(&ty) else {
            unreachable!("only types with a top-level name can be registered");
        };
        match self.types.entry(name.clone()) {
            Entry::Occupied(_) => Err(TypeError::DuplicateTypeDefinition(name)),
            Entry::Vacant(entry) => {
                entry.insert(TypeData {
                    binding,
                    classes: Constraints::new(),
                });
                Ok(())
            }
        }
    }

    /// Register a type class by name.
    pub fn add_type_class(&mut self, class: RefTypeClass) -> Result<(), TypeError> {
        match self.classes.entry(class.name.clone()) {
            Entry::Occupied(_) => Err(TypeError::DuplicateClassDefinition(class.name.clone())),
            Entry::Vacant(entry) => {
                entry.insert(class);
                Ok(())
            }
        }
    }

    /// Record that the named type implements `class`.
    pub fn implement(&mut self, name: &str, class: RefTypeClass) {
        let Some(data) = self.types.get_mut(name) else {
            unreachable!("class implementations target a registered type");
        };
        data.classes.list.push(class);
    }

    pub fn get(&self, name: &str) -> Option<&TypeData> {
        self.types.get(name)
    }

    pub fn class(&self, name: &str) -> Option<RefTypeClass> {
        self.classes.get(name).cloned()
    }

    /// The monotype registered under `name`. Convenient for tests and
    /// harnesses that mint constants of the builtin nominals.
    pub fn named(&self, name: &str) -> Option<TypeRef> {
        match self.types.get(name).map(|data| &data.binding) {
            Some(Binding::Mono(ty)) => Some(ty.clone()),
            _ => None,
        }
    }

    /// Constrain a type by the given classes. A variable (under any chain
    /// of references) absorbs them into its constraint set; any other type
    /// must already implement them.
    pub fn apply_constraint(
        &self,
        ty: &TypeRef,
        classes: &[RefTypeClass],
    ) -> Result<(), TypeError> {
        if classes.is_empty() {
            return Ok(());
        }
        let t = unwrap_ref(ty);

        if matches!(&*t.borrow(), Type::Var { .. }) {
            if let Type::Var { constraints, .. } = &mut *t.borrow_mut() {
                constraints.merge(classes);
            }
            return Ok(());
        }

        let implemented = self.class_list(&t);
        for class in classes {
            if !implemented.has(class) {
                if matches!(&*t.borrow(), Type::Param { .. }) {
                    return Err(TypeError::NotDeclaredParamConstraint(class.name.clone()));
                }
                return Err(TypeError::MissingClass(class.name.clone()));
            }
        }
        Ok(())
    }

    /// The classes attached to a type: a variable's or parameter's own
    /// constraints, an existential's class set, a reference's pointee
    /// classes (deliberately without resolving, mirroring the variable
    /// case), or the registry entry for a named type.
    pub fn class_list(&self, ty: &TypeRef) -> Constraints {
        let pointee = match &*ty.borrow() {
            Type::Var { constraints, .. } | Type::Param { constraints, .. } => {
                return constraints.clone()
            }
            Type::Class { classes, .. } => return classes.clone(),
            Type::Ref { pointee, .. } => pointee.clone(),
            _ => {
                let Some(name) = type_name(ty) else {
                    unreachable!("anonymous types carry their own class list");
                };
                let Some(data) = self.types.get(&name) else {
                    unreachable!("type `{name}` is not registered");
                };
                return data.classes.clone();
            }
        };
        self.class_list(&pointee)
    }
}
