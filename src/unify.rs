//! Unification of types and conversion of regions.
//!
//! All three entry points are destructive: variables are solved in place
//! and the caller's handles are rewritten to the canonical representative,
//! so aliases held elsewhere observe the result. `unify_type` is the
//! classic procedure; `unify_with_ref` adds the two asymmetric widenings
//! (value to existential class type, value to reference) and reports which
//! implicit cast the caller would have to materialise; `unify_function`
//! splits a function type into its parameter and return slots.

use std::mem::discriminant;
use std::rc::Rc;

use crate::env::{TypeEnv, TypeMap};
use crate::error::TypeError;
use crate::types::{
    depend, mono_handle, solved, solved_region, Binding, Region, RegionRef, Type, TypeInfoRef,
    TypeRef,
};

/// The implicit conversion unification silently performed, if any. A
/// non-`None` result means an elaborator would have to insert an explicit
/// cast at this point of the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImplicitCast {
    None,
    /// A value was widened to a reference.
    Reference,
    /// A value (or a narrower existential) was widened to an existential
    /// class type.
    TypeClass,
}

/// Convert `source` into `target` on the region lattice, where unsolved
/// variables sit at the top and the temporary region at the bottom; the
/// conversion succeeds when `source ⊒ target`. On success both handles
/// point at the same node afterwards.
///
/// Inference only requests conversions that hold by construction, so
/// callers inside unification treat `false` as a logic error.
pub fn convert(target: &mut RegionRef, source: &mut RegionRef) -> bool {
    *target = solved_region(target);
    *source = solved_region(source);

    if Rc::ptr_eq(target, source) {
        return true;
    }

    // anything converts into the bottom region; a variable source is
    // solved to it
    if matches!(&*target.borrow(), Region::Temporary) {
        if let Region::Var { solve, .. } = &mut *source.borrow_mut() {
            *solve = Some(target.clone());
        }
        *source = target.clone();
        return true;
    }
    // the bottom region never widens into a named one
    if matches!(&*source.borrow(), Region::Temporary) {
        return false;
    }
    // an undetermined source takes on the target
    if matches!(&*source.borrow(), Region::Var { .. }) {
        if let Region::Var { solve, .. } = &mut *source.borrow_mut() {
            *solve = Some(target.clone());
        }
        *source = target.clone();
        return true;
    }
    // a determined source cannot satisfy an undetermined target
    if matches!(&*target.borrow(), Region::Var { .. }) {
        return false;
    }
    // scheme-bound regions convert only to themselves
    if matches!(&*target.borrow(), Region::Param { .. })
        || matches!(&*source.borrow(), Region::Param { .. })
    {
        return false;
    }

    // both are scope regions: the source must be an enclosing scope of
    // the target, so the referent outlives the use
    let source_scope = match &*source.borrow() {
        Region::Base { scope } => scope.clone(),
        _ => unreachable!("remaining regions are scope-bound"),
    };
    let target_scope = match &*target.borrow() {
        Region::Base { scope } => scope.clone(),
        _ => unreachable!("remaining regions are scope-bound"),
    };
    let (Some(source_scope), Some(target_scope)) =
        (source_scope.upgrade(), target_scope.upgrade())
    else {
        unreachable!("a region outlived the scope that defined it");
    };
    if source_scope.depth > target_scope.depth {
        return false;
    }
    let mut current = target_scope;
    while current.depth != source_scope.depth {
        current = match &current.parent {
            Some(parent) => Rc::clone(&parent.scope),
            None => unreachable!("scope chain shorter than its recorded depth"),
        };
    }
    if Rc::ptr_eq(&current, &source_scope) {
        *source = target.clone();
        true
    } else {
        false
    }
}

fn var_depth(ty: &TypeRef) -> usize {
    match &*ty.borrow() {
        Type::Var { depth, .. } => *depth,
        _ => unreachable!("depth is only asked of variables"),
    }
}

/// Point the deeper variable at the shallower one, folding its constraints
/// into the survivor.
fn link_var(inner: &mut TypeRef, outer: &mut TypeRef) {
    let absorbed = match &*inner.borrow() {
        Type::Var { constraints, .. } => constraints.clone(),
        _ => unreachable!("only variables are linked"),
    };
    if let Type::Var { constraints, .. } = &mut *outer.borrow_mut() {
        constraints.merge(&absorbed.list);
    }
    if let Type::Var { solve, .. } = &mut *inner.borrow_mut() {
        *solve = Some(outer.clone());
    }
    *inner = outer.clone();
}

/// Solve a variable to a concrete type, after the occurs check and after
/// verifying the type satisfies the variable's constraints.
fn solve_var(
    type_map: &TypeMap,
    var: &mut TypeRef,
    ty: &mut TypeRef,
) -> Result<(), TypeError> {
    if depend(ty, var) {
        return Err(TypeError::RecursiveUnification);
    }
    let constraints = match &*var.borrow() {
        Type::Var { constraints, .. } => constraints.clone(),
        _ => unreachable!("only variables are solved"),
    };
    type_map.apply_constraint(ty, &constraints.list)?;
    if let Type::Var { solve, .. } = &mut *var.borrow_mut() {
        *solve = Some(ty.clone());
    }
    *var = ty.clone();
    Ok(())
}

/// Unify two types, mutating shared variables in place and rewriting both
/// handles to the canonical representative. With `implicit` enabled, two
/// existential class types may differ as long as the right-hand set
/// entails the left-hand one; the return value reports the widening.
/// Functions are invariant in both positions, so their components unify
/// with implicit conversion disabled.
pub fn unify_type(
    type_map: &TypeMap,
    t1: &mut TypeRef,
    t2: &mut TypeRef,
    implicit: bool,
) -> Result<ImplicitCast, TypeError> {
    *t1 = solved(t1);
    *t2 = solved(t2);
    if Rc::ptr_eq(t1, t2) {
        return Ok(ImplicitCast::None);
    }

    let t1_is_var = matches!(&*t1.borrow(), Type::Var { .. });
    let t2_is_var = matches!(&*t2.borrow(), Type::Var { .. });

    match (t1_is_var, t2_is_var) {
        (true, true) => {
            // the deeper variable points at the shallower one, keeping
            // solved variables from escaping their scope
            if var_depth(t1) < var_depth(t2) {
                link_var(t2, t1);
            } else {
                link_var(t1, t2);
            }
            Ok(ImplicitCast::None)
        }
        (true, false) => {
            solve_var(type_map, t1, t2)?;
            Ok(ImplicitCast::None)
        }
        (false, true) => {
            solve_var(type_map, t2, t1)?;
            Ok(ImplicitCast::None)
        }
        (false, false) => unify_concrete(type_map, t1, t2, implicit),
    }
}

/// Unify two non-variable types of (potentially) the same shape.
fn unify_concrete(
    type_map: &TypeMap,
    t1: &mut TypeRef,
    t2: &mut TypeRef,
    implicit: bool,
) -> Result<ImplicitCast, TypeError> {
    let same_kind = discriminant(&*t1.borrow()) == discriminant(&*t2.borrow());
    if !same_kind {
        return Err(TypeError::TypeMismatch);
    }

    if matches!(&*t1.borrow(), Type::Function { .. }) {
        let (mut p1, mut r1) = function_parts(t1);
        let (mut p2, mut r2) = function_parts(t2);
        // functions are invariant: no binary-compatible representation
        // exists for a converted argument or result
        unify_type(type_map, &mut p1, &mut p2, false)?;
        unify_type(type_map, &mut r1, &mut r2, false)?;
        write_function_parts(t1, &p1, &r1);
        write_function_parts(t2, &p2, &r2);
        if Rc::ptr_eq(&p1, &p2) && Rc::ptr_eq(&r1, &r2) {
            *t1 = t2.clone();
        }
        return Ok(ImplicitCast::None);
    }

    if implicit && matches!(&*t1.borrow(), Type::Class { .. }) {
        let (classes1, mut region1) = class_parts(t1);
        let (classes2, mut region2) = class_parts(t2);
        let equal = classes1.list.len() == classes2.list.len()
            && classes1
                .list
                .iter()
                .all(|c| classes2.list.iter().any(|d| Rc::ptr_eq(c, d)));
        if !equal {
            // widening: the right-hand side must entail every class the
            // left-hand side demands
            type_map.apply_constraint(t2, &classes1.list)?;
        }
        let converted = convert(&mut region1, &mut region2);
        assert!(converted, "class type regions converge during unification");
        write_class_region(t1, &region1);
        write_class_region(t2, &region2);
        if equal {
            *t1 = t2.clone();
            return Ok(ImplicitCast::None);
        }
        return Ok(ImplicitCast::TypeClass);
    }

    if matches!(&*t1.borrow(), Type::Ref { .. }) {
        let (mut p1, mut region1) = ref_parts(t1);
        let (mut p2, mut region2) = ref_parts(t2);
        unify_type(type_map, &mut p1, &mut p2, false)?;
        let converted = convert(&mut region1, &mut region2);
        assert!(converted, "reference regions converge during unification");
        write_ref_parts(t1, &p1, &region1);
        write_ref_parts(t2, &p2, &region2);
        if Rc::ptr_eq(&p1, &p2) {
            *t1 = t2.clone();
        }
        return Ok(ImplicitCast::None);
    }

    // base types and parameters are nominal: distinct nodes never unify
    Err(TypeError::TypeMismatch)
}

/// Unify, additionally allowing the expected side to be an existential
/// class type or a reference satisfied by a plain value. The value's
/// region is drawn from the context info so the reference knows where its
/// referent lives.
pub fn unify_with_ref(
    type_map: &TypeMap,
    t1: &mut TypeRef,
    t2info: &TypeInfoRef,
) -> Result<ImplicitCast, TypeError> {
    *t1 = solved(t1);
    let mut t2 = solved(&mono_handle(t2info));
    t2info.borrow_mut().binding = Binding::Mono(t2.clone());

    let widening = {
        let b1 = t1.borrow();
        let b2 = t2.borrow();
        discriminant(&*b1) != discriminant(&*b2) && !matches!(&*b2, Type::Var { .. })
    };

    if widening && matches!(&*t1.borrow(), Type::Class { .. }) {
        let (classes, mut source_region) = class_parts(t1);
        type_map.apply_constraint(&t2, &classes.list)?;
        let mut target_region = t2info.borrow().region.clone();
        let converted = convert(&mut target_region, &mut source_region);
        assert!(converted, "a value region converts into its existential");
        t2info.borrow_mut().region = target_region;
        write_class_region(t1, &source_region);
        return Ok(ImplicitCast::TypeClass);
    }
    if widening && matches!(&*t1.borrow(), Type::Ref { .. }) {
        let (mut pointee, mut source_region) = ref_parts(t1);
        unify_type(type_map, &mut pointee, &mut t2, false)?;
        t2info.borrow_mut().binding = Binding::Mono(t2.clone());
        let mut target_region = t2info.borrow().region.clone();
        let converted = convert(&mut target_region, &mut source_region);
        assert!(converted, "a value region converts into its reference");
        t2info.borrow_mut().region = target_region;
        write_ref_parts(t1, &pointee, &source_region);
        return Ok(ImplicitCast::Reference);
    }

    let cast = unify_type(type_map, t1, &mut t2, true)?;
    t2info.borrow_mut().binding = Binding::Mono(t2);
    Ok(cast)
}

/// Unify `ty` against a function type given as separate parameter and
/// return slots, each reference-aware. A variable is solved to a fresh
/// instance of the builtin `fn` scheme over the two slots.
pub fn unify_function(
    type_map: &TypeMap,
    env: &TypeEnv,
    ty: &TypeRef,
    param_info: &TypeInfoRef,
    ret_info: &TypeInfoRef,
) -> Result<(ImplicitCast, ImplicitCast), TypeError> {
    let t = solved(ty);

    let parts = match &*t.borrow() {
        Type::Function { param, ret, .. } => Some((param.clone(), ret.clone())),
        _ => None,
    };
    if let Some((mut param, mut ret)) = parts {
        let param_cast = unify_with_ref(type_map, &mut param, param_info)?;
        let ret_cast = unify_with_ref(type_map, &mut ret, ret_info)?;
        write_function_parts(&t, &param, &ret);
        return Ok((param_cast, ret_cast));
    }

    if !matches!(&*t.borrow(), Type::Var { .. }) {
        return Err(TypeError::TypeMismatch);
    }
    let fresh = env.instantiate(
        type_map,
        type_map.fn_scheme(),
        vec![mono_handle(param_info), mono_handle(ret_info)],
    )?;
    if depend(&fresh, &t) {
        return Err(TypeError::RecursiveUnification);
    }
    if let Type::Var { solve, .. } = &mut *t.borrow_mut() {
        *solve = Some(fresh);
    }
    Ok((ImplicitCast::None, ImplicitCast::None))
}

fn function_parts(ty: &TypeRef) -> (TypeRef, TypeRef) {
    match &*ty.borrow() {
        Type::Function { param, ret, .. } => (param.clone(), ret.clone()),
        _ => unreachable!("caller checked the shape"),
    }
}

fn write_function_parts(ty: &TypeRef, param: &TypeRef, ret: &TypeRef) {
    if let Type::Function { param: p, ret: r, .. } = &mut *ty.borrow_mut() {
        *p = param.clone();
        *r = ret.clone();
    }
}

fn class_parts(ty: &TypeRef) -> (crate::types::Constraints, RegionRef) {
    match &*ty.borrow() {
        Type::Class { classes, region } => (classes.clone(), region.clone()),
        _ => unreachable!("caller checked the shape"),
    }
}

fn write_class_region(ty: &TypeRef, region: &RegionRef) {
    if let Type::Class { region: slot, .. } = &mut *ty.borrow_mut() {
        *slot = region.clone();
    }
}

fn ref_parts(ty: &TypeRef) -> (TypeRef, RegionRef) {
    match &*ty.borrow() {
        Type::Ref { pointee, region, .. } => (pointee.clone(), region.clone()),
        _ => unreachable!("caller checked the shape"),
    }
}

fn write_ref_parts(ty: &TypeRef, pointee: &TypeRef, region: &RegionRef) {
    if let Type::Ref { pointee: p, region: r, .. } = &mut *ty.borrow_mut() {
        *p = pointee.clone();
        *r = region.clone();
    }
}
