//! The two inference drivers.
//!
//! [`Expr::infer`] is Algorithm J: it synthesises a type bottom-up,
//! allocating fresh variables where the tree underdetermines them.
//! [`Expr::check`] is Algorithm M: it pushes an expected type top-down and
//! unifies at the leaves. Both walk the same environment discipline --
//! lambdas open a scope one level deeper, `let` generalises at the current
//! depth -- and both reject references that would escape the scope of
//! their referent.

use crate::ast::Expr;
use crate::env::{TypeEnv, TypeMap};
use crate::error::TypeError;
use crate::types::{
    mono_handle, solved, solved_region, Binding, Region, RegionRef, Type, TypeInfoRef, TypeRef,
};
use crate::unify::{unify_function, unify_type, unify_with_ref, ImplicitCast};

impl Expr {
    /// Algorithm J: synthesise the type of the expression.
    pub fn infer(&self, type_map: &TypeMap, env: &TypeEnv) -> Result<TypeInfoRef, TypeError> {
        match self {
            Expr::Constant { ty } => Ok(env.new_info(ty.clone(), env.temporary())),

            Expr::Identifier { name } => {
                let Some(info) = env.lookup(name) else {
                    return Err(TypeError::UnknownIdentifier(name.clone()));
                };
                let binding = info.borrow().binding.clone();
                match binding {
                    // a monotype is returned as-is, region included
                    Binding::Mono(_) => Ok(info),
                    // a scheme instantiates to a fresh temporary value
                    Binding::Poly(scheme) => {
                        let ty = env.instantiate(type_map, &scheme, Vec::new())?;
                        Ok(env.new_info(ty, env.temporary()))
                    }
                }
            }

            Expr::Lambda { param, annotation, body } => {
                let inner = env.child();
                let param_ty = annotation.clone().unwrap_or_else(|| inner.fresh_var());
                let bound = inner.new_info(param_ty, inner.base_region());
                inner.insert(param.clone(), bound.clone());

                let body_info = body.infer(type_map, &inner)?;

                let fn_ty = env.function(type_map, mono_handle(&bound), mono_handle(&body_info))?;
                let result = env.new_info(fn_ty, env.temporary());
                if escapes_scope(&inner, &result) {
                    return Err(TypeError::Dangling(param.clone()));
                }
                Ok(result)
            }

            Expr::Apply { func, arg } => {
                let func_info = func.infer(type_map, env)?;
                let arg_info = arg.infer(type_map, env)?;
                let result = env.new_info(env.fresh_var(), env.temporary());
                unify_function(type_map, env, &mono_handle(&func_info), &arg_info, &result)?;
                Ok(result)
            }

            Expr::Let { name, params, value, body } => {
                let value_info = value.infer(type_map, env)?;
                if binds_temporary(&value_info) {
                    return Err(TypeError::Dangling(name.clone()));
                }
                if env.defined_here(name) {
                    return Err(TypeError::Redefined(name.clone()));
                }
                let binding = env.generalize(&mono_handle(&value_info), params.clone());
                env.insert(name.clone(), env.new_info(binding, env.base_region()));
                body.infer(type_map, env)
            }

            Expr::LetRec { name, params, value, body } => {
                if env.defined_here(name) {
                    return Err(TypeError::Redefined(name.clone()));
                }
                // the placeholder makes the binding visible to `value`
                let placeholder = env.new_info(env.fresh_var(), env.base_region());
                env.insert(name.clone(), placeholder.clone());

                let value_info = value.infer(type_map, env)?;
                let mut bound = mono_handle(&placeholder);
                let mut inferred = mono_handle(&value_info);
                // the value is a temporary, so its region stays out of it
                unify_type(type_map, &mut bound, &mut inferred, true)?;
                placeholder.borrow_mut().binding = Binding::Mono(bound);
                value_info.borrow_mut().binding = Binding::Mono(inferred.clone());

                if binds_temporary(&placeholder) {
                    return Err(TypeError::Dangling(name.clone()));
                }
                placeholder.borrow_mut().binding = env.generalize(&inferred, params.clone());
                body.infer(type_map, env)
            }

            Expr::MethodAccess { object, method } => {
                let receiver = object.infer(type_map, env)?;
                resolve_method(type_map, env, &receiver, method)
            }

            Expr::Binary { op, lhs, rhs } => {
                let lhs_info = lhs.infer(type_map, env)?;
                type_map
                    .apply_constraint(&mono_handle(&lhs_info), std::slice::from_ref(&op.class))?;
                let rhs_info = rhs.infer(type_map, env)?;

                let result = env.new_info(env.fresh_var(), env.temporary());
                let method = op
                    .class
                    .instantiated_method(type_map, env, &op.method, &lhs_info)?;
                unify_function(type_map, env, &method, &rhs_info, &result)?;
                Ok(result)
            }
        }
    }

    /// Algorithm M: check the expression against an expected type.
    pub fn check(
        &self,
        type_map: &TypeMap,
        env: &TypeEnv,
        expected: &TypeInfoRef,
    ) -> Result<(), TypeError> {
        match self {
            Expr::Constant { ty } => {
                let literal = env.new_info(ty.clone(), env.temporary());
                unify_info(type_map, expected, &literal)?;
                force_temporary(expected);
                Ok(())
            }

            Expr::Identifier { name } => {
                let Some(info) = env.lookup(name) else {
                    return Err(TypeError::UnknownIdentifier(name.clone()));
                };
                let binding = info.borrow().binding.clone();
                match binding {
                    Binding::Mono(_) => {
                        let cast = unify_info(type_map, expected, &info)?;
                        if cast == ImplicitCast::None {
                            // no conversion: the use shares the binding's
                            // region
                            let region = info.borrow().region.clone();
                            expected.borrow_mut().region = region;
                        } else {
                            force_temporary(expected);
                        }
                    }
                    Binding::Poly(scheme) => {
                        let instance = env.new_info(
                            env.instantiate(type_map, &scheme, Vec::new())?,
                            env.temporary(),
                        );
                        unify_info(type_map, expected, &instance)?;
                        force_temporary(expected);
                    }
                }
                Ok(())
            }

            Expr::Lambda { param, annotation, body } => {
                let inner = env.child();
                let param_ty = annotation.clone().unwrap_or_else(|| inner.fresh_var());
                let param_info = inner.new_info(param_ty, inner.base_region());
                let body_info = inner.new_info(inner.fresh_var(), inner.fresh_region());
                unify_function(type_map, env, &mono_handle(expected), &param_info, &body_info)?;

                inner.insert(param.clone(), param_info);
                body.check(type_map, &inner, &body_info)?;

                if escapes_scope(&inner, &body_info) {
                    return Err(TypeError::Dangling(param.clone()));
                }
                Ok(())
            }

            Expr::Apply { func, arg } => {
                let arg_info = env.new_info(env.fresh_var(), env.base_region());
                let fn_ty =
                    env.function(type_map, mono_handle(&arg_info), mono_handle(expected))?;
                func.check(type_map, env, &env.new_info(fn_ty, env.base_region()))?;
                arg.check(type_map, env, &arg_info)
            }

            Expr::Let { name, params, value, body } => {
                let value_info = env.new_info(env.fresh_var(), env.base_region());
                value.check(type_map, env, &value_info)?;

                if binds_temporary(&value_info) {
                    return Err(TypeError::Dangling(name.clone()));
                }
                if env.defined_here(name) {
                    return Err(TypeError::Redefined(name.clone()));
                }
                let binding = env.generalize(&mono_handle(&value_info), params.clone());
                env.insert(name.clone(), env.new_info(binding, env.base_region()));
                body.check(type_map, env, expected)
            }

            Expr::LetRec { name, params, value, body } => {
                if env.defined_here(name) {
                    return Err(TypeError::Redefined(name.clone()));
                }
                let placeholder = env.new_info(env.fresh_var(), env.base_region());
                let value_info = env.new_info(env.fresh_var(), env.temporary());
                env.insert(name.clone(), placeholder.clone());

                value.check(type_map, env, &value_info)?;
                let mut bound = mono_handle(&placeholder);
                let mut inferred = mono_handle(&value_info);
                unify_type(type_map, &mut bound, &mut inferred, true)?;
                placeholder.borrow_mut().binding = Binding::Mono(bound.clone());
                value_info.borrow_mut().binding = Binding::Mono(inferred);

                if binds_temporary(&placeholder) {
                    return Err(TypeError::Dangling(name.clone()));
                }
                placeholder.borrow_mut().binding = env.generalize(&bound, params.clone());
                body.check(type_map, env, expected)
            }

            Expr::MethodAccess { object, method } => {
                let receiver = env.new_info(env.fresh_var(), env.fresh_region());
                object.check(type_map, env, &receiver)?;

                let resolved = resolve_method(type_map, env, &receiver, method)?;
                unify_info(type_map, expected, &resolved)?;
                force_temporary(expected);
                Ok(())
            }

            Expr::Binary { op, lhs, rhs } => {
                let lhs_info = env.new_info(env.fresh_var(), env.fresh_region());
                lhs.check(type_map, env, &lhs_info)?;
                type_map
                    .apply_constraint(&mono_handle(&lhs_info), std::slice::from_ref(&op.class))?;

                let rhs_info = env.new_info(env.fresh_var(), env.fresh_region());
                let method = op
                    .class
                    .instantiated_method(type_map, env, &op.method, &lhs_info)?;
                unify_function(type_map, env, &method, &rhs_info, expected)?;
                rhs.check(type_map, env, &rhs_info)
            }
        }
    }
}

/// Unify the expected info's type against a source info, rewriting the
/// expected handle to the canonical representative.
fn unify_info(
    type_map: &TypeMap,
    expected: &TypeInfoRef,
    source: &TypeInfoRef,
) -> Result<ImplicitCast, TypeError> {
    let mut ty = mono_handle(expected);
    let cast = unify_with_ref(type_map, &mut ty, source)?;
    expected.borrow_mut().binding = Binding::Mono(ty);
    Ok(cast)
}

/// Overwrite the info's region node with the temporary region.
fn force_temporary(info: &TypeInfoRef) {
    let region = info.borrow().region.clone();
    *region.borrow_mut() = Region::Temporary;
}

/// Does the inferred type hand out a reference into `scope`? Checked when
/// a lambda closes: its result must not reference storage that dies with
/// the lambda's own environment.
fn escapes_scope(scope: &TypeEnv, info: &TypeInfoRef) -> bool {
    let Some(mut region) = ref_region(info) else {
        return false;
    };
    let escapes = scope.include(&mut region);
    write_ref_region(info, &region);
    escapes
}

/// Is the bound value a reference to a temporary? Checked at `let`: the
/// referent would die before the binding can be used.
fn binds_temporary(info: &TypeInfoRef) -> bool {
    let Some(region) = ref_region(info) else {
        return false;
    };
    let region = solved_region(&region);
    write_ref_region(info, &region);
    let is_temporary = matches!(&*region.borrow(), Region::Temporary);
    is_temporary
}

/// The region of the info's type when that type is a reference.
/// Compresses the type handle as a side effect.
fn ref_region(info: &TypeInfoRef) -> Option<RegionRef> {
    let ty = solved(&mono_handle(info));
    info.borrow_mut().binding = Binding::Mono(ty.clone());
    let region = match &*ty.borrow() {
        Type::Ref { region, .. } => region.clone(),
        _ => return None,
    };
    Some(region)
}

fn write_ref_region(info: &TypeInfoRef, region: &RegionRef) {
    let ty = mono_handle(info);
    if let Type::Ref { region: slot, .. } = &mut *ty.borrow_mut() {
        *slot = region.clone();
    };
}

/// Resolve `method` through the receiver's type classes and materialise it
/// against the receiver. The result is the self-applied method type and is
/// always a temporary.
fn resolve_method(
    type_map: &TypeMap,
    env: &TypeEnv,
    receiver: &TypeInfoRef,
    method: &str,
) -> Result<TypeInfoRef, TypeError> {
    let classes = type_map.class_list(&mono_handle(receiver));
    let Some(class) = classes.get_class_method(method)? else {
        return Err(TypeError::MissingClassMethod(method.to_string()));
    };
    let ty = class.instantiated_method(type_map, env, method, receiver)?;
    Ok(env.new_info(ty, env.temporary()))
}
