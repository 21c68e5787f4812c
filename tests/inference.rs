//! End-to-end inference scenarios.
//!
//! Each scenario builds its expression against a fresh universe (an
//! environment plus a type table populated with `number`, `boolean`, an
//! `Add` operator class and a `TypeClass` behaviour implemented by
//! `boolean`) and runs it under both drivers. Environments cannot be
//! reused after a traversal, so the J and M runs each get their own
//! universe.

use std::collections::HashMap;
use std::rc::Rc;

use skarn::{
    mono_handle, render, Binding, BinaryOp, Constraints, Expr, RefTypeClass, TypeClass, TypeEnv,
    TypeError, TypeMap, TypeRef,
};

struct World {
    env: TypeEnv,
    type_map: TypeMap,
    number: TypeRef,
    boolean: TypeRef,
    add: BinaryOp,
    behaviour: RefTypeClass,
}

/// `self -> self -> self`, the shape shared by the two class methods.
fn binary_signature(
    env: &TypeEnv,
    type_map: &TypeMap,
    self_param: &TypeRef,
) -> TypeRef {
    let inner = env
        .function(type_map, self_param.clone(), self_param.clone())
        .expect("builtin fn scheme");
    env.function(type_map, self_param.clone(), inner)
        .expect("builtin fn scheme")
}

fn world() -> World {
    let env = TypeEnv::new();
    let mut type_map = TypeMap::new(&env);
    type_map.add_type(env.base("number")).unwrap();
    type_map.add_type(env.base("boolean")).unwrap();
    let number = type_map.named("number").unwrap();
    let boolean = type_map.named("boolean").unwrap();

    // the operator class behind `+` written as a binary node
    let add_class = {
        let self_param = env.param(0);
        let signature = binary_signature(&env, &type_map, &self_param);
        Rc::new(TypeClass {
            name: "Add".to_string(),
            bases: Constraints::new(),
            self_param,
            methods: HashMap::from([("add".to_string(), Binding::Mono(signature))]),
        })
    };
    type_map.add_type_class(add_class.clone()).unwrap();

    // a behaviour class implemented by boolean
    let behaviour = {
        let self_param = env.param(0);
        let signature = binary_signature(&env, &type_map, &self_param);
        Rc::new(TypeClass {
            name: "TypeClass".to_string(),
            bases: Constraints::new(),
            self_param,
            methods: HashMap::from([("method".to_string(), Binding::Mono(signature))]),
        })
    };
    type_map.add_type_class(behaviour.clone()).unwrap();
    type_map.implement("boolean", behaviour.clone());

    // if : boolean -> 'a -> 'a -> 'a
    let if_ty = {
        let a = env.generic_var();
        let arms = env
            .function(&type_map, a.clone(), a.clone())
            .and_then(|inner| env.function(&type_map, a.clone(), inner))
            .unwrap();
        env.function(&type_map, boolean.clone(), arms).unwrap()
    };
    env.insert("if", env.info(env.generalize(&if_ty, Vec::new())));

    // monomorphic numeric builtins
    let numeric = |ret: &TypeRef| {
        env.function(&type_map, number.clone(), ret.clone())
            .and_then(|inner| env.function(&type_map, number.clone(), inner))
            .unwrap()
    };
    env.insert("-", env.info(numeric(&number)));
    env.insert("+", env.info(numeric(&number)));
    env.insert("<", env.info(numeric(&boolean)));

    let add = BinaryOp::new(add_class, "add");
    World {
        env,
        type_map,
        number,
        boolean,
        add,
        behaviour,
    }
}

fn infer_j(world: &World, expr: &Expr) -> Result<String, TypeError> {
    let info = expr.infer(&world.type_map, &world.env)?;
    Ok(render(&mono_handle(&info)))
}

fn check_m(world: &World, expr: &Expr) -> Result<String, TypeError> {
    let expected = world
        .env
        .new_info(world.env.fresh_var(), world.env.fresh_region());
    expr.check(&world.type_map, &world.env, &expected)?;
    Ok(render(&mono_handle(&expected)))
}

/// Run the same scenario under both drivers, each in its own universe.
fn assert_both(build: impl Fn(&World) -> Expr, expected: &str) {
    let w = world();
    let expr = build(&w);
    assert_eq!(infer_j(&w, &expr).unwrap(), expected, "algorithm J");

    let w = world();
    let expr = build(&w);
    assert_eq!(check_m(&w, &expr).unwrap(), expected, "algorithm M");
}

fn assert_both_err(build: impl Fn(&World) -> Expr, check: impl Fn(&TypeError) -> bool) {
    let w = world();
    let expr = build(&w);
    let err = infer_j(&w, &expr).unwrap_err();
    assert!(check(&err), "algorithm J reported {err:?}");

    let w = world();
    let expr = build(&w);
    let err = check_m(&w, &expr).unwrap_err();
    assert!(check(&err), "algorithm M reported {err:?}");
}

#[test]
fn constant_function() {
    // λn. 1
    assert_both(
        |w| Expr::lambda("n", Expr::constant(w.number.clone())),
        "?a -> number",
    );
}

#[test]
fn predecessor_function() {
    // λn. n - 1
    assert_both(
        |w| {
            Expr::lambda(
                "n",
                Expr::apply_all(
                    Expr::ident("-"),
                    [Expr::ident("n"), Expr::constant(w.number.clone())],
                ),
            )
        },
        "number -> number",
    );
}

#[test]
fn self_applied_identity() {
    // let id = λn. n in id id id id id 1
    assert_both(
        |w| {
            Expr::let_(
                "id",
                Expr::lambda("n", Expr::ident("n")),
                Expr::apply_all(
                    Expr::ident("id"),
                    [
                        Expr::ident("id"),
                        Expr::ident("id"),
                        Expr::ident("id"),
                        Expr::ident("id"),
                        Expr::constant(w.number.clone()),
                    ],
                ),
            )
        },
        "number",
    );
}

#[test]
fn recursive_fibonacci() {
    // letrec fib = λn. if (n < 2) n (fib (n-1) + fib (n-2)) in fib
    assert_both(
        |w| {
            let num = || Expr::constant(w.number.clone());
            let fib_of = |offset: Expr| {
                Expr::apply(
                    Expr::ident("fib"),
                    Expr::apply_all(Expr::ident("-"), [Expr::ident("n"), offset]),
                )
            };
            Expr::letrec(
                "fib",
                Expr::lambda(
                    "n",
                    Expr::apply_all(
                        Expr::ident("if"),
                        [
                            Expr::apply_all(Expr::ident("<"), [Expr::ident("n"), num()]),
                            Expr::ident("n"),
                            Expr::apply_all(
                                Expr::ident("+"),
                                [fib_of(num()), fib_of(num())],
                            ),
                        ],
                    ),
                ),
                Expr::ident("fib"),
            )
        },
        "number -> number",
    );
}

#[test]
fn operator_constrains_its_operands() {
    // λn. n + n, with + dispatched through the Add class
    assert_both(
        |w| {
            Expr::lambda(
                "n",
                Expr::binary(w.add.clone(), Expr::ident("n"), Expr::ident("n")),
            )
        },
        "?a: Add -> ?a: Add",
    );
}

#[test]
fn class_method_on_an_implementing_type() {
    // true.method true
    assert_both(
        |w| {
            Expr::apply(
                Expr::method(Expr::constant(w.boolean.clone()), "method"),
                Expr::constant(w.boolean.clone()),
            )
        },
        "boolean",
    );
}

#[test]
fn existential_annotation_accepts_an_implementor() {
    // let f = λ(n : (:TypeClass)). n.method n in f true
    assert_both(
        |w| {
            Expr::let_(
                "f",
                Expr::lambda_annotated(
                    "n",
                    w.env.class_type(vec![w.behaviour.clone()]),
                    Expr::apply(Expr::method(Expr::ident("n"), "method"), Expr::ident("n")),
                ),
                Expr::apply(Expr::ident("f"), Expr::constant(w.boolean.clone())),
            )
        },
        ":TypeClass at ⊥",
    );
}

#[test]
fn value_widens_to_an_annotated_reference() {
    // let g = λ(n : 'x& at ρ). 1 in g true — the argument is implicitly
    // taken by reference
    assert_both(
        |w| {
            let annotation = w
                .env
                .reference(&w.type_map, w.env.generic_var())
                .unwrap();
            Expr::let_(
                "g",
                Expr::lambda_annotated("n", annotation, Expr::constant(w.number.clone())),
                Expr::apply(Expr::ident("g"), Expr::constant(w.boolean.clone())),
            )
        },
        "number",
    );
}

#[test]
fn binding_a_reference_to_a_temporary_dangles() {
    // let h = λ(n : 'x& at ρ). n in (let i = h true in i)
    assert_both_err(
        |w| {
            let annotation = w
                .env
                .reference(&w.type_map, w.env.generic_var())
                .unwrap();
            Expr::let_(
                "h",
                Expr::lambda_annotated("n", annotation, Expr::ident("n")),
                Expr::let_(
                    "i",
                    Expr::apply(Expr::ident("h"), Expr::constant(w.boolean.clone())),
                    Expr::ident("i"),
                ),
            )
        },
        |err| matches!(err, TypeError::Dangling(name) if name == "i"),
    );
}

#[test]
fn incomparable_classes_make_a_method_ambiguous() {
    // x : ?v with constraints {A, B}, both defining m, then x.m
    assert_both_err(
        |w| {
            let make = |name: &str| {
                let self_param = w.env.param(0);
                let signature = binary_signature(&w.env, &w.type_map, &self_param);
                Rc::new(TypeClass {
                    name: name.to_string(),
                    bases: Constraints::new(),
                    self_param,
                    methods: HashMap::from([("m".to_string(), Binding::Mono(signature))]),
                })
            };
            let a = make("A");
            let b = make("B");
            let x = w.env.fresh_var();
            w.type_map.apply_constraint(&x, &[a, b]).unwrap();
            w.env.insert("x", w.env.info(x));
            Expr::method(Expr::ident("x"), "m")
        },
        |err| matches!(err, TypeError::AmbiguousClassMethod(name) if name == "m"),
    );
}

#[test]
fn applying_a_non_function_is_a_mismatch() {
    assert_both_err(
        |w| {
            Expr::apply(
                Expr::constant(w.number.clone()),
                Expr::constant(w.number.clone()),
            )
        },
        |err| matches!(err, TypeError::TypeMismatch),
    );
}

#[test]
fn declared_scheme_parameters_carry_their_constraints() {
    // let f<'a : TypeClass> = λ(n : 'a). n.method n in f
    assert_both(
        |w| {
            let p = w.env.param_with(0, vec![w.behaviour.clone()]);
            Expr::let_poly(
                "f",
                vec![p.clone()],
                Expr::lambda_annotated(
                    "n",
                    p,
                    Expr::apply(Expr::method(Expr::ident("n"), "method"), Expr::ident("n")),
                ),
                Expr::ident("f"),
            )
        },
        "?a: TypeClass -> ?a: TypeClass",
    );
}

#[test]
fn undeclared_parameter_constraints_are_rejected() {
    // λ(n : 'a). n + n without declaring Add on 'a
    assert_both_err(
        |w| {
            Expr::lambda_annotated(
                "n",
                w.env.param(0),
                Expr::binary(w.add.clone(), Expr::ident("n"), Expr::ident("n")),
            )
        },
        |err| matches!(err, TypeError::NotDeclaredParamConstraint(name) if name == "Add"),
    );
}

#[test]
fn operator_on_a_type_without_the_class() {
    // true + true
    assert_both_err(
        |w| {
            Expr::binary(
                w.add.clone(),
                Expr::constant(w.boolean.clone()),
                Expr::constant(w.boolean.clone()),
            )
        },
        |err| matches!(err, TypeError::MissingClass(name) if name == "Add"),
    );
}

#[test]
fn method_missing_from_every_class() {
    assert_both_err(
        |w| Expr::method(Expr::constant(w.number.clone()), "nope"),
        |err| matches!(err, TypeError::MissingClassMethod(name) if name == "nope"),
    );
}

#[test]
fn unknown_identifier_is_reported_by_name() {
    assert_both_err(
        |_| Expr::ident("ghost"),
        |err| matches!(err, TypeError::UnknownIdentifier(name) if name == "ghost"),
    );
}

#[test]
fn self_application_is_rejected() {
    // λx. x x
    assert_both_err(
        |_| {
            Expr::lambda(
                "x",
                Expr::apply(Expr::ident("x"), Expr::ident("x")),
            )
        },
        |err| matches!(err, TypeError::RecursiveUnification),
    );
}

#[test]
fn letrec_shadowing_its_own_scope_is_redefinition() {
    assert_both_err(
        |w| {
            Expr::let_(
                "x",
                Expr::constant(w.number.clone()),
                Expr::letrec(
                    "x",
                    Expr::constant(w.number.clone()),
                    Expr::ident("x"),
                ),
            )
        },
        |err| matches!(err, TypeError::Redefined(name) if name == "x"),
    );
}
