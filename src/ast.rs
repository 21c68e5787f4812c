//! Expression trees fed to the inference drivers.
//!
//! There is no surface syntax; callers assemble trees directly through the
//! constructor helpers. Constants carry their type instead of a value --
//! the engine only ever asks for the type.

use crate::types::{RefTypeClass, TypeRef};

/// A binary operator, identified by the type class that declares it and
/// the class method implementing it.
#[derive(Debug, Clone)]
pub struct BinaryOp {
    pub class: RefTypeClass,
    pub method: String,
}

impl BinaryOp {
    pub fn new(class: RefTypeClass, method: impl Into<String>) -> Self {
        BinaryOp {
            class,
            method: method.into(),
        }
    }
}

/// An expression.
#[derive(Debug)]
pub enum Expr {
    /// A literal of the given type.
    Constant { ty: TypeRef },

    /// A variable reference.
    Identifier { name: String },

    /// A single-parameter abstraction, optionally annotated.
    Lambda {
        param: String,
        annotation: Option<TypeRef>,
        body: Box<Expr>,
    },

    /// Function application.
    Apply { func: Box<Expr>, arg: Box<Expr> },

    /// `let name = value in body`, generalising the bound type. `params`
    /// are explicitly declared scheme parameters forming the leading
    /// prefix of the generalised scheme.
    Let {
        name: String,
        params: Vec<TypeRef>,
        value: Box<Expr>,
        body: Box<Expr>,
    },

    /// Recursive let: `name` is visible inside `value`.
    LetRec {
        name: String,
        params: Vec<TypeRef>,
        value: Box<Expr>,
        body: Box<Expr>,
    },

    /// `object.method`, resolved through the type classes of `object`.
    MethodAccess { object: Box<Expr>, method: String },

    /// A binary operation dispatched through its operator class.
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn constant(ty: TypeRef) -> Expr {
        Expr::Constant { ty }
    }

    pub fn ident(name: impl Into<String>) -> Expr {
        Expr::Identifier { name: name.into() }
    }

    pub fn lambda(param: impl Into<String>, body: Expr) -> Expr {
        Expr::Lambda {
            param: param.into(),
            annotation: None,
            body: Box::new(body),
        }
    }

    pub fn lambda_annotated(param: impl Into<String>, annotation: TypeRef, body: Expr) -> Expr {
        Expr::Lambda {
            param: param.into(),
            annotation: Some(annotation),
            body: Box::new(body),
        }
    }

    pub fn apply(func: Expr, arg: Expr) -> Expr {
        Expr::Apply {
            func: Box::new(func),
            arg: Box::new(arg),
        }
    }

    /// Left-associated application of several arguments.
    pub fn apply_all(func: Expr, args: impl IntoIterator<Item = Expr>) -> Expr {
        args.into_iter().fold(func, Expr::apply)
    }

    pub fn let_(name: impl Into<String>, value: Expr, body: Expr) -> Expr {
        Expr::Let {
            name: name.into(),
            params: Vec::new(),
            value: Box::new(value),
            body: Box::new(body),
        }
    }

    pub fn let_poly(
        name: impl Into<String>,
        params: Vec<TypeRef>,
        value: Expr,
        body: Expr,
    ) -> Expr {
        Expr::Let {
            name: name.into(),
            params,
            value: Box::new(value),
            body: Box::new(body),
        }
    }

    pub fn letrec(name: impl Into<String>, value: Expr, body: Expr) -> Expr {
        Expr::LetRec {
            name: name.into(),
            params: Vec::new(),
            value: Box::new(value),
            body: Box::new(body),
        }
    }

    pub fn letrec_poly(
        name: impl Into<String>,
        params: Vec<TypeRef>,
        value: Expr,
        body: Expr,
    ) -> Expr {
        Expr::LetRec {
            name: name.into(),
            params,
            value: Box::new(value),
            body: Box::new(body),
        }
    }

    pub fn method(object: Expr, method: impl Into<String>) -> Expr {
        Expr::MethodAccess {
            object: Box::new(object),
            method: method.into(),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }
}
