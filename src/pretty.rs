//! A small pretty-printer for types, used by diagnostics and tests.
//!
//! Unsolved variables and regions get fresh letters in order of first
//! appearance (`?a`, `?b`, …, then `?_` past `z`); scheme parameters print
//! by their index (`'a` for index 0). Each call to [`render`] starts a
//! fresh naming scope, so two renderings of α-equivalent types produce the
//! same text.

use std::collections::HashMap;
use std::fmt::Write;
use std::rc::Rc;

use crate::types::{solved, solved_region, Constraints, Region, RegionRef, Type, TypeRef};

/// Render a type to its display form.
pub fn render(ty: &TypeRef) -> String {
    let mut printer = Printer::default();
    let mut out = String::new();
    printer.ty(&mut out, ty);
    out
}

#[derive(Default)]
struct Printer {
    vars: HashMap<usize, char>,
    regions: HashMap<usize, char>,
}

fn letter(index: usize) -> char {
    if index <= (b'z' - b'a') as usize {
        (b'a' + index as u8) as char
    } else {
        '_'
    }
}

impl Printer {
    fn ty(&mut self, out: &mut String, ty: &TypeRef) {
        enum Piece {
            Name(String),
            Function(TypeRef, TypeRef),
            Var(usize, Constraints),
            Param(usize, Constraints),
            Class(Constraints, RegionRef),
            Ref(TypeRef, RegionRef),
        }

        let t = solved(ty);
        let piece = match &*t.borrow() {
            Type::Base { name } => Piece::Name(name.clone()),
            Type::Function { param, ret, .. } => Piece::Function(param.clone(), ret.clone()),
            Type::Var { constraints, .. } => {
                Piece::Var(Rc::as_ptr(&t) as usize, constraints.clone())
            }
            Type::Param { constraints, index } => Piece::Param(*index, constraints.clone()),
            Type::Class { classes, region } => Piece::Class(classes.clone(), region.clone()),
            Type::Ref { pointee, region, .. } => Piece::Ref(pointee.clone(), region.clone()),
        };

        match piece {
            Piece::Name(name) => out.push_str(&name),

            Piece::Function(param, ret) => {
                let param = solved(&param);
                let compound = matches!(&*param.borrow(), Type::Function { .. });
                if compound {
                    out.push('(');
                    self.ty(out, &param);
                    out.push(')');
                } else {
                    self.ty(out, &param);
                }
                out.push_str(" -> ");
                self.ty(out, &ret);
            }

            Piece::Var(key, constraints) => {
                let next = self.vars.len();
                let c = *self.vars.entry(key).or_insert_with(|| letter(next));
                out.push('?');
                out.push(c);
                self.constraint_suffix(out, &constraints);
            }

            Piece::Param(index, constraints) => {
                out.push('\'');
                out.push(letter(index));
                self.constraint_suffix(out, &constraints);
            }

            Piece::Class(classes, region) => {
                match classes.list.len() {
                    0 => out.push_str("()"),
                    1 => {
                        let _ = write!(out, ":{}", classes.list[0].name);
                    }
                    _ => {
                        out.push('(');
                        for (i, class) in classes.list.iter().enumerate() {
                            if i > 0 {
                                out.push_str(" + ");
                            }
                            let _ = write!(out, ":{}", class.name);
                        }
                        out.push(')');
                    }
                }
                self.region(out, &region);
            }

            Piece::Ref(pointee, region) => {
                self.ty(out, &pointee);
                out.push('&');
                self.region(out, &region);
            }
        }
    }

    fn constraint_suffix(&mut self, out: &mut String, constraints: &Constraints) {
        match constraints.list.len() {
            0 => {}
            1 => {
                let _ = write!(out, ": {}", constraints.list[0].name);
            }
            _ => {
                out.push_str(":(");
                for (i, class) in constraints.list.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" + ");
                    }
                    out.push_str(&class.name);
                }
                out.push(')');
            }
        }
    }

    fn region(&mut self, out: &mut String, region: &RegionRef) {
        let region = solved_region(region);
        if matches!(&*region.borrow(), Region::Temporary) {
            out.push_str(" at ⊥");
            return;
        }
        let key = Rc::as_ptr(&region) as usize;
        let next = self.regions.len();
        let c = *self.regions.entry(key).or_insert_with(|| letter(next));
        out.push_str(" at ");
        out.push(c);
    }
}
