//! Terse constructors for program trees.
//!
//! ```
//! use gosub_ast::build::*;
//! use gosub_ast::Type;
//!
//! let program = program(
//!     &["fmt"],
//!     vec![func("main", vec![], None, vec![
//!         define("x", Type::Int32, int(1)),
//!         expr(call(name("fmt.Println"), vec![name("x")])),
//!     ])],
//! );
//! assert!(program.main().is_some());
//! ```

use crate::ast::*;

// ═══════════════════════════════════════════════════════════════════════════
// Declarations
// ═══════════════════════════════════════════════════════════════════════════

pub fn program(imports: &[&str], decls: Vec<Decl>) -> Program {
    Program {
        package: "main".to_string(),
        imports: imports.iter().map(|s| s.to_string()).collect(),
        decls,
    }
}

pub fn param(name: &str, ty: Type) -> Param {
    Param {
        name: name.to_string(),
        ty,
    }
}

pub fn func(name: &str, params: Vec<Param>, result: Option<Type>, body: Vec<Stmt>) -> Decl {
    Decl::Func(FuncDecl {
        receiver: None,
        name: name.to_string(),
        params,
        result,
        body,
    })
}

pub fn method(
    receiver: Param,
    name: &str,
    params: Vec<Param>,
    result: Option<Type>,
    body: Vec<Stmt>,
) -> Decl {
    Decl::Func(FuncDecl {
        receiver: Some(receiver),
        name: name.to_string(),
        params,
        result,
        body,
    })
}

pub fn struct_decl(name: &str, fields: Vec<Param>) -> Decl {
    Decl::Struct(StructDecl {
        name: name.to_string(),
        fields,
    })
}

pub fn global(name: &str, ty: Type, value: Option<Expr>) -> Decl {
    Decl::Var(VarDecl {
        name: name.to_string(),
        ty,
        value,
    })
}

// ═══════════════════════════════════════════════════════════════════════════
// Statements
// ═══════════════════════════════════════════════════════════════════════════

/// `name := value`
pub fn define(name: &str, ty: Type, value: Expr) -> Stmt {
    Stmt::Var {
        name: name.to_string(),
        ty,
        value: Some(value),
    }
}

/// `var name T`
pub fn var(name: &str, ty: Type) -> Stmt {
    Stmt::Var {
        name: name.to_string(),
        ty,
        value: None,
    }
}

pub fn assign(target: Expr, value: Expr) -> Stmt {
    Stmt::Assign { target, value }
}

pub fn expr(expr: Expr) -> Stmt {
    Stmt::Expr { expr }
}

pub fn inc(target: Expr) -> Stmt {
    Stmt::IncDec {
        target,
        op: PostfixOp::Inc,
    }
}

pub fn dec(target: Expr) -> Stmt {
    Stmt::IncDec {
        target,
        op: PostfixOp::Dec,
    }
}

pub fn block(body: Vec<Stmt>) -> Stmt {
    Stmt::Block { body }
}

pub fn if_(cond: Expr, then: Vec<Stmt>, otherwise: Option<Stmt>) -> Stmt {
    Stmt::If {
        cond,
        then,
        otherwise: otherwise.map(Box::new),
    }
}

pub fn for_(init: Option<Stmt>, cond: Option<Expr>, update: Option<Stmt>, body: Vec<Stmt>) -> Stmt {
    Stmt::For {
        init: init.map(Box::new),
        cond,
        update: update.map(Box::new),
        body,
    }
}

/// `for i := from; i < to; i++ { body }`
pub fn for_range(var: &str, from: i32, to: Expr, body: Vec<Stmt>) -> Stmt {
    for_(
        Some(define(var, Type::Int32, int(from))),
        Some(binary(BinaryOp::Lt, name(var), to)),
        Some(inc(name(var))),
        body,
    )
}

pub fn break_() -> Stmt {
    Stmt::Break
}

pub fn continue_() -> Stmt {
    Stmt::Continue
}

pub fn ret(value: Option<Expr>) -> Stmt {
    Stmt::Return { value }
}

pub fn go(callee: Expr, args: Vec<Expr>) -> Stmt {
    Stmt::Go { callee, args }
}

pub fn send(channel: Expr, value: Expr) -> Stmt {
    Stmt::Send { channel, value }
}

pub fn select(cases: Vec<SelectCase>) -> Stmt {
    Stmt::Select { cases }
}

pub fn case_send(channel: Expr, value: Expr, body: Vec<Stmt>) -> SelectCase {
    SelectCase::Send {
        channel,
        value,
        body,
    }
}

pub fn case_recv(channel: Expr, bind: RecvBind, body: Vec<Stmt>) -> SelectCase {
    SelectCase::Receive {
        channel,
        bind,
        body,
    }
}

pub fn case_default(body: Vec<Stmt>) -> SelectCase {
    SelectCase::Default { body }
}

/// `case name := <-ch`
pub fn bind(name: &str, ty: Type) -> RecvBind {
    RecvBind::Define {
        name: name.to_string(),
        ty,
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Expressions
// ═══════════════════════════════════════════════════════════════════════════

pub fn lit(value: Literal) -> Expr {
    Expr::Literal { value }
}

pub fn nil() -> Expr {
    lit(Literal::Nil)
}

pub fn boolean(value: bool) -> Expr {
    lit(Literal::Bool(value))
}

pub fn int(value: i32) -> Expr {
    lit(Literal::Int32(value))
}

pub fn float(value: f32) -> Expr {
    lit(Literal::Float32(value))
}

pub fn rune(value: char) -> Expr {
    lit(Literal::Rune(value))
}

pub fn string(value: &str) -> Expr {
    lit(Literal::String(value.to_string()))
}

pub fn name(name: &str) -> Expr {
    Expr::Name {
        name: name.to_string(),
    }
}

pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
    Expr::Unary {
        op,
        operand: Box::new(operand),
    }
}

pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call {
        callee: Box::new(callee),
        args,
    }
}

/// `pkg.Name(args...)` for a qualified builtin.
pub fn call_builtin(qualified: &str, args: Vec<Expr>) -> Expr {
    call(name(qualified), args)
}

pub fn func_lit(params: Vec<Param>, result: Option<Type>, body: Vec<Stmt>) -> Expr {
    Expr::Func {
        lit: Box::new(FuncLit {
            params,
            result,
            body,
        }),
    }
}

pub fn member(object: Expr, name: &str) -> Expr {
    Expr::Member {
        object: Box::new(object),
        name: name.to_string(),
    }
}

pub fn method_of(object: Expr, name: &str) -> Expr {
    Expr::Method {
        object: Box::new(object),
        name: name.to_string(),
    }
}

/// `object.name(args...)` for a method.
pub fn call_method(object: Expr, name: &str, args: Vec<Expr>) -> Expr {
    call(method_of(object, name), args)
}

pub fn index(object: Expr, index: Expr) -> Expr {
    Expr::Index {
        object: Box::new(object),
        index: Box::new(index),
    }
}

pub fn slice(object: Expr, low: Option<Expr>, high: Option<Expr>) -> Expr {
    Expr::Slice {
        object: Box::new(object),
        low: low.map(Box::new),
        high: high.map(Box::new),
    }
}

pub fn make(ty: Type, args: Vec<Expr>) -> Expr {
    Expr::Make { ty, args }
}

pub fn composite(ty: Type, elems: Vec<Expr>) -> Expr {
    Expr::Composite { ty, elems }
}

pub fn struct_lit(name: &str, fields: Vec<(&str, Expr)>) -> Expr {
    Expr::StructLit {
        name: name.to_string(),
        fields: fields
            .into_iter()
            .map(|(field, value)| (field.to_string(), value))
            .collect(),
    }
}

pub fn address_of(operand: Expr) -> Expr {
    Expr::AddressOf {
        operand: Box::new(operand),
    }
}

pub fn deref(operand: Expr) -> Expr {
    Expr::Deref {
        operand: Box::new(operand),
    }
}

pub fn recv(channel: Expr) -> Expr {
    Expr::Receive {
        channel: Box::new(channel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_for_range_shape() {
        let stmt = for_range("i", 0, int(3), vec![]);
        let Stmt::For { init, cond, update, body } = stmt else {
            panic!("expected a for statement");
        };
        assert_eq!(init.as_deref(), Some(&define("i", Type::Int32, int(0))));
        assert_eq!(cond, Some(binary(BinaryOp::Lt, name("i"), int(3))));
        assert_eq!(update.as_deref(), Some(&inc(name("i"))));
        assert!(body.is_empty());
    }

    #[test]
    fn test_main_lookup_skips_methods() {
        let p = program(
            &[],
            vec![
                struct_decl("T", vec![]),
                method(param("t", Type::named("T")), "main", vec![], None, vec![]),
                func("main", vec![], None, vec![break_()]),
            ],
        );
        let main = p.main().unwrap();
        assert!(main.receiver.is_none());
        assert_eq!(main.body, vec![Stmt::Break]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_tree_survives_json() {
        let p = program(
            &["fmt"],
            vec![func(
                "main",
                vec![],
                None,
                vec![
                    define("ch", Type::chan(Type::Int32), make(Type::chan(Type::Int32), vec![])),
                    expr(call_builtin("fmt.Println", vec![recv(name("ch")), string("x")])),
                ],
            )],
        );
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains(r#""tag":"func""#));
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
