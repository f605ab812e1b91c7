//! Program loading.
//!
//! Translates a checked [`Program`] into heap control nodes and prepares the
//! global frame: builtins of the universe block and of every imported
//! package, struct declarations, functions and methods. Global variables are
//! not initialized here; their declarations open the initial control, which
//! ends with the call of `main`.
//!
//! Method closures live in the global frame under `METHOD.<type>.<name>`,
//! struct declarations under `STRUCT.<name>`. Neither key is a valid
//! identifier, so programs cannot observe them.

use gosub_ast::{self as ast, Decl, Expr, Literal, Param, Program, RecvBind, SelectCase, Stmt, Type};
use gosub_heap::{Address, Heap, Tag};
use gosub_runtime::control::{self, BinaryOp, PostfixOp, UnaryOp};
use gosub_runtime::env::frame;
use gosub_runtime::objects::function::{builtin, closure};
use gosub_runtime::objects::types::{self, STRUCT_PREFIX};
use gosub_runtime::objects::{primitive, string, variable};
use gosub_runtime::{RuntimeError, RuntimeResult};

use crate::builtins::BuiltinRegistry;
use crate::error::{VmError, VmResult};

pub(crate) const METHOD_PREFIX: &str = "METHOD.";

/// Fills `globals` and returns the initial control node (owned).
pub fn load(heap: &mut Heap, builtins: &BuiltinRegistry, globals: Address, program: &Program) -> VmResult<Address> {
    if program.main().is_none() {
        return Err(VmError::NoMain);
    }
    link_builtins(heap, builtins, globals, &program.imports)?;

    let mut lower = Lowering { heap };
    for decl in &program.decls {
        match decl {
            Decl::Struct(s) => lower.struct_decl(globals, s)?,
            Decl::Func(f) => lower.func_decl(globals, f)?,
            Decl::Var(_) => {}
        }
    }

    let mut statements = Vec::new();
    for decl in &program.decls {
        if let Decl::Var(v) = decl {
            statements.push(lower.var(&v.name, &v.ty, v.value.as_ref())?);
        }
    }
    let main = lower.name_node(Tag::Name, "main")?;
    let call = lower.node(Tag::Call, &[0], vec![main])?;
    statements.push(lower.node(Tag::ExprStmt, &[], vec![call])?);
    let initial = lower.node(Tag::Sequence, &[], statements)?;

    log::debug!(
        "loaded {} declarations, {} free words left",
        program.decls.len(),
        lower.heap.free_words()
    );
    Ok(initial)
}

/// Binds universe builtins and the exports of each import as builtin-typed
/// globals.
fn link_builtins(heap: &mut Heap, builtins: &BuiltinRegistry, globals: Address, imports: &[String]) -> VmResult<()> {
    let mut names = builtins.exports("");
    for package in imports {
        if !builtins.is_package(package) {
            return Err(VmError::UnknownBuiltin(package.clone()));
        }
        names.extend(builtins.exports(package));
    }

    let ty = types::simple(heap, Tag::TypeBuiltin)?;
    for name in names {
        let native = builtin::create(heap, name)?;
        let var = variable::create_owned(heap, ty, native)?;
        let bound = frame::insert_str(heap, globals, name, var);
        heap.free(var)?;
        bound?;
    }
    heap.free(ty)?;
    Ok(())
}

/// Builds owned control nodes from tree fragments.
struct Lowering<'h> {
    heap: &'h mut Heap,
}

impl Lowering<'_> {
    fn node(&mut self, tag: Tag, fields: &[u64], children: Vec<Address>) -> VmResult<Address> {
        Ok(control::build(self.heap, tag, fields, children)?)
    }

    fn string(&mut self, text: &str) -> VmResult<Address> {
        Ok(string::create(self.heap, text)?)
    }

    fn name_node(&mut self, tag: Tag, name: &str) -> VmResult<Address> {
        let name = self.string(name)?;
        self.node(tag, &[], vec![name])
    }

    // =========================================================================
    // Declarations
    // =========================================================================

    fn struct_decl(&mut self, globals: Address, decl: &ast::StructDecl) -> VmResult<()> {
        let mut members = Vec::with_capacity(decl.fields.len());
        for field in &decl.fields {
            members.push((field.name.as_str(), self.ty(&field.ty)?));
        }
        let made = types::struct_decl(self.heap, &decl.name, &members);
        for (_, ty) in members {
            self.heap.free(ty)?;
        }
        let made = made?;
        let bound = frame::insert_str(self.heap, globals, &format!("{STRUCT_PREFIX}{}", decl.name), made);
        self.heap.free(made)?;
        Ok(bound?)
    }

    fn func_decl(&mut self, globals: Address, decl: &ast::FuncDecl) -> VmResult<()> {
        let literal = self.function(decl.receiver.as_ref(), &decl.params, &decl.body)?;
        let f = closure::create(self.heap, literal, globals);
        self.heap.free(literal)?;
        let f = f?;

        let bound = match &decl.receiver {
            Some(receiver) => {
                let owner = receiver_type_name(&receiver.ty)
                    .ok_or_else(|| RuntimeError::Undefined(format!("receiver type of method {}", decl.name)))?;
                let key = format!("{METHOD_PREFIX}{owner}.{}", decl.name);
                frame::insert_str(self.heap, globals, &key, f)
            }
            None => {
                let ty = types::simple(self.heap, Tag::TypeFunction)?;
                let var = variable::create(self.heap, ty, f);
                self.heap.free(ty)?;
                let var = var?;
                let bound = frame::insert_str(self.heap, globals, &decl.name, var);
                self.heap.free(var)?;
                bound
            }
        };
        self.heap.free(f)?;
        Ok(bound?)
    }

    /// Function literal node; the body runs directly in the call frame.
    fn function(&mut self, receiver: Option<&Param>, params: &[Param], body: &[Stmt]) -> VmResult<Address> {
        let mut children = vec![self.sequence(body)?];
        match receiver {
            Some(receiver) => {
                children.push(self.string(&receiver.name)?);
                children.push(self.ty(&receiver.ty)?);
            }
            None => children.extend([Address::NIL, Address::NIL]),
        }
        for param in params {
            children.push(self.string(&param.name)?);
            children.push(self.ty(&param.ty)?);
        }
        let fields = [params.len() as u64, receiver.is_some() as u64];
        self.node(Tag::FunctionLit, &fields, children)
    }

    // =========================================================================
    // Types
    // =========================================================================

    fn ty(&mut self, ty: &Type) -> VmResult<Address> {
        let simple = match ty {
            Type::Nil => Tag::TypeNil,
            Type::Bool => Tag::TypeBool,
            Type::Int32 => Tag::TypeInt32,
            Type::Float32 => Tag::TypeFloat32,
            Type::Rune => Tag::TypeRune,
            Type::String => Tag::TypeString,
            Type::Func => Tag::TypeFunction,
            Type::Mutex => Tag::TypeMutex,
            Type::WaitGroup => Tag::TypeWaitGroup,
            Type::Array(elem, len) => return self.composed(elem, |heap, e| types::array(heap, e, *len as usize)),
            Type::Slice(elem) => return self.composed(elem, types::slice),
            Type::Chan(elem) => return self.composed(elem, types::channel),
            Type::Pointer(elem) => return self.composed(elem, types::pointer),
            Type::Struct(name) => return Ok(types::named_struct(self.heap, name)?),
        };
        Ok(types::simple(self.heap, simple)?)
    }

    fn composed(
        &mut self,
        elem: &Type,
        make: impl FnOnce(&mut Heap, Address) -> RuntimeResult<Address>,
    ) -> VmResult<Address> {
        let elem = self.ty(elem)?;
        let made = make(self.heap, elem);
        self.heap.free(elem)?;
        Ok(made?)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn sequence(&mut self, body: &[Stmt]) -> VmResult<Address> {
        let statements = body.iter().map(|stmt| self.stmt(stmt)).collect::<VmResult<Vec<_>>>()?;
        self.node(Tag::Sequence, &[], statements)
    }

    /// A braced body with its own scope.
    fn block(&mut self, body: &[Stmt]) -> VmResult<Address> {
        let sequence = self.sequence(body)?;
        self.node(Tag::Block, &[], vec![sequence])
    }

    fn var(&mut self, name: &str, ty: &Type, value: Option<&Expr>) -> VmResult<Address> {
        let ty = self.ty(ty)?;
        let init = match value {
            Some(value) => self.expr(value)?,
            None => control::build_shared(self.heap, Tag::Zero, &[], &[ty])?,
        };
        let name = self.string(name)?;
        self.node(Tag::Var, &[], vec![name, ty, init])
    }

    fn stmt(&mut self, stmt: &Stmt) -> VmResult<Address> {
        match stmt {
            Stmt::Var { name, ty, value } => self.var(name, ty, value.as_ref()),
            Stmt::Assign { target, value } => {
                let target = self.address(target)?;
                let value = self.expr(value)?;
                self.node(Tag::Assign, &[], vec![target, value])
            }
            Stmt::IncDec { target, op } => {
                let target = self.address(target)?;
                let op = match op {
                    ast::PostfixOp::Inc => PostfixOp::Inc,
                    ast::PostfixOp::Dec => PostfixOp::Dec,
                };
                self.node(Tag::Postfix, &[op as u64], vec![target])
            }
            Stmt::Expr { expr } => {
                let expr = self.expr(expr)?;
                self.node(Tag::ExprStmt, &[], vec![expr])
            }
            Stmt::Block { body } => self.block(body),
            Stmt::If { cond, then, otherwise } => {
                let cond = self.expr(cond)?;
                let then = self.block(then)?;
                let otherwise = match otherwise {
                    Some(stmt) => self.stmt(stmt)?,
                    None => Address::NIL,
                };
                self.node(Tag::If, &[], vec![cond, then, otherwise])
            }
            Stmt::For { init, cond, update, body } => self.for_loop(init.as_deref(), cond.as_ref(), update.as_deref(), body),
            Stmt::Break => Ok(control::unit(self.heap, Tag::Break)?),
            Stmt::Continue => Ok(control::unit(self.heap, Tag::Continue)?),
            Stmt::Return { value } => {
                let value = self.optional(value.as_ref())?;
                self.node(Tag::Return, &[], vec![value])
            }
            Stmt::Go { callee, args } => self.call(Tag::GoCall, callee, args),
            Stmt::Send { channel, value } => {
                let channel = self.expr(channel)?;
                let value = self.expr(value)?;
                self.node(Tag::ChanSend, &[], vec![channel, value])
            }
            Stmt::Select { cases } => self.select(cases),
        }
    }

    /// A loop variable is declared by an `init` of the `i := ...` form.
    fn for_loop(&mut self, init: Option<&Stmt>, cond: Option<&Expr>, update: Option<&Stmt>, body: &[Stmt]) -> VmResult<Address> {
        let loop_var = match init {
            Some(Stmt::Var { name, .. }) => self.string(name)?,
            _ => Address::NIL,
        };
        let init = match init {
            Some(stmt) => self.stmt(stmt)?,
            None => Address::NIL,
        };
        let cond = match cond {
            Some(cond) => self.expr(cond)?,
            None => self.literal(&Literal::Bool(true))?,
        };
        let update = match update {
            Some(stmt) => self.stmt(stmt)?,
            None => Address::NIL,
        };
        let body = self.block(body)?;
        self.node(Tag::For, &[], vec![init, cond, update, body, loop_var])
    }

    fn select(&mut self, cases: &[SelectCase]) -> VmResult<Address> {
        let has_default = cases.iter().any(|case| matches!(case, SelectCase::Default { .. }));
        let mut clauses = Vec::with_capacity(cases.len());
        for case in cases {
            let clause = match case {
                SelectCase::Send { channel, value, body } => {
                    let channel = self.expr(channel)?;
                    let value = self.expr(value)?;
                    let body = self.block(body)?;
                    self.node(Tag::CaseSend, &[], vec![channel, value, body])?
                }
                SelectCase::Receive { channel, bind, body } => {
                    let channel = self.expr(channel)?;
                    let body = self.receive_body(bind, body)?;
                    self.node(Tag::CaseReceive, &[], vec![channel, body])?
                }
                SelectCase::Default { body } => {
                    let body = self.block(body)?;
                    self.node(Tag::CaseDefault, &[], vec![body])?
                }
            };
            clauses.push(clause);
        }
        self.node(Tag::Select, &[has_default as u64], clauses)
    }

    /// The received value is on the stash when a receive case's body starts.
    fn receive_body(&mut self, bind: &RecvBind, body: &[Stmt]) -> VmResult<Address> {
        match bind {
            RecvBind::Discard => {
                let pop = control::unit(self.heap, Tag::PopI)?;
                let block = self.block(body)?;
                self.node(Tag::Sequence, &[], vec![pop, block])
            }
            RecvBind::Define { name, ty } => {
                let name = self.string(name)?;
                let ty = self.ty(ty)?;
                let mut statements = vec![self.node(Tag::VarI, &[], vec![name, ty])?];
                for stmt in body {
                    statements.push(self.stmt(stmt)?);
                }
                let sequence = self.node(Tag::Sequence, &[], statements)?;
                self.node(Tag::Block, &[], vec![sequence])
            }
            RecvBind::Assign { target } => {
                let target = self.address(target)?;
                let assign = control::unit(self.heap, Tag::AssignI)?;
                let block = self.block(body)?;
                self.node(Tag::Sequence, &[], vec![target, assign, block])
            }
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn optional(&mut self, expr: Option<&Expr>) -> VmResult<Address> {
        match expr {
            Some(expr) => self.expr(expr),
            None => Ok(Address::NIL),
        }
    }

    fn exprs(&mut self, exprs: &[Expr]) -> VmResult<Vec<Address>> {
        exprs.iter().map(|expr| self.expr(expr)).collect()
    }

    fn literal(&mut self, literal: &Literal) -> VmResult<Address> {
        let value = match literal {
            Literal::Nil => Address::NIL,
            Literal::Bool(b) => primitive::new_bool(self.heap, *b)?,
            Literal::Int32(n) => primitive::new_int32(self.heap, *n)?,
            Literal::Float32(x) => primitive::new_float32(self.heap, *x)?,
            Literal::Rune(c) => primitive::new_rune(self.heap, *c)?,
            Literal::String(s) => self.string(s)?,
        };
        self.node(Tag::Literal, &[], vec![value])
    }

    fn call(&mut self, tag: Tag, callee: &Expr, args: &[Expr]) -> VmResult<Address> {
        let mut children = vec![self.expr(callee)?];
        children.extend(self.exprs(args)?);
        self.node(tag, &[args.len() as u64], children)
    }

    fn expr(&mut self, expr: &Expr) -> VmResult<Address> {
        match expr {
            Expr::Literal { value } => self.literal(value),
            Expr::Name { name } => self.name_node(Tag::Name, name),
            Expr::Unary { op, operand } => {
                let op = match op {
                    ast::UnaryOp::Neg => UnaryOp::Neg,
                    ast::UnaryOp::Not => UnaryOp::Not,
                    ast::UnaryOp::Plus => UnaryOp::Plus,
                };
                let operand = self.expr(operand)?;
                self.node(Tag::Unary, &[op as u64], vec![operand])
            }
            Expr::Binary { op, left, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                self.node(Tag::Binary, &[binary_op(*op) as u64], vec![left, right])
            }
            Expr::Call { callee, args } => self.call(Tag::Call, callee, args),
            Expr::Func { lit } => self.function(None, &lit.params, &lit.body),
            Expr::Member { object, name } => self.selector(Tag::Member, object, name),
            Expr::Method { object, name } => self.selector(Tag::MethodMember, object, name),
            Expr::Index { object, index } => {
                let object = self.expr(object)?;
                let index = self.expr(index)?;
                self.node(Tag::Index, &[], vec![object, index])
            }
            Expr::Slice { object, low, high } => {
                let fields = [low.is_some() as u64, high.is_some() as u64];
                let object = self.expr(object)?;
                let low = self.optional(low.as_deref())?;
                let high = self.optional(high.as_deref())?;
                self.node(Tag::SliceExpr, &fields, vec![object, low, high])
            }
            Expr::Make { ty, args } => {
                let mut children = vec![self.ty(ty)?];
                children.extend(self.exprs(args)?);
                self.node(Tag::Make, &[args.len() as u64], children)
            }
            Expr::Composite { ty, elems } => {
                let mut children = vec![self.ty(ty)?];
                children.extend(self.exprs(elems)?);
                self.node(Tag::Constructor, &[], children)
            }
            Expr::StructLit { name, fields } => {
                let mut children = vec![self.string(name)?];
                for (field, _) in fields {
                    children.push(self.string(field)?);
                }
                for (_, value) in fields {
                    children.push(self.expr(value)?);
                }
                self.node(Tag::StructLiteral, &[fields.len() as u64], children)
            }
            Expr::AddressOf { operand } => {
                let operand = match is_addressable(operand) {
                    true => self.address(operand)?,
                    false => self.expr(operand)?,
                };
                self.node(Tag::AddressOf, &[], vec![operand])
            }
            Expr::Deref { operand } => {
                let operand = self.expr(operand)?;
                self.node(Tag::Deref, &[], vec![operand])
            }
            Expr::Receive { channel } => {
                let channel = self.expr(channel)?;
                self.node(Tag::ChanReceive, &[], vec![channel])
            }
        }
    }

    fn selector(&mut self, tag: Tag, object: &Expr, name: &str) -> VmResult<Address> {
        let object = self.expr(object)?;
        let name = self.string(name)?;
        self.node(tag, &[], vec![object, name])
    }

    /// The variable an assignable expression denotes.
    fn address(&mut self, expr: &Expr) -> VmResult<Address> {
        match expr {
            Expr::Name { name } => self.name_node(Tag::NameAddress, name),
            Expr::Member { object, name } => self.selector(Tag::MemberAddress, object, name),
            Expr::Index { object, index } => {
                let object = self.expr(object)?;
                let index = self.expr(index)?;
                self.node(Tag::IndexAddress, &[], vec![object, index])
            }
            Expr::Deref { operand } => {
                let operand = self.expr(operand)?;
                self.node(Tag::DerefAddress, &[], vec![operand])
            }
            other => Err(VmError::NotAddressable(format!("{other:?}"))),
        }
    }
}

fn is_addressable(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Name { .. } | Expr::Member { .. } | Expr::Index { .. } | Expr::Deref { .. }
    )
}

fn binary_op(op: ast::BinaryOp) -> BinaryOp {
    match op {
        ast::BinaryOp::Add => BinaryOp::Add,
        ast::BinaryOp::Sub => BinaryOp::Sub,
        ast::BinaryOp::Mul => BinaryOp::Mul,
        ast::BinaryOp::Div => BinaryOp::Div,
        ast::BinaryOp::Rem => BinaryOp::Rem,
        ast::BinaryOp::Eq => BinaryOp::Eq,
        ast::BinaryOp::Ne => BinaryOp::Ne,
        ast::BinaryOp::Lt => BinaryOp::Lt,
        ast::BinaryOp::Le => BinaryOp::Le,
        ast::BinaryOp::Gt => BinaryOp::Gt,
        ast::BinaryOp::Ge => BinaryOp::Ge,
        ast::BinaryOp::And => BinaryOp::And,
        ast::BinaryOp::Or => BinaryOp::Or,
    }
}

/// `T` for receivers of type `T` or `*T`.
fn receiver_type_name(ty: &Type) -> Option<&str> {
    match ty {
        Type::Struct(name) => Some(name),
        Type::Pointer(inner) => match inner.as_ref() {
            Type::Struct(name) => Some(name),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gosub_ast::build::*;
    use pretty_assertions::assert_eq;

    fn globals(heap: &mut Heap) -> Address {
        frame::create(heap, Address::NIL).unwrap()
    }

    #[test]
    fn test_missing_main_is_rejected() {
        let mut heap = Heap::new(1 << 12).unwrap();
        let g = globals(&mut heap);
        let p = program(&[], vec![func("helper", vec![], None, vec![])]);
        let err = load(&mut heap, &BuiltinRegistry::standard(), g, &p).unwrap_err();
        assert_eq!(err, VmError::NoMain);
    }

    #[test]
    fn test_unknown_package_is_rejected() {
        let mut heap = Heap::new(1 << 12).unwrap();
        let g = globals(&mut heap);
        let p = program(&["os"], vec![func("main", vec![], None, vec![])]);
        let err = load(&mut heap, &BuiltinRegistry::standard(), g, &p).unwrap_err();
        assert_eq!(err, VmError::UnknownBuiltin("os".to_string()));
    }

    #[test]
    fn test_globals_hold_builtins_structs_and_methods() {
        let mut heap = Heap::new(1 << 14).unwrap();
        let g = globals(&mut heap);
        let p = program(
            &["fmt"],
            vec![
                struct_decl("Point", vec![param("x", Type::Int32)]),
                method(param("p", Type::pointer(Type::named("Point"))), "Len", vec![], None, vec![]),
                func("main", vec![], None, vec![]),
            ],
        );
        let initial = load(&mut heap, &BuiltinRegistry::standard(), g, &p).unwrap();
        assert_eq!(heap.tag(initial).unwrap(), Tag::Sequence);
        for key in ["len", "fmt.Println", "STRUCT.Point", "METHOD.Point.Len", "main"] {
            assert!(frame::lookup_str(&heap, g, key).unwrap().is_some(), "{key}");
        }
        assert!(frame::lookup_str(&heap, g, "sync.Mutex.Lock").unwrap().is_none());
        heap.free(initial).unwrap();
        heap.free(g).unwrap();
        heap.mark_and_sweep(&[]).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_non_addressable_assignment_target() {
        let mut heap = Heap::new(1 << 12).unwrap();
        let g = globals(&mut heap);
        let p = program(
            &[],
            vec![func("main", vec![], None, vec![assign(int(1), int(2))])],
        );
        let err = load(&mut heap, &BuiltinRegistry::standard(), g, &p).unwrap_err();
        assert!(matches!(err, VmError::NotAddressable(_)));
    }
}
