//! Control nodes: the heap-resident form of program fragments.
//!
//! A node is a record whose tag names the construct; operator codes and
//! counts live in fields, sub-nodes and operands in children. Nodes suffixed
//! `_i` are continuations pushed mid-reduction. Layouts (F = fields,
//! C = children, `?` = may be nil):
//!
//! | tag | layout |
//! |---|---|
//! | literal | C[value] |
//! | name, name_address | C[name] |
//! | var | C[name, type, init] |
//! | var_i | C[name, type] |
//! | assign | C[target address, value] |
//! | unary, binary, postfix | F[op] C[operands...] |
//! | logical_i | F[op] C[right] |
//! | sequence | C[statements...] |
//! | block | C[body] |
//! | if | C[cond, then, else?] |
//! | if_i | C[then, else?] |
//! | for | C[init?, cond, update?, body, loop variable?] |
//! | for_i | C[cond, update?, body, marker_i, loop variable?, copy-back...] |
//! | function | F[param count, has receiver] C[body, receiver name?, receiver type?, (name, type)...] |
//! | call, go_call | F[argc] C[callee, args...] |
//! | call_i, go_call_i | F[argc] |
//! | expr_stmt | C[expr] |
//! | return | C[value?] |
//! | restore_env_i | C[frame] |
//! | member, member_address, method_member | C[object, name] |
//! | member_i, member_address_i, method_member_i | C[name] |
//! | index, index_address | C[object, index] |
//! | slice | F[has low, has high] C[object, low?, high?] |
//! | slice_i | F[has low, has high] |
//! | make | F[argc] C[type, args...] |
//! | make_i | F[argc] C[type] |
//! | zero | C[type] |
//! | constructor | C[type, elems...] |
//! | constructor_i | F[count] C[type] |
//! | struct_literal | F[count] C[decl name, (field name)..., (expr)...] |
//! | struct_literal_i | F[count] C[decl name, (field name)...] |
//! | address_of, deref, deref_address | C[operand] |
//! | chan_send | C[channel, value] |
//! | chan_receive | C[channel] |
//! | select | F[has default] C[cases...] |
//! | select_i | F[has default] C[cases...] |
//! | case_send | C[channel, value, body] |
//! | case_receive | C[channel, body] |
//! | case_default | C[body] |

use gosub_heap::{Address, Heap, Tag};
use num_enum::TryFromPrimitive;

use crate::error::{RuntimeError, RuntimeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum UnaryOp {
    Neg = 0,
    Not = 1,
    Plus = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum BinaryOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Rem = 4,
    Eq = 5,
    Ne = 6,
    Lt = 7,
    Le = 8,
    Gt = 9,
    Ge = 10,
    And = 11,
    Or = 12,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum PostfixOp {
    Inc = 0,
    Dec = 1,
}

/// Builds a node, taking ownership of `children`. On failure every child is
/// released.
pub fn build(heap: &mut Heap, tag: Tag, fields: &[u64], children: Vec<Address>) -> RuntimeResult<Address> {
    let node = match heap.allocate_object(tag, fields.len(), children.len()) {
        Ok(node) => node,
        Err(err) => {
            for child in children {
                heap.free(child)?;
            }
            return Err(err.into());
        }
    };
    for (i, &value) in fields.iter().enumerate() {
        heap.set_field(node, tag, i, value)?;
    }
    for (i, child) in children.into_iter().enumerate() {
        heap.set_child_owned(node, tag, i, child)?;
    }
    Ok(node)
}

/// Builds a node whose children are borrowed; each gains a reference.
pub fn build_shared(heap: &mut Heap, tag: Tag, fields: &[u64], children: &[Address]) -> RuntimeResult<Address> {
    let node = heap.allocate_object(tag, fields.len(), children.len())?;
    for (i, &value) in fields.iter().enumerate() {
        heap.set_field(node, tag, i, value)?;
    }
    for (i, &child) in children.iter().enumerate() {
        heap.set_child(node, tag, i, child)?;
    }
    Ok(node)
}

/// Field-free, child-free node such as `pop_i` or `exit_scope_i`.
pub fn unit(heap: &mut Heap, tag: Tag) -> RuntimeResult<Address> {
    Ok(heap.allocate_object(tag, 0, 0)?)
}

pub fn unary_op(heap: &Heap, node: Address, tag: Tag) -> RuntimeResult<UnaryOp> {
    let raw = heap.field(node, tag, 0)? as u8;
    UnaryOp::try_from(raw).map_err(|_| RuntimeError::Undefined(format!("unary operator {raw}")))
}

pub fn binary_op(heap: &Heap, node: Address, tag: Tag) -> RuntimeResult<BinaryOp> {
    let raw = heap.field(node, tag, 0)? as u8;
    BinaryOp::try_from(raw).map_err(|_| RuntimeError::Undefined(format!("binary operator {raw}")))
}

pub fn postfix_op(heap: &Heap, node: Address, tag: Tag) -> RuntimeResult<PostfixOp> {
    let raw = heap.field(node, tag, 0)? as u8;
    PostfixOp::try_from(raw).map_err(|_| RuntimeError::Undefined(format!("postfix operator {raw}")))
}

/// Short human-readable rendering, used in error messages and snapshots.
pub fn describe(heap: &Heap, node: Address) -> String {
    match heap.tag(node) {
        Ok(tag) => {
            let name = format!("{tag:?}");
            let mut out = String::with_capacity(name.len() + 2);
            for (i, c) in name.chars().enumerate() {
                if c.is_ascii_uppercase() {
                    if i > 0 {
                        out.push('_');
                    }
                    out.push(c.to_ascii_lowercase());
                } else {
                    out.push(c);
                }
            }
            out
        }
        Err(_) => format!("<released {node}>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::primitive;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_takes_children() {
        let mut heap = Heap::new(1 << 10).unwrap();
        let one = primitive::new_int32(&mut heap, 1).unwrap();
        let two = primitive::new_int32(&mut heap, 2).unwrap();
        let lit_one = build(&mut heap, Tag::Literal, &[], vec![one]).unwrap();
        let lit_two = build(&mut heap, Tag::Literal, &[], vec![two]).unwrap();
        let add = build(&mut heap, Tag::Binary, &[BinaryOp::Add as u64], vec![lit_one, lit_two]).unwrap();
        assert_eq!(binary_op(&heap, add, Tag::Binary).unwrap(), BinaryOp::Add);
        assert_eq!(heap.ref_count(lit_one).unwrap(), 1);
        assert_eq!(describe(&heap, add), "binary");

        let cont = build_shared(&mut heap, Tag::IfI, &[], &[lit_one, Address::NIL]).unwrap();
        assert_eq!(heap.ref_count(lit_one).unwrap(), 2);
        assert_eq!(describe(&heap, cont), "if_i");
        heap.free(cont).unwrap();
        heap.free(add).unwrap();
        assert!(heap.check_all_released());
    }

    #[test]
    fn test_bad_operator_code() {
        let mut heap = Heap::new(1 << 10).unwrap();
        let node = build(&mut heap, Tag::UnaryI, &[9], vec![]).unwrap();
        assert!(unary_op(&heap, node, Tag::UnaryI).is_err());
        heap.free(node).unwrap();
    }
}
