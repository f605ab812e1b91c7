//! Rendering of values the way `fmt.Println` prints them.

use gosub_heap::{Address, Heap};

use crate::error::RuntimeResult;
use crate::objects::{array, auto_cast, function, slice, string, structs, variable, Object};

/// Text of a value as printed by `fmt`. Composite values print their
/// elements separated by single spaces; pointers to structs print as
/// `&{...}` at the top level and as an address when nested.
pub fn display(heap: &Heap, addr: Address) -> RuntimeResult<String> {
    let mut out = String::new();
    write_value(heap, addr, false, &mut out)?;
    Ok(out)
}

fn write_value(heap: &Heap, addr: Address, nested: bool, out: &mut String) -> RuntimeResult<()> {
    match auto_cast(heap, addr)? {
        Object::Nil => out.push_str("<nil>"),
        Object::Bool(b) => out.push_str(if b { "true" } else { "false" }),
        Object::Int32(n) => out.push_str(&n.to_string()),
        Object::Float32(x) => out.push_str(&format_float(x)),
        Object::Rune(c) => out.push_str(&(c as u32).to_string()),
        Object::String(s) => out.push_str(&string::to_string(heap, s)?),
        Object::Variable(v) => write_value(heap, variable::value(heap, v)?, nested, out)?,
        Object::Array(a) => write_list(heap, &array::values(heap, a)?, out)?,
        Object::Slice(s) => write_list(heap, &slice::values(heap, s)?, out)?,
        Object::Struct(s) => {
            let vars: Vec<Address> = structs::members(heap, s)?.into_iter().map(|(_, v)| v).collect();
            out.push('{');
            write_items(heap, &vars, out)?;
            out.push('}');
        }
        Object::Pointer(p) => {
            let target = function::pointer::target(heap, p)?;
            let pointee = match auto_cast(heap, target)? {
                Object::Variable(v) => variable::value(heap, v)?,
                _ => target,
            };
            match auto_cast(heap, pointee)? {
                Object::Struct(_) if !nested => {
                    out.push('&');
                    write_value(heap, pointee, true, out)?;
                }
                _ => out.push_str(&format!("0x{:x}", target.index())),
            }
        }
        other => out.push_str(&format!("0x{:x}", match other {
            Object::Channel(a)
            | Object::Function(a)
            | Object::BoundMethod(a)
            | Object::Builtin(a)
            | Object::Mutex(a)
            | Object::Semaphore(a)
            | Object::WaitGroup(a) => a.index(),
            _ => addr.index(),
        })),
    }
    Ok(())
}

fn write_list(heap: &Heap, vars: &[Address], out: &mut String) -> RuntimeResult<()> {
    out.push('[');
    write_items(heap, vars, out)?;
    out.push(']');
    Ok(())
}

fn write_items(heap: &Heap, vars: &[Address], out: &mut String) -> RuntimeResult<()> {
    for (i, &var) in vars.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write_value(heap, var, true, out)?;
    }
    Ok(())
}

/// Shortest representation of `x`, switching to exponent form outside
/// `1e-4 <= |x| < 1e21`.
pub fn format_float(x: f32) -> String {
    if x.is_nan() {
        return "NaN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    let abs = x.abs();
    if abs == 0.0 || (1e-4..1e21).contains(&abs) {
        return x.to_string();
    }
    let text = format!("{:e}", x);
    match text.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::frame;
    use crate::objects::{primitive, types};
    use gosub_heap::Tag;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(3.0), "3");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(-0.125), "-0.125");
        assert_eq!(format_float(1e22), "1e+22");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(f32::INFINITY), "+Inf");
    }

    #[test]
    fn test_display_composites() {
        let mut heap = Heap::new(1 << 14).unwrap();
        let structs = frame::create(&mut heap, Address::NIL).unwrap();
        let int = types::simple(&mut heap, Tag::TypeInt32).unwrap();
        let s = slice::make(&mut heap, structs, int, 3, 3).unwrap();
        let one = primitive::new_int32(&mut heap, 1).unwrap();
        let slot = slice::element(&heap, s, 1).unwrap();
        variable::set_value(&mut heap, slot, one).unwrap();
        assert_eq!(display(&heap, s).unwrap(), "[0 1 0]");

        let decl = types::struct_decl(&mut heap, "P", &[("x", int), ("s", int)]).unwrap();
        let p = structs::create_zeroed(&mut heap, structs, decl).unwrap();
        assert_eq!(display(&heap, p).unwrap(), "{0 0}");
        let ptr = function::pointer::create(&mut heap, p).unwrap();
        assert_eq!(display(&heap, ptr).unwrap(), "&{0 0}");

        let r = primitive::new_rune(&mut heap, 'a').unwrap();
        assert_eq!(display(&heap, r).unwrap(), "97");
        assert_eq!(display(&heap, Address::NIL).unwrap(), "<nil>");

        for obj in [r, ptr, p, decl, one, s, int, structs] {
            heap.free(obj).unwrap();
        }
        assert!(heap.check_all_released());
    }
}
