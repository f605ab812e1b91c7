//! Native functions callable from programs.
//!
//! Builtins are registered by qualified name: `len` for the universe block,
//! `fmt.Println` for package members and `sync.Mutex.Lock` for the methods of
//! the `sync` primitives. The loader binds every universe and imported
//! package name; method names are reached through method values only.

use gosub_heap::Address;
use hashbrown::HashMap;

use crate::error::VmResult;
use crate::microcode::Cx;

pub mod default;
pub mod fmt;
pub mod sync;

/// What a builtin did with the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// The call finished with this value (owned; nil for no result). The
    /// thread continues.
    Return(Address),
    /// The builtin has already left a result on the stash and scheduled or
    /// parked the thread itself.
    Yield,
}

/// Arguments are borrowed.
pub type BuiltinFn = fn(&mut Cx<'_>, &[Address]) -> VmResult<Flow>;

/// Packages a program may import.
pub const PACKAGES: &[&str] = &["fmt", "sync"];

#[derive(Clone)]
pub struct BuiltinRegistry {
    natives: HashMap<&'static str, BuiltinFn>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        BuiltinRegistry {
            natives: HashMap::new(),
        }
    }

    /// Registry with every standard builtin.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        default::register(&mut registry);
        fmt::register(&mut registry);
        sync::register(&mut registry);
        registry
    }

    pub fn register(&mut self, name: &'static str, native: BuiltinFn) {
        self.natives.insert(name, native);
    }

    pub fn get(&self, name: &str) -> Option<BuiltinFn> {
        self.natives.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.natives.contains_key(name)
    }

    pub fn is_package(&self, name: &str) -> bool {
        PACKAGES.contains(&name)
    }

    /// Names a program sees for `package`, sorted; the empty package is the
    /// universe block. Methods are not exported.
    pub fn exports(&self, package: &str) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .natives
            .keys()
            .copied()
            .filter(|name| match name.split_once('.') {
                None => package.is_empty(),
                Some((pkg, member)) => pkg == package && !member.contains('.'),
            })
            .collect();
        names.sort_unstable();
        names
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Fails unless exactly `expected` arguments were passed.
pub(crate) fn check_arity(args: &[Address], expected: usize) -> VmResult<()> {
    if args.len() != expected {
        return Err(crate::error::VmError::ArityMismatch {
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exports_by_package() {
        let registry = BuiltinRegistry::standard();
        assert_eq!(registry.exports(""), vec!["append", "cap", "close", "len"]);
        assert_eq!(registry.exports("fmt"), vec!["fmt.Print", "fmt.Println", "fmt.Sprint"]);
        assert!(registry.exports("sync").is_empty());
        assert!(registry.contains("sync.WaitGroup.Done"));
        assert!(registry.get("os.Exit").is_none());
        assert!(registry.is_package("sync"));
        assert!(!registry.is_package("os"));
    }
}
