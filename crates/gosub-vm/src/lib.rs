//! Explicit control evaluator for the gosub Go subset.
//!
//! A checked [`Program`](gosub_ast::Program) is lowered by the [`loader`]
//! into control nodes on the record heap and reduced step by step by the
//! [`Vm`]. Goroutines are heap threads interleaved by a round-robin
//! scheduler; channels, `select`, `sync.Mutex` and `sync.WaitGroup` park and
//! wake them.
//!
//! ```
//! use gosub_ast::build::*;
//! use gosub_ast::Type;
//! use gosub_vm::{run, Config};
//!
//! let program = program(
//!     &["fmt"],
//!     vec![func("main", vec![], None, vec![
//!         define("ch", Type::chan(Type::Int32), make(Type::chan(Type::Int32), vec![])),
//!         go(func_lit(vec![], None, vec![send(name("ch"), int(42))]), vec![]),
//!         expr(call_builtin("fmt.Println", vec![recv(name("ch"))])),
//!     ])],
//! );
//! assert_eq!(run(&program, Config::default()).unwrap(), "42\n");
//! ```

pub mod builtins;
pub mod config;
pub mod error;
pub mod loader;
pub mod microcode;
pub mod output;
pub mod snapshot;
pub mod vm;

pub use builtins::{BuiltinRegistry, Flow};
pub use config::Config;
pub use error::{VmError, VmResult};
pub use output::{CapturedOutput, OutputSink};
pub use snapshot::{Binding, Snapshot, ThreadSnapshot};
pub use vm::Vm;

/// Runs `program` to completion and returns what it printed. Errors carry
/// the message a Go runtime would report.
pub fn run(program: &gosub_ast::Program, config: Config) -> Result<String, String> {
    let mut vm = Vm::new(config).map_err(|e| e.to_string())?;
    let result = vm.load(program).and_then(|()| vm.run());
    let released = vm.teardown();
    result.and(released).map_err(|e| e.to_string())?;
    Ok(vm.into_output().into_string())
}
