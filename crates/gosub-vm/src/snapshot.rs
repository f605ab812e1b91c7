//! Per-step pictures of the runnable threads, for visualizers.

use gosub_heap::{Address, Heap, Tag};
use gosub_runtime::context::{control as control_stack, scheduler, stash as stash_stack, thread};
use gosub_runtime::env::frame;
use gosub_runtime::objects::{string, variable};
use gosub_runtime::{control, display, RuntimeResult};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Snapshot {
    /// Number of the step this picture was taken after, from 1.
    pub step: u64,
    pub threads: Vec<ThreadSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThreadSnapshot {
    pub id: u32,
    /// Pending nodes, next to run first.
    pub control: Vec<String>,
    /// Operands, top first.
    pub stash: Vec<String>,
    /// Variable bindings per frame, innermost frame first.
    pub frames: Vec<Vec<Binding>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Binding {
    pub name: String,
    pub value: String,
}

impl Snapshot {
    pub fn capture(heap: &Heap, sched: Address, step: u64) -> RuntimeResult<Self> {
        let threads = scheduler::threads(heap, sched)?
            .into_iter()
            .map(|t| ThreadSnapshot::capture(heap, t))
            .collect::<RuntimeResult<_>>()?;
        Ok(Snapshot { step, threads })
    }

    pub fn thread(&self, id: u32) -> Option<&ThreadSnapshot> {
        self.threads.iter().find(|t| t.id == id)
    }
}

impl ThreadSnapshot {
    fn capture(heap: &Heap, t: Address) -> RuntimeResult<Self> {
        let control = control_stack::values(heap, thread::control(heap, t)?)?
            .into_iter()
            .map(|node| control::describe(heap, node))
            .collect();
        let stash = stash_stack::values(heap, thread::stash(heap, t)?)?
            .into_iter()
            .map(|value| render(heap, value))
            .collect();
        let frames = frame::chain(heap, thread::frame(heap, t)?)?
            .into_iter()
            .map(|f| bindings(heap, f))
            .collect::<RuntimeResult<_>>()?;
        Ok(ThreadSnapshot {
            id: thread::id(heap, t)?,
            control,
            stash,
            frames,
        })
    }

    pub fn binding(&self, name: &str) -> Option<&str> {
        self.frames
            .iter()
            .flatten()
            .find(|b| b.name == name)
            .map(|b| b.value.as_str())
    }
}

/// Variables only; builtins and the hidden struct and method entries are
/// left out.
fn bindings(heap: &Heap, f: Address) -> RuntimeResult<Vec<Binding>> {
    let mut out = Vec::new();
    for (key, value) in frame::entries(heap, f)? {
        if heap.tag(value)? != Tag::Variable {
            continue;
        }
        let ty = variable::ty(heap, value)?;
        if !ty.is_nil() && heap.tag(ty)? == Tag::TypeBuiltin {
            continue;
        }
        out.push(Binding {
            name: string::to_string(heap, key)?,
            value: render(heap, variable::value(heap, value)?),
        });
    }
    Ok(out)
}

fn render(heap: &Heap, value: Address) -> String {
    display(heap, value).unwrap_or_else(|_| control::describe(heap, value))
}
