//! Channel operations and `select`.
//!
//! The blocking protocols live in the runtime; these reductions evaluate
//! operands and hand the thread over. A completed operation re-enqueues the
//! thread, a blocked one leaves it parked until a partner wakes it.

use gosub_heap::{Address, Tag};
use gosub_runtime::objects::channel;
use gosub_runtime::select::{self, Case, Outcome};

use super::{Cx, MicrocodeTable};
use crate::error::VmResult;

pub(super) fn register(table: &mut MicrocodeTable) {
    table.sequential(Tag::ChanSend, chan_send);
    table.scheduling(Tag::ChanSendI, chan_send_i);
    table.sequential(Tag::ChanReceive, chan_receive);
    table.scheduling(Tag::ChanReceiveI, chan_receive_i);
    table.sequential(Tag::Select, select_stmt);
    table.scheduling(Tag::SelectI, select_i);
}

fn chan_send(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let operands = cx.heap.children(node)?;
    cx.push_new(Tag::ChanSendI, &[], vec![])?;
    cx.push_in_order(&operands)
}

fn chan_send_i(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    let value = cx.pop_value()?;
    let ch = cx.pop_value()?;
    let sent = channel::send(cx.heap, ch, value, cx.thread, cx.scheduler);
    cx.release([value, ch])?;
    if !sent? {
        log::trace!("thread {} blocked sending on {}", cx.thread_id()?, ch);
    }
    Ok(())
}

fn chan_receive(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let ch = cx.child(node, Tag::ChanReceive, 0)?;
    cx.push_new(Tag::ChanReceiveI, &[], vec![])?;
    cx.push(ch)
}

fn chan_receive_i(cx: &mut Cx<'_>, _node: Address) -> VmResult<()> {
    let ch = cx.pop_value()?;
    let structs = cx.structs()?;
    let received = channel::recv(cx.heap, ch, cx.thread, structs, cx.scheduler);
    cx.heap.free(ch)?;
    if !received? {
        log::trace!("thread {} blocked receiving on {}", cx.thread_id()?, ch);
    }
    Ok(())
}

/// Evaluates every channel (and every value to send) in case order before
/// any communication is attempted.
fn select_stmt(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let has_default = cx.field(node, Tag::Select, 0)?;
    let cases = cx.heap.children(node)?;
    cx.push_shared(Tag::SelectI, &[has_default], &cases)?;
    for &case in cases.iter().rev() {
        match cx.heap.tag(case)? {
            Tag::CaseSend => {
                let ch = cx.child(case, Tag::CaseSend, 0)?;
                let value = cx.child(case, Tag::CaseSend, 1)?;
                cx.push_in_order(&[ch, value])?;
            }
            Tag::CaseReceive => {
                let ch = cx.child(case, Tag::CaseReceive, 0)?;
                cx.push(ch)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn select_i(cx: &mut Cx<'_>, node: Address) -> VmResult<()> {
    let has_default = cx.field(node, Tag::SelectI, 0)? != 0;
    let clauses = cx.heap.children(node)?;

    // operands come off the stash last case first
    let mut cases = Vec::with_capacity(clauses.len());
    let mut operands = Vec::new();
    let mut default_body = Address::NIL;
    for &clause in clauses.iter().rev() {
        match cx.heap.tag(clause)? {
            Tag::CaseSend => {
                let value = cx.pop_value()?;
                let ch = cx.pop_value()?;
                operands.extend([value, ch]);
                cases.push(Case::Send {
                    channel: ch,
                    value,
                    body: cx.child(clause, Tag::CaseSend, 2)?,
                });
            }
            Tag::CaseReceive => {
                let ch = cx.pop_value()?;
                operands.push(ch);
                cases.push(Case::Receive {
                    channel: ch,
                    body: cx.child(clause, Tag::CaseReceive, 1)?,
                });
            }
            _ => default_body = cx.child(clause, Tag::CaseDefault, 0)?,
        }
    }
    cases.reverse();

    let structs = cx.structs()?;
    let outcome = select::select(cx.heap, &cases, has_default, cx.thread, structs, cx.scheduler, cx.rng);
    let continued = match outcome {
        Ok(Outcome::Ready(i)) => continue_with(cx, cases[i].body()),
        Ok(Outcome::Default) => continue_with(cx, default_body),
        Ok(Outcome::Blocked) => Ok(()),
        Err(e) => Err(e.into()),
    };
    cx.release(operands)?;
    continued
}

fn continue_with(cx: &mut Cx<'_>, body: Address) -> VmResult<()> {
    if !body.is_nil() {
        cx.push(body)?;
    }
    cx.enqueue_current()
}
