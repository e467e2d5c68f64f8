//! Integration tests for the settled-signal worklist.
//!
//! The host below never re-lifts: its snapshot is the function as first lifted, which is
//! enough to chain an obfuscated return into the mirrored branch it lands on.
//!
//! ```text
//! #0  0x401000  nop
//! #1  0x401020  v2 = 0x401050
//! #2  0x401030  v1 = v2
//! #3  0x401040  ret v1                      ; [esp] == 0x401050
//! #4  0x401048  flag = (x == 0)
//! #5  0x401050  A: if (flag) then #9 else #6     ; 74 2e
//! #6  0x401052  nop
//! #7  0x401060  B: if (!flag) then #9 else #8
//! #8  0x401062  undefined
//! #9  0x401080  ret
//! ```

use crossbeam_channel::{unbounded, Sender};
use flowmend::{prelude::*, Error};
use iced_x86::Register;

const ENTRY: u64 = 0x401000;

struct Host {
    function: MemoryFunction,
    view: MemoryView,
    settled: Option<Sender<Settled>>,
    watches: usize,
    lifted: bool,
}

impl Host {
    fn new(settled: Option<Sender<Settled>>) -> Self {
        let mut bytes = vec![0x90; 0x100];
        bytes[0x50] = 0x74;
        bytes[0x51] = 0x2e;
        Self {
            function: obfuscated(),
            view: MemoryView::new(32).with_segment(ENTRY, bytes),
            settled,
            watches: 0,
            lifted: true,
        }
    }
}

impl AnalysisHost for Host {
    type Function = MemoryFunction;

    fn snapshot(&self, function: FunctionId) -> Result<MemoryFunction> {
        if self.lifted && function == self.function.id() {
            Ok(self.function.clone())
        } else {
            Err(Error::Error(format!("unknown function {function}")))
        }
    }

    fn view_mut(&mut self) -> &mut dyn BinaryView {
        &mut self.view
    }

    fn watch_settled(&mut self, function: FunctionId) {
        self.watches += 1;
        if let Some(settled) = &self.settled {
            settled.send(Settled { function }).unwrap();
        }
    }
}

fn obfuscated() -> MemoryFunction {
    let mut f = MemoryFunctionBuilder::new(ENTRY);
    let v1 = SsaVariable::new(f.variable(), 0);
    let v2 = SsaVariable::new(f.variable(), 0);
    let x = SsaVariable::new(f.variable(), 0);
    let flag = SsaVariable::new(f.variable(), 0);

    f.push(ENTRY, Operation::Nop);
    f.set_var(0x401020, v2, Expr::ConstPtr(0x401050));
    f.set_var(0x401030, v1, Expr::Var(v2));
    f.ret(0x401040, Some(Expr::Var(v1)));
    f.register_value(0x401040, Register::ESP, RegisterValue::StackFrameOffset(-4));
    f.stack_value(0x401040, -4, 4, RegisterValue::Constant(0x401050));

    f.set_var(
        0x401048,
        flag,
        Expr::compare(CmpKind::E, Expr::Var(x), Expr::Const(0)),
    );
    let a = f.branch(0x401050, Expr::Var(flag), InstrIndex(9), InstrIndex(6));
    f.push(0x401052, Operation::Nop);
    let b = f.branch(
        0x401060,
        Expr::not(Expr::Var(flag)),
        InstrIndex(9),
        InstrIndex(8),
    );
    let junk = f.push(0x401062, Operation::Undefined);
    f.ret(0x401080, None);

    let prologue = f.block(InstrIndex(0), InstrIndex(4));
    let head = f.block(InstrIndex(4), InstrIndex(6));
    let second = f.block(InstrIndex(6), InstrIndex(8));
    let junk_block = f.block(InstrIndex(8), InstrIndex(9));
    let merge = f.block(InstrIndex(9), InstrIndex(10));
    f.dominated_by(head, &[prologue]);
    f.dominated_by(second, &[prologue, head]);
    f.dominated_by(junk_block, &[prologue, head, second]);
    f.dominated_by(merge, &[prologue, head]);

    f.depends_on(junk, a, BranchDirection::FalseBranchDependent);
    f.depends_on(junk, b, BranchDirection::FalseBranchDependent);
    f.build()
}

#[test]
fn test_chain_runs_to_fixed_point() -> Result<()> {
    let (tx, rx) = unbounded();
    let mut host = Host::new(Some(tx));
    let scheduler = Scheduler::new(Engine::new(EngineConfig::x86()));
    let id = FunctionId(ENTRY);

    assert!(scheduler.enqueue(id, Some(ENTRY)));
    host.watch_settled(id);
    let summary = scheduler.run(&mut host, &rx);

    // return -> branch -> bare ret (fails) -> empty queue
    assert_eq!(
        summary,
        RunSummary {
            signals: 4,
            resolved: 2,
            failed: 1,
            drained: 1,
        }
    );
    assert_eq!(host.watches, 4);
    assert!(scheduler.is_idle());

    assert_eq!(host.view.read(0x401020, 2)?, vec![0xeb, 0x2e]);
    assert_eq!(host.view.read(0x401050, 2)?, vec![0xeb, 0x2e]);
    assert_eq!(host.view.writes(), 2);

    let events = scheduler.events();
    assert_eq!(events.count_kind(EventKind::ReturnResolved), 1);
    assert_eq!(events.count_kind(EventKind::BranchResolved), 1);
    assert_eq!(events.count_kind(EventKind::TargetQueued), 3);
    assert_eq!(events.count_kind(EventKind::QueueDrained), 1);
    assert_eq!(events.count_kind(EventKind::ResolutionFailed), 1);
    Ok(())
}

#[test]
fn test_resolved_target_not_requeued() {
    let (tx, rx) = unbounded();
    let mut host = Host::new(Some(tx));
    let scheduler = Scheduler::new(Engine::default());
    let id = FunctionId(ENTRY);

    scheduler.enqueue(id, Some(ENTRY));
    scheduler.enqueue(id, Some(0x401050));
    host.watch_settled(id);
    let summary = scheduler.run(&mut host, &rx);

    // The return's target was already queued by hand, so only the branch target is new.
    assert_eq!(summary.resolved, 2);
    assert!(scheduler.events().has(EventKind::TargetSkipped));
    assert_eq!(host.view.writes(), 2);
}

#[test]
fn test_stops_when_channel_closes() {
    let (tx, rx) = unbounded();
    let mut host = Host::new(None);
    let scheduler = Scheduler::new(Engine::default());
    let id = FunctionId(ENTRY);

    scheduler.enqueue(id, Some(ENTRY));
    tx.send(Settled { function: id }).unwrap();
    drop(tx);

    let summary = scheduler.run(&mut host, &rx);
    assert_eq!(summary.signals, 1);
    assert_eq!(summary.resolved, 1);
    assert_eq!(scheduler.pending(id), 1);
    assert!(!scheduler.is_idle());
}

#[test]
fn test_unknown_function_fails_step() {
    let mut host = Host::new(None);
    let scheduler = Scheduler::new(Engine::default());
    let other = FunctionId(0x500000);

    scheduler.enqueue(other, Some(0x500000));
    let step = scheduler.on_settled(&mut host, other);

    assert!(matches!(step, Step::Failed { address: 0x500000, .. }));
    assert_eq!(host.watches, 1);
    assert_eq!(host.view.writes(), 0);
    assert!(matches!(
        scheduler.on_settled(&mut host, other),
        Step::Drained
    ));
}

#[test]
fn test_snapshot_failure_still_terminates() {
    let (tx, rx) = unbounded();
    let mut host = Host::new(Some(tx));
    host.lifted = false;
    let scheduler = Scheduler::new(Engine::default());
    let id = FunctionId(ENTRY);

    scheduler.enqueue(id, Some(ENTRY));
    host.watch_settled(id);
    // The host keeps its sender alive, so only an empty queue can end the run.
    let summary = scheduler.run(&mut host, &rx);

    assert_eq!(
        summary,
        RunSummary {
            signals: 2,
            resolved: 0,
            failed: 1,
            drained: 1,
        }
    );
    assert_eq!(host.watches, 2);
    assert!(scheduler.is_idle());
    assert_eq!(host.view.writes(), 0);
    assert_eq!(
        scheduler.events().count_kind(EventKind::ResolutionFailed),
        1
    );
}
