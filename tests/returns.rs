//! Integration tests for obfuscated return resolution.
//!
//! Each test lifts a protector-style `push target; ret` sequence by hand with
//! `MemoryFunctionBuilder` and runs the engine against a `MemoryView` of the code.

use flowmend::{prelude::*, Error};
use iced_x86::Register;

const ENTRY: u64 = 0x401000;
const ROOT: u64 = 0x401020;
const COPY: u64 = 0x401030;
const RET: u64 = 0x401040;
const TARGET: u64 = 0x401050;

fn code() -> MemoryView {
    MemoryView::new(32).with_segment(ENTRY, vec![0x90; 0x100])
}

/// entry: nop
/// 0x401020: v2 = 0x401050
/// 0x401030: v1 = v2
/// 0x401040: ret v1          ; [esp] == 0x401050
fn obfuscated_return() -> MemoryFunction {
    let mut f = MemoryFunctionBuilder::new(ENTRY);
    let v1 = SsaVariable::new(f.variable(), 0);
    let v2 = SsaVariable::new(f.variable(), 0);
    f.push(ENTRY, Operation::Nop);
    f.set_var(ROOT, v2, Expr::ConstPtr(TARGET));
    f.set_var(COPY, v1, Expr::Var(v2));
    f.ret(RET, Some(Expr::Var(v1)));
    f.register_value(RET, Register::ESP, RegisterValue::StackFrameOffset(-4));
    f.stack_value(RET, -4, 4, RegisterValue::Constant(TARGET));
    f.build()
}

#[test]
fn test_return_replaced_by_jump() -> Result<()> {
    let function = obfuscated_return();
    let mut view = code();
    let engine = Engine::new(EngineConfig::x86());

    let target = engine.resolve_at(&function, &mut view, &X86Assembler::new(32), ENTRY)?;

    assert_eq!(target, TARGET);
    assert_eq!(view.read(ROOT, 2)?, vec![0xeb, 0x2e]);
    assert_eq!(view.read(ROOT + 2, 1)?, vec![0x90]);
    assert_eq!(view.writes(), 1);

    let events = engine.events();
    assert_eq!(events.count_kind(EventKind::ReturnResolved), 1);
    assert_eq!(events.count_kind(EventKind::PatchApplied), 1);
    assert!(!events.has(EventKind::ResolutionFailed));
    Ok(())
}

#[test]
fn test_patch_lands_on_chain_root() -> Result<()> {
    // An unrelated constant before the chain must not be picked, and intermediate
    // arithmetic on the chain is walked through.
    let mut f = MemoryFunctionBuilder::new(ENTRY);
    let unrelated = SsaVariable::new(f.variable(), 0);
    let v1 = SsaVariable::new(f.variable(), 0);
    let v2 = SsaVariable::new(f.variable(), 0);
    let v3 = SsaVariable::new(f.variable(), 0);
    f.set_var(0x401010, unrelated, Expr::ConstPtr(TARGET));
    f.set_var(0x401018, v3, Expr::Const(TARGET - 4));
    f.set_var(
        0x401020,
        v2,
        Expr::binary(BinaryOp::Add, Expr::Var(v3), Expr::Const(4)),
    );
    f.set_var(COPY, v1, Expr::Var(v2));
    f.ret(RET, Some(Expr::Var(v1)));
    f.register_value(RET, Register::ESP, RegisterValue::StackFrameOffset(-8));
    f.stack_value(RET, -8, 4, RegisterValue::Constant(TARGET));
    let function = f.build();

    let mut view = code();
    let engine = Engine::default();
    let target = engine.resolve_at(&function, &mut view, &X86Assembler::new(32), 0x401018)?;

    assert_eq!(target, TARGET);
    // jmp 0x401050 from 0x401018
    assert_eq!(view.read(0x401018, 2)?, vec![0xeb, 0x36]);
    assert_eq!(view.read(0x401010, 2)?, vec![0x90, 0x90]);
    Ok(())
}

#[test]
fn test_one_byte_short_writes_nothing() {
    let mut f = MemoryFunctionBuilder::new(ROOT);
    let v1 = SsaVariable::new(f.variable(), 0);
    let v2 = SsaVariable::new(f.variable(), 0);
    f.set_var(ROOT, v2, Expr::ConstPtr(TARGET));
    f.set_var(ROOT, v1, Expr::Var(v2));
    f.ret(ROOT + 1, Some(Expr::Var(v1)));
    f.register_value(ROOT + 1, Register::ESP, RegisterValue::StackFrameOffset(-4));
    f.stack_value(ROOT + 1, -4, 4, RegisterValue::Constant(TARGET));
    let function = f.build();

    let mut view = code();
    let engine = Engine::default();
    let result = engine.resolve_at(&function, &mut view, &X86Assembler::new(32), ROOT);

    assert!(matches!(
        result,
        Err(Error::InsufficientSpace {
            address: ROOT,
            needed: 2,
            available: 1
        })
    ));
    assert_eq!(view.writes(), 0);
    assert_eq!(engine.events().count_kind(EventKind::ResolutionFailed), 1);
    assert!(!engine.events().has(EventKind::PatchApplied));
}

#[test]
fn test_unknown_stack_slot() {
    let mut f = MemoryFunctionBuilder::new(ENTRY);
    let v = SsaVariable::new(f.variable(), 0);
    f.set_var(ROOT, v, Expr::ConstPtr(TARGET));
    f.ret(RET, Some(Expr::Var(v)));
    f.register_value(RET, Register::ESP, RegisterValue::StackFrameOffset(-4));
    let function = f.build();

    let mut view = code();
    let result = Engine::default().resolve_at(&function, &mut view, &X86Assembler::new(32), ROOT);

    assert!(matches!(result, Err(Error::UnresolvableValue(_))));
    assert_eq!(view.writes(), 0);
}

#[test]
fn test_patched_site_reaches_fixed_point() -> Result<()> {
    let mut function = obfuscated_return();
    let mut view = code();
    let engine = Engine::default();
    let assembler = X86Assembler::new(32);

    engine.resolve_at(&function, &mut view, &assembler, ENTRY)?;

    // The host re-lifts the patched root as a direct jump.
    assert!(function.set_operation(InstrIndex(1), Operation::Goto { target: InstrIndex(3) }));

    let again = engine.resolve_at(&function, &mut view, &assembler, ENTRY);
    assert!(matches!(again, Err(Error::PatternMismatch { .. })));
    assert_eq!(view.writes(), 1);
    Ok(())
}

#[test]
fn test_return_resolution_x64() -> Result<()> {
    let base = 0x1_4000_1000;
    let mut f = MemoryFunctionBuilder::new(base);
    let v = SsaVariable::new(f.variable(), 0);
    f.set_var(base + 0x20, v, Expr::ConstPtr(base + 0x50));
    f.ret(base + 0x40, Some(Expr::Var(v)));
    f.register_value(base + 0x40, Register::RSP, RegisterValue::StackFrameOffset(-8));
    f.stack_value(base + 0x40, -8, 8, RegisterValue::Constant(base + 0x50));
    let function = f.build();

    let mut view = MemoryView::new(64).with_segment(base, vec![0x90; 0x100]);
    let engine = Engine::new(EngineConfig::x64());
    let assembler = engine.config().assembler();

    let target = engine.resolve_at(&function, &mut view, &assembler, base + 0x20)?;
    assert_eq!(target, base + 0x50);
    assert_eq!(view.read(base + 0x20, 2)?, vec![0xeb, 0x2e]);
    Ok(())
}

#[test]
fn test_disabled_return_resolution() {
    let function = obfuscated_return();
    let mut view = code();
    let engine = Engine::new(EngineConfig {
        enable_return_resolution: false,
        ..EngineConfig::default()
    });

    let result = engine.resolve_at(&function, &mut view, &X86Assembler::new(32), ENTRY);
    assert!(matches!(result, Err(Error::PatternMismatch { .. })));
    assert_eq!(view.writes(), 0);
}
