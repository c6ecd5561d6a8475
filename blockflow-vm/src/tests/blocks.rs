//! Per-block behavior over full loads.

use super::helpers::{desc_scalar, TestBed};
use blockflow_asm::{BlockPacket, BlockType, Fault};
use blockflow_types::{DataType, Value};
use rstest::rstest;
use test_case::test_case;

fn latch_bed(mode: u8) -> (TestBed, u16, u16, u16) {
    let mut bed = TestBed::new();
    let en = bed.en_const();
    let s = bed.scalar(DataType::B, Some(Value::B(false)));
    let r = bed.scalar(DataType::B, Some(Value::B(false)));
    let q = bed.output(DataType::B);

    bed.code(1);
    bed.block(0, BlockType::Latch, 0b111, 3, 1);
    bed.input(0, 0, DataType::B, en);
    bed.input(0, 1, DataType::B, s);
    bed.input(0, 2, DataType::B, r);
    bed.out(0, 0, DataType::B, q);
    bed.data(0, BlockType::Latch, BlockPacket::Cfg, &[mode]);
    bed.engine.verify_code().unwrap();
    (bed, s, r, q)
}

#[rstest]
#[case::set_dominant(0, [false, true, true, false, true])]
#[case::reset_dominant(1, [false, true, true, false, false])]
fn latch_follows_its_truth_table(#[case] mode: u8, #[case] expected: [bool; 5]) {
    let (mut bed, s, r, q) = latch_bed(mode);
    let inputs = [(false, false), (true, false), (false, false), (false, true), (true, true)];

    for (i, ((set, reset), want)) in inputs.iter().zip(expected).enumerate() {
        bed.set_scalar(DataType::B, s, Value::B(*set));
        bed.set_scalar(DataType::B, r, Value::B(*reset));
        bed.tick_at((i as u64 + 1) * 10, i as u64 + 1).unwrap();
        assert_eq!(bed.value(DataType::B, q), Value::B(want), "tick {i}");
        assert!(bed.updated(DataType::B, q));
    }
}

fn counter_bed(mode: u8) -> (TestBed, u16, u16) {
    let mut bed = TestBed::new();
    let ctu = bed.scalar(DataType::B, Some(Value::B(false)));
    let eno = bed.output(DataType::B);
    let val = bed.output(DataType::F32);

    bed.code(1);
    bed.block(0, BlockType::Counter, 0b000001, 6, 2);
    bed.input(0, 0, DataType::B, ctu);
    bed.out(0, 0, DataType::B, eno);
    bed.out(0, 1, DataType::F32, val);
    let mut cfg = vec![mode];
    for v in [0.0f32, 1.0, 100.0, -100.0] {
        cfg.extend_from_slice(&v.to_le_bytes());
    }
    bed.data(0, BlockType::Counter, BlockPacket::Cfg, &cfg);
    bed.engine.verify_code().unwrap();
    (bed, ctu, val)
}

#[test_case(0, 2.0 ; "edge counting fires once per rising edge")]
#[test_case(1, 4.0 ; "level counting fires every active tick")]
fn counter_modes(mode: u8, expected: f32) {
    let (mut bed, ctu, val) = counter_bed(mode);
    // CTU: 1, 1, 1, 0, 1
    for (i, high) in [true, true, true, false, true].iter().enumerate() {
        bed.set_scalar(DataType::B, ctu, Value::B(*high));
        bed.tick_at((i as u64 + 1) * 10, i as u64 + 1).unwrap();
    }
    assert_eq!(bed.value(DataType::F32, val), Value::F32(expected));
}

#[test]
fn counter_reset_returns_to_start_and_saturates() {
    let mut bed = TestBed::new();
    let ctu = bed.scalar(DataType::B, Some(Value::B(true)));
    let reset = bed.scalar(DataType::B, Some(Value::B(false)));
    let eno = bed.output(DataType::B);
    let val = bed.output(DataType::F32);

    bed.code(1);
    bed.block(0, BlockType::Counter, 0b000101, 6, 2);
    bed.input(0, 0, DataType::B, ctu);
    bed.input(0, 2, DataType::B, reset);
    bed.out(0, 0, DataType::B, eno);
    bed.out(0, 1, DataType::F32, val);
    let mut cfg = vec![1u8]; // level counting
    for v in [5.0f32, 4.0, 10.0, 0.0] {
        cfg.extend_from_slice(&v.to_le_bytes());
    }
    bed.data(0, BlockType::Counter, BlockPacket::Cfg, &cfg);
    bed.engine.verify_code().unwrap();

    bed.run(3); // 5 + 4 -> 9 -> saturates at 10
    assert_eq!(bed.value(DataType::F32, val), Value::F32(10.0));

    bed.set_scalar(DataType::B, reset, Value::B(true));
    bed.tick_at(40, 4).unwrap();
    assert_eq!(bed.value(DataType::F32, val), Value::F32(5.0));
}

#[test]
fn clock_gates_on_width_within_period() {
    let mut bed = TestBed::new();
    let en = bed.scalar(DataType::B, Some(Value::B(false)));
    let q = bed.output(DataType::B);

    bed.code(1);
    bed.block(0, BlockType::Clock, 0b001, 3, 1);
    bed.input(0, 0, DataType::B, en);
    bed.out(0, 0, DataType::B, q);
    let mut cfg = Vec::new();
    cfg.extend_from_slice(&40.0f32.to_le_bytes());
    cfg.extend_from_slice(&20.0f32.to_le_bytes());
    bed.data(0, BlockType::Clock, BlockPacket::Cfg, &cfg);
    bed.engine.verify_code().unwrap();

    bed.tick_at(10, 1).unwrap();
    assert_eq!(bed.value(DataType::B, q), Value::B(false));

    bed.set_scalar(DataType::B, en, Value::B(true));
    let mut states = Vec::new();
    for i in 0..8 {
        bed.tick_at(20 + i * 10, 2 + i).unwrap();
        states.push(bed.value(DataType::B, q) == Value::B(true));
    }
    // phase 0,10 high; 20,30 low; repeating
    assert_eq!(states, [true, true, false, false, true, true, false, false]);

    bed.set_scalar(DataType::B, en, Value::B(false));
    bed.tick_at(100, 10).unwrap();
    assert_eq!(bed.value(DataType::B, q), Value::B(false));
}

fn timer_bed(kind: u8, invert: bool, preset_ms: u32) -> (TestBed, u16, u16, u16) {
    let mut bed = TestBed::new();
    let en = bed.scalar(DataType::B, Some(Value::B(false)));
    let q = bed.output(DataType::B);
    let elapsed = bed.output(DataType::U32);

    bed.code(1);
    bed.block(0, BlockType::Timer, 0b001, 3, 2);
    bed.input(0, 0, DataType::B, en);
    bed.out(0, 0, DataType::B, q);
    bed.out(0, 1, DataType::U32, elapsed);
    let mut cfg = vec![kind, invert as u8];
    cfg.extend_from_slice(&preset_ms.to_le_bytes());
    bed.data(0, BlockType::Timer, BlockPacket::Cfg, &cfg);
    bed.engine.verify_code().unwrap();
    (bed, en, q, elapsed)
}

#[rstest]
#[case::ton(
    1, false, 35,
    [true, true, true, true, false, true, true, true],
    [false, false, false, true, false, false, false, false]
)]
#[case::ton_inverted(
    1, true, 35,
    [true, true, true, true, false, true, true, true],
    [true, true, true, false, true, true, true, true]
)]
#[case::tof(
    2, false, 20,
    [true, true, false, false, false, false, false, false],
    [true, true, true, false, false, false, false, false]
)]
#[case::tp_non_retriggerable(
    3, false, 20,
    [true, true, true, true, true, true, true, true],
    [true, true, false, false, false, false, false, false]
)]
fn timer_kinds(
    #[case] kind: u8,
    #[case] invert: bool,
    #[case] preset: u32,
    #[case] en_seq: [bool; 8],
    #[case] q_seq: [bool; 8],
) {
    let (mut bed, en, q, elapsed) = timer_bed(kind, invert, preset);
    for (i, (high, want)) in en_seq.iter().zip(q_seq).enumerate() {
        bed.set_scalar(DataType::B, en, Value::B(*high));
        bed.tick_at((i as u64 + 1) * 10, i as u64 + 1).unwrap();
        assert_eq!(bed.value(DataType::B, q), Value::B(want), "tick {i}");
    }
    if kind == 1 && !invert {
        // after the last three enabled ticks the on-delay has 30 ms banked
        assert_eq!(bed.value(DataType::U32, elapsed), Value::U32(30));
    }
}

#[test]
fn timer_elapsed_reaches_preset_when_q_rises() {
    let (mut bed, en, q, elapsed) = timer_bed(1, false, 35);
    bed.set_scalar(DataType::B, en, Value::B(true));
    bed.run(4);
    assert_eq!(bed.value(DataType::B, q), Value::B(true));
    assert_eq!(bed.value(DataType::U32, elapsed), Value::U32(40));
}

#[test]
fn in_selector_mirrors_chosen_option() {
    let mut bed = TestBed::new();
    let en = bed.en_const();
    let sel = bed.scalar(DataType::U8, Some(Value::U8(0)));
    let opt_a = bed.scalar(DataType::U8, Some(Value::U8(10)));
    let opt_b = bed.scalar(DataType::U8, Some(Value::U8(20)));
    let out = bed.output(DataType::U8);

    bed.code(1);
    bed.block(0, BlockType::InSelector, 0b1111, 4, 1);
    bed.input(0, 0, DataType::B, en);
    bed.input(0, 1, DataType::U8, sel);
    bed.input(0, 2, DataType::U8, opt_a);
    // option slot 1 delivered through the option-packet path
    bed.data(
        0,
        BlockType::InSelector,
        BlockPacket::OptionSlot(1),
        &desc_scalar(DataType::U8, opt_b),
    );
    bed.out(0, 0, DataType::U8, out);
    bed.engine.verify_code().unwrap();

    bed.tick_at(10, 1).unwrap();
    assert_eq!(bed.value(DataType::U8, out), Value::U8(10));

    bed.set_scalar(DataType::U8, sel, Value::U8(1));
    bed.tick_at(20, 2).unwrap();
    assert_eq!(bed.value(DataType::U8, out), Value::U8(20));
    assert!(bed.updated(DataType::U8, out));

    // out-of-range selection is reported but does not abort the tick
    bed.set_scalar(DataType::U8, sel, Value::U8(7));
    bed.tick_at(30, 3).unwrap();
    assert!(bed
        .engine
        .logs()
        .records()
        .any(|r| r.code == Fault::BlockSelectorOob.code()));
}

#[test]
fn q_selector_drives_exactly_one_output() {
    let mut bed = TestBed::new();
    let en = bed.scalar(DataType::B, Some(Value::B(true)));
    let sel = bed.scalar(DataType::U8, Some(Value::U8(1)));
    let q0 = bed.output(DataType::B);
    let q1 = bed.output(DataType::B);
    let q2 = bed.output(DataType::B);

    bed.code(1);
    bed.block(0, BlockType::QSelector, 0b11, 2, 3);
    bed.input(0, 0, DataType::B, en);
    bed.input(0, 1, DataType::U8, sel);
    bed.out(0, 0, DataType::B, q0);
    bed.out(0, 1, DataType::B, q1);
    bed.out(0, 2, DataType::B, q2);
    bed.engine.verify_code().unwrap();

    bed.tick_at(10, 1).unwrap();
    assert_eq!(bed.value(DataType::B, q1), Value::B(true));
    assert!(bed.updated(DataType::B, q1));
    assert_eq!(bed.value(DataType::B, q0), Value::B(false));
    assert!(!bed.updated(DataType::B, q0));

    // EN low clears everything
    bed.set_scalar(DataType::B, en, Value::B(false));
    bed.tick_at(20, 2).unwrap();
    assert_eq!(bed.value(DataType::B, q1), Value::B(false));
    assert!(!bed.updated(DataType::B, q1));
}

#[test_case(&[0x0a] ; "unknown math opcode")]
#[test_case(&[0x20] ; "logic opcode in math program")]
fn math_verify_rejects_foreign_opcodes(op: &[u8]) {
    let mut bed = TestBed::new();
    let en = bed.en_const();
    let eno = bed.output(DataType::B);
    let res = bed.output(DataType::F32);

    bed.code(1);
    bed.block(0, BlockType::Math, 0b1, 1, 2);
    bed.input(0, 0, DataType::B, en);
    bed.out(0, 0, DataType::B, eno);
    bed.out(0, 1, DataType::F32, res);
    bed.data(0, BlockType::Math, BlockPacket::Instructions, &[1, op[0], 0]);

    let err = bed.engine.verify_code().unwrap_err();
    assert!(matches!(err.fault, Fault::InvalidData | Fault::BlockInvalidParam));
}

#[test]
fn math_div_by_zero_is_logged_but_does_not_abort() {
    let mut bed = TestBed::new();
    let en = bed.en_const();
    let zero = bed.scalar(DataType::F32, Some(Value::F32(0.0)));
    let eno = bed.output(DataType::B);
    let res = bed.output(DataType::F32);

    bed.code(1);
    bed.block(0, BlockType::Math, 0b11, 2, 2);
    bed.input(0, 0, DataType::B, en);
    bed.input(0, 1, DataType::F32, zero);
    bed.out(0, 0, DataType::B, eno);
    bed.out(0, 1, DataType::F32, res);
    bed.data(0, BlockType::Math, BlockPacket::Constants, &super::helpers::constants(&[1.0]));
    bed.data(
        0,
        BlockType::Math,
        BlockPacket::Instructions,
        &super::helpers::instructions(&[
            (blockflow_asm::Op::Const, 0),
            (blockflow_asm::Op::Var, 1),
            (blockflow_asm::Op::Div, 0),
        ]),
    );
    bed.engine.verify_code().unwrap();

    // the divide fails, the tick survives, the outputs stay idle
    bed.tick_at(10, 1).unwrap();
    assert!(!bed.updated(DataType::F32, res));
    assert!(bed
        .engine
        .logs()
        .records()
        .any(|r| r.code == Fault::BlockDivByZero.code()));
}
