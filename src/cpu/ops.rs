//! Instruction bodies, dispatched from [`super::Cpu::cycle`]'s decode step.
//!
//! Function shape (`fn(cpu, mode, operand) -> ...`) follows the teacher's
//! `cpu_6502/opcodes_{logical,jump,move}.rs`, collapsed onto the single
//! [`Operation`] tag from `opcode.rs` instead of one function per mnemonic
//! registered in a 256-entry table.

use super::opcode::{Mode, Operation};
use super::{Cpu, StatusFlag};
use crate::constants::InterruptVector;
use crate::error::CpuFault;

type Operand = Option<(u16, bool)>;

pub fn execute(cpu: &mut Cpu, operation: Operation, mode: Mode, operand: Operand) -> Result<(), CpuFault> {
    use Operation::*;
    match operation {
        ADC => adc(cpu, mode, operand),
        AND => {
            let m = cpu.read_operand(mode, operand);
            cpu.a = cpu.setzn((cpu.a & m) as u16);
        }
        ASL => rotate(cpu, mode, operand, Shift::Left, false),
        LSR => rotate(cpu, mode, operand, Shift::Right, false),
        ROL => rotate(cpu, mode, operand, Shift::Left, true),
        ROR => rotate(cpu, mode, operand, Shift::Right, true),

        BCC => branch(cpu, operand, !cpu.get_flag(StatusFlag::Carry)),
        BCS => branch(cpu, operand, cpu.get_flag(StatusFlag::Carry)),
        BEQ => branch(cpu, operand, cpu.get_flag(StatusFlag::Zero)),
        BNE => branch(cpu, operand, !cpu.get_flag(StatusFlag::Zero)),
        BMI => branch(cpu, operand, cpu.get_flag(StatusFlag::Negative)),
        BPL => branch(cpu, operand, !cpu.get_flag(StatusFlag::Negative)),
        BVC => branch(cpu, operand, !cpu.get_flag(StatusFlag::Overflow)),
        BVS => branch(cpu, operand, cpu.get_flag(StatusFlag::Overflow)),

        BIT => {
            let m = cpu.read_operand(mode, operand);
            cpu.set_flag(StatusFlag::Overflow, m & 0x40 != 0);
            cpu.set_flag(StatusFlag::Negative, m & 0x80 != 0);
            cpu.set_flag(StatusFlag::Zero, (cpu.a & m) == 0);
        }

        BRK => {
            // BRK is a 2-byte instruction; the decode step only consumed the
            // opcode byte (it carries `Mode::Implied`), so the padding byte
            // is skipped here before the return address is pushed.
            cpu.pc = cpu.pc.wrapping_add(1);
            cpu.push_u16(cpu.pc);
            let pushed_p = cpu.p | StatusFlag::Unused as u8 | StatusFlag::Break as u8;
            cpu.push_u8(pushed_p);
            cpu.set_flag(StatusFlag::InterruptDisable, true);
            cpu.pc = cpu.bus.borrow().read_u16(InterruptVector::IrqBrk.address());
        }

        CLC => cpu.set_flag(StatusFlag::Carry, false),
        CLD => cpu.set_flag(StatusFlag::Decimal, false),
        CLI => cpu.set_flag(StatusFlag::InterruptDisable, false),
        CLV => cpu.set_flag(StatusFlag::Overflow, false),
        SEC => cpu.set_flag(StatusFlag::Carry, true),
        SED => cpu.set_flag(StatusFlag::Decimal, true),
        SEI => cpu.set_flag(StatusFlag::InterruptDisable, true),

        CMP => {
            let m = cpu.read_operand(mode, operand);
            cpu.compare(cpu.a, m);
        }
        CPX => {
            let m = cpu.read_operand(mode, operand);
            cpu.compare(cpu.x, m);
        }
        CPY => {
            let m = cpu.read_operand(mode, operand);
            cpu.compare(cpu.y, m);
        }

        DEC => {
            let m = cpu.read_operand(mode, operand);
            let result = cpu.setzn(m.wrapping_sub(1) as u16);
            cpu.write_operand(mode, operand, result);
        }
        INC => {
            let m = cpu.read_operand(mode, operand);
            let result = cpu.setzn(m.wrapping_add(1) as u16);
            cpu.write_operand(mode, operand, result);
        }
        DEX => cpu.x = cpu.setzn(cpu.x.wrapping_sub(1) as u16),
        DEY => cpu.y = cpu.setzn(cpu.y.wrapping_sub(1) as u16),
        INX => cpu.x = cpu.setzn(cpu.x.wrapping_add(1) as u16),
        INY => cpu.y = cpu.setzn(cpu.y.wrapping_add(1) as u16),

        EOR => {
            let m = cpu.read_operand(mode, operand);
            cpu.a = cpu.setzn((cpu.a ^ m) as u16);
        }
        ORA => {
            let m = cpu.read_operand(mode, operand);
            cpu.a = cpu.setzn((cpu.a | m) as u16);
        }

        JMP => {
            cpu.pc = operand.expect("JMP always has an address").0;
        }
        JSR => {
            let target = operand.expect("JSR always has an address").0;
            cpu.push_u16(cpu.pc.wrapping_sub(1));
            cpu.pc = target;
        }
        RTS => {
            let return_address = cpu.pop_u16();
            cpu.pc = return_address.wrapping_add(1);
        }
        RTI => {
            let pulled_p = cpu.pop_u8();
            cpu.p = pulled_p;
            cpu.set_flag(StatusFlag::Unused, true);
            cpu.pc = cpu.pop_u16();
        }

        LDA => cpu.a = cpu.setzn(cpu.read_operand(mode, operand) as u16),
        LDX => cpu.x = cpu.setzn(cpu.read_operand(mode, operand) as u16),
        LDY => cpu.y = cpu.setzn(cpu.read_operand(mode, operand) as u16),
        STA => cpu.write_operand(mode, operand, cpu.a),
        STX => cpu.write_operand(mode, operand, cpu.x),
        STY => cpu.write_operand(mode, operand, cpu.y),

        NOP => {}

        PHA => cpu.push_u8(cpu.a),
        PHP => {
            let pushed_p = cpu.p | StatusFlag::Unused as u8 | StatusFlag::Break as u8;
            cpu.push_u8(pushed_p);
        }
        PLA => cpu.a = cpu.setzn(cpu.pop_u8() as u16),
        PLP => {
            let pulled = cpu.pop_u8();
            cpu.p = pulled;
            cpu.set_flag(StatusFlag::Unused, true);
        }

        SBC => sbc(cpu, mode, operand),

        TAX => cpu.x = cpu.setzn(cpu.a as u16),
        TAY => cpu.y = cpu.setzn(cpu.a as u16),
        TSX => cpu.x = cpu.setzn(cpu.sp as u16),
        TXA => cpu.a = cpu.setzn(cpu.x as u16),
        TXS => cpu.sp = cpu.x,
        TYA => cpu.a = cpu.setzn(cpu.y as u16),

        JAM => unreachable!("JAM is handled in Cpu::cycle before dispatch"),
    }
    Ok(())
}

/// `(PC + sign-extended operand) mod 0x10000`, per spec.md §4.2's addressing
/// table; `+1` cycle if taken, `+2` if the target crosses a page.
fn branch(cpu: &mut Cpu, operand: Operand, taken: bool) {
    if !taken {
        return;
    }
    let (target, crossed) = operand.expect("branch always has a target");
    cpu.pc = target;
    cpu.cycles_remaining += if crossed { 2 } else { 1 };
}

/// Binary-mode: `r = A + M + C`; BCD mode: nibble-wise addition with
/// decimal correction, per spec.md §4.2.
fn adc(cpu: &mut Cpu, mode: Mode, operand: Operand) {
    let m = cpu.read_operand(mode, operand);
    if cpu.get_flag(StatusFlag::Decimal) {
        adc_decimal(cpu, m);
    } else {
        adc_binary(cpu, m);
    }
}

fn adc_binary(cpu: &mut Cpu, m: u8) {
    let c = cpu.get_flag(StatusFlag::Carry) as u16;
    let r = cpu.a as u16 + m as u16 + c;
    cpu.set_flag(StatusFlag::Carry, r > 0xFF);
    let v = ((cpu.a as u16 ^ r) & (m as u16 ^ r) & 0x80) != 0;
    cpu.set_flag(StatusFlag::Overflow, v);
    cpu.a = cpu.setzn(r);
}

fn adc_decimal(cpu: &mut Cpu, m: u8) {
    let a = cpu.a;
    let carry_in = cpu.get_flag(StatusFlag::Carry) as u16;

    let mut lo = (a & 0x0F) as u16 + (m & 0x0F) as u16 + carry_in;
    let mut hi = (a >> 4) as u16 + (m >> 4) as u16;
    if lo > 9 {
        lo += 6;
    }
    if lo > 0x0F {
        hi += 1;
    }

    let bin_sum = a as u16 + m as u16 + carry_in;
    let v = ((a as u16 ^ bin_sum) & (m as u16 ^ bin_sum) & 0x80) != 0;

    let carry_out = hi > 9;
    if carry_out {
        hi += 6;
    }

    let result = (((hi & 0x0F) << 4) | (lo & 0x0F)) as u8;
    cpu.set_flag(StatusFlag::Carry, carry_out);
    cpu.set_flag(StatusFlag::Overflow, v);
    cpu.a = cpu.setzn(result as u16);
}

/// Binary-mode SBC is ADC with the operand inverted, per spec.md §4.2.
/// BCD mode performs nibble-wise subtraction with a 6-subtract correction
/// on half-borrows.
fn sbc(cpu: &mut Cpu, mode: Mode, operand: Operand) {
    let m = cpu.read_operand(mode, operand);
    if cpu.get_flag(StatusFlag::Decimal) {
        sbc_decimal(cpu, m);
    } else {
        adc_binary(cpu, !m);
    }
}

fn sbc_decimal(cpu: &mut Cpu, m: u8) {
    let a = cpu.a;
    let carry_in = cpu.get_flag(StatusFlag::Carry) as i16;
    let inverted = !m;

    // Carry/Overflow/Zero/Negative mirror the binary computation ADC(m^0xFF)
    // would produce; only the stored result differs (decimal correction).
    let bin_sum = a as u16 + inverted as u16 + carry_in as u16;
    let carry_out = bin_sum > 0xFF;
    let v = ((a as u16 ^ bin_sum) & (inverted as u16 ^ bin_sum) & 0x80) != 0;

    // Canonical 6502 decimal SBC: low-nibble subtract-with-borrow, 6-subtract
    // correction on a negative low nibble, then a 0x60 correction if the
    // combined result is still negative.
    let a16 = a as i16;
    let m16 = m as i16;
    let mut lo = (a16 & 0x0F) - (m16 & 0x0F) + carry_in - 1;
    if lo < 0 {
        lo = ((lo - 6) & 0x0F) - 0x10;
    }
    let mut full = (a16 & 0xF0) - (m16 & 0xF0) + lo;
    if full < 0 {
        full -= 0x60;
    }
    let result = (full & 0xFF) as u8;

    cpu.set_flag(StatusFlag::Carry, carry_out);
    cpu.set_flag(StatusFlag::Overflow, v);
    cpu.a = cpu.setzn(result as u16);
}

#[derive(Clone, Copy)]
enum Shift {
    Left,
    Right,
}

/// ASL/LSR/ROL/ROR: directional shift with optional carry-in, carry-out to
/// C from the bit shifted out, per spec.md §4.2's `rotate`.
fn rotate(cpu: &mut Cpu, mode: Mode, operand: Operand, direction: Shift, through_carry: bool) {
    let m = cpu.read_operand(mode, operand);
    let carry_in = cpu.get_flag(StatusFlag::Carry) as u8;
    let (result, carry_out) = match direction {
        Shift::Left => {
            let carry_in = if through_carry { carry_in } else { 0 };
            (m << 1 | carry_in, m & 0x80 != 0)
        }
        Shift::Right => {
            let carry_in = if through_carry { carry_in } else { 0 };
            (m >> 1 | (carry_in << 7), m & 0x01 != 0)
        }
    };
    cpu.set_flag(StatusFlag::Carry, carry_out);
    let result = cpu.setzn(result as u16);
    cpu.write_operand(mode, operand, result);
}
