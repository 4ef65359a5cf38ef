/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Bit-exact packers for the seven MCPU encoding forms, plus the opcode
//! composition tables. Every function validates its field widths and fails
//! with `OperandOutOfRange` rather than silently truncating.

use crate::ast::{AluOp, LoadStoreDest, LoadStoreKind, LoadStoreSize};
use crate::errors::AssemblyError;

// Encoder-side condition table. The surface syntax also knows gt/le/sgt/sle,
// but those assemble as the mirrored condition with swapped operands and
// never reach this enum.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum MovCond {
    Lt = 0b000,
    Slt = 0b001,
    Ge = 0b010,
    Sge = 0b011,
    Eq = 0b100,
    Neq = 0b101,
    Bs = 0b110,
    Al = 0b111,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum MovOp {
    Mimm = 0b00,
    Jump = 0b01,
    Mrs = 0b10,
    Mro = 0b11,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum AluStyle {
    Reg = 0b00,
    Imm = 0b01,
    Regsl = 0b10,
    Regsr = 0b11,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum AddressMode {
    Generic = 0,
    Simple = 1,
}

/// Does `value` fit in `bits` as a signed quantity, i.e. does
/// sign-extending the low `bits` of `value` give back `value`?
pub fn fits(value: i64, bits: u32) -> bool {
    let mask = (1i64 << bits) - 1;
    let sign = 1i64 << (bits - 1);
    let masked = value & mask;
    ((masked ^ sign) - sign) == value
}

pub fn build_load_store_opcode(
    kind: LoadStoreKind,
    size: LoadStoreSize,
    dest: LoadStoreDest,
    mode: AddressMode,
) -> Result<u32, AssemblyError> {
    // A store has nothing to extend; only the word-half destinations are legal.
    if kind == LoadStoreKind::Store && (dest as u32) & (LoadStoreDest::Loww as u32) == 0 {
        return Err(AssemblyError::InvalidCombination);
    }

    Ok(((kind as u32) << 4) | ((size as u32) << 3) | ((dest as u32) << 1) | mode as u32)
}

pub fn build_alu_opcode(op: AluOp, style: AluStyle) -> u32 {
    (1 << 6) | ((op as u32) << 2) | style as u32
}

pub fn build_mov_opcode(op: MovOp, cond: MovCond) -> u32 {
    (0b01 << 5) | ((cond as u32) << 2) | op as u32
}

fn verify_register(r: u32) -> Result<(), AssemblyError> {
    if r > 15 {
        return Err(AssemblyError::OperandOutOfRange {
            what: "register number",
            bits: 4,
        });
    }
    Ok(())
}

fn verify_opcode(opc: u32) -> Result<(), AssemblyError> {
    if opc > 127 {
        return Err(AssemblyError::OperandOutOfRange {
            what: "opcode",
            bits: 7,
        });
    }
    Ok(())
}

fn verify_ff(ff: u32) -> Result<(), AssemblyError> {
    if ff > 3 {
        return Err(AssemblyError::OperandOutOfRange {
            what: "FF field",
            bits: 2,
        });
    }
    Ok(())
}

// Range-check an immediate in the 32-bit signed domain and mask it down to
// its field width.
fn verify_imm(imm: u32, bits: u32, what: &'static str) -> Result<u32, AssemblyError> {
    if !fits(imm as i32 as i64, bits) {
        return Err(AssemblyError::OperandOutOfRange { what, bits });
    }
    Ok(imm & ((1 << bits) - 1))
}

/// SHORT: `[rs_and_rd:4 | ro:4 | opcode:7]`, 16-bit.
pub fn build_short_insn(rs_and_rd: u32, ro: u32, opcode: u32) -> Result<u16, AssemblyError> {
    verify_register(rs_and_rd)?;
    verify_register(ro)?;
    verify_opcode(opcode)?;

    Ok(((rs_and_rd << 12) | (ro << 8) | opcode) as u16)
}

/// TINY: `[rs_and_rd:4 | imm:4 | opcode:7]`, 16-bit.
pub fn build_tiny_insn(rs_and_rd: u32, imm: u32, opcode: u32) -> Result<u16, AssemblyError> {
    verify_register(rs_and_rd)?;
    verify_opcode(opcode)?;
    let imm = verify_imm(imm, 4, "immediate in TINY encoding")?;

    Ok(((rs_and_rd << 12) | (imm << 8) | opcode) as u16)
}

/// LONG: `[rd:4 | imm:12 | rs:4 | ro:4 | 1 | opcode:7]`, 32-bit.
pub fn build_long_insn(
    rd: u32,
    imm: u32,
    rs: u32,
    ro: u32,
    opcode: u32,
) -> Result<u32, AssemblyError> {
    verify_register(rd)?;
    verify_register(rs)?;
    verify_register(ro)?;
    verify_opcode(opcode)?;
    let imm = verify_imm(imm, 12, "immediate in LONG encoding")?;

    Ok((rd << 28) | (imm << 16) | (rs << 12) | (ro << 8) | (1 << 7) | opcode)
}

/// BIG: `[rd:4 | imm:20 | 1 | opcode:7]`, 32-bit.
pub fn build_big_insn(rd: u32, imm: u32, opcode: u32) -> Result<u32, AssemblyError> {
    verify_register(rd)?;
    verify_opcode(opcode)?;
    let imm = verify_imm(imm, 20, "immediate in BIG encoding")?;

    Ok((rd << 28) | (imm << 8) | (1 << 7) | opcode)
}

/// MED: `[rd:4 | imm:16 | ro:4 | 1 | opcode:7]`, 32-bit.
pub fn build_med_insn(rd: u32, imm: u32, ro: u32, opcode: u32) -> Result<u32, AssemblyError> {
    verify_register(rd)?;
    verify_register(ro)?;
    verify_opcode(opcode)?;
    let imm = verify_imm(imm, 16, "immediate in MED encoding")?;

    Ok((rd << 28) | (imm << 12) | (ro << 8) | (1 << 7) | opcode)
}

/// MSM: `[rd:4 | imm:14 | FF:2 | ro:4 | 1 | opcode:7]`, 32-bit.
pub fn build_msm_insn(
    rd: u32,
    imm: u32,
    ff: u32,
    ro: u32,
    opcode: u32,
) -> Result<u32, AssemblyError> {
    verify_register(rd)?;
    verify_register(ro)?;
    verify_ff(ff)?;
    verify_opcode(opcode)?;
    let imm = verify_imm(imm, 14, "immediate in MSM encoding")?;

    Ok((rd << 28) | (imm << 14) | (ff << 12) | (ro << 8) | (1 << 7) | opcode)
}

/// SM: `[rd:4 | imm:10 | FF:2 | rs:4 | ro:4 | 1 | opcode:7]`, 32-bit.
pub fn build_sm_insn(
    rd: u32,
    imm: u32,
    ff: u32,
    rs: u32,
    ro: u32,
    opcode: u32,
) -> Result<u32, AssemblyError> {
    verify_register(rd)?;
    verify_register(rs)?;
    verify_register(ro)?;
    verify_ff(ff)?;
    verify_opcode(opcode)?;
    let imm = verify_imm(imm, 10, "immediate in SM encoding")?;

    Ok((rd << 28) | (imm << 18) | (ff << 16) | (rs << 12) | (ro << 8) | (1 << 7) | opcode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_boundaries() {
        assert!(fits(7, 4));
        assert!(fits(-8, 4));
        assert!(!fits(8, 4));
        assert!(!fits(-9, 4));
        assert!(fits(0, 1));
        assert!(fits(-1, 1));
        assert!(!fits(1, 1));
        assert!(fits(0x7FFFF, 20));
        assert!(!fits(0x80000, 20));
        // Values outside the 32-bit range never fit a 20-bit field.
        assert!(!fits(1 << 35, 20));
        assert!(!fits((1 << 32) + 3, 4));
    }

    #[test]
    fn test_alu_short_word() {
        // add r3, r3, r5
        let opcode = build_alu_opcode(AluOp::Add, AluStyle::Reg);
        assert_eq!(opcode, 0x40);
        let word = build_short_insn(3, 5, opcode).unwrap();
        assert_eq!(word, 0x3540);
        assert_eq!(word.to_le_bytes(), [0x40, 0x35]);
    }

    #[test]
    fn test_tiny_masks_immediate() {
        let opcode = build_alu_opcode(AluOp::Add, AluStyle::Imm);
        // -1 packs as 0b1111 in the 4-bit field.
        let word = build_tiny_insn(2, -1i32 as u32, opcode).unwrap();
        assert_eq!(word, (2 << 12) | (0xF << 8) | opcode as u16);
    }

    #[test]
    fn test_tiny_rejects_wide_immediate() {
        let opcode = build_alu_opcode(AluOp::Add, AluStyle::Imm);
        assert!(matches!(
            build_tiny_insn(2, 8, opcode),
            Err(AssemblyError::OperandOutOfRange { bits: 4, .. })
        ));
    }

    #[test]
    fn test_long_field_placement() {
        let word = build_long_insn(0xA, 0x123, 0x4, 0x5, 0x7F).unwrap();
        assert_eq!(word, (0xA << 28) | (0x123 << 16) | (0x4 << 12) | (0x5 << 8) | 0x80 | 0x7F);
    }

    #[test]
    fn test_big_field_placement() {
        // -2 masks down to 0xFFFFE in the 20-bit field.
        let word = build_big_insn(0x1, -2i32 as u32, 0x20).unwrap();
        assert_eq!(word, (0x1 << 28) | (0xFFFFE << 8) | 0x80 | 0x20);
    }

    #[test]
    fn test_med_field_placement() {
        let word = build_med_insn(0x2, 0x8000u32.wrapping_neg(), 0x3, 0x41);
        // -0x8000 fits 16 bits.
        assert_eq!(
            word.unwrap(),
            (0x2 << 28) | (0x8000 << 12) | (0x3 << 8) | 0x80 | 0x41
        );
    }

    #[test]
    fn test_msm_field_placement() {
        let word = build_msm_insn(0x9, 0x155, 0b10, 0x6, 0x11).unwrap();
        assert_eq!(
            word,
            (0x9 << 28) | (0x155 << 14) | (0b10 << 12) | (0x6 << 8) | 0x80 | 0x11
        );
    }

    #[test]
    fn test_sm_field_placement() {
        let word = build_sm_insn(0xF, 0x1FF, 0b11, 0x2, 0x3, 0x6D).unwrap();
        assert_eq!(
            word,
            (0xF << 28) | (0x1FF << 18) | (0b11 << 16) | (0x2 << 12) | (0x3 << 8) | 0x80 | 0x6D
        );
    }

    #[test]
    fn test_register_and_ff_ranges() {
        assert!(matches!(
            build_short_insn(16, 0, 0),
            Err(AssemblyError::OperandOutOfRange { bits: 4, .. })
        ));
        assert!(matches!(
            build_short_insn(0, 0, 128),
            Err(AssemblyError::OperandOutOfRange { bits: 7, .. })
        ));
        assert!(matches!(
            build_sm_insn(0, 0, 4, 0, 0, 0),
            Err(AssemblyError::OperandOutOfRange { bits: 2, .. })
        ));
    }

    #[test]
    fn test_load_store_opcode() {
        let opc = build_load_store_opcode(
            LoadStoreKind::Load,
            LoadStoreSize::Halfword,
            LoadStoreDest::Sext,
            AddressMode::Generic,
        )
        .unwrap();
        assert_eq!(opc, (0 << 4) | (1 << 3) | (0b01 << 1));

        let opc = build_load_store_opcode(
            LoadStoreKind::Store,
            LoadStoreSize::Byte,
            LoadStoreDest::Highw,
            AddressMode::Simple,
        )
        .unwrap();
        assert_eq!(opc, (1 << 4) | (0b11 << 1) | 1);
    }

    #[test]
    fn test_extending_store_rejected() {
        for dest in [LoadStoreDest::Zext, LoadStoreDest::Sext] {
            assert_eq!(
                build_load_store_opcode(
                    LoadStoreKind::Store,
                    LoadStoreSize::Byte,
                    dest,
                    AddressMode::Generic,
                ),
                Err(AssemblyError::InvalidCombination)
            );
        }
    }

    #[test]
    fn test_mov_opcode() {
        assert_eq!(build_mov_opcode(MovOp::Mro, MovCond::Al), (0b01 << 5) | (0b111 << 2) | 0b11);
        assert_eq!(build_mov_opcode(MovOp::Jump, MovCond::Lt), (0b01 << 5) | 0b01);
    }
}
