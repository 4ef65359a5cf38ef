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

//! The layout engine: assigns concrete addresses to labels, picks the
//! narrowest legal encoding form for every instruction, and checks that no
//! two sections overlap. Immediates stay symbolic; everything else is
//! resolved down to encoding fields here.

use crate::assembler::encoder::{
    self, AddressMode, AluStyle, MovCond, MovOp, build_alu_opcode, build_load_store_opcode,
    build_mov_opcode,
};
use crate::ast::{
    AluOp, Cond, DataWidth, Expr, InsnArg, InsnKind, Program, RawData, Span,
};
use crate::diagnostics::Diagnostics;
use crate::errors::AssemblyError;
use crate::eval::Evaluator;
use std::fmt;

/// One of the seven ISA encoding forms.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EncodingForm {
    Short,
    Tiny,
    Long,
    Big,
    Med,
    Msm,
    Sm,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConcreteKind {
    /// Placeholder left behind when form selection failed; emits nothing.
    Undef,
    Data(RawData),
    Insn(EncodingForm),
}

/// An instruction after form selection. Never mutated once built; the
/// emitter consumes it exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcreteInsn {
    pub kind: ConcreteKind,
    pub opcode: u32,
    pub rd: u32,
    pub rs: u32,
    pub ro: u32,
    pub ff: u32,
    pub imm: Expr,
    pub span: Span,
}

impl ConcreteInsn {
    fn undef(span: Span) -> Self {
        Self {
            kind: ConcreteKind::Undef,
            opcode: 0,
            rd: 0,
            rs: 0,
            ro: 0,
            ff: 0,
            imm: Expr::Undef,
            span,
        }
    }

    /// Length in bytes as the cpu will see it.
    pub fn length(&self) -> usize {
        match &self.kind {
            ConcreteKind::Undef => 0,
            ConcreteKind::Data(raw) => match raw.width {
                DataWidth::Bytes | DataWidth::Word => 2,
                DataWidth::Doubleword => 4,
                DataWidth::Quadword => 8,
            },
            ConcreteKind::Insn(form) => match form {
                EncodingForm::Short | EncodingForm::Tiny => 2,
                _ => 4,
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LayoutSection {
    pub index: usize,
    pub base_address: u32,
    pub contents: Vec<ConcreteInsn>,
}

impl LayoutSection {
    pub fn length(&self) -> usize {
        self.contents.iter().map(ConcreteInsn::length).sum()
    }
}

/// The laid-out program, sorted by base address.
#[derive(Debug, Clone, Default)]
pub struct LayoutProgram {
    pub sections: Vec<LayoutSection>,
}

/// Lay out the parsed program: bind every label in `eval`, choose encoding
/// forms, and verify section disjointness. Domain errors are reported to
/// `diag` per instruction and layout keeps going; only an internal
/// invariant breach aborts.
pub fn layout_from(
    program: Program,
    eval: &mut Evaluator,
    diag: &mut Diagnostics,
) -> Result<LayoutProgram, AssemblyError> {
    let mut layout = LayoutProgram::default();

    for mut section in program.sections {
        let base_address = match eval.completely_evaluate::<u32>(&mut section.starting_address) {
            Ok(b) => b,
            Err(e @ AssemblyError::InvalidExpression(_)) => return Err(e),
            Err(e) => {
                // Without a base address the section cannot take part in
                // layout at all; skip it.
                diag.report(section.span, &e.to_string());
                continue;
            }
        };

        let mut out = LayoutSection {
            index: section.index,
            base_address,
            contents: Vec::with_capacity(section.instructions.len()),
        };
        let mut addr = base_address;

        for insn in section.instructions {
            let span = insn.span;
            if let InsnKind::Label(name) = insn.kind {
                eval.labels.insert(name, Expr::Num(addr as i64));
                continue;
            }

            match layout_instruction(insn.kind, span) {
                Ok(ci) => {
                    addr = addr.wrapping_add(ci.length() as u32);
                    out.contents.push(ci);
                }
                Err(e @ AssemblyError::InvalidExpression(_)) => return Err(e),
                Err(e) => {
                    diag.report(span, &e.to_string());
                    out.contents.push(ConcreteInsn::undef(span));
                }
            }
        }

        layout.sections.push(out);
    }

    // Overlap detection over the address-sorted section list.
    layout.sections.sort_by_key(|s| s.base_address);
    for pair in layout.sections.windows(2) {
        let (lower, upper) = (&pair[0], &pair[1]);
        if lower.base_address as u64 + lower.length() as u64 > upper.base_address as u64 {
            let e = AssemblyError::OverlappingSections {
                lower_base: lower.base_address,
                lower_len: lower.length(),
                upper_base: upper.base_address,
            };
            let span = lower.contents.last().map(|c| c.span).unwrap_or_default();
            diag.report(span, &e.to_string());
        }
    }

    Ok(layout)
}

fn arg_reg(args: &[InsnArg], i: usize) -> u32 {
    args.get(i).map_or(0, InsnArg::reg)
}

fn arg_constant(args: &[InsnArg], i: usize) -> Expr {
    match args.get(i) {
        Some(InsnArg::Constant(c)) => c.clone(),
        Some(InsnArg::RegisterPlus { constant, .. }) => constant.clone(),
        _ => Expr::Undef,
    }
}

fn layout_instruction(kind: InsnKind, span: Span) -> Result<ConcreteInsn, AssemblyError> {
    let mut ci = ConcreteInsn::undef(span);

    match kind {
        InsnKind::Label(_) | InsnKind::Undefined => {}

        InsnKind::Data(raw) => {
            ci.kind = ConcreteKind::Data(raw);
        }

        InsnKind::LoadStore {
            kind,
            size,
            dest,
            args,
            addr,
        } => {
            ci.rd = arg_reg(&args, 0);

            if addr.reg_index == 0 && addr.constant.is_constant(0) {
                ci.kind = ConcreteKind::Insn(EncodingForm::Short);
                ci.ro = addr.reg_base;
                ci.opcode = build_load_store_opcode(kind, size, dest, AddressMode::Generic)?;
            } else if addr.reg_index == 0 && addr.constant.is_num() {
                // No index register: the simple mode gives the constant the
                // most room, with FF carrying the top two address bits.
                ci.kind = ConcreteKind::Insn(EncodingForm::Msm);
                ci.ro = addr.reg_base;
                ci.opcode = build_load_store_opcode(kind, size, dest, AddressMode::Simple)?;

                let constant = addr.constant.as_num().unwrap_or(0);
                if constant > 0xFFFF_FFFF {
                    return Err(AssemblyError::AddressTooLarge);
                }

                let base = constant & ((1 << 30) - 1);
                // Replicate bit 29 through the stripped top bits so the
                // 30-bit quantity survives sign-extension.
                let base = base | if base & (1 << 29) != 0 { 0b11 << 30 } else { 0 };
                ci.imm = Expr::Num(base);
                ci.ff = ((constant >> 30) & 0b11) as u32;
            } else {
                ci.kind = ConcreteKind::Insn(EncodingForm::Sm);
                ci.ro = addr.reg_base;
                ci.rs = addr.reg_index;
                ci.opcode = build_load_store_opcode(kind, size, dest, AddressMode::Generic)?;
                ci.ff = addr.shift as u32;
                ci.imm = addr.constant;
            }
        }

        InsnKind::Alu { op, args } => {
            layout_alu(&mut ci, op, &args)?;
        }

        InsnKind::Mov {
            is_jmp,
            condition,
            mut args,
        } => {
            // Mirrored conditions assemble as their counterpart with the
            // operand pair swapped.
            if condition.needs_swap() && args.len() >= 2 {
                let n = args.len();
                args.swap(n - 2, n - 1);
            }
            let inscond = match condition {
                Cond::Al => MovCond::Al,
                Cond::Lt | Cond::Gt => MovCond::Lt,
                Cond::Slt | Cond::Sgt => MovCond::Slt,
                Cond::Ge | Cond::Le => MovCond::Ge,
                Cond::Sge | Cond::Sle => MovCond::Sge,
                Cond::Eq => MovCond::Eq,
                Cond::Ne => MovCond::Neq,
                Cond::Bs => MovCond::Bs,
            };

            // A constant zero works in more slots as the architectural zero
            // register.
            if args.len() > 2 {
                let n = args.len();
                for a in &mut args[n - 2..] {
                    if matches!(a, InsnArg::Constant(c) if c.is_constant(0)) {
                        *a = InsnArg::Register(0);
                    }
                }
            }

            if is_jmp {
                layout_jump(&mut ci, condition, inscond, &args)?;
            } else {
                layout_mov(&mut ci, condition, inscond, &args)?;
            }
        }
    }

    Ok(ci)
}

fn layout_alu(ci: &mut ConcreteInsn, op: AluOp, args: &[InsnArg]) -> Result<(), AssemblyError> {
    ci.rd = arg_reg(args, 0);

    match &args[2] {
        // A shifted operand forces the complex sm encoding.
        InsnArg::RegisterLshift { reg, shift } | InsnArg::RegisterRshift { reg, shift } => {
            let left = matches!(&args[2], InsnArg::RegisterLshift { .. });
            ci.kind = ConcreteKind::Insn(EncodingForm::Sm);
            ci.rs = arg_reg(args, 1);
            ci.ro = *reg;
            ci.ff = (shift - 1) as u32;
            ci.opcode = build_alu_opcode(op, if left { AluStyle::Regsl } else { AluStyle::Regsr });
        }

        // reg = reg @ reg with a shared destination gets the short encoding.
        InsnArg::Register(ro) if arg_reg(args, 0) == arg_reg(args, 1) => {
            ci.kind = ConcreteKind::Insn(EncodingForm::Short);
            ci.ro = *ro;
            ci.opcode = build_alu_opcode(op, AluStyle::Reg);
        }

        // reg = reg @ imm likewise, if the immediate is small enough.
        InsnArg::Constant(c)
            if arg_reg(args, 0) == arg_reg(args, 1)
                && c.as_num().is_some_and(|v| encoder::fits(v, 4)) =>
        {
            ci.kind = ConcreteKind::Insn(EncodingForm::Tiny);
            ci.rs = arg_reg(args, 1); // redundant in this form but keeps the debug listing honest
            ci.imm = c.clone();
            ci.opcode = build_alu_opcode(op, AluStyle::Imm);
        }

        InsnArg::Register(ro) => {
            ci.kind = ConcreteKind::Insn(EncodingForm::Long);
            ci.rs = arg_reg(args, 1);
            ci.ro = *ro;
            ci.opcode = build_alu_opcode(op, AluStyle::Reg);
        }

        _ => {
            ci.kind = ConcreteKind::Insn(EncodingForm::Med);
            ci.ro = arg_reg(args, 1);
            ci.imm = arg_constant(args, 2);
            ci.opcode = build_alu_opcode(op, AluStyle::Imm);
        }
    }

    Ok(())
}

fn layout_jump(
    ci: &mut ConcreteInsn,
    condition: Cond,
    inscond: MovCond,
    args: &[InsnArg],
) -> Result<(), AssemblyError> {
    match &args[0] {
        // Unconditional jump to a register: short encoding.
        InsnArg::Register(ro) if condition == Cond::Al => {
            ci.kind = ConcreteKind::Insn(EncodingForm::Short);
            ci.rd = 0b1111;
            ci.ro = *ro;
            ci.opcode = build_mov_opcode(MovOp::Mro, MovCond::Al);
        }

        // Unconditional jump to an immediate: big, shrunk to tiny when the
        // target is known to fit.
        InsnArg::Constant(c) if condition == Cond::Al => {
            ci.kind = ConcreteKind::Insn(EncodingForm::Big);
            ci.rd = 0b1111;
            ci.imm = c.clone();
            ci.opcode = build_mov_opcode(MovOp::Mimm, MovCond::Al);

            if c.as_num().is_some_and(|v| encoder::fits(v, 4)) {
                ci.kind = ConcreteKind::Insn(EncodingForm::Tiny);
            }
        }

        _ => {
            // Everything else is an sm-encoded jump.
            ci.kind = ConcreteKind::Insn(EncodingForm::Sm);
            ci.ff = 0;

            if let InsnArg::RegisterPlus { constant, .. } = &args[0] {
                if args.len() == 3 && args[1..].iter().any(|x| !x.is_register()) {
                    return Err(AssemblyError::InvalidJump {
                        reason: "target is reg + const but at least one condition is not register",
                    });
                }
                ci.ff = 0b11;
                ci.imm = constant.clone();
            } else if args.len() == 3 {
                for i in 1..3 {
                    if let InsnArg::Constant(c) = &args[i] {
                        if ci.ff != 0 {
                            return Err(AssemblyError::InvalidJump {
                                reason: "condition args cannot both be immediates",
                            });
                        }
                        ci.ff = 1 << (i - 1);
                        ci.imm = c.clone();
                    }
                }
            }

            ci.opcode = build_mov_opcode(MovOp::Jump, inscond);
            ci.rd = arg_reg(args, 0);
            ci.rs = arg_reg(args, 1);
            ci.ro = arg_reg(args, 2);
        }
    }

    Ok(())
}

fn layout_mov(
    ci: &mut ConcreteInsn,
    condition: Cond,
    inscond: MovCond,
    args: &[InsnArg],
) -> Result<(), AssemblyError> {
    if let InsnArg::Constant(c) = &args[1] {
        // Load-immediate rules first.
        if condition == Cond::Al {
            ci.opcode = build_mov_opcode(MovOp::Mimm, MovCond::Al);
            ci.rd = arg_reg(args, 0);
            ci.imm = c.clone();
            ci.kind = ConcreteKind::Insn(EncodingForm::Big);

            if c.as_num().is_some_and(|v| encoder::fits(v, 4)) {
                ci.kind = ConcreteKind::Insn(EncodingForm::Tiny);
            }
        } else {
            if args[2..].iter().any(|x| !x.is_register()) {
                return Err(AssemblyError::InvalidMov {
                    reason: "condition args must be plain registers",
                });
            }
            ci.opcode = build_mov_opcode(MovOp::Mimm, inscond);
            ci.kind = ConcreteKind::Insn(EncodingForm::Long);
            ci.rd = arg_reg(args, 0);
            ci.imm = c.clone();
            ci.rs = arg_reg(args, 2);
            ci.ro = arg_reg(args, 3);
        }
        return Ok(());
    }

    // reg = reg unconditionally: short encoding.
    if args[1].is_register() && condition == Cond::Al {
        ci.opcode = build_mov_opcode(MovOp::Mro, MovCond::Al);
        ci.kind = ConcreteKind::Insn(EncodingForm::Short);
        ci.ro = arg_reg(args, 1);
        ci.rd = arg_reg(args, 0);
        ci.rs = arg_reg(args, 0);
        return Ok(());
    }

    // One immediate among the condition operands: the freed-up operand slot
    // carries the moved register.
    let constants = args[2..].iter().filter(|y| y.is_constant()).count();
    if constants >= 1 {
        if constants == 2 {
            return Err(AssemblyError::InvalidMov {
                reason: "only one param can be immediate",
            });
        }
        if !args[1].is_register() {
            return Err(AssemblyError::InvalidMov {
                reason: "must be moving raw register with immediate comparison",
            });
        }

        let spare = args[2].is_constant(); // true if the immediate sits in operand 1
        ci.opcode = build_mov_opcode(if spare { MovOp::Mrs } else { MovOp::Mro }, inscond);
        ci.kind = ConcreteKind::Insn(EncodingForm::Sm);
        if spare {
            ci.rs = arg_reg(args, 1);
            ci.ro = arg_reg(args, 3);
            ci.imm = arg_constant(args, 2);
        } else {
            ci.ro = arg_reg(args, 1);
            ci.rs = arg_reg(args, 2);
            ci.imm = arg_constant(args, 3);
        }
        ci.rd = arg_reg(args, 0);
        ci.ff = if spare { 0b01 } else { 0b10 };
        return Ok(());
    }

    // No immediates left: the source must re-use one of the condition
    // operands.
    if let Some(pos) = args[2..].iter().position(|y| y.reg() == args[1].reg()) {
        let at_first = pos == 0;
        ci.rd = arg_reg(args, 0);
        ci.rs = arg_reg(args, 1);
        ci.ro = arg_reg(args, 2);
        ci.opcode = build_mov_opcode(if at_first { MovOp::Mrs } else { MovOp::Mro }, inscond);
        ci.kind = ConcreteKind::Insn(EncodingForm::Sm);
        if let InsnArg::RegisterPlus { constant, .. } = &args[1] {
            ci.imm = constant.clone();
            ci.ff = 0b11;
        } else {
            ci.ff = 0b00;
        }
        return Ok(());
    }

    Err(AssemblyError::InvalidMov {
        reason: "must have a register re-use to target lop1/2",
    })
}

// --- Debug listing ---

impl fmt::Display for ConcreteInsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ConcreteKind::Undef => write!(f, "<undef>"),
            ConcreteKind::Data(raw) => {
                write!(f, "db{{width={:?}}}, 0x{:x}", raw.width, raw.low)?;
                if raw.width == DataWidth::Bytes {
                    write!(f, ", 0x{:x}", raw.high)?;
                }
                Ok(())
            }
            ConcreteKind::Insn(form) => {
                write!(f, "opc={:07b}, rd={}", self.opcode, self.rd)?;
                match form {
                    EncodingForm::Short => write!(f, ", rs={}, ro={}", self.rs, self.ro),
                    EncodingForm::Tiny => write!(f, ", rs={}, imm={:x}", self.rs, self.imm),
                    _ => {
                        // Wider forms nest: sm ⊃ long ⊃ msm ⊃ med ⊃ big.
                        if matches!(form, EncodingForm::Sm | EncodingForm::Long) {
                            write!(f, ", rs={}", self.rs)?;
                        }
                        if matches!(form, EncodingForm::Sm | EncodingForm::Msm) {
                            write!(f, ", FF={:02b}", self.ff)?;
                        }
                        if !matches!(form, EncodingForm::Big) {
                            write!(f, ", ro={}", self.ro)?;
                        }
                        write!(f, ", imm={:x}", self.imm)
                    }
                }
            }
        }
    }
}

impl fmt::Display for LayoutProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.sections {
            writeln!(f, "=== layed out section {} ===", section.index)?;
            writeln!(f, "base address: 0x{:x}", section.base_address)?;
            writeln!(f, "contents:")?;
            let mut addr = section.base_address;
            for insn in &section.contents {
                writeln!(f, "{:>10x}: {}", addr, insn)?;
                addr = addr.wrapping_add(insn.length() as u32);
            }
        }
        Ok(())
    }
}
