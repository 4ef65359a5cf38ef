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

pub mod encoder;
pub mod layout;

use crate::ast::{DataWidth, Expr, InsnArg, InsnKind, Program, Span};
use crate::diagnostics::Diagnostics;
use crate::errors::AssemblyError;
use crate::eval::Evaluator;
use layout::{ConcreteInsn, ConcreteKind, EncodingForm, LayoutProgram};

/// Shape of the output image.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Per-section `[base: u32][length: u32]` header followed by the
    /// payload; no padding between sections.
    #[default]
    Sectioned,
    /// Payloads in address order starting at the lowest base address, with
    /// zero-filled gaps and no headers.
    Flat,
}

/// Pass 1: simplify every expression the instructions carry, so later
/// phases see constants already folded as far as labels allow. Domain
/// errors (a division by zero, say) are reported at the offending
/// instruction and the expression is poisoned to `Undef` so the run can
/// keep going.
pub fn simplify_program(
    program: &mut Program,
    eval: &Evaluator,
    diag: &mut Diagnostics,
) -> Result<(), AssemblyError> {
    for section in &mut program.sections {
        let span = section.span;
        simplify_expr(&mut section.starting_address, span, eval, diag)?;
        for insn in &mut section.instructions {
            let span = insn.span;
            match &mut insn.kind {
                InsnKind::LoadStore { args, addr, .. } => {
                    simplify_expr(&mut addr.constant, span, eval, diag)?;
                    simplify_args(args, span, eval, diag)?;
                }
                InsnKind::Alu { args, .. } | InsnKind::Mov { args, .. } => {
                    simplify_args(args, span, eval, diag)?;
                }
                InsnKind::Data(raw) => {
                    simplify_expr(&mut raw.low, span, eval, diag)?;
                    if raw.width == DataWidth::Bytes {
                        simplify_expr(&mut raw.high, span, eval, diag)?;
                    }
                }
                InsnKind::Label(_) | InsnKind::Undefined => {}
            }
        }
    }
    Ok(())
}

fn simplify_args(
    args: &mut [InsnArg],
    span: Span,
    eval: &Evaluator,
    diag: &mut Diagnostics,
) -> Result<(), AssemblyError> {
    for arg in args {
        match arg {
            InsnArg::Constant(c) | InsnArg::RegisterPlus { constant: c, .. } => {
                simplify_expr(c, span, eval, diag)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn simplify_expr(
    e: &mut Expr,
    span: Span,
    eval: &Evaluator,
    diag: &mut Diagnostics,
) -> Result<(), AssemblyError> {
    match eval.simplify(e) {
        Ok(()) => Ok(()),
        Err(err @ AssemblyError::InvalidExpression(_)) => Err(err),
        Err(err) => {
            diag.report(span, &err.to_string());
            *e = Expr::Undef;
            Ok(())
        }
    }
}

/// Pass 3: force every immediate to a value, pack the instruction words,
/// and write the image. Failed instructions are reported, emitted as
/// zeroes of their laid-out length, and emission continues.
pub fn generate_image(
    mut layout: LayoutProgram,
    eval: &Evaluator,
    format: OutputFormat,
    diag: &mut Diagnostics,
) -> Result<Vec<u8>, AssemblyError> {
    let mut image = Vec::new();
    // Sections are already in address order after layout.
    let mut cursor = layout
        .sections
        .first()
        .map(|s| s.base_address)
        .unwrap_or_default();

    for section in &mut layout.sections {
        match format {
            OutputFormat::Sectioned => {
                image.extend(section.base_address.to_le_bytes());
                image.extend((section.length() as u32).to_le_bytes());
            }
            OutputFormat::Flat => {
                if section.base_address > cursor {
                    image.resize(image.len() + (section.base_address - cursor) as usize, 0x00);
                }
                cursor = section.base_address.wrapping_add(section.length() as u32);
            }
        }

        for insn in &mut section.contents {
            let length = insn.length();
            match emit_insn(insn, eval) {
                Ok(bytes) => image.extend(bytes),
                Err(e @ AssemblyError::InvalidExpression(_)) => return Err(e),
                Err(e) => {
                    diag.report(insn.span, &e.to_string());
                    image.resize(image.len() + length, 0x00);
                }
            }
        }
    }

    Ok(image)
}

fn emit_insn(insn: &mut ConcreteInsn, eval: &Evaluator) -> Result<Vec<u8>, AssemblyError> {
    let mut bytes = Vec::with_capacity(8);

    match &mut insn.kind {
        ConcreteKind::Undef => {}
        ConcreteKind::Data(raw) => match raw.width {
            DataWidth::Bytes => {
                bytes.push(eval.completely_evaluate::<u8>(&mut raw.low)?);
                bytes.push(eval.completely_evaluate::<u8>(&mut raw.high)?);
            }
            DataWidth::Word => {
                bytes.extend(eval.completely_evaluate::<u16>(&mut raw.low)?.to_le_bytes());
            }
            DataWidth::Doubleword => {
                bytes.extend(eval.completely_evaluate::<u32>(&mut raw.low)?.to_le_bytes());
            }
            DataWidth::Quadword => {
                bytes.extend(eval.completely_evaluate::<u64>(&mut raw.low)?.to_le_bytes());
            }
        },
        ConcreteKind::Insn(form) => {
            let form = *form;
            match form {
                EncodingForm::Short => bytes
                    .extend(encoder::build_short_insn(insn.rd, insn.ro, insn.opcode)?.to_le_bytes()),
                EncodingForm::Tiny => {
                    let imm: u32 = eval.completely_evaluate(&mut insn.imm)?;
                    bytes.extend(encoder::build_tiny_insn(insn.rd, imm, insn.opcode)?.to_le_bytes());
                }
                EncodingForm::Long => {
                    let imm: u32 = eval.completely_evaluate(&mut insn.imm)?;
                    bytes.extend(
                        encoder::build_long_insn(insn.rd, imm, insn.rs, insn.ro, insn.opcode)?
                            .to_le_bytes(),
                    );
                }
                EncodingForm::Big => {
                    let imm: u32 = eval.completely_evaluate(&mut insn.imm)?;
                    bytes.extend(encoder::build_big_insn(insn.rd, imm, insn.opcode)?.to_le_bytes());
                }
                EncodingForm::Med => {
                    let imm: u32 = eval.completely_evaluate(&mut insn.imm)?;
                    bytes.extend(
                        encoder::build_med_insn(insn.rd, imm, insn.ro, insn.opcode)?.to_le_bytes(),
                    );
                }
                EncodingForm::Msm => {
                    let imm: u32 = eval.completely_evaluate(&mut insn.imm)?;
                    bytes.extend(
                        encoder::build_msm_insn(insn.rd, imm, insn.ff, insn.ro, insn.opcode)?
                            .to_le_bytes(),
                    );
                }
                EncodingForm::Sm => {
                    let imm: u32 = eval.completely_evaluate(&mut insn.imm)?;
                    bytes.extend(
                        encoder::build_sm_insn(insn.rd, imm, insn.ff, insn.rs, insn.ro, insn.opcode)?
                            .to_le_bytes(),
                    );
                }
            }
        }
    }

    Ok(bytes)
}
