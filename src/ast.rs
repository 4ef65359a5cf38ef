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

use std::fmt;

/// Position of a construct in the source, used only for diagnostics.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Span {
    pub line: usize,
    pub col_begin: usize,
    pub col_end: usize,
}

/// A label, identified by its owning section and a within-section ordinal.
/// The textual name only exists inside the parser; everything downstream
/// works with this pair.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelName {
    pub section: usize,
    pub index: usize,
}

// Symbolic integer expression tree.
//
// Add/Mul/Div/Mod are variable-arity: the evaluator keeps them flattened, so
// a chain like (a + b) + c becomes one 3-ary Add. Sub keeps its operand
// order. A fully evaluated expression is a single Num or Label.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(i64),
    Label(LabelName),
    Undef,
    Neg(Box<Expr>),
    Add(Vec<Expr>),
    Sub(Vec<Expr>),
    Mul(Vec<Expr>),
    Div(Vec<Expr>),
    Mod(Vec<Expr>),
    Shl(Box<Expr>, Box<Expr>),
    Shr(Box<Expr>, Box<Expr>),
}

impl Default for Expr {
    fn default() -> Self {
        Expr::Undef
    }
}

impl Expr {
    pub fn is_num(&self) -> bool {
        matches!(self, Expr::Num(_))
    }

    pub fn is_constant(&self, v: i64) -> bool {
        matches!(self, Expr::Num(n) if *n == v)
    }

    pub fn as_num(&self) -> Option<i64> {
        match self {
            Expr::Num(n) => Some(*n),
            _ => None,
        }
    }
}

// --- Instruction operands ---

/// A single argument to an ALU or mov/jmp instruction.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum InsnArg {
    #[default]
    Undefined,
    Register(u32),
    RegisterPlus {
        reg: u32,
        constant: Expr,
    },
    RegisterLshift {
        reg: u32,
        shift: u8,
    },
    RegisterRshift {
        reg: u32,
        shift: u8,
    },
    Constant(Expr),
}

impl InsnArg {
    /// Register field of this argument; 0 for forms that carry none.
    pub fn reg(&self) -> u32 {
        match self {
            InsnArg::Register(r)
            | InsnArg::RegisterPlus { reg: r, .. }
            | InsnArg::RegisterLshift { reg: r, .. }
            | InsnArg::RegisterRshift { reg: r, .. } => *r,
            _ => 0,
        }
    }

    pub fn is_register(&self) -> bool {
        matches!(self, InsnArg::Register(_))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, InsnArg::Constant(_))
    }
}

/// Memory operand of a load/store: `[reg_base + reg_index << shift + constant]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddrSpec {
    pub reg_base: u32,
    pub reg_index: u32,
    pub shift: u8,
    pub constant: Expr,
}

// --- ISA field tables ---

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum AluOp {
    Add = 0b0000,
    Sub = 0b0001,
    Sl = 0b0010,
    Sr = 0b0011,
    Lsl = 0b0100,
    Lsr = 0b0101,
    Or = 0b1000,
    Eor = 0b1001,
    And = 0b1010,
    Nor = 0b1100,
    Enor = 0b1101,
    Nand = 0b1110,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum LoadStoreKind {
    Load = 0,
    Store = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum LoadStoreSize {
    Byte = 0,
    Halfword = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum LoadStoreDest {
    Zext = 0b00,
    Sext = 0b01,
    Loww = 0b10,
    Highw = 0b11,
}

/// Condition codes as written in source. `Gt`/`Sgt`/`Le`/`Sle` have no
/// encoding of their own; they assemble as the mirrored condition with the
/// last two operands swapped.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Cond {
    Al,
    Lt,
    Slt,
    Ge,
    Sge,
    Eq,
    Ne,
    Bs,
    Gt,
    Sgt,
    Le,
    Sle,
}

impl Cond {
    pub fn needs_swap(self) -> bool {
        matches!(self, Cond::Gt | Cond::Sgt | Cond::Le | Cond::Sle)
    }
}

// --- Data items ---

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataWidth {
    Bytes,
    Word,
    Doubleword,
    Quadword,
}

/// Raw data item. `Bytes` holds two independent 8-bit values (`low`, `high`);
/// the other widths hold a single value in `low`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawData {
    pub width: DataWidth,
    pub low: Expr,
    pub high: Expr,
}

// --- Instructions ---

#[derive(Debug, Clone, PartialEq)]
pub enum InsnKind {
    /// Defines a label at the current address; emits nothing.
    Label(LabelName),
    Data(RawData),
    LoadStore {
        kind: LoadStoreKind,
        size: LoadStoreSize,
        dest: LoadStoreDest,
        /// args[0] is the value register.
        args: Vec<InsnArg>,
        addr: AddrSpec,
    },
    Alu {
        op: AluOp,
        /// args[0] is the destination; args[1], args[2] are the operands.
        args: Vec<InsnArg>,
    },
    Mov {
        is_jmp: bool,
        condition: Cond,
        args: Vec<InsnArg>,
    },
    /// Sentinel produced during parse recovery.
    Undefined,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insn {
    pub kind: InsnKind,
    pub span: Span,
}

/// A section as parsed: starting address still symbolic, labels still inline.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSection {
    pub index: usize,
    pub starting_address: Expr,
    pub instructions: Vec<Insn>,
    pub span: Span,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub sections: Vec<ParsedSection>,
}

// --- Debug listing ---

fn dump_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(v) => write!(f, "{}", v),
            Expr::Label(l) => write!(f, "l{}i{}", l.section, l.index),
            Expr::Undef => write!(f, "UNDEF"),
            Expr::Neg(e) => write!(f, "-({})", e),
            Expr::Add(args) => {
                write!(f, "(")?;
                dump_list(f, args, " + ")?;
                write!(f, ")")
            }
            Expr::Sub(args) => {
                write!(f, "(")?;
                dump_list(f, args, " - ")?;
                write!(f, ")")
            }
            Expr::Mul(args) => {
                write!(f, "(")?;
                dump_list(f, args, " * ")?;
                write!(f, ")")
            }
            Expr::Div(args) => {
                write!(f, "(")?;
                dump_list(f, args, " / ")?;
                write!(f, ")")
            }
            Expr::Mod(args) => {
                write!(f, "(")?;
                dump_list(f, args, " % ")?;
                write!(f, ")")
            }
            Expr::Shl(a, b) => write!(f, "({} << {})", a, b),
            Expr::Shr(a, b) => write!(f, "({} >> {})", a, b),
        }
    }
}

fn dump_list_hex(f: &mut fmt::Formatter<'_>, items: &[Expr], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, "{}", sep)?;
        }
        write!(f, "{:x}", item)?;
    }
    Ok(())
}

// Hex rendering for the debug listings. The base carries through to every
// nested number; label ordinals stay decimal.
impl fmt::LowerHex for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(v) => write!(f, "{:x}", v),
            Expr::Label(l) => write!(f, "l{}i{}", l.section, l.index),
            Expr::Undef => write!(f, "UNDEF"),
            Expr::Neg(e) => write!(f, "-({:x})", **e),
            Expr::Add(args) => {
                write!(f, "(")?;
                dump_list_hex(f, args, " + ")?;
                write!(f, ")")
            }
            Expr::Sub(args) => {
                write!(f, "(")?;
                dump_list_hex(f, args, " - ")?;
                write!(f, ")")
            }
            Expr::Mul(args) => {
                write!(f, "(")?;
                dump_list_hex(f, args, " * ")?;
                write!(f, ")")
            }
            Expr::Div(args) => {
                write!(f, "(")?;
                dump_list_hex(f, args, " / ")?;
                write!(f, ")")
            }
            Expr::Mod(args) => {
                write!(f, "(")?;
                dump_list_hex(f, args, " % ")?;
                write!(f, ")")
            }
            Expr::Shl(a, b) => write!(f, "({:x} << {:x})", **a, **b),
            Expr::Shr(a, b) => write!(f, "({:x} >> {:x})", **a, **b),
        }
    }
}

impl fmt::Display for InsnArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InsnArg::Undefined => write!(f, "aUNDEF"),
            InsnArg::Register(r) => write!(f, "r{}", r),
            InsnArg::RegisterPlus { reg, constant } => write!(f, "r{} + {}", reg, constant),
            InsnArg::RegisterLshift { reg, shift } => write!(f, "r{} << {}", reg, shift),
            InsnArg::RegisterRshift { reg, shift } => write!(f, "r{} >> {}", reg, shift),
            InsnArg::Constant(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cond::Al => "al",
            Cond::Lt => "lt",
            Cond::Slt => "slt",
            Cond::Ge => "ge",
            Cond::Sge => "sge",
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Bs => "bs",
            Cond::Gt => "gt",
            Cond::Sgt => "sgt",
            Cond::Le => "le",
            Cond::Sle => "sle",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            InsnKind::Label(l) => write!(f, "l{}i{}:", l.section, l.index),
            InsnKind::Data(raw) => {
                write!(f, "  db{{width={:?}}}, 0x{:x}", raw.width, raw.low)?;
                if raw.width == DataWidth::Bytes {
                    write!(f, ", 0x{:x}", raw.high)?;
                }
                Ok(())
            }
            InsnKind::LoadStore {
                kind,
                size,
                dest,
                args,
                addr,
            } => {
                write!(
                    f,
                    "  ls{{K={},S={},TT={:02b}}}, {}, [0x{:x} + r{} + r{} << {}]",
                    *kind as u32,
                    *size as u32,
                    *dest as u32,
                    args[0],
                    addr.constant,
                    addr.reg_base,
                    addr.reg_index,
                    addr.shift
                )
            }
            InsnKind::Alu { op, args } => {
                write!(f, "  alu{{OOOO={:04b}}}, ", *op as u32)?;
                dump_list(f, args, ", ")
            }
            InsnKind::Mov {
                is_jmp,
                condition,
                args,
            } => {
                write!(
                    f,
                    "  {}{{c={}}}, ",
                    if *is_jmp { "jmp" } else { "mov" },
                    condition
                )?;
                dump_list(f, args, ", ")
            }
            InsnKind::Undefined => write!(f, "  undef"),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for section in &self.sections {
            writeln!(f, "=== section {} ===", section.index)?;
            writeln!(f, "starts at: 0x{:x}", section.starting_address)?;
            writeln!(f, "insns:")?;
            for insn in &section.instructions {
                writeln!(f, "{}", insn)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(section: usize, index: usize) -> Expr {
        Expr::Label(LabelName { section, index })
    }

    #[test]
    fn test_expr_listing() {
        let e = Expr::Add(vec![
            Expr::Num(255),
            label(0, 1),
            Expr::Neg(Box::new(Expr::Num(16))),
        ]);
        assert_eq!(e.to_string(), "(255 + l0i1 + -(16))");

        let e = Expr::Shl(Box::new(Expr::Num(1)), Box::new(Expr::Num(10)));
        assert_eq!(e.to_string(), "(1 << 10)");
        assert_eq!(Expr::Undef.to_string(), "UNDEF");
    }

    #[test]
    fn test_expr_hex_listing() {
        // The hex base carries into every nested number; label ordinals
        // stay decimal.
        let e = Expr::Add(vec![
            Expr::Num(255),
            label(0, 1),
            Expr::Neg(Box::new(Expr::Num(16))),
        ]);
        assert_eq!(format!("{:x}", e), "(ff + l0i1 + -(10))");

        let e = Expr::Shl(Box::new(Expr::Num(1)), Box::new(Expr::Num(10)));
        assert_eq!(format!("{:x}", e), "(1 << a)");
    }

    #[test]
    fn test_insn_arg_listing() {
        assert_eq!(InsnArg::Undefined.to_string(), "aUNDEF");
        assert_eq!(InsnArg::Register(5).to_string(), "r5");
        assert_eq!(
            InsnArg::RegisterPlus {
                reg: 2,
                constant: Expr::Num(8)
            }
            .to_string(),
            "r2 + 8"
        );
        assert_eq!(
            InsnArg::RegisterLshift { reg: 3, shift: 2 }.to_string(),
            "r3 << 2"
        );
        assert_eq!(InsnArg::Constant(Expr::Num(7)).to_string(), "7");
    }

    #[test]
    fn test_cond_listing() {
        assert_eq!(Cond::Al.to_string(), "al");
        assert_eq!(Cond::Sge.to_string(), "sge");
        assert_eq!(Cond::Gt.to_string(), "gt");
    }

    #[test]
    fn test_program_listing() {
        let insn = |kind| Insn {
            kind,
            span: Span::default(),
        };
        let program = Program {
            sections: vec![ParsedSection {
                index: 0,
                starting_address: Expr::Num(0x1000),
                span: Span::default(),
                instructions: vec![
                    insn(InsnKind::Label(LabelName {
                        section: 0,
                        index: 0,
                    })),
                    insn(InsnKind::LoadStore {
                        kind: LoadStoreKind::Load,
                        size: LoadStoreSize::Halfword,
                        dest: LoadStoreDest::Zext,
                        args: vec![InsnArg::Register(1)],
                        addr: AddrSpec {
                            reg_base: 2,
                            reg_index: 0,
                            shift: 0,
                            constant: Expr::Num(0x20),
                        },
                    }),
                    insn(InsnKind::Alu {
                        op: AluOp::Add,
                        args: vec![
                            InsnArg::Register(3),
                            InsnArg::Register(3),
                            InsnArg::Register(5),
                        ],
                    }),
                    insn(InsnKind::Mov {
                        is_jmp: false,
                        condition: Cond::Lt,
                        args: vec![
                            InsnArg::Register(1),
                            InsnArg::Register(2),
                            InsnArg::Constant(Expr::Num(5)),
                            InsnArg::Register(3),
                        ],
                    }),
                    insn(InsnKind::Data(RawData {
                        width: DataWidth::Bytes,
                        low: Expr::Num(0x12),
                        high: Expr::Num(0x34),
                    })),
                    insn(InsnKind::Undefined),
                ],
            }],
        };

        let expected = "\
=== section 0 ===
starts at: 0x1000
insns:
l0i0:
  ls{K=0,S=1,TT=00}, r1, [0x20 + r2 + r0 << 0]
  alu{OOOO=0000}, r3, r3, r5
  mov{c=lt}, r1, r2, 5, r3
  db{width=Bytes}, 0x12, 0x34
  undef
";
        assert_eq!(program.to_string(), expected);
    }
}
