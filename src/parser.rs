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

use crate::ast::*;
use crate::diagnostics::Diagnostics;
use crate::errors::AssemblyError;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use std::collections::{HashMap, HashSet};

// Derive the parser from our grammar file.
#[derive(Parser)]
#[grammar = "./grammar.pest"]
pub struct McpuParser;

/// Parse a whole translation unit into the intermediate form. Syntax errors
/// surface as `PestError`; semantic problems (bad register numbers,
/// duplicate labels, malformed operand lists) are reported to `diag` and
/// parsing recovers so later errors still show up.
pub fn parse_source(source: &str, diag: &mut Diagnostics) -> Result<Program, AssemblyError> {
    let mut pairs = McpuParser::parse(Rule::program, source).map_err(Box::new)?;

    let mut builder = ProgramBuilder::new(diag);
    for pair in pairs.next().unwrap().into_inner() {
        match pair.as_rule() {
            Rule::section_decl => builder.start_section(pair),
            Rule::label_def => builder.define_label(pair),
            Rule::data_bytes => builder.build_data_bytes(pair),
            Rule::data_word => builder.build_data_list(pair, DataWidth::Word),
            Rule::data_dword => builder.build_data_list(pair, DataWidth::Doubleword),
            Rule::data_qword => builder.build_data_list(pair, DataWidth::Quadword),
            Rule::load_store_insn => builder.build_load_store(pair),
            Rule::alu_insn => builder.build_alu(pair),
            Rule::mov_insn => builder.build_mov(pair),
            Rule::EOI => {}
            other => unreachable!("unexpected rule at statement level: {:?}", other),
        }
    }

    Ok(builder.finish())
}

fn span_of(pair: &Pair<Rule>) -> Span {
    let span = pair.as_span();
    let (line, col_begin) = span.start_pos().line_col();
    let (_, col_end) = span.end_pos().line_col();
    Span {
        line,
        col_begin,
        col_end,
    }
}

struct ProgramBuilder<'d> {
    diag: &'d mut Diagnostics,
    sections: Vec<ParsedSection>,
    // Label ordinals handed out so far, per section.
    allocated: Vec<usize>,
    names: HashMap<String, LabelName>,
    defined: HashSet<String>,
}

impl<'d> ProgramBuilder<'d> {
    fn new(diag: &'d mut Diagnostics) -> Self {
        Self {
            diag,
            sections: Vec::new(),
            allocated: Vec::new(),
            names: HashMap::new(),
            defined: HashSet::new(),
        }
    }

    fn finish(self) -> Program {
        Program {
            sections: self.sections,
        }
    }

    // Anything appearing before the first section directive lands in an
    // implicit section at address zero.
    fn current_section(&mut self) -> &mut ParsedSection {
        if self.sections.is_empty() {
            self.sections.push(ParsedSection {
                index: 0,
                starting_address: Expr::Num(0),
                instructions: Vec::new(),
                span: Span::default(),
            });
            self.allocated.push(0);
        }
        self.sections.last_mut().unwrap()
    }

    fn push_insn(&mut self, kind: InsnKind, span: Span) {
        self.current_section().instructions.push(Insn { kind, span });
    }

    /// A label keeps the identity it got at first mention, definition or
    /// reference alike.
    fn intern(&mut self, name: &str) -> LabelName {
        if let Some(label) = self.names.get(name) {
            return *label;
        }
        self.current_section();
        let section = self.sections.last().unwrap().index;
        let index = self.allocated[section];
        self.allocated[section] += 1;
        let label = LabelName { section, index };
        self.names.insert(name.to_string(), label);
        label
    }

    fn start_section(&mut self, pair: Pair<Rule>) {
        let span = span_of(&pair);
        let expr_pair = pair.into_inner().next().unwrap();
        let starting_address = self.build_expr(expr_pair);
        let index = self.sections.len();
        self.sections.push(ParsedSection {
            index,
            starting_address,
            instructions: Vec::new(),
            span,
        });
        self.allocated.push(0);
    }

    fn define_label(&mut self, pair: Pair<Rule>) {
        let span = span_of(&pair);
        let name = pair.into_inner().next().unwrap().as_str().to_string();
        if !self.defined.insert(name.clone()) {
            let e = AssemblyError::DuplicateLabel { name };
            self.diag.report(span, &e.to_string());
            return;
        }
        let label = self.intern(&name);
        self.push_insn(InsnKind::Label(label), span);
    }

    // --- expressions ---

    fn build_expr(&mut self, pair: Pair<Rule>) -> Expr {
        match pair.as_rule() {
            Rule::expr => {
                let mut inner = pair.into_inner();
                let mut acc = self.build_expr(inner.next().unwrap());
                while let Some(op) = inner.next() {
                    let rhs = self.build_expr(inner.next().unwrap());
                    acc = if op.as_str() == "<<" {
                        Expr::Shl(Box::new(acc), Box::new(rhs))
                    } else {
                        Expr::Shr(Box::new(acc), Box::new(rhs))
                    };
                }
                acc
            }
            Rule::additive => {
                let mut inner = pair.into_inner();
                let mut acc = self.build_expr(inner.next().unwrap());
                while let Some(op) = inner.next() {
                    let rhs = self.build_expr(inner.next().unwrap());
                    acc = if op.as_str() == "+" {
                        Expr::Add(vec![acc, rhs])
                    } else {
                        Expr::Sub(vec![acc, rhs])
                    };
                }
                acc
            }
            Rule::multiplicative => {
                let mut inner = pair.into_inner();
                let mut acc = self.build_expr(inner.next().unwrap());
                while let Some(op) = inner.next() {
                    let rhs = self.build_expr(inner.next().unwrap());
                    acc = match op.as_str() {
                        "*" => Expr::Mul(vec![acc, rhs]),
                        "/" => Expr::Div(vec![acc, rhs]),
                        _ => Expr::Mod(vec![acc, rhs]),
                    };
                }
                acc
            }
            Rule::unary => {
                let mut negs = 0usize;
                let mut operand = None;
                for p in pair.into_inner() {
                    if p.as_rule() == Rule::neg_op {
                        negs += 1;
                    } else {
                        operand = Some(p);
                    }
                }
                let mut e = self.build_expr(operand.unwrap());
                for _ in 0..negs {
                    e = Expr::Neg(Box::new(e));
                }
                e
            }
            Rule::number => Expr::Num(self.parse_number(&pair)),
            Rule::label_ref => Expr::Label(self.intern(pair.as_str())),
            other => unreachable!("unexpected rule in expression: {:?}", other),
        }
    }

    fn parse_number(&mut self, pair: &Pair<Rule>) -> i64 {
        let text = pair.as_str().to_ascii_lowercase();
        let parsed = if let Some(hex) = text.strip_prefix("0x") {
            u64::from_str_radix(hex, 16)
        } else if let Some(bin) = text.strip_prefix("0b") {
            u64::from_str_radix(bin, 2)
        } else if let Some(oct) = text.strip_prefix("0o") {
            u64::from_str_radix(oct, 8)
        } else {
            text.parse::<u64>()
        };
        match parsed {
            Ok(v) => v as i64,
            Err(_) => {
                self.diag
                    .report(span_of(pair), "integer literal does not fit in 64 bits");
                0
            }
        }
    }

    // --- operands ---

    fn build_register(&mut self, pair: Pair<Rule>) -> u32 {
        let r: u32 = pair.as_str()[1..].parse().unwrap_or(u32::MAX);
        if r > 15 {
            let e = AssemblyError::OperandOutOfRange {
                what: "register number",
                bits: 4,
            };
            self.diag.report(span_of(&pair), &e.to_string());
            return 0;
        }
        r
    }

    fn build_arg(&mut self, pair: Pair<Rule>) -> InsnArg {
        match pair.as_rule() {
            Rule::register_arg => {
                InsnArg::Register(self.build_register(pair.into_inner().next().unwrap()))
            }
            Rule::register_plus => {
                let mut inner = pair.into_inner();
                let reg = self.build_register(inner.next().unwrap());
                let op = inner.next().unwrap().as_str().to_string();
                let offset = self.build_expr(inner.next().unwrap());
                let constant = if op == "-" {
                    Expr::Neg(Box::new(offset))
                } else {
                    offset
                };
                InsnArg::RegisterPlus { reg, constant }
            }
            Rule::register_lshift | Rule::register_rshift => {
                let left = pair.as_rule() == Rule::register_lshift;
                let mut inner = pair.into_inner();
                let reg = self.build_register(inner.next().unwrap());
                let shift = self.shift_distance(inner.next().unwrap(), 1, 4);
                if left {
                    InsnArg::RegisterLshift { reg, shift }
                } else {
                    InsnArg::RegisterRshift { reg, shift }
                }
            }
            Rule::const_arg => {
                InsnArg::Constant(self.build_expr(pair.into_inner().next().unwrap()))
            }
            other => unreachable!("unexpected rule in operand: {:?}", other),
        }
    }

    fn shift_distance(&mut self, pair: Pair<Rule>, min: u8, max: u8) -> u8 {
        let v = self.parse_number(&pair);
        if v < min as i64 || v > max as i64 {
            self.diag.report(
                span_of(&pair),
                &format!("shift distance must be between {} and {}", min, max),
            );
            return min;
        }
        v as u8
    }

    // --- instructions ---

    fn build_data_bytes(&mut self, pair: Pair<Rule>) {
        let span = span_of(&pair);
        let mut inner = pair.into_inner();
        let low = self.build_expr(inner.next().unwrap());
        let high = match inner.next() {
            Some(p) => self.build_expr(p),
            None => Expr::Undef,
        };
        self.push_insn(
            InsnKind::Data(RawData {
                width: DataWidth::Bytes,
                low,
                high,
            }),
            span,
        );
    }

    fn build_data_list(&mut self, pair: Pair<Rule>, width: DataWidth) {
        let span = span_of(&pair);
        for p in pair.into_inner() {
            let low = self.build_expr(p);
            self.push_insn(
                InsnKind::Data(RawData {
                    width,
                    low,
                    high: Expr::Undef,
                }),
                span,
            );
        }
    }

    fn build_load_store(&mut self, pair: Pair<Rule>) {
        let span = span_of(&pair);
        let mut inner = pair.into_inner();
        let mnemonic = inner.next().unwrap().as_str().to_ascii_lowercase();

        let kind = if mnemonic.starts_with("ld") {
            LoadStoreKind::Load
        } else {
            LoadStoreKind::Store
        };
        let mut suffix = mnemonic[3..].chars();
        let size = match suffix.next() {
            Some('b') => LoadStoreSize::Byte,
            _ => LoadStoreSize::Halfword,
        };
        let dest = match suffix.next() {
            Some('z') => LoadStoreDest::Zext,
            Some('s') => LoadStoreDest::Sext,
            Some('l') => LoadStoreDest::Loww,
            Some('h') => LoadStoreDest::Highw,
            // Loads zero-extend by default; stores take the low word.
            _ if kind == LoadStoreKind::Load => LoadStoreDest::Zext,
            _ => LoadStoreDest::Loww,
        };

        let value = InsnArg::Register(self.build_register(inner.next().unwrap()));
        let addr = self.build_ls_addr(inner.next().unwrap());

        self.push_insn(
            InsnKind::LoadStore {
                kind,
                size,
                dest,
                args: vec![value],
                addr,
            },
            span,
        );
    }

    fn build_ls_addr(&mut self, pair: Pair<Rule>) -> AddrSpec {
        let inner = pair.into_inner().next().unwrap();
        match inner.as_rule() {
            Rule::ls_reg_form => {
                let mut parts = inner.into_inner();
                let reg_base = self.build_register(parts.next().unwrap());
                let mut addr = AddrSpec {
                    reg_base,
                    reg_index: 0,
                    shift: 0,
                    constant: Expr::Num(0),
                };
                for p in parts {
                    match p.as_rule() {
                        Rule::ls_index => {
                            let mut index = p.into_inner();
                            addr.reg_index = self.build_register(index.next().unwrap());
                            if let Some(n) = index.next() {
                                addr.shift = self.shift_distance(n, 0, 3);
                            }
                        }
                        Rule::ls_offset => {
                            addr.constant = self.build_expr(p.into_inner().next().unwrap());
                        }
                        other => unreachable!("unexpected rule in address: {:?}", other),
                    }
                }
                addr
            }
            // A bare expression addresses off the zero register.
            _ => AddrSpec {
                reg_base: 0,
                reg_index: 0,
                shift: 0,
                constant: self.build_expr(inner),
            },
        }
    }

    fn build_alu(&mut self, pair: Pair<Rule>) {
        let span = span_of(&pair);
        let mut inner = pair.into_inner();
        let op = match inner.next().unwrap().as_str().to_ascii_lowercase().as_str() {
            "add" => AluOp::Add,
            "sub" => AluOp::Sub,
            "sl" => AluOp::Sl,
            "sr" => AluOp::Sr,
            "lsl" => AluOp::Lsl,
            "lsr" => AluOp::Lsr,
            "or" => AluOp::Or,
            "eor" => AluOp::Eor,
            "and" => AluOp::And,
            "nor" => AluOp::Nor,
            "enor" => AluOp::Enor,
            "nand" => AluOp::Nand,
            other => unreachable!("unexpected alu mnemonic: {}", other),
        };
        let rd = InsnArg::Register(self.build_register(inner.next().unwrap()));
        let a1 = InsnArg::Register(self.build_register(inner.next().unwrap()));
        let a2 = self.build_arg(inner.next().unwrap());
        self.push_insn(
            InsnKind::Alu {
                op,
                args: vec![rd, a1, a2],
            },
            span,
        );
    }

    fn build_mov(&mut self, pair: Pair<Rule>) {
        let span = span_of(&pair);
        let mut inner = pair.into_inner();
        let mnemonic = inner.next().unwrap().as_str().to_ascii_lowercase();
        let is_jmp = mnemonic.starts_with("jmp");
        let condition = match mnemonic.split('.').nth(1) {
            None => Cond::Al,
            Some("al") => Cond::Al,
            Some("lt") => Cond::Lt,
            Some("slt") => Cond::Slt,
            Some("ge") => Cond::Ge,
            Some("sge") => Cond::Sge,
            Some("eq") => Cond::Eq,
            Some("ne") => Cond::Ne,
            Some("bs") => Cond::Bs,
            Some("gt") => Cond::Gt,
            Some("sgt") => Cond::Sgt,
            Some("le") => Cond::Le,
            Some("sle") => Cond::Sle,
            Some(other) => unreachable!("unexpected condition code: {}", other),
        };

        let args: Vec<InsnArg> = inner.map(|p| self.build_arg(p)).collect();

        let arity_ok = if is_jmp {
            matches!(args.len(), 1 | 3)
        } else {
            matches!(args.len(), 2..=4)
        };
        if !arity_ok {
            let e = if is_jmp {
                AssemblyError::InvalidJump {
                    reason: "expected a target and optionally two condition operands",
                }
            } else {
                AssemblyError::InvalidMov {
                    reason: "expected 2 to 4 operands",
                }
            };
            self.diag.report(span, &e.to_string());
            self.push_insn(InsnKind::Undefined, span);
            return;
        }

        self.push_insn(
            InsnKind::Mov {
                is_jmp,
                condition,
                args,
            },
            span,
        );
    }
}
