//! Two-pass symbolic assembler: source text in, encoded words and a symbol
//! table out (§4.5).
//!
//! Pass 1 walks every line once to assign byte addresses to labels. Pass 2
//! rescans with the populated symbol table and encodes each instruction
//! line, resolving any label operand to a PC-relative word offset. Neither
//! pass aborts on a malformed line: every failure is appended to an error
//! list with its 1-based source line, so one run reports every problem in a
//! file instead of stopping at the first.

mod operand;

use std::collections::HashMap;

use cyclesim_asm::{ArithmeticOp, ControlOp, Instruction, MemoryOp, Opcode};
use thiserror::Error;

use operand::{parse_immediate, parse_memory_operand, parse_register};

/// A resolved label: `name` mapped to the byte-aligned address of the
/// instruction that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u32,
}

/// One assembly-time failure, carrying the 1-based source line it came from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct AssembleError {
    pub line: usize,
    pub message: String,
}

/// Two-pass symbolic assembler. Reusable across files: [`Assembler::assemble`]
/// resets the symbol table on every call.
#[derive(Debug, Default)]
pub struct Assembler {
    symbols: HashMap<String, Symbol>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The symbol table populated by the most recent [`Assembler::assemble`] call.
    pub fn symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    /// Assembles `source` into a word stream plus any errors encountered.
    /// A non-empty error list means the word stream is incomplete or wrong
    /// for the offending lines; it is still returned so a caller can inspect
    /// what did assemble.
    pub fn assemble(&mut self, source: &str) -> (Vec<u32>, Vec<AssembleError>) {
        self.symbols.clear();
        let lines: Vec<&str> = source.lines().collect();
        let mut errors = Vec::new();

        let mut address = 0u32;
        for (i, raw) in lines.iter().enumerate() {
            let line_num = i + 1;
            let line = strip_comment(raw);
            if line.is_empty() {
                continue;
            }
            if let Some(label) = line.strip_suffix(':') {
                let label = label.trim().to_string();
                if self.symbols.contains_key(&label) {
                    errors.push(AssembleError {
                        line: line_num,
                        message: format!("duplicate label: {label}"),
                    });
                } else {
                    self.symbols.insert(
                        label.clone(),
                        Symbol {
                            name: label,
                            address,
                        },
                    );
                }
                continue;
            }
            address = address.wrapping_add(4);
        }

        let mut words = Vec::new();
        let mut address = 0u32;
        for (i, raw) in lines.iter().enumerate() {
            let line_num = i + 1;
            let line = strip_comment(raw);
            if line.is_empty() || line.ends_with(':') {
                continue;
            }
            match self.parse_instruction(line, address) {
                Ok(instr) => words.push(instr.encode()),
                Err(message) => errors.push(AssembleError {
                    line: line_num,
                    message,
                }),
            }
            address = address.wrapping_add(4);
        }

        (words, errors)
    }

    fn parse_instruction(&self, line: &str, address: u32) -> Result<Instruction, String> {
        let mut parts = line.splitn(2, char::is_whitespace);
        let mnemonic = parts.next().unwrap_or_default().to_ascii_uppercase();
        let rest = parts.next().unwrap_or_default().trim();

        let operands: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else if matches!(mnemonic.as_str(), "LDR" | "STR") {
            rest.splitn(2, ',').map(str::trim).collect()
        } else {
            rest.split(',').map(str::trim).collect()
        };

        match mnemonic.as_str() {
            "ADD" | "ADDS" | "SUB" | "SUBS" | "MUL" | "DIV" | "AND" | "OR" | "XOR" | "MOD" => {
                self.parse_register_triple(&mnemonic, &operands)
            }
            "ADDI" | "ADDIS" | "SUBI" | "SUBIS" | "MULI" | "DIVI" | "ANDI" | "ORI" | "XORI"
            | "MODI" | "MOVI" => self.parse_immediate_arith(&mnemonic, &operands),
            "SHL" | "SHR" => self.parse_shift(&mnemonic, &operands),
            "MOV" => self.parse_mov(&operands),
            "CMP" => self.parse_cmp(&operands),
            "LDR" | "STR" => self.parse_memory(&mnemonic, &operands),
            "JMP" => self.parse_jmp(&operands, address),
            "BEQ" | "BLT" => self.parse_branch(&mnemonic, &operands, address),
            "CAL" | "FLUSH" => self.parse_register_form_control(&mnemonic, &operands),
            other => Err(format!("unknown instruction: {other}")),
        }
    }

    fn parse_register_triple(&self, mnemonic: &str, operands: &[&str]) -> Result<Instruction, String> {
        if operands.len() != 3 {
            return Err(format!("expected 3 operands for {mnemonic}"));
        }
        let rd = parse_register(operands[0]).ok_or_else(|| invalid_reg("destination", operands[0]))?;
        let rs1 = parse_register(operands[1]).ok_or_else(|| invalid_reg("source 1", operands[1]))?;
        let rs2 = parse_register(operands[2]).ok_or_else(|| invalid_reg("source 2", operands[2]))?;
        let op = arithmetic_register_op(mnemonic).ok_or_else(|| format!("unknown instruction: {mnemonic}"))?;
        Ok(Instruction {
            opcode: Opcode::Arithmetic(op),
            rd,
            rs1,
            rs2,
            imm: 0,
        })
    }

    fn parse_immediate_arith(&self, mnemonic: &str, operands: &[&str]) -> Result<Instruction, String> {
        if operands.len() != 2 && operands.len() != 3 {
            return Err(format!("expected 2 or 3 operands for {mnemonic}"));
        }
        let rd = parse_register(operands[0]).ok_or_else(|| invalid_reg("destination", operands[0]))?;
        let (rs1, imm) = if operands.len() == 2 {
            let imm = parse_immediate(operands[1])
                .ok_or_else(|| format!("invalid immediate value: {}", operands[1]))?;
            (0, imm)
        } else {
            let rs1 = parse_register(operands[1]).ok_or_else(|| invalid_reg("source", operands[1]))?;
            let imm = parse_immediate(operands[2])
                .ok_or_else(|| format!("invalid immediate value: {}", operands[2]))?;
            (rs1, imm)
        };
        let op = arithmetic_immediate_op(mnemonic).ok_or_else(|| format!("unknown instruction: {mnemonic}"))?;
        Ok(Instruction {
            opcode: Opcode::Arithmetic(op),
            rd,
            rs1,
            rs2: 0,
            imm,
        })
    }

    fn parse_shift(&self, mnemonic: &str, operands: &[&str]) -> Result<Instruction, String> {
        if operands.len() != 3 {
            return Err(format!("expected 3 operands for {mnemonic}"));
        }
        let rd = parse_register(operands[0]).ok_or_else(|| invalid_reg("destination", operands[0]))?;
        let rs1 = parse_register(operands[1]).ok_or_else(|| invalid_reg("source", operands[1]))?;
        let imm = parse_immediate(operands[2])
            .ok_or_else(|| format!("invalid shift amount: {}", operands[2]))?;
        let op = match mnemonic {
            "SHL" => ArithmeticOp::Shl,
            "SHR" => ArithmeticOp::Shr,
            _ => unreachable!("caller only dispatches SHL/SHR here"),
        };
        Ok(Instruction {
            opcode: Opcode::Arithmetic(op),
            rd,
            rs1,
            rs2: 0,
            imm,
        })
    }

    fn parse_mov(&self, operands: &[&str]) -> Result<Instruction, String> {
        if operands.len() != 2 {
            return Err("expected 2 operands for MOV".to_string());
        }
        let rd = parse_register(operands[0]).ok_or_else(|| invalid_reg("destination", operands[0]))?;
        let rs1 = parse_register(operands[1]).ok_or_else(|| invalid_reg("source", operands[1]))?;
        Ok(Instruction {
            opcode: Opcode::Arithmetic(ArithmeticOp::Mov),
            rd,
            rs1,
            rs2: 0,
            imm: 0,
        })
    }

    fn parse_cmp(&self, operands: &[&str]) -> Result<Instruction, String> {
        if operands.len() != 2 {
            return Err("expected 2 operands for CMP".to_string());
        }
        let rs1 = parse_register(operands[0]).ok_or_else(|| invalid_reg("source 1", operands[0]))?;
        let rs2 = parse_register(operands[1]).ok_or_else(|| invalid_reg("source 2", operands[1]))?;
        Ok(Instruction {
            opcode: Opcode::Arithmetic(ArithmeticOp::Cmp),
            rd: 0,
            rs1,
            rs2,
            imm: 0,
        })
    }

    fn parse_memory(&self, mnemonic: &str, operands: &[&str]) -> Result<Instruction, String> {
        if operands.len() != 2 {
            return Err(format!("expected 2 operands for {mnemonic}"));
        }
        let (base, imm) = parse_memory_operand(operands[1])
            .ok_or_else(|| "memory operand must be in [base, offset] format".to_string())?;
        match mnemonic {
            "LDR" => {
                let rd = parse_register(operands[0]).ok_or_else(|| invalid_reg("destination", operands[0]))?;
                Ok(Instruction {
                    opcode: Opcode::Memory(MemoryOp::Ldr),
                    rd,
                    rs1: base,
                    rs2: 0,
                    imm,
                })
            }
            "STR" => {
                let rs2 = parse_register(operands[0]).ok_or_else(|| invalid_reg("source", operands[0]))?;
                Ok(Instruction {
                    // the codec's `rd` field is repurposed by STR to carry the value register.
                    opcode: Opcode::Memory(MemoryOp::Str),
                    rd: rs2,
                    rs1: base,
                    rs2: 0,
                    imm,
                })
            }
            _ => unreachable!("caller only dispatches LDR/STR here"),
        }
    }

    fn parse_jmp(&self, operands: &[&str], address: u32) -> Result<Instruction, String> {
        if operands.len() != 1 {
            return Err("expected 1 operand for JMP".to_string());
        }
        if let Some(rs1) = parse_register(operands[0]) {
            return Ok(Instruction {
                opcode: Opcode::Control(ControlOp::Jmp),
                rd: 0,
                rs1,
                rs2: 0,
                imm: 0,
            });
        }
        let imm = self.resolve_label(operands[0], address)?;
        Ok(Instruction {
            opcode: Opcode::Control(ControlOp::Jmp),
            rd: 0,
            rs1: 0,
            rs2: 0,
            imm,
        })
    }

    fn parse_branch(&self, mnemonic: &str, operands: &[&str], address: u32) -> Result<Instruction, String> {
        if operands.len() != 1 {
            return Err(format!("expected 1 operand for {mnemonic}"));
        }
        let imm = match parse_immediate(operands[0]) {
            Some(imm) => imm,
            None => self.resolve_label(operands[0], address)?,
        };
        let op = match mnemonic {
            "BEQ" => ControlOp::Beq,
            "BLT" => ControlOp::Blt,
            _ => unreachable!("caller only dispatches BEQ/BLT here"),
        };
        Ok(Instruction {
            opcode: Opcode::Control(op),
            rd: 0,
            rs1: 0,
            rs2: 0,
            imm,
        })
    }

    fn parse_register_form_control(&self, mnemonic: &str, operands: &[&str]) -> Result<Instruction, String> {
        if operands.len() != 1 {
            return Err(format!("expected 1 operand for {mnemonic}"));
        }
        let rs1 = parse_register(operands[0]).ok_or_else(|| "invalid register".to_string())?;
        let op = match mnemonic {
            "CAL" => ControlOp::Cal,
            "FLUSH" => ControlOp::Flush,
            _ => unreachable!("caller only dispatches CAL/FLUSH here"),
        };
        Ok(Instruction {
            opcode: Opcode::Control(op),
            rd: 0,
            rs1,
            rs2: 0,
            imm: 0,
        })
    }

    /// Resolves `label` to a PC-relative word offset from the instruction at
    /// `address`: `(target - (address + 4)) >> 2`.
    fn resolve_label(&self, label: &str, address: u32) -> Result<i32, String> {
        let symbol = self
            .symbols
            .get(label)
            .ok_or_else(|| format!("undefined label: {label}"))?;
        let next_pc = i64::from(address) + 4;
        let offset = (i64::from(symbol.address) - next_pc) >> 2;
        Ok(offset as i32)
    }
}

fn arithmetic_register_op(mnemonic: &str) -> Option<ArithmeticOp> {
    Some(match mnemonic {
        "ADD" => ArithmeticOp::Add,
        "ADDS" => ArithmeticOp::Adds,
        "SUB" => ArithmeticOp::Sub,
        "SUBS" => ArithmeticOp::Subs,
        "MUL" => ArithmeticOp::Mul,
        "DIV" => ArithmeticOp::Div,
        "AND" => ArithmeticOp::And,
        "OR" => ArithmeticOp::Or,
        "XOR" => ArithmeticOp::Xor,
        "MOD" => ArithmeticOp::Mod,
        _ => return None,
    })
}

fn arithmetic_immediate_op(mnemonic: &str) -> Option<ArithmeticOp> {
    Some(match mnemonic {
        "ADDI" => ArithmeticOp::Addi,
        "ADDIS" => ArithmeticOp::Addis,
        "SUBI" => ArithmeticOp::Subi,
        "SUBIS" => ArithmeticOp::Subis,
        "MULI" => ArithmeticOp::Muli,
        "DIVI" => ArithmeticOp::Divi,
        "ANDI" => ArithmeticOp::Andi,
        "ORI" => ArithmeticOp::Ori,
        "XORI" => ArithmeticOp::Xori,
        "MODI" => ArithmeticOp::Modi,
        "MOVI" => ArithmeticOp::Movi,
        _ => return None,
    })
}

fn invalid_reg(role: &str, text: &str) -> String {
    format!("invalid {role} register: {text}")
}

/// Strips a `#`-to-end-of-line comment and surrounding whitespace.
fn strip_comment(line: &str) -> &str {
    let code = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    code.trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_line_program_has_no_errors() {
        let mut asm = Assembler::new();
        let (words, errors) = asm.assemble("add r1, r2, r3\naddi r1, r2, 10");
        assert!(errors.is_empty());
        assert_eq!(words.len(), 2);
    }

    #[test]
    fn duplicate_label_is_an_error() {
        let mut asm = Assembler::new();
        let (_, errors) = asm.assemble("start:\naddi r1, r0, 1\nstart:\naddi r2, r0, 2");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("duplicate label"));
    }

    #[test]
    fn mov_is_a_two_operand_register_form() {
        let mut asm = Assembler::new();
        let (words, errors) = asm.assemble("mov r1, r2");
        assert!(errors.is_empty());
        let mov = Instruction::decode(words[0]).unwrap();
        assert_eq!(mov.opcode, Opcode::Arithmetic(ArithmeticOp::Mov));
        assert_eq!(mov.rd, 1);
        assert_eq!(mov.rs1, 2);
    }

    #[test]
    fn undefined_label_is_an_error() {
        let mut asm = Assembler::new();
        let (_, errors) = asm.assemble("beq nowhere");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("undefined label"));
    }

    #[test]
    fn invalid_register_and_immediate_are_reported() {
        let mut asm = Assembler::new();
        let (_, errors) = asm.assemble("add r32, r1, r2\naddi r1, r2, invalid");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn memory_operand_requires_brackets() {
        let mut asm = Assembler::new();
        let (_, errors) = asm.assemble("ldr r1, r2, 100");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let mut asm = Assembler::new();
        let source = "\n# a full-line comment\naddi r1, r0, 10 # trailing\n\naddi r2, r0, 20\n";
        let (words, errors) = asm.assemble(source);
        assert!(errors.is_empty());
        assert_eq!(words.len(), 2);
    }

    #[test]
    fn immediate_formats_decimal_hex_binary() {
        let mut asm = Assembler::new();
        let source = "addi r1, r0, 10\naddi r2, r0, 0xA\naddi r3, r0, 0b1010";
        let (words, errors) = asm.assemble(source);
        assert!(errors.is_empty());
        assert_eq!(words.len(), 3);
        // all three encode the same immediate value (10).
        assert_eq!(words[0], words[1]);
        assert_eq!(words[1], words[2]);
    }

    #[test]
    fn labels_resolve_to_pc_relative_word_offset() {
        let mut asm = Assembler::new();
        let source = "start:\naddi r1, r0, 3\nloop:\nsubi r1, r1, 1\nbeq loop";
        let (words, errors) = asm.assemble(source);
        assert!(errors.is_empty());
        assert_eq!(words.len(), 3);
        let beq = Instruction::decode(words[2]).unwrap();
        // loop: sits at byte address 4; beq is at 8, so its successor (the
        // PC the offset is relative to) is 12, giving (4 - 12) >> 2 == -2.
        assert_eq!(beq.imm, -2);
    }

    #[test]
    fn jmp_accepts_register_but_not_bare_immediate() {
        let mut asm = Assembler::new();
        let (_, errors) = asm.assemble("jmp r1");
        assert!(errors.is_empty());
        let (_, errors) = asm.assemble("jmp 100");
        assert_eq!(errors.len(), 1);
    }
}
