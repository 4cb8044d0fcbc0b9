//! The five-stage in-order pipeline engine: hazard detection, operand
//! forwarding, stalls, branch-induced flushes, and the pipelined/sequential
//! mode switch.
//!
//! The defining trick, preserved exactly from the source this was modelled
//! on, is that [`PipelineEngine::step`] runs the five stages in *reverse*
//! order (WRITEBACK → MEMORY → EXECUTE → DECODE → FETCH) within a single
//! call. That ordering is what lets a sequential host simulate one cycle of
//! five-stage parallelism: each stage consumes the latch its upstream
//! neighbour produced *last* cycle before that neighbour overwrites it this
//! cycle, and a stage downstream of EXECUTE/MEMORY already sees this
//! cycle's freshly computed result when it checks for forwarding.

mod alu;
mod latch;

pub use latch::{Hazard, Latch, Stage};

use cyclesim_asm::{ArithmeticOp, ControlOp, Instruction, MemoryOp, Opcode};
use tracing::trace;

use crate::memory::MemorySystem;
use crate::registers::RegisterFile;

/// Aggregate counters an observer reads between [`PipelineEngine::step`] calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub cycles: u64,
    pub instructions: u64,
    pub stall_count: u64,
    pub flush_count: u64,
}

/// The five-stage in-order pipeline. Owns its own latches and PC; does not
/// own the register file or memory system, which are passed into
/// [`PipelineEngine::step`] by the [`crate::Machine`] that wires them
/// together (per the "unidirectional dependency" re-architecture guidance:
/// the pipeline drives memory, never the reverse).
#[derive(Debug, Clone)]
pub struct PipelineEngine {
    latches: [Latch; 5],
    pc: u32,
    enabled: bool,
    stalled: bool,
    flushed: bool,
    stats: PipelineStats,
    sequential_stage: Stage,
    sequential_latch: Latch,
    sequential_branch_taken: bool,
}

impl Default for PipelineEngine {
    fn default() -> Self {
        PipelineEngine {
            latches: [
                Latch::bubble(),
                Latch::bubble(),
                Latch::bubble(),
                Latch::bubble(),
                Latch::bubble(),
            ],
            pc: 0,
            enabled: true,
            stalled: false,
            flushed: false,
            stats: PipelineStats::default(),
            sequential_stage: Stage::Fetch,
            sequential_latch: Latch::bubble(),
            sequential_branch_taken: false,
        }
    }
}

impl PipelineEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Switches between pipelined and strictly sequential execution. Per
    /// §4.4, sequential mode threads one instruction through all five
    /// stages before the next begins; switching modes mid-program discards
    /// whatever is currently in flight.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.latches = [
            Latch::bubble(),
            Latch::bubble(),
            Latch::bubble(),
            Latch::bubble(),
            Latch::bubble(),
        ];
        self.sequential_stage = Stage::Fetch;
        self.sequential_latch = Latch::bubble();
        self.stalled = false;
        self.flushed = false;
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn stalled(&self) -> bool {
        self.stalled
    }

    pub fn flushed(&self) -> bool {
        self.flushed
    }

    /// Inspects the latch currently owned by `stage` (its most recent
    /// output), for observers.
    pub fn latch(&self, stage: Stage) -> &Latch {
        &self.latches[stage as usize]
    }

    pub fn step(&mut self, regs: &mut RegisterFile, memory: &mut MemorySystem) {
        if self.enabled {
            self.step_pipelined(regs, memory);
        } else {
            self.step_sequential(regs, memory);
        }
    }

    fn step_pipelined(&mut self, regs: &mut RegisterFile, memory: &mut MemorySystem) {
        let prev_memory = self.latches[Stage::Memory as usize].clone();
        let prev_execute = self.latches[Stage::Execute as usize].clone();
        let prev_decode = self.latches[Stage::Decode as usize].clone();
        let prev_fetch = self.latches[Stage::Fetch as usize].clone();

        self.writeback(&prev_memory, regs);
        self.run_memory(&prev_execute, memory);
        self.run_execute(&prev_decode, regs, memory);
        self.run_decode(&prev_fetch, regs);
        self.run_fetch(memory);

        if !self.stalled && !self.flushed {
            self.pc += 4;
        }
        self.stalled = false;
        self.flushed = false;
        self.stats.cycles += 1;
    }

    fn writeback(&mut self, latch: &Latch, regs: &mut RegisterFile) {
        if latch.is_bubble() {
            return;
        }
        if latch.write_back && latch.rd_index != 0 {
            let value = writeback_value(latch);
            regs.set(latch.rd_index, value);
        }
        self.stats.instructions += 1;
    }

    fn run_memory(&mut self, latch: &Latch, memory: &mut MemorySystem) {
        self.latches[Stage::Memory as usize] = memory_access(latch, memory);
    }

    fn run_execute(&mut self, latch: &Latch, regs: &mut RegisterFile, memory: &mut MemorySystem) {
        if latch.is_bubble() {
            self.latches[Stage::Execute as usize] = Latch::bubble();
            return;
        }
        let instr = latch.instruction.unwrap();
        let mut next = Latch {
            instruction: Some(instr),
            pc: latch.pc,
            rs1_value: latch.rs1_value,
            rs2_value: latch.rs2_value,
            rd_index: latch.rd_index,
            imm: latch.imm,
            alu_result: 0,
            memory_data: 0,
            write_back: false,
            hazard: Hazard::None,
        };

        match instr.opcode {
            Opcode::Arithmetic(op) => {
                let (result, carry, overflow) =
                    eval_arithmetic(op, latch.rs1_value, latch.rs2_value, latch.imm);
                next.alu_result = result;
                next.write_back = op.writes_register();
                if op.updates_flags() {
                    regs.update_flags(result, Some(carry), Some(overflow));
                }
            }
            Opcode::Memory(_) => {
                next.alu_result = latch.rs1_value.wrapping_add(latch.imm as u32);
            }
            Opcode::Control(ctrl) => self.execute_control(ctrl, latch, regs, memory),
        }
        self.latches[Stage::Execute as usize] = next;
    }

    fn execute_control(
        &mut self,
        ctrl: ControlOp,
        latch: &Latch,
        regs: &RegisterFile,
        memory: &mut MemorySystem,
    ) {
        match ctrl {
            ControlOp::Jmp | ControlOp::Cal => {
                self.pc = latch.rs1_value.wrapping_add(latch.imm as u32);
                self.raise_flush();
            }
            ControlOp::Beq => {
                if regs.flags().zero {
                    self.pc = branch_target(latch.pc, latch.imm);
                    self.raise_flush();
                }
            }
            ControlOp::Blt => {
                if regs.flags().negative {
                    self.pc = branch_target(latch.pc, latch.imm);
                    self.raise_flush();
                }
            }
            ControlOp::Flush => {
                let _ = memory.flush_cache_line(latch.rs1_value);
            }
        }
    }

    fn raise_flush(&mut self) {
        self.flushed = true;
        self.stats.flush_count += 1;
    }

    fn run_decode(&mut self, latch: &Latch, regs: &RegisterFile) {
        if self.flushed || latch.is_bubble() {
            self.latches[Stage::Decode as usize] = Latch::bubble();
            return;
        }
        let instr = latch.instruction.unwrap();

        let (rs1_idx, rs2_idx, rd_index) = operand_indices(instr);
        let mut rs1_value = regs.get(rs1_idx);
        let mut rs2_value = regs.get(rs2_idx);

        let exec_latch = self.latches[Stage::Execute as usize].clone();
        let mem_latch = self.latches[Stage::Memory as usize].clone();
        let hazard1 = self.forward(rs1_idx, &mut rs1_value, &exec_latch, &mem_latch);
        let hazard2 = self.forward(rs2_idx, &mut rs2_value, &exec_latch, &mem_latch);
        let hazard = [hazard1, hazard2]
            .into_iter()
            .find(|h| *h != Hazard::None)
            .unwrap_or(Hazard::None);

        let clashes = rd_index != 0
            && ((exec_latch.write_back && exec_latch.rd_index == rd_index)
                || (mem_latch.write_back && mem_latch.rd_index == rd_index));
        if clashes {
            trace!(rd_index, "WAW/WAR hazard, stalling one cycle");
            self.stalled = true;
            self.stats.stall_count += 1;
            self.latches[Stage::Decode as usize] = Latch {
                hazard: Hazard::Stall,
                ..Latch::bubble()
            };
            return;
        }

        self.latches[Stage::Decode as usize] = Latch {
            instruction: Some(instr),
            pc: latch.pc,
            rs1_value,
            rs2_value,
            rd_index,
            imm: instr.imm,
            alu_result: 0,
            memory_data: 0,
            write_back: false,
            hazard,
        };
    }

    /// RAW hazard resolution: EXECUTE's freshly computed result takes
    /// priority over MEMORY's; never forwards from R0.
    fn forward(&self, reg_idx: u8, value: &mut u32, exec_latch: &Latch, mem_latch: &Latch) -> Hazard {
        if reg_idx == 0 {
            return Hazard::None;
        }
        if exec_latch.write_back && exec_latch.rd_index == reg_idx {
            *value = exec_latch.alu_result;
            return Hazard::ForwardFromExecute;
        }
        if mem_latch.write_back && mem_latch.rd_index == reg_idx {
            *value = writeback_value(mem_latch);
            return Hazard::ForwardFromMemory;
        }
        Hazard::None
    }

    fn run_fetch(&mut self, memory: &mut MemorySystem) {
        if self.flushed {
            // EXECUTE already retargeted `pc` to the branch target this very
            // cycle; fetching it here too would double-issue that
            // instruction, since the flush also suppresses this cycle's
            // `pc += 4` and leaves `pc` sitting on the target for the fetch
            // that legitimately belongs to next cycle.
            self.latches[Stage::Fetch as usize] = Latch::bubble();
            return;
        }
        let pc = self.pc;
        self.latches[Stage::Fetch as usize] = match memory.read(pc, true) {
            Ok((word, _cost)) => match Instruction::decode(word) {
                Ok(instruction) => Latch {
                    instruction: Some(instruction),
                    pc,
                    ..Latch::bubble()
                },
                Err(err) => {
                    trace!(%err, pc, "undecodable instruction, installing bubble");
                    Latch::bubble()
                }
            },
            Err(err) => {
                trace!(%err, pc, "fetch out of range, installing bubble");
                Latch::bubble()
            }
        };
    }

    fn step_sequential(&mut self, regs: &mut RegisterFile, memory: &mut MemorySystem) {
        match self.sequential_stage {
            Stage::Fetch => {
                let pc = self.pc;
                self.sequential_latch = match memory.read(pc, true) {
                    Ok((word, _)) => match Instruction::decode(word) {
                        Ok(instruction) => Latch {
                            instruction: Some(instruction),
                            pc,
                            ..Latch::bubble()
                        },
                        Err(_) => Latch::bubble(),
                    },
                    Err(_) => Latch::bubble(),
                };
                self.sequential_branch_taken = false;
            }
            Stage::Decode => {
                if let Some(instr) = self.sequential_latch.instruction {
                    let (rs1_idx, rs2_idx, rd_index) = operand_indices(instr);
                    self.sequential_latch.rs1_value = regs.get(rs1_idx);
                    self.sequential_latch.rs2_value = regs.get(rs2_idx);
                    self.sequential_latch.rd_index = rd_index;
                    self.sequential_latch.imm = instr.imm;
                }
            }
            Stage::Execute => {
                if let Some(instr) = self.sequential_latch.instruction {
                    let latch = self.sequential_latch.clone();
                    match instr.opcode {
                        Opcode::Arithmetic(op) => {
                            let (result, carry, overflow) =
                                eval_arithmetic(op, latch.rs1_value, latch.rs2_value, latch.imm);
                            self.sequential_latch.alu_result = result;
                            self.sequential_latch.write_back = op.writes_register();
                            if op.updates_flags() {
                                regs.update_flags(result, Some(carry), Some(overflow));
                            }
                        }
                        Opcode::Memory(_) => {
                            self.sequential_latch.alu_result =
                                latch.rs1_value.wrapping_add(latch.imm as u32);
                        }
                        Opcode::Control(ctrl) => {
                            self.sequential_branch_taken = self.execute_control_sequential(
                                ctrl, &latch, regs, memory,
                            );
                        }
                    }
                }
            }
            Stage::Memory => {
                if let Some(instr) = self.sequential_latch.instruction {
                    let latch = self.sequential_latch.clone();
                    match instr.opcode {
                        Opcode::Memory(MemoryOp::Ldr) => {
                            if let Ok((word, _)) = memory.read(latch.alu_result, false) {
                                self.sequential_latch.memory_data = word;
                                self.sequential_latch.write_back = true;
                            }
                        }
                        Opcode::Memory(MemoryOp::Str) => {
                            let _ = memory.write(latch.alu_result, latch.rs2_value);
                        }
                        _ => {}
                    }
                }
            }
            Stage::Writeback => {
                let latch = self.sequential_latch.clone();
                if !latch.is_bubble() {
                    if latch.write_back && latch.rd_index != 0 {
                        regs.set(latch.rd_index, writeback_value(&latch));
                    }
                    self.stats.instructions += 1;
                }
                if !self.sequential_branch_taken {
                    self.pc += 4;
                }
                self.sequential_latch = Latch::bubble();
            }
        }
        self.stats.cycles += 1;
        self.sequential_stage = self.sequential_stage.next();
    }

    fn execute_control_sequential(
        &mut self,
        ctrl: ControlOp,
        latch: &Latch,
        regs: &RegisterFile,
        memory: &mut MemorySystem,
    ) -> bool {
        match ctrl {
            ControlOp::Jmp | ControlOp::Cal => {
                self.pc = latch.rs1_value.wrapping_add(latch.imm as u32);
                true
            }
            ControlOp::Beq if regs.flags().zero => {
                self.pc = branch_target(latch.pc, latch.imm);
                true
            }
            ControlOp::Blt if regs.flags().negative => {
                self.pc = branch_target(latch.pc, latch.imm);
                true
            }
            ControlOp::Beq | ControlOp::Blt => false,
            ControlOp::Flush => {
                let _ = memory.flush_cache_line(latch.rs1_value);
                false
            }
        }
    }
}

/// `BEQ`/`BLT` carry a PC-relative *word* offset resolved by the assembler
/// as `(target - (pc + 4)) >> 2` (§4.5) — relative to the instruction
/// *after* the branch, the way the branch's own successor would be fetched.
/// This inverts that: `next_pc + offset * 4 == target`.
fn branch_target(instruction_pc: u32, imm: i32) -> u32 {
    let next_pc = instruction_pc.wrapping_add(4);
    next_pc.wrapping_add((imm.wrapping_mul(4)) as u32)
}

/// For `STR`, the encoded `rd` field is repurposed as the value-source
/// register (the format has no distinct third field); writeback's
/// destination is therefore suppressed by reporting index `0`.
fn operand_indices(instr: Instruction) -> (u8, u8, u8) {
    match instr.opcode {
        Opcode::Memory(MemoryOp::Str) => (instr.rs1, instr.rd, 0),
        _ => (instr.rs1, instr.rs2, instr.rd),
    }
}

fn memory_access(latch: &Latch, memory: &mut MemorySystem) -> Latch {
    if latch.is_bubble() {
        return Latch::bubble();
    }
    let instr = latch.instruction.unwrap();
    let mut next = latch.clone();
    match instr.opcode {
        Opcode::Memory(MemoryOp::Ldr) => match memory.read(latch.alu_result, false) {
            Ok((word, _cost)) => {
                next.memory_data = word;
                next.write_back = true;
            }
            Err(err) => {
                trace!(%err, addr = latch.alu_result, "load faulted, installing bubble");
                return Latch::bubble();
            }
        },
        Opcode::Memory(MemoryOp::Str) => {
            if let Err(err) = memory.write(latch.alu_result, latch.rs2_value) {
                trace!(%err, addr = latch.alu_result, "store faulted, installing bubble");
                return Latch::bubble();
            }
            next.write_back = false;
        }
        _ => {}
    }
    next
}

fn writeback_value(latch: &Latch) -> u32 {
    match latch.instruction {
        Some(Instruction {
            opcode: Opcode::Memory(MemoryOp::Ldr),
            ..
        }) => latch.memory_data,
        _ => latch.alu_result,
    }
}

fn eval_arithmetic(op: ArithmeticOp, rs1: u32, rs2: u32, imm: i32) -> (u32, bool, bool) {
    use ArithmeticOp::*;
    let b = if op.rs2_is_immediate() { imm as u32 } else { rs2 };
    match op {
        Add | Addi => {
            let (r, _, _) = alu::add_with_flags(rs1, b);
            (r, false, false)
        }
        Adds | Addis => alu::add_with_flags(rs1, b),
        Sub | Subi => {
            let (r, _, _) = alu::sub_with_flags(rs1, b);
            (r, false, false)
        }
        Subs | Subis => alu::sub_with_flags(rs1, b),
        Cmp => {
            let (_, carry, overflow) = alu::sub_with_flags(rs1, rs2);
            (rs1.wrapping_sub(rs2), carry, overflow)
        }
        Mul | Muli => (rs1.wrapping_mul(b), false, false),
        Div | Divi => (alu::checked_div(rs1 as i32, b as i32), false, false),
        Mod | Modi => (alu::checked_mod(rs1 as i32, b as i32), false, false),
        And | Andi => (rs1 & b, false, false),
        Or | Ori => (rs1 | b, false, false),
        Xor | Xori => (rs1 ^ b, false, false),
        Shl => (rs1.wrapping_shl((imm as u32) & 31), false, false),
        Shr => (rs1.wrapping_shr((imm as u32) & 31), false, false),
        Mov => (rs1, false, false),
        Movi => (imm as u32, false, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use cyclesim_asm::{ArithmeticOp, ControlOp, Instruction, Opcode};

    fn program(words: &[u32]) -> (PipelineEngine, RegisterFile, MemorySystem) {
        let mut memory = MemorySystem::new(MemoryConfig::default());
        memory.load_program(words).unwrap();
        (PipelineEngine::new(), RegisterFile::new(), memory)
    }

    fn encode(opcode: Opcode, rd: u8, rs1: u8, rs2: u8, imm: i32) -> u32 {
        Instruction {
            opcode,
            rd,
            rs1,
            rs2,
            imm,
        }
        .encode()
    }

    #[test]
    fn add_forwarding_seed_scenario() {
        // R2=5, R3=3, R5=2: ADD R1,R2,R3 ; ADD R4,R1,R5
        let words = [
            encode(Opcode::Arithmetic(ArithmeticOp::Add), 1, 2, 3, 0),
            encode(Opcode::Arithmetic(ArithmeticOp::Add), 4, 1, 5, 0),
        ];
        let (mut pipeline, mut regs, mut memory) = program(&words);
        regs.set(2, 5);
        regs.set(3, 3);
        regs.set(5, 2);

        for _ in 0..6 {
            pipeline.step(&mut regs, &mut memory);
        }

        assert_eq!(regs.get(1), 8);
        assert_eq!(regs.get(4), 10);
        assert_eq!(pipeline.stats().stall_count, 0);
    }

    #[test]
    fn memory_stage_forwards_arithmetic_result_not_raw_memory_data() {
        // ADDI R1,R0,5 ; ADDI R2,R0,9 ; ADD R4,R1,R0 -- when ADD reaches
        // DECODE, the first ADDI sits in MEMORY with `memory_data` still
        // zero (it never loaded anything); forwarding must pull its
        // `alu_result` instead, the same selection writeback itself uses.
        let words = [
            encode(Opcode::Arithmetic(ArithmeticOp::Addi), 1, 0, 0, 5),
            encode(Opcode::Arithmetic(ArithmeticOp::Addi), 2, 0, 0, 9),
            encode(Opcode::Arithmetic(ArithmeticOp::Add), 4, 1, 0, 0),
        ];
        let (mut pipeline, mut regs, mut memory) = program(&words);

        for _ in 0..8 {
            pipeline.step(&mut regs, &mut memory);
        }

        assert_eq!(regs.get(4), 5);
    }

    #[test]
    fn flush_bubbles_fetch_so_the_branch_target_is_not_double_issued() {
        // CMP R0,R0 forces Z=1; BEQ jumps over the ADDI straight to the
        // SUBI. The SUBI must retire exactly once: if FETCH isn't bubbled
        // on the flush cycle, it re-fetches the target at the unchanged PC
        // the following cycle too, decrementing R1 twice.
        let words = [
            encode(Opcode::Arithmetic(ArithmeticOp::Cmp), 0, 0, 0, 0),
            encode(Opcode::Control(ControlOp::Beq), 0, 0, 0, 1),
            encode(Opcode::Arithmetic(ArithmeticOp::Addi), 2, 0, 0, 99),
            encode(Opcode::Arithmetic(ArithmeticOp::Subi), 1, 1, 0, 1),
        ];
        let (mut pipeline, mut regs, mut memory) = program(&words);
        regs.set(1, 5);

        // Exactly the cycles needed for the three real instructions (CMP,
        // BEQ, SUBI) to retire; memory beyond the program decodes as an
        // endless run of `ADD R0,R0,R0` filler that would otherwise inflate
        // the instruction count this test checks.
        for _ in 0..9 {
            pipeline.step(&mut regs, &mut memory);
        }

        assert_eq!(regs.get(1), 4, "SUBI must retire exactly once, not twice");
        assert_eq!(regs.get(2), 0, "the skipped ADDI must never write");
        assert_eq!(pipeline.stats().instructions, 3);
    }

    #[test]
    fn straight_line_program_retires_in_n_plus_four_cycles() {
        let words = [
            encode(Opcode::Arithmetic(ArithmeticOp::Add), 1, 0, 0, 0),
            encode(Opcode::Arithmetic(ArithmeticOp::Add), 2, 0, 0, 0),
            encode(Opcode::Arithmetic(ArithmeticOp::Add), 3, 0, 0, 0),
        ];
        let (mut pipeline, mut regs, mut memory) = program(&words);
        while pipeline.stats().instructions < 3 {
            pipeline.step(&mut regs, &mut memory);
        }
        assert_eq!(pipeline.stats().cycles, 3 + 4);
        assert_eq!(pipeline.stats().stall_count, 0);
        assert_eq!(pipeline.stats().flush_count, 0);
    }
}
