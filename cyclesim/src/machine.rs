//! [`Machine`]: the facade wiring a register file, memory hierarchy, and
//! pipeline engine into one headless, deterministic unit — the role
//! `simulator.py` played in the original, minus the GUI it drove.

use tracing::{info, instrument};

use crate::assembler::{AssembleError, Assembler};
use crate::config::MachineConfig;
use crate::error::{MemoryError, SimulatorError};
use crate::memory::MemorySystem;
use crate::pipeline::{PipelineEngine, PipelineStats};
use crate::registers::RegisterFile;

/// The word written to memory word 0 that signals program completion (§6.3).
pub const HALT_SENTINEL: u32 = 0xFFFF;

/// A safety cap on [`Machine::run_until_halt`] so a program that never
/// writes the sentinel cannot spin the caller forever.
const DEFAULT_MAX_STEPS: u64 = 1_000_000;

/// Owns a [`RegisterFile`], a [`MemorySystem`], and a [`PipelineEngine`],
/// wired so the pipeline drives memory and never the reverse. This is the
/// entire core's externally observable surface: assemble or load a program,
/// `step` it, and read state back between steps.
#[derive(Debug, Clone)]
pub struct Machine {
    registers: RegisterFile,
    memory: MemorySystem,
    pipeline: PipelineEngine,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        Machine {
            registers: RegisterFile::with_initial_sp(config.initial_sp),
            memory: MemorySystem::new(config.memory),
            pipeline: PipelineEngine::new(),
        }
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn memory(&self) -> &MemorySystem {
        &self.memory
    }

    pub fn pipeline(&self) -> &PipelineEngine {
        &self.pipeline
    }

    pub fn stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    /// Switches between pipelined and strictly sequential execution (§4.4).
    pub fn set_pipelined(&mut self, enabled: bool) {
        self.pipeline.set_enabled(enabled);
    }

    pub fn pipelined(&self) -> bool {
        self.pipeline.enabled()
    }

    pub fn set_cache_enabled(&mut self, enabled: bool) {
        self.memory.set_cache_enabled(enabled);
    }

    /// Resets every component to its power-on state.
    pub fn reset(&mut self) {
        self.registers.reset();
        self.memory.reset();
        self.pipeline.reset();
    }

    /// Loads `words` into memory at address 0 and points the pipeline's PC
    /// there, ready to execute from a cold state.
    pub fn load_program(&mut self, words: &[u32]) -> Result<(), SimulatorError> {
        self.memory.load_program(words)?;
        self.registers.reset();
        self.pipeline.reset();
        Ok(())
    }

    /// Assembles `source` and loads it, failing on the first assembly error
    /// (mirroring the common case of a caller that wants a binary
    /// pass/fail); use [`crate::assembler::Assembler`] directly to inspect
    /// every error instead.
    pub fn assemble_and_load(&mut self, source: &str) -> Result<(), SimulatorError> {
        let (words, errors) = Assembler::new().assemble(source);
        if !errors.is_empty() {
            return Err(SimulatorError::Assembly(errors.len()));
        }
        self.load_program(&words)
    }

    /// Assembles `source`, returning every error found rather than failing fast.
    pub fn assemble(source: &str) -> (Vec<u32>, Vec<AssembleError>) {
        Assembler::new().assemble(source)
    }

    /// Advances the machine by exactly one cycle.
    #[instrument(level = "trace", skip(self))]
    pub fn step(&mut self) {
        self.pipeline.step(&mut self.registers, &mut self.memory);
    }

    /// Peeks the word stored at the §6.3 halt sentinel's address (word 0)
    /// without counting it as an access.
    fn halted(&self) -> Result<bool, MemoryError> {
        Ok(self.memory.peek_word(0)? == HALT_SENTINEL)
    }

    /// Steps until memory word 0 holds [`HALT_SENTINEL`], or `max_steps` is
    /// reached. Returns the number of steps actually taken.
    #[instrument(level = "debug", skip(self))]
    pub fn run_until_halt(&mut self, max_steps: Option<u64>) -> Result<u64, SimulatorError> {
        let max_steps = max_steps.unwrap_or(DEFAULT_MAX_STEPS);
        let mut taken = 0;
        while !self.halted()? {
            if taken >= max_steps {
                info!(taken, "run_until_halt exceeded max_steps, stopping");
                break;
            }
            self.step();
            taken += 1;
        }
        Ok(taken)
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new(MachineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyclesim_asm::{ArithmeticOp, ControlOp, Instruction, MemoryOp, Opcode};

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
    fn reset_zeroes_every_counter_and_invalidates_every_cache_line() {
        let mut machine = Machine::default();
        machine.assemble_and_load("addi r1, r0, 5").unwrap();
        machine.step();
        machine.reset();
        assert_eq!(machine.stats(), PipelineStats::default());
        assert_eq!(machine.memory().l1().hits(), 0);
        assert_eq!(machine.memory().l1().misses(), 0);
    }

    #[test]
    fn run_until_halt_observes_the_sentinel() {
        let mut machine = Machine::default();
        // STR r1, [r0, 0] with r1 = 0xFFFF, followed by anything.
        let words = [
            encode(Opcode::Arithmetic(ArithmeticOp::Movi), 1, 0, 0, HALT_SENTINEL as i32),
            encode(Opcode::Memory(MemoryOp::Str), 1, 0, 0, 0),
            encode(Opcode::Control(ControlOp::Jmp), 0, 0, 0, 0),
        ];
        machine.load_program(&words).unwrap();
        let taken = machine.run_until_halt(Some(100)).unwrap();
        assert!(taken > 0);
        assert!(taken < 100);
    }

    #[test]
    fn assemble_and_load_surfaces_error_count() {
        let mut machine = Machine::default();
        let err = machine.assemble_and_load("bogus r1, r2, r3").unwrap_err();
        assert!(matches!(err, SimulatorError::Assembly(1)));
    }
}
