//! The numbered, for-all-inputs invariants of spec §8 (2-6; invariant 1,
//! the codec's encode/decode round trip, is covered at the `cyclesim-asm`
//! crate level where that type lives).

use cyclesim::{
    ArithmeticOp, Instruction, MemoryConfig, MemorySystem, Opcode, PipelineEngine, PipelineStats,
    RegisterFile,
};
use proptest::prelude::*;

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

proptest! {
    /// Invariant 2: `R0` reads zero after any sequence of writes.
    #[test]
    fn r0_is_always_zero(values in prop::collection::vec(any::<u32>(), 0..16)) {
        let mut regs = RegisterFile::new();
        for v in values {
            regs.set(0, v);
        }
        prop_assert_eq!(regs.get(0), 0);
    }
}

/// Invariant 3: every counter is zero and every cache line invalid after
/// `reset()`.
#[test]
fn reset_zeroes_every_counter_and_invalidates_every_line() {
    let mut memory = MemorySystem::new(MemoryConfig::default());
    let mut pipeline = PipelineEngine::new();
    let mut regs = RegisterFile::new();

    // drive some activity first so reset has something to undo.
    memory.read(0, false).unwrap();
    memory.write(4, 7).unwrap();
    regs.set(1, 123);
    pipeline.step(&mut regs, &mut memory);

    memory.reset();
    pipeline.reset();
    regs.reset();

    assert_eq!(memory.l1().hits(), 0);
    assert_eq!(memory.l1().misses(), 0);
    assert_eq!(memory.l2().hits(), 0);
    assert_eq!(memory.l2().misses(), 0);
    assert_eq!(memory.total_cycles(), 0);
    assert_eq!(pipeline.stats(), PipelineStats::default());
    assert_eq!(regs.get(1), 0);
}

proptest! {
    /// Invariant 4: a repeated instruction fetch at the same address costs
    /// zero additional cycles and touches neither hit nor miss counter.
    #[test]
    fn repeated_fetch_at_the_same_address_is_free(addr in (0u32..4096).prop_map(|a| a & !0b11)) {
        let mut memory = MemorySystem::new(MemoryConfig::default());
        let (_, first_cost) = memory.read(addr, true).unwrap();
        let hits = memory.l1().hits();
        let misses = memory.l1().misses();

        let (_, second_cost) = memory.read(addr, true).unwrap();

        prop_assert_eq!(second_cost, 0);
        prop_assert_eq!(memory.l1().hits(), hits);
        prop_assert_eq!(memory.l1().misses(), misses);
        prop_assert!(first_cost > 0);
    }

    /// Invariant 5: a write followed by a read of the same address returns
    /// the written value, with or without the cache enabled.
    #[test]
    fn write_then_read_returns_the_written_word(
        addr in (0u32..4096).prop_map(|a| a & !0b11),
        value in any::<u32>(),
        cache_enabled in any::<bool>(),
    ) {
        let mut memory = MemorySystem::new(MemoryConfig::default());
        memory.set_cache_enabled(cache_enabled);
        memory.write(addr, value).unwrap();
        let (read_back, _) = memory.read(addr, false).unwrap();
        prop_assert_eq!(read_back, value);
    }
}

/// Invariant 6: with the pipeline enabled, a straight-line program of N
/// data-independent arithmetic instructions retires in `N + 4` cycles (no
/// stalls, no flushes) -- four cycles to drain the pipeline after the last
/// instruction is fetched.
#[test]
fn straight_line_program_retires_in_n_plus_four_cycles() {
    let n = 10usize;
    let words: Vec<u32> = (0..n as u8)
        .map(|i| encode(Opcode::Arithmetic(ArithmeticOp::Addi), i % 31 + 1, 0, 0, i as i32))
        .collect();

    let mut memory = MemorySystem::new(MemoryConfig::default());
    memory.load_program(&words).unwrap();
    let mut pipeline = PipelineEngine::new();
    let mut regs = RegisterFile::new();

    for _ in 0..(n + 4) {
        pipeline.step(&mut regs, &mut memory);
    }

    let stats = pipeline.stats();
    assert_eq!(stats.instructions, n as u64);
    assert_eq!(stats.cycles, (n + 4) as u64);
    assert_eq!(stats.stall_count, 0);
    assert_eq!(stats.flush_count, 0);
}
