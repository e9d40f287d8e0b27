//! Fixed-length genome programs, the canonical seed program and point mutation.

use crate::isa::{Opcode, cond, recycle, reg};
use rand::Rng;

/// Number of bytes in every genome. Also the per-turn instruction budget.
pub const GENOME_LENGTH: usize = 256;

/// Positional weights of the identity checksum repeat with this period.
const HASH_PERIOD: usize = 16;
/// Size of one sunlight-harvesting block in the seed program.
const SEED_BLOCK_LEN: usize = 16;
/// Start of the reproduction routine in the seed program.
const SEED_TAIL: usize = 224;

/// A cell's program: 256 opcode bytes plus a cheap identity hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Genome {
    code: [u8; GENOME_LENGTH],
    hash: u64,
}

impl Genome {
    /// Wraps raw bytes, computing the hash.
    #[must_use]
    pub fn from_code(code: [u8; GENOME_LENGTH]) -> Self {
        let hash = checksum(&code);
        Self { code, hash }
    }

    /// The canonical seed program.
    ///
    /// Fourteen blocks of `NOP`, six sunlight recycles and a `DIVE` into the
    /// reproduction routine at byte 224. The routine returns early unless
    /// energy exceeds `threshold`, otherwise it bumps a direction counter kept
    /// in memory cell 0 and reproduces into that direction.
    #[must_use]
    pub fn seed(threshold: u8) -> Self {
        let mut asm = Assembler::new();
        while asm.cursor + SEED_BLOCK_LEN <= SEED_TAIL {
            asm.emit(&[Opcode::Nop as u8]);
            for _ in 0..6 {
                asm.emit(&[Opcode::Recycle as u8, recycle::SUNLIGHT]);
            }
            asm.emit(&[Opcode::Dive as u8, cond::NONE, SEED_TAIL as u8]);
        }

        asm.emit(&[Opcode::GetEnergy as u8, reg::R1]);
        asm.emit(&[Opcode::Put as u8, reg::R2, threshold]);
        asm.emit(&[Opcode::Cmp as u8, reg::R1, reg::R2]);
        asm.emit(&[Opcode::Lift as u8, cond::LESS | cond::EQ]);
        asm.emit(&[Opcode::Load as u8, reg::R0, 0]);
        asm.emit(&[Opcode::Put as u8, reg::R3, 1]);
        asm.emit(&[Opcode::Add as u8, reg::R0, reg::R0, reg::R3]);
        asm.emit(&[Opcode::Save as u8, reg::R0, 0]);
        asm.emit(&[Opcode::Reproduce as u8, reg::R0]);
        asm.emit(&[Opcode::Lift as u8, cond::NONE]);

        asm.cursor = GENOME_LENGTH - 3;
        asm.emit(&[Opcode::Jmp as u8, cond::NONE, 0]);
        Self::from_code(asm.code)
    }

    #[must_use]
    pub fn code(&self) -> &[u8; GENOME_LENGTH] {
        &self.code
    }

    #[must_use]
    pub const fn hash(&self) -> u64 {
        self.hash
    }

    /// Byte at `index`, wrapping around the program end.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> u8 {
        self.code[index % GENOME_LENGTH]
    }

    /// Returns a copy with `rate` positions overwritten by uniform random bytes.
    ///
    /// Positions are drawn independently, so the same byte may be hit twice.
    #[must_use]
    pub fn mutate<R: Rng + ?Sized>(&self, rng: &mut R, rate: usize) -> Self {
        let mut code = self.code;
        for _ in 0..rate {
            let index = rng.random_range(0..GENOME_LENGTH);
            code[index] = rng.random();
        }
        Self::from_code(code)
    }
}

/// Identity checksum: sum of `(byte & 0x7F) * (index % 16 + 1)`.
#[must_use]
pub fn checksum(code: &[u8; GENOME_LENGTH]) -> u64 {
    code.iter()
        .enumerate()
        .map(|(index, &byte)| u64::from(byte & 0x7F) * (index % HASH_PERIOD + 1) as u64)
        .sum()
}

struct Assembler {
    code: [u8; GENOME_LENGTH],
    cursor: usize,
}

impl Assembler {
    fn new() -> Self {
        Self {
            code: [Opcode::Nop as u8; GENOME_LENGTH],
            cursor: 0,
        }
    }

    fn emit(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.code[self.cursor % GENOME_LENGTH] = byte;
            self.cursor += 1;
        }
    }
}
