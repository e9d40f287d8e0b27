//! Instruction set: opcode numbering, operand decoding and the dispatch table.
//!
//! Every handler reads its operands through the auto-incrementing helpers on
//! [`Machine`] and leaves the instruction pointer on the next instruction.
//! Operands are truncated into their domain, never rejected.

use crate::brain::{Brain, MEMORY_SIZE, REGISTER_COUNT};
use crate::cell::Cell;
use crate::genome::{GENOME_LENGTH, Genome};
use crate::object::{Direction, Lively, Movable, Object};
use crate::world::World;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

/// Comparison flag bits.
pub mod cond {
    pub const NONE: u8 = 0;
    pub const EQ: u8 = 1;
    pub const NEQ: u8 = 2;
    pub const LESS: u8 = 4;
    pub const GREAT: u8 = 8;
    pub const SUCCESS: u8 = 64;
    pub const FAIL: u8 = 128;
}

/// Register operand bytes.
pub mod reg {
    pub const R0: u8 = 0;
    pub const R1: u8 = 1;
    pub const R2: u8 = 2;
    pub const R3: u8 = 3;
}

/// `RECYCLE` operand kinds (taken modulo [`KINDS`](recycle::KINDS)).
pub mod recycle {
    pub const NOTHING: u8 = 0;
    pub const SUNLIGHT: u8 = 1;
    pub const BAG: u8 = 2;
    pub const MINERALS: u8 = 3;
    pub const KINDS: u8 = 4;
}

pub const OPCODE_COUNT: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    Cmp = 1,
    Jmp = 2,
    Dive = 3,
    Lift = 4,
    Put = 5,
    Save = 6,
    Load = 7,
    Add = 8,
    Sub = 9,
    Mul = 10,
    Div = 11,
    Move = 12,
    Rotate = 13,
    CheckPos = 14,
    CheckRel = 15,
    Bite = 16,
    Share = 17,
    Recycle = 18,
    Reproduce = 19,
    Pickup = 20,
    Drop = 21,
    BagSize = 22,
    BagActive = 23,
    BagEnergy = 24,
    BagCheck = 25,
    GetAge = 26,
    GetHealth = 27,
    GetEnergy = 28,
    GetCounter = 29,
}

impl Opcode {
    /// Decodes a genome byte; bytes past the table are unknown opcodes.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        if (byte as usize) < OPCODE_COUNT {
            Some(OPCODES[byte as usize].opcode)
        } else {
            None
        }
    }

    #[must_use]
    pub fn info(self) -> &'static OpcodeInfo {
        &TABLE[self as usize]
    }
}

/// What a sensing instruction reports about a grid cell or bag slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectKind {
    Empty = 0,
    Wall = 1,
    Body = 2,
    Dead = 3,
    Related = 4,
    Unrelated = 5,
}

/// How a disassembler should render an operand byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandKind {
    Const,
    Register,
    Condition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub opcode: Opcode,
    pub name: &'static str,
    pub mnemonic: &'static str,
    pub operands: &'static [OperandKind],
    /// Executing the instruction ends the cell's turn.
    pub ends_turn: bool,
}

use OperandKind::{Condition as C, Const as K, Register as R};

const fn op(
    opcode: Opcode,
    name: &'static str,
    mnemonic: &'static str,
    operands: &'static [OperandKind],
    ends_turn: bool,
) -> OpcodeInfo {
    OpcodeInfo {
        opcode,
        name,
        mnemonic,
        operands,
        ends_turn,
    }
}

/// The instruction table, indexed by opcode byte.
pub const OPCODES: [OpcodeInfo; OPCODE_COUNT] = [
    op(Opcode::Nop, "NOP", "nop", &[], false),
    op(Opcode::Cmp, "CMP", "cmp", &[R, R], false),
    op(Opcode::Jmp, "JMP", "jmp", &[C, K], false),
    op(Opcode::Dive, "DIVE", "dive", &[C, K], false),
    op(Opcode::Lift, "LIFT", "lift", &[C], false),
    op(Opcode::Put, "PUT", "put", &[R, K], false),
    op(Opcode::Save, "SAVE", "save", &[R, K], false),
    op(Opcode::Load, "LOAD", "load", &[R, K], false),
    op(Opcode::Add, "ADD", "add", &[R, R, R], false),
    op(Opcode::Sub, "SUB", "sub", &[R, R, R], false),
    op(Opcode::Mul, "MUL", "mul", &[R, R, R], false),
    op(Opcode::Div, "DIV", "div", &[R, R, R], false),
    op(Opcode::Move, "MOVE", "move", &[R], true),
    op(Opcode::Rotate, "ROTATE", "rot", &[R], true),
    op(Opcode::CheckPos, "CHECKPOS", "cpos", &[R, R], true),
    op(Opcode::CheckRel, "CHECKREL", "crel", &[R, R], true),
    op(Opcode::Bite, "BITE", "bite", &[R], true),
    op(Opcode::Share, "SHARE", "share", &[R], true),
    op(Opcode::Recycle, "RECYCLE", "recl", &[K], true),
    op(Opcode::Reproduce, "REPRODUCE", "repr", &[R], true),
    op(Opcode::Pickup, "PICKUP", "pick", &[R], true),
    op(Opcode::Drop, "DROP", "drop", &[R], true),
    op(Opcode::BagSize, "BAGSIZE", "bsize", &[R], true),
    op(Opcode::BagActive, "BAGACTIVE", "bset", &[R], true),
    op(Opcode::BagEnergy, "BAGENERGY", "bnrg", &[R], true),
    op(Opcode::BagCheck, "BAGCHECK", "bchk", &[R], true),
    op(Opcode::GetAge, "GETAGE", "age", &[R], false),
    op(Opcode::GetHealth, "GETHEALTH", "heal", &[R], false),
    op(Opcode::GetEnergy, "GETENERGY", "nrg", &[R], false),
    op(Opcode::GetCounter, "GETCOUNTER", "cntr", &[R], false),
];

static TABLE: [OpcodeInfo; OPCODE_COUNT] = OPCODES;

/// Everything one instruction may touch: the acting cell, its program and VM
/// state, the shared world and the turn's random source.
pub struct Machine<'a> {
    pub cell: &'a Cell,
    pub world: &'a World,
    pub genome: &'a Genome,
    pub brain: &'a mut Brain,
    pub rng: &'a mut SmallRng,
}

impl Machine<'_> {
    /// Reads the next operand byte.
    fn operand(&mut self) -> u8 {
        let ip = self.brain.advance();
        self.genome.get(ip)
    }

    fn register_operand(&mut self) -> usize {
        usize::from(self.operand()) % REGISTER_COUNT
    }

    fn memory_operand(&mut self) -> usize {
        usize::from(self.operand()) % MEMORY_SIZE
    }

    fn target_operand(&mut self) -> usize {
        usize::from(self.operand()) % GENOME_LENGTH
    }

    /// A register operand whose value selects a direction relative to the facing.
    fn direction_operand(&mut self) -> Direction {
        let register = self.register_operand();
        Direction::new(self.brain.registers[register])
    }

    fn condition_met(&self, condition: u8) -> bool {
        condition == cond::NONE || condition & self.brain.compare_flag != 0
    }

    /// Steps past the last operand onto the next instruction.
    fn finish(&mut self) {
        self.brain.advance();
    }
}

type Handler = fn(&mut Machine<'_>);

const DISPATCH: [Handler; OPCODE_COUNT] = [
    op_nop,
    op_cmp,
    op_jmp,
    op_dive,
    op_lift,
    op_put,
    op_save,
    op_load,
    op_add,
    op_sub,
    op_mul,
    op_div,
    op_move,
    op_rotate,
    op_check_pos,
    op_check_rel,
    op_bite,
    op_share,
    op_recycle,
    op_reproduce,
    op_pickup,
    op_drop,
    op_bag_size,
    op_bag_active,
    op_bag_energy,
    op_bag_check,
    op_get_age,
    op_get_health,
    op_get_energy,
    op_get_counter,
];

/// Executes the instruction under the instruction pointer.
///
/// Returns `true` when the instruction ends the turn. Unknown opcodes only
/// advance the pointer.
pub fn step(machine: &mut Machine<'_>) -> bool {
    let byte = machine.genome.get(machine.brain.command_counter);
    match Opcode::from_byte(byte) {
        Some(opcode) => {
            DISPATCH[opcode as usize](machine);
            opcode.info().ends_turn
        }
        None => {
            machine.brain.advance();
            false
        }
    }
}

fn op_nop(m: &mut Machine<'_>) {
    m.finish();
}

fn op_cmp(m: &mut Machine<'_>) {
    let (a, b) = (m.register_operand(), m.register_operand());
    let (a, b) = (m.brain.registers[a], m.brain.registers[b]);
    let equality = if a == b { cond::EQ } else { cond::NEQ };
    let order = match a.cmp(&b) {
        std::cmp::Ordering::Less => cond::LESS,
        std::cmp::Ordering::Greater => cond::GREAT,
        std::cmp::Ordering::Equal => cond::NONE,
    };
    m.brain.compare_flag = equality | order;
    m.finish();
}

fn op_jmp(m: &mut Machine<'_>) {
    let condition = m.operand();
    let target = m.target_operand();
    if m.condition_met(condition) {
        m.brain.jump_to(target);
    } else {
        m.finish();
    }
}

fn op_dive(m: &mut Machine<'_>) {
    let condition = m.operand();
    let target = m.target_operand();
    let return_address = (m.brain.command_counter + 1) % GENOME_LENGTH;
    if m.brain.push_frame(return_address) && m.condition_met(condition) {
        m.brain.jump_to(target);
    } else {
        m.finish();
    }
}

fn op_lift(m: &mut Machine<'_>) {
    let condition = m.operand();
    if m.brain.is_stack_empty() || !m.condition_met(condition) || !m.brain.pop_frame() {
        m.finish();
    }
}

fn op_put(m: &mut Machine<'_>) {
    let dst = m.register_operand();
    m.brain.registers[dst] = m.operand();
    m.finish();
}

fn op_save(m: &mut Machine<'_>) {
    let src = m.register_operand();
    let address = m.memory_operand();
    m.brain.memory[address] = m.brain.registers[src];
    m.finish();
}

fn op_load(m: &mut Machine<'_>) {
    let dst = m.register_operand();
    let address = m.memory_operand();
    m.brain.registers[dst] = m.brain.memory[address];
    m.finish();
}

fn arithmetic(m: &mut Machine<'_>, apply: fn(u8, u8) -> u8) {
    let dst = m.register_operand();
    let (a, b) = (m.register_operand(), m.register_operand());
    m.brain.registers[dst] = apply(m.brain.registers[a], m.brain.registers[b]);
    m.finish();
}

fn op_add(m: &mut Machine<'_>) {
    arithmetic(m, u8::wrapping_add);
}

fn op_sub(m: &mut Machine<'_>) {
    arithmetic(m, u8::wrapping_sub);
}

fn op_mul(m: &mut Machine<'_>) {
    arithmetic(m, u8::wrapping_mul);
}

fn op_div(m: &mut Machine<'_>) {
    arithmetic(m, |a, b| a.checked_div(b).unwrap_or(u8::MAX));
}

fn op_move(m: &mut Machine<'_>) {
    let direction = m.direction_operand();
    let moved = m.cell.move_in_direction(direction, m.world);
    m.brain.set_outcome(moved);
    m.finish();
}

fn op_rotate(m: &mut Machine<'_>) {
    let direction = m.direction_operand();
    let rotated = m.cell.rotate(direction);
    m.brain.set_outcome(rotated);
    m.finish();
}

fn op_check_pos(m: &mut Machine<'_>) {
    let dst = m.register_operand();
    let direction = m.direction_operand();
    m.brain.registers[dst] = m.cell.look(direction, m.world, false) as u8;
    m.finish();
}

fn op_check_rel(m: &mut Machine<'_>) {
    let dst = m.register_operand();
    let direction = m.direction_operand();
    m.brain.registers[dst] = m.cell.look(direction, m.world, true) as u8;
    m.finish();
}

fn op_bite(m: &mut Machine<'_>) {
    let direction = m.direction_operand();
    let bitten = m.cell.bite_toward(direction, m.world);
    m.brain.set_outcome(bitten);
    m.finish();
}

fn op_share(m: &mut Machine<'_>) {
    let direction = m.direction_operand();
    let shared = m.cell.share_toward(direction, m.world);
    m.brain.set_outcome(shared);
    m.finish();
}

fn op_recycle(m: &mut Machine<'_>) {
    let kind = m.operand() % recycle::KINDS;
    let recycled = m.cell.recycle(kind, m.world);
    m.brain.set_outcome(recycled);
    m.finish();
}

fn op_reproduce(m: &mut Machine<'_>) {
    let direction = m.direction_operand();
    let born = m.cell.reproduce(direction, m.genome, m.world, &mut *m.rng);
    m.brain.set_outcome(born);
    m.finish();
}

fn op_pickup(m: &mut Machine<'_>) {
    let direction = m.direction_operand();
    let picked = m.cell.pick_up_toward(direction, m.world);
    m.brain.set_outcome(picked);
    m.finish();
}

fn op_drop(m: &mut Machine<'_>) {
    let direction = m.direction_operand();
    let dropped = m.cell.drop_toward(direction, m.world);
    m.brain.set_outcome(dropped);
    m.finish();
}

fn op_bag_size(m: &mut Machine<'_>) {
    let dst = m.register_operand();
    m.brain.registers[dst] = m.cell.bag_size();
    m.finish();
}

fn op_bag_active(m: &mut Machine<'_>) {
    let src = m.register_operand();
    m.cell.select_bag_slot(m.brain.registers[src]);
    m.finish();
}

fn op_bag_energy(m: &mut Machine<'_>) {
    let dst = m.register_operand();
    m.brain.registers[dst] = m.cell.bag_energy(m.world);
    m.finish();
}

fn op_bag_check(m: &mut Machine<'_>) {
    let dst = m.register_operand();
    m.brain.registers[dst] = m.cell.bag_check(m.world) as u8;
    m.finish();
}

fn op_get_age(m: &mut Machine<'_>) {
    let dst = m.register_operand();
    m.brain.registers[dst] = u8::try_from(m.cell.age() / 10).unwrap_or(u8::MAX);
    m.finish();
}

fn op_get_health(m: &mut Machine<'_>) {
    let dst = m.register_operand();
    m.brain.registers[dst] = m.cell.health();
    m.finish();
}

fn op_get_energy(m: &mut Machine<'_>) {
    let dst = m.register_operand();
    m.brain.registers[dst] = m.cell.energy();
    m.finish();
}

fn op_get_counter(m: &mut Machine<'_>) {
    let dst = m.register_operand();
    m.brain.registers[dst] = ((m.brain.command_counter + 1) % GENOME_LENGTH) as u8;
    m.finish();
}
