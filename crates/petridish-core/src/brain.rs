//! Virtual machine state interpreted against a [`Genome`](crate::genome::Genome).

use crate::genome::GENOME_LENGTH;

pub const REGISTER_COUNT: usize = 4;
pub const MEMORY_SIZE: usize = 64;
pub const STACK_DEPTH: usize = 32;
pub const SENSOR_COUNT: usize = 4;

/// Energy or health below this level latches the matching sensor.
pub const LOW_LEVEL_THRESHOLD: u8 = 16;

/// Saved caller state pushed by `DIVE` and restored by `LIFT`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackFrame {
    pub return_address: usize,
    pub registers: [u8; REGISTER_COUNT],
    pub compare_flag: u8,
}

/// What latches a sensor during the Prepare phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum TriggerSource {
    #[default]
    None = 0,
    LowEnergy = 1,
    LowHealth = 2,
}

impl TriggerSource {
    /// Unknown bytes decode as [`TriggerSource::None`].
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::LowEnergy,
            2 => Self::LowHealth,
            _ => Self::None,
        }
    }
}

/// An interrupt slot: once triggered, the next turn starts at `jump`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sensor {
    pub jump: usize,
    pub trigger: TriggerSource,
    pub triggered: bool,
}

/// Registers, memory, call stack and counters of one cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Brain {
    pub compare_flag: u8,
    pub registers: [u8; REGISTER_COUNT],
    pub memory: [u8; MEMORY_SIZE],
    pub stack: [StackFrame; STACK_DEPTH],
    pub sensors: [Sensor; SENSOR_COUNT],
    /// Number of occupied stack frames, in `0..=STACK_DEPTH`.
    pub stack_counter: usize,
    /// Instruction pointer, in `0..GENOME_LENGTH`.
    pub command_counter: usize,
}

impl Default for Brain {
    fn default() -> Self {
        Self {
            compare_flag: 0,
            registers: [0; REGISTER_COUNT],
            memory: [0; MEMORY_SIZE],
            stack: [StackFrame::default(); STACK_DEPTH],
            sensors: [Sensor::default(); SENSOR_COUNT],
            stack_counter: 0,
            command_counter: 0,
        }
    }
}

impl Brain {
    /// Moves the instruction pointer forward one byte and returns it.
    #[inline]
    pub fn advance(&mut self) -> usize {
        self.command_counter = (self.command_counter + 1) % GENOME_LENGTH;
        self.command_counter
    }

    /// Sets the instruction pointer, wrapping into the program.
    #[inline]
    pub fn jump_to(&mut self, target: usize) {
        self.command_counter = target % GENOME_LENGTH;
    }

    #[must_use]
    pub const fn is_stack_full(&self) -> bool {
        self.stack_counter >= STACK_DEPTH
    }

    #[must_use]
    pub const fn is_stack_empty(&self) -> bool {
        self.stack_counter == 0
    }

    /// Saves the registers and flag together with `return_address`.
    /// Returns `false` without touching state when the stack is full.
    pub fn push_frame(&mut self, return_address: usize) -> bool {
        if self.is_stack_full() {
            return false;
        }
        self.stack[self.stack_counter] = StackFrame {
            return_address: return_address % GENOME_LENGTH,
            registers: self.registers,
            compare_flag: self.compare_flag,
        };
        self.stack_counter += 1;
        true
    }

    /// Restores the most recent frame. Returns `false` on an empty stack.
    pub fn pop_frame(&mut self) -> bool {
        if self.is_stack_empty() {
            return false;
        }
        self.stack_counter -= 1;
        let frame = self.stack[self.stack_counter];
        self.command_counter = frame.return_address % GENOME_LENGTH;
        self.registers = frame.registers;
        self.compare_flag = frame.compare_flag;
        true
    }

    /// Records the outcome of a world action in the flag.
    pub fn set_outcome(&mut self, success: bool) {
        self.compare_flag = if success {
            crate::isa::cond::SUCCESS
        } else {
            crate::isa::cond::FAIL
        };
    }

    /// Installs an interrupt into `slot` (wrapped into the sensor table).
    pub fn arm_sensor(&mut self, slot: usize, trigger: TriggerSource, jump: usize) {
        self.sensors[slot % SENSOR_COUNT] = Sensor {
            jump: jump % GENOME_LENGTH,
            trigger,
            triggered: false,
        };
    }

    /// Latches every sensor whose condition currently holds.
    pub fn sample_sensors(&mut self, energy: u8, health: u8) {
        for sensor in &mut self.sensors {
            let fired = match sensor.trigger {
                TriggerSource::None => false,
                TriggerSource::LowEnergy => energy < LOW_LEVEL_THRESHOLD,
                TriggerSource::LowHealth => health < LOW_LEVEL_THRESHOLD,
            };
            sensor.triggered |= fired;
        }
    }

    /// Services the first latched sensor: clears it and, if the stack has
    /// room, calls into its handler. Returns whether a call happened.
    pub fn service_sensors(&mut self) -> bool {
        let Some(sensor) = self.sensors.iter_mut().find(|sensor| sensor.triggered) else {
            return false;
        };
        sensor.triggered = false;
        let jump = sensor.jump;
        if !self.push_frame(self.command_counter) {
            return false;
        }
        self.jump_to(jump);
        true
    }
}
