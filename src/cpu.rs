/*
Copyright 2020 Anish Jewalikar

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

//! Contains a simple and full featured implementation
//! of a (super) Chip-8 interpreter.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::disasm;
use crate::error::RomError;
use crate::font;

/// Total addressable memory.
const MEMORY_SIZE: usize = 0x1000;

/// Address at which all programs start.
const PROGRAM_START: usize = 0x200;

/// Largest ROM this interpreter can load.
const MAX_ROM_SIZE: usize = MEMORY_SIZE - PROGRAM_START;

/// Depth of the return-address stack.
const STACK_SIZE: usize = 0x10;

/// Number of general purpose `V` registers.
const NUM_REGISTERS: usize = 0x10;

/// Number of keys on the hex keypad.
const NUM_KEYS: usize = 0x10;

/// Number of Super Chip-8 "RPL" persistent flag registers.
const NUM_RPL: usize = 8;

/// Low-res plane dimensions.
const LORES_WIDTH: usize = 64;
const LORES_HEIGHT: usize = 32;

/// High-res (SCHIP) plane dimensions.
const HIRES_WIDTH: usize = 128;
const HIRES_HEIGHT: usize = 64;

/// Which of the two framebuffers is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "savestates", derive(serde::Serialize, serde::Deserialize))]
enum Resolution {
    Lo,
    Hi,
}

/// A read-only view of the currently active framebuffer.
///
/// The host must not, and with this type cannot, mutate the pixels it is
/// given; `Cpu` owns the only mutable path to its framebuffers.
#[derive(Debug, Clone, Copy)]
pub struct Display<'a> {
    pub pixels: &'a [u8],
    pub width: usize,
    pub height: usize,
}

/// An opaque, deep-copied snapshot of interpreter state.
///
/// Intentionally excludes keypad state and the key-wait flag: live input is
/// not part of a save state, it belongs to whatever is driving the CPU.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "savestates", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
    memory: Box<[u8; MEMORY_SIZE]>,
    stack: Box<[u16; STACK_SIZE]>,
    v: Box<[u8; NUM_REGISTERS]>,
    i: u16,
    pc: u16,
    sp: usize,
    dt: u8,
    st: u8,
    lores: Box<[u8; LORES_WIDTH * LORES_HEIGHT]>,
    hires: Box<[u8; HIRES_WIDTH * HIRES_HEIGHT]>,
    mode: Resolution,
    halted: bool,
    rpl: Box<[u8; NUM_RPL]>,
    cycles: u64,
}

/// Implementation of a (super) Chip-8 interpreter.
///
/// # Example
///
/// ```rust
/// use schip8::Cpu;
///
/// let mut cpu = Cpu::new();
///
/// // Load ROM, handle display, audio and input.
/// ```
pub struct Cpu {
    /// Working RAM of the CPU. 4 KB in size.
    memory: Box<[u8; MEMORY_SIZE]>,

    /// Return address stack.
    stack: Box<[u16; STACK_SIZE]>,

    /// Sixteen general purpose registers.
    /// Conventionally named as V0 to VF.
    /// VF is a special register, that is used as a flag.
    v: Box<[u8; NUM_REGISTERS]>,

    /// Index Register; stores an arbitrary address, specified by the user.
    i: u16,

    /// Program Counter; stores current location in memory.
    pc: u16,

    /// Stack Pointer; stores current location in the stack.
    sp: usize,

    /// Delay Timer; decremented at a rate of 60Hz when non-zero.
    dt: u8,

    /// Sound Timer; an audio beep is played when it's non-zero.
    /// It is also decremented at a rate of 60Hz when non-zero.
    st: u8,

    /// Low-res (64x32) framebuffer.
    lores: Box<[u8; LORES_WIDTH * LORES_HEIGHT]>,

    /// High-res (128x64, SCHIP) framebuffer.
    hires: Box<[u8; HIRES_WIDTH * HIRES_HEIGHT]>,

    /// Keypad representation; whether a key is currently pressed.
    keys: Box<[bool; NUM_KEYS]>,

    /// Set by `Fx0A` while execution is suspended waiting for a keypress;
    /// holds the destination register.
    wait_reg: Option<usize>,

    /// Is the interpreter in high resolution (SCHIP) mode?
    mode: Resolution,

    /// Has the interpreter stopped? (through EXIT SCHIP)
    halted: bool,

    /// Super Chip-8 "RPL" persistent flag registers.
    rpl: Box<[u8; NUM_RPL]>,

    /// Number of opcodes executed since the last reset.
    cycles: u64,

    /// Source of randomness for `CXNN`. Seedable so tests (and replay tools)
    /// can get deterministic `RND` results.
    rng: StdRng,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

/// General methods.
impl Cpu {
    /// Create a new `Cpu` instance, seeding its RNG from OS entropy.
    ///
    /// # Example
    ///
    /// ```rust
    /// use schip8::Cpu;
    ///
    /// let mut cpu = Cpu::new();
    /// ```
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a new `Cpu` instance whose `CXNN` draws are deterministic,
    /// reproducible given the same `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        let mut cpu = Self {
            memory: Box::new([0; MEMORY_SIZE]),
            stack: Box::new([0; STACK_SIZE]),
            v: Box::new([0; NUM_REGISTERS]),
            i: 0,
            pc: PROGRAM_START as u16,
            sp: 0,
            dt: 0,
            st: 0,
            lores: Box::new([0; LORES_WIDTH * LORES_HEIGHT]),
            hires: Box::new([0; HIRES_WIDTH * HIRES_HEIGHT]),
            keys: Box::new([false; NUM_KEYS]),
            wait_reg: None,
            mode: Resolution::Lo,
            halted: false,
            rpl: Box::new([0; NUM_RPL]),
            cycles: 0,
            rng,
        };

        cpu.install_fonts();
        cpu
    }

    fn install_fonts(&mut self) {
        let lo = font::FONT_SPRITES_ADDRESS;
        self.memory[lo..lo + font::FONT_SPRITES.len()].copy_from_slice(&font::FONT_SPRITES);

        let hi = font::HIGH_RES_FONT_SPRITES_ADDRESS;
        self.memory[hi..hi + font::HIGH_RES_FONT_SPRITES.len()]
            .copy_from_slice(&font::HIGH_RES_FONT_SPRITES);
    }

    /// Reset the interpreter to its initial state.
    ///
    /// RPL flag registers are persistent even across a reset; only exiting
    /// the host process loses them.
    ///
    /// # Example
    ///
    /// ```rust
    /// use schip8::Cpu;
    ///
    /// let mut cpu = Cpu::new();
    /// cpu.reset();
    /// ```
    pub fn reset(&mut self) {
        self.memory.iter_mut().for_each(|b| *b = 0);
        self.install_fonts();

        self.stack.iter_mut().for_each(|s| *s = 0);
        self.v.iter_mut().for_each(|r| *r = 0);

        self.pc = PROGRAM_START as u16;
        self.sp = 0;
        self.i = 0;
        self.dt = 0;
        self.st = 0;

        self.lores.iter_mut().for_each(|p| *p = 0);
        self.hires.iter_mut().for_each(|p| *p = 0);
        self.keys.iter_mut().for_each(|k| *k = false);
        self.wait_reg = None;

        self.mode = Resolution::Lo;
        self.halted = false;
        self.cycles = 0;
    }

    /// Load a ROM into the working memory thus finalizing for execution.
    ///
    /// Resets the interpreter first; on failure (the ROM is larger than the
    /// `3584` permitted bytes) no state is changed.
    ///
    /// # Example
    ///
    /// ```rust
    /// use schip8::Cpu;
    ///
    /// let mut cpu = Cpu::new();
    /// cpu.load_rom(&[0x00, 0xE0]).unwrap();
    /// ```
    pub fn load_rom(&mut self, rom: &[u8]) -> Result<(), RomError> {
        if rom.len() > MAX_ROM_SIZE {
            return Err(RomError::TooLarge {
                len: rom.len(),
                max: MAX_ROM_SIZE,
            });
        }

        self.reset();
        self.memory[PROGRAM_START..PROGRAM_START + rom.len()].copy_from_slice(rom);

        Ok(())
    }

    /// Decrement the delay timer and sound timer if they are non-zero.
    ///
    /// Expected to be called at 60Hz, independent of how often `step` is
    /// called, so your frontend should drive this off wall-clock time.
    pub fn tick_timers(&mut self) {
        self.dt = self.dt.saturating_sub(1);
        self.st = self.st.saturating_sub(1);
    }

    /// Press the key at `key` (0..=0xF).
    ///
    /// If the interpreter is suspended in `Fx0A`, this resolves the wait:
    /// the key code is written to the destination register, the suspension
    /// clears, and the program counter advances.
    pub fn key_down(&mut self, key: usize) {
        self.keys[key] = true;

        if let Some(reg) = self.wait_reg.take() {
            self.v[reg] = key as u8;
            self.pc = self.pc.wrapping_add(2);
        }
    }

    /// Release the key at `key` (0..=0xF).
    pub fn key_up(&mut self, key: usize) {
        self.keys[key] = false;
    }

    /// Execute one fetch-decode-execute cycle.
    ///
    /// A no-op while `is_halted()` (a Super-CHIP `EXIT` was executed) or
    /// while suspended waiting for a key (`Fx0A`).
    pub fn step(&mut self) {
        if self.halted || self.wait_reg.is_some() {
            return;
        }

        self.cycles = self.cycles.wrapping_add(1);

        let opcode = self.fetch_opcode();
        let bytes = opcode.to_be_bytes();

        let nibbles = (
            (bytes[0] & 0xF0) >> 4,
            bytes[0] & 0x0F,
            (bytes[1] & 0xF0) >> 4,
            bytes[1] & 0x0F,
        );

        let x = nibbles.1 as usize;
        let y = nibbles.2 as usize;
        let n = nibbles.3;
        let nn = bytes[1];
        let nnn = opcode & 0x0FFF;

        match nibbles {
            (0x0, 0x0, 0xC, _) => self.op_00cn(n),
            (0x0, 0x0, 0xE, 0x0) => self.op_00e0(),
            (0x0, 0x0, 0xE, 0xE) => self.op_00ee(),
            (0x0, 0x0, 0xF, 0xB) => self.op_00fb(),
            (0x0, 0x0, 0xF, 0xC) => self.op_00fc(),
            (0x0, 0x0, 0xF, 0xD) => self.op_00fd(),
            (0x0, 0x0, 0xF, 0xE) => self.op_00fe(),
            (0x0, 0x0, 0xF, 0xF) => self.op_00ff(),
            (0x0, _, _, _) => self.op_0nnn(),

            (0x1, _, _, _) => self.op_1nnn(nnn),
            (0x2, _, _, _) => self.op_2nnn(nnn),
            (0x3, _, _, _) => self.op_3xnn(x, nn),
            (0x4, _, _, _) => self.op_4xnn(x, nn),
            (0x5, _, _, 0x0) => self.op_5xy0(x, y),
            (0x6, _, _, _) => self.op_6xnn(x, nn),
            (0x7, _, _, _) => self.op_7xnn(x, nn),

            (0x8, _, _, 0x0) => self.op_8xy0(x, y),
            (0x8, _, _, 0x1) => self.op_8xy1(x, y),
            (0x8, _, _, 0x2) => self.op_8xy2(x, y),
            (0x8, _, _, 0x3) => self.op_8xy3(x, y),
            (0x8, _, _, 0x4) => self.op_8xy4(x, y),
            (0x8, _, _, 0x5) => self.op_8xy5(x, y),
            (0x8, _, _, 0x6) => self.op_8xy6(x),
            (0x8, _, _, 0x7) => self.op_8xy7(x, y),
            (0x8, _, _, 0xE) => self.op_8xye(x),

            (0x9, _, _, 0x0) => self.op_9xy0(x, y),

            (0xA, _, _, _) => self.op_annn(nnn),
            (0xB, _, _, _) => self.op_bnnn(nnn),
            (0xC, _, _, _) => self.op_cxnn(x, nn),
            (0xD, _, _, _) => self.op_dxyn(x, y, n as usize),

            (0xE, _, 0x9, 0xE) => self.op_ex9e(x),
            (0xE, _, 0xA, 0x1) => self.op_exa1(x),

            (0xF, _, 0x0, 0x7) => self.op_fx07(x),
            (0xF, _, 0x0, 0xA) => self.op_fx0a(x),
            (0xF, _, 0x1, 0x5) => self.op_fx15(x),
            (0xF, _, 0x1, 0x8) => self.op_fx18(x),
            (0xF, _, 0x1, 0xE) => self.op_fx1e(x),
            (0xF, _, 0x2, 0x9) => self.op_fx29(x),
            (0xF, _, 0x3, 0x0) => self.op_fx30(x),
            (0xF, _, 0x3, 0x3) => self.op_fx33(x),
            (0xF, _, 0x5, 0x5) => self.op_fx55(x),
            (0xF, _, 0x6, 0x5) => self.op_fx65(x),
            (0xF, _, 0x7, 0x5) => self.op_fx75(x),
            (0xF, _, 0x8, 0x5) => self.op_fx85(x),

            _ => {
                log::debug!("unknown opcode {:#06x} at {:#05x}", opcode, self.pc);
                self.pc = self.pc.wrapping_add(2);
            }
        }
    }

    /// Has the interpreter halted (via the Super-CHIP `EXIT` opcode)?
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Is `Fx0A` currently suspending execution, waiting for a keypress?
    pub fn is_waiting_for_key(&self) -> bool {
        self.wait_reg.is_some()
    }

    /// Current value of the sound timer; the host should play a tone
    /// whenever this is non-zero.
    pub fn sound_timer(&self) -> u8 {
        self.st
    }

    /// A read-only view of the active framebuffer.
    pub fn display(&self) -> Display<'_> {
        let (width, height) = self.plane_dims();
        Display {
            pixels: self.plane(),
            width,
            height,
        }
    }

    /// Deep-copy the current state into an opaque snapshot.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            memory: self.memory.clone(),
            stack: self.stack.clone(),
            v: self.v.clone(),
            i: self.i,
            pc: self.pc,
            sp: self.sp,
            dt: self.dt,
            st: self.st,
            lores: self.lores.clone(),
            hires: self.hires.clone(),
            mode: self.mode,
            halted: self.halted,
            rpl: self.rpl.clone(),
            cycles: self.cycles,
        }
    }

    /// Restore a previously captured snapshot.
    ///
    /// Keypad state and the key-wait flag are deliberately left as they
    /// are: live input should not be rewound along with emulator state.
    pub fn restore(&mut self, snapshot: &Snapshot) {
        self.memory = snapshot.memory.clone();
        self.stack = snapshot.stack.clone();
        self.v = snapshot.v.clone();
        self.i = snapshot.i;
        self.pc = snapshot.pc;
        self.sp = snapshot.sp;
        self.dt = snapshot.dt;
        self.st = snapshot.st;
        self.lores = snapshot.lores.clone();
        self.hires = snapshot.hires.clone();
        self.mode = snapshot.mode;
        self.halted = snapshot.halted;
        self.rpl = snapshot.rpl.clone();
        self.cycles = snapshot.cycles;
    }

    /// Disassemble the single instruction at `addr`.
    pub fn disasm(&self, addr: u16) -> String {
        disasm::disasm(self.memory.as_ref(), addr)
    }

    /// Fetch the next opcode to be executed, wrapping the address into the
    /// 4 KiB memory space.
    fn fetch_opcode(&self) -> u16 {
        let addr = (self.pc as usize) & 0xFFF;
        let next = (addr + 1) & 0xFFF;
        u16::from_be_bytes([self.memory[addr], self.memory[next]])
    }

    fn plane_dims(&self) -> (usize, usize) {
        match self.mode {
            Resolution::Lo => (LORES_WIDTH, LORES_HEIGHT),
            Resolution::Hi => (HIRES_WIDTH, HIRES_HEIGHT),
        }
    }

    fn plane(&self) -> &[u8] {
        match self.mode {
            Resolution::Lo => self.lores.as_ref(),
            Resolution::Hi => self.hires.as_ref(),
        }
    }

    fn plane_mut(&mut self) -> &mut [u8] {
        match self.mode {
            Resolution::Lo => self.lores.as_mut(),
            Resolution::Hi => self.hires.as_mut(),
        }
    }

    /// XOR a single pixel into the active plane, setting VF on collision.
    fn draw_pixel(&mut self, x: usize, y: usize, stride: usize) {
        let idx = y * stride + x;

        let collided = {
            let plane = self.plane_mut();
            let was_set = plane[idx] != 0;
            plane[idx] ^= 1;
            was_set
        };

        if collided {
            self.v[0xF] = 1;
        }
    }
}

/// Standard CHIP-8 opcodes.
impl Cpu {
    /// 0NNN - SYS addr (ignored on modern interpreters).
    fn op_0nnn(&mut self) {
        self.pc = self.pc.wrapping_add(2);
    }

    /// 00E0 - CLS
    /// Clear the active plane.
    fn op_00e0(&mut self) {
        self.plane_mut().iter_mut().for_each(|p| *p = 0);
        self.pc = self.pc.wrapping_add(2);
    }

    /// 00EE - RET
    /// Return from a subroutine.
    fn op_00ee(&mut self) {
        if self.sp == 0 {
            log::warn!("stack underflow on RET, ignoring");
            self.pc = self.pc.wrapping_add(2);
            return;
        }

        self.sp -= 1;
        self.pc = self.stack[self.sp].wrapping_add(2);
    }

    /// 1nnn - JP addr
    /// Jump to location nnn.
    fn op_1nnn(&mut self, nnn: u16) {
        self.pc = nnn;
    }

    /// 2nnn - CALL addr
    /// Call subroutine at nnn.
    fn op_2nnn(&mut self, nnn: u16) {
        if self.sp >= STACK_SIZE {
            log::warn!("stack overflow on CALL, ignoring");
            self.pc = self.pc.wrapping_add(2);
            return;
        }

        self.stack[self.sp] = self.pc;
        self.sp += 1;
        self.pc = nnn;
    }

    /// 3xnn - SE Vx, byte
    /// Skip next instruction if Vx = nn.
    fn op_3xnn(&mut self, x: usize, nn: u8) {
        let skip = self.v[x] == nn;
        self.pc = self.pc.wrapping_add(if skip { 4 } else { 2 });
    }

    /// 4xnn - SNE Vx, byte
    /// Skip next instruction if Vx != nn.
    fn op_4xnn(&mut self, x: usize, nn: u8) {
        let skip = self.v[x] != nn;
        self.pc = self.pc.wrapping_add(if skip { 4 } else { 2 });
    }

    /// 5xy0 - SE Vx, Vy
    /// Skip next instruction if Vx = Vy.
    fn op_5xy0(&mut self, x: usize, y: usize) {
        let skip = self.v[x] == self.v[y];
        self.pc = self.pc.wrapping_add(if skip { 4 } else { 2 });
    }

    /// 6xnn - LD Vx, byte
    /// Set Vx = nn.
    fn op_6xnn(&mut self, x: usize, nn: u8) {
        self.v[x] = nn;
        self.pc = self.pc.wrapping_add(2);
    }

    /// 7xnn - ADD Vx, byte
    /// Set Vx = Vx + nn. VF is untouched.
    fn op_7xnn(&mut self, x: usize, nn: u8) {
        self.v[x] = self.v[x].wrapping_add(nn);
        self.pc = self.pc.wrapping_add(2);
    }

    /// 8xy0 - LD Vx, Vy
    fn op_8xy0(&mut self, x: usize, y: usize) {
        self.v[x] = self.v[y];
        self.pc = self.pc.wrapping_add(2);
    }

    /// 8xy1 - OR Vx, Vy. VF is reset to 0.
    fn op_8xy1(&mut self, x: usize, y: usize) {
        self.v[x] |= self.v[y];
        self.v[0xF] = 0;
        self.pc = self.pc.wrapping_add(2);
    }

    /// 8xy2 - AND Vx, Vy. VF is reset to 0.
    fn op_8xy2(&mut self, x: usize, y: usize) {
        self.v[x] &= self.v[y];
        self.v[0xF] = 0;
        self.pc = self.pc.wrapping_add(2);
    }

    /// 8xy3 - XOR Vx, Vy. VF is reset to 0.
    fn op_8xy3(&mut self, x: usize, y: usize) {
        self.v[x] ^= self.v[y];
        self.v[0xF] = 0;
        self.pc = self.pc.wrapping_add(2);
    }

    /// 8xy4 - ADD Vx, Vy. VF = carry.
    fn op_8xy4(&mut self, x: usize, y: usize) {
        let (result, carry) = self.v[x].overflowing_add(self.v[y]);
        self.v[x] = result;
        self.v[0xF] = carry as u8;
        self.pc = self.pc.wrapping_add(2);
    }

    /// 8xy5 - SUB Vx, Vy. VF = NOT borrow.
    fn op_8xy5(&mut self, x: usize, y: usize) {
        let (vx, vy) = (self.v[x], self.v[y]);
        let flag = (vx >= vy) as u8;
        self.v[x] = vx.wrapping_sub(vy);
        self.v[0xF] = flag;
        self.pc = self.pc.wrapping_add(2);
    }

    /// 8xy6 - SHR Vx
    /// Shifts Vx itself; Vy is ignored (the classic/frozen shift quirk).
    fn op_8xy6(&mut self, x: usize) {
        let vx = self.v[x];
        let flag = vx & 0b1;
        self.v[x] = vx.wrapping_shr(1);
        self.v[0xF] = flag;
        self.pc = self.pc.wrapping_add(2);
    }

    /// 8xy7 - SUBN Vx, Vy. VF = NOT borrow.
    fn op_8xy7(&mut self, x: usize, y: usize) {
        let (vx, vy) = (self.v[x], self.v[y]);
        let flag = (vy >= vx) as u8;
        self.v[x] = vy.wrapping_sub(vx);
        self.v[0xF] = flag;
        self.pc = self.pc.wrapping_add(2);
    }

    /// 8xyE - SHL Vx
    /// Shifts Vx itself; Vy is ignored (the classic/frozen shift quirk).
    fn op_8xye(&mut self, x: usize) {
        let vx = self.v[x];
        let flag = (vx >> 7) & 0b1;
        self.v[x] = vx.wrapping_shl(1);
        self.v[0xF] = flag;
        self.pc = self.pc.wrapping_add(2);
    }

    /// 9xy0 - SNE Vx, Vy
    fn op_9xy0(&mut self, x: usize, y: usize) {
        let skip = self.v[x] != self.v[y];
        self.pc = self.pc.wrapping_add(if skip { 4 } else { 2 });
    }

    /// Annn - LD I, addr
    fn op_annn(&mut self, nnn: u16) {
        self.i = nnn;
        self.pc = self.pc.wrapping_add(2);
    }

    /// Bnnn - JP V0, addr
    fn op_bnnn(&mut self, nnn: u16) {
        self.pc = nnn.wrapping_add(self.v[0] as u16);
    }

    /// Cxnn - RND Vx, byte
    fn op_cxnn(&mut self, x: usize, nn: u8) {
        self.v[x] = self.rng.gen::<u8>() & nn;
        self.pc = self.pc.wrapping_add(2);
    }

    /// Dxyn - DRW Vx, Vy, nibble
    /// Draw an 8-wide (or, with n=0 in hi-res mode, 16x16) sprite at
    /// (Vx, Vy), set VF on collision.
    fn op_dxyn(&mut self, x: usize, y: usize, n: usize) {
        let (width, height) = self.plane_dims();
        let px0 = self.v[x] as usize % width;
        let py0 = self.v[y] as usize % height;

        self.v[0xF] = 0;

        if n == 0 && self.mode == Resolution::Hi {
            for r in 0..16 {
                let addr = (self.i as usize + r * 2) & 0xFFF;
                let word =
                    ((self.memory[addr] as u16) << 8) | self.memory[(addr + 1) & 0xFFF] as u16;

                for c in 0..16 {
                    if word & (0x8000 >> c) != 0 {
                        let px = (px0 + c) % width;
                        let py = (py0 + r) % height;
                        self.draw_pixel(px, py, width);
                    }
                }
            }
        } else {
            for r in 0..n {
                let addr = (self.i as usize + r) & 0xFFF;
                let byte = self.memory[addr];

                for c in 0..8 {
                    if byte & (0x80 >> c) != 0 {
                        let px = (px0 + c) % width;
                        let py = (py0 + r) % height;
                        self.draw_pixel(px, py, width);
                    }
                }
            }
        }

        self.pc = self.pc.wrapping_add(2);
    }

    /// Ex9E - SKP Vx
    fn op_ex9e(&mut self, x: usize) {
        let key = (self.v[x] & 0xF) as usize;
        let skip = self.keys[key];
        self.pc = self.pc.wrapping_add(if skip { 4 } else { 2 });
    }

    /// ExA1 - SKNP Vx
    fn op_exa1(&mut self, x: usize) {
        let key = (self.v[x] & 0xF) as usize;
        let skip = !self.keys[key];
        self.pc = self.pc.wrapping_add(if skip { 4 } else { 2 });
    }

    /// Fx07 - LD Vx, DT
    fn op_fx07(&mut self, x: usize) {
        self.v[x] = self.dt;
        self.pc = self.pc.wrapping_add(2);
    }

    /// Fx0A - LD Vx, K
    /// Suspend execution until a key is pressed; resolved in `key_down`.
    fn op_fx0a(&mut self, x: usize) {
        self.wait_reg = Some(x);
    }

    /// Fx15 - LD DT, Vx
    fn op_fx15(&mut self, x: usize) {
        self.dt = self.v[x];
        self.pc = self.pc.wrapping_add(2);
    }

    /// Fx18 - LD ST, Vx
    fn op_fx18(&mut self, x: usize) {
        self.st = self.v[x];
        self.pc = self.pc.wrapping_add(2);
    }

    /// Fx1E - ADD I, Vx
    fn op_fx1e(&mut self, x: usize) {
        self.i = self.i.wrapping_add(self.v[x] as u16);
        self.pc = self.pc.wrapping_add(2);
    }

    /// Fx29 - LD F, Vx
    /// Point I at the low-res font glyph for digit Vx.
    fn op_fx29(&mut self, x: usize) {
        self.i = (self.v[x] & 0xF) as u16 * 5;
        self.pc = self.pc.wrapping_add(2);
    }

    /// Fx33 - LD B, Vx
    /// Store the BCD representation of Vx at I, I+1, I+2.
    fn op_fx33(&mut self, x: usize) {
        let value = self.v[x];
        let i = self.i as usize;

        self.memory[i & 0xFFF] = value / 100;
        self.memory[(i + 1) & 0xFFF] = (value / 10) % 10;
        self.memory[(i + 2) & 0xFFF] = value % 10;

        self.pc = self.pc.wrapping_add(2);
    }

    /// Fx55 - LD [I], Vx
    /// Store V0..=Vx in memory starting at I. I itself is unchanged.
    fn op_fx55(&mut self, x: usize) {
        let base = self.i as usize;

        for k in 0..=x {
            self.memory[(base + k) & 0xFFF] = self.v[k];
        }

        self.pc = self.pc.wrapping_add(2);
    }

    /// Fx65 - LD Vx, [I]
    /// Load V0..=Vx from memory starting at I. I itself is unchanged.
    fn op_fx65(&mut self, x: usize) {
        let base = self.i as usize;

        for k in 0..=x {
            self.v[k] = self.memory[(base + k) & 0xFFF];
        }

        self.pc = self.pc.wrapping_add(2);
    }
}

/// SCHIP opcodes.
impl Cpu {
    /// 00Cn - SCD nibble
    /// Scroll the active plane down N rows.
    fn op_00cn(&mut self, n: u8) {
        let (width, height) = self.plane_dims();
        let n = n as usize;
        let retained = height - n;

        let plane = self.plane_mut();
        plane.copy_within(0..width * retained, width * n);
        plane[0..width * n].iter_mut().for_each(|p| *p = 0);

        self.pc = self.pc.wrapping_add(2);
    }

    /// 00FB - SCR
    /// Scroll the active plane 4 pixels right.
    fn op_00fb(&mut self) {
        let (width, height) = self.plane_dims();
        let plane = self.plane_mut();

        for row in 0..height {
            let start = row * width;
            plane.copy_within(start..start + width - 4, start + 4);
            plane[start..start + 4].iter_mut().for_each(|p| *p = 0);
        }

        self.pc = self.pc.wrapping_add(2);
    }

    /// 00FC - SCL
    /// Scroll the active plane 4 pixels left.
    fn op_00fc(&mut self) {
        let (width, height) = self.plane_dims();
        let plane = self.plane_mut();

        for row in 0..height {
            let start = row * width;
            let end = start + width;
            plane.copy_within(start + 4..end, start);
            plane[end - 4..end].iter_mut().for_each(|p| *p = 0);
        }

        self.pc = self.pc.wrapping_add(2);
    }

    /// 00FD - EXIT
    fn op_00fd(&mut self) {
        self.halted = true;
    }

    /// 00FE - LOW
    /// Select low resolution mode. Neither plane is cleared.
    fn op_00fe(&mut self) {
        self.mode = Resolution::Lo;
        self.pc = self.pc.wrapping_add(2);
    }

    /// 00FF - HIGH
    /// Select high resolution mode. Neither plane is cleared.
    fn op_00ff(&mut self) {
        self.mode = Resolution::Hi;
        self.pc = self.pc.wrapping_add(2);
    }

    /// Fx30 - LD HF, Vx
    /// Point I at the high-res font glyph for digit Vx.
    fn op_fx30(&mut self, x: usize) {
        self.i = font::HIGH_RES_FONT_SPRITES_ADDRESS as u16 + (self.v[x] & 0xF) as u16 * 10;
        self.pc = self.pc.wrapping_add(2);
    }

    /// Fx75 - LD R, Vx
    /// Store V0..=Vx (at most 8 registers) in the RPL flag registers.
    fn op_fx75(&mut self, x: usize) {
        let n = (x + 1).min(NUM_RPL);
        self.rpl[0..n].copy_from_slice(&self.v[0..n]);
        self.pc = self.pc.wrapping_add(2);
    }

    /// Fx85 - LD Vx, R
    /// Load V0..=Vx (at most 8 registers) from the RPL flag registers.
    fn op_fx85(&mut self, x: usize) {
        let n = (x + 1).min(NUM_RPL);
        self.v[0..n].copy_from_slice(&self.rpl[0..n]);
        self.pc = self.pc.wrapping_add(2);
    }
}

#[test]
fn immediate_load_and_jump() {
    let mut cpu = Cpu::new();
    cpu.load_rom(&[0x60, 0x05, 0x61, 0x0A, 0x80, 0x14, 0x12, 0x08])
        .unwrap();

    for _ in 0..4 {
        cpu.step();
    }

    assert_eq!(cpu.v[0], 0x0F);
    assert_eq!(cpu.v[1], 0x0A);
    assert_eq!(cpu.v[0xF], 0);
    assert_eq!(cpu.pc, 0x208);
}

#[test]
fn add_sets_carry_flag() {
    let mut cpu = Cpu::new();
    cpu.load_rom(&[0x60, 0xFF, 0x61, 0x02, 0x80, 0x14]).unwrap();

    for _ in 0..3 {
        cpu.step();
    }

    assert_eq!(cpu.v[0], 0x01);
    assert_eq!(cpu.v[0xF], 1);
}

#[test]
fn sub_clears_no_borrow_flag_when_borrowing() {
    let mut cpu = Cpu::new();
    cpu.load_rom(&[0x60, 0x05, 0x61, 0x0A, 0x80, 0x15]).unwrap();

    for _ in 0..3 {
        cpu.step();
    }

    assert_eq!(cpu.v[0], 0xFB);
    assert_eq!(cpu.v[0xF], 0);
}

#[test]
fn font_glyph_lookup_points_at_the_right_bytes() {
    let mut cpu = Cpu::new();
    // LD V2, 0xA; LD F, V2; LD V0, 0; LD V1, 0; DRW V0, V1, 5.
    cpu.load_rom(&[
        0x62, 0x0A, 0xF2, 0x29, 0x60, 0x00, 0x61, 0x00, 0xD0, 0x15,
    ])
    .unwrap();

    for _ in 0..5 {
        cpu.step();
    }

    assert_eq!(cpu.i, 0x32);

    let display = cpu.display();
    // Glyph 'A' is F0 90 F0 90 90, drawn at (V0=0, V1=0).
    let expected_rows: [u8; 5] = [0xF0, 0x90, 0xF0, 0x90, 0x90];
    for (row, byte) in expected_rows.iter().enumerate() {
        for col in 0..8 {
            let expected = (byte & (0x80 >> col)) != 0;
            let idx = row * display.width + col;
            assert_eq!(display.pixels[idx] != 0, expected, "row {row} col {col}");
        }
    }
}

#[test]
fn key_wait_suspends_execution_until_key_down() {
    let mut cpu = Cpu::new();
    cpu.load_rom(&[0xF0, 0x0A, 0x12, 0x02]).unwrap();

    for _ in 0..100 {
        cpu.step();
    }

    assert_eq!(cpu.pc, 0x200);
    assert!(cpu.is_waiting_for_key());
    assert_eq!(cpu.v[0], 0);

    cpu.key_down(7);

    assert!(!cpu.is_waiting_for_key());
    assert_eq!(cpu.v[0], 7);
    assert_eq!(cpu.pc, 0x202);
}

#[test]
fn snapshot_then_restore_reproduces_the_pre_restore_future() {
    let rom: Vec<u8> = (0..64)
        .flat_map(|i| [0x60 | ((i % 15) as u8), i as u8])
        .collect();

    let mut cpu = Cpu::with_seed(42);
    cpu.load_rom(&rom).unwrap();

    for _ in 0..50 {
        cpu.step();
    }

    let snap = cpu.snapshot();

    for _ in 0..50 {
        cpu.step();
    }
    let expected = cpu.snapshot();

    cpu.restore(&snap);
    for _ in 0..50 {
        cpu.step();
    }

    assert_eq!(cpu.snapshot(), expected);
}

#[test]
fn step_is_a_pure_function_of_state_across_a_snapshot_round_trip() {
    let mut baseline = Cpu::with_seed(7);
    baseline
        .load_rom(&[0x60, 0x01, 0x70, 0x01, 0x12, 0x02])
        .unwrap();
    baseline.step();

    let mut roundtripped = Cpu::with_seed(7);
    roundtripped
        .load_rom(&[0x60, 0x01, 0x70, 0x01, 0x12, 0x02])
        .unwrap();
    let snap = roundtripped.snapshot();
    roundtripped.restore(&snap);
    roundtripped.step();

    assert_eq!(baseline.snapshot(), roundtripped.snapshot());
}

#[test]
fn or_and_xor_always_clear_vf() {
    let mut cpu = Cpu::new();
    cpu.load_rom(&[0x8F, 0x01]).unwrap();
    cpu.v[0xF] = 0xAB;
    cpu.v[0] = 0x0F;
    cpu.step();
    assert_eq!(cpu.v[0xF], 0);
}

#[test]
fn cls_clears_only_the_active_plane() {
    let mut cpu = Cpu::new();
    cpu.load_rom(&[0x00, 0xFF, 0xD0, 0x01, 0x00, 0xFE, 0x00, 0xE0])
        .unwrap();
    cpu.memory[0x200 + 8] = 0xFF; // sprite byte for the DRW at I=0 default
    cpu.i = 0x208;

    cpu.step(); // HIGH
    cpu.step(); // DRW in hi-res, sets some hi-res pixels
    let hi_before = cpu.hires.clone();
    assert!(hi_before.iter().any(|&p| p != 0));

    cpu.step(); // LOW
    cpu.step(); // CLS, should only clear lores (already all zero)

    assert_eq!(cpu.hires, hi_before);
}

#[test]
fn double_xor_draw_restores_the_framebuffer_and_reports_collision_second_time() {
    let mut cpu = Cpu::new();
    // LD V0,0; LD V1,0; LD I, 0x300; DRW V0,V1,1 twice.
    cpu.load_rom(&[
        0x60, 0x00, 0x61, 0x00, 0xA3, 0x00, 0xD0, 0x11, 0xD0, 0x11,
    ])
    .unwrap();
    cpu.memory[0x300] = 0b1010_1010;

    for _ in 0..4 {
        cpu.step();
    }
    let before = cpu.display().pixels.to_vec();
    assert!(before.iter().any(|&p| p != 0));
    assert_eq!(cpu.v[0xF], 0);

    cpu.step();
    assert_eq!(cpu.v[0xF], 1);
    assert!(cpu.display().pixels.iter().all(|&p| p == 0));
}

#[test]
fn stack_overflow_and_underflow_are_non_fatal_no_ops() {
    // Exercises the `log::warn!` paths below; init is fallible since other
    // tests in this binary may already have installed a logger.
    let _ = env_logger::try_init();

    let mut cpu = Cpu::new();
    // Sixteen nested CALLs into RET-only subroutines would be tedious; test
    // underflow and overflow directly instead.
    cpu.load_rom(&[0x00, 0xEE]).unwrap();
    cpu.step();
    assert_eq!(cpu.pc, 0x202);

    let mut cpu = Cpu::new();
    let mut rom = Vec::new();
    for _ in 0..17 {
        rom.extend_from_slice(&[0x22, 0x00]);
    }
    cpu.load_rom(&rom).unwrap();
    for _ in 0..17 {
        cpu.step();
    }
    assert_eq!(cpu.sp, STACK_SIZE);
}
