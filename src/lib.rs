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

//! `schip8` is a simple, full featured (super) Chip-8 interpreter core.
//!
//! This crate implements only the interpreter: decoding and executing
//! opcodes, holding CPU/memory/display/timer state, and exposing a small
//! surface for a host to drive it (supply keys, pump the 60Hz timers, read
//! back the framebuffer, play a tone while the sound timer is non-zero).
//! It does not open a window, play audio, or parse command line arguments;
//! bring your own frontend.
//!
//! # Example
//!
//! ```rust
//! use schip8::Cpu;
//!
//! let mut cpu = Cpu::new();
//! cpu.load_rom(&[0x00, 0xE0]).unwrap();
//! cpu.step();
//! ```

mod cpu;
mod disasm;
mod error;
mod font;

pub use cpu::{Cpu, Display, Snapshot};
pub use error::RomError;
