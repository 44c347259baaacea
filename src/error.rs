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

use std::fmt;

/// Errors that can be returned while loading a ROM into the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomError {
    /// The ROM buffer is larger than the `0x1000 - 0x200` bytes of program
    /// space available.
    TooLarge { len: usize, max: usize },
}

impl fmt::Display for RomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RomError::TooLarge { len, max } => write!(
                f,
                "ROM is {} bytes, which is larger than the permitted {} bytes",
                len, max
            ),
        }
    }
}

impl std::error::Error for RomError {}
