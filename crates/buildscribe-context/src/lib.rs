// SPDX-FileCopyrightText: 2026 Buildscribe Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Context window assembly for analysis requests.
//!
//! The window is the instruction template plus the most recent messages of a
//! conversation, with the message that triggered the analysis always last.

pub mod assembler;
pub mod instructions;

pub use assembler::ContextAssembler;
pub use instructions::{DEFAULT_INSTRUCTIONS, InstructionTemplate};
