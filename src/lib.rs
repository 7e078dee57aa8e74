// uscript: featherweight scripting language.
//
// Copyright (C) 2026  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.
//
// Source text is scanned into tokens, compiled in a single pass by a Pratt
// parser straight into bytecode, and executed by a stack-based VM.

#[macro_use]
extern crate lazy_static;

pub mod chunk;
pub mod clock;
pub mod compiler;
pub mod complex;
pub mod config;
pub mod debug;
pub mod hashmap;
pub mod object;
pub mod scanner;
pub mod selftest;
pub mod stdlib;
pub mod value;
pub mod vm;

pub use config::Config;
pub use vm::{interpret, InterpretResult, Vm};
