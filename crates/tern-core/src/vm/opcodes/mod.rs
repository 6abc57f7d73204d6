//! Opcode handler modules for the interpreter
//!
//! Each module implements a category of opcode handlers as methods on `Vm`.

mod arithmetic;
mod calls;
mod comparison;
mod composites;
mod concurrency;
mod control_flow;
mod iteration;
mod members;
mod patterns;
mod stack;
mod strings;
mod variables;
