// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! the PretVM instruction set
//!
//! Uniform three-operand instructions over a small RISC-like opcode
//! set. Operands are immediates, symbolic registers into the runtime
//! environment struct, or placeholders that the final emission pass
//! rewrites to runtime-derived addresses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::instance::{ReactionId, ReactorId, TriggerKey};
use crate::statespace::Phase;
use crate::time::TimeValue;

pub type WorkerId = usize;

/// Symbolic registers of the runtime environment. Worker-indexed
/// registers carry `None` to mean "the executing worker": instructions
/// cloned into several workers' streams (fragment transitions) resolve
/// the index only at emission time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Reg {
    GlobalZero,
    GlobalOne,
    /// Base time of the current hyperperiod.
    GlobalOffset,
    /// Amount the sync block advances the offset by, typically the
    /// hyperperiod.
    GlobalOffsetInc,
    GlobalTimeout,
    ExternStartTime,
    WorkerCounter(Option<WorkerId>),
    WorkerReturnAddr(Option<WorkerId>),
    WorkerBinarySema(Option<WorkerId>),
}

impl Reg {
    /// The runtime variable this register names, from the perspective
    /// of `worker`.
    pub fn var_name(&self, worker: WorkerId) -> String {
        match self {
            Reg::GlobalZero => "zero".into(),
            Reg::GlobalOne => "one".into(),
            Reg::GlobalOffset => "time_offset".into(),
            Reg::GlobalOffsetInc => "offset_inc".into(),
            Reg::GlobalTimeout => "timeout".into(),
            Reg::ExternStartTime => "start_time".into(),
            Reg::WorkerCounter(w) => format!("counters[{}]", w.unwrap_or(worker)),
            Reg::WorkerReturnAddr(w) => format!("return_addr[{}]", w.unwrap_or(worker)),
            Reg::WorkerBinarySema(w) => format!("binary_sema[{}]", w.unwrap_or(worker)),
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Reg::WorkerCounter(Some(w)) => write!(f, "counters[{}]", w),
            Reg::WorkerReturnAddr(Some(w)) => write!(f, "return_addr[{}]", w),
            Reg::WorkerBinarySema(Some(w)) => write!(f, "binary_sema[{}]", w),
            Reg::WorkerCounter(None) => write!(f, "counters[self]"),
            Reg::WorkerReturnAddr(None) => write!(f, "return_addr[self]"),
            Reg::WorkerBinarySema(None) => write!(f, "binary_sema[self]"),
            other => write!(f, "{}", other.var_name(0)),
        }
    }
}

/// A branch-comparison operand: a register, or the presence flag of a
/// trigger that only the final emission pass can address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    TriggerPresence(TriggerKey),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::TriggerPresence(t) => write!(f, "present({:?})", t),
        }
    }
}

/// A branch target or placeholder key. Labels are unique per worker
/// stream and resolve to line numbers at emission.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Label {
    Phase(Phase),
    Text(String),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Label::Phase(p) => write!(f, "{}", p),
            Label::Text(t) => write!(f, "{}", t),
        }
    }
}

/// The closed opcode set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    Add,
    Addi,
    Adv,
    Advi,
    Beq,
    Bne,
    Blt,
    Bge,
    Bit,
    Du,
    Eit,
    Exe,
    Inc2,
    Jal,
    Jalr,
    Stp,
    Wu,
    Wlt,
}

impl std::str::FromStr for Opcode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(Opcode::Add),
            "ADDI" => Ok(Opcode::Addi),
            "ADV" => Ok(Opcode::Adv),
            "ADVI" => Ok(Opcode::Advi),
            "BEQ" => Ok(Opcode::Beq),
            "BNE" => Ok(Opcode::Bne),
            "BLT" => Ok(Opcode::Blt),
            "BGE" => Ok(Opcode::Bge),
            "BIT" => Ok(Opcode::Bit),
            "DU" => Ok(Opcode::Du),
            "EIT" => Ok(Opcode::Eit),
            "EXE" => Ok(Opcode::Exe),
            "INC2" => Ok(Opcode::Inc2),
            "JAL" => Ok(Opcode::Jal),
            "JALR" => Ok(Opcode::Jalr),
            "STP" => Ok(Opcode::Stp),
            "WU" => Ok(Opcode::Wu),
            "WLT" => Ok(Opcode::Wlt),
            other => Err(crate::Error::UnknownOpcode { opcode: other.into() }),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Opcode::Add => "ADD",
            Opcode::Addi => "ADDI",
            Opcode::Adv => "ADV",
            Opcode::Advi => "ADVI",
            Opcode::Beq => "BEQ",
            Opcode::Bne => "BNE",
            Opcode::Blt => "BLT",
            Opcode::Bge => "BGE",
            Opcode::Bit => "BIT",
            Opcode::Du => "DU",
            Opcode::Eit => "EIT",
            Opcode::Exe => "EXE",
            Opcode::Inc2 => "INC2",
            Opcode::Jal => "JAL",
            Opcode::Jalr => "JALR",
            Opcode::Stp => "STP",
            Opcode::Wu => "WU",
            Opcode::Wlt => "WLT",
        };
        write!(f, "{}", name)
    }
}

/// One instruction's operation and operands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Op {
    /// dst <- *src1 + *src2
    Add { dst: Reg, src1: Reg, src2: Reg },
    /// dst <- *src + imm
    Addi { dst: Reg, src: Reg, imm: i64 },
    /// Advance the reactor's logical tag to *base + *inc.
    Adv { reactor: ReactorId, base: Reg, inc: Reg },
    /// Advance the reactor's logical tag to *base + imm.
    Advi { reactor: ReactorId, base: Reg, imm: i64 },
    /// Branch to target if *rs1 == *rs2.
    Beq { rs1: Operand, rs2: Operand, target: Label },
    /// Branch to target if *rs1 != *rs2.
    Bne { rs1: Operand, rs2: Operand, target: Label },
    /// Branch to target if *rs1 < *rs2.
    Blt { rs1: Operand, rs2: Operand, target: Label },
    /// Branch to target if *rs1 >= *rs2.
    Bge { rs1: Operand, rs2: Operand, target: Label },
    /// Branch to target if the global timeout flag is set.
    Bit { target: Label },
    /// Delay the worker until physical time >= *base + until.
    Du { base: Reg, until: TimeValue },
    /// Execute the reaction if the runtime marked it queued (legacy).
    Eit { reaction: ReactionId },
    /// Execute the reaction through a placeholder-resolved pointer.
    Exe { reaction: ReactionId },
    /// Atomically increment the worker's counter (legacy).
    Inc2 { dst: Reg, imm: i64 },
    /// link <- next pc; jump to target.
    Jal { link: Reg, target: Label },
    /// link <- next pc; jump to *base + imm.
    Jalr { link: Reg, base: Reg, imm: i64 },
    /// Stop the worker.
    Stp,
    /// Busy-wait while *var < value.
    Wu { var: Reg, value: u64 },
    /// Busy-wait while *var >= value.
    Wlt { var: Reg, value: u64 },
}

impl Op {
    pub fn opcode(&self) -> Opcode {
        match self {
            Op::Add { .. } => Opcode::Add,
            Op::Addi { .. } => Opcode::Addi,
            Op::Adv { .. } => Opcode::Adv,
            Op::Advi { .. } => Opcode::Advi,
            Op::Beq { .. } => Opcode::Beq,
            Op::Bne { .. } => Opcode::Bne,
            Op::Blt { .. } => Opcode::Blt,
            Op::Bge { .. } => Opcode::Bge,
            Op::Bit { .. } => Opcode::Bit,
            Op::Du { .. } => Opcode::Du,
            Op::Eit { .. } => Opcode::Eit,
            Op::Exe { .. } => Opcode::Exe,
            Op::Inc2 { .. } => Opcode::Inc2,
            Op::Jal { .. } => Opcode::Jal,
            Op::Jalr { .. } => Opcode::Jalr,
            Op::Stp => Opcode::Stp,
            Op::Wu { .. } => Opcode::Wu,
            Op::Wlt { .. } => Opcode::Wlt,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Op::Add { dst, src1, src2 } => write!(f, "ADD {} {} {}", dst, src1, src2),
            Op::Addi { dst, src, imm } => write!(f, "ADDI {} {} {}", dst, src, imm),
            Op::Adv { reactor, base, inc } => write!(f, "ADV r{} {} {}", reactor, base, inc),
            Op::Advi { reactor, base, imm } => write!(f, "ADVI r{} {} {}", reactor, base, imm),
            Op::Beq { rs1, rs2, target } => write!(f, "BEQ {} {} {}", rs1, rs2, target),
            Op::Bne { rs1, rs2, target } => write!(f, "BNE {} {} {}", rs1, rs2, target),
            Op::Blt { rs1, rs2, target } => write!(f, "BLT {} {} {}", rs1, rs2, target),
            Op::Bge { rs1, rs2, target } => write!(f, "BGE {} {} {}", rs1, rs2, target),
            Op::Bit { target } => write!(f, "BIT {}", target),
            Op::Du { base, until } => write!(f, "DU {} {}", base, until),
            Op::Eit { reaction } => write!(f, "EIT x{}", reaction),
            Op::Exe { reaction } => write!(f, "EXE x{}", reaction),
            Op::Inc2 { dst, imm } => write!(f, "INC2 {} {}", dst, imm),
            Op::Jal { link, target } => write!(f, "JAL {} {}", link, target),
            Op::Jalr { link, base, imm } => write!(f, "JALR {} {} {}", link, base, imm),
            Op::Stp => write!(f, "STP"),
            Op::Wu { var, value } => write!(f, "WU {} {}", var, value),
            Op::Wlt { var, value } => write!(f, "WLT {} {}", var, value),
        }
    }
}

/// An instruction in a worker stream, optionally carrying a label used
/// as a branch target and as a placeholder-map key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub op: Op,
    pub label: Option<Label>,
}

impl Instruction {
    pub fn new(op: Op) -> Self {
        Instruction { op, label: None }
    }

    pub fn labeled(op: Op, label: Label) -> Self {
        Instruction { op, label: Some(label) }
    }

    pub fn set_label(&mut self, label: Label) {
        self.label = Some(label);
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.label {
            Some(label) => write!(f, "{}: {}", label, self.op),
            None => write!(f, "{}", self.op),
        }
    }
}

/// A symbolic runtime address recorded for a placeholder operand; the
/// final emission pass renders it against the environment layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeAddr {
    ReactorSelf(ReactorId),
    ReactionFunction(ReactionId),
    TriggerPresence(TriggerKey),
}

/// Per-fragment compilation output: one instruction stream per worker.
#[derive(Clone, Debug)]
pub struct ObjectFile {
    pub fragment: crate::statespace::FragmentId,
    pub phase: Phase,
    pub streams: Vec<Vec<Instruction>>,
}

/// The linked whole-program instruction streams.
#[derive(Clone, Debug)]
pub struct Executable {
    pub streams: Vec<Vec<Instruction>>,
    pub hyperperiod: TimeValue,
}

impl Executable {
    pub fn workers(&self) -> usize {
        self.streams.len()
    }
}

/// A fully resolved operand in the emitted object-code table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawOperand {
    None,
    Imm(i64),
    /// Address of a named runtime variable.
    Var(String),
    /// Rewritten by `initialize_static_schedule()` at runtime startup.
    Placeholder,
}

/// One emitted instruction word.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstWord {
    pub opcode: Opcode,
    pub op1: RawOperand,
    pub op2: RawOperand,
    pub op3: RawOperand,
}

/// A placeholder rewrite to replay at runtime initialization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub worker: WorkerId,
    pub line: usize,
    /// Runtime expression the placeholder resolves to, over the
    /// environment layout.
    pub symbol: String,
}

/// The emitted program: per-worker instruction words with all labels
/// resolved to line numbers, plus the relocation table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedProgram {
    pub workers: Vec<Vec<InstWord>>,
    pub relocations: Vec<Relocation>,
    pub hyperperiod: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let wu = Op::Wu {
            var: Reg::WorkerCounter(Some(1)),
            value: 3,
        };
        assert_eq!(wu.to_string(), "WU counters[1] 3");
        let jal = Instruction::labeled(
            Op::Jal {
                link: Reg::WorkerReturnAddr(None),
                target: Label::Phase(Phase::SyncBlock),
            },
            Label::Phase(Phase::Periodic),
        );
        assert_eq!(jal.to_string(), "PERIODIC: JAL return_addr[self] SYNC_BLOCK");
    }

    #[test]
    fn test_var_name_resolves_current_worker() {
        assert_eq!(Reg::WorkerCounter(None).var_name(2), "counters[2]");
        assert_eq!(Reg::WorkerCounter(Some(0)).var_name(2), "counters[0]");
        assert_eq!(Reg::GlobalOffset.var_name(7), "time_offset");
    }

    #[test]
    fn test_opcode_round_trip() {
        assert_eq!(Op::Stp.opcode(), Opcode::Stp);
        assert_eq!(
            Op::Du { base: Reg::GlobalOffset, until: TimeValue::new(5) }.opcode(),
            Opcode::Du
        );
    }

    #[test]
    fn test_opcode_parsing() {
        for opcode in [Opcode::Add, Opcode::Advi, Opcode::Wlt, Opcode::Inc2, Opcode::Eit] {
            assert_eq!(opcode.to_string().parse::<Opcode>().unwrap(), opcode);
        }
        let err = "NOP".parse::<Opcode>().unwrap_err();
        assert!(matches!(err, crate::Error::UnknownOpcode { .. }));
    }
}
