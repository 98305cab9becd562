//! Runtime values: everything a capture can bind and everything the embedded
//! expression language can compute.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::asm::{Operand, Reg, RegList, ShiftedReg};
use crate::engine::context::Session;
use crate::engine::cursor::Cursor;
use crate::engine::data::Layout;
use crate::engine::errors::EngineResult;
use crate::engine::pattern::{BlockPat, Matchable};

/// A host function injected into the embedded namespace.
#[derive(Clone, Copy)]
pub struct NativeFn {
    pub name: &'static str,
    pub func: fn(&mut Session<'_>, Vec<Value>) -> EngineResult<Value>,
}

impl PartialEq for NativeFn {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.func as usize == other.func as usize
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn({})", self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Null sentinel; also what an optional wildcard binds on a no-op.
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    Address(u64),
    Reg(Reg),
    Shifted(ShiftedReg),
    RegList(RegList),
    Operand(Operand),
    OperandList(Vec<Operand>),
    Cursor(Cursor),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Obj(BTreeMap<String, Value>),
    Pattern(Rc<BlockPat>),
    Matchable(Matchable),
    Layout(Rc<Layout>),
    Native(NativeFn),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Address(_) => "address",
            Value::Reg(_) => "register",
            Value::Shifted(_) => "shifted register",
            Value::RegList(_) => "register list",
            Value::Operand(_) => "operand",
            Value::OperandList(_) => "operand list",
            Value::Cursor(_) => "cursor",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Obj(_) => "object",
            Value::Pattern(_) => "pattern",
            Value::Matchable(_) => "matchable",
            Value::Layout(_) => "layout",
            Value::Native(_) => "function",
        }
    }

    pub fn from_operand(op: &Operand) -> Value {
        match op {
            Operand::Reg(r) => Value::Reg(*r),
            Operand::Shifted(sr) => Value::Shifted(*sr),
            Operand::Imm(v) => Value::Int(*v),
            Operand::Address(a) => Value::Address(*a),
            Operand::MemMulti(regs) => Value::RegList(regs.clone()),
            Operand::Mem(_) => Value::Operand(op.clone()),
        }
    }

    /// Serializes into the JSON tree used by `MatchResult::to_obj`:
    /// addresses as integers, registers as canonical names, shifted
    /// registers in string form, operand lists as arrays.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value as J};
        match self {
            Value::None => J::Null,
            Value::Bool(b) => json!(b),
            Value::Int(v) => json!(v),
            Value::Str(s) => json!(s),
            Value::Address(a) => json!(a),
            Value::Reg(r) => json!(r.name()),
            Value::Shifted(sr) => json!(sr.to_string()),
            Value::RegList(regs) => {
                J::Array(regs.regs().iter().map(|r| json!(r.name())).collect())
            }
            Value::Operand(op) => json!(op.to_string()),
            Value::OperandList(ops) => J::Array(
                ops.iter()
                    .map(|op| Value::from_operand(op).to_json())
                    .collect(),
            ),
            Value::Cursor(_) => json!(self.to_string()),
            Value::Bytes(b) => J::Array(b.iter().map(|v| json!(v)).collect()),
            Value::List(items) => J::Array(items.iter().map(|v| v.to_json()).collect()),
            Value::Obj(map) => J::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Pattern(_) | Value::Matchable(_) | Value::Layout(_) | Value::Native(_) => {
                json!(self.to_string())
            }
        }
    }

    /// Numeric view shared by comparisons and address arithmetic.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Address(a) => Some(*a as i64),
            _ => None,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            _ => true,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "none"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{}", s),
            Value::Address(a) => write!(f, "0x{:X}", a),
            Value::Reg(r) => write!(f, "{}", r),
            Value::Shifted(sr) => write!(f, "{}", sr),
            Value::RegList(regs) => write!(f, "{{{}}}", regs),
            Value::Operand(op) => write!(f, "{}", op),
            Value::OperandList(ops) => {
                let parts: Vec<String> = ops.iter().map(|o| o.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Cursor(c) => write!(f, "{:?}", c),
            Value::Bytes(b) => {
                let parts: Vec<String> = b.iter().map(|v| format!("{:02X}", v)).collect();
                write!(f, "{}", parts.join(" "))
            }
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Obj(map) => {
                let parts: Vec<String> =
                    map.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
            Value::Pattern(_) => write!(f, "<pattern>"),
            Value::Matchable(_) => write!(f, "<matchable>"),
            Value::Layout(_) => write!(f, "<layout>"),
            Value::Native(nf) => write!(f, "<function {}>", nf.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_forms() {
        assert_eq!(Value::Address(0x2000).to_json(), serde_json::json!(0x2000));
        assert_eq!(
            Value::Reg(Reg::parse("sp").unwrap()).to_json(),
            serde_json::json!("r13")
        );
        assert_eq!(Value::None.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn operand_conversion() {
        let v = Value::from_operand(&Operand::Imm(5));
        assert_eq!(v, Value::Int(5));
        let v = Value::from_operand(&Operand::Address(0x1000));
        assert_eq!(v, Value::Address(0x1000));
    }
}
