//! Tree-walking evaluator for the embedded expression language.

use crate::embedded::parser::{BinaryOp, Block, Expr, Stmt, UnaryOp};
use crate::engine::context::Session;
use crate::engine::errors::{EngineResult, PatternError};
use crate::engine::value::Value;

/// Evaluates an expression under a fresh namespace snapshot.
pub fn evaluate(s: &mut Session<'_>, expr: &Expr) -> EngineResult<Value> {
    let frames = s.ns.begin_eval()?;
    let result = eval_expr(s, expr);
    s.ns.end_eval(frames);
    result
}

/// Executes a statement block under a fresh namespace snapshot.
pub fn execute(s: &mut Session<'_>, block: &Block) -> EngineResult<()> {
    let frames = s.ns.begin_eval()?;
    let result = exec_block(s, block);
    s.ns.end_eval(frames);
    result
}

fn exec_block(s: &mut Session<'_>, block: &Block) -> EngineResult<()> {
    for stmt in &block.stmts {
        match stmt {
            Stmt::Assign { name, expr } => {
                let value = eval_expr(s, expr)?;
                assign_name(s, name, value)?;
            }
            Stmt::Expr(expr) => {
                eval_expr(s, expr)?;
            }
        }
    }
    Ok(())
}

pub(crate) fn eval_expr(s: &mut Session<'_>, expr: &Expr) -> EngineResult<Value> {
    match expr {
        Expr::Int(v) => Ok(Value::Int(*v)),
        Expr::Str(text) => Ok(Value::Str(text.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::None => Ok(Value::None),
        Expr::Name(name) => resolve_name(s, name),
        Expr::List(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(eval_expr(s, item)?);
            }
            Ok(Value::List(values))
        }
        Expr::Attr { target, name } => {
            let value = eval_expr(s, target)?;
            eval_attr(s, value, name)
        }
        Expr::Call { target, args } => {
            let callee = eval_expr(s, target)?;
            let args = eval_args(s, args)?;
            match callee {
                Value::Native(nf) => (nf.func)(s, args),
                other => Err(PatternError::Script(format!(
                    "{} is not callable",
                    other.kind()
                ))),
            }
        }
        Expr::Method { target, name, args } => {
            let recv = eval_expr(s, target)?;
            let args = eval_args(s, args)?;
            eval_method(s, recv, name, args)
        }
        Expr::Unary { op, expr } => {
            let value = eval_expr(s, expr)?;
            match op {
                UnaryOp::Neg => match value.as_int() {
                    Some(v) => Ok(Value::Int(-v)),
                    None => Err(PatternError::Script(format!(
                        "cannot negate {}",
                        value.kind()
                    ))),
                },
                UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval_expr(s, lhs)?;
            let rhs = eval_expr(s, rhs)?;
            eval_binary(*op, lhs, rhs)
        }
    }
}

fn eval_args(s: &mut Session<'_>, args: &[Expr]) -> EngineResult<Vec<Value>> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval_expr(s, arg)?);
    }
    Ok(values)
}

/// Equality with numeric coercion: an address and an int with the same
/// numeric value compare equal, everything else uses structural equality.
pub(crate) fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    if lhs == rhs {
        return true;
    }
    match (lhs.as_int(), rhs.as_int()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn eval_binary(op: BinaryOp, lhs: Value, rhs: Value) -> EngineResult<Value> {
    match op {
        BinaryOp::Eq => return Ok(Value::Bool(values_equal(&lhs, &rhs))),
        BinaryOp::Ne => return Ok(Value::Bool(!values_equal(&lhs, &rhs))),
        _ => {}
    }

    if let (Value::Str(a), Value::Str(b), BinaryOp::Add) = (&lhs, &rhs, op) {
        return Ok(Value::Str(format!("{}{}", a, b)));
    }

    let (a, b) = match (lhs.as_int(), rhs.as_int()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(PatternError::Script(format!(
                "operator requires numeric operands, got {} and {}",
                lhs.kind(),
                rhs.kind()
            )))
        }
    };
    let addresslike = matches!(lhs, Value::Address(_));
    Ok(match op {
        BinaryOp::Lt => Value::Bool(a < b),
        BinaryOp::Le => Value::Bool(a <= b),
        BinaryOp::Gt => Value::Bool(a > b),
        BinaryOp::Ge => Value::Bool(a >= b),
        BinaryOp::Add if addresslike => Value::Address((a + b) as u64),
        BinaryOp::Sub if addresslike => Value::Address((a - b) as u64),
        BinaryOp::Add => Value::Int(a + b),
        BinaryOp::Sub => Value::Int(a - b),
        BinaryOp::Mul => Value::Int(a * b),
        BinaryOp::Eq | BinaryOp::Ne => unreachable!("handled above"),
    })
}

/// Name resolution order: locals, per-evaluation getter cache, magic
/// getters, fixtures, globals.
pub(crate) fn resolve_name(s: &mut Session<'_>, name: &str) -> EngineResult<Value> {
    let key = name.to_string();
    if let Some(v) = s.ns.locals.get(&key) {
        return Ok(v.clone());
    }
    if let Some(v) = s.ns.getter_cache.get(&key) {
        return Ok(v.clone());
    }
    if let Some(getter) = s.ns.getters.get(&key).copied() {
        let value = getter(s)?;
        s.ns.getter_cache.insert(key, value.clone());
        return Ok(value);
    }
    if let Some(fixture) = s.ns.fixtures.get(&key).copied() {
        return resolve_fixture(s, name, fixture);
    }
    if let Some(v) = s.ns.globals.get(&key) {
        return Ok(v.clone());
    }
    Err(PatternError::Script(format!(
        "name '{}' is not defined",
        name
    )))
}

fn resolve_fixture(
    s: &mut Session<'_>,
    name: &str,
    fixture: crate::embedded::ns::Fixture,
) -> EngineResult<Value> {
    if s.ns.resolving.contains(&name.to_string()) {
        return Err(PatternError::Script(format!(
            "recursive fixture dependency on '{}'",
            name
        )));
    }
    s.ns.resolving.push(name.to_string());
    let mut deps = Vec::with_capacity(fixture.deps.len());
    let mut result = Ok(());
    for dep in fixture.deps {
        match resolve_name(s, dep) {
            Ok(v) => deps.push(v),
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    s.ns.resolving.pop();
    result?;

    let value = (fixture.func)(s, &deps)?;
    s.ns.getter_cache.insert(name.to_string(), value.clone());
    Ok(value)
}

fn assign_name(s: &mut Session<'_>, name: &str, value: Value) -> EngineResult<()> {
    if let Some(setter) = s.ns.setters.get(name).copied() {
        return setter(s, value);
    }
    s.ns.set_local(name, value);
    Ok(())
}

fn eval_attr(s: &mut Session<'_>, value: Value, name: &str) -> EngineResult<Value> {
    match (&value, name) {
        (Value::Cursor(c), "address") => Ok(match c.address(s.program) {
            Some(a) => Value::Address(a),
            None => Value::None,
        }),
        (Value::Reg(r), "name") => Ok(Value::Str(r.name().to_string())),
        (Value::Shifted(sr), "reg") => Ok(Value::Reg(sr.reg)),
        (Value::Obj(map), _) => map.get(name).cloned().ok_or_else(|| {
            PatternError::Script(format!("object has no field '{}'", name))
        }),
        _ => Err(PatternError::Script(format!(
            "{} has no attribute '{}'",
            value.kind(),
            name
        ))),
    }
}

fn eval_method(
    s: &mut Session<'_>,
    recv: Value,
    name: &str,
    args: Vec<Value>,
) -> EngineResult<Value> {
    match (&recv, name) {
        (Value::Cursor(c), "next") => {
            expect_arity(name, &args, 0)?;
            Ok(Value::Cursor(c.next(s.program)?))
        }
        (Value::Cursor(c), "prev") => {
            expect_arity(name, &args, 0)?;
            Ok(Value::Cursor(c.prev(s.program)?))
        }
        (Value::Cursor(c), "offset") => {
            expect_arity(name, &args, 1)?;
            let delta = int_arg(name, &args, 0)?;
            Ok(Value::Cursor(c.offset(s.program, delta)?))
        }
        (Value::Cursor(c), "read_bytes") => {
            expect_arity(name, &args, 1)?;
            let count = int_arg(name, &args, 0)?;
            Ok(Value::Bytes(c.read_bytes(s.program, count as usize)?))
        }
        _ => Err(PatternError::Script(format!(
            "{} has no method '{}'",
            recv.kind(),
            name
        ))),
    }
}

fn expect_arity(name: &str, args: &[Value], arity: usize) -> EngineResult<()> {
    if args.len() != arity {
        return Err(PatternError::Script(format!(
            "{} takes {} argument(s), got {}",
            name,
            arity,
            args.len()
        )));
    }
    Ok(())
}

fn int_arg(name: &str, args: &[Value], index: usize) -> EngineResult<i64> {
    args[index].as_int().ok_or_else(|| {
        PatternError::Script(format!(
            "{} expects a numeric argument, got {}",
            name,
            args[index].kind()
        ))
    })
}
