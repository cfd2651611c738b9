// The database machine: a register-based VM whose opcodes drive cursors
// over the B-tree engine.
//
// A program is a flat list of instructions. The loop fetches, dispatches on
// the opcode, and advances the program counter unless the handler redirects
// it; execution stops when the counter runs off the end of the program.

use std::cmp::Ordering;

use tracing::trace;

use crate::btree::{BTree, Cell};
use crate::cursor::{Cursor, CursorMode};
use crate::error::{Result, RliteError};
use crate::format::PageType;
use crate::record;
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Noop,
    OpenRead,
    OpenWrite,
    Close,
    Rewind,
    Next,
    Prev,
    Seek,
    SeekGt,
    SeekGe,
    SeekLt,
    SeekLe,
    Column,
    Key,
    Integer,
    String,
    Null,
    ResultRow,
    MakeRecord,
    Insert,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    IdxGt,
    IdxGe,
    IdxLt,
    IdxLe,
    IdxPKey,
    IdxInsert,
    CreateTable,
    CreateIndex,
    Copy,
    SCopy,
    Halt,
}

/// One DBM instruction: an opcode and four operands. The meaning of
/// p1..p4 depends on the opcode.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    pub p1: i32,
    pub p2: i32,
    pub p3: i32,
    pub p4: Option<String>,
}

impl Instruction {
    pub fn new(opcode: Opcode, p1: i32, p2: i32, p3: i32) -> Self {
        Self {
            opcode,
            p1,
            p2,
            p3,
            p4: None,
        }
    }

    pub fn with_p4(opcode: Opcode, p1: i32, p2: i32, p3: i32, p4: &str) -> Self {
        Self {
            opcode,
            p1,
            p2,
            p3,
            p4: Some(p4.to_string()),
        }
    }
}

/// What a handler decided about control flow.
enum Flow {
    Advance,
    Jump(usize),
    Halt(i32),
}

/// Everything a finished program reports: the emitted rows and the exit
/// status from Halt (0 when the program just ran off the end).
#[derive(Debug)]
pub struct ExecResult {
    pub rows: Vec<Vec<Value>>,
    pub status: i32,
}

/// A DBM program plus its execution state: program counter, register
/// file, and cursor table. Registers and cursor slots grow on first use.
pub struct Statement {
    ops: Vec<Instruction>,
    pc: usize,
    registers: Vec<Value>,
    cursors: Vec<Option<Cursor>>,
    rows: Vec<Vec<Value>>,
}

fn index(operand: i32) -> Result<usize> {
    usize::try_from(operand)
        .map_err(|_| RliteError::Runtime(format!("negative operand: {operand}")))
}

impl Statement {
    pub fn new(ops: Vec<Instruction>) -> Statement {
        Statement {
            ops,
            pc: 0,
            registers: Vec::new(),
            cursors: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Run the program to completion against `bt`.
    pub fn execute(mut self, bt: &mut BTree) -> Result<ExecResult> {
        let mut status = 0;
        while self.pc < self.ops.len() {
            let op = self.ops[self.pc].clone();
            trace!(pc = self.pc, opcode = ?op.opcode, "step");
            match self.step(bt, &op)? {
                Flow::Advance => self.pc += 1,
                Flow::Jump(target) => self.pc = target,
                Flow::Halt(code) => {
                    status = code;
                    self.pc = self.ops.len();
                }
            }
        }
        Ok(ExecResult {
            rows: self.rows,
            status,
        })
    }

    fn reg(&mut self, operand: i32) -> Result<&Value> {
        let i = index(operand)?;
        if i >= self.registers.len() {
            self.registers.resize(i + 1, Value::Null);
        }
        Ok(&self.registers[i])
    }

    fn set_reg(&mut self, operand: i32, value: Value) -> Result<()> {
        let i = index(operand)?;
        if i >= self.registers.len() {
            self.registers.resize(i + 1, Value::Null);
        }
        self.registers[i] = value;
        Ok(())
    }

    fn reg_integer(&mut self, operand: i32) -> Result<i32> {
        match self.reg(operand)? {
            Value::Integer(i) => Ok(*i),
            other => Err(RliteError::Runtime(format!(
                "register {operand} holds {}, expected an integer",
                other.type_name()
            ))),
        }
    }

    fn cursor_mut(&mut self, operand: i32) -> Result<&mut Cursor> {
        let i = index(operand)?;
        self.cursors
            .get_mut(i)
            .and_then(|c| c.as_mut())
            .ok_or_else(|| RliteError::Runtime(format!("cursor {i} is not open")))
    }

    fn open_cursor(&mut self, bt: &mut BTree, op: &Instruction, mode: CursorMode) -> Result<Flow> {
        let slot = index(op.p1)?;
        let page = self.reg_integer(op.p2)? as u32;
        // p3 carries the table's column count (0 for an index); records are
        // self-describing, so it is not needed to address them.
        let cursor = Cursor::open(bt, mode, page)?;
        if slot >= self.cursors.len() {
            self.cursors.resize_with(slot + 1, || None);
        }
        self.cursors[slot] = Some(cursor);
        Ok(Flow::Advance)
    }

    /// Typed register comparison. Null compares equal to anything — a
    /// documented quirk of this machine, not SQL semantics.
    fn compare(&mut self, r1: i32, r2: i32) -> Result<Ordering> {
        let a = self.reg(r1)?.clone();
        let b = self.reg(r2)?.clone();
        match (&a, &b) {
            (Value::Null, _) | (_, Value::Null) => Ok(Ordering::Equal),
            (Value::Integer(x), Value::Integer(y)) => Ok(x.cmp(y)),
            (Value::Text(x), Value::Text(y)) => Ok(x.as_bytes().cmp(y.as_bytes())),
            (Value::Blob(x), Value::Blob(y)) => {
                let n = x.len().min(y.len());
                Ok(x[..n].cmp(&y[..n]))
            }
            _ => Err(RliteError::Runtime(format!(
                "cannot compare {} with {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// The index key at the cursor's current position.
    fn current_index_key(&mut self, operand: i32) -> Result<(u32, u32)> {
        match self.cursor_mut(operand)?.current_cell()? {
            Cell::IndexLeaf { key, key_pk } | Cell::IndexInternal { key, key_pk, .. } => {
                Ok((key, key_pk))
            }
            _ => Err(RliteError::Runtime(
                "index operation on a table cursor".into(),
            )),
        }
    }

    fn step(&mut self, bt: &mut BTree, op: &Instruction) -> Result<Flow> {
        match op.opcode {
            Opcode::Noop => Ok(Flow::Advance),

            Opcode::OpenRead => self.open_cursor(bt, op, CursorMode::Read),
            Opcode::OpenWrite => self.open_cursor(bt, op, CursorMode::Write),

            Opcode::Close => {
                let i = index(op.p1)?;
                if let Some(slot) = self.cursors.get_mut(i) {
                    *slot = None;
                }
                Ok(Flow::Advance)
            }

            Opcode::Rewind => {
                let target = index(op.p2)?;
                let cur = self.cursor_mut(op.p1)?;
                if cur.root_is_empty() {
                    Ok(Flow::Jump(target))
                } else {
                    cur.rewind(bt)?;
                    Ok(Flow::Advance)
                }
            }

            Opcode::Next => {
                let target = index(op.p2)?;
                match self.cursor_mut(op.p1)?.next(bt) {
                    Ok(()) => Ok(Flow::Jump(target)),
                    Err(RliteError::NoNext) => Ok(Flow::Advance),
                    Err(e) => Err(e),
                }
            }

            Opcode::Prev => {
                let target = index(op.p2)?;
                match self.cursor_mut(op.p1)?.prev(bt) {
                    Ok(()) => Ok(Flow::Jump(target)),
                    Err(RliteError::NoPrev) => Ok(Flow::Advance),
                    Err(e) => Err(e),
                }
            }

            Opcode::Seek
            | Opcode::SeekGt
            | Opcode::SeekGe
            | Opcode::SeekLt
            | Opcode::SeekLe => {
                let target = index(op.p2)?;
                let key = self.reg_integer(op.p3)? as u32;
                let cur = self.cursor_mut(op.p1)?;
                let positioned = match op.opcode {
                    Opcode::Seek => cur.seek(bt, key),
                    Opcode::SeekGt => cur.seek_gt(bt, key),
                    Opcode::SeekGe => cur.seek_ge(bt, key),
                    Opcode::SeekLt => cur.seek_lt(bt, key),
                    Opcode::SeekLe => cur.seek_le(bt, key),
                    _ => unreachable!(),
                };
                match positioned {
                    Ok(()) => Ok(Flow::Advance),
                    Err(RliteError::KeyNotFound) => Ok(Flow::Jump(target)),
                    Err(e) => Err(e),
                }
            }

            Opcode::Column => {
                let column = index(op.p2)?;
                let cell = self.cursor_mut(op.p1)?.current_cell()?;
                let data = match cell {
                    Cell::TableLeaf { data, .. } => data,
                    _ => {
                        return Err(RliteError::Runtime(
                            "Column requires a table leaf entry".into(),
                        ))
                    }
                };
                let mut values = record::deserialize(&data)?;
                let value = if column < values.len() {
                    values.swap_remove(column)
                } else {
                    Value::Null
                };
                self.set_reg(op.p3, value)?;
                Ok(Flow::Advance)
            }

            Opcode::Key => {
                let key = self.cursor_mut(op.p1)?.current_cell()?.key();
                self.set_reg(op.p2, Value::Integer(key as i32))?;
                Ok(Flow::Advance)
            }

            Opcode::Integer => {
                self.set_reg(op.p2, Value::Integer(op.p1))?;
                Ok(Flow::Advance)
            }

            Opcode::String => {
                let s = op
                    .p4
                    .clone()
                    .ok_or_else(|| RliteError::Runtime("String requires a p4 operand".into()))?;
                self.set_reg(op.p2, Value::Text(s))?;
                Ok(Flow::Advance)
            }

            Opcode::Null => {
                self.set_reg(op.p2, Value::Null)?;
                Ok(Flow::Advance)
            }

            Opcode::ResultRow => {
                let start = index(op.p1)?;
                let count = index(op.p2)?;
                let mut row = Vec::with_capacity(count);
                for i in 0..count {
                    row.push(self.reg((start + i) as i32)?.clone());
                }
                self.rows.push(row);
                Ok(Flow::Advance)
            }

            Opcode::MakeRecord => {
                let start = index(op.p1)?;
                let count = index(op.p2)?;
                let mut values = Vec::with_capacity(count);
                for i in 0..count {
                    values.push(self.reg((start + i) as i32)?.clone());
                }
                self.set_reg(op.p3, Value::Blob(record::serialize(&values)))?;
                Ok(Flow::Advance)
            }

            Opcode::Insert => {
                let key = self.reg_integer(op.p3)? as u32;
                let data = match self.reg(op.p2)? {
                    Value::Blob(b) => b.clone(),
                    other => {
                        return Err(RliteError::Runtime(format!(
                            "Insert requires a record blob, got {}",
                            other.type_name()
                        )))
                    }
                };
                let (root, mode) = {
                    let cur = self.cursor_mut(op.p1)?;
                    (cur.root_page(), cur.mode())
                };
                if mode != CursorMode::Write {
                    return Err(RliteError::Runtime("Insert on a read-only cursor".into()));
                }
                bt.insert_in_table(root, key, &data)?;
                // A split may have rewritten pages on the cursor's path.
                self.cursor_mut(op.p1)?.reset(bt)?;
                Ok(Flow::Advance)
            }

            Opcode::Eq | Opcode::Ne | Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                let target = index(op.p2)?;
                let ord = self.compare(op.p1, op.p3)?;
                let taken = match op.opcode {
                    Opcode::Eq => ord == Ordering::Equal,
                    Opcode::Ne => ord != Ordering::Equal,
                    Opcode::Lt => ord == Ordering::Less,
                    Opcode::Le => ord != Ordering::Greater,
                    Opcode::Gt => ord == Ordering::Greater,
                    Opcode::Ge => ord != Ordering::Less,
                    _ => unreachable!(),
                };
                if taken {
                    Ok(Flow::Jump(target))
                } else {
                    Ok(Flow::Advance)
                }
            }

            Opcode::IdxGt | Opcode::IdxGe | Opcode::IdxLt | Opcode::IdxLe => {
                let target = index(op.p2)?;
                let probe = self.reg_integer(op.p3)? as u32;
                let (idx_key, _) = self.current_index_key(op.p1)?;
                let taken = match op.opcode {
                    Opcode::IdxGt => idx_key > probe,
                    Opcode::IdxGe => idx_key >= probe,
                    Opcode::IdxLt => idx_key < probe,
                    Opcode::IdxLe => idx_key <= probe,
                    _ => unreachable!(),
                };
                if taken {
                    Ok(Flow::Jump(target))
                } else {
                    Ok(Flow::Advance)
                }
            }

            Opcode::IdxPKey => {
                let (_, key_pk) = self.current_index_key(op.p1)?;
                self.set_reg(op.p2, Value::Integer(key_pk as i32))?;
                Ok(Flow::Advance)
            }

            Opcode::IdxInsert => {
                let idx_key = self.reg_integer(op.p2)? as u32;
                let key_pk = self.reg_integer(op.p3)? as u32;
                let (root, mode) = {
                    let cur = self.cursor_mut(op.p1)?;
                    (cur.root_page(), cur.mode())
                };
                if mode != CursorMode::Write {
                    return Err(RliteError::Runtime(
                        "IdxInsert on a read-only cursor".into(),
                    ));
                }
                bt.insert_in_index(root, idx_key, key_pk)?;
                self.cursor_mut(op.p1)?.reset(bt)?;
                Ok(Flow::Advance)
            }

            Opcode::CreateTable => {
                let page = bt.new_node(PageType::TableLeaf)?;
                self.set_reg(op.p1, Value::Integer(page as i32))?;
                Ok(Flow::Advance)
            }

            Opcode::CreateIndex => {
                let page = bt.new_node(PageType::IndexLeaf)?;
                self.set_reg(op.p1, Value::Integer(page as i32))?;
                Ok(Flow::Advance)
            }

            Opcode::Copy | Opcode::SCopy => {
                // Registers own their payloads, so a shallow copy has no
                // safe representation; SCopy keeps its name for program
                // compatibility and copies like Copy.
                let value = self.reg(op.p1)?.clone();
                self.set_reg(op.p2, value)?;
                Ok(Flow::Advance)
            }

            Opcode::Halt => Ok(Flow::Halt(op.p1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(bt: &mut BTree, ops: Vec<Instruction>) -> ExecResult {
        Statement::new(ops).execute(bt).unwrap()
    }

    #[test]
    fn test_register_opcodes() {
        let mut bt = BTree::in_memory().unwrap();
        let result = run(
            &mut bt,
            vec![
                Instruction::new(Opcode::Integer, 41, 0, 0),
                Instruction::with_p4(Opcode::String, 0, 1, 0, "hi"),
                Instruction::new(Opcode::Null, 0, 2, 0),
                Instruction::new(Opcode::Copy, 0, 3, 0),
                Instruction::new(Opcode::SCopy, 1, 4, 0),
                Instruction::new(Opcode::ResultRow, 0, 5, 0),
                Instruction::new(Opcode::Halt, 0, 0, 0),
            ],
        );
        assert_eq!(result.status, 0);
        assert_eq!(
            result.rows,
            vec![vec![
                Value::Integer(41),
                Value::Text("hi".into()),
                Value::Null,
                Value::Integer(41),
                Value::Text("hi".into()),
            ]]
        );
    }

    #[test]
    fn test_null_compares_equal() {
        let mut bt = BTree::in_memory().unwrap();
        // Two null registers: Eq must take its jump, landing on Halt 0.
        let result = run(
            &mut bt,
            vec![
                Instruction::new(Opcode::Null, 0, 0, 0),
                Instruction::new(Opcode::Null, 0, 1, 0),
                Instruction::new(Opcode::Eq, 0, 5, 1),
                Instruction::new(Opcode::Noop, 0, 0, 0),
                Instruction::new(Opcode::Halt, 1, 0, 0),
                Instruction::new(Opcode::Halt, 0, 0, 0),
            ],
        );
        assert_eq!(result.status, 0);
    }

    #[test]
    fn test_integer_comparison_branches() {
        let mut bt = BTree::in_memory().unwrap();
        // 3 < 7 jumps; the fall-through Halt 1 is skipped.
        let result = run(
            &mut bt,
            vec![
                Instruction::new(Opcode::Integer, 3, 0, 0),
                Instruction::new(Opcode::Integer, 7, 1, 0),
                Instruction::new(Opcode::Lt, 0, 4, 1),
                Instruction::new(Opcode::Halt, 1, 0, 0),
                Instruction::new(Opcode::Halt, 0, 0, 0),
            ],
        );
        assert_eq!(result.status, 0);

        // 3 > 7 must not jump.
        let result = run(
            &mut bt,
            vec![
                Instruction::new(Opcode::Integer, 3, 0, 0),
                Instruction::new(Opcode::Integer, 7, 1, 0),
                Instruction::new(Opcode::Gt, 0, 4, 1),
                Instruction::new(Opcode::Halt, 1, 0, 0),
                Instruction::new(Opcode::Halt, 0, 0, 0),
            ],
        );
        assert_eq!(result.status, 1);
    }

    #[test]
    fn test_halt_status() {
        let mut bt = BTree::in_memory().unwrap();
        let result = run(&mut bt, vec![Instruction::new(Opcode::Halt, 42, 0, 0)]);
        assert_eq!(result.status, 42);
        assert!(result.rows.is_empty());
    }

    #[test]
    fn test_create_insert_scan_program() {
        let mut bt = BTree::in_memory().unwrap();

        // Create a table and remember its root page in register 0.
        let created = run(
            &mut bt,
            vec![
                Instruction::new(Opcode::CreateTable, 0, 0, 0),
                Instruction::new(Opcode::ResultRow, 0, 1, 0),
                Instruction::new(Opcode::Halt, 0, 0, 0),
            ],
        );
        let root = created.rows[0][0].as_integer().unwrap();

        // Insert two rows, then scan them back in key order.
        let result = run(
            &mut bt,
            vec![
                // 0: open a write cursor on the new table
                Instruction::new(Opcode::Integer, root, 0, 0),
                Instruction::new(Opcode::OpenWrite, 0, 0, 2),
                // 2: row (2, "beta")
                Instruction::with_p4(Opcode::String, 0, 1, 0, "beta"),
                Instruction::new(Opcode::MakeRecord, 1, 1, 2),
                Instruction::new(Opcode::Integer, 2, 3, 0),
                Instruction::new(Opcode::Insert, 0, 2, 3),
                // 6: row (1, "alpha")
                Instruction::with_p4(Opcode::String, 0, 1, 0, "alpha"),
                Instruction::new(Opcode::MakeRecord, 1, 1, 2),
                Instruction::new(Opcode::Integer, 1, 3, 0),
                Instruction::new(Opcode::Insert, 0, 2, 3),
                // 10: scan
                Instruction::new(Opcode::Rewind, 0, 16, 0),
                Instruction::new(Opcode::Key, 0, 4, 0),
                Instruction::new(Opcode::Column, 0, 0, 5),
                Instruction::new(Opcode::ResultRow, 4, 2, 0),
                Instruction::new(Opcode::Next, 0, 11, 0),
                Instruction::new(Opcode::Close, 0, 0, 0),
                Instruction::new(Opcode::Halt, 0, 0, 0),
            ],
        );
        assert_eq!(result.status, 0);
        assert_eq!(
            result.rows,
            vec![
                vec![Value::Integer(1), Value::Text("alpha".into())],
                vec![Value::Integer(2), Value::Text("beta".into())],
            ]
        );
    }

    #[test]
    fn test_rewind_on_empty_table_jumps() {
        let mut bt = BTree::in_memory().unwrap();
        let root = bt.new_node(PageType::TableLeaf).unwrap() as i32;
        let result = run(
            &mut bt,
            vec![
                Instruction::new(Opcode::Integer, root, 0, 0),
                Instruction::new(Opcode::OpenRead, 0, 0, 1),
                Instruction::new(Opcode::Rewind, 0, 4, 0),
                Instruction::new(Opcode::Halt, 1, 0, 0),
                Instruction::new(Opcode::Halt, 0, 0, 0),
            ],
        );
        assert_eq!(result.status, 0);
    }

    #[test]
    fn test_index_program_resolves_pk() {
        let mut bt = BTree::in_memory().unwrap();
        let idx_root = bt.new_node(PageType::IndexLeaf).unwrap() as i32;

        // IdxInsert (30, 3) and (10, 1), then look up idxkey 30's pk.
        let result = run(
            &mut bt,
            vec![
                Instruction::new(Opcode::Integer, idx_root, 0, 0),
                Instruction::new(Opcode::OpenWrite, 0, 0, 0),
                Instruction::new(Opcode::Integer, 30, 1, 0),
                Instruction::new(Opcode::Integer, 3, 2, 0),
                Instruction::new(Opcode::IdxInsert, 0, 1, 2),
                Instruction::new(Opcode::Integer, 10, 1, 0),
                Instruction::new(Opcode::Integer, 1, 2, 0),
                Instruction::new(Opcode::IdxInsert, 0, 1, 2),
                Instruction::new(Opcode::Integer, 30, 3, 0),
                Instruction::new(Opcode::Seek, 0, 13, 3),
                Instruction::new(Opcode::IdxPKey, 0, 4, 0),
                Instruction::new(Opcode::ResultRow, 4, 1, 0),
                Instruction::new(Opcode::Halt, 0, 0, 0),
                Instruction::new(Opcode::Halt, 1, 0, 0),
            ],
        );
        assert_eq!(result.status, 0);
        assert_eq!(result.rows, vec![vec![Value::Integer(3)]]);
    }

    #[test]
    fn test_duplicate_insert_surfaces_error() {
        let mut bt = BTree::in_memory().unwrap();
        let root = bt.new_node(PageType::TableLeaf).unwrap() as i32;
        bt.insert_in_table(root as u32, 5, b"row").unwrap();

        let err = Statement::new(vec![
            Instruction::new(Opcode::Integer, root, 0, 0),
            Instruction::new(Opcode::OpenWrite, 0, 0, 1),
            Instruction::new(Opcode::Null, 0, 1, 0),
            Instruction::new(Opcode::MakeRecord, 1, 1, 2),
            Instruction::new(Opcode::Integer, 5, 3, 0),
            Instruction::new(Opcode::Insert, 0, 2, 3),
            Instruction::new(Opcode::Halt, 0, 0, 0),
        ])
        .execute(&mut bt)
        .unwrap_err();
        assert!(matches!(err, RliteError::Duplicate(5)));
    }

    #[test]
    fn test_insert_on_read_cursor_is_rejected() {
        let mut bt = BTree::in_memory().unwrap();
        let root = bt.new_node(PageType::TableLeaf).unwrap() as i32;
        let err = Statement::new(vec![
            Instruction::new(Opcode::Integer, root, 0, 0),
            Instruction::new(Opcode::OpenRead, 0, 0, 1),
            Instruction::new(Opcode::Null, 0, 1, 0),
            Instruction::new(Opcode::MakeRecord, 1, 1, 2),
            Instruction::new(Opcode::Integer, 1, 3, 0),
            Instruction::new(Opcode::Insert, 0, 2, 3),
        ])
        .execute(&mut bt)
        .unwrap_err();
        assert!(matches!(err, RliteError::Runtime(_)));
    }
}
