#![no_main]

use arbitrary::Arbitrary;
use cellflow::{Cell, Object};
use libfuzzer_sys::fuzz_target;

const SOURCES: usize = 4;
const MAX_CELLS: usize = 64;

#[derive(Arbitrary, Debug)]
enum GraphOp {
    Put { source: u8, value: i16 },
    Invalidate { cell: u8 },
    Read { cell: u8 },
    MapOn { cell: u8, offset: i8 },
    Nest { outer: u8, inner: u8 },
    SetField { key: u8, value: i16 },
    ReplaceRoot { width: u8 },
    MutateObject { key: u8, value: i16 },
    AliasField { key: u8 },
    SetElement { index: u8, value: i16 },
}

fn pick(index: u8, len: usize) -> usize {
    usize::from(index) % len
}

fn record(width: usize) -> Object {
    (0..width).map(|key| (format!("k{key}"), 0)).collect()
}

fuzz_target!(|ops: Vec<GraphOp>| {
    let sources: Vec<Cell> = (0..SOURCES).map(|_| Cell::new(0)).collect();
    let mut object = record(SOURCES);
    let root = Cell::new(object.clone());
    let list = Cell::new(cellflow::Value::from_iter([0, 0]));
    let mut aliases = Vec::new();
    let mut cells = sources.clone();
    cells.extend((0..SOURCES).map(|key| root.property(format!("k{key}"))));

    for op in ops.into_iter().take(256) {
        match op {
            GraphOp::Put { source, value } => {
                let _ = sources[pick(source, SOURCES)].put(i32::from(value));
            }
            GraphOp::Invalidate { cell } => cells[pick(cell, cells.len())].invalidate(),
            GraphOp::Read { cell } => {
                let _ = cells[pick(cell, cells.len())].get();
            }
            GraphOp::MapOn { cell, offset } => {
                if cells.len() < MAX_CELLS {
                    let mapped = cells[pick(cell, cells.len())]
                        .map(move |v| v.as_f64().map(|n| n + f64::from(offset)));
                    cells.push(mapped);
                }
            }
            GraphOp::Nest { outer, inner } => {
                if cells.len() < MAX_CELLS {
                    let inner = cells[pick(inner, cells.len())].clone();
                    let nested = cells[pick(outer, cells.len())].map(move |_| inner.clone());
                    cells.push(nested);
                }
            }
            GraphOp::SetField { key, value } => {
                let _ = root.set(format!("k{}", key % 8), i32::from(value));
            }
            GraphOp::ReplaceRoot { width } => {
                object = record(usize::from(width % 8));
                let _ = root.put(object.clone());
            }
            GraphOp::MutateObject { key, value } => {
                object.insert(format!("k{}", key % 8), i32::from(value));
            }
            GraphOp::AliasField { key } => {
                if cells.len() < MAX_CELLS {
                    let alias = Cell::new(object.clone());
                    cells.push(alias.property(format!("k{}", key % 8)));
                    aliases.push(alias);
                }
            }
            GraphOp::SetElement { index, value } => {
                let _ = list.set((index % 4).to_string(), i32::from(value));
            }
        }
    }

    for source in &sources {
        assert!(source.get().is_ok());
        assert!(source.is_valid());
    }
});
