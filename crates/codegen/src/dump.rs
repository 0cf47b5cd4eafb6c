//! Textual dumps of liveness and stack layouts.

use std::io;

use stackify_ir::{BlockId, DisplayStack, Function, OpKind};

use crate::{
    layout::StackLayout,
    liveness::{Liveness, SlotSet},
};

/// Writes, per block, the live-in set, the entry layout, the layout before
/// each operation, the exit layout and the live-out set.
pub struct LayoutWriter<'a> {
    func: &'a Function,
    liveness: &'a Liveness,
    layout: &'a StackLayout,
}

impl<'a> LayoutWriter<'a> {
    pub fn new(func: &'a Function, liveness: &'a Liveness, layout: &'a StackLayout) -> Self {
        Self {
            func,
            liveness,
            layout,
        }
    }

    pub fn write(&self, mut w: impl io::Write) -> io::Result<()> {
        writeln!(w, "// {}", self.func.name())?;
        for block in self.func.blocks.keys() {
            self.write_block(block, &mut w)?;
        }
        Ok(())
    }

    pub fn dump_string(&self) -> io::Result<String> {
        let mut s = Vec::new();
        self.write(&mut s)?;
        String::from_utf8(s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn write_block(&self, block: BlockId, mut w: impl io::Write) -> io::Result<()> {
        let func = self.func;
        writeln!(w, "{block}:")?;
        writeln!(w, "  live in  {}", DisplaySet(self.liveness.block_entry(block)))?;
        writeln!(w, "  entry    {}", DisplayStack(self.layout.block_entry(block)))?;

        for op in func.ops_of(block) {
            let data = &func.ops[op];
            let name = match &data.kind {
                OpKind::Call { callee, .. } => format!("call {callee}"),
                _ => data.name().to_string(),
            };
            writeln!(w, "  {op} {name}: {}", DisplayStack(self.layout.op_entry(op)))?;
        }

        writeln!(w, "  exit     {}", DisplayStack(self.layout.block_exit(block)))?;
        writeln!(w, "  live out {}", DisplaySet(self.liveness.block_exit(block)))
    }
}

/// Renders the layout dump of `func` as a string.
pub fn dump_layout(func: &Function, liveness: &Liveness, layout: &StackLayout) -> String {
    // Writing to a `Vec` cannot fail and every fragment is valid UTF-8.
    LayoutWriter::new(func, liveness, layout)
        .dump_string()
        .unwrap_or_default()
}

struct DisplaySet<'a>(&'a SlotSet);

impl std::fmt::Display for DisplaySet<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{ ")?;
        for slot in self.0 {
            write!(f, "{slot} ")?;
        }
        write!(f, "}}")
    }
}
