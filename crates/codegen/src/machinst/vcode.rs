use std::fmt;

use cranelift_entity::{
    entity_impl, packed_option::PackedOption, EntityList, ListPool, PrimaryMap, SecondaryMap,
};
use smallvec::SmallVec;
use stackify_ir::{module::FuncRef, BlockId, Function, OpId, OpKind, U256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Block(BlockId),
    Function(FuncRef),
    /// The address a call returns to.
    CallReturn(OpId),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block(block) => write!(f, "{block}"),
            Self::Function(func) => write!(f, "{func}"),
            Self::CallReturn(op) => write!(f, "ret.{op}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    Label(Label),
    Push(U256),
    PushLabel(Label),
    /// Pushes an arbitrary value.
    PushJunk,
    /// `DUPn`: copies the slot `n - 1` positions below the top.
    Dup(u8),
    /// `SWAPn`: exchanges the top with the slot `n` positions below it.
    Swap(u8),
    Pop,
    /// The machine instruction (or call) of an operation.
    Op(OpId),
    Jump(BlockId),
    Branch {
        condition_depth: u8,
        zero: BlockId,
        non_zero: BlockId,
    },
    JumpTable {
        selector_depth: u8,
        cases: SmallVec<[(U256, BlockId); 4]>,
        default: BlockId,
    },
    Return {
        label_depth: u8,
    },
    Stop,
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(label) => write!(f, "{label}:"),
            Self::Push(value) => write!(f, "push 0x{value:x}"),
            Self::PushLabel(label) => write!(f, "push {label}"),
            Self::PushJunk => write!(f, "push junk"),
            Self::Dup(n) => write!(f, "dup{n}"),
            Self::Swap(n) => write!(f, "swap{n}"),
            Self::Pop => write!(f, "pop"),
            Self::Op(op) => write!(f, "{op}"),
            Self::Jump(target) => write!(f, "jump {target}"),
            Self::Branch {
                condition_depth,
                zero,
                non_zero,
            } => write!(f, "branch @{condition_depth} zero {zero} nonzero {non_zero}"),
            Self::JumpTable {
                selector_depth,
                cases,
                default,
            } => {
                write!(f, "switch @{selector_depth}")?;
                for (value, target) in cases {
                    write!(f, " 0x{value:x} {target}")?;
                }
                write!(f, " default {default}")
            }
            Self::Return { label_depth } => write!(f, "return @{label_depth}"),
            Self::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Copy, Hash, PartialOrd, Ord)]
pub struct VCodeInst(pub u32);
entity_impl!(VCodeInst);

/// The lowered instruction stream of a function.
#[derive(Debug, Clone)]
pub struct VCode {
    pub func_ref: FuncRef,
    pub insts: PrimaryMap<VCodeInst, Inst>,

    /// The operation an instruction was emitted for, if any.
    pub inst_ir: SecondaryMap<VCodeInst, PackedOption<OpId>>,

    /// Instructions preceding the entry block: the function label and the
    /// shuffle from the calling convention to the entry layout.
    pub prologue: EntityList<VCodeInst>,
    pub blocks: SecondaryMap<BlockId, EntityList<VCodeInst>>,

    /// Blocks in emission order.
    pub block_order: Vec<BlockId>,

    pub insts_pool: ListPool<VCodeInst>,
}

impl VCode {
    pub fn new(func_ref: FuncRef) -> Self {
        Self {
            func_ref,
            insts: PrimaryMap::new(),
            inst_ir: SecondaryMap::new(),
            prologue: EntityList::new(),
            blocks: SecondaryMap::new(),
            block_order: Vec::new(),
            insts_pool: ListPool::new(),
        }
    }

    /// Appends `inst` to `block`, or to the prologue if `block` is `None`.
    pub fn add_inst(
        &mut self,
        inst: Inst,
        source_op: Option<OpId>,
        block: Option<BlockId>,
    ) -> VCodeInst {
        let id = self.insts.push(inst);
        self.inst_ir[id] = source_op.into();
        match block {
            Some(block) => self.blocks[block].push(id, &mut self.insts_pool),
            None => self.prologue.push(id, &mut self.insts_pool),
        };
        id
    }

    pub fn block_insts(&self, block: BlockId) -> &[VCodeInst] {
        self.blocks[block].as_slice(&self.insts_pool)
    }

    /// All instructions in emission order.
    pub fn inst_ids(&self) -> impl Iterator<Item = VCodeInst> + '_ {
        self.prologue
            .as_slice(&self.insts_pool)
            .iter()
            .chain(
                self.block_order
                    .iter()
                    .flat_map(|block| self.block_insts(*block)),
            )
            .copied()
    }

    pub fn iter_insts(&self) -> impl Iterator<Item = &Inst> + '_ {
        self.inst_ids().map(|inst| &self.insts[inst])
    }

    pub fn display<'a>(&'a self, func: &'a Function) -> DisplayVCode<'a> {
        DisplayVCode { vcode: self, func }
    }
}

/// Writes the instruction stream with operation names resolved.
pub struct DisplayVCode<'a> {
    vcode: &'a VCode,
    func: &'a Function,
}

impl DisplayVCode<'_> {
    fn write_inst(&self, f: &mut fmt::Formatter<'_>, inst: VCodeInst) -> fmt::Result {
        match &self.vcode.insts[inst] {
            Inst::Label(label) => writeln!(f, "  {label}:"),
            Inst::Op(op) => match &self.func.ops[*op].kind {
                OpKind::Call { callee, .. } => writeln!(f, "    call {callee}  // {op}"),
                _ => writeln!(f, "    {}  // {op}", self.func.ops[*op].name()),
            },
            inst => writeln!(f, "    {inst}"),
        }
    }
}

impl fmt::Display for DisplayVCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vcode = self.vcode;
        writeln!(f, "// {}", self.func.name())?;
        for inst in vcode.inst_ids() {
            self.write_inst(f, inst)?;
        }
        Ok(())
    }
}
