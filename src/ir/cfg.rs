use std::fmt;

use crate::ir::steps::Step;
use crate::lang::value::Value;

/// Index of a basic block inside its CFG.
pub type BlockId = usize;

/// Straight-line steps with up to two outgoing edges.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicBlock {
    pub steps: Vec<Step>,
    pub truthy: Option<BlockId>,
    pub falsy: Option<BlockId>,
}

impl BasicBlock {
    pub fn successors(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.truthy.into_iter().chain(self.falsy)
    }
}

/// Control-flow graph of one function. Block 0 is the entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cfg {
    blocks: Vec<BasicBlock>,

    /// Temps `0..param_count` hold the parameters.
    pub param_count: u16,
}

impl Cfg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bb(&mut self) -> BlockId {
        self.blocks.push(BasicBlock::default());
        self.blocks.len() - 1
    }

    /// Fills the first free successor slot of `from`, truthy before falsy.
    ///
    /// Returns false when `from` does not exist or already has both edges.
    pub fn link_bb(&mut self, from: BlockId, to: BlockId) -> bool {
        let Some(block) = self.blocks.get_mut(from) else {
            return false;
        };

        if block.truthy.is_none() {
            block.truthy = Some(to);
        } else if block.falsy.is_none() {
            block.falsy = Some(to);
        } else {
            return false;
        }

        true
    }

    pub fn get_bb(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id)
    }

    pub fn get_bb_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(id)
    }

    pub fn newest_id(&self) -> Option<BlockId> {
        self.blocks.len().checked_sub(1)
    }

    pub fn newest_bb_mut(&mut self) -> Option<&mut BasicBlock> {
        self.blocks.last_mut()
    }

    pub fn bb_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, block) in self.blocks.iter().enumerate() {
            writeln!(f, "bb{}:", id)?;
            for step in &block.steps {
                writeln!(f, "    {}", step)?;
            }
            let edge = |e: Option<BlockId>| e.map_or("-".to_string(), |id| format!("bb{}", id));
            writeln!(f, "    -> {} / {}", edge(block.truthy), edge(block.falsy))?;
        }
        Ok(())
    }
}

/// Lowered program: one CFG per function in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FullIR {
    pub cfg_list: Vec<Cfg>,
    pub constants: Vec<Value>,
    pub main_id: Option<usize>,
}

impl fmt::Display for FullIR {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, constant) in self.constants.iter().enumerate() {
            writeln!(f, "c{} = {}", id, constant)?;
        }
        for (id, cfg) in self.cfg_list.iter().enumerate() {
            let marker = if self.main_id == Some(id) { " (main)" } else { "" };
            writeln!(f, "fun #{}{}:", id, marker)?;
            write!(f, "{}", cfg)?;
        }
        Ok(())
    }
}
