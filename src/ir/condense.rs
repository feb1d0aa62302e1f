use std::collections::{HashMap, HashSet};

use crate::ir::{
    cfg::{BasicBlock, Cfg, FullIR},
    steps::{AbsAddress, AddrTag, Op, Step},
};

/// Runs the copy condenser over every function. Returns false if any CFG
/// was rejected; rejected CFGs are left untouched.
pub fn condense(ir: &mut FullIR) -> bool {
    let mut all_ok = true;
    for (id, cfg) in ir.cfg_list.iter_mut().enumerate() {
        if !Condenser::apply(cfg) {
            log::warn!("condenser skipped function #{}", id);
            all_ok = false;
        }
    }
    all_ok
}

/// Peephole pass collapsing single-use copy chains inside a basic block.
///
/// Steps are neutralized in place and never removed, so positions stay valid.
#[derive(Debug, Default)]
pub struct Condenser {
    uses: HashMap<i16, u32>,
    writes: HashMap<i16, u32>,
    rewrites: usize,
}

impl Condenser {
    pub fn apply(cfg: &mut Cfg) -> bool {
        if cfg.bb_count() == 0 {
            return false;
        }
        let count = cfg.bb_count();
        if cfg
            .blocks()
            .iter()
            .flat_map(BasicBlock::successors)
            .any(|succ| succ >= count)
        {
            return false;
        }

        let mut condenser = Condenser::default();
        condenser.count(cfg);

        let mut visited = HashSet::new();
        let mut worklist = vec![0];
        while let Some(id) = worklist.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(block) = cfg.get_bb_mut(id) else {
                return false;
            };
            condenser.condense_block(block);
            worklist.extend(block.successors().filter(|s| !visited.contains(s)));
        }

        log::debug!("condenser applied {} rewrite(s)", condenser.rewrites);
        true
    }

    fn count(&mut self, cfg: &Cfg) {
        for step in cfg.blocks().iter().flat_map(|b| b.steps.iter()) {
            for arg in step.args() {
                if arg.is_temp() {
                    *self.uses.entry(arg.id).or_default() += 1;
                }
            }
            if let Some(dest) = step.dest().filter(AbsAddress::is_temp) {
                *self.writes.entry(dest.id).or_default() += 1;
            }
        }
    }

    fn single_use(&self, temp: AbsAddress) -> bool {
        temp.is_temp()
            && self.uses.get(&temp.id) == Some(&1)
            && self.writes.get(&temp.id) == Some(&1)
    }

    fn forget(&mut self, temp: AbsAddress) {
        self.uses.remove(&temp.id);
        self.writes.remove(&temp.id);
        self.rewrites += 1;
    }

    fn condense_block(&mut self, block: &mut BasicBlock) {
        let pinned = pinned_arg_copies(&block.steps);

        for j in 0..block.steps.len() {
            if pinned.contains(&j) {
                continue;
            }
            let Step::TacUnary {
                dest: outer_dest,
                op: Op::Nop,
                arg0: middle,
            } = block.steps[j]
            else {
                continue;
            };
            if !self.single_use(middle) {
                continue;
            }
            let Some(i) = (0..j).rev().find(|&i| block.steps[i].dest() == Some(middle)) else {
                continue;
            };
            if pinned.contains(&i) {
                continue;
            }
            let between = &block.steps[i + 1..j];
            if between.iter().any(|s| s.op().is_call()) {
                continue;
            }

            let writer = block.steps[i];
            match writer {
                // B <- C; A <- B  =>  A <- C
                Step::TacUnary {
                    op: Op::Nop,
                    arg0: source,
                    ..
                } => {
                    if source.tag == AddrTag::Temp && writes_to(between, source) {
                        continue;
                    }
                    block.steps[j] = Step::TacUnary {
                        dest: outer_dest,
                        op: Op::Nop,
                        arg0: source,
                    };
                    block.steps[i] = Step::condensed();
                    self.forget(middle);
                }
                // B = x op y; A <- B  =>  A = x op y
                Step::TacUnary { op: Op::Neg, .. } | Step::TacBinary { .. } => {
                    if writes_to(between, outer_dest) || reads_from(between, outer_dest) {
                        continue;
                    }
                    block.steps[i] = retarget(writer, outer_dest);
                    block.steps[j] = Step::condensed();
                    self.forget(middle);
                }
                _ => {}
            }
        }
    }
}

/// Indices of the argument copies feeding each call in `steps`.
fn pinned_arg_copies(steps: &[Step]) -> HashSet<usize> {
    let mut pinned = HashSet::new();
    for (k, step) in steps.iter().enumerate() {
        if let Step::OperBinary { op, arg1, .. } = step {
            if !op.is_call() || arg1.tag != AddrTag::Immediate {
                continue;
            }
            let argc = usize::try_from(arg1.id).unwrap_or(0);
            pinned.extend((k.saturating_sub(argc)..k).filter(|&p| steps[p].is_copy()));
        }
    }
    pinned
}

fn writes_to(steps: &[Step], addr: AbsAddress) -> bool {
    steps.iter().any(|s| s.dest() == Some(addr))
}

fn reads_from(steps: &[Step], addr: AbsAddress) -> bool {
    steps.iter().any(|s| s.args().contains(&addr))
}

fn retarget(step: Step, new_dest: AbsAddress) -> Step {
    match step {
        Step::TacUnary { op, arg0, .. } => Step::TacUnary {
            dest: new_dest,
            op,
            arg0,
        },
        Step::TacBinary { op, arg0, arg1, .. } => Step::TacBinary {
            dest: new_dest,
            op,
            arg0,
            arg1,
        },
        other => other,
    }
}
