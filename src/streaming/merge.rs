//! Offline downsampling of one tier into the next.
//!
//! Eight step-`s` blocks make one step-`s+1` block. Each parent node takes
//! the weighted majority content of a 2×2×2 group of child nodes.

use glam::IVec3;
use log::{debug, info};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

use crate::core::config::FarParams;
use crate::core::error::Error;
use crate::core::types::{BLOCK_SIZE, BlockPos, MAX_STEP, Result, Step};
use crate::streaming::lod::align_down;
use crate::streaming::tier_db::{TierDatabase, TierProvider};
use crate::voxel::far_block::{FAR_BLOCK_VOLUME, FarBlock, grid_index};
use crate::voxel::node::{ContentId, Node};

/// Sample order within a 2×2×2 group; the first encountered wins ties
const MERGE_SAMPLES: [IVec3; 8] = [
    IVec3::new(0, 1, 0),
    IVec3::new(1, 0, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, 0),
    IVec3::new(1, 1, 0),
    IVec3::new(0, 1, 1),
    IVec3::new(1, 0, 1),
    IVec3::new(1, 1, 1),
];

const WEIGHT_AIR: u32 = 1;
const WEIGHT_SOLID: u32 = 2;
/// Extra weight of the sample at the group origin
const WEIGHT_MAIN: u32 = 4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub step: Step,
    pub parents: usize,
    pub saved: usize,
    /// Parents with nothing but ignore nodes
    pub skipped: usize,
}

pub struct TierMerger {
    params: FarParams,
    provider: Arc<dyn TierProvider>,
}

impl TierMerger {
    pub fn new(params: FarParams, provider: Arc<dyn TierProvider>) -> Self {
        Self { params, provider }
    }

    /// Merge every block of `step` into `step + 1`
    pub fn merge_step(&self, step: Step) -> Result<MergeStats> {
        if step >= MAX_STEP {
            return Err(Error::Streaming(format!("cannot merge step {} upwards", step)));
        }
        let src = self.provider.open(step)?;
        let dst = self.provider.open(step + 1)?;

        let parent_pow = self.params.cell_size_pow as u32 + step as u32 + 1;
        let parents: HashSet<BlockPos> = src
            .list_blocks()?
            .into_iter()
            .map(|pos| align_down(pos, parent_pow))
            .collect();
        let mut parents: Vec<BlockPos> = parents.into_iter().collect();
        parents.sort_by_key(|p| (p.y, p.z, p.x));

        let start = std::time::Instant::now();
        let results: Vec<Result<bool>> = parents
            .par_iter()
            .map(|&parent| match self.merge_parent(src.as_ref(), parent, step)? {
                Some(block) => {
                    dst.save_block(&block)?;
                    Ok(true)
                }
                None => Ok(false),
            })
            .collect();

        let mut stats = MergeStats {
            step,
            parents: parents.len(),
            ..Default::default()
        };
        for result in results {
            if result? {
                stats.saved += 1;
            } else {
                stats.skipped += 1;
            }
        }
        info!(
            "Merged step {} into {}: {} parents, {} saved, {} empty in {:.1}s",
            step,
            step + 1,
            stats.parents,
            stats.saved,
            stats.skipped,
            start.elapsed().as_secs_f64()
        );
        Ok(stats)
    }

    /// Merge `from` into `from + 1`, then that into the next, up to `to`
    pub fn merge_range(&self, from: Step, to: Step) -> Result<Vec<MergeStats>> {
        (from..to.min(MAX_STEP)).map(|step| self.merge_step(step)).collect()
    }

    /// Build the parent block at `parent` from its eight children at `step`
    fn merge_parent(
        &self,
        src: &dyn TierDatabase,
        parent: BlockPos,
        step: Step,
    ) -> Result<Option<FarBlock>> {
        let child_size = 1i32 << (self.params.cell_size_pow as u32 + step as u32);
        let mut children: [Option<FarBlock>; 8] = Default::default();
        for (i, child) in children.iter_mut().enumerate() {
            let offset = IVec3::new(i as i32 & 1, (i as i32 >> 1) & 1, (i as i32 >> 2) & 1);
            *child = src.load_block(parent + offset * child_size)?;
        }

        let present: Vec<&FarBlock> = children.iter().flatten().collect();
        if present.is_empty() {
            return Ok(None);
        }

        let half = BLOCK_SIZE / 2;
        let mut nodes = vec![Node::IGNORE; FAR_BLOCK_VOLUME];
        let mut filled = 0;
        for z in 0..BLOCK_SIZE {
            for y in 0..BLOCK_SIZE {
                for x in 0..BLOCK_SIZE {
                    let child_index = (x / half) + (y / half) * 2 + (z / half) * 4;
                    let Some(child) = &children[child_index as usize] else {
                        continue;
                    };
                    let local = IVec3::new((x << 1) % BLOCK_SIZE, (y << 1) % BLOCK_SIZE, (z << 1) % BLOCK_SIZE);
                    let node = merge_sample(child, local);
                    if !node.is_ignore() {
                        nodes[grid_index(x, y, z)] = node;
                        filled += 1;
                    }
                }
            }
        }
        if filled == 0 {
            debug!("Merged block {:?} step {} is all ignore", parent, step + 1);
            return Ok(None);
        }

        let count = present.len() as i32;
        let heat = present.iter().map(|b| b.heat as i32).sum::<i32>() / count;
        let humidity = present.iter().map(|b| b.humidity as i32).sum::<i32>() / count;
        let iteration = present.iter().map(|b| b.iteration).max().unwrap_or(0);

        Ok(Some(FarBlock::from_nodes(
            parent,
            step + 1,
            iteration,
            nodes,
            heat as i16,
            humidity as i16,
        )))
    }
}

/// Weighted majority node of the 2×2×2 group starting at `local`
fn merge_sample(block: &FarBlock, local: IVec3) -> Node {
    let mut tally: Vec<(ContentId, u32, Node)> = Vec::with_capacity(MERGE_SAMPLES.len());
    for offset in MERGE_SAMPLES {
        let p = local + offset;
        let node = block.node_at(p.x, p.y, p.z);
        if node.is_ignore() {
            continue;
        }
        let mut weight = if node.is_air() { WEIGHT_AIR } else { WEIGHT_SOLID };
        if offset == IVec3::ZERO {
            weight += WEIGHT_MAIN;
        }
        match tally.iter_mut().find(|(content, _, _)| *content == node.content) {
            Some(entry) => entry.1 += weight,
            None => tally.push((node.content, weight, node)),
        }
    }

    let mut best: Option<(u32, Node)> = None;
    for (_, weight, node) in tally {
        if best.is_none_or(|(w, _)| weight > w) {
            best = Some((weight, node));
        }
    }
    best.map(|(_, node)| node).unwrap_or(Node::IGNORE)
}
