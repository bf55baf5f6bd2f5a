//! Distance-driven level of detail.
//!
//! Maps a viewer position and a candidate block to the canonical coarse cell
//! that owns the candidate. A fixed-span octree is rooted at a box aligned
//! near the viewer; descent stops as soon as a cell is far enough away
//! relative to its own size. Client and server run the same functions, so
//! the result must be bit-for-bit deterministic: integer arithmetic only and
//! a fixed child enumeration order.

use glam::IVec3;

use crate::core::config::FarParams;
use crate::core::types::{BlockPos, Step};

/// Child offsets in descent order (x fastest, then y, then z)
pub const CHILD_OFFSETS: [IVec3; 8] = [
    IVec3::new(0, 0, 0),
    IVec3::new(1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(1, 1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(1, 0, 1),
    IVec3::new(0, 1, 1),
    IVec3::new(1, 1, 1),
];

/// Enumeration order with the four unchanged-Y children first
const CHILD_OFFSETS_FLAT_FIRST: [IVec3; 8] = [
    IVec3::new(0, 0, 0),
    IVec3::new(1, 0, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(1, 0, 1),
    IVec3::new(0, 1, 0),
    IVec3::new(1, 1, 0),
    IVec3::new(0, 1, 1),
    IVec3::new(1, 1, 1),
];

/// Axis-aligned cubic cell in block units
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Cell {
    pub origin: BlockPos,
    /// Edge length, always a power of two
    pub size: i32,
}

impl Cell {
    pub fn new(origin: BlockPos, size: i32) -> Self {
        Self { origin, size }
    }

    pub fn contains(&self, p: BlockPos) -> bool {
        let size = self.size as i64;
        let inside = |v: i32, o: i32| {
            let (v, o) = (v as i64, o as i64);
            v >= o && v < o + size
        };
        inside(p.x, self.origin.x) && inside(p.y, self.origin.y) && inside(p.z, self.origin.z)
    }

    /// Step of this cell for the given base cell size
    pub fn step(&self, params: &FarParams) -> Step {
        let pow = self.size.trailing_zeros();
        pow.saturating_sub(params.cell_size_pow as u32) as Step
    }

    fn child(&self, offset: IVec3) -> Cell {
        let half = self.size >> 1;
        Cell::new(self.origin + offset * half, half)
    }
}

/// Floor each component to a multiple of `1 << pow`
pub fn align_down(v: IVec3, pow: u32) -> IVec3 {
    IVec3::new((v.x >> pow) << pow, (v.y >> pow) << pow, (v.z >> pow) << pow)
}

/// Chebyshev distance from the viewer to the cell centre, damped by quality
fn damped_distance(viewer: BlockPos, cell: &Cell, params: &FarParams) -> i64 {
    let half = (cell.size >> 1) as i64;
    let axis = |v: i32, o: i32| (v as i64 - o as i64 - half).abs();
    let distance = axis(viewer.x, cell.origin.x)
        .max(axis(viewer.y, cell.origin.y))
        .max(axis(viewer.z, cell.origin.z));
    if params.quality > 0 {
        distance / params.quality as i64
    } else {
        distance
    }
}

/// A cell is final once it reaches the base size, or once it is at least
/// its own size away from the viewer and not larger than the step cap allows.
fn is_leaf(viewer: BlockPos, cell: &Cell, params: &FarParams) -> bool {
    let base = 1i64 << params.cell_size_pow;
    let size = cell.size as i64;
    if size <= base {
        return true;
    }
    let cap_size = base << params.step_cap;
    size <= cap_size && damped_distance(viewer, cell, params) >= size
}

/// Root box of the octree for this viewer.
///
/// Aligned on `tree_pow - 1` and shifted back by half that alignment, so the
/// viewer always sits inside it with at least a quarter span of margin.
pub fn root_cell(viewer: BlockPos, params: &FarParams) -> Cell {
    let align = params.tree_align();
    let shift = IVec3::splat(1 << (align - 1));
    Cell::new(align_down(viewer, align) - shift, 1 << params.tree_pow)
}

/// Cell returned for candidates outside the root box.
///
/// Root bounds are multiples of `1 << (tree_pow - 2)`, so aligning to that
/// grid (or a finer one) keeps the result outside the root and makes the
/// fallback idempotent.
fn external_cell(aligned: BlockPos, params: &FarParams) -> Cell {
    let pow = params
        .external_pow()
        .min(params.cell_size_pow as u32 + params.step_cap as u32);
    Cell::new(align_down(aligned, pow), 1 << pow)
}

/// Canonical cell owning `candidate` as seen from `viewer`
pub fn resolve_cell(viewer: BlockPos, candidate: BlockPos, params: &FarParams) -> Cell {
    let target = align_down(candidate, params.cell_size_pow as u32);
    let root = root_cell(viewer, params);
    if !root.contains(target) {
        log::trace!(
            "Far candidate {:?} outside root {:?}+{}, using external alignment",
            candidate,
            root.origin,
            root.size
        );
        return external_cell(target, params);
    }

    let mut cell = root;
    loop {
        if is_leaf(viewer, &cell, params) {
            return cell;
        }
        match CHILD_OFFSETS
            .iter()
            .map(|offset| cell.child(*offset))
            .find(|child| child.contains(target))
        {
            Some(child) => cell = child,
            None => return cell,
        }
    }
}

/// Step of the cell owning `candidate`
///
/// # Examples
/// ```
/// use farmesh::core::FarParams;
/// use farmesh::streaming::lod::resolve_step;
/// use glam::IVec3;
///
/// let params = FarParams { cell_size_pow: 4, quality: 1, ..Default::default() };
/// assert_eq!(resolve_step(IVec3::ZERO, IVec3::new(-32, 0, 0), &params), 0);
/// assert!(resolve_step(IVec3::ZERO, IVec3::new(32000, 0, 0), &params) > 4);
/// ```
pub fn resolve_step(viewer: BlockPos, candidate: BlockPos, params: &FarParams) -> Step {
    resolve_cell(viewer, candidate, params).step(params)
}

/// Canonical origin of the cell owning `candidate`
pub fn resolve_actual(candidate: BlockPos, viewer: BlockPos, params: &FarParams) -> BlockPos {
    resolve_cell(viewer, candidate, params).origin
}

/// Whether `(candidate, step)` is exactly the canonical identity of its cell
pub fn is_canonical(
    candidate: BlockPos,
    viewer: BlockPos,
    step: Step,
    params: &FarParams,
) -> bool {
    let cell = resolve_cell(viewer, candidate, params);
    cell.origin == candidate && cell.step(params) == step
}

/// Scan origin for a viewer block: aligned to the base cell scaled by
/// quality and moved to the centre of that cell.
pub fn player_block_align(viewer: BlockPos, params: &FarParams) -> BlockPos {
    let pow = params.cell_size_pow as u32 + params.quality_pow();
    align_down(viewer, pow) + IVec3::splat((1 << pow) >> 1)
}

/// Visit every leaf cell of the octree around `viewer`.
///
/// With `flat` set only the four unchanged-Y children of each split are
/// visited, which covers a single horizontal layer. Returning `true` from
/// the callback skips the remaining siblings of that cell.
pub fn for_each_cell<F>(viewer: BlockPos, params: &FarParams, flat: bool, mut f: F)
where
    F: FnMut(Cell) -> bool,
{
    let root = root_cell(viewer, params);
    if is_leaf(viewer, &root, params) {
        f(root);
        return;
    }
    visit_children(viewer, params, flat, &root, &mut f);
}

fn visit_children<F>(viewer: BlockPos, params: &FarParams, flat: bool, cell: &Cell, f: &mut F)
where
    F: FnMut(Cell) -> bool,
{
    let offsets = if flat {
        &CHILD_OFFSETS_FLAT_FIRST[..4]
    } else {
        &CHILD_OFFSETS_FLAT_FIRST[..]
    };
    for offset in offsets {
        let child = cell.child(*offset);
        if is_leaf(viewer, &child, params) {
            if f(child) {
                break;
            }
        } else {
            visit_children(viewer, params, flat, &child, f);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn scenario_params() -> FarParams {
        FarParams {
            cell_size_pow: 4,
            quality: 1,
            tree_pow: 16,
            step_cap: 12,
        }
    }

    fn sample_points() -> Vec<IVec3> {
        let mut points = Vec::new();
        let coords = [-40000, -9000, -513, -64, -17, -1, 0, 3, 31, 200, 4097, 30000, 70000];
        for &x in &coords {
            for &y in &[-300, 0, 15, 900] {
                for &z in &coords {
                    points.push(IVec3::new(x, y, z));
                }
            }
        }
        points
    }

    #[test]
    fn test_scenario_near_is_full_detail() {
        let params = scenario_params();
        // Two base cells out along -X, and the base cell next to the viewer
        assert_eq!(resolve_step(IVec3::ZERO, IVec3::new(-32, 0, 0), &params), 0);
        assert_eq!(resolve_step(IVec3::ZERO, IVec3::new(16, 0, 0), &params), 0);
        assert_eq!(resolve_step(IVec3::ZERO, IVec3::new(0, 0, -32), &params), 0);

        // The viewer sits on a cell corner, so distances are measured to cell
        // centres and the positive side coarsens one cell sooner
        let cell = resolve_cell(IVec3::ZERO, IVec3::new(32, 0, 0), &params);
        assert_eq!(cell, Cell::new(IVec3::new(32, 0, 0), 32));
        assert_eq!(cell.step(&params), 1);
    }

    #[test]
    fn test_scenario_far_is_coarse() {
        let params = scenario_params();
        let step = resolve_step(IVec3::ZERO, IVec3::new(2000 * 16, 0, 0), &params);
        assert!(step > 4, "step {}", step);
        let step = resolve_step(IVec3::ZERO, IVec3::new(0, 0, -2000 * 16), &params);
        assert!(step > 4, "step {}", step);
    }

    #[test]
    fn test_cell_size_matches_step() {
        let params = FarParams::default();
        for candidate in sample_points() {
            let cell = resolve_cell(IVec3::new(5, 2, -9), candidate, &params);
            let step = cell.step(&params);
            assert!(step <= params.step_cap);
            assert_eq!(cell.size, params.base_cell() << step);
        }
    }

    #[test]
    fn test_cell_contains_candidate() {
        let params = FarParams::default();
        let viewer = IVec3::new(-100, 4, 77);
        for candidate in sample_points() {
            let cell = resolve_cell(viewer, candidate, &params);
            assert!(cell.contains(candidate), "{:?} not in {:?}", candidate, cell);
        }
    }

    #[test]
    fn test_deterministic() {
        let params = scenario_params();
        let viewer = IVec3::new(12, -3, 700);
        for candidate in sample_points() {
            assert_eq!(
                resolve_cell(viewer, candidate, &params),
                resolve_cell(viewer, candidate, &params)
            );
        }
    }

    #[test]
    fn test_idempotent() {
        for params in [FarParams::default(), scenario_params()] {
            let viewer = IVec3::new(300, 10, -45);
            for candidate in sample_points() {
                let actual = resolve_actual(candidate, viewer, &params);
                let step = resolve_step(viewer, candidate, &params);
                assert_eq!(resolve_actual(actual, viewer, &params), actual);
                assert_eq!(resolve_step(viewer, actual, &params), step);
                assert!(is_canonical(actual, viewer, step, &params));
            }
        }
    }

    #[test]
    fn test_non_canonical_rejected() {
        let params = scenario_params();
        let far = IVec3::new(20000, 0, 0);
        let actual = resolve_actual(far, IVec3::ZERO, &params);
        let step = resolve_step(IVec3::ZERO, far, &params);
        assert!(step > 0);
        assert!(!is_canonical(actual + IVec3::new(16, 0, 0), IVec3::ZERO, step, &params));
        assert!(!is_canonical(actual, IVec3::ZERO, step + 1, &params));
    }

    #[test]
    fn test_monotonic_along_axes() {
        let params = FarParams::default();
        let root = root_cell(IVec3::ZERO, &params);
        let reach = (root.origin.x + root.size).min(-root.origin.x) - 1;
        for dir in [IVec3::X, IVec3::NEG_X, IVec3::Z, IVec3::NEG_Z] {
            let mut last = 0;
            let mut decreases = 0;
            for d in (0..reach).step_by(7) {
                let step = resolve_step(IVec3::ZERO, dir * d, &params);
                if step < last {
                    decreases += 1;
                }
                last = step;
            }
            assert!(decreases <= 1, "direction {:?} decreased {} times", dir, decreases);
        }
    }

    #[test]
    fn test_quality_damps_distance() {
        let coarse = scenario_params();
        let fine = FarParams { quality: 8, ..coarse };
        let candidate = IVec3::new(3000, 0, 0);
        assert!(
            resolve_step(IVec3::ZERO, candidate, &fine)
                <= resolve_step(IVec3::ZERO, candidate, &coarse)
        );
    }

    #[test]
    fn test_step_cap_forces_split() {
        let params = FarParams { step_cap: 3, ..scenario_params() };
        for candidate in sample_points() {
            assert!(resolve_step(IVec3::ZERO, candidate, &params) <= 3);
        }
    }

    #[test]
    fn test_root_edge() {
        let params = scenario_params();
        let viewer = IVec3::new(40, 0, -40);
        let root = root_cell(viewer, &params);
        assert!(root.contains(viewer));

        let first = root.origin;
        let last = root.origin + IVec3::splat(root.size - 1);
        for candidate in [first, last] {
            let cell = resolve_cell(viewer, candidate, &params);
            assert!(cell.contains(candidate));
            assert!(root.contains(cell.origin));
        }

        let outside = root.origin + IVec3::new(root.size, 0, 0);
        let cell = resolve_cell(viewer, outside, &params);
        assert!(cell.contains(outside));
        assert!(!root.contains(cell.origin));
    }

    #[test]
    fn test_far_outside_root() {
        let params = scenario_params();
        let span = 1 << params.tree_pow;
        let candidate = IVec3::new(10 * span, -10 * span, 3);
        let cell = resolve_cell(IVec3::ZERO, candidate, &params);
        assert!(cell.contains(candidate));
        assert_eq!(cell.size, 1 << params.external_pow());
        assert_eq!(resolve_cell(IVec3::ZERO, cell.origin, &params), cell);
    }

    #[test]
    fn test_player_block_align() {
        let params = FarParams { cell_size_pow: 2, quality: 1, ..Default::default() };
        assert_eq!(player_block_align(IVec3::new(5, -1, 9), &params), IVec3::new(6, -2, 10));

        let params = FarParams { cell_size_pow: 2, quality: 4, ..Default::default() };
        assert_eq!(player_block_align(IVec3::new(5, -1, 9), &params), IVec3::new(8, -8, 8));
    }

    #[test]
    fn test_for_each_cell_visits_canonical_disjoint_leaves() {
        let params = FarParams {
            cell_size_pow: 1,
            quality: 1,
            tree_pow: 8,
            step_cap: 12,
        };
        let viewer = IVec3::new(3, 1, -2);
        let mut cells = Vec::new();
        for_each_cell(viewer, &params, false, |cell| {
            cells.push(cell);
            false
        });

        let root = root_cell(viewer, &params);
        let volume: i64 = cells.iter().map(|c| (c.size as i64).pow(3)).sum();
        assert_eq!(volume, (root.size as i64).pow(3));

        let unique: HashSet<_> = cells.iter().copied().collect();
        assert_eq!(unique.len(), cells.len());
        for cell in cells {
            assert_eq!(resolve_cell(viewer, cell.origin, &params), cell);
        }
    }

    #[test]
    fn test_for_each_cell_flat_keeps_layer() {
        let params = FarParams {
            cell_size_pow: 1,
            quality: 1,
            tree_pow: 8,
            step_cap: 12,
        };
        let viewer = IVec3::ZERO;
        let root = root_cell(viewer, &params);
        let mut cells = Vec::new();
        for_each_cell(viewer, &params, true, |cell| {
            cells.push(cell);
            false
        });
        assert!(!cells.is_empty());
        assert!(cells.iter().all(|c| c.origin.y == root.origin.y));
    }

    #[test]
    fn test_for_each_cell_stop_skips_siblings() {
        let params = FarParams {
            cell_size_pow: 1,
            quality: 1,
            tree_pow: 8,
            step_cap: 12,
        };
        let mut all = 0;
        for_each_cell(IVec3::ZERO, &params, false, |_| {
            all += 1;
            false
        });
        let mut stopped = 0;
        for_each_cell(IVec3::ZERO, &params, false, |_| {
            stopped += 1;
            true
        });
        assert!(stopped < all);
    }
}
