//! 8-connected component labeling over a boolean pixel mask.
//!
//! Two passes: the first assigns provisional labels from the already-visited
//! neighbours (W, NW, N, NE) and records equivalences in a union-find arena;
//! the second resolves every pixel to its root. Components come out in the
//! row-major order of their first pixel.

use std::collections::BTreeMap;

use crate::core::cancel::CancelToken;
use crate::core::error::FusionResult;

#[derive(Debug, Default)]
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn make_set(&mut self) -> usize {
        let id = self.parent.len();
        self.parent.push(id);
        id
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            let (keep, absorb) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[absorb] = keep;
        }
    }
}

/// Groups the `true` pixels of a `width`-wide row-major mask. Each component is
/// the list of its pixel indices in row-major order.
pub fn label_components(
    mask: &[bool],
    width: usize,
    cancel: &CancelToken,
) -> FusionResult<Vec<Vec<usize>>> {
    if width == 0 || mask.is_empty() {
        return Ok(Vec::new());
    }
    let height = mask.len() / width;

    let mut sets = UnionFind::default();
    let mut labels: Vec<Option<usize>> = vec![None; mask.len()];

    for y in 0..height {
        cancel.check()?;
        for x in 0..width {
            let idx = y * width + x;
            if !mask[idx] {
                continue;
            }

            let mut neighbours = [None; 4];
            if x > 0 {
                neighbours[0] = labels[idx - 1];
            }
            if y > 0 {
                let up = idx - width;
                if x > 0 {
                    neighbours[1] = labels[up - 1];
                }
                neighbours[2] = labels[up];
                if x + 1 < width {
                    neighbours[3] = labels[up + 1];
                }
            }

            let mut assigned = None;
            for label in neighbours.into_iter().flatten() {
                match assigned {
                    None => assigned = Some(label),
                    Some(current) => sets.union(current, label),
                }
            }
            labels[idx] = Some(assigned.unwrap_or_else(|| sets.make_set()));
        }
    }

    let mut order: BTreeMap<usize, usize> = BTreeMap::new();
    let mut components: Vec<Vec<usize>> = Vec::new();
    for (idx, label) in labels.iter().enumerate() {
        let Some(label) = label else { continue };
        let root = sets.find(*label);
        let slot = *order.entry(root).or_insert_with(|| {
            components.push(Vec::new());
            components.len() - 1
        });
        components[slot].push(idx);
    }

    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mask(rows: &[&str]) -> (Vec<bool>, usize) {
        let width = rows[0].len();
        let data = rows
            .iter()
            .flat_map(|row| row.chars().map(|c| c == '#'))
            .collect();
        (data, width)
    }

    #[test]
    fn diagonal_pixels_are_connected() {
        let (data, width) = mask(&["#..", ".#.", "..#"]);
        let components = label_components(&data, width, &CancelToken::new()).unwrap();
        assert_eq!(components, vec![vec![0, 4, 8]]);
    }

    #[test]
    fn u_shape_merges_into_one_component() {
        let (data, width) = mask(&["#.#", "#.#", "###"]);
        let components = label_components(&data, width, &CancelToken::new()).unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), 7);
    }

    #[test]
    fn separate_blobs_ordered_by_first_pixel() {
        let (data, width) = mask(&["..##", "....", "#...", "#..#"]);
        let components = label_components(&data, width, &CancelToken::new()).unwrap();
        assert_eq!(components, vec![vec![2, 3], vec![8, 12], vec![15]]);
    }

    #[test]
    fn anti_diagonal_merge_through_north_east() {
        let (data, width) = mask(&["..#", ".#.", "#.."]);
        let components = label_components(&data, width, &CancelToken::new()).unwrap();
        assert_eq!(components, vec![vec![2, 4, 6]]);
    }

    #[test]
    fn empty_mask_yields_nothing() {
        let components = label_components(&[], 0, &CancelToken::new()).unwrap();
        assert!(components.is_empty());
    }

    #[test]
    fn honours_cancellation() {
        let (data, width) = mask(&["##", "##"]);
        let token = CancelToken::new();
        token.cancel();
        assert!(label_components(&data, width, &token).is_err());
    }
}
