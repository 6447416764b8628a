// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

//! Layered directed-graph layout.
//!
//! Sugiyama-style: nodes are ranked into columns by their layer hint,
//! ordered within each column by a few barycenter sweeps to reduce edge
//! crossings, then assigned 2D coordinates with a left-to-right flow.
//! Pure and deterministic: identical inputs (including order) always yield
//! identical coordinates, so the output is safe to memoize.

/// Horizontal distance between adjacent columns
pub const COLUMN_GAP: f64 = 260.0;
/// Vertical distance between adjacent rows in a column
pub const ROW_GAP: f64 = 90.0;

/// Down-up ordering passes; more sweeps stop paying off quickly
const SWEEPS: usize = 4;

/// Assign coordinates to nodes given per-node layer hints and edges as
/// index pairs into the node slice. Returns (x, y) per node, in input
/// order. Callers pass nodes in a deterministic seed order; that order is
/// the tiebreak whenever barycenters are equal.
pub fn layered_layout(layers: &[u8], edges: &[(usize, usize)]) -> Vec<(f64, f64)> {
    if layers.is_empty() {
        return Vec::new();
    }

    // Occupied layers compress to consecutive columns
    let mut occupied: Vec<u8> = layers.to_vec();
    occupied.sort_unstable();
    occupied.dedup();
    let column_of = |layer: u8| -> usize {
        occupied.iter().position(|&l| l == layer).unwrap_or(0)
    };

    // Column membership in seed order
    let mut columns: Vec<Vec<usize>> = vec![Vec::new(); occupied.len()];
    for (idx, &layer) in layers.iter().enumerate() {
        columns[column_of(layer)].push(idx);
    }

    // Undirected adjacency; edges to non-adjacent columns still pull
    let mut neighbors: Vec<Vec<usize>> = vec![Vec::new(); layers.len()];
    for &(from, to) in edges {
        if from < layers.len() && to < layers.len() && from != to {
            neighbors[from].push(to);
            neighbors[to].push(from);
        }
    }

    // Row index of each node within its column
    let mut row: Vec<usize> = vec![0; layers.len()];
    for column in &columns {
        for (i, &idx) in column.iter().enumerate() {
            row[idx] = i;
        }
    }

    let reorder = |column: &mut Vec<usize>, row: &mut Vec<usize>, neighbors: &Vec<Vec<usize>>| {
        let barycenter = |idx: usize| -> f64 {
            let adj = &neighbors[idx];
            if adj.is_empty() {
                return row[idx] as f64;
            }
            adj.iter().map(|&n| row[n] as f64).sum::<f64>() / adj.len() as f64
        };
        let keyed: Vec<(f64, usize, usize)> = column
            .iter()
            .map(|&idx| (barycenter(idx), row[idx], idx))
            .collect();
        let mut keyed = keyed;
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        column.clear();
        for (i, (_, _, idx)) in keyed.into_iter().enumerate() {
            column.push(idx);
            row[idx] = i;
        }
    };

    for _ in 0..SWEEPS {
        for c in 0..columns.len() {
            let mut column = std::mem::take(&mut columns[c]);
            reorder(&mut column, &mut row, &neighbors);
            columns[c] = column;
        }
        for c in (0..columns.len()).rev() {
            let mut column = std::mem::take(&mut columns[c]);
            reorder(&mut column, &mut row, &neighbors);
            columns[c] = column;
        }
    }

    // Coordinates: columns flow left to right, rows centered vertically
    let mut coords = vec![(0.0, 0.0); layers.len()];
    for (c, column) in columns.iter().enumerate() {
        let mid = (column.len() as f64 - 1.0) / 2.0;
        for (i, &idx) in column.iter().enumerate() {
            coords[idx] = (c as f64 * COLUMN_GAP, (i as f64 - mid) * ROW_GAP);
        }
    }
    coords
}
