//! Uniform grid overlaying the quad-tree.
//!
//! Secondary index: every object in the tree is also registered in each
//! cell its bounds overlap, split into static and dynamic lists. Cells link
//! to their 8-neighbourhood by index.

use glam::Vec2;

use crate::math::Aabb;
use crate::scene::ObjectId;

/// Column/row of a grid cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CellCoord {
    pub x: u32,
    pub y: u32,
}

/// One grid bucket
#[derive(Clone, Debug)]
pub struct SpatialCell {
    pub coord: CellCoord,
    pub bounds: Aabb,
    static_objects: Vec<ObjectId>,
    dynamic_objects: Vec<ObjectId>,
    neighbors: Vec<usize>,
}

impl SpatialCell {
    pub fn static_objects(&self) -> &[ObjectId] {
        &self.static_objects
    }

    pub fn dynamic_objects(&self) -> &[ObjectId] {
        &self.dynamic_objects
    }

    /// Indices of the adjacent cells (edges and corners)
    pub fn neighbors(&self) -> &[usize] {
        &self.neighbors
    }

    pub fn len(&self) -> usize {
        self.static_objects.len() + self.dynamic_objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.static_objects.contains(&id) || self.dynamic_objects.contains(&id)
    }

    fn list_mut(&mut self, is_static: bool) -> &mut Vec<ObjectId> {
        if is_static {
            &mut self.static_objects
        } else {
            &mut self.dynamic_objects
        }
    }
}

/// Fixed-size grid of [`SpatialCell`]s over the world bounds
#[derive(Clone, Debug)]
pub struct UniformGrid {
    bounds: Aabb,
    cell_size: f32,
    columns: u32,
    rows: u32,
    cells: Vec<SpatialCell>,
}

impl UniformGrid {
    /// Build the grid. A non-positive `cell_size` yields a single cell.
    pub fn new(bounds: Aabb, cell_size: f32) -> Self {
        let size = bounds.size();
        let cell_size = if cell_size > 0.0 {
            cell_size
        } else {
            size.x.max(size.y).max(1.0)
        };
        let columns = ((size.x / cell_size).ceil() as u32).max(1);
        let rows = ((size.y / cell_size).ceil() as u32).max(1);

        let mut cells = Vec::with_capacity((columns * rows) as usize);
        for y in 0..rows {
            for x in 0..columns {
                let min = bounds.min + Vec2::new(x as f32, y as f32) * cell_size;
                cells.push(SpatialCell {
                    coord: CellCoord { x, y },
                    bounds: Aabb::new(min, min + Vec2::splat(cell_size)),
                    static_objects: Vec::new(),
                    dynamic_objects: Vec::new(),
                    neighbors: Self::neighbor_indices(x, y, columns, rows),
                });
            }
        }

        log::debug!("UniformGrid: {}x{} cells of {}", columns, rows, cell_size);

        Self {
            bounds,
            cell_size,
            columns,
            rows,
            cells,
        }
    }

    fn neighbor_indices(x: u32, y: u32, columns: u32, rows: u32) -> Vec<usize> {
        let mut out = Vec::with_capacity(8);
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = x as i64 + dx;
                let ny = y as i64 + dy;
                if nx >= 0 && ny >= 0 && nx < columns as i64 && ny < rows as i64 {
                    out.push((ny * columns as i64 + nx) as usize);
                }
            }
        }
        out
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// (columns, rows)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.columns, self.rows)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn cell(&self, index: usize) -> Option<&SpatialCell> {
        self.cells.get(index)
    }

    pub fn index_of(&self, coord: CellCoord) -> Option<usize> {
        (coord.x < self.columns && coord.y < self.rows)
            .then(|| (coord.y * self.columns + coord.x) as usize)
    }

    /// Cell containing `point`, `None` outside the grid
    pub fn cell_at(&self, point: Vec2) -> Option<usize> {
        if !self.bounds.contains_point(point) {
            return None;
        }
        let x = self.column_of(point.x);
        let y = self.row_of(point.y);
        self.index_of(CellCoord { x, y })
    }

    pub fn neighbors(&self, index: usize) -> &[usize] {
        self.cells
            .get(index)
            .map(|c| c.neighbors.as_slice())
            .unwrap_or(&[])
    }

    fn column_of(&self, x: f32) -> u32 {
        let c = ((x - self.bounds.min.x) / self.cell_size).floor();
        (c.max(0.0) as u32).min(self.columns - 1)
    }

    fn row_of(&self, y: f32) -> u32 {
        let r = ((y - self.bounds.min.y) / self.cell_size).floor();
        (r.max(0.0) as u32).min(self.rows - 1)
    }

    /// Inclusive cell index ranges overlapped by `bounds`
    fn covered(&self, bounds: &Aabb) -> Option<(std::ops::RangeInclusive<u32>, std::ops::RangeInclusive<u32>)> {
        if !bounds.is_valid() || !self.bounds.overlaps(bounds) {
            return None;
        }
        Some((
            self.column_of(bounds.min.x)..=self.column_of(bounds.max.x),
            self.row_of(bounds.min.y)..=self.row_of(bounds.max.y),
        ))
    }

    /// Cell indices overlapped by `bounds`
    pub fn cells_overlapping(&self, bounds: &Aabb) -> Vec<usize> {
        let Some((columns, rows)) = self.covered(bounds) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        for y in rows {
            for x in columns.clone() {
                out.push((y * self.columns + x) as usize);
            }
        }
        out
    }

    /// Register `id` in every cell its bounds overlap. Returns the cell count.
    pub fn insert(&mut self, id: ObjectId, bounds: &Aabb, is_static: bool) -> usize {
        let cells = self.cells_overlapping(bounds);
        for &index in &cells {
            self.cells[index].list_mut(is_static).push(id);
        }
        cells.len()
    }

    /// Unregister `id` from the cells `bounds` overlaps
    pub fn remove(&mut self, id: ObjectId, bounds: &Aabb, is_static: bool) {
        for index in self.cells_overlapping(bounds) {
            let list = self.cells[index].list_mut(is_static);
            if let Some(i) = list.iter().position(|&o| o == id) {
                list.swap_remove(i);
            }
        }
    }

    /// Candidate ids registered in cells overlapping `bounds`, sorted and
    /// deduplicated. Candidates may lie outside `bounds` itself.
    pub fn query(&self, bounds: &Aabb) -> Vec<ObjectId> {
        let mut out = Vec::new();
        for index in self.cells_overlapping(bounds) {
            let cell = &self.cells[index];
            out.extend_from_slice(&cell.static_objects);
            out.extend_from_slice(&cell.dynamic_objects);
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    pub fn clear(&mut self) {
        for cell in &mut self.cells {
            cell.static_objects.clear();
            cell.dynamic_objects.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> UniformGrid {
        UniformGrid::new(Aabb::from_coords(0.0, 0.0, 100.0, 50.0), 10.0)
    }

    #[test]
    fn test_dimensions() {
        let grid = grid();
        assert_eq!(grid.dimensions(), (10, 5));
        assert_eq!(grid.cell_count(), 50);
        assert_eq!(grid.cell(0).unwrap().bounds, Aabb::from_coords(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_neighbors() {
        let grid = grid();
        // Corner, edge and interior cells
        assert_eq!(grid.neighbors(0).len(), 3);
        assert_eq!(grid.neighbors(5).len(), 5);
        let interior = grid.index_of(CellCoord { x: 4, y: 2 }).unwrap();
        let neighbors = grid.neighbors(interior);
        assert_eq!(neighbors.len(), 8);
        assert!(neighbors.contains(&grid.index_of(CellCoord { x: 3, y: 1 }).unwrap()));
        assert!(neighbors.contains(&grid.index_of(CellCoord { x: 5, y: 3 }).unwrap()));
        assert!(!neighbors.contains(&interior));
        assert!(grid.neighbors(999).is_empty());
    }

    #[test]
    fn test_cell_at() {
        let grid = grid();
        assert_eq!(grid.cell_at(Vec2::new(15.0, 5.0)), Some(1));
        assert_eq!(grid.cell_at(Vec2::new(100.0, 50.0)), Some(49));
        assert_eq!(grid.cell_at(Vec2::new(-1.0, 5.0)), None);
    }

    #[test]
    fn test_insert_registers_every_overlapped_cell() {
        let mut grid = grid();
        let bounds = Aabb::from_coords(5.0, 5.0, 25.0, 15.0);
        assert_eq!(grid.insert(ObjectId(1), &bounds, true), 6);
        assert!(grid.cell(0).unwrap().static_objects().contains(&ObjectId(1)));
        assert!(grid.cell(12).unwrap().contains(ObjectId(1)));
        assert!(grid.cell(13).unwrap().is_empty());

        grid.insert(ObjectId(2), &bounds, false);
        assert_eq!(grid.cell(0).unwrap().dynamic_objects(), &[ObjectId(2)]);

        grid.remove(ObjectId(1), &bounds, true);
        assert!(grid.cells.iter().all(|c| !c.contains(ObjectId(1))));
        assert_eq!(grid.query(&bounds), vec![ObjectId(2)]);
    }

    #[test]
    fn test_outside_objects_are_not_registered() {
        let mut grid = grid();
        let outside = Aabb::from_coords(200.0, 200.0, 210.0, 210.0);
        assert_eq!(grid.insert(ObjectId(7), &outside, true), 0);
        assert!(grid.query(&outside).is_empty());

        // Partially outside objects land in the edge cells
        let partial = Aabb::from_coords(95.0, 45.0, 120.0, 70.0);
        assert_eq!(grid.insert(ObjectId(8), &partial, true), 1);
        assert_eq!(grid.query(&partial), vec![ObjectId(8)]);
    }

    #[test]
    fn test_query_dedups() {
        let mut grid = grid();
        grid.insert(ObjectId(3), &Aabb::from_coords(0.0, 0.0, 50.0, 50.0), false);
        assert_eq!(grid.query(&Aabb::from_coords(0.0, 0.0, 100.0, 50.0)), vec![ObjectId(3)]);
        grid.clear();
        assert!(grid.query(grid.bounds()).is_empty());
    }
}
