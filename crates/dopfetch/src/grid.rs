//! Covering grid of fixed-size square tiles.
//!
//! Tile corners always sit on the lattice of integer multiples of the grid
//! spacing, so two independent calls for neighbouring areas produce tiles
//! that abut without overlapping. With the usual spacings (multiples of
//! 1000 m) every corner is a round-thousand coordinate.

use crate::geometry::BoundingBox;
use crate::{DopError, Result};
use geo::{Area, EuclideanDistance, Intersects, MultiPolygon, Polygon, Relate};

/// One square of the covering grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridTile {
    /// Extent of the tile in the service CRS.
    pub bbox: BoundingBox,
}

impl GridTile {
    fn square(x: f64, y: f64, spacing: f64) -> Self {
        Self {
            bbox: BoundingBox::new(x, y, x + spacing, y + spacing),
        }
    }

    /// The tile as a polygon.
    pub fn polygon(&self) -> Polygon<f64> {
        self.bbox.to_polygon()
    }
}

/// Whether `tile` shares interior area with `area` grown by `buffer`.
///
/// For a zero buffer this is "intersects but does not merely touch". For a
/// positive buffer the grown area reaches into the tile exactly when the
/// tile lies closer than `buffer` to the area.
fn overlaps(area: &MultiPolygon<f64>, tile: &Polygon<f64>, buffer: f64) -> bool {
    if buffer > 0.0 {
        area.0
            .iter()
            .any(|part| part.euclidean_distance(tile) < buffer)
    } else {
        let matrix = area.relate(tile);
        matrix.is_intersects() && !matrix.is_touches()
    }
}

/// Lattice coordinates covering `[min, max]`, padded by one step each side.
fn lattice(min: f64, max: f64, spacing: f64) -> Vec<f64> {
    let start = (min.floor() / spacing).floor() * spacing;
    let end = max.ceil();
    let steps = (((end - start) / spacing).ceil() as i64).max(1);

    let mut coords = Vec::with_capacity(steps as usize + 2);
    coords.push(start - spacing);
    for i in 0..steps {
        coords.push(start + i as f64 * spacing);
    }
    coords.push(start + steps as f64 * spacing);
    coords
}

/// Compute the squares of side `grid_spacing` covering `area` grown by `buffer`.
///
/// Tiles come out x-major (outer loop west to east, inner loop south to
/// north); the order fixes the output numbering and is stable across calls.
/// A degenerate area (zero width or height) still yields at least one tile.
pub fn make_grid(area: &MultiPolygon<f64>, buffer: u32, grid_spacing: u32) -> Result<Vec<GridTile>> {
    if grid_spacing == 0 {
        return Err(DopError::InvalidGridSpacing {
            spacing: 0,
            resolution: 0.0,
        });
    }
    let bounds = BoundingBox::of(area)
        .ok_or_else(|| DopError::invalid_geometry("area_polygon", "geometry is empty"))?;

    let spacing = grid_spacing as f64;
    let buffer = buffer as f64;
    let buffered = bounds.expand(buffer);

    let xs = lattice(buffered.min_x, buffered.max_x, spacing);
    let ys = lattice(buffered.min_y, buffered.max_y, spacing);

    // relate() is only meaningful for areas with a real interior
    let degenerate = buffer == 0.0 && area.unsigned_area() == 0.0;

    let mut tiles = Vec::new();
    if !degenerate {
        for &x in &xs {
            for &y in &ys {
                let tile = GridTile::square(x, y, spacing);
                if overlaps(area, &tile.polygon(), buffer) {
                    tiles.push(tile);
                }
            }
        }
    }

    if tiles.is_empty() {
        // Zero-area input (a sliver, line or point-like polygon): take the
        // first square touching the closed geometry.
        for &x in &xs {
            for &y in &ys {
                let tile = GridTile::square(x, y, spacing);
                if area.intersects(&tile.polygon()) {
                    tiles.push(tile);
                    break;
                }
            }
            if !tiles.is_empty() {
                break;
            }
        }
    }

    if tiles.is_empty() {
        let x = (bounds.min_x / spacing).floor() * spacing;
        let y = (bounds.min_y / spacing).floor() * spacing;
        tiles.push(GridTile::square(x, y, spacing));
    }

    Ok(tiles)
}

/// Keep only tiles that share area with `mask`, preserving order.
///
/// Returns the retained tiles and the number of tiles removed.
pub fn filter_by_mask(tiles: Vec<GridTile>, mask: &MultiPolygon<f64>) -> (Vec<GridTile>, usize) {
    let before = tiles.len();
    let kept: Vec<GridTile> = tiles
        .into_iter()
        .filter(|tile| overlaps(mask, &tile.polygon(), 0.0))
        .collect();
    let removed = before - kept.len();
    (kept, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, BooleanOps};

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![BoundingBox::new(x0, y0, x1, y1).to_polygon()])
    }

    fn union_area(tiles: &[GridTile]) -> MultiPolygon<f64> {
        tiles.iter().fold(MultiPolygon::new(Vec::new()), |acc, t| {
            acc.union(&MultiPolygon::new(vec![t.polygon()]))
        })
    }

    #[test]
    fn test_ten_km_square_gives_25_tiles() {
        let area = square(500_000.0, 5_400_000.0, 510_000.0, 5_410_000.0);
        let tiles = make_grid(&area, 0, 2000).unwrap();
        assert_eq!(tiles.len(), 25);

        for tile in &tiles {
            assert_eq!(tile.bbox.width(), 2000.0);
            assert_eq!(tile.bbox.height(), 2000.0);
            assert_eq!(tile.bbox.min_x % 1000.0, 0.0);
            assert_eq!(tile.bbox.min_y % 1000.0, 0.0);
        }

        // x-major order: the first five tiles share the western column
        assert!(tiles[..5].iter().all(|t| t.bbox.min_x == 500_000.0));
        let ys: Vec<f64> = tiles[..5].iter().map(|t| t.bbox.min_y).collect();
        assert_eq!(
            ys,
            vec![5_400_000.0, 5_402_000.0, 5_404_000.0, 5_406_000.0, 5_408_000.0]
        );
        assert_eq!(tiles[24].bbox.min_x, 508_000.0);

        // no overlaps: total area equals union area
        let union = union_area(&tiles);
        assert!((union.unsigned_area() - 25.0 * 4_000_000.0).abs() < 1e-3);
    }

    #[test]
    fn test_grid_covers_irregular_polygon() {
        let area = MultiPolygon::new(vec![polygon![
            (x: 412_345.6, y: 5_501_234.5),
            (x: 415_900.2, y: 5_500_100.0),
            (x: 418_777.7, y: 5_504_999.9),
            (x: 413_000.0, y: 5_506_543.2),
        ]]);
        let tiles = make_grid(&area, 0, 1000).unwrap();
        let covered = union_area(&tiles);
        let uncovered = area.difference(&covered);
        assert!(uncovered.unsigned_area() < 1e-6);

        // every tile actually overlaps the area
        for tile in &tiles {
            let shared = area.intersection(&MultiPolygon::new(vec![tile.polygon()]));
            assert!(shared.unsigned_area() > 0.0);
        }
    }

    #[test]
    fn test_buffer_extends_coverage() {
        let area = square(500_100.0, 5_400_100.0, 500_900.0, 5_400_900.0);
        let plain = make_grid(&area, 0, 1000).unwrap();
        assert_eq!(plain.len(), 1);

        // 150 m reaches past the 1000 m lines on all sides
        let buffered = make_grid(&area, 150, 1000).unwrap();
        assert_eq!(buffered.len(), 9);

        // 50 m does not
        let small = make_grid(&area, 50, 1000).unwrap();
        assert_eq!(small.len(), 1);
    }

    #[test]
    fn test_grid_is_deterministic() {
        let area = MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0), (x: 7_300.0, y: 1_200.0), (x: 2_000.0, y: 6_100.0)
        ]]);
        let first = make_grid(&area, 25, 1000).unwrap();
        let second = make_grid(&area, 25, 1000).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_neighbouring_areas_abut() {
        let west = square(0.0, 0.0, 3_500.0, 2_000.0);
        let east = square(3_500.0, 0.0, 7_000.0, 2_000.0);
        let a = make_grid(&west, 0, 1000).unwrap();
        let b = make_grid(&east, 0, 1000).unwrap();
        // the column at 3000 is shared, everything else is disjoint and aligned
        for t in a.iter().chain(b.iter()) {
            assert_eq!(t.bbox.min_x % 1000.0, 0.0);
        }
        let shared = a.iter().filter(|t| b.contains(t)).count();
        assert_eq!(shared, 2);
    }

    #[test]
    fn test_degenerate_area_yields_a_tile() {
        let sliver = MultiPolygon::new(vec![polygon![
            (x: 1_500.0, y: 1_500.0), (x: 1_500.0, y: 1_500.0), (x: 1_500.0, y: 1_500.0)
        ]]);
        let tiles = make_grid(&sliver, 0, 1000).unwrap();
        assert!(!tiles.is_empty());
    }

    #[test]
    fn test_zero_spacing_rejected() {
        let area = square(0.0, 0.0, 10.0, 10.0);
        assert!(make_grid(&area, 0, 0).is_err());
    }

    #[test]
    fn test_mask_filter() {
        let area = square(0.0, 0.0, 3_000.0, 3_000.0);
        let tiles = make_grid(&area, 0, 1000).unwrap();
        assert_eq!(tiles.len(), 9);

        // the middle column
        let mask = square(1_200.0, 100.0, 1_800.0, 2_900.0);
        let (kept, removed) = filter_by_mask(tiles, &mask);
        assert_eq!(kept.len(), 3);
        assert_eq!(removed, 6);
        assert!(kept.iter().all(|t| t.bbox.min_x == 1_000.0));
    }

    #[test]
    fn test_mask_touching_edge_only_is_dropped() {
        let tiles = make_grid(&square(0.0, 0.0, 2_000.0, 1_000.0), 0, 1000).unwrap();
        assert_eq!(tiles.len(), 2);

        // shares only the x = 1000 edge with the western tile
        let mask = square(1_000.0, 0.0, 1_500.0, 1_000.0);
        let (kept, removed) = filter_by_mask(tiles, &mask);
        assert_eq!(removed, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].bbox.min_x, 1_000.0);
    }
}
