use crate::types::{ElevationRaster, GeoTransform, MaskInterval};
use ndarray::Array2;
use std::collections::HashMap;

/// One traced mask region in world coordinates
///
/// `shell` is the outer boundary; `holes` are interior rings fully contained
/// in it. Rings are closed (first vertex repeated last).
#[derive(Debug, Clone)]
pub struct MaskPolygon {
    pub shell: Vec<(f64, f64)>,
    pub holes: Vec<Vec<(f64, f64)>>,
}

/// Threshold a derived raster into a binary mask (1 in, 0 out)
///
/// Nodata cells are always out. An inverted interval excludes every cell by
/// the documented "always out" policy, yielding an empty mask rather than an
/// error.
pub fn apply_mask(raster: &ElevationRaster, interval: MaskInterval) -> Array2<u8> {
    let mut mask = Array2::<u8>::zeros(raster.data.dim());
    let mut inside = 0usize;
    for (out, &v) in mask.iter_mut().zip(raster.data.iter()) {
        if v != raster.nodata && v.is_finite() && interval.contains(v) {
            *out = 1;
            inside += 1;
        }
    }
    log::info!(
        "mask [{:?}, {:?}]: {} of {} cells in",
        interval.min,
        interval.max,
        inside,
        mask.len()
    );
    mask
}

/// Trace the polygon boundaries of contiguous mask regions
///
/// Regions are 4-connected components of "in" cells. Boundary edges run
/// along cell borders with the interior kept on the left, so shells and
/// holes fall out of the same edge-following walk; rings belonging to one
/// component become one polygon feature. An empty mask yields an empty
/// feature list.
pub fn trace_polygons(mask: &Array2<u8>, transform: &GeoTransform) -> Vec<MaskPolygon> {
    let labels = label_components(mask);
    let component_count = labels.iter().copied().max().unwrap_or(0) as usize;

    let mut polygons = Vec::with_capacity(component_count);
    for component in 1..=component_count as u32 {
        let rings = trace_component_rings(mask, &labels, component);
        if rings.is_empty() {
            continue;
        }

        // With the interior kept on the left while walking (y growing down),
        // shells come out with negative shoelace area and holes positive.
        let mut shells: Vec<(Vec<(usize, usize)>, Vec<Vec<(usize, usize)>>)> = Vec::new();
        let mut holes: Vec<Vec<(usize, usize)>> = Vec::new();
        for ring in rings {
            if ring_area(&ring) < 0.0 {
                shells.push((ring, Vec::new()));
            } else {
                holes.push(ring);
            }
        }

        // A component almost always has exactly one shell; a boundary that
        // pinches at a grid vertex can split it, in which case each hole
        // goes to the shell whose extent contains it.
        for hole in holes {
            let idx = if shells.len() == 1 {
                0
            } else {
                shells
                    .iter()
                    .position(|(shell, _)| bbox_contains(shell, &hole))
                    .unwrap_or(0)
            };
            shells[idx].1.push(hole);
        }

        for (shell, shell_holes) in shells {
            polygons.push(MaskPolygon {
                shell: to_world(shell, transform),
                holes: shell_holes
                    .into_iter()
                    .map(|h| to_world(h, transform))
                    .collect(),
            });
        }
    }

    log::info!("vectorized {} region(s)", polygons.len());
    polygons
}

/// 4-connected component labels, 0 for "out" cells
fn label_components(mask: &Array2<u8>) -> Array2<u32> {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut next_label = 0u32;
    let mut queue = Vec::new();

    for row in 0..rows {
        for col in 0..cols {
            if mask[[row, col]] == 0 || labels[[row, col]] != 0 {
                continue;
            }
            next_label += 1;
            labels[[row, col]] = next_label;
            queue.push((row, col));

            while let Some((r, c)) = queue.pop() {
                let mut visit = |nr: usize, nc: usize, labels: &mut Array2<u32>| {
                    if mask[[nr, nc]] == 1 && labels[[nr, nc]] == 0 {
                        labels[[nr, nc]] = next_label;
                        queue.push((nr, nc));
                    }
                };
                if r > 0 {
                    visit(r - 1, c, &mut labels);
                }
                if r + 1 < rows {
                    visit(r + 1, c, &mut labels);
                }
                if c > 0 {
                    visit(r, c - 1, &mut labels);
                }
                if c + 1 < cols {
                    visit(r, c + 1, &mut labels);
                }
            }
        }
    }
    labels
}

/// Directed boundary edge between grid vertices, interior on the left
#[derive(Debug, Clone, Copy)]
struct Edge {
    from: (usize, usize), // (col, row) grid vertex
    to: (usize, usize),
}

/// Closed rings bounding one labeled component, in grid-vertex coordinates
fn trace_component_rings(
    mask: &Array2<u8>,
    labels: &Array2<u32>,
    component: u32,
) -> Vec<Vec<(usize, usize)>> {
    let (rows, cols) = mask.dim();

    // Collect directed edges. With y growing downward, keeping the interior
    // on the left means: bottom edge runs east, right edge runs north, top
    // edge runs west, left edge runs south.
    let mut edges = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if labels[[row, col]] != component {
                continue;
            }
            let outside =
                |r: i64, c: i64| r < 0 || c < 0 || r >= rows as i64 || c >= cols as i64
                    || mask[[r as usize, c as usize]] == 0;

            let (r, c) = (row as i64, col as i64);
            if outside(r - 1, c) {
                edges.push(Edge { from: (col + 1, row), to: (col, row) });
            }
            if outside(r + 1, c) {
                edges.push(Edge { from: (col, row + 1), to: (col + 1, row + 1) });
            }
            if outside(r, c - 1) {
                edges.push(Edge { from: (col, row), to: (col, row + 1) });
            }
            if outside(r, c + 1) {
                edges.push(Edge { from: (col + 1, row + 1), to: (col + 1, row) });
            }
        }
    }

    let mut by_start: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
    for (idx, edge) in edges.iter().enumerate() {
        by_start.entry(edge.from).or_default().push(idx);
    }

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for start_idx in 0..edges.len() {
        if used[start_idx] {
            continue;
        }

        let mut ring = vec![edges[start_idx].from];
        let mut current = start_idx;
        used[current] = true;

        loop {
            let head = edges[current].to;
            ring.push(head);
            if head == edges[start_idx].from {
                break;
            }

            let candidates = by_start.get(&head).expect("boundary edges form closed loops");
            // Where the walk could continue two ways (regions touching at a
            // corner), prefer the sharpest left turn to keep this ring tight
            // around its own region.
            let incoming = direction(&edges[current]);
            let next = candidates
                .iter()
                .copied()
                .filter(|&idx| !used[idx])
                .min_by_key(|&idx| turn_cost(incoming, direction(&edges[idx])))
                .expect("boundary edges form closed loops");

            used[next] = true;
            current = next;
        }

        rings.push(compress_collinear(ring));
    }

    rings
}

fn direction(edge: &Edge) -> (i64, i64) {
    (
        edge.to.0 as i64 - edge.from.0 as i64,
        edge.to.1 as i64 - edge.from.1 as i64,
    )
}

/// Rank continuations: left turn, straight, right turn (reversal never occurs)
fn turn_cost(incoming: (i64, i64), outgoing: (i64, i64)) -> i64 {
    // Cross product sign in screen coordinates: positive = right turn
    let cross = incoming.0 * outgoing.1 - incoming.1 * outgoing.0;
    match cross.signum() {
        -1 => 0, // left
        0 => 1,  // straight
        _ => 2,  // right
    }
}

/// Drop intermediate vertices on straight runs, keeping the ring closed
fn compress_collinear(ring: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    if ring.len() < 4 {
        return ring;
    }
    // Last vertex repeats the first; work on the open ring
    let open = &ring[..ring.len() - 1];
    let n = open.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let prev = open[(i + n - 1) % n];
        let here = open[i];
        let next = open[(i + 1) % n];
        let d1 = (here.0 as i64 - prev.0 as i64, here.1 as i64 - prev.1 as i64);
        let d2 = (next.0 as i64 - here.0 as i64, next.1 as i64 - here.1 as i64);
        if d1.0 * d2.1 - d1.1 * d2.0 != 0 {
            out.push(here);
        }
    }
    if let Some(&first) = out.first() {
        out.push(first);
    }
    out
}

/// Whether `inner`'s bounding box sits inside `outer`'s
fn bbox_contains(outer: &[(usize, usize)], inner: &[(usize, usize)]) -> bool {
    let extent = |ring: &[(usize, usize)]| {
        let xs = ring.iter().map(|v| v.0);
        let ys = ring.iter().map(|v| v.1);
        (
            xs.clone().min().unwrap_or(0),
            ys.clone().min().unwrap_or(0),
            xs.max().unwrap_or(0),
            ys.max().unwrap_or(0),
        )
    };
    let (ox0, oy0, ox1, oy1) = extent(outer);
    let (ix0, iy0, ix1, iy1) = extent(inner);
    ox0 <= ix0 && oy0 <= iy0 && ox1 >= ix1 && oy1 >= iy1
}

/// Shoelace area in grid coordinates (sign depends on orientation)
fn ring_area(ring: &[(usize, usize)]) -> f64 {
    let mut doubled = 0i64;
    for pair in ring.windows(2) {
        let (x0, y0) = (pair[0].0 as i64, pair[0].1 as i64);
        let (x1, y1) = (pair[1].0 as i64, pair[1].1 as i64);
        doubled += x0 * y1 - x1 * y0;
    }
    doubled as f64 / 2.0
}

fn to_world(ring: Vec<(usize, usize)>, transform: &GeoTransform) -> Vec<(f64, f64)> {
    ring.into_iter()
        .map(|(col, row)| transform.vertex(col as f64, row as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MaskInterval, NODATA};

    fn raster_from(data: Array2<f32>) -> ElevationRaster {
        ElevationRaster {
            data,
            transform: GeoTransform::north_up(0.0, 0.0, 1.0, -1.0),
            epsg: 32632,
            nodata: NODATA,
        }
    }

    fn identity_transform() -> GeoTransform {
        GeoTransform::north_up(0.0, 0.0, 1.0, 1.0)
    }

    #[test]
    fn test_mask_classification() {
        let values = [0.0, 4.0, 5.001, 50.0, 100.0, 101.0];
        let data = Array2::from_shape_vec((1, 6), values.to_vec()).unwrap();
        let mask = apply_mask(
            &raster_from(data),
            MaskInterval::new(Some(5.001), Some(100.0)),
        );

        assert_eq!(
            mask.iter().copied().collect::<Vec<_>>(),
            vec![0, 0, 1, 1, 1, 0]
        );
    }

    #[test]
    fn test_mask_excludes_nodata() {
        let data = Array2::from_shape_vec((1, 3), vec![10.0, NODATA, 20.0]).unwrap();
        let mask = apply_mask(&raster_from(data), MaskInterval::new(None, None));
        assert_eq!(mask.iter().copied().collect::<Vec<_>>(), vec![1, 0, 1]);
    }

    #[test]
    fn test_degenerate_interval_yields_empty_output() {
        let data = Array2::from_elem((8, 8), 7.5);
        let mask = apply_mask(
            &raster_from(data),
            MaskInterval::new(Some(10.0), Some(5.0)),
        );
        assert!(mask.iter().all(|&v| v == 0));
        assert!(trace_polygons(&mask, &identity_transform()).is_empty());
    }

    #[test]
    fn test_single_cell_traces_unit_square() {
        let mut mask = Array2::<u8>::zeros((3, 3));
        mask[[1, 1]] = 1;

        let polygons = trace_polygons(&mask, &identity_transform());
        assert_eq!(polygons.len(), 1);
        assert!(polygons[0].holes.is_empty());

        // Closed unit square around cell (1, 1)
        let shell = &polygons[0].shell;
        assert_eq!(shell.first(), shell.last());
        assert_eq!(shell.len(), 5);
        for &(x, y) in shell {
            assert!((1.0..=2.0).contains(&x) && (1.0..=2.0).contains(&y));
        }
    }

    #[test]
    fn test_two_separate_regions() {
        let mut mask = Array2::<u8>::zeros((5, 5));
        mask[[0, 0]] = 1;
        mask[[4, 4]] = 1;

        let polygons = trace_polygons(&mask, &identity_transform());
        assert_eq!(polygons.len(), 2);
    }

    #[test]
    fn test_diagonal_cells_are_separate_regions() {
        // 4-connectivity: diagonal neighbors do not merge
        let mut mask = Array2::<u8>::zeros((3, 3));
        mask[[0, 0]] = 1;
        mask[[1, 1]] = 1;

        let polygons = trace_polygons(&mask, &identity_transform());
        assert_eq!(polygons.len(), 2);
        for polygon in &polygons {
            assert_eq!(polygon.shell.len(), 5);
        }
    }

    #[test]
    fn test_ring_region_has_hole() {
        // 3x3 block with the center cell out
        let mut mask = Array2::<u8>::ones((3, 3));
        mask[[1, 1]] = 0;

        let polygons = trace_polygons(&mask, &identity_transform());
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].holes.len(), 1);

        // Shell spans the full block, hole the center cell
        assert_eq!(polygons[0].shell.len(), 5);
        assert_eq!(polygons[0].holes[0].len(), 5);
    }

    #[test]
    fn test_rectangle_compresses_to_corners() {
        let mask = Array2::<u8>::ones((2, 4));
        let polygons = trace_polygons(&mask, &identity_transform());
        assert_eq!(polygons.len(), 1);
        // 4 corners plus the closing vertex
        assert_eq!(polygons[0].shell.len(), 5);
    }

    #[test]
    fn test_world_coordinates_follow_transform() {
        let mut mask = Array2::<u8>::zeros((2, 2));
        mask[[0, 0]] = 1;

        // 10 m cells anchored at (500000, 5200000), north-up
        let transform = GeoTransform::north_up(500_000.0, 5_200_000.0, 10.0, -10.0);
        let polygons = trace_polygons(&mask, &transform);
        let shell = &polygons[0].shell;

        for &(x, y) in shell {
            assert!((500_000.0..=500_010.0).contains(&x));
            assert!((5_199_990.0..=5_200_000.0).contains(&y));
        }
    }
}
