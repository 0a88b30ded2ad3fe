//! Region geometry and the grid-cell inclusion test.
//!
//! Geometry is held in lon/lat degrees with longitudes in −180..180. Grid
//! longitudes are normalized to that convention before testing.
//!
//! Two inclusion strategies are provided:
//!   - [`DiscSupersampling`]: a cell is kept if any of `samples` points on a
//!     circle of `radius_deg` around its node is inside the region. This keeps
//!     cells within about one cell radius of the region.
//!   - [`CellCenter`]: a cell is kept if its node itself is inside.

use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::path::Path;

use crate::error::{GwsError, GwsResult};
use crate::grid::{GeoGrid, LonConvention};

// ── Geometry ─────────────────────────────────────────────────────────────────

/// A closed ring of (lon, lat) vertices. The closing vertex may be repeated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ring(pub Vec<[f64; 2]>);

impl Ring {
    /// Even–odd ray crossing test (ray towards +lon).
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        let pts = &self.0;
        let n = pts.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = pts[i];
            let [xj, yj] = pts[j];
            if (yi > lat) != (yj > lat) {
                let x_cross = xi + (lat - yi) * (xj - xi) / (yj - yi);
                if lon < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// Axis-aligned bounds `(min_lon, min_lat, max_lon, max_lat)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bounds {
    pub fn expanded(self, margin: f64) -> Bounds {
        Bounds {
            min_lon: self.min_lon - margin,
            min_lat: self.min_lat - margin,
            max_lon: self.max_lon + margin,
            max_lat: self.max_lat + margin,
        }
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.min_lon <= lon && lon <= self.max_lon && self.min_lat <= lat && lat <= self.max_lat
    }
}

/// Outer boundary plus interior exclusion rings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonWithHoles {
    pub exterior: Ring,
    #[serde(default)]
    pub holes: Vec<Ring>,
}

impl PolygonWithHoles {
    pub fn new(exterior: Ring, holes: Vec<Ring>) -> GwsResult<Self> {
        if exterior.0.len() < 3 {
            return Err(GwsError::invalid("polygon exterior needs at least 3 vertices"));
        }
        let norm = |r: Ring| {
            Ring(r.0.into_iter().map(|[x, y]| [LonConvention::Signed.normalize(x), y]).collect())
        };
        Ok(Self {
            exterior: norm(exterior),
            holes: holes.into_iter().map(norm).collect(),
        })
    }

    /// Inside the exterior and outside every hole.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        self.exterior.contains(lon, lat) && !self.holes.iter().any(|h| h.contains(lon, lat))
    }

    pub fn bounds(&self) -> Bounds {
        self.exterior.0.iter().fold(
            Bounds {
                min_lon: f64::INFINITY,
                min_lat: f64::INFINITY,
                max_lon: f64::NEG_INFINITY,
                max_lat: f64::NEG_INFINITY,
            },
            |b, &[x, y]| Bounds {
                min_lon: b.min_lon.min(x),
                min_lat: b.min_lat.min(y),
                max_lon: b.max_lon.max(x),
                max_lat: b.max_lat.max(y),
            },
        )
    }

    /// Scale the exterior about its vertex centroid by `factor` (holes shrink
    /// by the same factor about their own centroids).
    pub fn inflate(&self, factor: f64) -> PolygonWithHoles {
        fn scale(r: &Ring, k: f64) -> Ring {
            let n = r.0.len() as f64;
            let cx = r.0.iter().map(|p| p[0]).sum::<f64>() / n;
            let cy = r.0.iter().map(|p| p[1]).sum::<f64>() / n;
            Ring(r.0.iter().map(|&[x, y]| [cx + (x - cx) * k, cy + (y - cy) * k]).collect())
        }
        PolygonWithHoles {
            exterior: scale(&self.exterior, factor),
            holes: self.holes.iter().map(|h| scale(h, 1.0 / factor)).collect(),
        }
    }

    /// Read a GeoJSON `Polygon` geometry, or a `Feature` wrapping one. The first
    /// ring is the exterior, the rest are holes.
    pub fn from_geojson_str(s: &str) -> GwsResult<Self> {
        let doc: GeoJson = serde_json::from_str(s)?;
        let geom = match doc {
            GeoJson::Feature { geometry } => geometry,
            GeoJson::Polygon { coordinates } => Geometry::Polygon { coordinates },
        };
        let Geometry::Polygon { coordinates } = geom;
        let mut rings = coordinates.into_iter().map(Ring);
        let exterior = rings
            .next()
            .ok_or_else(|| GwsError::invalid("polygon has no rings"))?;
        PolygonWithHoles::new(exterior, rings.collect())
    }

    pub fn load(path: &Path) -> GwsResult<Self> {
        Self::from_geojson_str(&std::fs::read_to_string(path)?)
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum GeoJson {
    Feature { geometry: Geometry },
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Geometry {
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
}

// ── Inclusion strategies ─────────────────────────────────────────────────────

/// Decides whether the grid node at (lon, lat) belongs to the region.
pub trait InclusionStrategy {
    /// Margin (degrees) added around the polygon bounds before testing.
    fn candidate_margin(&self) -> f64;

    fn includes(&self, polygon: &PolygonWithHoles, lon: f64, lat: f64) -> bool;
}

/// Disc supersampling around each node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscSupersampling {
    pub margin_deg: f64,
    pub radius_deg: f64,
    pub samples: usize,
}

impl Default for DiscSupersampling {
    fn default() -> Self {
        Self { margin_deg: 1.0, radius_deg: 0.8, samples: 32 }
    }
}

impl DiscSupersampling {
    /// Sample offsets on the circle. Angles span 0..=2π inclusive, so the first
    /// and last samples coincide.
    pub fn offsets(&self) -> Vec<(f64, f64)> {
        let n = self.samples;
        (0..n)
            .map(|k| {
                let theta = if n > 1 { TAU * k as f64 / (n - 1) as f64 } else { 0.0 };
                (self.radius_deg * theta.cos(), self.radius_deg * theta.sin())
            })
            .collect()
    }
}

impl InclusionStrategy for DiscSupersampling {
    fn candidate_margin(&self) -> f64 {
        self.margin_deg
    }

    fn includes(&self, polygon: &PolygonWithHoles, lon: f64, lat: f64) -> bool {
        self.offsets()
            .into_iter()
            .any(|(dx, dy)| polygon.contains(lon + dx, lat + dy))
    }
}

/// Single-point test at the node.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CellCenter;

impl InclusionStrategy for CellCenter {
    fn candidate_margin(&self) -> f64 {
        0.0
    }

    fn includes(&self, polygon: &PolygonWithHoles, lon: f64, lat: f64) -> bool {
        polygon.contains(lon, lat)
    }
}

// ── Inclusion mask ───────────────────────────────────────────────────────────

/// Lat × lon flags, row-major; `true` = cell belongs to the region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InclusionMask {
    pub cells: Vec<bool>,
    pub n_lat: usize,
    pub n_lon: usize,
}

impl InclusionMask {
    pub fn is_included(&self, lat: usize, lon: usize) -> bool {
        self.cells[lat * self.n_lon + lon]
    }

    pub fn count(&self) -> usize {
        self.cells.iter().filter(|c| **c).count()
    }

    /// Invalidity mask for the excluded cells (`true` outside the region).
    pub fn exclusion(&self) -> Vec<bool> {
        self.cells.iter().map(|c| !c).collect()
    }
}

/// Flag every grid cell the strategy places inside `polygon`.
pub fn inclusion_mask(
    grid: &GeoGrid,
    polygon: &PolygonWithHoles,
    strategy: &impl InclusionStrategy,
) -> InclusionMask {
    let bbox = polygon.bounds().expanded(strategy.candidate_margin());
    let lons: Vec<f64> = grid
        .lons()
        .iter()
        .map(|&l| LonConvention::Signed.normalize(l))
        .collect();
    let mut cells = vec![false; grid.n_lat() * grid.n_lon()];
    for (i, &lat) in grid.lats().iter().enumerate() {
        for (j, &lon) in lons.iter().enumerate() {
            if bbox.contains(lon, lat) && strategy.includes(polygon, lon, lat) {
                cells[i * grid.n_lon() + j] = true;
            }
        }
    }
    InclusionMask { cells, n_lat: grid.n_lat(), n_lon: grid.n_lon() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> Ring {
        Ring(vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]])
    }

    fn grid() -> GeoGrid {
        let lats = (0..40).map(|i| -50.5 + i as f64).collect();
        let lons = (0..40).map(|i| 280.5 + i as f64).collect();
        GeoGrid::new(lats, lons).unwrap()
    }

    fn region() -> PolygonWithHoles {
        PolygonWithHoles::new(
            square(-70.0, -40.0, -55.0, -25.0),
            vec![square(-64.0, -34.0, -60.0, -30.0)],
        )
        .unwrap()
    }

    #[test]
    fn holes_are_excluded() {
        let p = region();
        assert!(p.contains(-68.0, -38.0));
        assert!(!p.contains(-62.0, -32.0));
        assert!(!p.contains(-80.0, -32.0));
    }

    #[test]
    fn exterior_longitudes_are_normalized() {
        let p = PolygonWithHoles::new(square(290.0, -40.0, 305.0, -25.0), vec![]).unwrap();
        assert!(p.contains(-68.0, -38.0));
        assert_eq!(p.bounds().min_lon, -70.0);
    }

    #[test]
    fn disc_offsets_close_the_circle() {
        let off = DiscSupersampling::default().offsets();
        assert_eq!(off.len(), 32);
        approx::assert_abs_diff_eq!(off[0].0, off[31].0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(off[0].1, off[31].1, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(off[8].0.hypot(off[8].1), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn cell_center_matches_point_test() {
        let g = grid();
        let p = region();
        let m = inclusion_mask(&g, &p, &CellCenter);
        for (i, &lat) in g.lats().iter().enumerate() {
            for (j, &lon) in g.lons().iter().enumerate() {
                assert_eq!(m.is_included(i, j), p.contains(lon - 360.0, lat));
            }
        }
    }

    #[test]
    fn disc_mask_covers_center_mask() {
        let g = grid();
        let p = region();
        let exact = inclusion_mask(&g, &p, &CellCenter);
        let disc = inclusion_mask(&g, &p, &DiscSupersampling::default());
        assert!(disc.count() > exact.count());
        for k in 0..exact.cells.len() {
            assert!(!exact.cells[k] || disc.cells[k]);
        }
        // Cells just outside the exterior edge are picked up by the disc.
        let i = g.nearest_lat_index(-32.5);
        let j = g.nearest_lon_index(-70.5);
        assert!(disc.is_included(i, j));
        assert!(!exact.is_included(i, j));
    }

    #[test]
    fn far_cells_are_rejected_by_bounding_box() {
        let g = grid();
        let m = inclusion_mask(&g, &region(), &DiscSupersampling::default());
        let i = g.nearest_lat_index(-12.5);
        assert!((0..g.n_lon()).all(|j| !m.is_included(i, j)));
    }

    #[test]
    fn mask_is_deterministic_and_monotonic_under_inflation() {
        let g = grid();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..8 {
            let cx = rng.gen_range(-70.0..-50.0);
            let cy = rng.gen_range(-40.0..-20.0);
            let n = rng.gen_range(3..9);
            let r = rng.gen_range(2.0..6.0);
            // Vertices on a circle in angular order: a convex ring, so scaling
            // about the vertex centroid only grows it.
            let ring: Vec<[f64; 2]> = (0..n)
                .map(|k| {
                    let th = TAU * (k as f64 + rng.gen_range(0.0..0.5)) / n as f64;
                    [cx + r * th.cos(), cy + r * th.sin()]
                })
                .collect();
            let p = PolygonWithHoles::new(Ring(ring), vec![]).unwrap();
            let s = DiscSupersampling::default();
            let a = inclusion_mask(&g, &p, &s);
            let b = inclusion_mask(&g, &p, &s);
            assert_eq!(a, b);
            let big = inclusion_mask(&g, &p.inflate(1.5), &s);
            for k in 0..a.cells.len() {
                assert!(!a.cells[k] || big.cells[k], "inflation removed cell {k}");
            }
        }
    }

    #[test]
    fn reads_geojson_feature() {
        let s = r#"{"type":"Feature","properties":{},"geometry":{"type":"Polygon",
            "coordinates":[[[-70,-40],[-55,-40],[-55,-25],[-70,-25],[-70,-40]],
                           [[-64,-34],[-60,-34],[-60,-30],[-64,-30],[-64,-34]]]}}"#;
        let p = PolygonWithHoles::from_geojson_str(s).unwrap();
        assert_eq!(p.holes.len(), 1);
        assert!(!p.contains(-62.0, -32.0));
    }
}
