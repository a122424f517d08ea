//! Geodesic distances between municipality centroids.

use crate::error::MatrixError;
use crate::progress;
use crate::tabular::{cell, parse_records, read_text, Columns};
use csv::WriterBuilder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// WGS84 semi-major axis, metres.
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// Mean Earth radius for the spherical fallback, km.
const MEAN_RADIUS_KM: f64 = 6_371.008_8;

const MAX_ITERATIONS: usize = 200;
const CONVERGENCE: f64 = 1e-12;

/// Source rows computed per parallel batch before writing.
const ROWS_PER_BATCH: usize = 64;

/// A municipality centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct Centroid {
    pub geocode: u32,
    pub name: String,
    /// Degrees.
    pub lon: f64,
    /// Degrees.
    pub lat: f64,
}

/// One row of the distance matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistanceRow {
    #[serde(rename = "Source geocode")]
    pub source_geocode: u32,
    #[serde(rename = "Source name")]
    pub source_name: String,
    #[serde(rename = "Target geocode")]
    pub target_geocode: u32,
    #[serde(rename = "Target name")]
    pub target_name: String,
    #[serde(rename = "Distance(km)")]
    pub distance_km: f64,
}

/// Great-circle distance on the mean sphere, km.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * MEAN_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Vincenty's inverse formula on the WGS84 ellipsoid, km.
///
/// Returns `None` when the iteration does not converge (nearly antipodal
/// points).
pub fn vincenty_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Option<f64> {
    let b = (1.0 - WGS84_F) * WGS84_A;
    let l = (lon2 - lon1).to_radians();
    let u1 = ((1.0 - WGS84_F) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..MAX_ITERATIONS {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos2_alpha = 1.0 - sin_alpha * sin_alpha;
        // Equatorial line: cos2_alpha = 0.
        let cos_2sigma_m = if cos2_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos2_alpha
        } else {
            0.0
        };
        let c = WGS84_F / 16.0 * cos2_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos2_alpha));
        let previous = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));

        if (lambda - previous).abs() < CONVERGENCE {
            let u_sq = cos2_alpha * (WGS84_A * WGS84_A - b * b) / (b * b);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return Some(b * big_a * (sigma - delta_sigma) / 1000.0);
        }
    }
    None
}

/// Ellipsoidal distance, falling back to the sphere when Vincenty fails.
pub fn geodesic_km(a: &Centroid, b: &Centroid) -> f64 {
    match vincenty_km(a.lat, a.lon, b.lat, b.lon) {
        Some(d) => d,
        None => {
            warn!(
                "Vincenty did not converge for {} - {}; using great-circle distance",
                a.geocode, b.geocode
            );
            haversine_km(a.lat, a.lon, b.lat, b.lon)
        }
    }
}

/// Read centroids (`CD_GEOCODM`, `X` longitude, `Y` latitude, `NM_MUNICIP`),
/// sorted by geocode.
pub fn read_centroids(path: &Path) -> Result<Vec<Centroid>, MatrixError> {
    let text = read_text(path)?;
    let (header, rows) = parse_records(&text, 0)?;
    let cols = Columns::from_record(&header);
    let col = |name: &str| {
        cols.position(name).ok_or_else(|| MatrixError::MissingColumn {
            path: path.to_path_buf(),
            column: name.to_string(),
        })
    };
    let (c_geo, c_x, c_y, c_name) = (col("CDGEOCODM")?, col("X")?, col("Y")?, col("NMMUNICIP")?);

    let mut centroids = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let parse = |pos: usize, column: &str| -> Result<f64, MatrixError> {
            cell(row, pos)
                .parse::<f64>()
                .map_err(|_| MatrixError::InvalidValue {
                    path: path.to_path_buf(),
                    row: i + 2,
                    column: column.to_string(),
                    value: cell(row, pos).to_string(),
                })
        };
        let geocode = cell(row, c_geo)
            .parse::<u32>()
            .map_err(|_| MatrixError::InvalidValue {
                path: path.to_path_buf(),
                row: i + 2,
                column: "CD_GEOCODM".to_string(),
                value: cell(row, c_geo).to_string(),
            })?;
        centroids.push(Centroid {
            geocode,
            name: cell(row, c_name).to_string(),
            lon: parse(c_x, "X")?,
            lat: parse(c_y, "Y")?,
        });
    }

    centroids.sort_by_key(|c| c.geocode);
    centroids.dedup_by_key(|c| c.geocode);
    debug!("Read {} centroids from {}", centroids.len(), path.display());
    Ok(centroids)
}

/// Distance rows from centroid `i` to every later centroid.
fn rows_from(centroids: &[Centroid], i: usize) -> Vec<DistanceRow> {
    let src = &centroids[i];
    centroids[i + 1..]
        .iter()
        .map(|tgt| DistanceRow {
            source_geocode: src.geocode,
            source_name: src.name.clone(),
            target_geocode: tgt.geocode,
            target_name: tgt.name.clone(),
            distance_km: geodesic_km(src, tgt),
        })
        .collect()
}

/// Output path for a centroid file: `{stem}-distancias.csv` beside it.
pub fn output_path(centroids: &Path) -> PathBuf {
    let stem = centroids
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "centroids".to_string());
    centroids.with_file_name(format!("{}-distancias.csv", stem))
}

/// Write every unordered pair once. Returns the number of pairs.
pub fn write_distance_matrix(
    centroids: &[Centroid],
    out: &Path,
    show_progress: bool,
) -> Result<u64, MatrixError> {
    let n = centroids.len();
    info!("Computing distances for {} municipalities", n);

    // Header written explicitly so that an empty matrix still has one.
    let mut writer = WriterBuilder::new().has_headers(false).from_path(out)?;
    writer.write_record([
        "Source geocode",
        "Source name",
        "Target geocode",
        "Target name",
        "Distance(km)",
    ])?;

    let pb = progress::bar(n.saturating_sub(1) as u64, show_progress, "sources");
    let mut pairs = 0u64;
    let sources: Vec<usize> = (0..n.saturating_sub(1)).collect();

    for batch in sources.chunks(ROWS_PER_BATCH) {
        let computed: Vec<Vec<DistanceRow>> =
            batch.par_iter().map(|&i| rows_from(centroids, i)).collect();
        for rows in computed {
            for row in &rows {
                writer.serialize(row)?;
            }
            pairs += rows.len() as u64;
            pb.inc(1);
        }
    }
    pb.finish_and_clear();
    writer.flush()?;

    info!("Wrote {} pairs to {}", pairs, out.display());
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tabular::read_rows;
    use tempfile::TempDir;

    fn create_test_centroid(geocode: u32, lat: f64, lon: f64) -> Centroid {
        Centroid {
            geocode,
            name: format!("M{}", geocode),
            lon,
            lat,
        }
    }

    fn dms(deg: f64, min: f64, sec: f64) -> f64 {
        deg.signum() * (deg.abs() + min / 60.0 + sec / 3600.0)
    }

    #[test]
    fn test_vincenty_reference_distance() {
        // Flinders Peak to Buninyong, the classic Vincenty example.
        let lat1 = dms(-37.0, 57.0, 3.72030);
        let lon1 = dms(144.0, 25.0, 29.52440);
        let lat2 = dms(-37.0, 39.0, 10.15610);
        let lon2 = dms(143.0, 55.0, 35.38390);
        let d = vincenty_km(lat1, lon1, lat2, lon2).unwrap();
        assert!((d - 54.972271).abs() < 1e-5, "got {}", d);
    }

    #[test]
    fn test_geodesic_is_symmetric_and_zero_on_same_point() {
        let rio = create_test_centroid(3304557, -22.9068, -43.1729);
        let sp = create_test_centroid(3550308, -23.5505, -46.6333);
        let ab = geodesic_km(&rio, &sp);
        let ba = geodesic_km(&sp, &rio);
        assert!((ab - ba).abs() < 1e-9);
        assert_eq!(geodesic_km(&rio, &rio), 0.0);
        // WGS84 geodesic between these two points is 361.26 km.
        assert!((ab - 361.26).abs() < 0.05, "got {}", ab);
    }

    #[test]
    fn test_haversine_close_to_ellipsoid() {
        let h = haversine_km(-22.9068, -43.1729, -23.5505, -46.6333);
        let v = vincenty_km(-22.9068, -43.1729, -23.5505, -46.6333).unwrap();
        assert!((h - v).abs() / v < 0.005);
    }

    #[test]
    fn test_read_centroids_sorted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("centroids.csv");
        std::fs::write(
            &path,
            "CD_GEOCODM,NM_MUNICIP,X,Y\n3550308,São Paulo,-46.6333,-23.5505\n3304557,Rio de Janeiro,-43.1729,-22.9068\n",
        )
        .unwrap();
        let centroids = read_centroids(&path).unwrap();
        assert_eq!(centroids.len(), 2);
        assert_eq!(centroids[0].geocode, 3304557);
        assert_eq!(centroids[0].lon, -43.1729);
        assert_eq!(centroids[1].name, "São Paulo");
    }

    #[test]
    fn test_read_centroids_rejects_bad_coordinate() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("centroids.csv");
        std::fs::write(&path, "CD_GEOCODM,NM_MUNICIP,X,Y\n1,A,west,-1\n").unwrap();
        let err = read_centroids(&path).unwrap_err();
        assert!(matches!(err, MatrixError::InvalidValue { ref column, .. } if column == "X"));
    }

    #[test]
    fn test_write_every_unordered_pair_once() {
        let tmp = TempDir::new().unwrap();
        let centroids: Vec<Centroid> = (0..5)
            .map(|i| create_test_centroid(1000 + i, -20.0 - i as f64 * 0.1, -45.0))
            .collect();
        let out = output_path(&tmp.path().join("centroids.csv"));
        assert!(out.ends_with("centroids-distancias.csv"));

        let pairs = write_distance_matrix(&centroids, &out, false).unwrap();
        assert_eq!(pairs, 10);

        let rows: Vec<DistanceRow> = read_rows(&out).unwrap();
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|r| r.source_geocode < r.target_geocode));
        assert_eq!(rows[0].source_geocode, 1000);
        assert_eq!(rows[0].target_geocode, 1001);
        // 0.1 degree of latitude is about 11 km.
        assert!((rows[0].distance_km - 11.07).abs() < 0.1);
    }

    #[test]
    fn test_distance_file_has_single_header() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("d.csv");
        let centroids = vec![
            create_test_centroid(1, -20.0, -45.0),
            create_test_centroid(2, -20.1, -45.0),
        ];
        write_distance_matrix(&centroids, &out, false).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "Source geocode,Source name,Target geocode,Target name,Distance(km)"
        );
        assert!(lines[1].starts_with("1,M1,2,M2,"));

        let empty = tmp.path().join("empty.csv");
        let pairs = write_distance_matrix(&centroids[..1], &empty, false).unwrap();
        assert_eq!(pairs, 0);
        let text = std::fs::read_to_string(&empty).unwrap();
        assert_eq!(text.lines().count(), 1);
    }
}
