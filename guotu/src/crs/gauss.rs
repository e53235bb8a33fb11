//! Gauss-Krüger projection on the CGCS2000 ellipsoid.
//!
//! Same transverse Mercator mathematics as UTM but with a scale factor of
//! 1.0 and a per-zone false easting. Series accuracy is well below the
//! projected coordinate tolerance of 1e-4 m.

use super::Geographic;

/// CGCS2000 reference ellipsoid
pub struct Cgcs2000;

impl Cgcs2000 {
    /// Semi-major axis in metres
    pub const A: f64 = 6378137.0;

    /// Inverse flattening
    pub const INV_F: f64 = 298.257222101;

    /// Flattening
    pub const F: f64 = 1.0 / Self::INV_F;

    /// First eccentricity squared
    pub const E2: f64 = 2.0 * Self::F - Self::F * Self::F;

    /// Second eccentricity squared
    pub const EP2: f64 = Self::E2 / (1.0 - Self::E2);
}

const K0: f64 = 1.0;

/// Meridian arc length from the equator to `phi`
fn meridian_arc(phi: f64) -> f64 {
    let a = Cgcs2000::A;
    let e2 = Cgcs2000::E2;

    a * ((1.0 - e2 / 4.0 - 3.0 * e2.powi(2) / 64.0 - 5.0 * e2.powi(3) / 256.0) * phi
        - (3.0 * e2 / 8.0 + 3.0 * e2.powi(2) / 32.0 + 45.0 * e2.powi(3) / 1024.0)
            * (2.0 * phi).sin()
        + (15.0 * e2.powi(2) / 256.0 + 45.0 * e2.powi(3) / 1024.0) * (4.0 * phi).sin()
        - (35.0 * e2.powi(3) / 3072.0) * (6.0 * phi).sin())
}

/// Projects geographic coordinates to Gauss-Krüger plane coordinates
pub fn geographic_to_gauss(
    geo: Geographic,
    central_meridian_deg: f64,
    false_easting: f64,
) -> (f64, f64) {
    let a = Cgcs2000::A;
    let e2 = Cgcs2000::E2;
    let ep2 = Cgcs2000::EP2;
    let lon0 = central_meridian_deg.to_radians();

    let sin_phi = geo.lat.sin();
    let cos_phi = geo.lat.cos();
    let tan_phi = geo.lat.tan();

    let n = a / (1.0 - e2 * sin_phi.powi(2)).sqrt();
    let t = tan_phi.powi(2);
    let c = ep2 * cos_phi.powi(2);
    let a1 = (geo.lon - lon0) * cos_phi;
    let m = meridian_arc(geo.lat);

    let x = K0
        * n
        * (a1
            + (1.0 - t + c) * a1.powi(3) / 6.0
            + (5.0 - 18.0 * t + t.powi(2) + 72.0 * c - 58.0 * ep2) * a1.powi(5) / 120.0)
        + false_easting;

    let y = K0
        * (m + n
            * tan_phi
            * (a1.powi(2) / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c.powi(2)) * a1.powi(4) / 24.0
                + (61.0 - 58.0 * t + t.powi(2) + 600.0 * c - 330.0 * ep2) * a1.powi(6) / 720.0));

    (x, y)
}

/// Converts Gauss-Krüger plane coordinates back to geographic coordinates
pub fn gauss_to_geographic(x: f64, y: f64, central_meridian_deg: f64, false_easting: f64) -> Geographic {
    let a = Cgcs2000::A;
    let e2 = Cgcs2000::E2;
    let ep2 = Cgcs2000::EP2;
    let lon0 = central_meridian_deg.to_radians();

    let x = x - false_easting;

    // Footprint latitude
    let m = y / K0;
    let mu = m / (a * (1.0 - e2 / 4.0 - 3.0 * e2.powi(2) / 64.0 - 5.0 * e2.powi(3) / 256.0));

    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1.powi(2) / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();

    let n1 = a / (1.0 - e2 * sin_phi1.powi(2)).sqrt();
    let t1 = tan_phi1.powi(2);
    let c1 = ep2 * cos_phi1.powi(2);
    let r1 = a * (1.0 - e2) / (1.0 - e2 * sin_phi1.powi(2)).powf(1.5);
    let d = x / (n1 * K0);

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d.powi(2) / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1.powi(2) - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1.powi(2) - 252.0 * ep2
                    - 3.0 * c1.powi(2))
                    * d.powi(6)
                    / 720.0);

    let lon = lon0
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1.powi(2) + 8.0 * ep2 + 24.0 * t1.powi(2))
                * d.powi(5)
                / 120.0)
            / cos_phi1;

    Geographic::new(lon, lat)
}
