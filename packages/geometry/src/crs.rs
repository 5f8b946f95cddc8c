//! Coordinate reference systems and MGA reprojection.
//!
//! Supported CRSs are geographic WGS84 / GDA94 / GDA2020 and the Map Grid
//! of Australia zones on either datum (GDA94 `283xx`, GDA2020 `78xx`).
//! The geographic datums differ by under two metres and are treated as
//! the same frame. Grid coordinates use the Krüger series for the
//! transverse Mercator on the GRS80 ellipsoid.

use std::fmt;

use geo::Coord;

use crate::GeometryError;

/// An EPSG-coded coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Crs(u32);

/// What kind of coordinates a [`Crs`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrsKind {
    /// Longitude/latitude in degrees.
    Geographic,
    /// MGA easting/northing in metres for the given UTM zone.
    Mga {
        /// UTM zone number.
        zone: u8,
    },
}

impl Crs {
    /// WGS84 geographic (the `GeoJSON` default).
    pub const WGS84: Self = Self(4326);
    /// GDA94 geographic.
    pub const GDA94: Self = Self(4283);
    /// GDA2020 geographic.
    pub const GDA2020: Self = Self(7844);
    /// GDA2020 / MGA zone 56, used for every length and area in Sydney.
    pub const MGA2020_56: Self = Self(7856);

    /// Wraps an EPSG code.
    #[must_use]
    pub const fn epsg(code: u32) -> Self {
        Self(code)
    }

    /// The EPSG code.
    #[must_use]
    pub const fn code(self) -> u32 {
        self.0
    }

    /// Classifies the CRS.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::UnsupportedCrs`] for any other code.
    pub fn kind(self) -> Result<CrsKind, GeometryError> {
        match self.0 {
            4326 | 4283 | 7844 => Ok(CrsKind::Geographic),
            #[allow(clippy::cast_possible_truncation)]
            28348..=28358 => Ok(CrsKind::Mga {
                zone: (self.0 - 28300) as u8,
            }),
            #[allow(clippy::cast_possible_truncation)]
            7846..=7859 => Ok(CrsKind::Mga {
                zone: (self.0 - 7800) as u8,
            }),
            _ => Err(GeometryError::UnsupportedCrs { crs: self }),
        }
    }

    /// Parses `EPSG:7856`, `urn:ogc:def:crs:EPSG::7856` or a bare code.
    /// `OGC:CRS84` maps to [`Crs::WGS84`].
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if name.to_ascii_uppercase().ends_with("CRS84") {
            return Some(Self::WGS84);
        }
        name.rsplit(':')
            .next()
            .and_then(|code| code.trim().parse().ok())
            .map(Self)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// GRS80 semi-major axis.
const A: f64 = 6_378_137.0;
/// GRS80 flattening.
const F: f64 = 1.0 / 298.257_222_101;
/// MGA central scale factor.
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING: f64 = 10_000_000.0;
/// Multipliers `2j` of the three series terms.
const ORDERS: [f64; 3] = [2.0, 4.0, 6.0];

/// Transverse Mercator constants for one zone.
#[derive(Debug, Clone, Copy)]
struct Mga {
    lon0: f64,
    n: f64,
    k0a: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
}

impl Mga {
    fn zone(zone: u8) -> Self {
        let n = F / (2.0 - F);
        let n2 = n * n;
        let n3 = n2 * n;
        let rectifying = A / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0);

        Self {
            lon0: (6.0 * f64::from(zone) - 183.0).to_radians(),
            n,
            k0a: K0 * rectifying,
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
                n2 / 48.0 + n3 / 15.0,
                17.0 * n3 / 480.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
                56.0 * n3 / 15.0,
            ],
        }
    }

    /// Longitude/latitude (degrees) to easting/northing (metres).
    fn forward(&self, c: Coord) -> Coord {
        let phi = c.y.to_radians();
        let dlon = c.x.to_radians() - self.lon0;
        let e = 2.0 * self.n.sqrt() / (1.0 + self.n);

        let t = (phi.sin().atanh() - e * (e * phi.sin()).atanh()).sinh();
        let xi_p = t.atan2(dlon.cos());
        let eta_p = (dlon.sin() / t.mul_add(t, 1.0).sqrt()).atanh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (k, alpha) in ORDERS.into_iter().zip(self.alpha) {
            xi += alpha * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += alpha * (k * xi_p).cos() * (k * eta_p).sinh();
        }

        Coord {
            x: self.k0a.mul_add(eta, FALSE_EASTING),
            y: self.k0a.mul_add(xi, FALSE_NORTHING),
        }
    }

    /// Easting/northing (metres) to longitude/latitude (degrees).
    fn inverse(&self, c: Coord) -> Coord {
        let xi = (c.y - FALSE_NORTHING) / self.k0a;
        let eta = (c.x - FALSE_EASTING) / self.k0a;

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (k, beta) in ORDERS.into_iter().zip(self.beta) {
            xi_p -= beta * (k * xi).sin() * (k * eta).cosh();
            eta_p -= beta * (k * xi).cos() * (k * eta).sinh();
        }

        let chi = (xi_p.sin() / eta_p.cosh()).asin();
        let mut phi = chi;
        for (k, delta) in ORDERS.into_iter().zip(self.delta) {
            phi += delta * (k * chi).sin();
        }
        let lon = self.lon0 + eta_p.sinh().atan2(xi_p.cos());

        Coord {
            x: lon.to_degrees(),
            y: phi.to_degrees(),
        }
    }
}

/// A coordinate transform between two supported CRSs.
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    from: Option<Mga>,
    to: Option<Mga>,
}

impl Transform {
    /// Builds the transform from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError::UnsupportedCrs`] if either CRS is not
    /// supported.
    pub fn new(from: Crs, to: Crs) -> Result<Self, GeometryError> {
        let grid = |kind| match kind {
            CrsKind::Geographic => None,
            CrsKind::Mga { zone } => Some(Mga::zone(zone)),
        };
        Ok(Self {
            from: grid(from.kind()?),
            to: grid(to.kind()?),
        })
    }

    /// Transforms one coordinate.
    #[must_use]
    pub fn apply(&self, c: Coord) -> Coord {
        let geographic = self.from.as_ref().map_or(c, |mga| mga.inverse(c));
        self.to
            .as_ref()
            .map_or(geographic, |mga| mga.forward(geographic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dms(d: f64, m: f64, s: f64) -> f64 {
        d.signum() * (d.abs() + m / 60.0 + s / 3600.0)
    }

    #[test]
    fn classifies_supported_codes() {
        assert_eq!(Crs::WGS84.kind().unwrap(), CrsKind::Geographic);
        assert_eq!(Crs::GDA2020.kind().unwrap(), CrsKind::Geographic);
        assert_eq!(Crs::MGA2020_56.kind().unwrap(), CrsKind::Mga { zone: 56 });
        assert_eq!(Crs::epsg(28355).kind().unwrap(), CrsKind::Mga { zone: 55 });
        assert!(matches!(
            Crs::epsg(3857).kind(),
            Err(GeometryError::UnsupportedCrs { .. })
        ));
    }

    #[test]
    fn parses_crs_names() {
        assert_eq!(Crs::parse("urn:ogc:def:crs:EPSG::7856"), Some(Crs::MGA2020_56));
        assert_eq!(Crs::parse("EPSG:4283"), Some(Crs::GDA94));
        assert_eq!(Crs::parse("urn:ogc:def:crs:OGC:1.3:CRS84"), Some(Crs::WGS84));
        assert_eq!(Crs::parse("7844"), Some(Crs::GDA2020));
        assert_eq!(Crs::parse("EPSG:abc"), None);
        assert_eq!(Crs::MGA2020_56.to_string(), "EPSG:7856");
    }

    #[test]
    fn flinders_peak_matches_published_grid_coordinates() {
        let transform = Transform::new(Crs::GDA94, Crs::epsg(28355)).unwrap();
        let grid = transform.apply(Coord {
            x: dms(144.0, 25.0, 29.5244),
            y: dms(-37.0, 57.0, 3.7203),
        });

        assert!((grid.x - 273_741.297).abs() < 0.01, "easting {}", grid.x);
        assert!((grid.y - 5_796_489.777).abs() < 0.01, "northing {}", grid.y);
    }

    #[test]
    fn central_meridian_on_equator_is_false_origin() {
        let transform = Transform::new(Crs::WGS84, Crs::MGA2020_56).unwrap();
        let grid = transform.apply(Coord { x: 153.0, y: 0.0 });
        assert!((grid.x - 500_000.0).abs() < 1e-6);
        assert!((grid.y - 10_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn eastings_are_symmetric_about_central_meridian() {
        let transform = Transform::new(Crs::WGS84, Crs::MGA2020_56).unwrap();
        let west = transform.apply(Coord { x: 151.0, y: -33.8 });
        let east = transform.apply(Coord { x: 155.0, y: -33.8 });
        assert!((500_000.0 - west.x - (east.x - 500_000.0)).abs() < 1e-6);
        assert!((west.y - east.y).abs() < 1e-6);
    }

    #[test]
    fn round_trips_through_grid() {
        let there = Transform::new(Crs::WGS84, Crs::MGA2020_56).unwrap();
        let back = Transform::new(Crs::MGA2020_56, Crs::WGS84).unwrap();

        for (lon, lat) in [(150.9, -33.77), (151.2093, -33.8688), (152.5, -28.0)] {
            let c = back.apply(there.apply(Coord { x: lon, y: lat }));
            assert!((c.x - lon).abs() < 1e-7, "lon {lon} -> {}", c.x);
            assert!((c.y - lat).abs() < 1e-7, "lat {lat} -> {}", c.y);
        }
    }

    #[test]
    fn zone_to_zone_goes_through_geographic() {
        let to_55 = Transform::new(Crs::MGA2020_56, Crs::epsg(7855)).unwrap();
        let to_56 = Transform::new(Crs::epsg(7855), Crs::MGA2020_56).unwrap();
        let start = Coord {
            x: 300_000.0,
            y: 6_250_000.0,
        };
        let c = to_56.apply(to_55.apply(start));
        assert!((c.x - start.x).abs() < 1e-3);
        assert!((c.y - start.y).abs() < 1e-3);
    }
}
