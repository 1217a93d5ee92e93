/// Geographic position in degrees and meters.
///
/// KML and WKT both write coordinates longitude first; this type always stores
/// latitude first so consumers never have to remember the source order.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }

    /// Builds a position from the `lon, lat, alt` ordering used on the wire.
    pub fn from_lon_lat(longitude: f64, latitude: f64, altitude: f64) -> Self {
        Self::new(latitude, longitude, altitude)
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.altitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}
