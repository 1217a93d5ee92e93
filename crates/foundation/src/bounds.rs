use crate::position::Position;

/// Geographic bounding box in degrees, as written by `LatLonBox` and `LatLonAltBox`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GeoBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl GeoBounds {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        GeoBounds {
            north,
            south,
            east,
            west,
        }
    }

    /// Boxes whose west edge is greater than the east edge cross the antimeridian.
    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    pub fn contains(&self, p: Position) -> bool {
        if p.latitude < self.south || p.latitude > self.north {
            return false;
        }
        if self.crosses_antimeridian() {
            p.longitude >= self.west || p.longitude <= self.east
        } else {
            p.longitude >= self.west && p.longitude <= self.east
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GeoBounds;
    use crate::position::Position;

    #[test]
    fn contains_point_inside() {
        let b = GeoBounds::new(10.0, -10.0, 20.0, -20.0);
        assert!(b.contains(Position::new(0.0, 0.0, 0.0)));
        assert!(!b.contains(Position::new(11.0, 0.0, 0.0)));
    }

    #[test]
    fn handles_antimeridian_boxes() {
        let b = GeoBounds::new(10.0, -10.0, -170.0, 170.0);
        assert!(b.crosses_antimeridian());
        assert!(b.contains(Position::new(0.0, 175.0, 0.0)));
        assert!(b.contains(Position::new(0.0, -175.0, 0.0)));
        assert!(!b.contains(Position::new(0.0, 0.0, 0.0)));
    }
}
