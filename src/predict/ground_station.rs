use std::f64::consts::TAU;

// WGS-84
const EARTH_RADIUS_KM: f64 = 6378.137;
const ECCENTRICITY_SQ: f64 = 0.006_694_379_990_14;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundStation {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub altitude_m: f64,
}

impl Default for GroundStation {
    fn default() -> Self {
        // Portland evb1
        Self {
            latitude_deg: 45.509054,
            longitude_deg: -122.681394,
            altitude_m: 50.0,
        }
    }
}

impl GroundStation {
    pub fn new(latitude_deg: f64, longitude_deg: f64, altitude_m: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
            altitude_m,
        }
    }

    pub fn lat_rad(&self) -> f64 {
        self.latitude_deg.to_radians()
    }

    pub fn lon_rad(&self) -> f64 {
        self.longitude_deg.to_radians()
    }

    pub fn position_ecef_km(&self) -> [f64; 3] {
        let lat = self.lat_rad();
        let lon = self.lon_rad();
        let sin_lat = lat.sin();
        let cos_lat = lat.cos();
        let sin_lon = lon.sin();
        let cos_lon = lon.cos();
        let n = EARTH_RADIUS_KM / (1.0 - ECCENTRICITY_SQ * sin_lat * sin_lat).sqrt();
        let alt_km = self.altitude_m / 1000.0;
        let x = (n + alt_km) * cos_lat * cos_lon;
        let y = (n + alt_km) * cos_lat * sin_lon;
        let z = (n * (1.0 - ECCENTRICITY_SQ) + alt_km) * sin_lat;
        [x, y, z]
    }

    /// Rotates an ECEF offset from the station into local (east, north, up).
    pub fn enu(&self, dr: [f64; 3]) -> (f64, f64, f64) {
        let sin_lat = self.lat_rad().sin();
        let cos_lat = self.lat_rad().cos();
        let sin_lon = self.lon_rad().sin();
        let cos_lon = self.lon_rad().cos();

        let east = -sin_lon * dr[0] + cos_lon * dr[1];
        let north = -sin_lat * cos_lon * dr[0] - sin_lat * sin_lon * dr[1] + cos_lat * dr[2];
        let up = cos_lat * cos_lon * dr[0] + cos_lat * sin_lon * dr[1] + sin_lat * dr[2];
        (east, north, up)
    }

    /// Initial great-circle bearing from the station towards a geographic
    /// target, in radians clockwise from north within [0, 2π).
    pub fn bearing_to(&self, latitude_deg: f64, longitude_deg: f64) -> f64 {
        let lat1 = self.lat_rad();
        let lat2 = latitude_deg.to_radians();
        let dlon = longitude_deg.to_radians() - self.lon_rad();
        let y = dlon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
        y.atan2(x).rem_euclid(TAU)
    }
}
