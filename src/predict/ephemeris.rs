use chrono::{DateTime, Utc};
use sgp4::{Constants, Elements};
use std::f64::consts::TAU;

use crate::predict::error::PredictError;
use crate::predict::GroundStation;

pub const EARTH_ROTATION_RAD_S: f64 = 7.292_115e-5;

/// Geometric (unrefracted) view of the satellite from a station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Look {
    /// Radians clockwise from north, [0, 2π).
    pub az: f64,
    /// Radians above the horizon.
    pub el: f64,
    pub range_km: f64,
    /// Line of sight range rate in m/s, negative while approaching.
    pub range_velocity: f64,
}

/// Source of satellite positions. The pass engine only consumes this.
pub trait Ephemeris {
    fn name(&self) -> &str;

    /// Epoch of the underlying orbital elements.
    fn epoch(&self) -> DateTime<Utc>;

    fn look(&self, station: &GroundStation, at: DateTime<Utc>) -> Result<Look, PredictError>;
}

/// Where a fresh ephemeris of a satellite comes from, reread on every call.
pub trait EphemerisSource {
    type Ephemeris: Ephemeris;

    fn load(&mut self, satellite: &str) -> Result<Self::Ephemeris, PredictError>;
}

/// An sgp4-propagated satellite built from a TLE.
pub struct Satellite {
    name: String,
    norad_id: u64,
    elements: Elements,
    constants: Constants,
}

impl Satellite {
    pub fn from_tle(name: Option<String>, line1: &str, line2: &str) -> Result<Self, PredictError> {
        let label = name.clone().unwrap_or_else(|| line1.to_string());
        let invalid = |message: String| PredictError::InvalidTle {
            name: label.clone(),
            message,
        };
        let elements = Elements::from_tle(name, line1.as_bytes(), line2.as_bytes())
            .map_err(|e| invalid(e.to_string()))?;
        let constants = Constants::from_elements(&elements).map_err(|e| invalid(e.to_string()))?;
        let name = elements
            .object_name
            .clone()
            .unwrap_or_else(|| format!("NORAD {}", elements.norad_id));
        Ok(Self {
            name,
            norad_id: elements.norad_id,
            elements,
            constants,
        })
    }

    pub fn norad_id(&self) -> u64 {
        self.norad_id
    }
}

impl Ephemeris for Satellite {
    fn name(&self) -> &str {
        &self.name
    }

    fn epoch(&self) -> DateTime<Utc> {
        self.elements.datetime.and_utc()
    }

    fn look(&self, station: &GroundStation, at: DateTime<Utc>) -> Result<Look, PredictError> {
        let minutes = self
            .elements
            .datetime_to_minutes_since_epoch(&at.naive_utc())
            .map_err(|e| PredictError::Propagation(e.to_string()))?;

        let prediction = self
            .constants
            .propagate(minutes)
            .map_err(|e| PredictError::Propagation(e.to_string()))?;

        let sidereal =
            sgp4::iau_epoch_to_sidereal_time(sgp4::julian_years_since_j2000(&at.naive_utc()));

        let sat_ecef = teme_to_ecef_position(prediction.position, sidereal);
        let sat_vel_ecef = teme_to_ecef_velocity(prediction.position, prediction.velocity, sidereal);
        Ok(look_from_ecef(station, sat_ecef, sat_vel_ecef))
    }
}

/// Topocentric look at an ECEF position/velocity (km, km/s). The station is
/// at rest in this frame.
pub fn look_from_ecef(station: &GroundStation, sat_ecef: [f64; 3], sat_vel: [f64; 3]) -> Look {
    let sta_ecef = station.position_ecef_km();
    let dr = [
        sat_ecef[0] - sta_ecef[0],
        sat_ecef[1] - sta_ecef[1],
        sat_ecef[2] - sta_ecef[2],
    ];
    let range_km = (dr[0] * dr[0] + dr[1] * dr[1] + dr[2] * dr[2]).sqrt();
    if range_km <= 0.0 {
        return Look {
            az: 0.0,
            el: 0.0,
            range_km,
            range_velocity: 0.0,
        };
    }

    let (east, north, up) = station.enu(dr);
    let az = east.atan2(north).rem_euclid(TAU);
    let el = (up / range_km).clamp(-1.0, 1.0).asin();

    let range_rate_km_s =
        (sat_vel[0] * dr[0] + sat_vel[1] * dr[1] + sat_vel[2] * dr[2]) / range_km;

    Look {
        az,
        el,
        range_km,
        range_velocity: range_rate_km_s * 1000.0,
    }
}

pub fn teme_to_ecef_position(pos_teme: [f64; 3], gmst: f64) -> [f64; 3] {
    let cos_gmst = gmst.cos();
    let sin_gmst = gmst.sin();
    [
        pos_teme[0] * cos_gmst + pos_teme[1] * sin_gmst,
        -pos_teme[0] * sin_gmst + pos_teme[1] * cos_gmst,
        pos_teme[2],
    ]
}

pub fn teme_to_ecef_velocity(pos_teme: [f64; 3], vel_teme: [f64; 3], gmst: f64) -> [f64; 3] {
    let cos_gmst = gmst.cos();
    let sin_gmst = gmst.sin();
    let pos = teme_to_ecef_position(pos_teme, gmst);
    let rotated = [
        vel_teme[0] * cos_gmst + vel_teme[1] * sin_gmst,
        -vel_teme[0] * sin_gmst + vel_teme[1] * cos_gmst,
        vel_teme[2],
    ];
    let rotation = [
        -EARTH_ROTATION_RAD_S * pos[1],
        EARTH_ROTATION_RAD_S * pos[0],
        0.0,
    ];
    [
        rotated[0] - rotation[0],
        rotated[1] - rotation[1],
        rotated[2] - rotation[2],
    ]
}
