use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::predict::error::PredictError;
use crate::predict::{EphemerisSource, Satellite};

/// One raw TLE as found in the config cache or a TLE file.
#[derive(Debug, Clone, PartialEq)]
pub struct TleEntry {
    pub name: Option<String>,
    pub line1: String,
    pub line2: String,
}

impl TleEntry {
    pub fn norad_id(&self) -> Option<u32> {
        self.line1.get(2..7)?.trim().parse().ok()
    }

    /// International designator in `YYYY-NNNP` form, from line 1 columns 10-17.
    pub fn international_designator(&self) -> Option<String> {
        let raw = self.line1.get(9..17)?.trim();
        if raw.len() < 6 {
            return None;
        }
        let year: u32 = raw.get(0..2)?.parse().ok()?;
        let year = if year < 57 { 2000 + year } else { 1900 + year };
        Some(format!("{}-{}", year, &raw[2..]))
    }

    pub fn to_satellite(&self) -> Result<Satellite, PredictError> {
        Satellite::from_tle(self.name.clone(), &self.line1, &self.line2)
    }
}

/// Looks up TLEs from the configured cache and an optional directory of
/// `.tle`/`.txt` files. Cache entries win over directory entries.
pub struct TleLoader {
    tle_dir: Option<PathBuf>,
    cache: BTreeMap<String, TleEntry>,
    files: Vec<TleEntry>,
}

impl TleLoader {
    pub fn new(tle_dir: Option<PathBuf>) -> Self {
        Self {
            tle_dir,
            cache: BTreeMap::new(),
            files: Vec::new(),
        }
    }

    /// Adds the config `tle_cache` table, keyed by whatever id the operator chose.
    pub fn with_cache(mut self, cache: &BTreeMap<String, Vec<String>>) -> Result<Self, PredictError> {
        for (key, lines) in cache {
            let entry = entry_from_lines(lines).ok_or_else(|| PredictError::InvalidTle {
                name: key.clone(),
                message: format!("expected 2 or 3 lines, got {}", lines.len()),
            })?;
            self.cache.insert(key.clone(), entry);
        }
        Ok(self)
    }

    /// Load all TLE files from the directory
    pub fn load_all(&mut self) -> Result<(), PredictError> {
        let Some(dir) = &self.tle_dir else {
            return Ok(());
        };
        if !dir.exists() {
            return Err(PredictError::DirectoryNotFound(dir.display().to_string()));
        }

        self.files.clear();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(ext) = path.extension() else {
                continue;
            };
            if ext == "tle" || ext == "txt" {
                match parse_tle_file(&path) {
                    Ok(entries) => self.files.extend(entries),
                    Err(e) => log::warn!("Failed to read TLE file {}: {}", path.display(), e),
                }
            }
        }
        log::debug!("Loaded {} TLEs from {}", self.files.len(), dir.display());
        Ok(())
    }

    /// Finds a TLE by cache key, NORAD catalog number, international
    /// designator (with or without the dash) or name.
    pub fn find(&self, sat_id: &str) -> Option<&TleEntry> {
        if let Some(entry) = self.cache.get(sat_id) {
            return Some(entry);
        }
        let query = normalize(sat_id);
        self.cache
            .values()
            .chain(self.files.iter())
            .find(|entry| matches_id(entry, &query))
    }

    pub fn satellite(&self, sat_id: &str) -> Result<Satellite, PredictError> {
        let entry = self
            .find(sat_id)
            .ok_or_else(|| PredictError::UnknownSatellite(sat_id.to_string()))?;
        log::info!(
            "Using TLE for {}:\n{}\n{}",
            entry.name.as_deref().unwrap_or(sat_id),
            entry.line1,
            entry.line2
        );
        entry.to_satellite()
    }
}

impl EphemerisSource for TleLoader {
    type Ephemeris = Satellite;

    fn load(&mut self, satellite: &str) -> Result<Satellite, PredictError> {
        self.load_all()?;
        self.satellite(satellite)
    }
}

fn normalize(id: &str) -> String {
    id.trim().to_uppercase().replace('-', "")
}

fn matches_id(entry: &TleEntry, query: &str) -> bool {
    if query.chars().all(|c| c.is_ascii_digit()) {
        return query.parse::<u32>().ok() == entry.norad_id();
    }
    if entry
        .international_designator()
        .is_some_and(|d| normalize(&d) == query)
    {
        return true;
    }
    entry
        .name
        .as_deref()
        .is_some_and(|n| normalize(n) == query)
}

fn entry_from_lines(lines: &[String]) -> Option<TleEntry> {
    match lines {
        [l1, l2] => Some(TleEntry {
            name: None,
            line1: l1.trim().to_string(),
            line2: l2.trim().to_string(),
        }),
        [name, l1, l2] => Some(TleEntry {
            name: Some(name.trim().to_string()),
            line1: l1.trim().to_string(),
            line2: l2.trim().to_string(),
        }),
        _ => None,
    }
}

fn parse_tle_file(path: &Path) -> Result<Vec<TleEntry>, PredictError> {
    let content = fs::read_to_string(path)?;
    Ok(parse_multi_tle(&content))
}

/// Parse multi-satellite TLE content
pub fn parse_multi_tle(content: &str) -> Vec<TleEntry> {
    let lines: Vec<&str> = content
        .lines()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();

    let mut result = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        if lines[i].starts_with("1 ") && i + 1 < lines.len() && lines[i + 1].starts_with("2 ") {
            // 2-line TLE (no name)
            result.push(TleEntry {
                name: None,
                line1: lines[i].to_string(),
                line2: lines[i + 1].to_string(),
            });
            i += 2;
        } else if i + 2 < lines.len()
            && lines[i + 1].starts_with("1 ")
            && lines[i + 2].starts_with("2 ")
        {
            // 3-line TLE (with name)
            result.push(TleEntry {
                name: Some(lines[i].to_string()),
                line1: lines[i + 1].to_string(),
                line2: lines[i + 2].to_string(),
            });
            i += 3;
        } else {
            i += 1;
        }
    }

    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const ORESAT0: [&str; 3] = [
        "ORESAT0",
        "1 52017U 22026K   23092.57919752  .00024279  00000+0  10547-2 0  9990",
        "2 52017  97.5109  94.8899 0023022 355.7525   4.3512 15.22051679 58035",
    ];

    fn loader() -> TleLoader {
        let mut cache = BTreeMap::new();
        cache.insert(
            "OreSat0".to_string(),
            ORESAT0.iter().map(|s| s.to_string()).collect(),
        );
        TleLoader::new(None).with_cache(&cache).unwrap()
    }

    #[test]
    fn finds_by_every_id_form() {
        let loader = loader();
        for id in ["OreSat0", "52017", "2022-026K", "2022026k", "oresat0"] {
            assert!(loader.find(id).is_some(), "{id}");
        }
        assert!(loader.find("60525").is_none());
        assert!(matches!(
            loader.satellite("nope"),
            Err(PredictError::UnknownSatellite(_))
        ));
    }

    #[test]
    fn designator_from_line1() {
        let entry = loader().find("OreSat0").cloned().unwrap();
        assert_eq!(entry.norad_id(), Some(52017));
        assert_eq!(entry.international_designator().as_deref(), Some("2022-026K"));
    }

    #[test]
    fn multi_tle_with_and_without_names() {
        let content = format!(
            "{}\n{}\n{}\n\n{}\n{}\ngarbage\n",
            ORESAT0[0], ORESAT0[1], ORESAT0[2], ORESAT0[1], ORESAT0[2]
        );
        let entries = parse_multi_tle(&content);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name.as_deref(), Some("ORESAT0"));
        assert_eq!(entries[1].name, None);
    }

    #[test]
    fn rejects_short_cache_entry() {
        let mut cache = BTreeMap::new();
        cache.insert("bad".to_string(), vec!["1 52017U".to_string()]);
        assert!(TleLoader::new(None).with_cache(&cache).is_err());
    }
}
