//! Postal-code reference data: the built-in table, a file-loaded table,
//! and the depot every distance is measured from.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::resolver::is_valid_postal_code;
use crate::geo::GeoCoordinate;

/// The single dispatch point (Jaipur GPO, 302001).
pub const DEPOT: GeoCoordinate = GeoCoordinate::new(26.9124, 75.7873);

/// One postal code with its centroid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostalCodeRecord {
    pub code: String,
    pub coordinate: GeoCoordinate,
    pub city: String,
}

/// Lookup source for postal codes. Swap in a national database here.
pub trait PostalCodeTable: Send + Sync {
    /// Exact-match lookup.
    fn lookup(&self, code: &str) -> Option<PostalCodeRecord>;

    /// Every record, for listings and autocomplete.
    fn records(&self) -> Vec<PostalCodeRecord>;
}

// ─── Built-in dataset ───────────────────────────────────────────

struct BuiltinCode {
    code: &'static str,
    lat: f64,
    lon: f64,
    city: &'static str,
}

const BUILTIN_CODES: &[BuiltinCode] = &[
    // Jaipur city
    BuiltinCode { code: "302001", lat: 26.9124, lon: 75.7873, city: "Jaipur" },
    BuiltinCode { code: "302002", lat: 26.9260, lon: 75.8235, city: "Jaipur" },
    BuiltinCode { code: "302003", lat: 26.9196, lon: 75.8312, city: "Jaipur" },
    BuiltinCode { code: "302004", lat: 26.8930, lon: 75.8230, city: "Jaipur" },
    BuiltinCode { code: "302006", lat: 26.9030, lon: 75.7920, city: "Jaipur" },
    BuiltinCode { code: "302012", lat: 26.9500, lon: 75.7400, city: "Jaipur" },
    BuiltinCode { code: "302015", lat: 26.8550, lon: 75.8150, city: "Jaipur" },
    BuiltinCode { code: "302016", lat: 26.9620, lon: 75.7700, city: "Jaipur" },
    BuiltinCode { code: "302017", lat: 26.8200, lon: 75.8600, city: "Jaipur" },
    BuiltinCode { code: "302018", lat: 26.8800, lon: 75.8000, city: "Jaipur" },
    BuiltinCode { code: "302020", lat: 26.8700, lon: 75.7600, city: "Jaipur" },
    BuiltinCode { code: "302021", lat: 26.9120, lon: 75.7430, city: "Jaipur" },
    BuiltinCode { code: "302029", lat: 26.8200, lon: 75.7900, city: "Sanganer" },
    BuiltinCode { code: "302033", lat: 26.8850, lon: 75.8350, city: "Jaipur" },
    // Jaipur district and nearby towns
    BuiltinCode { code: "302022", lat: 26.7800, lon: 75.8400, city: "Sitapura" },
    BuiltinCode { code: "303007", lat: 26.8100, lon: 75.5450, city: "Bagru" },
    BuiltinCode { code: "303702", lat: 27.1600, lon: 75.7200, city: "Chomu" },
    BuiltinCode { code: "303101", lat: 27.3900, lon: 75.9600, city: "Shahpura" },
    BuiltinCode { code: "303901", lat: 26.6000, lon: 75.9500, city: "Chaksu" },
    BuiltinCode { code: "303303", lat: 26.8900, lon: 76.3300, city: "Dausa" },
    BuiltinCode { code: "304001", lat: 26.1664, lon: 75.7885, city: "Tonk" },
    // Rajasthan
    BuiltinCode { code: "301001", lat: 27.5530, lon: 76.6346, city: "Alwar" },
    BuiltinCode { code: "305001", lat: 26.4499, lon: 74.6399, city: "Ajmer" },
    BuiltinCode { code: "321001", lat: 27.2152, lon: 77.4930, city: "Bharatpur" },
    BuiltinCode { code: "324001", lat: 25.2138, lon: 75.8648, city: "Kota" },
    BuiltinCode { code: "313001", lat: 24.5854, lon: 73.7125, city: "Udaipur" },
    BuiltinCode { code: "342001", lat: 26.2389, lon: 73.0243, city: "Jodhpur" },
    BuiltinCode { code: "334001", lat: 28.0229, lon: 73.3119, city: "Bikaner" },
    // Metros
    BuiltinCode { code: "110001", lat: 28.6139, lon: 77.2090, city: "New Delhi" },
    BuiltinCode { code: "122001", lat: 28.4595, lon: 77.0266, city: "Gurugram" },
    BuiltinCode { code: "400001", lat: 18.9388, lon: 72.8354, city: "Mumbai" },
    BuiltinCode { code: "560001", lat: 12.9716, lon: 77.5946, city: "Bengaluru" },
];

fn builtin_to_record(entry: &BuiltinCode) -> PostalCodeRecord {
    PostalCodeRecord {
        code: entry.code.to_string(),
        coordinate: GeoCoordinate::new(entry.lat, entry.lon),
        city: entry.city.to_string(),
    }
}

/// The compiled-in reference table.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTable;

impl PostalCodeTable for BuiltinTable {
    fn lookup(&self, code: &str) -> Option<PostalCodeRecord> {
        BUILTIN_CODES
            .iter()
            .find(|entry| entry.code == code)
            .map(builtin_to_record)
    }

    fn records(&self) -> Vec<PostalCodeRecord> {
        BUILTIN_CODES.iter().map(builtin_to_record).collect()
    }
}

// ─── File-loaded dataset ────────────────────────────────────────

/// Problems with an external postal-code file.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("cannot read postal code table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("postal code table {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("postal code table entry '{0}' is not a valid 6-digit pincode")]
    InvalidCode(String),
    #[error("postal code table entry '{0}' has out-of-range coordinates")]
    InvalidCoordinate(String),
    #[error("postal code '{0}' appears more than once")]
    Duplicate(String),
}

/// A table built from records at runtime, e.g. a JSON export.
#[derive(Debug, Clone, Default)]
pub struct RecordTable {
    by_code: HashMap<String, PostalCodeRecord>,
}

impl RecordTable {
    pub fn from_records(records: Vec<PostalCodeRecord>) -> Result<Self, TableError> {
        let mut by_code = HashMap::with_capacity(records.len());
        for record in records {
            if !is_valid_postal_code(&record.code) {
                return Err(TableError::InvalidCode(record.code));
            }
            if !record.coordinate.is_valid() {
                return Err(TableError::InvalidCoordinate(record.code));
            }
            if by_code.contains_key(&record.code) {
                return Err(TableError::Duplicate(record.code));
            }
            by_code.insert(record.code.clone(), record);
        }
        Ok(Self { by_code })
    }

    /// Load a JSON array of [`PostalCodeRecord`].
    pub fn load(path: &Path) -> Result<Self, TableError> {
        let data = fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let records: Vec<PostalCodeRecord> =
            serde_json::from_str(&data).map_err(|source| TableError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Self::from_records(records)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }
}

impl PostalCodeTable for RecordTable {
    fn lookup(&self, code: &str) -> Option<PostalCodeRecord> {
        self.by_code.get(code).cloned()
    }

    fn records(&self) -> Vec<PostalCodeRecord> {
        let mut records: Vec<_> = self.by_code.values().cloned().collect();
        records.sort_by(|a, b| a.code.cmp(&b.code));
        records
    }
}
