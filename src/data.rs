//! # Binding Types and Data Values
//!
//! A [`BindingType`] is the declared kind of a parameter; a [`Data`] value is
//! what a request supplies for it (or what a run produces). The two are kept
//! apart so a configuration can be built without any values, and so a value
//! can be checked against its parameter's declaration before delivery.
//!
//! ## Serialized Form
//!
//! `Data` uses an adjacently tagged representation, which is also the format
//! of the CLI's input documents and of the disk cache:
//!
//! ```json
//! {"type": "int", "value": 3}
//! {"type": "bbox", "value": {"lowerCorner": [-33.0, -71.0], "upperCorner": [-32.0, -70.0]}}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::constants::{
    MIME_TYPE_GEOJSON, MIME_TYPE_GEOTIFF, MIME_TYPE_JSON, MIME_TYPE_OCTET_STREAM,
    MIME_TYPE_PLAIN_TEXT, MIME_TYPE_SHAPEFILE, MIME_TYPE_XML, SCHEMA_NRML, SCHEMA_QUAKEML,
    SCHEMA_SHAKEMAP,
};

/// Realized input values of one request, keyed by input identifier.
pub type InputValues = HashMap<String, Vec<Data>>;

/// Outputs of one run, keyed by output identifier.
pub type OutputValues = BTreeMap<String, Data>;

/// Declared kind of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingType {
    String,
    Int,
    Double,
    Boolean,
    #[serde(rename = "datetime")]
    DateTime,
    #[serde(rename = "bbox")]
    BoundingBox,
    Xml,
    GeoTiff,
    GeoJson,
    Shapefile,
    File,
    QuakeMl,
    Nrml,
    Shakemap,
    Json,
}

impl BindingType {
    /// All binding types, in configuration vocabulary order.
    pub const ALL: [BindingType; 15] = [
        Self::String,
        Self::Int,
        Self::Double,
        Self::Boolean,
        Self::DateTime,
        Self::BoundingBox,
        Self::Xml,
        Self::GeoTiff,
        Self::GeoJson,
        Self::Shapefile,
        Self::File,
        Self::QuakeMl,
        Self::Nrml,
        Self::Shakemap,
        Self::Json,
    ];

    /// Returns the `type` value used in configuration documents.
    pub fn key(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Double => "double",
            Self::Boolean => "boolean",
            Self::DateTime => "datetime",
            Self::BoundingBox => "bbox",
            Self::Xml => "xml",
            Self::GeoTiff => "geotiff",
            Self::GeoJson => "geojson",
            Self::Shapefile => "shapefile",
            Self::File => "file",
            Self::QuakeMl => "quakeml",
            Self::Nrml => "nrml",
            Self::Shakemap => "shakemap",
            Self::Json => "json",
        }
    }

    /// Parses a configuration `type` value.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.key() == key)
    }

    /// Literal bindings carry a single scalar value.
    pub fn is_literal(self) -> bool {
        matches!(
            self,
            Self::String | Self::Int | Self::Double | Self::Boolean | Self::DateTime
        )
    }

    /// XML based bindings.
    pub fn is_xml(self) -> bool {
        matches!(self, Self::Xml | Self::QuakeMl | Self::Nrml | Self::Shakemap)
    }

    /// XML bindings whose numeric content is normalised before hashing.
    pub fn is_validated_xml(self) -> bool {
        matches!(self, Self::QuakeMl | Self::Nrml | Self::Shakemap)
    }

    /// MIME type used when a parameter declares no default format.
    pub fn default_mime_type(self) -> Option<&'static str> {
        match self {
            Self::String => Some(MIME_TYPE_PLAIN_TEXT),
            Self::Xml | Self::QuakeMl | Self::Nrml | Self::Shakemap => Some(MIME_TYPE_XML),
            Self::GeoJson => Some(MIME_TYPE_GEOJSON),
            Self::GeoTiff => Some(MIME_TYPE_GEOTIFF),
            Self::Shapefile => Some(MIME_TYPE_SHAPEFILE),
            Self::Json => Some(MIME_TYPE_JSON),
            Self::File => Some(MIME_TYPE_OCTET_STREAM),
            Self::Int | Self::Double | Self::Boolean | Self::DateTime | Self::BoundingBox => None,
        }
    }

    /// Schema implied by the binding itself.
    pub fn default_schema(self) -> Option<&'static str> {
        match self {
            Self::QuakeMl => Some(SCHEMA_QUAKEML),
            Self::Shakemap => Some(SCHEMA_SHAKEMAP),
            Self::Nrml => Some(SCHEMA_NRML),
            _ => None,
        }
    }

    /// File name extension for generated paths.
    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Xml | Self::QuakeMl | Self::Nrml | Self::Shakemap => "xml",
            Self::GeoTiff => "tiff",
            Self::GeoJson | Self::Json => "json",
            Self::Shapefile => "shp",
            Self::String => "txt",
            _ => "dat",
        }
    }
}

impl fmt::Display for BindingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Axis aligned bounding box with `[lat, lon]` corners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub lower_corner: [f64; 2],
    pub upper_corner: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<String>,
}

impl BoundingBox {
    /// Creates a box from its corners.
    pub fn new(lower_corner: [f64; 2], upper_corner: [f64; 2]) -> Self {
        Self {
            lower_corner,
            upper_corner,
            crs: None,
        }
    }

    /// Sets the coordinate reference system.
    pub fn with_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }
}

/// A shapefile as its set of sidecar files, keyed by extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shapefile {
    pub parts: BTreeMap<String, Vec<u8>>,
}

impl Shapefile {
    /// Creates a shapefile from the `.shp` content.
    pub fn new(shp: Vec<u8>) -> Self {
        let mut parts = BTreeMap::new();
        parts.insert("shp".to_string(), shp);
        Self { parts }
    }

    /// Adds a sidecar file.
    pub fn with_part(mut self, extension: impl Into<String>, content: Vec<u8>) -> Self {
        self.parts.insert(extension.into(), content);
        self
    }

    /// Returns the `.shp` content.
    pub fn shp(&self) -> Option<&[u8]> {
        self.parts.get("shp").map(Vec::as_slice)
    }
}

/// A value supplied for, or produced by, a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Data {
    String(String),
    Int(i32),
    Double(f64),
    Boolean(bool),
    #[serde(rename = "datetime")]
    DateTime(DateTime<Utc>),
    #[serde(rename = "bbox")]
    BoundingBox(BoundingBox),
    Xml(String),
    GeoTiff(Vec<u8>),
    GeoJson(serde_json::Value),
    Shapefile(Shapefile),
    File(Vec<u8>),
    QuakeMl(String),
    Nrml(String),
    Shakemap(String),
    Json(serde_json::Value),
}

impl Data {
    /// Returns the binding this value belongs to.
    pub fn binding_type(&self) -> BindingType {
        match self {
            Self::String(_) => BindingType::String,
            Self::Int(_) => BindingType::Int,
            Self::Double(_) => BindingType::Double,
            Self::Boolean(_) => BindingType::Boolean,
            Self::DateTime(_) => BindingType::DateTime,
            Self::BoundingBox(_) => BindingType::BoundingBox,
            Self::Xml(_) => BindingType::Xml,
            Self::GeoTiff(_) => BindingType::GeoTiff,
            Self::GeoJson(_) => BindingType::GeoJson,
            Self::Shapefile(_) => BindingType::Shapefile,
            Self::File(_) => BindingType::File,
            Self::QuakeMl(_) => BindingType::QuakeMl,
            Self::Nrml(_) => BindingType::Nrml,
            Self::Shakemap(_) => BindingType::Shakemap,
            Self::Json(_) => BindingType::Json,
        }
    }

    /// Textual form of a literal value, used for allowed-value checks.
    pub fn literal_text(&self) -> Option<String> {
        match self {
            Self::String(s) => Some(s.clone()),
            Self::Int(i) => Some(i.to_string()),
            Self::Double(d) => Some(format!("{:?}", d)),
            Self::Boolean(b) => Some(b.to_string()),
            Self::DateTime(dt) => Some(crate::format::datetime_to_string(dt)),
            _ => None,
        }
    }

    /// Approximate in-memory size, used as cache weight.
    pub fn weight(&self) -> u64 {
        let bytes = match self {
            Self::String(s)
            | Self::Xml(s)
            | Self::QuakeMl(s)
            | Self::Nrml(s)
            | Self::Shakemap(s) => s.len(),
            Self::GeoTiff(b) | Self::File(b) => b.len(),
            Self::Shapefile(shp) => shp.parts.values().map(Vec::len).sum(),
            Self::GeoJson(v) | Self::Json(v) => v.to_string().len(),
            Self::Int(_) | Self::Double(_) | Self::Boolean(_) | Self::DateTime(_) => 8,
            Self::BoundingBox(_) => 32,
        };
        bytes as u64
    }
}
