//! # Format Converters
//!
//! Pure functions between raw bytes and [`Data`] values, one pair per
//! binding type, plus the command line rendering of values.
//!
//! ## Canonical Form
//!
//! [`to_bytes`] always produces the canonical serialization of a value:
//!
//! - XML is re-serialized with the declaration, comments, processing
//!   instructions and whitespace-only text removed, text trimmed,
//!   attributes sorted by name and empty elements written as start/end
//!   pairs. Two documents that only differ in layout serialize identically.
//! - QuakeML, NRML and Shakemap additionally normalise numeric text and
//!   attribute values (`8.50` and `8.5` are the same magnitude).
//! - JSON is re-serialized by `serde_json`, which orders object keys.
//!
//! The cache key folds this canonical form, never the raw request bytes.
//!
//! ## Errors
//!
//! Malformed content yields [`Error::Conversion`], distinct from I/O errors.

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::data::{BindingType, BoundingBox, Data, Shapefile};
use crate::error::{Error, Result};

// =============================================================================
// Bytes <-> Data
// =============================================================================

/// Parses raw bytes into a value of the given binding.
pub fn from_bytes(binding: BindingType, bytes: &[u8]) -> Result<Data> {
    match binding {
        BindingType::String => Ok(Data::String(utf8(binding, bytes)?.to_string())),
        BindingType::Int => {
            let text = utf8(binding, bytes)?.trim();
            text.parse::<i32>()
                .map(Data::Int)
                .map_err(|e| Error::conversion(binding, format!("'{}': {}", text, e)))
        }
        BindingType::Double => {
            let text = utf8(binding, bytes)?.trim();
            text.parse::<f64>()
                .map(Data::Double)
                .map_err(|e| Error::conversion(binding, format!("'{}': {}", text, e)))
        }
        BindingType::Boolean => match utf8(binding, bytes)?.trim() {
            "true" => Ok(Data::Boolean(true)),
            "false" => Ok(Data::Boolean(false)),
            other => Err(Error::conversion(binding, format!("'{}' is not a boolean", other))),
        },
        BindingType::DateTime => {
            let text = utf8(binding, bytes)?.trim();
            DateTime::parse_from_rfc3339(text)
                .map(|dt| Data::DateTime(dt.with_timezone(&Utc)))
                .map_err(|e| Error::conversion(binding, format!("'{}': {}", text, e)))
        }
        BindingType::BoundingBox => {
            let text = utf8(binding, bytes)?;
            serde_json::from_str::<BoundingBox>(text)
                .map(Data::BoundingBox)
                .map_err(|e| Error::conversion(binding, e))
        }
        BindingType::Xml | BindingType::QuakeMl | BindingType::Nrml | BindingType::Shakemap => {
            let text = utf8(binding, bytes)?;
            canonical_xml(text, binding.is_validated_xml())
                .map_err(|reason| Error::conversion(binding, reason))?;
            Ok(match binding {
                BindingType::QuakeMl => Data::QuakeMl(text.to_string()),
                BindingType::Nrml => Data::Nrml(text.to_string()),
                BindingType::Shakemap => Data::Shakemap(text.to_string()),
                _ => Data::Xml(text.to_string()),
            })
        }
        BindingType::Json => serde_json::from_slice(bytes)
            .map(Data::Json)
            .map_err(|e| Error::conversion(binding, e)),
        BindingType::GeoJson => {
            let value: serde_json::Value =
                serde_json::from_slice(bytes).map_err(|e| Error::conversion(binding, e))?;
            check_geojson(&value).map_err(|reason| Error::conversion(binding, reason))?;
            Ok(Data::GeoJson(value))
        }
        BindingType::GeoTiff => {
            if !is_tiff(bytes) {
                return Err(Error::conversion(binding, "missing TIFF header"));
            }
            Ok(Data::GeoTiff(bytes.to_vec()))
        }
        BindingType::Shapefile => {
            if bytes.is_empty() {
                return Err(Error::conversion(binding, "empty .shp file"));
            }
            Ok(Data::Shapefile(Shapefile::new(bytes.to_vec())))
        }
        BindingType::File => Ok(Data::File(bytes.to_vec())),
    }
}

/// Serializes a value to its canonical bytes.
///
/// Shapefiles serialize to their `.shp` part; use [`to_files`] for all parts.
pub fn to_bytes(data: &Data) -> Result<Vec<u8>> {
    let binding = data.binding_type();
    match data {
        Data::String(s) => Ok(s.as_bytes().to_vec()),
        Data::Int(_) | Data::Double(_) | Data::Boolean(_) | Data::DateTime(_) => Ok(data
            .literal_text()
            .unwrap_or_default()
            .into_bytes()),
        Data::BoundingBox(bbox) => {
            serde_json::to_vec(bbox).map_err(|e| Error::conversion(binding, e))
        }
        Data::Xml(s) | Data::QuakeMl(s) | Data::Nrml(s) | Data::Shakemap(s) => {
            canonical_xml(s, binding.is_validated_xml())
                .map(String::into_bytes)
                .map_err(|reason| Error::conversion(binding, reason))
        }
        Data::Json(value) | Data::GeoJson(value) => {
            serde_json::to_vec(value).map_err(|e| Error::conversion(binding, e))
        }
        Data::GeoTiff(bytes) | Data::File(bytes) => Ok(bytes.clone()),
        Data::Shapefile(shp) => shp
            .shp()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::conversion(binding, "shapefile without .shp part")),
    }
}

/// Serializes a value into the files written for a file delivered input.
///
/// Returns `(path, content)` pairs. A shapefile written to `x.shp` produces
/// `x.shp`, `x.shx`, `x.dbf` and `x.prj` for the sidecars it carries.
pub fn to_files(data: &Data, path: &str) -> Result<Vec<(String, Vec<u8>)>> {
    match data {
        Data::Shapefile(shp) => {
            if shp.shp().is_none() {
                return Err(Error::conversion(
                    BindingType::Shapefile,
                    "shapefile without .shp part",
                ));
            }
            Ok(shp
                .parts
                .iter()
                .map(|(ext, content)| (sidecar_path(path, ext), content.clone()))
                .collect())
        }
        other => Ok(vec![(path.to_string(), to_bytes(other)?)]),
    }
}

/// Collects the files of a file collected output into a value.
///
/// `read` returns the content of a path, or `None` when the file is absent.
pub fn from_files(
    binding: BindingType,
    path: &str,
    mut read: impl FnMut(&str) -> Option<Vec<u8>>,
) -> Result<Data> {
    if binding == BindingType::Shapefile {
        let mut shapefile = Shapefile::default();
        for ext in crate::constants::SHAPEFILE_EXTENSIONS {
            if let Some(content) = read(&sidecar_path(path, ext)) {
                shapefile.parts.insert(ext.to_string(), content);
            }
        }
        if shapefile.shp().is_none() {
            return Err(Error::conversion(binding, format!("file '{}' not found", path)));
        }
        return Ok(Data::Shapefile(shapefile));
    }
    let content =
        read(path).ok_or_else(|| Error::conversion(binding, format!("file '{}' not found", path)))?;
    from_bytes(binding, &content)
}

/// Paths a file collected output may occupy.
pub fn output_paths(binding: BindingType, path: &str) -> Vec<String> {
    if binding == BindingType::Shapefile {
        crate::constants::SHAPEFILE_EXTENSIONS
            .iter()
            .map(|ext| sidecar_path(path, ext))
            .collect()
    } else {
        vec![path.to_string()]
    }
}

/// Replaces a trailing `.shp` with the sidecar extension, or appends it.
pub fn sidecar_path(path: &str, extension: &str) -> String {
    match path.strip_suffix(".shp") {
        Some(stem) => format!("{}.{}", stem, extension),
        None if extension == "shp" => path.to_string(),
        None => format!("{}.{}", path, extension),
    }
}

// =============================================================================
// Command Line Rendering
// =============================================================================

/// Renders a value as argv tokens, preceded by the flag when one is set.
pub fn to_command_line(data: &Data, flag: Option<&str>) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    match data {
        Data::Boolean(value) => match flag {
            Some(flag) => {
                if *value {
                    tokens.push(flag.to_string());
                }
            }
            None => tokens.push(value.to_string()),
        },
        Data::BoundingBox(bbox) => {
            tokens.extend(flag.map(str::to_string));
            let [lat_min, lon_min] = bbox.lower_corner;
            let [lat_max, lon_max] = bbox.upper_corner;
            for v in [lon_min, lon_max, lat_min, lat_max] {
                tokens.push(format!("{:?}", v));
            }
        }
        Data::GeoTiff(_) | Data::Shapefile(_) | Data::File(_) => {
            return Err(Error::conversion(
                data.binding_type(),
                "binary content can only be passed as a file path",
            ));
        }
        other => {
            tokens.extend(flag.map(str::to_string));
            let text = match other.literal_text() {
                Some(text) => text,
                None => String::from_utf8(to_bytes(other)?)
                    .map_err(|e| Error::conversion(other.binding_type(), e))?,
            };
            tokens.push(text);
        }
    }
    Ok(tokens)
}

/// Renders a path argument, preceded by the flag when one is set.
pub fn path_to_command_line(path: &str, flag: Option<&str>) -> Vec<String> {
    let mut tokens: Vec<String> = flag.map(str::to_string).into_iter().collect();
    tokens.push(path.to_string());
    tokens
}

/// Renders a datetime in UTC with millisecond precision.
pub fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// =============================================================================
// XML
// =============================================================================

/// Root element facts used by schema validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlRoot {
    /// Qualified element name as written.
    pub name: String,
    /// Namespace the root element's prefix resolves to.
    pub namespace: Option<String>,
    /// Value of an `xsi:schemaLocation` style attribute.
    pub schema_location: Option<String>,
}

/// Re-serializes XML into its canonical form.
pub fn canonical_xml(text: &str, normalize_numbers: bool) -> std::result::Result<String, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    let mut writer = Writer::new(Vec::new());
    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        let event = reader.read_event().map_err(|e| e.to_string())?;
        match event {
            Event::Start(start) => {
                if depth == 0 && seen_root {
                    return Err("more than one root element".to_string());
                }
                let (_, elem) = canonical_start(&start, normalize_numbers)?;
                writer.write_event(Event::Start(elem)).map_err(|e| e.to_string())?;
                depth += 1;
                seen_root = true;
            }
            Event::Empty(start) => {
                if depth == 0 && seen_root {
                    return Err("more than one root element".to_string());
                }
                let (name, elem) = canonical_start(&start, normalize_numbers)?;
                writer.write_event(Event::Start(elem)).map_err(|e| e.to_string())?;
                writer
                    .write_event(Event::End(BytesEnd::new(name)))
                    .map_err(|e| e.to_string())?;
                seen_root = true;
            }
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                writer
                    .write_event(Event::End(BytesEnd::new(name)))
                    .map_err(|e| e.to_string())?;
                depth = depth.saturating_sub(1);
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| e.to_string())?;
                write_text(&mut writer, &text, depth, normalize_numbers)?;
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                write_text(&mut writer, &text, depth, normalize_numbers)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err("no root element".to_string());
    }
    if depth != 0 {
        return Err("unclosed element".to_string());
    }
    String::from_utf8(writer.into_inner()).map_err(|e| e.to_string())
}

/// Reads the root element of an XML document.
pub fn xml_root(text: &str) -> std::result::Result<XmlRoot, String> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);
    loop {
        match reader.read_event().map_err(|e| e.to_string())? {
            Event::Start(start) | Event::Empty(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let ns_attr = match name.split_once(':') {
                    Some((prefix, _)) => format!("xmlns:{}", prefix),
                    None => "xmlns".to_string(),
                };
                let mut namespace = None;
                let mut schema_location = None;
                for attr in start.attributes() {
                    let attr = attr.map_err(|e| e.to_string())?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr.unescape_value().map_err(|e| e.to_string())?;
                    if key == ns_attr {
                        namespace = Some(value.into_owned());
                    } else if key == "schemaLocation" || key.ends_with(":schemaLocation") {
                        schema_location = Some(value.into_owned());
                    }
                }
                return Ok(XmlRoot {
                    name,
                    namespace,
                    schema_location,
                });
            }
            Event::Eof => return Err("no root element".to_string()),
            _ => {}
        }
    }
}

fn canonical_start(
    start: &BytesStart<'_>,
    normalize_numbers: bool,
) -> std::result::Result<(String, BytesStart<'static>), String> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| e.to_string())?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value().map_err(|e| e.to_string())?.into_owned();
        let value = if normalize_numbers {
            normalize_number(&value)
        } else {
            value
        };
        attributes.push((key, value));
    }
    attributes.sort();

    let mut elem = BytesStart::new(name.clone());
    for (key, value) in &attributes {
        elem.push_attribute((key.as_str(), value.as_str()));
    }
    Ok((name, elem))
}

fn write_text(
    writer: &mut Writer<Vec<u8>>,
    text: &str,
    depth: usize,
    normalize_numbers: bool,
) -> std::result::Result<(), String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(());
    }
    if depth == 0 {
        return Err("text outside of the root element".to_string());
    }
    let text = if normalize_numbers {
        normalize_number(text)
    } else {
        text.to_string()
    };
    writer
        .write_event(Event::Text(BytesText::new(&text)))
        .map_err(|e| e.to_string())
}

/// Rewrites a decimal literal without trailing fractional zeros, a `+` sign
/// or exponent padding. Integers and any other text stay verbatim, so ids
/// such as `9007199254740993` or codes such as `007` are never rewritten.
fn normalize_number(text: &str) -> String {
    decimal_literal(text).unwrap_or_else(|| text.to_string())
}

/// Normalized digits of a literal with a `.` or an exponent, else `None`.
fn decimal_literal(text: &str) -> Option<String> {
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    let (sign, unsigned) = split_sign(text)?;
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(at) => (&unsigned[..at], Some(&unsigned[at + 1..])),
        None => (unsigned, None),
    };
    let (integer, fraction) = match mantissa.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (mantissa, None),
    };
    if fraction.is_none() && exponent.is_none() {
        return None;
    }
    if !all_digits(integer) || (integer.len() > 1 && integer.starts_with('0')) {
        return None;
    }

    let mut out = format!("{}{}", sign, integer);
    if let Some(fraction) = fraction {
        if !fraction.is_empty() && !all_digits(fraction) {
            return None;
        }
        let fraction = fraction.trim_end_matches('0');
        out.push('.');
        out.push_str(if fraction.is_empty() { "0" } else { fraction });
    }
    if let Some(exponent) = exponent {
        let (exponent_sign, digits) = split_sign(exponent)?;
        if !all_digits(digits) {
            return None;
        }
        match digits.trim_start_matches('0') {
            "" => out.push_str("e0"),
            digits => {
                out.push('e');
                out.push_str(exponent_sign);
                out.push_str(digits);
            }
        }
    }
    Some(out)
}

/// Splits a leading sign off; `+` is dropped.
fn split_sign(text: &str) -> Option<(&'static str, &str)> {
    match text.as_bytes().first()? {
        b'-' => Some(("-", &text[1..])),
        b'+' => Some(("", &text[1..])),
        _ => Some(("", text)),
    }
}

// =============================================================================
// Other formats
// =============================================================================

const GEOJSON_TYPES: [&str; 9] = [
    "FeatureCollection",
    "Feature",
    "Point",
    "MultiPoint",
    "LineString",
    "MultiLineString",
    "Polygon",
    "MultiPolygon",
    "GeometryCollection",
];

fn check_geojson(value: &serde_json::Value) -> std::result::Result<(), String> {
    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| "GeoJSON object without 'type'".to_string())?;
    if GEOJSON_TYPES.contains(&kind) {
        Ok(())
    } else {
        Err(format!("'{}' is not a GeoJSON type", kind))
    }
}

fn is_tiff(bytes: &[u8]) -> bool {
    bytes.starts_with(b"II*\0") || bytes.starts_with(b"MM\0*")
}

fn utf8(binding: BindingType, bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| Error::conversion(binding, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_xml_ignores_layout() {
        let a = "<?xml version=\"1.0\"?>\n<a  y=\"2\" x=\"1\">\n  <b>text</b>\n  <!-- note -->\n  <c/>\n</a>";
        let b = "<a x=\"1\" y=\"2\"><b> text </b><c></c></a>";
        assert_eq!(canonical_xml(a, false).unwrap(), canonical_xml(b, false).unwrap());
    }

    #[test]
    fn test_canonical_xml_keeps_content() {
        let a = canonical_xml("<a><b>1</b></a>", false).unwrap();
        let b = canonical_xml("<a><b>2</b></a>", false).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_number_normalisation_only_when_validated() {
        let a = "<m><value>8.50</value></m>";
        let b = "<m><value>8.5</value></m>";
        assert_eq!(canonical_xml(a, true).unwrap(), canonical_xml(b, true).unwrap());
        assert_ne!(canonical_xml(a, false).unwrap(), canonical_xml(b, false).unwrap());
    }

    #[test]
    fn test_number_normalisation_is_exact() {
        assert_eq!(normalize_number("8.50"), "8.5");
        assert_eq!(normalize_number("+1.250E+03"), "1.25e3");
        assert_eq!(normalize_number("-0.10"), "-0.1");
        assert_eq!(normalize_number("4.000"), "4.0");
        assert_eq!(normalize_number("2e-05"), "2e-5");
        assert_eq!(normalize_number("3.0e00"), "3.0e0");

        // Integers, leading zeros and non-numbers are left alone.
        assert_eq!(normalize_number("9007199254740993"), "9007199254740993");
        assert_eq!(normalize_number("007"), "007");
        assert_eq!(normalize_number("00.5"), "00.5");
        assert_eq!(normalize_number("+7"), "+7");
        assert_eq!(normalize_number("1.2.3"), "1.2.3");
        assert_eq!(normalize_number("e5"), "e5");
        assert_eq!(normalize_number("-"), "-");
        assert_eq!(normalize_number("123456789012345678901.50"), "123456789012345678901.5");
    }

    #[test]
    fn test_distinct_numbers_stay_distinct() {
        let doc = |id: &str, code: &str| {
            canonical_xml(
                &format!("<event publicID=\"{}\"><code>{}</code></event>", id, code),
                true,
            )
            .unwrap()
        };
        assert_ne!(doc("9007199254740993", "7"), doc("9007199254740992", "7"));
        assert_ne!(doc("1", "007"), doc("1", "7"));
        assert_ne!(doc("1", "0.30000000000000004"), doc("1", "0.3"));
    }

    #[test]
    fn test_malformed_xml_rejected() {
        assert!(canonical_xml("<a><b></a>", false).is_err());
        assert!(canonical_xml("", false).is_err());
        assert!(canonical_xml("<a/><b/>", false).is_err());
    }

    #[test]
    fn test_xml_root_namespace() {
        let root = xml_root(
            "<q:quakeml xmlns=\"http://quakeml.org/xmlns/bed/1.2\" \
             xmlns:q=\"http://quakeml.org/xmlns/quakeml/1.2\"><eventParameters/></q:quakeml>",
        )
        .unwrap();
        assert_eq!(root.name, "q:quakeml");
        assert_eq!(
            root.namespace.as_deref(),
            Some("http://quakeml.org/xmlns/quakeml/1.2")
        );
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(sidecar_path("out.shp", "dbf"), "out.dbf");
        assert_eq!(sidecar_path("out.shp", "shp"), "out.shp");
        assert_eq!(sidecar_path("out", "prj"), "out.prj");
        assert_eq!(sidecar_path("out", "shp"), "out");
    }

    #[test]
    fn test_command_line_bbox_order() {
        let bbox = Data::BoundingBox(BoundingBox::new([-33.0, -71.5], [-32.0, -70.5]));
        let tokens = to_command_line(&bbox, None).unwrap();
        assert_eq!(tokens, vec!["-71.5", "-70.5", "-33.0", "-32.0"]);
    }

    #[test]
    fn test_command_line_boolean_flag() {
        assert_eq!(
            to_command_line(&Data::Boolean(true), Some("--verbose")).unwrap(),
            vec!["--verbose"]
        );
        assert!(to_command_line(&Data::Boolean(false), Some("--verbose"))
            .unwrap()
            .is_empty());
        assert_eq!(to_command_line(&Data::Boolean(false), None).unwrap(), vec!["false"]);
    }

    #[test]
    fn test_command_line_literals() {
        assert_eq!(
            to_command_line(&Data::Int(3), Some("--times")).unwrap(),
            vec!["--times", "3"]
        );
        assert_eq!(to_command_line(&Data::Double(6.0), None).unwrap(), vec!["6.0"]);
        assert!(to_command_line(&Data::File(vec![1]), None).is_err());
    }

    #[test]
    fn test_from_bytes_literals() {
        assert_eq!(from_bytes(BindingType::Int, b" 42\n").unwrap(), Data::Int(42));
        assert!(matches!(
            from_bytes(BindingType::Int, b"4.2"),
            Err(Error::Conversion { .. })
        ));
        assert_eq!(
            from_bytes(BindingType::Boolean, b"true").unwrap(),
            Data::Boolean(true)
        );
    }

    #[test]
    fn test_geojson_and_geotiff_checks() {
        assert!(from_bytes(BindingType::GeoJson, br#"{"type":"FeatureCollection","features":[]}"#).is_ok());
        assert!(from_bytes(BindingType::GeoJson, br#"{"type":"Banana"}"#).is_err());
        assert!(from_bytes(BindingType::GeoTiff, b"II*\0rest").is_ok());
        assert!(from_bytes(BindingType::GeoTiff, b"PNG").is_err());
    }

    #[test]
    fn test_shapefile_files_round_trip() {
        let shp = Data::Shapefile(
            Shapefile::new(b"shp".to_vec())
                .with_part("dbf", b"dbf".to_vec())
                .with_part("shx", b"shx".to_vec()),
        );
        let files = to_files(&shp, "in.shp").unwrap();
        let paths: Vec<_> = files.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["in.dbf", "in.shp", "in.shx"]);

        let lookup: std::collections::HashMap<_, _> = files.into_iter().collect();
        let read = from_files(BindingType::Shapefile, "in.shp", |p| lookup.get(p).cloned()).unwrap();
        assert_eq!(read, shp);
    }
}
