//! Parsers for the XML documents the service returns: capabilities,
//! hit counts, and OWS exception reports.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::WfsError;

/// The parts of a `WFS_Capabilities` document the client uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `CountDefault` constraint of the `GetFeature` operation.
    pub count_default: Option<u64>,
    /// EPSG code of the layer's `DefaultCRS`.
    pub default_crs: Option<u32>,
}

#[derive(Debug)]
struct Element {
    local: String,
    name_attr: Option<String>,
}

fn element(e: &BytesStart<'_>) -> Element {
    let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
    let name_attr = e
        .attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == b"name")
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
    Element { local, name_attr }
}

fn xml_error(e: &quick_xml::Error) -> WfsError {
    WfsError::unavailable(format!("Malformed XML response: {e}"))
}

/// Parses a `GetCapabilities` response.
///
/// `layer` selects the `FeatureType` whose `DefaultCRS` is reported; it
/// matches either the bare name or a `workspace:name` qualified one.
///
/// # Errors
///
/// Returns [`WfsError::ServiceUnavailable`] if the document is not well
/// formed or is an exception report.
pub fn parse_capabilities(xml: &str, layer: &str) -> Result<Capabilities, WfsError> {
    if let Some(message) = exception_message(xml.as_bytes()) {
        return Err(WfsError::unavailable(message));
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut caps = Capabilities::default();
    let mut feature_name: Option<String> = None;
    let mut feature_crs: Option<u32> = None;

    loop {
        match reader.read_event().map_err(|e| xml_error(&e))? {
            Event::Start(e) => {
                let el = element(&e);
                if el.local == "FeatureType" {
                    feature_name = None;
                    feature_crs = None;
                }
                stack.push(el);
            }
            Event::End(_) => {
                let closed = stack.pop();
                let is_layer = closed.is_some_and(|el| el.local == "FeatureType")
                    && feature_name
                        .as_deref()
                        .is_some_and(|n| layer_matches(n, layer));
                if is_layer && caps.default_crs.is_none() {
                    caps.default_crs = feature_crs;
                }
            }
            Event::Text(t) => {
                let text = t.unescape().map_err(|e| xml_error(&e))?;
                let text = text.trim();
                match stack.as_slice() {
                    [.., op, constraint, value]
                        if value.local == "DefaultValue"
                            && constraint.local == "Constraint"
                            && constraint.name_attr.as_deref() == Some("CountDefault")
                            && op.local == "Operation"
                            && op.name_attr.as_deref() == Some("GetFeature") =>
                    {
                        caps.count_default = text.parse().ok();
                    }
                    [.., parent, leaf] if parent.local == "FeatureType" => match leaf.local.as_str()
                    {
                        "Name" => feature_name = Some(text.to_string()),
                        "DefaultCRS" | "DefaultSRS" => feature_crs = epsg_code(text),
                        _ => {}
                    },
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(caps)
}

fn layer_matches(advertised: &str, layer: &str) -> bool {
    advertised == layer
        || advertised
            .rsplit_once(':')
            .is_some_and(|(_, bare)| bare == layer)
}

/// Extracts the EPSG code from a CRS identifier such as `EPSG:4674`,
/// `urn:ogc:def:crs:EPSG::4674`, or
/// `http://www.opengis.net/def/crs/EPSG/0/4674`.
#[must_use]
pub fn epsg_code(crs: &str) -> Option<u32> {
    let crs = crs.trim();
    if !crs.to_ascii_uppercase().contains("EPSG") {
        return None;
    }
    crs.rsplit(|c: char| !c.is_ascii_digit())
        .next()
        .filter(|digits| !digits.is_empty())
        .and_then(|digits| digits.parse().ok())
}

/// Parses a `resultType=hits` response and returns `numberMatched`.
///
/// # Errors
///
/// Returns [`WfsError::ServiceUnavailable`] if the response is an exception
/// report, is not a `FeatureCollection`, or has no numeric
/// `numberMatched`.
pub fn parse_number_matched(xml: &str) -> Result<u64, WfsError> {
    if let Some(message) = exception_message(xml.as_bytes()) {
        return Err(WfsError::unavailable(message));
    }

    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event().map_err(|e| xml_error(&e))? {
            Event::Start(e) | Event::Empty(e) => {
                if e.local_name().as_ref() != b"FeatureCollection" {
                    return Err(WfsError::unavailable(format!(
                        "Expected FeatureCollection, got {}",
                        String::from_utf8_lossy(e.local_name().as_ref())
                    )));
                }
                let raw = e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.local_name().as_ref() == b"numberMatched")
                    .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
                    .ok_or_else(|| WfsError::unavailable("FeatureCollection has no numberMatched"))?;
                return raw.trim().parse().map_err(|_| {
                    WfsError::unavailable(format!("numberMatched is not a count: {raw}"))
                });
            }
            Event::Eof => {
                return Err(WfsError::unavailable("Empty response to hits query"));
            }
            _ => {}
        }
    }
}

/// If `body` is an OWS exception report, returns its message.
///
/// Archives (which start with the `PK` zip signature) and anything that is
/// not XML yield `None`.
#[must_use]
pub fn exception_message(body: &[u8]) -> Option<String> {
    if body.starts_with(b"PK") {
        return None;
    }
    let text = std::str::from_utf8(body).ok()?;
    if !text.trim_start().starts_with('<') {
        return None;
    }

    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut in_report = false;
    let mut capture = false;
    let mut messages: Vec<String> = Vec::new();

    loop {
        match reader.read_event().ok()? {
            Event::Start(e) => {
                let local = e.local_name();
                match local.as_ref() {
                    b"ExceptionReport" | b"ServiceExceptionReport" => in_report = true,
                    b"ExceptionText" | b"ServiceException" if in_report => capture = true,
                    _ if !in_report => return None,
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if !in_report {
                    let local = e.local_name();
                    return matches!(
                        local.as_ref(),
                        b"ExceptionReport" | b"ServiceExceptionReport"
                    )
                    .then(|| "Service returned an empty exception report".to_string());
                }
            }
            Event::Text(t) if capture => {
                if let Ok(msg) = t.unescape() {
                    messages.push(msg.trim().to_string());
                }
            }
            Event::End(_) => capture = false,
            Event::Eof => break,
            _ => {}
        }
    }

    in_report.then(|| {
        if messages.is_empty() {
            "Service returned an exception report".to_string()
        } else {
            messages.join("; ")
        }
    })
}
