//! Streaming XMP projection.
//!
//! XMP packets are RDF/XML. Rather than building a DOM we walk the event
//! stream once, keeping a stack of open element names. Whenever non-blank
//! text appears, the stack joined with `/` is looked up in a static
//! [`PathTable`]; a hit stores the text under the table's field name.
//! Attributes are treated as one more (temporary) path segment, so
//! `<rdf:Description xmp:Rating="4">` and `<xmp:Rating>4</xmp:Rating>`
//! address the same path.
//!
//! Repeated values accumulate: first → scalar, second → two-element list,
//! later → appended, in encounter order.
//!
//! The parser is strict: mismatched or unclosed tags and malformed
//! attributes fail the whole packet with an [`XmpError`].

use crate::types::{FieldValue, Scalar};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::BTreeMap;
use thiserror::Error;

/// Literal markers delimiting the XMP packet inside a file.
pub const XMP_START: &str = "<x:xmpmeta";
pub const XMP_END: &str = "</x:xmpmeta>";

const SEPARATOR: &str = "/";

#[derive(Error, Debug)]
pub enum XmpError {
    #[error("malformed XMP: {0}")]
    Malformed(#[from] quick_xml::Error),
    #[error("malformed XMP attribute: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),
    #[error("unexpected closing tag </{0}>")]
    UnexpectedClose(String),
    #[error("unclosed element <{0}> at end of packet")]
    Unclosed(String),
}

/// How a matched raw string is converted before storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Text,
    /// Parsed as a number; unparsable input is kept as text.
    Number,
}

impl Conversion {
    fn apply(self, raw: &str) -> Scalar {
        match self {
            Conversion::Text => Scalar::Text(raw.to_string()),
            Conversion::Number => raw
                .parse::<f64>()
                .map(Scalar::Number)
                .unwrap_or_else(|_| Scalar::Text(raw.to_string())),
        }
    }
}

/// One entry of the path table.
#[derive(Debug, Clone, Copy)]
pub struct PathRule {
    pub path: &'static str,
    pub field: &'static str,
    pub conversion: Conversion,
}

const fn text(path: &'static str, field: &'static str) -> PathRule {
    PathRule {
        path,
        field,
        conversion: Conversion::Text,
    }
}

const fn number(path: &'static str, field: &'static str) -> PathRule {
    PathRule {
        path,
        field,
        conversion: Conversion::Number,
    }
}

/// Immutable path → field table.
#[derive(Debug, Clone, Copy)]
pub struct PathTable {
    rules: &'static [PathRule],
}

impl PathTable {
    pub const fn new(rules: &'static [PathRule]) -> Self {
        Self { rules }
    }

    pub fn lookup(&self, path: &str) -> Option<&PathRule> {
        self.rules.iter().find(|r| r.path == path)
    }
}

const XMP_RULES: &[PathRule] = &[
    text("x:xmpmeta/rdf:RDF/rdf:Description/dc:creator/rdf:Seq/rdf:li", "author"),
    text("x:xmpmeta/rdf:RDF/rdf:Description/dc:title/rdf:Alt/rdf:li", "title"),
    text("x:xmpmeta/rdf:RDF/rdf:Description/dc:rights/rdf:Alt/rdf:li", "copyright"),
    text("x:xmpmeta/rdf:RDF/rdf:Description/dc:description/rdf:Alt/rdf:li", "caption"),
    text("x:xmpmeta/rdf:RDF/rdf:Description/dc:subject/rdf:Bag/rdf:li", "tags"),
    text(
        "x:xmpmeta/rdf:RDF/rdf:Description/xmpRights:UsageTerms/rdf:Alt/rdf:li",
        "usageterms",
    ),
    text("x:xmpmeta/rdf:RDF/rdf:Description/xmp:CreateDate", "createdate"),
    number("x:xmpmeta/rdf:RDF/rdf:Description/xmp:Rating", "authorrating"),
    text("x:xmpmeta/rdf:RDF/rdf:Description/xmp:Label", "label"),
    text("x:xmpmeta/rdf:RDF/rdf:Description/photoshop:City", "city"),
    text("x:xmpmeta/rdf:RDF/rdf:Description/photoshop:State", "state"),
    text("x:xmpmeta/rdf:RDF/rdf:Description/photoshop:Country", "country"),
    text("x:xmpmeta/rdf:RDF/rdf:Description/Iptc4xmpCore:CountryCode", "countrycode"),
    text("x:xmpmeta/rdf:RDF/rdf:Description/crs:WhiteBalance", "wb"),
    number("x:xmpmeta/rdf:RDF/rdf:Description/crs:Temperature", "temperature"),
    text("x:xmpmeta/rdf:RDF/rdf:Description/crs:CameraProfile", "profile"),
    text(
        "x:xmpmeta/rdf:RDF/rdf:Description/Iptc4xmpCore:CreatorContactInfo/Iptc4xmpCore:CiEmailWork",
        "authoremail",
    ),
    text(
        "x:xmpmeta/rdf:RDF/rdf:Description/Iptc4xmpCore:CreatorContactInfo/Iptc4xmpCore:CiUrlWork",
        "authorsite",
    ),
];

/// The standard table used for Lightroom/Bridge style packets.
pub const XMP_PATHS: PathTable = PathTable::new(XMP_RULES);

/// Parser state: the open-element path and the projected fields.
#[derive(Debug)]
pub struct XmpProjector<'t> {
    table: &'t PathTable,
    path: Vec<String>,
    fields: BTreeMap<String, FieldValue>,
}

impl Default for XmpProjector<'static> {
    fn default() -> Self {
        Self::new(&XMP_PATHS)
    }
}

impl<'t> XmpProjector<'t> {
    pub fn new(table: &'t PathTable) -> Self {
        Self {
            table,
            path: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    /// Parse a complete packet and return the projected fields.
    pub fn project(mut self, xml: &str) -> Result<BTreeMap<String, FieldValue>, XmpError> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(false);
        reader.check_end_names(true);

        loop {
            match reader.read_event()? {
                Event::Start(e) => self.open(&e)?,
                Event::Empty(e) => {
                    self.open(&e)?;
                    self.close(&qualified(e.name().as_ref()))?;
                }
                Event::End(e) => self.close(&qualified(e.name().as_ref()))?,
                Event::Text(t) => {
                    let value = t.unescape()?;
                    self.text(&value);
                }
                Event::CData(c) => {
                    let value = String::from_utf8_lossy(&c.into_inner()).to_string();
                    self.text(&value);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = self.path.last() {
            return Err(XmpError::Unclosed(open.clone()));
        }
        Ok(self.fields)
    }

    fn open(&mut self, start: &BytesStart<'_>) -> Result<(), XmpError> {
        self.path.push(qualified(start.name().as_ref()));
        for attr in start.attributes().with_checks(true) {
            let attr = attr?;
            let value = attr.unescape_value()?;
            self.path.push(qualified(attr.key.as_ref()));
            self.text(&value);
            self.path.pop();
        }
        Ok(())
    }

    fn close(&mut self, name: &str) -> Result<(), XmpError> {
        match self.path.pop() {
            Some(open) if open == name => Ok(()),
            _ => Err(XmpError::UnexpectedClose(name.to_string())),
        }
    }

    fn text(&mut self, raw: &str) {
        let value = raw.trim();
        if value.is_empty() {
            return;
        }
        let joined = self.path.join(SEPARATOR);
        let Some(rule) = self.table.lookup(&joined) else {
            return;
        };
        let scalar = rule.conversion.apply(value);
        let next = match self.fields.remove(rule.field) {
            None => FieldValue::One(scalar),
            Some(existing) => existing.accumulate(scalar),
        };
        self.fields.insert(rule.field.to_string(), next);
    }
}

fn qualified(name: &[u8]) -> String {
    String::from_utf8_lossy(name).to_string()
}

/// Parse a packet with the standard table.
pub fn project_xmp(xml: &str) -> Result<BTreeMap<String, FieldValue>, XmpError> {
    XmpProjector::default().project(xml)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKET: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about=""
    xmlns:xmp="http://ns.adobe.com/xap/1.0/"
    xmlns:dc="http://purl.org/dc/elements/1.1/"
    xmlns:photoshop="http://ns.adobe.com/photoshop/1.0/"
    xmp:Rating="4"
    xmp:Label="Green"
    photoshop:City="Lyon">
   <dc:creator>
    <rdf:Seq>
     <rdf:li>Jane Roe</rdf:li>
    </rdf:Seq>
   </dc:creator>
   <dc:title>
    <rdf:Alt>
     <rdf:li xml:lang="x-default">Harbour at dusk</rdf:li>
    </rdf:Alt>
   </dc:title>
   <dc:subject>
    <rdf:Bag>
     <rdf:li>event</rdf:li>
     <rdf:li>night</rdf:li>
     <rdf:li>   </rdf:li>
     <rdf:li>harbour</rdf:li>
    </rdf:Bag>
   </dc:subject>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>"#;

    #[test]
    fn projects_attributes_and_elements() {
        let fields = project_xmp(PACKET).unwrap();
        assert_eq!(fields.get("authorrating"), Some(&FieldValue::from(4.0)));
        assert_eq!(fields.get("label"), Some(&FieldValue::from("Green")));
        assert_eq!(fields.get("city"), Some(&FieldValue::from("Lyon")));
        assert_eq!(fields.get("author"), Some(&FieldValue::from("Jane Roe")));
        assert_eq!(fields.get("title"), Some(&FieldValue::from("Harbour at dusk")));
    }

    #[test]
    fn repeated_values_accumulate_in_order_skipping_blanks() {
        let fields = project_xmp(PACKET).unwrap();
        assert_eq!(
            fields.get("tags"),
            Some(&FieldValue::Many(vec![
                Scalar::from("event"),
                Scalar::from("night"),
                Scalar::from("harbour"),
            ]))
        );
    }

    #[test]
    fn single_occurrence_stays_scalar() {
        let xml = r#"<x:xmpmeta><rdf:RDF><rdf:Description><dc:subject><rdf:Bag>
            <rdf:li>solo</rdf:li></rdf:Bag></dc:subject></rdf:Description></rdf:RDF></x:xmpmeta>"#;
        let fields = project_xmp(xml).unwrap();
        assert_eq!(fields.get("tags"), Some(&FieldValue::from("solo")));
    }

    #[test]
    fn second_occurrence_promotes_to_pair() {
        let xml = r#"<x:xmpmeta><rdf:RDF><rdf:Description><dc:subject><rdf:Bag>
            <rdf:li>a</rdf:li><rdf:li>b</rdf:li></rdf:Bag></dc:subject></rdf:Description></rdf:RDF></x:xmpmeta>"#;
        let fields = project_xmp(xml).unwrap();
        assert_eq!(
            fields.get("tags"),
            Some(&FieldValue::Many(vec![Scalar::from("a"), Scalar::from("b")]))
        );
    }

    #[test]
    fn unmatched_paths_are_ignored() {
        let xml = r#"<x:xmpmeta><rdf:RDF><rdf:Description tiff:Make="Fuji">
            <exif:Flash>yes</exif:Flash></rdf:Description></rdf:RDF></x:xmpmeta>"#;
        assert!(project_xmp(xml).unwrap().is_empty());
    }

    #[test]
    fn numeric_conversion_falls_back_to_text() {
        let xml = r#"<x:xmpmeta><rdf:RDF><rdf:Description xmp:Rating="n/a"/></rdf:RDF></x:xmpmeta>"#;
        let fields = project_xmp(xml).unwrap();
        assert_eq!(fields.get("authorrating"), Some(&FieldValue::from("n/a")));
    }

    #[test]
    fn self_closing_description_with_attributes() {
        let xml = r#"<x:xmpmeta><rdf:RDF><rdf:Description crs:Temperature="5200" crs:WhiteBalance="Custom"/></rdf:RDF></x:xmpmeta>"#;
        let fields = project_xmp(xml).unwrap();
        assert_eq!(fields.get("temperature"), Some(&FieldValue::from(5200.0)));
        assert_eq!(fields.get("wb"), Some(&FieldValue::from("Custom")));
    }

    #[test]
    fn escaped_text_is_unescaped() {
        let xml = r#"<x:xmpmeta><rdf:RDF><rdf:Description><dc:rights><rdf:Alt>
            <rdf:li>&#169; Jane &amp; Co</rdf:li></rdf:Alt></dc:rights></rdf:Description></rdf:RDF></x:xmpmeta>"#;
        let fields = project_xmp(xml).unwrap();
        assert_eq!(fields.get("copyright"), Some(&FieldValue::from("© Jane & Co")));
    }

    #[test]
    fn mismatched_close_is_an_error() {
        let xml = "<x:xmpmeta><rdf:RDF></rdf:Description></x:xmpmeta>";
        assert!(project_xmp(xml).is_err());
    }

    #[test]
    fn unclosed_element_is_an_error() {
        let xml = "<x:xmpmeta><rdf:RDF>";
        assert!(matches!(project_xmp(xml), Err(XmpError::Unclosed(_))));
    }

    #[test]
    fn custom_table_is_honoured() {
        const RULES: &[PathRule] = &[text("a/b", "bee")];
        const TABLE: PathTable = PathTable::new(RULES);
        let fields = XmpProjector::new(&TABLE).project("<a><b> x </b></a>").unwrap();
        assert_eq!(fields.get("bee"), Some(&FieldValue::from("x")));
    }
}
