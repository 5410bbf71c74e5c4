//! Response building (RFC 8010 §3.4).

use crate::model::{tag, VERSION_MAJOR, VERSION_MINOR};

/// Incremental builder for a binary IPP response.
///
/// The header carries version 1.1, the given status code and the echoed
/// request id. Every response starts with an operation-attributes group
/// holding `attributes-charset` and `attributes-natural-language`
/// (RFC 2911 §3.1.4.2), which [`ResponseBuilder::new`] writes up front.
pub struct ResponseBuilder {
    buf: Vec<u8>,
}

impl ResponseBuilder {
    pub fn new(status: u16, request_id: u32) -> Self {
        let mut buf = Vec::with_capacity(256);
        buf.push(VERSION_MAJOR);
        buf.push(VERSION_MINOR);
        buf.extend_from_slice(&status.to_be_bytes());
        buf.extend_from_slice(&request_id.to_be_bytes());

        let mut builder = Self { buf };
        builder
            .begin_group(tag::OPERATION_ATTRIBUTES)
            .charset("attributes-charset", "utf-8")
            .natural_language("attributes-natural-language", "en");
        builder
    }

    pub fn begin_group(&mut self, delimiter: u8) -> &mut Self {
        self.buf.push(delimiter);
        self
    }

    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(tag::TEXT, name, value.as_bytes())
    }

    pub fn name(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(tag::NAME, name, value.as_bytes())
    }

    pub fn keyword(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(tag::KEYWORD, name, value.as_bytes())
    }

    /// Additional value for a 1setOf keyword; name-length is zero
    /// (RFC 8010 §3.1.4).
    pub fn keyword_additional(&mut self, value: &str) -> &mut Self {
        self.attr(tag::KEYWORD, "", value.as_bytes())
    }

    pub fn uri(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(tag::URI, name, value.as_bytes())
    }

    pub fn charset(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(tag::CHARSET, name, value.as_bytes())
    }

    pub fn natural_language(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(tag::NATURAL_LANGUAGE, name, value.as_bytes())
    }

    pub fn mime_media_type(&mut self, name: &str, value: &str) -> &mut Self {
        self.attr(tag::MIME_MEDIA_TYPE, name, value.as_bytes())
    }

    pub fn integer(&mut self, name: &str, value: i32) -> &mut Self {
        self.attr(tag::INTEGER, name, &value.to_be_bytes())
    }

    pub fn enumeration(&mut self, name: &str, value: i32) -> &mut Self {
        self.attr(tag::ENUM, name, &value.to_be_bytes())
    }

    /// Additional value for a 1setOf enum.
    pub fn enumeration_additional(&mut self, value: i32) -> &mut Self {
        self.attr(tag::ENUM, "", &value.to_be_bytes())
    }

    pub fn boolean(&mut self, name: &str, value: bool) -> &mut Self {
        self.attr(tag::BOOLEAN, name, &[u8::from(value)])
    }

    fn attr(&mut self, value_tag: u8, name: &str, value: &[u8]) -> &mut Self {
        self.buf.push(value_tag);
        self.buf
            .extend_from_slice(&(name.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(name.as_bytes());
        self.buf
            .extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(value);
        self
    }

    /// Terminate the attribute section and return the encoded message.
    pub fn build(mut self) -> Vec<u8> {
        self.buf.push(tag::END_OF_ATTRIBUTES);
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::status;
    use crate::parser::Request;

    #[test]
    fn response_header_echoes_status_and_request_id() {
        let bytes = ResponseBuilder::new(status::OK, 0xdead_beef).build();

        assert_eq!(&bytes[..2], &[1, 1]);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), status::OK);
        assert_eq!(
            u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            0xdead_beef
        );
        assert_eq!(*bytes.last().unwrap(), tag::END_OF_ATTRIBUTES);
    }

    #[test]
    fn built_response_parses_back() {
        let mut resp = ResponseBuilder::new(status::OK, 11);
        resp.begin_group(tag::PRINTER_ATTRIBUTES)
            .name("printer-name", "decoy")
            .enumeration("printer-state", 3)
            .boolean("printer-is-accepting-jobs", true)
            .keyword("compression-supported", "none");
        let bytes = resp.build();

        // responses share the request wire layout, reuse the parser
        let parsed = Request::parse(&bytes).unwrap();
        assert_eq!(parsed.request_id, 11);

        let printer = parsed
            .groups
            .iter()
            .find(|g| g.delimiter == tag::PRINTER_ATTRIBUTES)
            .unwrap();
        assert_eq!(printer.get_str("printer-name"), Some("decoy"));
        assert_eq!(printer.get_i32("printer-state"), Some(3));
        assert_eq!(printer.get("printer-is-accepting-jobs").unwrap().value, [1]);
    }

    #[test]
    fn additional_values_have_empty_names() {
        let mut resp = ResponseBuilder::new(status::OK, 1);
        resp.begin_group(tag::PRINTER_ATTRIBUTES)
            .keyword("document-format-supported", "application/pdf")
            .keyword_additional("image/jpeg");
        let bytes = resp.build();

        let parsed = Request::parse(&bytes).unwrap();
        let printer = parsed
            .groups
            .iter()
            .find(|g| g.delimiter == tag::PRINTER_ATTRIBUTES)
            .unwrap();
        let extra = printer.attributes.iter().find(|a| a.name.is_empty()).unwrap();
        assert_eq!(extra.as_str(), Some("image/jpeg"));
    }
}
