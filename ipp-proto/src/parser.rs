//! Request parsing: header, ordered attribute groups, trailing document
//! data (RFC 8010 §3.1).

use thiserror::Error;

use crate::model::tag;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("ipp message too short: {0} bytes (minimum 8)")]
    TooShort(usize),
    #[error("truncated {0}")]
    Truncated(&'static str),
}

/// A single attribute as it appeared on the wire. An empty name marks an
/// additional value of the preceding 1setOf attribute.
#[derive(Debug, Clone)]
pub struct Attribute {
    pub tag: u8,
    pub name: String,
    pub value: Vec<u8>,
}

impl Attribute {
    /// Value as UTF-8, `None` if not valid text.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    /// Value as a big-endian i32 (integer and enum encodings).
    pub fn as_i32(&self) -> Option<i32> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(i32::from_be_bytes(bytes))
    }
}

/// One delimiter-tagged group of attributes, in wire order.
#[derive(Debug, Clone)]
pub struct AttributeGroup {
    pub delimiter: u8,
    pub attributes: Vec<Attribute>,
}

impl AttributeGroup {
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Attribute::as_str)
    }

    pub fn get_i32(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(Attribute::as_i32)
    }
}

/// A parsed IPP request.
#[derive(Debug)]
pub struct Request {
    pub version_major: u8,
    pub version_minor: u8,
    pub operation: u16,
    pub request_id: u32,
    pub groups: Vec<AttributeGroup>,
    /// Everything after the end-of-attributes tag.
    pub document_data: Vec<u8>,
}

impl Request {
    /// Parse a raw IPP message.
    ///
    /// Attributes encountered outside any group are malformed per the RFC
    /// and are discarded; truncation anywhere is an error.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        if data.len() < 8 {
            return Err(ParseError::TooShort(data.len()));
        }

        let version_major = data[0];
        let version_minor = data[1];
        let operation = u16::from_be_bytes([data[2], data[3]]);
        let request_id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

        let mut pos = 8;
        let mut groups: Vec<AttributeGroup> = Vec::new();
        let mut current: Option<AttributeGroup> = None;

        while pos < data.len() {
            let byte = data[pos];

            if byte <= 0x0f {
                if let Some(group) = current.take() {
                    groups.push(group);
                }
                if byte == tag::END_OF_ATTRIBUTES {
                    pos += 1;
                    break;
                }
                current = Some(AttributeGroup {
                    delimiter: byte,
                    attributes: Vec::new(),
                });
                pos += 1;
                continue;
            }

            let value_tag = byte;
            pos += 1;

            let name_len = read_u16(data, &mut pos, "name-length")? as usize;
            let name = read_bytes(data, &mut pos, name_len, "attribute name")?;
            let value_len = read_u16(data, &mut pos, "value-length")? as usize;
            let value = read_bytes(data, &mut pos, value_len, "attribute value")?;

            let attr = Attribute {
                tag: value_tag,
                name: String::from_utf8_lossy(name).into_owned(),
                value: value.to_vec(),
            };

            if let Some(group) = current.as_mut() {
                group.attributes.push(attr);
            }
        }

        if let Some(group) = current.take() {
            groups.push(group);
        }

        Ok(Request {
            version_major,
            version_minor,
            operation,
            request_id,
            groups,
            document_data: data[pos..].to_vec(),
        })
    }

    pub fn operation_attributes(&self) -> Option<&AttributeGroup> {
        self.groups
            .iter()
            .find(|g| g.delimiter == tag::OPERATION_ATTRIBUTES)
    }

    pub fn job_attributes(&self) -> Option<&AttributeGroup> {
        self.groups
            .iter()
            .find(|g| g.delimiter == tag::JOB_ATTRIBUTES)
    }
}

fn read_u16(data: &[u8], pos: &mut usize, what: &'static str) -> Result<u16, ParseError> {
    if *pos + 2 > data.len() {
        return Err(ParseError::Truncated(what));
    }
    let value = u16::from_be_bytes([data[*pos], data[*pos + 1]]);
    *pos += 2;
    Ok(value)
}

fn read_bytes<'a>(
    data: &'a [u8],
    pos: &mut usize,
    len: usize,
    what: &'static str,
) -> Result<&'a [u8], ParseError> {
    if *pos + len > data.len() {
        return Err(ParseError::Truncated(what));
    }
    let slice = &data[*pos..*pos + len];
    *pos += len;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{op, VERSION_MAJOR, VERSION_MINOR};

    fn write_attr(buf: &mut Vec<u8>, value_tag: u8, name: &str, value: &[u8]) {
        buf.push(value_tag);
        buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        buf.extend_from_slice(value);
    }

    fn request_bytes(
        operation: u16,
        request_id: u32,
        attrs: &[(u8, &str, &[u8])],
        document: &[u8],
    ) -> Vec<u8> {
        let mut buf = vec![VERSION_MAJOR, VERSION_MINOR];
        buf.extend_from_slice(&operation.to_be_bytes());
        buf.extend_from_slice(&request_id.to_be_bytes());
        buf.push(tag::OPERATION_ATTRIBUTES);
        write_attr(&mut buf, tag::CHARSET, "attributes-charset", b"utf-8");
        write_attr(
            &mut buf,
            tag::NATURAL_LANGUAGE,
            "attributes-natural-language",
            b"en",
        );
        for &(value_tag, name, value) in attrs {
            write_attr(&mut buf, value_tag, name, value);
        }
        buf.push(tag::END_OF_ATTRIBUTES);
        buf.extend_from_slice(document);
        buf
    }

    #[test]
    fn parses_header_and_operation_attributes() {
        let data = request_bytes(op::GET_PRINTER_ATTRIBUTES, 42, &[], &[]);
        let req = Request::parse(&data).unwrap();

        assert_eq!(req.version_major, 1);
        assert_eq!(req.version_minor, 1);
        assert_eq!(req.operation, op::GET_PRINTER_ATTRIBUTES);
        assert_eq!(req.request_id, 42);

        let op_attrs = req.operation_attributes().unwrap();
        assert_eq!(op_attrs.get_str("attributes-charset"), Some("utf-8"));
    }

    #[test]
    fn keeps_document_data_after_end_tag() {
        let doc = b"%PDF-1.7 fake document";
        let data = request_bytes(
            op::PRINT_JOB,
            7,
            &[(tag::NAME, "job-name", b"report")],
            doc,
        );
        let req = Request::parse(&data).unwrap();

        assert_eq!(req.operation_attributes().unwrap().get_str("job-name"), Some("report"));
        assert_eq!(req.document_data, doc);
    }

    #[test]
    fn reads_integers_from_job_attributes() {
        let mut data = request_bytes(op::CANCEL_JOB, 3, &[], &[]);
        // splice a job group in before the end tag
        let end = data.len() - 1;
        let mut tail = vec![tag::JOB_ATTRIBUTES];
        write_attr(&mut tail, tag::INTEGER, "job-id", &5i32.to_be_bytes());
        data.splice(end..end, tail);

        let req = Request::parse(&data).unwrap();
        assert_eq!(req.job_attributes().unwrap().get_i32("job-id"), Some(5));
    }

    #[test]
    fn rejects_short_input() {
        assert!(matches!(Request::parse(&[1, 1, 0]), Err(ParseError::TooShort(3))));
    }

    #[test]
    fn rejects_truncated_value() {
        let mut data = request_bytes(op::VALIDATE_JOB, 1, &[], &[]);
        data.truncate(data.len() - 4);
        // now the last attribute's value runs past the buffer
        assert!(matches!(Request::parse(&data), Err(ParseError::Truncated(_))));
    }

    #[test]
    fn discards_attribute_outside_any_group() {
        let mut buf = vec![VERSION_MAJOR, VERSION_MINOR];
        buf.extend_from_slice(&op::VALIDATE_JOB.to_be_bytes());
        buf.extend_from_slice(&9u32.to_be_bytes());
        // attribute with no preceding delimiter tag
        write_attr(&mut buf, tag::KEYWORD, "stray", b"value");
        buf.push(tag::END_OF_ATTRIBUTES);

        let req = Request::parse(&buf).unwrap();
        assert!(req.groups.is_empty());
    }
}
