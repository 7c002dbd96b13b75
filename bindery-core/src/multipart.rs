//! `multipart/form-data` parsing.
//!
//! Parses a fully read body into text fields and uploaded files. Structural
//! problems with the stream are reported as [`MultipartError::Malformed`] so
//! callers can treat them leniently; everything else (no boundary in the
//! content type, exceeded limits) is a hard failure.

use crate::http::UploadedFile;
use memchr::memmem;
use thiserror::Error;

const CRLF: &[u8] = b"\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MultipartError {
    #[error("missing boundary in Content-Type")]
    MissingBoundary,

    #[error("malformed multipart stream: {0}")]
    Malformed(String),

    #[error("file in part '{name}' exceeds the {limit}-byte limit")]
    FileTooLarge { name: String, limit: usize },

    #[error("multipart body has more than {0} parts")]
    TooManyParts(usize),
}

impl MultipartError {
    /// Whether the stream itself is corrupt, as opposed to a policy failure.
    pub fn is_malformed(&self) -> bool {
        matches!(self, MultipartError::Malformed(_))
    }
}

/// Size limits applied while parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartLimits {
    /// Largest accepted file part, in bytes.
    pub max_file_size: usize,
    /// Largest accepted number of parts.
    pub max_parts: usize,
}

impl Default for MultipartLimits {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_parts: 256,
        }
    }
}

/// Parsed multipart body.
#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    fields: Vec<(String, String)>,
    files: Vec<UploadedFile>,
}

impl MultipartForm {
    /// All text values sent under `name`.
    pub fn field_values(&self, name: &str) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// First file sent under `name`.
    pub fn file(&self, name: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|f| f.field_name == name)
    }

    /// Every file sent under `name`.
    pub fn files(&self, name: &str) -> Vec<UploadedFile> {
        self.files
            .iter()
            .filter(|f| f.field_name == name)
            .cloned()
            .collect()
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

/// Multipart form data parser
#[derive(Debug, Clone)]
pub struct MultipartParser {
    boundary: String,
    limits: MultipartLimits,
}

impl MultipartParser {
    /// Build a parser from a `Content-Type` header value.
    pub fn from_content_type(content_type: &str, limits: MultipartLimits) -> Result<Self, MultipartError> {
        let boundary = content_type
            .split(';')
            .skip(1)
            .find_map(|part| {
                let (key, value) = part.trim().split_once('=')?;
                key.trim()
                    .eq_ignore_ascii_case("boundary")
                    .then(|| value.trim().trim_matches('"').to_string())
            })
            .filter(|b| !b.is_empty())
            .ok_or(MultipartError::MissingBoundary)?;

        Ok(Self { boundary, limits })
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn parse(&self, body: &[u8]) -> Result<MultipartForm, MultipartError> {
        let mut form = MultipartForm::default();
        self.parse_into(body, &mut form)?;
        Ok(form)
    }

    /// Parse as far as possible, returning the parts read before any failure.
    pub fn parse_partial(&self, body: &[u8]) -> (MultipartForm, Option<MultipartError>) {
        let mut form = MultipartForm::default();
        let error = self.parse_into(body, &mut form).err();
        (form, error)
    }

    fn parse_into(&self, body: &[u8], form: &mut MultipartForm) -> Result<(), MultipartError> {
        let delimiter = format!("--{}", self.boundary);
        let delimiter = delimiter.as_bytes();
        let mut closing = CRLF.to_vec();
        closing.extend_from_slice(delimiter);

        let mut pos = memmem::find(body, delimiter)
            .ok_or_else(|| MultipartError::Malformed("no opening boundary".into()))?
            + delimiter.len();
        let mut parts = 0usize;

        loop {
            let rest = &body[pos..];
            if rest.starts_with(b"--") {
                return Ok(());
            }
            if !rest.starts_with(CRLF) {
                return Err(MultipartError::Malformed("boundary not followed by CRLF".into()));
            }
            pos += CRLF.len();

            let (headers, content_start) = if body[pos..].starts_with(CRLF) {
                ("", pos + CRLF.len())
            } else {
                let end = memmem::find(&body[pos..], HEADER_END)
                    .ok_or_else(|| MultipartError::Malformed("unterminated part headers".into()))?;
                let headers = std::str::from_utf8(&body[pos..pos + end])
                    .map_err(|_| MultipartError::Malformed("part headers are not UTF-8".into()))?;
                (headers, pos + end + HEADER_END.len())
            };

            let content_len = memmem::find(&body[content_start..], &closing)
                .ok_or_else(|| MultipartError::Malformed("missing closing boundary".into()))?;
            let content = &body[content_start..content_start + content_len];
            pos = content_start + content_len + closing.len();

            parts += 1;
            if parts > self.limits.max_parts {
                return Err(MultipartError::TooManyParts(self.limits.max_parts));
            }

            let part = PartHeaders::parse(headers)?;
            match part.filename {
                Some(filename) => {
                    if content.len() > self.limits.max_file_size {
                        return Err(MultipartError::FileTooLarge {
                            name: part.name,
                            limit: self.limits.max_file_size,
                        });
                    }
                    form.files.push(UploadedFile::new(
                        part.name,
                        filename,
                        part.content_type
                            .unwrap_or_else(|| "application/octet-stream".to_string()),
                        content.to_vec(),
                    ));
                }
                None => form
                    .fields
                    .push((part.name, String::from_utf8_lossy(content).into_owned())),
            }
        }
    }
}

struct PartHeaders {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
}

impl PartHeaders {
    fn parse(headers: &str) -> Result<Self, MultipartError> {
        let mut name = None;
        let mut filename = None;
        let mut content_type = None;

        for line in headers.split("\r\n") {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.eq_ignore_ascii_case("content-disposition") {
                for attr in value.split(';').skip(1) {
                    if let Some((k, v)) = attr.trim().split_once('=') {
                        let v = v.trim().trim_matches('"').to_string();
                        match k.trim().to_ascii_lowercase().as_str() {
                            "name" => name = Some(v),
                            "filename" => filename = Some(v),
                            _ => {}
                        }
                    }
                }
            } else if key.eq_ignore_ascii_case("content-type") {
                content_type = Some(value.trim().to_string());
            }
        }

        let name = name.ok_or_else(|| MultipartError::Malformed("part without a name".into()))?;
        Ok(Self {
            name,
            filename,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CT: &str = "multipart/form-data; boundary=XyZ";

    fn body() -> Vec<u8> {
        [
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n\r\n",
            "Hello\r\nWorld\r\n",
            "--XyZ\r\n",
            "Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "file body\r\n",
            "--XyZ--\r\n",
        ]
        .concat()
        .into_bytes()
    }

    #[test]
    fn test_boundary_from_content_type() {
        let parser = MultipartParser::from_content_type(
            "multipart/form-data; boundary=\"----WebKitFormBoundary7MA4YWxkTrZu0gW\"",
            MultipartLimits::default(),
        )
        .unwrap();
        assert_eq!(parser.boundary(), "----WebKitFormBoundary7MA4YWxkTrZu0gW");
    }

    #[test]
    fn test_missing_boundary() {
        let err = MultipartParser::from_content_type("multipart/form-data", MultipartLimits::default())
            .unwrap_err();
        assert_eq!(err, MultipartError::MissingBoundary);
        assert!(!err.is_malformed());
    }

    #[test]
    fn test_parse_fields_and_files() {
        let parser = MultipartParser::from_content_type(CT, MultipartLimits::default()).unwrap();
        let form = parser.parse(&body()).unwrap();
        assert_eq!(form.field_values("title"), vec!["Hello\r\nWorld"]);
        let file = form.file("doc").unwrap();
        assert_eq!(file.filename, "a.txt");
        assert_eq!(file.content_type, "text/plain");
        assert_eq!(&file.data[..], b"file body");
        assert_eq!(form.field_count(), 1);
        assert_eq!(form.file_count(), 1);
    }

    #[test]
    fn test_truncated_stream_is_malformed() {
        let parser = MultipartParser::from_content_type(CT, MultipartLimits::default()).unwrap();
        let mut truncated = body();
        truncated.truncate(60);
        assert!(parser.parse(&truncated).unwrap_err().is_malformed());
        assert!(parser.parse(b"no boundary here").unwrap_err().is_malformed());
    }

    #[test]
    fn test_partial_parse_keeps_earlier_parts() {
        let parser = MultipartParser::from_content_type(CT, MultipartLimits::default()).unwrap();
        let mut broken = body();
        broken.truncate(broken.len() - 20);
        let (form, error) = parser.parse_partial(&broken);
        assert!(error.unwrap().is_malformed());
        assert_eq!(form.field_values("title"), vec!["Hello\r\nWorld"]);
        assert!(form.file("doc").is_none());
    }

    #[test]
    fn test_limits() {
        let small = MultipartLimits {
            max_file_size: 4,
            max_parts: 10,
        };
        let parser = MultipartParser::from_content_type(CT, small).unwrap();
        assert_eq!(
            parser.parse(&body()).unwrap_err(),
            MultipartError::FileTooLarge {
                name: "doc".into(),
                limit: 4
            }
        );

        let one_part = MultipartLimits {
            max_file_size: 1024,
            max_parts: 1,
        };
        let parser = MultipartParser::from_content_type(CT, one_part).unwrap();
        assert_eq!(parser.parse(&body()).unwrap_err(), MultipartError::TooManyParts(1));
    }
}
