//! Minimal RFC 4180 writer for exports.
//!
//! Cells beginning with `=`, `+`, `-` or `@` are prefixed with `'` so
//! spreadsheet applications do not evaluate them as formulas.

use axum::{
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
};

pub struct CsvWriter {
    buffer: String,
}

impl CsvWriter {
    pub fn new(headers: &[&str]) -> Self {
        let mut writer = Self {
            buffer: String::new(),
        };
        writer.write_row(headers.iter().copied());
        writer
    }

    pub fn write_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for (i, cell) in cells.into_iter().enumerate() {
            if i > 0 {
                self.buffer.push(',');
            }
            push_cell(&mut self.buffer, cell.as_ref());
        }
        self.buffer.push_str("\r\n");
    }

    pub fn finish(self) -> String {
        self.buffer
    }
}

fn push_cell(out: &mut String, value: &str) {
    let guarded = matches!(value.chars().next(), Some('=' | '+' | '-' | '@'));
    let needs_quotes = value.contains([',', '"', '\r', '\n']);

    if needs_quotes {
        out.push('"');
    }
    if guarded {
        out.push('\'');
    }
    for c in value.chars() {
        if c == '"' {
            out.push('"');
        }
        out.push(c);
    }
    if needs_quotes {
        out.push('"');
    }
}

/// `text/csv` attachment response.
pub struct CsvResponse {
    pub filename: String,
    pub body: String,
}

impl IntoResponse for CsvResponse {
    fn into_response(self) -> Response {
        let disposition = format!("attachment; filename=\"{}\"", self.filename.replace('"', ""));
        let disposition = HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
        (
            [
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/csv; charset=utf-8"),
                ),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            self.body,
        )
            .into_response()
    }
}

pub fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(cells: &[&str]) -> String {
        let mut out = String::new();
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            push_cell(&mut out, cell);
        }
        out
    }

    #[test]
    fn plain_cells_are_unquoted() {
        assert_eq!(render(&["IRB-1", "Sleep study"]), "IRB-1,Sleep study");
    }

    #[test]
    fn quotes_commas_quotes_and_newlines() {
        assert_eq!(render(&["a,b"]), "\"a,b\"");
        assert_eq!(render(&["say \"hi\""]), "\"say \"\"hi\"\"\"");
        assert_eq!(render(&["line1\nline2"]), "\"line1\nline2\"");
        assert_eq!(render(&["cr\r"]), "\"cr\r\"");
    }

    #[test]
    fn formula_cells_are_neutralised() {
        assert_eq!(render(&["=SUM(A1:A2)"]), "'=SUM(A1:A2)");
        assert_eq!(render(&["+1"]), "'+1");
        assert_eq!(render(&["-2"]), "'-2");
        assert_eq!(render(&["@cmd"]), "'@cmd");
        assert_eq!(render(&["=HYPERLINK(\"x\",\"y\")"]), "\"'=HYPERLINK(\"\"x\"\",\"\"y\"\")\"");
        assert_eq!(render(&["a=b"]), "a=b");
    }

    #[test]
    fn writer_emits_header_and_crlf() {
        let mut writer = CsvWriter::new(&["id", "title"]);
        writer.write_row(["1", "x"]);
        assert_eq!(writer.finish(), "id,title\r\n1,x\r\n");
    }

    #[test]
    fn response_sets_attachment_headers() {
        let response = CsvResponse {
            filename: "studies.csv".to_string(),
            body: "a\r\n".to_string(),
        }
        .into_response();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"studies.csv\""
        );
    }
}
