//! Text lines of PDF recorder reports.

use crate::vendor::Container;
use crate::SpmError;

/// Extract text lines, whitespace-collapsed and with blank lines removed.
///
/// `Container::Text` input is taken to be text already extracted from the
/// PDF, one table row per line.
pub fn extract_lines(input: &[u8], container: Container) -> Result<Vec<String>, SpmError> {
    let text = match container {
        Container::Text => String::from_utf8_lossy(input).into_owned(),
        Container::Pdf => extract_pdf_text(input)?,
        other => {
            return Err(SpmError::UnsupportedFormat(format!(
                "{other:?} input does not carry report text"
            )))
        }
    };
    Ok(split_lines(&text))
}

fn split_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(feature = "pdf")]
fn extract_pdf_text(input: &[u8]) -> Result<String, SpmError> {
    pdf_extract::extract_text_from_mem(input)
        .map_err(|e| SpmError::Format(format!("failed to extract PDF text: {e}")))
}

#[cfg(not(feature = "pdf"))]
fn extract_pdf_text(_input: &[u8]) -> Result<String, SpmError> {
    Err(SpmError::UnsupportedFormat(
        "PDF support not compiled in; supply extracted text (.txt) instead".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_lines_are_collapsed() {
        let input = b"Header  line\n\n19-01-26   10:00:00\t1.200 45\r\n   \n";
        let lines = extract_lines(input, Container::Text).unwrap();
        assert_eq!(lines, vec!["Header line", "19-01-26 10:00:00 1.200 45"]);
    }

    #[test]
    fn csv_container_is_rejected() {
        assert!(matches!(
            extract_lines(b"a,b", Container::Csv),
            Err(SpmError::UnsupportedFormat(_))
        ));
    }
}
