use lopdf::Document;

pub const EXTRACTION_FAILED_TEXT: &str = "Text extraction failed";

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPdf {
    pub text: String,
    pub pages: i32,
}

/// Pulls plain text out of every page. Unreadable documents yield the
/// placeholder text and zero pages instead of an error.
pub fn extract_text(bytes: &[u8]) -> ExtractedPdf {
    let document = match Document::load_mem(bytes) {
        Ok(document) => document,
        Err(e) => {
            tracing::warn!("PDF parsing failed: {}", e);
            return ExtractedPdf {
                text: EXTRACTION_FAILED_TEXT.to_string(),
                pages: 0,
            };
        }
    };

    let page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
    let text = page_numbers
        .iter()
        .map(|page| document.extract_text(&[*page]).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n");

    ExtractedPdf {
        text,
        pages: page_numbers.len() as i32,
    }
}

/// Runs extraction on the blocking pool
pub async fn extract_text_blocking(bytes: Vec<u8>) -> ExtractedPdf {
    match tokio::task::spawn_blocking(move || extract_text(&bytes)).await {
        Ok(extracted) => extracted,
        Err(e) => {
            tracing::error!("PDF extraction task failed: {}", e);
            ExtractedPdf {
                text: EXTRACTION_FAILED_TEXT.to_string(),
                pages: 0,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::export_service::render_text_pdf;

    #[test]
    fn garbage_input_falls_back() {
        let extracted = extract_text(b"definitely not a pdf");
        assert_eq!(extracted.text, EXTRACTION_FAILED_TEXT);
        assert_eq!(extracted.pages, 0);
    }

    #[tokio::test]
    async fn counts_pages_of_rendered_document() {
        let pdf = render_text_pdf("Attention Is All You Need", &["An abstract".to_string()]).unwrap();
        let extracted = extract_text_blocking(pdf).await;
        assert_eq!(extracted.pages, 1);
        assert_ne!(extracted.text, EXTRACTION_FAILED_TEXT);
    }
}
