//! Document text-extraction collaborator.
//!
//! Real OCR never shipped in this system; the extractor returns a
//! simulated salary-slip rendition for supported MIME types so the
//! document-upload flow can be exercised end to end. A production
//! deployment replaces this with a real OCR/text-extraction backend.

use std::path::Path;

use lendcore_core::storage::DocumentExtractor;
use lendcore_types::error::AgentError;

const SIMULATED_SALARY_SLIP: &str = "\
SALARY SLIP
Employee Name: John Doe
Employee ID: EMP001
Company: ABC Technologies Pvt Ltd
Pay Period: March 2024

Basic Salary: Rs. 50,000.00
HRA: Rs. 20,000.00
Special Allowance: Rs. 10,000.00
Gross Salary: Rs. 80,000.00

PF Deduction: Rs. 6,000.00
Tax Deduction: Rs. 8,000.00
Total Deductions: Rs. 14,000.00

Net Salary: Rs. 66,000.00
";

/// Stand-in extractor returning canned text.
#[derive(Debug, Default)]
pub struct SimulatedDocumentExtractor;

impl DocumentExtractor for SimulatedDocumentExtractor {
    async fn extract_text(&self, path: &Path, mime_type: &str) -> Result<String, AgentError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(AgentError::Storage(format!(
                "document not found: {}",
                path.display()
            )));
        }

        match mime_type {
            "application/pdf" => {
                tracing::info!(path = %path.display(), "simulating PDF text extraction");
                Ok(SIMULATED_SALARY_SLIP.to_string())
            }
            t if t.starts_with("image/") => {
                tracing::info!(path = %path.display(), "simulating image OCR");
                Ok(SIMULATED_SALARY_SLIP.to_string())
            }
            other => {
                tracing::warn!(mime_type = other, "unsupported file type for text extraction");
                Ok(String::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_pdf_extraction_returns_salary_text() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("slip.pdf");
        tokio::fs::write(&path, b"%PDF-1.4").await.unwrap();

        let extractor = SimulatedDocumentExtractor;
        let text = extractor
            .extract_text(&path, "application/pdf")
            .await
            .unwrap();
        assert!(text.contains("SALARY SLIP"));
        assert!(text.contains("Net Salary"));
    }

    #[tokio::test]
    async fn test_unsupported_type_yields_empty_text() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let extractor = SimulatedDocumentExtractor;
        let text = extractor.extract_text(&path, "text/plain").await.unwrap();
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let extractor = SimulatedDocumentExtractor;
        let err = extractor
            .extract_text(Path::new("/nowhere/slip.pdf"), "application/pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Storage(_)));
    }
}
