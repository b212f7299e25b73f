//! Sanction-letter rendering collaborator.
//!
//! Writes the letter document under the uploads directory and hands back
//! the download link the chat surface embeds. The document itself is a
//! formatted text rendition; swapping in a real PDF engine only changes
//! this file.

use std::path::PathBuf;

use chrono::{Datelike, Duration, Utc};
use uuid::Uuid;

use lendcore_core::storage::{LetterRenderer, RenderedLetter};
use lendcore_types::customer::CustomerProfile;
use lendcore_types::error::AgentError;
use lendcore_types::loan::LoanApplication;

/// Days the sanction offer stays valid.
const OFFER_VALIDITY_DAYS: i64 = 30;

/// File-writing implementation of [`LetterRenderer`].
pub struct FileLetterRenderer {
    output_dir: PathBuf,
}

impl FileLetterRenderer {
    pub fn new(uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: uploads_dir.into().join("sanction_letters"),
        }
    }

    fn letter_body(
        sanction_number: &str,
        application: &LoanApplication,
        customer: &CustomerProfile,
    ) -> String {
        let now = Utc::now();
        let valid_until = now + Duration::days(OFFER_VALIDITY_DAYS);
        let total_payable = application.emi * application.tenure as f64;
        let total_interest = total_payable - application.requested_amount;

        format!(
            "PERSONAL LOAN SANCTION LETTER\n\
             =============================\n\n\
             Sanction Number: {sanction_number}\n\
             Date: {date}\n\n\
             Dear {name},\n\n\
             We are pleased to inform you that your personal loan application has been approved\n\
             on the following terms:\n\n\
             Sanctioned Amount : Rs. {amount:.2}\n\
             Tenure            : {tenure} months\n\
             Interest Rate     : {rate:.2}% per annum\n\
             Monthly EMI       : Rs. {emi:.2}\n\
             Total Interest    : Rs. {total_interest:.2}\n\
             Total Payable     : Rs. {total_payable:.2}\n\n\
             Borrower Details:\n\
             Name    : {name}\n\
             Address : {address}\n\
             Phone   : {phone}\n\n\
             This sanction is valid until {valid_until} and is subject to the execution of\n\
             the loan agreement and our standard terms and conditions.\n\n\
             We thank you for choosing us for your financial needs.\n\n\
             Sincerely,\n\
             Lending Operations Team\n",
            date = now.format("%d %B %Y"),
            name = customer.name,
            amount = application.requested_amount,
            tenure = application.tenure,
            rate = application.interest_rate,
            emi = application.emi,
            address = customer.address,
            phone = customer.phone,
            valid_until = valid_until.format("%d %B %Y"),
        )
    }
}

impl LetterRenderer for FileLetterRenderer {
    async fn render(
        &self,
        application: &LoanApplication,
        customer: &CustomerProfile,
    ) -> Result<RenderedLetter, AgentError> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;

        let sanction_number = format!(
            "PL/{}/{}",
            Utc::now().year(),
            &Uuid::new_v4().simple().to_string()[..8].to_uppercase()
        );
        let filename = format!(
            "sanction_letter_{}_{}.pdf",
            sanction_number.replace('/', "_"),
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let path = self.output_dir.join(&filename);

        let body = Self::letter_body(&sanction_number, application, customer);
        tokio::fs::write(&path, body.as_bytes())
            .await
            .map_err(|e| AgentError::Storage(e.to_string()))?;

        let file_size = tokio::fs::metadata(&path)
            .await
            .map(|m| m.len())
            .unwrap_or(body.len() as u64);

        tracing::info!(%sanction_number, filename, "rendered sanction letter");
        Ok(RenderedLetter {
            path,
            download_link: format!("/api/documents/download/sanction-letter/{filename}"),
            filename,
            file_size,
        })
    }
}
