//! Sanction-letter worker: letter generation, download links, and
//! customer notification.

use std::sync::Arc;

use serde_json::{Value, json};

use lendcore_types::conversation::{AgentKind, AgentTask, ConversationContext, TaskKind};
use lendcore_types::error::AgentError;
use lendcore_types::loan::{LoanApplication, LoanStatus};

use crate::storage::LetterRenderer;

use super::sales::profile_from_value;
use super::{Agent, AgentState, shared_value};

/// Sanction-letter generation worker.
pub struct SanctionAgent<R>
where
    R: LetterRenderer,
{
    state: AgentState,
    renderer: Arc<R>,
}

impl<R> SanctionAgent<R>
where
    R: LetterRenderer,
{
    pub fn new(renderer: Arc<R>) -> Self {
        Self {
            state: AgentState::new(AgentKind::Sanction),
            renderer,
        }
    }

    /// Render the letter for an approved application and record the link
    /// on the context.
    async fn generate_letter(
        &mut self,
        task: &AgentTask,
        ctx: &mut ConversationContext,
    ) -> Result<Value, AgentError> {
        let profile_value = shared_value(ctx, AgentKind::Sanction, "customer_profile")
            .or_else(|| task.input.get("customer_profile").cloned())
            .unwrap_or(json!({}));
        let customer = profile_from_value(&profile_value, ctx.customer_id.as_deref());

        let approved = shared_value(ctx, AgentKind::Sanction, "approved_loan")
            .or_else(|| task.input.get("approved_loan").cloned())
            .ok_or_else(|| AgentError::MissingContextData("approved_loan".to_string()))?;

        let amount = approved
            .get("amount")
            .and_then(Value::as_f64)
            .ok_or_else(|| AgentError::MissingInput("approved_loan.amount".to_string()))?;
        let tenure = approved.get("tenure").and_then(Value::as_u64).unwrap_or(60) as u32;
        let interest_rate = approved
            .get("interest_rate")
            .and_then(Value::as_f64)
            .unwrap_or(12.0);
        let emi = approved.get("emi").and_then(Value::as_f64).unwrap_or(0.0);

        let mut application = LoanApplication::new(
            format!("app_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]),
            customer.id.clone(),
            amount,
            tenure,
            interest_rate,
            emi,
        );
        application.approve();

        let letter = self.renderer.render(&application, &customer).await?;

        ctx.add_collected_data("sanction_letter_generated", json!(true));
        ctx.add_collected_data(
            "sanction_letter",
            json!({
                "filename": letter.filename,
                "download_link": letter.download_link,
                "file_size": letter.file_size,
            }),
        );

        Ok(json!({
            "letter_generated": true,
            "filename": letter.filename,
            "download_link": letter.download_link,
            "file_size": letter.file_size,
            "loan": {
                "amount": amount,
                "tenure": tenure,
                "interest_rate": interest_rate,
                "emi": emi,
            },
            "customer_name": customer.name,
            "message": approval_message(&customer.name, amount, emi, tenure, interest_rate),
        }))
    }

    /// Produce the download link for an already-generated letter.
    fn create_download_link(&self, ctx: &ConversationContext) -> Result<Value, AgentError> {
        let letter = ctx
            .data_value("sanction_letter")
            .ok_or_else(|| AgentError::MissingContextData("sanction_letter".to_string()))?;
        Ok(json!({
            "download_link": letter.get("download_link").cloned().unwrap_or(Value::Null),
            "filename": letter.get("filename").cloned().unwrap_or(Value::Null),
            "link_created": true,
        }))
    }

    /// Write a customer notification onto the context.
    fn notify_customer(&self, task: &AgentTask, ctx: &mut ConversationContext) -> Value {
        let message = task
            .input
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Your sanction letter is ready for download.")
            .to_string();

        ctx.add_collected_data(
            "customer_notification",
            json!({
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "type": "sanction_letter_ready",
            }),
        );

        json!({"customer_notified": true, "message": message})
    }
}

impl<R> Agent for SanctionAgent<R>
where
    R: LetterRenderer,
{
    fn state(&self) -> &AgentState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    fn can_execute(&self, kind: TaskKind) -> bool {
        matches!(
            kind,
            TaskKind::DocumentGeneration
                | TaskKind::GenerateSanctionLetter
                | TaskKind::CreateDownloadLink
                | TaskKind::NotifyCustomer
        )
    }

    async fn execute_logic(
        &mut self,
        task: &AgentTask,
        ctx: &mut ConversationContext,
    ) -> Result<Value, AgentError> {
        match task.kind {
            TaskKind::DocumentGeneration | TaskKind::GenerateSanctionLetter => {
                self.generate_letter(task, ctx).await
            }
            TaskKind::CreateDownloadLink => self.create_download_link(ctx),
            TaskKind::NotifyCustomer => Ok(self.notify_customer(task, ctx)),
            other => Err(AgentError::UnsupportedTask {
                agent: self.kind().to_string(),
                task: other.to_string(),
            }),
        }
    }
}

fn approval_message(name: &str, amount: f64, emi: f64, tenure: u32, rate: f64) -> String {
    format!(
        "Congratulations {name}! Your personal loan has been approved.\n\
         Approved amount: \u{20b9}{amount:.0}\n\
         Monthly EMI: \u{20b9}{emi:.0}\n\
         Tenure: {tenure} months\n\
         Interest rate: {rate}% per annum\n\
         Your sanction letter is ready for download."
    )
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    use lendcore_types::customer::CustomerProfile;

    use crate::storage::RenderedLetter;

    /// Renderer double that fabricates a letter without touching disk.
    #[derive(Default)]
    pub struct StubRenderer {
        pub fail: bool,
    }

    impl LetterRenderer for StubRenderer {
        async fn render(
            &self,
            application: &LoanApplication,
            _customer: &CustomerProfile,
        ) -> Result<RenderedLetter, AgentError> {
            if self.fail {
                return Err(AgentError::Storage("disk full".to_string()));
            }
            let filename = format!("sanction_letter_{}.pdf", application.id);
            Ok(RenderedLetter {
                path: PathBuf::from(format!("/tmp/{filename}")),
                download_link: format!("/api/documents/download/sanction-letter/{filename}"),
                filename,
                file_size: 2048,
            })
        }
    }

    fn context_with_approval() -> ConversationContext {
        let mut ctx = ConversationContext::new("sess_1", Some("CUST001".to_string()));
        ctx.add_collected_data("customer_profile", json!({"name": "Ajay Kumar"}));
        ctx.add_collected_data(
            "approved_loan",
            json!({"amount": 300000.0, "tenure": 60, "interest_rate": 12.0, "emi": 6673.0}),
        );
        ctx
    }

    #[tokio::test]
    async fn test_generate_letter_updates_context() {
        let mut agent = SanctionAgent::new(Arc::new(StubRenderer::default()));
        let mut ctx = context_with_approval();
        let task = AgentTask::new(TaskKind::GenerateSanctionLetter, json!({}));

        let result = agent.execute_logic(&task, &mut ctx).await.unwrap();
        assert_eq!(result["letter_generated"], json!(true));
        let link = result["download_link"].as_str().unwrap();
        assert!(link.starts_with("/api/documents/download/sanction-letter/"));
        assert_eq!(ctx.data_value("sanction_letter_generated"), Some(&json!(true)));
        assert!(result["message"].as_str().unwrap().contains("Ajay Kumar"));
    }

    #[tokio::test]
    async fn test_generate_letter_without_approval_fails() {
        let mut agent = SanctionAgent::new(Arc::new(StubRenderer::default()));
        let mut ctx = ConversationContext::new("sess_1", None);
        let task = AgentTask::new(TaskKind::GenerateSanctionLetter, json!({}));

        let err = agent.execute_logic(&task, &mut ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::MissingContextData(_)));
    }

    #[tokio::test]
    async fn test_download_link_requires_generated_letter() {
        let mut agent = SanctionAgent::new(Arc::new(StubRenderer::default()));
        let mut ctx = context_with_approval();

        let link_task = AgentTask::new(TaskKind::CreateDownloadLink, json!({}));
        assert!(agent.execute_logic(&link_task, &mut ctx).await.is_err());

        let generate = AgentTask::new(TaskKind::GenerateSanctionLetter, json!({}));
        agent.execute_logic(&generate, &mut ctx).await.unwrap();

        let result = agent.execute_logic(&link_task, &mut ctx).await.unwrap();
        assert_eq!(result["link_created"], json!(true));
    }

    #[tokio::test]
    async fn test_notify_customer_writes_context_key() {
        let mut agent = SanctionAgent::new(Arc::new(StubRenderer::default()));
        let mut ctx = context_with_approval();
        let task = AgentTask::new(
            TaskKind::NotifyCustomer,
            json!({"message": "Letter on its way"}),
        );

        let result = agent.execute_logic(&task, &mut ctx).await.unwrap();
        assert_eq!(result["customer_notified"], json!(true));
        let notification = ctx.data_value("customer_notification").unwrap();
        assert_eq!(notification["message"], json!("Letter on its way"));
    }

    #[tokio::test]
    async fn test_renderer_failure_propagates() {
        let mut agent = SanctionAgent::new(Arc::new(StubRenderer { fail: true }));
        let mut ctx = context_with_approval();
        let task = AgentTask::new(TaskKind::GenerateSanctionLetter, json!({}));

        let err = agent.execute_logic(&task, &mut ctx).await.unwrap_err();
        assert!(matches!(err, AgentError::Storage(_)));
    }
}
