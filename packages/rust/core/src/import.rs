//! Bulk import of collaborator output (crawler claims, demand signals,
//! answer samples, catalog and audience) for one tenant.

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use trustline_shared::{
    Actor, ExtractedClaim, NewAnswerSample, NewAudienceMember, NewQuestion, NewReceipt, Product,
    ReceiptKind, Result, Tenant, TrustlineError,
};
use trustline_storage::Storage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantSpec {
    pub domain: String,
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Import file layout (`trustline import <file.json>`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantImport {
    pub tenant: TenantSpec,
    #[serde(default)]
    pub claims: Vec<ExtractedClaim>,
    #[serde(default)]
    pub questions: Vec<NewQuestion>,
    #[serde(default)]
    pub answer_samples: Vec<NewAnswerSample>,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub audience: Vec<NewAudienceMember>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub tenant: Tenant,
    pub claims: usize,
    pub questions: usize,
    pub answer_samples: usize,
    pub products: usize,
    pub audience: usize,
}

impl TenantImport {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TrustlineError::validation(format!("invalid import file: {e}")))
    }
}

/// Upsert everything in `import`. Re-importing the same file is idempotent
/// apart from answer samples, which are appended.
#[instrument(skip_all, fields(domain = %import.tenant.domain))]
pub async fn import_tenant(storage: &Storage, import: &TenantImport) -> Result<ImportSummary> {
    if import.tenant.domain.trim().is_empty() {
        return Err(TrustlineError::validation("tenant domain must not be empty"));
    }
    let tenant = storage
        .upsert_tenant(
            import.tenant.domain.trim(),
            &import.tenant.name,
            &import.tenant.keywords,
        )
        .await?;

    let claims = storage.ingest_claims(&tenant.id, &import.claims).await?;
    for question in &import.questions {
        storage.upsert_question(&tenant.id, question).await?;
    }
    for sample in &import.answer_samples {
        storage.add_answer_sample(&tenant.id, sample).await?;
    }
    for product in &import.products {
        storage.upsert_product(&tenant.id, product).await?;
    }
    for member in &import.audience {
        storage.upsert_audience_member(&tenant.id, member).await?;
    }

    let summary = ImportSummary {
        tenant,
        claims: claims.len(),
        questions: import.questions.len(),
        answer_samples: import.answer_samples.len(),
        products: import.products.len(),
        audience: import.audience.len(),
    };
    info!(
        claims = summary.claims,
        questions = summary.questions,
        products = summary.products,
        audience = summary.audience,
        "tenant import complete"
    );

    storage
        .append_receipt(
            &summary.tenant.id,
            NewReceipt::new(
                ReceiptKind::Read,
                Actor::Knowledge,
                format!(
                    "imported {} claims, {} questions",
                    summary.claims, summary.questions
                ),
            )
            .output(serde_json::json!({
                "claims": summary.claims,
                "questions": summary.questions,
                "answer_samples": summary.answer_samples,
                "products": summary.products,
                "audience": summary.audience,
            })),
        )
        .await?;

    Ok(summary)
}
