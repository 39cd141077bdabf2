//! Shared types, error model, and configuration for Trustline.
//!
//! This crate is the foundation depended on by all other Trustline crates.
//! It provides:
//! - [`TrustlineError`]: the unified error type
//! - Domain types for the knowledge store, recommendations, drafts, content,
//!   receipts and growth campaigns
//! - Configuration ([`AppConfig`], config loading)

#[macro_use]
mod macros;

pub mod config;
pub mod content;
pub mod draft;
pub mod error;
pub mod growth;
pub mod receipt;
pub mod recommendation;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ClassifierConfig, DatabaseConfig, GrowthConfig, LlmConfig, OrchestratorConfig,
    PolicyConfig, PublishTargetConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, validate_api_key,
};
pub use content::{Asset, AssetStatus, AssetVersion, PatchStatus, ProductPatch};
pub use draft::{
    BlogContent, BlogSection, Citation, Draft, DraftContent, DraftOrigin, FaqContent,
    ProductContent, TruthBlockContent, TruthFact, extract_markers, marker, marker_label,
};
pub use error::{Result, TrustlineError};
pub use growth::{
    AudienceMember, Campaign, CampaignStatus, NewAudienceMember, ReferralRule, SegmentSnapshot,
    SendReceipt, SendStatus, Sentiment, SuppressionReason,
};
pub use receipt::{Actor, NewReceipt, Receipt, ReceiptKind};
pub use recommendation::{
    Action, ProposedRecommendation, Recommendation, RecommendationStatus, stable_slug,
};
pub use types::{
    AnswerSample, Claim, Evidence, ExtractedClaim, Gap, GapKind, NewAnswerSample, NewClaim,
    NewEvidence, NewNeed, NewQuestion, Need, Product, Question, QuestionState, Surface, Taxonomy,
    Tenant, TrustBreakdown, TrustSnapshot, VerifiedClaim, new_id,
};
