//! Domain logic for Trustline.
//!
//! This crate ties the knowledge store, trust policy, recommendation
//! classifier, draft generator, publish pipeline and growth engine together
//! behind the [`orchestrator`] and the [`service::TrustlineService`] facade.

pub mod classifier;
pub mod draft;
pub mod gate;
pub mod growth;
pub mod import;
pub mod knowledge;
pub mod llm;
pub mod orchestrator;
pub mod policy;
pub mod publish;
pub mod service;

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};
    use serde_json::Value;
    use trustline_shared::{
        ExtractedClaim, NewAnswerSample, NewAudienceMember, NewClaim, NewEvidence, NewNeed,
        NewQuestion, Product, Question, Sentiment, Surface, Taxonomy, Tenant,
    };
    use trustline_storage::Storage;
    use uuid::Uuid;

    use crate::import::{TenantImport, TenantSpec, import_tenant};

    pub const RETURNS_QUESTION: &str = "How long do I have to return a linen shirt?";
    pub const SHIPPING_QUESTION: &str = "How fast is shipping?";
    pub const GIFT_QUESTION: &str = "Do you offer gift wrapping on shirts?";
    pub const PRODUCT_QUESTION: &str = "Is the linen shirt good for hot weather?";

    pub async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("tl_core_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn claim(key: &str, value: &str, url: &str) -> ExtractedClaim {
        ExtractedClaim {
            claim: NewClaim {
                key: key.into(),
                value: value.into(),
                confidence: 90,
                freshness_at: Some(Utc::now() - Duration::days(5)),
                scope: "site".into(),
            },
            evidence: vec![NewEvidence {
                url: url.into(),
                snippet: Some(value.into()),
            }],
        }
    }

    fn needs(keys: &[&str]) -> Vec<NewNeed> {
        keys.iter()
            .map(|k| NewNeed {
                claim_key: (*k).into(),
                required: true,
            })
            .collect()
    }

    fn member(address: &str, rating: Option<u8>, sentiment: Option<Sentiment>) -> NewAudienceMember {
        NewAudienceMember {
            address: address.into(),
            rating,
            sentiment,
            referred: false,
            attributes: Value::Null,
        }
    }

    /// A small apparel shop: two answerable questions, one with a missing
    /// fact, one low-impact question and one product question.
    pub fn fixture_import() -> TenantImport {
        TenantImport {
            tenant: TenantSpec {
                domain: "shop.example.com".into(),
                name: "Example Shop".into(),
                keywords: vec!["linen".into(), "shirt".into(), "shipping".into()],
            },
            claims: vec![
                claim("returns_window", "30 days", "https://shop.example.com/returns"),
                claim("shipping_time", "2-4 business days", "https://shop.example.com/shipping"),
                claim("materials", "100% European linen", "https://shop.example.com/linen-shirt"),
                claim("care", "Machine wash cold", "https://shop.example.com/care"),
            ],
            questions: vec![
                NewQuestion {
                    taxonomy: Taxonomy::Returns,
                    text: RETURNS_QUESTION.into(),
                    impact_score: 80,
                    recommended_surface: Surface::Faq,
                    product_handle: None,
                    needs: needs(&["returns_window", "restocking_fee"]),
                },
                NewQuestion {
                    taxonomy: Taxonomy::Shipping,
                    text: SHIPPING_QUESTION.into(),
                    impact_score: 75,
                    recommended_surface: Surface::Faq,
                    product_handle: None,
                    needs: needs(&["shipping_time"]),
                },
                NewQuestion {
                    taxonomy: Taxonomy::Policy,
                    text: GIFT_QUESTION.into(),
                    impact_score: 40,
                    recommended_surface: Surface::Faq,
                    product_handle: None,
                    needs: needs(&["gift_wrap"]),
                },
                NewQuestion {
                    taxonomy: Taxonomy::Product,
                    text: PRODUCT_QUESTION.into(),
                    impact_score: 70,
                    recommended_surface: Surface::Product,
                    product_handle: None,
                    needs: needs(&["materials"]),
                },
            ],
            answer_samples: vec![NewAnswerSample {
                question_text: SHIPPING_QUESTION.into(),
                answer: "Shipping usually takes a few days.".into(),
                hedging_score: 20,
                unverifiable: false,
            }],
            products: vec![Product {
                handle: "linen-shirt".into(),
                title: "Linen Shirt".into(),
                description: "Relaxed linen shirt.".into(),
                tags: vec!["linen".into()],
                specs: BTreeMap::from([("fit".to_string(), "Relaxed".to_string())]),
            }],
            audience: vec![
                member("ana@example.com", Some(5), Some(Sentiment::Positive)),
                member("bo@example.com", Some(5), Some(Sentiment::Positive)),
                member("cy@example.com", Some(3), Some(Sentiment::Positive)),
                member("di@example.com", None, Some(Sentiment::Positive)),
                member("", Some(5), Some(Sentiment::Positive)),
                member("ed@example.com", Some(5), Some(Sentiment::Neutral)),
            ],
        }
    }

    pub async fn seed_tenant(storage: &Storage) -> Tenant {
        import_tenant(storage, &fixture_import())
            .await
            .expect("seed tenant")
            .tenant
    }

    pub async fn find_question(storage: &Storage, tenant_id: &str, text: &str) -> Question {
        storage
            .list_questions(tenant_id)
            .await
            .expect("list questions")
            .into_iter()
            .find(|q| q.text == text)
            .expect("question exists")
    }
}
