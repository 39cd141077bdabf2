//! Safety gate: refuses to publish text that still carries verification markers.

use serde::Serialize;

use trustline_shared::{Draft, Result, TrustlineError, extract_markers};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum GateVerdict {
    Clear,
    Blocked { markers: Vec<String> },
}

impl GateVerdict {
    pub fn is_clear(&self) -> bool {
        matches!(self, Self::Clear)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Clear => Ok(()),
            Self::Blocked { markers } => Err(TrustlineError::NeedsVerification { markers }),
        }
    }
}

/// Scan rendered text for `[NEEDS_VERIFICATION: ...]` tokens.
pub fn scan(text: &str) -> GateVerdict {
    let markers = extract_markers(text);
    if markers.is_empty() {
        GateVerdict::Clear
    } else {
        GateVerdict::Blocked { markers }
    }
}

/// Gate a draft on its rendered body and its structured marker list.
/// Either one carrying a marker blocks.
pub fn check(draft: &Draft) -> GateVerdict {
    let mut markers = extract_markers(&draft.body);
    for label in &draft.verification {
        if !markers.contains(label) {
            markers.push(label.clone());
        }
    }
    if markers.is_empty() {
        GateVerdict::Clear
    } else {
        GateVerdict::Blocked { markers }
    }
}

#[cfg(test)]
mod tests {
    use trustline_shared::{DraftContent, DraftOrigin, FaqContent, marker};

    use super::*;

    fn faq(answer: &str) -> Draft {
        Draft::new(
            DraftContent::Faq(FaqContent {
                question: "Can I return it?".into(),
                answer: answer.into(),
            }),
            format!("Can I return it?\n\n{answer}"),
            vec![],
            DraftOrigin::Fallback {
                reason: "llm_disabled".into(),
            },
        )
    }

    #[test]
    fn blocks_on_any_marker() {
        let draft = faq(&format!("Returns are accepted within {}.", marker("returns window")));
        assert_eq!(
            check(&draft),
            GateVerdict::Blocked {
                markers: vec!["returns window".into()]
            }
        );
        let err = check(&draft).into_result().unwrap_err();
        assert_eq!(err.code(), "needs_verification");
    }

    #[test]
    fn structured_markers_block_even_when_body_is_clean() {
        let mut draft = faq("Returns are accepted within 30 days.");
        draft.verification = vec!["restocking fee".into()];
        assert_eq!(
            check(&draft),
            GateVerdict::Blocked {
                markers: vec!["restocking fee".into()]
            }
        );

        let mut both = faq(&format!("Returns within {}.", marker("returns window")));
        both.verification.push("restocking fee".into());
        let GateVerdict::Blocked { markers } = check(&both) else {
            panic!("expected block");
        };
        assert_eq!(markers, ["returns window", "restocking fee"]);
    }

    #[test]
    fn clear_text_passes() {
        let draft = faq("Returns are accepted within 30 days.");
        assert!(check(&draft).is_clear());
        assert!(scan("[NEEDS_VERIFICATION without a colon").is_clear());
    }

    #[test]
    fn gate_matches_every_marker_it_can_render() {
        for label in ["returns window", "shipping eu days", "x"] {
            let verdict = scan(&format!("prefix {} suffix", marker(label)));
            assert_eq!(
                verdict,
                GateVerdict::Blocked {
                    markers: vec![label.to_string()]
                }
            );
        }
    }
}
