//! Content redaction stage
//!
//! Rewrites PII in textual tool results before they leave the gateway. The
//! gateway core consumes this only through [`RedactionStage`]; the matching
//! policy behind it is opaque to everything else.

use regex::Regex;

use orchestra_config::{EditMode, PiiEntity, RedactionConfig};
use orchestra_types::{GatewayError, GatewayResult};

/// Opaque text-to-text transformation applied to every textual result segment
pub trait RedactionStage: Send + Sync {
    fn redact(&self, text: &str) -> GatewayResult<String>;
}

/// One compiled rule (entity category + its pattern)
struct CompiledRule {
    entity: PiiEntity,
    pattern: Regex,
}

/// Pattern-based PII redactor.
///
/// Rules are applied in configuration order; each rule rewrites every match
/// in the running text according to the configured edit mode.
pub struct PiiRedactor {
    rules: Vec<CompiledRule>,
    edit_mode: EditMode,
}

fn entity_pattern(entity: PiiEntity) -> &'static str {
    match entity {
        PiiEntity::EmailAddress => r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        // International or local numbers with at least 8 digits overall
        PiiEntity::PhoneNumber => r"\+?\d[\d\s().-]{6,}\d{2}",
        PiiEntity::IpAddress => r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
        PiiEntity::CreditCardNumber => r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b",
    }
}

impl PiiRedactor {
    /// Compile a redactor from its configuration
    pub fn from_config(config: &RedactionConfig) -> GatewayResult<Self> {
        let mut rules = Vec::with_capacity(config.entities.len());

        for &entity in &config.entities {
            let pattern = Regex::new(entity_pattern(entity)).map_err(|e| {
                GatewayError::Redaction(format!(
                    "Failed to compile pattern for {}: {}",
                    entity.label(),
                    e
                ))
            })?;
            rules.push(CompiledRule { entity, pattern });
        }

        Ok(Self {
            rules,
            edit_mode: config.edit_mode,
        })
    }
}

impl RedactionStage for PiiRedactor {
    fn redact(&self, text: &str) -> GatewayResult<String> {
        let mut output = text.to_string();

        for rule in &self.rules {
            output = match self.edit_mode {
                EditMode::Replace => rule
                    .pattern
                    .replace_all(&output, format!("<{}>", rule.entity.label()))
                    .into_owned(),
                EditMode::Mask => rule
                    .pattern
                    .replace_all(&output, |caps: &regex::Captures<'_>| {
                        "*".repeat(caps[0].len())
                    })
                    .into_owned(),
            };
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redactor(entities: Vec<PiiEntity>, edit_mode: EditMode) -> PiiRedactor {
        PiiRedactor::from_config(&RedactionConfig {
            entities,
            edit_mode,
        })
        .unwrap()
    }

    #[test]
    fn test_email_replace() {
        let stage = redactor(vec![PiiEntity::EmailAddress], EditMode::Replace);
        let out = stage
            .redact("Contact alice@example.com or bob@test.org for access")
            .unwrap();
        assert_eq!(
            out,
            "Contact <EMAIL_ADDRESS> or <EMAIL_ADDRESS> for access"
        );
    }

    #[test]
    fn test_email_mask_preserves_length() {
        let stage = redactor(vec![PiiEntity::EmailAddress], EditMode::Mask);
        let out = stage.redact("mail: alice@example.com.").unwrap();
        assert_eq!(out, format!("mail: {}.", "*".repeat("alice@example.com".len())));
    }

    #[test]
    fn test_ip_address() {
        let stage = redactor(vec![PiiEntity::IpAddress], EditMode::Replace);
        let out = stage.redact("peer 10.0.0.17 connected").unwrap();
        assert_eq!(out, "peer <IP_ADDRESS> connected");
    }

    #[test]
    fn test_credit_card() {
        let stage = redactor(vec![PiiEntity::CreditCardNumber], EditMode::Replace);
        let out = stage.redact("card 4111 1111 1111 1111 on file").unwrap();
        assert_eq!(out, "card <CREDIT_CARD_NUMBER> on file");
    }

    #[test]
    fn test_multiple_entities_in_order() {
        let stage = redactor(
            vec![PiiEntity::EmailAddress, PiiEntity::IpAddress],
            EditMode::Replace,
        );
        let out = stage
            .redact("alice@example.com logged in from 192.168.1.4")
            .unwrap();
        assert_eq!(out, "<EMAIL_ADDRESS> logged in from <IP_ADDRESS>");
    }

    #[test]
    fn test_no_match_is_identity() {
        let stage = redactor(vec![PiiEntity::EmailAddress], EditMode::Replace);
        let out = stage.redact("nothing sensitive here").unwrap();
        assert_eq!(out, "nothing sensitive here");
    }
}
