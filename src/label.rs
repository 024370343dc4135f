//! Alt-text label normalization.
//!
//! Turns a raw catalog name into the label written to every image of the
//! item. Pure and total: the same input always yields the same label, and
//! an unusable input yields the configured fallback instead of an error.

use crate::models::{ConfigError, LabelConfig};
use regex::{NoExpand, Regex};

/// Characters that never belong in alt-text.
const STRIPPED: &[char] = &['<', '>', '"', '{', '}', '[', ']', '|', '\\', '^', '~', '*', '`'];

/// Label normalizer with catalog-specific casing rules.
#[derive(Debug, Clone)]
pub struct LabelNormalizer {
    fallback: String,
    /// Whole-word matchers and the casing to restore for each term
    preserve: Vec<(Regex, String)>,
}

impl Default for LabelNormalizer {
    fn default() -> Self {
        Self {
            fallback: LabelConfig::default().fallback,
            preserve: Vec::new(),
        }
    }
}

impl LabelNormalizer {
    pub fn new(config: &LabelConfig) -> Result<Self, ConfigError> {
        let mut preserve = Vec::with_capacity(config.preserve_terms.len());
        for term in &config.preserve_terms {
            let term = term.trim();
            if term.is_empty() {
                continue;
            }
            let pattern = format!(r"(?i)\b{}\b", regex::escape(term));
            let re = Regex::new(&pattern).map_err(|e| {
                ConfigError::Invalid(format!("labels.preserve_terms entry {term:?}: {e}"))
            })?;
            preserve.push((re, term.to_string()));
        }

        Ok(Self {
            fallback: config.fallback.trim().to_string(),
            preserve,
        })
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Normalize a raw item name into a display label.
    pub fn normalize(&self, raw: Option<&str>) -> String {
        let cleaned: String = raw
            .unwrap_or_default()
            .chars()
            .filter(|c| !STRIPPED.contains(c))
            .map(|c| if c == '_' || c.is_control() { ' ' } else { c })
            .collect();

        let mut label = cleaned
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        if label.is_empty() {
            return self.fallback.clone();
        }

        for (re, canonical) in &self.preserve {
            if re.is_match(&label) {
                label = re.replace_all(&label, NoExpand(canonical)).into_owned();
            }
        }

        label
    }
}

/// Normalize with the default rules.
pub fn normalize(raw: &str) -> String {
    LabelNormalizer::default().normalize(Some(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_terms(terms: &[&str]) -> LabelNormalizer {
        LabelNormalizer::new(&LabelConfig {
            preserve_terms: terms.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_collapses_whitespace_and_lowercases() {
        assert_eq!(
            normalize("  Dipirona   Sódica\t500MG \n Comprimidos "),
            "dipirona sódica 500mg comprimidos"
        );
    }

    #[test]
    fn test_strips_unsuitable_characters() {
        assert_eq!(normalize("Creme <Hidratante> \"Max\" [200g]"), "creme hidratante max 200g");
        assert_eq!(normalize("kit_presente*especial"), "kit presenteespecial");
    }

    #[test]
    fn test_keeps_accents() {
        assert_eq!(normalize("AÇÚCAR Orgânico"), "açúcar orgânico");
    }

    #[test]
    fn test_empty_input_yields_fallback() {
        let normalizer = LabelNormalizer::default();
        assert_eq!(normalizer.normalize(None), "produto farmacêutico");
        assert_eq!(normalizer.normalize(Some("")), "produto farmacêutico");
        assert_eq!(normalizer.normalize(Some("  <>  ** ")), "produto farmacêutico");
    }

    #[test]
    fn test_configured_fallback_is_trimmed() {
        let normalizer = LabelNormalizer::new(&LabelConfig {
            fallback: "  imagem do produto ".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(normalizer.fallback(), "imagem do produto");
        assert_eq!(normalizer.normalize(Some("\t")), "imagem do produto");
    }

    #[test]
    fn test_preserve_terms_restore_casing_on_whole_words() {
        let normalizer = with_terms(&["mL", "NIVEA"]);
        assert_eq!(normalizer.normalize(Some("Nivea Loção 200ML")), "NIVEA loção 200ml");
        assert_eq!(normalizer.normalize(Some("Soro 500 ML")), "soro 500 mL");
        // Not a whole word, left alone
        assert_eq!(normalizer.normalize(Some("Mlk")), "mlk");
    }

    #[test]
    fn test_deterministic() {
        let normalizer = with_terms(&["VTEX"]);
        let a = normalizer.normalize(Some("Produto  vtex  teste"));
        let b = normalizer.normalize(Some("Produto  vtex  teste"));
        assert_eq!(a, b);
        assert_eq!(a, "produto VTEX teste");
    }

    #[test]
    fn test_normalized_label_is_a_fixed_point() {
        let label = normalize("Shampoo  Anticaspa_400ml");
        assert_eq!(normalize(&label), label);
    }
}
