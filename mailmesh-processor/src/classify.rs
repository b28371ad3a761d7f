//! Keyword routing.

use mailmesh_dispatch::Classifier;

const SUPPORT_KEYWORDS: &[&str] = &["billing", "payment", "charge", "invoice", "account"];
const SALES_KEYWORDS: &[&str] = &["sales", "buy", "purchase", "demo", "trial", "price", "pricing"];

/// Routes a message by scanning subject and body for specialization
/// keywords. Anything that matches neither table lands on `general`.
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, content: &str, _sender: &str) -> String {
        let content = content.to_lowercase();
        if SUPPORT_KEYWORDS.iter().any(|kw| content.contains(kw)) {
            "support".to_owned()
        } else if SALES_KEYWORDS.iter().any(|kw| content.contains(kw)) {
            "sales".to_owned()
        } else {
            "general".to_owned()
        }
    }
}
