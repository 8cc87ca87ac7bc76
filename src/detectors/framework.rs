//! detectors/framework.rs
//!
//! Target test frameworks and which language each one can be generated in.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::detectors::language::Language;
use crate::error::TemplateError;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TestFramework {
    #[serde(rename = "junit5+mockito", alias = "junit5-mockito")]
    Junit5Mockito,
    #[serde(rename = "junit5+mockk", alias = "junit5-mockk")]
    Junit5Mockk,
    #[serde(rename = "kotest")]
    Kotest,
}

/* ============================================================
   Public API
   ============================================================ */

impl TestFramework {
    /// Framework used when the configuration names none.
    pub fn default_for(language: Language) -> Self {
        match language {
            Language::Java => TestFramework::Junit5Mockito,
            Language::Kotlin => TestFramework::Junit5Mockk,
        }
    }

    pub fn supports(self, language: Language) -> bool {
        match (self, language) {
            (TestFramework::Junit5Mockito, _) => true,
            (TestFramework::Junit5Mockk, Language::Kotlin) => true,
            (TestFramework::Kotest, Language::Kotlin) => true,
            _ => false,
        }
    }

    pub fn ensure_supports(self, language: Language) -> Result<(), TemplateError> {
        if self.supports(language) {
            Ok(())
        } else {
            Err(TemplateError::UnsupportedCombination {
                framework: self,
                language,
            })
        }
    }

    pub fn uses_junit(self) -> bool {
        matches!(self, TestFramework::Junit5Mockito | TestFramework::Junit5Mockk)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "junit5+mockito" | "junit5-mockito" | "junit" | "mockito" => {
                Some(TestFramework::Junit5Mockito)
            }
            "junit5+mockk" | "junit5-mockk" | "mockk" => Some(TestFramework::Junit5Mockk),
            "kotest" => Some(TestFramework::Kotest),
            _ => None,
        }
    }
}

impl fmt::Display for TestFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestFramework::Junit5Mockito => "junit5+mockito",
            TestFramework::Junit5Mockk => "junit5+mockk",
            TestFramework::Kotest => "kotest",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kotlin_only_frameworks_reject_java() {
        assert!(TestFramework::Kotest.ensure_supports(Language::Java).is_err());
        assert!(TestFramework::Junit5Mockk.ensure_supports(Language::Java).is_err());
        assert!(TestFramework::Junit5Mockito.ensure_supports(Language::Kotlin).is_ok());
    }

    #[test]
    fn parses_config_spellings() {
        assert_eq!(TestFramework::parse("JUnit5+Mockito"), Some(TestFramework::Junit5Mockito));
        assert_eq!(TestFramework::parse("kotest"), Some(TestFramework::Kotest));
        assert_eq!(TestFramework::parse("spock"), None);
    }
}
