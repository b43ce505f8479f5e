use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a plugin failed inside an operation.
///
/// The marketplace answers with HTTP-like codes; only a handful carry a
/// dedicated explanation. Everything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawCode", into = "String")]
pub enum ReasonCode {
    PaymentRequired,
    Forbidden,
    Timeout,
    Unknown(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCode {
    Number(i64),
    Text(String),
}

impl ReasonCode {
    pub fn parse(code: &str) -> Self {
        match code.trim() {
            "401" => ReasonCode::PaymentRequired,
            "403" => ReasonCode::Forbidden,
            "408" => ReasonCode::Timeout,
            other => ReasonCode::Unknown(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            ReasonCode::PaymentRequired => "401",
            ReasonCode::Forbidden => "403",
            ReasonCode::Timeout => "408",
            ReasonCode::Unknown(code) => code,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ReasonCode::PaymentRequired => "This is paid plugin. If you have already purchased this plugin, \
                 check the 'site_token' field in your setting file(config/production/xe.php)."
                .to_string(),
            ReasonCode::Forbidden => {
                "This is paid plugin. You need to buy it in the Market-place.".to_string()
            }
            ReasonCode::Timeout => {
                "The operation exceeded its time limit and was stopped.".to_string()
            }
            ReasonCode::Unknown(code) => format!("Unknown failure (code: {code})."),
        }
    }
}

impl From<RawCode> for ReasonCode {
    fn from(raw: RawCode) -> Self {
        match raw {
            RawCode::Number(n) => ReasonCode::parse(&n.to_string()),
            RawCode::Text(s) => ReasonCode::parse(&s),
        }
    }
}

impl From<ReasonCode> for String {
    fn from(code: ReasonCode) -> Self {
        code.code().to_string()
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_table() {
        assert_eq!(ReasonCode::parse("401"), ReasonCode::PaymentRequired);
        assert_eq!(ReasonCode::parse("403"), ReasonCode::Forbidden);
        assert!(ReasonCode::PaymentRequired.message().contains("site_token"));
        assert!(ReasonCode::Forbidden.message().contains("Market-place"));
    }

    #[test]
    fn test_unknown_code_degrades() {
        let code = ReasonCode::parse("500");
        assert_eq!(code, ReasonCode::Unknown("500".to_string()));
        assert_eq!(code.message(), "Unknown failure (code: 500).");
    }

    #[test]
    fn test_accepts_numbers_and_strings() {
        let codes: Vec<ReasonCode> = serde_json::from_str(r#"[401, "403", "exit:2"]"#).unwrap();
        assert_eq!(
            codes,
            vec![
                ReasonCode::PaymentRequired,
                ReasonCode::Forbidden,
                ReasonCode::Unknown("exit:2".to_string())
            ]
        );
        assert_eq!(
            serde_json::to_string(&ReasonCode::PaymentRequired).unwrap(),
            "\"401\""
        );
    }
}
