//! Canonical agent identity strings and the commit message prefix.
//!
//! Formatting and parsing live side by side so they stay inverses:
//! `parse_author(&format_author(&id)) == Ok(id)` for every valid identity.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AttributionError, FormatError};

/// Prefix every agent commit message starts with.
pub const AGENT_PREFIX: &str = "[agent]";

const ON_BEHALF_OF: &str = " on behalf of ";

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s<>]+@[^@\s<>]+$").expect("static regex"))
}

/// Who an agent commit is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_name: String,
    pub operator_name: String,
    pub operator_email: String,
}

impl AgentIdentity {
    /// Build a validated identity.
    pub fn new(
        agent_name: impl Into<String>,
        operator_name: impl Into<String>,
        operator_email: impl Into<String>,
    ) -> Result<Self, FormatError> {
        let identity = Self {
            agent_name: agent_name.into(),
            operator_name: operator_name.into(),
            operator_email: operator_email.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Check the identity can be embedded in a commit and parsed back.
    ///
    /// Identities returned by [`parse_author`] are claims read from history
    /// and are not required to pass this check.
    pub fn validate(&self) -> Result<(), FormatError> {
        validate_name("agent name", &self.agent_name)?;
        validate_name("operator name", &self.operator_name)?;
        if self.agent_name.contains(ON_BEHALF_OF.trim()) {
            return Err(FormatError::InvalidIdentity(format!(
                "agent name {:?} must not contain \"on behalf of\"",
                self.agent_name
            )));
        }
        if !email_pattern().is_match(&self.operator_email) {
            return Err(FormatError::InvalidIdentity(format!(
                "operator email {:?} is not an address",
                self.operator_email
            )));
        }
        Ok(())
    }
}

fn validate_name(field: &str, value: &str) -> Result<(), FormatError> {
    if value.trim().is_empty() {
        return Err(FormatError::InvalidIdentity(format!("{field} is empty")));
    }
    if value.trim() != value {
        return Err(FormatError::InvalidIdentity(format!(
            "{field} {value:?} has surrounding whitespace"
        )));
    }
    if value.contains(['<', '>', '\n', '\r', '\0']) {
        return Err(FormatError::InvalidIdentity(format!(
            "{field} {value:?} contains a reserved character"
        )));
    }
    Ok(())
}

/// Identity fields supplied per call or as process defaults; any may be
/// missing until resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialIdentity {
    pub agent_name: Option<String>,
    pub operator_name: Option<String>,
    pub operator_email: Option<String>,
}

impl PartialIdentity {
    /// Fill missing fields from `defaults` and validate the result.
    pub fn resolve(&self, defaults: &PartialIdentity) -> Result<AgentIdentity, AttributionError> {
        fn pick(own: &Option<String>, fallback: &Option<String>) -> Option<String> {
            let nonblank = |v: &&String| !v.trim().is_empty();
            own.as_ref()
                .filter(nonblank)
                .or_else(|| fallback.as_ref().filter(nonblank))
                .cloned()
        }

        let agent_name = pick(&self.agent_name, &defaults.agent_name);
        let operator_name = pick(&self.operator_name, &defaults.operator_name);
        let operator_email = pick(&self.operator_email, &defaults.operator_email);

        let missing: Vec<&str> = [
            ("agent_name", agent_name.is_none()),
            ("operator_name", operator_name.is_none()),
            ("operator_email", operator_email.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        match (agent_name, operator_name, operator_email) {
            (Some(agent), Some(operator), Some(email)) => {
                Ok(AgentIdentity::new(agent, operator, email)?)
            }
            _ => Err(AttributionError::MissingIdentity(missing.join(", "))),
        }
    }
}

impl From<AgentIdentity> for PartialIdentity {
    fn from(identity: AgentIdentity) -> Self {
        Self {
            agent_name: Some(identity.agent_name),
            operator_name: Some(identity.operator_name),
            operator_email: Some(identity.operator_email),
        }
    }
}

/// `"<agent> on behalf of <operator> <<email>>"`
pub fn format_author(identity: &AgentIdentity) -> String {
    format!(
        "{}{}{} <{}>",
        identity.agent_name, ON_BEHALF_OF, identity.operator_name, identity.operator_email
    )
}

/// Normalize a message to start with exactly `"[agent] "`.
///
/// Rejects empty and whitespace-only messages, and a bare prefix with
/// nothing after it. Idempotent.
pub fn format_message(raw: &str) -> Result<String, FormatError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(FormatError::InvalidMessage(
            "commit message is empty".to_string(),
        ));
    }

    let body = trimmed
        .strip_prefix(AGENT_PREFIX)
        .map(str::trim_start)
        .unwrap_or(trimmed);
    if body.is_empty() {
        return Err(FormatError::InvalidMessage(format!(
            "commit message has no content after {AGENT_PREFIX}"
        )));
    }

    Ok(format!("{AGENT_PREFIX} {body}"))
}

/// Parse an author string back into the identity it claims.
///
/// Accepts the raw value of a git `author` header: anything after the
/// closing `>` (timestamp, timezone) is ignored, and a missing `<email>`
/// parses with an empty `operator_email`. Fails with `UnrecognizedFormat`
/// when the string has no `on behalf of` delimiter.
pub fn parse_author(raw: &str) -> Result<AgentIdentity, FormatError> {
    let raw = raw.trim();
    let (agent, rest) = raw
        .split_once(ON_BEHALF_OF)
        .ok_or_else(|| FormatError::UnrecognizedFormat(raw.to_string()))?;

    let (operator, email) = match rest.split_once('<') {
        Some((name, tail)) => {
            let email = tail.split_once('>').map_or(tail, |(email, _)| email);
            (name.trim(), email.trim())
        }
        None => (rest.trim(), ""),
    };

    let agent = agent.trim();
    if agent.is_empty() || operator.is_empty() {
        return Err(FormatError::UnrecognizedFormat(raw.to_string()));
    }

    Ok(AgentIdentity {
        agent_name: agent.to_string(),
        operator_name: operator.to_string(),
        operator_email: email.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn andor() -> AgentIdentity {
        AgentIdentity::new("Claude", "Andor", "andor@andor.us").unwrap()
    }

    #[test]
    fn formats_canonical_author() {
        assert_eq!(
            format_author(&andor()),
            "Claude on behalf of Andor <andor@andor.us>"
        );
    }

    #[test]
    fn parses_git_header_value_with_timestamp() {
        let parsed =
            parse_author("Claude on behalf of Andor <andor@andor.us> 1700000000 +0000").unwrap();
        assert_eq!(parsed, andor());
    }

    #[test]
    fn parses_without_email() {
        let parsed = parse_author("Claude on behalf of Andor").unwrap();
        assert_eq!(parsed.operator_name, "Andor");
        assert_eq!(parsed.operator_email, "");
    }

    #[test]
    fn parses_unterminated_email() {
        let parsed = parse_author("Claude on behalf of Andor <andor@andor.us").unwrap();
        assert_eq!(parsed.operator_email, "andor@andor.us");
    }

    #[test]
    fn human_author_is_unrecognized() {
        let err = parse_author("Jane Doe <jane@example.com> 1700000000 +0100").unwrap_err();
        assert!(matches!(err, FormatError::UnrecognizedFormat(_)));
    }

    #[test]
    fn missing_operator_is_unrecognized() {
        assert!(parse_author("Claude on behalf of  <a@b>").is_err());
        assert!(parse_author(" on behalf of Andor <a@b>").is_err());
    }

    #[test]
    fn message_prefix_added_once() {
        assert_eq!(
            format_message("Update README.md").unwrap(),
            "[agent] Update README.md"
        );
        assert_eq!(
            format_message("[agent] Update README.md").unwrap(),
            "[agent] Update README.md"
        );
        assert_eq!(format_message("[agent]fix").unwrap(), "[agent] fix");
        assert_eq!(format_message("  spaced out \n").unwrap(), "[agent] spaced out");
    }

    #[test]
    fn empty_messages_rejected() {
        for raw in ["", "   ", "\n\t", "[agent]", "[agent]   "] {
            assert!(
                matches!(format_message(raw), Err(FormatError::InvalidMessage(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn identity_validation() {
        assert!(AgentIdentity::new("", "Andor", "a@b").is_err());
        assert!(AgentIdentity::new("Claude", " Andor", "a@b").is_err());
        assert!(AgentIdentity::new("Claude", "An<dor", "a@b").is_err());
        assert!(AgentIdentity::new("Claude", "Andor", "not-an-email").is_err());
        assert!(AgentIdentity::new("Claude", "Andor", "a@b@c").is_err());
        assert!(AgentIdentity::new("X on behalf of Y", "Andor", "a@b").is_err());
        assert!(AgentIdentity::new("Claude", "Andor", "root@localhost").is_ok());
    }

    #[test]
    fn resolve_prefers_request_fields() {
        let defaults = PartialIdentity::from(andor());
        let request = PartialIdentity {
            agent_name: Some("Reviewer".to_string()),
            ..Default::default()
        };
        let resolved = request.resolve(&defaults).unwrap();
        assert_eq!(resolved.agent_name, "Reviewer");
        assert_eq!(resolved.operator_name, "Andor");
    }

    #[test]
    fn blank_request_field_falls_back_to_default() {
        let defaults = PartialIdentity::from(andor());
        let request = PartialIdentity {
            agent_name: Some("".to_string()),
            operator_name: Some("  ".to_string()),
            operator_email: None,
        };
        let resolved = request.resolve(&defaults).unwrap();
        assert_eq!(resolved, andor());
    }

    #[test]
    fn resolve_reports_every_missing_field() {
        let defaults = PartialIdentity {
            agent_name: Some("Claude".to_string()),
            operator_name: Some("   ".to_string()),
            operator_email: None,
        };
        match PartialIdentity::default().resolve(&defaults) {
            Err(AttributionError::MissingIdentity(fields)) => {
                assert_eq!(fields, "operator_name, operator_email");
            }
            other => panic!("expected MissingIdentity, got {other:?}"),
        }
    }

    #[test]
    fn resolve_rejects_invalid_email() {
        let request = PartialIdentity {
            agent_name: Some("Claude".to_string()),
            operator_name: Some("Andor".to_string()),
            operator_email: Some("nope".to_string()),
        };
        assert!(matches!(
            request.resolve(&PartialIdentity::default()),
            Err(AttributionError::InvalidIdentity(_))
        ));
    }

    proptest! {
        #[test]
        fn author_roundtrip(
            agent in "[A-Za-z][A-Za-z0-9 ._-]{0,20}[A-Za-z0-9]",
            operator in "[A-Za-z][A-Za-z0-9 ._'-]{0,20}[A-Za-z0-9]",
            email in "[a-z0-9._%+-]{1,16}@[a-z0-9-]{1,12}\\.[a-z]{2,6}",
        ) {
            let identity = AgentIdentity::new(agent, operator, email);
            prop_assume!(identity.is_ok());
            let identity = identity.unwrap();
            prop_assert_eq!(parse_author(&format_author(&identity)).unwrap(), identity);
        }

        #[test]
        fn message_formatting_is_idempotent(raw in "\\PC{0,60}") {
            if let Ok(once) = format_message(&raw) {
                prop_assert!(once.starts_with("[agent] "));
                prop_assert_eq!(format_message(&once).unwrap(), once);
            }
        }
    }
}
