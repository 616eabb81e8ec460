//! Action tags and button tokens.
//!
//! Release requests carry free-form action tags (`gray`, `灰度`, `Release`, ...).
//! [`ActionKind::canonicalize`] is the only place those tags are resolved, and both
//! the card renderer and the callback handler go through it.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::DeployType;

/// Pseudo-service name that keys the two batch buttons.
pub const BATCH_SERVICE: &str = "BATCH";

/// Build the `"{service}:{action}"` key used by the disabled-action and
/// click-count maps.
///
/// ```
/// use chatops_core::composite_key;
///
/// assert_eq!(composite_key("api-prod", "do_restart"), "api-prod:do_restart");
/// ```
#[must_use]
pub fn composite_key(service: &str, action: &str) -> String {
    format!("{service}:{action}")
}

/// Canonical meaning of a requested action tag.
///
/// Matching is case-insensitive and ignores surrounding whitespace. Unknown
/// tags are kept verbatim in [`ActionKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// `gray`, `灰度`
    Gray,
    /// `official`, `release`, `正式`
    Official,
    /// `rollback`, `回滚`
    Rollback,
    /// `restart`, `重启`
    Restart,
    /// `check`, `验收`. Accepted as input, never rendered.
    Check,
    /// Anything else.
    Other(String),
}

impl ActionKind {
    /// Resolve a free-form action tag.
    ///
    /// ```
    /// use chatops_core::ActionKind;
    ///
    /// assert_eq!(ActionKind::canonicalize("Release"), ActionKind::Official);
    /// assert_eq!(ActionKind::canonicalize("灰度"), ActionKind::Gray);
    /// assert_eq!(
    ///     ActionKind::canonicalize("migrate"),
    ///     ActionKind::Other("migrate".to_string())
    /// );
    /// ```
    #[must_use]
    pub fn canonicalize(tag: &str) -> Self {
        let trimmed = tag.trim();
        match trimmed.to_lowercase().as_str() {
            "gray" | "灰度" => Self::Gray,
            "official" | "release" | "正式" => Self::Official,
            "rollback" | "回滚" => Self::Rollback,
            "restart" | "重启" => Self::Restart,
            "check" | "验收" => Self::Check,
            _ => Self::Other(trimmed.to_string()),
        }
    }

    /// Whether this kind is one of the release kinds (gray or official).
    #[must_use]
    pub const fn is_release(&self) -> bool {
        matches!(self, Self::Gray | Self::Official)
    }

    /// The button this action renders as.
    #[must_use]
    pub fn button_action(&self) -> ButtonAction {
        match self {
            Self::Gray => ButtonAction::GrayRelease,
            Self::Official => ButtonAction::OfficialRelease,
            Self::Rollback => ButtonAction::Rollback,
            Self::Restart => ButtonAction::Restart,
            Self::Check => ButtonAction::Check,
            Self::Other(tag) => ButtonAction::Custom(format!("do_{tag}")),
        }
    }
}

/// Token carried in a button's `value.action`.
///
/// Serialized as its string form (`do_gray_release`, `batch_release_all`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ButtonAction {
    /// `do_gray_release`
    GrayRelease,
    /// `do_official_release`
    OfficialRelease,
    /// `do_rollback`
    Rollback,
    /// `do_restart`
    Restart,
    /// `do_check`
    Check,
    /// `batch_release_all`
    BatchReleaseAll,
    /// `stop_batch_release`
    StopBatchRelease,
    /// Any other token, stored in full (including the `do_` prefix).
    Custom(String),
}

impl ButtonAction {
    /// Parse a token received from a button callback.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token {
            "do_gray_release" => Self::GrayRelease,
            "do_official_release" => Self::OfficialRelease,
            "do_rollback" => Self::Rollback,
            "do_restart" => Self::Restart,
            "do_check" => Self::Check,
            "batch_release_all" => Self::BatchReleaseAll,
            "stop_batch_release" => Self::StopBatchRelease,
            other => Self::Custom(other.to_string()),
        }
    }

    /// The wire token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::GrayRelease => "do_gray_release",
            Self::OfficialRelease => "do_official_release",
            Self::Rollback => "do_rollback",
            Self::Restart => "do_restart",
            Self::Check => "do_check",
            Self::BatchReleaseAll => "batch_release_all",
            Self::StopBatchRelease => "stop_batch_release",
            Self::Custom(token) => token,
        }
    }

    /// Deploy type for the four single-service build buttons.
    #[must_use]
    pub const fn deploy_type(&self) -> Option<DeployType> {
        match self {
            Self::GrayRelease => Some(DeployType::Gray),
            Self::OfficialRelease => Some(DeployType::Deploy),
            Self::Rollback => Some(DeployType::Rollback),
            Self::Restart => Some(DeployType::Restart),
            _ => None,
        }
    }

    /// Whether a click on this button bumps its click counter.
    #[must_use]
    pub const fn counts_clicks(&self) -> bool {
        !matches!(
            self,
            Self::BatchReleaseAll | Self::StopBatchRelease | Self::Rollback
        )
    }

    /// Whether this button is disabled once clicked.
    ///
    /// Restart, gray, official and batch-start stay clickable.
    #[must_use]
    pub const fn disables_on_click(&self) -> bool {
        !matches!(
            self,
            Self::Restart | Self::GrayRelease | Self::BatchReleaseAll | Self::OfficialRelease
        )
    }
}

impl fmt::Display for ButtonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ButtonAction {
    fn from(token: String) -> Self {
        match Self::parse(&token) {
            Self::Custom(_) => Self::Custom(token),
            known => known,
        }
    }
}

impl From<ButtonAction> for String {
    fn from(action: ButtonAction) -> Self {
        match action {
            ButtonAction::Custom(token) => token,
            known => known.as_str().to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_synonyms() {
        assert_eq!(ActionKind::canonicalize("gray"), ActionKind::Gray);
        assert_eq!(ActionKind::canonicalize("GRAY"), ActionKind::Gray);
        assert_eq!(ActionKind::canonicalize("灰度"), ActionKind::Gray);
        assert_eq!(ActionKind::canonicalize("official"), ActionKind::Official);
        assert_eq!(ActionKind::canonicalize("release"), ActionKind::Official);
        assert_eq!(ActionKind::canonicalize("正式"), ActionKind::Official);
        assert_eq!(ActionKind::canonicalize(" Rollback "), ActionKind::Rollback);
        assert_eq!(ActionKind::canonicalize("回滚"), ActionKind::Rollback);
        assert_eq!(ActionKind::canonicalize("restart"), ActionKind::Restart);
        assert_eq!(ActionKind::canonicalize("重启"), ActionKind::Restart);
        assert_eq!(ActionKind::canonicalize("Check"), ActionKind::Check);
        assert_eq!(ActionKind::canonicalize("验收"), ActionKind::Check);
    }

    #[test]
    fn test_canonicalize_unknown_keeps_tag() {
        assert_eq!(
            ActionKind::canonicalize("Migrate"),
            ActionKind::Other("Migrate".to_string())
        );
    }

    #[test]
    fn test_button_action_mapping() {
        assert_eq!(ActionKind::Gray.button_action().as_str(), "do_gray_release");
        assert_eq!(
            ActionKind::Official.button_action().as_str(),
            "do_official_release"
        );
        assert_eq!(ActionKind::Rollback.button_action().as_str(), "do_rollback");
        assert_eq!(ActionKind::Restart.button_action().as_str(), "do_restart");
        assert_eq!(ActionKind::Check.button_action().as_str(), "do_check");
        assert_eq!(
            ActionKind::Other("migrate".to_string())
                .button_action()
                .as_str(),
            "do_migrate"
        );
    }

    #[test]
    fn test_parse_known_tokens() {
        for token in [
            "do_gray_release",
            "do_official_release",
            "do_rollback",
            "do_restart",
            "do_check",
            "batch_release_all",
            "stop_batch_release",
        ] {
            let action = ButtonAction::parse(token);
            assert!(!matches!(action, ButtonAction::Custom(_)), "{token}");
            assert_eq!(action.as_str(), token);
        }
        assert_eq!(
            ButtonAction::parse("do_migrate"),
            ButtonAction::Custom("do_migrate".to_string())
        );
    }

    #[test]
    fn test_click_policies() {
        assert!(ButtonAction::GrayRelease.counts_clicks());
        assert!(ButtonAction::OfficialRelease.counts_clicks());
        assert!(ButtonAction::Restart.counts_clicks());
        assert!(!ButtonAction::Rollback.counts_clicks());
        assert!(!ButtonAction::BatchReleaseAll.counts_clicks());
        assert!(!ButtonAction::StopBatchRelease.counts_clicks());

        assert!(!ButtonAction::GrayRelease.disables_on_click());
        assert!(!ButtonAction::OfficialRelease.disables_on_click());
        assert!(!ButtonAction::Restart.disables_on_click());
        assert!(!ButtonAction::BatchReleaseAll.disables_on_click());
        assert!(ButtonAction::Rollback.disables_on_click());
        assert!(ButtonAction::StopBatchRelease.disables_on_click());
        assert!(ButtonAction::Custom("do_migrate".to_string()).disables_on_click());
    }

    #[test]
    fn test_deploy_types() {
        assert_eq!(
            ButtonAction::GrayRelease.deploy_type(),
            Some(DeployType::Gray)
        );
        assert_eq!(
            ButtonAction::OfficialRelease.deploy_type(),
            Some(DeployType::Deploy)
        );
        assert_eq!(ButtonAction::BatchReleaseAll.deploy_type(), None);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&ButtonAction::StopBatchRelease).unwrap();
        assert_eq!(json, "\"stop_batch_release\"");

        let parsed: ButtonAction = serde_json::from_str("\"do_restart\"").unwrap();
        assert_eq!(parsed, ButtonAction::Restart);
    }
}
