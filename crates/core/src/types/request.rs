//! Release requests and their persisted card state.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::action::{ActionKind, ButtonAction, composite_key};

/// One deployable unit within a release request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Service (and CI job) name, unique within a request.
    pub name: String,
    /// Project identifier shown in the card title.
    #[serde(default)]
    pub object_id: String,
    /// Candidate branches; the first one is built and displayed.
    #[serde(default)]
    pub branches: Vec<String>,
    /// Requested action tags, free-form.
    #[serde(default)]
    pub actions: Vec<String>,
}

impl ServiceSpec {
    /// The branch that gets built.
    #[must_use]
    pub fn primary_branch(&self) -> Option<&str> {
        self.branches.first().map(String::as_str)
    }

    /// Canonicalized view of the declared actions, in declaration order.
    pub fn action_kinds(&self) -> impl Iterator<Item = ActionKind> + '_ {
        self.actions.iter().map(|a| ActionKind::canonicalize(a))
    }

    /// Whether any declared action resolves to `kind`.
    #[must_use]
    pub fn has_action(&self, kind: &ActionKind) -> bool {
        self.action_kinds().any(|k| &k == kind)
    }
}

/// A card request as submitted by a caller or produced from an OA approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub object_id: String,
    /// Chat destination of the card and of build notifications.
    #[serde(default)]
    pub receive_id: String,
    /// `open_id`, `user_id`, `chat_id`, ...
    #[serde(default)]
    pub receive_id_type: String,
}

impl ReleaseRequest {
    /// Whether a destination is set.
    #[must_use]
    pub const fn has_receiver(&self) -> bool {
        !self.receive_id.is_empty() && !self.receive_id_type.is_empty()
    }

    /// Look up a service by name.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Whether any service declares a gray action.
    #[must_use]
    pub fn has_gray(&self) -> bool {
        self.services.iter().any(|s| s.has_action(&ActionKind::Gray))
    }

    /// The request as it should be displayed.
    ///
    /// While any service still offers a gray release, only services with a
    /// gray action are shown and their official actions are hidden. The
    /// stored request is never modified; the view is recomputed each time.
    #[must_use]
    pub fn display_view(&self) -> Cow<'_, Self> {
        if !self.has_gray() {
            return Cow::Borrowed(self);
        }

        let services = self
            .services
            .iter()
            .filter(|s| s.has_action(&ActionKind::Gray))
            .map(|s| ServiceSpec {
                actions: s
                    .actions
                    .iter()
                    .filter(|a| ActionKind::canonicalize(a) != ActionKind::Official)
                    .cloned()
                    .collect(),
                ..s.clone()
            })
            .collect();

        Cow::Owned(Self {
            services,
            ..self.clone()
        })
    }
}

/// Persisted state of one distributed card.
///
/// Map keys use the `"{service}:{action}"` format from
/// [`composite_key`](super::composite_key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardState {
    /// The request exactly as first submitted.
    #[serde(alias = "OriginalRequest")]
    pub original_request: ReleaseRequest,
    #[serde(default, alias = "DisabledActions", deserialize_with = "null_as_default")]
    pub disabled_actions: BTreeMap<String, bool>,
    #[serde(default, alias = "ActionCounts", deserialize_with = "null_as_default")]
    pub action_counts: BTreeMap<String, u32>,
}

impl CardState {
    /// Fresh state with nothing disabled and no clicks.
    #[must_use]
    pub const fn new(original_request: ReleaseRequest) -> Self {
        Self {
            original_request,
            disabled_actions: BTreeMap::new(),
            action_counts: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_disabled(&self, service: &str, action: &str) -> bool {
        self.disabled_actions
            .get(&composite_key(service, action))
            .copied()
            .unwrap_or(false)
    }

    #[must_use]
    pub fn count(&self, service: &str, action: &str) -> u32 {
        self.action_counts
            .get(&composite_key(service, action))
            .copied()
            .unwrap_or(0)
    }

    /// Mark a button disabled. Repeated calls have no further effect.
    pub fn disable(&mut self, service: &str, action: &str) {
        self.disabled_actions
            .insert(composite_key(service, action), true);
    }

    /// Bump a click counter by one and return the new value.
    pub fn increment(&mut self, service: &str, action: &str) -> u32 {
        let count = self
            .action_counts
            .entry(composite_key(service, action))
            .or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Request for the follow-up card sent when batch release is stopped.
    ///
    /// Services whose official release already ran are dropped. For the rest,
    /// every gray or official tag collapses into a single `official` entry at
    /// the position of the first one; other tags are kept. Returns `None` when
    /// no service is left.
    #[must_use]
    pub fn official_follow_up(&self) -> Option<ReleaseRequest> {
        let official = ButtonAction::OfficialRelease;
        let services: Vec<ServiceSpec> = self
            .original_request
            .services
            .iter()
            .filter(|s| self.count(&s.name, official.as_str()) == 0)
            .map(|s| {
                let mut actions = Vec::with_capacity(s.actions.len());
                let mut has_official = false;
                for tag in &s.actions {
                    if ActionKind::canonicalize(tag).is_release() {
                        if !has_official {
                            actions.push("official".to_string());
                            has_official = true;
                        }
                    } else {
                        actions.push(tag.clone());
                    }
                }
                ServiceSpec {
                    actions,
                    ..s.clone()
                }
            })
            .collect();

        if services.is_empty() {
            return None;
        }

        Some(ReleaseRequest {
            services,
            ..self.original_request.clone()
        })
    }
}

/// Records written by older deployments stored missing maps as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn service(name: &str, actions: &[&str]) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            object_id: name.to_string(),
            branches: vec!["master".to_string()],
            actions: actions.iter().map(ToString::to_string).collect(),
        }
    }

    fn request(services: Vec<ServiceSpec>) -> ReleaseRequest {
        ReleaseRequest {
            title: "release".to_string(),
            services,
            object_id: String::new(),
            receive_id: "oc_1".to_string(),
            receive_id_type: "chat_id".to_string(),
        }
    }

    #[test]
    fn test_display_view_without_gray_is_borrowed() {
        let req = request(vec![service("a", &["official"])]);
        assert!(matches!(req.display_view(), Cow::Borrowed(_)));
    }

    #[test]
    fn test_display_view_hides_official_and_non_gray_services() {
        let req = request(vec![
            service("a", &["灰度", "正式", "rollback"]),
            service("b", &["official"]),
        ]);
        let view = req.display_view();
        assert_eq!(view.services.len(), 1);
        assert_eq!(view.services[0].name, "a");
        assert_eq!(view.services[0].actions, vec!["灰度", "rollback"]);
        // The stored request is untouched.
        assert_eq!(req.services[0].actions, vec!["灰度", "正式", "rollback"]);
    }

    #[test]
    fn test_disable_is_idempotent() {
        let mut state = CardState::new(request(vec![service("a", &["gray"])]));
        state.disable("a", "do_rollback");
        let once = state.clone();
        state.disable("a", "do_rollback");
        assert_eq!(state, once);
        assert!(state.is_disabled("a", "do_rollback"));
    }

    #[test]
    fn test_increment_counts_each_call() {
        let mut state = CardState::new(request(vec![service("a", &["gray"])]));
        assert_eq!(state.increment("a", "do_gray_release"), 1);
        assert_eq!(state.increment("a", "do_gray_release"), 2);
        assert_eq!(state.count("a", "do_gray_release"), 2);
        assert_eq!(state.count("a", "do_restart"), 0);
    }

    #[test]
    fn test_official_follow_up_collapses_release_tags() {
        let state = CardState::new(request(vec![
            service("a", &["gray", "check", "official", "release"]),
            service("b", &["official"]),
        ]));
        let follow_up = state.official_follow_up().unwrap();
        assert_eq!(follow_up.services[0].actions, vec!["official", "check"]);
        assert_eq!(follow_up.services[1].actions, vec!["official"]);
    }

    #[test]
    fn test_official_follow_up_drops_completed_services() {
        let mut state = CardState::new(request(vec![
            service("a", &["gray"]),
            service("b", &["gray"]),
        ]));
        state.increment("a", "do_official_release");
        let follow_up = state.official_follow_up().unwrap();
        assert_eq!(follow_up.services.len(), 1);
        assert_eq!(follow_up.services[0].name, "b");

        state.increment("b", "do_official_release");
        assert!(state.official_follow_up().is_none());
    }

    #[test]
    fn test_card_state_json_keys() {
        let state = CardState::new(request(vec![service("a", &["gray"])]));
        let value = serde_json::to_value(&state).unwrap();
        assert!(value.get("originalRequest").is_some());
        assert!(value.get("disabledActions").is_some());
        assert!(value.get("actionCounts").is_some());
    }

    #[test]
    fn test_card_state_accepts_legacy_records() {
        let json = r#"{
            "OriginalRequest": {"title": "t", "services": []},
            "DisabledActions": null,
            "ActionCounts": {"a:do_restart": 3}
        }"#;
        let state: CardState = serde_json::from_str(json).unwrap();
        assert!(state.disabled_actions.is_empty());
        assert_eq!(state.count("a", "do_restart"), 3);
    }
}
